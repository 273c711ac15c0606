//! Terminal replay player
//!
//! Keys: space pause/resume, left/right skip 5s, +/- speed, 0-9 seek to
//! percent, Home/End jump, r restart, q quit.

use anyhow::{Context, Result};
use battle_replay::{EventData, PlaybackStatus, Player, ReplayDocument, ReplayEvent};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute, queue, style, terminal};
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

const FRAME_INTERVAL: Duration = Duration::from_millis(33);
const SKIP_MS: u64 = 5_000;
const SPEED_STEPS: [f64; 9] = [0.25, 0.5, 1.0, 1.5, 2.0, 4.0, 8.0, 16.0, 50.0];

/// What a key press asks the player to do
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Control {
    Toggle,
    SkipForward,
    SkipBackward,
    Faster,
    Slower,
    SeekPercent(f64),
    Start,
    End,
    Restart,
    Quit,
}

pub fn control_for(key: KeyEvent) -> Option<Control> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    let control = match (key.modifiers, key.code) {
        (KeyModifiers::CONTROL, KeyCode::Char('c')) => Control::Quit,
        (_, KeyCode::Char('q')) | (_, KeyCode::Esc) => Control::Quit,
        (_, KeyCode::Char(' ')) => Control::Toggle,
        (_, KeyCode::Right) => Control::SkipForward,
        (_, KeyCode::Left) => Control::SkipBackward,
        (_, KeyCode::Char('+')) | (_, KeyCode::Char('=')) => Control::Faster,
        (_, KeyCode::Char('-')) => Control::Slower,
        (_, KeyCode::Char(c @ '0'..='9')) => {
            Control::SeekPercent(f64::from(c as u8 - b'0') * 10.0)
        }
        (_, KeyCode::Home) => Control::Start,
        (_, KeyCode::End) => Control::End,
        (_, KeyCode::Char('r')) => Control::Restart,
        _ => return None,
    };
    Some(control)
}

/// Next speed step above or below `current`
pub fn step_speed(current: f64, faster: bool) -> f64 {
    if faster {
        SPEED_STEPS
            .iter()
            .copied()
            .find(|s| *s > current + f64::EPSILON)
            .unwrap_or(battle_replay::MAX_SPEED)
    } else {
        SPEED_STEPS
            .iter()
            .rev()
            .copied()
            .find(|s| *s < current - f64::EPSILON)
            .unwrap_or(0.0)
    }
}

/// Apply a control; returns `false` when the player should exit
pub fn apply(player: &mut Player, control: Control) -> bool {
    match control {
        Control::Toggle => player.toggle(),
        Control::SkipForward => player.skip_forward(SKIP_MS),
        Control::SkipBackward => player.skip_backward(SKIP_MS),
        Control::Faster => player.set_speed(step_speed(player.speed(), true)),
        Control::Slower => player.set_speed(step_speed(player.speed(), false)),
        Control::SeekPercent(percent) => player.seek_to_percent(percent),
        Control::Start => player.jump_to_start(),
        Control::End => player.jump_to_end(),
        Control::Restart => player.restart(),
        Control::Quit => return false,
    }
    true
}

/// Apply an output or resize event to the screen model
pub fn render_event(parser: &mut vt100::Parser, event: &ReplayEvent) {
    match &event.data {
        EventData::Output(text) => parser.process(text.as_bytes()),
        // vt100 cannot draw into an empty grid
        EventData::Resize { cols, rows } if *cols > 0 && *rows > 0 => parser.set_size(*rows, *cols),
        _ => {}
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Play `document` full-screen until it is quit
pub async fn play(document: ReplayDocument, speed: f64) -> Result<()> {
    let (cols, rows) = (document.metadata.cols, document.metadata.rows);
    let parser = Arc::new(Mutex::new(vt100::Parser::new(rows, cols, 0)));

    let on_event = Arc::clone(&parser);
    let on_reset = Arc::clone(&parser);
    let mut player = Player::new(document)
        .on_event(move |event| render_event(&mut lock(&on_event), event))
        .on_reset(move || *lock(&on_reset) = vt100::Parser::new(rows, cols, 0));
    player.set_speed(speed);

    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    player.play();
    let result = event_loop(&mut player, &parser, &mut stdout).await;

    execute!(stdout, cursor::Show, LeaveAlternateScreen).ok();
    disable_raw_mode().ok();
    result
}

async fn event_loop(
    player: &mut Player,
    parser: &Mutex<vt100::Parser>,
    stdout: &mut io::Stdout,
) -> Result<()> {
    let mut last = Instant::now();
    loop {
        draw(player, parser, stdout)?;

        if event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                if let Some(control) = control_for(key) {
                    if !apply(player, control) {
                        return Ok(());
                    }
                }
            }
        }

        tokio::time::sleep(FRAME_INTERVAL).await;
        let now = Instant::now();
        player.tick(now.duration_since(last));
        last = now;
    }
}

fn draw(player: &Player, parser: &Mutex<vt100::Parser>, stdout: &mut io::Stdout) -> Result<()> {
    let (screen, rows) = {
        let parser = lock(parser);
        let (rows, _) = parser.screen().size();
        (parser.screen().contents_formatted(), rows)
    };

    queue!(
        stdout,
        terminal::Clear(terminal::ClearType::All),
        cursor::MoveTo(0, 0)
    )?;
    stdout.write_all(&screen)?;

    let progress = player.progress();
    let status = match player.state().status {
        PlaybackStatus::Playing => "▶",
        PlaybackStatus::Paused | PlaybackStatus::Stopped => "⏸",
        PlaybackStatus::Completed => "■",
    };
    let line = format!(
        " {} {:>6.1}s / {:.1}s  {:>5.1}%  {}x  [space] pause  [←/→] 5s  [+/-] speed  [0-9] seek  [r] restart  [q] quit",
        status,
        progress.current_time as f64 / 1000.0,
        progress.duration as f64 / 1000.0,
        progress.percent,
        player.speed(),
    );
    queue!(
        stdout,
        style::ResetColor,
        cursor::MoveTo(0, rows),
        style::SetAttribute(style::Attribute::Reverse),
        style::Print(line),
        style::SetAttribute(style::Attribute::Reset)
    )?;
    stdout.flush()?;
    Ok(())
}
