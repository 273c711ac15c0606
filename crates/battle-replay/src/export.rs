//! Export of replay documents as JSON or a self-contained HTML player

use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::document::ReplayDocument;
use crate::error::{ReplayError, Result};
use crate::event::EventData;
use crate::html::{escape_html, screen_to_html};
use crate::player::Player;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Html,
    Json,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Json => "json",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.as_str()
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "html" => Ok(Self::Html),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown export format: {} (expected html or json)", s)),
        }
    }
}

/// One rendered screen state at a point in virtual time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    #[serde(rename = "t")]
    pub timestamp: u64,
    pub html: String,
}

pub fn export(document: &ReplayDocument, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Html => export_html(document),
        ExportFormat::Json => export_json(document),
    }
}

pub fn export_json(document: &ReplayDocument) -> Result<String> {
    document.to_json()
}

/// Render frames by running the playback engine with a vt100 screen as the sink
pub fn render_frames(document: &ReplayDocument) -> Vec<Frame> {
    let cols = document.metadata.cols.max(1);
    let rows = document.metadata.rows.max(1);
    let parser = Arc::new(Mutex::new(vt100::Parser::new(rows, cols, 0)));
    let frames = Arc::new(Mutex::new(Vec::<Frame>::new()));

    let reset_parser = Arc::clone(&parser);
    let reset_frames = Arc::clone(&frames);
    let event_parser = Arc::clone(&parser);
    let event_frames = Arc::clone(&frames);

    let mut player = Player::new(document.clone())
        .on_reset(move || {
            if let Ok(mut parser) = reset_parser.lock() {
                *parser = vt100::Parser::new(rows, cols, 0);
            }
            if let Ok(mut frames) = reset_frames.lock() {
                frames.clear();
            }
        })
        .on_event(move |event| {
            let Ok(mut parser) = event_parser.lock() else {
                return;
            };
            match &event.data {
                EventData::Output(text) => parser.process(text.as_bytes()),
                EventData::Resize { cols, rows } if *cols > 0 && *rows > 0 => {
                    parser.set_size(*rows, *cols)
                }
                _ => return,
            }

            let frame = Frame {
                timestamp: event.timestamp,
                html: screen_to_html(parser.screen()),
            };
            if let Ok(mut frames) = event_frames.lock() {
                match frames.last_mut() {
                    Some(last) if last.timestamp == frame.timestamp => *last = frame,
                    _ => frames.push(frame),
                }
            }
        });

    player.jump_to_end();
    drop(player);

    let frames = match Arc::try_unwrap(frames) {
        Ok(mutex) => mutex.into_inner().unwrap_or_default(),
        Err(shared) => shared.lock().map(|f| f.clone()).unwrap_or_default(),
    };
    debug!(frames = frames.len(), "Rendered replay frames");
    frames
}

/// Self-contained HTML page with play/pause, speed and seek controls
pub fn export_html(document: &ReplayDocument) -> Result<String> {
    let frames = render_frames(document);
    let frames_json = serde_json::to_string(&frames)
        .map_err(|e| ReplayError::Serialization(e.to_string()))?
        .replace("</", "<\\/");

    let title = match &document.metadata.command {
        Some(command) if document.metadata.args.is_empty() => command.clone(),
        Some(command) => format!("{} {}", command, document.metadata.args.join(" ")),
        None => "terminal session".to_string(),
    };

    Ok(HTML_TEMPLATE
        .replace("{{TITLE}}", &escape_html(&title))
        .replace("{{RECORDED}}", &document.timestamp.to_rfc3339())
        .replace("{{DURATION}}", &document.effective_duration().to_string())
        .replace("{{COLS}}", &document.metadata.cols.to_string())
        .replace("{{FRAMES}}", &frames_json))
}

const HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>battle replay: {{TITLE}}</title>
<style>
body { background: #111; color: #ccc; font-family: sans-serif; margin: 2em; }
#screen { background: #1e1e1e; color: #d4d4d4; font-family: monospace; white-space: pre;
  padding: 1em; min-width: {{COLS}}ch; line-height: 1.2; border-radius: 4px; }
#controls { margin-top: 1em; display: flex; gap: 1em; align-items: center; }
#seek { flex: 1; }
</style>
</head>
<body>
<h3>{{TITLE}}</h3>
<div>recorded {{RECORDED}}</div>
<div id="screen"></div>
<div id="controls">
  <button id="toggle">play</button>
  <select id="speed">
    <option value="0.5">0.5x</option>
    <option value="1" selected>1x</option>
    <option value="2">2x</option>
    <option value="5">5x</option>
    <option value="10">10x</option>
  </select>
  <input id="seek" type="range" min="0" max="{{DURATION}}" value="0">
  <span id="time">0.0s</span>
</div>
<script>
const frames = {{FRAMES}};
const duration = {{DURATION}};
const screen = document.getElementById("screen");
const toggle = document.getElementById("toggle");
const seek = document.getElementById("seek");
const time = document.getElementById("time");
let current = 0, speed = 1, playing = false, last = null;

function render() {
  let html = "";
  for (const f of frames) { if (f.t <= current) html = f.html; else break; }
  screen.innerHTML = html;
  seek.value = current;
  time.textContent = (current / 1000).toFixed(1) + "s";
}
function step(now) {
  if (!playing) return;
  if (last !== null) current = Math.min(duration, current + (now - last) * speed);
  last = now;
  render();
  if (current >= duration) { playing = false; toggle.textContent = "play"; return; }
  requestAnimationFrame(step);
}
toggle.onclick = () => {
  if (!playing && current >= duration) current = 0;
  playing = !playing;
  toggle.textContent = playing ? "pause" : "play";
  last = null;
  if (playing) requestAnimationFrame(step);
};
document.getElementById("speed").onchange = (e) => {
  const v = parseFloat(e.target.value);
  speed = Number.isFinite(v) ? Math.min(50, Math.max(0, v)) : 0;
};
seek.oninput = () => { current = Number(seek.value); render(); };
render();
</script>
</body>
</html>
"#;
