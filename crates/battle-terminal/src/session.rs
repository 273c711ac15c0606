//! Test session: one PTY at a time, its captured output and its recording

use battle_policy::{redact_sensitive, PtyPermit, ValidationGuard};
use battle_replay::{EventData, Recorder, ReplayDocument, ReplayEvent};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::backend::{
    prepare_env, select_backend, ExitStatus, KillSignal, SpawnRequest, TerminalBackend,
};
use crate::buffer::{BufferSnapshot, BufferStats, OutputBuffer, Utf8Carry};
use crate::config::SessionConfig;
use crate::error::{Result, TerminalError};
use crate::expect::{self, Pattern};
use crate::keys::{expand_notation, Key};
use crate::lifecycle::{KillOutcome, LifecycleState, PtyLifecycle, SpawnListeners};
use crate::listeners::{DataListener, ExitListener};
use crate::lock;
use crate::screen::ScreenBuffer;
use crate::screenshot::{self, Screenshot};

/// State written by the PTY pump and read by the session
#[derive(Clone)]
struct Capture {
    buffer: Arc<Mutex<OutputBuffer>>,
    screen: Arc<Mutex<ScreenBuffer>>,
    recorder: Arc<Mutex<Recorder>>,
    carry: Arc<Mutex<Utf8Carry>>,
}

impl Capture {
    fn ingest(&self, text: &str, verbose: bool) {
        if text.is_empty() {
            return;
        }
        if verbose {
            eprint!("{}", text);
        }
        lock(&self.buffer).append(text);
        lock(&self.screen).process_output(text);
        self.record(EventData::Output(text.to_string()));
    }

    /// Recording failures never fail the session
    fn record(&self, data: EventData) {
        if let Err(e) = lock(&self.recorder).record(data) {
            debug!(error = %e, "Event not recorded");
        }
    }
}

/// Drives one program under test through a PTY
pub struct Session {
    config: SessionConfig,
    guard: ValidationGuard,
    lifecycle: PtyLifecycle,
    capture: Capture,
    permit: Option<PtyPermit>,
    watchdog: Option<JoinHandle<()>>,
    size: (u16, u16),
    failures: usize,
}

impl Session {
    /// Session with the configured backend and a guard built from `config.guard`
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let guard = ValidationGuard::new(config.guard.clone())?;
        let backend = select_backend(config.backend);
        Ok(Self::with_parts(config, backend, guard))
    }

    /// Session with an explicit backend and guard; the guard's limiter may be
    /// shared with other sessions
    pub fn with_parts(
        config: SessionConfig,
        backend: Arc<dyn TerminalBackend>,
        guard: ValidationGuard,
    ) -> Self {
        let (cols, rows) = (config.cols.max(1), config.rows.max(1));
        let capture = Capture {
            buffer: Arc::new(Mutex::new(OutputBuffer::new(config.buffer))),
            screen: Arc::new(Mutex::new(ScreenBuffer::new(cols, rows))),
            recorder: Arc::new(Mutex::new(Recorder::new(cols, rows))),
            carry: Arc::new(Mutex::new(Utf8Carry::new())),
        };
        let lifecycle = PtyLifecycle::new(backend, config.kill_grace());

        Self {
            config,
            guard,
            lifecycle,
            capture,
            permit: None,
            watchdog: None,
            size: (cols, rows),
            failures: 0,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn guard(&self) -> &ValidationGuard {
        &self.guard
    }

    pub fn backend_name(&self) -> &str {
        self.lifecycle.backend_name()
    }

    /// Validate and start `command`, replacing any running process
    #[instrument(skip(self, args), fields(command = %redact_sensitive(command)))]
    pub async fn spawn<I, S>(&mut self, command: &str, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let cwd = match &self.config.cwd {
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir()?,
        };

        // A rejected spawn leaves the running process alone
        let screened = self
            .guard
            .screen_spawn(command, &args, &cwd, &self.config.env)?;

        self.stop_watchdog();
        if self.lifecycle.is_running() {
            self.lifecycle.kill(KillSignal::Terminate).await;
        }
        self.permit = None;
        let approved = self.guard.reserve(screened)?;

        lock(&self.capture.buffer).clear();
        lock(&self.capture.screen).reset();
        lock(&self.capture.carry).finish();

        // The spawn is recorded ahead of any output and undone if allocation fails
        let checkpoint = {
            let mut recorder = lock(&self.capture.recorder);
            let checkpoint = recorder.checkpoint();
            if let Err(e) =
                recorder.record_spawn(&approved.command, &approved.args, approved.recorded_env.clone())
            {
                debug!(error = %e, "Spawn not recorded");
            }
            checkpoint
        };

        let request = SpawnRequest {
            command: approved.command.clone(),
            args: approved.args.clone(),
            cwd: approved.cwd.clone(),
            env: prepare_env(&approved.env),
            cols: self.size.0,
            rows: self.size.1,
        };

        if let Err(e) = self.lifecycle.spawn(request, self.listeners()).await {
            lock(&self.capture.recorder).rollback(checkpoint);
            return Err(e);
        }
        self.permit = Some(approved.permit);
        self.start_watchdog();

        info!(
            pid = ?self.lifecycle.pid(),
            level = %self.guard.level(),
            "Session process started"
        );
        Ok(())
    }

    fn listeners(&self) -> SpawnListeners {
        let verbose = self.config.verbose;

        let capture = self.capture.clone();
        let on_data: DataListener = Arc::new(move |bytes: &[u8]| {
            let text = lock(&capture.carry).push(bytes);
            capture.ingest(&text, verbose);
        });

        let capture = self.capture.clone();
        let on_exit: ExitListener = Arc::new(move |status: &ExitStatus| {
            let rest = lock(&capture.carry).finish();
            capture.ingest(&rest, verbose);
            capture.record(EventData::Exit { code: status.code });
        });

        SpawnListeners {
            on_data: Some(on_data),
            on_exit: Some(on_exit),
        }
    }

    fn start_watchdog(&mut self) {
        let Some(timeout) = self.config.timeout() else {
            return;
        };
        let switch = self.lifecycle.kill_switch();
        self.watchdog = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if switch.fire(KillSignal::Terminate) {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Session timeout reached, terminating process"
                );
            }
        }));
    }

    fn stop_watchdog(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
    }

    /// Write raw text to the process
    pub fn write(&self, text: &str) -> Result<()> {
        self.lifecycle.write(text.as_bytes())?;
        self.capture.record(EventData::Input(text.to_string()));
        Ok(())
    }

    /// Write `text` followed by Enter
    pub fn send_line(&self, text: &str) -> Result<()> {
        self.write(&format!("{}\r", text))
    }

    /// Write text with inline key notation (`[ENTER]`, `[UP]`, `^C`) expanded
    pub fn send_keys(&self, notation: &str) -> Result<()> {
        let bytes = expand_notation(notation);
        self.lifecycle.write(&bytes)?;
        self.capture
            .record(EventData::Input(String::from_utf8_lossy(&bytes).into_owned()));
        Ok(())
    }

    pub fn press(&self, key: Key) -> Result<()> {
        self.lifecycle.write(&key.bytes())?;
        self.capture.record(EventData::Key(key.name()));
        Ok(())
    }

    /// Press a key given by name, e.g. `"enter"`, `"ctrl+c"`, `"f5"`
    pub fn press_str(&self, name: &str) -> Result<()> {
        self.press(name.parse()?)
    }

    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        if cols == 0 || rows == 0 {
            return Err(TerminalError::ValidationRejected(format!(
                "terminal size must be non-zero, got {}x{}",
                cols, rows
            )));
        }
        self.lifecycle.resize(cols, rows)?;
        lock(&self.capture.screen).resize(cols, rows);
        self.size = (cols, rows);
        self.capture.record(EventData::Resize { cols, rows });
        debug!(cols, rows, "Terminal resized");
        Ok(())
    }

    pub fn size(&self) -> (u16, u16) {
        self.size
    }

    /// Wait until the output contains `pattern`.
    ///
    /// On timeout a screenshot named `expect-failure-N` is written and the
    /// returned error points at it.
    pub async fn expect(&mut self, pattern: impl Into<Pattern>, timeout: Duration) -> Result<()> {
        let pattern = pattern.into();
        let matched = expect::wait_for_pattern(
            &self.capture.buffer,
            &pattern,
            timeout,
            self.config.expect_poll(),
        )
        .await;

        self.capture.record(EventData::Expect {
            pattern: pattern.to_string(),
            matched,
        });
        if matched {
            debug!(pattern = %pattern, "Pattern matched");
            return Ok(());
        }

        self.failures += 1;
        let name = format!("expect-failure-{}", self.failures);
        let screenshot = match self.screenshot(&name) {
            Ok(shot) => Some(shot.text_path),
            Err(e) => {
                warn!(error = %e, "Failed to capture expect failure screenshot");
                None
            }
        };
        warn!(
            pattern = %pattern,
            timeout_ms = timeout.as_millis() as u64,
            "Pattern not found"
        );
        Err(TerminalError::PatternNotFound {
            pattern: pattern.to_string(),
            timeout_ms: timeout.as_millis() as u64,
            screenshot,
        })
    }

    pub async fn expect_regex(&mut self, pattern: &str, timeout: Duration) -> Result<()> {
        let pattern = Pattern::regex(pattern)?;
        self.expect(pattern, timeout).await
    }

    /// [`Session::expect`] with the configured default timeout
    pub async fn expect_default(&mut self, pattern: impl Into<Pattern>) -> Result<()> {
        let timeout = self.config.expect_timeout();
        self.expect(pattern, timeout).await
    }

    /// Baseline for [`Session::wait_for_change`]
    pub fn snapshot(&self) -> BufferSnapshot {
        lock(&self.capture.buffer).snapshot()
    }

    /// `true` as soon as the output differs from `baseline`
    pub async fn wait_for_change(&self, baseline: &BufferSnapshot, timeout: Duration) -> bool {
        expect::wait_for_change(
            &self.capture.buffer,
            baseline,
            timeout,
            self.config.change_poll(),
        )
        .await
    }

    pub async fn press_and_wait_for_change(&self, key: Key, timeout: Duration) -> Result<bool> {
        let baseline = self.snapshot();
        self.press(key)?;
        Ok(self.wait_for_change(&baseline, timeout).await)
    }

    pub async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Write `.ansi`, `.txt` and `.html` renditions of the current output
    pub fn screenshot(&self, name: &str) -> Result<Screenshot> {
        let raw = lock(&self.capture.buffer).text();
        let shot = screenshot::capture(&self.config.screenshot_dir, name, &raw)?;
        self.capture.record(EventData::Screenshot {
            name: shot.name.clone(),
        });
        Ok(shot)
    }

    /// Terminate the running process, escalating to SIGKILL after the grace window
    pub async fn kill(&mut self) -> KillOutcome {
        self.stop_watchdog();
        self.lifecycle.kill(KillSignal::Terminate).await
    }

    pub async fn wait_for_exit(&self, timeout: Duration) -> Option<ExitStatus> {
        self.lifecycle.wait_for_exit(timeout).await
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.lifecycle.exit_status()
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    pub fn pid(&self) -> Option<u32> {
        self.lifecycle.pid()
    }

    pub fn output(&self) -> String {
        lock(&self.capture.buffer).text()
    }

    /// Output with ANSI sequences removed
    pub fn clean_output(&self) -> String {
        lock(&self.capture.buffer).clean_text()
    }

    /// Visible screen as rendered by the terminal emulator
    pub fn screen_text(&self) -> String {
        lock(&self.capture.screen).contents(false)
    }

    pub fn cursor_position(&self) -> (u16, u16) {
        lock(&self.capture.screen).cursor_position()
    }

    pub fn buffer_stats(&self) -> BufferStats {
        lock(&self.capture.buffer).stats()
    }

    pub fn events(&self) -> Vec<ReplayEvent> {
        lock(&self.capture.recorder).events().to_vec()
    }

    pub fn document(&self) -> ReplayDocument {
        lock(&self.capture.recorder).to_document()
    }

    pub fn save_replay(&self, path: &Path) -> Result<ReplayDocument> {
        let document = lock(&self.capture.recorder).save(path)?;
        Ok(document)
    }

    /// Stop the process, detach listeners and clear captured output.
    ///
    /// Recorded events are kept so the replay can still be saved.
    pub async fn cleanup(&mut self) {
        self.stop_watchdog();
        self.lifecycle.cleanup().await;
        self.permit = None;
        lock(&self.capture.buffer).clear();
        lock(&self.capture.screen).reset();
        lock(&self.capture.carry).finish();
        debug!("Session cleaned up");
    }

    /// Clean up, then persist the recording when `replay` is given
    pub async fn finish(&mut self, replay: Option<&Path>) -> Result<Option<PathBuf>> {
        self.cleanup().await;
        match replay {
            Some(path) => {
                self.save_replay(path)?;
                Ok(Some(path.to_path_buf()))
            }
            None => Ok(None),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_watchdog();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("lifecycle", &self.lifecycle)
            .field("size", &self.size)
            .field("level", &self.guard.level())
            .finish()
    }
}
