/// Tmux-based terminal backend
///
/// Each process runs in its own detached session on a private tmux socket.
/// Output is mirrored into a log file with `pipe-pane` and polled; the pane is
/// kept after exit (`remain-on-exit`) so its exit status can be read back.
use async_trait::async_trait;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::backend::{ExitStatus, KillSignal, PtyEvent, PtyHandle, SpawnRequest, TerminalBackend};
use crate::error::{Result, TerminalError};

/// Log file polling interval
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Pane liveness is queried every this many polls
const STATUS_EVERY: u32 = 5;

/// Bytes per `send-keys -H` invocation
const SEND_CHUNK: usize = 256;

/// Tmux backend using an external tmux server
#[derive(Debug)]
pub struct TmuxBackend {
    socket: String,
    log_dir: PathBuf,
    pid: u32,
    next_id: AtomicU64,
}

impl TmuxBackend {
    /// Create a new tmux backend; fails when tmux is not installed
    pub fn new() -> Result<Self> {
        let output = Command::new("tmux")
            .arg("-V")
            .output()
            .map_err(|e| TerminalError::BackendUnavailable(format!("tmux not found: {}", e)))?;
        if !output.status.success() {
            return Err(TerminalError::BackendUnavailable(
                "tmux command failed - ensure tmux is installed and working".to_string(),
            ));
        }

        let pid = std::process::id();
        let log_dir = std::env::temp_dir().join(format!("battle-tmux-{}", pid));
        fs::create_dir_all(&log_dir)?;

        Ok(Self {
            socket: format!("battle-{}", pid),
            log_dir,
            pid,
            next_id: AtomicU64::new(1),
        })
    }

    /// Format: battle-{pid}-{n}
    fn session_name(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("battle-{}-{}", self.pid, n)
    }

    fn launch(socket: &str, log_dir: &Path, name: String, request: SpawnRequest) -> Result<TmuxPane> {
        let gate = format!("{}-start", name);
        let log_path = log_dir.join(format!("{}.log", name));
        File::create(&log_path)?;

        // The child blocks on the gate until pipe-pane is attached so no early
        // output is lost.
        let script = format!(
            "tmux -L {} wait-for {}; exec \"$0\" \"$@\"",
            socket, gate
        );
        let cols = request.cols.to_string();
        let rows = request.rows.to_string();
        let cwd = request.cwd.display().to_string();

        let mut args: Vec<String> = vec![
            "new-session".into(),
            "-d".into(),
            "-s".into(),
            name.clone(),
            "-x".into(),
            cols,
            "-y".into(),
            rows,
            "-c".into(),
            cwd,
        ];
        for (key, value) in &request.env {
            args.push("-e".into());
            args.push(format!("{}={}", key, value));
        }
        args.extend(["sh".to_string(), "-c".to_string(), script, request.command.clone()]);
        args.extend(request.args.iter().cloned());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        run_tmux(socket, &arg_refs).map_err(|e| TerminalError::SpawnFailed {
            command: request.command.clone(),
            reason: e.to_string(),
        })?;

        let setup = || -> Result<u32> {
            run_tmux(
                socket,
                &["set-option", "-w", "-t", &name, "remain-on-exit", "on"],
            )?;
            run_tmux(
                socket,
                &[
                    "pipe-pane",
                    "-t",
                    &name,
                    "-o",
                    &format!("cat >> {}", shell_quote(&log_path)),
                ],
            )?;
            let pid = run_tmux(
                socket,
                &["display-message", "-p", "-t", &name, "#{pane_pid}"],
            )?;
            run_tmux(socket, &["wait-for", "-S", &gate])?;
            pid.trim()
                .parse::<u32>()
                .map_err(|e| TerminalError::BackendUnavailable(format!("bad pane pid: {}", e)))
        };

        let pid = match setup() {
            Ok(pid) => pid,
            Err(e) => {
                let _ = run_tmux(socket, &["kill-session", "-t", &name]);
                let _ = fs::remove_file(&log_path);
                return Err(TerminalError::SpawnFailed {
                    command: request.command.clone(),
                    reason: e.to_string(),
                });
            }
        };

        debug!(session = %name, pid, command = %request.command_line(), "tmux pane spawned");
        TmuxPane::start(
            socket.to_string(),
            name,
            log_path,
            pid,
            (request.cols, request.rows),
        )
    }
}

#[async_trait]
impl TerminalBackend for TmuxBackend {
    async fn allocate(&self, request: SpawnRequest) -> Result<Arc<dyn PtyHandle>> {
        let socket = self.socket.clone();
        let log_dir = self.log_dir.clone();
        let name = self.session_name();
        let command = request.command.clone();
        let pane =
            tokio::task::spawn_blocking(move || Self::launch(&socket, &log_dir, name, request))
                .await
                .map_err(|e| TerminalError::SpawnFailed {
                    command,
                    reason: format!("spawn task failed: {}", e),
                })??;
        Ok(Arc::new(pane))
    }

    fn backend_name(&self) -> &str {
        "tmux"
    }
}

/// Run a tmux command on `socket` and return stdout
fn run_tmux(socket: &str, args: &[&str]) -> Result<String> {
    let output = Command::new("tmux").args(["-L", socket]).args(args).output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TerminalError::BackendUnavailable(format!(
            "tmux {} failed: {}",
            args.first().copied().unwrap_or_default(),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn shell_quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', "'\\''"))
}

/// Parse `#{pane_dead} #{pane_dead_status}` output
fn parse_pane_status(output: &str) -> Option<ExitStatus> {
    let mut parts = output.split_whitespace();
    match parts.next() {
        Some("1") => Some(ExitStatus {
            code: parts.next().and_then(|c| c.parse().ok()),
            signal: None,
        }),
        _ => None,
    }
}

/// A process hosted in a tmux pane
pub struct TmuxPane {
    socket: String,
    name: String,
    pid: u32,
    alive: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    size: Mutex<(u16, u16)>,
    events: Mutex<Option<mpsc::UnboundedReceiver<PtyEvent>>>,
}

impl TmuxPane {
    fn start(
        socket: String,
        name: String,
        log_path: PathBuf,
        pid: u32,
        size: (u16, u16),
    ) -> Result<Self> {
        let alive = Arc::new(AtomicBool::new(true));
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::unbounded_channel();

        let poller = Poller {
            socket: socket.clone(),
            name: name.clone(),
            log_path,
            alive: Arc::clone(&alive),
            stop: Arc::clone(&stop),
            tx,
        };
        thread::Builder::new()
            .name("battle-tmux-poll".to_string())
            .spawn(move || poller.run())?;

        Ok(Self {
            socket,
            name,
            pid,
            alive,
            stop,
            size: Mutex::new(size),
            events: Mutex::new(Some(rx)),
        })
    }
}

struct Poller {
    socket: String,
    name: String,
    log_path: PathBuf,
    alive: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<PtyEvent>,
}

impl Poller {
    fn run(self) {
        let mut offset = 0u64;
        let mut polls = 0u32;

        let status = loop {
            self.drain(&mut offset);
            if self.stop.load(Ordering::Acquire) {
                break None;
            }

            polls = polls.wrapping_add(1);
            if polls % STATUS_EVERY == 0 {
                match run_tmux(
                    &self.socket,
                    &["display-message", "-p", "-t", &self.name, "#{pane_dead} #{pane_dead_status}"],
                ) {
                    Ok(output) => {
                        if let Some(status) = parse_pane_status(&output) {
                            break Some(status);
                        }
                    }
                    // Session vanished underneath us
                    Err(_) => break Some(ExitStatus::default()),
                }
            }
            thread::sleep(POLL_INTERVAL);
        };

        self.alive.store(false, Ordering::Release);
        // pipe-pane output can trail the exit slightly
        thread::sleep(POLL_INTERVAL);
        self.drain(&mut offset);
        let _ = run_tmux(&self.socket, &["kill-session", "-t", &self.name]);
        if let Err(e) = fs::remove_file(&self.log_path) {
            debug!(error = %e, "Failed to remove tmux log");
        }

        if let Some(status) = status {
            debug!(session = %self.name, status = %status, "tmux pane exited");
            let _ = self.tx.send(PtyEvent::Exit(status));
        }
    }

    fn drain(&self, offset: &mut u64) {
        let Ok(mut file) = File::open(&self.log_path) else {
            return;
        };
        if file.seek(SeekFrom::Start(*offset)).is_err() {
            return;
        }
        let mut data = Vec::new();
        match file.read_to_end(&mut data) {
            Ok(0) => {}
            Ok(n) => {
                *offset += n as u64;
                let _ = self.tx.send(PtyEvent::Data(data));
            }
            Err(e) => warn!(error = %e, "Failed to read tmux log"),
        }
    }
}

impl PtyHandle for TmuxPane {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn size(&self) -> (u16, u16) {
        self.size.lock().map(|s| *s).unwrap_or((0, 0))
    }

    fn write(&self, data: &[u8]) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        // -H sends each hex byte verbatim, bypassing tmux key-name parsing
        for chunk in data.chunks(SEND_CHUNK) {
            let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
            let mut args = vec!["send-keys", "-t", self.name.as_str(), "-H"];
            args.extend(hex.iter().map(String::as_str));
            run_tmux(&self.socket, &args)?;
        }
        Ok(())
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        run_tmux(
            &self.socket,
            &[
                "resize-window",
                "-t",
                &self.name,
                "-x",
                &cols.to_string(),
                "-y",
                &rows.to_string(),
            ],
        )?;
        if let Ok(mut size) = self.size.lock() {
            *size = (cols, rows);
        }
        Ok(())
    }

    fn kill(&self, signal: KillSignal) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }

        #[cfg(unix)]
        {
            crate::backend::signal_pid(self.pid, signal)?;
            if signal != KillSignal::Kill {
                return Ok(());
            }
        }

        debug!(session = %self.name, signal = %signal, "Killing tmux session");
        let _ = run_tmux(&self.socket, &["kill-session", "-t", &self.name]);
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PtyEvent>> {
        self.events.lock().ok().and_then(|mut events| events.take())
    }
}

impl Drop for TmuxPane {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if self.is_alive() {
            let _ = run_tmux(&self.socket, &["kill-session", "-t", &self.name]);
        }
    }
}
