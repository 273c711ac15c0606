/// PTY-based terminal backend (native pseudo-terminal via portable-pty)
use async_trait::async_trait;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::backend::{ExitStatus, KillSignal, PtyEvent, PtyHandle, SpawnRequest, TerminalBackend};
use crate::error::{Result, TerminalError};

/// How long the waiter lets the reader drain after the child exits
const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

const READ_CHUNK: usize = 4096;

/// Descriptions `strsignal` gives for the signals a session sends
const SIGNAL_DESCRIPTIONS: &[(&str, &str)] = &[
    ("Interrupt", "SIGINT"),
    ("Hangup", "SIGHUP"),
    ("Terminated", "SIGTERM"),
    ("Killed", "SIGKILL"),
];

/// portable-pty only exposes the signal through its `Display` form,
/// `Terminated by <strsignal description>`
fn exit_status(status: &portable_pty::ExitStatus) -> ExitStatus {
    if !status.success() {
        let text = status.to_string();
        if let Some(description) = text.strip_prefix("Terminated by ") {
            let signal = SIGNAL_DESCRIPTIONS
                .iter()
                .find(|(known, _)| *known == description)
                .map(|(_, name)| name.to_string())
                .unwrap_or_else(|| description.to_string());
            return ExitStatus {
                code: None,
                signal: Some(signal),
            };
        }
    }
    ExitStatus::with_code(status.exit_code() as i32)
}

/// PTY backend using the platform's native pseudo-terminal
#[derive(Debug, Default, Clone)]
pub struct PtyBackend;

impl PtyBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TerminalBackend for PtyBackend {
    async fn allocate(&self, request: SpawnRequest) -> Result<Arc<dyn PtyHandle>> {
        let command = request.command.clone();
        let process = tokio::task::spawn_blocking(move || PtyProcess::open(request))
            .await
            .map_err(|e| TerminalError::SpawnFailed {
                command,
                reason: format!("spawn task failed: {}", e),
            })??;
        Ok(Arc::new(process))
    }

    fn backend_name(&self) -> &str {
        "pty"
    }
}

/// One child process attached to a native PTY
pub struct PtyProcess {
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    pid: Option<u32>,
    alive: Arc<AtomicBool>,
    size: Mutex<(u16, u16)>,
    events: Mutex<Option<mpsc::UnboundedReceiver<PtyEvent>>>,
}

impl PtyProcess {
    fn open(request: SpawnRequest) -> Result<Self> {
        let spawn_failed = |reason: String| TerminalError::SpawnFailed {
            command: request.command.clone(),
            reason,
        };

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: request.rows,
                cols: request.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| TerminalError::BackendUnavailable(format!("failed to open PTY: {}", e)))?;

        let mut cmd = CommandBuilder::new(&request.command);
        cmd.args(&request.args);
        cmd.cwd(&request.cwd);
        cmd.env_clear();
        for (key, value) in std::env::vars() {
            if !battle_policy::sanitize::is_injection_var(&key) {
                cmd.env(key, value);
            }
        }
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| spawn_failed(e.to_string()))?;
        // Only the child may hold the slave; EOF on the master depends on it.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| spawn_failed(format!("failed to clone PTY reader: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| spawn_failed(format!("failed to take PTY writer: {}", e)))?;

        let pid = child.process_id();
        let killer = child.clone_killer();
        let alive = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = std_mpsc::channel();

        spawn_reader(reader, tx.clone(), done_tx);

        let waiter_alive = Arc::clone(&alive);
        thread::Builder::new()
            .name("battle-pty-wait".to_string())
            .spawn(move || {
                let status = match child.wait() {
                    Ok(status) => exit_status(&status),
                    Err(e) => {
                        warn!(error = %e, "Failed to wait for PTY child");
                        ExitStatus::default()
                    }
                };
                waiter_alive.store(false, Ordering::Release);
                let _ = done_rx.recv_timeout(READER_DRAIN_TIMEOUT);
                debug!(pid = ?pid, status = %status, "PTY child exited");
                let _ = tx.send(PtyEvent::Exit(status));
            })?;

        debug!(pid = ?pid, command = %request.command_line(), "PTY child spawned");

        Ok(Self {
            master: Mutex::new(pair.master),
            writer: Mutex::new(writer),
            killer: Mutex::new(killer),
            pid,
            alive,
            size: Mutex::new((request.cols, request.rows)),
            events: Mutex::new(Some(rx)),
        })
    }
}

fn spawn_reader(
    mut reader: Box<dyn Read + Send>,
    tx: mpsc::UnboundedSender<PtyEvent>,
    done_tx: std_mpsc::Sender<()>,
) {
    let spawned = thread::Builder::new()
        .name("battle-pty-read".to_string())
        .spawn(move || {
            let mut buffer = vec![0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buffer) {
                    // EOF - every slave descriptor is closed
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(PtyEvent::Data(buffer[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    // EIO once the child side is gone
                    Err(_) => break,
                }
            }
            let _ = done_tx.send(());
        });

    if let Err(e) = spawned {
        warn!(error = %e, "Failed to start PTY reader thread");
    }
}

impl PtyHandle for PtyProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
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
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| TerminalError::Io(std::io::Error::other("PTY writer poisoned")))?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        if let Ok(master) = self.master.lock() {
            master
                .resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .map_err(|e| TerminalError::Io(std::io::Error::other(e.to_string())))?;
        }
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
            if let Some(pid) = self.pid {
                debug!(pid, signal = %signal, "Signalling PTY child");
                if crate::backend::signal_pid(pid, signal).is_ok() {
                    return Ok(());
                }
            }
        }

        debug!(pid = ?self.pid, signal = %signal, "Killing PTY child");
        if let Ok(mut killer) = self.killer.lock() {
            killer.kill()?;
        }
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PtyEvent>> {
        self.events.lock().ok().and_then(|mut events| events.take())
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if self.is_alive() {
            if let Ok(mut killer) = self.killer.lock() {
                let _ = killer.kill();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_keeps_signal() {
        let killed = exit_status(&portable_pty::ExitStatus::with_signal("Killed"));
        assert_eq!(killed.code, None);
        assert_eq!(killed.signal.as_deref(), Some("SIGKILL"));
        assert_eq!(killed.to_string(), "killed by SIGKILL");

        let odd = exit_status(&portable_pty::ExitStatus::with_signal("Segmentation fault"));
        assert_eq!(odd.signal.as_deref(), Some("Segmentation fault"));

        let failed = exit_status(&portable_pty::ExitStatus::with_exit_code(3));
        assert_eq!(failed, ExitStatus::with_code(3));
        assert!(exit_status(&portable_pty::ExitStatus::with_exit_code(0)).success());
    }
}
