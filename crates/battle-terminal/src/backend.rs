/// Terminal backend abstraction for PTY and tmux implementations
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{Result, TerminalError};
use crate::pty_backend::PtyBackend;
use crate::tmux_backend::TmuxBackend;

/// Everything a backend needs to start a process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Final environment; see [`prepare_env`]
    pub env: BTreeMap<String, String>,
    pub cols: u16,
    pub rows: u16,
}

impl SpawnRequest {
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

/// How a process ended
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExitStatus {
    pub code: Option<i32>,
    /// Signal name when the process was killed by one
    pub signal: Option<String>,
}

impl ExitStatus {
    pub fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.code, &self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "killed by {}", signal),
            (None, None) => write!(f, "exited"),
        }
    }
}

/// Per-handle event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyEvent {
    Data(Vec<u8>),
    /// Always the last event of a stream
    Exit(ExitStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSignal {
    Interrupt,
    Hangup,
    Terminate,
    Kill,
}

impl KillSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Hangup => "SIGHUP",
            Self::Terminate => "SIGTERM",
            Self::Kill => "SIGKILL",
        }
    }

    #[cfg(unix)]
    pub(crate) fn to_nix(self) -> nix::sys::signal::Signal {
        use nix::sys::signal::Signal;
        match self {
            Self::Interrupt => Signal::SIGINT,
            Self::Hangup => Signal::SIGHUP,
            Self::Terminate => Signal::SIGTERM,
            Self::Kill => Signal::SIGKILL,
        }
    }
}

impl std::fmt::Display for KillSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Deliver a signal to a process id
#[cfg(unix)]
pub(crate) fn signal_pid(pid: u32, signal: KillSignal) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::unistd::Pid;

    match nix::sys::signal::kill(Pid::from_raw(pid as i32), signal.to_nix()) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(std::io::Error::from_raw_os_error(e as i32)),
    }
}

/// A live terminal endpoint.
///
/// Writes, resizes and kills on a handle whose process already exited are
/// no-ops that return `Ok`.
pub trait PtyHandle: Send + Sync {
    fn pid(&self) -> Option<u32>;

    fn is_alive(&self) -> bool;

    /// Current size as (cols, rows)
    fn size(&self) -> (u16, u16);

    fn write(&self, data: &[u8]) -> Result<()>;

    fn resize(&self, cols: u16, rows: u16) -> Result<()>;

    fn kill(&self, signal: KillSignal) -> Result<()>;

    /// Take the event stream; returns `None` after the first call
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PtyEvent>>;
}

/// Terminal backend trait - one strategy per PTY allocation mechanism
#[async_trait]
pub trait TerminalBackend: Send + Sync {
    /// Start a process attached to a fresh terminal
    async fn allocate(&self, request: SpawnRequest) -> Result<Arc<dyn PtyHandle>>;

    /// Get backend name for debugging
    fn backend_name(&self) -> &str;
}

/// Configuration for which backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalBackendType {
    /// Native PTY via portable-pty (default)
    #[default]
    Pty,
    /// Tmux-hosted pane
    Tmux,
}

impl std::str::FromStr for TerminalBackendType {
    type Err = TerminalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pty" | "native" => Ok(Self::Pty),
            "tmux" => Ok(Self::Tmux),
            _ => Err(TerminalError::Config(format!(
                "Invalid terminal backend: '{}'. Valid options: 'pty', 'tmux'",
                s
            ))),
        }
    }
}

impl std::fmt::Display for TerminalBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pty => write!(f, "pty"),
            Self::Tmux => write!(f, "tmux"),
        }
    }
}

/// Build the backend for `kind`, falling back to the native PTY when tmux is missing
pub fn select_backend(kind: TerminalBackendType) -> Arc<dyn TerminalBackend> {
    let backend: Arc<dyn TerminalBackend> = match kind {
        TerminalBackendType::Pty => Arc::new(PtyBackend::new()),
        TerminalBackendType::Tmux => match TmuxBackend::new() {
            Ok(backend) => Arc::new(backend),
            Err(e) => {
                warn!(error = %e, "Failed to initialize tmux backend, falling back to PTY");
                Arc::new(PtyBackend::new())
            }
        },
    };

    info!(backend = backend.backend_name(), "Terminal backend selected");
    backend
}

/// Environment handed to the child: injection variables removed, terminal
/// capabilities advertised when the caller did not set them
pub fn prepare_env(env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut env = battle_policy::strip_injection_vars(env);
    env.entry("TERM".to_string())
        .or_insert_with(|| "xterm-256color".to_string());
    env.entry("COLORTERM".to_string())
        .or_insert_with(|| "truecolor".to_string());
    env
}
