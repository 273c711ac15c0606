// Terminal session driving for battle
//
// Spawns programs under test in a real pseudo-terminal, captures their output
// into a bounded buffer and a VT100 screen, waits for patterns, injects keys and
// records everything for later replay.

pub mod backend;
pub mod buffer;
pub mod config;
pub mod error;
pub mod expect;
pub mod keys;
pub mod lifecycle;
pub mod listeners;
mod pty_backend;
pub mod screen;
pub mod screenshot;
pub mod session;
mod tmux_backend;

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

// Re-export public API
pub use backend::{
    prepare_env, select_backend, ExitStatus, KillSignal, PtyEvent, PtyHandle, SpawnRequest,
    TerminalBackend, TerminalBackendType,
};
pub use buffer::{strip_ansi, BufferLimits, BufferSnapshot, BufferStats, OutputBuffer, Utf8Carry};
pub use config::SessionConfig;
pub use error::{Result, TerminalError};
pub use expect::Pattern;
pub use keys::{expand_notation, Key};
pub use lifecycle::{KillOutcome, KillSwitch, LifecycleState, PtyLifecycle, SpawnListeners};
pub use listeners::{DataListener, ExitListener, HandleId, ListenerRegistry};
pub use pty_backend::PtyBackend;
pub use screen::ScreenBuffer;
pub use screenshot::Screenshot;
pub use session::Session;
pub use tmux_backend::TmuxBackend;

// Constants
pub const DEFAULT_SCROLLBACK_LINES: usize = 1000;
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// Lock a mutex, recovering the data if a callback panicked while holding it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
