//! PTY lifecycle: at most one live handle, with serialized spawn and kill
//!
//! ```text
//! Idle -> Spawning -> Running -> Killing -> Killed
//!                        |  \
//!                        |   -> Exited   (backend exit notification)
//!                        -> Error        (allocation failed)
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::backend::{ExitStatus, KillSignal, PtyEvent, PtyHandle, SpawnRequest, TerminalBackend};
use crate::error::{Result, TerminalError};
use crate::listeners::{DataListener, ExitListener, HandleId, ListenerRegistry};
use crate::lock;

/// Extra time allowed on top of the grace windows when awaiting a kill task
const KILL_SLACK: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Spawning,
    Running,
    Killing,
    Killed,
    Exited,
    Error,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Spawning => "spawning",
            Self::Running => "running",
            Self::Killing => "killing",
            Self::Killed => "killed",
            Self::Exited => "exited",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a kill request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// Nothing was running
    NotRunning,
    /// The process exited within the grace window
    Graceful,
    /// The grace window passed and SIGKILL was sent
    Forced,
}

/// Callbacks attached to the next spawned handle
#[derive(Default, Clone)]
pub struct SpawnListeners {
    pub on_data: Option<DataListener>,
    pub on_exit: Option<ExitListener>,
}

struct Current {
    id: HandleId,
    handle: Arc<dyn PtyHandle>,
    exit_rx: watch::Receiver<Option<ExitStatus>>,
}

struct Inner {
    state: LifecycleState,
    current: Option<Current>,
    pending_kill: Option<JoinHandle<KillOutcome>>,
}

type Shared = Arc<Mutex<Inner>>;

/// Owner of the session's PTY handle
pub struct PtyLifecycle {
    backend: Arc<dyn TerminalBackend>,
    inner: Shared,
    listeners: Arc<Mutex<ListenerRegistry>>,
    grace: Duration,
    next_id: HandleId,
    pump: Option<JoinHandle<()>>,
}

impl PtyLifecycle {
    pub fn new(backend: Arc<dyn TerminalBackend>, grace: Duration) -> Self {
        Self {
            backend,
            inner: Arc::new(Mutex::new(Inner {
                state: LifecycleState::Idle,
                current: None,
                pending_kill: None,
            })),
            listeners: Arc::new(Mutex::new(ListenerRegistry::new())),
            grace,
            next_id: 0,
            pump: None,
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.backend_name()
    }

    pub fn state(&self) -> LifecycleState {
        lock(&self.inner).state
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    pub fn current_id(&self) -> Option<HandleId> {
        lock(&self.inner).current.as_ref().map(|c| c.id)
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle().and_then(|h| h.pid())
    }

    /// Number of registered listeners across all handles
    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    fn handle(&self) -> Option<Arc<dyn PtyHandle>> {
        lock(&self.inner)
            .current
            .as_ref()
            .map(|c| Arc::clone(&c.handle))
    }

    /// Start a process, replacing any previous one.
    ///
    /// Waits for an in-flight kill, terminates a still-running handle and drops
    /// its listeners before allocating.
    #[instrument(skip(self, request, listeners), fields(command = %request.command_line()))]
    pub async fn spawn(
        &mut self,
        request: SpawnRequest,
        listeners: SpawnListeners,
    ) -> Result<HandleId> {
        self.await_pending_kill().await;
        if self.is_running() {
            debug!("Terminating previous process before respawn");
            self.kill(KillSignal::Terminate).await;
        }

        if let Some(previous) = self.current_id() {
            lock(&self.listeners).detach(previous);
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        {
            let mut inner = lock(&self.inner);
            inner.current = None;
            inner.state = LifecycleState::Spawning;
        }

        let command = request.command.clone();
        let handle = match self.backend.allocate(request).await {
            Ok(handle) => handle,
            Err(e) => {
                lock(&self.inner).state = LifecycleState::Error;
                warn!(error = %e, command = %command, "PTY allocation failed");
                return Err(e);
            }
        };

        self.next_id += 1;
        let id = self.next_id;
        {
            let mut registry = lock(&self.listeners);
            if let Some(on_data) = listeners.on_data {
                registry.on_data(id, on_data);
            }
            if let Some(on_exit) = listeners.on_exit {
                registry.on_exit(id, on_exit);
            }
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let events = handle.take_events();
        {
            let mut inner = lock(&self.inner);
            inner.current = Some(Current {
                id,
                handle: Arc::clone(&handle),
                exit_rx,
            });
            inner.state = LifecycleState::Running;
        }

        match events {
            Some(events) => {
                self.pump = Some(tokio::spawn(pump_events(
                    id,
                    events,
                    Arc::clone(&self.inner),
                    Arc::clone(&self.listeners),
                    exit_tx,
                )));
            }
            None => warn!(handle = id, "Backend handle has no event stream"),
        }

        info!(
            handle = id,
            pid = ?handle.pid(),
            backend = self.backend.backend_name(),
            "Process spawned"
        );
        Ok(id)
    }

    pub fn write(&self, data: &[u8]) -> Result<()> {
        let handle = self.handle().ok_or(TerminalError::NotRunning)?;
        handle.write(data)
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        match self.handle() {
            Some(handle) => handle.resize(cols, rows),
            None => Ok(()),
        }
    }

    /// Start termination without waiting for it; `false` when nothing is running
    pub fn request_kill(&self, signal: KillSignal) -> bool {
        request_kill(&self.inner, signal, self.grace)
    }

    /// Terminate the current process; a no-op when idle, killed or exited
    pub async fn kill(&mut self, signal: KillSignal) -> KillOutcome {
        if !self.request_kill(signal) {
            debug!(state = %self.state(), "Kill ignored");
            return KillOutcome::NotRunning;
        }
        self.await_pending_kill()
            .await
            .unwrap_or(KillOutcome::Forced)
    }

    /// Detached termination capability for the current handle
    pub fn kill_switch(&self) -> KillSwitch {
        KillSwitch {
            inner: Arc::clone(&self.inner),
            grace: self.grace,
        }
    }

    async fn await_pending_kill(&self) -> Option<KillOutcome> {
        let task = lock(&self.inner).pending_kill.take()?;
        match tokio::time::timeout(self.grace * 2 + KILL_SLACK, task).await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(e)) => {
                warn!(error = %e, "Kill task failed");
                None
            }
            Err(_) => {
                warn!("Kill task did not finish in time");
                None
            }
        }
    }

    /// Exit status once the backend reported it
    pub fn exit_status(&self) -> Option<ExitStatus> {
        lock(&self.inner)
            .current
            .as_ref()
            .and_then(|c| c.exit_rx.borrow().clone())
    }

    /// Wait up to `timeout` for the current process to exit
    pub async fn wait_for_exit(&self, timeout: Duration) -> Option<ExitStatus> {
        let mut rx = lock(&self.inner).current.as_ref()?.exit_rx.clone();
        if wait_exit(&mut rx, timeout).await {
            rx.borrow().clone()
        } else {
            None
        }
    }

    /// Stop the process if needed, detach every listener and return to idle
    pub async fn cleanup(&mut self) {
        if self.is_running() {
            self.kill(KillSignal::Terminate).await;
        } else {
            self.await_pending_kill().await;
        }

        let removed = lock(&self.listeners).clear();
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        {
            let mut inner = lock(&self.inner);
            inner.current = None;
            inner.state = LifecycleState::Idle;
        }
        debug!(listeners = removed, "Lifecycle cleaned up");
    }
}

impl Drop for PtyLifecycle {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(handle) = self.handle() {
            if handle.is_alive() {
                let _ = handle.kill(KillSignal::Kill);
            }
        }
    }
}

impl std::fmt::Debug for PtyLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyLifecycle")
            .field("backend", &self.backend.backend_name())
            .field("state", &self.state())
            .field("handle", &self.current_id())
            .finish()
    }
}

/// Terminates the lifecycle's current process from another task
#[derive(Clone)]
pub struct KillSwitch {
    inner: Shared,
    grace: Duration,
}

impl KillSwitch {
    /// Same escalation as [`PtyLifecycle::kill`]; `false` when nothing is running
    pub fn fire(&self, signal: KillSignal) -> bool {
        request_kill(&self.inner, signal, self.grace)
    }
}

impl std::fmt::Debug for KillSwitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KillSwitch")
            .field("grace", &self.grace)
            .finish()
    }
}

fn request_kill(inner: &Shared, signal: KillSignal, grace: Duration) -> bool {
    let mut guard = lock(inner);
    if guard.pending_kill.is_some() {
        return true;
    }
    if guard.state != LifecycleState::Running {
        return false;
    }
    let Some(current) = guard.current.as_ref() else {
        return false;
    };

    let id = current.id;
    let handle = Arc::clone(&current.handle);
    let exit_rx = current.exit_rx.clone();
    guard.state = LifecycleState::Killing;
    debug!(handle = id, signal = %signal, "Kill requested");
    guard.pending_kill = Some(tokio::spawn(terminate(
        Arc::clone(inner),
        id,
        handle,
        exit_rx,
        signal,
        grace,
    )));
    true
}

/// Send `signal`, then SIGKILL if the process outlives the grace window
async fn terminate(
    inner: Shared,
    id: HandleId,
    handle: Arc<dyn PtyHandle>,
    mut exit_rx: watch::Receiver<Option<ExitStatus>>,
    signal: KillSignal,
    grace: Duration,
) -> KillOutcome {
    if let Err(e) = handle.kill(signal) {
        warn!(handle = id, signal = %signal, error = %e, "Failed to signal process");
    }

    let outcome = if wait_exit(&mut exit_rx, grace).await {
        KillOutcome::Graceful
    } else {
        warn!(
            handle = id,
            signal = %signal,
            grace_ms = grace.as_millis() as u64,
            "Process outlived grace window, forcing"
        );
        if let Err(e) = handle.kill(KillSignal::Kill) {
            warn!(handle = id, error = %e, "Failed to force-kill process");
        }
        if !wait_exit(&mut exit_rx, grace).await {
            warn!(handle = id, "No exit reported after SIGKILL");
        }
        KillOutcome::Forced
    };

    let mut guard = lock(&inner);
    if guard.current.as_ref().map(|c| c.id) == Some(id) {
        guard.state = LifecycleState::Killed;
    }
    info!(handle = id, outcome = ?outcome, "Process killed");
    outcome
}

async fn wait_exit(rx: &mut watch::Receiver<Option<ExitStatus>>, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, rx.wait_for(|status| status.is_some())).await {
        Ok(result) => result.is_ok(),
        Err(_) => false,
    }
}

/// Forward one handle's events to its listeners
async fn pump_events(
    id: HandleId,
    mut events: mpsc::UnboundedReceiver<PtyEvent>,
    inner: Shared,
    listeners: Arc<Mutex<ListenerRegistry>>,
    exit_tx: watch::Sender<Option<ExitStatus>>,
) {
    let mut status = None;
    while let Some(event) = events.recv().await {
        match event {
            PtyEvent::Data(bytes) => {
                let callbacks = lock(&listeners).data_listeners(id);
                for callback in callbacks {
                    callback(&bytes);
                }
            }
            PtyEvent::Exit(exit) => {
                status = Some(exit);
                break;
            }
        }
    }

    // A stream that closes without an exit event means the process is gone
    let status = status.unwrap_or_default();
    {
        let mut guard = lock(&inner);
        if guard.current.as_ref().map(|c| c.id) == Some(id)
            && guard.state == LifecycleState::Running
        {
            guard.state = LifecycleState::Exited;
        }
    }

    let callbacks = lock(&listeners).exit_listeners(id);
    for callback in callbacks {
        callback(&status);
    }
    info!(handle = id, status = %status, "Process exited");
    exit_tx.send_replace(Some(status));
}
