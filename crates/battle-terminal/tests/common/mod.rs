// Shared helpers for battle-terminal integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use battle_terminal::{
    ExitStatus, KillSignal, PtyEvent, PtyHandle, Result, SpawnRequest, TerminalBackend,
    TerminalError,
};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// In-process backend with scripted programs:
///
/// - `echo ARGS...` prints its arguments and exits with code 0
/// - `greet ARGS...` prints its arguments and then behaves like `cat`
/// - `cat` echoes every write back as output
/// - `fail` exits immediately with code 3
/// - `missing` cannot be spawned
#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    /// Handles whose process has not exited
    pub live: Arc<AtomicUsize>,
    /// Total successful allocations
    pub spawned: Arc<AtomicUsize>,
    /// Processes ignore every signal except SIGKILL
    pub ignore_terminate: bool,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stubborn() -> Self {
        Self {
            ignore_terminate: true,
            ..Self::default()
        }
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}

static NEXT_PID: AtomicU32 = AtomicU32::new(40_000);

#[async_trait]
impl TerminalBackend for ScriptedBackend {
    async fn allocate(&self, request: SpawnRequest) -> Result<Arc<dyn PtyHandle>> {
        if request.command == "missing" {
            return Err(TerminalError::SpawnFailed {
                command: request.command,
                reason: "No such file or directory".into(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Arc::new(ScriptedHandle {
            pid: NEXT_PID.fetch_add(1, Ordering::SeqCst),
            alive: AtomicBool::new(true),
            echo: matches!(request.command.as_str(), "cat" | "greet"),
            ignore_terminate: self.ignore_terminate,
            size: Mutex::new((request.cols, request.rows)),
            tx,
            rx: Mutex::new(Some(rx)),
            live: Arc::clone(&self.live),
        });
        self.live.fetch_add(1, Ordering::SeqCst);
        self.spawned.fetch_add(1, Ordering::SeqCst);

        match request.command.as_str() {
            "echo" => {
                handle.emit(format!("{}\r\n", request.args.join(" ")).into_bytes());
                handle.finish(ExitStatus::with_code(0));
            }
            "greet" => handle.emit(request.args.join(" ").into_bytes()),
            "fail" => handle.finish(ExitStatus::with_code(3)),
            _ => {}
        }

        Ok(handle)
    }

    fn backend_name(&self) -> &str {
        "scripted"
    }
}

pub struct ScriptedHandle {
    pid: u32,
    alive: AtomicBool,
    echo: bool,
    ignore_terminate: bool,
    size: Mutex<(u16, u16)>,
    tx: mpsc::UnboundedSender<PtyEvent>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<PtyEvent>>>,
    live: Arc<AtomicUsize>,
}

impl ScriptedHandle {
    fn emit(&self, bytes: Vec<u8>) {
        let _ = self.tx.send(PtyEvent::Data(bytes));
    }

    fn finish(&self, status: ExitStatus) {
        if self.alive.swap(false, Ordering::SeqCst) {
            self.live.fetch_sub(1, Ordering::SeqCst);
            let _ = self.tx.send(PtyEvent::Exit(status));
        }
    }
}

impl PtyHandle for ScriptedHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn size(&self) -> (u16, u16) {
        *self.size.lock().unwrap()
    }

    fn write(&self, data: &[u8]) -> Result<()> {
        if self.is_alive() && self.echo {
            self.emit(data.to_vec());
        }
        Ok(())
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        *self.size.lock().unwrap() = (cols, rows);
        Ok(())
    }

    fn kill(&self, signal: KillSignal) -> Result<()> {
        if self.ignore_terminate && signal != KillSignal::Kill {
            return Ok(());
        }
        self.finish(ExitStatus {
            code: None,
            signal: Some(signal.as_str().to_string()),
        });
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PtyEvent>> {
        self.rx.lock().unwrap().take()
    }
}

pub fn request(command: &str, args: &[&str]) -> SpawnRequest {
    SpawnRequest {
        command: command.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        cwd: std::env::temp_dir(),
        env: Default::default(),
        cols: 80,
        rows: 24,
    }
}
