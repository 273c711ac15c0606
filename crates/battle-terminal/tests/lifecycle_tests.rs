mod common;

use battle_terminal::{
    DataListener, ExitListener, ExitStatus, KillOutcome, KillSignal, LifecycleState,
    PtyLifecycle, SpawnListeners, TerminalError,
};
use common::{request, ScriptedBackend};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const GRACE: Duration = Duration::from_millis(100);

fn lifecycle(backend: &ScriptedBackend) -> PtyLifecycle {
    PtyLifecycle::new(Arc::new(backend.clone()), GRACE)
}

fn counting_listeners(data: &Arc<AtomicUsize>, exits: &Arc<AtomicUsize>) -> SpawnListeners {
    let data = Arc::clone(data);
    let exits = Arc::clone(exits);
    let on_data: DataListener = Arc::new(move |_: &[u8]| {
        data.fetch_add(1, Ordering::SeqCst);
    });
    let on_exit: ExitListener = Arc::new(move |_: &ExitStatus| {
        exits.fetch_add(1, Ordering::SeqCst);
    });
    SpawnListeners {
        on_data: Some(on_data),
        on_exit: Some(on_exit),
    }
}

#[tokio::test]
async fn test_two_spawns_leave_one_running() {
    let backend = ScriptedBackend::new();
    let mut lifecycle = lifecycle(&backend);

    let first = lifecycle
        .spawn(request("cat", &[]), SpawnListeners::default())
        .await
        .unwrap();
    let second = lifecycle
        .spawn(request("cat", &[]), SpawnListeners::default())
        .await
        .unwrap();

    assert_ne!(first, second);
    assert_eq!(backend.spawned(), 2);
    assert_eq!(backend.live(), 1);
    assert_eq!(lifecycle.state(), LifecycleState::Running);
    assert_eq!(lifecycle.current_id(), Some(second));
}

#[tokio::test]
async fn test_kill_is_idempotent() {
    let backend = ScriptedBackend::new();
    let mut lifecycle = lifecycle(&backend);

    assert_eq!(lifecycle.kill(KillSignal::Terminate).await, KillOutcome::NotRunning);

    lifecycle
        .spawn(request("cat", &[]), SpawnListeners::default())
        .await
        .unwrap();
    assert_eq!(lifecycle.kill(KillSignal::Terminate).await, KillOutcome::Graceful);
    assert_eq!(lifecycle.state(), LifecycleState::Killed);
    assert_eq!(backend.live(), 0);

    assert_eq!(lifecycle.kill(KillSignal::Terminate).await, KillOutcome::NotRunning);
    assert_eq!(lifecycle.state(), LifecycleState::Killed);
}

#[tokio::test]
async fn test_ignored_terminate_is_forced_after_grace() {
    let backend = ScriptedBackend::stubborn();
    let mut lifecycle = lifecycle(&backend);
    lifecycle
        .spawn(request("cat", &[]), SpawnListeners::default())
        .await
        .unwrap();

    let started = std::time::Instant::now();
    assert_eq!(lifecycle.kill(KillSignal::Terminate).await, KillOutcome::Forced);
    assert!(started.elapsed() >= GRACE);
    assert_eq!(lifecycle.state(), LifecycleState::Killed);
    assert_eq!(backend.live(), 0);

    let status = lifecycle.exit_status().unwrap();
    assert_eq!(status.signal.as_deref(), Some("SIGKILL"));
}

#[tokio::test]
async fn test_natural_exit_enters_exited() {
    let backend = ScriptedBackend::new();
    let mut lifecycle = lifecycle(&backend);
    lifecycle
        .spawn(request("fail", &[]), SpawnListeners::default())
        .await
        .unwrap();

    let status = lifecycle.wait_for_exit(Duration::from_secs(2)).await.unwrap();
    assert_eq!(status.code, Some(3));
    assert_eq!(lifecycle.state(), LifecycleState::Exited);

    // Exited handles accept writes silently but cannot be killed again
    lifecycle.write(b"ignored").unwrap();
    assert_eq!(lifecycle.kill(KillSignal::Terminate).await, KillOutcome::NotRunning);
    assert_eq!(lifecycle.state(), LifecycleState::Exited);
}

#[tokio::test]
async fn test_respawn_does_not_duplicate_delivery() {
    let backend = ScriptedBackend::new();
    let mut lifecycle = lifecycle(&backend);

    let (first_data, first_exit) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
    let (second_data, second_exit) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));

    lifecycle
        .spawn(request("cat", &[]), counting_listeners(&first_data, &first_exit))
        .await
        .unwrap();
    lifecycle
        .spawn(request("cat", &[]), counting_listeners(&second_data, &second_exit))
        .await
        .unwrap();
    assert_eq!(lifecycle.listener_count(), 2);
    assert_eq!(first_exit.load(Ordering::SeqCst), 1);

    lifecycle.write(b"x").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(first_data.load(Ordering::SeqCst), 0);
    assert_eq!(second_data.load(Ordering::SeqCst), 1);
    assert_eq!(second_exit.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_spawn_waits_for_in_flight_kill() {
    let backend = ScriptedBackend::stubborn();
    let mut lifecycle = lifecycle(&backend);
    lifecycle
        .spawn(request("cat", &[]), SpawnListeners::default())
        .await
        .unwrap();

    assert!(lifecycle.request_kill(KillSignal::Terminate));
    assert_eq!(lifecycle.state(), LifecycleState::Killing);

    lifecycle
        .spawn(request("cat", &[]), SpawnListeners::default())
        .await
        .unwrap();
    assert_eq!(backend.live(), 1);
    assert_eq!(lifecycle.state(), LifecycleState::Running);
}

#[tokio::test]
async fn test_kill_switch_terminates_from_another_task() {
    let backend = ScriptedBackend::new();
    let mut lifecycle = lifecycle(&backend);
    lifecycle
        .spawn(request("cat", &[]), SpawnListeners::default())
        .await
        .unwrap();

    let switch = lifecycle.kill_switch();
    tokio::spawn(async move {
        switch.fire(KillSignal::Hangup);
    })
    .await
    .unwrap();

    let status = lifecycle.wait_for_exit(Duration::from_secs(2)).await.unwrap();
    assert_eq!(status.signal.as_deref(), Some("SIGHUP"));
    assert_eq!(backend.live(), 0);
}

#[tokio::test]
async fn test_cleanup_detaches_everything() {
    let backend = ScriptedBackend::new();
    let mut lifecycle = lifecycle(&backend);
    let (data, exits) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
    lifecycle
        .spawn(request("cat", &[]), counting_listeners(&data, &exits))
        .await
        .unwrap();

    lifecycle.cleanup().await;
    assert_eq!(lifecycle.state(), LifecycleState::Idle);
    assert_eq!(lifecycle.listener_count(), 0);
    assert_eq!(backend.live(), 0);
    assert!(matches!(lifecycle.write(b"x"), Err(TerminalError::NotRunning)));
}

#[tokio::test]
async fn test_allocation_failure_enters_error() {
    let backend = ScriptedBackend::new();
    let mut lifecycle = lifecycle(&backend);

    let err = lifecycle
        .spawn(request("missing", &[]), SpawnListeners::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TerminalError::SpawnFailed { .. }));
    assert_eq!(lifecycle.state(), LifecycleState::Error);
    assert_eq!(lifecycle.current_id(), None);
}
