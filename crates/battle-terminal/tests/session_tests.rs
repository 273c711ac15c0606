mod common;

use battle_policy::{GuardConfig, PtyLimiter, SecurityLevel, ValidationGuard};
use battle_replay::{EventData, EventKind, ReplayDocument};
use battle_terminal::{Key, LifecycleState, Session, SessionConfig, TerminalError};
use common::ScriptedBackend;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn session_in(dir: &TempDir, backend: &ScriptedBackend, config: SessionConfig) -> Session {
    let config = config
        .with_cwd(dir.path())
        .with_screenshot_dir(dir.path().join("shots"));
    let guard = ValidationGuard::new(config.guard.clone()).unwrap();
    Session::with_parts(config, Arc::new(backend.clone()), guard)
}

fn kinds(session: &Session) -> Vec<EventKind> {
    session.events().iter().map(|e| e.kind()).collect()
}

#[tokio::test]
async fn test_expect_matches_output() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new();
    let mut session = session_in(&dir, &backend, SessionConfig::default());

    session.spawn("echo", ["Hello Battle"]).await.unwrap();
    session
        .expect("Hello Battle", Duration::from_secs(2))
        .await
        .unwrap();

    assert!(session.clean_output().contains("Hello Battle"));
    assert!(session.screen_text().starts_with("Hello Battle"));

    let expect = session
        .events()
        .into_iter()
        .find(|e| e.kind() == EventKind::Expect)
        .unwrap();
    assert_eq!(
        expect.data,
        EventData::Expect {
            pattern: "Hello Battle".into(),
            matched: true
        }
    );
}

#[tokio::test]
async fn test_expect_timeout_writes_screenshot() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new();
    let mut session = session_in(&dir, &backend, SessionConfig::default());
    session.spawn("echo", ["Hello Battle"]).await.unwrap();

    let started = std::time::Instant::now();
    let err = session
        .expect("Goodbye", Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(200));

    match err {
        TerminalError::PatternNotFound {
            pattern,
            timeout_ms,
            screenshot,
        } => {
            assert_eq!(pattern, "Goodbye");
            assert_eq!(timeout_ms, 200);
            let path = screenshot.unwrap();
            assert_eq!(path, dir.path().join("shots").join("expect-failure-1.txt"));
            assert!(std::fs::read_to_string(&path).unwrap().contains("Hello Battle"));
            assert!(path.with_extension("html").exists());
            assert!(path.with_extension("ansi").exists());
        }
        other => panic!("unexpected error: {other}"),
    }

    let recorded = kinds(&session);
    assert!(recorded.contains(&EventKind::Screenshot));
    assert!(session.events().iter().any(|e| e.data
        == EventData::Expect {
            pattern: "Goodbye".into(),
            matched: false
        }));
}

#[tokio::test]
async fn test_rejected_commands_never_reach_backend() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new();
    let mut session = session_in(
        &dir,
        &backend,
        SessionConfig::default().with_security_level(SecurityLevel::Strict),
    );

    let err = session.spawn("rm", ["-rf", "/"]).await.unwrap_err();
    assert!(matches!(err, TerminalError::ValidationRejected(_)));
    assert!(err.is_rejection());

    let err = session.spawn(":(){ :|:& };:", Vec::<String>::new()).await.unwrap_err();
    assert!(matches!(err, TerminalError::ValidationRejected(_)));

    assert_eq!(backend.spawned(), 0);
    assert!(session.events().is_empty());
    assert_eq!(session.state(), LifecycleState::Idle);
}

#[tokio::test]
async fn test_shared_limiter_caps_sessions() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new();
    let limiter = PtyLimiter::new(1);
    let make = |limiter: &PtyLimiter| {
        let config = SessionConfig::default().with_cwd(dir.path());
        let guard = ValidationGuard::with_limiter(GuardConfig::default(), limiter.clone()).unwrap();
        Session::with_parts(config, Arc::new(backend.clone()), guard)
    };

    let mut first = make(&limiter);
    let mut second = make(&limiter);

    first.spawn("cat", Vec::<String>::new()).await.unwrap();
    let err = second.spawn("cat", Vec::<String>::new()).await.unwrap_err();
    assert!(matches!(err, TerminalError::ResourceLimitExceeded(_)));

    first.cleanup().await;
    assert_eq!(limiter.active(), 0);
    second.spawn("cat", Vec::<String>::new()).await.unwrap();
    assert_eq!(limiter.active(), 1);
}

#[tokio::test]
async fn test_keys_and_notation_reach_the_process() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new();
    let mut session = session_in(&dir, &backend, SessionConfig::default());
    session.spawn("greet", ["menu:"]).await.unwrap();
    session.expect("menu:", Duration::from_secs(2)).await.unwrap();

    let changed = session
        .press_and_wait_for_change(Key::Down, Duration::from_secs(2))
        .await
        .unwrap();
    assert!(changed);
    assert!(session.output().ends_with("\x1b[B"));

    session.send_keys("ls[ENTER]").unwrap();
    session.expect("ls", Duration::from_secs(2)).await.unwrap();
    session.press_str("ctrl+c").unwrap();

    let keys: Vec<EventData> = session
        .events()
        .into_iter()
        .filter(|e| e.kind() == EventKind::Key)
        .map(|e| e.data)
        .collect();
    assert_eq!(
        keys,
        vec![EventData::Key("down".into()), EventData::Key("ctrl+c".into())]
    );
    assert!(session.events().iter().any(|e| e.data == EventData::Input("ls\r".into())));
}

#[tokio::test]
async fn test_no_change_times_out() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new();
    let mut session = session_in(&dir, &backend, SessionConfig::default());
    session.spawn("greet", ["idle"]).await.unwrap();
    session.expect("idle", Duration::from_secs(2)).await.unwrap();

    let baseline = session.snapshot();
    assert!(!session.wait_for_change(&baseline, Duration::from_millis(50)).await);
}

#[tokio::test]
async fn test_replay_is_saved_and_reloaded() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new();
    let config = SessionConfig::default().with_env("API_TOKEN", "s3cr3t-value");
    let mut session = session_in(&dir, &backend, config);

    session.spawn("greet", ["ready"]).await.unwrap();
    session.expect("ready", Duration::from_secs(2)).await.unwrap();
    session.press(Key::Enter).unwrap();
    session.resize(100, 30).unwrap();
    assert_eq!(session.size(), (100, 30));
    assert!(session.resize(0, 30).is_err());

    let path = dir.path().join("replays").join("run.json");
    assert_eq!(session.finish(Some(&path)).await.unwrap(), Some(path.clone()));

    let document = ReplayDocument::load(&path).unwrap();
    assert_eq!(document.metadata.command.as_deref(), Some("greet"));
    assert_eq!(document.metadata.args, vec!["ready".to_string()]);
    assert_eq!((document.metadata.cols, document.metadata.rows), (80, 24));
    assert_ne!(document.metadata.env.get("API_TOKEN").map(String::as_str), Some("s3cr3t-value"));

    let recorded: Vec<EventKind> = document.events.iter().map(|e| e.kind()).collect();
    assert_eq!(recorded.first(), Some(&EventKind::Spawn));
    assert!(recorded.contains(&EventKind::Key));
    assert!(recorded.contains(&EventKind::Resize));
    assert_eq!(recorded.last(), Some(&EventKind::Exit));
    assert!(document
        .events
        .windows(2)
        .all(|pair| pair[0].timestamp <= pair[1].timestamp));
}

#[tokio::test]
async fn test_watchdog_terminates_runaway_process() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::stubborn();
    let config = SessionConfig::default()
        .with_timeout(Duration::from_millis(100))
        .with_kill_grace(Duration::from_millis(100));
    let mut session = session_in(&dir, &backend, config);

    session.spawn("cat", Vec::<String>::new()).await.unwrap();
    let status = session.wait_for_exit(Duration::from_secs(2)).await.unwrap();
    assert_eq!(status.signal.as_deref(), Some("SIGKILL"));
    assert_eq!(backend.live(), 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.state(), LifecycleState::Killed);
}

#[tokio::test]
async fn test_write_without_process_is_not_running() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new();
    let session = session_in(&dir, &backend, SessionConfig::default());
    assert!(matches!(session.write("x"), Err(TerminalError::NotRunning)));
    assert!(matches!(session.press(Key::Enter), Err(TerminalError::NotRunning)));
}

#[tokio::test]
async fn test_rejected_respawn_keeps_running_process() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new();
    let config = SessionConfig::default().with_security_level(SecurityLevel::Strict);
    let mut session = session_in(&dir, &backend, config);
    session.spawn("cat", Vec::<String>::new()).await.unwrap();
    let active = session.guard().limiter().active();

    let err = session.spawn("rm", ["-rf", "/"]).await.unwrap_err();
    assert!(matches!(err, TerminalError::ValidationRejected(_)));

    assert_eq!(session.state(), LifecycleState::Running);
    assert_eq!(backend.live(), 1);
    assert_eq!(session.guard().limiter().active(), active);
    session.send_line("still here").unwrap();
    session.expect("still here", Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn test_altered_argument_is_rejected() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new();
    let mut session = session_in(&dir, &backend, SessionConfig::default());

    let err = session.spawn("greet", ["menu>"]).await.unwrap_err();
    assert!(matches!(err, TerminalError::ValidationRejected(_)));
    assert_eq!(backend.spawned(), 0);
    assert!(session.events().is_empty());
}

#[tokio::test]
async fn test_failed_allocation_records_nothing() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new();
    let mut session = session_in(&dir, &backend, SessionConfig::default());

    assert!(session.spawn("missing", Vec::<String>::new()).await.is_err());
    assert!(session.events().is_empty());
    assert_eq!(session.document().metadata.command, None);
    assert_eq!(session.guard().limiter().active(), 0);

    session.spawn("echo", ["after"]).await.unwrap();
    session.expect("after", Duration::from_secs(2)).await.unwrap();
    let document = session.document();
    assert_eq!(document.metadata.command.as_deref(), Some("echo"));
    assert_eq!(document.events[0].kind(), EventKind::Spawn);
}
