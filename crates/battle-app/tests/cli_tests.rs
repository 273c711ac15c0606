use anyhow::Context;
use battle_app::{exit_code, export_replay, EXIT_FAILURE, EXIT_REJECTED};
use battle_replay::{EventData, ExportFormat, Recorder, ReplayDocument};
use battle_terminal::TerminalError;
use std::path::PathBuf;
use tempfile::TempDir;

fn saved_replay(dir: &TempDir) -> PathBuf {
    let mut recorder = Recorder::new(40, 10);
    recorder
        .record_at(0, EventData::Spawn { command: "echo".into(), args: vec!["hi".into()] })
        .unwrap();
    recorder
        .record_at(5, EventData::Output("\x1b[32mhi\x1b[0m\r\n".into()))
        .unwrap();
    recorder.record_at(9, EventData::Exit { code: Some(0) }).unwrap();
    let path = dir.path().join("run.json");
    recorder.save(&path).unwrap();
    path
}

#[test]
fn test_export_html_next_to_input() {
    let dir = TempDir::new().unwrap();
    let replay = saved_replay(&dir);

    let out = export_replay(&replay, ExportFormat::Html, None).unwrap();
    assert_eq!(out, dir.path().join("run.html"));
    let html = std::fs::read_to_string(out).unwrap();
    assert!(html.contains("<!DOCTYPE html>"));
    assert!(html.contains("hi"));
}

#[test]
fn test_export_json_to_explicit_path() {
    let dir = TempDir::new().unwrap();
    let replay = saved_replay(&dir);
    let target = dir.path().join("exports").join("copy.json");

    let out = export_replay(&replay, ExportFormat::Json, Some(&target)).unwrap();
    assert_eq!(out, target);
    let reloaded = ReplayDocument::load(&target).unwrap();
    assert_eq!(reloaded.events.len(), 3);

    // Exporting JSON next to a .json input would clobber it
    assert!(export_replay(&replay, ExportFormat::Json, None).is_err());
}

#[test]
fn test_invalid_replay_exits_with_rejection() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.json");
    std::fs::write(&path, r#"{"__proto__": {"polluted": true}}"#).unwrap();

    let err = export_replay(&path, ExportFormat::Html, None).unwrap_err();
    assert_eq!(exit_code(&err), EXIT_REJECTED);
}

#[test]
fn test_exit_codes_follow_error_kind() {
    let rejected = anyhow::Error::new(TerminalError::ValidationRejected("fork bomb".into()))
        .context("Failed to start");
    assert_eq!(exit_code(&rejected), EXIT_REJECTED);

    let missing: anyhow::Result<()> = Err(TerminalError::PatternNotFound {
        pattern: "Goodbye".into(),
        timeout_ms: 200,
        screenshot: None,
    })
    .context("Step 2 failed");
    assert_eq!(exit_code(&missing.unwrap_err()), EXIT_FAILURE);

    assert_eq!(exit_code(&anyhow::anyhow!("anything else")), EXIT_FAILURE);
}
