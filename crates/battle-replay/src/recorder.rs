//! Recorder - append-only event capture during a live session

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, warn};

use crate::document::{ReplayDocument, ReplayMetadata, MAX_REPLAY_EVENTS, REPLAY_FORMAT_VERSION};
use crate::error::{ReplayError, Result};
use crate::event::{EventData, ReplayEvent};
use crate::safe_json::DEFAULT_MAX_BYTES;

/// Bytes kept free for the document envelope around events and metadata
const ENVELOPE_RESERVE: usize = 1024;

/// Recorder position that [`Recorder::rollback`] returns to
#[derive(Debug, Clone)]
pub struct Checkpoint {
    len: usize,
    last_timestamp: u64,
    payload_bytes: usize,
    metadata: ReplayMetadata,
}

/// Captures events with timestamps relative to its creation.
///
/// Timestamps never decrease: a clock reading (or explicit `record_at` value)
/// older than the last recorded event is clamped up to it.
///
/// Both the event count and the saved size stay within what
/// [`ReplayDocument::load`] accepts.
#[derive(Debug)]
pub struct Recorder {
    start: Instant,
    started_at: DateTime<Utc>,
    last_timestamp: u64,
    events: Vec<ReplayEvent>,
    metadata: ReplayMetadata,
    max_events: usize,
    max_bytes: usize,
    /// Pretty-printed size of the recorded events
    payload_bytes: usize,
}

impl Recorder {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            start: Instant::now(),
            started_at: Utc::now(),
            last_timestamp: 0,
            events: Vec::new(),
            metadata: ReplayMetadata {
                cols,
                rows,
                ..ReplayMetadata::default()
            },
            max_events: MAX_REPLAY_EVENTS,
            max_bytes: DEFAULT_MAX_BYTES,
            payload_bytes: 0,
        }
    }

    /// Override the event ceiling
    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events;
        self
    }

    /// Override the ceiling on the saved document size
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Milliseconds since the recorder was created
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Record an event stamped with the current elapsed time
    pub fn record(&mut self, data: EventData) -> Result<u64> {
        let now = self.elapsed_ms();
        self.record_at(now, data)
    }

    /// Record an event at an explicit timestamp (clamped to be non-decreasing)
    pub fn record_at(&mut self, timestamp: u64, data: EventData) -> Result<u64> {
        if self.events.len() >= self.max_events {
            warn!(limit = self.max_events, kind = %data.kind(), "Replay event limit reached");
            return Err(ReplayError::LimitExceeded(format!(
                "replay already holds {} events",
                self.max_events
            )));
        }

        let timestamp = timestamp.max(self.last_timestamp);
        let event = ReplayEvent::new(timestamp, data);

        let size = saved_size(&event)?;
        let used = self.payload_bytes + self.metadata_bytes()? + ENVELOPE_RESERVE;
        if used + size > self.max_bytes {
            warn!(limit = self.max_bytes, kind = %event.kind(), "Replay size limit reached");
            return Err(ReplayError::LimitExceeded(format!(
                "replay would exceed {} bytes",
                self.max_bytes
            )));
        }

        if let EventData::Spawn { command, args } = &event.data {
            if self.metadata.command.is_none() {
                self.metadata.command = Some(command.clone());
                self.metadata.args = args.clone();
            } else {
                debug!(command = %command, "Respawn recorded; metadata keeps the first command");
            }
        }
        if let EventData::Resize { cols, rows } = &event.data {
            if self.metadata.command.is_none() {
                self.metadata.cols = *cols;
                self.metadata.rows = *rows;
            }
        }

        self.last_timestamp = timestamp;
        self.payload_bytes += size;
        self.events.push(event);
        Ok(timestamp)
    }

    /// Record a `spawn` event; the first one also fixes the metadata
    /// command, args and environment (already masked by the caller)
    pub fn record_spawn(
        &mut self,
        command: &str,
        args: &[String],
        env: BTreeMap<String, String>,
    ) -> Result<u64> {
        let first = self.metadata.command.is_none();
        let previous = if first {
            Some(std::mem::replace(&mut self.metadata.env, env))
        } else {
            None
        };

        let recorded = self.record(EventData::Spawn {
            command: command.to_string(),
            args: args.to_vec(),
        });
        if recorded.is_err() {
            if let Some(previous) = previous {
                self.metadata.env = previous;
            }
        }
        recorded
    }

    /// Current position, for undoing events that turn out not to have happened
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            len: self.events.len(),
            last_timestamp: self.last_timestamp,
            payload_bytes: self.payload_bytes,
            metadata: self.metadata.clone(),
        }
    }

    /// Drop every event recorded since `checkpoint` and restore its metadata
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        let dropped = self.events.len().saturating_sub(checkpoint.len);
        self.events.truncate(checkpoint.len);
        self.last_timestamp = checkpoint.last_timestamp;
        self.payload_bytes = checkpoint.payload_bytes;
        self.metadata = checkpoint.metadata;
        debug!(dropped, "Recorder rolled back");
    }

    fn metadata_bytes(&self) -> Result<usize> {
        nested_size(&self.metadata, 1)
    }

    pub fn events(&self) -> &[ReplayEvent] {
        &self.events
    }

    pub fn metadata(&self) -> &ReplayMetadata {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Snapshot as a document with `duration` finalized to now
    pub fn to_document(&self) -> ReplayDocument {
        let duration = self.elapsed_ms().max(self.last_timestamp);
        ReplayDocument {
            version: REPLAY_FORMAT_VERSION.to_string(),
            timestamp: self.started_at,
            duration,
            events: self.events.clone(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<ReplayDocument> {
        let document = self.to_document();
        document.save(path)?;
        Ok(document)
    }
}

/// Bytes `event` takes inside the pretty-printed `events` array
fn saved_size(event: &ReplayEvent) -> Result<usize> {
    nested_size(event, 2)
}

/// Pretty-printed size of `value` written `depth` levels deep, plus a separator
fn nested_size<T: serde::Serialize>(value: &T, depth: usize) -> Result<usize> {
    let json =
        serde_json::to_string_pretty(value).map_err(|e| ReplayError::Serialization(e.to_string()))?;
    Ok(json.len() + json.lines().count() * 2 * depth + 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_at_clamps_backwards_time() {
        let mut recorder = Recorder::new(80, 24);
        assert_eq!(recorder.record_at(100, EventData::Output("a".into())).unwrap(), 100);
        assert_eq!(recorder.record_at(40, EventData::Output("b".into())).unwrap(), 100);
        assert_eq!(recorder.events()[1].timestamp, 100);
    }

    #[test]
    fn test_spawn_metadata_set_once() {
        let mut recorder = Recorder::new(80, 24);
        recorder
            .record(EventData::Spawn {
                command: "vim".into(),
                args: vec!["a.txt".into()],
            })
            .unwrap();
        recorder
            .record(EventData::Spawn {
                command: "less".into(),
                args: vec![],
            })
            .unwrap();

        assert_eq!(recorder.metadata().command.as_deref(), Some("vim"));
        assert_eq!(recorder.metadata().args, vec!["a.txt".to_string()]);
        assert_eq!(recorder.len(), 2);
    }

    #[test]
    fn test_event_limit() {
        let mut recorder = Recorder::new(80, 24).with_max_events(2);
        recorder.record(EventData::Input("a".into())).unwrap();
        recorder.record(EventData::Input("b".into())).unwrap();
        assert!(matches!(
            recorder.record(EventData::Input("c".into())),
            Err(ReplayError::LimitExceeded(_))
        ));
        assert_eq!(recorder.len(), 2);
    }

    #[test]
    fn test_size_limit_keeps_saved_replay_loadable() {
        use crate::document::LoadLimits;
        use crate::safe_json::JsonLimits;

        let limit = 8 * 1024;
        let mut recorder = Recorder::new(80, 24).with_max_bytes(limit);
        recorder
            .record_spawn("top", &[], BTreeMap::from([("TERM".to_string(), "xterm".to_string())]))
            .unwrap();
        let chunk = "\x1b[1;32mline\x1b[0m \"quoted\"\r\n".repeat(8);
        let mut accepted = 0;
        loop {
            match recorder.record(EventData::Output(chunk.clone())) {
                Ok(_) => accepted += 1,
                Err(ReplayError::LimitExceeded(_)) => break,
                Err(other) => panic!("unexpected error: {}", other),
            }
        }
        assert!(accepted > 0);

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("long.json");
        recorder.save(&path).unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() <= limit as u64);

        let limits = LoadLimits {
            json: JsonLimits {
                max_bytes: limit,
                ..JsonLimits::default()
            },
            ..LoadLimits::default()
        };
        let loaded = ReplayDocument::load_with_limits(&path, limits).unwrap();
        assert_eq!(loaded.events.len(), recorder.len());
    }

    #[test]
    fn test_only_first_spawn_sets_env() {
        let mut recorder = Recorder::new(80, 24);
        let env = |value: &str| BTreeMap::from([("SHELL".to_string(), value.to_string())]);
        recorder.record_spawn("vim", &[], env("/bin/bash")).unwrap();
        recorder.record_spawn("less", &[], env("/bin/zsh")).unwrap();

        assert_eq!(recorder.metadata().command.as_deref(), Some("vim"));
        assert_eq!(recorder.metadata().env["SHELL"], "/bin/bash");
    }

    #[test]
    fn test_rollback_forgets_spawn() {
        let mut recorder = Recorder::new(80, 24);
        recorder.record_at(10, EventData::Input("x".into())).unwrap();
        let checkpoint = recorder.checkpoint();
        recorder
            .record_spawn("missing", &["a".to_string()], BTreeMap::from([("A".to_string(), "1".to_string())]))
            .unwrap();
        recorder.record_at(50, EventData::Output("late".into())).unwrap();

        recorder.rollback(checkpoint);
        assert_eq!(recorder.len(), 1);
        assert_eq!(recorder.metadata().command, None);
        assert!(recorder.metadata().env.is_empty());

        // Timestamps restart from the checkpoint
        assert_eq!(recorder.record_at(20, EventData::Key("q".into())).unwrap(), 20);
    }

    #[test]
    fn test_document_duration_covers_events() {
        let mut recorder = Recorder::new(100, 30);
        recorder.record_at(5_000, EventData::Exit { code: Some(0) }).unwrap();
        let doc = recorder.to_document();
        assert!(doc.duration >= 5_000);
        assert_eq!(doc.metadata.cols, 100);
        assert!(doc.validate(MAX_REPLAY_EVENTS).is_ok());
    }
}
