//! Replay document - the persisted form of a recorded session

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{ReplayError, Result};
use crate::event::{EventData, ReplayEvent};
use crate::safe_json::{self, JsonLimits};

/// Schema version written into every document
pub const REPLAY_FORMAT_VERSION: &str = "1.0";

/// Default ceiling on events in a loaded or recorded document
pub const MAX_REPLAY_EVENTS: usize = 100_000;

/// Terminal and process information captured at spawn time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayMetadata {
    pub cols: u16,
    pub rows: u16,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment with credential values masked
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for ReplayMetadata {
    fn default() -> Self {
        Self {
            cols: 80,
            rows: 24,
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

/// Limits applied when loading an untrusted document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadLimits {
    pub json: JsonLimits,
    pub max_events: usize,
}

impl Default for LoadLimits {
    fn default() -> Self {
        Self {
            json: JsonLimits::default(),
            max_events: MAX_REPLAY_EVENTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayDocument {
    pub version: String,
    /// Creation time, ISO-8601
    pub timestamp: DateTime<Utc>,
    /// Total duration in milliseconds
    pub duration: u64,
    pub events: Vec<ReplayEvent>,
    pub metadata: ReplayMetadata,
}

impl ReplayDocument {
    pub fn new(metadata: ReplayMetadata) -> Self {
        Self {
            version: REPLAY_FORMAT_VERSION.to_string(),
            timestamp: Utc::now(),
            duration: 0,
            events: Vec::new(),
            metadata,
        }
    }

    /// Duration covering every event, even if `duration` was written short
    pub fn effective_duration(&self) -> u64 {
        let last = self.events.last().map(|e| e.timestamp).unwrap_or(0);
        self.duration.max(last)
    }

    /// Structural checks beyond what deserialization enforces
    pub fn validate(&self, max_events: usize) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(ReplayError::InvalidReplay("missing version".to_string()));
        }
        if self.metadata.cols == 0 || self.metadata.rows == 0 {
            return Err(ReplayError::InvalidReplay(format!(
                "invalid terminal size {}x{}",
                self.metadata.cols, self.metadata.rows
            )));
        }
        if self.events.len() > max_events {
            return Err(ReplayError::InvalidReplay(format!(
                "{} events exceeds the limit of {}",
                self.events.len(),
                max_events
            )));
        }
        if let Some((index, cols, rows)) =
            self.events.iter().enumerate().find_map(|(index, event)| match event.data {
                EventData::Resize { cols, rows } if cols == 0 || rows == 0 => {
                    Some((index, cols, rows))
                }
                _ => None,
            })
        {
            return Err(ReplayError::InvalidReplay(format!(
                "event {} resizes to {}x{}",
                index, cols, rows
            )));
        }
        if let Some(index) = self
            .events
            .windows(2)
            .position(|pair| pair[1].timestamp < pair[0].timestamp)
        {
            return Err(ReplayError::InvalidReplay(format!(
                "timestamps decrease at event {}",
                index + 1
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| ReplayError::Serialization(e.to_string()))
    }

    /// Parse and validate a document from text
    pub fn from_json_str(input: &str, limits: LoadLimits) -> Result<Self> {
        let document: Self = safe_json::parse(input, limits.json)?;
        document.validate(limits.max_events)?;
        Ok(document)
    }

    /// Write the document as pretty JSON via a temp file and rename
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = self.to_json()?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json)?;
        if let Err(e) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        info!(
            events = self.events.len(),
            duration_ms = self.duration,
            "Saved replay to {}",
            path.display()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_limits(path, LoadLimits::default())
    }

    pub fn load_with_limits(path: &Path, limits: LoadLimits) -> Result<Self> {
        let size = fs::metadata(path)?.len();
        if size > limits.json.max_bytes as u64 {
            warn!(size, limit = limits.json.max_bytes, "Replay file too large");
            return Err(ReplayError::InvalidReplay(format!(
                "file is {} bytes, limit is {}",
                size, limits.json.max_bytes
            )));
        }

        let text = fs::read_to_string(path)?;
        let document = Self::from_json_str(&text, limits)?;
        debug!(
            events = document.events.len(),
            version = %document.version,
            "Loaded replay"
        );
        Ok(document)
    }
}
