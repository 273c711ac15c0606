//! Event - the recorded actions of a terminal session
//!
//! Every externally observable action (spawn, output, input, key, resize,
//! screenshot, expect, exit) becomes one immutable `ReplayEvent`. On disk each
//! event is `{"timestamp": ms, "type": "...", "data": ...}`.

use serde::{Deserialize, Serialize};

/// Event kinds, in the order they usually appear in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Spawn,
    Output,
    Input,
    Key,
    Resize,
    Screenshot,
    Expect,
    Exit,
}

impl EventKind {
    /// Returns the string representation of the event kind
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spawn => "spawn",
            Self::Output => "output",
            Self::Input => "input",
            Self::Key => "key",
            Self::Resize => "resize",
            Self::Screenshot => "screenshot",
            Self::Expect => "expect",
            Self::Exit => "exit",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spawn" => Ok(Self::Spawn),
            "output" => Ok(Self::Output),
            "input" => Ok(Self::Input),
            "key" => Ok(Self::Key),
            "resize" => Ok(Self::Resize),
            "screenshot" => Ok(Self::Screenshot),
            "expect" => Ok(Self::Expect),
            "exit" => Ok(Self::Exit),
            _ => Err(format!("unknown event type: {s}")),
        }
    }
}

/// Variant payloads, serialized adjacently as `type` + `data`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum EventData {
    /// Process started
    Spawn { command: String, args: Vec<String> },
    /// Text the process wrote to the terminal
    Output(String),
    /// Text written to the process
    Input(String),
    /// Named key injected
    Key(String),
    /// Terminal resized
    Resize { cols: u16, rows: u16 },
    /// Screenshot captured under a name
    Screenshot { name: String },
    /// Expect finished
    Expect { pattern: String, matched: bool },
    /// Process exited
    Exit {
        #[serde(default)]
        code: Option<i32>,
    },
}

impl EventData {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Spawn { .. } => EventKind::Spawn,
            Self::Output(_) => EventKind::Output,
            Self::Input(_) => EventKind::Input,
            Self::Key(_) => EventKind::Key,
            Self::Resize { .. } => EventKind::Resize,
            Self::Screenshot { .. } => EventKind::Screenshot,
            Self::Expect { .. } => EventKind::Expect,
            Self::Exit { .. } => EventKind::Exit,
        }
    }
}

/// One recorded action, stamped relative to session start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayEvent {
    /// Milliseconds since the session started
    pub timestamp: u64,
    #[serde(flatten)]
    pub data: EventData,
}

impl ReplayEvent {
    pub fn new(timestamp: u64, data: EventData) -> Self {
        Self { timestamp, data }
    }

    pub fn kind(&self) -> EventKind {
        self.data.kind()
    }

    /// Short human-readable description used by players and logs
    pub fn summary(&self) -> String {
        match &self.data {
            EventData::Spawn { command, args } => {
                if args.is_empty() {
                    format!("spawn {}", command)
                } else {
                    format!("spawn {} {}", command, args.join(" "))
                }
            }
            EventData::Output(text) => format!("output ({} bytes)", text.len()),
            EventData::Input(text) => format!("input ({} bytes)", text.len()),
            EventData::Key(key) => format!("key {}", key),
            EventData::Resize { cols, rows } => format!("resize {}x{}", cols, rows),
            EventData::Screenshot { name } => format!("screenshot {}", name),
            EventData::Expect { pattern, matched } => {
                if *matched {
                    format!("expect {:?} (matched)", pattern)
                } else {
                    format!("expect {:?} (not found)", pattern)
                }
            }
            EventData::Exit { code: Some(code) } => format!("exit {}", code),
            EventData::Exit { code: None } => "exit".to_string(),
        }
    }
}
