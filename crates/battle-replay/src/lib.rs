//! battle-replay - session recording and playback
//!
//! A [`Recorder`] captures every observable action of a terminal session as a
//! timestamped [`ReplayEvent`]. Recordings persist as a [`ReplayDocument`] and
//! are played back by the [`Player`] engine or exported to HTML/JSON.

pub mod document;
pub mod error;
pub mod event;
pub mod export;
pub mod html;
pub mod player;
pub mod recorder;
pub mod safe_json;

pub use document::{
    LoadLimits, ReplayDocument, ReplayMetadata, MAX_REPLAY_EVENTS, REPLAY_FORMAT_VERSION,
};
pub use error::{ReplayError, Result};
pub use event::{EventData, EventKind, ReplayEvent};
pub use export::{export, export_html, export_json, render_frames, ExportFormat, Frame};
pub use html::{ansi_to_html, screen_to_html};
pub use player::{PlaybackProgress, PlaybackState, PlaybackStatus, Player, MAX_SPEED};
pub use recorder::{Checkpoint, Recorder};
pub use safe_json::JsonLimits;
