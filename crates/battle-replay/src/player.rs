//! Player - deterministic, seekable playback of a replay document
//!
//! The engine is renderer-agnostic: it advances a virtual clock and hands every
//! due event to `on_event`. The terminal player and the HTML exporter both drive
//! the same engine and differ only in their callbacks.

use std::time::{Duration, Instant};
use tracing::debug;

use crate::document::ReplayDocument;
use crate::event::ReplayEvent;

/// Fastest allowed playback multiplier
pub const MAX_SPEED: f64 = 50.0;

pub type EventCallback = Box<dyn FnMut(&ReplayEvent) + Send>;
pub type ProgressCallback = Box<dyn FnMut(PlaybackProgress) + Send>;
pub type ResetCallback = Box<dyn FnMut() + Send>;
pub type CompleteCallback = Box<dyn FnMut() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Stopped,
    Playing,
    Paused,
    Completed,
}

/// Snapshot of the playback position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    pub speed: f64,
    /// Virtual time in milliseconds
    pub current_time: u64,
    /// Index of the next event to dispatch
    pub cursor: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackProgress {
    pub current_time: u64,
    pub duration: u64,
    /// 0.0 ..= 100.0
    pub percent: f64,
    pub cursor: usize,
    pub total_events: usize,
}

#[derive(Default)]
struct Callbacks {
    on_event: Option<EventCallback>,
    on_progress: Option<ProgressCallback>,
    on_reset: Option<ResetCallback>,
    on_complete: Option<CompleteCallback>,
}

pub struct Player {
    document: ReplayDocument,
    duration: u64,
    speed: f64,
    current_time: f64,
    cursor: usize,
    status: PlaybackStatus,
    callbacks: Callbacks,
}

impl Player {
    pub fn new(document: ReplayDocument) -> Self {
        let duration = document.effective_duration();
        Self {
            document,
            duration,
            speed: 1.0,
            current_time: 0.0,
            cursor: 0,
            status: PlaybackStatus::Stopped,
            callbacks: Callbacks::default(),
        }
    }

    pub fn on_event(mut self, callback: impl FnMut(&ReplayEvent) + Send + 'static) -> Self {
        self.callbacks.on_event = Some(Box::new(callback));
        self
    }

    pub fn on_progress(mut self, callback: impl FnMut(PlaybackProgress) + Send + 'static) -> Self {
        self.callbacks.on_progress = Some(Box::new(callback));
        self
    }

    /// Called before a seek re-dispatches from the first event
    pub fn on_reset(mut self, callback: impl FnMut() + Send + 'static) -> Self {
        self.callbacks.on_reset = Some(Box::new(callback));
        self
    }

    pub fn on_complete(mut self, callback: impl FnMut() + Send + 'static) -> Self {
        self.callbacks.on_complete = Some(Box::new(callback));
        self
    }

    pub fn document(&self) -> &ReplayDocument {
        &self.document
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState {
            status: self.status,
            speed: self.speed,
            current_time: self.current_time as u64,
            cursor: self.cursor,
        }
    }

    pub fn progress(&self) -> PlaybackProgress {
        let current_time = self.current_time as u64;
        let percent = if self.duration == 0 {
            if self.status == PlaybackStatus::Completed {
                100.0
            } else {
                0.0
            }
        } else {
            (current_time as f64 / self.duration as f64 * 100.0).min(100.0)
        };
        PlaybackProgress {
            current_time,
            duration: self.duration,
            percent,
            cursor: self.cursor,
            total_events: self.document.events.len(),
        }
    }

    /// Start or resume; a completed playback starts over
    pub fn play(&mut self) {
        if self.status == PlaybackStatus::Completed {
            self.seek(0);
        }
        self.status = PlaybackStatus::Playing;
    }

    pub fn pause(&mut self) {
        if self.status == PlaybackStatus::Playing {
            self.status = PlaybackStatus::Paused;
        }
    }

    pub fn toggle(&mut self) {
        match self.status {
            PlaybackStatus::Playing => self.pause(),
            _ => self.play(),
        }
    }

    /// Halt and rewind to the start without dispatching anything
    pub fn stop(&mut self) {
        self.status = PlaybackStatus::Stopped;
        self.reset_position();
        self.emit_progress();
    }

    pub fn restart(&mut self) {
        self.stop();
        self.play();
    }

    /// Set the multiplier, clamped to [0, 50]; non-finite values freeze playback
    pub fn set_speed(&mut self, speed: f64) {
        self.speed = if speed.is_finite() {
            speed.clamp(0.0, MAX_SPEED)
        } else {
            0.0
        };
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Rebuild state at `target_ms` by replaying from the first event
    pub fn seek(&mut self, target_ms: u64) {
        let target = target_ms.min(self.duration);
        self.reset_position();
        self.current_time = target as f64;
        self.dispatch_due();

        if self.status == PlaybackStatus::Completed && target < self.duration {
            self.status = PlaybackStatus::Paused;
        }
        debug!(target_ms = target, cursor = self.cursor, "Seek");
        self.emit_progress();
    }

    pub fn seek_to_percent(&mut self, percent: f64) {
        let percent = if percent.is_finite() {
            percent.clamp(0.0, 100.0)
        } else {
            0.0
        };
        let target = (self.duration as f64 * percent / 100.0).round() as u64;
        self.seek(target);
    }

    pub fn skip_forward(&mut self, ms: u64) {
        let target = (self.current_time as u64).saturating_add(ms);
        self.seek(target);
    }

    pub fn skip_backward(&mut self, ms: u64) {
        let target = (self.current_time as u64).saturating_sub(ms);
        self.seek(target);
    }

    pub fn jump_to_start(&mut self) {
        self.seek(0);
    }

    pub fn jump_to_end(&mut self) {
        self.seek(self.duration);
    }

    pub fn is_finished(&self) -> bool {
        self.status == PlaybackStatus::Completed
    }

    /// Advance virtual time by `wall_delta × speed` and dispatch due events.
    ///
    /// Returns `true` while playback is still running.
    pub fn tick(&mut self, wall_delta: Duration) -> bool {
        if self.status != PlaybackStatus::Playing {
            return false;
        }

        let advance = wall_delta.as_secs_f64() * 1000.0 * self.speed;
        self.current_time = (self.current_time + advance).min(self.duration as f64);
        self.dispatch_due();
        self.emit_progress();

        if self.current_time as u64 >= self.duration {
            self.complete();
            return false;
        }
        true
    }

    /// Drive `tick` on a timer until completion, pause or stop
    pub async fn run(&mut self, tick_interval: Duration) {
        if self.status != PlaybackStatus::Playing {
            self.play();
        }

        let mut interval = tokio::time::interval(tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last = Instant::now();
        loop {
            interval.tick().await;
            let now = Instant::now();
            let delta = now.duration_since(last);
            last = now;
            if !self.tick(delta) {
                break;
            }
        }
    }

    fn reset_position(&mut self) {
        self.current_time = 0.0;
        self.cursor = 0;
        if let Some(callback) = self.callbacks.on_reset.as_mut() {
            callback();
        }
    }

    fn dispatch_due(&mut self) {
        let now = self.current_time as u64;
        while let Some(event) = self.document.events.get(self.cursor) {
            if event.timestamp > now {
                break;
            }
            if let Some(callback) = self.callbacks.on_event.as_mut() {
                callback(event);
            }
            self.cursor += 1;
        }
    }

    fn emit_progress(&mut self) {
        let progress = self.progress();
        if let Some(callback) = self.callbacks.on_progress.as_mut() {
            callback(progress);
        }
    }

    fn complete(&mut self) {
        self.status = PlaybackStatus::Completed;
        debug!(duration_ms = self.duration, "Playback complete");
        if let Some(callback) = self.callbacks.on_complete.as_mut() {
            callback();
        }
    }
}
