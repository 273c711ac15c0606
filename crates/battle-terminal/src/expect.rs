//! Polling matchers over the output buffer

use regex::Regex;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::buffer::{BufferSnapshot, OutputBuffer};
use crate::error::{Result, TerminalError};
use crate::lock;

/// Default interval between expect polls
pub const DEFAULT_EXPECT_POLL: Duration = Duration::from_millis(50);

/// Default interval between change-detection polls
pub const DEFAULT_CHANGE_POLL: Duration = Duration::from_millis(10);

/// What `expect` looks for in the ANSI-stripped output
#[derive(Debug, Clone)]
pub enum Pattern {
    Literal(String),
    Regex(Regex),
}

impl Pattern {
    pub fn literal(text: impl Into<String>) -> Self {
        Self::Literal(text.into())
    }

    pub fn regex(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Self::Regex)
            .map_err(|e| TerminalError::InvalidPattern(format!("{}: {}", pattern, e)))
    }

    pub fn is_match(&self, text: &str) -> bool {
        match self {
            Self::Literal(needle) => text.contains(needle.as_str()),
            Self::Regex(re) => re.is_match(text),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Literal(needle) => needle,
            Self::Regex(re) => re.as_str(),
        }
    }

    pub fn is_regex(&self) -> bool {
        matches!(self, Self::Regex(_))
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Literal(needle) => write!(f, "{}", needle),
            Self::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

impl From<&str> for Pattern {
    fn from(text: &str) -> Self {
        Self::literal(text)
    }
}

impl From<String> for Pattern {
    fn from(text: String) -> Self {
        Self::Literal(text)
    }
}

impl From<Regex> for Pattern {
    fn from(re: Regex) -> Self {
        Self::Regex(re)
    }
}

/// Evaluate `check` every `interval` until it holds or `timeout` passes.
///
/// The condition is tested once more at the deadline, so a zero timeout still
/// performs a single check.
pub async fn poll_until<F>(timeout: Duration, interval: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    let interval = interval.max(Duration::from_millis(1));
    loop {
        if check() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

/// Wait until the stripped buffer matches `pattern`
pub async fn wait_for_pattern(
    buffer: &Mutex<OutputBuffer>,
    pattern: &Pattern,
    timeout: Duration,
    interval: Duration,
) -> bool {
    poll_until(timeout, interval, || {
        let text = lock(buffer).clean_text();
        pattern.is_match(&text)
    })
    .await
}

/// Wait until the buffer's byte length or content differs from `baseline`
pub async fn wait_for_change(
    buffer: &Mutex<OutputBuffer>,
    baseline: &BufferSnapshot,
    timeout: Duration,
    interval: Duration,
) -> bool {
    poll_until(timeout, interval, || {
        let buffer = lock(buffer);
        buffer.byte_len() != baseline.bytes || buffer.text() != baseline.text
    })
    .await
}
