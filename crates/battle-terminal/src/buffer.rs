//! Bounded capture of terminal output

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::LazyLock;
use tracing::debug;

pub const DEFAULT_MAX_ENTRIES: usize = 1_000;
pub const DEFAULT_MAX_BYTES: usize = 10 * 1024 * 1024;

static ANSI_CSI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[mGKJH]").expect("ANSI pattern is valid")
});

/// Remove CSI sequences ending in `m`, `G`, `K`, `J` or `H`.
///
/// Mode switches such as `\x1b[?25l` are left in place.
pub fn strip_ansi(text: &str) -> String {
    ANSI_CSI.replace_all(text, "").into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferLimits {
    pub max_entries: usize,
    pub max_bytes: usize,
}

impl Default for BufferLimits {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStats {
    pub count: usize,
    pub bytes: usize,
    pub capacity_count: usize,
    pub capacity_bytes: usize,
    /// Entries evicted since creation or the last clear
    pub evicted: u64,
}

/// Point-in-time view used by change detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSnapshot {
    pub bytes: usize,
    pub text: String,
}

/// FIFO of output chunks bounded by entry count and total UTF-8 bytes.
///
/// `bytes` always equals the summed length of the retained entries.
#[derive(Debug)]
pub struct OutputBuffer {
    entries: VecDeque<String>,
    bytes: usize,
    limits: BufferLimits,
    evicted: u64,
}

impl OutputBuffer {
    pub fn new(limits: BufferLimits) -> Self {
        Self {
            entries: VecDeque::new(),
            bytes: 0,
            limits: BufferLimits {
                max_entries: limits.max_entries.max(1),
                max_bytes: limits.max_bytes.max(2),
            },
            evicted: 0,
        }
    }

    pub fn append(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }

        let chunk = if chunk.len() > self.limits.max_bytes {
            tail_on_char_boundary(chunk, self.limits.max_bytes / 2)
        } else {
            chunk
        };
        if chunk.is_empty() {
            return;
        }

        let mut evicted_now = 0u64;
        while !self.entries.is_empty()
            && (self.entries.len() + 1 > self.limits.max_entries
                || self.bytes + chunk.len() > self.limits.max_bytes)
        {
            if let Some(old) = self.entries.pop_front() {
                self.bytes -= old.len();
                evicted_now += 1;
            }
        }
        if evicted_now > 0 {
            self.evicted += evicted_now;
            debug!(
                evicted = evicted_now,
                retained = self.entries.len(),
                bytes = self.bytes,
                "Output buffer evicted entries"
            );
        }

        self.bytes += chunk.len();
        self.entries.push_back(chunk.to_string());
    }

    /// Full retained text, raw
    pub fn text(&self) -> String {
        let mut text = String::with_capacity(self.bytes);
        for entry in &self.entries {
            text.push_str(entry);
        }
        text
    }

    /// Retained text with ANSI sequences stripped
    pub fn clean_text(&self) -> String {
        strip_ansi(&self.text())
    }

    /// Literal containment in the ANSI-stripped text
    pub fn includes(&self, pattern: &str) -> bool {
        self.clean_text().contains(pattern)
    }

    /// Regex match against the ANSI-stripped text
    pub fn test(&self, regex: &Regex) -> bool {
        regex.is_match(&self.clean_text())
    }

    pub fn snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            bytes: self.bytes,
            text: self.text(),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.bytes = 0;
        self.evicted = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn byte_len(&self) -> usize {
        self.bytes
    }

    pub fn limits(&self) -> BufferLimits {
        self.limits
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            count: self.entries.len(),
            bytes: self.bytes,
            capacity_count: self.limits.max_entries,
            capacity_bytes: self.limits.max_bytes,
            evicted: self.evicted,
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(BufferLimits::default())
    }
}

impl std::fmt::Display for OutputBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for entry in &self.entries {
            f.write_str(entry)?;
        }
        Ok(())
    }
}

/// Last `max` bytes of `text`, cut forward to a char boundary
fn tail_on_char_boundary(text: &str, max: usize) -> &str {
    let mut start = text.len().saturating_sub(max);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Decodes PTY reads into text, carrying incomplete UTF-8 sequences across reads
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    // valid_up_to guarantees this prefix is UTF-8
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Truncated sequence at the end: keep for the next read
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is left, lossily
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
