//! Hardened JSON parsing for untrusted replay files

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ReplayError, Result};

/// Keys rejected at any depth
pub const FORBIDDEN_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

/// Default size ceiling for a replay file (50 MiB)
pub const DEFAULT_MAX_BYTES: usize = 50 * 1024 * 1024;

/// Default nesting ceiling
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Limits applied before any typed deserialization happens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsonLimits {
    pub max_bytes: usize,
    pub max_depth: usize,
}

impl Default for JsonLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Parse `input` into an untyped value, enforcing size, depth and key rules
pub fn parse_value(input: &str, limits: JsonLimits) -> Result<Value> {
    if input.len() > limits.max_bytes {
        return Err(ReplayError::InvalidReplay(format!(
            "document is {} bytes, limit is {}",
            input.len(),
            limits.max_bytes
        )));
    }

    let value: Value = serde_json::from_str(input)
        .map_err(|e| ReplayError::InvalidReplay(format!("malformed JSON: {}", e)))?;

    check_value(&value, 1, limits.max_depth)?;
    Ok(value)
}

/// Parse and deserialize in one step
pub fn parse<T: DeserializeOwned>(input: &str, limits: JsonLimits) -> Result<T> {
    let value = parse_value(input, limits)?;
    serde_json::from_value(value).map_err(|e| ReplayError::InvalidReplay(e.to_string()))
}

fn check_value(value: &Value, depth: usize, max_depth: usize) -> Result<()> {
    if depth > max_depth {
        return Err(ReplayError::InvalidReplay(format!(
            "nesting deeper than {} levels",
            max_depth
        )));
    }

    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if FORBIDDEN_KEYS.contains(&key.as_str()) {
                    return Err(ReplayError::InvalidReplay(format!(
                        "forbidden key '{}'",
                        key
                    )));
                }
                check_value(child, depth + 1, max_depth)?;
            }
            Ok(())
        }
        Value::Array(items) => items
            .iter()
            .try_for_each(|child| check_value(child, depth + 1, max_depth)),
        _ => Ok(()),
    }
}
