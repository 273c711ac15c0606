//! Session configuration: TOML file, then `BATTLE_*` environment overrides

use battle_policy::{GuardConfig, SecurityLevel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::backend::TerminalBackendType;
use crate::buffer::BufferLimits;
use crate::error::{Result, TerminalError};
use crate::expect::{DEFAULT_CHANGE_POLL, DEFAULT_EXPECT_POLL};

pub const ENV_TIMEOUT_MS: &str = "BATTLE_TIMEOUT_MS";
pub const ENV_BACKEND: &str = "BATTLE_BACKEND";
pub const ENV_SECURITY_LEVEL: &str = "BATTLE_SECURITY_LEVEL";
pub const ENV_VERBOSE: &str = "BATTLE_VERBOSE";
pub const ENV_SCREENSHOT_DIR: &str = "BATTLE_SCREENSHOT_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cols: u16,
    pub rows: u16,
    /// Working directory for spawned processes; the current directory when unset
    pub cwd: Option<PathBuf>,
    /// Extra environment passed to spawned processes
    pub env: BTreeMap<String, String>,
    /// Watchdog timeout for a spawned process, 0 disables it
    pub timeout_ms: u64,
    /// How long a terminated process may take before SIGKILL
    pub kill_grace_ms: u64,
    pub expect_timeout_ms: u64,
    pub expect_poll_ms: u64,
    pub change_poll_ms: u64,
    pub buffer: BufferLimits,
    pub screenshot_dir: PathBuf,
    pub backend: TerminalBackendType,
    pub guard: GuardConfig,
    /// Mirror process output to stderr
    pub verbose: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cols: 80,
            rows: 24,
            cwd: None,
            env: BTreeMap::new(),
            timeout_ms: 30_000,
            kill_grace_ms: crate::DEFAULT_KILL_GRACE.as_millis() as u64,
            expect_timeout_ms: 5_000,
            expect_poll_ms: DEFAULT_EXPECT_POLL.as_millis() as u64,
            change_poll_ms: DEFAULT_CHANGE_POLL.as_millis() as u64,
            buffer: BufferLimits::default(),
            screenshot_dir: PathBuf::from("battle-screenshots"),
            backend: TerminalBackendType::default(),
            guard: GuardConfig::default(),
            verbose: false,
        }
    }
}

impl SessionConfig {
    /// Defaults, then the optional file, then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TerminalError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            TerminalError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Loaded session config");
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `BATTLE_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_TIMEOUT_MS) {
            self.timeout_ms = value.trim().parse().map_err(|_| {
                TerminalError::Config(format!("{} must be milliseconds, got '{}'", ENV_TIMEOUT_MS, value))
            })?;
        }
        if let Some(value) = lookup(ENV_BACKEND) {
            self.backend = value.parse()?;
        }
        if let Some(value) = lookup(ENV_SECURITY_LEVEL) {
            self.guard.level = value.parse::<SecurityLevel>()?;
        }
        if let Some(value) = lookup(ENV_VERBOSE) {
            self.verbose = matches!(
                value.trim().to_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        if let Some(value) = lookup(ENV_SCREENSHOT_DIR) {
            if !value.trim().is_empty() {
                self.screenshot_dir = PathBuf::from(value.trim());
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.cols == 0 || self.rows == 0 {
            return Err(TerminalError::Config(format!(
                "terminal size must be non-zero, got {}x{}",
                self.cols, self.rows
            )));
        }
        if self.expect_poll_ms == 0 || self.change_poll_ms == 0 {
            return Err(TerminalError::Config(
                "poll intervals must be at least 1ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn with_screenshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.screenshot_dir = dir.into();
        self
    }

    pub fn with_backend(mut self, backend: TerminalBackendType) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_security_level(mut self, level: SecurityLevel) -> Self {
        self.guard.level = level;
        self
    }

    pub fn with_buffer_limits(mut self, limits: BufferLimits) -> Self {
        self.buffer = limits;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn expect_timeout(&self) -> Duration {
        Duration::from_millis(self.expect_timeout_ms)
    }

    pub fn expect_poll(&self) -> Duration {
        Duration::from_millis(self.expect_poll_ms.max(1))
    }

    pub fn change_poll(&self) -> Duration {
        Duration::from_millis(self.change_poll_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!((config.cols, config.rows), (80, 24));
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.kill_grace(), Duration::from_secs(5));
        assert_eq!(config.expect_poll(), Duration::from_millis(50));
        assert_eq!(config.change_poll(), Duration::from_millis(10));
        assert_eq!(config.guard.level, SecurityLevel::Balanced);
        assert_eq!(config.backend, TerminalBackendType::Pty);
    }

    #[test]
    fn test_partial_toml() {
        let config: SessionConfig = toml::from_str(
            r#"
            cols = 120
            timeout_ms = 0

            [guard]
            level = "strict"

            [buffer]
            max_entries = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.cols, 120);
        assert_eq!(config.rows, 24);
        assert_eq!(config.timeout(), None);
        assert_eq!(config.guard.level, SecurityLevel::Strict);
        assert_eq!(config.buffer.max_entries, 10);
        assert_eq!(config.buffer.max_bytes, BufferLimits::default().max_bytes);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_TIMEOUT_MS, "1500"),
            (ENV_BACKEND, "tmux"),
            (ENV_SECURITY_LEVEL, "permissive"),
            (ENV_VERBOSE, "true"),
            (ENV_SCREENSHOT_DIR, "/tmp/shots"),
        ]
        .into_iter()
        .collect();

        let mut config = SessionConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.timeout_ms, 1500);
        assert_eq!(config.backend, TerminalBackendType::Tmux);
        assert_eq!(config.guard.level, SecurityLevel::Permissive);
        assert!(config.verbose);
        assert_eq!(config.screenshot_dir, PathBuf::from("/tmp/shots"));
    }

    #[test]
    fn test_bad_overrides_are_config_errors() {
        let mut config = SessionConfig::default();
        let err = config
            .apply_overrides(|key| (key == ENV_TIMEOUT_MS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, TerminalError::Config(_)));

        let err = config
            .apply_overrides(|key| (key == ENV_SECURITY_LEVEL).then(|| "paranoid".to_string()))
            .unwrap_err();
        assert!(matches!(err, TerminalError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("battle.toml");
        std::fs::write(&path, "rows = 0\n").unwrap();
        assert!(SessionConfig::load_from_file(&path).is_err());

        std::fs::write(&path, "rows = 40\nverbose = true\n").unwrap();
        let config = SessionConfig::load_from_file(&path).unwrap();
        assert_eq!(config.rows, 40);
        assert!(config.verbose);
    }
}
