use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{GuardError, Result};

/// Default ceiling for concurrently allocated PTYs across sessions
pub const DEFAULT_MAX_CONCURRENT_PTYS: usize = 15;

/// How strictly commands are screened before they reach a PTY
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    /// Reject every shell metacharacter
    Strict,
    /// Allow common interactive/dev-tool shapes, block chained deletion
    #[default]
    Balanced,
    /// Block only catastrophic patterns
    Permissive,
}

impl SecurityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Balanced => "balanced",
            Self::Permissive => "permissive",
        }
    }
}

impl std::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SecurityLevel {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "balanced" | "default" => Ok(Self::Balanced),
            "permissive" => Ok(Self::Permissive),
            other => Err(GuardError::Config(format!(
                "invalid security level '{}'. Valid options: 'strict', 'balanced', 'permissive'",
                other
            ))),
        }
    }
}

/// Guard configuration, usually kept next to the project as `battle-guard.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Level applied when the caller does not pick one
    #[serde(default)]
    pub level: SecurityLevel,
    /// Extra regular expressions rejected at every level
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
    /// Ceiling for concurrently allocated PTYs
    #[serde(default = "default_max_concurrent_ptys")]
    pub max_concurrent_ptys: usize,
    /// Optional root that working directories must stay inside
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_root: Option<std::path::PathBuf>,
}

fn default_max_concurrent_ptys() -> usize {
    DEFAULT_MAX_CONCURRENT_PTYS
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            level: SecurityLevel::default(),
            blocked_patterns: Vec::new(),
            max_concurrent_ptys: DEFAULT_MAX_CONCURRENT_PTYS,
            sandbox_root: None,
        }
    }
}

impl GuardConfig {
    /// Config with the given level and defaults for everything else
    pub fn with_level(level: SecurityLevel) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    /// Load guard config from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| GuardError::Config(format!("failed to read guard config: {}", e)))?;
        toml::from_str(&content)
            .map_err(|e| GuardError::Config(format!("failed to parse guard config: {}", e)))
    }

    /// Save guard config to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| GuardError::Config(format!("failed to serialize guard config: {}", e)))?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GuardError::Config(format!("failed to create config dir: {}", e)))?;
        }
        std::fs::write(path.as_ref(), content)
            .map_err(|e| GuardError::Config(format!("failed to write guard config: {}", e)))
    }
}
