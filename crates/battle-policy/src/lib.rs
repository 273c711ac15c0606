//! battle-policy - validation guard for PTY sessions
//!
//! Screens commands, arguments, working directories and environments before they
//! reach a terminal backend, and bounds how many PTYs may be live at once.

pub mod command;
pub mod error;
pub mod level;
pub mod limits;
pub mod sanitize;

use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

pub use command::{validate_command, validate_command_with, CommandValidation};
pub use error::{GuardError, Result};
pub use level::{GuardConfig, SecurityLevel, DEFAULT_MAX_CONCURRENT_PTYS};
pub use limits::{PtyLimiter, PtyPermit};
pub use sanitize::{
    redact_sensitive, sanitize_args, sanitize_env, strip_injection_vars, validate_path,
};

/// A spawn request that passed every check
#[derive(Debug)]
pub struct ApprovedSpawn {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Environment for the child: injection variables removed, values intact
    pub env: BTreeMap<String, String>,
    /// Environment safe to persist or log: credentials masked
    pub recorded_env: BTreeMap<String, String>,
    pub permit: PtyPermit,
}

/// A spawn request that passed validation but holds no PTY slot yet
#[derive(Debug, Clone)]
pub struct ScreenedSpawn {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub recorded_env: BTreeMap<String, String>,
}

/// Guard applied at the spawn boundary
#[derive(Debug, Clone)]
pub struct ValidationGuard {
    config: GuardConfig,
    extra_blocked: Vec<Regex>,
    limiter: PtyLimiter,
}

impl ValidationGuard {
    /// Guard with its own limiter sized from the config
    pub fn new(config: GuardConfig) -> Result<Self> {
        let limiter = PtyLimiter::new(config.max_concurrent_ptys);
        Self::with_limiter(config, limiter)
    }

    /// Guard sharing an existing limiter with other sessions
    pub fn with_limiter(config: GuardConfig, limiter: PtyLimiter) -> Result<Self> {
        let extra_blocked = config
            .blocked_patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| GuardError::Config(format!("invalid blocked pattern '{}': {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            config,
            extra_blocked,
            limiter,
        })
    }

    pub fn level(&self) -> SecurityLevel {
        self.config.level
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn limiter(&self) -> &PtyLimiter {
        &self.limiter
    }

    /// Screen a command line at the configured level
    pub fn check_command(&self, command_line: &str) -> CommandValidation {
        validate_command_with(command_line, self.config.level, &self.extra_blocked)
    }

    /// Run every check for a spawn and reserve a PTY slot
    pub fn approve_spawn(
        &self,
        command: &str,
        args: &[String],
        cwd: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<ApprovedSpawn> {
        let screened = self.screen_spawn(command, args, cwd, env)?;
        self.reserve(screened)
    }

    /// Run every check for a spawn without reserving a PTY slot.
    ///
    /// Arguments are passed through unchanged. Below permissive, an argument
    /// that `sanitize_args` would alter rejects the spawn instead.
    pub fn screen_spawn(
        &self,
        command: &str,
        args: &[String],
        cwd: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<ScreenedSpawn> {
        let command_line = if args.is_empty() {
            command.to_string()
        } else {
            format!("{} {}", command, args.join(" "))
        };

        let verdict = self.check_command(&command_line);
        if !verdict.valid {
            let reason = verdict.error.unwrap_or_else(|| "command rejected".to_string());
            warn!(
                level = %self.config.level,
                reason = %reason,
                command = %redact_sensitive(&command_line),
                "Spawn rejected by validation guard"
            );
            return Err(GuardError::CommandRejected(reason));
        }

        if self.config.level != SecurityLevel::Permissive {
            if let Some(arg) = args
                .iter()
                .zip(sanitize_args(args))
                .find_map(|(arg, clean)| (*arg != clean).then_some(arg))
            {
                warn!(
                    level = %self.config.level,
                    argument = %redact_sensitive(arg),
                    "Spawn argument rejected by validation guard"
                );
                return Err(GuardError::CommandRejected(format!(
                    "argument '{}' contains shell metacharacters or '..'",
                    arg
                )));
            }
        }

        let cwd = match &self.config.sandbox_root {
            Some(root) => validate_path(cwd, root)?,
            None => {
                if cwd.as_os_str().to_string_lossy().contains('\0') {
                    return Err(GuardError::PathRejected(
                        "working directory contains a NUL byte".to_string(),
                    ));
                }
                cwd.to_path_buf()
            }
        };

        Ok(ScreenedSpawn {
            command: command.trim().to_string(),
            args: args.to_vec(),
            cwd,
            env: strip_injection_vars(env),
            recorded_env: sanitize_env(env),
        })
    }

    /// Reserve a PTY slot for a screened spawn
    pub fn reserve(&self, screened: ScreenedSpawn) -> Result<ApprovedSpawn> {
        let permit = self.limiter.try_acquire()?;
        Ok(ApprovedSpawn {
            command: screened.command,
            args: screened.args,
            cwd: screened.cwd,
            env: screened.env,
            recorded_env: screened.recorded_env,
            permit,
        })
    }
}

impl Default for ValidationGuard {
    fn default() -> Self {
        Self {
            config: GuardConfig::default(),
            extra_blocked: Vec::new(),
            limiter: PtyLimiter::new(DEFAULT_MAX_CONCURRENT_PTYS),
        }
    }
}
