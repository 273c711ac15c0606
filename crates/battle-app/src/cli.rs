use anyhow::{Context, Result};
use battle_policy::SecurityLevel;
use battle_replay::ExportFormat;
use battle_terminal::{SessionConfig, TerminalBackendType};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::steps::Step;

/// CLI arguments for battle
#[derive(Parser, Debug)]
#[command(name = "battle")]
#[command(about = "Drive terminal applications through a real PTY, assert on their output and replay the runs")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Mirror process output to stderr
    #[arg(short, long, global = true, env = "BATTLE_VERBOSE")]
    pub verbose: bool,

    /// Command screening level (strict, balanced, permissive)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub level: Option<SecurityLevel>,

    /// Terminal backend (pty, tmux)
    #[arg(long, global = true, value_name = "BACKEND")]
    pub backend: Option<TerminalBackendType>,

    /// Session configuration file (TOML)
    #[arg(long, global = true, value_name = "PATH", env = "BATTLE_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Spawn a command in a PTY and run the given steps against it
    Run(RunArgs),

    /// Play or export a recorded session
    Replay {
        #[command(subcommand)]
        command: ReplayCommands,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Program to run
    pub command: String,

    /// Arguments for the program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Ordered step: expect:TEXT, regex:RE, send:TEXT, key:NAME, wait:MS, resize:CxR, screenshot:NAME
    #[arg(short, long = "step", value_name = "KIND:VALUE")]
    pub steps: Vec<Step>,

    /// Save the session replay to this file
    #[arg(long, value_name = "FILE")]
    pub record: Option<PathBuf>,

    /// Timeout for each expect step in milliseconds
    #[arg(long, value_name = "MS")]
    pub expect_timeout: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum ReplayCommands {
    /// Play a replay in this terminal
    Play {
        file: PathBuf,

        /// Playback speed multiplier (0-50)
        #[arg(long, default_value_t = 1.0)]
        speed: f64,
    },

    /// Export a replay as a standalone HTML player or normalized JSON
    Export {
        file: PathBuf,

        #[arg(long, default_value = "html")]
        format: ExportFormat,

        /// Output path; defaults to the input with the format's extension
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

impl Cli {
    /// Config file, then `BATTLE_*` variables, then command-line flags
    pub fn session_config(&self) -> Result<SessionConfig> {
        let mut config = SessionConfig::load(self.config.as_deref())
            .context("Failed to load session configuration")?;
        if self.verbose {
            config.verbose = true;
        }
        if let Some(level) = self.level {
            config.guard.level = level;
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        Ok(config)
    }
}
