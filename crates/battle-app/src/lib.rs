//! battle - command-line front end
//!
//! `battle run` drives a program through a PTY with scripted steps,
//! `battle replay play` and `battle replay export` work on saved recordings.

pub mod cli;
pub mod player_tui;
pub mod runner;
pub mod steps;

pub use cli::{Cli, Commands, ReplayCommands, RunArgs};
pub use runner::{execute, exit_code, export_replay, EXIT_FAILURE, EXIT_REJECTED, EXIT_SUCCESS};
pub use steps::Step;

/// Log filter used when `RUST_LOG` is unset; one directive per workspace crate
pub const DEFAULT_LOG_FILTER: &str =
    "battle_app=info,battle_terminal=info,battle_replay=info,battle_policy=info";
