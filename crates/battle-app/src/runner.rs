//! Subcommand execution and exit-code mapping

use anyhow::{bail, Context, Result};
use battle_replay::{export, ExportFormat, ReplayDocument, ReplayError};
use battle_terminal::{Session, TerminalError};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::{Cli, Commands, ReplayCommands, RunArgs};
use crate::player_tui;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_REJECTED: i32 = 2;

pub async fn execute(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Run(args) => run(&cli, args).await,
        Commands::Replay { command } => match command {
            ReplayCommands::Play { file, speed } => {
                let document = load_replay(file)?;
                player_tui::play(document, *speed).await
            }
            ReplayCommands::Export {
                file,
                format,
                output,
            } => {
                let path = export_replay(file, *format, output.as_deref())?;
                println!("{} {}", "Exported".green(), path.display());
                Ok(())
            }
        },
    }
}

/// Map an error to the process exit code
pub fn exit_code(error: &anyhow::Error) -> i32 {
    for cause in error.chain() {
        if let Some(err) = cause.downcast_ref::<TerminalError>() {
            return if err.is_rejection() {
                EXIT_REJECTED
            } else {
                EXIT_FAILURE
            };
        }
        if let Some(ReplayError::InvalidReplay(_)) = cause.downcast_ref::<ReplayError>() {
            return EXIT_REJECTED;
        }
    }
    EXIT_FAILURE
}

async fn run(cli: &Cli, args: &RunArgs) -> Result<()> {
    let mut config = cli.session_config()?;
    if let Some(ms) = args.expect_timeout {
        config.expect_timeout_ms = ms;
    }
    let expect_timeout = config.expect_timeout();
    let wait_limit = config.timeout().unwrap_or(Duration::from_secs(30));

    let mut session = Session::new(config)?;
    info!(
        backend = session.backend_name(),
        level = %session.guard().level(),
        "Session ready"
    );

    let outcome = drive(&mut session, args, expect_timeout, wait_limit).await;

    // The recording is saved even when a step failed
    match session.finish(args.record.as_deref()).await {
        Ok(Some(path)) => println!("{} {}", "Replay saved to".cyan(), path.display()),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Failed to save replay"),
    }

    outcome
}

async fn drive(
    session: &mut Session,
    args: &RunArgs,
    expect_timeout: Duration,
    wait_limit: Duration,
) -> Result<()> {
    session
        .spawn(&args.command, args.args.iter().cloned())
        .await
        .with_context(|| format!("Failed to start '{}'", args.command))?;

    if args.steps.is_empty() {
        let status = session
            .wait_for_exit(wait_limit)
            .await
            .context("Process did not exit in time")?;
        print!("{}", session.clean_output());
        if !status.success() {
            bail!("'{}' finished with {}", args.command, status);
        }
        println!("{} '{}' {}", "✓".green(), args.command, status);
        return Ok(());
    }

    let total = args.steps.len();
    for (index, step) in args.steps.iter().enumerate() {
        match step.execute(session, expect_timeout).await {
            Ok(()) => println!("{} [{}/{}] {}", "✓".green(), index + 1, total, step),
            Err(e) => {
                println!("{} [{}/{}] {}", "✗".red(), index + 1, total, step);
                println!("  {}", e.to_string().red());
                return Err(e.context(format!("Step {} failed: {}", index + 1, step)));
            }
        }
    }

    println!("{}", format!("All {} steps passed", total).green().bold());
    Ok(())
}

fn load_replay(path: &Path) -> Result<ReplayDocument> {
    ReplayDocument::load(path).with_context(|| format!("Failed to load replay {}", path.display()))
}

/// Write the export next to the input unless `output` is given
pub fn export_replay(file: &Path, format: ExportFormat, output: Option<&Path>) -> Result<PathBuf> {
    let document = load_replay(file)?;
    let rendered = export(&document, format).context("Failed to export replay")?;
    let path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| file.with_extension(format.extension()));
    if path == file {
        bail!("Refusing to overwrite the input replay {}", file.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(&path, rendered).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), format = %format, "Replay exported");
    Ok(path)
}
