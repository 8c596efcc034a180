use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Args, Parser, Subcommand};

use crate::error::{BpError, BpResult};

/// Global flag indicating that a shutdown signal has been received.
static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);

/// Coordinates graceful Ctrl+C shutdown.
///
/// When a signal is received the controller sets a global `AtomicBool`,
/// which the batch runner polls between sessions and long-running helpers
/// poll while waiting on child processes. Re-delivering the signal during
/// cleanup only re-sets the flag; cleanup itself is not cancellable.
pub struct ShutdownController;

impl ShutdownController {
    /// Install the Ctrl+C signal handler.
    ///
    /// `on_signal` is an optional callback invoked from the signal-handler
    /// context. Errors are non-fatal (signal handling is best-effort), so
    /// callers may choose to log and continue.
    pub fn install(on_signal: Option<Box<dyn Fn() + Send + Sync + 'static>>) -> BpResult<()> {
        ctrlc::set_handler(move || {
            SHUTDOWN_FLAG.store(true, Ordering::SeqCst);
            tracing::info!("shutdown signal received (Ctrl+C)");
            if let Some(ref cb) = on_signal {
                cb();
            }
        })
        .map_err(|e| BpError::Io(std::io::Error::other(format!("ctrlc handler: {e}"))))?;
        Ok(())
    }

    /// Returns `true` once a Ctrl+C (or programmatic trigger) has been
    /// received.
    #[must_use]
    pub fn is_shutting_down() -> bool {
        SHUTDOWN_FLAG.load(Ordering::SeqCst)
    }

    /// Programmatically trigger the shutdown flag (useful for testing and
    /// internal cancel paths).
    pub fn trigger_shutdown() {
        SHUTDOWN_FLAG.store(true, Ordering::SeqCst);
    }

    /// Reset the shutdown flag (for testing only).
    pub fn reset() {
        SHUTDOWN_FLAG.store(false, Ordering::SeqCst);
    }

    /// The exit code the binary should use when exiting due to a signal.
    #[must_use]
    pub const fn signal_exit_code() -> i32 {
        130 // Convention: 128 + SIGINT(2)
    }
}

#[derive(Debug, Parser)]
#[command(name = "bagpipe")]
#[command(about = "Staged, resumable processing of recorded robot sessions through external SLAM tooling")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Process a single session through the SLAM chain.
    Run(RunArgs),
    /// Process every session matching the filters.
    Batch(BatchArgs),
    /// List the registered stages.
    Stages,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Path to a session directory, or a session UUID resolved under the
    /// data root.
    pub session: String,

    /// Root of the `env_robot/session` dataset layout.
    #[arg(long, default_value = "data")]
    pub data_root: PathBuf,

    /// Output group under the session's processed directory.
    #[arg(long, default_value = "slam")]
    pub group: String,

    /// Force re-processing even if already completed.
    #[arg(long)]
    pub force: bool,

    /// Print the stage artifacts as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Args)]
pub struct BatchArgs {
    /// Filter by exact session directory name.
    #[arg(long)]
    pub dataset: Option<String>,

    /// Filter by robot name.
    #[arg(long)]
    pub robot: Option<String>,

    /// Filter by environment name.
    #[arg(long)]
    pub env: Option<String>,

    /// Filter by date (YYYY, YYYY-MM, or YYYY-MM-DD prefix).
    #[arg(long)]
    pub date: Option<String>,

    /// Root of the `env_robot/session` dataset layout.
    #[arg(long, default_value = "data")]
    pub data_root: PathBuf,

    /// Output group under each session's processed directory.
    #[arg(long, default_value = "slam")]
    pub group: String,

    /// Force re-processing even if already completed.
    #[arg(long)]
    pub force: bool,

    /// Print the batch report as JSON.
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_parses_session_and_force() {
        let cli = Cli::parse_from(["bagpipe", "run", "data/lab_spot/2024-01-20_walk", "--force"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.session, "data/lab_spot/2024-01-20_walk");
        assert!(args.force);
        assert_eq!(args.group, "slam");
    }

    #[test]
    fn batch_parses_filters() {
        let cli = Cli::parse_from([
            "bagpipe", "batch", "--robot", "husky", "--date", "2024-01", "--env", "warehouse",
        ]);
        let Command::Batch(args) = cli.command else {
            panic!("expected batch command");
        };
        assert_eq!(args.robot.as_deref(), Some("husky"));
        assert_eq!(args.date.as_deref(), Some("2024-01"));
        assert_eq!(args.env.as_deref(), Some("warehouse"));
        assert!(!args.force);
    }

    // Flag round-trip behavior is covered in tests/interrupt_tests.rs,
    // which runs in its own process; toggling the global flag here would
    // race with unit tests that poll it.

    #[test]
    fn signal_exit_code_is_130() {
        assert_eq!(ShutdownController::signal_exit_code(), 130);
    }
}
