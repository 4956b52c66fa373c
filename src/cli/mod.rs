//! CLI command handling.
//!
//! Provides subcommands for:
//! - Running a database container session (`run`)
//! - Showing the resolved configuration (`config`)

mod config;
mod run;

pub use config::show_config;
pub use run::{RunMode, run_session};

use clap::{ColorChoice, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "sqldock")]
#[command(about = "Throwaway SQL Server containers for persistence integration tests")]
#[command(
    long_about = "sqldock provisions a SQL Server container, watches the Docker event stream until it is ready, and tears it down again.\nExamples:\n  sqldock run  # Start a container and drive it from stdin\n  sqldock config  # Show the resolved settings"
)]
#[command(version)]
#[command(color = ColorChoice::Auto)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start a container session (default if no subcommand given)
    #[command(
        about = "Run a database container session",
        long_about = "Starts the container and waits for it to execute.\nIn interactive mode, press 1 to stop/start the container and q to quit.\nExample: sqldock run --non-interactive"
    )]
    Run {
        /// Do not read stdin; hold the container until Ctrl-C
        #[arg(long)]
        non_interactive: bool,
    },

    /// Show the configuration resolved from the environment
    #[command(
        about = "Show resolved configuration",
        long_about = "Prints every SQLDOCK_* setting after defaults are applied. The password is redacted.\nExample: sqldock config"
    )]
    Config,
}

impl Default for Command {
    fn default() -> Self {
        Command::Run {
            non_interactive: false,
        }
    }
}
