//! sqldock - main entry point.

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use sqldock::{
    cli::{Cli, Command, RunMode, run_session, show_config},
    config::Config,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load .env if present
    let _ = dotenvy::dotenv();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sqldock=info"));
    if cli.log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }

    let config = Config::from_env()?;

    match cli.command.unwrap_or_default() {
        Command::Config => {
            print!("{}", show_config(&config));
            Ok(())
        }
        Command::Run { non_interactive } => {
            let mode = if non_interactive {
                RunMode::UntilSignal
            } else {
                RunMode::Interactive
            };
            run_session(&config, mode).await
        }
    }
}
