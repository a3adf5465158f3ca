//! `tripctl` - command line client for the trip planning service

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use trip_planner_client::cli::{self, Cli, Commands};
use trip_planner_client::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let mut config = Config::load()?;
    if let Some(url) = cli.api_url {
        config.api_base_url = url;
    }

    match cli.command {
        Commands::Plan(args) => cli::plan::run(&cli.profile, &config, args).await,
        Commands::Health => cli::health::run(&config).await,
        Commands::Form(command) => cli::form::run(&cli.profile, command),
        Commands::Auth(command) => cli::auth::run(&cli.profile, &config, command).await,
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "tripctl", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
