//! Orchestrator CLI entry point.

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;

use foreman::cli::{commands, exit_code_for, AgentCommands, ApiClient, Cli, Commands};
use foreman::infrastructure::config::ConfigLoader;
use foreman::infrastructure::logging::Logger;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    if let Commands::Start { ref config, agents } = cli.command {
        let config = match config {
            Some(path) => ConfigLoader::load_from_file(path)
                .with_context(|| format!("loading config from {path}"))?,
            None => ConfigLoader::load().context("loading configuration")?,
        };
        let _logger = Logger::init(&config.logging).context("initializing logging")?;
        commands::handle_start(config, agents).await?;
        return Ok(ExitCode::SUCCESS);
    }

    // Client commands talk to a running daemon over the control API.
    let client = ApiClient::new(cli.api_url.clone(), cli.api_key.clone());
    let result = match &cli.command {
        Commands::Start { .. } => unreachable!("start handled above"),
        Commands::Stop => commands::handle_stop(&client, cli.json).await,
        Commands::Status => commands::handle_status(&client, cli.json).await,
        Commands::Agent { command } => match command {
            AgentCommands::Add => commands::handle_agent_add(&client, cli.json).await,
            AgentCommands::Stop { id } => {
                commands::handle_agent_stop(&client, id, cli.json).await
            }
        },
        Commands::Cost => commands::handle_cost(&client, cli.json).await,
        Commands::Replay { since } => commands::handle_replay(&client, *since, cli.json).await,
    };

    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(error) => {
            eprintln!("error: {error}");
            Ok(ExitCode::from(exit_code_for(&error)))
        }
    }
}
