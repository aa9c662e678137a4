//! Operator CLI.
//!
//! `orchestrator {start|stop|status|agent add|agent stop|cost|replay}`.
//! Exit codes: 0 success, 1 generic error, 2 misuse (clap's default),
//! 3 budget-denied.

use clap::{Parser, Subcommand};

pub mod client;
pub mod commands;

pub use client::{ApiClient, CliError};

/// Autonomous multi-agent orchestrator.
#[derive(Debug, Parser)]
#[command(name = "orchestrator", version, about)]
pub struct Cli {
    /// Emit machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    /// Control API base URL for client commands
    #[arg(long, global = true, env = "ORCH_API_URL", default_value = "http://127.0.0.1:7430")]
    pub api_url: String,

    /// Bearer key for the control API
    #[arg(long, global = true, env = "ORCH_API_KEY", default_value = "")]
    pub api_key: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the orchestrator daemon in the foreground
    Start {
        /// Configuration file (defaults to .orchestrator/config.yaml merging)
        #[arg(long)]
        config: Option<String>,
        /// Agents to add on startup
        #[arg(long, default_value_t = 0)]
        agents: u32,
    },
    /// Ask a running daemon to shut down
    Stop,
    /// Show agents, queue depth, and event-stream position
    Status,
    /// Agent management
    Agent {
        #[command(subcommand)]
        command: AgentCommands,
    },
    /// Show current cost windows and budgets
    Cost,
    /// Replay retained events
    Replay {
        /// Replay events with sequence greater than this
        #[arg(long)]
        since: u64,
    },
}

#[derive(Debug, Subcommand)]
pub enum AgentCommands {
    /// Add a worker agent
    Add,
    /// Stop a worker agent
    Stop {
        /// Agent id, e.g. agent-2
        id: String,
    },
}

/// Exit code for a failed client command.
pub fn exit_code_for(error: &CliError) -> u8 {
    match error {
        CliError::Budget(_) => 3,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_structure_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_replay_since() {
        let cli = Cli::parse_from(["orchestrator", "replay", "--since", "10"]);
        match cli.command {
            Commands::Replay { since } => assert_eq!(since, 10),
            _ => panic!("expected replay"),
        }
    }

    #[test]
    fn test_parse_agent_subcommands() {
        let cli = Cli::parse_from(["orchestrator", "agent", "stop", "agent-2"]);
        match cli.command {
            Commands::Agent { command: AgentCommands::Stop { id } } => assert_eq!(id, "agent-2"),
            _ => panic!("expected agent stop"),
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code_for(&CliError::Budget("daily".into())), 3);
        assert_eq!(
            exit_code_for(&CliError::Api { status: 404, message: "missing".into() }),
            1
        );
    }
}
