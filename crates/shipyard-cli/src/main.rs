//! Shipyard CLI tool.

use clap::{Parser, Subcommand};
use shipyard_core::pipeline::Decision;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "shipyard")]
#[command(about = "Shipyard delivery pipeline CLI", long_about = None)]
struct Cli {
    /// API server URL
    #[arg(long, env = "SHIPYARD_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a stack configuration
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "shipyard.kdl")]
        path: String,
    },
    /// Run the pipeline locally with Docker and the current kubeconfig
    Run {
        /// Path to the configuration file
        #[arg(default_value = "shipyard.kdl")]
        path: String,
        /// Branch to build (defaults to the tracked branch)
        #[arg(long)]
        branch: Option<String>,
        /// Exact revision to build
        #[arg(long)]
        revision: Option<String>,
        /// Approve the deployment without asking
        #[arg(long)]
        auto_approve: bool,
    },
    /// Start a run on the server
    Trigger {
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        revision: Option<String>,
        #[arg(long, env = "USER")]
        actor: Option<String>,
    },
    /// Manage pipeline runs
    Runs {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Approve a run waiting at the gate
    Approve {
        /// Run ID
        id: String,
        #[arg(long, env = "USER")]
        actor: String,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Reject a run waiting at the gate
    Reject {
        /// Run ID
        id: String,
        #[arg(long, env = "USER")]
        actor: String,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Start a new run on the revision of a finished run
    Retry {
        /// Run ID
        id: String,
        #[arg(long, env = "USER")]
        actor: Option<String>,
    },
    /// Show the image repository and the service endpoint
    Outputs,
}

#[derive(Subcommand)]
enum RunCommands {
    /// List recent runs
    List {
        /// Maximum number of runs to show
        #[arg(long, default_value = "10")]
        limit: u32,
    },
    /// Show run details
    Show {
        /// Run ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
        Commands::Run {
            path,
            branch,
            revision,
            auto_approve,
        } => {
            let options = commands::run::LocalRunOptions {
                branch,
                revision,
                auto_approve,
            };
            commands::run::run_local(&path, options).await?;
        }
        Commands::Trigger {
            branch,
            revision,
            actor,
        } => {
            commands::runs::trigger(&cli.api_url, branch, revision, actor).await?;
        }
        Commands::Runs { command } => match command {
            RunCommands::List { limit } => {
                commands::runs::list(&cli.api_url, limit).await?;
            }
            RunCommands::Show { id } => {
                commands::runs::show(&cli.api_url, &id).await?;
            }
        },
        Commands::Approve { id, actor, comment } => {
            commands::runs::decide(&cli.api_url, &id, Decision::Approve, &actor, comment).await?;
        }
        Commands::Reject { id, actor, comment } => {
            commands::runs::decide(&cli.api_url, &id, Decision::Reject, &actor, comment).await?;
        }
        Commands::Retry { id, actor } => {
            commands::runs::retry(&cli.api_url, &id, actor).await?;
        }
        Commands::Outputs => {
            commands::runs::outputs(&cli.api_url).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_approve() {
        let cli = Cli::try_parse_from(["shipyard", "approve", "abc", "--actor", "reviewer"]).unwrap();
        match cli.command {
            Commands::Approve { id, actor, comment } => {
                assert_eq!(id, "abc");
                assert_eq!(actor, "reviewer");
                assert!(comment.is_none());
            }
            _ => panic!("expected approve"),
        }
    }

    #[test]
    fn test_parse_local_run() {
        let cli = Cli::try_parse_from(["shipyard", "run", "stack.kdl", "--auto-approve"]).unwrap();
        match cli.command {
            Commands::Run {
                path, auto_approve, ..
            } => {
                assert_eq!(path, "stack.kdl");
                assert!(auto_approve);
            }
            _ => panic!("expected run"),
        }
    }
}
