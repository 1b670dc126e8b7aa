//! ferry CLI tool.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "ferry")]
#[command(about = "ferry CI CLI", long_about = None)]
struct Cli {
    /// API server URL
    #[arg(long, env = "FERRY_API_URL", default_value = "http://localhost:3000")]
    api_url: url::Url,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a task declaration
    Validate {
        /// Path to the task file
        #[arg(default_value = "task.kdl")]
        path: String,
        /// Repository configuration to apply
        #[arg(long)]
        repo_config: Option<String>,
    },
    /// Submit a manual run
    Submit {
        /// Repository to test (owner/repo)
        #[arg(long)]
        fork: String,
        /// Head SHA or branch
        #[arg(long)]
        head: String,
        /// Base SHA or branch; defaults to the main branch
        #[arg(long)]
        base: Option<String>,
        /// Run every task, not only those touched by the diff
        #[arg(long)]
        all: bool,
        /// Submitting user
        #[arg(long, env = "FERRY_USER")]
        user: String,
    },
    /// Cancel the task a run belongs to
    Cancel {
        /// Run ID
        run_id: String,
    },
    /// Inspect the queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// List queued and running items
    List {
        /// Only items for this repository (owner/repo)
        #[arg(long)]
        repository: Option<String>,
        #[arg(long, default_value = "0")]
        page: i64,
        #[arg(long, default_value = "10")]
        per_page: i64,
    },
    /// Count queued and running items
    Count {
        /// Only items for this repository (owner/repo)
        #[arg(long)]
        repository: Option<String>,
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
    let api = commands::ApiClient::new(cli.api_url);

    match cli.command {
        Commands::Validate { path, repo_config } => {
            commands::validate(&path, repo_config.as_deref())?;
        }
        Commands::Submit {
            fork,
            head,
            base,
            all,
            user,
        } => {
            commands::submit::submit(&api, fork, head, base, all, user).await?;
        }
        Commands::Cancel { run_id } => {
            commands::runs::cancel(&api, &run_id).await?;
        }
        Commands::Queue { command } => match command {
            QueueCommands::List {
                repository,
                page,
                per_page,
            } => {
                commands::queue::list(&api, repository, page, per_page).await?;
            }
            QueueCommands::Count { repository } => {
                commands::queue::count(&api, repository).await?;
            }
        },
    }

    Ok(())
}
