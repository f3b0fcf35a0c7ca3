mod commands;

use clap::{Parser, Subcommand};
use anyhow::Result;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "arbiter-cli")]
#[command(about = "Arbiter CLI - Inspect harnesses, queue jobs and manage sandbox images", long_about = None)]
struct Cli {
    /// Path to languages.json
    #[arg(long, global = true, default_value = "config/languages.json")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the harness unit a job file would run
    Render {
        /// Job file (language, source_code, test_cases, limits)
        #[arg(short, long)]
        job: String,
    },

    /// Queue a job file and print its job id
    Submit {
        /// Job file (language, source_code, test_cases, limits)
        #[arg(short, long)]
        job: String,

        /// Redis connection URL
        #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
        redis_url: String,

        /// Poll for the result after queueing
        #[arg(short, long, default_value = "false")]
        wait: bool,

        /// Give up waiting after this many seconds
        #[arg(long, default_value = "60")]
        timeout_secs: u64,
    },

    /// Fetch the stored result of a job
    Result {
        /// Job id returned by submit
        #[arg(short, long)]
        id: String,

        /// Redis connection URL
        #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
        redis_url: String,
    },

    /// List configured languages with their images and queues
    ListLangs,

    /// Pull the runtime image of every configured language
    PullImages {
        /// Only this language
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Remove leftover sandbox containers
    Cleanup {
        /// Minimum container age; defaults to the longest wall-clock limit plus a minute
        #[arg(long)]
        older_than_secs: Option<u64>,
    },

    /// Verify the Docker daemon is reachable
    CheckDocker,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Render { job } => {
            commands::render_job(&job)?;
        }
        Commands::Submit { job, redis_url, wait, timeout_secs } => {
            commands::submit_job(&job, &redis_url, wait, Duration::from_secs(timeout_secs)).await?;
        }
        Commands::Result { id, redis_url } => {
            commands::show_result(&id, &redis_url).await?;
        }
        Commands::ListLangs => {
            commands::list_languages(&cli.config)?;
        }
        Commands::PullImages { name } => {
            commands::pull_images(&cli.config, name.as_deref())?;
        }
        Commands::Cleanup { older_than_secs } => {
            commands::cleanup_containers(&cli.config, older_than_secs)?;
        }
        Commands::CheckDocker => {
            commands::check_docker()?;
        }
    }

    Ok(())
}
