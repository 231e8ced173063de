//! # Mediaq - Pausable Media Conversion Queue
//!
//! A CLI for converting media files to .mp4 through a durable, priority-based
//! processing queue.
//!
//! ## Features
//!
//! - **Durable Queue**: items survive restarts; state lives in one JSON document
//! - **Atomic Claiming**: race condition-free reservation keeps each item on one worker
//! - **Priority Scheduling**: higher priority first, oldest first within a band
//! - **Pause/Resume**: cooperative suspension with no polling
//! - **Live Progress**: per-item progress bars driven by FFmpeg's progress stream
//! - **Signal Handling**: graceful shutdown on SIGINT/SIGTERM
//!
//! ## Usage
//!
//! ```bash
//! # Enqueue files or whole directories
//! mediaq add /path/to/media --priority 5
//!
//! # Process the queue
//! mediaq run
//!
//! # Inspect queue state
//! mediaq status
//!
//! # Drop finished items
//! mediaq clear
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use mediaq::commands::{
    add::AddCommand, clear::ClearCommand, remove::RemoveCommand, run::RunCommand,
    status::StatusCommand,
};
use mediaq::config::Config;

/// Mediaq - a pausable, persistent media conversion queue
#[derive(Parser)]
#[command(
    name = "mediaq",
    about = "A pausable, persistent media conversion queue",
    long_about = "Converts media files to .mp4 through a durable, priority-based queue with atomic item claiming and live progress.",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Enqueue media files or directories for conversion
    Add {
        /// Files or directories to enqueue
        paths: Vec<PathBuf>,
        /// Priority of the new items (higher runs sooner)
        #[arg(long, short = 'p', default_value_t = 0)]
        priority: i32,
        /// Directory converted files are written to (defaults beside the source)
        #[arg(long, short = 'o')]
        output_dir: Option<PathBuf>,
        /// Path of the queue data file
        #[arg(long, short = 'd')]
        data_file: Option<PathBuf>,
    },
    /// Process queued items until interrupted
    Run {
        /// Path of the queue data file
        #[arg(long, short = 'd')]
        data_file: Option<PathBuf>,
    },
    /// Show the current queue contents
    Status {
        /// Path of the queue data file
        #[arg(long, short = 'd')]
        data_file: Option<PathBuf>,
    },
    /// Delete one item from the queue
    Remove {
        /// Identifier of the item to delete
        id: Uuid,
        /// Path of the queue data file
        #[arg(long, short = 'd')]
        data_file: Option<PathBuf>,
    },
    /// Remove all finished items from the queue
    Clear {
        /// Path of the queue data file
        #[arg(long, short = 'd')]
        data_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediaq=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();

    let result = match cli.command {
        Commands::Add {
            paths,
            priority,
            output_dir,
            data_file,
        } => {
            let data_file = data_file.unwrap_or(config.data_file);
            info!(
                "Adding {} path(s) with priority {} to {:?}",
                paths.len(),
                priority,
                data_file
            );
            AddCommand::new(paths, priority, output_dir, data_file)
                .execute()
                .await
        }
        Commands::Run { data_file } => {
            if let Some(data_file) = data_file {
                config.data_file = data_file;
            }
            info!("Starting worker with data file: {:?}", config.data_file);
            RunCommand::new(config).execute().await
        }
        Commands::Status { data_file } => {
            let data_file = data_file.unwrap_or(config.data_file);
            StatusCommand::new(data_file).execute().await
        }
        Commands::Remove { id, data_file } => {
            let data_file = data_file.unwrap_or(config.data_file);
            RemoveCommand::new(id, data_file).execute().await
        }
        Commands::Clear { data_file } => {
            let data_file = data_file.unwrap_or(config.data_file);
            ClearCommand::new(data_file).execute().await
        }
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
