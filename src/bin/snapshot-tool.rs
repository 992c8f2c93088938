//! Snapshot inspection tool
//!
//! Usage:
//!   snapshot-tool inspect --file lobbies.json
//!   snapshot-tool inspect --file lobbies.json --json
//!   snapshot-tool validate --file lobbies.json --capacity 8

use std::path::PathBuf;

use anteroom::config::AppConfig;
use anteroom::snapshot::{FileSnapshotStorage, Snapshot, SnapshotStorage};
use anteroom::utils::{current_timestamp, minutes_between};
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "snapshot-tool")]
#[command(about = "Inspect and validate anteroom lobby snapshots")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print per-partition lobby counts and lobby details
    Inspect {
        #[arg(short, long)]
        file: PathBuf,
        /// Pretty-print the raw snapshot instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Check every lobby invariant; exits non-zero on the first violation
    Validate {
        #[arg(short, long)]
        file: PathBuf,
        /// Lobby capacity; defaults to the value from --config or 8
        #[arg(long)]
        capacity: Option<usize>,
        /// Service configuration to read the capacity from
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

async fn load(file: &PathBuf) -> Result<Snapshot> {
    FileSnapshotStorage::new(file.clone())
        .load()
        .await?
        .ok_or_else(|| anyhow!("No snapshot at {}", file.display()))
}

fn print_summary(snapshot: &Snapshot) {
    let now = current_timestamp();
    println!(
        "{} partitions, {} lobbies",
        snapshot.partitions().len(),
        snapshot.lobby_count()
    );

    for (partition, lobbies) in snapshot.partitions() {
        let participants: usize = lobbies.values().map(|l| l.size()).sum();
        println!(
            "\n{} ({} lobbies, {} participants)",
            partition,
            lobbies.len(),
            participants
        );
        for lobby in lobbies.values() {
            println!(
                "  {:<24} {:<4} min {:<10} size {:<2} age {:>4}m idle {:>4}m",
                lobby.host(),
                lobby.region(),
                lobby.min_tier(),
                lobby.size(),
                minutes_between(lobby.created_at(), now),
                minutes_between(lobby.last_activity_at(), now),
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    match Cli::parse().command {
        Commands::Inspect { file, json } => {
            let snapshot = load(&file).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_summary(&snapshot);
            }
        }
        Commands::Validate {
            file,
            capacity,
            config,
        } => {
            let capacity = match (capacity, config) {
                (Some(capacity), _) => capacity,
                (None, Some(path)) => AppConfig::from_file(path)?.lobby.capacity,
                (None, None) => AppConfig::default().lobby.capacity,
            };

            let snapshot = load(&file).await?;
            snapshot
                .validate(capacity)
                .map_err(|e| anyhow!("{} is invalid: {}", file.display(), e))?;
            println!(
                "{} is valid: {} lobbies in {} partitions (capacity {})",
                file.display(),
                snapshot.lobby_count(),
                snapshot.partitions().len(),
                capacity
            );
        }
    }

    Ok(())
}
