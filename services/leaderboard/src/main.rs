use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use moltrank_core::{clear_ready, init_metrics, init_tracing, load_config, start_health_server};
use moltrank_leaderboard::{refresh_loop, routes, BoardCache, ErrorResponse, LeaderboardEngine, LeaderboardResponse, ReputationResponse};
use serde::Serialize;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "moltrank", version, about = "MoltRank staker leaderboard")]
struct Cli {
    /// YAML/TOML config file; `MOLTRANK_*` environment variables override it.
    #[arg(long, global = true, env = "MOLTRANK_CONFIG_FILE")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute the leaderboard once and print it as JSON.
    Leaderboard,
    /// Print the reputation of one address as JSON.
    Lookup { address: String },
    /// Recompute periodically behind the health/metrics server.
    Serve,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let cfg = load_config("moltrank", cli.config)?;
    init_tracing(&cfg.service_name, &cfg.log_level)?;
    let engine = LeaderboardEngine::from_config(&cfg)?;

    match cli.command {
        Command::Leaderboard => match engine.compute_leaderboard().await {
            Ok(board) => print_json(&LeaderboardResponse::from(&board)),
            Err(e) => {
                error!(error = %e, "leaderboard failed");
                print_json(&ErrorResponse::new("Failed to fetch leaderboard"))?;
                Ok(ExitCode::FAILURE)
            }
        },
        Command::Lookup { address } => match engine.compute_reputation(&address).await {
            Ok(standing) => print_json(&ReputationResponse::from(&standing)),
            Err(e) => {
                print_json(&ErrorResponse::new(e.to_string()))?;
                Ok(ExitCode::FAILURE)
            }
        },
        Command::Serve => {
            init_metrics()?;
            let cache = Arc::new(BoardCache::new());
            start_health_server(cfg.health_port, routes(cache.clone())).await?;
            let interval = Duration::from_secs(cfg.refresh_interval_secs.max(1));
            tokio::select! {
                _ = refresh_loop(&engine, &cache, interval) => {}
                res = signal::ctrl_c() => { res?; }
            }
            clear_ready();
            info!("shutdown");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(ExitCode::SUCCESS)
}
