//! CLI entry point for tomo-sim
//!
//! Runs one experiment against the simulated tomograph with in-process
//! storage, and reports the terminal event.
//!
//! # Usage
//!
//! ```bash
//! tomo-sim run params.json --config tomo.toml
//! tomo-sim validate params.json
//! tomo-sim show-config
//! ```

#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tomo_sim::prelude::*;
use tomo_sim::{init_tracing, Simulator};
use tracing::info;

#[derive(Parser)]
#[command(name = "tomo-sim")]
#[command(about = "Simulated tomograph experiment runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an experiment to completion
    Run {
        /// Path to the JSON parameter document
        params: PathBuf,

        /// Optional TOML config file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Check a parameter document without touching the device
    Validate {
        /// Path to the JSON parameter document
        params: PathBuf,
    },

    /// Print the effective configuration
    ShowConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { params, config } => run_experiment(&params, config.as_deref()).await,
        Commands::Validate { params } => validate_params(&params),
        Commands::ShowConfig { config } => show_config(config.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> Result<TomographConfig> {
    let config = TomographConfig::load_from(path).context("Failed to load configuration")?;
    config.validate()?;
    Ok(config)
}

fn read_params(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read parameters from {}", path.display()))
}

async fn run_experiment(params: &Path, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    init_tracing(&config.log_level);

    let body = read_params(params)?;
    let sim = Simulator::new(&config);
    let run = sim.service.start_experiment(&body).await?;
    info!(run_id = %run.run_id, "Waiting for experiment to finish");

    let event = run.handle.await.context("Experiment task failed")?;
    println!("{}", serde_json::to_string_pretty(&event.to_json())?);
    println!("Frames stored: {}", sim.storage.frame_count());

    match event.kind {
        TerminalKind::Success => Ok(()),
        TerminalKind::EmergencyStop => anyhow::bail!(
            "{}: {}",
            event.error.unwrap_or_default(),
            event.detail.unwrap_or_default()
        ),
    }
}

fn validate_params(params: &Path) -> Result<()> {
    let body = read_params(params)?;
    let parsed = ExperimentParams::from_json(&body)?;
    println!(
        "{}: valid, {} frames",
        parsed.exp_id,
        parsed.total_frames()
    );
    Ok(())
}

fn show_config(config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    print!("{}", config.to_toml()?);
    Ok(())
}
