//! `punchout`: capability probe and simulated playback sessions for the punch-out player.
//!
//! ## Commands
//! - `probe`: evaluate the platform capability predicates and print the verdicts as JSON.
//! - `simulate`: play a synthetic session against the in-process engine and print every
//!   notification as a JSON line.
//!
//! Logs go to stderr so stdout stays machine-readable.

mod cli;
mod probe;
mod simulate;

use anyhow::Result;
use clap::Parser;
use punchout_player::PlayerConfig;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,punchout_player=info")
        }))
        .init();

    let mut config = match &args.config {
        Some(path) => PlayerConfig::load(path)?,
        None => PlayerConfig::default(),
    };
    if let Some(ms) = args.position_update_ms {
        config.position_update_ms = ms;
    }
    if let Some(dir) = &args.diagnostics_dir {
        config.diagnostics_dir = Some(dir.clone());
    }
    config.validate()?;

    match &args.cmd {
        cli::Command::Probe(probe) => probe::run(probe),
        cli::Command::Simulate(sim) => simulate::run(sim, config),
    }
}
