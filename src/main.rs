mod auth;
mod cli;
mod columns;
mod config;
mod correlation;
mod cost;
mod error;
mod flatten;
mod model;
mod naming;
mod output;
mod perf;
mod prefs;
mod report;
mod snapshot;
mod sources;
mod status;
mod streaks;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    output::print_banner();

    let cli = Cli::parse();
    info!("Starting cipulse - CI Build Health Dashboard");
    cli.execute().await?;

    Ok(())
}
