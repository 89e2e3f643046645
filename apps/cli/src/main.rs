//! Leadflow CLI: daily trigger-based lead discovery.
//!
//! Plans the day's rotation, runs the search-to-draft pipeline, and reports
//! stored runs and leads.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}