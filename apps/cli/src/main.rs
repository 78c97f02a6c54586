//! facetharvest CLI: resumable, faceted harvesting of job postings.
//!
//! Splits one broad search into facet shards small enough to stay under the
//! provider's per-query cap, extracts each shard, and merges the results into
//! a deduplicated, checkpointed record set.

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
