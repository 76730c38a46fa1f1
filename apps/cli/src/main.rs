//! Storyboard CLI: build a screenplay scene by scene with an LLM.
//!
//! Scenes are kept in a local key-value database between invocations; the
//! `generate` command walks them in order and writes the screenplay to disk.

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
