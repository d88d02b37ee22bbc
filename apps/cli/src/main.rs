//! AssemblyBuilder CLI: build CAD assemblies from part-code lists.
//!
//! Resolves each code in the document vault, makes sure the local copy is the
//! latest revision, and inserts it into an assembly in the CAD host.

mod catalog;
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
