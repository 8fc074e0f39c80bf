//! kiln - a front-end asset pipeline.

mod cache;
mod cli;
mod config;
mod manifest;
mod pipeline;
mod reload;
mod serve;
mod tasks;
mod utils;
mod watch;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use config::ProjectConfig;
use serve::serve;
use tasks::BuildContext;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let ctx: &'static BuildContext = Box::leak(Box::new(load_context(&cli)?));

    match cli.command() {
        Commands::Dev { .. } => {
            pipeline::build(ctx)?;
            serve(ctx)
        }
        Commands::Build { watch: keep_watching } => {
            pipeline::build(ctx)?;
            if keep_watching {
                watch::watch(ctx, None)?;
            }
            Ok(())
        }
    }
}

/// Load, validate and compile the configuration selected by the CLI
fn load_context(cli: &Cli) -> Result<BuildContext> {
    let config = ProjectConfig::load(cli)?;
    config.validate()?;
    Ok(BuildContext::new(config)?)
}
