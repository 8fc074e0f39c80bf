//! Command-line interface definitions.
//!
//! Defines all CLI arguments and subcommands using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// kiln front-end asset pipeline CLI
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Project root directory (default: current directory)
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Config file name, relative to root (default: kiln.toml)
    #[arg(short = 'C', long, default_value = "kiln.toml")]
    pub config: PathBuf,

    /// subcommands (default: dev)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Build into the development output, then serve it with live reload
    Dev {
        /// Interface to bind on
        #[arg(short, long)]
        interface: Option<String>,

        /// The port you should provide
        #[arg(short, long)]
        port: Option<u16>,

        /// open the start page in the default browser
        #[arg(short, long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
        open: Option<bool>,

        /// enable watch
        #[arg(short, long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
        watch: Option<bool>,
    },

    /// Deletes the distribution directory and rebuilds it with minified, compressed output
    Build {
        /// keep watching the source tree after the build
        #[arg(short, long)]
        watch: bool,
    },
}

impl Cli {
    /// The selected command, falling back to `dev` when none was given.
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Dev {
            interface: None,
            port: None,
            open: None,
            watch: None,
        })
    }
}
