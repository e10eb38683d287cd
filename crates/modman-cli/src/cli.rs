//! CLI command definitions using clap

use clap::builder::FalseyValueParser;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Modman - load, unload and reload modules at runtime
#[derive(Parser)]
#[command(name = "modman")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable coloured output
    #[arg(long, global = true, env = "NO_COLOR", value_parser = FalseyValueParser::new())]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a host and read operator commands from stdin
    Run {
        /// Folder holding config.yml, messages.yml and dumps
        #[arg(short, long, default_value = "modman")]
        data: PathBuf,

        /// Folder holding the module packages
        #[arg(short, long, default_value = "modules")]
        modules: PathBuf,

        /// Run the provider-flavoured host
        #[arg(long)]
        provider: bool,

        /// Do not load the packages present at start-up
        #[arg(long)]
        no_initial_load: bool,
    },

    /// Show the descriptor and entries of a package
    Inspect {
        /// Package file
        package: PathBuf,
    },

    /// Print the SHA-256 of a file, as tracked by the auto features
    Hash {
        /// File to hash
        file: PathBuf,
    },

    /// Print the order the packages in a folder would load in
    Order {
        /// Folder holding the module packages
        #[arg(default_value = "modules")]
        modules: PathBuf,
    },
}
