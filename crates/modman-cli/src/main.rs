//! Modman CLI - run an embedded module host and inspect module packages

mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    modman_runtime::init_tracing(cli.verbose);
    if cli.no_color {
        colored::control::set_override(false);
    }

    match cli.command {
        Commands::Run {
            data,
            modules,
            provider,
            no_initial_load,
        } => commands::run::run(&data, &modules, provider, no_initial_load),
        Commands::Inspect { package } => commands::inspect::run(&package),
        Commands::Hash { file } => commands::hash::run(&file),
        Commands::Order { modules } => commands::order::run(&modules),
    }
}
