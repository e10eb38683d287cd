//! `modman run` command implementation

use crate::output::ColouredSender;
use colored::Colorize;
use modman_runtime::Bootstrap;
use modman_runtime::host::{ClassicFlavor, ProviderFlavor, TeardownFlavor};
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::warn;

const EXIT_COMMANDS: [&str; 3] = ["exit", "quit", "stop"];

pub fn run(
    data: &Path,
    modules: &Path,
    provider: bool,
    no_initial_load: bool,
) -> anyhow::Result<()> {
    let rt = Runtime::new()?;
    if provider {
        serve(&rt, ProviderFlavor, data, modules, no_initial_load)
    } else {
        serve(&rt, ClassicFlavor, data, modules, no_initial_load)
    }
}

fn serve<F: TeardownFlavor>(
    rt: &Runtime,
    flavor: F,
    data: &Path,
    modules: &Path,
    no_initial_load: bool,
) -> anyhow::Result<()> {
    let mut bootstrap = Bootstrap::new(data, modules).runtime_handle(rt.handle().clone());
    if no_initial_load {
        bootstrap = bootstrap.skip_initial_load();
    }
    let runtime = bootstrap.start(flavor)?;
    let sender = Arc::new(ColouredSender::new(runtime.catalog().clone()));

    println!(
        "{} {}",
        "modman".green().bold(),
        format!("watching {}, type help or exit", modules.display()).dimmed()
    );

    // Commands run on the synchronous context; this thread only reads input.
    for line in std::io::stdin().lock().lines() {
        let line = line?.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if EXIT_COMMANDS.contains(&line.to_lowercase().as_str()) {
            break;
        }
        let console = runtime.console().clone();
        let sender = sender.clone();
        if runtime
            .run_on_sync(move || console.execute(sender.as_ref(), &line))
            .is_none()
        {
            warn!("Synchronous context stopped, exiting");
            break;
        }
    }

    runtime.shutdown();
    Ok(())
}
