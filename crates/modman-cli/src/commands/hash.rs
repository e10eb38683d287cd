//! `modman hash` command implementation

use anyhow::Context;
use std::path::Path;

pub fn run(file: &Path) -> anyhow::Result<()> {
    let hash = modman_reload::calculate_hash(file)
        .with_context(|| format!("could not hash {}", file.display()))?;
    println!("{hash}  {}", file.display());
    Ok(())
}
