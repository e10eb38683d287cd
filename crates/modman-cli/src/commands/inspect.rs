//! `modman inspect` command implementation

use anyhow::Context;
use colored::Colorize;
use modman_kernel::DescriptorReader;
use modman_runtime::host::{PackageReader, entry_key};
use std::path::Path;

pub fn run(package: &Path) -> anyhow::Result<()> {
    let reader = PackageReader;
    let descriptor = reader
        .read_descriptor(package)
        .with_context(|| format!("could not read {}", package.display()))?;
    let entries = reader.entries(package)?;

    println!("{} {}", descriptor.name.bold().green(), format!("v{}", descriptor.version).white());
    if let Some(description) = &descriptor.description {
        println!("  {description}");
    }
    print_field("Entry", entry_key(&descriptor));
    if let Some(library) = &descriptor.library {
        print_field("Library", library);
    }
    if !descriptor.authors.is_empty() {
        print_field("Authors", &descriptor.authors.join(", "));
    }
    if !descriptor.depend.is_empty() {
        print_field("Depends", &descriptor.depend.join(", "));
    }
    if !descriptor.soft_depend.is_empty() {
        print_field("Soft depends", &descriptor.soft_depend.join(", "));
    }

    println!();
    println!("{} ({})", "Entries".bold(), entries.len());
    for entry in entries {
        println!("  {entry}");
    }
    Ok(())
}

fn print_field(label: &str, value: &str) {
    println!("  {} {value}", format!("{label}:").cyan());
}
