//! `modman order` command implementation

use colored::Colorize;
use modman_kernel::DescriptorReader;
use modman_runtime::bootstrap::load_order;
use modman_runtime::host::PackageReader;
use std::path::Path;

pub fn run(modules: &Path) -> anyhow::Result<()> {
    if !modules.is_dir() {
        anyhow::bail!("{} is not a directory", modules.display());
    }

    let reader = PackageReader;
    let mut packages = Vec::new();
    for package in reader.package_files(modules) {
        match reader.read_descriptor(&package) {
            Ok(descriptor) => packages.push((package, descriptor)),
            Err(e) => eprintln!("{} {}: {e}", "skipped".yellow(), package.display()),
        }
    }

    for (index, (package, descriptor)) in load_order(packages).iter().enumerate() {
        let file = package
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        println!(
            "{:>3}. {} {}",
            index + 1,
            descriptor.name.green(),
            format!("({file})").dimmed()
        );
    }
    Ok(())
}
