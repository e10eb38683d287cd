//! Module packages: zip archives carrying a `module.yml` descriptor.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use modman_kernel::{DescriptorError, DescriptorReader, ModuleDescriptor};
use zip::ZipArchive;
use zip::result::ZipError;

pub const PACKAGE_EXTENSION: &str = "modpkg";

pub const DESCRIPTOR_ENTRY: &str = "module.yml";

#[derive(Debug, Clone, Copy, Default)]
pub struct PackageReader;

impl PackageReader {
    fn open(package: &Path) -> Result<ZipArchive<File>, DescriptorError> {
        let file = File::open(package)?;
        ZipArchive::new(file).map_err(|e| archive_error(package, e))
    }

    /// Names of every entry in the archive.
    pub fn entries(&self, package: &Path) -> Result<Vec<String>, DescriptorError> {
        let archive = Self::open(package)?;
        Ok(archive.file_names().map(str::to_string).collect())
    }

    /// Extract one entry into `dest_dir`, keeping only its file name.
    pub fn extract(
        &self,
        package: &Path,
        entry: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, DescriptorError> {
        let mut archive = Self::open(package)?;
        let mut file = archive.by_name(entry).map_err(|e| match e {
            ZipError::FileNotFound => DescriptorError::Missing(format!(
                "{} has no entry {entry}",
                package.display()
            )),
            other => archive_error(package, other),
        })?;
        let file_name = file
            .enclosed_name()
            .and_then(|p| p.file_name().map(|n| n.to_os_string()))
            .ok_or_else(|| DescriptorError::Invalid(format!("unsafe entry name {entry}")))?;
        let target = dest_dir.join(file_name);
        let mut out = File::create(&target)?;
        std::io::copy(&mut file, &mut out)?;
        Ok(target)
    }
}

fn archive_error(package: &Path, error: ZipError) -> DescriptorError {
    match error {
        ZipError::Io(e) => DescriptorError::Io(e),
        other => DescriptorError::Archive(format!("{}: {other}", package.display())),
    }
}

impl DescriptorReader for PackageReader {
    fn package_extension(&self) -> &str {
        PACKAGE_EXTENSION
    }

    fn read_descriptor(&self, package: &Path) -> Result<ModuleDescriptor, DescriptorError> {
        let mut archive = Self::open(package)?;
        let mut entry = archive.by_name(DESCRIPTOR_ENTRY).map_err(|e| match e {
            ZipError::FileNotFound => DescriptorError::Missing(format!(
                "{} has no {DESCRIPTOR_ENTRY}",
                package.display()
            )),
            other => archive_error(package, other),
        })?;
        let mut content = String::new();
        entry.read_to_string(&mut content)?;
        ModuleDescriptor::from_yaml(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::PackageBuilder;
    use tempfile::TempDir;

    #[test]
    fn test_read_descriptor() {
        let dir = TempDir::new().unwrap();
        let path = PackageBuilder::new("Alpha", "1.2")
            .author("ann")
            .depend("Core")
            .write_to(dir.path())
            .unwrap();

        let descriptor = PackageReader.read_descriptor(&path).unwrap();
        assert_eq!(descriptor.name, "Alpha");
        assert_eq!(descriptor.version, "1.2");
        assert_eq!(descriptor.authors, vec!["ann".to_string()]);
        assert_eq!(descriptor.depend, vec!["Core".to_string()]);
        assert!(PackageReader.is_package(&path));
    }

    #[test]
    fn test_broken_archive_is_reported_as_archive_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.modpkg");
        std::fs::write(&path, b"definitely not a zip").unwrap();

        assert!(matches!(
            PackageReader.read_descriptor(&path),
            Err(DescriptorError::Archive(_))
        ));
    }

    #[test]
    fn test_missing_descriptor() {
        let dir = TempDir::new().unwrap();
        let path = PackageBuilder::new("Alpha", "1.0")
            .without_descriptor()
            .file("readme.txt", b"hello")
            .write_to(dir.path())
            .unwrap();

        assert!(matches!(
            PackageReader.read_descriptor(&path),
            Err(DescriptorError::Missing(_))
        ));
    }

    #[test]
    fn test_extract_entry() {
        let dir = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let path = PackageBuilder::new("Alpha", "1.0")
            .file("lib/libalpha.so", b"\x7fELF")
            .write_to(dir.path())
            .unwrap();

        let extracted = PackageReader
            .extract(&path, "lib/libalpha.so", out.path())
            .unwrap();
        assert_eq!(extracted, out.path().join("libalpha.so"));
        assert_eq!(std::fs::read(extracted).unwrap(), b"\x7fELF");
        assert!(PackageReader.entries(&path).unwrap().contains(&"module.yml".to_string()));
    }
}
