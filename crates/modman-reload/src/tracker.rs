//! Package file tracking.
//!
//! Every package in the module directory that the manager knows about has a
//! SHA-256 hash and, when its descriptor could be read, an owning module
//! name. The auto features diff the directory against this state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use modman_kernel::{DescriptorError, DescriptorReader, ModuleLogger};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::debug;

/// SHA-256 of a file's contents as lowercase hex.
pub fn calculate_hash(path: &Path) -> std::io::Result<String> {
    let contents = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&contents)))
}

fn file_name_of(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// State kept for one tracked package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFile {
    pub file_name: String,
    pub hash: String,
    /// Module name from the descriptor; `None` if it could not be read.
    pub owner: Option<String>,
}

/// Hashes and owners of the packages in one directory, keyed by file name.
pub struct FileTracker {
    package_dir: PathBuf,
    reader: Arc<dyn DescriptorReader>,
    logger: Arc<dyn ModuleLogger>,
    files: RwLock<HashMap<String, TrackedFile>>,
}

impl FileTracker {
    pub fn new(
        package_dir: impl Into<PathBuf>,
        reader: Arc<dyn DescriptorReader>,
        logger: Arc<dyn ModuleLogger>,
    ) -> Self {
        Self {
            package_dir: package_dir.into(),
            reader,
            logger,
            files: RwLock::new(HashMap::new()),
        }
    }

    pub fn package_dir(&self) -> &Path {
        &self.package_dir
    }

    /// Package files currently in the directory, sorted.
    pub fn package_files(&self) -> Vec<PathBuf> {
        self.reader.package_files(&self.package_dir)
    }

    /// Track every package in the directory. Returns how many were tracked.
    pub fn scan(&self) -> usize {
        let tracked = self
            .package_files()
            .iter()
            .filter(|path| self.track(path).is_some())
            .count();
        debug!("Tracked {} package(s) in {}", tracked, self.package_dir.display());
        tracked
    }

    /// Hash `path` and read its owner.
    ///
    /// If hashing fails nothing is recorded. A descriptor that cannot be
    /// read leaves the owner unknown but the file is still tracked.
    pub fn track(&self, path: &Path) -> Option<TrackedFile> {
        let file_name = file_name_of(path)?;
        let hash = match calculate_hash(path) {
            Ok(hash) => hash,
            Err(e) => {
                self.logger
                    .severe_with_cause(&format!("Could not hash package {file_name}"), &e);
                return None;
            }
        };
        let owner = self.read_owner(path, &file_name);
        let tracked = TrackedFile {
            file_name: file_name.clone(),
            hash,
            owner,
        };
        self.files.write().insert(file_name, tracked.clone());
        Some(tracked)
    }

    fn read_owner(&self, path: &Path, file_name: &str) -> Option<String> {
        match self.reader.read_descriptor(path) {
            Ok(descriptor) => Some(descriptor.name),
            Err(DescriptorError::Archive(_)) => {
                self.logger
                    .info(&format!("Possible broken module detected: {file_name}"));
                None
            }
            Err(e) => {
                self.logger.severe_with_cause(
                    &format!("Could not read the descriptor of {file_name}"),
                    &e,
                );
                None
            }
        }
    }

    /// Forget a file. Hash and owner go together.
    pub fn untrack(&self, file_name: &str) -> Option<TrackedFile> {
        self.files.write().remove(file_name)
    }

    pub fn is_tracked(&self, file_name: &str) -> bool {
        self.files.read().contains_key(file_name)
    }

    pub fn is_path_tracked(&self, path: &Path) -> bool {
        file_name_of(path).is_some_and(|name| self.is_tracked(&name))
    }

    /// Names of every tracked file, sorted.
    pub fn tracked_file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn owner_of(&self, file_name: &str) -> Option<String> {
        self.files
            .read()
            .get(file_name)
            .and_then(|tracked| tracked.owner.clone())
    }

    /// Record `owner` for an already tracked file.
    pub fn record_owner(&self, file_name: &str, owner: &str) -> bool {
        match self.files.write().get_mut(file_name) {
            Some(tracked) => {
                tracked.owner = Some(owner.to_string());
                true
            }
            None => false,
        }
    }

    /// Whether a tracked file's contents differ from the recorded hash.
    ///
    /// Untracked files and files that cannot be hashed count as unchanged.
    pub fn has_changed(&self, path: &Path) -> bool {
        let Some(file_name) = file_name_of(path) else {
            return false;
        };
        let Some(known) = self.files.read().get(&file_name).map(|t| t.hash.clone()) else {
            return false;
        };
        match calculate_hash(path) {
            Ok(current) => !current.eq_ignore_ascii_case(&known),
            Err(e) => {
                self.logger
                    .severe_with_cause(&format!("Could not hash package {file_name}"), &e);
                false
            }
        }
    }

    /// Store the current hash of an already tracked file.
    pub fn update_file_hash(&self, path: &Path) -> bool {
        let Some(file_name) = file_name_of(path) else {
            return false;
        };
        let hash = match calculate_hash(path) {
            Ok(hash) => hash,
            Err(e) => {
                self.logger
                    .severe_with_cause(&format!("Could not hash package {file_name}"), &e);
                return false;
            }
        };
        match self.files.write().get_mut(&file_name) {
            Some(tracked) => {
                tracked.hash = hash;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingLogger, YamlPackages};
    use modman_kernel::LogLevel;
    use std::fs;
    use tempfile::TempDir;

    fn tracker(dir: &TempDir) -> (FileTracker, Arc<RecordingLogger>) {
        let logger = Arc::new(RecordingLogger::default());
        let tracker = FileTracker::new(dir.path(), Arc::new(YamlPackages), logger.clone());
        (tracker, logger)
    }

    #[test]
    fn test_scan_tracks_packages_only() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("alpha.modpkg"), "name: Alpha").unwrap();
        fs::write(dir.path().join("beta.modpkg"), "name: Beta").unwrap();
        fs::write(dir.path().join("notes.txt"), "name: Notes").unwrap();
        fs::create_dir(dir.path().join("nested.modpkg")).unwrap();

        let (tracker, _) = tracker(&dir);
        assert_eq!(tracker.scan(), 2);
        assert_eq!(
            tracker.tracked_file_names(),
            vec!["alpha.modpkg".to_string(), "beta.modpkg".to_string()]
        );
        assert_eq!(tracker.owner_of("alpha.modpkg").as_deref(), Some("Alpha"));
    }

    #[test]
    fn test_broken_package_tracked_without_owner() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.modpkg");
        fs::write(&path, YamlPackages::BROKEN).unwrap();

        let (tracker, logger) = tracker(&dir);
        let tracked = tracker.track(&path).unwrap();
        assert!(tracked.owner.is_none());
        assert!(tracker.is_tracked("broken.modpkg"));
        assert!(logger.contains(LogLevel::Info, "Possible broken module detected"));
    }

    #[test]
    fn test_invalid_descriptor_logs_severe() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.modpkg");
        fs::write(&path, "version: 1.0").unwrap();

        let (tracker, logger) = tracker(&dir);
        assert!(tracker.track(&path).unwrap().owner.is_none());
        assert!(logger.contains(LogLevel::Severe, "bad.modpkg"));
    }

    #[test]
    fn test_missing_file_is_not_tracked() {
        let dir = TempDir::new().unwrap();
        let (tracker, logger) = tracker(&dir);
        assert!(tracker.track(&dir.path().join("ghost.modpkg")).is_none());
        assert!(tracker.is_empty());
        assert!(logger.contains(LogLevel::Severe, "ghost.modpkg"));
    }

    #[test]
    fn test_has_changed_and_update_hash() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alpha.modpkg");
        fs::write(&path, "name: Alpha\nversion: 1.0").unwrap();

        let (tracker, _) = tracker(&dir);
        tracker.track(&path);
        assert!(!tracker.has_changed(&path));

        fs::write(&path, "name: Alpha\nversion: 1.1").unwrap();
        assert!(tracker.has_changed(&path));

        assert!(tracker.update_file_hash(&path));
        assert!(!tracker.has_changed(&path));
    }

    #[test]
    fn test_has_changed_is_false_when_unreadable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alpha.modpkg");
        fs::write(&path, "name: Alpha").unwrap();

        let (tracker, _) = tracker(&dir);
        tracker.track(&path);
        fs::remove_file(&path).unwrap();
        assert!(!tracker.has_changed(&path));
        assert!(!tracker.has_changed(&dir.path().join("untracked.modpkg")));
    }

    #[test]
    fn test_untrack_removes_hash_and_owner() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alpha.modpkg");
        fs::write(&path, "name: Alpha").unwrap();

        let (tracker, _) = tracker(&dir);
        tracker.track(&path);
        let removed = tracker.untrack("alpha.modpkg").unwrap();
        assert_eq!(removed.owner.as_deref(), Some("Alpha"));
        assert!(!tracker.is_tracked("alpha.modpkg"));
        assert!(tracker.owner_of("alpha.modpkg").is_none());
        assert!(!tracker.record_owner("alpha.modpkg", "Alpha"));
    }

    #[test]
    fn test_calculate_hash_is_hex_sha256() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.modpkg");
        fs::write(&path, "").unwrap();
        assert_eq!(
            calculate_hash(&path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
