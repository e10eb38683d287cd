//! Code-loading contexts.
//!
//! Every loaded module gets its own [`LoadContext`]. A native module's
//! shared library is extracted into the context's scratch directory and
//! owned by the context; closing it unloads the library and deletes the
//! directory. Commands check the closed flag before running.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use libloading::Library;
use modman_kernel::{HostError, LoadContextId};
use parking_lot::Mutex;
use tempfile::TempDir;
use tracing::debug;

pub struct LoadContext {
    id: LoadContextId,
    module: String,
    closed: AtomicBool,
    library: Mutex<Option<Library>>,
    scratch: Mutex<Option<TempDir>>,
}

impl LoadContext {
    pub fn new(id: LoadContextId, module: impl Into<String>) -> Self {
        Self {
            id,
            module: module.into(),
            closed: AtomicBool::new(false),
            library: Mutex::new(None),
            scratch: Mutex::new(None),
        }
    }

    pub fn id(&self) -> LoadContextId {
        self.id
    }

    pub fn module_name(&self) -> &str {
        &self.module
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Scratch directory for extracted files, created on first use.
    pub fn scratch_dir(&self) -> Result<PathBuf, HostError> {
        if self.is_closed() {
            return Err(HostError::ContextClosed(self.id.to_string()));
        }
        let mut scratch = self.scratch.lock();
        if let Some(dir) = scratch.as_ref() {
            return Ok(dir.path().to_path_buf());
        }
        let dir = tempfile::Builder::new()
            .prefix("modman-")
            .tempdir()
            .map_err(|e| HostError::Io(e.to_string()))?;
        let path = dir.path().to_path_buf();
        *scratch = Some(dir);
        Ok(path)
    }

    /// Hand ownership of a loaded library to this context.
    pub fn attach_library(&self, library: Library) {
        *self.library.lock() = Some(library);
    }

    pub fn has_library(&self) -> bool {
        self.library.lock().is_some()
    }

    /// Mark the context closed, unload its library and remove its scratch
    /// directory. Closing twice is a no-op.
    ///
    /// Every object created from the library must be dropped first.
    pub fn close(&self) -> Result<(), HostError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(library) = self.library.lock().take() {
            library
                .close()
                .map_err(|e| HostError::ContextClose(e.to_string()))?;
        }
        if let Some(dir) = self.scratch.lock().take() {
            dir.close()
                .map_err(|e| HostError::ContextClose(e.to_string()))?;
        }
        debug!("Closed {} of {}", self.id, self.module);
        Ok(())
    }
}

impl std::fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadContext")
            .field("id", &self.id)
            .field("module", &self.module)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_removes_scratch_dir() {
        let context = LoadContext::new(LoadContextId::new(1), "Alpha");
        let dir = context.scratch_dir().unwrap();
        assert!(dir.exists());
        assert_eq!(context.scratch_dir().unwrap(), dir);

        context.close().unwrap();
        assert!(context.is_closed());
        assert!(!dir.exists());
        assert!(context.close().is_ok());
    }

    #[test]
    fn test_closed_context_refuses_scratch() {
        let context = LoadContext::new(LoadContextId::new(2), "Beta");
        context.close().unwrap();
        assert!(matches!(
            context.scratch_dir(),
            Err(HostError::ContextClosed(_))
        ));
        assert!(!context.has_library());
    }
}
