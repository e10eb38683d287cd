//! Module, command and descriptor views.
//!
//! A host hands the reload engine read-only views of its loaded modules and
//! registered commands. Identity is carried by opaque handles so the engine
//! never needs to know the host's concrete types.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::DescriptorError;

/// Opaque identity of a loaded module instance.
///
/// Handles are never reused within a host's lifetime, so a handle kept after
/// unload can never alias a freshly loaded module of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleHandle(u64);

impl ModuleHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module#{}", self.0)
    }
}

/// Opaque identity of the code-loading context a module was loaded through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LoadContextId(u64);

impl LoadContextId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LoadContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context#{}", self.0)
    }
}

/// A loaded module as seen by the manager.
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn is_enabled(&self) -> bool;

    fn authors(&self) -> &[String];

    /// Hard dependencies declared by the descriptor.
    fn depend(&self) -> &[String];

    /// Soft dependencies declared by the descriptor.
    fn soft_depend(&self) -> &[String];

    fn description(&self) -> Option<&str> {
        None
    }

    /// Package file the module was loaded from.
    fn file(&self) -> &Path;

    fn handle(&self) -> ModuleHandle;

    /// Context the module's code was loaded through, if the host uses one.
    fn load_context(&self) -> Option<LoadContextId>;

    /// `name vversion`, as shown in verbose listings.
    fn full_name(&self) -> String {
        format!("{} v{}", self.name(), self.version())
    }
}

/// Who a registered command says it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandOwner {
    /// The command carries a direct reference to its owning module.
    Direct(ModuleHandle),
    /// The command was registered through an indirection and only its
    /// defining context can tell where it came from.
    Unattributed,
}

/// The code-loading context backing a command was already torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("code-loading context {0} is already closed")]
pub struct ContextClosed(pub LoadContextId);

/// A command registered with the host.
pub trait ModuleCommand: Send + Sync {
    /// Label the command answers to, without any namespace prefix.
    fn name(&self) -> &str;

    fn owner(&self) -> CommandOwner;

    /// Context the command's executor was defined in.
    ///
    /// Returns [`ContextClosed`] when the backing context is gone; such a
    /// command fails on every invocation and is considered broken.
    fn defining_context(&self) -> Result<Option<LoadContextId>, ContextClosed>;
}

/// Metadata stored inside a module package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModuleDescriptor {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Entry point the host resolves to module code.
    #[serde(default)]
    pub main: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depend: Vec<String>,
    #[serde(default, alias = "softdepend", skip_serializing_if = "Vec::is_empty")]
    pub soft_depend: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Package-relative path of a native library holding the entry point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<String>,
}

fn default_version() -> String {
    "0.0.0".to_string()
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            main: None,
            author: None,
            authors: Vec::new(),
            depend: Vec::new(),
            soft_depend: Vec::new(),
            description: None,
            library: None,
        }
    }

    /// Parse and validate a YAML descriptor.
    pub fn from_yaml(content: &str) -> Result<Self, DescriptorError> {
        let mut descriptor: Self = serde_yaml::from_str(content)
            .map_err(|e| DescriptorError::Invalid(e.to_string()))?;
        descriptor.name = descriptor.name.trim().to_string();
        descriptor.validate()?;
        if let Some(author) = descriptor.author.take() {
            if !descriptor.authors.contains(&author) {
                descriptor.authors.insert(0, author);
            }
        }
        Ok(descriptor)
    }

    pub fn to_yaml(&self) -> Result<String, DescriptorError> {
        serde_yaml::to_string(self).map_err(|e| DescriptorError::Invalid(e.to_string()))
    }

    fn validate(&self) -> Result<(), DescriptorError> {
        if self.name.is_empty() {
            return Err(DescriptorError::Invalid("module name is empty".to_string()));
        }
        let valid = self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '.' | '-'));
        if !valid {
            return Err(DescriptorError::Invalid(format!(
                "module name '{}' contains invalid characters",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_from_yaml() {
        let yaml = r#"
name: Alpha
version: 1.2.0
main: alpha::Entry
author: ann
authors: [bob]
depend: [Core]
softdepend: [Extras]
"#;
        let descriptor = ModuleDescriptor::from_yaml(yaml).unwrap();
        assert_eq!(descriptor.name, "Alpha");
        assert_eq!(descriptor.version, "1.2.0");
        assert_eq!(descriptor.main.as_deref(), Some("alpha::Entry"));
        assert_eq!(descriptor.authors, vec!["ann".to_string(), "bob".to_string()]);
        assert_eq!(descriptor.depend, vec!["Core".to_string()]);
        assert_eq!(descriptor.soft_depend, vec!["Extras".to_string()]);
    }

    #[test]
    fn test_descriptor_defaults_version() {
        let descriptor = ModuleDescriptor::from_yaml("name: Beta").unwrap();
        assert_eq!(descriptor.version, "0.0.0");
        assert!(descriptor.authors.is_empty());
    }

    #[test]
    fn test_descriptor_rejects_bad_names() {
        assert!(ModuleDescriptor::from_yaml("name: ''").is_err());
        assert!(ModuleDescriptor::from_yaml("name: 'bad/name'").is_err());
        assert!(ModuleDescriptor::from_yaml("version: 1.0").is_err());
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(ModuleHandle::new(7).to_string(), "module#7");
        assert_eq!(LoadContextId::new(3).to_string(), "context#3");
    }
}
