//! YAML message catalog.
//!
//! Messages live in `messages.yml`, either as flat dotted keys or as nested
//! maps. The file is merged over a built-in catalog holding every key the
//! system emits, so an outdated file never produces blank output.
//! Placeholders are `{0}`, `{1}`... and `&` colour codes are stripped unless
//! the caller asks for the coloured form.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use modman_kernel::MessageFormatter;
use parking_lot::RwLock;
use regex::Regex;
use serde_yaml::Value;
use thiserror::Error;
use tracing::{debug, info};

pub const MESSAGES_FILE: &str = "messages.yml";

/// Key holding the prefix put in front of prefixed messages.
pub const PREFIX_KEY: &str = "prefix";

pub const DEFAULT_MESSAGES: &str = r#"prefix: "&7[&aModman&7] "

help:
  header: "&7-------------------- &aModman &7--------------------"
  format: "&a{0} &7- &f{1}"

list:
  list: "&7Modules (&f{0}&7): {1}"

info:
  header: "&7Module information: &a{0}"
  version: "&a- &7Version: &f{0}"
  authors: "&a- &7Authors: &f{0}"
  status: "&a- &7Status: &f{0}"
  depends: "&a- &7Depends: &f{0}"
  softdepends: "&a- &7Soft depends: &f{0}"

usage:
  usage: "&f{0} &7has the following commands: &a{1}"
  no-commands: "&f{0} &7has no registered commands."

lookup:
  found: "&7Command &f{0} &7is registered by: &a{1}"
  not-found: "&7Command &f{0} &7is not registered by any module."

dump:
  dumped: "&7Module versions written to &f{0}&7."
  error: "&cCould not write the dump file, check the log."

enable:
  enabled: "&f{0} &7has been enabled."
  already-enabled: "&f{0} &7is already enabled."
  failed: "&cCould not enable &f{0}&c, check the log."
  all: "&7All modules have been enabled."
  all-failed: "&cSome modules could not be enabled: &f{0}"

disable:
  disabled: "&f{0} &7has been disabled."
  already-disabled: "&f{0} &7is already disabled."
  failed: "&cCould not disable &f{0}&c, check the log."
  all: "&7All modules have been disabled."
  all-failed: "&cSome modules could not be disabled: &f{0}"

load:
  loaded: "&f{0} &7has been loaded and enabled."
  cannot-find: "&cCould not find a package for &f{0}&c."
  invalid-plugin: "&f{0} &cis not a valid module package."
  already-loaded: "&f{0} &cis already loaded."
  failed: "&cCould not load &f{0}&c, check the log."

unload:
  unloaded: "&f{0} &7has been unloaded."
  failed: "&cCould not unload &f{0}&c, check the log."
  gentle-failed: "&f{0} &crefused to be unloaded."
  incomplete: "&f{0} &cwas only partly unloaded, a restart may be needed."

reload:
  reloaded: "&f{0} &7has been reloaded."
  all: "&7All modules have been reloaded."
  all-failed: "&cSome modules could not be reloaded: &f{0}"

restart:
  restarted: "&f{0} &7has been restarted."
  all: "&7All modules have been restarted."

error:
  invalid-module: "&cNo module goes by that name."
  specify-module: "&cPlease specify a module."
  specify-command: "&cPlease specify a command."
  ignored: "&cThat module is on the ignore list."
  no-permission: "&cYou do not have permission to do that."
  unknown-command: "&cUnknown command &f{0}&c, try &fhelp&c."
  unexpected: "&cSomething unexpected happened while handling &f{0}&c, check the log."
  usage:
    command: "&7Command: &f{0}"
    description: "&7Description: &f{0}"
    usage: "&7Usage: &f{0}"
"#;

static COLOUR_CODE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"&[0-9a-fk-orA-FK-OR]").ok());

static PLACEHOLDER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\{(\d+)\}").ok());

/// Remove `&` colour codes.
pub fn strip_colours(text: &str) -> String {
    match COLOUR_CODE.as_ref() {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    }
}

/// Replace `{i}` with `args[i]`. Placeholders without an argument are kept.
pub fn fill_placeholders(template: &str, args: &[String]) -> String {
    let Some(re) = PLACEHOLDER.as_ref() else {
        return template.to_string();
    };
    re.replace_all(template, |caps: &regex::Captures<'_>| {
        caps[1]
            .parse::<usize>()
            .ok()
            .and_then(|i| args.get(i))
            .cloned()
            .unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MessageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid message file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

fn flatten(prefix: Option<&str>, value: &Value, out: &mut HashMap<String, String>) {
    let key_of = |k: &str| match prefix {
        Some(p) => format!("{p}.{k}"),
        None => k.to_string(),
    };
    match value {
        Value::Mapping(map) => {
            for (k, v) in map {
                let Some(k) = scalar(k) else { continue };
                flatten(Some(&key_of(&k)), v, out);
            }
        }
        other => {
            if let (Some(p), Some(text)) = (prefix, scalar(other)) {
                out.insert(p.to_string(), text);
            }
        }
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_messages(content: &str) -> Result<HashMap<String, String>, MessageError> {
    let value: Value = serde_yaml::from_str(content)?;
    let mut messages = HashMap::new();
    flatten(None, &value, &mut messages);
    Ok(messages)
}

/// Message catalog backed by `messages.yml`.
pub struct MessageCatalog {
    path: Option<PathBuf>,
    messages: RwLock<HashMap<String, String>>,
}

impl Default for MessageCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl MessageCatalog {
    /// Catalog holding only the built-in messages.
    pub fn builtin() -> Self {
        Self {
            path: None,
            messages: RwLock::new(parse_messages(DEFAULT_MESSAGES).unwrap_or_default()),
        }
    }

    /// Built-in messages overridden by `content`.
    pub fn from_yaml(content: &str) -> Result<Self, MessageError> {
        let catalog = Self::builtin();
        catalog.messages.write().extend(parse_messages(content)?);
        Ok(catalog)
    }

    /// Write the default `messages.yml` into `data_folder` if it is missing,
    /// then load it.
    pub fn initialize(data_folder: &Path) -> Result<Self, MessageError> {
        std::fs::create_dir_all(data_folder)?;
        let path = data_folder.join(MESSAGES_FILE);
        if !path.exists() {
            std::fs::write(&path, DEFAULT_MESSAGES)?;
            info!("Wrote default messages to {:?}", path);
        }
        let mut catalog = Self::from_yaml(&std::fs::read_to_string(&path)?)?;
        catalog.path = Some(path);
        Ok(catalog)
    }

    /// Re-read the backing file, if any.
    pub fn reload(&self) -> Result<(), MessageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut messages = parse_messages(DEFAULT_MESSAGES)?;
        messages.extend(parse_messages(&std::fs::read_to_string(path)?)?);
        *self.messages.write() = messages;
        debug!("Reloaded messages from {:?}", path);
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.messages.read().contains_key(key)
    }

    /// Raw template for `key`.
    pub fn template(&self, key: &str) -> Option<String> {
        self.messages.read().get(key).cloned()
    }

    /// Keys below `section`, sorted.
    pub fn keys_in(&self, section: &str) -> Vec<String> {
        let prefix = format!("{section}.");
        let mut keys: Vec<String> = self
            .messages
            .read()
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Render `key` keeping `&` colour codes.
    pub fn format_coloured(&self, prefixed: bool, key: &str, args: &[String]) -> String {
        let messages = self.messages.read();
        let Some(template) = messages.get(key) else {
            return format!("Error: '{key}' not found in {MESSAGES_FILE}");
        };
        let body = fill_placeholders(template, args);
        match (prefixed, messages.get(PREFIX_KEY)) {
            (true, Some(prefix)) => format!("{prefix}{body}"),
            _ => body,
        }
    }
}

impl MessageFormatter for MessageCatalog {
    fn format(&self, key: &str, args: &[String]) -> String {
        strip_colours(&self.format_coloured(true, key, args))
    }

    fn format_plain(&self, key: &str, args: &[String]) -> String {
        strip_colours(&self.format_coloured(false, key, args))
    }
}

impl std::fmt::Debug for MessageCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCatalog")
            .field("path", &self.path)
            .field("messages", &self.messages.read().len())
            .finish()
    }
}
