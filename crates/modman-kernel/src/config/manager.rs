use std::fs;
use std::path::{Path, PathBuf};

use config::FileFormat;
use parking_lot::RwLock;
use tracing::{info, warn};

use super::{ConfigError, ConfigResult, ModmanConfig, from_str};

pub const CONFIG_FILE: &str = "config.yml";

pub const CURRENT_CONFIG_VERSION: u32 = 3;

/// Names the manager itself runs under; always ignored.
pub const SELF_NAMES: &[&str] = &["Modman"];

const DEFAULT_CONFIG: &str = r#"# Modman configuration
version: 3

# Load packages that appear in the module directory.
auto-load:
  enabled: false
  check-every-seconds: 10

# Unload modules whose package disappeared.
auto-unload:
  enabled: false
  check-every-seconds: 10

# Reload modules whose package changed on disk.
auto-reload:
  enabled: false
  check-every-seconds: 10

# Modules that must never be enabled, disabled, unloaded or reloaded.
ignored-modules: []

notify-on-broken-command-removal: true

show-provider-warning: true
"#;

/// Owns `config.yml`: creation, validation, migration and saving.
pub struct ConfigManager {
    path: Option<PathBuf>,
    config: RwLock<ModmanConfig>,
}

impl ConfigManager {
    /// Manager over an in-memory config that is never persisted.
    pub fn in_memory(config: ModmanConfig) -> Self {
        Self {
            path: None,
            config: RwLock::new(config),
        }
    }

    /// Load `config.yml` from `data_folder`, writing defaults if it is
    /// missing. An unreadable file is moved aside to
    /// `config.yml.old-<millis>` and replaced with defaults.
    pub fn initialize(data_folder: &Path) -> ConfigResult<Self> {
        fs::create_dir_all(data_folder)?;
        let path = data_folder.join(CONFIG_FILE);
        if !path.exists() {
            info!("Writing default config to {}", path.display());
            fs::write(&path, DEFAULT_CONFIG)?;
        }

        let content = fs::read_to_string(&path)?;
        let mut config = match from_str::<ModmanConfig>(&content, FileFormat::Yaml) {
            Ok(config) => config,
            Err(e) => {
                let backup = Self::backup_invalid(&path)?;
                warn!(
                    "Invalid config ({}), moved it to {} and regenerated defaults",
                    e,
                    backup.display()
                );
                fs::write(&path, DEFAULT_CONFIG)?;
                ModmanConfig::default()
            }
        };

        let migrated = Self::migrate(&mut config);
        let manager = Self {
            path: Some(path),
            config: RwLock::new(config),
        };
        if migrated {
            manager.save()?;
        }
        Ok(manager)
    }

    fn backup_invalid(path: &Path) -> ConfigResult<PathBuf> {
        let millis = chrono::Utc::now().timestamp_millis();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| CONFIG_FILE.to_string());
        let backup = path.with_file_name(format!("{file_name}.old-{millis}"));
        fs::rename(path, &backup)?;
        Ok(backup)
    }

    /// Step `config` up to [`CURRENT_CONFIG_VERSION`]. Returns whether
    /// anything changed.
    pub fn migrate(config: &mut ModmanConfig) -> bool {
        let start = config.version;
        while config.version < CURRENT_CONFIG_VERSION {
            match config.version {
                0 | 1 => {
                    info!("Migrating config from version 1 to 2");
                    config.notify_on_broken_command_removal = true;
                    config.version = 2;
                }
                _ => {
                    info!("Migrating config from version 2 to 3");
                    config.show_provider_warning = true;
                    config.version = 3;
                }
            }
        }
        config.version != start
    }

    /// Write the current config back to disk. No-op for in-memory managers.
    pub fn save(&self) -> ConfigResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let yaml = serde_yaml::to_string(&*self.config.read())
            .map_err(|e| ConfigError::Serialization(e.to_string()))?;
        fs::write(path, yaml)?;
        Ok(())
    }

    /// Re-read the file from disk.
    pub fn reload(&self) -> ConfigResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = fs::read_to_string(path)?;
        let mut config: ModmanConfig = from_str(&content, FileFormat::Yaml)?;
        Self::migrate(&mut config);
        *self.config.write() = config;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn config(&self) -> ModmanConfig {
        self.config.read().clone()
    }

    pub fn update(&self, apply: impl FnOnce(&mut ModmanConfig)) {
        apply(&mut self.config.write());
    }

    /// Configured ignore list plus the manager's own names.
    pub fn ignored_modules(&self) -> Vec<String> {
        let mut ignored: Vec<String> = SELF_NAMES.iter().map(|s| s.to_string()).collect();
        for name in &self.config.read().ignored_modules {
            if !ignored.iter().any(|i| i.eq_ignore_ascii_case(name)) {
                ignored.push(name.clone());
            }
        }
        ignored
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        SELF_NAMES.iter().any(|s| s.eq_ignore_ascii_case(name))
            || self
                .config
                .read()
                .ignored_modules
                .iter()
                .any(|i| i.eq_ignore_ascii_case(name))
    }

    pub fn notify_on_broken_command_removal(&self) -> bool {
        self.config.read().notify_on_broken_command_removal
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigManager")
            .field("path", &self.path)
            .field("config", &*self.config.read())
            .finish()
    }
}
