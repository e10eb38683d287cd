use serde::{Deserialize, Serialize};

use super::CURRENT_CONFIG_VERSION;

/// Settings for one auto feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AutoFeatureConfig {
    pub enabled: bool,
    /// Seconds between scans.
    pub check_every_seconds: u64,
}

impl Default for AutoFeatureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_every_seconds: 10,
        }
    }
}

/// Contents of `config.yml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ModmanConfig {
    /// Files written before versioning have no key and count as version 1.
    #[serde(default = "legacy_version")]
    pub version: u32,
    pub auto_load: AutoFeatureConfig,
    pub auto_unload: AutoFeatureConfig,
    pub auto_reload: AutoFeatureConfig,
    /// Modules no operator command or auto feature may touch.
    #[serde(alias = "ignored-plugins")]
    pub ignored_modules: Vec<String>,
    /// Log each broken command removed during unload.
    pub notify_on_broken_command_removal: bool,
    /// Warn once at start-up when running on a provider-flavoured host.
    pub show_provider_warning: bool,
}

fn legacy_version() -> u32 {
    1
}

impl Default for ModmanConfig {
    fn default() -> Self {
        Self {
            version: CURRENT_CONFIG_VERSION,
            auto_load: AutoFeatureConfig::default(),
            auto_unload: AutoFeatureConfig::default(),
            auto_reload: AutoFeatureConfig::default(),
            ignored_modules: Vec::new(),
            notify_on_broken_command_removal: true,
            show_provider_warning: true,
        }
    }
}
