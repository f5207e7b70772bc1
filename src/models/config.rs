use super::options::{CollapseRule, StoreOptions};
use serde::{Deserialize, Serialize};

/// Store configuration from `store.yaml`, overridable through `SETTINGS_STORE__*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub read_only: bool,

    #[serde(default)]
    pub collapse: CollapseConfig,

    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollapseConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_collapse_prefix")]
    pub prefix: String,

    #[serde(default = "default_collapse_depth")]
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,

    #[serde(default = "default_log_prefix")]
    pub prefix: String,

    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub console: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            collapse: CollapseConfig::default(),
            event_capacity: default_event_capacity(),
            log: LogConfig::default(),
        }
    }
}

impl Default for CollapseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: default_collapse_prefix(),
            depth: default_collapse_depth(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            prefix: default_log_prefix(),
            debug: false,
            console: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_event_capacity() -> usize {
    100
}

fn default_collapse_prefix() -> String {
    "plugins".to_string()
}

fn default_collapse_depth() -> usize {
    3
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_log_prefix() -> String {
    "settings-store".to_string()
}

impl StoreConfig {
    /// Build store options from this configuration.
    ///
    /// Default-value providers are code, not configuration, so none is set here.
    pub fn to_options(&self) -> StoreOptions {
        let collapse = self.collapse.enabled.then(|| CollapseRule {
            prefix: self.collapse.prefix.clone(),
            depth: self.collapse.depth,
        });

        StoreOptions {
            read_only: self.read_only,
            collapse,
            event_capacity: self.event_capacity.max(1),
            default_value: None,
        }
    }
}
