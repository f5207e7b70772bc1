//! Data models for the settings store.
//!
//! - [`SettingsPath`]: dot-separated location inside a settings tree, plus lookup helpers
//! - [`StoreOptions`]: construction options (read-only flag, collapse rule, default-value provider)
//! - [`CollapseRule`]: how deep mutations are summarised for global listeners
//! - [`StoreConfig`]: the serializable configuration loaded by [`ConfigManager`](crate::config::ConfigManager)
//!
//! The settings tree itself is a plain [`serde_json::Value`]; nothing in here wraps it.

pub mod config;
pub mod options;
pub mod path;

pub use config::{CollapseConfig, LogConfig, StoreConfig};
pub use options::{
    CollapseRule, DefaultContext, DefaultValue, DefaultValueFn, StoreOptions,
};
pub use path::SettingsPath;
