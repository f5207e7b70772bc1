//! Services module - everything built on top of the store rather than inside it.
//!
//! # Components
//!
//! - [`PluginDefaults`]: registry of plugin definitions that becomes the store's
//!   default-value provider, so settings nobody saved yet still read sensibly
//! - [`merge_defaults`]: fills missing keys of a loaded tree from a defaults tree
//! - [`migrate_plugin_settings`] / [`migrate_plugin_setting`]: carry settings
//!   across plugin and setting renames
//! - [`SettingsBackend`]: durable storage, with [`FileBackend`] for JSON/YAML files
//! - [`AutoSaver`]: persists the plain tree after every change
//!
//! # Usage Example
//!
//! ```ignore
//! use settings_store::services::{AutoSaver, FileBackend, PluginDefaults, load_store};
//!
//! let backend = Arc::new(FileBackend::new("data/settings.json"));
//! let options = StoreOptions::default().with_default_value(defaults.into_provider());
//! let store = load_store(backend.as_ref(), &json!({ "plugins": {} }), options)?;
//! let _saver = AutoSaver::attach(&store, backend);
//! ```

pub mod defaults;
pub mod migration;
pub mod persistence;

pub use defaults::{
    PluginDefaults, PluginDefinition, PluginSetting, SelectOption, merge_defaults,
};
pub use migration::{migrate_plugin_setting, migrate_plugin_settings};
pub use persistence::{
    AutoSaver, FileBackend, FileFormat, SettingsBackend, load_store, reload,
};
