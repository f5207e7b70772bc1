// Settings Store - reactive nested settings with path-scoped change listeners
//
// This is the library crate containing the store and the services built on it.
// The binary crate (main.rs) provides a small command line front end.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod store;

// Re-export commonly used types for convenience
pub use crate::config::ConfigManager;
pub use models::{SettingsPath, StoreConfig, StoreOptions};
pub use store::{
    Assign, ChangeListener, GlobalListener, Resolved, SettingsChange, SettingsStore,
    SettingsView, StoreError,
};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
