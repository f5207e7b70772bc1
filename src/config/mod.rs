use crate::models::StoreConfig;
use crate::services::FileBackend;
use ::config::{Config, Environment, File, FileFormat};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// Prefix of environment variables overriding `store.yaml`, e.g.
/// `SETTINGS_STORE__READ_ONLY=true` or `SETTINGS_STORE__COLLAPSE__DEPTH=2`.
pub const ENV_PREFIX: &str = "SETTINGS_STORE";

/// Configuration manager for the store's data directory.
///
/// Manages two files:
/// - Store config (`store.yaml`): read-only flag, collapse rule, logging
/// - Settings (`settings.json`): the persisted settings tree itself
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    store_config_path: Utf8PathBuf,
    settings_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified data directory.
    ///
    /// # Arguments
    /// * `config_dir` - Directory holding `store.yaml` and `settings.json`
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            store_config_path: config_dir.join("store.yaml"),
            settings_path: config_dir.join("settings.json"),
            config_dir,
        })
    }

    /// Load the store configuration, layering environment overrides on top.
    ///
    /// # Returns
    /// The loaded StoreConfig, or defaults (plus overrides) if the file doesn't exist
    pub fn load_store_config(&self) -> Result<StoreConfig> {
        self.build_store_config(Environment::with_prefix(ENV_PREFIX))
    }

    /// Same as [`load_store_config`](Self::load_store_config) but reads overrides
    /// from `vars` instead of the process environment.
    pub fn load_store_config_with_env(
        &self,
        vars: ::config::Map<String, String>,
    ) -> Result<StoreConfig> {
        self.build_store_config(Environment::with_prefix(ENV_PREFIX).source(Some(vars)))
    }

    fn build_store_config(&self, environment: Environment) -> Result<StoreConfig> {
        if !self.store_config_path.exists() {
            tracing::warn!(
                "Store config file not found at {}, using defaults",
                self.store_config_path
            );
        }

        let settings = Config::builder()
            .add_source(
                File::from(self.store_config_path.as_std_path())
                    .format(FileFormat::Yaml)
                    .required(false),
            )
            .add_source(environment.separator("__").try_parsing(true))
            .build()
            .with_context(|| {
                format!("Failed to read store config: {}", self.store_config_path)
            })?;

        let config: StoreConfig = settings.try_deserialize().with_context(|| {
            format!("Failed to parse store config: {}", self.store_config_path)
        })?;

        tracing::info!(
            "Loaded store config: read_only={}, collapse={}, capacity={}",
            config.read_only,
            config.collapse.enabled,
            config.event_capacity
        );
        Ok(config)
    }

    /// Save the store configuration file.
    pub fn save_store_config(&self, config: &StoreConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize store config to YAML")?;

        fs::write(&self.store_config_path, yaml_string).with_context(|| {
            format!("Failed to write store config: {}", self.store_config_path)
        })?;

        tracing::info!("Saved store config to {}", self.store_config_path);
        Ok(())
    }

    /// Backend for the settings file in this directory.
    pub fn settings_backend(&self) -> FileBackend {
        FileBackend::new(&self.settings_path)
    }

    pub fn settings_path(&self) -> &Utf8Path {
        &self.settings_path
    }

    pub fn store_config_path(&self) -> &Utf8Path {
        &self.store_config_path
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }
}
