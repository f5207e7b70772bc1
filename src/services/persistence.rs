use super::defaults::merge_defaults;
use crate::models::StoreOptions;
use crate::store::{GlobalListener, SettingsStore};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Map, Value};
use std::fs;
use std::sync::Arc;

/// Durable storage for the plain settings tree.
#[cfg_attr(test, mockall::automock)]
pub trait SettingsBackend: Send + Sync {
    /// Load the stored tree, `None` if nothing has been stored yet
    fn load(&self) -> Result<Option<Value>>;

    /// Store the whole tree. `changed_path` is the path that triggered the save,
    /// empty when the change was not attributed to a single path.
    fn save(&self, data: &Value, changed_path: &str) -> Result<()>;
}

/// On-disk format of a settings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Yaml,
}

impl FileFormat {
    /// `.yaml` / `.yml` files are YAML, everything else is JSON
    pub fn from_path(path: &Utf8Path) -> Self {
        match path.extension().map(str::to_ascii_lowercase).as_deref() {
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            _ => FileFormat::Json,
        }
    }
}

/// Settings file on disk.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: Utf8PathBuf,
    format: FileFormat,
}

impl FileBackend {
    pub fn new<P: AsRef<Utf8Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            format: FileFormat::from_path(&path),
            path,
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }
}

impl SettingsBackend for FileBackend {
    fn load(&self) -> Result<Option<Value>> {
        if !self.path.exists() {
            tracing::warn!("Settings file not found at {}, starting empty", self.path);
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings file: {}", self.path))?;

        let data = match self.format {
            FileFormat::Json => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse settings file: {}", self.path))?,
            FileFormat::Yaml => serde_yaml_ng::from_str(&contents)
                .with_context(|| format!("Failed to parse settings file: {}", self.path))?,
        };

        tracing::info!("Loaded settings from {}", self.path);
        Ok(Some(data))
    }

    fn save(&self, data: &Value, changed_path: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create settings directory: {}", parent))?;
            }
        }

        let contents = match self.format {
            FileFormat::Json => {
                serde_json::to_string_pretty(data).context("Failed to serialize settings to JSON")?
            }
            FileFormat::Yaml => {
                serde_yaml_ng::to_string(data).context("Failed to serialize settings to YAML")?
            }
        };

        fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write settings file: {}", self.path))?;

        tracing::debug!(
            "Saved settings to {} (changed: {})",
            self.path,
            if changed_path.is_empty() { "*" } else { changed_path }
        );
        Ok(())
    }
}

/// Build a store from whatever the backend holds, with `defaults` filled in.
///
/// A stored tree that is not an object is discarded with a warning.
pub fn load_store(
    backend: &dyn SettingsBackend,
    defaults: &Value,
    options: StoreOptions,
) -> Result<SettingsStore> {
    let mut data = match backend.load()? {
        Some(Value::Object(map)) => Value::Object(map),
        Some(other) => {
            tracing::warn!(
                "Stored settings are not an object ({}), starting empty",
                type_name(&other)
            );
            Value::Object(Map::new())
        }
        None => Value::Object(Map::new()),
    };

    merge_defaults(&mut data, defaults);
    Ok(SettingsStore::with_options(data, options))
}

/// Re-read the backend into an existing store, as after an external sync.
///
/// Returns `false` if the backend had nothing stored.
pub fn reload(
    store: &SettingsStore,
    backend: &dyn SettingsBackend,
    path_to_notify: Option<&str>,
) -> Result<bool> {
    let Some(data) = backend.load()? else {
        return Ok(false);
    };

    store
        .set_data(data, path_to_notify)
        .context("Failed to replace settings data")?;
    Ok(true)
}

/// Saves the plain tree through a backend after every change.
///
/// Save failures are logged; the mutation that triggered them has already
/// happened and is not rolled back.
pub struct AutoSaver {
    store: SettingsStore,
    listener: GlobalListener,
}

impl AutoSaver {
    pub fn attach(store: &SettingsStore, backend: Arc<dyn SettingsBackend>) -> Self {
        let listener: GlobalListener = Arc::new(move |root: &Value, path: &str| {
            if let Err(e) = backend.save(root, path) {
                tracing::error!("Failed to save settings after change to '{}': {:#}", path, e);
            }
        });

        store.add_global_change_listener(Arc::clone(&listener));
        tracing::debug!("Settings autosave attached");

        Self {
            store: store.clone(),
            listener,
        }
    }

    /// Stop saving. Returns false if the listener was already gone.
    pub fn detach(self) -> bool {
        self.store.remove_global_change_listener(&self.listener)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
