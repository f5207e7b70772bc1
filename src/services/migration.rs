use crate::store::SettingsStore;
use serde_json::Value;

/// Move the settings of a renamed plugin to its new name.
///
/// Does nothing if `plugins.<name>` already exists. Otherwise the first of
/// `old_names` that has settings is moved and global listeners are told the data
/// changed. Returns whether anything moved.
pub fn migrate_plugin_settings(store: &SettingsStore, name: &str, old_names: &[&str]) -> bool {
    let moved = store.with_plain_mut(|plain| {
        let Some(Value::Object(plugins)) = plain.get_mut("plugins") else {
            return None;
        };
        if plugins.contains_key(name) {
            return None;
        }

        let old_name = old_names.iter().find(|old| plugins.contains_key(**old))?;
        let settings = plugins.shift_remove(*old_name)?;
        plugins.insert(name.to_string(), settings);
        Some(*old_name)
    });

    match moved {
        Some(old_name) => {
            tracing::info!("Migrating settings from old name {} to {}", old_name, name);
            store.mark_as_changed();
            true
        }
        None => false,
    }
}

/// Rename a single setting inside a plugin's settings.
///
/// Only happens when the old key exists and the new one does not.
pub fn migrate_plugin_setting(
    store: &SettingsStore,
    plugin: &str,
    new_setting: &str,
    old_setting: &str,
) -> bool {
    let moved = store.with_plain_mut(|plain| {
        let Some(Value::Object(settings)) = plain
            .get_mut("plugins")
            .and_then(|plugins| plugins.get_mut(plugin))
        else {
            return false;
        };
        if !settings.contains_key(old_setting) || settings.contains_key(new_setting) {
            return false;
        }

        if let Some(value) = settings.shift_remove(old_setting) {
            settings.insert(new_setting.to_string(), value);
            true
        } else {
            false
        }
    });

    if moved {
        tracing::info!(
            "Migrating setting {}.{} to {}.{}",
            plugin,
            old_setting,
            plugin,
            new_setting
        );
        store.mark_as_changed();
    }
    moved
}
