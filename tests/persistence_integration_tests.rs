//! Integration tests for persistence, plugin defaults and migrations
//!
//! These tests verify:
//! - Settings survive a save/load cycle through a settings file
//! - Every reactive write is autosaved
//! - Plugin defaults materialise on first read and are then persisted
//! - External reloads reach path listeners and global listeners

use camino::Utf8PathBuf;
use serde_json::{Value, json};
use settings_store::services::{
    AutoSaver, FileBackend, PluginDefaults, PluginDefinition, PluginSetting, SettingsBackend,
    load_store, migrate_plugin_settings, reload,
};
use settings_store::{ChangeListener, SettingsStore, StoreOptions};
use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn create_settings_file(name: &str) -> (TempDir, Utf8PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = Utf8PathBuf::try_from(temp_dir.path().join(name)).unwrap();
    (temp_dir, path)
}

fn read_json(path: &Utf8PathBuf) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_autosave_writes_every_change() {
    let (_temp_dir, path) = create_settings_file("settings.json");
    let backend = Arc::new(FileBackend::new(&path));

    let store = load_store(
        backend.as_ref(),
        &json!({ "plugins": {}, "theme": "light" }),
        StoreOptions::default(),
    )
    .unwrap();
    let _saver = AutoSaver::attach(&store, backend);

    store.set("theme", json!("dark")).unwrap();
    assert_eq!(read_json(&path), json!({ "plugins": {}, "theme": "dark" }));

    store.set("plugins.Foo", json!({ "enabled": true })).unwrap();
    assert_eq!(read_json(&path)["plugins"]["Foo"]["enabled"], json!(true));
}

#[test]
fn test_settings_survive_restart() {
    let (_temp_dir, path) = create_settings_file("settings.yaml");

    {
        let backend = Arc::new(FileBackend::new(&path));
        let store = load_store(backend.as_ref(), &json!({}), StoreOptions::default()).unwrap();
        let saver = AutoSaver::attach(&store, backend);
        store.set("volume", json!(80)).unwrap();
        saver.detach();
    }

    let backend = FileBackend::new(&path);
    let store = load_store(&backend, &json!({ "volume": 50, "muted": false }), StoreOptions::default())
        .unwrap();

    assert_eq!(store.plain(), json!({ "volume": 80, "muted": false }));
}

#[test]
fn test_plugin_defaults_materialise_and_persist() {
    let (_temp_dir, path) = create_settings_file("settings.json");
    let backend = Arc::new(FileBackend::new(&path));

    let mut defaults = PluginDefaults::new();
    defaults.register(
        PluginDefinition::new("Foo")
            .enabled_by_default(true)
            .setting("volume", PluginSetting::with_default(json!(25))),
    );

    let options = StoreOptions::default().with_default_value(defaults.into_provider());
    let store = load_store(backend.as_ref(), &json!({ "plugins": {} }), options).unwrap();
    let _saver = AutoSaver::attach(&store, backend);

    assert_eq!(store.get_value("plugins.Foo.enabled"), Some(json!(true)));
    assert_eq!(store.get_value("plugins.Foo.volume"), Some(json!(25)));
    assert_eq!(store.get_value("plugins.Unknown"), None);

    // Materialised defaults are silent, nothing written yet
    assert!(!path.exists());

    store.set("plugins.Foo.volume", json!(30)).unwrap();
    assert_eq!(
        read_json(&path),
        json!({ "plugins": { "Foo": { "enabled": true, "volume": 30 } } })
    );
}

#[test]
fn test_reload_after_external_change() {
    let (_temp_dir, path) = create_settings_file("settings.json");
    let backend = FileBackend::new(&path);
    backend
        .save(&json!({ "plugins": { "Foo": { "enabled": false } } }), "")
        .unwrap();

    let store = load_store(&backend, &json!({}), StoreOptions::default()).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let listener: ChangeListener = {
        let seen = Arc::clone(&seen);
        Arc::new(move |value: Option<&Value>| seen.lock().unwrap().push(value.cloned()))
    };
    store.add_change_listener("plugins.Foo.enabled", listener);

    // Another process flips the setting
    backend
        .save(&json!({ "plugins": { "Foo": { "enabled": true } } }), "plugins.Foo.enabled")
        .unwrap();
    assert!(reload(&store, &backend, Some("plugins.Foo.enabled")).unwrap());

    assert_eq!(*seen.lock().unwrap(), vec![Some(json!(true))]);
    assert_eq!(store.get_value("plugins.Foo.enabled"), Some(json!(true)));
}

#[test]
fn test_migration_is_persisted() {
    let (_temp_dir, path) = create_settings_file("settings.json");
    let backend = Arc::new(FileBackend::new(&path));
    backend
        .save(&json!({ "plugins": { "OldName": { "enabled": true } } }), "")
        .unwrap();

    let store: SettingsStore =
        load_store(backend.as_ref(), &json!({}), StoreOptions::default()).unwrap();
    let _saver = AutoSaver::attach(&store, backend);

    assert!(migrate_plugin_settings(&store, "NewName", &["OldName"]));
    assert_eq!(
        read_json(&path),
        json!({ "plugins": { "NewName": { "enabled": true } } })
    );
}
