// Reactive settings store
//
// This module provides the SettingsStore which owns a plain settings tree and hands
// out reactive views over it. Every mutation through a view notifies global and
// path-scoped listeners synchronously before the call returns.

mod listeners;
mod view;

pub use listeners::{ChangeListener, GlobalListener};
pub use view::{Assign, NodeId, ProxyContext, Resolved, SettingsView};

use view::Detached;

use crate::metrics::StoreMetrics;
use crate::models::path::{lookup_key, resolve};
use crate::models::{SettingsPath, StoreOptions};
use indexmap::IndexMap;
use listeners::{ListenerRegistry, notify_global, notify_path};
use serde_json::Value;
use std::fmt;
use std::sync::{
    Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors produced by store mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Settings store is read-only")]
    ReadOnly,

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Cannot assign to the root path, replace the data instead")]
    RootAssignment,

    #[error("Value at '{0}' is not an object or array")]
    NotAContainer(String),

    #[error("Invalid array index '{key}' at '{path}'")]
    InvalidIndex { path: String, key: String },

    #[error("Index {index} out of bounds for array of length {len} at '{path}'")]
    IndexOutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },
}

/// Change events mirrored from global notifications
///
/// These are emitted for consumers that prefer a channel over a callback,
/// for example an async task that persists settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SettingsChange {
    /// A value changed; `path` is the (possibly collapsed) path global listeners saw
    Changed { path: String },

    /// The whole tree should be re-read (after `set_data` or `mark_as_changed`)
    Replaced,
}

pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The plain tree of one data generation. `set_data` starts a new generation.
#[derive(Clone)]
struct Generation {
    id: u64,
    tree: Arc<RwLock<Value>>,
}

/// Proxy contexts of the current generation, keyed by container path.
struct ContextCache {
    generation: u64,
    next_node: u64,
    by_path: IndexMap<String, Arc<ProxyContext>>,
}

pub(crate) struct Shared {
    options: StoreOptions,
    current: RwLock<Generation>,
    contexts: Mutex<ContextCache>,
    listeners: ListenerRegistry,
    events: broadcast::Sender<SettingsChange>,
    metrics: Arc<StoreMetrics>,
}

impl Shared {
    fn current(&self) -> Generation {
        read_lock(&self.current).clone()
    }

    pub(crate) fn current_generation(&self) -> u64 {
        read_lock(&self.current).id
    }

    /// View for a container path, reusing the cached context when there is one.
    ///
    /// Views of a replaced generation get a fresh, uncached context.
    pub(crate) fn view_for(
        self: &Arc<Self>,
        tree: &Arc<RwLock<Value>>,
        generation: u64,
        path: SettingsPath,
    ) -> SettingsView {
        let context = {
            let mut cache = lock(&self.contexts);
            let key = path.to_string();
            let cached = cache.generation == generation;
            let existing = if cached {
                cache.by_path.get(&key).cloned()
            } else {
                None
            };

            match existing {
                Some(context) => context,
                None => {
                    let node = NodeId(cache.next_node);
                    cache.next_node += 1;
                    let context = Arc::new(ProxyContext {
                        node,
                        generation,
                        path,
                        detached: OnceLock::new(),
                    });
                    if cached {
                        cache.by_path.insert(key, Arc::clone(&context));
                    }
                    context
                }
            }
        };

        SettingsView {
            shared: Arc::clone(self),
            tree: Arc::clone(tree),
            context,
        }
    }

    /// Uncached view over a node that is not part of the live tree.
    pub(crate) fn detached_view(
        self: &Arc<Self>,
        path: SettingsPath,
        generation: u64,
        detached: Detached,
    ) -> SettingsView {
        let node = {
            let mut cache = lock(&self.contexts);
            let node = NodeId(cache.next_node);
            cache.next_node += 1;
            node
        };
        let tree = Arc::clone(&detached.tree);

        SettingsView {
            shared: Arc::clone(self),
            tree,
            context: Arc::new(ProxyContext {
                node,
                generation,
                path,
                detached: OnceLock::from(detached),
            }),
        }
    }

    /// Drop cached contexts at and below `path`; the node there was replaced or removed.
    ///
    /// Views still holding those contexts move onto a private copy of `previous`, the
    /// node as it was, so they never write into whatever took its place.
    pub(crate) fn forget_subtree(
        &self,
        generation: u64,
        path: &SettingsPath,
        previous: Option<Value>,
    ) {
        let dropped = {
            let mut cache = lock(&self.contexts);
            if cache.generation != generation {
                return;
            }
            let exact = path.to_string();
            let prefix = format!("{}.", exact);
            let mut dropped = Vec::new();
            cache.by_path.retain(|key, context| {
                let hit = key == &exact || key.starts_with(&prefix);
                if hit {
                    dropped.push(Arc::clone(context));
                }
                !hit
            });
            dropped
        };

        if dropped.is_empty() {
            return;
        }

        tracing::debug!("Detaching {} view(s) at {}", dropped.len(), path);
        let tree = Arc::new(RwLock::new(previous.unwrap_or(Value::Null)));
        for context in dropped {
            let relative = context.path.segments()[path.len()..]
                .iter()
                .fold(SettingsPath::root(), |relative, key| relative.child(key));
            let _ = context.detached.set(Detached {
                tree: Arc::clone(&tree),
                path: relative,
            });
        }
    }

    /// Deliver one mutation at `path` to listeners.
    ///
    /// Deep paths matching the collapse rule are reported to global listeners (and
    /// to path listeners of the collapsed path) as a change of their ancestor.
    /// Path listeners of the exact path always get the exact new value.
    pub(crate) fn notify(&self, origin: &SettingsView, path: &SettingsPath, value: Option<Value>) {
        if origin.is_detached() {
            tracing::debug!("Ignoring change at {} made through a detached view", path);
            return;
        }

        let exact = path.to_string();
        let collapsed = self
            .options
            .collapse
            .as_ref()
            .and_then(|rule| rule.collapse(path));
        let globals = self.listeners.global_snapshot();

        let reported = match &collapsed {
            Some(collapsed) => {
                let reported = collapsed.to_string();
                let collapsed_listeners = self.listeners.path_snapshot(&reported);

                if !globals.is_empty() || !collapsed_listeners.is_empty() {
                    let root = read_lock(&origin.tree).clone();
                    let resolved = resolve(&root, collapsed).cloned();
                    notify_global(&globals, &root, &reported, &self.metrics);
                    notify_path(
                        &collapsed_listeners,
                        &reported,
                        resolved.as_ref(),
                        &self.metrics,
                    );
                }
                reported
            }
            None => {
                if !globals.is_empty() {
                    let root = read_lock(&origin.tree).clone();
                    notify_global(&globals, &root, &exact, &self.metrics);
                }
                exact.clone()
            }
        };

        let listeners = self.listeners.path_snapshot(&exact);
        notify_path(&listeners, &exact, value.as_ref(), &self.metrics);

        // No receivers is fine.
        let _ = self.events.send(SettingsChange::Changed { path: reported });
    }
}

/// Reactive settings store with path-scoped change subscriptions
///
/// The store pairs a plain [`Value`] tree with reactive [`SettingsView`]s over it:
/// - [`view()`](Self::view) returns the root view; reads and writes through views
///   are reflected in the plain tree immediately and notify listeners synchronously
/// - [`plain()`](Self::plain) / [`with_plain_mut()`](Self::with_plain_mut) bypass
///   notification entirely, for serialization and bulk edits
/// - [`set_data()`](Self::set_data) replaces the whole tree, detaching old views
///
/// Cloning the store is cheap and every clone shares the same tree and listeners.
///
/// # Example
/// ```ignore
/// let store = SettingsStore::new(json!({ "plugins": { "Foo": { "enabled": false } } }));
/// store.add_change_listener("plugins.Foo.enabled", Arc::new(|v: Option<&Value>| println!("{v:?}")));
/// store.set("plugins.Foo.enabled", true)?;
/// ```
#[derive(Clone)]
pub struct SettingsStore {
    shared: Arc<Shared>,
}

impl SettingsStore {
    /// Create a store over `plain` with default options
    pub fn new(plain: Value) -> Self {
        Self::with_options(plain, StoreOptions::default())
    }

    pub fn with_options(plain: Value, options: StoreOptions) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));

        Self {
            shared: Arc::new(Shared {
                options,
                current: RwLock::new(Generation {
                    id: 0,
                    tree: Arc::new(RwLock::new(plain)),
                }),
                contexts: Mutex::new(ContextCache {
                    generation: 0,
                    next_node: 0,
                    by_path: IndexMap::new(),
                }),
                listeners: ListenerRegistry::default(),
                events,
                metrics: Arc::new(StoreMetrics::new()),
            }),
        }
    }

    pub fn options(&self) -> &StoreOptions {
        &self.shared.options
    }

    pub fn is_read_only(&self) -> bool {
        self.shared.options.read_only
    }

    pub fn metrics(&self) -> Arc<StoreMetrics> {
        Arc::clone(&self.shared.metrics)
    }

    /// Number of times the data has been replaced
    pub fn generation(&self) -> u64 {
        self.shared.current_generation()
    }

    /// The reactive view over the root of the current data
    pub fn view(&self) -> SettingsView {
        let current = self.shared.current();
        self.shared
            .view_for(&current.tree, current.id, SettingsPath::root())
    }

    /// Snapshot of the plain tree
    pub fn plain(&self) -> Value {
        let current = self.shared.current();
        let tree = read_lock(&current.tree);
        tree.clone()
    }

    /// Read the plain tree without cloning it
    pub fn with_plain<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Value) -> R,
    {
        let current = self.shared.current();
        let tree = read_lock(&current.tree);
        f(&tree)
    }

    /// Mutate the plain tree directly. Nothing is notified.
    ///
    /// Call [`mark_as_changed()`](Self::mark_as_changed) afterwards if listeners
    /// should hear about it. Views obtained earlier keep following their paths.
    pub fn with_plain_mut<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Value) -> R,
    {
        let current = self.shared.current();
        let result = {
            let mut tree = write_lock(&current.tree);
            f(&mut tree)
        };
        // Cached contexts may point at nodes the closure replaced.
        let mut cache = lock(&self.shared.contexts);
        if cache.generation == current.id {
            cache.by_path.clear();
        }
        result
    }

    /// Number of cached proxy contexts for the current data
    pub fn cached_context_count(&self) -> usize {
        lock(&self.shared.contexts).by_path.len()
    }

    /// Read a dot-path through the reactive view
    pub fn get(&self, path: &str) -> Option<Resolved> {
        self.view().get_path(path)
    }

    /// Raw value at a dot-path, unwrapping views
    pub fn get_value(&self, path: &str) -> Option<Value> {
        self.get(path).and_then(Resolved::into_value)
    }

    /// Assign a dot-path through the reactive view; the parent must exist
    pub fn set(&self, path: &str, value: impl Into<Assign>) -> Result<bool, StoreError> {
        let (parent, key) = split_parent(path)?;
        self.view().view_at(parent)?.set(key, value)
    }

    /// Delete a dot-path through the reactive view
    pub fn delete(&self, path: &str) -> Result<bool, StoreError> {
        let (parent, key) = split_parent(path)?;
        self.view().view_at(parent)?.delete(key)
    }

    /// Replace the backing data wholesale
    ///
    /// Views obtained before the call keep pointing at the old tree. If
    /// `path_to_notify` is given, path listeners of exactly that path are told its
    /// new value; an unresolvable path is logged and skips the rest of the
    /// notification. Global listeners are then told via [`mark_as_changed()`](Self::mark_as_changed).
    pub fn set_data(&self, value: Value, path_to_notify: Option<&str>) -> Result<(), StoreError> {
        if self.shared.options.read_only {
            return Err(StoreError::ReadOnly);
        }

        let generation = {
            let mut current = write_lock(&self.shared.current);
            let id = current.id + 1;
            *current = Generation {
                id,
                tree: Arc::new(RwLock::new(value)),
            };
            current.clone()
        };

        {
            let mut cache = lock(&self.shared.contexts);
            cache.generation = generation.id;
            cache.by_path.clear();
        }

        self.shared.metrics.record_data_replacement();
        tracing::debug!("Settings data replaced (generation {})", generation.id);

        if let Some(path) = path_to_notify {
            let resolved = {
                let tree = read_lock(&generation.tree);
                match resolve_for_notify(&tree, &SettingsPath::parse(path)) {
                    Some(value) => value.cloned(),
                    None => {
                        tracing::warn!(
                            "Failed to notify listeners of '{}': path does not exist in the new data",
                            path
                        );
                        return Ok(());
                    }
                }
            };

            let listeners = self.shared.listeners.path_snapshot(path);
            notify_path(&listeners, path, resolved.as_ref(), &self.shared.metrics);
        }

        self.mark_as_changed();
        Ok(())
    }

    /// Tell global listeners that something changed without saying what
    ///
    /// Listeners receive the plain tree and an empty path.
    pub fn mark_as_changed(&self) {
        let globals = self.shared.listeners.global_snapshot();
        if !globals.is_empty() {
            let root = self.plain();
            notify_global(&globals, &root, "", &self.shared.metrics);
        }
        let _ = self.shared.events.send(SettingsChange::Replaced);
    }

    pub fn add_global_change_listener(&self, listener: GlobalListener) {
        self.shared.listeners.add_global(listener);
    }

    pub fn remove_global_change_listener(&self, listener: &GlobalListener) -> bool {
        self.shared.listeners.remove_global(listener)
    }

    pub fn add_change_listener(&self, path: &str, listener: ChangeListener) {
        self.shared.listeners.add_path(path, listener);
    }

    /// Remove a path listener; the path's entry goes away with its last listener
    pub fn remove_change_listener(&self, path: &str, listener: &ChangeListener) -> bool {
        self.shared.listeners.remove_path(path, listener)
    }

    pub fn has_change_listeners(&self, path: &str) -> bool {
        self.shared.listeners.has_path(path)
    }

    /// Paths that currently have at least one listener
    pub fn listened_paths(&self) -> Vec<String> {
        self.shared.listeners.paths()
    }

    pub fn global_listener_count(&self) -> usize {
        self.shared.listeners.global_count()
    }

    /// Subscribe to change events
    ///
    /// Returns a receiver that gets every future global notification.
    pub fn subscribe(&self) -> broadcast::Receiver<SettingsChange> {
        self.shared.events.subscribe()
    }
}

impl fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsStore")
            .field("generation", &self.generation())
            .field("options", &self.shared.options)
            .field("listened_paths", &self.listened_paths())
            .finish()
    }
}

fn split_parent(path: &str) -> Result<(&str, &str), StoreError> {
    if path.is_empty() {
        return Err(StoreError::RootAssignment);
    }
    Ok(path.rsplit_once('.').unwrap_or(("", path)))
}

/// Walk `path` for a targeted notification.
///
/// `None` means the walk hit a missing or falsy node (null, false, 0 or ""); `Some(None)`
/// means the last step found nothing, as when the final key is absent or its parent is
/// a non-empty primitive.
fn resolve_for_notify<'a>(root: &'a Value, path: &SettingsPath) -> Option<Option<&'a Value>> {
    let mut current = Some(root);
    for key in path.segments() {
        match current {
            Some(node) if is_truthy(node) => current = lookup_key(node, key),
            _ => return None,
        }
    }
    Some(current)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recorder() -> (ChangeListener, Arc<Mutex<Vec<Option<Value>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let listener: ChangeListener = {
            let seen = Arc::clone(&seen);
            Arc::new(move |value: Option<&Value>| seen.lock().unwrap().push(value.cloned()))
        };
        (listener, seen)
    }

    #[test]
    fn test_new_store_exposes_plain() {
        let store = SettingsStore::new(json!({ "a": 1 }));
        assert_eq!(store.plain(), json!({ "a": 1 }));
        assert_eq!(store.generation(), 0);
        assert!(!store.is_read_only());
    }

    #[test]
    fn test_split_parent() {
        assert_eq!(split_parent("a.b.c").unwrap(), ("a.b", "c"));
        assert_eq!(split_parent("a").unwrap(), ("", "a"));
        assert_eq!(split_parent(""), Err(StoreError::RootAssignment));
    }

    #[test]
    fn test_resolve_for_notify() {
        let root = json!({ "a": { "b": 1 }, "n": null });

        assert_eq!(
            resolve_for_notify(&root, &"a.b".into()),
            Some(Some(&json!(1)))
        );
        assert_eq!(resolve_for_notify(&root, &"a.missing".into()), Some(None));
        assert_eq!(resolve_for_notify(&root, &"x.y".into()), None);
        assert_eq!(resolve_for_notify(&root, &"n.y".into()), None);
    }

    #[test]
    fn test_resolve_for_notify_stops_at_falsy_nodes() {
        let root = json!({ "off": false, "zero": 0, "empty": "", "name": "x" });

        assert_eq!(resolve_for_notify(&root, &"off.b".into()), None);
        assert_eq!(resolve_for_notify(&root, &"zero.b".into()), None);
        assert_eq!(resolve_for_notify(&root, &"empty.b".into()), None);
        assert_eq!(resolve_for_notify(&root, &"name.b".into()), Some(None));
        assert_eq!(resolve_for_notify(&root, &"name.b.c".into()), None);
        assert_eq!(resolve_for_notify(&root, &"off".into()), Some(Some(&json!(false))));
    }

    #[test]
    fn test_views_are_cached_per_path() {
        let store = SettingsStore::new(json!({ "a": { "b": {} } }));

        let first = store.get("a.b").and_then(Resolved::into_view).unwrap();
        let second = store.get("a.b").and_then(Resolved::into_view).unwrap();

        assert_eq!(first.node_id(), second.node_id());
        assert_eq!(first.path().to_string(), "a.b");
    }

    #[test]
    fn test_replacing_object_gives_new_identity() {
        let store = SettingsStore::new(json!({ "a": { "b": {} } }));
        let before = store.get("a.b").and_then(Resolved::into_view).unwrap();

        store.set("a.b", json!({ "fresh": true })).unwrap();
        let after = store.get("a.b").and_then(Resolved::into_view).unwrap();

        assert_ne!(before.node_id(), after.node_id());
        assert!(before.is_detached());
        assert!(!after.is_detached());
    }

    #[test]
    fn test_replaced_node_keeps_nested_views_together() {
        let store = SettingsStore::new(json!({ "a": { "b": { "c": { "d": 1 } } } }));
        let old_b = store.get("a.b").and_then(Resolved::into_view).unwrap();
        let old_c = store.get("a.b.c").and_then(Resolved::into_view).unwrap();

        store.set("a", json!({ "b": 2 })).unwrap();
        assert_eq!(store.cached_context_count(), 1);

        old_c.set("d", json!(5)).unwrap();

        assert_eq!(old_b.raw(), Some(json!({ "c": { "d": 5 } })));
        assert_eq!(store.plain(), json!({ "a": { "b": 2 } }));
    }

    #[test]
    fn test_read_only_rejects_mutation() {
        let store = SettingsStore::with_options(json!({ "a": 1 }), StoreOptions::read_only());

        assert_eq!(store.set("a", json!(2)), Err(StoreError::ReadOnly));
        assert_eq!(store.delete("a"), Err(StoreError::ReadOnly));
        assert_eq!(store.set_data(json!({}), None), Err(StoreError::ReadOnly));
        assert_eq!(store.plain(), json!({ "a": 1 }));
    }

    #[test]
    fn test_collapsed_path_listener_gets_resolved_setting() {
        let store = SettingsStore::new(json!({
            "plugins": { "Foo": { "bar": { "nested": { "deep": 1 } } } }
        }));
        let (listener, seen) = recorder();
        store.add_change_listener("plugins.Foo.bar", listener);

        store.set("plugins.Foo.bar.nested.deep", json!(2)).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some(json!({ "nested": { "deep": 2 } }))]
        );
    }

    #[test]
    fn test_disabled_collapse_reports_exact_path() {
        let store = SettingsStore::with_options(
            json!({ "plugins": { "Foo": { "bar": { "nested": 1 } } } }),
            StoreOptions::default().with_collapse(None),
        );
        let paths = Arc::new(Mutex::new(Vec::new()));
        let listener: GlobalListener = {
            let paths = Arc::clone(&paths);
            Arc::new(move |_: &Value, path: &str| paths.lock().unwrap().push(path.to_string()))
        };
        store.add_global_change_listener(listener);

        store.set("plugins.Foo.bar.nested", json!(2)).unwrap();

        assert_eq!(*paths.lock().unwrap(), vec!["plugins.Foo.bar.nested".to_string()]);
    }

    #[test]
    fn test_delete_notifies_absent() {
        let store = SettingsStore::new(json!({ "a": { "b": 1 } }));
        let (listener, seen) = recorder();
        store.add_change_listener("a.b", listener);

        assert!(store.delete("a.b").unwrap());
        assert!(!store.delete("a.b").unwrap());

        assert_eq!(*seen.lock().unwrap(), vec![None]);
        assert_eq!(store.plain(), json!({ "a": {} }));
    }

    #[test]
    fn test_set_data_missing_notify_path_skips_global_notification() {
        let store = SettingsStore::new(json!({}));
        let calls = Arc::new(Mutex::new(0));
        let listener: GlobalListener = {
            let calls = Arc::clone(&calls);
            Arc::new(move |_: &Value, _: &str| *calls.lock().unwrap() += 1)
        };
        store.add_global_change_listener(listener);

        store
            .set_data(json!({ "a": 1 }), Some("missing.deeper"))
            .unwrap();

        assert_eq!(*calls.lock().unwrap(), 0);
        assert_eq!(store.plain(), json!({ "a": 1 }));
    }

    #[test]
    fn test_with_plain_mut_bypasses_listeners() {
        let store = SettingsStore::new(json!({ "a": 1 }));
        let (listener, seen) = recorder();
        store.add_change_listener("a", listener);

        store.with_plain_mut(|plain| plain["a"] = json!(5));

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(store.get_value("a"), Some(json!(5)));
    }

    #[test]
    fn test_listener_may_write_back_into_store() {
        let store = SettingsStore::new(json!({ "a": 0, "mirror": 0 }));
        let listener: ChangeListener = {
            let store = store.clone();
            Arc::new(move |value: Option<&Value>| {
                if let Some(value) = value {
                    store.set("mirror", value.clone()).unwrap();
                }
            })
        };
        store.add_change_listener("a", listener);

        store.set("a", json!(7)).unwrap();

        assert_eq!(store.plain(), json!({ "a": 7, "mirror": 7 }));
    }
}
