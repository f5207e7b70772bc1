//! Listener registry owned by each store.
//!
//! Registries only hold callbacks; the store snapshots them and releases every
//! lock before invoking, so a listener may freely read or write the store.

use super::{read_lock, write_lock};
use crate::metrics::StoreMetrics;
use indexmap::IndexMap;
use serde_json::Value;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

/// Called on any change with the tree root and the (possibly collapsed) changed path.
///
/// The path is empty when the whole tree was replaced.
pub type GlobalListener = Arc<dyn Fn(&Value, &str) + Send + Sync>;

/// Called with the new value at the exact registered path, `None` when it was deleted.
pub type ChangeListener = Arc<dyn Fn(Option<&Value>) + Send + Sync>;

/// Listener identity is the allocation behind the `Arc`, not the vtable.
fn same_listener<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    global: RwLock<Vec<GlobalListener>>,
    paths: RwLock<IndexMap<String, Vec<ChangeListener>>>,
}

impl ListenerRegistry {
    /// Returns false if the listener was already registered.
    pub(crate) fn add_global(&self, listener: GlobalListener) -> bool {
        let mut global = write_lock(&self.global);
        if global.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        global.push(listener);
        true
    }

    pub(crate) fn remove_global(&self, listener: &GlobalListener) -> bool {
        let mut global = write_lock(&self.global);
        let before = global.len();
        global.retain(|l| !same_listener(l, listener));
        global.len() != before
    }

    pub(crate) fn add_path(&self, path: &str, listener: ChangeListener) -> bool {
        let mut paths = write_lock(&self.paths);
        let listeners = paths.entry(path.to_string()).or_default();
        if listeners.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Removes the listener, dropping the path entry once it has no listeners left.
    pub(crate) fn remove_path(&self, path: &str, listener: &ChangeListener) -> bool {
        let mut paths = write_lock(&self.paths);
        let Some(listeners) = paths.get_mut(path) else {
            return false;
        };

        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        let removed = listeners.len() != before;

        if listeners.is_empty() {
            paths.shift_remove(path);
        }
        removed
    }

    pub(crate) fn has_path(&self, path: &str) -> bool {
        read_lock(&self.paths).contains_key(path)
    }

    pub(crate) fn paths(&self) -> Vec<String> {
        read_lock(&self.paths).keys().cloned().collect()
    }

    pub(crate) fn global_count(&self) -> usize {
        read_lock(&self.global).len()
    }

    pub(crate) fn global_snapshot(&self) -> Vec<GlobalListener> {
        read_lock(&self.global).clone()
    }

    pub(crate) fn path_snapshot(&self, path: &str) -> Vec<ChangeListener> {
        read_lock(&self.paths)
            .get(path)
            .cloned()
            .unwrap_or_default()
    }
}

pub(crate) fn notify_global(
    listeners: &[GlobalListener],
    root: &Value,
    path: &str,
    metrics: &StoreMetrics,
) {
    for listener in listeners {
        metrics.record_global_notification();
        isolate("global", path, metrics, || listener(root, path));
    }
}

pub(crate) fn notify_path(
    listeners: &[ChangeListener],
    path: &str,
    value: Option<&Value>,
    metrics: &StoreMetrics,
) {
    for listener in listeners {
        metrics.record_path_notification();
        isolate("path", path, metrics, || listener(value));
    }
}

/// Run one listener, containing a panic so the remaining listeners still run.
fn isolate(kind: &str, path: &str, metrics: &StoreMetrics, f: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        metrics.record_listener_panic();
        tracing::error!(
            "{} listener for '{}' panicked: {}",
            kind,
            path,
            panic_message(payload.as_ref())
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
