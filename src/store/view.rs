use super::{Shared, StoreError, read_lock, write_lock};
use crate::models::path::{is_container, lookup_key, resolve, resolve_mut};
use crate::models::{DefaultContext, DefaultValue, SettingsPath};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::mem;
use std::sync::{Arc, OnceLock, RwLock};

/// Stable identity of a container node, assigned when its view is first created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

/// Where a view sits: which data generation and which path below the root.
#[derive(Debug)]
pub struct ProxyContext {
    pub(crate) node: NodeId,
    pub(crate) generation: u64,
    pub(crate) path: SettingsPath,
    /// Set once the node is replaced or removed, or for values that never lived in the store
    pub(crate) detached: OnceLock<Detached>,
}

/// A node cut loose from the live tree: the tree now holding it and where it sits there.
#[derive(Debug)]
pub(crate) struct Detached {
    pub(crate) tree: Arc<RwLock<Value>>,
    pub(crate) path: SettingsPath,
}

impl ProxyContext {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn path(&self) -> &SettingsPath {
        &self.path
    }
}

/// Reactive handle over one container (object or array) of the settings tree.
///
/// Reads go straight to the plain tree; writes update it in place and then notify
/// the store's listeners before returning. A view obtained before
/// [`set_data`](super::SettingsStore::set_data) keeps pointing at the replaced tree
/// and no longer notifies anyone.
#[derive(Clone)]
pub struct SettingsView {
    pub(crate) shared: Arc<Shared>,
    pub(crate) tree: Arc<RwLock<Value>>,
    pub(crate) context: Arc<ProxyContext>,
}

/// Result of a lookup through a view.
#[derive(Clone, Debug)]
pub enum Resolved {
    /// A primitive (or a transient default), returned as-is
    Value(Value),

    /// An object or array, wrapped in a view of its own
    View(SettingsView),
}

impl Resolved {
    /// True when this is one of the store's reactive views.
    pub fn is_proxy(&self) -> bool {
        matches!(self, Resolved::View(_))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Resolved::Value(value) => Some(value),
            Resolved::View(_) => None,
        }
    }

    pub fn as_view(&self) -> Option<&SettingsView> {
        match self {
            Resolved::View(view) => Some(view),
            Resolved::Value(_) => None,
        }
    }

    pub fn into_view(self) -> Option<SettingsView> {
        match self {
            Resolved::View(view) => Some(view),
            Resolved::Value(_) => None,
        }
    }

    /// The raw value, unwrapping views. `None` if the view's node is gone.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Resolved::Value(value) => Some(value),
            Resolved::View(view) => view.raw(),
        }
    }
}

/// Something that can be assigned through a view.
///
/// Views are unwrapped to their raw value, so the plain tree never holds a view.
#[derive(Clone, Debug)]
pub enum Assign {
    Raw(Value),
    View(SettingsView),
}

impl Assign {
    pub(crate) fn into_raw(self) -> Result<Value, StoreError> {
        match self {
            Assign::Raw(value) => Ok(value),
            Assign::View(view) => view
                .raw()
                .ok_or_else(|| StoreError::PathNotFound(view.path().to_string())),
        }
    }
}

impl From<Value> for Assign {
    fn from(value: Value) -> Self {
        Assign::Raw(value)
    }
}

impl From<SettingsView> for Assign {
    fn from(view: SettingsView) -> Self {
        Assign::View(view)
    }
}

impl From<&SettingsView> for Assign {
    fn from(view: &SettingsView) -> Self {
        Assign::View(view.clone())
    }
}

impl From<Resolved> for Assign {
    fn from(resolved: Resolved) -> Self {
        match resolved {
            Resolved::Value(value) => Assign::Raw(value),
            Resolved::View(view) => Assign::View(view),
        }
    }
}

impl From<bool> for Assign {
    fn from(value: bool) -> Self {
        Assign::Raw(Value::Bool(value))
    }
}

impl From<i64> for Assign {
    fn from(value: i64) -> Self {
        Assign::Raw(Value::from(value))
    }
}

impl From<&str> for Assign {
    fn from(value: &str) -> Self {
        Assign::Raw(Value::from(value))
    }
}

impl From<String> for Assign {
    fn from(value: String) -> Self {
        Assign::Raw(Value::from(value))
    }
}

impl SettingsView {
    pub fn path(&self) -> &SettingsPath {
        &self.context.path
    }

    pub fn node_id(&self) -> NodeId {
        self.context.node
    }

    pub fn context(&self) -> &ProxyContext {
        &self.context
    }

    /// True once this view no longer reaches the store's live data: its node was
    /// replaced or removed, or the whole data set was replaced.
    pub fn is_detached(&self) -> bool {
        self.context.detached.get().is_some()
            || self.context.generation != self.shared.current_generation()
    }

    /// The underlying unproxied value, `None` if the node no longer exists.
    pub fn raw(&self) -> Option<Value> {
        let (tree, base) = self.location();
        let tree = read_lock(tree);
        resolve(&tree, base).cloned()
    }

    /// Keys of the underlying container (indexes for arrays).
    pub fn keys(&self) -> Vec<String> {
        let (tree, base) = self.location();
        let tree = read_lock(tree);
        match resolve(&tree, base) {
            Some(Value::Object(map)) => map.keys().cloned().collect(),
            Some(Value::Array(items)) => (0..items.len()).map(|i| i.to_string()).collect(),
            _ => Vec::new(),
        }
    }

    /// Look up `key`, falling back to the store's default-value provider on a miss.
    pub fn get(&self, key: &str) -> Option<Resolved> {
        let (tree, base) = self.location();
        let default = {
            let tree = read_lock(tree);
            let target = resolve(&tree, base)?;

            match lookup_key(target, key) {
                Some(value) if is_container(value) => {
                    return Some(Resolved::View(self.child(key)));
                }
                Some(value) => return Some(Resolved::Value(value.clone())),
                None => {}
            }

            let provider = self.shared.options.default_value.as_ref()?;
            let path = self.context.path.to_string();
            provider(&DefaultContext {
                target,
                key,
                root: &tree,
                path: &path,
            })?
        };

        match default {
            DefaultValue::Persist(value) if !self.shared.options.read_only => {
                self.persist_default(key, value)
            }
            other => Some(self.wrap_unstored(key, other.into_value())),
        }
    }

    /// Walk a dot-path relative to this view.
    pub fn get_path(&self, path: &str) -> Option<Resolved> {
        SettingsPath::parse(path)
            .segments()
            .iter()
            .try_fold(Resolved::View(self.clone()), |current, key| match current {
                Resolved::View(view) => view.get(key),
                Resolved::Value(_) => None,
            })
    }

    /// View of the container at a relative dot-path.
    pub fn view_at(&self, path: &str) -> Result<SettingsView, StoreError> {
        let absolute = || {
            let mut full = self.context.path.clone();
            for segment in SettingsPath::parse(path).segments() {
                full = full.child(segment);
            }
            full.to_string()
        };

        match self.get_path(path) {
            Some(Resolved::View(view)) => Ok(view),
            Some(Resolved::Value(_)) => Err(StoreError::NotAContainer(absolute())),
            None => Err(StoreError::PathNotFound(absolute())),
        }
    }

    /// Assign `key`, notifying listeners if the value actually changed.
    ///
    /// Returns `Ok(false)` when the current value already equals the new one.
    pub fn set(&self, key: &str, value: impl Into<Assign>) -> Result<bool, StoreError> {
        if self.shared.options.read_only {
            return Err(StoreError::ReadOnly);
        }

        // Unwrap before locking: the assigned view may share this tree.
        let value = value.into().into_raw()?;
        let path = self.context.path.child(key);
        let (tree, base) = self.location();

        {
            let mut tree = write_lock(tree);
            let target = resolve_mut(&mut tree, base)
                .ok_or_else(|| StoreError::PathNotFound(self.context.path.to_string()))?;
            let Change::Changed(previous) =
                assign_key(target, &self.context.path, key, value.clone())?
            else {
                self.shared.metrics.record_noop_write();
                return Ok(false);
            };
            self.release_subtree(&path, previous);
        }

        self.shared.metrics.record_write();
        tracing::trace!("Set {} = {}", path, value);
        self.shared.notify(self, &path, Some(value));
        Ok(true)
    }

    /// Remove `key`, notifying listeners with `None` if something was removed.
    pub fn delete(&self, key: &str) -> Result<bool, StoreError> {
        if self.shared.options.read_only {
            return Err(StoreError::ReadOnly);
        }

        let path = self.context.path.child(key);
        let (tree, base) = self.location();

        {
            let mut tree = write_lock(tree);
            let target = resolve_mut(&mut tree, base)
                .ok_or_else(|| StoreError::PathNotFound(self.context.path.to_string()))?;
            let Change::Changed(previous) = remove_key(target, &self.context.path, key)? else {
                self.shared.metrics.record_noop_write();
                return Ok(false);
            };
            self.release_subtree(&path, previous);
        }

        self.shared.metrics.record_delete();
        tracing::trace!("Deleted {}", path);
        self.shared.notify(self, &path, None);
        Ok(true)
    }

    /// Tree and path this view reads and writes: the live tree until the node is detached.
    fn location(&self) -> (&Arc<RwLock<Value>>, &SettingsPath) {
        match self.context.detached.get() {
            Some(detached) => (&detached.tree, &detached.path),
            None => (&self.tree, &self.context.path),
        }
    }

    fn child(&self, key: &str) -> SettingsView {
        let path = self.context.path.child(key);
        match self.context.detached.get() {
            Some(detached) => self.shared.detached_view(
                path,
                self.context.generation,
                Detached {
                    tree: Arc::clone(&detached.tree),
                    path: detached.path.child(key),
                },
            ),
            None => self
                .shared
                .view_for(&self.tree, self.context.generation, path),
        }
    }

    /// Containers that are not stored anywhere get a view over a tree of their own.
    fn wrap_unstored(&self, key: &str, value: Value) -> Resolved {
        if !is_container(&value) {
            return Resolved::Value(value);
        }

        Resolved::View(self.shared.detached_view(
            self.context.path.child(key),
            self.context.generation,
            Detached {
                tree: Arc::new(RwLock::new(value)),
                path: SettingsPath::root(),
            },
        ))
    }

    /// Detach the cached views at and below `path`, which held `previous` until now.
    fn release_subtree(&self, path: &SettingsPath, previous: Option<Value>) {
        if self.context.detached.get().is_none() {
            self.shared
                .forget_subtree(self.context.generation, path, previous);
        }
    }

    /// Write a default into the target without notifying, then read it back.
    fn persist_default(&self, key: &str, value: Value) -> Option<Resolved> {
        let (tree, base) = self.location();
        let rejected = {
            let mut tree = write_lock(tree);
            let target = resolve_mut(&mut tree, base)?;
            match target {
                Value::Object(map) => {
                    map.entry(key.to_string()).or_insert(value);
                    None
                }
                Value::Array(items) if key.parse::<usize>().ok() == Some(items.len()) => {
                    items.push(value);
                    None
                }
                _ => Some(value),
            }
        };

        if let Some(value) = rejected {
            return Some(self.wrap_unstored(key, value));
        }

        tracing::debug!("Persisted default for {}", self.context.path.child(key));

        let tree = read_lock(tree);
        let stored = resolve(&tree, base).and_then(|t| lookup_key(t, key))?;
        if is_container(stored) {
            drop(tree);
            Some(Resolved::View(self.child(key)))
        } else {
            Some(Resolved::Value(stored.clone()))
        }
    }
}

/// Outcome of a write into one container.
#[derive(Debug, PartialEq)]
pub(crate) enum Change {
    Unchanged,
    /// Carries the value that was there before, if any
    Changed(Option<Value>),
}

fn parse_index(parent: &SettingsPath, key: &str) -> Result<usize, StoreError> {
    key.parse::<usize>().map_err(|_| StoreError::InvalidIndex {
        path: parent.to_string(),
        key: key.to_string(),
    })
}

fn assign_key(
    target: &mut Value,
    parent: &SettingsPath,
    key: &str,
    value: Value,
) -> Result<Change, StoreError> {
    match target {
        Value::Object(map) => {
            if map.get(key) == Some(&value) {
                return Ok(Change::Unchanged);
            }
            Ok(Change::Changed(map.insert(key.to_string(), value)))
        }
        Value::Array(items) => {
            let index = parse_index(parent, key)?;
            match index.cmp(&items.len()) {
                Ordering::Less if items[index] == value => Ok(Change::Unchanged),
                Ordering::Less => Ok(Change::Changed(Some(mem::replace(
                    &mut items[index],
                    value,
                )))),
                Ordering::Equal => {
                    items.push(value);
                    Ok(Change::Changed(None))
                }
                Ordering::Greater => Err(StoreError::IndexOutOfBounds {
                    path: parent.to_string(),
                    index,
                    len: items.len(),
                }),
            }
        }
        _ => Err(StoreError::NotAContainer(parent.to_string())),
    }
}

/// Array slots are nulled rather than removed so later indexes stay put. Any
/// in-bounds slot counts as removed, even one that already held null.
fn remove_key(target: &mut Value, parent: &SettingsPath, key: &str) -> Result<Change, StoreError> {
    match target {
        Value::Object(map) => Ok(match map.shift_remove(key) {
            Some(previous) => Change::Changed(Some(previous)),
            None => Change::Unchanged,
        }),
        Value::Array(items) => match key.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
            Some(slot) => Ok(Change::Changed(Some(mem::replace(slot, Value::Null)))),
            None => Ok(Change::Unchanged),
        },
        _ => Err(StoreError::NotAContainer(parent.to_string())),
    }
}

impl fmt::Debug for SettingsView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsView")
            .field("path", &self.context.path.to_string())
            .field("node", &self.context.node)
            .field("generation", &self.context.generation)
            .field("detached", &self.context.detached.get().is_some())
            .finish()
    }
}
