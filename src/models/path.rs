use serde_json::Value;
use std::fmt;

/// Dot-separated location inside a settings tree.
///
/// The empty string is the root path (no segments). Segments are kept verbatim,
/// so `"plugins.Foo.enabled"` parses into `["plugins", "Foo", "enabled"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SettingsPath {
    segments: Vec<String>,
}

impl SettingsPath {
    /// The root of the tree.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dot-joined path. An empty string yields the root path.
    pub fn parse(path: &str) -> Self {
        if path.is_empty() {
            return Self::root();
        }
        Self {
            segments: path.split('.').map(str::to_string).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn first(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    /// Path of a direct child of this path.
    pub fn child(&self, key: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(key.to_string());
        Self { segments }
    }

    /// Keep only the first `len` segments.
    pub fn truncated(&self, len: usize) -> Self {
        Self {
            segments: self.segments.iter().take(len).cloned().collect(),
        }
    }
}

impl fmt::Display for SettingsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl From<&str> for SettingsPath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

/// Look up one key on a container value.
///
/// Objects are indexed by key, arrays by decimal index. Primitives have no children.
pub fn lookup_key<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Mutable counterpart of [`lookup_key`].
pub fn lookup_key_mut<'a>(value: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
        _ => None,
    }
}

/// Resolve a path from `root`, returning `None` if any segment is missing.
pub fn resolve<'a>(root: &'a Value, path: &SettingsPath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(root, |node, key| lookup_key(node, key))
}

pub fn resolve_mut<'a>(root: &'a mut Value, path: &SettingsPath) -> Option<&'a mut Value> {
    path.segments()
        .iter()
        .try_fold(root, |node, key| lookup_key_mut(node, key))
}

/// True for values that get wrapped in a view on read (objects and arrays).
pub fn is_container(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}
