use super::path::SettingsPath;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Rule for reporting deep mutations under a prefix as a change of their ancestor.
///
/// With the default rule (`plugins`, depth 3), a write to
/// `plugins.Foo.bar.nested.deep` is reported to global listeners as
/// `plugins.Foo.bar`, because consumers care that the `bar` setting changed,
/// not which field inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollapseRule {
    /// First segment a path must start with for the rule to apply
    pub prefix: String,

    /// Number of segments the path is collapsed to
    pub depth: usize,
}

impl Default for CollapseRule {
    fn default() -> Self {
        Self {
            prefix: "plugins".to_string(),
            depth: 3,
        }
    }
}

impl CollapseRule {
    /// Collapse `path` if it is strictly deeper than `depth` and starts with `prefix`.
    pub fn collapse(&self, path: &SettingsPath) -> Option<SettingsPath> {
        if path.len() > self.depth && path.first() == Some(self.prefix.as_str()) {
            Some(path.truncated(self.depth))
        } else {
            None
        }
    }
}

/// Everything a default-value provider gets to see about a missed lookup.
#[derive(Debug, Clone, Copy)]
pub struct DefaultContext<'a> {
    /// The container the key was looked up on
    pub target: &'a Value,

    /// The key that was missing
    pub key: &'a str,

    /// Root of the tree the target belongs to
    pub root: &'a Value,

    /// Dot-path of `target` (not including `key`)
    pub path: &'a str,
}

/// A synthesized value for a missing key.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    /// Returned to the reader, the plain tree is left untouched
    Transient(Value),

    /// Written into the target (without notifying) and then returned
    Persist(Value),
}

impl DefaultValue {
    pub fn value(&self) -> &Value {
        match self {
            DefaultValue::Transient(value) | DefaultValue::Persist(value) => value,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            DefaultValue::Transient(value) | DefaultValue::Persist(value) => value,
        }
    }
}

/// Callback invoked when a lookup through a view misses.
pub type DefaultValueFn = Arc<dyn Fn(&DefaultContext<'_>) -> Option<DefaultValue> + Send + Sync>;

/// Construction options for [`SettingsStore`](crate::store::SettingsStore).
#[derive(Clone)]
pub struct StoreOptions {
    /// Reject every mutation through views and every `set_data`
    pub read_only: bool,

    /// Collapse rule for global notifications, `None` disables collapsing
    pub collapse: Option<CollapseRule>,

    /// Buffer size of the change event broadcast channel
    pub event_capacity: usize,

    /// Fallback for missing keys
    pub default_value: Option<DefaultValueFn>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            collapse: Some(CollapseRule::default()),
            event_capacity: 100,
            default_value: None,
        }
    }
}

impl StoreOptions {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    pub fn with_default_value(mut self, provider: DefaultValueFn) -> Self {
        self.default_value = Some(provider);
        self
    }

    pub fn with_collapse(mut self, collapse: Option<CollapseRule>) -> Self {
        self.collapse = collapse;
        self
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("read_only", &self.read_only)
            .field("collapse", &self.collapse)
            .field("event_capacity", &self.event_capacity)
            .field("default_value", &self.default_value.is_some())
            .finish()
    }
}
