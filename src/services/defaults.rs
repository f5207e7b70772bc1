use crate::models::{DefaultContext, DefaultValue, DefaultValueFn};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;

/// One choice of a select-style setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub label: String,
    pub value: Value,
    #[serde(default)]
    pub default: bool,
}

/// Declared default of a single plugin setting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginSetting {
    #[serde(default)]
    pub default: Option<Value>,

    /// Choices of a select setting; the one flagged `default` is used when
    /// `default` itself is unset
    #[serde(default)]
    pub options: Vec<SelectOption>,
}

impl PluginSetting {
    pub fn with_default(value: Value) -> Self {
        Self {
            default: Some(value),
            options: Vec::new(),
        }
    }

    pub fn select(options: Vec<SelectOption>) -> Self {
        Self {
            default: None,
            options,
        }
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref().or_else(|| {
            self.options
                .iter()
                .find(|option| option.default)
                .map(|option| &option.value)
        })
    }
}

/// Everything the store needs to know about a plugin to synthesize its defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginDefinition {
    pub name: String,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub enabled_by_default: bool,

    #[serde(default)]
    pub settings: IndexMap<String, PluginSetting>,
}

impl PluginDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn enabled_by_default(mut self, enabled: bool) -> Self {
        self.enabled_by_default = enabled;
        self
    }

    pub fn setting(mut self, key: impl Into<String>, setting: PluginSetting) -> Self {
        self.settings.insert(key.into(), setting);
        self
    }

    /// Whether a plugin with no stored settings starts enabled
    pub fn starts_enabled(&self) -> bool {
        self.required || self.enabled_by_default
    }
}

/// Registry of plugin definitions used to fill in settings nobody has saved yet.
///
/// Turned into a store default-value provider with [`into_provider`](Self::into_provider):
/// reading `plugins.<name>` of a registered plugin materialises `{ "enabled": .. }`,
/// and reading `plugins.<name>.<setting>` materialises the declared default.
#[derive(Debug, Clone)]
pub struct PluginDefaults {
    prefix: String,
    plugins: IndexMap<String, PluginDefinition>,
}

impl Default for PluginDefaults {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginDefaults {
    pub fn new() -> Self {
        Self::with_prefix("plugins")
    }

    /// Use a different top-level key than `plugins`
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            plugins: IndexMap::new(),
        }
    }

    pub fn register(&mut self, definition: PluginDefinition) {
        if self.plugins.contains_key(&definition.name) {
            tracing::warn!("Plugin {} registered twice, replacing", definition.name);
        }
        self.plugins.insert(definition.name.clone(), definition);
    }

    pub fn get(&self, name: &str) -> Option<&PluginDefinition> {
        self.plugins.get(name)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Default for a missed lookup, if one of the registered plugins declares it
    pub fn default_for(&self, ctx: &DefaultContext<'_>) -> Option<DefaultValue> {
        if ctx.path == self.prefix {
            let plugin = self.plugins.get(ctx.key)?;
            return Some(DefaultValue::Persist(
                json!({ "enabled": plugin.starts_enabled() }),
            ));
        }

        let name = ctx.path.strip_prefix(self.prefix.as_str())?.strip_prefix('.')?;
        let setting = self.plugins.get(name)?.settings.get(ctx.key)?;
        setting
            .default_value()
            .cloned()
            .map(DefaultValue::Persist)
    }

    pub fn into_provider(self) -> DefaultValueFn {
        Arc::new(move |ctx: &DefaultContext<'_>| self.default_for(ctx))
    }
}

/// Recursively fill keys missing (or null) in `target` from `defaults`.
///
/// Existing non-null values always win. Nested objects are merged key by key;
/// arrays and primitives are copied whole.
pub fn merge_defaults(target: &mut Value, defaults: &Value) {
    let (Value::Object(target), Value::Object(defaults)) = (target, defaults) else {
        return;
    };

    for (key, default) in defaults {
        let slot = target.entry(key.clone()).or_insert(Value::Null);
        if default.is_object() {
            if slot.is_null() {
                *slot = Value::Object(Map::new());
            }
            merge_defaults(slot, default);
        } else if slot.is_null() {
            *slot = default.clone();
        }
    }
}
