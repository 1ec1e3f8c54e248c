use serde::{Deserialize, Serialize};
use serde_json::map::Entry;
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};

/// Opaque option map handed to the diagram compiler.
///
/// Recognized keys (`theme`, `securityLevel`, per-diagram sections such as `flowchart.padding`)
/// are only read for convenience; the whole map is forwarded to the compiler untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigMap(Value);

impl Default for ConfigMap {
    fn default() -> Self {
        Self::empty_object()
    }
}

impl ConfigMap {
    pub fn empty_object() -> Self {
        Self(Value::Object(Map::new()))
    }

    /// Defaults applied before any caller configuration.
    pub fn engine_defaults() -> Self {
        Self(json!({
            "startOnLoad": false,
            "theme": "default",
            "securityLevel": "loose",
            "fontFamily": "ui-sans-serif, system-ui, sans-serif",
            "flowchart": {
                "useMaxWidth": true,
                "htmlLabels": true,
                "curve": "basis",
                "padding": 15
            },
            "sequence": {
                "useMaxWidth": true,
                "wrap": true
            }
        }))
    }

    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text).map_err(|err| Error::InvalidConfigJson {
            message: err.to_string(),
        })?;
        if !value.is_object() {
            return Err(Error::ConfigNotObject {
                found: kind_name(&value),
            });
        }
        Ok(Self(value))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn get(&self, dotted_path: &str) -> Option<&Value> {
        let mut cur = &self.0;
        for segment in dotted_path.split('.') {
            cur = cur.as_object()?.get(segment)?;
        }
        Some(cur)
    }

    pub fn get_str(&self, dotted_path: &str) -> Option<&str> {
        self.get(dotted_path)?.as_str()
    }

    pub fn get_bool(&self, dotted_path: &str) -> Option<bool> {
        self.get(dotted_path)?.as_bool()
    }

    pub fn get_f64(&self, dotted_path: &str) -> Option<f64> {
        self.get(dotted_path)?.as_f64()
    }

    pub fn theme(&self) -> Option<&str> {
        self.get_str("theme")
    }

    pub fn security_level(&self) -> Option<&str> {
        self.get_str("securityLevel")
    }

    /// Sets one option by dotted path, e.g. `("flowchart.padding", json!(30))`.
    ///
    /// Missing or non-object parents are replaced by objects. An object `value` is merged into an
    /// existing object at the same path rather than replacing it.
    pub fn set_option(&mut self, dotted_path: &str, value: Value) -> Result<()> {
        if !self.0.is_object() {
            return Err(Error::ConfigNotObject {
                found: kind_name(&self.0),
            });
        }
        let patch = dotted_path.rsplit('.').fold(value, |inner, segment| {
            let mut table = Map::new();
            table.insert(segment.to_string(), inner);
            Value::Object(table)
        });
        merge_into(&mut self.0, &patch);
        Ok(())
    }

    /// Merges `other` into this map. Objects merge key by key; anything else replaces.
    pub fn deep_merge(&mut self, other: &Value) {
        merge_into(&mut self.0, other);
    }

    /// Returns `self` with `overrides` merged on top, leaving `self` untouched.
    pub fn merged(&self, overrides: &ConfigMap) -> ConfigMap {
        let mut out = self.clone();
        out.deep_merge(overrides.as_value());
        out
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn merge_into(base: &mut Value, overrides: &Value) {
    match (base.as_object_mut(), overrides.as_object()) {
        (Some(base_table), Some(override_table)) => {
            for (key, value) in override_table {
                match base_table.entry(key.as_str()) {
                    Entry::Occupied(mut slot) => merge_into(slot.get_mut(), value),
                    Entry::Vacant(slot) => {
                        slot.insert(value.clone());
                    }
                }
            }
        }
        _ => *base = overrides.clone(),
    }
}
