//! JSON model-config override forwarded as `--override-model-config`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A JSON object overriding model construction parameters.
///
/// The text the object was parsed from is kept and emitted unchanged, so
/// `{"use_codebook":true}` reaches the entry point byte for byte.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelOverride {
    raw: String,
    fields: Map<String, Value>,
}

impl ModelOverride {
    /// Parse an override from JSON text. The text must encode an object.
    pub fn parse(raw: &str) -> Result<Self, OverrideError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| OverrideError::Json(e.to_string()))?;
        match value {
            Value::Object(fields) => Ok(Self {
                raw: raw.to_string(),
                fields,
            }),
            other => Err(OverrideError::NotAnObject(kind(&other))),
        }
    }

    /// Build an override from an already-parsed object, rendered as compact JSON.
    #[must_use]
    pub fn from_map(fields: Map<String, Value>) -> Self {
        let raw = Value::Object(fields.clone()).to_string();
        Self { raw, fields }
    }

    /// The argument token passed to the entry point.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Whether the override turns on the codebook module.
    #[must_use]
    pub fn use_codebook(&self) -> bool {
        self.flag("use_codebook")
    }

    /// Whether the override turns on SPARO attention.
    #[must_use]
    pub fn use_sparo(&self) -> bool {
        self.flag("use_sparo")
    }

    fn flag(&self, key: &str) -> bool {
        self.fields.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Problems model construction will reject.
    ///
    /// Key semantics belong to the training framework, so these are
    /// advisory: callers log them and still launch.
    #[must_use]
    pub fn lint(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for key in ["use_codebook", "use_sparo", "share_kv", "share_queries"] {
            if let Some(v) = self.fields.get(key)
                && !v.is_boolean()
            {
                warnings.push(format!("`{key}` should be a boolean, got {}", kind(v)));
            }
        }

        for key in ["num_codes", "bottleneck_dim", "L", "V"] {
            if let Some(v) = self.fields.get(key)
                && !v.is_null()
                && !v.as_u64().is_some_and(|n| n > 0)
            {
                warnings.push(format!("`{key}` should be a positive integer, got {v}"));
            }
        }

        if self.use_sparo() && self.use_codebook() {
            warnings.push("SPARO and codebook cannot be enabled together".to_string());
        }

        warnings
    }
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl std::fmt::Display for ModelOverride {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for ModelOverride {
    type Err = OverrideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ModelOverride {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

/// Accepts either JSON text or an inline table/object.
impl<'de> Deserialize<'de> for ModelOverride {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::String(raw) => Self::parse(&raw).map_err(serde::de::Error::custom),
            Value::Object(fields) => Ok(Self::from_map(fields)),
            other => Err(serde::de::Error::custom(OverrideError::NotAnObject(kind(
                &other,
            )))),
        }
    }
}

/// Errors from parsing a model-config override.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OverrideError {
    #[error("model config override is not valid JSON: {0}")]
    Json(String),
    #[error("model config override must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}
