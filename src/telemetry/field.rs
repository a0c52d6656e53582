//! Typed key/value attributes attached to telemetry events.

use std::borrow::Cow;

use serde_json::Value;

/// Keys the structured log record owns for its own metadata.
pub const RESERVED_KEYS: [&str; 4] = ["ts", "level", "caller", "msg"];

/// Prefix given to fields whose key collides with a reserved one.
const RESERVED_PREFIX: &str = "fields.";

/// A field value. Every variant converts losslessly into what each sink
/// expects, so no conversion can fail at emit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    String(String),
    Int(i64),
    Bool(bool),
    /// Rendered text of an error, including its source chain.
    Error(String),
}

impl FieldValue {
    /// Value as written to the structured log record.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::String(s) | FieldValue::Error(s) => Value::String(s.clone()),
            FieldValue::Int(i) => Value::from(*i),
            FieldValue::Bool(b) => Value::Bool(*b),
        }
    }

    /// Value as written to the string-valued APM property map.
    pub fn to_property(&self) -> String {
        match self {
            FieldValue::String(s) | FieldValue::Error(s) => s.clone(),
            FieldValue::Int(i) => i.to_string(),
            FieldValue::Bool(b) => b.to_string(),
        }
    }
}

/// A single named attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub key: String,
    pub value: FieldValue,
}

impl Field {
    pub fn new(key: impl Into<String>, value: FieldValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, FieldValue::String(value.into()))
    }

    pub fn int(key: impl Into<String>, value: i64) -> Self {
        Self::new(key, FieldValue::Int(value))
    }

    pub fn bool(key: impl Into<String>, value: bool) -> Self {
        Self::new(key, FieldValue::Bool(value))
    }

    /// Key the field is written under in every sink: its own key, or
    /// `fields.<key>` when that collides with [`RESERVED_KEYS`].
    pub fn record_key(&self) -> Cow<'_, str> {
        if RESERVED_KEYS.contains(&self.key.as_str()) {
            Cow::Owned(format!("{RESERVED_PREFIX}{}", self.key))
        } else {
            Cow::Borrowed(&self.key)
        }
    }

    /// Capture an error, rendering its `source()` chain joined by `": "`.
    pub fn error(key: impl Into<String>, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut text = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            text.push_str(": ");
            text.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::new(key, FieldValue::Error(text))
    }
}

impl From<(&str, &str)> for Field {
    fn from((key, value): (&str, &str)) -> Self {
        Field::string(key, value)
    }
}
