//! Typed values mirrored through broker topics.
//!
//! Every synchronized variable declares a [`ValueKind`] and holds a [`Value`].
//! Inbound payloads are coerced to the declared kind; a payload that does not
//! parse falls back to the raw string so the mirror never crashes on bad data.

use serde::{Deserialize, Serialize};

/// Declared kind of a synchronized variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Int,
    Float,
    Boolean,
    Structured,
}

impl ValueKind {
    /// Returns a human-readable kind name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Structured => "structured",
        }
    }
}

/// Current value of a synchronized variable.
///
/// `Null` means no payload has been seen and no initial value was supplied.
/// After a successful decode the variant always matches the declared kind;
/// after a failed decode the variant is `Str` holding the raw payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Structured(serde_json::Value),
}

impl Value {
    /// Decode a raw broker payload according to the declared kind.
    ///
    /// Never fails: payloads that do not parse are kept as raw strings.
    pub fn decode(kind: ValueKind, raw: &str) -> Self {
        Self::decode_checked(kind, raw).0
    }

    /// Decode, also reporting whether the payload fell back to a raw string.
    pub(crate) fn decode_checked(kind: ValueKind, raw: &str) -> (Self, bool) {
        match kind {
            ValueKind::Int => match raw.trim().parse::<i64>() {
                Ok(n) => (Self::Int(n), false),
                Err(_) => (Self::Str(raw.to_string()), true),
            },
            ValueKind::Float => match raw.trim().parse::<f64>() {
                Ok(f) => (Self::Float(f), false),
                Err(_) => (Self::Str(raw.to_string()), true),
            },
            ValueKind::Boolean => {
                let truthy = raw.to_lowercase() == "true" || raw == "1";
                (Self::Bool(truthy), false)
            }
            ValueKind::Structured => match serde_json::from_str::<serde_json::Value>(raw) {
                Ok(doc) => (Self::Structured(doc), false),
                Err(_) => (Self::Str(raw.to_string()), true),
            },
            ValueKind::String => (Self::Str(raw.to_string()), false),
        }
    }

    /// Encode for publishing: structured values as serialized JSON, all other
    /// kinds via their string representation. `Null` encodes as the empty
    /// payload (which clears a retained slot on the broker).
    pub fn encode(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Str(s) => s.clone(),
            Self::Int(n) => n.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Structured(doc) => doc.to_string(),
        }
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub const fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Structured(doc) => Some(doc),
            _ => None,
        }
    }

    /// Structured array of strings, the shape of a list membership value.
    pub fn as_string_array(&self) -> Option<Vec<String>> {
        match self {
            Self::Structured(serde_json::Value::Array(items)) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Structured(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(names: Vec<String>) -> Self {
        Self::Structured(serde_json::Value::Array(
            names.into_iter().map(serde_json::Value::String).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_round_trip() {
        let val = Value::decode(ValueKind::Int, "42");
        assert_eq!(val, Value::Int(42));
        assert_eq!(val.encode(), "42");
    }

    #[test]
    fn test_float_round_trip() {
        let val = Value::decode(ValueKind::Float, "20.5");
        assert_eq!(val, Value::Float(20.5));
        assert_eq!(Value::decode(ValueKind::Float, &val.encode()), val);
    }

    #[test]
    fn test_boolean_coercion() {
        assert_eq!(Value::decode(ValueKind::Boolean, "true"), Value::Bool(true));
        assert_eq!(Value::decode(ValueKind::Boolean, "True"), Value::Bool(true));
        assert_eq!(Value::decode(ValueKind::Boolean, "1"), Value::Bool(true));
        assert_eq!(Value::decode(ValueKind::Boolean, "false"), Value::Bool(false));
        assert_eq!(Value::decode(ValueKind::Boolean, "yes"), Value::Bool(false));
    }

    #[test]
    fn test_boolean_round_trip() {
        let val = Value::decode(ValueKind::Boolean, "1");
        assert_eq!(Value::decode(ValueKind::Boolean, &val.encode()), val);
    }

    #[test]
    fn test_structured_round_trip_is_value_equal() {
        let val = Value::decode(ValueKind::Structured, r#"{"a": 1,   "b": [2, 3]}"#);
        let encoded = val.encode();
        assert_eq!(Value::decode(ValueKind::Structured, &encoded), val);
    }

    #[test]
    fn test_int_fallback_keeps_raw_string() {
        let (val, fell_back) = Value::decode_checked(ValueKind::Int, "not_a_number");
        assert!(fell_back);
        assert_eq!(val, Value::Str("not_a_number".to_string()));
    }

    #[test]
    fn test_float_fallback_keeps_raw_string() {
        let (val, fell_back) = Value::decode_checked(ValueKind::Float, "not_a_number");
        assert!(fell_back);
        assert_eq!(val, Value::Str("not_a_number".to_string()));
    }

    #[test]
    fn test_structured_fallback_keeps_raw_string() {
        let (val, fell_back) = Value::decode_checked(ValueKind::Structured, "{broken");
        assert!(fell_back);
        assert_eq!(val.as_str(), Some("{broken"));
    }

    #[test]
    fn test_string_array() {
        let val = Value::decode(ValueKind::Structured, r#"["cam1","cam2"]"#);
        assert_eq!(
            val.as_string_array(),
            Some(vec!["cam1".to_string(), "cam2".to_string()])
        );
        assert!(Value::Str("cam1".to_string()).as_string_array().is_none());
    }

    #[test]
    fn test_null_encodes_empty() {
        assert_eq!(Value::Null.encode(), "");
    }

    #[test]
    fn test_int_reads_as_float() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
    }
}
