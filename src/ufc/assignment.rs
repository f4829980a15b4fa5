use serde::Serialize;

use super::VariationType;

/// Enum representing values assigned to a subject as a result of feature flag evaluation.
///
/// When serialized to JSON, serialized as a two-field object with `type` and `value`:
/// `{"type":"JSON","value":{"hello":"world"}}`.
#[derive(Debug, Serialize, PartialEq, Clone)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentValue {
    /// A string value.
    String(String),
    /// An integer value.
    Integer(i64),
    /// A numeric value (floating-point).
    Numeric(f64),
    /// A boolean value.
    Boolean(bool),
    /// Arbitrary JSON value.
    Json(serde_json::Value),
}

impl AssignmentValue {
    /// Variation type that produces this kind of value.
    pub fn variation_type(&self) -> VariationType {
        match self {
            AssignmentValue::String(_) => VariationType::String,
            AssignmentValue::Integer(_) => VariationType::Integer,
            AssignmentValue::Numeric(_) => VariationType::Numeric,
            AssignmentValue::Boolean(_) => VariationType::Boolean,
            AssignmentValue::Json(_) => VariationType::Json,
        }
    }

    /// Returns `true` for string values.
    pub fn is_string(&self) -> bool {
        self.as_str().is_some()
    }
    /// Return the value as `&str` if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AssignmentValue::String(s) => Some(s),
            _ => None,
        }
    }
    /// Return the value as `String` if it is a string.
    pub fn into_string(self) -> Option<String> {
        match self {
            AssignmentValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns `true` for integer values.
    pub fn is_integer(&self) -> bool {
        self.as_integer().is_some()
    }
    /// Return the value as `i64` if it is an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            AssignmentValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns `true` for numeric and integer values.
    pub fn is_numeric(&self) -> bool {
        self.as_numeric().is_some()
    }
    /// Return the value as `f64`. Integers are widened.
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            Self::Numeric(n) => Some(*n),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Returns `true` for boolean values.
    pub fn is_boolean(&self) -> bool {
        self.as_boolean().is_some()
    }
    /// Return the value as `bool` if it is a boolean.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            AssignmentValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns `true` for JSON values.
    pub fn is_json(&self) -> bool {
        self.as_json().is_some()
    }
    /// Return the parsed JSON value.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }
    /// Return the parsed JSON value, consuming `self`.
    pub fn into_json(self) -> Option<serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }
}
