use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Single model input cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    /// Numeric cell.
    Number(f64),
    /// Categorical cell.
    Text(String),
    /// Absent cell, rendered as JSON `null`.
    Missing,
}

/// Fixed-order model input row keyed by column name.
pub type FeatureRow = IndexMap<String, FeatureValue>;

impl FeatureValue {
    /// Numeric view of the cell: numbers as-is, text when it parses as a finite float.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value).filter(|v| v.is_finite()),
            Self::Text(text) => parse_finite(text),
            Self::Missing => None,
        }
    }

    /// Whether the cell is missing.
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Converts a JSON value without coercion.
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Missing,
            Value::Number(number) => number.as_f64().map_or(Self::Missing, Self::Number),
            other => render_text(other).map_or(Self::Missing, Self::Text),
        }
    }
}

/// Parses trimmed text into a finite float.
#[must_use]
pub fn parse_finite(text: &str) -> Option<f64> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

/// True for `null` and for strings that are empty after trimming.
#[must_use]
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

/// Coerces a JSON value to a finite float: numbers, numeric strings, booleans as 1/0.
#[must_use]
pub fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64().filter(|v| v.is_finite()),
        Value::String(text) => parse_finite(text),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Text rendering of a JSON value; `None` for `null`.
#[must_use]
pub fn render_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}
