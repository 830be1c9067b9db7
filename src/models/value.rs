//! Typed cell values and entity identifiers.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical datetime rendering used on export.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Identifier of a persisted entity.
///
/// `0` is reserved for "no id supplied".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// The "absent" id.
    pub const NONE: Self = Self(0);

    /// Creates a new entity ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw numeric id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns `true` if this is the reserved "absent" id.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// One `{key, value}` pair of arbitrary entity metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaEntry {
    /// Metadata key (the suffix of a `meta:<key>` column).
    pub key: String,
    /// Formatted value.
    pub value: FieldValue,
}

impl MetaEntry {
    /// Creates a new metadata entry.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A typed value produced by a field formatter or stored on an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    /// Free text.
    Text(String),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Boolean flag.
    Bool(bool),
    /// Date and time without zone.
    DateTime(NaiveDateTime),
    /// List of plain strings.
    List(Vec<String>),
    /// Arbitrary nested JSON structure.
    Json(serde_json::Value),
    /// Aggregated dynamic-family entries (`meta_data`).
    Meta(Vec<MetaEntry>),
}

impl FieldValue {
    /// Returns the value as an integer if it is one, or text that parses as one.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Returns the text content of a `Text` value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns `true` for values that render to a single CSV cell unchanged.
    #[must_use]
    pub const fn is_scalar(&self) -> bool {
        matches!(
            self,
            Self::Text(_) | Self::Int(_) | Self::Float(_) | Self::Bool(_)
        )
    }

    /// Returns `true` for empty text and empty collections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Meta(entries) => entries.is_empty(),
            Self::Json(v) => v.is_null(),
            _ => false,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for FieldValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_none() {
        assert!(EntityId::NONE.is_none());
        assert!(!EntityId::new(7).is_none());
        assert_eq!(EntityId::new(7).to_string(), "7");
    }

    #[test]
    fn test_as_int_parses_text() {
        assert_eq!(FieldValue::from(" 42 ").as_int(), Some(42));
        assert_eq!(FieldValue::Int(3).as_int(), Some(3));
        assert_eq!(FieldValue::from("abc").as_int(), None);
        assert_eq!(FieldValue::Bool(true).as_int(), None);
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_string(&FieldValue::Int(5)).unwrap();
        assert_eq!(json, r#"{"type":"int","value":5}"#);
        let back: FieldValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, FieldValue::Int(5));
    }
}
