//! Parsed CSV rows.

use super::{EntityId, FieldValue, MetaEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field name under which dynamic-family entries are aggregated.
pub const META_DATA_FIELD: &str = "meta_data";

/// A structured record keyed by logical field name.
///
/// Created fresh per data row by the row parser and consumed once by the
/// import engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedRow {
    fields: BTreeMap<String, FieldValue>,
}

impl ParsedRow {
    /// Creates a row from a prepared field map.
    #[must_use]
    pub const fn new(fields: BTreeMap<String, FieldValue>) -> Self {
        Self { fields }
    }

    /// Returns the value of a logical field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Returns `true` if the row carries `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Returns the row's `id` column, or [`EntityId::NONE`] if it is absent,
    /// non-numeric, or not positive.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.get("id")
            .and_then(FieldValue::as_int)
            .and_then(|i| u64::try_from(i).ok())
            .map_or(EntityId::NONE, EntityId::new)
    }

    /// Returns the aggregated dynamic-family entries.
    #[must_use]
    pub fn meta(&self) -> &[MetaEntry] {
        match self.fields.get(META_DATA_FIELD) {
            Some(FieldValue::Meta(entries)) => entries,
            _ => &[],
        }
    }

    /// Returns `true` if every field is empty.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.fields.values().all(FieldValue::is_empty)
    }

    /// Returns the underlying field map.
    #[must_use]
    pub const fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// Consumes the row, returning its field map.
    #[must_use]
    pub fn into_fields(self) -> BTreeMap<String, FieldValue> {
        self.fields
    }
}
