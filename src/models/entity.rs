//! Persisted entities and taxonomy terms.

use super::{EntityId, FieldValue, META_DATA_FIELD, MetaEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field map handed to and returned from the entity repository.
pub type Record = BTreeMap<String, FieldValue>;

/// Status given to placeholder records until they are filled.
pub const PLACEHOLDER_STATUS: &str = "importing";

/// A persisted entity as seen by the exchange engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Repository id.
    pub id: EntityId,
    /// Registered entity type (`listing`, `email_template`, ...).
    pub entity_type: String,
    /// Whether this record only reserves an id for a forward reference.
    pub placeholder: bool,
    /// Field values keyed by logical name.
    pub fields: Record,
}

impl Entity {
    /// Creates an entity.
    #[must_use]
    pub fn new(id: EntityId, entity_type: impl Into<String>, fields: Record) -> Self {
        Self {
            id,
            entity_type: entity_type.into(),
            placeholder: false,
            fields,
        }
    }

    /// Returns a field value.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Returns the `status` field as text.
    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.field("status").and_then(FieldValue::as_text)
    }

    /// Returns the entity's metadata entries.
    #[must_use]
    pub fn meta(&self) -> &[MetaEntry] {
        match self.fields.get(META_DATA_FIELD) {
            Some(FieldValue::Meta(entries)) => entries,
            _ => &[],
        }
    }

    /// Returns one metadata value by key.
    #[must_use]
    pub fn meta_value(&self, key: &str) -> Option<&FieldValue> {
        self.meta().iter().find(|e| e.key == key).map(|e| &e.value)
    }

    /// Merges `update` into this entity.
    ///
    /// Scalar fields are replaced; metadata entries are upserted by key.
    pub fn merge(&mut self, update: Record) {
        for (name, value) in update {
            match (name.as_str(), value) {
                (META_DATA_FIELD, FieldValue::Meta(entries)) => self.upsert_meta(entries),
                (_, value) => {
                    self.fields.insert(name, value);
                },
            }
        }
    }

    fn upsert_meta(&mut self, entries: Vec<MetaEntry>) {
        let slot = self
            .fields
            .entry(META_DATA_FIELD.to_string())
            .or_insert_with(|| FieldValue::Meta(Vec::new()));
        if !matches!(slot, FieldValue::Meta(_)) {
            *slot = FieldValue::Meta(Vec::new());
        }
        if let FieldValue::Meta(existing) = slot {
            for entry in entries {
                match existing.iter_mut().find(|e| e.key == entry.key) {
                    Some(current) => current.value = entry.value,
                    None => existing.push(entry),
                }
            }
        }
    }
}

/// A taxonomy term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    /// Term id.
    pub id: u64,
    /// Taxonomy the term belongs to (`category`, `tag`).
    pub taxonomy: String,
    /// Display name.
    pub name: String,
    /// Parent term id for hierarchical taxonomies.
    pub parent: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_upserts_meta() {
        let mut entity = Entity::new(
            EntityId::new(1),
            "listing",
            Record::from([
                ("title".to_string(), FieldValue::from("Old")),
                (
                    META_DATA_FIELD.to_string(),
                    FieldValue::Meta(vec![MetaEntry::new("color", "red")]),
                ),
            ]),
        );

        entity.merge(Record::from([
            ("title".to_string(), FieldValue::from("New")),
            (
                META_DATA_FIELD.to_string(),
                FieldValue::Meta(vec![
                    MetaEntry::new("color", "blue"),
                    MetaEntry::new("size", "L"),
                ]),
            ),
        ]));

        assert_eq!(entity.field("title"), Some(&FieldValue::from("New")));
        assert_eq!(entity.meta_value("color"), Some(&FieldValue::from("blue")));
        assert_eq!(entity.meta_value("size"), Some(&FieldValue::from("L")));
        assert_eq!(entity.meta().len(), 2);
    }
}
