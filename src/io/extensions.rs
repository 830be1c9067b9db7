//! Hooks injected into the engine at construction time.

use super::formatter::{FormatterKind, FormatterRegistry};
use crate::models::{ColumnSpec, Entity, FieldValue, ParsedRow, ProcessedItem};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Edits an entity type's column catalog before mapping.
pub type CatalogOverride = Arc<dyn Fn(&str, &mut Vec<ColumnSpec>) + Send + Sync>;

/// Runs after a row was persisted.
pub type PostRowCallback = Arc<dyn Fn(&ParsedRow, &ProcessedItem) + Send + Sync>;

/// Supplies a column's export value ahead of the registered resolver.
///
/// Returning `None` falls through to the resolver.
pub type ColumnOverride = Arc<dyn Fn(&Entity) -> Option<FieldValue> + Send + Sync>;

/// Runs once when a job reaches `done`.
pub type CompletionCallback = Arc<dyn Fn(&JobSummary) + Send + Sync>;

/// Kind of finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// CSV import.
    Import,
    /// CSV export.
    Export,
}

/// Final figures handed to completion callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    /// Import or export.
    pub kind: JobKind,
    /// Entity type of the job.
    pub entity_type: String,
    /// Rows read (import) or written (export).
    pub rows: usize,
    /// Placeholders deleted at finalization.
    pub swept_placeholders: usize,
}

/// Engine extension points.
#[derive(Clone, Default)]
pub struct ExtensionPoints {
    formatter_overrides: FormatterRegistry,
    catalog_overrides: Vec<CatalogOverride>,
    post_row: Vec<PostRowCallback>,
    column_overrides: HashMap<String, ColumnOverride>,
    on_complete: Vec<CompletionCallback>,
}

impl fmt::Debug for ExtensionPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionPoints")
            .field("formatter_overrides", &self.formatter_overrides)
            .field("catalog_overrides", &self.catalog_overrides.len())
            .field("post_row", &self.post_row.len())
            .field("column_overrides", &self.column_overrides.keys())
            .field("on_complete", &self.on_complete.len())
            .finish()
    }
}

impl ExtensionPoints {
    /// Creates an empty set of hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the formatter for a field.
    #[must_use]
    pub fn with_formatter(mut self, field: impl Into<String>, kind: FormatterKind) -> Self {
        self.formatter_overrides.insert(field, kind);
        self
    }

    /// Adds a catalog override.
    #[must_use]
    pub fn with_catalog_override<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &mut Vec<ColumnSpec>) + Send + Sync + 'static,
    {
        self.catalog_overrides.push(Arc::new(f));
        self
    }

    /// Adds a post-row callback.
    #[must_use]
    pub fn with_post_row<F>(mut self, f: F) -> Self
    where
        F: Fn(&ParsedRow, &ProcessedItem) + Send + Sync + 'static,
    {
        self.post_row.push(Arc::new(f));
        self
    }

    /// Overrides the export value of a column.
    #[must_use]
    pub fn with_column_override<F>(mut self, logical_name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Entity) -> Option<FieldValue> + Send + Sync + 'static,
    {
        self.column_overrides.insert(logical_name.into(), Arc::new(f));
        self
    }

    /// Adds a completion callback.
    #[must_use]
    pub fn with_on_complete<F>(mut self, f: F) -> Self
    where
        F: Fn(&JobSummary) + Send + Sync + 'static,
    {
        self.on_complete.push(Arc::new(f));
        self
    }

    /// Returns `base` with the formatter overrides applied.
    #[must_use]
    pub fn formatters(&self, base: &FormatterRegistry) -> FormatterRegistry {
        let mut merged = base.clone();
        merged.extend(&self.formatter_overrides);
        merged
    }

    /// Returns `catalog` after every catalog override ran.
    #[must_use]
    pub fn catalog(&self, entity_type: &str, catalog: &[ColumnSpec]) -> Vec<ColumnSpec> {
        let mut columns = catalog.to_vec();
        for apply in &self.catalog_overrides {
            apply(entity_type, &mut columns);
        }
        columns
    }

    /// Notifies post-row callbacks.
    pub fn after_row(&self, row: &ParsedRow, item: &ProcessedItem) {
        for callback in &self.post_row {
            callback(row, item);
        }
    }

    /// Returns the override value for a column, if one applies.
    #[must_use]
    pub fn column_value(&self, logical_name: &str, entity: &Entity) -> Option<FieldValue> {
        self.column_overrides
            .get(logical_name)
            .and_then(|callback| callback(entity))
    }

    /// Returns `true` if `logical_name` has an override callback.
    #[must_use]
    pub fn has_column_override(&self, logical_name: &str) -> bool {
        self.column_overrides.contains_key(logical_name)
    }

    /// Notifies completion callbacks.
    pub fn completed(&self, summary: &JobSummary) {
        for callback in &self.on_complete {
            callback(summary);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityId, Record};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_formatter_overrides_win() {
        let base = FormatterRegistry::new().with("price", FormatterKind::Clean);
        let hooks = ExtensionPoints::new().with_formatter("price", FormatterKind::Float);
        assert_eq!(hooks.formatters(&base).formatter_for("price").name(), "float");
    }

    #[test]
    fn test_catalog_override_sees_entity_type() {
        let hooks = ExtensionPoints::new().with_catalog_override(|entity_type, columns| {
            if entity_type == "listing" {
                columns.push(ColumnSpec::new("sku", "SKU"));
            }
        });
        let base = vec![ColumnSpec::new("id", "ID")];
        assert_eq!(hooks.catalog("listing", &base).len(), 2);
        assert_eq!(hooks.catalog("term", &base).len(), 1);
    }

    #[test]
    fn test_callbacks_fire() {
        let rows = Arc::new(AtomicUsize::new(0));
        let seen = rows.clone();
        let hooks = ExtensionPoints::new()
            .with_post_row(move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .with_column_override("title", |e| {
                (e.id.get() == 1).then(|| FieldValue::from("overridden"))
            });

        hooks.after_row(
            &ParsedRow::default(),
            &ProcessedItem {
                id: EntityId::new(1),
                updated: false,
            },
        );
        assert_eq!(rows.load(Ordering::SeqCst), 1);

        let one = Entity::new(EntityId::new(1), "listing", Record::new());
        let two = Entity::new(EntityId::new(2), "listing", Record::new());
        assert_eq!(hooks.column_value("title", &one), Some(FieldValue::from("overridden")));
        assert_eq!(hooks.column_value("title", &two), None);
    }
}
