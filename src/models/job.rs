//! Import and export job state.
//!
//! Jobs are plain serializable values: a client holds on to the value
//! returned by one batch and submits it again to run the next one.

use super::{ColumnMapping, Entity, EntityId, FieldValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// State of a resumable import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJob {
    /// Job identifier.
    pub id: Uuid,
    /// Registered entity type being imported.
    pub entity_type: String,
    /// Uploaded CSV file.
    pub file_path: PathBuf,
    /// Field delimiter byte.
    pub delimiter: u8,
    /// Byte offset the next batch starts reading from (0 = start of file).
    pub start_byte_offset: u64,
    /// Maximum rows per batch.
    pub batch_size: usize,
    /// Whether rows with an existing id update that entity.
    pub update_existing: bool,
    /// Header mapping confirmed before the first batch.
    pub column_mapping: ColumnMapping,
    /// File size recorded when the job was created.
    pub total_bytes: u64,
    /// Data rows consumed by previous batches.
    pub rows_read: usize,
}

impl ImportJob {
    /// Creates a job positioned at the start of `file_path`.
    #[must_use]
    pub fn new(
        entity_type: impl Into<String>,
        file_path: impl Into<PathBuf>,
        column_mapping: ColumnMapping,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            entity_type: entity_type.into(),
            file_path: file_path.into(),
            delimiter: b',',
            start_byte_offset: 0,
            batch_size: 30,
            update_existing: false,
            column_mapping,
            total_bytes: 0,
            rows_read: 0,
        }
    }

    /// Sets the delimiter.
    #[must_use]
    pub const fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Sets the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Enables or disables updating existing entities.
    #[must_use]
    pub const fn with_update_existing(mut self, update: bool) -> Self {
        self.update_existing = update;
        self
    }
}

/// Selectors restricting which entities are exported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportFilters {
    /// Allowed `status` values; empty allows all.
    #[serde(default)]
    pub statuses: Vec<String>,
    /// Required term ids per taxonomy field (`category_ids` -> `[3, 7]`).
    ///
    /// An entity matches a field if it carries any of the listed ids.
    #[serde(default)]
    pub terms: BTreeMap<String, Vec<u64>>,
    /// Explicit id allow-list; empty allows all.
    #[serde(default)]
    pub ids: Vec<EntityId>,
}

impl ExportFilters {
    /// Restricts the export to the given status.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.statuses.push(status.into());
        self
    }

    /// Restricts the export to entities tagged with `term_id` in `field`.
    #[must_use]
    pub fn with_term(mut self, field: impl Into<String>, term_id: u64) -> Self {
        self.terms.entry(field.into()).or_default().push(term_id);
        self
    }

    /// Returns `true` if `entity` passes every selector.
    #[must_use]
    pub fn matches(&self, entity: &Entity) -> bool {
        if !self.ids.is_empty() && !self.ids.contains(&entity.id) {
            return false;
        }
        if !self.statuses.is_empty()
            && !entity
                .status()
                .is_some_and(|s| self.statuses.iter().any(|want| want == s))
        {
            return false;
        }
        self.terms.iter().all(|(field, wanted)| {
            let held = term_ids(entity.field(field));
            wanted.iter().any(|id| held.contains(id))
        })
    }
}

/// Extracts term ids from a taxonomy field value.
#[must_use]
pub fn term_ids(value: Option<&FieldValue>) -> Vec<u64> {
    match value {
        Some(FieldValue::List(items)) => items
            .iter()
            .filter_map(|s| s.trim().parse().ok())
            .collect(),
        Some(FieldValue::Int(i)) => u64::try_from(*i).ok().into_iter().collect(),
        Some(FieldValue::Json(serde_json::Value::Array(items))) => {
            items.iter().filter_map(serde_json::Value::as_u64).collect()
        },
        _ => Vec::new(),
    }
}

/// A column as it appears in an export file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportColumn {
    /// Logical field name.
    pub logical_name: String,
    /// Header text.
    pub label: String,
}

/// State of a paged export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportJob {
    /// Job identifier.
    pub id: Uuid,
    /// Registered entity type being exported.
    pub export_type: String,
    /// Requested subset of logical columns; `None` exports every column.
    pub selected_columns: Option<Vec<String>>,
    /// Whether `meta:<key>` columns are generated from entity metadata.
    pub include_meta: bool,
    /// Entity selectors.
    pub filters: ExportFilters,
    /// Entities per page.
    pub page_size: usize,
    /// 1-based page the next batch exports.
    pub current_page: usize,
    /// Name of the file offered for download.
    pub filename: String,
    /// Columns resolved so far; grows when new metadata keys are discovered.
    pub columns: Vec<ExportColumn>,
    /// Rows written by previous batches.
    pub exported_rows: usize,
}

impl ExportJob {
    /// Creates a job for `export_type` starting at page 1.
    #[must_use]
    pub fn new(export_type: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            export_type: export_type.into(),
            selected_columns: None,
            include_meta: false,
            filters: ExportFilters::default(),
            page_size: 50,
            current_page: 1,
            filename: filename.into(),
            columns: Vec::new(),
            exported_rows: 0,
        }
    }

    /// Restricts the export to the given logical columns.
    #[must_use]
    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.selected_columns = Some(columns);
        self
    }

    /// Sets the entity selectors.
    #[must_use]
    pub fn with_filters(mut self, filters: ExportFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Sets the page size.
    #[must_use]
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Enables metadata columns.
    #[must_use]
    pub const fn with_meta(mut self, include: bool) -> Self {
        self.include_meta = include;
        self
    }
}
