//! Per-row import outcomes.

use super::EntityId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A skipped or failed row, tagged with its 1-based data row number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    /// 1-based data row number (the first row after the header is row 1).
    pub row: usize,
    /// Entity id supplied by the row, or [`EntityId::NONE`].
    pub id: EntityId,
    /// Human-readable reason.
    pub reason: String,
}

impl RowError {
    /// Creates a row error.
    #[must_use]
    pub fn new(row: usize, id: EntityId, reason: impl Into<String>) -> Self {
        Self {
            row,
            id,
            reason: reason.into(),
        }
    }

    /// Creates an error whose row number is filled in by the import engine.
    #[must_use]
    pub fn untagged(reason: impl Into<String>) -> Self {
        Self::new(0, EntityId::NONE, reason)
    }

    /// Sets the row number and id.
    #[must_use]
    pub const fn at(mut self, row: usize, id: EntityId) -> Self {
        self.row = row;
        if self.id.is_none() {
            self.id = id;
        }
        self
    }
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.id.is_none() {
            write!(f, "row {}: {}", self.row, self.reason)
        } else {
            write!(f, "row {} (id {}): {}", self.row, self.id, self.reason)
        }
    }
}

/// Successful result of persisting one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedItem {
    /// Id of the created or updated entity.
    pub id: EntityId,
    /// `true` if an existing entity was updated.
    pub updated: bool,
}

/// Outcome of one or more import batches.
///
/// Every parsed row lands in exactly one of the four buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOutcome {
    /// Ids of newly created entities.
    pub imported: Vec<EntityId>,
    /// Ids of updated entities.
    pub updated: Vec<EntityId>,
    /// Rows skipped by business rules.
    pub skipped: Vec<RowError>,
    /// Rows whose persistence or validation failed.
    pub failed: Vec<RowError>,
}

impl ImportOutcome {
    /// Creates an empty outcome.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            imported: Vec::new(),
            updated: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Records a persisted row.
    pub fn record(&mut self, item: ProcessedItem) {
        if item.updated {
            self.updated.push(item.id);
        } else {
            self.imported.push(item.id);
        }
    }

    /// Appends another batch's outcome to this one.
    pub fn merge(&mut self, other: Self) {
        self.imported.extend(other.imported);
        self.updated.extend(other.updated);
        self.skipped.extend(other.skipped);
        self.failed.extend(other.failed);
    }

    /// Total number of rows accounted for.
    #[must_use]
    pub fn total(&self) -> usize {
        self.imported.len() + self.updated.len() + self.skipped.len() + self.failed.len()
    }

    /// Returns `true` if no row failed.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_merge() {
        let mut first = ImportOutcome::new();
        first.record(ProcessedItem {
            id: EntityId::new(1),
            updated: false,
        });
        first
            .skipped
            .push(RowError::new(2, EntityId::new(9), "already exists"));

        let mut second = ImportOutcome::new();
        second.record(ProcessedItem {
            id: EntityId::new(3),
            updated: true,
        });
        second.failed.push(RowError::untagged("boom").at(4, EntityId::NONE));

        first.merge(second);
        assert_eq!(first.imported, vec![EntityId::new(1)]);
        assert_eq!(first.updated, vec![EntityId::new(3)]);
        assert_eq!(first.total(), 4);
        assert!(!first.is_successful());
        assert_eq!(first.failed[0].row, 4);
    }

    #[test]
    fn test_row_error_display() {
        let err = RowError::new(2, EntityId::new(9), "already exists");
        assert_eq!(err.to_string(), "row 2 (id 9): already exists");
        let err = RowError::new(5, EntityId::NONE, "missing title");
        assert_eq!(err.to_string(), "row 5: missing title");
    }
}
