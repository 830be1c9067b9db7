//! Data models for bulkport.
//!
//! Plain data shared by the exchange engine, storage backends and the CLI.

mod column;
mod entity;
mod job;
mod outcome;
mod placeholder;
mod row;
mod value;

pub use column::{ColumnMapping, ColumnOption, ColumnSpec};
pub use entity::{Entity, PLACEHOLDER_STATUS, Record, Term};
pub use job::{ExportColumn, ExportFilters, ExportJob, ImportJob, term_ids};
pub use outcome::{ImportOutcome, ProcessedItem, RowError};
pub use placeholder::PlaceholderTable;
pub use row::{META_DATA_FIELD, ParsedRow};
pub use value::{DATETIME_FORMAT, EntityId, FieldValue, MetaEntry};
