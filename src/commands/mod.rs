//! Command handlers.
//!
//! - `io.rs`: import, export and column inspection

mod io;

use std::path::PathBuf;

pub use io::{cmd_columns, cmd_export, cmd_import};

/// Arguments of `bulkport import`.
#[derive(Debug)]
pub struct ImportArgs {
    /// CSV file to import.
    pub file: PathBuf,
    /// Entity type.
    pub entity_type: String,
    /// Update entities whose id already exists.
    pub update: bool,
    /// `HEADER=field` overrides.
    pub map: Vec<String>,
    /// Delimiter override.
    pub delimiter: Option<String>,
    /// Batch size override.
    pub batch_size: Option<usize>,
    /// Preference owner.
    pub user: String,
}

/// Arguments of `bulkport export`.
#[derive(Debug)]
pub struct ExportArgs {
    /// Output file.
    pub output: PathBuf,
    /// Entity type.
    pub entity_type: String,
    /// Comma-separated logical names.
    pub columns: Option<String>,
    /// Status filter.
    pub status: Vec<String>,
    /// Category filter.
    pub category_ids: Vec<u64>,
    /// Add metadata columns.
    pub include_meta: bool,
    /// Page size override.
    pub page_size: Option<usize>,
}
