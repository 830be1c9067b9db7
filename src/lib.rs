//! # Bulkport
//!
//! Resumable batch CSV import/export engine for content-management admin panels.
//!
//! Bulkport moves structured entities (listings, taxonomy terms, custom fields)
//! in and out of CSV files. Imports run in small, bounded batches so that a
//! client can drive a multi-thousand-row file through repeated requests, each
//! finishing inside a wall-clock and memory budget.
//!
//! ## Features
//!
//! - Header auto-detection with dynamic column families (`Meta: %s`)
//! - Typed field coercion (int, bool, float, date, JSON, lists, URLs)
//! - Byte-offset resumable reading with BOM and legacy-encoding tolerance
//! - Per-row skip/failure classification that never aborts a batch
//! - Paged export with taxonomy ancestor chains and formula-injection escaping
//! - Placeholder records for forward references, swept at completion
//!
//! ## Example
//!
//! ```rust,ignore
//! use bulkport::io::{EntityRegistry, ExtensionPoints, ImportEngine, ImportSession};
//!
//! let definition = EntityRegistry::builtin().get("listing")?;
//! let engine = ImportEngine::with_repository(definition, repo, terms, ExtensionPoints::new());
//! let mut session = ImportSession::new(engine, &config.import)?;
//! session.upload("products.csv".as_ref(), b',')?;
//! session.confirm_mapping(&Default::default(), false)?;
//! while !session.is_done() {
//!     let step = session.step()?;
//!     println!("{}%", step.percent);
//! }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod io;
pub mod models;
pub mod observability;
pub mod storage;

// Re-exports for convenience
pub use config::{BulkportConfig, ExportSettings, ImportSettings};
pub use models::{
    ColumnMapping, ColumnSpec, Entity, EntityId, ExportJob, FieldValue, ImportJob, ImportOutcome,
    MetaEntry, ParsedRow, RowError,
};

/// Error type for bulkport operations.
///
/// Row-level problems (duplicates, persistence failures for a single row)
/// are not errors at this level; they are collected as
/// [`RowError`] values inside an [`ImportOutcome`].
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Malformed arguments, bad mapping overrides |
/// | `OperationFailed` | File I/O, CSV decoding, SQLite queries fail |
/// | `EmptyFile` | Upload is missing, zero-length, or has no data rows |
/// | `UnsupportedFile` | Upload fails file-type validation |
/// | `Configuration` | Unknown entity type, missing resolver, ambiguous mapping |
/// | `InvalidTransition` | The batch controller is driven out of order |
/// | `NotFound` | A record that must exist is missing |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - Filesystem I/O errors occur while reading uploads or writing exports
    /// - The CSV reader or writer reports a malformed record
    /// - `SQLite` statements fail
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The uploaded file is missing, empty, or contains no data rows.
    ///
    /// This is a job-level fatal error, never "done".
    #[error("empty file: {0}")]
    EmptyFile(String),

    /// The uploaded file failed type validation.
    #[error("unsupported file: {0}")]
    UnsupportedFile(String),

    /// Job setup failed before any row was processed.
    ///
    /// Raised when:
    /// - The import or export type is not registered
    /// - A catalog column has no resolver and no fallback exists
    /// - Two headers map to the same field under the `reject` policy
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The batch controller received an action that is not valid in its
    /// current stage.
    #[error("cannot {action} while in stage '{from}'")]
    InvalidTransition {
        /// Stage the controller was in.
        from: String,
        /// Action that was attempted.
        action: String,
    },

    /// A record that must exist was not found.
    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Builds an [`Error::OperationFailed`] from any displayable cause.
    pub fn operation(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for bulkport operations.
pub type Result<T> = std::result::Result<T, Error>;
