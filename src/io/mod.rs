//! CSV exchange engine.
//!
//! Moves entities between storage and flat CSV files in bounded, resumable
//! batches.
//!
//! # Architecture
//!
//! | Layer | Modules |
//! |-------|---------|
//! | Reading | [`cursor`], [`validation`] |
//! | Interpreting | [`mapper`], [`parser`], [`formatter`], [`escape`] |
//! | Writing back | [`resolver`], [`escape`] |
//! | Entity types | [`entities`], [`extensions`] |
//! | Orchestration | [`services`] (engines and the batch controller) |
//! | Collaborators | [`traits`], [`budget`] |
//!
//! The engine never touches persistence directly: it talks to an
//! [`EntityRepository`], a [`TaxonomyStore`], a [`PlaceholderStore`] and, for
//! remembered mappings, a [`MappingPreferenceStore`]. See [`crate::storage`] for implementations.
//!
//! # Example
//!
//! ```rust,ignore
//! use bulkport::io::{EntityRegistry, ExtensionPoints, ImportEngine, ImportSession};
//!
//! let definition = EntityRegistry::builtin().get("listing")?;
//! let engine = ImportEngine::with_repository(definition, repo, terms, ExtensionPoints::new());
//! let mut session = ImportSession::new(engine, &config.import)?;
//! session.upload("listings.csv".as_ref(), b',')?;
//! session.confirm_mapping(&HashMap::new(), false)?;
//! while !session.is_done() {
//!     let step = session.step()?;
//!     println!("{}% ({} imported)", step.percent, step.imported_count);
//! }
//! ```

pub mod budget;
pub mod cursor;
pub mod entities;
pub mod escape;
pub mod extensions;
pub mod formatter;
pub mod mapper;
pub mod parser;
pub mod resolver;
pub mod services;
pub mod traits;
pub mod validation;

// Re-exports for convenience
pub use budget::{BudgetExceeded, ResourceBudget, SysinfoGauge};
pub use cursor::CsvCursor;
pub use entities::{EntityDefinition, EntityRegistry, RepositoryProcessor, listing};
pub use extensions::{ExtensionPoints, JobKind, JobSummary};
pub use formatter::{FormatterKind, FormatterRegistry};
pub use mapper::{ColumnMapper, DuplicateColumnPolicy};
pub use parser::RowParser;
pub use resolver::{Resolver, ResolverRegistry};
pub use services::{
    ExportBatch, ExportEngine, ExportSession, ExportStepResponse, HeaderChoice, ImportBatch,
    ImportEngine, ImportSession, ImportStepResponse, NextStep, Stage,
};
pub use traits::{
    EntityRepository, ItemProcessor, JobPlaceholders, MappingPreferenceStore, MemoryGauge,
    PlaceholderStore, ProcessContext, QueryPage, RowTarget, TaxonomyStore,
};
pub use validation::validate_upload;
