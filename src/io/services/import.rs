//! Batch import engine.
//!
//! Each call to [`ImportEngine::import_batch`] reads at most `batch_size`
//! rows starting at the job's byte offset, classifies every row, and returns
//! the job advanced to the offset just past the last row it consumed.
//!
//! # Row gate
//!
//! | Condition | Result |
//! |-----------|--------|
//! | id exists, not updating | skipped: already exists |
//! | updating, id exists with another type | skipped: type mismatch |
//! | updating, id given but missing | skipped: no matching record to update |
//! | otherwise | persisted (create, update or placeholder fill) |

use crate::io::budget::{BudgetExceeded, ResourceBudget};
use crate::io::cursor::{CsvCursor, percent_complete};
use crate::io::entities::{EntityDefinition, RepositoryProcessor, family_targets};
use crate::io::extensions::{ExtensionPoints, JobKind, JobSummary};
use crate::io::formatter::FormatterRegistry;
use crate::io::mapper::{ColumnMapper, DuplicateColumnPolicy};
use crate::io::parser::{FamilyTarget, RowParser};
use crate::io::traits::{
    EntityRepository, ItemProcessor, JobPlaceholders, PlaceholderStore, ProcessContext, RowTarget,
    TaxonomyStore,
};
use crate::models::{
    ColumnMapping, ColumnSpec, EntityId, ImportJob, ImportOutcome, ParsedRow, RowError,
};
use crate::storage::MemoryPlaceholderStore;
use crate::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Result of one import batch.
#[derive(Debug, Clone, Serialize)]
pub struct ImportBatch {
    /// Outcome of the rows read by this batch only.
    pub outcome: ImportOutcome,
    /// Job state to submit for the next batch.
    pub job: ImportJob,
    /// Progress through the file, 0-100.
    pub percent: u8,
    /// `true` once the whole file has been consumed.
    pub done: bool,
    /// Set if the batch stopped early because a budget ran out.
    #[serde(skip)]
    pub stopped: Option<BudgetExceeded>,
    /// Data rows read by this batch.
    pub rows: usize,
}

/// Decision reached by the row gate.
enum Gate {
    Proceed(RowTarget),
    Skip(&'static str),
}

/// Drives resumable imports of one entity type.
///
/// Placeholder reservations are kept in a [`PlaceholderStore`], in process
/// memory unless [`with_placeholder_store`](Self::with_placeholder_store)
/// supplies one that outlives the engine.
pub struct ImportEngine {
    definition: Arc<EntityDefinition>,
    repository: Arc<dyn EntityRepository>,
    processor: Arc<dyn ItemProcessor>,
    placeholders: Arc<dyn PlaceholderStore>,
    extensions: ExtensionPoints,
    catalog: Vec<ColumnSpec>,
    formatters: FormatterRegistry,
    families: Vec<FamilyTarget>,
}

impl ImportEngine {
    /// Creates an engine with a custom persistence delegate.
    #[must_use]
    pub fn new(
        definition: Arc<EntityDefinition>,
        repository: Arc<dyn EntityRepository>,
        processor: Arc<dyn ItemProcessor>,
        extensions: ExtensionPoints,
    ) -> Self {
        let catalog = extensions.catalog(&definition.name, &definition.catalog);
        let formatters = extensions.formatters(&definition.formatters);
        let families = family_targets(&catalog);
        Self {
            definition,
            repository,
            processor,
            placeholders: Arc::new(MemoryPlaceholderStore::new()),
            extensions,
            catalog,
            formatters,
            families,
        }
    }

    /// Creates an engine persisting through [`RepositoryProcessor`].
    #[must_use]
    pub fn with_repository(
        definition: Arc<EntityDefinition>,
        repository: Arc<dyn EntityRepository>,
        terms: Arc<dyn TaxonomyStore>,
        extensions: ExtensionPoints,
    ) -> Self {
        let processor = Arc::new(RepositoryProcessor::new(
            Arc::clone(&definition),
            Arc::clone(&repository),
            terms,
        ));
        Self::new(definition, repository, processor, extensions)
    }

    /// Keeps placeholder reservations in `store`.
    #[must_use]
    pub fn with_placeholder_store(mut self, store: Arc<dyn PlaceholderStore>) -> Self {
        self.placeholders = store;
        self
    }

    /// The entity type this engine imports.
    #[must_use]
    pub fn definition(&self) -> &EntityDefinition {
        &self.definition
    }

    /// Builds the header mapper for the catalog in effect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the catalog is invalid.
    pub fn mapper(&self, policy: DuplicateColumnPolicy) -> Result<ColumnMapper> {
        Ok(ColumnMapper::new(&self.catalog)?.with_policy(policy))
    }

    /// Parses one raw record the way batches do.
    #[must_use]
    pub fn parse_row(&self, mapping: &ColumnMapping, cells: &[String]) -> ParsedRow {
        RowParser::new(mapping, &self.formatters, self.families.clone()).parse(cells)
    }

    /// Formatter bindings in effect, overrides applied.
    #[must_use]
    pub const fn formatters(&self) -> &FormatterRegistry {
        &self.formatters
    }

    /// Runs one batch.
    ///
    /// Row-level problems never fail the batch; they are collected in the
    /// returned outcome. The budget is checked after every row and stops
    /// the batch with the offset just past that row.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`] if the job is for another entity type
    /// - [`Error::EmptyFile`] if the upload is missing, empty, or has no
    ///   data rows
    /// - [`Error::OperationFailed`] if the file cannot be read
    #[instrument(
        skip(self, job, budget),
        fields(operation = "import.batch", job_id = %job.id, offset = job.start_byte_offset)
    )]
    pub fn import_batch(&self, job: &ImportJob, budget: &ResourceBudget) -> Result<ImportBatch> {
        let start = Instant::now();
        let result = self.run_batch(job.clone(), budget);

        let status = if result.is_ok() { "success" } else { "error" };
        metrics::counter!("bulkport_batches_total", "kind" => "import", "status" => status)
            .increment(1);
        metrics::histogram!("bulkport_batch_duration_ms", "kind" => "import")
            .record(start.elapsed().as_secs_f64() * 1000.0);

        if let Ok(batch) = &result {
            tracing::info!(
                rows = batch.rows,
                imported = batch.outcome.imported.len(),
                updated = batch.outcome.updated.len(),
                skipped = batch.outcome.skipped.len(),
                failed = batch.outcome.failed.len(),
                percent = batch.percent,
                next_offset = batch.job.start_byte_offset,
                "import batch finished"
            );
        }
        result
    }

    fn run_batch(&self, mut job: ImportJob, budget: &ResourceBudget) -> Result<ImportBatch> {
        if job.entity_type != self.definition.name {
            return Err(Error::Configuration(format!(
                "job imports '{}' but the engine handles '{}'",
                job.entity_type, self.definition.name
            )));
        }

        let mut cursor = CsvCursor::open(&job.file_path, job.delimiter)?;
        let file_size = cursor.file_size();
        if file_size == 0 {
            return Err(Error::EmptyFile(format!(
                "{} is missing or empty",
                job.file_path.display()
            )));
        }
        job.total_bytes = file_size;
        cursor.seek(job.start_byte_offset)?;
        job.start_byte_offset = cursor.offset();

        let parser = RowParser::new(&job.column_mapping, &self.formatters, self.families.clone());
        let limit = if job.batch_size == 0 {
            usize::MAX
        } else {
            job.batch_size
        };

        let placeholders = JobPlaceholders::new(self.placeholders.as_ref(), job.id);
        let mut outcome = ImportOutcome::new();
        let mut rows = 0;
        let mut stopped = None;
        while rows < limit {
            let Some(raw) = cursor.next_row()? else {
                break;
            };
            rows += 1;
            job.rows_read += 1;

            let parsed = parser.parse(&raw.cells);
            self.process_row(
                job.rows_read,
                &parsed,
                &job.entity_type,
                job.update_existing,
                placeholders,
                &mut outcome,
            );

            if let Some(reason) = budget.exceeded() {
                tracing::debug!(%reason, row = job.rows_read, "budget exhausted, stopping batch");
                stopped = Some(reason);
                break;
            }
        }

        let done = cursor.at_end()?;
        job.start_byte_offset = cursor.offset();
        if done && job.rows_read == 0 {
            return Err(Error::EmptyFile(format!(
                "{} has no data rows",
                job.file_path.display()
            )));
        }

        Ok(ImportBatch {
            outcome,
            percent: percent_complete(job.start_byte_offset, file_size),
            done,
            stopped,
            rows,
            job,
        })
    }

    /// Classifies one row into exactly one outcome bucket.
    fn process_row(
        &self,
        row_number: usize,
        parsed: &ParsedRow,
        entity_type: &str,
        update_existing: bool,
        placeholders: JobPlaceholders<'_>,
        outcome: &mut ImportOutcome,
    ) {
        let original = parsed.id();
        let label = if parsed.is_blank() {
            outcome
                .skipped
                .push(RowError::new(row_number, original, "empty row"));
            "skipped"
        } else {
            match self.gate(original, entity_type, update_existing, placeholders) {
                Ok(Gate::Skip(reason)) => {
                    outcome
                        .skipped
                        .push(RowError::new(row_number, original, reason));
                    "skipped"
                },
                Ok(Gate::Proceed(target)) => {
                    let mut ctx = ProcessContext {
                        entity_type,
                        target,
                        original_id: original,
                        placeholders,
                    };
                    match self.processor.process_item(parsed, &mut ctx) {
                        Ok(item) => {
                            outcome.record(item);
                            self.extensions.after_row(parsed, &item);
                            if item.updated { "updated" } else { "imported" }
                        },
                        Err(err) => {
                            outcome.failed.push(err.at(row_number, original));
                            "failed"
                        },
                    }
                },
                Err(err) => {
                    outcome
                        .failed
                        .push(RowError::new(row_number, original, err.to_string()));
                    "failed"
                },
            }
        };

        tracing::debug!(row = row_number, id = %original, outcome = label, "row processed");
        metrics::counter!("bulkport_import_rows_total", "outcome" => label).increment(1);
    }

    fn gate(
        &self,
        original: EntityId,
        entity_type: &str,
        update_existing: bool,
        placeholders: JobPlaceholders<'_>,
    ) -> Result<Gate> {
        let mut id = original;
        let allocated = if original.is_none() {
            None
        } else {
            placeholders.allocated(original)?
        };
        if let Some(allocated) = allocated {
            if self.repository.is_placeholder(allocated)? {
                return Ok(Gate::Proceed(RowTarget::Fill(allocated)));
            }
            id = allocated;
        }

        let exists = !id.is_none() && self.repository.exists(id)?;
        if exists && !update_existing {
            return Ok(Gate::Skip("already exists"));
        }
        if update_existing && exists {
            let actual = self.repository.type_of(id)?;
            if actual.as_deref() != Some(entity_type) {
                return Ok(Gate::Skip("type mismatch"));
            }
        }
        if update_existing && !id.is_none() && !exists {
            return Ok(Gate::Skip("no matching record to update"));
        }
        Ok(Gate::Proceed(if exists {
            RowTarget::Update(id)
        } else {
            RowTarget::Create
        }))
    }

    /// Cleans up after the last batch.
    ///
    /// Deletes placeholders that no row ever filled, drops the job's
    /// reservations, removes the uploaded file and notifies completion
    /// callbacks.
    ///
    /// # Errors
    ///
    /// Returns an error if a placeholder or the upload cannot be deleted.
    #[instrument(skip(self, job), fields(operation = "import.finalize", job_id = %job.id))]
    pub fn finalize(&self, job: &ImportJob) -> Result<JobSummary> {
        let mut swept = 0;
        for id in self.placeholders.unpromoted(job.id)? {
            if self.repository.is_placeholder(id)? {
                self.repository.delete(id)?;
                swept += 1;
            }
        }
        if swept > 0 {
            tracing::warn!(swept, "deleted placeholders that no row filled");
        }
        self.placeholders.forget_job(job.id)?;

        match std::fs::remove_file(&job.file_path) {
            Ok(()) => {},
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => return Err(Error::operation("remove_upload", e)),
        }

        let summary = JobSummary {
            kind: JobKind::Import,
            entity_type: job.entity_type.clone(),
            rows: job.rows_read,
            swept_placeholders: swept,
        };
        self.extensions.completed(&summary);
        Ok(summary)
    }
}
