//! Paged export engine.
//!
//! Rows are appended to a body file one page per call. The header row is
//! only known once every page has been seen (metadata columns are discovered
//! as entities are read), so the final file is assembled when the last page
//! completes: UTF-8 BOM, header row, then the body.

use crate::io::entities::EntityDefinition;
use crate::io::escape::format_cell;
use crate::io::extensions::{ExtensionPoints, JobKind, JobSummary};
use crate::io::traits::{EntityRepository, TaxonomyStore};
use crate::models::{ColumnSpec, Entity, ExportColumn, ExportJob, FieldValue};
use crate::{Error, Result};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Byte-order mark written at the start of every export.
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Result of one export batch.
#[derive(Debug, Clone, Serialize)]
pub struct ExportBatch {
    /// Job state to submit for the next batch.
    pub job: ExportJob,
    /// Rows written by this batch.
    pub rows: usize,
    /// Entities matching the job's filters.
    pub total: usize,
    /// Page-weighted progress, 0-100.
    pub percent: u8,
    /// `true` once the last page was written.
    pub done: bool,
    /// Finished file, set when `done`.
    pub download: Option<PathBuf>,
}

/// Drives paged exports of one entity type.
pub struct ExportEngine {
    definition: Arc<EntityDefinition>,
    repository: Arc<dyn EntityRepository>,
    terms: Arc<dyn TaxonomyStore>,
    extensions: ExtensionPoints,
    catalog: Vec<ColumnSpec>,
    output_dir: PathBuf,
}

impl ExportEngine {
    /// Creates an engine writing into `output_dir`.
    #[must_use]
    pub fn new(
        definition: Arc<EntityDefinition>,
        repository: Arc<dyn EntityRepository>,
        terms: Arc<dyn TaxonomyStore>,
        extensions: ExtensionPoints,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        let catalog = extensions.catalog(&definition.name, &definition.catalog);
        Self {
            definition,
            repository,
            terms,
            extensions,
            catalog,
            output_dir: output_dir.into(),
        }
    }

    /// Exports one page.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`] if the job is for another type or a
    ///   requested column cannot be resolved
    /// - [`Error::InvalidInput`] if the filename is not a plain file name
    /// - [`Error::OperationFailed`] if the repository or output file fails
    #[instrument(
        skip(self, job),
        fields(operation = "export.batch", job_id = %job.id, page = job.current_page)
    )]
    pub fn export_batch(&self, job: &ExportJob) -> Result<ExportBatch> {
        let start = Instant::now();
        let result = self.run_batch(job.clone());

        let status = if result.is_ok() { "success" } else { "error" };
        metrics::counter!("bulkport_batches_total", "kind" => "export", "status" => status)
            .increment(1);
        metrics::histogram!("bulkport_batch_duration_ms", "kind" => "export")
            .record(start.elapsed().as_secs_f64() * 1000.0);

        if let Ok(batch) = &result {
            tracing::info!(
                rows = batch.rows,
                total = batch.total,
                percent = batch.percent,
                done = batch.done,
                "export batch finished"
            );
        }
        result
    }

    /// Runs every page and returns the finished file's bytes.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by [`Self::export_batch`], or an
    /// error if the finished file cannot be read.
    pub fn export_all(&self, job: &ExportJob) -> Result<Vec<u8>> {
        let mut batch = self.export_batch(job)?;
        while !batch.done {
            batch = self.export_batch(&batch.job)?;
        }
        let path = batch
            .download
            .ok_or_else(|| Error::NotFound(format!("export file for job {}", job.id)))?;
        std::fs::read(&path).map_err(|e| Error::operation("read_export", e))
    }

    /// Resolves the columns a job exports, in catalog order.
    ///
    /// A selected name outside the catalog is kept as its own column; the
    /// family's bare logical name (`meta`) switches metadata columns on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming a column without a resolver.
    pub fn resolve_columns(&self, job: &ExportJob) -> Result<(Vec<ExportColumn>, bool)> {
        let mut include_meta = job.include_meta;
        let fixed = self.catalog.iter().filter(|spec| !spec.is_dynamic_family);

        let columns: Vec<ExportColumn> = match &job.selected_columns {
            None => fixed.map(export_column).collect(),
            Some(selected) => {
                let mut columns: Vec<ExportColumn> = fixed
                    .filter(|spec| selected.contains(&spec.logical_name))
                    .map(export_column)
                    .collect();
                for name in selected {
                    if let Some(family) = self.family_named(name) {
                        include_meta |= family.family_prefix.is_some();
                    } else if !columns.iter().any(|c| &c.logical_name == name) {
                        columns.push(self.column_for(name));
                    }
                }
                columns
            },
        };

        for column in &columns {
            if !self.extensions.has_column_override(&column.logical_name)
                && self.definition.resolvers.get(&column.logical_name).is_none()
            {
                return Err(Error::Configuration(format!(
                    "no resolver for column '{}'",
                    column.logical_name
                )));
            }
        }
        Ok((columns, include_meta))
    }

    fn family_named(&self, name: &str) -> Option<&ColumnSpec> {
        self.catalog
            .iter()
            .find(|spec| spec.is_dynamic_family && spec.logical_name == name)
    }

    /// Builds a column for a name outside the fixed catalog.
    fn column_for(&self, logical_name: &str) -> ExportColumn {
        let label = self
            .catalog
            .iter()
            .filter(|spec| spec.is_dynamic_family)
            .find_map(|spec| {
                let prefix = spec.family_prefix.as_deref()?;
                logical_name
                    .strip_prefix(prefix)
                    .map(|suffix| spec.label_for(suffix))
            })
            .unwrap_or_else(|| logical_name.to_string());
        ExportColumn {
            logical_name: logical_name.to_string(),
            label,
        }
    }

    fn value(&self, logical_name: &str, entity: &Entity) -> Result<FieldValue> {
        match self.extensions.column_value(logical_name, entity) {
            Some(value) => Ok(value),
            None => self
                .definition
                .resolvers
                .resolve(logical_name, entity, self.terms.as_ref()),
        }
    }

    fn paths(&self, job: &ExportJob) -> Result<(PathBuf, PathBuf)> {
        let filename = Path::new(&job.filename)
            .file_name()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                Error::InvalidInput(format!("'{}' is not a file name", job.filename))
            })?;
        Ok((
            self.output_dir.join(format!(".{}.body", job.id)),
            self.output_dir.join(filename),
        ))
    }

    fn run_batch(&self, mut job: ExportJob) -> Result<ExportBatch> {
        if job.export_type != self.definition.name {
            return Err(Error::Configuration(format!(
                "job exports '{}' but the engine handles '{}'",
                job.export_type, self.definition.name
            )));
        }
        let (body_path, final_path) = self.paths(&job)?;

        // Pages are 1-based; the column list may legitimately stay empty.
        let first_page = job.current_page <= 1;
        if first_page {
            let (columns, include_meta) = self.resolve_columns(&job)?;
            job.columns = columns;
            job.include_meta = include_meta;
            job.current_page = 1;
            job.exported_rows = 0;
            std::fs::create_dir_all(&self.output_dir)
                .map_err(|e| Error::operation("create_export_dir", e))?;
        }

        let page_size = job.page_size.max(1);
        let page = self.repository.query(
            &job.export_type,
            &job.filters,
            job.current_page,
            page_size,
        )?;

        let body = OpenOptions::new()
            .create(true)
            .write(true)
            .append(!first_page)
            .truncate(first_page)
            .open(&body_path)
            .map_err(|e| Error::operation("open_export_body", e))?;
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .has_headers(false)
            .from_writer(BufWriter::new(body));

        let mut rows = 0;
        for id in &page.ids {
            let Some(entity) = self.repository.get(*id)? else {
                tracing::debug!(%id, "entity vanished between query and read");
                continue;
            };
            if job.include_meta {
                self.discover_meta(&entity, &mut job.columns);
            }
            let mut record = Vec::with_capacity(job.columns.len());
            for column in &job.columns {
                record.push(format_cell(&self.value(&column.logical_name, &entity)?));
            }
            writer
                .write_record(&record)
                .map_err(|e| Error::operation("write_export_row", e))?;
            rows += 1;
        }
        writer
            .flush()
            .map_err(|e| Error::operation("flush_export_body", e))?;
        drop(writer);

        metrics::counter!("bulkport_export_rows_total").increment(rows as u64);
        job.exported_rows += rows;

        let covered = job.current_page.saturating_mul(page_size).min(page.total_count);
        let done = page.ids.len() < page_size || covered >= page.total_count;
        let percent = if done {
            100
        } else {
            u8::try_from(covered * 100 / page.total_count.max(1)).unwrap_or(99)
        };

        let download = if done {
            write_final(&final_path, &body_path, &job.columns)?;
            self.extensions.completed(&JobSummary {
                kind: JobKind::Export,
                entity_type: job.export_type.clone(),
                rows: job.exported_rows,
                swept_placeholders: 0,
            });
            Some(final_path)
        } else {
            job.current_page += 1;
            None
        };

        Ok(ExportBatch {
            job,
            rows,
            total: page.total_count,
            percent,
            done,
            download,
        })
    }

    /// Appends a `meta:<key>` column for every metadata key not seen yet.
    fn discover_meta(&self, entity: &Entity, columns: &mut Vec<ExportColumn>) {
        let Some(prefix) = self
            .catalog
            .iter()
            .find(|spec| spec.is_dynamic_family)
            .and_then(|spec| spec.family_prefix.as_deref())
        else {
            return;
        };
        for entry in entity.meta() {
            let logical_name = format!("{prefix}{}", entry.key);
            if !columns.iter().any(|c| c.logical_name == logical_name) {
                columns.push(self.column_for(&logical_name));
            }
        }
    }
}

fn export_column(spec: &ColumnSpec) -> ExportColumn {
    ExportColumn {
        logical_name: spec.logical_name.clone(),
        label: spec.display_label.clone(),
    }
}

/// Writes BOM and header, then moves the body in after them.
fn write_final(final_path: &Path, body_path: &Path, columns: &[ExportColumn]) -> Result<()> {
    let file = File::create(final_path).map_err(|e| Error::operation("create_export", e))?;
    let mut out = BufWriter::new(file);
    out.write_all(UTF8_BOM)
        .map_err(|e| Error::operation("write_export_header", e))?;
    {
        let mut header = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(&mut out);
        header
            .write_record(columns.iter().map(|c| c.label.as_str()))
            .map_err(|e| Error::operation("write_export_header", e))?;
        header
            .flush()
            .map_err(|e| Error::operation("write_export_header", e))?;
    }
    let mut body = File::open(body_path).map_err(|e| Error::operation("open_export_body", e))?;
    std::io::copy(&mut body, &mut out).map_err(|e| Error::operation("copy_export_body", e))?;
    out.flush()
        .map_err(|e| Error::operation("flush_export", e))?;
    drop(body);
    std::fs::remove_file(body_path).map_err(|e| Error::operation("remove_export_body", e))
}
