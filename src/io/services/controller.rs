//! Batch/resume controller.
//!
//! A small state machine a client drives one request at a time:
//!
//! ```text
//! upload -> mapping -> importing -> done
//!                      exporting -> done
//! ```
//!
//! `importing` and `exporting` loop on [`ImportSession::step`] /
//! [`ExportSession::step`] until the engine reports the last batch. Errors
//! halt the machine at the current stage; the client may retry the same
//! action.

use crate::config::ImportSettings;
use crate::io::budget::ResourceBudget;
use crate::io::cursor::CsvCursor;
use crate::io::extensions::JobSummary;
use crate::io::mapper::{ColumnMapper, overrides_from_preferences, preferences_from_mapping};
use crate::io::services::export::ExportEngine;
use crate::io::services::import::ImportEngine;
use crate::io::traits::MappingPreferenceStore;
use crate::io::validation::validate_upload;
use crate::models::{ColumnMapping, ColumnOption, ExportJob, ImportJob, ImportOutcome};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument;

/// Controller stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Waiting for a file.
    Upload,
    /// File stored; waiting for a confirmed column mapping.
    Mapping,
    /// Import batches in progress.
    Importing,
    /// Export pages in progress.
    Exporting,
    /// Finished and cleaned up.
    Done,
}

impl Stage {
    /// Returns the stage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Mapping => "mapping",
            Self::Importing => "importing",
            Self::Exporting => "exporting",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the next request resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NextStep {
    /// Byte offset of the next import batch.
    Offset(u64),
    /// 1-based page of the next export batch.
    Page(usize),
    /// Nothing left to do.
    Done,
}

/// Response to one import step, with cumulative counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportStepResponse {
    /// Where the next step resumes.
    pub next: NextStep,
    /// Progress through the file, 0-100.
    pub percent: u8,
    /// Entities created so far.
    pub imported_count: usize,
    /// Entities updated so far.
    pub updated_count: usize,
    /// Rows skipped so far.
    pub skipped_count: usize,
    /// Rows failed so far.
    pub failed_count: usize,
}

/// Response to one export step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportStepResponse {
    /// Where the next step resumes.
    pub next: NextStep,
    /// Page-weighted progress, 0-100.
    pub percent: u8,
    /// Finished file, once done.
    pub download: Option<String>,
}

/// Mapping choices offered for one header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderChoice {
    /// Raw header text.
    pub header: String,
    /// Logical name currently selected (auto-detected or remembered).
    pub selected: String,
    /// Every legal target.
    pub options: Vec<ColumnOption>,
}

fn transition(from: Stage, action: &str) -> Error {
    Error::InvalidTransition {
        from: from.to_string(),
        action: action.to_string(),
    }
}

/// An import driven through `upload -> mapping -> importing -> done`.
pub struct ImportSession {
    engine: ImportEngine,
    mapper: ColumnMapper,
    preferences: Option<(Arc<dyn MappingPreferenceStore>, String)>,
    batch_size: usize,
    budget: ResourceBudget,
    stage: Stage,
    upload: Option<PathBuf>,
    delimiter: u8,
    headers: Vec<String>,
    job: Option<ImportJob>,
    outcome: ImportOutcome,
    percent: u8,
    summary: Option<JobSummary>,
}

impl ImportSession {
    /// Creates a session in the `upload` stage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the entity's column catalog is
    /// invalid.
    pub fn new(engine: ImportEngine, settings: &ImportSettings) -> Result<Self> {
        let mapper = engine.mapper(settings.duplicate_columns)?;
        Ok(Self {
            engine,
            mapper,
            preferences: None,
            batch_size: settings.batch_size,
            budget: settings.budget(),
            stage: Stage::Upload,
            upload: None,
            delimiter: settings.delimiter,
            headers: Vec::new(),
            job: None,
            outcome: ImportOutcome::new(),
            percent: 0,
            summary: None,
        })
    }

    /// Remembers confirmed mappings for `user`.
    #[must_use]
    pub fn with_preferences(
        mut self,
        store: Arc<dyn MappingPreferenceStore>,
        user: impl Into<String>,
    ) -> Self {
        self.preferences = Some((store, user.into()));
        self
    }

    /// Replaces the per-batch budget.
    #[must_use]
    pub fn with_budget(mut self, budget: ResourceBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Current stage.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Returns `true` once the import finished.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    /// Headers of the uploaded file.
    #[must_use]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Job state after the latest step.
    #[must_use]
    pub const fn job(&self) -> Option<&ImportJob> {
        self.job.as_ref()
    }

    /// Cumulative outcome across every step.
    #[must_use]
    pub const fn outcome(&self) -> &ImportOutcome {
        &self.outcome
    }

    /// Final summary, once done.
    #[must_use]
    pub const fn summary(&self) -> Option<&JobSummary> {
        self.summary.as_ref()
    }

    /// Accepts an uploaded file and moves to `mapping`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidTransition`] outside the `upload` stage
    /// - [`Error::EmptyFile`] / [`Error::UnsupportedFile`] if validation
    ///   fails or the file has no header row
    pub fn upload(&mut self, path: &Path, delimiter: u8) -> Result<()> {
        if self.stage != Stage::Upload {
            return Err(transition(self.stage, "upload"));
        }
        let size = validate_upload(path)?;
        let cursor = CsvCursor::open(path, delimiter)?;
        if cursor.headers().iter().all(|h| h.trim().is_empty()) {
            return Err(Error::EmptyFile(format!(
                "{} has no header row",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), size, columns = cursor.headers().len(), "upload accepted");
        self.headers = cursor.headers().to_vec();
        self.upload = Some(path.to_path_buf());
        self.delimiter = delimiter;
        self.stage = Stage::Mapping;
        Ok(())
    }

    fn remembered(&self) -> HashMap<usize, String> {
        let Some((store, user)) = &self.preferences else {
            return HashMap::new();
        };
        match store.load_mapping(user, &self.engine.definition().name) {
            Ok(preferences) => overrides_from_preferences(&self.headers, &preferences),
            Err(e) => {
                tracing::warn!(error = %e, "could not load mapping preferences");
                HashMap::new()
            },
        }
    }

    fn mapping_with(&self, overrides: &HashMap<usize, String>) -> Result<ColumnMapping> {
        let mut merged = self.remembered();
        merged.extend(overrides.iter().map(|(i, name)| (*i, name.clone())));
        self.mapper.map_with_overrides(&self.headers, &merged)
    }

    /// The mapping that would be used with no user overrides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] outside the `mapping` stage, or
    /// a mapper error.
    pub fn detected_mapping(&self) -> Result<ColumnMapping> {
        if self.stage != Stage::Mapping {
            return Err(transition(self.stage, "read the mapping"));
        }
        self.mapping_with(&HashMap::new())
    }

    /// Per-header choices for a mapping screen.
    ///
    /// # Errors
    ///
    /// Same as [`Self::detected_mapping`].
    pub fn mapping_options(&self) -> Result<Vec<HeaderChoice>> {
        let mapping = self.detected_mapping()?;
        Ok(self
            .headers
            .iter()
            .zip(&mapping.fields)
            .map(|(header, selected)| HeaderChoice {
                header: header.clone(),
                selected: selected.clone(),
                options: self.mapper.options_for(header),
            })
            .collect())
    }

    /// Confirms the mapping and moves to `importing`.
    ///
    /// `overrides` maps column index to logical name and wins over both
    /// remembered preferences and auto-detection. A first data row that
    /// parses to nothing keeps the session in `mapping`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidTransition`] outside the `mapping` stage
    /// - [`Error::EmptyFile`] if the file has no data row or the first one
    ///   is empty under this mapping
    /// - mapper errors for bad overrides or rejected duplicates
    pub fn confirm_mapping(
        &mut self,
        overrides: &HashMap<usize, String>,
        update_existing: bool,
    ) -> Result<&ImportJob> {
        if self.stage != Stage::Mapping {
            return Err(transition(self.stage, "confirm the mapping"));
        }
        let Some(path) = self.upload.clone() else {
            return Err(transition(self.stage, "confirm the mapping"));
        };

        let mapping = self.mapping_with(overrides)?;
        let cursor = CsvCursor::open(&path, self.delimiter)?;
        let Some(sample) = cursor.sample()? else {
            return Err(Error::EmptyFile(format!(
                "{} has no data rows",
                path.display()
            )));
        };
        if self.engine.parse_row(&mapping, &sample).is_blank() {
            return Err(Error::EmptyFile(
                "the first data row is empty under this mapping".to_string(),
            ));
        }

        if let Some((store, user)) = &self.preferences {
            let preferences = preferences_from_mapping(&mapping);
            if let Err(e) = store.save_mapping(user, &self.engine.definition().name, &preferences) {
                tracing::warn!(error = %e, "could not save mapping preferences");
            }
        }

        let mut job = ImportJob::new(self.engine.definition().name.clone(), path, mapping)
            .with_delimiter(self.delimiter)
            .with_batch_size(self.batch_size)
            .with_update_existing(update_existing);
        job.total_bytes = cursor.file_size();
        job.start_byte_offset = cursor.data_start();

        self.stage = Stage::Importing;
        Ok(self.job.insert(job))
    }

    /// Runs one import batch.
    ///
    /// On the last batch the job is finalized (placeholders swept, upload
    /// removed) and the session moves to `done`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] outside the `importing` stage,
    /// or the batch's job-level error. The session stays in `importing`.
    #[instrument(skip(self), fields(operation = "import.step", stage = %self.stage))]
    pub fn step(&mut self) -> Result<ImportStepResponse> {
        let job = match (&self.stage, &self.job) {
            (Stage::Importing, Some(job)) => job,
            _ => return Err(transition(self.stage, "run an import step")),
        };

        let batch = self.engine.import_batch(job, &self.budget.restarted())?;
        self.outcome.merge(batch.outcome);
        self.percent = self.percent.max(batch.percent);

        let next_offset = batch.job.start_byte_offset;
        // Stored before finalizing so a retried step resumes at the end.
        let job = self.job.insert(batch.job);

        let next = if batch.done {
            self.summary = Some(self.engine.finalize(job)?);
            self.stage = Stage::Done;
            NextStep::Done
        } else {
            if let Some(reason) = batch.stopped {
                tracing::debug!(%reason, "batch stopped early, resuming next step");
            }
            NextStep::Offset(next_offset)
        };

        Ok(ImportStepResponse {
            next,
            percent: self.percent,
            imported_count: self.outcome.imported.len(),
            updated_count: self.outcome.updated.len(),
            skipped_count: self.outcome.skipped.len(),
            failed_count: self.outcome.failed.len(),
        })
    }
}

/// A paged export driven through `exporting -> done`.
pub struct ExportSession {
    engine: ExportEngine,
    job: ExportJob,
    stage: Stage,
    percent: u8,
    download: Option<PathBuf>,
}

impl ExportSession {
    /// Creates a session in the `exporting` stage.
    #[must_use]
    pub const fn new(engine: ExportEngine, job: ExportJob) -> Self {
        Self {
            engine,
            job,
            stage: Stage::Exporting,
            percent: 0,
            download: None,
        }
    }

    /// Current stage.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Returns `true` once the export finished.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    /// Job state after the latest step.
    #[must_use]
    pub const fn job(&self) -> &ExportJob {
        &self.job
    }

    /// Finished file, once done.
    #[must_use]
    pub fn download(&self) -> Option<&Path> {
        self.download.as_deref()
    }

    /// Exports one page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] once done, or the page's error.
    #[instrument(skip(self), fields(operation = "export.step", page = self.job.current_page))]
    pub fn step(&mut self) -> Result<ExportStepResponse> {
        if self.stage != Stage::Exporting {
            return Err(transition(self.stage, "run an export step"));
        }

        let batch = self.engine.export_batch(&self.job)?;
        self.percent = self.percent.max(batch.percent);
        let next = if batch.done {
            self.stage = Stage::Done;
            self.download = batch.download;
            NextStep::Done
        } else {
            NextStep::Page(batch.job.current_page)
        };
        self.job = batch.job;

        Ok(ExportStepResponse {
            next,
            percent: self.percent,
            download: self.download.as_ref().map(|p| p.display().to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::entities::listing;
    use crate::io::extensions::ExtensionPoints;
    use crate::io::traits::EntityRepository;
    use crate::models::Record;
    use crate::storage::{MemoryPreferenceStore, MemoryRepository, MemoryTaxonomyStore};
    use std::io::Write;
    use tempfile::TempDir;

    fn write_upload(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("upload.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    fn session(repo: &Arc<MemoryRepository>, batch_size: usize) -> ImportSession {
        let engine = ImportEngine::with_repository(
            Arc::new(listing()),
            repo.clone(),
            Arc::new(MemoryTaxonomyStore::new()),
            ExtensionPoints::new(),
        );
        let settings = ImportSettings {
            batch_size,
            ..ImportSettings::default()
        };
        ImportSession::new(engine, &settings)
            .unwrap()
            .with_budget(ResourceBudget::unlimited())
    }

    #[test]
    fn test_full_import_walk() {
        let dir = TempDir::new().unwrap();
        let path = write_upload(&dir, "Title,Status\nA,publish\nB,draft\nC,publish\n");
        let repo = Arc::new(MemoryRepository::new());
        let mut session = session(&repo, 2);

        session.upload(&path, b',').unwrap();
        assert_eq!(session.stage(), Stage::Mapping);
        session.confirm_mapping(&HashMap::new(), false).unwrap();
        assert_eq!(session.stage(), Stage::Importing);

        let first = session.step().unwrap();
        assert!(matches!(first.next, NextStep::Offset(_)));
        assert_eq!(first.imported_count, 2);
        assert!(first.percent < 100);

        let second = session.step().unwrap();
        assert_eq!(second.next, NextStep::Done);
        assert_eq!(second.percent, 100);
        assert_eq!(second.imported_count, 3);
        assert!(session.is_done());
        assert!(!path.exists());
        assert_eq!(session.summary().unwrap().rows, 3);
    }

    #[test]
    fn test_out_of_order_actions_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_upload(&dir, "Title\nA\n");
        let repo = Arc::new(MemoryRepository::new());
        let mut session = session(&repo, 10);

        assert!(matches!(
            session.step(),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            session.confirm_mapping(&HashMap::new(), false),
            Err(Error::InvalidTransition { .. })
        ));

        session.upload(&path, b',').unwrap();
        assert!(matches!(
            session.upload(&path, b','),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_empty_first_row_stays_in_mapping() {
        let dir = TempDir::new().unwrap();
        let path = write_upload(&dir, "Title,Status\n,\nA,publish\n");
        let repo = Arc::new(MemoryRepository::new());
        let mut session = session(&repo, 10);

        session.upload(&path, b',').unwrap();
        let err = session.confirm_mapping(&HashMap::new(), false).unwrap_err();
        assert!(matches!(err, Error::EmptyFile(_)));
        assert_eq!(session.stage(), Stage::Mapping);
    }

    #[test]
    fn test_rejected_upload_stays_in_upload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.xlsx");
        std::fs::write(&path, "Title\nA\n").unwrap();
        let repo = Arc::new(MemoryRepository::new());
        let mut session = session(&repo, 10);

        assert!(matches!(
            session.upload(&path, b','),
            Err(Error::UnsupportedFile(_))
        ));
        assert_eq!(session.stage(), Stage::Upload);
    }

    #[test]
    fn test_overrides_and_preferences() {
        let dir = TempDir::new().unwrap();
        let path = write_upload(&dir, "Name,Status\nLamp,publish\n");
        let repo = Arc::new(MemoryRepository::new());
        let prefs = Arc::new(MemoryPreferenceStore::new());

        let mut first = session(&repo, 10).with_preferences(prefs.clone(), "admin");
        first.upload(&path, b',').unwrap();
        assert_eq!(first.detected_mapping().unwrap().field(0), Some("name"));
        let overrides = HashMap::from([(0, "title".to_string())]);
        first.confirm_mapping(&overrides, false).unwrap();

        let again = write_upload(&dir, "name,Status\nDesk,draft\n");
        let mut second = session(&repo, 10).with_preferences(prefs, "admin");
        second.upload(&again, b',').unwrap();
        let mapping = second.detected_mapping().unwrap();
        assert_eq!(mapping.field(0), Some("title"));

        let choices = second.mapping_options().unwrap();
        assert_eq!(choices[0].selected, "title");
        assert_eq!(choices[0].options[0].logical_name, "");
    }

    #[test]
    fn test_cumulative_counts_with_update() {
        let dir = TempDir::new().unwrap();
        let repo = Arc::new(MemoryRepository::new());
        let existing = repo
            .create(
                "listing",
                Record::from([("title".to_string(), "Old".into())]),
            )
            .unwrap();
        let path = write_upload(
            &dir,
            &format!("ID,Title\n{existing},New\n999,Ghost\n,Fresh\n"),
        );

        let mut session = session(&repo, 1);
        session.upload(&path, b',').unwrap();
        session.confirm_mapping(&HashMap::new(), true).unwrap();
        let mut last = session.step().unwrap();
        while last.next != NextStep::Done {
            last = session.step().unwrap();
        }

        assert_eq!(last.updated_count, 1);
        assert_eq!(last.skipped_count, 1);
        assert_eq!(last.imported_count, 1);
        assert_eq!(last.failed_count, 0);
        assert_eq!(session.outcome().skipped[0].row, 2);
    }

    #[test]
    fn test_export_session_walk() {
        let dir = TempDir::new().unwrap();
        let repo = Arc::new(MemoryRepository::new());
        for title in ["A", "B", "C"] {
            repo.create(
                "listing",
                Record::from([("title".to_string(), title.into())]),
            )
            .unwrap();
        }
        let engine = ExportEngine::new(
            Arc::new(listing()),
            repo,
            Arc::new(MemoryTaxonomyStore::new()),
            ExtensionPoints::new(),
            dir.path(),
        );
        let job = ExportJob::new("listing", "out.csv")
            .with_columns(vec!["title".to_string()])
            .with_page_size(2);
        let mut session = ExportSession::new(engine, job);

        let first = session.step().unwrap();
        assert_eq!(first.next, NextStep::Page(2));
        assert!(first.download.is_none());

        let second = session.step().unwrap();
        assert_eq!(second.next, NextStep::Done);
        assert_eq!(second.percent, 100);
        assert!(second.download.is_some());
        assert!(session.is_done());
        assert!(matches!(
            session.step(),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_next_step_serialization() {
        assert_eq!(
            serde_json::to_string(&NextStep::Offset(42)).unwrap(),
            r#"{"offset":42}"#
        );
        assert_eq!(serde_json::to_string(&NextStep::Done).unwrap(), r#""done""#);
        assert_eq!(Stage::Importing.to_string(), "importing");
    }
}
