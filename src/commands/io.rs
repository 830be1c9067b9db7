//! Import, export and column inspection handlers.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use bulkport::config::{BulkportConfig, parse_delimiter};
use bulkport::io::{
    CsvCursor, EntityRegistry, ExportEngine, ExportSession, ExtensionPoints, ImportEngine,
    ImportSession, NextStep, validate_upload,
};
use bulkport::models::{ExportFilters, ExportJob, ImportOutcome, RowError};
use bulkport::storage::SqliteStorage;
use bulkport::{Error, Result};
use uuid::Uuid;

use super::{ExportArgs, ImportArgs};

/// Row errors printed per bucket before truncating.
const MAX_LISTED_ERRORS: usize = 10;

/// Opens the configured database.
fn open_storage(config: &BulkportConfig) -> Result<Arc<SqliteStorage>> {
    let storage = SqliteStorage::open(config.database_path())?.with_hierarchical("category");
    Ok(Arc::new(storage))
}

/// Copies `file` into the upload area so the import may delete it when done.
fn stage_upload(config: &BulkportConfig, file: &Path) -> Result<PathBuf> {
    let dir = config.data_dir.join("uploads");
    std::fs::create_dir_all(&dir).map_err(|e| Error::operation("create_upload_dir", e))?;

    let name = match file.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}.{ext}", Uuid::now_v7()),
        None => Uuid::now_v7().to_string(),
    };
    let staged = dir.join(name);
    std::fs::copy(file, &staged)
        .map_err(|e| Error::operation("stage_upload", format!("{}: {e}", file.display())))?;
    Ok(staged)
}

/// Turns `HEADER=field` arguments into column-index overrides.
///
/// Headers are matched trimmed and case-insensitively.
fn parse_map_overrides(headers: &[String], specs: &[String]) -> Result<HashMap<usize, String>> {
    let mut overrides = HashMap::new();
    for spec in specs {
        let (header, field) = spec.split_once('=').ok_or_else(|| {
            Error::InvalidInput(format!("mapping '{spec}' is not of the form HEADER=field"))
        })?;
        let header = header.trim();
        let index = headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(header))
            .ok_or_else(|| Error::InvalidInput(format!("the file has no column '{header}'")))?;
        overrides.insert(index, field.trim().to_string());
    }
    Ok(overrides)
}

fn parse_columns(columns: &str) -> Vec<String> {
    columns
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn print_errors(title: &str, errors: &[RowError]) {
    if errors.is_empty() {
        return;
    }
    println!();
    println!("{title} ({}):", errors.len());
    for error in errors.iter().take(MAX_LISTED_ERRORS) {
        println!("  - {error}");
    }
    if errors.len() > MAX_LISTED_ERRORS {
        println!("  ... and {} more", errors.len() - MAX_LISTED_ERRORS);
    }
}

fn print_outcome(outcome: &ImportOutcome) {
    println!("Import completed:");
    println!("  Imported: {}", outcome.imported.len());
    println!("  Updated:  {}", outcome.updated.len());
    println!("  Skipped:  {}", outcome.skipped.len());
    println!("  Failed:   {}", outcome.failed.len());
    print_errors("Skipped rows", &outcome.skipped);
    print_errors("Failed rows", &outcome.failed);
}

/// Executes the import command.
pub fn cmd_import(config: &BulkportConfig, args: &ImportArgs) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let definition = EntityRegistry::builtin().get(&args.entity_type)?;
    let engine = ImportEngine::with_repository(
        definition,
        storage.clone(),
        storage.clone(),
        ExtensionPoints::new(),
    )
    .with_placeholder_store(storage.clone());

    let mut settings = config.import.clone();
    if let Some(batch_size) = args.batch_size {
        settings.batch_size = batch_size;
    }
    let delimiter = match &args.delimiter {
        Some(d) => parse_delimiter(d)?,
        None => settings.delimiter,
    };
    let mut session =
        ImportSession::new(engine, &settings)?.with_preferences(storage, args.user.clone());

    validate_upload(&args.file)?;
    let upload = stage_upload(config, &args.file)?;
    let result = drive_import(&mut session, &upload, delimiter, args);
    if result.is_err() && upload.exists() {
        if let Err(e) = std::fs::remove_file(&upload) {
            tracing::warn!(error = %e, path = %upload.display(), "could not remove staged upload");
        }
    }
    result?;

    println!();
    println!();
    print_outcome(session.outcome());
    if let Some(summary) = session.summary().filter(|s| s.swept_placeholders > 0) {
        println!();
        println!(
            "Removed {} placeholder(s) referenced but never imported",
            summary.swept_placeholders
        );
    }
    Ok(())
}

fn drive_import(
    session: &mut ImportSession,
    upload: &Path,
    delimiter: u8,
    args: &ImportArgs,
) -> anyhow::Result<()> {
    session.upload(upload, delimiter)?;
    let overrides = parse_map_overrides(session.headers(), &args.map)?;
    session
        .confirm_mapping(&overrides, args.update)
        .context("mapping rejected")?;

    loop {
        let step = session.step()?;
        print!(
            "\rImporting: {:>3}% - Imported: {}, Updated: {}, Skipped: {}, Failed: {}",
            step.percent,
            step.imported_count,
            step.updated_count,
            step.skipped_count,
            step.failed_count,
        );
        let _ = std::io::stdout().flush();
        if step.next == NextStep::Done {
            return Ok(());
        }
    }
}

/// Executes the export command.
pub fn cmd_export(config: &BulkportConfig, args: &ExportArgs) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let definition = EntityRegistry::builtin().get(&args.entity_type)?;
    let engine = ExportEngine::new(
        definition,
        storage.clone(),
        storage,
        ExtensionPoints::new(),
        config.export_dir(),
    );

    let filename = args
        .output
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("'{}' has no file name", args.output.display()))?;

    let mut filters = ExportFilters::default();
    for status in &args.status {
        filters = filters.with_status(status);
    }
    for id in &args.category_ids {
        filters = filters.with_term("category_ids", *id);
    }

    let mut job = ExportJob::new(&args.entity_type, filename)
        .with_filters(filters)
        .with_page_size(args.page_size.unwrap_or(config.export.page_size))
        .with_meta(args.include_meta || config.export.include_meta);
    if let Some(columns) = &args.columns {
        job = job.with_columns(parse_columns(columns));
    }

    let mut session = ExportSession::new(engine, job);
    loop {
        let step = session.step()?;
        print!("\rExporting: {:>3}%", step.percent);
        let _ = std::io::stdout().flush();
        if step.next == NextStep::Done {
            break;
        }
    }

    let download = session
        .download()
        .ok_or_else(|| anyhow::anyhow!("export finished without a file"))?;
    if download != args.output {
        std::fs::copy(download, &args.output)
            .with_context(|| format!("writing {}", args.output.display()))?;
        std::fs::remove_file(download)
            .with_context(|| format!("removing {}", download.display()))?;
    }

    println!();
    println!();
    println!("Export completed:");
    println!("  Rows:   {}", session.job().exported_rows);
    println!("  Output: {}", args.output.display());
    Ok(())
}

/// Executes the columns command.
pub fn cmd_columns(
    config: &BulkportConfig,
    file: &Path,
    entity_type: &str,
    delimiter: Option<&str>,
) -> anyhow::Result<()> {
    validate_upload(file)?;
    let definition = EntityRegistry::builtin().get(entity_type)?;
    let delimiter = delimiter.map_or(Ok(config.import.delimiter), parse_delimiter)?;

    let mapper = definition.mapper(config.import.duplicate_columns)?;
    let cursor = CsvCursor::open(file, delimiter)?;
    let mapping = mapper.map(cursor.headers())?;

    println!("Columns in {} ({entity_type}):", file.display());
    for (i, header) in cursor.headers().iter().enumerate() {
        let field = mapping.field(i).unwrap_or_default();
        let shown = if field.is_empty() { "(ignored)" } else { field };
        println!("  {:>2}. {:<24} -> {shown}", i + 1, header.trim());
        let options: Vec<String> = mapper
            .options_for(header)
            .into_iter()
            .skip(1)
            .map(|o| o.logical_name)
            .collect();
        println!("      options: {}", options.join(", "));
    }
    Ok(())
}
