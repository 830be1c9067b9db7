//! Integration tests for bulkport.
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::too_many_lines,
    clippy::doc_markdown
)]

use bulkport::config::ImportSettings;
use bulkport::io::escape::neutralize_formula;
use bulkport::io::{
    CsvCursor, DuplicateColumnPolicy, EntityDefinition, EntityRepository, ExportEngine,
    ExtensionPoints, FormatterKind, ImportEngine, ImportSession, ResourceBudget, listing,
};
use bulkport::models::{
    EntityId, ExportJob, FieldValue, ImportOutcome, MetaEntry, Record, RowError,
};
use bulkport::storage::{MemoryRepository, MemoryTaxonomyStore, SqliteStorage};
use bulkport::{Error, ImportJob};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use test_case::test_case;

fn write(dir: &TempDir, name: &str, content: impl AsRef<[u8]>) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn sqlite() -> Arc<SqliteStorage> {
    Arc::new(
        SqliteStorage::in_memory()
            .unwrap()
            .with_hierarchical("category"),
    )
}

fn sqlite_engine(storage: &Arc<SqliteStorage>, definition: EntityDefinition) -> ImportEngine {
    ImportEngine::with_repository(
        Arc::new(definition),
        storage.clone(),
        storage.clone(),
        ExtensionPoints::new(),
    )
    .with_placeholder_store(storage.clone())
}

/// Runs a full import through the controller and returns the cumulative outcome.
fn import_file(
    storage: &Arc<SqliteStorage>,
    definition: EntityDefinition,
    path: &Path,
    update_existing: bool,
) -> ImportOutcome {
    let engine = sqlite_engine(storage, definition);
    let mut session = ImportSession::new(engine, &ImportSettings::default())
        .unwrap()
        .with_budget(ResourceBudget::unlimited());
    session.upload(path, b',').unwrap();
    session
        .confirm_mapping(&HashMap::new(), update_existing)
        .unwrap();
    while !session.is_done() {
        session.step().unwrap();
    }
    session.outcome().clone()
}

fn export_text(
    storage: &Arc<SqliteStorage>,
    definition: EntityDefinition,
    dir: &TempDir,
    job: &ExportJob,
) -> String {
    let engine = ExportEngine::new(
        Arc::new(definition),
        storage.clone(),
        storage.clone(),
        ExtensionPoints::new(),
        dir.path().join("exports"),
    );
    let bytes = engine.export_all(job).unwrap();
    let body = bytes.strip_prefix(b"\xEF\xBB\xBF".as_slice()).unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

#[test]
fn test_new_listing_is_imported_then_skipped_as_duplicate() {
    let dir = TempDir::new().unwrap();
    let storage = sqlite();

    let first = write(&dir, "new.csv", "ID,Title,Status\n,\"New Listing\",\"publish\"\n");
    let outcome = import_file(&storage, listing(), &first, false);
    assert_eq!(outcome.imported.len(), 1);
    assert!(outcome.failed.is_empty());
    assert!(outcome.skipped.is_empty());

    let id = outcome.imported[0];
    let entity = storage.get(id).unwrap().unwrap();
    assert_eq!(entity.field("title"), Some(&FieldValue::from("New Listing")));
    assert_eq!(entity.status(), Some("publish"));

    let again = write(
        &dir,
        "again.csv",
        format!("ID,Title,Status\n{id},\"New Listing\",\"publish\"\n"),
    );
    let outcome = import_file(&storage, listing(), &again, false);
    assert!(outcome.imported.is_empty());
    assert_eq!(outcome.skipped, vec![RowError::new(1, id, "already exists")]);
}

#[test]
fn test_meta_header_aggregates_into_meta_data() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "meta.csv", "Title,Meta: color\nLamp,blue\n");
    let engine = ImportEngine::with_repository(
        Arc::new(listing()),
        Arc::new(MemoryRepository::new()),
        Arc::new(MemoryTaxonomyStore::new()),
        ExtensionPoints::new(),
    );

    let cursor = CsvCursor::open(&path, b',').unwrap();
    let mapping = engine
        .mapper(DuplicateColumnPolicy::LastWins)
        .unwrap()
        .map(cursor.headers())
        .unwrap();
    let sample = cursor.sample().unwrap().unwrap();
    let row = engine.parse_row(&mapping, &sample);

    assert_eq!(row.meta(), &[MetaEntry::new("color", "blue")]);
    assert!(!row.contains("meta: color"));
    assert!(!row.contains("meta:color"));
}

#[test]
fn test_hierarchical_category_round_trips_through_sqlite() {
    let dir = TempDir::new().unwrap();
    let storage = sqlite();
    let path = write(
        &dir,
        "categories.csv",
        "Title,Categories\nLamp,GrandParent > Parent > Term\n",
    );
    let outcome = import_file(&storage, listing(), &path, false);
    assert_eq!(outcome.imported.len(), 1);

    let job = ExportJob::new("listing", "lamps.csv")
        .with_columns(vec!["title".to_string(), "category_ids".to_string()]);
    let text = export_text(&storage, listing(), &dir, &job);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines, vec!["Title,Categories", "Lamp,GrandParent > Parent > Term"]);
}

#[test_case("=1+1", "'=1+1" ; "equals")]
#[test_case("-cmd", "'-cmd" ; "minus")]
#[test_case("@SUM(A1)", "'@SUM(A1)" ; "at sign")]
#[test_case("+42", "'+42" ; "plus")]
#[test_case("normal text", "normal text" ; "plain text")]
fn test_formula_neutralization(input: &str, expected: &str) {
    assert_eq!(neutralize_formula(input), expected);
}

#[test]
fn test_exported_formula_cell_is_quoted() {
    let dir = TempDir::new().unwrap();
    let storage = sqlite();
    storage
        .create(
            "listing",
            Record::from([("title".to_string(), FieldValue::from("=1+1"))]),
        )
        .unwrap();

    let job = ExportJob::new("listing", "f.csv").with_columns(vec!["title".to_string()]);
    let text = export_text(&storage, listing(), &dir, &job);
    assert_eq!(text.lines().nth(1), Some("'=1+1"));
}

fn product() -> EntityDefinition {
    EntityDefinition::new("product")
        .with_column("title", "Title", None)
        .with_column("stock", "Stock", Some(FormatterKind::Int))
        .with_column("active", "Active", Some(FormatterKind::Bool))
        .with_column("colors", "Colors", Some(FormatterKind::CommaList))
        .with_column("specs", "Specs", Some(FormatterKind::Json))
        .require("title")
}

#[test]
fn test_export_then_update_import_round_trips_values() {
    let dir = TempDir::new().unwrap();
    let storage = sqlite();
    let original: Record = Record::from([
        ("title".to_string(), FieldValue::from("=SUM(A1)")),
        ("stock".to_string(), FieldValue::Int(42)),
        ("active".to_string(), FieldValue::Bool(true)),
        (
            "colors".to_string(),
            FieldValue::List(vec!["red".to_string(), "blue, navy".to_string()]),
        ),
        (
            "specs".to_string(),
            FieldValue::Json(serde_json::json!({"width": 30, "tags": ["a", "b"]})),
        ),
    ]);
    let id = storage.create("product", original.clone()).unwrap();

    let bytes = {
        let engine = ExportEngine::new(
            Arc::new(product()),
            storage.clone(),
            storage.clone(),
            ExtensionPoints::new(),
            dir.path().join("exports"),
        );
        engine
            .export_all(&ExportJob::new("product", "products.csv"))
            .unwrap()
    };
    let path = write(&dir, "products.csv", &bytes);

    let outcome = import_file(&storage, product(), &path, true);
    assert_eq!(outcome.updated, vec![id]);
    assert!(outcome.failed.is_empty());
    assert!(outcome.skipped.is_empty());

    let entity = storage.get(id).unwrap().unwrap();
    for (field, value) in &original {
        assert_eq!(entity.field(field), Some(value), "field {field}");
    }
}

#[test]
fn test_forward_reference_is_filled_or_swept() {
    let dir = TempDir::new().unwrap();
    let storage = sqlite();
    // Row 1 references 500 before it appears; 900 never appears.
    let path = write(
        &dir,
        "tree.csv",
        "ID,Title,Parent\n100,Child,500\n500,Parent,\n101,Orphan,900\n",
    );

    let outcome = import_file(&storage, listing(), &path, false);
    assert_eq!(outcome.imported.len(), 3);
    assert!(outcome.failed.is_empty());

    let parent_id = outcome.imported[1];
    let child = storage.get(outcome.imported[0]).unwrap().unwrap();
    let parent_ref = i64::try_from(parent_id.get()).unwrap();
    assert_eq!(child.field("parent_id"), Some(&FieldValue::Int(parent_ref)));

    let parent = storage.get(parent_id).unwrap().unwrap();
    assert_eq!(parent.field("title"), Some(&FieldValue::from("Parent")));
    assert!(!storage.is_placeholder(parent_id).unwrap());

    let orphan = storage.get(outcome.imported[2]).unwrap().unwrap();
    let dangling = orphan
        .field("parent_id")
        .and_then(FieldValue::as_int)
        .and_then(|i| u64::try_from(i).ok())
        .map(EntityId::new)
        .unwrap();
    assert!(storage.get(dangling).unwrap().is_none());
    assert!(!path.exists());
}

#[test]
fn test_job_survives_serialization_between_batches() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "rows.csv", "Title\nA\nB\nC\nD\nE\n");
    let repo = Arc::new(MemoryRepository::new());
    let engine = ImportEngine::with_repository(
        Arc::new(listing()),
        repo.clone(),
        Arc::new(MemoryTaxonomyStore::new()),
        ExtensionPoints::new(),
    );
    let cursor = CsvCursor::open(&path, b',').unwrap();
    let mapping = engine
        .mapper(DuplicateColumnPolicy::LastWins)
        .unwrap()
        .map(cursor.headers())
        .unwrap();
    let mut job = ImportJob::new("listing", &path, mapping).with_batch_size(2);

    let mut total = ImportOutcome::new();
    loop {
        let batch = engine
            .import_batch(&job, &ResourceBudget::unlimited())
            .unwrap();
        total.merge(batch.outcome);
        if batch.done {
            break;
        }
        // A client only keeps the serialized job between requests.
        let wire = serde_json::to_string(&batch.job).unwrap();
        job = serde_json::from_str(&wire).unwrap();
    }
    assert_eq!(total.imported.len(), 5);
    assert_eq!(repo.len(), 5);
}

#[test]
fn test_forward_reference_resumes_in_a_fresh_engine() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "refs.csv", "ID,Title,Parent\n10,Child,20\n20,Parent,\n");
    let storage = sqlite();

    let first = sqlite_engine(&storage, listing());
    let cursor = CsvCursor::open(&path, b',').unwrap();
    let mapping = first
        .mapper(DuplicateColumnPolicy::LastWins)
        .unwrap()
        .map(cursor.headers())
        .unwrap();
    let job = ImportJob::new("listing", &path, mapping).with_batch_size(1);
    let batch = first
        .import_batch(&job, &ResourceBudget::unlimited())
        .unwrap();
    assert!(!batch.done);
    let child = batch.outcome.imported[0];
    let wire = serde_json::to_string(&batch.job).unwrap();
    drop(first);

    let second = sqlite_engine(&storage, listing());
    let job: ImportJob = serde_json::from_str(&wire).unwrap();
    let batch = second
        .import_batch(&job, &ResourceBudget::unlimited())
        .unwrap();
    assert!(batch.done);
    let parent = batch.outcome.imported[0];
    assert!(!storage.is_placeholder(parent).unwrap());
    assert_eq!(
        storage.get(child).unwrap().unwrap().field("parent_id"),
        Some(&FieldValue::Int(i64::try_from(parent.get()).unwrap()))
    );

    let summary = second.finalize(&batch.job).unwrap();
    assert_eq!(summary.swept_placeholders, 0);
}

#[test]
fn test_unknown_type_and_empty_upload_are_fatal() {
    let dir = TempDir::new().unwrap();
    let registry = bulkport::io::EntityRegistry::builtin();
    assert!(matches!(
        registry.get("invoice"),
        Err(Error::Configuration(_))
    ));

    let header_only = write(&dir, "header.csv", "ID,Title\n");
    let engine = ImportEngine::with_repository(
        registry.get("listing").unwrap(),
        Arc::new(MemoryRepository::new()),
        Arc::new(MemoryTaxonomyStore::new()),
        ExtensionPoints::new(),
    );
    let mut session = ImportSession::new(engine, &ImportSettings::default()).unwrap();
    session.upload(&header_only, b',').unwrap();
    assert!(matches!(
        session.confirm_mapping(&HashMap::new(), false),
        Err(Error::EmptyFile(_))
    ));
}
