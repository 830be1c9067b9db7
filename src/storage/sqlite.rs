//! `SQLite`-backed storage.
//!
//! One database file holds entities, taxonomy terms, placeholder
//! reservations and remembered mapping preferences, so the CLI can import in
//! one run and export in the next.
//!
//! # Schema
//!
//! | Table | Columns |
//! |-------|---------|
//! | `entities` | `id`, `entity_type`, `placeholder`, `fields` (JSON) |
//! | `terms` | `id`, `taxonomy`, `name`, `parent` |
//! | `placeholders` | `job_id`, `original_id`, `allocated_id`, `promoted` |
//! | `mapping_preferences` | `user`, `entity_type`, `preferences` (JSON) |
//!
//! Entity fields are stored as one JSON document. Export filters become
//! `json_extract`/`json_each` conditions, so a page is read with `LIMIT` and
//! `OFFSET` instead of loading every entity of the type.

use super::acquire_lock;
use crate::io::{
    EntityRepository, MappingPreferenceStore, PlaceholderStore, QueryPage, TaxonomyStore,
};
use crate::models::{Entity, EntityId, ExportFilters, PLACEHOLDER_STATUS, Record, Term};
use crate::{Error, Result};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// `SQLite` implementation of every storage interface.
///
/// Protected by a `Mutex` because `rusqlite::Connection` is not `Sync`.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
    hierarchical: HashSet<String>,
}

fn db_error(operation: &str) -> impl Fn(rusqlite::Error) -> Error + '_ {
    move |e| Error::operation(operation, e)
}

fn to_sql_id(id: u64) -> Result<i64> {
    i64::try_from(id).map_err(|_| Error::InvalidInput(format!("id {id} out of range")))
}

fn from_sql_id(id: i64) -> u64 {
    u64::try_from(id).unwrap_or_default()
}

fn next_param(param_idx: &mut usize) -> String {
    let p = format!("?{param_idx}");
    *param_idx += 1;
    p
}

/// Builds the SQL conditions for export filters.
///
/// Field values are stored as `{"type": .., "value": ..}`, so a status
/// matches only a `text` value, and term ids are read from `list` items,
/// an `int`, or integers of a `json` array.
///
/// # Returns
///
/// - The conditions, each prefixed with `" AND "`
/// - Parameter values in order
/// - The next available parameter index
fn build_filter_clause(
    filters: &ExportFilters,
    start_param: usize,
) -> (String, Vec<Value>, usize) {
    let mut clause = String::new();
    let mut values = Vec::new();
    let mut param_idx = start_param;

    if !filters.ids.is_empty() {
        let ids: Vec<i64> = filters
            .ids
            .iter()
            .filter_map(|id| i64::try_from(id.get()).ok())
            .collect();
        if ids.is_empty() {
            clause.push_str(" AND 0");
        } else {
            let placeholders: Vec<String> =
                ids.iter().map(|_| next_param(&mut param_idx)).collect();
            clause.push_str(&format!(" AND e.id IN ({})", placeholders.join(",")));
            values.extend(ids.into_iter().map(Value::Integer));
        }
    }

    if !filters.statuses.is_empty() {
        let placeholders: Vec<String> = filters
            .statuses
            .iter()
            .map(|_| next_param(&mut param_idx))
            .collect();
        clause.push_str(&format!(
            " AND json_extract(e.fields, '$.status.type') = 'text' \
             AND json_extract(e.fields, '$.status.value') IN ({})",
            placeholders.join(",")
        ));
        values.extend(filters.statuses.iter().cloned().map(Value::Text));
    }

    for (field, wanted) in &filters.terms {
        let wanted: Vec<i64> = wanted.iter().filter_map(|id| i64::try_from(*id).ok()).collect();
        if wanted.is_empty() {
            clause.push_str(" AND 0");
            continue;
        }
        let kind = next_param(&mut param_idx);
        let value = next_param(&mut param_idx);
        values.push(Value::Text(format!("$.\"{field}\".type")));
        values.push(Value::Text(format!("$.\"{field}\".value")));
        let placeholders: Vec<String> = wanted.iter().map(|_| next_param(&mut param_idx)).collect();
        values.extend(wanted.into_iter().map(Value::Integer));
        clause.push_str(&format!(
            " AND EXISTS (SELECT 1 FROM json_each(e.fields, {value}) AS t \
             WHERE CASE json_extract(e.fields, {kind}) \
                 WHEN 'list' THEN t.type = 'text' AND trim(t.value) <> '' \
                     AND trim(t.value) NOT GLOB '*[^0-9]*' \
                 WHEN 'int' THEN t.type = 'integer' \
                 WHEN 'json' THEN t.type = 'integer' AND json_type(e.fields, {value}) = 'array' \
                 ELSE 0 END \
             AND CAST(trim(t.value) AS INTEGER) IN ({}))",
            placeholders.join(",")
        ));
    }

    (clause, values, param_idx)
}

impl SqliteStorage {
    /// Opens (or creates) a database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::operation("create_data_dir", e))?;
        }
        let conn = Connection::open(&db_path).map_err(db_error("open_sqlite"))?;
        let storage = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
            hierarchical: HashSet::new(),
        };
        storage.initialize()?;
        Ok(storage)
    }

    /// Creates an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_error("open_sqlite_in_memory"))?;
        let storage = Self {
            conn: Mutex::new(conn),
            db_path: None,
            hierarchical: HashSet::new(),
        };
        storage.initialize()?;
        Ok(storage)
    }

    /// Marks a taxonomy as hierarchical.
    #[must_use]
    pub fn with_hierarchical(mut self, taxonomy: impl Into<String>) -> Self {
        self.hierarchical.insert(taxonomy.into());
        self
    }

    /// Returns the database path (`None` for in-memory).
    #[must_use]
    pub const fn db_path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        conn.execute_batch(
            "PRAGMA busy_timeout = 5000;
             CREATE TABLE IF NOT EXISTS entities (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 entity_type TEXT NOT NULL,
                 placeholder INTEGER NOT NULL DEFAULT 0,
                 fields TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_entities_type ON entities (entity_type, placeholder);
             CREATE TABLE IF NOT EXISTS terms (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 taxonomy TEXT NOT NULL,
                 name TEXT NOT NULL,
                 parent INTEGER
             );
             CREATE INDEX IF NOT EXISTS idx_terms_lookup ON terms (taxonomy, name);
             CREATE TABLE IF NOT EXISTS placeholders (
                 job_id TEXT NOT NULL,
                 original_id INTEGER NOT NULL,
                 allocated_id INTEGER NOT NULL,
                 promoted INTEGER NOT NULL DEFAULT 0,
                 PRIMARY KEY (job_id, original_id)
             );
             CREATE TABLE IF NOT EXISTS mapping_preferences (
                 user TEXT NOT NULL,
                 entity_type TEXT NOT NULL,
                 preferences TEXT NOT NULL,
                 PRIMARY KEY (user, entity_type)
             );",
        )
        .map_err(db_error("initialize_schema"))
    }

    fn load(conn: &Connection, id: EntityId) -> Result<Option<Entity>> {
        let row = conn
            .query_row(
                "SELECT entity_type, placeholder, fields FROM entities WHERE id = ?1",
                params![to_sql_id(id.get())?],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(db_error("get_entity"))?;

        row.map(|(entity_type, placeholder, json)| {
            let fields: Record =
                serde_json::from_str(&json).map_err(|e| Error::operation("decode_entity", e))?;
            let mut entity = Entity::new(id, entity_type, fields);
            entity.placeholder = placeholder;
            Ok(entity)
        })
        .transpose()
    }

    fn encode(fields: &Record) -> Result<String> {
        serde_json::to_string(fields).map_err(|e| Error::operation("encode_entity", e))
    }

    fn put_reservation(
        &self,
        job: Uuid,
        original: EntityId,
        allocated: EntityId,
        promoted: bool,
    ) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "INSERT INTO placeholders (job_id, original_id, allocated_id, promoted)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (job_id, original_id) DO UPDATE SET
                 allocated_id = excluded.allocated_id, promoted = excluded.promoted",
            params![
                job.to_string(),
                to_sql_id(original.get())?,
                to_sql_id(allocated.get())?,
                promoted
            ],
        )
        .map_err(db_error("set_placeholder"))?;
        Ok(())
    }

    fn insert(&self, entity_type: &str, fields: &Record, placeholder: bool) -> Result<EntityId> {
        let json = Self::encode(fields)?;
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "INSERT INTO entities (entity_type, placeholder, fields) VALUES (?1, ?2, ?3)",
            params![entity_type, placeholder, json],
        )
        .map_err(db_error("create_entity"))?;
        Ok(EntityId::new(from_sql_id(conn.last_insert_rowid())))
    }
}

impl EntityRepository for SqliteStorage {
    fn exists(&self, id: EntityId) -> Result<bool> {
        let conn = acquire_lock(&self.conn);
        conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE id = ?1 AND placeholder = 0",
            params![to_sql_id(id.get())?],
            |row| row.get::<_, i64>(0),
        )
        .map(|count| count > 0)
        .map_err(db_error("entity_exists"))
    }

    fn type_of(&self, id: EntityId) -> Result<Option<String>> {
        let conn = acquire_lock(&self.conn);
        conn.query_row(
            "SELECT entity_type FROM entities WHERE id = ?1",
            params![to_sql_id(id.get())?],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_error("entity_type_of"))
    }

    fn get(&self, id: EntityId) -> Result<Option<Entity>> {
        let conn = acquire_lock(&self.conn);
        Self::load(&conn, id)
    }

    fn create(&self, entity_type: &str, fields: Record) -> Result<EntityId> {
        self.insert(entity_type, &fields, false)
    }

    fn update(&self, id: EntityId, fields: Record) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        let mut entity =
            Self::load(&conn, id)?.ok_or_else(|| Error::NotFound(format!("entity {id}")))?;
        entity.merge(fields);
        conn.execute(
            "UPDATE entities SET fields = ?1, placeholder = 0 WHERE id = ?2",
            params![Self::encode(&entity.fields)?, to_sql_id(id.get())?],
        )
        .map_err(db_error("update_entity"))?;
        Ok(())
    }

    fn query(
        &self,
        entity_type: &str,
        filters: &ExportFilters,
        page: usize,
        page_size: usize,
    ) -> Result<QueryPage> {
        let (clause, mut values, param_idx) = build_filter_clause(filters, 2);
        values.insert(0, Value::Text(entity_type.to_string()));
        let from =
            format!("FROM entities e WHERE e.entity_type = ?1 AND e.placeholder = 0{clause}");

        let conn = acquire_lock(&self.conn);
        let total: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) {from}"),
                params_from_iter(values.iter()),
                |row| row.get(0),
            )
            .map_err(db_error("count_entities"))?;

        let limit = i64::try_from(page_size).unwrap_or(i64::MAX);
        let offset = page
            .saturating_sub(1)
            .checked_mul(page_size)
            .and_then(|skip| i64::try_from(skip).ok())
            .unwrap_or(i64::MAX);
        values.push(Value::Integer(limit));
        values.push(Value::Integer(offset));

        let mut stmt = conn
            .prepare(&format!(
                "SELECT e.id {from} ORDER BY e.id LIMIT ?{param_idx} OFFSET ?{}",
                param_idx + 1
            ))
            .map_err(db_error("query_entities"))?;
        let ids = stmt
            .query_map(params_from_iter(values.iter()), |row| row.get::<_, i64>(0))
            .map_err(db_error("query_entities"))?
            .map(|row| row.map(|id| EntityId::new(from_sql_id(id))))
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_error("query_entities"))?;

        Ok(QueryPage {
            ids,
            total_count: usize::try_from(total).unwrap_or_default(),
        })
    }

    fn delete(&self, id: EntityId) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "DELETE FROM entities WHERE id = ?1",
            params![to_sql_id(id.get())?],
        )
        .map_err(db_error("delete_entity"))?;
        Ok(())
    }

    fn create_placeholder(&self, entity_type: &str) -> Result<EntityId> {
        let fields = Record::from([("status".to_string(), PLACEHOLDER_STATUS.into())]);
        self.insert(entity_type, &fields, true)
    }

    fn is_placeholder(&self, id: EntityId) -> Result<bool> {
        let conn = acquire_lock(&self.conn);
        conn.query_row(
            "SELECT placeholder FROM entities WHERE id = ?1",
            params![to_sql_id(id.get())?],
            |row| row.get::<_, bool>(0),
        )
        .optional()
        .map(Option::unwrap_or_default)
        .map_err(db_error("entity_is_placeholder"))
    }
}

impl TaxonomyStore for SqliteStorage {
    fn term(&self, id: u64) -> Result<Option<Term>> {
        let conn = acquire_lock(&self.conn);
        conn.query_row(
            "SELECT taxonomy, name, parent FROM terms WHERE id = ?1",
            params![to_sql_id(id)?],
            |row| {
                Ok(Term {
                    id,
                    taxonomy: row.get(0)?,
                    name: row.get(1)?,
                    parent: row.get::<_, Option<i64>>(2)?.map(from_sql_id),
                })
            },
        )
        .optional()
        .map_err(db_error("get_term"))
    }

    fn find_or_create_path(&self, taxonomy: &str, path: &[String]) -> Result<u64> {
        if path.is_empty() {
            return Err(Error::InvalidInput("empty term path".to_string()));
        }
        let hierarchical = self.is_hierarchical(taxonomy);
        let conn = acquire_lock(&self.conn);
        let mut parent: Option<i64> = None;
        for name in path {
            let existing: Option<i64> = if hierarchical {
                conn.query_row(
                    "SELECT id FROM terms WHERE taxonomy = ?1 AND name = ?2 COLLATE NOCASE
                     AND parent IS ?3 ORDER BY id LIMIT 1",
                    params![taxonomy, name, parent],
                    |row| row.get(0),
                )
            } else {
                conn.query_row(
                    "SELECT id FROM terms WHERE taxonomy = ?1 AND name = ?2 COLLATE NOCASE
                     ORDER BY id LIMIT 1",
                    params![taxonomy, name],
                    |row| row.get(0),
                )
            }
            .optional()
            .map_err(db_error("find_term"))?;

            let id = if let Some(id) = existing {
                id
            } else {
                conn.execute(
                    "INSERT INTO terms (taxonomy, name, parent) VALUES (?1, ?2, ?3)",
                    params![taxonomy, name, parent.filter(|_| hierarchical)],
                )
                .map_err(db_error("create_term"))?;
                conn.last_insert_rowid()
            };
            parent = Some(id);
        }
        parent
            .map(from_sql_id)
            .ok_or_else(|| Error::InvalidInput("empty term path".to_string()))
    }

    fn is_hierarchical(&self, taxonomy: &str) -> bool {
        self.hierarchical.contains(taxonomy)
    }
}

impl PlaceholderStore for SqliteStorage {
    fn allocated(&self, job: Uuid, original: EntityId) -> Result<Option<EntityId>> {
        let conn = acquire_lock(&self.conn);
        conn.query_row(
            "SELECT allocated_id FROM placeholders WHERE job_id = ?1 AND original_id = ?2",
            params![job.to_string(), to_sql_id(original.get())?],
            |row| row.get::<_, i64>(0),
        )
        .optional()
        .map(|id| id.map(|id| EntityId::new(from_sql_id(id))))
        .map_err(db_error("get_placeholder"))
    }

    fn reserve(&self, job: Uuid, original: EntityId, allocated: EntityId) -> Result<()> {
        self.put_reservation(job, original, allocated, false)
    }

    fn remember(&self, job: Uuid, original: EntityId, allocated: EntityId) -> Result<()> {
        self.put_reservation(job, original, allocated, true)
    }

    fn promote(&self, job: Uuid, original: EntityId) -> Result<Option<EntityId>> {
        let conn = acquire_lock(&self.conn);
        conn.query_row(
            "UPDATE placeholders SET promoted = 1 WHERE job_id = ?1 AND original_id = ?2
             RETURNING allocated_id",
            params![job.to_string(), to_sql_id(original.get())?],
            |row| row.get::<_, i64>(0),
        )
        .optional()
        .map(|id| id.map(|id| EntityId::new(from_sql_id(id))))
        .map_err(db_error("promote_placeholder"))
    }

    fn unpromoted(&self, job: Uuid) -> Result<Vec<EntityId>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT allocated_id FROM placeholders WHERE job_id = ?1 AND promoted = 0
                 ORDER BY original_id",
            )
            .map_err(db_error("list_placeholders"))?;
        let ids = stmt
            .query_map(params![job.to_string()], |row| row.get::<_, i64>(0))
            .map_err(db_error("list_placeholders"))?
            .map(|row| row.map(|id| EntityId::new(from_sql_id(id))))
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_error("list_placeholders"))?;
        Ok(ids)
    }

    fn forget_job(&self, job: Uuid) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "DELETE FROM placeholders WHERE job_id = ?1",
            params![job.to_string()],
        )
        .map_err(db_error("clear_placeholders"))?;
        Ok(())
    }
}

impl MappingPreferenceStore for SqliteStorage {
    fn load_mapping(&self, user: &str, entity_type: &str) -> Result<HashMap<String, String>> {
        let conn = acquire_lock(&self.conn);
        let json: Option<String> = conn
            .query_row(
                "SELECT preferences FROM mapping_preferences WHERE user = ?1 AND entity_type = ?2",
                params![user, entity_type],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_error("get_mapping_preferences"))?;
        json.map_or_else(
            || Ok(HashMap::new()),
            |json| {
                serde_json::from_str(&json)
                    .map_err(|e| Error::operation("decode_mapping_preferences", e))
            },
        )
    }

    fn save_mapping(
        &self,
        user: &str,
        entity_type: &str,
        preferences: &HashMap<String, String>,
    ) -> Result<()> {
        let json = serde_json::to_string(preferences)
            .map_err(|e| Error::operation("encode_mapping_preferences", e))?;
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "INSERT INTO mapping_preferences (user, entity_type, preferences) VALUES (?1, ?2, ?3)
             ON CONFLICT (user, entity_type) DO UPDATE SET preferences = excluded.preferences",
            params![user, entity_type, json],
        )
        .map_err(db_error("set_mapping_preferences"))?;
        Ok(())
    }
}
