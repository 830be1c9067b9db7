//! In-process storage backends.
//!
//! Used by tests and by callers that drive the engine against data they
//! already hold in memory. Nothing is persisted.

use super::acquire_lock;
use crate::io::{
    EntityRepository, MappingPreferenceStore, PlaceholderStore, QueryPage, TaxonomyStore,
};
use crate::models::{
    Entity, EntityId, ExportFilters, PLACEHOLDER_STATUS, PlaceholderTable, Record, Term,
};
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct EntityState {
    next_id: u64,
    entities: BTreeMap<EntityId, Entity>,
}

/// In-memory [`EntityRepository`].
#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: Mutex<EntityState>,
}

impl MemoryRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entities, placeholders included.
    #[must_use]
    pub fn len(&self) -> usize {
        acquire_lock(&self.state).entities.len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns every stored entity in id order.
    #[must_use]
    pub fn all(&self) -> Vec<Entity> {
        acquire_lock(&self.state).entities.values().cloned().collect()
    }

    fn insert(&self, entity_type: &str, fields: Record, placeholder: bool) -> EntityId {
        let mut state = acquire_lock(&self.state);
        state.next_id += 1;
        let id = EntityId::new(state.next_id);
        let mut entity = Entity::new(id, entity_type, fields);
        entity.placeholder = placeholder;
        state.entities.insert(id, entity);
        id
    }
}

impl EntityRepository for MemoryRepository {
    fn exists(&self, id: EntityId) -> Result<bool> {
        Ok(acquire_lock(&self.state)
            .entities
            .get(&id)
            .is_some_and(|e| !e.placeholder))
    }

    fn type_of(&self, id: EntityId) -> Result<Option<String>> {
        Ok(acquire_lock(&self.state)
            .entities
            .get(&id)
            .map(|e| e.entity_type.clone()))
    }

    fn get(&self, id: EntityId) -> Result<Option<Entity>> {
        Ok(acquire_lock(&self.state).entities.get(&id).cloned())
    }

    fn create(&self, entity_type: &str, fields: Record) -> Result<EntityId> {
        Ok(self.insert(entity_type, fields, false))
    }

    fn update(&self, id: EntityId, fields: Record) -> Result<()> {
        let mut state = acquire_lock(&self.state);
        let entity = state
            .entities
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("entity {id}")))?;
        entity.merge(fields);
        entity.placeholder = false;
        Ok(())
    }

    fn query(
        &self,
        entity_type: &str,
        filters: &ExportFilters,
        page: usize,
        page_size: usize,
    ) -> Result<QueryPage> {
        let state = acquire_lock(&self.state);
        let matching: Vec<EntityId> = state
            .entities
            .values()
            .filter(|e| !e.placeholder && e.entity_type == entity_type && filters.matches(e))
            .map(|e| e.id)
            .collect();
        Ok(paginate(matching, page, page_size))
    }

    fn delete(&self, id: EntityId) -> Result<()> {
        acquire_lock(&self.state).entities.remove(&id);
        Ok(())
    }

    fn create_placeholder(&self, entity_type: &str) -> Result<EntityId> {
        let fields = Record::from([("status".to_string(), PLACEHOLDER_STATUS.into())]);
        Ok(self.insert(entity_type, fields, true))
    }

    fn is_placeholder(&self, id: EntityId) -> Result<bool> {
        Ok(acquire_lock(&self.state)
            .entities
            .get(&id)
            .is_some_and(|e| e.placeholder))
    }
}

/// Slices one 1-based page out of an ordered id list.
fn paginate(ids: Vec<EntityId>, page: usize, page_size: usize) -> QueryPage {
    let total_count = ids.len();
    let skip = page.saturating_sub(1).saturating_mul(page_size);
    QueryPage {
        ids: ids.into_iter().skip(skip).take(page_size).collect(),
        total_count,
    }
}

#[derive(Debug, Default)]
struct TermState {
    next_id: u64,
    terms: BTreeMap<u64, Term>,
}

/// In-memory [`TaxonomyStore`].
#[derive(Debug, Default)]
pub struct MemoryTaxonomyStore {
    state: Mutex<TermState>,
    hierarchical: HashSet<String>,
}

impl MemoryTaxonomyStore {
    /// Creates a store where every taxonomy is flat.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a taxonomy as hierarchical.
    #[must_use]
    pub fn with_hierarchical(mut self, taxonomy: impl Into<String>) -> Self {
        self.hierarchical.insert(taxonomy.into());
        self
    }

    /// Stores a term with a caller-chosen id.
    pub fn insert(&self, term: Term) {
        let mut state = acquire_lock(&self.state);
        state.next_id = state.next_id.max(term.id);
        state.terms.insert(term.id, term);
    }

    /// Returns every stored term.
    #[must_use]
    pub fn terms(&self) -> Vec<Term> {
        acquire_lock(&self.state).terms.values().cloned().collect()
    }
}

impl TaxonomyStore for MemoryTaxonomyStore {
    fn term(&self, id: u64) -> Result<Option<Term>> {
        Ok(acquire_lock(&self.state).terms.get(&id).cloned())
    }

    fn find_or_create_path(&self, taxonomy: &str, path: &[String]) -> Result<u64> {
        if path.is_empty() {
            return Err(Error::InvalidInput("empty term path".to_string()));
        }
        let hierarchical = self.is_hierarchical(taxonomy);
        let mut state = acquire_lock(&self.state);
        let mut parent = None;
        for name in path {
            let existing = state
                .terms
                .values()
                .find(|t| {
                    t.taxonomy == taxonomy
                        && t.name.eq_ignore_ascii_case(name)
                        && (!hierarchical || t.parent == parent)
                })
                .map(|t| t.id);
            let id = if let Some(id) = existing {
                id
            } else {
                state.next_id += 1;
                let id = state.next_id;
                state.terms.insert(
                    id,
                    Term {
                        id,
                        taxonomy: taxonomy.to_string(),
                        name: name.clone(),
                        parent: if hierarchical { parent } else { None },
                    },
                );
                id
            };
            parent = Some(id);
        }
        parent.ok_or_else(|| Error::InvalidInput("empty term path".to_string()))
    }

    fn is_hierarchical(&self, taxonomy: &str) -> bool {
        self.hierarchical.contains(taxonomy)
    }
}

/// In-memory [`PlaceholderStore`].
#[derive(Debug, Default)]
pub struct MemoryPlaceholderStore {
    jobs: Mutex<HashMap<Uuid, PlaceholderTable>>,
}

impl MemoryPlaceholderStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reservations held for `job`.
    #[must_use]
    pub fn reservations(&self, job: Uuid) -> usize {
        acquire_lock(&self.jobs)
            .get(&job)
            .map_or(0, PlaceholderTable::len)
    }
}

impl PlaceholderStore for MemoryPlaceholderStore {
    fn allocated(&self, job: Uuid, original: EntityId) -> Result<Option<EntityId>> {
        Ok(acquire_lock(&self.jobs)
            .get(&job)
            .and_then(|table| table.allocated(original)))
    }

    fn reserve(&self, job: Uuid, original: EntityId, allocated: EntityId) -> Result<()> {
        acquire_lock(&self.jobs)
            .entry(job)
            .or_default()
            .reserve(original, allocated);
        Ok(())
    }

    fn remember(&self, job: Uuid, original: EntityId, allocated: EntityId) -> Result<()> {
        acquire_lock(&self.jobs)
            .entry(job)
            .or_default()
            .remember(original, allocated);
        Ok(())
    }

    fn promote(&self, job: Uuid, original: EntityId) -> Result<Option<EntityId>> {
        Ok(acquire_lock(&self.jobs)
            .get_mut(&job)
            .and_then(|table| table.promote(original)))
    }

    fn unpromoted(&self, job: Uuid) -> Result<Vec<EntityId>> {
        Ok(acquire_lock(&self.jobs)
            .get(&job)
            .map(PlaceholderTable::unpromoted)
            .unwrap_or_default())
    }

    fn forget_job(&self, job: Uuid) -> Result<()> {
        acquire_lock(&self.jobs).remove(&job);
        Ok(())
    }
}

/// In-memory [`MappingPreferenceStore`].
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    preferences: Mutex<HashMap<(String, String), HashMap<String, String>>>,
}

impl MemoryPreferenceStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MappingPreferenceStore for MemoryPreferenceStore {
    fn load_mapping(&self, user: &str, entity_type: &str) -> Result<HashMap<String, String>> {
        Ok(acquire_lock(&self.preferences)
            .get(&(user.to_string(), entity_type.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn save_mapping(
        &self,
        user: &str,
        entity_type: &str,
        preferences: &HashMap<String, String>,
    ) -> Result<()> {
        acquire_lock(&self.preferences).insert(
            (user.to_string(), entity_type.to_string()),
            preferences.clone(),
        );
        Ok(())
    }
}
