//! Collaborator interfaces consumed by the exchange engine.
//!
//! The engine never touches persistence directly. Storage backends implement
//! [`EntityRepository`], [`TaxonomyStore`], [`PlaceholderStore`] and
//! [`MappingPreferenceStore`];
//! entity types supply an [`ItemProcessor`] that turns a parsed row into a
//! created or updated entity.
//!
//! All collaborators take `&self` and are shared behind `Arc`, so
//! implementations use interior mutability where they need to write.

use crate::Result;
use crate::models::{
    Entity, EntityId, ExportFilters, ParsedRow, ProcessedItem, Record, RowError, Term,
};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// One page of an entity query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryPage {
    /// Ids on this page, in stable order.
    pub ids: Vec<EntityId>,
    /// Number of entities matching the filters across all pages.
    pub total_count: usize,
}

/// Persistence for entities.
///
/// # Placeholders
///
/// Placeholder records reserve an id for a forward reference. They are
/// invisible to [`exists`](Self::exists) and [`query`](Self::query), and stop
/// being placeholders the first time they are [`update`](Self::update)d.
pub trait EntityRepository: Send + Sync {
    /// Returns `true` if a non-placeholder entity with `id` exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn exists(&self, id: EntityId) -> Result<bool>;

    /// Returns the registered type of `id`, if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn type_of(&self, id: EntityId) -> Result<Option<String>>;

    /// Loads an entity, placeholders included.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, id: EntityId) -> Result<Option<Entity>>;

    /// Creates an entity and returns its new id.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity cannot be stored.
    fn create(&self, entity_type: &str, fields: Record) -> Result<EntityId>;

    /// Merges `fields` into an existing entity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`](crate::Error::NotFound) if `id` does not
    /// exist, or an error if the entity cannot be stored.
    fn update(&self, id: EntityId, fields: Record) -> Result<()>;

    /// Returns one page of ids of `entity_type` matching `filters`.
    ///
    /// `page` is 1-based.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn query(
        &self,
        entity_type: &str,
        filters: &ExportFilters,
        page: usize,
        page_size: usize,
    ) -> Result<QueryPage>;

    /// Deletes an entity. Deleting a missing id is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn delete(&self, id: EntityId) -> Result<()>;

    /// Creates an empty placeholder of `entity_type` and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the placeholder cannot be stored.
    fn create_placeholder(&self, entity_type: &str) -> Result<EntityId>;

    /// Returns `true` if `id` is still an unfilled placeholder.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn is_placeholder(&self, id: EntityId) -> Result<bool>;
}

/// Storage for taxonomy terms.
pub trait TaxonomyStore: Send + Sync {
    /// Loads a term.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn term(&self, id: u64) -> Result<Option<Term>>;

    /// Resolves a root-to-leaf path of term names, creating missing terms,
    /// and returns the leaf id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`](crate::Error::InvalidInput) for an
    /// empty path, or an error if terms cannot be stored.
    fn find_or_create_path(&self, taxonomy: &str, path: &[String]) -> Result<u64>;

    /// Returns `true` if terms of `taxonomy` may have parents.
    fn is_hierarchical(&self, taxonomy: &str) -> bool;
}

/// Remembered header mappings, keyed by user and entity type.
pub trait MappingPreferenceStore: Send + Sync {
    /// Returns stored `header -> logical name` preferences.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn load_mapping(&self, user: &str, entity_type: &str) -> Result<HashMap<String, String>>;

    /// Replaces stored preferences.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn save_mapping(
        &self,
        user: &str,
        entity_type: &str,
        preferences: &HashMap<String, String>,
    ) -> Result<()>;
}

/// Forward-reference reservations, keyed by import job.
///
/// Lives next to the placeholder entities it points at, so a resumable job
/// value stays the same size however many rows it has imported. A
/// reservation maps an id from the source file to the id allocated for it
/// here; it is *promoted* once the row carrying that original id has been
/// persisted.
pub trait PlaceholderStore: Send + Sync {
    /// Returns the id allocated for `original` in `job`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn allocated(&self, job: Uuid, original: EntityId) -> Result<Option<EntityId>>;

    /// Records an unpromoted reservation for a placeholder.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn reserve(&self, job: Uuid, original: EntityId, allocated: EntityId) -> Result<()>;

    /// Records that the row carrying `original` was created as `allocated`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn remember(&self, job: Uuid, original: EntityId, allocated: EntityId) -> Result<()>;

    /// Marks the reservation for `original` as filled and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn promote(&self, job: Uuid, original: EntityId) -> Result<Option<EntityId>>;

    /// Allocated ids of `job` that were never promoted.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn unpromoted(&self, job: Uuid) -> Result<Vec<EntityId>>;

    /// Drops every reservation of `job`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn forget_job(&self, job: Uuid) -> Result<()>;
}

/// A [`PlaceholderStore`] bound to one job.
#[derive(Clone, Copy)]
pub struct JobPlaceholders<'a> {
    store: &'a dyn PlaceholderStore,
    job: Uuid,
}

impl<'a> JobPlaceholders<'a> {
    /// Binds `store` to `job`.
    #[must_use]
    pub const fn new(store: &'a dyn PlaceholderStore, job: Uuid) -> Self {
        Self { store, job }
    }

    /// The job these reservations belong to.
    #[must_use]
    pub const fn job(&self) -> Uuid {
        self.job
    }

    /// See [`PlaceholderStore::allocated`].
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    pub fn allocated(&self, original: EntityId) -> Result<Option<EntityId>> {
        self.store.allocated(self.job, original)
    }

    /// See [`PlaceholderStore::reserve`].
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    pub fn reserve(&self, original: EntityId, allocated: EntityId) -> Result<()> {
        self.store.reserve(self.job, original, allocated)
    }

    /// See [`PlaceholderStore::remember`].
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    pub fn remember(&self, original: EntityId, allocated: EntityId) -> Result<()> {
        self.store.remember(self.job, original, allocated)
    }

    /// See [`PlaceholderStore::promote`].
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    pub fn promote(&self, original: EntityId) -> Result<Option<EntityId>> {
        self.store.promote(self.job, original)
    }
}

impl fmt::Debug for JobPlaceholders<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobPlaceholders")
            .field("job", &self.job)
            .finish_non_exhaustive()
    }
}

/// What the import engine decided to do with a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowTarget {
    /// Create a new entity.
    Create,
    /// Update an existing entity.
    Update(EntityId),
    /// Fill a placeholder reserved for this row's original id.
    Fill(EntityId),
}

/// Per-row context handed to an [`ItemProcessor`].
#[derive(Debug)]
pub struct ProcessContext<'a> {
    /// Entity type being imported.
    pub entity_type: &'a str,
    /// Where the row's data goes.
    pub target: RowTarget,
    /// Id supplied by the row, or [`EntityId::NONE`].
    pub original_id: EntityId,
    /// Placeholder reservations of the running job.
    pub placeholders: JobPlaceholders<'a>,
}

/// Persists one parsed row.
///
/// Every path must end in either a [`ProcessedItem`] or a [`RowError`];
/// the engine files errors under `failed` with the row number attached.
pub trait ItemProcessor: Send + Sync {
    /// Creates, updates, or fills the entity described by `row`.
    ///
    /// # Errors
    ///
    /// Returns a [`RowError`] describing why the row could not be persisted.
    fn process_item(
        &self,
        row: &ParsedRow,
        ctx: &mut ProcessContext<'_>,
    ) -> std::result::Result<ProcessedItem, RowError>;
}

/// Reports process memory usage.
pub trait MemoryGauge: Send + Sync {
    /// Resident memory of the current process in bytes.
    fn used_bytes(&self) -> Option<u64>;

    /// Total physical memory in bytes.
    fn total_bytes(&self) -> Option<u64>;
}
