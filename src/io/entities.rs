//! Entity type registrations.
//!
//! An [`EntityDefinition`] bundles everything the engine needs to know about
//! one importable/exportable type: its column catalog, formatter and
//! resolver bindings, required fields, reference fields and taxonomy
//! columns. [`RepositoryProcessor`] is the generic persistence delegate
//! driven by a definition.

use super::formatter::{FormatterKind, FormatterRegistry};
use super::mapper::{ColumnMapper, DuplicateColumnPolicy};
use super::parser::FamilyTarget;
use super::resolver::{Resolver, ResolverRegistry, TERM_PATH_SEPARATOR};
use super::traits::{EntityRepository, ItemProcessor, ProcessContext, RowTarget, TaxonomyStore};
use crate::models::{
    ColumnSpec, EntityId, FieldValue, PLACEHOLDER_STATUS, ParsedRow, ProcessedItem, Record,
    RowError,
};
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Built-in listing type name.
pub const LISTING: &str = "listing";

/// Registration of one entity type.
#[derive(Debug, Clone)]
pub struct EntityDefinition {
    /// Type name (`listing`).
    pub name: String,
    /// Columns in export order.
    pub catalog: Vec<ColumnSpec>,
    /// Import coercion bindings.
    pub formatters: FormatterRegistry,
    /// Export value bindings.
    pub resolvers: ResolverRegistry,
    /// Fields that must be non-empty when an entity is created.
    pub required_on_create: Vec<String>,
    /// Fields holding ids of other entities of this type.
    pub reference_fields: Vec<String>,
    /// Taxonomy columns: field -> taxonomy.
    pub taxonomy_fields: BTreeMap<String, String>,
    /// Status given to new entities that do not carry one.
    pub default_status: String,
}

impl EntityDefinition {
    /// Starts a definition with an `ID` column.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            catalog: vec![ColumnSpec::new("id", "ID")],
            formatters: FormatterRegistry::new().with("id", FormatterKind::Int),
            resolvers: ResolverRegistry::new().with("id", Resolver::Attribute),
            required_on_create: Vec::new(),
            reference_fields: Vec::new(),
            taxonomy_fields: BTreeMap::new(),
            default_status: "draft".to_string(),
        }
    }

    /// Adds a plain attribute column.
    #[must_use]
    pub fn with_column(
        mut self,
        logical_name: &str,
        label: &str,
        formatter: Option<FormatterKind>,
    ) -> Self {
        self.catalog.push(ColumnSpec::new(logical_name, label));
        if let Some(kind) = formatter {
            self.formatters.insert(logical_name, kind);
        }
        self.resolvers.insert(logical_name, Resolver::Attribute);
        self
    }

    /// Adds a taxonomy column importing `A > B > C` paths.
    #[must_use]
    pub fn with_taxonomy(mut self, logical_name: &str, label: &str, taxonomy: &str) -> Self {
        self.catalog.push(ColumnSpec::new(logical_name, label));
        self.formatters.insert(logical_name, FormatterKind::CommaList);
        self.resolvers
            .insert(logical_name, Resolver::taxonomy(taxonomy));
        self.taxonomy_fields
            .insert(logical_name.to_string(), taxonomy.to_string());
        self
    }

    /// Adds an integer column referencing another entity of this type.
    #[must_use]
    pub fn with_reference(mut self, logical_name: &str, label: &str) -> Self {
        self = self.with_column(logical_name, label, Some(FormatterKind::Int));
        self.reference_fields.push(logical_name.to_string());
        self
    }

    /// Adds a dynamic family stored as metadata (`Meta: %s` -> `meta:`).
    #[must_use]
    pub fn with_family(mut self, logical_name: &str, label_pattern: &str, prefix: &str) -> Self {
        self.catalog
            .push(ColumnSpec::family(logical_name, label_pattern, prefix));
        self.resolvers.insert(prefix, Resolver::CustomField);
        self
    }

    /// Marks a field as required on create.
    #[must_use]
    pub fn require(mut self, logical_name: &str) -> Self {
        self.required_on_create.push(logical_name.to_string());
        self
    }

    /// Sets the status of new entities.
    #[must_use]
    pub fn with_default_status(mut self, status: impl Into<String>) -> Self {
        self.default_status = status.into();
        self
    }

    /// Sets the resolver for columns without a binding.
    #[must_use]
    pub fn with_fallback_resolver(mut self, resolver: Resolver) -> Self {
        self.resolvers = self.resolvers.with_fallback(resolver);
        self
    }

    /// Builds the column mapper for this type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the catalog is invalid.
    pub fn mapper(&self, policy: DuplicateColumnPolicy) -> Result<ColumnMapper> {
        Ok(ColumnMapper::new(&self.catalog)?.with_policy(policy))
    }

    /// Aggregation targets of the dynamic families (`meta:` -> `meta_data`).
    #[must_use]
    pub fn family_targets(&self) -> Vec<FamilyTarget> {
        family_targets(&self.catalog)
    }

    /// Fixed (non-family) columns.
    pub fn fixed_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.catalog.iter().filter(|spec| !spec.is_dynamic_family)
    }

    /// Checks the catalog and that every fixed column has a resolver.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        ColumnMapper::new(&self.catalog)?;
        self.resolvers
            .validate(self.fixed_columns().map(|spec| spec.logical_name.as_str()))
    }
}

/// Aggregation targets of the dynamic families in `catalog`.
#[must_use]
pub fn family_targets(catalog: &[ColumnSpec]) -> Vec<FamilyTarget> {
    catalog
        .iter()
        .filter(|spec| spec.is_dynamic_family)
        .filter_map(|spec| {
            spec.family_prefix
                .as_ref()
                .map(|prefix| FamilyTarget::new(prefix, format!("{}_data", spec.logical_name)))
        })
        .collect()
}

/// The built-in `listing` type.
#[must_use]
pub fn listing() -> EntityDefinition {
    EntityDefinition::new(LISTING)
        .with_column("type", "Type", None)
        .with_column("title", "Title", None)
        .with_column("status", "Status", None)
        .with_column(
            "description",
            "Description",
            Some(FormatterKind::custom(|raw| {
                Some(FieldValue::from(raw.trim()))
            })),
        )
        .with_column("published", "Published", Some(FormatterKind::Bool))
        .with_column("featured", "Featured", Some(FormatterKind::Bool))
        .with_column("price", "Price", Some(FormatterKind::Float))
        .with_column("date_created", "Date created", Some(FormatterKind::Date))
        .with_taxonomy("category_ids", "Categories", "category")
        .with_taxonomy("tag_ids", "Tags", "tag")
        .with_column("images", "Images", Some(FormatterKind::Urls))
        .with_column("attributes", "Attributes", Some(FormatterKind::Json))
        .with_reference("parent_id", "Parent")
        .with_family("meta", "Meta: %s", "meta:")
        .with_fallback_resolver(Resolver::CustomField)
        .require("title")
}

/// Registered entity types.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    definitions: HashMap<String, Arc<EntityDefinition>>,
}

impl EntityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in types.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.definitions.insert(LISTING.to_string(), Arc::new(listing()));
        registry
    }

    /// Registers a type after validating it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the definition is invalid.
    pub fn register(&mut self, definition: EntityDefinition) -> Result<()> {
        definition.validate()?;
        self.definitions
            .insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    /// Looks up a type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for an unknown type.
    pub fn get(&self, name: &str) -> Result<Arc<EntityDefinition>> {
        self.definitions
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Configuration(format!("unknown entity type '{name}'")))
    }

    /// Registered type names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Generic persistence delegate for a registered type.
pub struct RepositoryProcessor {
    definition: Arc<EntityDefinition>,
    repository: Arc<dyn EntityRepository>,
    terms: Arc<dyn TaxonomyStore>,
}

impl RepositoryProcessor {
    /// Creates a processor.
    #[must_use]
    pub fn new(
        definition: Arc<EntityDefinition>,
        repository: Arc<dyn EntityRepository>,
        terms: Arc<dyn TaxonomyStore>,
    ) -> Self {
        Self {
            definition,
            repository,
            terms,
        }
    }

    fn record_from(&self, row: &ParsedRow, ctx: &mut ProcessContext<'_>) -> Result<Record> {
        let mut record: Record = row
            .fields()
            .iter()
            .filter(|(name, _)| name.as_str() != "id")
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        for (field, taxonomy) in &self.definition.taxonomy_fields {
            if let Some(value) = record.get_mut(field) {
                *value = FieldValue::List(self.resolve_terms(taxonomy, value)?);
            }
        }

        for field in &self.definition.reference_fields {
            if let Some(value) = record.get_mut(field) {
                if let Some(resolved) = self.resolve_reference(value, ctx)? {
                    *value = FieldValue::Int(resolved);
                }
            }
        }
        Ok(record)
    }

    fn resolve_terms(&self, taxonomy: &str, value: &FieldValue) -> Result<Vec<String>> {
        let items = match value {
            FieldValue::List(items) => items.clone(),
            FieldValue::Text(text) if !text.trim().is_empty() => vec![text.clone()],
            _ => Vec::new(),
        };
        let hierarchical = self.terms.is_hierarchical(taxonomy);
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            let path: Vec<String> = if hierarchical {
                item.split(TERM_PATH_SEPARATOR.trim())
                    .map(|part| part.trim().to_string())
                    .filter(|part| !part.is_empty())
                    .collect()
            } else {
                vec![item.trim().to_string()]
            };
            if path.is_empty() || path.iter().all(String::is_empty) {
                continue;
            }
            ids.push(self.terms.find_or_create_path(taxonomy, &path)?.to_string());
        }
        Ok(ids)
    }

    /// Maps an original id to one usable in this repository, reserving a
    /// placeholder for ids not seen yet.
    fn resolve_reference(
        &self,
        value: &FieldValue,
        ctx: &mut ProcessContext<'_>,
    ) -> Result<Option<i64>> {
        let Some(original) = value
            .as_int()
            .and_then(|i| u64::try_from(i).ok())
            .filter(|i| *i > 0)
            .map(EntityId::new)
        else {
            return Ok(None);
        };

        let resolved = if self.repository.exists(original)? {
            original
        } else if let Some(allocated) = ctx.placeholders.allocated(original)? {
            allocated
        } else {
            let allocated = self.repository.create_placeholder(ctx.entity_type)?;
            tracing::debug!(%original, %allocated, "reserved placeholder for forward reference");
            ctx.placeholders.reserve(original, allocated)?;
            allocated
        };
        Ok(i64::try_from(resolved.get()).ok())
    }

    fn check_required(&self, record: &Record) -> std::result::Result<(), RowError> {
        for field in &self.definition.required_on_create {
            if record.get(field).is_none_or(FieldValue::is_empty) {
                return Err(RowError::untagged(format!("missing required field '{field}'")));
            }
        }
        Ok(())
    }

    fn with_status(&self, mut record: Record) -> Record {
        let needs_status = record
            .get("status")
            .and_then(FieldValue::as_text)
            .is_none_or(|s| s.trim().is_empty() || s == PLACEHOLDER_STATUS);
        if needs_status {
            record.insert(
                "status".to_string(),
                FieldValue::from(self.definition.default_status.as_str()),
            );
        }
        record
    }
}

fn row_failure(err: &Error) -> RowError {
    RowError::untagged(err.to_string())
}

impl ItemProcessor for RepositoryProcessor {
    fn process_item(
        &self,
        row: &ParsedRow,
        ctx: &mut ProcessContext<'_>,
    ) -> std::result::Result<ProcessedItem, RowError> {
        let record = self.record_from(row, ctx).map_err(|e| row_failure(&e))?;

        match ctx.target {
            RowTarget::Create => {
                self.check_required(&record)?;
                let id = self
                    .repository
                    .create(ctx.entity_type, self.with_status(record))
                    .map_err(|e| row_failure(&e))?;
                if !ctx.original_id.is_none() {
                    ctx.placeholders
                        .remember(ctx.original_id, id)
                        .map_err(|e| row_failure(&e))?;
                }
                Ok(ProcessedItem { id, updated: false })
            },
            RowTarget::Fill(id) => {
                self.check_required(&record)?;
                self.repository
                    .update(id, self.with_status(record))
                    .map_err(|e| row_failure(&e))?;
                ctx.placeholders
                    .promote(ctx.original_id)
                    .map_err(|e| row_failure(&e))?;
                Ok(ProcessedItem { id, updated: false })
            },
            RowTarget::Update(id) => {
                self.repository
                    .update(id, record)
                    .map_err(|e| row_failure(&e))?;
                Ok(ProcessedItem { id, updated: true })
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::traits::{JobPlaceholders, PlaceholderStore};
    use crate::storage::{MemoryPlaceholderStore, MemoryRepository, MemoryTaxonomyStore};
    use uuid::Uuid;

    fn processor() -> (RepositoryProcessor, Arc<MemoryRepository>, Arc<MemoryTaxonomyStore>) {
        let repository = Arc::new(MemoryRepository::new());
        let terms = Arc::new(MemoryTaxonomyStore::new().with_hierarchical("category"));
        let processor =
            RepositoryProcessor::new(Arc::new(listing()), repository.clone(), terms.clone());
        (processor, repository, terms)
    }

    fn row(pairs: &[(&str, FieldValue)]) -> ParsedRow {
        ParsedRow::new(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_listing_definition_is_valid() {
        let definition = listing();
        assert!(definition.validate().is_ok());
        assert_eq!(
            definition.family_targets(),
            vec![FamilyTarget::new("meta:", "meta_data")]
        );
        assert_eq!(definition.catalog.first().map(|c| c.display_label.as_str()), Some("ID"));
    }

    #[test]
    fn test_registry_unknown_type() {
        let registry = EntityRegistry::builtin();
        assert_eq!(registry.names(), vec![LISTING]);
        assert!(matches!(registry.get("nope"), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_register_rejects_unresolvable_column() {
        let mut definition = EntityDefinition::new("thing");
        definition.catalog.push(ColumnSpec::new("color", "Color"));
        let mut registry = EntityRegistry::new();
        assert!(matches!(
            registry.register(definition),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_create_requires_title_and_defaults_status() {
        let (processor, repository, _) = processor();
        let store = MemoryPlaceholderStore::new();
        let job = Uuid::now_v7();
        let mut ctx = ProcessContext {
            entity_type: LISTING,
            target: RowTarget::Create,
            original_id: EntityId::NONE,
            placeholders: JobPlaceholders::new(&store, job),
        };

        let err = processor
            .process_item(&row(&[("status", "publish".into())]), &mut ctx)
            .unwrap_err();
        assert!(err.reason.contains("title"));

        let item = processor
            .process_item(&row(&[("title", "Lamp".into())]), &mut ctx)
            .unwrap();
        let stored = repository.get(item.id).unwrap().unwrap();
        assert_eq!(stored.status(), Some("draft"));
    }

    #[test]
    fn test_taxonomy_paths_create_terms() {
        let (processor, repository, terms) = processor();
        let store = MemoryPlaceholderStore::new();
        let job = Uuid::now_v7();
        let mut ctx = ProcessContext {
            entity_type: LISTING,
            target: RowTarget::Create,
            original_id: EntityId::NONE,
            placeholders: JobPlaceholders::new(&store, job),
        };
        let item = processor
            .process_item(
                &row(&[
                    ("title", "Lamp".into()),
                    (
                        "category_ids",
                        FieldValue::List(vec!["Home > Lighting".into(), "Sale".into()]),
                    ),
                ]),
                &mut ctx,
            )
            .unwrap();

        let stored = repository.get(item.id).unwrap().unwrap();
        let ids = crate::models::term_ids(stored.field("category_ids"));
        assert_eq!(ids.len(), 2);
        let lighting = terms.term(ids[0]).unwrap().unwrap();
        assert_eq!(lighting.name, "Lighting");
        assert!(lighting.parent.is_some());
    }

    #[test]
    fn test_forward_reference_reserves_placeholder() {
        let (processor, repository, _) = processor();
        let store = MemoryPlaceholderStore::new();
        let job = Uuid::now_v7();
        let mut ctx = ProcessContext {
            entity_type: LISTING,
            target: RowTarget::Create,
            original_id: EntityId::NONE,
            placeholders: JobPlaceholders::new(&store, job),
        };
        let child = processor
            .process_item(
                &row(&[("title", "Child".into()), ("parent_id", FieldValue::Int(900))]),
                &mut ctx,
            )
            .unwrap();

        let reserved = store.allocated(job, EntityId::new(900)).unwrap().unwrap();
        assert!(repository.is_placeholder(reserved).unwrap());
        let stored = repository.get(child.id).unwrap().unwrap();
        let expected = i64::try_from(reserved.get()).unwrap();
        assert_eq!(stored.field("parent_id"), Some(&FieldValue::Int(expected)));
    }
}
