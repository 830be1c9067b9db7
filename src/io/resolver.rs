//! Column value resolvers for export.
//!
//! Each export type binds its logical columns to a [`Resolver`] when it is
//! registered. Lookup is a plain map access with an optional fallback; a
//! column that has neither is a configuration error raised before the first
//! page is queried.

use super::formatter::join_comma_list;
use super::traits::TaxonomyStore;
use crate::models::{Entity, FieldValue, Term, term_ids};
use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Separator between ancestor names in a hierarchical term path.
pub const TERM_PATH_SEPARATOR: &str = " > ";

/// Upper bound on ancestor chain length, guarding against parent cycles.
const MAX_TERM_DEPTH: usize = 64;

/// Caller-supplied resolver.
pub type ResolverCallback = Arc<dyn Fn(&Entity) -> FieldValue + Send + Sync>;

/// How a logical column gets its value from an entity.
#[derive(Clone)]
pub enum Resolver {
    /// A first-class entity field (`id` resolves to the entity id).
    Attribute,
    /// Term ids rendered as names; hierarchical taxonomies as `A > B > C`.
    Taxonomy {
        /// Taxonomy holding the referenced terms.
        taxonomy: String,
    },
    /// Metadata entry (`meta:<key>`), falling back to a field of that name.
    CustomField,
    /// Arbitrary callback.
    Callback(ResolverCallback),
}

impl Resolver {
    /// Creates a taxonomy resolver.
    #[must_use]
    pub fn taxonomy(taxonomy: impl Into<String>) -> Self {
        Self::Taxonomy {
            taxonomy: taxonomy.into(),
        }
    }

    /// Wraps a closure as a resolver.
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&Entity) -> FieldValue + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(f))
    }

    /// Computes the value of `logical_name` for `entity`.
    ///
    /// # Errors
    ///
    /// Returns an error if the taxonomy store cannot be read.
    pub fn resolve(
        &self,
        logical_name: &str,
        entity: &Entity,
        terms: &dyn TaxonomyStore,
    ) -> Result<FieldValue> {
        match self {
            Self::Attribute => Ok(if logical_name == "id" {
                FieldValue::Int(i64::try_from(entity.id.get()).unwrap_or(i64::MAX))
            } else {
                flatten(entity.field(logical_name))
            }),
            Self::Taxonomy { taxonomy } => {
                resolve_terms(terms, taxonomy, entity.field(logical_name))
            },
            Self::CustomField => {
                let value = logical_name
                    .split_once(':')
                    .and_then(|(_, key)| entity.meta_value(key))
                    .or_else(|| entity.field(logical_name));
                Ok(flatten(value))
            },
            Self::Callback(callback) => Ok(callback(entity)),
        }
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attribute => f.write_str("Attribute"),
            Self::Taxonomy { taxonomy } => write!(f, "Taxonomy({taxonomy})"),
            Self::CustomField => f.write_str("CustomField"),
            Self::Callback(_) => f.write_str("Callback"),
        }
    }
}

/// Reduces structured values to the text a single cell can carry.
fn flatten(value: Option<&FieldValue>) -> FieldValue {
    match value {
        None | Some(FieldValue::Meta(_)) => FieldValue::Text(String::new()),
        Some(FieldValue::List(items)) => FieldValue::Text(join_comma_list(items)),
        Some(FieldValue::Json(serde_json::Value::String(s))) => FieldValue::Text(s.clone()),
        Some(FieldValue::Json(serde_json::Value::Null)) => FieldValue::Text(String::new()),
        Some(FieldValue::Json(json)) => FieldValue::Text(json.to_string()),
        Some(other) => other.clone(),
    }
}

fn resolve_terms(
    terms: &dyn TaxonomyStore,
    taxonomy: &str,
    value: Option<&FieldValue>,
) -> Result<FieldValue> {
    let hierarchical = terms.is_hierarchical(taxonomy);
    let mut rendered = Vec::new();
    for id in term_ids(value) {
        let label = if hierarchical {
            ancestor_chain(terms, id)?
                .into_iter()
                .map(|t| t.name)
                .collect::<Vec<_>>()
                .join(TERM_PATH_SEPARATOR)
        } else {
            terms.term(id)?.map(|t| t.name).unwrap_or_default()
        };
        if !label.is_empty() {
            rendered.push(label);
        }
    }
    Ok(FieldValue::Text(join_comma_list(&rendered)))
}

/// Returns the root-to-leaf chain ending at `id`.
///
/// # Errors
///
/// Returns an error if the taxonomy store cannot be read.
pub fn ancestor_chain(terms: &dyn TaxonomyStore, id: u64) -> Result<Vec<Term>> {
    let mut chain = Vec::new();
    let mut next = Some(id);
    while let Some(current) = next {
        if chain.len() >= MAX_TERM_DEPTH {
            tracing::warn!(term_id = id, "term ancestry too deep, truncating");
            break;
        }
        let Some(term) = terms.term(current)? else {
            break;
        };
        next = term.parent;
        chain.push(term);
    }
    chain.reverse();
    Ok(chain)
}

/// Resolver bindings for one export type.
///
/// A key ending in `:` binds a whole dynamic family (`meta:`).
#[derive(Debug, Clone, Default)]
pub struct ResolverRegistry {
    bindings: HashMap<String, Resolver>,
    fallback: Option<Resolver>,
}

impl ResolverRegistry {
    /// Creates an empty registry without a fallback.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a resolver (builder style).
    #[must_use]
    pub fn with(mut self, logical_name: impl Into<String>, resolver: Resolver) -> Self {
        self.insert(logical_name, resolver);
        self
    }

    /// Sets the resolver used for unbound columns.
    #[must_use]
    pub fn with_fallback(mut self, resolver: Resolver) -> Self {
        self.fallback = Some(resolver);
        self
    }

    /// Binds a resolver, replacing any previous binding.
    pub fn insert(&mut self, logical_name: impl Into<String>, resolver: Resolver) {
        self.bindings.insert(logical_name.into(), resolver);
    }

    /// Returns the resolver for a column.
    #[must_use]
    pub fn get(&self, logical_name: &str) -> Option<&Resolver> {
        self.bindings
            .get(logical_name)
            .or_else(|| {
                self.bindings
                    .iter()
                    .filter(|(key, _)| key.ends_with(':') && logical_name.starts_with(key.as_str()))
                    .max_by_key(|(key, _)| key.len())
                    .map(|(_, resolver)| resolver)
            })
            .or(self.fallback.as_ref())
    }

    /// Checks that every column can be resolved.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the first unresolvable column.
    pub fn validate<'a>(&self, columns: impl IntoIterator<Item = &'a str>) -> Result<()> {
        for column in columns {
            if self.get(column).is_none() {
                return Err(Error::Configuration(format!(
                    "no resolver for column '{column}'"
                )));
            }
        }
        Ok(())
    }

    /// Resolves one column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the column has no resolver, or an
    /// error if the taxonomy store cannot be read.
    pub fn resolve(
        &self,
        logical_name: &str,
        entity: &Entity,
        terms: &dyn TaxonomyStore,
    ) -> Result<FieldValue> {
        self.get(logical_name)
            .ok_or_else(|| Error::Configuration(format!("no resolver for column '{logical_name}'")))?
            .resolve(logical_name, entity, terms)
    }
}
