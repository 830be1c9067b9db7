//! Raw row to [`ParsedRow`] conversion.

use super::escape::unescape_formula;
use super::formatter::{FormatterRegistry, format};
use crate::models::{ColumnMapping, FieldValue, MetaEntry, ParsedRow};
use std::collections::BTreeMap;

/// A dynamic family collected into one aggregated field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyTarget {
    /// Logical-name prefix (`meta:`).
    pub prefix: String,
    /// Field receiving the `{key, value}` entries (`meta_data`).
    pub field: String,
}

impl FamilyTarget {
    /// Creates a family target.
    #[must_use]
    pub fn new(prefix: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            field: field.into(),
        }
    }
}

/// Applies a column mapping and formatter bindings to raw rows.
#[derive(Debug, Clone)]
pub struct RowParser<'a> {
    mapping: &'a ColumnMapping,
    formatters: &'a FormatterRegistry,
    families: Vec<FamilyTarget>,
}

impl<'a> RowParser<'a> {
    /// Creates a parser.
    #[must_use]
    pub const fn new(
        mapping: &'a ColumnMapping,
        formatters: &'a FormatterRegistry,
        families: Vec<FamilyTarget>,
    ) -> Self {
        Self {
            mapping,
            formatters,
            families,
        }
    }

    /// Parses one record.
    ///
    /// Cells missing from a short record are treated as absent columns.
    /// When two columns share a logical name the later one wins.
    #[must_use]
    pub fn parse(&self, cells: &[String]) -> ParsedRow {
        let mut fields = BTreeMap::new();
        let mut aggregated: Vec<(usize, MetaEntry)> = Vec::new();

        for (index, name) in self.mapping.mapped() {
            let Some(cell) = cells.get(index) else {
                continue;
            };
            let raw = unescape_formula(cell);
            let Some(value) = format(raw, self.formatters.formatter_for(name)) else {
                continue;
            };

            match self.family_for(name) {
                Some((slot, key)) => {
                    let entry = MetaEntry::new(key, value);
                    match aggregated
                        .iter_mut()
                        .find(|(s, e)| *s == slot && e.key == entry.key)
                    {
                        Some((_, existing)) => existing.value = entry.value,
                        None => aggregated.push((slot, entry)),
                    }
                },
                None => {
                    fields.insert(name.to_string(), value);
                },
            }
        }

        for (slot, family) in self.families.iter().enumerate() {
            let entries: Vec<MetaEntry> = aggregated
                .iter()
                .filter(|(s, _)| *s == slot)
                .map(|(_, e)| e.clone())
                .collect();
            if !entries.is_empty() {
                fields.insert(family.field.clone(), FieldValue::Meta(entries));
            }
        }

        ParsedRow::new(fields)
    }

    fn family_for<'n>(&self, name: &'n str) -> Option<(usize, &'n str)> {
        self.families.iter().enumerate().find_map(|(slot, family)| {
            name.strip_prefix(family.prefix.as_str())
                .filter(|key| !key.is_empty())
                .map(|key| (slot, key))
        })
    }
}
