//! Column catalog entries and header mappings.

use serde::{Deserialize, Serialize};

/// Identifies one importable/exportable field.
///
/// Dynamic-family specs carry a label pattern containing `%s` (any text) or
/// `%d` (digits), e.g. `Meta: %s`, and match every header of that shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Canonical field name (`title`, `category_ids`, ...).
    ///
    /// For dynamic families this is the family name (`meta`).
    pub logical_name: String,
    /// Header text shown to users and written on export.
    pub display_label: String,
    /// Whether this spec matches a family of headers by pattern.
    pub is_dynamic_family: bool,
    /// Prefix prepended to the captured suffix (`meta:`).
    pub family_prefix: Option<String>,
}

impl ColumnSpec {
    /// Creates a fixed column.
    #[must_use]
    pub fn new(logical_name: impl Into<String>, display_label: impl Into<String>) -> Self {
        Self {
            logical_name: logical_name.into(),
            display_label: display_label.into(),
            is_dynamic_family: false,
            family_prefix: None,
        }
    }

    /// Creates a dynamic column family.
    ///
    /// `label_pattern` must contain `%s` or `%d`.
    #[must_use]
    pub fn family(
        logical_name: impl Into<String>,
        label_pattern: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            logical_name: logical_name.into(),
            display_label: label_pattern.into(),
            is_dynamic_family: true,
            family_prefix: Some(prefix.into()),
        }
    }

    /// Renders the display label for one family member.
    ///
    /// For fixed columns this is the display label itself.
    #[must_use]
    pub fn label_for(&self, suffix: &str) -> String {
        if self.is_dynamic_family {
            self.display_label
                .replacen("%s", suffix, 1)
                .replacen("%d", suffix, 1)
        } else {
            self.display_label.clone()
        }
    }
}

/// Ordered mapping from raw column index to logical field name.
///
/// An empty name means "ignore this column". Built once per import job from
/// the header row; only explicit overrides change it afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// Raw header text, by column index.
    pub headers: Vec<String>,
    /// Logical name, by column index.
    pub fields: Vec<String>,
}

impl ColumnMapping {
    /// Creates a mapping from parallel header and field vectors.
    #[must_use]
    pub const fn new(headers: Vec<String>, fields: Vec<String>) -> Self {
        Self { headers, fields }
    }

    /// Returns the logical name bound to `index`, if the column is mapped.
    #[must_use]
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields
            .get(index)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }

    /// Iterates over `(index, logical_name)` for every mapped column.
    pub fn mapped(&self) -> impl Iterator<Item = (usize, &str)> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, name)| !name.is_empty())
            .map(|(i, name)| (i, name.as_str()))
    }

    /// Number of raw columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the mapping has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns `true` if any column maps to `logical_name`.
    #[must_use]
    pub fn contains(&self, logical_name: &str) -> bool {
        self.fields.iter().any(|f| f == logical_name)
    }
}

/// One legal mapping target offered to the user for a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnOption {
    /// Logical name that would be assigned.
    pub logical_name: String,
    /// Label shown in the UI.
    pub display_label: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_label_for() {
        let spec = ColumnSpec::family("meta", "Meta: %s", "meta:");
        assert_eq!(spec.label_for("color"), "Meta: color");

        let fixed = ColumnSpec::new("title", "Title");
        assert_eq!(fixed.label_for("ignored"), "Title");
    }

    #[test]
    fn test_mapping_skips_ignored_columns() {
        let mapping = ColumnMapping::new(
            vec!["ID".into(), "Notes".into(), "Title".into()],
            vec!["id".into(), String::new(), "title".into()],
        );
        let mapped: Vec<_> = mapping.mapped().collect();
        assert_eq!(mapped, vec![(0, "id"), (2, "title")]);
        assert_eq!(mapping.field(1), None);
        assert!(mapping.contains("title"));
    }
}
