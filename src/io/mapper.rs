//! Header-to-field column mapping.
//!
//! Resolution order for each raw header (trimmed, compared case-insensitively):
//!
//! 1. Exact match against a fixed column's display label, then its logical name
//! 2. Dynamic families in registration order (`Meta: %s` -> `meta:<suffix>`)
//! 3. Otherwise the lowercased header becomes its own logical name
//!
//! Unknown columns therefore round-trip instead of being dropped.

use crate::models::{ColumnMapping, ColumnOption, ColumnSpec};
use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// What happens when two headers resolve to the same logical name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateColumnPolicy {
    /// The later column's value overwrites the earlier one.
    #[default]
    LastWins,
    /// The earlier column is kept; later duplicates are ignored.
    FirstWins,
    /// The mapping is rejected as ambiguous.
    Reject,
}

impl DuplicateColumnPolicy {
    /// Returns the policy name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LastWins => "last_wins",
            Self::FirstWins => "first_wins",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for DuplicateColumnPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DuplicateColumnPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "last_wins" | "last" => Ok(Self::LastWins),
            "first_wins" | "first" => Ok(Self::FirstWins),
            "reject" => Ok(Self::Reject),
            other => Err(Error::InvalidInput(format!(
                "unknown duplicate column policy: {other}"
            ))),
        }
    }
}

/// A dynamic family with its compiled label pattern.
#[derive(Debug, Clone)]
struct Family {
    spec: ColumnSpec,
    prefix: String,
    pattern: Regex,
}

/// Maps raw CSV headers onto a column catalog.
#[derive(Debug, Clone)]
pub struct ColumnMapper {
    fixed: Vec<ColumnSpec>,
    families: Vec<Family>,
    policy: DuplicateColumnPolicy,
}

impl ColumnMapper {
    /// Builds a mapper for a catalog.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if two fixed columns share a logical
    /// name, a family pattern has no `%s`/`%d` placeholder, or two family
    /// prefixes collide.
    pub fn new(catalog: &[ColumnSpec]) -> Result<Self> {
        let mut fixed = Vec::new();
        let mut families: Vec<Family> = Vec::new();
        let mut seen = HashSet::new();

        for spec in catalog {
            if !spec.is_dynamic_family {
                if !seen.insert(spec.logical_name.clone()) {
                    return Err(Error::Configuration(format!(
                        "duplicate column '{}' in catalog",
                        spec.logical_name
                    )));
                }
                fixed.push(spec.clone());
                continue;
            }

            let prefix = spec.family_prefix.clone().unwrap_or_default();
            if prefix.is_empty() {
                return Err(Error::Configuration(format!(
                    "column family '{}' has no prefix",
                    spec.logical_name
                )));
            }
            if let Some(other) = families
                .iter()
                .find(|f| f.prefix.starts_with(&prefix) || prefix.starts_with(&f.prefix))
            {
                return Err(Error::Configuration(format!(
                    "column family prefix '{prefix}' collides with '{}'",
                    other.prefix
                )));
            }
            families.push(Family {
                pattern: family_pattern(&spec.display_label)?,
                spec: spec.clone(),
                prefix,
            });
        }

        Ok(Self {
            fixed,
            families,
            policy: DuplicateColumnPolicy::default(),
        })
    }

    /// Sets the duplicate-column policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: DuplicateColumnPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the duplicate-column policy.
    #[must_use]
    pub const fn policy(&self) -> DuplicateColumnPolicy {
        self.policy
    }

    /// Resolves one header to a logical name.
    ///
    /// Returns an empty string for blank headers.
    #[must_use]
    pub fn detect(&self, header: &str) -> String {
        let header = header.trim();
        if header.is_empty() {
            return String::new();
        }
        let folded = header.to_lowercase();

        if let Some(spec) = self
            .fixed
            .iter()
            .find(|s| s.display_label.to_lowercase() == folded)
            .or_else(|| self.fixed.iter().find(|s| s.logical_name.to_lowercase() == folded))
        {
            return spec.logical_name.clone();
        }

        if let Some((family, suffix)) = self.match_family(header) {
            return format!("{}{suffix}", family.prefix);
        }

        folded
    }

    fn match_family<'h>(&self, header: &'h str) -> Option<(&Family, &'h str)> {
        self.families.iter().find_map(|family| {
            if let Some(suffix) = family
                .pattern
                .captures(header)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim())
                .filter(|s| !s.is_empty())
            {
                return Some((family, suffix));
            }
            // Headers already written in logical form (`meta:color`).
            let prefix_len = family.prefix.len();
            header
                .get(..prefix_len)
                .filter(|head| head.eq_ignore_ascii_case(&family.prefix))
                .and_then(|_| header.get(prefix_len..))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|suffix| (family, suffix))
        })
    }

    /// Auto-detects a mapping for a header row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if two headers resolve to the same
    /// logical name under [`DuplicateColumnPolicy::Reject`].
    pub fn map(&self, headers: &[String]) -> Result<ColumnMapping> {
        self.map_with_overrides(headers, &HashMap::new())
    }

    /// Maps a header row, letting `overrides` (column index -> logical name)
    /// take precedence over auto-detection.
    ///
    /// An empty override ignores the column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if an override index is out of range,
    /// or [`Error::Configuration`] for duplicates under the reject policy.
    pub fn map_with_overrides(
        &self,
        headers: &[String],
        overrides: &HashMap<usize, String>,
    ) -> Result<ColumnMapping> {
        if let Some(index) = overrides.keys().find(|i| **i >= headers.len()) {
            return Err(Error::InvalidInput(format!(
                "mapping override for column {index} but the file has {} columns",
                headers.len()
            )));
        }

        let mut fields: Vec<String> = headers
            .iter()
            .enumerate()
            .map(|(i, header)| {
                overrides
                    .get(&i)
                    .map_or_else(|| self.detect(header), |name| name.trim().to_string())
            })
            .collect();

        self.apply_policy(headers, &mut fields)?;
        Ok(ColumnMapping::new(headers.to_vec(), fields))
    }

    fn apply_policy(&self, headers: &[String], fields: &mut [String]) -> Result<()> {
        let mut first_seen: HashMap<String, usize> = HashMap::new();
        for (i, field) in fields.iter_mut().enumerate() {
            if field.is_empty() {
                continue;
            }
            let Some(&earlier) = first_seen.get(field.as_str()) else {
                first_seen.insert(field.clone(), i);
                continue;
            };
            match self.policy {
                DuplicateColumnPolicy::LastWins => {
                    tracing::debug!(%field, earlier, later = i, "duplicate column, later wins");
                },
                DuplicateColumnPolicy::FirstWins => {
                    tracing::debug!(%field, earlier, later = i, "duplicate column, ignoring later");
                    field.clear();
                },
                DuplicateColumnPolicy::Reject => {
                    return Err(Error::Configuration(format!(
                        "columns '{}' and '{}' both map to '{field}'",
                        headers[earlier].trim(),
                        headers[i].trim(),
                    )));
                },
            }
        }
        Ok(())
    }

    /// Lists every legal mapping target for a header.
    ///
    /// The first option is always "do not import" (empty logical name).
    #[must_use]
    pub fn options_for(&self, header: &str) -> Vec<ColumnOption> {
        let header = header.trim();
        let mut options = vec![ColumnOption {
            logical_name: String::new(),
            display_label: "Do not import".to_string(),
        }];

        options.extend(self.fixed.iter().map(|spec| ColumnOption {
            logical_name: spec.logical_name.clone(),
            display_label: spec.display_label.clone(),
        }));

        for family in &self.families {
            let suffix = family
                .pattern
                .captures(header)
                .and_then(|caps| caps.get(1))
                .map_or(header, |m| m.as_str().trim());
            if suffix.is_empty() {
                continue;
            }
            options.push(ColumnOption {
                logical_name: format!("{}{suffix}", family.prefix),
                display_label: family.spec.label_for(suffix),
            });
        }
        options
    }

    /// Returns the fixed columns in registration order.
    #[must_use]
    pub fn fixed_columns(&self) -> &[ColumnSpec] {
        &self.fixed
    }

    /// Returns the family spec whose prefix starts `logical_name`.
    #[must_use]
    pub fn family_of(&self, logical_name: &str) -> Option<&ColumnSpec> {
        self.families
            .iter()
            .find(|f| logical_name.starts_with(&f.prefix))
            .map(|f| &f.spec)
    }

    /// Returns the registered family prefixes.
    pub fn family_prefixes(&self) -> impl Iterator<Item = &str> {
        self.families.iter().map(|f| f.prefix.as_str())
    }
}

/// Compiles a family label such as `Meta: %s` into an anchored,
/// case-insensitive regex with one capture group.
fn family_pattern(label: &str) -> Result<Regex> {
    let escaped = regex::escape(label.trim());
    if !escaped.contains("%s") && !escaped.contains("%d") {
        return Err(Error::Configuration(format!(
            "column family label '{label}' has no %s or %d placeholder"
        )));
    }
    let body = escaped
        .replacen("%s", "(.+)", 1)
        .replacen("%d", r"(\d+)", 1);
    Regex::new(&format!("(?i)^{body}$"))
        .map_err(|e| Error::Configuration(format!("invalid column family label '{label}': {e}")))
}

/// Turns remembered `header -> logical name` preferences into index
/// overrides for a concrete header row.
///
/// Headers are compared trimmed and case-insensitively.
#[must_use]
pub fn overrides_from_preferences(
    headers: &[String],
    preferences: &HashMap<String, String>,
) -> HashMap<usize, String> {
    let folded: HashMap<String, &String> = preferences
        .iter()
        .map(|(header, field)| (header.trim().to_lowercase(), field))
        .collect();
    headers
        .iter()
        .enumerate()
        .filter_map(|(i, header)| {
            folded
                .get(&header.trim().to_lowercase())
                .map(|field| (i, (*field).clone()))
        })
        .collect()
}

/// Captures a confirmed mapping as `header -> logical name` preferences.
#[must_use]
pub fn preferences_from_mapping(mapping: &ColumnMapping) -> HashMap<String, String> {
    mapping
        .headers
        .iter()
        .zip(&mapping.fields)
        .filter(|(header, _)| !header.trim().is_empty())
        .map(|(header, field)| (header.trim().to_string(), field.clone()))
        .collect()
}
