//! Field formatters.
//!
//! Pure functions that coerce a raw cell string into a typed
//! [`FieldValue`]. Every formatter is total: malformed input degrades to an
//! empty or pass-through value instead of failing the row.
//!
//! Blank cells are returned as empty text for every kind except `skip`, so
//! an update can tell "cleared" apart from "column not present".

use crate::models::{DATETIME_FORMAT, FieldValue};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Entity-specific coercion callback.
///
/// Returning `None` drops the column's value from the parsed row.
pub type CustomFormatter = Arc<dyn Fn(&str) -> Option<FieldValue> + Send + Sync>;

/// How a raw cell is coerced.
#[derive(Clone)]
pub enum FormatterKind {
    /// Integer; leading digits are honoured, otherwise 0.
    Int,
    /// Boolean using the `1/yes/true/on` convention.
    Bool,
    /// Floating point; leading numeric text is honoured, otherwise 0.
    Float,
    /// JSON document; invalid JSON becomes an empty object.
    Json,
    /// Flexible date text normalised to `YYYY-MM-DD[ HH:MM:SS]`.
    Date,
    /// Comma-separated list; `\,` escapes a literal comma.
    CommaList,
    /// JSON array or `|`-separated multi-value blob.
    SerializedList,
    /// Comma- or semicolon-separated URL list.
    Urls,
    /// Always ignores the column.
    Skip,
    /// HTML-stripped, whitespace-collapsed text.
    Clean,
    /// Entity-specific callback.
    Custom(CustomFormatter),
}

impl FormatterKind {
    /// Wraps a closure as a custom formatter.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&str) -> Option<FieldValue> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Returns the formatter's name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Float => "float",
            Self::Json => "json",
            Self::Date => "date",
            Self::CommaList => "comma_list",
            Self::SerializedList => "serialized_list",
            Self::Urls => "urls",
            Self::Skip => "skip",
            Self::Clean => "clean",
            Self::Custom(_) => "custom",
        }
    }

    /// Parses a built-in formatter name.
    ///
    /// Returns `None` for unknown names and for `custom`, which cannot be
    /// named in configuration.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "int" | "integer" => Some(Self::Int),
            "bool" | "boolean" => Some(Self::Bool),
            "float" | "decimal" => Some(Self::Float),
            "json" => Some(Self::Json),
            "date" | "datetime" => Some(Self::Date),
            "comma_list" | "list" => Some(Self::CommaList),
            "serialized_list" | "serialized" => Some(Self::SerializedList),
            "urls" | "images" => Some(Self::Urls),
            "skip" => Some(Self::Skip),
            "clean" | "text" => Some(Self::Clean),
            _ => None,
        }
    }
}

impl fmt::Debug for FormatterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Coerces `raw` with the given formatter.
///
/// Returns `None` when the column's value must be ignored.
#[must_use]
pub fn format(raw: &str, kind: &FormatterKind) -> Option<FieldValue> {
    if matches!(kind, FormatterKind::Skip) {
        return None;
    }
    if let FormatterKind::Custom(callback) = kind {
        return callback(raw);
    }
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(FieldValue::Text(String::new()));
    }

    let value = match kind {
        FormatterKind::Int => FieldValue::Int(parse_int(trimmed)),
        FormatterKind::Bool => FieldValue::Bool(parse_bool(trimmed)),
        FormatterKind::Float => FieldValue::Float(parse_float(trimmed)),
        FormatterKind::Json => FieldValue::Json(parse_json(trimmed)),
        FormatterKind::Date => FieldValue::Text(normalize_date(trimmed)),
        FormatterKind::CommaList => FieldValue::List(split_comma_list(trimmed)),
        FormatterKind::SerializedList => FieldValue::List(parse_serialized_list(trimmed)),
        FormatterKind::Urls => FieldValue::List(parse_urls(trimmed)),
        FormatterKind::Clean => FieldValue::Text(clean(trimmed)),
        FormatterKind::Skip | FormatterKind::Custom(_) => return None,
    };
    Some(value)
}

static LEADING_INT: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[+-]?\d+").ok());
static LEADING_FLOAT: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?").ok());
static HTML_TAG: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").ok());
static WHITESPACE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\s+").ok());

fn leading_match<'a>(pattern: &Lazy<Option<Regex>>, s: &'a str) -> Option<&'a str> {
    pattern.as_ref()?.find(s).map(|m| m.as_str())
}

fn parse_int(s: &str) -> i64 {
    s.parse()
        .ok()
        .or_else(|| leading_match(&LEADING_INT, s).and_then(|m| m.parse().ok()))
        .unwrap_or(0)
}

fn parse_float(s: &str) -> f64 {
    s.parse()
        .ok()
        .or_else(|| leading_match(&LEADING_FLOAT, s).and_then(|m| m.parse().ok()))
        .unwrap_or(0.0)
}

/// Applies the truthy convention used by every boolean column.
#[must_use]
pub fn parse_bool(s: &str) -> bool {
    !matches!(
        s.trim().to_lowercase().as_str(),
        "" | "0" | "no" | "false" | "off"
    )
}

fn parse_json(s: &str) -> serde_json::Value {
    serde_json::from_str(s).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "invalid JSON cell, using empty object");
        serde_json::Value::Object(serde_json::Map::new())
    })
}

const DATETIME_INPUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_INPUTS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y", "%B %d, %Y", "%b %d, %Y", "%d %B %Y",
    "%d %b %Y",
];

/// Parses flexible date text.
///
/// Returns the canonical rendering, or the input unchanged if no known
/// layout matches.
#[must_use]
pub fn normalize_date(s: &str) -> String {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.naive_local().format(DATETIME_FORMAT).to_string();
    }
    for layout in DATETIME_INPUTS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, layout) {
            return dt.format(DATETIME_FORMAT).to_string();
        }
    }
    for layout in DATE_INPUTS {
        if let Ok(d) = NaiveDate::parse_from_str(s, layout) {
            return d.format("%Y-%m-%d").to_string();
        }
    }
    s.to_string()
}

/// Splits a comma list, honouring `\,` as an escaped comma.
#[must_use]
pub fn split_comma_list(s: &str) -> Vec<String> {
    split_escaped(s, &[','])
}

/// Splits on any of `separators`; a backslash before one keeps it literal.
fn split_escaped(s: &str, separators: &[char]) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek().is_some_and(|next| separators.contains(next)) => {
                current.extend(chars.next());
            },
            c if separators.contains(&c) => items.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    items.push(current);
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Joins list items for export, escaping embedded commas.
#[must_use]
pub fn join_comma_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| item.replace(',', "\\,"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_serialized_list(s: &str) -> Vec<String> {
    if let Ok(serde_json::Value::Array(items)) = serde_json::from_str::<serde_json::Value>(s) {
        return items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            })
            .collect();
    }
    s.split('|')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

fn parse_urls(s: &str) -> Vec<String> {
    split_escaped(s, &[',', ';'])
        .into_iter()
        .map(|url| url.replace(' ', "%20"))
        .collect()
}

/// Strips HTML tags and collapses whitespace.
#[must_use]
pub fn clean(s: &str) -> String {
    let stripped = HTML_TAG
        .as_ref()
        .map_or_else(|| s.to_string(), |re| re.replace_all(s, "").into_owned());
    WHITESPACE
        .as_ref()
        .map_or(stripped.clone(), |re| re.replace_all(&stripped, " ").into_owned())
        .trim()
        .to_string()
}

static DEFAULT_FORMATTER: FormatterKind = FormatterKind::Clean;

/// Formatter bindings by logical field name.
///
/// A key ending in `:` binds a whole dynamic family (`meta:`). Fields
/// without a binding use [`FormatterKind::Clean`].
#[derive(Debug, Clone, Default)]
pub struct FormatterRegistry {
    bindings: HashMap<String, FormatterKind>,
}

impl FormatterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a formatter to a field (builder style).
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, kind: FormatterKind) -> Self {
        self.insert(field, kind);
        self
    }

    /// Binds a formatter to a field, replacing any previous binding.
    pub fn insert(&mut self, field: impl Into<String>, kind: FormatterKind) {
        self.bindings.insert(field.into(), kind);
    }

    /// Returns the explicit binding for `field`, if any.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FormatterKind> {
        self.bindings.get(field).or_else(|| {
            self.bindings
                .iter()
                .filter(|(key, _)| key.ends_with(':') && field.starts_with(key.as_str()))
                .max_by_key(|(key, _)| key.len())
                .map(|(_, kind)| kind)
        })
    }

    /// Returns the formatter to apply to `field`.
    #[must_use]
    pub fn formatter_for(&self, field: &str) -> &FormatterKind {
        self.get(field).unwrap_or(&DEFAULT_FORMATTER)
    }

    /// Applies every binding from `overrides` on top of this registry.
    pub fn extend(&mut self, overrides: &Self) {
        for (field, kind) in &overrides.bindings {
            self.bindings.insert(field.clone(), kind.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("42", 42 ; "plain")]
    #[test_case(" -7 ", -7 ; "negative padded")]
    #[test_case("12abc", 12 ; "leading digits")]
    #[test_case("abc", 0 ; "garbage")]
    fn test_int(raw: &str, expected: i64) {
        assert_eq!(format(raw, &FormatterKind::Int), Some(FieldValue::Int(expected)));
    }

    #[test_case("1", true)]
    #[test_case("yes", true)]
    #[test_case("TRUE", true)]
    #[test_case("anything", true)]
    #[test_case("0", false)]
    #[test_case("no", false)]
    #[test_case("False", false)]
    fn test_bool(raw: &str, expected: bool) {
        assert_eq!(format(raw, &FormatterKind::Bool), Some(FieldValue::Bool(expected)));
    }

    #[test]
    fn test_float() {
        assert_eq!(format("9.95", &FormatterKind::Float), Some(FieldValue::Float(9.95)));
        assert_eq!(format("3.5kg", &FormatterKind::Float), Some(FieldValue::Float(3.5)));
    }

    #[test]
    fn test_blank_cell_is_empty_text() {
        assert_eq!(
            format("  ", &FormatterKind::Int),
            Some(FieldValue::Text(String::new()))
        );
    }

    #[test]
    fn test_invalid_json_is_empty_object() {
        let value = format("{not json", &FormatterKind::Json);
        assert_eq!(value, Some(FieldValue::Json(serde_json::json!({}))));

        let value = format(r#"{"size":"L"}"#, &FormatterKind::Json);
        assert_eq!(value, Some(FieldValue::Json(serde_json::json!({"size": "L"}))));
    }

    #[test_case("2024-03-05", "2024-03-05" ; "iso date")]
    #[test_case("2024/03/05", "2024-03-05" ; "slashed")]
    #[test_case("03/05/2024", "2024-03-05" ; "us order")]
    #[test_case("March 5, 2024", "2024-03-05" ; "long month")]
    #[test_case("2024-03-05T10:20:30", "2024-03-05 10:20:30" ; "iso datetime")]
    #[test_case("2024-03-05 10:20", "2024-03-05 10:20:00" ; "no seconds")]
    #[test_case("next tuesday", "next tuesday" ; "unparseable passthrough")]
    fn test_date(raw: &str, expected: &str) {
        assert_eq!(format(raw, &FormatterKind::Date), Some(FieldValue::from(expected)));
    }

    #[test]
    fn test_comma_list_with_escapes() {
        assert_eq!(
            split_comma_list(r"red, green\, dark ,, blue"),
            vec!["red", "green, dark", "blue"]
        );
        let items = vec!["a".to_string(), "b, c".to_string()];
        assert_eq!(split_comma_list(&join_comma_list(&items)), items);
    }

    #[test]
    fn test_serialized_list() {
        assert_eq!(
            format(r#"["a", 2, "c"]"#, &FormatterKind::SerializedList),
            Some(FieldValue::List(vec!["a".into(), "2".into(), "c".into()]))
        );
        assert_eq!(
            format("a | b|c", &FormatterKind::SerializedList),
            Some(FieldValue::List(vec!["a".into(), "b".into(), "c".into()]))
        );
    }

    #[test]
    fn test_urls() {
        assert_eq!(
            format(
                "http://x.test/a b.png; http://x.test/c.png,",
                &FormatterKind::Urls
            ),
            Some(FieldValue::List(vec![
                "http://x.test/a%20b.png".into(),
                "http://x.test/c.png".into()
            ]))
        );
    }

    #[test]
    fn test_urls_honour_escaped_commas() {
        let urls = vec![
            "http://x.test/w_300,h_200/a.png".to_string(),
            "http://x.test/b.png".to_string(),
        ];
        let exported = join_comma_list(&urls);
        assert_eq!(exported, "http://x.test/w_300\\,h_200/a.png, http://x.test/b.png");
        assert_eq!(format(&exported, &FormatterKind::Urls), Some(FieldValue::List(urls)));
    }

    #[test]
    fn test_skip_and_clean() {
        assert_eq!(format("anything", &FormatterKind::Skip), None);
        assert_eq!(
            format("<b>Bold</b>\n  text ", &FormatterKind::Clean),
            Some(FieldValue::from("Bold text"))
        );
    }

    #[test]
    fn test_custom() {
        let kind = FormatterKind::custom(|raw| Some(FieldValue::from(raw.to_uppercase())));
        assert_eq!(format("abc", &kind), Some(FieldValue::from("ABC")));
        assert_eq!(kind.name(), "custom");
    }

    #[test]
    fn test_registry_family_binding() {
        let registry = FormatterRegistry::new()
            .with("price", FormatterKind::Float)
            .with("meta:", FormatterKind::Json);

        assert_eq!(registry.formatter_for("price").name(), "float");
        assert_eq!(registry.formatter_for("meta:color").name(), "json");
        assert_eq!(registry.formatter_for("title").name(), "clean");
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(FormatterKind::parse("Integer").map(|k| k.name()), Some("int"));
        assert!(FormatterKind::parse("custom").is_none());
    }
}
