//! CSV cell rendering and spreadsheet formula neutralization.

use crate::models::{DATETIME_FORMAT, FieldValue};
use std::borrow::Cow;

/// Leading characters a spreadsheet treats as the start of a formula.
pub const FORMULA_TRIGGERS: [char; 4] = ['=', '+', '-', '@'];

/// Prefixes a single quote to text a spreadsheet would evaluate.
#[must_use]
pub fn neutralize_formula(text: &str) -> Cow<'_, str> {
    if text.starts_with(FORMULA_TRIGGERS) {
        Cow::Owned(format!("'{text}"))
    } else {
        Cow::Borrowed(text)
    }
}

/// Reverses [`neutralize_formula`].
///
/// Only a quote directly followed by a trigger character is removed, so
/// ordinary text starting with `'` is left alone.
#[must_use]
pub fn unescape_formula(text: &str) -> &str {
    match text.strip_prefix('\'') {
        Some(rest) if rest.starts_with(FORMULA_TRIGGERS) => rest,
        _ => text,
    }
}

/// Renders a resolved value as one CSV cell.
///
/// Booleans become `1`/`0` and datetimes use the canonical layout. Lists,
/// JSON and metadata have no cell representation here and render empty;
/// resolvers flatten them to text first when a column should carry them.
/// Negative numbers are neutralized like text, so `-5` is written `'-5`.
#[must_use]
pub fn format_cell(value: &FieldValue) -> String {
    match value {
        FieldValue::Text(text) => neutralize_formula(text).into_owned(),
        FieldValue::Int(i) => neutralize_formula(&i.to_string()).into_owned(),
        FieldValue::Float(f) => neutralize_formula(&f.to_string()).into_owned(),
        FieldValue::Bool(b) => String::from(if *b { "1" } else { "0" }),
        FieldValue::DateTime(dt) => dt.format(DATETIME_FORMAT).to_string(),
        FieldValue::List(_) | FieldValue::Json(_) | FieldValue::Meta(_) => String::new(),
    }
}
