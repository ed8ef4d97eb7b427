//! Display labels for canonical tables and fields
//!
//! Labels resolve in a fixed order: the label attached to a missing-field
//! entry, then the metadata lookup, then the raw key. Formatting only changes
//! what is shown; the key used for lookups and edits is never touched.

use crate::mapping::{MappingMetadata, MissingField};

/// First present candidate in priority order, or the raw key.
///
/// Blank candidates count as absent.
pub fn resolve_label<'a>(explicit: Option<&'a str>, lookup: Option<&'a str>, raw: &'a str) -> &'a str {
    authored(explicit, lookup).unwrap_or(raw)
}

fn authored<'a>(explicit: Option<&'a str>, lookup: Option<&'a str>) -> Option<&'a str> {
    [explicit, lookup]
        .into_iter()
        .flatten()
        .find(|candidate| !candidate.trim().is_empty())
}

/// Render an underscore-separated key for display: `loan_amount` → `Loan Amount`
pub fn format_key(key: &str) -> String {
    key.split('_')
        .filter(|token| !token.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Resolved display label for a table
pub fn table_label(table: &str, entry: Option<&MissingField>, metadata: &MappingMetadata) -> String {
    let explicit = entry.and_then(|m| m.table_label.as_deref());
    let lookup = metadata.table_labels.get(table).map(String::as_str);
    display(explicit, lookup, table)
}

/// Resolved display label for a field within a table
pub fn field_label(
    table: &str,
    field: &str,
    entry: Option<&MissingField>,
    metadata: &MappingMetadata,
) -> String {
    let explicit = entry.and_then(|m| m.field_label.as_deref());
    let lookup = metadata
        .field_labels
        .get(table)
        .and_then(|labels| labels.get(field))
        .map(String::as_str);
    display(explicit, lookup, field)
}

/// Authored labels are shown verbatim; a raw-key fallback is formatted.
fn display(explicit: Option<&str>, lookup: Option<&str>, raw: &str) -> String {
    match authored(explicit, lookup) {
        Some(label) => label.to_string(),
        None => format_key(raw),
    }
}
