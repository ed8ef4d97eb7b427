//! Reconciliation engine
//!
//! Pure functions that recompute missing-field state and normalize row shapes
//! after a mutation. Nothing here holds state; the store folds every edit
//! through these.

use canmap_common::mapping::TableMap;
use canmap_common::{Error, FieldMap, MissingField, Result, Row, TableValue};
use serde_json::Value;

/// Emptiness predicate for field-map values.
///
/// Absent, `null` and whitespace-only strings are empty. Everything else,
/// including `0`, `false`, `{}` and `[]`, holds a value.
pub fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.trim().is_empty(),
        Some(_) => false,
    }
}

/// Entries of `missing` whose referenced value is still empty in `mapped`.
///
/// Entries that point into a row-array table are always kept: row-level
/// completeness cannot be judged from a single table/field reference. The
/// result is always a subset of `missing`, in the same order.
pub fn reconcile_missing(missing: &[MissingField], mapped: &TableMap) -> Vec<MissingField> {
    missing
        .iter()
        .filter(|entry| still_missing(entry, mapped))
        .cloned()
        .collect()
}

/// Missing list to keep after the backend hands back a persisted copy.
///
/// The backend may regenerate its own list on save, but only a fresh job
/// result may add entries locally. Keeps the `local` entries the backend still
/// reports (by table and field) that are still empty in `mapped`.
pub fn carry_missing(local: &[MissingField], persisted: &[MissingField], mapped: &TableMap) -> Vec<MissingField> {
    let reported: Vec<MissingField> = local
        .iter()
        .filter(|entry| {
            persisted
                .iter()
                .any(|p| p.table == entry.table && p.field == entry.field)
        })
        .cloned()
        .collect();
    reconcile_missing(&reported, mapped)
}

fn still_missing(entry: &MissingField, mapped: &TableMap) -> bool {
    match mapped.get(&entry.table) {
        Some(TableValue::FieldMap(fields)) => is_empty_value(fields.get(&entry.field)),
        Some(TableValue::RowArray(_)) => true,
        Some(TableValue::Empty) | None => true,
    }
}

/// Every row as a record; bare values become `{ "value": row }`
pub fn normalize_rows(rows: Vec<Row>) -> Vec<FieldMap> {
    rows.into_iter().map(Row::into_record).collect()
}

/// Give every row each of `columns` it lacks, as an empty string
pub fn backfill_columns(rows: &mut [FieldMap], columns: &[&str]) {
    for row in rows.iter_mut() {
        for column in columns {
            if !row.contains_key(*column) {
                row.insert((*column).to_string(), Value::String(String::new()));
            }
        }
    }
}

/// Largest number of rows an edit may grow a row-array table to
pub const MAX_TABLE_ROWS: usize = 10_000;

/// Set `column` in row `index`, growing the table with empty rows as needed.
///
/// All rows are normalized to records and backfilled with `known_columns`.
/// Rows at or past [`MAX_TABLE_ROWS`] are rejected unless they already exist.
pub fn set_cell(
    rows: Vec<Row>,
    index: usize,
    column: &str,
    value: Value,
    known_columns: &[&str],
) -> Result<Vec<Row>> {
    let mut records = normalize_rows(rows);
    if records.len() <= index {
        let len = index
            .checked_add(1)
            .filter(|len| *len <= MAX_TABLE_ROWS)
            .ok_or(Error::RowOutOfRange {
                row: index,
                limit: MAX_TABLE_ROWS,
            })?;
        records.resize_with(len, FieldMap::new);
    }
    records[index].insert(column.to_string(), value);
    backfill_columns(&mut records, known_columns);
    Ok(records.into_iter().map(Row::Record).collect())
}

/// Row address encoded in a field key: `"<row>.<column>"`, or a bare column for row 0
pub fn parse_row_field(field: &str) -> (usize, &str) {
    if let Some((index, column)) = field.split_once('.') {
        if let Ok(index) = index.parse::<usize>() {
            if !column.is_empty() {
                return (index, column);
            }
        }
    }
    (0, field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(value: Value) -> TableValue {
        serde_json::from_value(value).unwrap()
    }

    fn mapped(entries: Vec<(&str, Value)>) -> TableMap {
        entries
            .into_iter()
            .map(|(name, value)| (name.to_string(), table(value)))
            .collect()
    }

    #[test]
    fn test_emptiness_predicate() {
        assert!(is_empty_value(None));
        assert!(is_empty_value(Some(&Value::Null)));
        assert!(is_empty_value(Some(&json!(""))));
        assert!(is_empty_value(Some(&json!(" \t\n"))));

        assert!(!is_empty_value(Some(&json!(0))));
        assert!(!is_empty_value(Some(&json!(false))));
        assert!(!is_empty_value(Some(&json!("x"))));
        assert!(!is_empty_value(Some(&json!({}))));
        assert!(!is_empty_value(Some(&json!([]))));
    }

    #[test]
    fn test_reconcile_prunes_filled_field_map_entries() {
        let mapped = mapped(vec![("borrower", json!({"name": "Jane", "email": "  "}))]);
        let missing = vec![
            MissingField::new("borrower", "name", "not found"),
            MissingField::new("borrower", "email", "not found"),
            MissingField::new("borrower", "phone", "not found"),
        ];

        let kept = reconcile_missing(&missing, &mapped);
        let fields: Vec<&str> = kept.iter().map(|m| m.field.as_str()).collect();
        assert_eq!(fields, vec!["email", "phone"]);
    }

    #[test]
    fn test_reconcile_keeps_row_array_entries() {
        let mapped = mapped(vec![("rent_roll", json!([{"unit": "101", "tenant": "Acme"}]))]);
        let missing = vec![MissingField::new("rent_roll", "tenant", "not found")];
        assert_eq!(reconcile_missing(&missing, &mapped), missing);
    }

    #[test]
    fn test_reconcile_keeps_entries_for_unset_tables() {
        let mapped = mapped(vec![("notes", Value::Null)]);
        let missing = vec![
            MissingField::new("notes", "summary", "not found"),
            MissingField::new("absent", "x", "not found"),
        ];
        assert_eq!(reconcile_missing(&missing, &mapped).len(), 2);
    }

    #[test]
    fn test_carry_missing_never_adds_entries() {
        let mapped = mapped(vec![("borrower", json!({"name": "", "phone": null, "email": "a@b.c"}))]);
        let local = vec![
            MissingField::new("borrower", "name", "not found"),
            MissingField::new("borrower", "email", "not found"),
            MissingField::new("borrower", "fax", "not found"),
        ];
        let persisted = vec![
            MissingField::new("borrower", "name", "Value missing after mapping"),
            MissingField::new("borrower", "email", "Value missing after mapping"),
            MissingField::new("borrower", "phone", "Value missing after mapping"),
        ];

        let kept = carry_missing(&local, &persisted, &mapped);

        assert_eq!(kept, vec![MissingField::new("borrower", "name", "not found")]);
    }

    #[test]
    fn test_set_cell_normalizes_and_backfills() {
        let rows = vec![Row::from(json!({"unit": "101"})), Row::from(json!("stray"))];
        let rows = set_cell(rows, 3, "rent", json!(1200), &["unit", "rent"]).unwrap();

        let as_json: Vec<Value> = rows.into_iter().map(Value::from).collect();
        assert_eq!(
            as_json,
            vec![
                json!({"unit": "101", "rent": ""}),
                json!({"value": "stray", "unit": "", "rent": ""}),
                json!({"unit": "", "rent": ""}),
                json!({"unit": "", "rent": 1200}),
            ]
        );
    }

    #[test]
    fn test_set_cell_rejects_rows_past_limit() {
        let rows = vec![Row::from(json!({"unit": "101"}))];

        for index in [usize::MAX, MAX_TABLE_ROWS, 1_000_000_000_000] {
            let err = set_cell(rows.clone(), index, "unit", json!("x"), &[]).unwrap_err();
            assert!(matches!(err, Error::RowOutOfRange { row, .. } if row == index));
        }

        let grown = set_cell(rows, MAX_TABLE_ROWS - 1, "unit", json!("x"), &[]).unwrap();
        assert_eq!(grown.len(), MAX_TABLE_ROWS);
    }

    #[test]
    fn test_backfill_keeps_unknown_columns() {
        let mut rows = vec![FieldMap::new()];
        rows[0].insert("extra".to_string(), json!("kept"));
        backfill_columns(&mut rows, &["unit"]);
        assert_eq!(Value::Object(rows[0].clone()), json!({"extra": "kept", "unit": ""}));
    }

    #[test]
    fn test_parse_row_field() {
        assert_eq!(parse_row_field("2.tenant"), (2, "tenant"));
        assert_eq!(parse_row_field("tenant"), (0, "tenant"));
        assert_eq!(parse_row_field("gross.rent"), (0, "gross.rent"));
        assert_eq!(parse_row_field("3."), (0, "3."));
    }
}
