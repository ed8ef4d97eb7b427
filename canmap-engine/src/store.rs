//! Canonical data store
//!
//! Holds the current [`CanonicalMapping`] and folds every edit through the
//! reconciliation engine. Each edit builds the next mapping from the latest
//! snapshot and swaps it in whole, so a sequence of edits is applied strictly
//! in order with last-write-wins.
//!
//! Missing fields are derived state: edits can only prune the list. It is
//! replaced wholesale when a job result (or a loaded/saved mapping) arrives.

use canmap_common::{CanonicalMapping, Error, MissingField, Row, TableShape, TableValue};
use serde_json::Value;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::reconcile::{self, parse_row_field};

/// Result of one applied edit
#[derive(Debug, Clone, PartialEq)]
pub struct EditOutcome {
    /// Store revision after the edit
    pub revision: u64,
    /// Missing-field entries removed by this edit
    pub pruned: Vec<MissingField>,
}

/// In-memory holder of the mapping under review
#[derive(Debug, Default)]
pub struct CanonicalStore {
    mapping: Option<CanonicalMapping>,
    revision: u64,
}

impl CanonicalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mapping(mapping: CanonicalMapping) -> Self {
        let mut store = Self::new();
        store.replace(mapping);
        store
    }

    pub fn mapping(&self) -> Option<&CanonicalMapping> {
        self.mapping.as_ref()
    }

    /// Bumped on every replace, clear and edit
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Install a fresh mapping, replacing values and missing fields wholesale
    pub fn replace(&mut self, mapping: CanonicalMapping) {
        debug!(
            tables = mapping.mapped.len(),
            missing = mapping.missing_fields.len(),
            "Mapping replaced"
        );
        self.mapping = Some(mapping);
        self.revision += 1;
    }

    /// Drop the current mapping
    pub fn clear(&mut self) {
        if self.mapping.take().is_some() {
            self.revision += 1;
        }
    }

    /// Set a field.
    ///
    /// Field-map (or unset) tables get `field` set directly. Row-array tables
    /// treat `field` as a row address (`"<row>.<column>"`, bare column = row 0).
    pub fn apply_field_edit(&mut self, table: &str, field: &str, value: Value) -> EngineResult<EditOutcome> {
        let current = self.current()?;
        let mut next = current.clone();

        let updated = match next.mapped.remove(table) {
            Some(TableValue::RowArray(rows)) => {
                let (index, column) = parse_row_field(field);
                let known = next.metadata.known_fields(table);
                TableValue::RowArray(reconcile::set_cell(rows, index, column, value, &known)?)
            }
            Some(TableValue::FieldMap(mut fields)) => {
                fields.insert(field.to_string(), value);
                TableValue::FieldMap(fields)
            }
            Some(TableValue::Empty) | None => {
                let mut fields = canmap_common::FieldMap::new();
                fields.insert(field.to_string(), value);
                TableValue::FieldMap(fields)
            }
        };
        next.mapped.insert(table.to_string(), updated);

        debug!(table = %table, field = %field, "Field edit applied");
        Ok(self.commit(next))
    }

    /// Set one cell of a row-array table, growing it with empty rows as needed
    pub fn apply_cell_edit(
        &mut self,
        table: &str,
        row: usize,
        column: &str,
        value: Value,
    ) -> EngineResult<EditOutcome> {
        let current = self.current()?;
        let rows = take_rows(current, table)?;

        let mut next = current.clone();
        let known = current.metadata.known_fields(table);
        next.mapped.insert(
            table.to_string(),
            TableValue::RowArray(reconcile::set_cell(rows, row, column, value, &known)?),
        );

        debug!(table = %table, row, column = %column, "Cell edit applied");
        Ok(self.commit(next))
    }

    /// Append one empty record to a row-array table
    pub fn add_row(&mut self, table: &str) -> EngineResult<EditOutcome> {
        let current = self.current()?;
        let mut rows = take_rows(current, table)?;
        rows.push(Row::empty());

        let mut next = current.clone();
        let row_count = rows.len();
        next.mapped.insert(table.to_string(), TableValue::RowArray(rows));

        debug!(table = %table, rows = row_count, "Row added");
        Ok(self.commit(next))
    }

    fn current(&self) -> EngineResult<&CanonicalMapping> {
        self.mapping.as_ref().ok_or(EngineError::NoMapping)
    }

    /// Reconcile `next` against the previous missing list and swap it in
    fn commit(&mut self, mut next: CanonicalMapping) -> EditOutcome {
        let kept = reconcile::reconcile_missing(&next.missing_fields, &next.mapped);
        let pruned = next
            .missing_fields
            .iter()
            .filter(|entry| !kept.contains(entry))
            .cloned()
            .collect::<Vec<_>>();
        next.missing_fields = kept;

        if !pruned.is_empty() {
            debug!(pruned = pruned.len(), remaining = next.missing_fields.len(), "Missing fields pruned");
        }

        self.mapping = Some(next);
        self.revision += 1;
        EditOutcome {
            revision: self.revision,
            pruned,
        }
    }
}

/// Rows of a row-array (or unset) table; field-map tables are never converted
fn take_rows(mapping: &CanonicalMapping, table: &str) -> EngineResult<Vec<Row>> {
    match mapping.table(table) {
        Some(TableValue::RowArray(rows)) => Ok(rows.clone()),
        Some(TableValue::Empty) | None => Ok(Vec::new()),
        Some(other) => Err(EngineError::Common(Error::ShapeMismatch {
            table: table.to_string(),
            expected: TableShape::RowArray.as_str(),
            found: other.shape().as_str(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(value: Value) -> CanonicalStore {
        CanonicalStore::with_mapping(serde_json::from_value(value).unwrap())
    }

    fn table_json(store: &CanonicalStore, table: &str) -> Value {
        Value::from(store.mapping().unwrap().table(table).unwrap().clone())
    }

    #[test]
    fn test_borrower_name_edit_clears_missing() {
        let mut store = store(json!({
            "mapped": {"borrower": {"name": "", "loan_amount": 500000}},
            "missing_fields": [{"table": "borrower", "field": "name", "reason": "not found"}]
        }));

        let outcome = store.apply_field_edit("borrower", "name", json!("Jane Doe")).unwrap();

        assert_eq!(outcome.pruned.len(), 1);
        assert!(store.mapping().unwrap().missing_fields.is_empty());
        assert_eq!(table_json(&store, "borrower")["name"], json!("Jane Doe"));
        assert_eq!(table_json(&store, "borrower")["loan_amount"], json!(500000));
    }

    #[test]
    fn test_empty_values_keep_missing_entry() {
        for value in [json!(""), json!("   "), Value::Null] {
            let mut store = store(json!({
                "mapped": {"borrower": {"name": "x"}},
                "missing_fields": [{"table": "borrower", "field": "name", "reason": "not found"}]
            }));
            let outcome = store.apply_field_edit("borrower", "name", value).unwrap();
            assert!(outcome.pruned.is_empty());
            assert_eq!(store.mapping().unwrap().missing_fields.len(), 1);
        }
    }

    #[test]
    fn test_falsy_non_empty_values_prune() {
        for value in [json!(0), json!(false), json!({}), json!([])] {
            let mut store = store(json!({
                "mapped": {"borrower": {"flag": null}},
                "missing_fields": [{"table": "borrower", "field": "flag", "reason": "not found"}]
            }));
            store.apply_field_edit("borrower", "flag", value).unwrap();
            assert!(store.mapping().unwrap().missing_fields.is_empty());
        }
    }

    #[test]
    fn test_pruning_is_monotonic() {
        let mut store = store(json!({
            "mapped": {"borrower": {"name": null}},
            "missing_fields": [{"table": "borrower", "field": "name", "reason": "not found"}]
        }));

        store.apply_field_edit("borrower", "name", json!("Jane")).unwrap();
        store.apply_field_edit("borrower", "name", json!("")).unwrap();

        assert!(store.mapping().unwrap().missing_fields.is_empty());
    }

    enum Step {
        Field(&'static str, &'static str, Value),
        Cell(&'static str, usize, &'static str, Value),
        AddRow(&'static str),
    }

    #[test]
    fn test_pruning_is_monotonic_across_mixed_edits() {
        let mut store = store(json!({
            "mapped": {
                "borrower": {"name": "", "email": null, "loan_amount": 500000},
                "property": {"address": "  "},
                "rent_roll": [{"unit": "101", "tenant": ""}],
                "expenses": null
            },
            "missing_fields": [
                {"table": "borrower", "field": "name", "reason": "not found"},
                {"table": "borrower", "field": "email", "reason": "not found"},
                {"table": "property", "field": "address", "reason": "not found"},
                {"table": "rent_roll", "field": "tenant", "reason": "not found"},
                {"table": "expenses", "field": "taxes", "reason": "not found"}
            ],
            "metadata": {"field_labels": {"rent_roll": {"unit": "Unit", "tenant": "Tenant"}}}
        }));

        let steps = vec![
            Step::Field("borrower", "name", json!("   ")),
            Step::Cell("rent_roll", 0, "tenant", json!("Acme")),
            Step::Field("borrower", "name", json!("Jane Doe")),
            Step::AddRow("rent_roll"),
            Step::Field("borrower", "name", Value::Null),
            Step::Field("rent_roll", "1.tenant", json!("Beta LLC")),
            Step::Field("property", "address", json!(0)),
            Step::AddRow("expenses"),
            Step::Cell("expenses", 2, "taxes", json!(1200)),
            Step::Field("borrower", "email", json!(false)),
            Step::Field("property", "address", json!("")),
        ];

        let mut previous = store.mapping().unwrap().missing_fields.clone();
        for (i, step) in steps.into_iter().enumerate() {
            let outcome = match step {
                Step::Field(table, field, value) => store.apply_field_edit(table, field, value),
                Step::Cell(table, row, column, value) => store.apply_cell_edit(table, row, column, value),
                Step::AddRow(table) => store.add_row(table),
            };
            outcome.unwrap();

            let current = store.mapping().unwrap().missing_fields.clone();
            assert!(
                current.iter().all(|entry| previous.contains(entry)),
                "step {} added a missing-field entry: {:?} -> {:?}",
                i,
                previous,
                current
            );
            previous = current;
        }

        let remaining: Vec<_> = previous.iter().map(|m| (m.table.as_str(), m.field.as_str())).collect();
        assert_eq!(remaining, vec![("rent_roll", "tenant"), ("expenses", "taxes")]);
    }

    #[test]
    fn test_huge_row_index_is_rejected_without_change() {
        let mut store = store(json!({"mapped": {"rent_roll": [{"unit": "101"}]}}));
        let before = store.revision();

        let err = store.apply_cell_edit("rent_roll", usize::MAX, "tenant", json!("x")).unwrap_err();
        assert!(matches!(err, EngineError::Common(Error::RowOutOfRange { .. })));

        for field in ["18446744073709551615.tenant", "1000000000000.tenant"] {
            let err = store.apply_field_edit("rent_roll", field, json!("x")).unwrap_err();
            assert!(matches!(err, EngineError::Common(Error::RowOutOfRange { .. })));
        }

        assert_eq!(store.revision(), before);
        assert_eq!(table_json(&store, "rent_roll"), json!([{"unit": "101"}]));
    }

    #[test]
    fn test_add_row_appends_empty_record() {
        let mut store = store(json!({"mapped": {"rent_roll": [{"unit": "101"}]}}));
        store.add_row("rent_roll").unwrap();
        assert_eq!(table_json(&store, "rent_roll"), json!([{"unit": "101"}, {}]));
    }

    #[test]
    fn test_add_row_creates_array_for_unset_table() {
        let mut store = store(json!({"mapped": {"rent_roll": null}}));
        store.add_row("rent_roll").unwrap();
        store.add_row("expenses").unwrap();
        assert_eq!(table_json(&store, "rent_roll"), json!([{}]));
        assert_eq!(table_json(&store, "expenses"), json!([{}]));
    }

    #[test]
    fn test_row_ops_reject_field_map_tables() {
        let mut store = store(json!({"mapped": {"borrower": {"name": "x"}}}));
        let before = store.revision();

        let err = store.add_row("borrower").unwrap_err();
        assert!(matches!(err, EngineError::Common(Error::ShapeMismatch { .. })));
        assert!(store.apply_cell_edit("borrower", 0, "name", json!("y")).is_err());

        assert_eq!(store.revision(), before);
        assert_eq!(table_json(&store, "borrower"), json!({"name": "x"}));
    }

    #[test]
    fn test_cell_edit_extends_and_backfills_known_columns() {
        let mut store = store(json!({
            "mapped": {"rent_roll": [{"unit": "101"}]},
            "metadata": {"field_labels": {"rent_roll": {"unit": "Unit", "rent": "Monthly Rent"}}}
        }));

        store.apply_cell_edit("rent_roll", 2, "rent", json!(950)).unwrap();

        assert_eq!(
            table_json(&store, "rent_roll"),
            json!([
                {"unit": "101", "rent": ""},
                {"unit": "", "rent": ""},
                {"unit": "", "rent": 950}
            ])
        );
    }

    #[test]
    fn test_cell_edit_never_prunes_row_array_entries() {
        let mut store = store(json!({
            "mapped": {"rent_roll": [{"unit": ""}]},
            "missing_fields": [{"table": "rent_roll", "field": "unit", "reason": "not found"}]
        }));

        store.apply_cell_edit("rent_roll", 0, "unit", json!("101")).unwrap();
        store.apply_field_edit("rent_roll", "unit", json!("102")).unwrap();

        assert_eq!(store.mapping().unwrap().missing_fields.len(), 1);
    }

    #[test]
    fn test_field_edit_addresses_rows_in_row_array() {
        let mut store = store(json!({"mapped": {"rent_roll": [{"unit": "101"}, 7]}}));
        store.apply_field_edit("rent_roll", "1.unit", json!("102")).unwrap();
        assert_eq!(
            table_json(&store, "rent_roll"),
            json!([{"unit": "101"}, {"value": 7, "unit": "102"}])
        );
    }

    #[test]
    fn test_field_edit_on_unset_table_creates_field_map() {
        let mut store = store(json!({"mapped": {"notes": null}}));
        store.apply_field_edit("notes", "summary", json!("ok")).unwrap();
        assert_eq!(table_json(&store, "notes"), json!({"summary": "ok"}));
    }

    #[test]
    fn test_edit_without_mapping_fails() {
        let mut store = CanonicalStore::new();
        assert!(matches!(
            store.apply_field_edit("a", "b", json!(1)),
            Err(EngineError::NoMapping)
        ));
    }

    #[test]
    fn test_revision_tracks_changes() {
        let mut store = store(json!({"mapped": {"a": {}}}));
        let r0 = store.revision();
        let outcome = store.apply_field_edit("a", "x", json!(1)).unwrap();
        assert_eq!(outcome.revision, r0 + 1);
        store.clear();
        assert_eq!(store.revision(), r0 + 2);
        store.clear();
        assert_eq!(store.revision(), r0 + 2);
    }
}
