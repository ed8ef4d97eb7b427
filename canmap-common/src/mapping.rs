//! Canonical mapping data model
//!
//! A mapping job produces a [`CanonicalMapping`]: the canonical tables keyed by
//! name, the list of canonical fields the job could not populate, and display
//! metadata. Each table is either a flat field map or an array of row records;
//! the shape is carried explicitly by [`TableValue`] rather than probed at the
//! call sites.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field name → value for one record
pub type FieldMap = serde_json::Map<String, Value>;

/// Table name → table value. Table names are unique by construction.
pub type TableMap = BTreeMap<String, TableValue>;

/// Runtime shape discriminator for a canonical table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableShape {
    /// Declared but unset (`null` on the wire)
    Empty,
    /// Flat field → value map
    FieldMap,
    /// Ordered list of row records
    RowArray,
}

impl TableShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableShape::Empty => "empty",
            TableShape::FieldMap => "field-map",
            TableShape::RowArray => "row-array",
        }
    }
}

impl std::fmt::Display for TableShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a row-array table.
///
/// Rows arrive as records, but the backend is free to emit bare values. Those
/// are kept as-is until a row edit normalizes the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Row {
    Record(FieldMap),
    Scalar(Value),
}

impl Row {
    /// Empty record row
    pub fn empty() -> Self {
        Row::Record(FieldMap::new())
    }

    /// Record view of this row, wrapping a bare value as `{ "value": row }`
    pub fn into_record(self) -> FieldMap {
        match self {
            Row::Record(record) => record,
            Row::Scalar(value) => {
                let mut record = FieldMap::new();
                record.insert("value".to_string(), value);
                record
            }
        }
    }

    pub fn as_record(&self) -> Option<&FieldMap> {
        match self {
            Row::Record(record) => Some(record),
            Row::Scalar(_) => None,
        }
    }
}

impl From<Value> for Row {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(record) => Row::Record(record),
            other => Row::Scalar(other),
        }
    }
}

impl From<Row> for Value {
    fn from(row: Row) -> Self {
        match row {
            Row::Record(record) => Value::Object(record),
            Row::Scalar(value) => value,
        }
    }
}

/// Value of one canonical table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum TableValue {
    Empty,
    FieldMap(FieldMap),
    RowArray(Vec<Row>),
}

impl TableValue {
    pub fn shape(&self) -> TableShape {
        match self {
            TableValue::Empty => TableShape::Empty,
            TableValue::FieldMap(_) => TableShape::FieldMap,
            TableValue::RowArray(_) => TableShape::RowArray,
        }
    }

    pub fn is_row_array(&self) -> bool {
        matches!(self, TableValue::RowArray(_))
    }

    pub fn as_field_map(&self) -> Option<&FieldMap> {
        match self {
            TableValue::FieldMap(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_rows(&self) -> Option<&[Row]> {
        match self {
            TableValue::RowArray(rows) => Some(rows),
            _ => None,
        }
    }

    /// Number of rows (row-array tables only)
    pub fn row_count(&self) -> usize {
        self.as_rows().map_or(0, <[Row]>::len)
    }
}

impl TryFrom<Value> for TableValue {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(TableValue::Empty),
            Value::Object(fields) => Ok(TableValue::FieldMap(fields)),
            Value::Array(items) => Ok(TableValue::RowArray(
                items.into_iter().map(Row::from).collect(),
            )),
            other => Err(format!(
                "table value must be an object, an array of rows, or null; got {}",
                value_kind(&other)
            )),
        }
    }
}

impl From<TableValue> for Value {
    fn from(table: TableValue) -> Self {
        match table {
            TableValue::Empty => Value::Null,
            TableValue::FieldMap(fields) => Value::Object(fields),
            TableValue::RowArray(rows) => Value::Array(rows.into_iter().map(Value::from).collect()),
        }
    }
}

/// JSON kind name, for error messages
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Canonical field the mapping job could not populate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingField {
    /// Canonical table name
    pub table: String,
    /// Canonical field name within the table
    pub field: String,
    /// Short explanation of why the value is missing
    pub reason: String,
    /// Qualitative confidence (e.g. high/medium/low)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<String>,
    /// Source field names that might map here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_fields: Option<Vec<String>>,
    /// Readable label for the table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_label: Option<String>,
    /// Readable label for the field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_label: Option<String>,
}

impl MissingField {
    pub fn new(table: impl Into<String>, field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            field: field.into(),
            reason: reason.into(),
            confidence: None,
            source_fields: None,
            table_label: None,
            field_label: None,
        }
    }
}

/// Display-only annotations. Never affects canonical values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingMetadata {
    /// When the mapping was generated (UTC)
    #[serde(default = "Utc::now", deserialize_with = "timestamp::deserialize")]
    pub generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
    /// Identifier for the canonical schema revision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    /// Table name → label
    #[serde(default)]
    pub table_labels: BTreeMap<String, String>,
    /// Table name → field name → label
    #[serde(default)]
    pub field_labels: BTreeMap<String, BTreeMap<String, String>>,
}

impl Default for MappingMetadata {
    fn default() -> Self {
        Self {
            generated_at: Utc::now(),
            warnings: None,
            model_version: None,
            table_labels: BTreeMap::new(),
            field_labels: BTreeMap::new(),
        }
    }
}

impl MappingMetadata {
    /// Field names with a known label for `table`, in label-map order
    pub fn known_fields(&self, table: &str) -> Vec<&str> {
        self.field_labels
            .get(table)
            .map(|labels| labels.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

/// Mapped canonical values plus derived missing-field state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMapping {
    #[serde(default)]
    pub mapped: TableMap,
    #[serde(default)]
    pub missing_fields: Vec<MissingField>,
    #[serde(default)]
    pub metadata: MappingMetadata,
}

impl CanonicalMapping {
    pub fn table(&self, name: &str) -> Option<&TableValue> {
        self.mapped.get(name)
    }

    /// Missing-field entries for one table
    pub fn missing_for<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a MissingField> + 'a {
        self.missing_fields.iter().filter(move |m| m.table == table)
    }

    pub fn summary(&self) -> MappingSummary {
        let mut missing_by_table: BTreeMap<String, usize> = BTreeMap::new();
        for missing in &self.missing_fields {
            *missing_by_table.entry(missing.table.clone()).or_default() += 1;
        }

        MappingSummary {
            tables: self.mapped.len(),
            row_array_tables: self.mapped.values().filter(|t| t.is_row_array()).count(),
            missing: self.missing_fields.len(),
            missing_by_table,
        }
    }
}

/// Read-only digest of a mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingSummary {
    pub tables: usize,
    pub row_array_tables: usize,
    pub missing: usize,
    pub missing_by_table: BTreeMap<String, usize>,
}

/// Accepts RFC 3339 timestamps and the offset-less form some backends emit
/// (interpreted as UTC).
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}
