use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// One flat record: column name → JSON value.
pub type RowMap = BTreeMap<String, Value>;

/// An ordered set of flat records sharing one column list.
///
/// Used both for the normalizer output and for the reconciled table, which
/// additionally holds exactly one record per identity value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordTable {
    pub columns: Vec<String>,
    pub records: Vec<RowMap>,
}

pub type NormalizedTable = RecordTable;
pub type ReconciledTable = RecordTable;

impl RecordTable {
    pub fn new(columns: Vec<String>, records: Vec<RowMap>) -> Self {
        Self { columns, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Render a value the way it appears in a delimited file cell.
///
/// Strings are written raw (no quotes), null is empty, nested values are
/// serialised as JSON text.
pub fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}
