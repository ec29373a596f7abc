use serde_json::Value;
use std::collections::HashMap;

use crate::domain::{
    ports::Reconcile,
    records::{render_scalar, ReconciledTable, RecordTable, RowMap},
    value_objects::{ColumnName, TableName},
};

// ─── Reconciler (implementation of the port) ───

#[derive(Default)]
pub struct Reconciler;

impl Reconciler {
    pub fn new() -> Self {
        Self
    }
}

impl Reconcile for Reconciler {
    fn reconcile(
        &self,
        _table: &TableName,
        previous: RecordTable,
        incoming: RecordTable,
        identity: &ColumnName,
    ) -> ReconciledTable {
        reconcile(previous, incoming, identity)
    }
}

/// Merge `previous ++ incoming`, keep the last record per identity and
/// normalize boolean-like columns.
///
/// Survivors stay in concatenation order, so an entity updated by `incoming`
/// moves to where its incoming record sits.
pub fn reconcile(previous: RecordTable, incoming: RecordTable, identity: &ColumnName) -> ReconciledTable {
    let mut columns = previous.columns;
    for col in incoming.columns {
        if !columns.contains(&col) {
            columns.push(col);
        }
    }

    let all: Vec<RowMap> = previous.records.into_iter().chain(incoming.records).collect();

    let mut last_seen: HashMap<String, usize> = HashMap::with_capacity(all.len());
    for (idx, record) in all.iter().enumerate() {
        last_seen.insert(identity_key(record, identity), idx);
    }

    let mut records: Vec<RowMap> = all
        .into_iter()
        .enumerate()
        .filter(|(idx, record)| last_seen.get(&identity_key(record, identity)) == Some(idx))
        .map(|(_, mut record)| {
            for col in &columns {
                record.entry(col.clone()).or_insert(Value::Null);
            }
            record
        })
        .collect();

    normalize_booleans(&columns, &mut records);

    RecordTable::new(columns, records)
}

/// `1` and `"1"` name the same entity: the previous snapshot is read back from CSV.
fn identity_key(record: &RowMap, identity: &ColumnName) -> String {
    record
        .get(identity.as_str())
        .map(render_scalar)
        .unwrap_or_default()
}

fn is_boolean_like(value: &Value) -> bool {
    match value {
        Value::Bool(_) => true,
        Value::String(s) => matches!(s.as_str(), "true" | "false" | "True" | "False"),
        _ => false,
    }
}

fn to_bool(value: &Value) -> Value {
    match value {
        Value::Bool(b) => Value::Bool(*b),
        other => Value::Bool(render_scalar(other).to_lowercase() == "true"),
    }
}

/// Rewrite columns whose present values are all boolean-like into strict booleans.
///
/// A column needs at least one non-null value to qualify. Null cells stay null;
/// an empty string is a value like any other and keeps the column untouched.
/// Snapshot cells read back empty are already null by then.
pub fn normalize_booleans(columns: &[String], records: &mut [RowMap]) {
    for col in columns {
        let mut present = records
            .iter()
            .filter_map(|r| r.get(col))
            .filter(|v| !v.is_null())
            .peekable();

        if present.peek().is_none() || !present.all(is_boolean_like) {
            continue;
        }

        for record in records.iter_mut() {
            if let Some(value) = record.get_mut(col) {
                if !value.is_null() {
                    *value = to_bool(value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> RowMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn table(columns: &[&str], records: Vec<RowMap>) -> RecordTable {
        RecordTable::new(columns.iter().map(|c| c.to_string()).collect(), records)
    }

    fn id() -> ColumnName {
        ColumnName("courses_id".into())
    }

    // ── deduplication ──

    #[test]
    fn incoming_wins_for_same_identity() {
        let previous = table(
            &["courses_id", "courses_name"],
            vec![row(&[("courses_id", json!(1)), ("courses_name", json!("A"))])],
        );
        let incoming = table(
            &["courses_id", "courses_name"],
            vec![row(&[("courses_id", json!(1)), ("courses_name", json!("B"))])],
        );

        let out = reconcile(previous, incoming, &id());

        assert_eq!(out.len(), 1);
        assert_eq!(out.records[0]["courses_name"], json!("B"));
    }

    #[test]
    fn survivors_keep_concatenation_order() {
        let previous = table(
            &["courses_id"],
            vec![
                row(&[("courses_id", json!(1))]),
                row(&[("courses_id", json!(2))]),
                row(&[("courses_id", json!(3))]),
            ],
        );
        let incoming = table(&["courses_id"], vec![row(&[("courses_id", json!(1))])]);

        let out = reconcile(previous, incoming, &id());

        let ids: Vec<_> = out.records.iter().map(|r| r["courses_id"].clone()).collect();
        assert_eq!(ids, vec![json!(2), json!(3), json!(1)]);
    }

    #[test]
    fn duplicates_inside_one_pull_keep_the_last() {
        let incoming = table(
            &["courses_id", "courses_name"],
            vec![
                row(&[("courses_id", json!(5)), ("courses_name", json!("old"))]),
                row(&[("courses_id", json!(5)), ("courses_name", json!("new"))]),
            ],
        );

        let out = reconcile(RecordTable::default(), incoming, &id());

        assert_eq!(out.len(), 1);
        assert_eq!(out.records[0]["courses_name"], json!("new"));
    }

    #[test]
    fn numeric_and_text_identities_match() {
        let previous = table(&["courses_id"], vec![row(&[("courses_id", json!("1"))])]);
        let incoming = table(&["courses_id"], vec![row(&[("courses_id", json!(1))])]);

        let out = reconcile(previous, incoming, &id());

        assert_eq!(out.len(), 1);
        assert_eq!(out.records[0]["courses_id"], json!(1));
    }

    #[test]
    fn reconcile_is_idempotent_on_same_input() {
        let incoming = table(
            &["courses_id", "courses_name"],
            vec![
                row(&[("courses_id", json!(1)), ("courses_name", json!("A"))]),
                row(&[("courses_id", json!(2)), ("courses_name", json!("B"))]),
            ],
        );

        let once = reconcile(RecordTable::default(), incoming.clone(), &id());
        let twice = reconcile(once.clone(), incoming, &id());

        assert_eq!(once, twice);
    }

    #[test]
    fn new_columns_are_appended_and_filled() {
        let previous = table(&["courses_id"], vec![row(&[("courses_id", json!(1))])]);
        let incoming = table(
            &["courses_id", "courses_name"],
            vec![row(&[("courses_id", json!(2)), ("courses_name", json!("B"))])],
        );

        let out = reconcile(previous, incoming, &id());

        assert_eq!(out.columns, vec!["courses_id", "courses_name"]);
        assert_eq!(out.records[0]["courses_name"], Value::Null);
    }

    // ── booleans ──

    #[test]
    fn boolean_like_column_becomes_strict() {
        let incoming = table(
            &["courses_id", "courses_is_public"],
            vec![
                row(&[("courses_id", json!(1)), ("courses_is_public", json!("True"))]),
                row(&[("courses_id", json!(2)), ("courses_is_public", json!("false"))]),
                row(&[("courses_id", json!(3)), ("courses_is_public", json!("true"))]),
            ],
        );

        let out = reconcile(RecordTable::default(), incoming, &id());

        let values: Vec<_> = out.records.iter().map(|r| r["courses_is_public"].clone()).collect();
        assert_eq!(values, vec![json!(true), json!(false), json!(true)]);
    }

    #[test]
    fn mixed_column_is_untouched() {
        let incoming = table(
            &["courses_id", "courses_flag"],
            vec![
                row(&[("courses_id", json!(1)), ("courses_flag", json!("True"))]),
                row(&[("courses_id", json!(2)), ("courses_flag", json!("N/A"))]),
            ],
        );

        let out = reconcile(RecordTable::default(), incoming, &id());

        assert_eq!(out.records[0]["courses_flag"], json!("True"));
        assert_eq!(out.records[1]["courses_flag"], json!("N/A"));
    }

    #[test]
    fn upper_case_true_is_not_boolean_like() {
        let incoming = table(
            &["courses_id", "courses_flag"],
            vec![row(&[("courses_id", json!(1)), ("courses_flag", json!("TRUE"))])],
        );

        let out = reconcile(RecordTable::default(), incoming, &id());

        assert_eq!(out.records[0]["courses_flag"], json!("TRUE"));
    }

    #[test]
    fn missing_cells_stay_null_in_boolean_column() {
        let incoming = table(
            &["courses_id", "courses_flag"],
            vec![
                row(&[("courses_id", json!(1)), ("courses_flag", json!(true))]),
                row(&[("courses_id", json!(2)), ("courses_flag", Value::Null)]),
                row(&[("courses_id", json!(3))]),
            ],
        );

        let out = reconcile(RecordTable::default(), incoming, &id());

        assert_eq!(out.records[0]["courses_flag"], json!(true));
        assert_eq!(out.records[1]["courses_flag"], Value::Null);
        assert_eq!(out.records[2]["courses_flag"], Value::Null);
    }

    #[test]
    fn empty_string_keeps_column_untouched() {
        let incoming = table(
            &["courses_id", "courses_flag"],
            vec![
                row(&[("courses_id", json!(1)), ("courses_flag", json!("true"))]),
                row(&[("courses_id", json!(2)), ("courses_flag", json!(""))]),
            ],
        );

        let out = reconcile(RecordTable::default(), incoming, &id());

        assert_eq!(out.records[0]["courses_flag"], json!("true"));
        assert_eq!(out.records[1]["courses_flag"], json!(""));
    }

    #[test]
    fn all_missing_column_is_not_rewritten() {
        let mut records = vec![row(&[("c", Value::Null)]), row(&[("d", json!(1))])];
        normalize_booleans(&["c".to_string()], &mut records);
        assert_eq!(records[0]["c"], Value::Null);
    }
}
