use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, instrument, warn};

use crate::domain::{
    error::PipelineError,
    records::{NormalizedTable, RowMap},
    table_spec::TableSpec,
    value_objects::DataFormat,
};

/// Read an artifact, flatten its records and project them onto `spec.fields`.
///
/// The result carries prefixed column names (`courses_name`) in projection
/// order. Projected fields no record has are left out of the column list;
/// records lacking a field other records have get `null` for it.
#[instrument(name = "normalize_table", skip(path, spec), fields(db.table = %spec.table, path = %path.display()), level = "info")]
pub fn normalize(path: &Path, format: DataFormat, spec: &TableSpec) -> Result<NormalizedTable, PipelineError> {
    let raw = read_records(path, format)?;
    let table = project(raw, spec)?;
    debug!(table = %spec.table, records = table.len(), columns = table.columns.len(), "normalized");
    Ok(table)
}

/// Parse an artifact into flat records keyed by dotted source path.
pub fn read_records(path: &Path, format: DataFormat) -> Result<Vec<RowMap>, PipelineError> {
    match format {
        DataFormat::Jsonl => read_jsonl(path),
        DataFormat::Csv => read_delimited(path, b','),
        DataFormat::Tsv => read_delimited(path, b'\t'),
        DataFormat::Parquet => Err(PipelineError::malformed(
            path,
            "parquet artifacts cannot be normalized; request csv, tsv or jsonl",
        )),
    }
}

fn read_jsonl(path: &Path) -> Result<Vec<RowMap>, PipelineError> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line)
            .map_err(|e| PipelineError::malformed(path, format!("line {}: {}", idx + 1, e)))?;
        let Value::Object(object) = value else {
            return Err(PipelineError::malformed(
                path,
                format!("line {}: expected a JSON object", idx + 1),
            ));
        };
        let mut flat = RowMap::new();
        flatten_into(&mut flat, None, object);
        records.push(flat);
    }

    Ok(records)
}

/// Nested objects become dotted paths; arrays and scalars are leaves.
fn flatten_into(out: &mut RowMap, prefix: Option<&str>, object: Map<String, Value>) {
    for (key, value) in object {
        let path = match prefix {
            Some(p) => format!("{}.{}", p, key),
            None => key,
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => flatten_into(out, Some(&path), inner),
            leaf => {
                out.insert(path, leaf);
            }
        }
    }
}

/// Delimited artifacts come from the platform's expanded mode, so their
/// headers are already dotted paths. Empty cells are missing values.
fn read_delimited(path: &Path, delimiter: u8) -> Result<Vec<RowMap>, PipelineError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_path(path)
        .map_err(|e| PipelineError::malformed(path, e))?;

    let headers = reader
        .headers()
        .map_err(|e| PipelineError::malformed(path, e))?
        .clone();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| PipelineError::malformed(path, e))?;
        let flat: RowMap = headers
            .iter()
            .zip(row.iter())
            .filter(|(_, cell)| !cell.is_empty())
            .map(|(h, cell)| (h.to_string(), Value::String(cell.to_string())))
            .collect();
        records.push(flat);
    }

    Ok(records)
}

/// Keep only projected fields, in projection order, under their prefixed names.
pub fn project(raw: Vec<RowMap>, spec: &TableSpec) -> Result<NormalizedTable, PipelineError> {
    let present: HashSet<&str> = raw.iter().flat_map(|r| r.keys().map(String::as_str)).collect();

    let kept: Vec<_> = spec
        .fields
        .iter()
        .filter(|f| {
            let found = present.contains(f.as_str());
            if !found && !raw.is_empty() {
                warn!(table = %spec.table, field = %f.as_str(), "projected field missing from every record");
            }
            found
        })
        .map(|f| (f.clone(), f.prefixed(&spec.table)))
        .collect();

    let identity = spec.identity_column();
    if !raw.is_empty() && !kept.iter().any(|(_, col)| *col == identity) {
        return Err(PipelineError::MissingIdentity {
            table: spec.table.0.clone(),
            column: identity.0,
        });
    }

    let records = raw
        .into_iter()
        .map(|mut source| {
            kept.iter()
                .map(|(field, column)| {
                    let value = source.remove(field.as_str()).unwrap_or(Value::Null);
                    (column.0.clone(), value)
                })
                .collect::<RowMap>()
        })
        .collect();

    Ok(NormalizedTable::new(
        kept.into_iter().map(|(_, col)| col.0).collect(),
        records,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn courses_spec() -> TableSpec {
        TableSpec::new(
            "courses",
            "incremental",
            vec!["key.id".into(), "value.name".into(), "meta.ts".into()],
            "MERGE INTO canvas_courses ... VALUES (:1, :2, :3)".into(),
            None,
            3,
        )
        .unwrap()
    }

    fn write(content: &str, ext: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(ext).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    // ── JSONL ──

    #[test]
    fn jsonl_is_flattened_projected_and_prefixed() {
        let file = write(
            concat!(
                r#"{"key":{"id":1},"value":{"name":"Intro","workflow_state":"available"},"meta":{"ts":"2024-05-01T00:00:00Z"}}"#,
                "\n",
                r#"{"key":{"id":2},"value":{"name":"Algebra"},"meta":{"ts":"2024-05-02T00:00:00Z"}}"#,
                "\n"
            ),
            ".json",
        );

        let table = normalize(file.path(), DataFormat::Jsonl, &courses_spec()).unwrap();

        assert_eq!(table.columns, vec!["courses_id", "courses_name", "courses_ts"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.records[0]["courses_id"], json!(1));
        assert_eq!(table.records[1]["courses_name"], json!("Algebra"));
        assert!(!table.records[0].contains_key("courses_workflow_state"));
    }

    #[test]
    fn field_absent_everywhere_is_omitted() {
        let file = write("{\"key\":{\"id\":1},\"value\":{\"name\":\"A\"}}\n", ".json");

        let table = normalize(file.path(), DataFormat::Jsonl, &courses_spec()).unwrap();

        assert_eq!(table.columns, vec!["courses_id", "courses_name"]);
    }

    #[test]
    fn field_absent_in_some_records_is_null() {
        let file = write(
            "{\"key\":{\"id\":1},\"value\":{\"name\":\"A\"}}\n{\"key\":{\"id\":2}}\n",
            ".json",
        );

        let table = normalize(file.path(), DataFormat::Jsonl, &courses_spec()).unwrap();

        assert_eq!(table.records[1]["courses_name"], Value::Null);
    }

    #[test]
    fn deep_nesting_and_arrays() {
        let spec = TableSpec::new(
            "quizzes",
            "snapshot",
            vec!["key.id".into(), "value.settings.time.limit".into(), "value.tags".into()],
            "INSERT ... (?, ?, ?)".into(),
            None,
            1,
        )
        .unwrap();
        let file = write(
            "{\"key\":{\"id\":9},\"value\":{\"settings\":{\"time\":{\"limit\":30}},\"tags\":[\"a\",\"b\"]}}\n",
            ".json",
        );

        let table = normalize(file.path(), DataFormat::Jsonl, &spec).unwrap();

        assert_eq!(table.records[0]["quizzes_settings.time.limit"], json!(30));
        assert_eq!(table.records[0]["quizzes_tags"], json!(["a", "b"]));
    }

    #[test]
    fn blank_lines_are_ignored() {
        let file = write("\n{\"key\":{\"id\":1}}\n\n", ".json");
        let table = normalize(file.path(), DataFormat::Jsonl, &courses_spec()).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn empty_file_gives_empty_table() {
        let file = write("", ".json");
        let table = normalize(file.path(), DataFormat::Jsonl, &courses_spec()).unwrap();
        assert!(table.is_empty());
        assert!(table.columns.is_empty());
    }

    #[test]
    fn unparseable_line_is_malformed() {
        let file = write("{\"key\":{\"id\":1}}\n{not json\n", ".json");
        let err = normalize(file.path(), DataFormat::Jsonl, &courses_spec()).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedRecordFile { .. }));
        assert!(err.to_string().contains("line 2"), "{err}");
    }

    #[test]
    fn records_without_identity_are_rejected() {
        let file = write("{\"value\":{\"name\":\"A\"}}\n", ".json");
        let err = normalize(file.path(), DataFormat::Jsonl, &courses_spec()).unwrap_err();
        assert!(
            matches!(err, PipelineError::MissingIdentity { ref column, .. } if column == "courses_id"),
            "{err}"
        );
    }

    // ── delimited ──

    #[test]
    fn csv_uses_dotted_headers() {
        let file = write("key.id,value.name,value.extra\n1,Intro,x\n2,,y\n", ".csv");

        let table = normalize(file.path(), DataFormat::Csv, &courses_spec()).unwrap();

        assert_eq!(table.columns, vec!["courses_id", "courses_name"]);
        assert_eq!(table.records[0]["courses_id"], json!("1"));
        assert_eq!(table.records[1]["courses_name"], Value::Null);
    }

    #[test]
    fn tsv_is_tab_delimited() {
        let file = write("key.id\tvalue.name\n7\tGeometry\n", ".tsv");
        let table = normalize(file.path(), DataFormat::Tsv, &courses_spec()).unwrap();
        assert_eq!(table.records[0]["courses_name"], json!("Geometry"));
    }

    #[test]
    fn parquet_is_reported_malformed() {
        let file = write("PAR1", ".parquet");
        let err = normalize(file.path(), DataFormat::Parquet, &courses_spec()).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedRecordFile { .. }));
    }
}
