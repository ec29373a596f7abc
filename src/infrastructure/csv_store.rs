use serde_json::Value;
use std::path::Path;
use tracing::debug;

use crate::domain::{
    error::PipelineError,
    records::{render_scalar, RecordTable, RowMap},
};

/// Read a per-table snapshot CSV. A missing file means "no previous snapshot".
///
/// Every cell comes back as a string; empty cells become `null`.
pub fn read_snapshot(path: &Path) -> Result<Option<RecordTable>, PipelineError> {
    if !path.exists() {
        return Ok(None);
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| PipelineError::malformed(path, e))?;

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| PipelineError::malformed(path, e))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| PipelineError::malformed(path, e))?;
        let record: RowMap = columns
            .iter()
            .zip(row.iter())
            .map(|(col, cell)| {
                let value = if cell.is_empty() {
                    Value::Null
                } else {
                    Value::String(cell.to_string())
                };
                (col.clone(), value)
            })
            .collect();
        records.push(record);
    }

    debug!(path = %path.display(), rows = records.len(), "snapshot read");
    Ok(Some(RecordTable::new(columns, records)))
}

/// Write `table` as CSV. The file is written next to `path` and renamed over
/// it so a crash never leaves a half-written snapshot behind.
pub fn write_snapshot(path: &Path, table: &RecordTable) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("csv.tmp");

    {
        let mut writer = csv::Writer::from_path(&tmp).map_err(|e| PipelineError::malformed(&tmp, e))?;
        writer
            .write_record(&table.columns)
            .map_err(|e| PipelineError::malformed(&tmp, e))?;
        for record in &table.records {
            let cells = table
                .columns
                .iter()
                .map(|col| record.get(col).map(render_scalar).unwrap_or_default());
            writer
                .write_record(cells)
                .map_err(|e| PipelineError::malformed(&tmp, e))?;
        }
        writer.flush()?;
    }

    std::fs::rename(&tmp, path)?;
    debug!(path = %path.display(), rows = table.len(), "snapshot written");
    Ok(())
}
