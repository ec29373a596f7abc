use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::domain::{
    error::PipelineError,
    load_report::LoadReport,
    ports::TargetStore,
    records::{render_scalar, RecordTable},
    table_spec::TableSpec,
    value_objects::TableName,
};
use crate::infrastructure::csv_store::read_snapshot;

/// Result of loading every snapshot found in the final directory.
#[derive(Debug, Default)]
pub struct DirectoryLoad {
    pub loaded: Vec<(TableName, Result<LoadReport, PipelineError>)>,
    /// File stems that matched no configured table.
    pub skipped: Vec<String>,
}

// ─── Loader ───

pub struct Loader {
    store: Arc<dyn TargetStore>,
    batch_size: usize,
}

impl Loader {
    pub fn new(store: Arc<dyn TargetStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Merge `records` into the target with `spec.merge_statement`.
    ///
    /// Rows go out in batches of `batch_size`; rejected rows are collected in
    /// the report with their input offset. The whole table commits once.
    /// Every non-null cell is bound as its text rendering, so a column binds
    /// the same SQL type whether its rows came from a fresh pull or from the
    /// snapshot on disk.
    #[instrument(name = "load_table", skip(self, spec, records), fields(db.table = %spec.table, rows = records.len()), level = "info")]
    pub async fn load(&self, spec: &TableSpec, records: &RecordTable) -> Result<LoadReport, PipelineError> {
        let table = &spec.table;
        let mut report = LoadReport::default();
        if records.is_empty() {
            return Ok(report);
        }

        let load_err = |e: anyhow::Error| PipelineError::Load {
            table: table.0.clone(),
            reason: format!("{:#}", e),
        };

        let columns = spec.columns();
        let rows: Vec<Vec<Value>> = records
            .records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|col| bind_value(record.get(col.as_str())))
                    .collect()
            })
            .collect();

        let mut session = self.store.open_session().await.map_err(load_err)?;

        for (idx, batch) in rows.chunks(self.batch_size).enumerate() {
            let start = idx * self.batch_size;
            let outcome = session
                .execute_batch(&spec.merge_statement, batch)
                .await
                .map_err(load_err)?;
            report.absorb(start, batch.len(), outcome);
        }

        session.commit().await.map_err(load_err)?;

        if report.has_row_errors() {
            for row_error in &report.row_errors {
                error!(table = %table, offset = row_error.offset, message = %row_error.message, "row rejected");
            }
        }
        info!(
            table = %table,
            rows_affected = report.rows_affected,
            batches = report.batches,
            row_errors = report.row_errors.len(),
            "rows updated or inserted"
        );

        Ok(report)
    }

    /// Load every `{table}.csv` in `final_dir` whose stem names a configured table.
    pub async fn load_directory(&self, final_dir: &Path, specs: &[TableSpec]) -> Result<DirectoryLoad, PipelineError> {
        if !final_dir.is_dir() {
            error!(path = %final_dir.display(), "destination is not a valid directory");
            return Err(PipelineError::DestinationNotReady(final_dir.to_path_buf()));
        }

        let mut files: Vec<_> = std::fs::read_dir(final_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "csv"))
            .collect();
        files.sort();

        let mut result = DirectoryLoad::default();
        for path in files {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(spec) = specs.iter().find(|s| s.table.as_str() == stem) else {
                let err = PipelineError::UnknownTable(stem.to_string());
                warn!(path = %path.display(), "{}, skipping", err);
                result.skipped.push(stem.to_string());
                continue;
            };

            let outcome = match read_snapshot(&path) {
                Ok(Some(records)) => self.load(spec, &records).await,
                Ok(None) => Ok(LoadReport::default()),
                Err(e) => Err(e),
            };
            if let Err(e) = &outcome {
                error!(table = %spec.table, error = %e, "table load failed");
            }
            result.loaded.push((spec.table.clone(), outcome));
        }

        Ok(result)
    }
}

/// Parameter for one cell: null stays null, anything else is its cell text.
fn bind_value(value: Option<&Value>) -> Value {
    match value {
        None | Some(Value::Null) => Value::Null,
        Some(v) => Value::String(render_scalar(v)),
    }
}
