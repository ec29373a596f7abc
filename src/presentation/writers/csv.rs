use anyhow::{anyhow, Result};

use crate::domain::{
    ports::OutputWriter,
    run_report::{RunReport, TableStatus},
};

/// One line per table, for spreadsheets and quick greps.
pub struct CsvWriter;

const HEADER: [&str; 9] = [
    "table",
    "status",
    "stage",
    "reason",
    "parts",
    "records_extracted",
    "records_reconciled",
    "rows_affected",
    "row_errors",
];

impl OutputWriter for CsvWriter {
    fn format(&self, report: &RunReport) -> Result<String> {
        let mut out = ::csv::Writer::from_writer(Vec::new());
        out.write_record(HEADER)?;

        for t in &report.tables {
            let (status, stage, reason) = match &t.status {
                TableStatus::Succeeded => ("succeeded", String::new(), String::new()),
                TableStatus::Skipped { reason } => ("skipped", String::new(), reason.clone()),
                TableStatus::Failed { stage, reason } => ("failed", stage.to_string(), reason.clone()),
            };
            let (rows_affected, row_errors) = t
                .load
                .as_ref()
                .map_or((0, 0), |l| (l.rows_affected, l.row_errors.len()));

            out.write_record([
                t.table.clone(),
                status.to_string(),
                stage,
                reason,
                t.parts.to_string(),
                t.records_extracted.to_string(),
                t.records_reconciled.to_string(),
                rows_affected.to_string(),
                row_errors.to_string(),
            ])?;
        }

        let bytes = out.into_inner().map_err(|e| anyhow!("{}", e.error()))?;
        Ok(String::from_utf8(bytes)?)
    }

    fn extension(&self) -> &'static str {
        "csv"
    }
}
