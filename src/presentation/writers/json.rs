use anyhow::Result;
use serde::Serialize;

use crate::application::monitoring::PerfReport;
use crate::domain::{
    ports::OutputWriter,
    run_report::{RunReport, Summary, TableOutcome},
};

#[derive(Serialize)]
struct JsonRunReport<'a> {
    run_id: &'a str,
    started_at: &'a str,
    finished_at: &'a str,
    degraded: bool,
    summary: &'a Summary,
    tables: &'a [TableOutcome],
    #[serde(skip_serializing_if = "Option::is_none")]
    perf: Option<&'a PerfReport>,
}

/// Pretty-printed JSON run report, optionally carrying the timing report.
pub struct JsonWriter {
    perf: Option<PerfReport>,
}

impl JsonWriter {
    pub fn new(perf: Option<PerfReport>) -> Self {
        Self { perf }
    }
}

impl OutputWriter for JsonWriter {
    fn format(&self, report: &RunReport) -> Result<String> {
        let view = JsonRunReport {
            run_id: &report.run_id,
            started_at: &report.started_at,
            finished_at: &report.finished_at,
            degraded: report.is_degraded(),
            summary: &report.summary,
            tables: &report.tables,
            perf: self.perf.as_ref(),
        };

        Ok(serde_json::to_string_pretty(&view)?)
    }

    fn extension(&self) -> &'static str {
        "json"
    }
}
