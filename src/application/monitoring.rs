use crate::domain::ports::{DataPlatform, PartRef, Reconcile};
use crate::domain::{
    records::{RecordTable, ReconciledTable},
    table_spec::TableQuery,
    value_objects::{ColumnName, TableName},
};
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{info, instrument};

// ─── PerfReport ──────────────────────────────────────────────────────────────

/// A single timed operation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OpTiming {
    /// Operation name: "list_parts", "download" or "reconcile".
    pub operation: &'static str,
    /// Table this operation was performed on (the part id for downloads).
    pub table: String,
    /// Elapsed wall time in milliseconds.
    pub duration_ms: u128,
    /// Parts listed, parts downloaded, or records reconciled.
    pub rows: usize,
}

/// Accumulated performance timings for a single pipeline run.
///
/// Shared across all decorator instances for one run via `Arc<Mutex<_>>`.
/// After the run, pass to [`crate::presentation::cli_summary::print_perf_summary`]
/// to render a human-readable table.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct PerfReport {
    pub timings: Vec<OpTiming>,
    pub total_parts: usize,
    pub total_records_reconciled: usize,
    pub total_ms: u128,
}

impl PerfReport {
    pub fn new() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::default()))
    }

    fn record(report: &Arc<Mutex<Self>>, timing: OpTiming) {
        if let Ok(mut r) = report.lock() {
            r.total_ms += timing.duration_ms;
            match timing.operation {
                "list_parts" => r.total_parts += timing.rows,
                "reconcile" => r.total_records_reconciled += timing.rows,
                _ => {}
            }
            r.timings.push(timing);
        }
    }

    /// Copy of the report as it stands, or an empty one if the lock is poisoned.
    pub fn snapshot(report: &Arc<Mutex<Self>>) -> Self {
        report.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

// ─── MonitoringPlatform ──────────────────────────────────────────────────────

/// Decorator: wraps any `DataPlatform`, measures wall time per call and
/// appends the result to the shared `PerfReport`.
pub struct MonitoringPlatform {
    inner: Arc<dyn DataPlatform>,
    report: Arc<Mutex<PerfReport>>,
}

impl MonitoringPlatform {
    pub fn new(inner: Arc<dyn DataPlatform>, report: Arc<Mutex<PerfReport>>) -> Self {
        Self { inner, report }
    }
}

#[async_trait]
impl DataPlatform for MonitoringPlatform {
    #[instrument(
        name = "list_parts",
        skip(self, table, query),
        fields(db.table = %table.0, format = %query.format()),
        level = "info"
    )]
    async fn list_parts(&self, table: &TableName, query: &TableQuery) -> Result<Vec<PartRef>> {
        let start = Instant::now();
        let parts = self.inner.list_parts(table, query).await?;
        let duration_ms = start.elapsed().as_millis();

        info!(table = %table.0, parts = parts.len(), duration_ms, "list_parts completed");

        PerfReport::record(
            &self.report,
            OpTiming {
                operation: "list_parts",
                table: table.0.clone(),
                duration_ms,
                rows: parts.len(),
            },
        );

        Ok(parts)
    }

    #[instrument(name = "download", skip(self, part, destination), fields(part = %part.id), level = "debug")]
    async fn download(&self, part: &PartRef, destination: &Path, decompress: bool) -> Result<PathBuf> {
        let start = Instant::now();
        let path = self.inner.download(part, destination, decompress).await?;
        let duration_ms = start.elapsed().as_millis();

        PerfReport::record(
            &self.report,
            OpTiming {
                operation: "download",
                table: part.id.clone(),
                duration_ms,
                rows: 1,
            },
        );

        Ok(path)
    }
}

// ─── MonitoringReconciler ────────────────────────────────────────────────────

/// Decorator: wraps any `Reconcile`, measures wall time per call, and
/// appends the result to the shared `PerfReport`.
pub struct MonitoringReconciler {
    inner: Arc<dyn Reconcile>,
    report: Arc<Mutex<PerfReport>>,
}

impl MonitoringReconciler {
    pub fn new(inner: Arc<dyn Reconcile>, report: Arc<Mutex<PerfReport>>) -> Self {
        Self { inner, report }
    }
}

impl Reconcile for MonitoringReconciler {
    #[instrument(
        name = "reconcile",
        skip(self, table, previous, incoming, identity),
        fields(
            db.table = %table.0,
            previous.rows = previous.len(),
            incoming.rows = incoming.len(),
        ),
        level = "info"
    )]
    fn reconcile(
        &self,
        table: &TableName,
        previous: RecordTable,
        incoming: RecordTable,
        identity: &ColumnName,
    ) -> ReconciledTable {
        let start = Instant::now();
        let (previous_rows, incoming_rows) = (previous.len(), incoming.len());
        let result = self.inner.reconcile(table, previous, incoming, identity);
        let duration_ms = start.elapsed().as_millis();

        info!(
            table = %table.0,
            previous_rows,
            incoming_rows,
            reconciled = result.len(),
            duration_ms,
            "reconcile completed"
        );

        PerfReport::record(
            &self.report,
            OpTiming {
                operation: "reconcile",
                table: table.0.clone(),
                duration_ms,
                rows: result.len(),
            },
        );

        result
    }
}
