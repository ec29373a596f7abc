use crate::domain::load_report::LoadReport;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Pipeline step a table was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Resolve,
    Extract,
    Normalize,
    Reconcile,
    Load,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Resolve => "resolve",
            Stage::Extract => "extract",
            Stage::Normalize => "normalize",
            Stage::Reconcile => "reconcile",
            Stage::Load => "load",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableStatus {
    Succeeded,
    /// Nothing to do for this table this run (no parts, no records, no artifact).
    Skipped { reason: String },
    Failed { stage: Stage, reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TableOutcome {
    pub table: String,
    #[serde(flatten)]
    pub status: TableStatus,
    pub parts: usize,
    pub records_extracted: usize,
    pub records_reconciled: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load: Option<LoadReport>,
    pub duration_ms: u128,
}

impl TableOutcome {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            status: TableStatus::Succeeded,
            parts: 0,
            records_extracted: 0,
            records_reconciled: 0,
            load: None,
            duration_ms: 0,
        }
    }

    pub fn failed(table: &str, stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            status: TableStatus::Failed {
                stage,
                reason: reason.into(),
            },
            ..Self::new(table)
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, TableStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub tables_total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub rows_affected: u64,
    pub row_errors: usize,
}

/// Per-table results of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub tables: Vec<TableOutcome>,
    pub summary: Summary,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>, mut tables: Vec<TableOutcome>) -> Self {
        tables.sort_by(|a, b| a.table.cmp(&b.table));

        let succeeded = tables
            .iter()
            .filter(|t| t.status == TableStatus::Succeeded)
            .count();
        let failed = tables.iter().filter(|t| t.is_failed()).count();
        let rows_affected = tables
            .iter()
            .filter_map(|t| t.load.as_ref())
            .map(|l| l.rows_affected)
            .sum();
        let row_errors = tables
            .iter()
            .filter_map(|t| t.load.as_ref())
            .map(|l| l.row_errors.len())
            .sum();

        RunReport {
            run_id: format!(
                "run_{}_{}",
                started_at.format("%Y%m%d_%H%M%S"),
                Uuid::new_v4().simple()
            ),
            started_at: started_at.to_rfc3339(),
            finished_at: Utc::now().to_rfc3339(),
            summary: Summary {
                tables_total: tables.len(),
                succeeded,
                skipped: tables.len() - succeeded - failed,
                failed,
                rows_affected,
                row_errors,
            },
            tables,
        }
    }

    /// At least one table failed; the caller should treat the run as partial.
    pub fn is_degraded(&self) -> bool {
        self.summary.failed > 0
    }

    pub fn outcome(&self, table: &str) -> Option<&TableOutcome> {
        self.tables.iter().find(|t| t.table == table)
    }
}
