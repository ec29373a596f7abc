use crate::application::monitoring::PerfReport;
use crate::domain::run_report::{RunReport, TableStatus};
use colored::*;
use tabled::settings::{object::Columns, Alignment, Modify, Style};
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct TableRow {
    table: String,
    status: String,
    parts: String,
    records: String,
    #[tabled(rename = "rows affected")]
    rows_affected: String,
    #[tabled(rename = "row errors")]
    row_errors: String,
    #[tabled(rename = "time (ms)")]
    duration_ms: String,
}

#[derive(Tabled)]
struct SummaryRow {
    metric: String,
    value: String,
}

pub fn print_summary(report: &RunReport) {
    println!();

    println!("{}", "CANVAS SYNC SUMMARY".bold().cyan());
    println!("Run: {}", report.run_id.bright_yellow());
    println!();

    if report.tables.is_empty() {
        println!("{}", "No tables configured.".italic());
        return;
    }

    let rows: Vec<TableRow> = report
        .tables
        .iter()
        .map(|t| {
            let (rows_affected, row_errors) = t
                .load
                .as_ref()
                .map_or((0, 0), |l| (l.rows_affected, l.row_errors.len()));
            TableRow {
                table: t.table.bold().to_string(),
                status: status_cell(&t.status),
                parts: t.parts.to_string(),
                records: t.records_reconciled.to_string(),
                rows_affected: rows_affected.to_string().green().to_string(),
                row_errors: if row_errors > 0 {
                    row_errors.to_string().red().to_string()
                } else {
                    row_errors.to_string()
                },
                duration_ms: format_duration(t.duration_ms),
            }
        })
        .collect();

    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..=6)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    let s = &report.summary;
    let summary_rows = vec![
        SummaryRow {
            metric: "Succeeded".into(),
            value: s.succeeded.to_string().green().to_string(),
        },
        SummaryRow {
            metric: "Skipped".into(),
            value: s.skipped.to_string().yellow().to_string(),
        },
        SummaryRow {
            metric: "Failed".into(),
            value: s.failed.to_string().red().to_string(),
        },
        SummaryRow {
            metric: "Rows affected".into(),
            value: s.rows_affected.to_string().bold().to_string(),
        },
        SummaryRow {
            metric: "Row errors".into(),
            value: s.row_errors.to_string(),
        },
    ];

    let summary_table = Table::new(summary_rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..=1)).with(Alignment::right()))
        .to_string();

    println!();
    println!("{summary_table}");

    for t in report.tables.iter() {
        if let TableStatus::Failed { stage, reason } = &t.status {
            println!("  {} {} at {}: {}", "✗".red(), t.table.bold(), stage, reason.dimmed());
        }
    }
    println!();
}

fn status_cell(status: &TableStatus) -> String {
    match status {
        TableStatus::Succeeded => "ok".green().to_string(),
        TableStatus::Skipped { reason } => format!("skipped ({})", reason).yellow().to_string(),
        TableStatus::Failed { stage, .. } => format!("failed ({})", stage).red().to_string(),
    }
}

// ─── Performance summary ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct PerfRow {
    operation: String,
    table: String,
    #[tabled(rename = "items")]
    rows: String,
    #[tabled(rename = "time (ms)")]
    duration_ms: String,
}

/// Print a performance timing table to stdout.
pub fn print_perf_summary(report: &PerfReport) {
    if report.timings.is_empty() {
        return;
    }

    println!("{}", "PERFORMANCE".bold().cyan());

    let rows: Vec<PerfRow> = report
        .timings
        .iter()
        .map(|t| PerfRow {
            operation: t.operation.dimmed().to_string(),
            table: t.table.bold().to_string(),
            rows: t.rows.to_string(),
            duration_ms: format_duration(t.duration_ms),
        })
        .collect();

    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..=3)).with(Alignment::right()))
        .to_string();

    println!("{table}");

    println!(
        "  Total: {} part(s) listed  ·  {} record(s) reconciled  ·  {} measured",
        report.total_parts.to_string().bold(),
        report.total_records_reconciled.to_string().bold(),
        format_duration(report.total_ms),
    );
    println!();
}

fn format_duration(ms: u128) -> String {
    if ms >= 1_000 {
        format!("{:.1}s", ms as f64 / 1_000.0).yellow().to_string()
    } else if ms >= 100 {
        ms.to_string().yellow().to_string()
    } else {
        ms.to_string().green().to_string()
    }
}
