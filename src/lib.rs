use anyhow::Result;
use std::sync::Arc;

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

// ─── Log level ────────────────────────────────────────────────────────────────

/// Controls the verbosity of canvas-sync's internal tracing output.
///
/// Pass to [`init_tracing`] before calling any async entry point.
///
/// | Variant | `tracing` level | When to use                              |
/// |---------|-----------------|------------------------------------------|
/// | `Error` | `error`         | `--quiet` / cron jobs                    |
/// | `Info`  | `info`          | Default, shows per-table progress        |
/// | `Debug` | `debug`         | `--verbose`, shows polling and batches   |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    #[default]
    Info,
    Debug,
}

/// Initialise the global `tracing` subscriber for canvas-sync.
///
/// Logs go to stdout and, when `log_dir` is given, to a daily rotating file
/// `{log_dir}/canvas-sync.log.YYYY-MM-DD`. `RUST_LOG` wins over `level` when
/// set. Keep the returned guard alive until exit or the file tail is lost.
///
/// Only available when the `cli` feature is enabled.
#[cfg(feature = "cli")]
pub fn init_tracing(
    level: LogLevel,
    log_dir: Option<&std::path::Path>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use anyhow::Context;
    use tracing_subscriber::fmt::{self, format::FmtSpan};
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_filter = match level {
        LogLevel::Error => "canvas_sync=error",
        LogLevel::Info => "canvas_sync=info",
        LogLevel::Debug => "canvas_sync=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    let console_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_span_events(FmtSpan::CLOSE);

    let Some(dir) = log_dir else {
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .try_init()?;
        return Ok(None);
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let appender = tracing_appender::rolling::daily(dir, infrastructure::housekeeping::LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(Some(guard))
}

// ─── Public API Facade ───

pub use application::monitoring::PerfReport;
pub use application::pipeline::{Pipeline, PipelineOptions, RunStage};
pub use domain::error::PipelineError;
pub use domain::load_report::{LoadReport, RowError};
pub use domain::records::{RecordTable, RowMap};
pub use domain::run_report::{RunReport, Stage, Summary, TableOutcome, TableStatus};
pub use domain::table_spec::{ExtractionWindow, TableSpec};
pub use domain::value_objects::{ColumnName, DataFormat, FieldPath, QueryMode, TableName};
pub use infrastructure::config::{AppConfig, DapConfig, DbConfig};

use crate::application::monitoring::{MonitoringPlatform, MonitoringReconciler};
use crate::application::reconcile::Reconciler;
use crate::domain::ports::{DataPlatform, TargetStore};
use crate::infrastructure::dap::client::DapClient;
use crate::infrastructure::db::client::connect;

// ─── Public entry points ───

/// Run the stages selected by `options` over every configured table.
///
/// Use [`run_with_timing`] if you also want a performance report.
pub async fn run(cfg: AppConfig, options: PipelineOptions) -> Result<RunReport> {
    let (report, _) = run_with_timing(cfg, options).await?;
    Ok(report)
}

/// Same as [`run`], plus a [`PerfReport`] with per-table platform and
/// reconcile timings.
pub async fn run_with_timing(cfg: AppConfig, options: PipelineOptions) -> Result<(RunReport, PerfReport)> {
    let perf = PerfReport::new();

    let platform = build_platform(&cfg, options, Arc::clone(&perf))?;
    let store = build_store(&cfg, options).await?;
    let reconciler = Arc::new(MonitoringReconciler::new(
        Arc::new(Reconciler::new()),
        Arc::clone(&perf),
    ));

    let pipeline = Pipeline::new(cfg, platform, reconciler, store);
    let report = pipeline.run(options).await?;

    Ok((report, PerfReport::snapshot(&perf)))
}

// ─── Private helpers ───────────────────────────────────────────────────────────

/// DAP client wrapped in the monitoring decorator, when the run extracts.
fn build_platform(
    cfg: &AppConfig,
    options: PipelineOptions,
    perf: Arc<std::sync::Mutex<PerfReport>>,
) -> Result<Option<Arc<dyn DataPlatform>>> {
    if !options.needs_platform() {
        return Ok(None);
    }
    let dap = cfg.dap.clone().ok_or_else(|| {
        PipelineError::Configuration(
            "extraction needs DAP_API_URL, DAP_CLIENT_ID and DAP_CLIENT_SECRET".into(),
        )
    })?;
    let client = Arc::new(DapClient::new(dap)?);
    Ok(Some(Arc::new(MonitoringPlatform::new(client, perf))))
}

/// Database connection pool, when the run loads.
async fn build_store(cfg: &AppConfig, options: PipelineOptions) -> Result<Option<Arc<dyn TargetStore>>> {
    if !options.needs_store() {
        return Ok(None);
    }
    let db = cfg.database.as_ref().ok_or_else(|| {
        PipelineError::Configuration("loading needs a database section or DB_* variables".into())
    })?;
    Ok(Some(Arc::new(connect(db).await?)))
}
