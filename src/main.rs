use anyhow::Result;
use canvas_sync::infrastructure::housekeeping::{empty_temp, prune_old_logs};
use canvas_sync::presentation::cli_summary::{print_perf_summary, print_summary};
use canvas_sync::presentation::writers::{all_writers, write_to_file, writer_for};
use canvas_sync::{AppConfig, LogLevel, PipelineOptions, RunStage};
use chrono::Local;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "canvas-sync",
    about = "canvas-sync: pull Canvas data tables, reconcile them and merge them into your database."
)]
struct Cli {
    /// Config file (defaults to ./config.yml, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Which part of the pipeline to run
    #[arg(long, value_enum, default_value_t = StageArg::All)]
    stage: StageArg,

    /// Extract and reconcile but never write to the database
    #[arg(long)]
    dry_run: bool,

    /// Delete leftover data files in the temp directory before running
    #[arg(long)]
    clean_temp: bool,

    /// Where run reports are written
    #[arg(long, default_value = "reports")]
    report_dir: PathBuf,

    /// Report format
    #[arg(short, long, default_value = "all", value_parser = ["json", "csv", "all"])]
    format: String,

    /// Overrides `log_dir` from the config file
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Print per-call timings after the summary
    #[arg(long)]
    timing: bool,

    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    #[arg(short, long)]
    quiet: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StageArg {
    All,
    Extract,
    Transform,
    Load,
}

impl From<StageArg> for RunStage {
    fn from(arg: StageArg) -> Self {
        match arg {
            StageArg::All => RunStage::All,
            StageArg::Extract => RunStage::Extract,
            StageArg::Transform => RunStage::Transform,
            StageArg::Load => RunStage::Load,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let cfg = AppConfig::load(&config_path)?;

    let level = if cli.verbose {
        LogLevel::Debug
    } else if cli.quiet {
        LogLevel::Error
    } else {
        LogLevel::Info
    };
    let log_dir = cli.log_dir.clone().unwrap_or_else(|| cfg.log_dir.clone());
    let _guard = canvas_sync::init_tracing(level, Some(log_dir.as_path()))?;

    info!(config = %config_path.display(), tables = cfg.tables.len(), "configuration loaded");
    cfg.log_notices();

    match prune_old_logs(&log_dir, cfg.log_retention_days, Local::now().date_naive()) {
        Ok(n) if n > 0 => info!(removed = n, "old log files pruned"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "could not prune old log files"),
    }
    if cli.clean_temp {
        let removed = empty_temp(&cfg.temp_path)?;
        info!(removed, path = %cfg.temp_path.display(), "temp directory emptied");
    }

    let options = PipelineOptions {
        stage: cli.stage.into(),
        dry_run: cli.dry_run,
    };
    let (report, perf) = canvas_sync::run_with_timing(cfg, options).await?;

    print_summary(&report);
    if cli.timing {
        print_perf_summary(&perf);
    }

    let output_dir = cli
        .report_dir
        .join(Local::now().format("%Y%m%d").to_string());
    match cli.format.as_str() {
        "all" => {
            for writer in all_writers(Some(&perf)) {
                write_to_file(&*writer, &report, &output_dir)?;
            }
        }
        fmt => {
            let writer = writer_for(fmt, Some(&perf))
                .ok_or_else(|| anyhow::anyhow!("Unknown format: {}", fmt))?;
            write_to_file(&*writer, &report, &output_dir)?;
        }
    }
    println!("Run report written to {}", output_dir.display());

    if report.is_degraded() {
        anyhow::bail!(
            "{} of {} table(s) failed; see the report for details",
            report.summary.failed,
            report.summary.tables_total
        );
    }

    Ok(())
}
