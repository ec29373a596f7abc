use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use std::path::Path;
use tracing::info;

/// Prefix of the daily log files: `canvas-sync.log.YYYY-MM-DD`.
pub const LOG_FILE_PREFIX: &str = "canvas-sync.log";

/// Delete log files dated more than `retention_days` before `today`.
///
/// Only files named `{LOG_FILE_PREFIX}.YYYY-MM-DD` are considered. Returns the
/// number of files removed. A missing directory is not an error.
pub fn prune_old_logs(dir: &Path, retention_days: u32, today: NaiveDate) -> Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let cutoff = today - Duration::days(i64::from(retention_days));
    let mut removed = 0;

    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let path = entry?.path();
        let Some(date) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(LOG_FILE_PREFIX))
            .and_then(|rest| rest.strip_prefix('.'))
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        else {
            continue;
        };

        if date < cutoff {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to delete {}", path.display()))?;
            info!(path = %path.display(), "deleted old log file");
            removed += 1;
        }
    }

    Ok(removed)
}

/// Remove leftover data files (`csv`, `json`, `tsv`, `parquet`) under `temp_path`.
pub fn empty_temp(temp_path: &Path) -> Result<usize> {
    if !temp_path.is_dir() {
        return Ok(0);
    }
    let mut removed = 0;
    let mut pending = vec![temp_path.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir).with_context(|| format!("Failed to list {}", dir.display()))? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let is_data = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e, "csv" | "json" | "tsv" | "parquet"));
            if is_data {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to delete {}", path.display()))?;
                info!(path = %path.display(), "deleted temp file");
                removed += 1;
            }
        }
    }

    Ok(removed)
}
