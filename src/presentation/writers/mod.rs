use crate::application::monitoring::PerfReport;
use crate::domain::{ports::OutputWriter, run_report::RunReport};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use self::{csv::CsvWriter, json::JsonWriter};

pub mod csv;
pub mod json;

/// Register available writers - add new ones without touching main.rs
pub fn all_writers(perf: Option<&PerfReport>) -> Vec<Box<dyn OutputWriter>> {
    vec![
        Box::new(JsonWriter::new(perf.cloned())),
        Box::new(CsvWriter),
    ]
}

pub fn writer_for(format: &str, perf: Option<&PerfReport>) -> Option<Box<dyn OutputWriter>> {
    match format {
        "json" => Some(Box::new(JsonWriter::new(perf.cloned()))),
        "csv" => Some(Box::new(CsvWriter)),
        _ => None,
    }
}

/// Writes the run report to `{dir}/{run_id}.{ext}` and returns the path.
pub fn write_to_file(writer: &dyn OutputWriter, report: &RunReport, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let content = writer.format(report)?;
    let path = dir.join(format!("{}.{}", report.run_id, writer.extension()));
    fs::write(&path, &content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
