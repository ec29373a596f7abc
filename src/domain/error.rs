use std::path::PathBuf;
use thiserror::Error;

/// Errors the pipeline branches on.
///
/// Only `Configuration` is fatal for a run. Every other variant is scoped to a
/// single table: the worker that hit it logs it, records the table as failed
/// in the [`RunReport`](crate::RunReport) and moves on to the next table.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid query mode '{mode}' for table {table}: expected 'incremental' or 'snapshot'")]
    InvalidQueryMode { table: String, mode: String },

    #[error("extraction failed for table {table}: {reason}")]
    ExtractionFailure { table: String, reason: String },

    #[error("table {table} did not finish extracting within {secs}s")]
    Timeout { table: String, secs: u64 },

    #[error("malformed record file {}: {reason}", path.display())]
    MalformedRecordFile { path: PathBuf, reason: String },

    #[error("table {table} has records but no identity column {column}")]
    MissingIdentity { table: String, column: String },

    #[error("destination {} is not a valid directory", .0.display())]
    DestinationNotReady(PathBuf),

    #[error("load failed for table {table}: {reason}")]
    Load { table: String, reason: String },

    #[error("no table configured for {0}")]
    UnknownTable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Fatal errors abort the run before any extraction starts.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Configuration(_))
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PipelineError::MalformedRecordFile {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
