use crate::domain::{
    load_report::BatchOutcome,
    records::RecordTable,
    run_report::RunReport,
    table_spec::TableQuery,
    value_objects::{ColumnName, DataFormat, TableName},
};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Reference to one downloadable part of a table pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartRef {
    pub id: String,
    pub format: DataFormat,
}

/// Port: the upstream analytics data platform (implemented by DapClient)
#[async_trait]
pub trait DataPlatform: Send + Sync {
    /// Run `query` for `table` and return the parts the platform produced.
    /// An empty list means the table has nothing for this query.
    async fn list_parts(&self, table: &TableName, query: &TableQuery) -> Result<Vec<PartRef>>;

    /// Download one part into `destination` and return the local file path.
    async fn download(&self, part: &PartRef, destination: &Path, decompress: bool)
        -> Result<PathBuf>;
}

/// Port: the target database (implemented by SqlxTargetStore)
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Acquire a connection and start the transaction one table load runs in.
    async fn open_session(&self) -> Result<Box<dyn LoadSession>>;
}

/// One table load. Dropping a session without `commit` discards its work.
#[async_trait]
pub trait LoadSession: Send {
    /// Execute `statement` once per parameter row. Row failures are reported
    /// in the outcome; only connection-level failures are returned as `Err`.
    async fn execute_batch(&mut self, statement: &str, rows: &[Vec<Value>]) -> Result<BatchOutcome>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Port: merge of a previous snapshot with a fresh pull (implemented by Reconciler)
pub trait Reconcile: Send + Sync {
    fn reconcile(
        &self,
        table: &TableName,
        previous: RecordTable,
        incoming: RecordTable,
        identity: &ColumnName,
    ) -> RecordTable;
}

/// Port: run report formatting (implemented by JsonWriter)
pub trait OutputWriter: Send + Sync {
    /// Serializes the report to a string
    fn format(&self, report: &RunReport) -> Result<String>;
    /// Extension of the produced file (e.g. "json")
    fn extension(&self) -> &'static str;
}
