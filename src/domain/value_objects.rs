use serde::{Deserialize, Serialize};

use crate::domain::error::PipelineError;

/// Newtype for table names
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TableName(pub String);

impl TableName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Newtype for output column names (already carrying the table prefix, e.g. `courses_name`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ColumnName(pub String);

impl ColumnName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ColumnName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Dotted path to a field inside a platform record (`key.id`, `value.name`, `meta.ts`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldPath(pub String);

impl FieldPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Column name once the first path segment is replaced by `{table}_`.
    ///
    /// `value.name` → `courses_name`, `key.id` → `courses_id`. Only the first
    /// segment is replaced, so `value.a.b` becomes `courses_a.b`. A path with
    /// no dot is prefixed as a whole.
    pub fn prefixed(&self, table: &TableName) -> ColumnName {
        let rest = match self.0.split_once('.') {
            Some((_, rest)) => rest,
            None => self.0.as_str(),
        };
        ColumnName(format!("{}_{}", table.0, rest))
    }
}

impl From<&str> for FieldPath {
    fn from(s: &str) -> Self {
        FieldPath(s.to_string())
    }
}

/// How a table is pulled from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Only records changed since the extraction window start.
    Incremental,
    /// The full current state of the table.
    Snapshot,
}

impl QueryMode {
    pub fn parse(table: &TableName, raw: &str) -> Result<Self, PipelineError> {
        match raw.trim().to_lowercase().as_str() {
            "incremental" => Ok(QueryMode::Incremental),
            "snapshot" => Ok(QueryMode::Snapshot),
            _ => Err(PipelineError::InvalidQueryMode {
                table: table.0.clone(),
                mode: raw.to_string(),
            }),
        }
    }
}

/// File format requested from the platform.
///
/// This is the single place where the format decides directory layout, file
/// extension and parsing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Csv,
    #[default]
    Jsonl,
    Tsv,
    Parquet,
}

impl DataFormat {
    /// Case-insensitive parse of a configured format name. `json` is accepted for JSONL.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "csv" => Some(DataFormat::Csv),
            "json" | "jsonl" => Some(DataFormat::Jsonl),
            "tsv" => Some(DataFormat::Tsv),
            "parquet" => Some(DataFormat::Parquet),
            _ => None,
        }
    }

    /// Subdirectory of the temp path holding artifacts of this format.
    pub fn dir_name(self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Jsonl => "json",
            DataFormat::Tsv => "tsv",
            DataFormat::Parquet => "parquet",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Jsonl => "json",
            DataFormat::Tsv => "tsv",
            DataFormat::Parquet => "parquet",
        }
    }

    /// Name used in platform query requests.
    pub fn api_name(self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Jsonl => "jsonl",
            DataFormat::Tsv => "tsv",
            DataFormat::Parquet => "parquet",
        }
    }

    /// Delimited text formats start every part with a header line.
    pub fn has_header(self) -> bool {
        matches!(self, DataFormat::Csv | DataFormat::Tsv)
    }

    /// Whether parts of this format can be joined by concatenating their bytes.
    pub fn is_concatenable(self) -> bool {
        !matches!(self, DataFormat::Parquet)
    }

    /// Delimited formats are requested in expanded mode, which lays nested
    /// fixed-cardinality fields out as separate dotted columns.
    pub fn uses_expanded_mode(self) -> bool {
        matches!(self, DataFormat::Csv | DataFormat::Tsv)
    }
}

impl std::fmt::Display for DataFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.api_name())
    }
}
