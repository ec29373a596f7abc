use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;

use crate::domain::error::PipelineError;
use crate::domain::value_objects::{ColumnName, DataFormat, FieldPath, QueryMode, TableName};

/// Identity field used when a table does not configure one.
pub const DEFAULT_IDENTITY_FIELD: &str = "key.id";

/// Immutable, validated extraction and load parameters for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub table: TableName,
    pub query_mode: QueryMode,
    /// Ordered projection; also the parameter order of `merge_statement`.
    pub fields: Vec<FieldPath>,
    pub merge_statement: String,
    pub identity_field: FieldPath,
    pub lookback_days: u32,
}

impl TableSpec {
    /// Build a spec, checking every invariant that does not need I/O.
    ///
    /// Structural problems are reported as `Configuration` (fatal); an
    /// unrecognised query mode is reported as `InvalidQueryMode` so the
    /// caller can skip just this table.
    pub fn new(
        table: &str,
        query_mode: &str,
        fields: Vec<String>,
        merge_statement: String,
        identity_field: Option<String>,
        lookback_days: u32,
    ) -> Result<Self, PipelineError> {
        let table = TableName(table.to_string());
        let config_err = |msg: String| PipelineError::Configuration(format!("table '{}': {}", table, msg));

        if fields.is_empty() {
            return Err(config_err("'fields' must list at least one field".into()));
        }
        if merge_statement.trim().is_empty() {
            return Err(config_err("'merge_statement' is empty".into()));
        }
        if lookback_days == 0 {
            return Err(config_err("'lookback_days' must be at least 1".into()));
        }

        let fields: Vec<FieldPath> = fields.into_iter().map(FieldPath).collect();
        let identity_field =
            FieldPath(identity_field.unwrap_or_else(|| DEFAULT_IDENTITY_FIELD.to_string()));

        if !fields.contains(&identity_field) {
            return Err(config_err(format!(
                "identity field '{}' is not part of 'fields'",
                identity_field.0
            )));
        }

        let mut seen_fields = HashSet::new();
        let mut seen_columns = HashSet::new();
        for field in &fields {
            if !seen_fields.insert(field.as_str()) {
                return Err(config_err(format!("field '{}' is listed twice", field.0)));
            }
            let column = field.prefixed(&table);
            if !seen_columns.insert(column.0.clone()) {
                return Err(config_err(format!(
                    "field '{}' collides with another field as column '{}'",
                    field.0, column.0
                )));
            }
        }

        let query_mode = QueryMode::parse(&table, query_mode)?;

        Ok(TableSpec {
            table,
            query_mode,
            fields,
            merge_statement,
            identity_field,
            lookback_days,
        })
    }

    /// Output columns in projection order.
    pub fn columns(&self) -> Vec<ColumnName> {
        self.fields.iter().map(|f| f.prefixed(&self.table)).collect()
    }

    pub fn identity_column(&self) -> ColumnName {
        self.identity_field.prefixed(&self.table)
    }

    /// Build the platform query for this table. Snapshot queries ignore the window.
    pub fn query(&self, format: DataFormat, window: &ExtractionWindow) -> TableQuery {
        match self.query_mode {
            QueryMode::Incremental => TableQuery::Incremental {
                format,
                window: window.clone(),
            },
            QueryMode::Snapshot => TableQuery::Snapshot { format },
        }
    }
}

/// Time range of an incremental pull. `until: None` means "up to now".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionWindow {
    pub since: DateTime<Utc>,
    pub until: Option<DateTime<Utc>>,
}

impl ExtractionWindow {
    /// Window starting `days` before `run_start`, open-ended.
    pub fn lookback(run_start: DateTime<Utc>, days: u32) -> Self {
        let days = i64::from(days.max(1));
        ExtractionWindow {
            since: run_start - Duration::days(days),
            until: None,
        }
    }
}

/// A fetch request handed to the data platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableQuery {
    Incremental {
        format: DataFormat,
        window: ExtractionWindow,
    },
    Snapshot {
        format: DataFormat,
    },
}

impl TableQuery {
    pub fn format(&self) -> DataFormat {
        match self {
            TableQuery::Incremental { format, .. } | TableQuery::Snapshot { format } => *format,
        }
    }

    pub fn window(&self) -> Option<&ExtractionWindow> {
        match self {
            TableQuery::Incremental { window, .. } => Some(window),
            TableQuery::Snapshot { .. } => None,
        }
    }
}
