use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::application::retry::RetryPolicy;
use crate::domain::error::PipelineError;
use crate::domain::table_spec::TableSpec;
use crate::domain::value_objects::{DataFormat, TableName};
use crate::infrastructure::db::sql_utils::count_placeholders;

/// Prefix of the environment overlay: `CANVAS_SYNC__DATABASE__HOST=...`.
pub const ENV_PREFIX: &str = "CANVAS_SYNC";

/// Environment variables the DAP and database credentials are read from.
/// Later entries win when both are set.
const CREDENTIAL_ENV: &[(&str, &str)] = &[
    ("ORACLE_USERNAME", "database.username"),
    ("ORACLE_PASSWORD", "database.password"),
    ("DAP_API_URL", "dap.api_url"),
    ("DAP_CLIENT_ID", "dap.client_id"),
    ("DAP_CLIENT_SECRET", "dap.client_secret"),
    ("DB_HOST", "database.host"),
    ("DB_PORT", "database.port"),
    ("DB_SERVICE", "database.service"),
    ("DB_USERNAME", "database.username"),
    ("DB_PASSWORD", "database.password"),
];

// ─── Raw (file + environment) shape ───

#[derive(Debug, Deserialize)]
struct RawConfig {
    temp_path: Option<PathBuf>,
    final_path: Option<PathBuf>,
    #[serde(alias = "canvas_format")]
    format: Option<String>,
    batch_size: Option<usize>,
    #[serde(alias = "past_days")]
    lookback_days: Option<u32>,
    #[serde(alias = "log_retention_period")]
    log_retention_days: Option<u32>,
    log_dir: Option<PathBuf>,
    concurrency: Option<usize>,
    table_timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    retry_delay_ms: Option<u64>,
    #[serde(default)]
    dap: RawDap,
    #[serde(default)]
    database: RawDb,
    #[serde(alias = "canvas_tables")]
    tables: Option<BTreeMap<String, RawTable>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDap {
    api_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    namespace: Option<String>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDb {
    driver: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    #[serde(alias = "dbname")]
    service: Option<String>,
    #[serde(alias = "user")]
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTable {
    #[serde(alias = "query_type")]
    query_mode: Option<String>,
    fields: Option<Vec<String>>,
    #[serde(alias = "db_query")]
    merge_statement: Option<String>,
    identity_field: Option<String>,
    #[serde(alias = "past_days")]
    lookback_days: Option<u32>,
}

// ─── Resolved configuration ───

/// Immutable run configuration, validated before any I/O.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub temp_path: PathBuf,
    pub final_path: PathBuf,
    pub format: DataFormat,
    pub batch_size: usize,
    pub lookback_days: u32,
    pub log_retention_days: u32,
    pub log_dir: PathBuf,
    /// Worker count; `None` means one worker per table.
    pub concurrency: Option<usize>,
    pub table_timeout: Duration,
    pub retry: RetryPolicy,
    /// `None` when no DAP credentials were supplied; only the extract stage needs them.
    pub dap: Option<DapConfig>,
    /// `None` when no database was configured; only the load stage needs it.
    pub database: Option<DbConfig>,
    pub tables: Vec<TableSpec>,
    /// Tables left out of this run because their query mode is not recognised.
    pub rejected: Vec<RejectedTable>,
    /// Defaults and fallbacks applied while resolving. Loading runs before
    /// logging is set up, so the caller reports these through [`AppConfig::log_notices`].
    pub notices: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedTable {
    pub table: TableName,
    pub reason: String,
}

#[derive(Clone)]
pub struct DapConfig {
    pub api_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub namespace: String,
    pub poll_interval: Duration,
}

impl std::fmt::Debug for DapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DapConfig")
            .field("api_url", &self.api_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("namespace", &self.namespace)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

#[derive(Clone)]
pub struct DbConfig {
    /// Database driver: "postgres" (default), "mysql", "mariadb", or "sqlite".
    pub driver: String,
    pub host: String,
    pub port: u16,
    /// Database (service) name; the file path for sqlite.
    pub service: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("service", &self.service)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl DbConfig {
    /// Build a sqlx-compatible connection URL from this config.
    pub fn url(&self) -> String {
        match self.driver.as_str() {
            "mysql" | "mariadb" => format!(
                "mysql://{}:{}@{}:{}/{}",
                self.username, self.password, self.host, self.port, self.service
            ),
            "sqlite" => format!("sqlite://{}", self.service),
            _ => format!(
                "postgres://{}:{}@{}:{}/{}",
                self.username, self.password, self.host, self.port, self.service
            ),
        }
    }
}

fn default_port(driver: &str) -> u16 {
    match driver {
        "mysql" | "mariadb" => 3306,
        "sqlite" => 0,
        _ => 5432,
    }
}

impl AppConfig {
    /// Load `path` (YAML or TOML, by extension), overlay `CANVAS_SYNC__*`
    /// environment variables and the credential variables, then validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(PipelineError::Configuration(format!(
                "config file {} not found",
                path.display()
            )));
        }

        let mut builder = config::Config::builder()
            .add_source(config::File::from(path).required(true))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        for (var, key) in CREDENTIAL_ENV {
            builder = builder
                .set_override_option(*key, std::env::var(var).ok())
                .map_err(config_err)?;
        }

        let raw: RawConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_err)?;

        Self::resolve(raw)
    }

    /// `config.yml` in the working directory, else the user config directory.
    pub fn default_path() -> PathBuf {
        let local = PathBuf::from("config.yml");
        if local.is_file() {
            return local;
        }
        dirs::config_dir()
            .map(|d| d.join("canvas-sync").join("config.yml"))
            .unwrap_or(local)
    }

    fn resolve(raw: RawConfig) -> Result<Self, PipelineError> {
        let mut notices = Vec::new();
        let temp_path = raw.temp_path.unwrap_or_else(|| {
            notices.push("'temp_path' is not set, using data/temp".to_string());
            PathBuf::from("data/temp")
        });
        let final_path = raw.final_path.unwrap_or_else(|| {
            notices.push("'final_path' is not set, using data/final".to_string());
            PathBuf::from("data/final")
        });
        let format = match raw.format.as_deref() {
            None => DataFormat::default(),
            Some(name) => DataFormat::parse(name).unwrap_or_else(|| {
                notices.push(format!(
                    "unknown format '{}', expected one of (CSV, JSONL, TSV, Parquet); using JSONL",
                    name
                ));
                DataFormat::Jsonl
            }),
        };

        let batch_size = raw.batch_size.unwrap_or(10_000);
        if batch_size == 0 {
            return Err(PipelineError::Configuration("'batch_size' must be at least 1".into()));
        }
        let lookback_days = raw.lookback_days.unwrap_or(3);
        if raw.concurrency == Some(0) {
            return Err(PipelineError::Configuration("'concurrency' must be at least 1".into()));
        }

        let raw_tables = raw.tables.unwrap_or_default();
        if raw_tables.is_empty() {
            return Err(PipelineError::Configuration(
                "'tables' is empty; nothing to extract".into(),
            ));
        }

        let mut tables = Vec::with_capacity(raw_tables.len());
        let mut rejected = Vec::new();
        for (name, table) in raw_tables {
            match resolve_table(&name, table, lookback_days) {
                Ok(spec) => tables.push(spec),
                Err(PipelineError::InvalidQueryMode { table, mode }) => {
                    let reason = PipelineError::InvalidQueryMode {
                        table: table.clone(),
                        mode,
                    }
                    .to_string();
                    rejected.push(RejectedTable {
                        table: TableName(table),
                        reason,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Ok(AppConfig {
            temp_path,
            final_path,
            format,
            batch_size,
            lookback_days,
            log_retention_days: raw.log_retention_days.unwrap_or(30),
            log_dir: raw.log_dir.unwrap_or_else(|| PathBuf::from("logs")),
            concurrency: raw.concurrency,
            table_timeout: Duration::from_secs(raw.table_timeout_secs.unwrap_or(1800)),
            retry: RetryPolicy::new(
                raw.max_retries.unwrap_or(3),
                Duration::from_millis(raw.retry_delay_ms.unwrap_or(5000)),
            ),
            dap: resolve_dap(raw.dap),
            database: resolve_db(raw.database),
            tables,
            rejected,
            notices,
        })
    }

    /// Emit the resolution notices and rejected tables as warnings.
    pub fn log_notices(&self) {
        for notice in &self.notices {
            warn!("{}", notice);
        }
        for rejected in &self.rejected {
            warn!(table = %rejected.table, reason = %rejected.reason, "table left out of this run");
        }
    }

    /// Directory holding consolidated artifacts: `{temp}/{format_dir}`.
    pub fn artifact_dir(&self) -> PathBuf {
        self.temp_path.join(self.format.dir_name())
    }

    pub fn artifact_path(&self, table: &TableName) -> PathBuf {
        self.artifact_dir()
            .join(format!("{}.{}", table, self.format.extension()))
    }

    /// Persisted per-table snapshot: `{final}/{table}.csv`.
    pub fn snapshot_path(&self, table: &TableName) -> PathBuf {
        self.final_path.join(format!("{}.csv", table))
    }

    /// Worker count for this run.
    pub fn workers(&self) -> usize {
        self.concurrency.unwrap_or(self.tables.len()).max(1)
    }
}

fn config_err(e: config::ConfigError) -> PipelineError {
    PipelineError::Configuration(e.to_string())
}

fn resolve_table(name: &str, raw: RawTable, lookback_days: u32) -> Result<TableSpec, PipelineError> {
    let missing = |key: &str| {
        PipelineError::Configuration(format!(
            "table '{}' is missing '{}' (query_mode: incremental or snapshot, fields: [...], merge_statement: SQL)",
            name, key
        ))
    };
    let query_mode = raw.query_mode.ok_or_else(|| missing("query_mode"))?;
    let fields = raw.fields.ok_or_else(|| missing("fields"))?;
    let merge_statement = raw.merge_statement.ok_or_else(|| missing("merge_statement"))?;

    let placeholders = count_placeholders(&merge_statement);
    if placeholders != fields.len() {
        return Err(PipelineError::Configuration(format!(
            "table '{}': merge statement binds {} parameters but {} fields are projected",
            name,
            placeholders,
            fields.len()
        )));
    }

    TableSpec::new(
        name,
        &query_mode,
        fields,
        merge_statement,
        raw.identity_field,
        raw.lookback_days.unwrap_or(lookback_days),
    )
}

fn resolve_dap(raw: RawDap) -> Option<DapConfig> {
    Some(DapConfig {
        api_url: raw.api_url?.trim_end_matches('/').to_string(),
        client_id: raw.client_id?,
        client_secret: raw.client_secret?,
        namespace: raw.namespace.unwrap_or_else(|| "canvas".to_string()),
        poll_interval: Duration::from_millis(raw.poll_interval_ms.unwrap_or(5000)),
    })
}

fn resolve_db(raw: RawDb) -> Option<DbConfig> {
    let driver = raw.driver.unwrap_or_else(|| "postgres".to_string());
    let service = raw.service?;
    if driver == "sqlite" {
        return Some(DbConfig {
            port: 0,
            host: String::new(),
            username: String::new(),
            password: String::new(),
            service,
            driver,
        });
    }
    Some(DbConfig {
        port: raw.port.unwrap_or_else(|| default_port(&driver)),
        host: raw.host?,
        username: raw.username?,
        password: raw.password.unwrap_or_default(),
        service,
        driver,
    })
}
