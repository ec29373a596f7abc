use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::any::{AnyArguments, AnyPoolOptions};
use sqlx::query::Query;
use sqlx::{Any, AnyPool, Connection, Transaction};
use tracing::debug;

use crate::domain::load_report::{BatchOutcome, RowError};
use crate::domain::ports::{LoadSession, TargetStore};
use crate::infrastructure::config::DbConfig;

pub struct SqlxTargetStore {
    pool: AnyPool,
}

/// Connect to the database described in `cfg` and return a `SqlxTargetStore`.
pub async fn connect(cfg: &DbConfig) -> Result<SqlxTargetStore> {
    let store = connect_url(&cfg.url(), 5).await.with_context(|| {
        format!(
            "Failed to connect to {} (driver: {})",
            cfg.service, cfg.driver
        )
    })?;

    debug!(
        "Connected to {}/{} via {} driver",
        cfg.host, cfg.service, cfg.driver
    );

    Ok(store)
}

/// Connect straight from a sqlx URL (`postgres://…`, `sqlite::memory:`).
pub async fn connect_url(url: &str, max_connections: u32) -> Result<SqlxTargetStore> {
    sqlx::any::install_default_drivers();

    let pool = AnyPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await?;

    Ok(SqlxTargetStore { pool })
}

impl SqlxTargetStore {
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

#[async_trait]
impl TargetStore for SqlxTargetStore {
    async fn open_session(&self) -> Result<Box<dyn LoadSession>> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to start load transaction")?;
        Ok(Box::new(SqlxLoadSession { tx }))
    }
}

/// One table load inside a single transaction. Every row runs in its own
/// savepoint so a rejected row leaves the transaction usable.
struct SqlxLoadSession {
    tx: Transaction<'static, Any>,
}

#[async_trait]
impl LoadSession for SqlxLoadSession {
    async fn execute_batch(&mut self, statement: &str, rows: &[Vec<Value>]) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::with_capacity(rows.len());

        for (offset, row) in rows.iter().enumerate() {
            let mut savepoint = self.tx.begin().await.context("Failed to open savepoint")?;
            let query = bind_row(sqlx::query(statement), row);

            match query.execute(&mut *savepoint).await {
                Ok(result) => {
                    savepoint.commit().await.context("Failed to release savepoint")?;
                    outcome.row_counts.push(result.rows_affected());
                }
                Err(e) => {
                    savepoint
                        .rollback()
                        .await
                        .context("Failed to roll back savepoint")?;
                    debug!(offset, error = %e, "row rejected");
                    outcome.row_counts.push(0);
                    outcome.errors.push(RowError {
                        message: e.to_string(),
                        offset,
                    });
                }
            }
        }

        Ok(outcome)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.context("Failed to commit load transaction")
    }
}

/// Bind one parameter tuple positionally.
///
/// `Any` only carries primitive types, so nested values go in as JSON text.
fn bind_row<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    row: &[Value],
) -> Query<'q, Any, AnyArguments<'q>> {
    for value in row {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64()),
            },
            Value::String(s) => query.bind(s.clone()),
            nested @ (Value::Array(_) | Value::Object(_)) => query.bind(nested.to_string()),
        };
    }
    query
}
