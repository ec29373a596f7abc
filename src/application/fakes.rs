//! In-memory ports for unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::domain::{
    load_report::{BatchOutcome, RowError},
    ports::{DataPlatform, LoadSession, PartRef, TargetStore},
    table_spec::TableQuery,
    value_objects::TableName,
};

// ─── FakePlatform ───

#[derive(Default)]
pub struct FakePlatform {
    parts: HashMap<String, Vec<Vec<u8>>>,
    failing: HashSet<String>,
    slow: HashMap<String, Duration>,
    flaky_remaining: AtomicU32,
    queries: Mutex<Vec<TableQuery>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parts(mut self, table: &str, parts: Vec<Vec<u8>>) -> Self {
        self.parts.insert(table.to_string(), parts);
        self
    }

    pub fn failing(mut self, table: &str) -> Self {
        self.failing.insert(table.to_string());
        self
    }

    pub fn slow(mut self, table: &str, delay: Duration) -> Self {
        self.slow.insert(table.to_string(), delay);
        self
    }

    /// The next `n` part listings fail before succeeding.
    pub fn flaky(self, n: u32) -> Self {
        self.flaky_remaining.store(n, Ordering::SeqCst);
        self
    }

    pub fn queries(&self) -> Vec<TableQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataPlatform for FakePlatform {
    async fn list_parts(&self, table: &TableName, query: &TableQuery) -> Result<Vec<PartRef>> {
        self.queries.lock().unwrap().push(query.clone());

        if let Some(delay) = self.slow.get(table.as_str()) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(table.as_str()) {
            return Err(anyhow!("job for {} failed", table));
        }
        if self
            .flaky_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(anyhow!("503 Service Unavailable"));
        }

        let count = self.parts.get(table.as_str()).map_or(0, Vec::len);
        Ok((0..count)
            .map(|i| PartRef {
                id: format!("{}-part-{}", table, i),
                format: query.format(),
            })
            .collect())
    }

    async fn download(&self, part: &PartRef, destination: &Path, _decompress: bool) -> Result<PathBuf> {
        let (table, idx) = part
            .id
            .rsplit_once("-part-")
            .ok_or_else(|| anyhow!("unknown part {}", part.id))?;
        let idx: usize = idx.parse()?;
        let body = self
            .parts
            .get(table)
            .and_then(|p| p.get(idx))
            .ok_or_else(|| anyhow!("unknown part {}", part.id))?;

        let path = destination.join(format!("{}.{}", part.id, part.format.extension()));
        tokio::fs::write(&path, body).await?;
        Ok(path)
    }
}

// ─── FakeStore ───

/// What a `FakeStore` observed across every session it opened.
#[derive(Debug, Default)]
pub struct StoreLog {
    pub sessions: usize,
    pub commits: usize,
    pub batch_sizes: Vec<usize>,
    pub committed_rows: Vec<Vec<Value>>,
}

/// Accepts every row except those whose first parameter equals `reject`.
#[derive(Clone, Default)]
pub struct FakeStore {
    pub log: Arc<Mutex<StoreLog>>,
    reject: Option<Value>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(reject: Value) -> Self {
        Self {
            reject: Some(reject),
            ..Self::default()
        }
    }
}

#[async_trait]
impl TargetStore for FakeStore {
    async fn open_session(&self) -> Result<Box<dyn LoadSession>> {
        self.log.lock().unwrap().sessions += 1;
        Ok(Box::new(FakeSession {
            log: Arc::clone(&self.log),
            reject: self.reject.clone(),
            pending: Vec::new(),
        }))
    }
}

struct FakeSession {
    log: Arc<Mutex<StoreLog>>,
    reject: Option<Value>,
    pending: Vec<Vec<Value>>,
}

#[async_trait]
impl LoadSession for FakeSession {
    async fn execute_batch(&mut self, _statement: &str, rows: &[Vec<Value>]) -> Result<BatchOutcome> {
        self.log.lock().unwrap().batch_sizes.push(rows.len());

        let mut outcome = BatchOutcome::with_capacity(rows.len());
        for (offset, row) in rows.iter().enumerate() {
            if self.reject.is_some() && row.first() == self.reject.as_ref() {
                outcome.row_counts.push(0);
                outcome.errors.push(RowError {
                    message: "unique constraint violated".into(),
                    offset,
                });
            } else {
                outcome.row_counts.push(1);
                self.pending.push(row.clone());
            }
        }
        Ok(outcome)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let FakeSession { log, pending, .. } = *self;
        let mut log = log.lock().unwrap();
        log.commits += 1;
        log.committed_rows.extend(pending);
        Ok(())
    }
}
