use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::application::extract::{Extraction, TableExtractor};
use crate::application::load::Loader;
use crate::application::normalize::normalize;
use crate::domain::{
    error::PipelineError,
    ports::{DataPlatform, Reconcile, TargetStore},
    records::RecordTable,
    run_report::{RunReport, Stage, TableOutcome, TableStatus},
    table_spec::{ExtractionWindow, TableSpec},
};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::csv_store::{read_snapshot, write_snapshot};

/// Which part of the pipeline a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunStage {
    /// Extract, transform and load every table.
    #[default]
    All,
    /// Only pull artifacts into the temp directory.
    Extract,
    /// Normalize and reconcile artifacts already in the temp directory.
    Transform,
    /// Load the snapshots found in the final directory.
    Load,
}

impl RunStage {
    pub fn extracts(self) -> bool {
        matches!(self, RunStage::All | RunStage::Extract)
    }

    pub fn transforms(self) -> bool {
        matches!(self, RunStage::All | RunStage::Transform)
    }

    pub fn loads(self) -> bool {
        matches!(self, RunStage::All | RunStage::Load)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    pub stage: RunStage,
    /// Run everything except the database load.
    pub dry_run: bool,
}

impl PipelineOptions {
    pub fn needs_platform(&self) -> bool {
        self.stage.extracts()
    }

    pub fn needs_store(&self) -> bool {
        self.stage.loads() && !self.dry_run
    }
}

// ─── Pipeline ───

pub struct Pipeline {
    cfg: Arc<AppConfig>,
    extractor: Option<Arc<TableExtractor>>,
    reconciler: Arc<dyn Reconcile>,
    loader: Option<Arc<Loader>>,
}

impl Pipeline {
    pub fn new(
        cfg: AppConfig,
        platform: Option<Arc<dyn DataPlatform>>,
        reconciler: Arc<dyn Reconcile>,
        store: Option<Arc<dyn TargetStore>>,
    ) -> Self {
        let extractor = platform.map(|p| Arc::new(TableExtractor::new(p, cfg.retry)));
        let loader = store.map(|s| Arc::new(Loader::new(s, cfg.batch_size)));
        Self {
            cfg: Arc::new(cfg),
            extractor,
            reconciler,
            loader,
        }
    }

    /// Drive every configured table through the stages `options` selects.
    ///
    /// Only a missing collaborator is returned as an error. Table failures
    /// are recorded in the report and never stop sibling tables.
    pub async fn run(&self, options: PipelineOptions) -> Result<RunReport, PipelineError> {
        if options.needs_platform() && self.extractor.is_none() {
            return Err(PipelineError::Configuration(
                "extraction needs DAP credentials (dap.api_url, dap.client_id, dap.client_secret)".into(),
            ));
        }
        if options.needs_store() && self.loader.is_none() {
            return Err(PipelineError::Configuration(
                "loading needs a database (database.service and connection settings)".into(),
            ));
        }

        let run_start = Utc::now();
        info!(
            stage = ?options.stage,
            dry_run = options.dry_run,
            tables = self.cfg.tables.len(),
            "pipeline started"
        );

        let mut outcomes: Vec<TableOutcome> = self
            .cfg
            .rejected
            .iter()
            .map(|r| TableOutcome::failed(r.table.as_str(), Stage::Resolve, r.reason.clone()))
            .collect();

        if options.stage == RunStage::Load {
            outcomes.extend(self.load_stage(options.dry_run).await);
        } else {
            outcomes.extend(self.run_workers(options, run_start).await);
        }

        let report = RunReport::new(run_start, outcomes);
        info!(
            succeeded = report.summary.succeeded,
            skipped = report.summary.skipped,
            failed = report.summary.failed,
            rows_affected = report.summary.rows_affected,
            "pipeline finished"
        );
        Ok(report)
    }

    /// Fan the tables out over a bounded queue drained by `cfg.workers()` workers.
    async fn run_workers(&self, options: PipelineOptions, run_start: DateTime<Utc>) -> Vec<TableOutcome> {
        let tables = self.cfg.tables.clone();
        if tables.is_empty() {
            return Vec::new();
        }

        let (tx, rx) = mpsc::channel::<TableSpec>(tables.len());
        for spec in tables {
            if tx.send(spec).await.is_err() {
                break;
            }
        }
        drop(tx);

        let rx = Arc::new(Mutex::new(rx));
        let worker = TableWorker {
            cfg: Arc::clone(&self.cfg),
            extractor: self.extractor.clone(),
            reconciler: Arc::clone(&self.reconciler),
            loader: self.loader.clone(),
            options,
            run_start,
        };

        let mut set = JoinSet::new();
        for _ in 0..self.cfg.workers() {
            let rx = Arc::clone(&rx);
            let worker = worker.clone();
            set.spawn(async move {
                let mut done = Vec::new();
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(spec) = next else { break };
                    done.push(worker.run_isolated(spec).await);
                }
                done
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(done) => outcomes.extend(done),
                Err(e) => error!(error = %e, "worker stopped unexpectedly"),
            }
        }
        outcomes
    }

    async fn load_stage(&self, dry_run: bool) -> Vec<TableOutcome> {
        let all_skipped = |reason: &str| -> Vec<TableOutcome> {
            self.cfg
                .tables
                .iter()
                .map(|spec| {
                    let mut outcome = TableOutcome::new(spec.table.as_str());
                    outcome.status = skipped(reason);
                    outcome
                })
                .collect()
        };

        let Some(loader) = self.loader.as_ref().filter(|_| !dry_run) else {
            return all_skipped("dry run");
        };

        let started = Instant::now();
        let directory = match loader.load_directory(&self.cfg.final_path, &self.cfg.tables).await {
            Ok(d) => d,
            Err(e) => {
                error!(error = %e, "load stage aborted");
                return self
                    .cfg
                    .tables
                    .iter()
                    .map(|spec| TableOutcome::failed(spec.table.as_str(), Stage::Load, e.to_string()))
                    .collect();
            }
        };

        let mut outcomes = all_skipped("no snapshot in final directory");
        for (table, result) in directory.loaded {
            let Some(outcome) = outcomes.iter_mut().find(|o| o.table == table.as_str()) else {
                continue;
            };
            match result {
                Ok(report) => {
                    outcome.status = TableStatus::Succeeded;
                    outcome.records_reconciled = report.rows_submitted;
                    outcome.load = Some(report);
                }
                Err(e) => {
                    outcome.status = TableStatus::Failed {
                        stage: Stage::Load,
                        reason: e.to_string(),
                    };
                }
            }
            outcome.duration_ms = started.elapsed().as_millis();
        }
        outcomes
    }
}

// ─── Per-table worker ───

/// A failure tagged with the stage it happened in.
struct StageError {
    stage: Stage,
    error: PipelineError,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, StageError>;
}

impl<T> AtStage<T> for Result<T, PipelineError> {
    fn at(self, stage: Stage) -> Result<T, StageError> {
        self.map_err(|error| StageError { stage, error })
    }
}

#[derive(Clone)]
struct TableWorker {
    cfg: Arc<AppConfig>,
    extractor: Option<Arc<TableExtractor>>,
    reconciler: Arc<dyn Reconcile>,
    loader: Option<Arc<Loader>>,
    options: PipelineOptions,
    run_start: DateTime<Utc>,
}

impl TableWorker {
    /// Process one table in its own task so a panic stays scoped to that table.
    async fn run_isolated(&self, spec: TableSpec) -> TableOutcome {
        let table = spec.table.clone();
        let worker = self.clone();
        match tokio::spawn(async move { worker.process(spec).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(table = %table, error = %e, "table task aborted");
                TableOutcome::failed(table.as_str(), Stage::Extract, format!("task aborted: {}", e))
            }
        }
    }

    async fn process(&self, spec: TableSpec) -> TableOutcome {
        let started = Instant::now();
        let mut outcome = TableOutcome::new(spec.table.as_str());

        if let Err(StageError { stage, error }) = self.drive(&spec, &mut outcome).await {
            error!(table = %spec.table, %stage, error = %error, "table failed");
            outcome.status = TableStatus::Failed {
                stage,
                reason: error.to_string(),
            };
        }

        outcome.duration_ms = started.elapsed().as_millis();
        outcome
    }

    async fn drive(&self, spec: &TableSpec, outcome: &mut TableOutcome) -> Result<(), StageError> {
        let artifact = if self.options.stage.extracts() {
            match self.extract(spec).await.at(Stage::Extract)? {
                Extraction::Empty => {
                    outcome.status = skipped("no parts returned");
                    return Ok(());
                }
                Extraction::Artifact(artifact) => {
                    outcome.parts = artifact.parts;
                    artifact.path
                }
            }
        } else {
            self.cfg.artifact_path(&spec.table)
        };

        if !self.options.stage.transforms() {
            return Ok(());
        }
        if !artifact.is_file() {
            info!(table = %spec.table, path = %artifact.display(), "no artifact to transform");
            outcome.status = skipped("no artifact");
            return Ok(());
        }

        let incoming = self.normalize(spec, artifact.clone()).await.at(Stage::Normalize)?;
        outcome.records_extracted = incoming.len();
        if let Err(e) = tokio::fs::remove_file(&artifact).await {
            warn!(table = %spec.table, path = %artifact.display(), error = %e, "could not delete artifact");
        }
        if incoming.is_empty() {
            warn!(table = %spec.table, "artifact held no records");
            outcome.status = skipped("no records");
            return Ok(());
        }

        let reconciled = self.reconcile(spec, incoming).await.at(Stage::Reconcile)?;
        outcome.records_reconciled = reconciled.len();

        if !self.options.stage.loads() || self.options.dry_run {
            return Ok(());
        }
        if let Some(loader) = &self.loader {
            let report = loader.load(spec, &reconciled).await.at(Stage::Load)?;
            outcome.load = Some(report);
        }
        Ok(())
    }

    async fn extract(&self, spec: &TableSpec) -> Result<Extraction, PipelineError> {
        let extractor = self.extractor.as_ref().ok_or_else(|| {
            PipelineError::Configuration("no data platform configured".into())
        })?;
        let window = ExtractionWindow::lookback(self.run_start, spec.lookback_days);
        let timeout = self.cfg.table_timeout;

        tokio::time::timeout(
            timeout,
            extractor.extract(spec, self.cfg.format, &window, &self.cfg.artifact_dir()),
        )
        .await
        .map_err(|_| PipelineError::Timeout {
            table: spec.table.0.clone(),
            secs: timeout.as_secs(),
        })?
    }

    async fn normalize(&self, spec: &TableSpec, path: PathBuf) -> Result<RecordTable, PipelineError> {
        let format = self.cfg.format;
        let spec = spec.clone();
        let task_path = path.clone();
        tokio::task::spawn_blocking(move || normalize(&task_path, format, &spec))
            .await
            .map_err(|e| PipelineError::malformed(path, e))?
    }

    /// Merge with the persisted snapshot and write the result back.
    async fn reconcile(&self, spec: &TableSpec, incoming: RecordTable) -> Result<RecordTable, PipelineError> {
        let snapshot = self.cfg.snapshot_path(&spec.table);
        let reconciler = Arc::clone(&self.reconciler);
        let table = spec.table.clone();
        let identity = spec.identity_column();

        tokio::task::spawn_blocking(move || -> Result<RecordTable, PipelineError> {
            let previous = read_snapshot(&snapshot)?.unwrap_or_default();
            let reconciled = reconciler.reconcile(&table, previous, incoming, &identity);
            write_snapshot(&snapshot, &reconciled)?;
            info!(table = %table, path = %snapshot.display(), rows = reconciled.len(), "snapshot written");
            Ok(reconciled)
        })
        .await
        .map_err(|e| PipelineError::Io(std::io::Error::other(e)))?
    }
}

fn skipped(reason: &str) -> TableStatus {
    TableStatus::Skipped {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::fakes::{FakePlatform, FakeStore};
    use crate::application::reconcile::Reconciler;
    use crate::application::retry::RetryPolicy;
    use crate::domain::value_objects::{DataFormat, TableName};
    use crate::infrastructure::config::RejectedTable;
    use serde_json::json;
    use std::path::Path;
    use std::time::Duration;

    fn spec(table: &str) -> TableSpec {
        TableSpec::new(
            table,
            "incremental",
            vec!["key.id".into(), "value.name".into()],
            format!("INSERT INTO canvas_{} VALUES (?, ?)", table),
            None,
            3,
        )
        .unwrap()
    }

    fn config(root: &Path, tables: &[&str]) -> AppConfig {
        AppConfig {
            temp_path: root.join("temp"),
            final_path: root.join("final"),
            format: DataFormat::Jsonl,
            batch_size: 2,
            lookback_days: 3,
            log_retention_days: 30,
            log_dir: root.join("logs"),
            concurrency: None,
            table_timeout: Duration::from_secs(5),
            retry: RetryPolicy::none(),
            dap: None,
            database: None,
            tables: tables.iter().map(|t| spec(t)).collect(),
            rejected: Vec::new(),
            notices: Vec::new(),
        }
    }

    fn line(id: i64, name: &str) -> String {
        format!("{{\"key\":{{\"id\":{}}},\"value\":{{\"name\":\"{}\"}}}}\n", id, name)
    }

    fn pipeline(cfg: AppConfig, platform: FakePlatform, store: &FakeStore) -> Pipeline {
        Pipeline::new(
            cfg,
            Some(Arc::new(platform)),
            Arc::new(Reconciler::new()),
            Some(Arc::new(store.clone())),
        )
    }

    #[tokio::test]
    async fn failing_table_does_not_stop_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let platform = FakePlatform::new()
            .with_parts("courses", vec![line(1, "A").into_bytes()])
            .failing("users");
        let store = FakeStore::new();

        let report = pipeline(config(dir.path(), &["courses", "users"]), platform, &store)
            .run(PipelineOptions::default())
            .await
            .unwrap();

        assert!(report.is_degraded());
        assert_eq!(report.outcome("courses").unwrap().status, TableStatus::Succeeded);
        assert!(matches!(
            report.outcome("users").unwrap().status,
            TableStatus::Failed { stage: Stage::Extract, .. }
        ));
        assert_eq!(store.log.lock().unwrap().commits, 1);
    }

    #[tokio::test]
    async fn slow_table_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let platform = FakePlatform::new()
            .with_parts("courses", vec![line(1, "A").into_bytes()])
            .slow("courses", Duration::from_secs(10));
        let mut cfg = config(dir.path(), &["courses"]);
        cfg.table_timeout = Duration::from_millis(20);

        let report = pipeline(cfg, platform, &FakeStore::new())
            .run(PipelineOptions::default())
            .await
            .unwrap();

        let TableStatus::Failed { stage, reason } = &report.outcome("courses").unwrap().status else {
            panic!("expected a failure");
        };
        assert_eq!(*stage, Stage::Extract);
        assert!(reason.contains("did not finish"), "{reason}");
    }

    #[tokio::test]
    async fn empty_table_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let platform = FakePlatform::new().with_parts("scores", vec![]);

        let report = pipeline(config(dir.path(), &["scores"]), platform, &FakeStore::new())
            .run(PipelineOptions::default())
            .await
            .unwrap();

        assert!(matches!(report.outcome("scores").unwrap().status, TableStatus::Skipped { .. }));
        assert!(!report.is_degraded());
    }

    #[tokio::test]
    async fn rejected_tables_are_reported_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), &["courses"]);
        cfg.rejected.push(RejectedTable {
            table: TableName("terms".into()),
            reason: "invalid query mode 'hourly'".into(),
        });
        let platform = FakePlatform::new().with_parts("courses", vec![line(1, "A").into_bytes()]);

        let report = pipeline(cfg, platform, &FakeStore::new())
            .run(PipelineOptions::default())
            .await
            .unwrap();

        assert!(matches!(
            report.outcome("terms").unwrap().status,
            TableStatus::Failed { stage: Stage::Resolve, .. }
        ));
        assert_eq!(report.outcome("courses").unwrap().status, TableStatus::Succeeded);
    }

    #[tokio::test]
    async fn dry_run_never_touches_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let platform = FakePlatform::new().with_parts("courses", vec![line(1, "A").into_bytes()]);
        let store = FakeStore::new();

        let report = pipeline(config(dir.path(), &["courses"]), platform, &store)
            .run(PipelineOptions {
                stage: RunStage::All,
                dry_run: true,
            })
            .await
            .unwrap();

        assert_eq!(report.outcome("courses").unwrap().records_reconciled, 1);
        assert_eq!(store.log.lock().unwrap().sessions, 0);
        assert!(dir.path().join("final/courses.csv").is_file());
    }

    #[tokio::test]
    async fn stages_can_run_separately() {
        let dir = tempfile::tempdir().unwrap();
        let store = FakeStore::new();
        let cfg = config(dir.path(), &["courses"]);
        let platform = FakePlatform::new().with_parts("courses", vec![line(1, "A").into_bytes()]);
        let pipeline = pipeline(cfg, platform, &store);

        let extracted = pipeline
            .run(PipelineOptions { stage: RunStage::Extract, dry_run: false })
            .await
            .unwrap();
        assert_eq!(extracted.outcome("courses").unwrap().parts, 1);
        assert!(dir.path().join("temp/json/courses.json").is_file());

        let transformed = pipeline
            .run(PipelineOptions { stage: RunStage::Transform, dry_run: false })
            .await
            .unwrap();
        assert_eq!(transformed.outcome("courses").unwrap().records_reconciled, 1);
        assert!(!dir.path().join("temp/json/courses.json").exists());

        let loaded = pipeline
            .run(PipelineOptions { stage: RunStage::Load, dry_run: false })
            .await
            .unwrap();
        assert_eq!(loaded.outcome("courses").unwrap().load.as_ref().unwrap().rows_affected, 1);
        assert_eq!(
            store.log.lock().unwrap().committed_rows,
            vec![vec![json!("1"), json!("A")]]
        );
    }

    #[tokio::test]
    async fn second_run_binds_snapshot_rows_like_fresh_ones() {
        let dir = tempfile::tempdir().unwrap();
        let store = FakeStore::new();

        let first = FakePlatform::new().with_parts("courses", vec![line(1, "A").into_bytes()]);
        pipeline(config(dir.path(), &["courses"]), first, &store)
            .run(PipelineOptions::default())
            .await
            .unwrap();
        let second = FakePlatform::new().with_parts("courses", vec![line(2, "B").into_bytes()]);
        pipeline(config(dir.path(), &["courses"]), second, &store)
            .run(PipelineOptions::default())
            .await
            .unwrap();

        let log = store.log.lock().unwrap();
        assert_eq!(
            log.committed_rows,
            vec![
                vec![json!("1"), json!("A")],
                vec![json!("1"), json!("A")],
                vec![json!("2"), json!("B")],
            ]
        );
    }

    #[tokio::test]
    async fn transform_without_artifact_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(config(dir.path(), &["courses"]), None, Arc::new(Reconciler::new()), None);

        let report = pipeline
            .run(PipelineOptions { stage: RunStage::Transform, dry_run: false })
            .await
            .unwrap();

        assert!(matches!(report.outcome("courses").unwrap().status, TableStatus::Skipped { .. }));
    }

    #[tokio::test]
    async fn load_stage_without_final_dir_fails_every_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = FakeStore::new();
        let pipeline = Pipeline::new(
            config(dir.path(), &["courses", "users"]),
            None,
            Arc::new(Reconciler::new()),
            Some(Arc::new(store)),
        );

        let report = pipeline
            .run(PipelineOptions { stage: RunStage::Load, dry_run: false })
            .await
            .unwrap();

        assert_eq!(report.summary.failed, 2);
    }

    #[tokio::test]
    async fn missing_platform_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(config(dir.path(), &["courses"]), None, Arc::new(Reconciler::new()), None);

        let err = pipeline.run(PipelineOptions::default()).await.unwrap_err();

        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn single_worker_drains_every_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), &["a", "b", "c"]);
        cfg.concurrency = Some(1);
        let platform = FakePlatform::new()
            .with_parts("a", vec![line(1, "x").into_bytes()])
            .with_parts("b", vec![line(2, "y").into_bytes()])
            .with_parts("c", vec![line(3, "z").into_bytes()]);

        let report = pipeline(cfg, platform, &FakeStore::new())
            .run(PipelineOptions::default())
            .await
            .unwrap();

        assert_eq!(report.summary.succeeded, 3);
    }
}
