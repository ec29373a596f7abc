use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, instrument};

use crate::application::retry::RetryPolicy;
use crate::domain::{
    error::PipelineError,
    ports::DataPlatform,
    table_spec::{ExtractionWindow, TableSpec},
    value_objects::{DataFormat, TableName},
};

/// One per-table file built from every part the platform returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidatedArtifact {
    pub table: TableName,
    pub path: PathBuf,
    pub format: DataFormat,
    pub parts: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Artifact(ConsolidatedArtifact),
    /// The platform had no parts for this query: nothing to do this run.
    Empty,
}

/// Path of the consolidated artifact for `table` inside `dir`.
pub fn artifact_path(dir: &Path, table: &TableName, format: DataFormat) -> PathBuf {
    dir.join(format!("{}.{}", table, format.extension()))
}

// ─── Table Extractor ───

pub struct TableExtractor {
    platform: Arc<dyn DataPlatform>,
    retry: RetryPolicy,
}

impl TableExtractor {
    pub fn new(platform: Arc<dyn DataPlatform>, retry: RetryPolicy) -> Self {
        Self { platform, retry }
    }

    /// Fetch `spec.table` and leave a single `{table}.{ext}` in `destination_dir`.
    #[instrument(
        name = "extract_table",
        skip(self, spec, format, window, destination_dir),
        fields(db.table = %spec.table, mode = ?spec.query_mode, %format),
        level = "info"
    )]
    pub async fn extract(
        &self,
        spec: &TableSpec,
        format: DataFormat,
        window: &ExtractionWindow,
        destination_dir: &Path,
    ) -> Result<Extraction, PipelineError> {
        let table = &spec.table;
        let query = spec.query(format, window);
        let failure = |e: anyhow::Error| PipelineError::ExtractionFailure {
            table: table.0.clone(),
            reason: format!("{:#}", e),
        };

        let parts = self
            .retry
            .run("list_parts", || self.platform.list_parts(table, &query))
            .await
            .map_err(failure)?;

        if parts.is_empty() {
            info!(table = %table, "platform returned no parts");
            return Ok(Extraction::Empty);
        }

        fs::create_dir_all(destination_dir).await?;

        let mut downloaded = Vec::with_capacity(parts.len());
        for part in &parts {
            let path = self
                .retry
                .run("download", || self.platform.download(part, destination_dir, true))
                .await
                .map_err(failure)?;
            debug!(table = %table, part = %part.id, path = %path.display(), "part downloaded");
            downloaded.push(path);
        }

        let target = artifact_path(destination_dir, table, format);
        let bytes = consolidate(&downloaded, &target, format)
            .await
            .map_err(failure)?;

        info!(
            table = %table,
            parts = downloaded.len(),
            bytes,
            path = %target.display(),
            "artifact ready"
        );

        Ok(Extraction::Artifact(ConsolidatedArtifact {
            table: table.clone(),
            path: target,
            format,
            parts: downloaded.len(),
            bytes,
        }))
    }
}

// ─── Consolidation ───

/// Join `parts` into `target` and remove the originals. Returns the artifact size.
///
/// A single part is renamed untouched. Several parts are appended in order;
/// for delimited formats the header line of every part after the first is
/// dropped so the artifact carries exactly one header. A part whose last byte
/// is not a newline gets one before the next part's content.
async fn consolidate(parts: &[PathBuf], target: &Path, format: DataFormat) -> anyhow::Result<u64> {
    if let [single] = parts {
        if single != target {
            fs::rename(single, target)
                .await
                .with_context(|| format!("Failed to rename {} to {}", single.display(), target.display()))?;
            info!(from = %single.display(), to = %target.display(), "renamed single part");
        }
        return Ok(fs::metadata(target).await?.len());
    }

    if !format.is_concatenable() {
        anyhow::bail!("{} parts of format {} cannot be concatenated", parts.len(), format);
    }

    let mut out = fs::File::create(target)
        .await
        .with_context(|| format!("Failed to create {}", target.display()))?;

    let mut buf = vec![0u8; 64 * 1024];
    let mut line_open = false;
    for (idx, part) in parts.iter().enumerate() {
        let file = fs::File::open(part)
            .await
            .with_context(|| format!("Failed to open part {}", part.display()))?;
        let mut reader = BufReader::new(file);

        if idx > 0 && format.has_header() {
            let mut header = Vec::new();
            reader.read_until(b'\n', &mut header).await?;
        }

        let mut copied = 0u64;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            // a part without a trailing newline must not glue onto the next one
            if line_open {
                out.write_all(b"\n").await?;
                line_open = false;
            }
            out.write_all(&buf[..n]).await?;
            line_open = buf[n - 1] != b'\n';
            copied += n as u64;
        }
        info!(part = %part.display(), into = %target.display(), bytes = copied, "merged part");
    }
    out.flush().await?;
    drop(out);

    for part in parts {
        fs::remove_file(part)
            .await
            .with_context(|| format!("Failed to delete part {}", part.display()))?;
        info!(part = %part.display(), "deleted part");
    }

    Ok(fs::metadata(target).await?.len())
}
