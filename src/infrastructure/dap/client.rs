use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use reqwest::Client;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::domain::ports::{DataPlatform, PartRef};
use crate::domain::table_spec::TableQuery;
use crate::domain::value_objects::{DataFormat, TableName};
use crate::infrastructure::config::DapConfig;
use crate::infrastructure::dap::models::{
    Job, JobState, ObjectRef, ObjectUrls, QueryRequest, TokenResponse,
};

const AUTH_HEADER: &str = "x-instauth";

/// HTTP client for the Canvas Data Access Platform.
///
/// Logs in with client credentials on first use and reuses the token for the
/// rest of the run.
pub struct DapClient {
    http: Client,
    cfg: DapConfig,
    token: OnceCell<String>,
}

impl DapClient {
    pub fn new(cfg: DapConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("canvas-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            cfg,
            token: OnceCell::new(),
        })
    }

    async fn token(&self) -> Result<&str> {
        let token = self.token.get_or_try_init(|| self.login()).await?;
        Ok(token.as_str())
    }

    async fn login(&self) -> Result<String> {
        let url = format!("{}/ids/auth/login", self.cfg.api_url);
        let response: TokenResponse = self
            .http
            .post(&url)
            .basic_auth(&self.cfg.client_id, Some(&self.cfg.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .context("DAP login request failed")?
            .error_for_status()
            .context("DAP login rejected")?
            .json()
            .await
            .context("Malformed DAP login response")?;

        info!(api = %self.cfg.api_url, "authenticated with DAP");
        Ok(response.access_token)
    }

    async fn submit(&self, table: &TableName, query: &TableQuery) -> Result<Job> {
        let format = query.format();
        let body = QueryRequest {
            format: format.api_name(),
            mode: format.uses_expanded_mode().then_some("expanded"),
            since: query.window().map(|w| w.since.to_rfc3339()),
            until: query.window().and_then(|w| w.until).map(|u| u.to_rfc3339()),
        };
        let url = format!(
            "{}/dap/query/{}/table/{}/data",
            self.cfg.api_url, self.cfg.namespace, table
        );

        let job = self
            .http
            .post(&url)
            .header(AUTH_HEADER, self.token().await?)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Query request for {} failed", table))?
            .error_for_status()
            .with_context(|| format!("Query for {} rejected", table))?
            .json()
            .await
            .with_context(|| format!("Malformed query response for {}", table))?;
        Ok(job)
    }

    async fn job(&self, id: &str) -> Result<Job> {
        let url = format!("{}/dap/job/{}", self.cfg.api_url, id);
        let job = self
            .http
            .get(&url)
            .header(AUTH_HEADER, self.token().await?)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("Malformed status for job {}", id))?;
        Ok(job)
    }

    async fn object_url(&self, id: &str) -> Result<String> {
        let url = format!("{}/dap/object/url", self.cfg.api_url);
        let mut urls: ObjectUrls = self
            .http
            .post(&url)
            .header(AUTH_HEADER, self.token().await?)
            .json(&[ObjectRef { id }])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("Malformed object URL response")?;

        urls.urls
            .remove(id)
            .map(|r| r.url)
            .with_context(|| format!("No download URL returned for object {}", id))
    }
}

#[async_trait]
impl DataPlatform for DapClient {
    async fn list_parts(&self, table: &TableName, query: &TableQuery) -> Result<Vec<PartRef>> {
        let mut job = self.submit(table, query).await?;
        debug!(table = %table, job = %job.id, "query submitted");

        while !job.status.is_terminal() {
            tokio::time::sleep(self.cfg.poll_interval).await;
            job = self.job(&job.id).await?;
            debug!(table = %table, job = %job.id, status = ?job.status, "job polled");
        }

        if job.status == JobState::Failed {
            let detail = job.error.map(|e| e.to_string()).unwrap_or_default();
            bail!("job {} for {} failed {}", job.id, table, detail);
        }

        Ok(job
            .objects
            .into_iter()
            .map(|o| PartRef {
                id: o.id,
                format: query.format(),
            })
            .collect())
    }

    async fn download(&self, part: &PartRef, destination: &Path, decompress: bool) -> Result<PathBuf> {
        let url = self.object_url(&part.id).await?;
        let mut resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Download of {} failed", part.id))?
            .error_for_status()?;

        let compressed = destination.join(part_file_name(&part.id, part.format, false));
        let file = tokio::fs::File::create(&compressed)
            .await
            .with_context(|| format!("Failed to create {}", compressed.display()))?;
        let mut out = tokio::io::BufWriter::new(file);
        let mut written = 0usize;
        while let Some(chunk) = resp
            .chunk()
            .await
            .with_context(|| format!("Download of {} interrupted", part.id))?
        {
            written += chunk.len();
            out.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write {}", compressed.display()))?;
        }
        out.flush().await?;
        debug!(part = %part.id, bytes = written, path = %compressed.display(), "part downloaded");

        if !decompress {
            return Ok(compressed);
        }

        let path = destination.join(part_file_name(&part.id, part.format, true));
        let (src, dst) = (compressed.clone(), path.clone());
        let inflated = tokio::task::spawn_blocking(move || gunzip_file(&src, &dst))
            .await?
            .with_context(|| format!("Failed to decompress {}", part.id))?;
        tokio::fs::remove_file(&compressed)
            .await
            .with_context(|| format!("Failed to remove {}", compressed.display()))?;
        debug!(part = %part.id, bytes = inflated, path = %path.display(), "part decompressed");
        Ok(path)
    }
}

/// Inflates `src` into `dst` without holding either body in memory.
fn gunzip_file(src: &Path, dst: &Path) -> std::io::Result<u64> {
    let mut decoder = GzDecoder::new(BufReader::new(File::open(src)?));
    let mut out = BufWriter::new(File::create(dst)?);
    let n = io::copy(&mut decoder, &mut out)?;
    out.flush()?;
    Ok(n)
}

/// Local file name for a part: the object id flattened to one path segment
/// and given the format's extension.
fn part_file_name(id: &str, format: DataFormat, decompressed: bool) -> String {
    let flat = id.replace(['/', '\\'], "_");
    let stem = flat.trim_end_matches(".gz");
    let ext = format.extension();
    let base = if stem.ends_with(&format!(".{}", ext)) {
        stem.to_string()
    } else {
        format!("{}.{}", stem, ext)
    };
    if decompressed {
        base
    } else {
        format!("{}.gz", base)
    }
}
