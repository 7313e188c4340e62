//! Flat-file JSON document store + HTTP fetch utilities for GULP project watch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use gulp_core::{Dataset, Record};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{error, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "gulp-storage";

/// Whole-document JSON store keyed by [`Dataset`].
///
/// Writes replace the target file through a temp file + rename in the same directory,
/// so readers see either the previous or the new document, never a torn one. Reads
/// degrade to `T::default()` for missing or malformed documents.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, dataset: Dataset) -> PathBuf {
        self.root.join(dataset.file_name())
    }

    pub async fn exists(&self, dataset: Dataset) -> bool {
        fs::try_exists(self.path_for(dataset)).await.unwrap_or(false)
    }

    /// Read a document. Absent or non-JSON content yields the default value; only
    /// other I/O failures (permissions, unreadable directory) are returned.
    pub async fn read<T>(&self, dataset: Dataset) -> anyhow::Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let path = self.path_for(dataset);
        let Some(text) = read_optional(&path).await? else {
            return Ok(T::default());
        };
        match serde_json::from_str(&text) {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(%dataset, path = %path.display(), error = %err, "malformed document, using default");
                Ok(T::default())
            }
        }
    }

    /// Like [`read`](Self::read) but never fails; I/O errors are logged.
    pub async fn load<T>(&self, dataset: Dataset) -> T
    where
        T: DeserializeOwned + Default,
    {
        match self.read(dataset).await {
            Ok(value) => value,
            Err(err) => {
                error!(%dataset, error = %format!("{err:#}"), "reading document failed, using default");
                T::default()
            }
        }
    }

    /// Read a record collection, skipping elements that are not JSON objects.
    pub async fn read_records(&self, dataset: Dataset) -> anyhow::Result<Vec<Record>> {
        let raw: JsonValue = self.read::<Option<JsonValue>>(dataset).await?.unwrap_or_default();
        let JsonValue::Array(items) = raw else {
            if !raw.is_null() {
                warn!(%dataset, "document is not a list, treating as empty");
            }
            return Ok(Vec::new());
        };
        let total = items.len();
        let records = items
            .into_iter()
            .filter_map(Record::from_json)
            .collect::<Vec<_>>();
        if records.len() != total {
            warn!(%dataset, skipped = total - records.len(), "skipped non-object entries");
        }
        Ok(records)
    }

    pub async fn load_records(&self, dataset: Dataset) -> Vec<Record> {
        match self.read_records(dataset).await {
            Ok(records) => records,
            Err(err) => {
                error!(%dataset, error = %format!("{err:#}"), "reading records failed, using empty list");
                Vec::new()
            }
        }
    }

    pub async fn write<T>(&self, dataset: Dataset, value: &T) -> anyhow::Result<()>
    where
        T: Serialize + ?Sized,
    {
        let bytes = serde_json::to_vec_pretty(value)
            .with_context(|| format!("serializing {dataset} document"))?;
        self.write_atomic(&self.path_for(dataset), &bytes).await
    }

    pub async fn read_text(&self, name: &str) -> anyhow::Result<Option<String>> {
        read_optional(&self.root.join(name)).await
    }

    pub async fn write_text(&self, name: &str, text: &str) -> anyhow::Result<()> {
        self.write_atomic(&self.root.join(name), text.as_bytes()).await
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating data directory {}", self.root.display()))?;

        let temp_path = self.root.join(format!(".{}.tmp", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp file {}", temp_path.display()))?;
        let written = async {
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(err) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| format!("writing temp file {}", temp_path.display()));
        }

        if let Err(err) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "renaming temp file {} -> {}",
                    temp_path.display(),
                    path.display()
                )
            });
        }
        Ok(())
    }
}

async fn read_optional(path: &Path) -> anyhow::Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(45),
            user_agent: None,
            concurrency: 2,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("response from {url} is not JSON: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("fetcher is shut down")]
    Closed,
}

/// JSON-over-HTTP client with a global concurrency cap and retry/backoff.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    limit: Arc<Semaphore>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            limit: Arc::new(Semaphore::new(config.concurrency.max(1))),
            backoff: config.backoff,
        })
    }

    pub async fn fetch_json(&self, url: &str) -> Result<JsonValue, FetchError> {
        let _permit = self.limit.acquire().await.map_err(|_| FetchError::Closed)?;
        self.fetch_with_retries(url)
            .instrument(info_span!("http_fetch", url))
            .await
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<JsonValue, FetchError> {
        let mut attempt = 0usize;
        loop {
            let retryable = attempt < self.backoff.max_retries;
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();
                    if status.is_success() {
                        let body = resp.bytes().await?;
                        return serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
                            url: final_url,
                            source,
                        });
                    }
                    if !(retryable && classify_status(status) == RetryDisposition::Retryable) {
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: final_url,
                        });
                    }
                    warn!(status = status.as_u16(), attempt, "retryable http status");
                }
                Err(err) => {
                    if !(retryable && classify_reqwest_error(&err) == RetryDisposition::Retryable) {
                        return Err(FetchError::Request(err));
                    }
                    warn!(error = %err, attempt, "retryable request error");
                }
            }
            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }
}
