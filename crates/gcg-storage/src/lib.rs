//! Atomic JSON document persistence + HTTP fetch utilities for the GCG mirror.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "gcg-storage";

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Process- and platform-independent hash; the first eight digest bytes, big endian.
pub fn stable_hash(input: &str) -> u64 {
    let digest = Sha256::digest(input.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serializing {name}: {source}")]
    Serialize {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Result of reading a persisted document; readers never fail on bad content.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentRead {
    Missing,
    Parsed(JsonValue),
    Corrupt(String),
}

/// Whole-document JSON persistence. Writes go to a temp file that is renamed over the target,
/// so a reader sees either the previous checkpoint or the new one.
#[derive(Debug, Clone)]
pub struct JsonDocumentStore {
    root: PathBuf,
}

impl JsonDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub async fn read(&self, name: &str) -> DocumentRead {
        let path = self.path_for(name);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return DocumentRead::Missing,
            Err(err) => return DocumentRead::Corrupt(format!("reading {}: {err}", path.display())),
        };
        match serde_json::from_str(&text) {
            Ok(value) => DocumentRead::Parsed(value),
            Err(err) => DocumentRead::Corrupt(format!("parsing {}: {err}", path.display())),
        }
    }

    pub async fn write<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<PathBuf, PersistError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| PersistError::Serialize {
            name: name.to_string(),
            source,
        })?;
        let target = self.path_for(name);
        write_atomic(&target, &bytes).await?;
        debug!(path = %target.display(), bytes = bytes.len(), "document written");
        Ok(target)
    }
}

async fn write_atomic(target: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| PersistError::Io { path, source }
    };

    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).await.map_err(io_err(parent))?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    let temp_path = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

    let result = async {
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(io_err(&temp_path))?;
        file.write_all(bytes).await.map_err(io_err(&temp_path))?;
        file.flush().await.map_err(io_err(&temp_path))?;
        file.sync_all().await.map_err(io_err(&temp_path))?;
        drop(file);
        fs::rename(&temp_path, target).await.map_err(io_err(target))
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&temp_path).await;
    }
    result
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
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }

    /// Total attempts including the first one.
    pub fn attempts(&self) -> usize {
        self.max_retries + 1
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            global_concurrency: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub requested_url: String,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn was_redirected(&self) -> bool {
        self.final_url != self.requested_url
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("fetch limiter closed")]
    LimiterClosed,
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
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
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
        })
    }

    async fn send(&self, method: reqwest::Method, url: &str) -> Result<FetchedResponse, FetchError> {
        let _permit = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::LimiterClosed)?;

        let resp = self.client.request(method.clone(), url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let body = if method == reqwest::Method::HEAD {
            Vec::new()
        } else {
            resp.bytes().await?.to_vec()
        };

        Ok(FetchedResponse {
            status,
            requested_url: url.to_string(),
            final_url,
            content_type,
            body,
        })
    }

    /// Single attempt, no retry. High-volume probes go through here; a transient miss is
    /// absorbed by the caller's miss-streak tolerance instead.
    pub async fn get_once(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        self.send(reqwest::Method::GET, url)
            .instrument(info_span!("http_get", url))
            .await
    }

    /// Header-only existence check. Servers that reject HEAD get one plain GET instead.
    pub async fn head(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_head", url);
        async {
            match self.send(reqwest::Method::HEAD, url).await {
                Err(FetchError::HttpStatus { status: 405, .. }) => {
                    self.send(reqwest::Method::GET, url).await
                }
                other => other,
            }
        }
        .instrument(span)
        .await
    }
}
