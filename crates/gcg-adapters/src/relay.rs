//! Image relay: mirror card artwork to a CDN under stable keys, degrading to pass-through.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use gcg_core::ImageRef;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay rate limited")]
    RateLimited,
    #[error("relay upload rejected ({status}): {message}")]
    Upload { status: u16, message: String },
    #[error("relay transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Upload `source_url` under `stable_key`, returning the hosted URL.
    async fn upload(&self, source_url: &str, stable_key: &str) -> Result<String, RelayError>;
}

/// Process-wide degrade flag. Only ever goes `false -> true` within a run.
#[derive(Debug, Clone, Default)]
pub struct RateLimitFlag(Arc<AtomicBool>);

impl RateLimitFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns true for the caller that actually flipped the flag.
    pub fn trip(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }
}

pub struct ImageRelay {
    transport: Option<Arc<dyn RelayTransport>>,
    flag: RateLimitFlag,
    folder: String,
}

impl ImageRelay {
    pub fn new(transport: Arc<dyn RelayTransport>, flag: RateLimitFlag, folder: impl Into<String>) -> Self {
        Self {
            transport: Some(transport),
            flag,
            folder: folder.into(),
        }
    }

    /// No transport configured: every image passes through as `Direct`.
    pub fn disabled(folder: impl Into<String>) -> Self {
        Self {
            transport: None,
            flag: RateLimitFlag::new(),
            folder: folder.into(),
        }
    }

    pub fn flag(&self) -> &RateLimitFlag {
        &self.flag
    }

    pub fn stable_key(&self, entry_id: &str) -> String {
        format!("{}/{entry_id}", self.folder.trim_end_matches('/'))
    }

    /// Never fails: any problem yields the original URL as a `Direct` reference.
    pub async fn relay(&self, source_url: &str, stable_key: &str) -> ImageRef {
        let direct = || ImageRef::Direct {
            url: source_url.to_string(),
        };
        let Some(transport) = &self.transport else {
            return direct();
        };
        if self.flag.is_tripped() {
            return direct();
        }

        match transport.upload(source_url, stable_key).await {
            Ok(url) => {
                debug!(stable_key, url = %url, "image relayed");
                ImageRef::Relayed {
                    key: stable_key.to_string(),
                    url,
                }
            }
            Err(RelayError::RateLimited) => {
                if self.flag.trip() {
                    warn!(stable_key, "image relay rate limited; passing images through for the rest of the run");
                }
                direct()
            }
            Err(err) => {
                warn!(stable_key, error = %err, "image relay failed; keeping source url");
                direct()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub api_base: String,
    pub timeout: Duration,
}

impl CloudinaryConfig {
    /// All three credentials must be present.
    pub fn from_env() -> Option<Self> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Some(Self {
            cloud_name: var("CLOUDINARY_CLOUD_NAME")?,
            api_key: var("CLOUDINARY_API_KEY")?,
            api_secret: var("CLOUDINARY_API_SECRET")?,
            api_base: "https://api.cloudinary.com".to_string(),
            timeout: Duration::from_secs(60),
        })
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: String,
}

/// Signed remote-URL upload. The stable key is the public id, uploaded with overwrite and
/// CDN invalidation, so repeating an upload for the same key is harmless.
pub struct CloudinaryTransport {
    client: reqwest::Client,
    config: CloudinaryConfig,
}

impl CloudinaryTransport {
    pub fn new(config: CloudinaryConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("building relay client")?;
        Ok(Self { client, config })
    }

    /// Parameters sorted by name, joined as `k=v&...`, secret appended, SHA-256 hex.
    fn sign(&self, params: &[(&str, String)]) -> String {
        let mut sorted = params.to_vec();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        let joined = sorted
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        gcg_storage::sha256_hex(format!("{joined}{}", self.config.api_secret).as_bytes())
    }
}

#[async_trait]
impl RelayTransport for CloudinaryTransport {
    async fn upload(&self, source_url: &str, stable_key: &str) -> Result<String, RelayError> {
        let signed = vec![
            ("invalidate", "true".to_string()),
            ("overwrite", "true".to_string()),
            ("public_id", stable_key.to_string()),
            ("timestamp", Utc::now().timestamp().to_string()),
        ];
        let signature = self.sign(&signed);

        let mut form = signed;
        form.push(("file", source_url.to_string()));
        form.push(("api_key", self.config.api_key.clone()));
        form.push(("signature", signature));
        form.push(("signature_algorithm", "sha256".to_string()));

        let url = format!(
            "{}/v1_1/{}/image/upload",
            self.config.api_base.trim_end_matches('/'),
            self.config.cloud_name
        );
        let resp = self.client.post(&url).form(&form).send().await?;
        let status = resp.status();
        if status.as_u16() == 420 || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(RelayError::RateLimited);
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(RelayError::Upload {
                status: status.as_u16(),
                message,
            });
        }
        let body: UploadResponse = resp.json().await?;
        Ok(body.secure_url)
    }
}
