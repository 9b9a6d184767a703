//! Remote catalog contract + live/fixture source implementations and the image relay.

use async_trait::async_trait;
use gcg_storage::{FetchError, RetryDisposition};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod fields;
pub mod fixture;
pub mod official;
pub mod parse;
pub mod relay;

pub use fields::{normalize_fields, normalize_label, FieldKind, FieldSynonyms, NormalizedFields, FIELD_SYNONYMS};
pub use fixture::{FixtureCatalog, FixtureDeck, FixtureSource};
pub use official::{OfficialSiteSource, SiteTemplates};
pub use relay::{CloudinaryConfig, CloudinaryTransport, ImageRelay, RateLimitFlag, RelayError, RelayTransport};

pub const CRATE_NAME: &str = "gcg-adapters";

/// One raw label/value pair from a detail page, in page order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelValue {
    pub label: String,
    pub value: String,
}

impl LabelValue {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Markup-independent content of a card detail page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailDocument {
    pub name: Option<String>,
    #[serde(default)]
    pub pairs: Vec<LabelValue>,
}

impl DetailDocument {
    pub fn has_name(&self) -> bool {
        self.name.as_deref().is_some_and(|n| !n.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetProbe {
    pub url: String,
    pub content_type: Option<String>,
}

impl AssetProbe {
    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with("image/"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeckMetadata {
    pub name: Option<String>,
}

/// Text rows of a deck's content listing; quantity parsing happens downstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeckListing {
    pub rows: Vec<String>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport error for {id}: {message}")]
    Transport { id: String, message: String },
    #[error("http status {status} for {id}")]
    HttpStatus { id: String, status: u16 },
    #[error("{id} redirected to listing page {final_url}")]
    SoftNotFound { id: String, final_url: String },
    #[error("parse error for {id}: {message}")]
    Parse { id: String, message: String },
}

impl SourceError {
    pub fn from_fetch(id: &str, err: FetchError) -> Self {
        match err {
            FetchError::HttpStatus { status, .. } => SourceError::HttpStatus {
                id: id.to_string(),
                status,
            },
            other => SourceError::Transport {
                id: id.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Timeouts, connection failures and 5xx/429 responses.
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Transport { .. } => true,
            SourceError::HttpStatus { status, .. } => reqwest::StatusCode::from_u16(*status)
                .map(|s| gcg_storage::classify_status(s) == RetryDisposition::Retryable)
                .unwrap_or(false),
            SourceError::SoftNotFound { .. } | SourceError::Parse { .. } => false,
        }
    }
}

/// Everything the engine needs from the remote catalog.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    fn source_id(&self) -> &str;

    /// Detail page for one card number.
    async fn fetch_detail(&self, item_id: &str) -> Result<DetailDocument, SourceError>;

    /// Header-only existence check of one artwork asset (`GD01-001`, `GD01-001_p1`).
    async fn check_asset(&self, asset_id: &str) -> Result<AssetProbe, SourceError>;

    async fn fetch_deck_listing(&self, deck_code: &str) -> Result<DeckListing, SourceError>;

    async fn fetch_deck_metadata(&self, deck_code: &str) -> Result<DeckMetadata, SourceError>;

    /// Public URL of an artwork asset.
    fn image_url(&self, asset_id: &str) -> String;
}
