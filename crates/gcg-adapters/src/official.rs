//! Live HTML source backed by the publisher's card list site.

use std::sync::Arc;

use async_trait::async_trait;
use gcg_storage::{FetchedResponse, HttpFetcher};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::parse::{parse_deck_listing, parse_deck_metadata, parse_detail_document};
use crate::{AssetProbe, CatalogSource, DeckListing, DeckMetadata, DetailDocument, SourceError};

/// URL templates. `{id}` is a card or asset id, `{code}`/`{code_lower}` a deck code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteTemplates {
    pub detail_url: String,
    pub image_url: String,
    pub deck_listing_url: String,
    pub deck_metadata_url: String,
    /// A detail request whose final URL contains one of these landed on a generic listing.
    pub listing_markers: Vec<String>,
}

fn default_listing_markers() -> Vec<String> {
    vec!["/cards/index".to_string(), "cardlist".to_string()]
}

impl Default for SiteTemplates {
    fn default() -> Self {
        Self {
            detail_url: "https://www.gundam-gcg.com/en/cards/detail.php?detailSearch={id}".to_string(),
            image_url: "https://www.gundam-gcg.com/en/images/cards/card/{id}.webp".to_string(),
            deck_listing_url: "https://www.gundam-gcg.com/en/cards/index.php?package={code}".to_string(),
            deck_metadata_url: "https://www.gundam-gcg.com/en/products/{code_lower}.php".to_string(),
            listing_markers: default_listing_markers(),
        }
    }
}

impl SiteTemplates {
    pub fn render_item(template: &str, id: &str) -> String {
        template.replace("{id}", id)
    }

    pub fn render_deck(template: &str, code: &str) -> String {
        template
            .replace("{code_lower}", &code.to_ascii_lowercase())
            .replace("{code}", code)
    }

    pub fn is_listing_redirect(&self, resp: &FetchedResponse) -> bool {
        resp.was_redirected()
            && self
                .listing_markers
                .iter()
                .any(|marker| resp.final_url.contains(marker.as_str()))
    }
}

pub struct OfficialSiteSource {
    http: Arc<HttpFetcher>,
    templates: SiteTemplates,
}

impl OfficialSiteSource {
    pub fn new(http: Arc<HttpFetcher>, templates: SiteTemplates) -> Self {
        Self { http, templates }
    }

    fn reject_listing(&self, id: &str, resp: &FetchedResponse) -> Result<(), SourceError> {
        if self.templates.is_listing_redirect(resp) {
            debug!(id, final_url = %resp.final_url, "soft redirect to listing page");
            return Err(SourceError::SoftNotFound {
                id: id.to_string(),
                final_url: resp.final_url.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogSource for OfficialSiteSource {
    fn source_id(&self) -> &str {
        "gundam-gcg-official"
    }

    async fn fetch_detail(&self, item_id: &str) -> Result<DetailDocument, SourceError> {
        let url = SiteTemplates::render_item(&self.templates.detail_url, item_id);
        let resp = self
            .http
            .get_once(&url)
            .await
            .map_err(|err| SourceError::from_fetch(item_id, err))?;
        self.reject_listing(item_id, &resp)?;
        Ok(parse_detail_document(&resp.text()))
    }

    async fn check_asset(&self, asset_id: &str) -> Result<AssetProbe, SourceError> {
        let url = self.image_url(asset_id);
        let resp = self
            .http
            .head(&url)
            .await
            .map_err(|err| SourceError::from_fetch(asset_id, err))?;
        self.reject_listing(asset_id, &resp)?;
        Ok(AssetProbe {
            url,
            content_type: resp.content_type,
        })
    }

    async fn fetch_deck_listing(&self, deck_code: &str) -> Result<DeckListing, SourceError> {
        let url = SiteTemplates::render_deck(&self.templates.deck_listing_url, deck_code);
        let resp = self
            .http
            .get_once(&url)
            .await
            .map_err(|err| SourceError::from_fetch(deck_code, err))?;
        self.reject_listing(deck_code, &resp)?;
        Ok(parse_deck_listing(&resp.text()))
    }

    async fn fetch_deck_metadata(&self, deck_code: &str) -> Result<DeckMetadata, SourceError> {
        let url = SiteTemplates::render_deck(&self.templates.deck_metadata_url, deck_code);
        let resp = self
            .http
            .get_once(&url)
            .await
            .map_err(|err| SourceError::from_fetch(deck_code, err))?;
        Ok(parse_deck_metadata(&resp.text()))
    }

    fn image_url(&self, asset_id: &str) -> String {
        SiteTemplates::render_item(&self.templates.image_url, asset_id)
    }
}
