//! Fixture-first source: replays a recorded catalog without touching the network.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{AssetProbe, CatalogSource, DeckListing, DeckMetadata, DetailDocument, SourceError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureDeck {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rows: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureCatalog {
    #[serde(default)]
    pub details: BTreeMap<String, DetailDocument>,
    /// Asset ids (`GD01-001`, `GD01-001_p1`) whose artwork exists.
    #[serde(default)]
    pub assets: BTreeSet<String>,
    #[serde(default)]
    pub decks: BTreeMap<String, FixtureDeck>,
    /// Ids whose requests land on the generic listing page.
    #[serde(default)]
    pub soft_redirects: BTreeSet<String>,
    /// Ids that fail with a transport error this many times before answering normally.
    #[serde(default)]
    pub flaky: BTreeMap<String, u32>,
    #[serde(default = "default_image_base")]
    pub image_base_url: String,
}

fn default_image_base() -> String {
    "https://fixtures.invalid/images".to_string()
}

impl Default for FixtureCatalog {
    fn default() -> Self {
        Self {
            details: BTreeMap::new(),
            assets: BTreeSet::new(),
            decks: BTreeMap::new(),
            soft_redirects: BTreeSet::new(),
            flaky: BTreeMap::new(),
            image_base_url: default_image_base(),
        }
    }
}

#[derive(Debug, Default)]
pub struct FixtureSource {
    catalog: RwLock<FixtureCatalog>,
    flaky_remaining: Mutex<BTreeMap<String, u32>>,
    detail_log: Mutex<Vec<String>>,
    asset_checks: AtomicUsize,
    deck_listing_calls: AtomicUsize,
}

impl FixtureSource {
    pub fn new(catalog: FixtureCatalog) -> Self {
        let flaky = catalog.flaky.clone();
        Self {
            catalog: RwLock::new(catalog),
            flaky_remaining: Mutex::new(flaky),
            ..Default::default()
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let catalog: FixtureCatalog =
            serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
        Ok(Self::new(catalog))
    }

    /// Mutate the recorded catalog between runs.
    pub fn update(&self, f: impl FnOnce(&mut FixtureCatalog)) {
        let mut catalog = self.catalog.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut catalog);
        *self.flaky_remaining.lock().unwrap_or_else(PoisonError::into_inner) = catalog.flaky.clone();
    }

    /// Item ids whose detail page was requested, in request order.
    pub fn detail_requests(&self) -> Vec<String> {
        self.detail_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_request_log(&self) {
        self.detail_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.asset_checks.store(0, Ordering::Relaxed);
        self.deck_listing_calls.store(0, Ordering::Relaxed);
    }

    pub fn asset_checks(&self) -> usize {
        self.asset_checks.load(Ordering::Relaxed)
    }

    pub fn deck_listing_calls(&self) -> usize {
        self.deck_listing_calls.load(Ordering::Relaxed)
    }

    fn read<T>(&self, f: impl FnOnce(&FixtureCatalog) -> T) -> T {
        f(&self.catalog.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn gate(&self, id: &str) -> Result<(), SourceError> {
        let mut flaky = self.flaky_remaining.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(remaining) = flaky.get_mut(id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SourceError::Transport {
                    id: id.to_string(),
                    message: "connection reset (fixture)".to_string(),
                });
            }
        }
        drop(flaky);

        if self.read(|c| c.soft_redirects.contains(id)) {
            return Err(SourceError::SoftNotFound {
                id: id.to_string(),
                final_url: "fixture://cards/index".to_string(),
            });
        }
        Ok(())
    }

    fn not_found(id: &str) -> SourceError {
        SourceError::HttpStatus {
            id: id.to_string(),
            status: 404,
        }
    }
}

#[async_trait]
impl CatalogSource for FixtureSource {
    fn source_id(&self) -> &str {
        "fixture"
    }

    async fn fetch_detail(&self, item_id: &str) -> Result<DetailDocument, SourceError> {
        self.detail_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(item_id.to_string());
        self.gate(item_id)?;
        self.read(|c| c.details.get(item_id).cloned())
            .ok_or_else(|| Self::not_found(item_id))
    }

    async fn check_asset(&self, asset_id: &str) -> Result<AssetProbe, SourceError> {
        self.asset_checks.fetch_add(1, Ordering::Relaxed);
        self.gate(asset_id)?;
        if self.read(|c| c.assets.contains(asset_id)) {
            Ok(AssetProbe {
                url: self.image_url(asset_id),
                content_type: Some("image/webp".to_string()),
            })
        } else {
            Err(Self::not_found(asset_id))
        }
    }

    async fn fetch_deck_listing(&self, deck_code: &str) -> Result<DeckListing, SourceError> {
        self.deck_listing_calls.fetch_add(1, Ordering::Relaxed);
        self.gate(deck_code)?;
        self.read(|c| c.decks.get(deck_code).map(|d| d.rows.clone()))
            .map(|rows| DeckListing { rows })
            .ok_or_else(|| Self::not_found(deck_code))
    }

    async fn fetch_deck_metadata(&self, deck_code: &str) -> Result<DeckMetadata, SourceError> {
        let meta_id = format!("{deck_code}#meta");
        self.gate(&meta_id)?;
        match self.read(|c| c.decks.get(deck_code).map(|d| d.name.clone())) {
            Some(Some(name)) => Ok(DeckMetadata { name: Some(name) }),
            _ => Err(Self::not_found(&meta_id)),
        }
    }

    fn image_url(&self, asset_id: &str) -> String {
        let base = self.read(|c| c.image_base_url.clone());
        format!("{}/{asset_id}.webp", base.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LabelValue;

    fn catalog() -> FixtureCatalog {
        let mut catalog = FixtureCatalog::default();
        catalog.details.insert(
            "GD01-001".into(),
            DetailDocument {
                name: Some("Gundam".into()),
                pairs: vec![LabelValue::new("COST", "3")],
            },
        );
        catalog.assets.insert("GD01-001".into());
        catalog.flaky.insert("ST01".into(), 1);
        catalog.decks.insert(
            "ST01".into(),
            FixtureDeck {
                name: None,
                rows: vec!["2x Gundam (ST01-001)".into()],
            },
        );
        catalog
    }

    #[tokio::test]
    async fn replays_details_assets_and_decks() {
        let source = FixtureSource::new(catalog());
        assert!(source.fetch_detail("GD01-001").await.unwrap().has_name());
        assert!(source.check_asset("GD01-001").await.unwrap().is_image());
        assert!(source.check_asset("GD01-001_p1").await.is_err());
        assert_eq!(source.detail_requests(), vec!["GD01-001".to_string()]);
    }

    #[tokio::test]
    async fn flaky_ids_fail_transiently_then_recover() {
        let source = FixtureSource::new(catalog());
        let first = source.fetch_deck_listing("ST01").await.unwrap_err();
        assert!(first.is_transient());
        let listing = source.fetch_deck_listing("ST01").await.unwrap();
        assert_eq!(listing.rows.len(), 1);
        assert_eq!(source.deck_listing_calls(), 2);
        assert!(source.fetch_deck_metadata("ST01").await.is_err());
    }

    #[tokio::test]
    async fn soft_redirects_are_not_transient() {
        let source = FixtureSource::new(catalog());
        source.update(|c| {
            c.soft_redirects.insert("GD01-001".into());
        });
        let err = source.fetch_detail("GD01-001").await.unwrap_err();
        assert!(matches!(err, SourceError::SoftNotFound { .. }));
    }

    #[test]
    fn loads_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        fs::write(&path, serde_json::to_string(&catalog()).unwrap()).unwrap();
        let source = FixtureSource::from_path(&path).unwrap();
        assert_eq!(source.image_url("GD01-001"), "https://fixtures.invalid/images/GD01-001.webp");
    }
}
