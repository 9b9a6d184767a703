//! Item scraper: one base card number in, every usable printing of it out.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use gcg_adapters::{normalize_fields, ImageRelay};
use gcg_core::{CatalogEntry, DeckIndex, ImageRef};
use tracing::debug;

use crate::probe::{ProbeOutcome, Prober};
use crate::variants::{variant_entry, VariantAsset, VariantDiscoverer};

pub struct ItemScraper {
    prober: Prober,
    variants: VariantDiscoverer,
    relay: Arc<ImageRelay>,
    decks: Arc<DeckIndex>,
}

impl ItemScraper {
    pub fn new(prober: Prober, variant_cap: u32, relay: Arc<ImageRelay>, decks: Arc<DeckIndex>) -> Self {
        Self {
            variants: VariantDiscoverer::new(prober.clone(), variant_cap),
            prober,
            relay,
            decks,
        }
    }

    pub fn deck_index(&self) -> &DeckIndex {
        &self.decks
    }

    /// Base entry first, then its variants. `None` when the page is missing, nameless,
    /// or the base artwork does not exist.
    ///
    /// `existing_images` holds the relayed references already in the mirror for this base
    /// item; those are reused instead of relaying again.
    pub async fn scrape(
        &self,
        set_code: &str,
        item_id: &str,
        existing_images: &BTreeMap<String, ImageRef>,
    ) -> Option<Vec<CatalogEntry>> {
        let doc = match self.prober.probe_detail(item_id).await {
            ProbeOutcome::Found(doc) => doc,
            ProbeOutcome::Missing(_) => return None,
        };
        let name = doc.name.as_deref().map(str::trim).unwrap_or_default().to_string();
        if name.is_empty() {
            return None;
        }

        let assets = self.variants.discover_assets(item_id).await;
        if assets.is_empty() {
            debug!(item_id, "base artwork missing; item rejected");
            return None;
        }

        let normalized = normalize_fields(&doc);
        let template = CatalogEntry {
            id: item_id.to_string(),
            base_id: item_id.to_string(),
            set_code: set_code.to_string(),
            name,
            stat_fields: normalized.stats,
            text_fields: normalized.texts,
            auxiliary_fields: normalized.auxiliary,
            rarity: String::new(),
            image_ref: ImageRef::Direct { url: String::new() },
            deck_quantities: BTreeMap::new(),
            last_seen: Utc::now(),
        };

        let mut entries = Vec::with_capacity(assets.len());
        for asset in &assets {
            let image_ref = self.image_for(asset, existing_images).await;
            let mut entry = variant_entry(&template, asset, &normalized.rarities, image_ref);
            entry.deck_quantities = self.decks.quantities_for(&entry.id);
            entries.push(entry);
        }
        Some(entries)
    }

    async fn image_for(&self, asset: &VariantAsset, existing_images: &BTreeMap<String, ImageRef>) -> ImageRef {
        match existing_images.get(&asset.id) {
            Some(existing @ ImageRef::Relayed { .. }) => existing.clone(),
            _ => {
                let key = self.relay.stable_key(&asset.id);
                self.relay.relay(&asset.source_url, &key).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gcg_adapters::{
        DetailDocument, FixtureCatalog, FixtureSource, LabelValue, RateLimitFlag, RelayError, RelayTransport,
    };
    use gcg_core::{fields, Deck};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RelayTransport for CountingTransport {
        async fn upload(&self, _source_url: &str, stable_key: &str) -> Result<String, RelayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("https://cdn.test/{stable_key}"))
        }
    }

    fn catalog() -> FixtureCatalog {
        let mut catalog = FixtureCatalog::default();
        catalog.details.insert(
            "ST01-001".into(),
            DetailDocument {
                name: Some("Gundam".into()),
                pairs: vec![
                    LabelValue::new("COST", "0"),
                    LabelValue::new("AP", "-"),
                    LabelValue::new("Rarity", "LR/LR"),
                    LabelValue::new("Q&A", "Yes."),
                ],
            },
        );
        catalog.details.insert(
            "ST01-002".into(),
            DetailDocument {
                name: Some("Guncannon".into()),
                pairs: vec![],
            },
        );
        catalog.details.insert(
            "ST01-003".into(),
            DetailDocument {
                name: None,
                pairs: vec![LabelValue::new("COST", "2")],
            },
        );
        catalog.assets.extend(["ST01-001", "ST01-001_p1", "ST01-003"].map(String::from));
        catalog
    }

    fn scraper(transport: Arc<CountingTransport>) -> ItemScraper {
        let source = Arc::new(FixtureSource::new(catalog()));
        let relay = ImageRelay::new(transport, RateLimitFlag::new(), "gundam_cards");
        let decks = DeckIndex::from_decks(&[Deck {
            code: "ST01".into(),
            display_name: "Heroic Beginnings".into(),
            card_quantities: BTreeMap::from([("ST01-001".to_string(), 2)]),
        }]);
        ItemScraper::new(Prober::new(source), 20, Arc::new(relay), Arc::new(decks))
    }

    #[tokio::test]
    async fn scraped_printings_carry_stats_rarity_and_decks() {
        let transport = Arc::new(CountingTransport::default());
        let entries = scraper(transport.clone())
            .scrape("ST01", "ST01-001", &BTreeMap::new())
            .await
            .expect("found");

        assert_eq!(entries.len(), 2);
        let base = &entries[0];
        assert_eq!(base.id, "ST01-001");
        assert_eq!(base.stat(fields::COST), Some(0));
        assert_eq!(base.stat_fields.get(fields::AP), Some(&None));
        assert_eq!(base.auxiliary_fields.get("q&a").map(String::as_str), Some("Yes."));
        assert_eq!(base.deck_quantities.get("ST01"), Some(&2));
        assert_eq!(base.image_ref.relayed_key(), Some("gundam_cards/ST01-001"));

        let variant = &entries[1];
        assert_eq!(variant.id, "ST01-001_p1");
        assert_eq!(variant.base_id, "ST01-001");
        assert_eq!(variant.rarity, "LR");
        assert!(variant.deck_quantities.is_empty());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn relayed_images_are_reused() {
        let transport = Arc::new(CountingTransport::default());
        let existing = BTreeMap::from([(
            "ST01-001".to_string(),
            ImageRef::Relayed {
                key: "gundam_cards/ST01-001".into(),
                url: "https://cdn.test/old".into(),
            },
        )]);
        let entries = scraper(transport.clone())
            .scrape("ST01", "ST01-001", &existing)
            .await
            .expect("found");
        assert_eq!(entries[0].image_ref.url(), "https://cdn.test/old");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn nameless_or_artless_items_are_absent() {
        let scraper = scraper(Arc::new(CountingTransport::default()));
        assert!(scraper.scrape("ST01", "ST01-002", &BTreeMap::new()).await.is_none());
        assert!(scraper.scrape("ST01", "ST01-003", &BTreeMap::new()).await.is_none());
        assert!(scraper.scrape("ST01", "ST01-404", &BTreeMap::new()).await.is_none());
    }
}
