use gcg_core::{rarity_for_variant, variant_id, CatalogEntry, ImageRef};
use tracing::debug;

use crate::probe::Prober;

/// One existing artwork printing of a base item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantAsset {
    pub index: u32,
    pub id: String,
    pub source_url: String,
}

/// Walks `_p1`, `_p2`, ... asset suffixes until the first gap or the cap.
pub struct VariantDiscoverer {
    prober: Prober,
    cap: u32,
}

impl VariantDiscoverer {
    pub fn new(prober: Prober, cap: u32) -> Self {
        Self { prober, cap }
    }

    /// Printings in index order, gap-free. Empty when the base artwork itself is missing.
    pub async fn discover_assets(&self, base_id: &str) -> Vec<VariantAsset> {
        let mut assets = Vec::new();
        for index in 0..=self.cap {
            let id = variant_id(base_id, index);
            match self.prober.probe_asset(&id).await.found() {
                Some(asset) => assets.push(VariantAsset {
                    index,
                    id,
                    source_url: asset.url,
                }),
                None => break,
            }
        }
        if assets.len() > 1 {
            debug!(base_id, variants = assets.len() - 1, "alternate art found");
        }
        assets
    }
}

/// Entry for the `asset.index`-th printing of `base`, with its positional rarity.
pub fn variant_entry(base: &CatalogEntry, asset: &VariantAsset, rarities: &[String], image_ref: ImageRef) -> CatalogEntry {
    CatalogEntry {
        id: asset.id.clone(),
        rarity: rarity_for_variant(rarities, asset.index),
        image_ref,
        ..base.clone()
    }
}
