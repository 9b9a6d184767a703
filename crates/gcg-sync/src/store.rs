//! The persisted mirror: lenient load, integrity purge, structural diff and checkpoints.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use gcg_core::{decode_deck, decode_entries, CatalogEntry, Deck, DocumentShape, EntryStatus, ImageRef, SetDescriptor};
use gcg_storage::{DocumentRead, JsonDocumentStore, PersistError};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

pub const CARDS_FILE: &str = "cards.json";
pub const DECKS_FILE: &str = "decks.json";
pub const SETS_FILE: &str = "sets.json";

fn document_values(name: &str, read: DocumentRead) -> Vec<(Option<String>, JsonValue)> {
    match read {
        DocumentRead::Missing => Vec::new(),
        DocumentRead::Corrupt(reason) => {
            warn!(file = name, %reason, "persisted state unreadable; starting empty");
            Vec::new()
        }
        DocumentRead::Parsed(JsonValue::Array(items)) => items.into_iter().map(|v| (None, v)).collect(),
        DocumentRead::Parsed(JsonValue::Object(map)) => map.into_iter().map(|(k, v)| (Some(k), v)).collect(),
        DocumentRead::Parsed(other) => {
            warn!(file = name, kind = ?other, "unexpected document shape; starting empty");
            Vec::new()
        }
    }
}

#[derive(Debug)]
pub struct ReconciliationStore {
    documents: JsonDocumentStore,
    entries: BTreeMap<String, CatalogEntry>,
    /// Ids read in a legacy shape; their next apply is forced to `Changed`.
    legacy_ids: BTreeSet<String>,
    checkpoint_every: usize,
    processed_since_checkpoint: usize,
    dirty: bool,
    checkpoints: usize,
}

impl ReconciliationStore {
    pub async fn load(documents: JsonDocumentStore, checkpoint_every: usize) -> Self {
        let mut entries = BTreeMap::new();
        let mut legacy_ids = BTreeSet::new();
        let mut skipped = 0usize;

        for (key, value) in document_values(CARDS_FILE, documents.read(CARDS_FILE).await) {
            let value = match (key, value) {
                (Some(key), JsonValue::Object(mut map)) => {
                    map.entry("id").or_insert(JsonValue::String(key));
                    JsonValue::Object(map)
                }
                (_, value) => value,
            };
            match decode_entries(value) {
                Some((decoded, shape)) => {
                    for entry in decoded {
                        if shape == DocumentShape::Legacy {
                            legacy_ids.insert(entry.id.clone());
                        }
                        entries.insert(entry.id.clone(), entry);
                    }
                }
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!(skipped, "dropped undecodable card documents");
        }
        info!(
            entries = entries.len(),
            legacy = legacy_ids.len(),
            "mirror loaded"
        );

        Self {
            documents,
            entries,
            legacy_ids,
            checkpoint_every: checkpoint_every.max(1),
            processed_since_checkpoint: 0,
            dirty: false,
            checkpoints: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every stored printing of `base_id`, the base itself included.
    pub fn printings_of<'a>(&'a self, base_id: &'a str) -> impl Iterator<Item = &'a CatalogEntry> + 'a {
        self.entries
            .range(base_id.to_string()..)
            .take_while(move |(id, _)| id.starts_with(base_id))
            .map(|(_, entry)| entry)
            .filter(move |entry| entry.base_id == base_id)
    }

    pub fn checkpoints(&self) -> usize {
        self.checkpoints
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Relayed image references already held for every printing of `base_id`.
    pub fn relayed_images_for(&self, base_id: &str) -> BTreeMap<String, ImageRef> {
        self.printings_of(base_id)
            .filter(|e| e.image_ref.is_relayed())
            .map(|e| (e.id.clone(), e.image_ref.clone()))
            .collect()
    }

    /// Drop entries without an id or name. Any removal is checkpointed straight away.
    pub async fn purge_invalid(&mut self) -> Result<usize, PersistError> {
        let before = self.entries.len();
        self.entries.retain(|key, entry| {
            let keep = entry.is_structurally_valid();
            if !keep {
                warn!(id = %key, "purging structurally invalid entry");
            }
            keep
        });
        let purged = before - self.entries.len();
        if purged > 0 {
            self.dirty = true;
            self.checkpoint().await?;
        }
        Ok(purged)
    }

    /// Reconcile one scraped entry. `last_seen` never takes part in the comparison.
    pub fn apply(&mut self, entry: CatalogEntry) -> EntryStatus {
        let forced = self.legacy_ids.remove(&entry.id);
        let status = match self.entries.get_mut(&entry.id) {
            None => EntryStatus::New,
            Some(stored) => {
                let mut candidate = entry.clone();
                candidate.last_seen = stored.last_seen;
                if !forced && *stored == candidate {
                    stored.last_seen = entry.last_seen;
                    EntryStatus::Unchanged
                } else {
                    EntryStatus::Changed
                }
            }
        };
        if status.is_write() {
            debug!(id = %entry.id, status = status.as_str(), "entry reconciled");
            self.entries.insert(entry.id.clone(), entry);
            self.dirty = true;
        }
        status
    }

    /// Count one processed item; checkpoints a dirty mirror every `checkpoint_every` items.
    pub async fn record_processed(&mut self) -> Result<bool, PersistError> {
        self.processed_since_checkpoint += 1;
        if self.processed_since_checkpoint >= self.checkpoint_every && self.dirty {
            self.checkpoint().await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Persist the whole mirror, sorted by id.
    pub async fn checkpoint(&mut self) -> Result<PathBuf, PersistError> {
        let snapshot = self.entries.values().collect::<Vec<_>>();
        let path = self.documents.write(CARDS_FILE, &snapshot).await?;
        self.checkpoints += 1;
        self.processed_since_checkpoint = 0;
        self.dirty = false;
        info!(entries = snapshot.len(), checkpoint = self.checkpoints, "mirror checkpointed");
        Ok(path)
    }
}

pub async fn load_decks(documents: &JsonDocumentStore) -> BTreeMap<String, Deck> {
    let mut decks = BTreeMap::new();
    for (key, value) in document_values(DECKS_FILE, documents.read(DECKS_FILE).await) {
        let code = key.or_else(|| {
            value
                .get("code")
                .and_then(JsonValue::as_str)
                .map(ToString::to_string)
        });
        let Some(code) = code else { continue };
        match decode_deck(&code, value) {
            Some((deck, _)) => {
                decks.insert(deck.code.clone(), deck);
            }
            None => warn!(deck = %code, "dropped undecodable deck document"),
        }
    }
    decks
}

pub async fn write_decks(
    documents: &JsonDocumentStore,
    decks: &BTreeMap<String, Deck>,
) -> Result<PathBuf, PersistError> {
    documents.write(DECKS_FILE, decks).await
}

pub async fn load_sets(documents: &JsonDocumentStore) -> Vec<SetDescriptor> {
    document_values(SETS_FILE, documents.read(SETS_FILE).await)
        .into_iter()
        .filter_map(|(_, value)| serde_json::from_value(value).ok())
        .collect()
}

pub async fn write_sets(
    documents: &JsonDocumentStore,
    sets: &[SetDescriptor],
) -> Result<PathBuf, PersistError> {
    documents.write(SETS_FILE, sets).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use gcg_core::{fields, StatFields};
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn entry(id: &str, cost: Option<i64>, seen: i64) -> CatalogEntry {
        CatalogEntry {
            id: id.into(),
            base_id: id.into(),
            set_code: "A".into(),
            name: "Guntank".into(),
            stat_fields: StatFields::from([(fields::COST.to_string(), cost)]),
            text_fields: Default::default(),
            auxiliary_fields: Default::default(),
            rarity: "U".into(),
            image_ref: ImageRef::Direct {
                url: format!("https://src.test/{id}.webp"),
            },
            deck_quantities: Default::default(),
            last_seen: at(seen),
        }
    }

    fn base<'a>(store: &'a ReconciliationStore, id: &'a str) -> &'a CatalogEntry {
        store.printings_of(id).find(|e| e.id == id).unwrap()
    }

    async fn empty_store(dir: &std::path::Path) -> ReconciliationStore {
        ReconciliationStore::load(JsonDocumentStore::new(dir), 2).await
    }

    #[tokio::test]
    async fn rescrape_with_only_a_new_timestamp_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = empty_store(dir.path()).await;

        assert_eq!(store.apply(entry("A-001", Some(2), 100)), EntryStatus::New);
        store.checkpoint().await.unwrap();
        assert!(!store.is_dirty());

        assert_eq!(store.apply(entry("A-001", Some(2), 200)), EntryStatus::Unchanged);
        assert_eq!(base(&store, "A-001").last_seen, at(200));
        assert!(!store.is_dirty());

        assert_eq!(store.apply(entry("A-001", Some(2), 300)), EntryStatus::Unchanged);
    }

    #[tokio::test]
    async fn any_structural_difference_is_changed() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = empty_store(dir.path()).await;
        store.apply(entry("A-001", Some(2), 100));

        assert_eq!(store.apply(entry("A-001", None, 100)), EntryStatus::Changed);
        assert_eq!(base(&store, "A-001").stat(fields::COST), None);

        let mut renamed = entry("A-001", None, 100);
        renamed.text_fields.insert(fields::ZONE.into(), Some("Space".into()));
        assert_eq!(store.apply(renamed), EntryStatus::Changed);
    }

    #[tokio::test]
    async fn checkpoint_cadence_only_writes_dirty_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = empty_store(dir.path()).await;

        store.apply(entry("A-001", Some(1), 100));
        assert!(!store.record_processed().await.unwrap());
        store.apply(entry("A-002", Some(1), 100));
        assert!(store.record_processed().await.unwrap());
        assert_eq!(store.checkpoints(), 1);

        store.apply(entry("A-001", Some(1), 200));
        store.record_processed().await.unwrap();
        assert!(!store.record_processed().await.unwrap());
        assert_eq!(store.checkpoints(), 1);

        let reloaded = empty_store(dir.path()).await;
        assert_eq!(reloaded.len(), 2);
    }

    #[tokio::test]
    async fn purge_drops_blank_entries_and_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let mut blank = entry("A-002", Some(1), 100);
        blank.name = "  ".into();
        std::fs::write(
            dir.path().join(CARDS_FILE),
            serde_json::to_string(&vec![entry("A-001", Some(1), 100), blank]).unwrap(),
        )
        .unwrap();

        let mut store = empty_store(dir.path()).await;
        assert_eq!(store.purge_invalid().await.unwrap(), 1);
        assert_eq!(store.checkpoints(), 1);
        assert_eq!(empty_store(dir.path()).await.len(), 1);
        assert_eq!(store.purge_invalid().await.unwrap(), 0);
        assert_eq!(store.checkpoints(), 1);
    }

    #[tokio::test]
    async fn legacy_entries_heal_on_next_apply() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CARDS_FILE),
            json!({
                "A-001": {"card_no": "A-001", "name": "Guntank", "cost": "2", "image_url": "https://src.test/A-001.webp"}
            })
            .to_string(),
        )
        .unwrap();

        let mut store = empty_store(dir.path()).await;
        let loaded = base(&store, "A-001").clone();
        assert_eq!(loaded.stat(fields::COST), Some(2));

        assert_eq!(store.apply(loaded.clone()), EntryStatus::Changed);
        assert_eq!(store.apply(loaded), EntryStatus::Unchanged);
    }

    #[tokio::test]
    async fn nested_legacy_variants_load_as_relayed_printings() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CARDS_FILE),
            json!([{
                "cardNo": "A-001",
                "name": "Guntank",
                "series": "Starter",
                "image": "https://res.cloudinary.com/demo/image/upload/v1/gundam_cards/A-001.webp",
                "variants": [{
                    "variantId": "A-001-ALT1",
                    "image": "https://res.cloudinary.com/demo/image/upload/v2/gundam_cards/A-001-ALT1.webp",
                    "rarity": "R"
                }]
            }])
            .to_string(),
        )
        .unwrap();

        let store = empty_store(dir.path()).await;
        assert_eq!(store.len(), 2);
        let relayed = store.relayed_images_for("A-001");
        assert_eq!(
            relayed.get("A-001-ALT1").and_then(|image| image.relayed_key()),
            Some("gundam_cards/A-001-ALT1")
        );
        assert_eq!(base(&store, "A-001").text(fields::SOURCE_TITLE), Some("Starter"));
    }

    #[tokio::test]
    async fn printings_are_grouped_by_base() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = empty_store(dir.path()).await;
        let mut variant = entry("A-001_p1", Some(1), 100);
        variant.base_id = "A-001".into();
        variant.image_ref = ImageRef::Relayed {
            key: "gundam_cards/A-001_p1".into(),
            url: "https://cdn.test/A-001_p1.webp".into(),
        };
        store.apply(entry("A-001", Some(1), 100));
        store.apply(variant);
        store.apply(entry("A-002", Some(1), 100));

        let ids = store.printings_of("A-001").map(|e| e.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["A-001", "A-001_p1"]);
        let relayed = store.relayed_images_for("A-001");
        assert_eq!(relayed.keys().collect::<Vec<_>>(), vec!["A-001_p1"]);
    }

    #[tokio::test]
    async fn corrupt_mirror_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CARDS_FILE), "[{\"id\": ").unwrap();
        let store = empty_store(dir.path()).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn decks_and_sets_round_trip_through_their_files() {
        let dir = tempfile::tempdir().unwrap();
        let documents = JsonDocumentStore::new(dir.path());
        let decks = BTreeMap::from([(
            "ST01".to_string(),
            Deck {
                code: "ST01".into(),
                display_name: "Heroic Beginnings".into(),
                card_quantities: BTreeMap::from([("ST01-001".to_string(), 2)]),
            },
        )]);
        write_decks(&documents, &decks).await.unwrap();
        assert_eq!(load_decks(&documents).await, decks);

        assert!(load_sets(&documents).await.is_empty());
        let sets = vec![SetDescriptor {
            prefix: "GD".into(),
            sequence_number: Some(1),
            discovery_mode: gcg_core::DiscoveryMode::Sequential,
            item_ceiling: 150,
        }];
        write_sets(&documents, &sets).await.unwrap();
        assert_eq!(load_sets(&documents).await, sets);
    }
}
