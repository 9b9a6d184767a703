//! Core catalog model, identifier rules and persisted-shape decoding for the GCG mirror.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const CRATE_NAME: &str = "gcg-core";

/// Separator between a base card number and its alternate-art index (`GD01-001_p2`).
pub const VARIANT_MARKER: &str = "_p";

/// Appended to the last listed rarity when more printings exist than rarities.
pub const OVERFLOW_RARITY_MARKER: char = '+';

/// Rarity used when a detail page lists none.
pub const DEFAULT_RARITY: &str = "C";

/// CDN host of relayed artwork; its URLs carry the stable key in the path.
const RELAY_HOST: &str = "res.cloudinary.com";

const RARITY_DELIMITERS: &[char] = &['/', ',', '|', ';', '・', '／'];

/// Canonical field names shared by the normalizer and the legacy decoder.
pub mod fields {
    pub const COST: &str = "cost";
    pub const LEVEL: &str = "level";
    pub const AP: &str = "ap";
    pub const HP: &str = "hp";

    pub const COLOR: &str = "color";
    pub const CARD_TYPE: &str = "card_type";
    pub const EFFECT: &str = "effect";
    pub const ZONE: &str = "zone";
    pub const TRAIT: &str = "trait";
    pub const LINK: &str = "link";
    pub const SOURCE_TITLE: &str = "source_title";
    pub const OBTAINED_FROM: &str = "obtained_from";
}

pub type StatFields = BTreeMap<String, Option<i64>>;
pub type TextFields = BTreeMap<String, Option<String>>;

/// Where a card's artwork lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageRef {
    /// Mirrored by the image relay under a stable key.
    Relayed { key: String, url: String },
    /// Original source URL; relay was skipped, degraded or failed.
    Direct { url: String },
}

impl ImageRef {
    pub fn url(&self) -> &str {
        match self {
            ImageRef::Relayed { url, .. } | ImageRef::Direct { url } => url,
        }
    }

    pub fn relayed_key(&self) -> Option<&str> {
        match self {
            ImageRef::Relayed { key, .. } => Some(key),
            ImageRef::Direct { .. } => None,
        }
    }

    pub fn is_relayed(&self) -> bool {
        matches!(self, ImageRef::Relayed { .. })
    }
}

/// One printing of one card: the unit of the mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub base_id: String,
    pub set_code: String,
    pub name: String,
    #[serde(default)]
    pub stat_fields: StatFields,
    #[serde(default)]
    pub text_fields: TextFields,
    /// Label/value pairs on the detail page that matched no known field.
    #[serde(default)]
    pub auxiliary_fields: BTreeMap<String, String>,
    pub rarity: String,
    pub image_ref: ImageRef,
    #[serde(default)]
    pub deck_quantities: BTreeMap<String, u32>,
    pub last_seen: DateTime<Utc>,
}

impl CatalogEntry {
    pub fn stat(&self, field: &str) -> Option<i64> {
        self.stat_fields.get(field).copied().flatten()
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.text_fields.get(field).and_then(|v| v.as_deref())
    }

    /// Structural entries only: a blank id or name can never be served.
    pub fn is_structurally_valid(&self) -> bool {
        !self.id.trim().is_empty() && !self.name.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// Numbered continuations of a family (`GD01`, `GD02`, ...).
    Sequential,
    /// One unindexed bucket addressed by the bare prefix (`PR`).
    Flat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetDescriptor {
    pub prefix: String,
    pub sequence_number: Option<u32>,
    pub discovery_mode: DiscoveryMode,
    /// Upper bound on item numbers probed inside this set.
    pub item_ceiling: u32,
}

impl SetDescriptor {
    pub fn code(&self) -> String {
        set_code(&self.prefix, self.sequence_number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deck {
    pub code: String,
    pub display_name: String,
    #[serde(default)]
    pub card_quantities: BTreeMap<String, u32>,
}

/// Inverted deck membership: item id -> deck code -> quantity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeckIndex {
    by_item: BTreeMap<String, BTreeMap<String, u32>>,
}

impl DeckIndex {
    pub fn from_decks<'a>(decks: impl IntoIterator<Item = &'a Deck>) -> Self {
        let mut by_item: BTreeMap<String, BTreeMap<String, u32>> = BTreeMap::new();
        for deck in decks {
            for (item_id, quantity) in &deck.card_quantities {
                by_item
                    .entry(item_id.clone())
                    .or_default()
                    .insert(deck.code.clone(), *quantity);
            }
        }
        Self { by_item }
    }

    /// Deck quantities for an item; empty when the item is in no deck.
    pub fn quantities_for(&self, item_id: &str) -> BTreeMap<String, u32> {
        self.by_item.get(item_id).cloned().unwrap_or_default()
    }

    /// Listed ids that are printings of `base_id`, the base itself included.
    pub fn printings_listed<'a>(&'a self, base_id: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.by_item
            .range(base_id.to_string()..)
            .map(|(id, _)| id.as_str())
            .take_while(move |id| id.starts_with(base_id))
            .filter(move |id| split_variant_id(id).0 == base_id)
    }

    pub fn len(&self) -> usize {
        self.by_item.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_item.is_empty()
    }
}

/// Outcome of reconciling one scraped entry against the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    New,
    Unchanged,
    Changed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::New => "new",
            EntryStatus::Unchanged => "unchanged",
            EntryStatus::Changed => "changed",
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, EntryStatus::Unchanged)
    }
}

pub fn set_code(prefix: &str, sequence_number: Option<u32>) -> String {
    match sequence_number {
        Some(n) => format!("{prefix}{n:02}"),
        None => prefix.to_string(),
    }
}

pub fn item_id(set_code: &str, index: u32) -> String {
    format!("{set_code}-{index:03}")
}

/// Variant 0 is the base printing itself and carries no suffix.
pub fn variant_id(base_id: &str, variant_index: u32) -> String {
    if variant_index == 0 {
        base_id.to_string()
    } else {
        format!("{base_id}{VARIANT_MARKER}{variant_index}")
    }
}

/// Split `GD01-001_p2` into `("GD01-001", 2)`; plain ids map to index 0.
pub fn split_variant_id(id: &str) -> (&str, u32) {
    if let Some((base, suffix)) = id.rsplit_once(VARIANT_MARKER) {
        if !base.is_empty() && !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(index) = suffix.parse() {
                return (base, index);
            }
        }
    }
    (id, 0)
}

/// Strip everything but digits; nothing left means the stat is absent, not zero.
pub fn parse_numeric_stat(raw: &str) -> Option<i64> {
    let digits = raw.chars().filter(|c| c.is_ascii_digit()).collect::<String>();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

pub fn split_rarities(raw: &str) -> Vec<String> {
    raw.split(RARITY_DELIMITERS)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Rarity of the `variant_index`-th printing given the rarities listed on its detail page.
pub fn rarity_for_variant(rarities: &[String], variant_index: u32) -> String {
    let index = variant_index as usize;
    match rarities.get(index) {
        Some(rarity) => rarity.clone(),
        None => match rarities.last() {
            Some(last) => format!("{last}{OVERFLOW_RARITY_MARKER}"),
            None if index == 0 => DEFAULT_RARITY.to_string(),
            None => format!("{DEFAULT_RARITY}{OVERFLOW_RARITY_MARKER}"),
        },
    }
}

/// Flat card document written by earlier versions of the mirror.
#[derive(Debug, Clone, Deserialize)]
struct LegacyCardDocument {
    #[serde(default)]
    id: Option<String>,
    #[serde(alias = "cardNo")]
    card_no: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "image")]
    image_url: Option<String>,
    #[serde(default)]
    cost: Option<JsonValue>,
    #[serde(default)]
    hp: Option<JsonValue>,
    #[serde(default, alias = "apData", alias = "bp")]
    ap: Option<JsonValue>,
    #[serde(default, alias = "lv")]
    level: Option<JsonValue>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default, rename = "type", alias = "categoryData", alias = "cardType")]
    card_type: Option<String>,
    #[serde(default)]
    rarity: Option<String>,
    #[serde(default, rename = "trait")]
    card_trait: Option<String>,
    #[serde(default, alias = "effectData", alias = "text")]
    effect_text: Option<String>,
    #[serde(default, alias = "set_code")]
    set: Option<String>,
    #[serde(default)]
    series: Option<String>,
    #[serde(default)]
    variants: Vec<LegacyVariant>,
}

/// Alternate art nested under its base card in the oldest mirror shape.
#[derive(Debug, Clone, Deserialize)]
struct LegacyVariant {
    #[serde(alias = "variantId")]
    variant_id: String,
    #[serde(default, alias = "image_url")]
    image: Option<String>,
    #[serde(default)]
    rarity: Option<String>,
}

fn legacy_number(value: &Option<JsonValue>) -> Option<i64> {
    match value.as_ref()? {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => parse_numeric_stat(s),
        _ => None,
    }
}

fn legacy_text(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn is_version_segment(segment: &str) -> bool {
    segment.len() > 1 && segment.starts_with('v') && segment[1..].bytes().all(|b| b.is_ascii_digit())
}

/// Stable key of a relayed URL, e.g.
/// `https://res.cloudinary.com/demo/image/upload/v17/gundam_cards/GD01-001.webp` -> `gundam_cards/GD01-001`.
fn relayed_key_from_url(url: &str) -> Option<String> {
    let (_, path) = url.split_once(RELAY_HOST)?;
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let rest = match path.split_once("/upload/") {
        Some((_, rest)) => rest,
        None => path.trim_start_matches('/').split_once('/')?.1,
    };
    let mut segments = rest.split('/').filter(|s| !s.is_empty()).collect::<Vec<_>>();
    if segments.first().is_some_and(|s| is_version_segment(s)) {
        segments.remove(0);
    }
    let last = segments.pop()?;
    let stem = last.rsplit_once('.').map_or(last, |(stem, _)| stem);
    if stem.is_empty() {
        return None;
    }
    segments.push(stem);
    Some(segments.join("/"))
}

fn legacy_image(url: Option<String>) -> ImageRef {
    let url = url.unwrap_or_default();
    match relayed_key_from_url(&url) {
        Some(key) => ImageRef::Relayed { key, url },
        None => ImageRef::Direct { url },
    }
}

impl LegacyCardDocument {
    /// The base entry first, then one entry per nested variant.
    fn into_entries(mut self) -> Vec<CatalogEntry> {
        let variants = std::mem::take(&mut self.variants);
        let base = self.into_entry();
        let mut entries = vec![base.clone()];
        for variant in variants {
            let id = variant.variant_id.trim().to_string();
            if id.is_empty() || entries.iter().any(|e| e.id == id) {
                continue;
            }
            entries.push(CatalogEntry {
                id,
                rarity: legacy_text(variant.rarity).unwrap_or_else(|| base.rarity.clone()),
                image_ref: legacy_image(variant.image),
                ..base.clone()
            });
        }
        entries
    }

    fn into_entry(self) -> CatalogEntry {
        let id = self.id.unwrap_or_else(|| self.card_no.clone());
        let (base_id, _) = split_variant_id(&id);
        let base_id = base_id.to_string();
        let set_code = self
            .set
            .clone()
            .or_else(|| base_id.split_once('-').map(|(set, _)| set.to_string()))
            .unwrap_or_default();

        let mut stat_fields = StatFields::new();
        for (name, raw) in [
            (fields::COST, &self.cost),
            (fields::HP, &self.hp),
            (fields::AP, &self.ap),
            (fields::LEVEL, &self.level),
        ] {
            if raw.is_some() {
                stat_fields.insert(name.to_string(), legacy_number(raw));
            }
        }

        let mut text_fields = TextFields::new();
        for (name, raw) in [
            (fields::COLOR, self.color),
            (fields::CARD_TYPE, self.card_type),
            (fields::TRAIT, self.card_trait),
            (fields::EFFECT, self.effect_text),
            (fields::SOURCE_TITLE, self.series),
        ] {
            if raw.is_some() {
                text_fields.insert(name.to_string(), legacy_text(raw));
            }
        }

        CatalogEntry {
            id,
            base_id,
            set_code,
            name: self.name.unwrap_or_default(),
            stat_fields,
            text_fields,
            auxiliary_fields: BTreeMap::new(),
            rarity: self.rarity.unwrap_or_else(|| DEFAULT_RARITY.to_string()),
            image_ref: legacy_image(self.image_url),
            deck_quantities: BTreeMap::new(),
            last_seen: DateTime::<Utc>::default(),
        }
    }
}

/// How a persisted document was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentShape {
    Current,
    Legacy,
}

/// Decode one persisted card document. A legacy document may nest its variants, so it can
/// yield several entries.
pub fn decode_entries(value: JsonValue) -> Option<(Vec<CatalogEntry>, DocumentShape)> {
    if let Ok(entry) = serde_json::from_value::<CatalogEntry>(value.clone()) {
        return Some((vec![entry], DocumentShape::Current));
    }
    serde_json::from_value::<LegacyCardDocument>(value)
        .ok()
        .map(|legacy| (legacy.into_entries(), DocumentShape::Legacy))
}

#[derive(Debug, Clone, Deserialize)]
struct LegacyDeckCard {
    #[serde(alias = "cardNo")]
    card_no: String,
    #[serde(default = "one")]
    quantity: u32,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
struct LegacyDeckDocument {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    cards: Vec<LegacyDeckCard>,
}

/// Decode one persisted deck keyed by `code`, accepting the legacy `cards` list shape.
pub fn decode_deck(code: &str, value: JsonValue) -> Option<(Deck, DocumentShape)> {
    if let Ok(deck) = serde_json::from_value::<Deck>(value.clone()) {
        return Some((deck, DocumentShape::Current));
    }
    let legacy = serde_json::from_value::<LegacyDeckDocument>(value).ok()?;
    let mut card_quantities = BTreeMap::new();
    for card in legacy.cards {
        *card_quantities.entry(card.card_no).or_insert(0) += card.quantity;
    }
    Some((
        Deck {
            code: code.to_string(),
            display_name: legacy.name.unwrap_or_else(|| generic_deck_name(code)),
            card_quantities,
        },
        DocumentShape::Legacy,
    ))
}

pub fn generic_deck_name(code: &str) -> String {
    format!("Starter Deck {code}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identifiers_follow_family_numbering() {
        assert_eq!(set_code("GD", Some(1)), "GD01");
        assert_eq!(set_code("PR", None), "PR");
        assert_eq!(item_id("GD01", 7), "GD01-007");
        assert_eq!(variant_id("GD01-007", 0), "GD01-007");
        assert_eq!(variant_id("GD01-007", 2), "GD01-007_p2");
        assert_eq!(split_variant_id("GD01-007_p2"), ("GD01-007", 2));
        assert_eq!(split_variant_id("GD01-007"), ("GD01-007", 0));
        assert_eq!(split_variant_id("GD01-007_px"), ("GD01-007_px", 0));
    }

    #[test]
    fn placeholder_stats_are_absent_not_zero() {
        assert_eq!(parse_numeric_stat("0"), Some(0));
        assert_eq!(parse_numeric_stat("Lv.3"), Some(3));
        assert_eq!(parse_numeric_stat("-"), None);
        assert_eq!(parse_numeric_stat(""), None);
    }

    #[test]
    fn rarities_split_on_any_delimiter() {
        assert_eq!(split_rarities("R / SR"), vec!["R", "SR"]);
        assert_eq!(split_rarities("C,U|LR+"), vec!["C", "U", "LR+"]);
        assert!(split_rarities("  ").is_empty());
    }

    #[test]
    fn positional_rarity_overflows_with_marker() {
        let rarities = vec!["R".to_string(), "SR".to_string()];
        assert_eq!(rarity_for_variant(&rarities, 0), "R");
        assert_eq!(rarity_for_variant(&rarities, 1), "SR");
        assert_eq!(rarity_for_variant(&rarities, 2), "SR+");
        assert_eq!(rarity_for_variant(&rarities, 5), "SR+");
        assert_eq!(rarity_for_variant(&[], 0), DEFAULT_RARITY);
    }

    #[test]
    fn deck_index_inverts_membership() {
        let decks = vec![
            Deck {
                code: "ST01".into(),
                display_name: "Heroic Beginnings".into(),
                card_quantities: BTreeMap::from([("ST01-001".to_string(), 2)]),
            },
            Deck {
                code: "ST02".into(),
                display_name: "Wings of Advance".into(),
                card_quantities: BTreeMap::from([("ST01-001".to_string(), 1)]),
            },
        ];
        let index = DeckIndex::from_decks(&decks);
        let quantities = index.quantities_for("ST01-001");
        assert_eq!(quantities.get("ST01"), Some(&2));
        assert_eq!(quantities.get("ST02"), Some(&1));
        assert!(index.quantities_for("GD01-001").is_empty());
    }

    #[test]
    fn legacy_flat_card_documents_are_normalized() {
        let legacy = json!({
            "id": "GD01-001_p1",
            "card_no": "GD01-001",
            "name": "Gundam",
            "image_url": "https://example.test/GD01-001_p1.webp",
            "cost": "3",
            "hp": "-",
            "color": "Blue",
            "type": "UNIT",
            "rarity": "LR+",
            "trait": "(Earth Federation)",
            "effect_text": "",
            "set": "GD01"
        });
        let (entries, shape) = decode_entries(legacy).expect("legacy decodes");
        assert_eq!(shape, DocumentShape::Legacy);
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.id, "GD01-001_p1");
        assert_eq!(entry.base_id, "GD01-001");
        assert_eq!(entry.stat(fields::COST), Some(3));
        assert_eq!(entry.stat_fields.get(fields::HP), Some(&None));
        assert_eq!(entry.text(fields::EFFECT), None);
        assert_eq!(entry.text(fields::CARD_TYPE), Some("UNIT"));
        assert!(!entry.image_ref.is_relayed());
    }

    #[test]
    fn nested_variant_documents_expand_into_entries() {
        let legacy = json!({
            "cardNo": "GD01-001",
            "originalId": "GD01-001",
            "name": "Gundam",
            "series": "Newtype Rising",
            "cost": 3,
            "color": "Blue",
            "rarity": "LR",
            "apData": 3,
            "effectData": "【Deploy】 Add 1 of your Shields to your hand.",
            "categoryData": "UNIT",
            "image": "https://res.cloudinary.com/demo/image/upload/v1712345678/gundam_cards/GD01-001.webp",
            "variants": [
                {
                    "variantId": "GD01-001-ALT1",
                    "image": "https://res.cloudinary.com/demo/image/upload/v1712345679/gundam_cards/GD01-001-ALT1.webp",
                    "rarity": "LR+"
                },
                {"variantId": "GD01-001-ALT2", "image": "https://src.test/GD01-001-ALT2.png"}
            ],
            "last_updated": "2025-01-12 04:00:00.000000"
        });
        let (entries, shape) = decode_entries(legacy).expect("legacy decodes");
        assert_eq!(shape, DocumentShape::Legacy);
        let ids = entries.iter().map(|e| e.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["GD01-001", "GD01-001-ALT1", "GD01-001-ALT2"]);

        let base = &entries[0];
        assert_eq!(base.text(fields::SOURCE_TITLE), Some("Newtype Rising"));
        assert_eq!(base.text(fields::CARD_TYPE), Some("UNIT"));
        assert_eq!(base.stat(fields::AP), Some(3));
        assert_eq!(base.image_ref.relayed_key(), Some("gundam_cards/GD01-001"));

        let alt = &entries[1];
        assert_eq!(alt.base_id, "GD01-001");
        assert_eq!(alt.set_code, "GD01");
        assert_eq!(alt.rarity, "LR+");
        assert_eq!(alt.stat(fields::COST), Some(3));
        assert_eq!(alt.image_ref.relayed_key(), Some("gundam_cards/GD01-001-ALT1"));

        assert_eq!(entries[2].rarity, "LR");
        assert_eq!(
            entries[2].image_ref,
            ImageRef::Direct {
                url: "https://src.test/GD01-001-ALT2.png".into()
            }
        );
    }

    #[test]
    fn relayed_keys_are_read_back_from_cdn_urls() {
        assert_eq!(
            relayed_key_from_url("https://res.cloudinary.com/demo/image/upload/v17/gundam_cards/ST01-001.webp")
                .as_deref(),
            Some("gundam_cards/ST01-001")
        );
        assert_eq!(
            relayed_key_from_url("https://res.cloudinary.com/demo/gundam_cards/GD01-001.webp?x=1").as_deref(),
            Some("gundam_cards/GD01-001")
        );
        assert_eq!(relayed_key_from_url("https://src.test/GD01-001.webp"), None);
        assert_eq!(relayed_key_from_url(""), None);
    }

    #[test]
    fn current_documents_round_trip_as_current() {
        let entry = CatalogEntry {
            id: "ST01-001".into(),
            base_id: "ST01-001".into(),
            set_code: "ST01".into(),
            name: "Gundam".into(),
            stat_fields: StatFields::from([(fields::COST.to_string(), Some(0))]),
            text_fields: TextFields::new(),
            auxiliary_fields: BTreeMap::new(),
            rarity: "LR".into(),
            image_ref: ImageRef::Relayed {
                key: "gundam_cards/ST01-001".into(),
                url: "https://cdn.test/ST01-001.webp".into(),
            },
            deck_quantities: BTreeMap::new(),
            last_seen: DateTime::<Utc>::default(),
        };
        let value = serde_json::to_value(&entry).unwrap();
        let (decoded, shape) = decode_entries(value).unwrap();
        assert_eq!(shape, DocumentShape::Current);
        assert_eq!(decoded, vec![entry]);
    }

    #[test]
    fn legacy_deck_card_lists_are_summed() {
        let legacy = json!({
            "name": "Heroic Beginnings",
            "cards": [
                {"card_no": "ST01-001", "quantity": 2},
                {"card_no": "ST01-002", "quantity": 4}
            ]
        });
        let (deck, shape) = decode_deck("ST01", legacy).unwrap();
        assert_eq!(shape, DocumentShape::Legacy);
        assert_eq!(deck.code, "ST01");
        assert_eq!(deck.card_quantities.get("ST01-002"), Some(&4));
    }
}
