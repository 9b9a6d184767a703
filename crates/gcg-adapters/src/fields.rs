//! Declarative label synonym table and the single normalization function over it.

use std::collections::BTreeMap;

use gcg_core::{fields, parse_numeric_stat, split_rarities, StatFields, TextFields};

use crate::DetailDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Numeric,
    Text,
    Rarity,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSynonyms {
    pub canonical: &'static str,
    pub kind: FieldKind,
    /// Accepted labels, already in `normalize_label` form.
    pub labels: &'static [&'static str],
}

pub const RARITY: &str = "rarity";

pub const FIELD_SYNONYMS: &[FieldSynonyms] = &[
    FieldSynonyms {
        canonical: fields::COST,
        kind: FieldKind::Numeric,
        labels: &["cost", "cst"],
    },
    FieldSynonyms {
        canonical: fields::LEVEL,
        kind: FieldKind::Numeric,
        labels: &["lv", "level"],
    },
    FieldSynonyms {
        canonical: fields::AP,
        kind: FieldKind::Numeric,
        labels: &["ap", "atk", "attack", "bp"],
    },
    FieldSynonyms {
        canonical: fields::HP,
        kind: FieldKind::Numeric,
        labels: &["hp", "health", "def"],
    },
    FieldSynonyms {
        canonical: fields::COLOR,
        kind: FieldKind::Text,
        labels: &["color", "colour"],
    },
    FieldSynonyms {
        canonical: fields::CARD_TYPE,
        kind: FieldKind::Text,
        labels: &["card type", "type", "category"],
    },
    FieldSynonyms {
        canonical: fields::EFFECT,
        kind: FieldKind::Text,
        labels: &["effect", "text", "effect text", "ability"],
    },
    FieldSynonyms {
        canonical: fields::ZONE,
        kind: FieldKind::Text,
        labels: &["zone", "terrain"],
    },
    FieldSynonyms {
        canonical: fields::TRAIT,
        kind: FieldKind::Text,
        labels: &["trait", "traits", "feature"],
    },
    FieldSynonyms {
        canonical: fields::LINK,
        kind: FieldKind::Text,
        labels: &["link", "link condition"],
    },
    FieldSynonyms {
        canonical: fields::SOURCE_TITLE,
        kind: FieldKind::Text,
        labels: &["source title", "title", "series", "work"],
    },
    FieldSynonyms {
        canonical: fields::OBTAINED_FROM,
        kind: FieldKind::Text,
        labels: &["where to get it", "product", "included in"],
    },
    FieldSynonyms {
        canonical: RARITY,
        kind: FieldKind::Rarity,
        labels: &["rarity", "rare"],
    },
];

const TEXT_PLACEHOLDERS: &[&str] = &["-", "--", "—", "ー", "n/a", "none"];

/// Lowercase, collapse whitespace and drop trailing `.`/`:` (`"Lv. "` -> `"lv"`).
pub fn normalize_label(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .trim_end_matches(['.', ':', '：'])
        .trim()
        .to_string()
}

pub fn lookup_synonym(raw_label: &str) -> Option<&'static FieldSynonyms> {
    let label = normalize_label(raw_label);
    FIELD_SYNONYMS
        .iter()
        .find(|entry| entry.labels.iter().any(|accepted| *accepted == label))
}

fn normalize_text(raw: &str) -> Option<String> {
    let collapsed = raw
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if collapsed.is_empty() || TEXT_PLACEHOLDERS.contains(&collapsed.to_lowercase().as_str()) {
        None
    } else {
        Some(collapsed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedFields {
    pub stats: StatFields,
    pub texts: TextFields,
    pub auxiliary: BTreeMap<String, String>,
    /// Positional rarities, one per printing.
    pub rarities: Vec<String>,
}

/// Map raw label/value pairs onto canonical fields. First occurrence of a field wins;
/// unmatched pairs are kept as auxiliary entries keyed by their normalized label, with an
/// empty value when the page shows only a placeholder.
pub fn normalize_fields(doc: &DetailDocument) -> NormalizedFields {
    let mut out = NormalizedFields::default();
    for pair in &doc.pairs {
        match lookup_synonym(&pair.label) {
            Some(entry) => match entry.kind {
                FieldKind::Numeric => {
                    out.stats
                        .entry(entry.canonical.to_string())
                        .or_insert_with(|| parse_numeric_stat(&pair.value));
                }
                FieldKind::Text => {
                    out.texts
                        .entry(entry.canonical.to_string())
                        .or_insert_with(|| normalize_text(&pair.value));
                }
                FieldKind::Rarity => {
                    if out.rarities.is_empty() {
                        out.rarities = split_rarities(&pair.value);
                    }
                }
            },
            None => {
                let label = normalize_label(&pair.label);
                if label.is_empty() {
                    continue;
                }
                out.auxiliary
                    .entry(label)
                    .or_insert_with(|| normalize_text(&pair.value).unwrap_or_default());
            }
        }
    }
    out
}
