//! Markup-tolerant extraction of detail documents and deck listings.

use scraper::{ElementRef, Html, Selector};

use crate::{DeckListing, DeckMetadata, DetailDocument, LabelValue};

const NAME_SELECTORS: &[&str] = &[".cardName", ".card-name", "h1"];
const RARITY_SELECTORS: &[&str] = &[".rarity", ".cardRarity"];
const DECK_NAME_SELECTORS: &[&str] = &[".productTitle", ".product-name", "h1", "title"];

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn element_text(element: ElementRef<'_>) -> Option<String> {
    let text = element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Like `element_text` but keeps `<br>`-separated lines apart; effect text is multi-line.
fn element_multiline_text(element: ElementRef<'_>) -> Option<String> {
    let text = element
        .text()
        .map(|chunk| chunk.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|chunk| !chunk.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn first_text(document: &Html, selectors: &[&str]) -> Option<String> {
    selectors.iter().find_map(|css| {
        let sel = selector(css)?;
        document.select(&sel).find_map(element_text)
    })
}

/// Collect `dt`/`dd` and `th`/`td` pairs from whatever markup the page uses.
pub fn parse_detail_document(html: &str) -> DetailDocument {
    let document = Html::parse_document(html);
    let mut pairs = Vec::new();

    if let (Some(dl), Some(dt), Some(dd)) = (selector("dl"), selector("dt"), selector("dd")) {
        for list in document.select(&dl) {
            let labels = list.select(&dt).collect::<Vec<_>>();
            let values = list.select(&dd).collect::<Vec<_>>();
            for (label, value) in labels.into_iter().zip(values) {
                if let Some(label) = element_text(label) {
                    pairs.push(LabelValue::new(
                        label,
                        element_multiline_text(value).unwrap_or_default(),
                    ));
                }
            }
        }
    }

    if let (Some(tr), Some(th), Some(td)) = (selector("tr"), selector("th"), selector("td")) {
        for row in document.select(&tr) {
            let (Some(label), Some(value)) = (row.select(&th).next(), row.select(&td).next()) else {
                continue;
            };
            if let Some(label) = element_text(label) {
                pairs.push(LabelValue::new(
                    label,
                    element_multiline_text(value).unwrap_or_default(),
                ));
            }
        }
    }

    let has_rarity_pair = pairs
        .iter()
        .any(|p| crate::fields::normalize_label(&p.label) == crate::fields::RARITY);
    if !has_rarity_pair {
        if let Some(rarity) = first_text(&document, RARITY_SELECTORS) {
            pairs.push(LabelValue::new("Rarity", rarity));
        }
    }

    DetailDocument {
        name: first_text(&document, NAME_SELECTORS),
        pairs,
    }
}

/// One text row per table row or list item; falls back to plain lines for text bodies.
pub fn parse_deck_listing(body: &str) -> DeckListing {
    let document = Html::parse_document(body);
    let mut rows = Vec::new();
    for css in ["tr", "li"] {
        if let Some(sel) = selector(css) {
            rows.extend(document.select(&sel).filter_map(element_text));
        }
    }
    if rows.is_empty() {
        rows = body
            .lines()
            .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|line| !line.is_empty())
            .collect();
    }
    DeckListing { rows }
}

pub fn parse_deck_metadata(html: &str) -> DeckMetadata {
    let document = Html::parse_document(html);
    DeckMetadata {
        name: first_text(&document, DECK_NAME_SELECTORS),
    }
}
