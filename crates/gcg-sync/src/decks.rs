//! Deck synchronizer: names and quantity lists per deck, inverted into a `DeckIndex`.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use gcg_adapters::{CatalogSource, SourceError};
use gcg_core::{generic_deck_name, Deck, DeckIndex};
use gcg_storage::BackoffPolicy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::budget::RunBudget;

/// Matches `<count>x <anything> (<item id>)`, e.g. `2x Gundam (ST01-001)`.
pub struct DeckRowParser {
    row: Regex,
}

impl DeckRowParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            row: Regex::new(r"(\d+)\s*[xX×]\s*.*?\(([A-Z0-9]+-\d+(?:_p\d+)?)\)")?,
        })
    }

    /// Quantities per item id; repeated rows for one item are summed.
    pub fn parse_rows(&self, rows: &[String]) -> BTreeMap<String, u32> {
        let mut quantities = BTreeMap::new();
        for row in rows {
            let Some(caps) = self.row.captures(row) else {
                continue;
            };
            let Ok(count) = caps[1].parse::<u32>() else {
                continue;
            };
            if count == 0 {
                continue;
            }
            *quantities.entry(caps[2].to_string()).or_insert(0) += count;
        }
        quantities
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeckSyncStats {
    pub refreshed: usize,
    pub kept_prior: usize,
    pub failed: usize,
    pub generic_names: usize,
    /// Prior decks whose code was no longer discovered.
    pub retired: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DeckSyncOutcome {
    pub decks: BTreeMap<String, Deck>,
    pub index: DeckIndex,
    pub stats: DeckSyncStats,
}

pub struct DeckSynchronizer {
    source: Arc<dyn CatalogSource>,
    parser: DeckRowParser,
    backoff: BackoffPolicy,
}

impl DeckSynchronizer {
    pub fn new(source: Arc<dyn CatalogSource>, backoff: BackoffPolicy) -> Result<Self, regex::Error> {
        Ok(Self {
            source,
            parser: DeckRowParser::new()?,
            backoff,
        })
    }

    /// Refresh every deck in `codes`. A deck whose listing cannot be fetched or parsed keeps
    /// its prior persisted version. Prior decks outside `codes` are retired, unless the budget
    /// was already spent and `codes` may come from a partial discovery.
    pub async fn sync(
        &self,
        codes: &[String],
        prior: &BTreeMap<String, Deck>,
        budget: &RunBudget,
    ) -> DeckSyncOutcome {
        let mut decks = prior.clone();
        let mut stats = DeckSyncStats::default();
        if !budget.is_exhausted() {
            decks.retain(|code, _| {
                let keep = codes.contains(code);
                if !keep {
                    info!(deck = %code, "deck no longer discovered; retiring");
                    stats.retired += 1;
                }
                keep
            });
        }

        for code in codes {
            if budget.is_exhausted() {
                break;
            }
            match self.fetch_deck(code, prior.get(code)).await {
                Ok((deck, generic)) => {
                    stats.refreshed += 1;
                    if generic {
                        stats.generic_names += 1;
                    }
                    decks.insert(code.clone(), deck);
                }
                Err(err) => {
                    stats.failed += 1;
                    if prior.contains_key(code) {
                        stats.kept_prior += 1;
                        warn!(deck = %code, error = %err, "deck refresh failed; keeping prior contents");
                    } else {
                        warn!(deck = %code, error = %err, "deck refresh failed");
                    }
                }
            }
        }

        let index = DeckIndex::from_decks(decks.values());
        info!(
            decks = decks.len(),
            refreshed = stats.refreshed,
            failed = stats.failed,
            retired = stats.retired,
            indexed_items = index.len(),
            "decks synchronized"
        );
        DeckSyncOutcome { decks, index, stats }
    }

    async fn fetch_deck(&self, code: &str, prior: Option<&Deck>) -> Result<(Deck, bool), SourceError> {
        let listing = self
            .with_retry(code, || self.source.fetch_deck_listing(code))
            .await?;
        let card_quantities = self.parser.parse_rows(&listing.rows);
        if card_quantities.is_empty() {
            return Err(SourceError::Parse {
                id: code.to_string(),
                message: format!("no quantity rows among {} listing rows", listing.rows.len()),
            });
        }

        let name = match self.with_retry(code, || self.source.fetch_deck_metadata(code)).await {
            Ok(meta) => meta.name.filter(|n| !n.trim().is_empty()),
            Err(err) => {
                debug!(deck = code, error = %err, "deck metadata unavailable");
                None
            }
        };
        let (display_name, generic) = match name.or_else(|| prior.map(|d| d.display_name.clone())) {
            Some(name) => (name, false),
            None => (generic_deck_name(code), true),
        };

        Ok((
            Deck {
                code: code.to_string(),
                display_name,
                card_quantities,
            },
            generic,
        ))
    }

    /// Deck sources are few and cheap, so transient failures get a bounded retry.
    async fn with_retry<T, F, Fut>(&self, code: &str, mut op: F) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut attempt = 0usize;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt + 1 < self.backoff.attempts() => {
                    debug!(deck = code, attempt, error = %err, "retrying deck fetch");
                    tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
