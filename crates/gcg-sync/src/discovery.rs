use gcg_core::{item_id, set_code, DiscoveryMode, SetDescriptor};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::budget::RunBudget;
use crate::config::{PrefixConfig, Thresholds};
use crate::probe::Prober;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiscoveryResult {
    pub sets: Vec<SetDescriptor>,
    /// Prefixes that found nothing this run and were restored from the last-known-good list.
    pub fallback_prefixes: Vec<String>,
    pub halted: bool,
}

/// Walks numeric set suffixes per known prefix, probing each set's first item.
pub struct SetDiscoverer {
    prober: Prober,
    thresholds: Thresholds,
}

impl SetDiscoverer {
    pub fn new(prober: Prober, thresholds: Thresholds) -> Self {
        Self { prober, thresholds }
    }

    /// Flat prefixes are a single bucket and are emitted without probing.
    pub async fn discover_prefix(&self, prefix: &PrefixConfig, budget: &RunBudget) -> Vec<SetDescriptor> {
        if prefix.mode == DiscoveryMode::Flat {
            return vec![SetDescriptor {
                prefix: prefix.prefix.clone(),
                sequence_number: None,
                discovery_mode: DiscoveryMode::Flat,
                item_ceiling: prefix.item_ceiling,
            }];
        }

        let mut found = Vec::new();
        let mut misses = 0u32;
        for sequence in 1..=self.thresholds.max_set_sequence {
            if budget.is_exhausted() {
                break;
            }
            let code = set_code(&prefix.prefix, Some(sequence));
            if self.prober.probe_detail(&item_id(&code, 1)).await.is_found() {
                debug!(set = %code, "set found");
                misses = 0;
                found.push(SetDescriptor {
                    prefix: prefix.prefix.clone(),
                    sequence_number: Some(sequence),
                    discovery_mode: DiscoveryMode::Sequential,
                    item_ceiling: prefix.item_ceiling,
                });
            } else {
                misses += 1;
                if misses >= self.thresholds.set_miss_threshold {
                    debug!(prefix = %prefix.prefix, last_probed = %code, "prefix exhausted");
                    break;
                }
            }
        }
        found
    }

    /// Discover every prefix; a prefix with zero discoveries keeps its last-known-good sets.
    pub async fn discover_all(
        &self,
        prefixes: &[PrefixConfig],
        last_known_good: &[SetDescriptor],
        budget: &RunBudget,
    ) -> DiscoveryResult {
        let mut result = DiscoveryResult::default();
        for prefix in prefixes {
            if budget.is_exhausted() {
                result.halted = true;
                break;
            }
            let found = self.discover_prefix(prefix, budget).await;
            if found.is_empty() {
                let previous = last_known_good
                    .iter()
                    .filter(|set| set.prefix == prefix.prefix)
                    .cloned()
                    .collect::<Vec<_>>();
                if !previous.is_empty() {
                    warn!(
                        prefix = %prefix.prefix,
                        restored = previous.len(),
                        "prefix discovered nothing; using last-known-good sets"
                    );
                    result.fallback_prefixes.push(prefix.prefix.clone());
                }
                result.sets.extend(previous);
            } else {
                info!(prefix = %prefix.prefix, sets = found.len(), "prefix discovered");
                result.sets.extend(found);
            }
        }
        result.halted |= budget.is_exhausted();
        result
    }
}
