//! Rolling full-audit schedule and the per-item scan decision.

use chrono::{Datelike, NaiveDate};
use gcg_core::{CatalogEntry, DeckIndex};
use gcg_storage::stable_hash;
use serde::Serialize;

/// Day in `[1, period]` on which `set_code` gets its full audit.
pub fn scheduled_day(set_code: &str, period: u32) -> u32 {
    let period = period.max(1);
    (stable_hash(set_code) % u64::from(period)) as u32 + 1
}

/// Position of `date` in the rolling period, in `[1, period]`.
pub fn day_in_period(date: NaiveDate, period: u32) -> u32 {
    let period = i64::from(period.max(1));
    i64::from(date.num_days_from_ce()).rem_euclid(period) as u32 + 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanReason {
    NotInMirror,
    FullAudit,
    DeckMembershipChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDecision {
    Scrape(ScanReason),
    Skip,
}

#[derive(Debug, Clone, Copy)]
pub struct AuditScheduler {
    period: u32,
    today: u32,
    global_full_audit: bool,
}

impl AuditScheduler {
    pub fn new(period: u32, global_full_audit: bool, run_date: NaiveDate) -> Self {
        let period = period.max(1);
        Self {
            period,
            today: day_in_period(run_date, period),
            global_full_audit,
        }
    }

    pub fn period(&self) -> u32 {
        self.period
    }

    pub fn today(&self) -> u32 {
        self.today
    }

    pub fn scheduled_day(&self, set_code: &str) -> u32 {
        scheduled_day(set_code, self.period)
    }

    pub fn full_audit(&self, set_code: &str) -> bool {
        self.global_full_audit || self.scheduled_day(set_code) == self.today
    }

    /// Whether one base item must be fetched, given every stored printing of it.
    /// Deck membership drift on any printing always forces a scrape.
    pub fn decide(
        &self,
        full_audit: bool,
        base_id: &str,
        printings: &[&CatalogEntry],
        decks: &DeckIndex,
    ) -> ScanDecision {
        if !printings.iter().any(|p| p.id == base_id) {
            return ScanDecision::Scrape(ScanReason::NotInMirror);
        }
        if full_audit {
            return ScanDecision::Scrape(ScanReason::FullAudit);
        }
        if deck_drift(base_id, printings, decks) {
            return ScanDecision::Scrape(ScanReason::DeckMembershipChanged);
        }
        ScanDecision::Skip
    }
}

fn deck_drift(base_id: &str, printings: &[&CatalogEntry], decks: &DeckIndex) -> bool {
    let stale = printings
        .iter()
        .any(|p| p.deck_quantities != decks.quantities_for(&p.id));
    let unseen = decks
        .printings_listed(base_id)
        .any(|id| !printings.iter().any(|p| p.id == id));
    stale || unseen
}
