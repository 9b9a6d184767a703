//! Discovery, incremental audit and reconciliation engine for the GCG catalog mirror.

pub mod budget;
pub mod config;
pub mod decks;
pub mod discovery;
pub mod engine;
pub mod probe;
pub mod schedule;
pub mod scrape;
pub mod store;
pub mod variants;

pub use budget::RunBudget;
pub use config::{CatalogRegistry, PrefixConfig, SourceKind, SyncConfig, Thresholds};
pub use decks::{DeckRowParser, DeckSyncOutcome, DeckSyncStats, DeckSynchronizer};
pub use discovery::{DiscoveryResult, SetDiscoverer};
pub use engine::{ItemCounts, RunOptions, ScheduleRow, SetReport, SyncEngine, SyncRunSummary, SUMMARY_FILE};
pub use probe::{MissReason, ProbeOutcome, Prober};
pub use schedule::{day_in_period, scheduled_day, AuditScheduler, ScanDecision, ScanReason};
pub use scrape::ItemScraper;
pub use store::{ReconciliationStore, CARDS_FILE, DECKS_FILE, SETS_FILE};
pub use variants::{VariantAsset, VariantDiscoverer};

pub const CRATE_NAME: &str = "gcg-sync";
