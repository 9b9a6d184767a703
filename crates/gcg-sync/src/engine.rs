//! Run orchestration: discovery, decks, per-set audits through a bounded pool, reports.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use gcg_adapters::{
    CatalogSource, CloudinaryConfig, CloudinaryTransport, FixtureSource, ImageRelay, OfficialSiteSource, RateLimitFlag,
};
use gcg_core::{item_id, EntryStatus, SetDescriptor};
use gcg_storage::{BackoffPolicy, HttpClientConfig, HttpFetcher, JsonDocumentStore};
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info};
use uuid::Uuid;

use crate::budget::RunBudget;
use crate::config::{CatalogRegistry, SourceKind, SyncConfig};
use crate::decks::{DeckSyncStats, DeckSynchronizer};
use crate::discovery::{DiscoveryResult, SetDiscoverer};
use crate::probe::Prober;
use crate::schedule::{AuditScheduler, ScanDecision};
use crate::scrape::ItemScraper;
use crate::store::{load_decks, load_sets, write_decks, write_sets, ReconciliationStore};

pub const SUMMARY_FILE: &str = "sync_summary.json";

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub full_audit: bool,
    pub max_runtime: Duration,
    pub set_workers: usize,
    pub checkpoint_every: usize,
    /// Date used for the rolling schedule; today (UTC) when unset.
    pub run_date: Option<NaiveDate>,
    pub deck_backoff: BackoffPolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            full_audit: false,
            max_runtime: Duration::from_secs(3300),
            set_workers: 1,
            checkpoint_every: 50,
            run_date: None,
            deck_backoff: BackoffPolicy {
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(4),
                ..Default::default()
            },
        }
    }
}

impl RunOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            full_audit: config.full_audit,
            max_runtime: config.max_runtime(),
            set_workers: config.set_workers,
            checkpoint_every: config.checkpoint_every,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ItemCounts {
    pub new: usize,
    pub changed: usize,
    pub unchanged: usize,
    /// Known items not fetched on an incremental pass.
    pub skipped: usize,
    /// Item numbers that probed missing.
    pub missing: usize,
}

impl ItemCounts {
    fn record(&mut self, status: EntryStatus) {
        match status {
            EntryStatus::New => self.new += 1,
            EntryStatus::Changed => self.changed += 1,
            EntryStatus::Unchanged => self.unchanged += 1,
        }
    }

    fn absorb(&mut self, other: &ItemCounts) {
        self.new += other.new;
        self.changed += other.changed;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.missing += other.missing;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SetReport {
    pub set_code: String,
    pub full_audit: bool,
    pub scheduled_day: u32,
    pub items: ItemCounts,
    pub halted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub source_id: String,
    pub full_audit_flag: bool,
    pub audit_period: u32,
    pub audit_day: u32,
    pub sets_discovered: usize,
    pub fallback_prefixes: Vec<String>,
    pub sets_fully_audited: usize,
    pub decks: usize,
    pub deck_stats: DeckSyncStats,
    pub items: ItemCounts,
    pub purged: usize,
    pub checkpoints: usize,
    pub mirror_entries: usize,
    pub relay_degraded: bool,
    pub halted_by_budget: bool,
    pub sets: Vec<SetReport>,
    pub report_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleRow {
    pub set_code: String,
    pub scheduled_day: u32,
    pub due_today: bool,
}

/// Shared state of one run, handed to every set task.
struct SetWorker {
    scraper: ItemScraper,
    store: Arc<Mutex<ReconciliationStore>>,
    scheduler: AuditScheduler,
    budget: RunBudget,
    item_miss_threshold: u32,
}

impl SetWorker {
    async fn process_set(&self, set: SetDescriptor) -> Result<SetReport> {
        let code = set.code();
        let full_audit = self.scheduler.full_audit(&code);
        let mut report = SetReport {
            scheduled_day: self.scheduler.scheduled_day(&code),
            set_code: code.clone(),
            full_audit,
            items: ItemCounts::default(),
            halted: false,
        };
        if self.budget.is_exhausted() {
            report.halted = true;
            return Ok(report);
        }
        info!(set = %code, full_audit, scheduled_day = report.scheduled_day, "set audit starting");

        let mut misses = 0u32;
        for index in 1..=set.item_ceiling {
            if self.budget.is_exhausted() {
                report.halted = true;
                break;
            }
            let base_id = item_id(&code, index);
            let (decision, existing_images) = {
                let store = self.store.lock().await;
                let printings = store.printings_of(&base_id).collect::<Vec<_>>();
                (
                    self.scheduler
                        .decide(full_audit, &base_id, &printings, self.scraper.deck_index()),
                    store.relayed_images_for(&base_id),
                )
            };

            match decision {
                ScanDecision::Skip => {
                    misses = 0;
                    report.items.skipped += 1;
                    debug!(item = %base_id, status = "skipped", "item reconciled");
                    continue;
                }
                ScanDecision::Scrape(reason) => debug!(item = %base_id, ?reason, "scraping item"),
            }

            match self.scraper.scrape(&code, &base_id, &existing_images).await {
                None => {
                    report.items.missing += 1;
                    misses += 1;
                    if misses >= self.item_miss_threshold {
                        debug!(set = %code, last_probed = %base_id, "set exhausted");
                        break;
                    }
                }
                Some(entries) => {
                    misses = 0;
                    let mut store = self.store.lock().await;
                    for entry in entries {
                        let id = entry.id.clone();
                        let status = store.apply(entry);
                        report.items.record(status);
                        debug!(item = %id, status = status.as_str(), "item reconciled");
                    }
                    store
                        .record_processed()
                        .await
                        .context("writing periodic checkpoint")?;
                }
            }
        }

        self.store
            .lock()
            .await
            .checkpoint()
            .await
            .with_context(|| format!("writing checkpoint after set {code}"))?;
        info!(
            set = %code,
            new = report.items.new,
            changed = report.items.changed,
            unchanged = report.items.unchanged,
            skipped = report.items.skipped,
            halted = report.halted,
            "set audit finished"
        );
        Ok(report)
    }
}

pub struct SyncEngine {
    source: Arc<dyn CatalogSource>,
    relay: Arc<ImageRelay>,
    registry: CatalogRegistry,
    documents: JsonDocumentStore,
    reports_dir: PathBuf,
    options: RunOptions,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        relay: ImageRelay,
        registry: CatalogRegistry,
        data_dir: impl Into<PathBuf>,
        reports_dir: impl Into<PathBuf>,
        options: RunOptions,
    ) -> Self {
        Self {
            source,
            relay: Arc::new(relay),
            registry,
            documents: JsonDocumentStore::new(data_dir),
            reports_dir: reports_dir.into(),
            options,
        }
    }

    /// Wire the live or fixture source and the relay from configuration.
    pub async fn from_config(config: &SyncConfig) -> Result<Self> {
        let registry = CatalogRegistry::load(&config.registry_path).await?;
        let source: Arc<dyn CatalogSource> = match registry.source {
            SourceKind::Fixture => {
                let path = registry
                    .fixture_path
                    .as_deref()
                    .context("fixture source configured without fixture_path")?;
                Arc::new(FixtureSource::from_path(path)?)
            }
            SourceKind::Official => {
                let http = HttpFetcher::new(HttpClientConfig {
                    timeout: Duration::from_secs(config.http_timeout_secs),
                    user_agent: Some(config.user_agent.clone()),
                    ..Default::default()
                })?;
                Arc::new(OfficialSiteSource::new(Arc::new(http), registry.templates.clone()))
            }
        };
        let relay = match CloudinaryConfig::from_env() {
            Some(cloudinary) => ImageRelay::new(
                Arc::new(CloudinaryTransport::new(cloudinary)?),
                RateLimitFlag::new(),
                registry.relay_folder.clone(),
            ),
            None => {
                info!("relay credentials not configured; images pass through");
                ImageRelay::disabled(registry.relay_folder.clone())
            }
        };
        Ok(Self::new(
            source,
            relay,
            registry,
            config.data_dir.clone(),
            config.reports_dir.clone(),
            RunOptions::from_config(config),
        ))
    }

    pub fn registry(&self) -> &CatalogRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> AuditScheduler {
        let run_date = self.options.run_date.unwrap_or_else(|| Utc::now().date_naive());
        AuditScheduler::new(self.registry.audit_period_days, self.options.full_audit, run_date)
    }

    /// Probe every known prefix. The set list is persisted only after a complete pass.
    pub async fn discover_sets(&self, budget: &RunBudget) -> Result<DiscoveryResult> {
        let last_known_good = load_sets(&self.documents).await;
        let discoverer = SetDiscoverer::new(Prober::new(self.source.clone()), self.registry.thresholds);
        let result = discoverer
            .discover_all(&self.registry.prefixes, &last_known_good, budget)
            .await;
        if !result.halted && !result.sets.is_empty() {
            write_sets(&self.documents, &result.sets)
                .await
                .context("writing set list")?;
        }
        Ok(result)
    }

    /// Rolling-schedule view of the last-known-good set list.
    pub async fn schedule(&self) -> Vec<ScheduleRow> {
        let scheduler = self.scheduler();
        load_sets(&self.documents)
            .await
            .iter()
            .map(|set| {
                let code = set.code();
                ScheduleRow {
                    scheduled_day: scheduler.scheduled_day(&code),
                    due_today: scheduler.full_audit(&code),
                    set_code: code,
                }
            })
            .collect()
    }

    pub async fn run(&self) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let budget = RunBudget::new(self.options.max_runtime);
        let scheduler = self.scheduler();
        info!(
            %run_id,
            source = self.source.source_id(),
            full_audit = self.options.full_audit,
            audit_day = scheduler.today(),
            "sync run starting"
        );

        let mut store = ReconciliationStore::load(self.documents.clone(), self.options.checkpoint_every).await;
        let purged = store
            .purge_invalid()
            .await
            .context("writing checkpoint after integrity purge")?;

        let discovery = self.discover_sets(&budget).await?;

        let deck_codes = discovery
            .sets
            .iter()
            .filter(|set| self.registry.is_deck_prefix(&set.prefix))
            .map(SetDescriptor::code)
            .collect::<Vec<_>>();
        let prior_decks = load_decks(&self.documents).await;
        let decks = DeckSynchronizer::new(self.source.clone(), self.options.deck_backoff)
            .context("compiling deck row pattern")?
            .sync(&deck_codes, &prior_decks, &budget)
            .await;
        if decks.decks != prior_decks {
            write_decks(&self.documents, &decks.decks)
                .await
                .context("writing decks")?;
        }

        let store = Arc::new(Mutex::new(store));
        let worker = Arc::new(SetWorker {
            scraper: ItemScraper::new(
                Prober::new(self.source.clone()),
                self.registry.thresholds.variant_cap,
                self.relay.clone(),
                Arc::new(decks.index.clone()),
            ),
            store: store.clone(),
            scheduler,
            budget: budget.clone(),
            item_miss_threshold: self.registry.thresholds.item_miss_threshold,
        });

        let pool = Arc::new(Semaphore::new(self.options.set_workers.max(1)));
        let mut tasks = JoinSet::new();
        for set in discovery.sets.iter().cloned() {
            let worker = worker.clone();
            let pool = pool.clone();
            tasks.spawn(async move {
                let _permit = pool
                    .acquire_owned()
                    .await
                    .map_err(|_| anyhow!("set worker pool closed"))?;
                worker.process_set(set).await
            });
        }

        let mut set_reports = Vec::with_capacity(discovery.sets.len());
        while let Some(joined) = tasks.join_next().await {
            set_reports.push(joined.context("set worker panicked")??);
        }
        set_reports.sort_by(|a, b| a.set_code.cmp(&b.set_code));

        let mut store = store.lock().await;
        store.checkpoint().await.context("writing final checkpoint")?;

        let mut items = ItemCounts::default();
        for report in &set_reports {
            items.absorb(&report.items);
        }

        let report_docs = JsonDocumentStore::new(self.reports_dir.join(run_id.to_string()));
        let summary = SyncRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            source_id: self.source.source_id().to_string(),
            full_audit_flag: self.options.full_audit,
            audit_period: scheduler.period(),
            audit_day: scheduler.today(),
            sets_discovered: discovery.sets.len(),
            fallback_prefixes: discovery.fallback_prefixes.clone(),
            sets_fully_audited: set_reports.iter().filter(|r| r.full_audit && !r.halted).count(),
            decks: decks.decks.len(),
            deck_stats: decks.stats.clone(),
            items,
            purged,
            checkpoints: store.checkpoints(),
            mirror_entries: store.len(),
            relay_degraded: self.relay.flag().is_tripped(),
            halted_by_budget: budget.is_exhausted(),
            sets: set_reports,
            report_path: report_docs.path_for(SUMMARY_FILE).display().to_string(),
        };
        report_docs
            .write(SUMMARY_FILE, &summary)
            .await
            .context("writing run summary")?;

        info!(
            %run_id,
            new = summary.items.new,
            changed = summary.items.changed,
            unchanged = summary.items.unchanged,
            skipped = summary.items.skipped,
            mirror_entries = summary.mirror_entries,
            halted_by_budget = summary.halted_by_budget,
            "sync run finished"
        );
        Ok(summary)
    }
}
