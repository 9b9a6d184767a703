use anyhow::Result;
use clap::{Parser, Subcommand};
use gcg_sync::{RunBudget, SyncConfig, SyncEngine};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "gcg-cli", version)]
#[command(about = "Gundam card game catalog mirror")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Discover sets, refresh decks and reconcile the local mirror.
    Sync {
        /// Re-scrape every item of every set regardless of the rolling schedule.
        #[arg(long)]
        full_audit: bool,
        /// Override GCG_MAX_RUNTIME_SECS for this run.
        #[arg(long)]
        max_runtime_secs: Option<u64>,
    },
    /// Probe every configured prefix and print the sets found.
    Discover,
    /// Print the rolling audit day of every known set.
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .try_init();

    let cli = Cli::parse();
    let mut config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync {
        full_audit: false,
        max_runtime_secs: None,
    }) {
        Commands::Sync {
            full_audit,
            max_runtime_secs,
        } => {
            config.full_audit |= full_audit;
            if let Some(secs) = max_runtime_secs {
                config.max_runtime_secs = secs;
            }
            let summary = SyncEngine::from_config(&config).await?.run().await?;
            println!(
                "sync complete: run_id={} sets={} new={} changed={} unchanged={} skipped={} entries={} report={}",
                summary.run_id,
                summary.sets_discovered,
                summary.items.new,
                summary.items.changed,
                summary.items.unchanged,
                summary.items.skipped,
                summary.mirror_entries,
                summary.report_path
            );
            if summary.halted_by_budget {
                println!("run halted by the runtime budget; the next run resumes from the mirror");
            }
        }
        Commands::Discover => {
            let engine = SyncEngine::from_config(&config).await?;
            let result = engine.discover_sets(&RunBudget::new(config.max_runtime())).await?;
            for set in &result.sets {
                println!("{}\t{:?}\tceiling={}", set.code(), set.discovery_mode, set.item_ceiling);
            }
            if !result.fallback_prefixes.is_empty() {
                println!("fallback to last-known sets: {}", result.fallback_prefixes.join(", "));
            }
            info!(sets = result.sets.len(), halted = result.halted, "discovery finished");
        }
        Commands::Schedule => {
            let engine = SyncEngine::from_config(&config).await?;
            let scheduler = engine.scheduler();
            println!("audit day {} of {}", scheduler.today(), scheduler.period());
            for row in engine.schedule().await {
                let due = if row.due_today { "due" } else { "" };
                println!("{}\tday {}\t{}", row.set_code, row.scheduled_day, due);
            }
        }
    }

    Ok(())
}
