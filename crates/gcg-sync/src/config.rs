use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use gcg_adapters::SiteTemplates;
use gcg_core::DiscoveryMode;
use serde::{Deserialize, Serialize};
use tokio::fs;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub data_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub registry_path: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub full_audit: bool,
    pub max_runtime_secs: u64,
    pub set_workers: usize,
    pub checkpoint_every: usize,
}

fn env_path(name: &str, default: &str) -> PathBuf {
    std::env::var(name)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True" | "yes"))
        .unwrap_or(false)
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            data_dir: env_path("GCG_DATA_DIR", "./data"),
            reports_dir: env_path("GCG_REPORTS_DIR", "./reports"),
            registry_path: env_path("GCG_REGISTRY_PATH", "./catalog.yaml"),
            user_agent: std::env::var("GCG_USER_AGENT")
                .unwrap_or_else(|_| format!("gcg-mirror/{}", env!("CARGO_PKG_VERSION"))),
            http_timeout_secs: env_parse("GCG_HTTP_TIMEOUT_SECS", 20),
            full_audit: env_flag("GCG_FULL_AUDIT"),
            max_runtime_secs: env_parse("GCG_MAX_RUNTIME_SECS", 3300),
            set_workers: env_parse("GCG_SET_WORKERS", 1usize).max(1),
            checkpoint_every: env_parse("GCG_CHECKPOINT_EVERY", 50usize).max(1),
        }
    }

    pub fn max_runtime(&self) -> Duration {
        Duration::from_secs(self.max_runtime_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Official,
    Fixture,
}

fn default_mode() -> DiscoveryMode {
    DiscoveryMode::Sequential
}

fn default_item_ceiling() -> u32 {
    120
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixConfig {
    pub prefix: String,
    #[serde(default = "default_mode")]
    pub mode: DiscoveryMode,
    #[serde(default = "default_item_ceiling")]
    pub item_ceiling: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Consecutive missing set numbers that end a prefix.
    pub set_miss_threshold: u32,
    /// Consecutive missing items that end a set.
    pub item_miss_threshold: u32,
    pub variant_cap: u32,
    pub max_set_sequence: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            set_miss_threshold: 2,
            item_miss_threshold: 3,
            variant_cap: 20,
            max_set_sequence: 99,
        }
    }
}

fn default_deck_prefixes() -> Vec<String> {
    vec!["ST".to_string()]
}

fn default_audit_period_days() -> u32 {
    7
}

fn default_relay_folder() -> String {
    "gundam_cards".to_string()
}

/// Known identifier families and remote layout, loaded from `catalog.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRegistry {
    pub prefixes: Vec<PrefixConfig>,
    #[serde(default = "default_deck_prefixes")]
    pub deck_prefixes: Vec<String>,
    #[serde(default)]
    pub templates: SiteTemplates,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default = "default_audit_period_days")]
    pub audit_period_days: u32,
    #[serde(default = "default_relay_folder")]
    pub relay_folder: String,
    #[serde(default)]
    pub source: SourceKind,
    /// Fixture catalog JSON, relative to the registry file.
    #[serde(default)]
    pub fixture_path: Option<PathBuf>,
}

impl CatalogRegistry {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let registry: Self = serde_yaml::from_str(text).context("parsing catalog registry")?;
        registry.validate()?;
        Ok(registry)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let mut registry =
            Self::from_yaml(&text).with_context(|| format!("loading {}", path.display()))?;
        if let Some(fixture) = &registry.fixture_path {
            if fixture.is_relative() {
                let base = path.parent().unwrap_or_else(|| Path::new("."));
                registry.fixture_path = Some(base.join(fixture));
            }
        }
        Ok(registry)
    }

    pub fn validate(&self) -> Result<()> {
        if self.prefixes.is_empty() {
            bail!("catalog registry lists no prefixes");
        }
        if let Some(bad) = self.prefixes.iter().find(|p| p.prefix.trim().is_empty()) {
            bail!("catalog registry has an empty prefix (ceiling {})", bad.item_ceiling);
        }
        if self.audit_period_days == 0 {
            bail!("audit_period_days must be at least 1");
        }
        if self.thresholds.set_miss_threshold == 0 || self.thresholds.item_miss_threshold == 0 {
            bail!("miss thresholds must be at least 1");
        }
        if self.source == SourceKind::Fixture && self.fixture_path.is_none() {
            bail!("source: fixture requires fixture_path");
        }
        Ok(())
    }

    pub fn is_deck_prefix(&self, prefix: &str) -> bool {
        self.deck_prefixes.iter().any(|p| p == prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = r#"
prefixes:
  - prefix: GD
    item_ceiling: 150
  - prefix: ST
    item_ceiling: 40
  - prefix: PR
    mode: flat
thresholds:
  item_miss_threshold: 5
templates:
  detail_url: "https://mirror.test/detail/{id}"
"#;

    #[test]
    fn registry_fills_defaults() {
        let registry = CatalogRegistry::from_yaml(REGISTRY).unwrap();
        assert_eq!(registry.prefixes.len(), 3);
        assert_eq!(registry.prefixes[2].mode, DiscoveryMode::Flat);
        assert_eq!(registry.prefixes[2].item_ceiling, 120);
        assert_eq!(registry.thresholds.item_miss_threshold, 5);
        assert_eq!(registry.thresholds.set_miss_threshold, 2);
        assert_eq!(registry.thresholds.variant_cap, 20);
        assert_eq!(registry.audit_period_days, 7);
        assert_eq!(registry.relay_folder, "gundam_cards");
        assert_eq!(registry.templates.detail_url, "https://mirror.test/detail/{id}");
        assert_eq!(registry.templates.image_url, SiteTemplates::default().image_url);
        assert!(registry.is_deck_prefix("ST"));
        assert_eq!(registry.source, SourceKind::Official);
    }

    #[test]
    fn registry_rejects_nonsense() {
        assert!(CatalogRegistry::from_yaml("prefixes: []").is_err());
        assert!(CatalogRegistry::from_yaml("prefixes: [{prefix: GD}]\naudit_period_days: 0").is_err());
        assert!(CatalogRegistry::from_yaml("prefixes: [{prefix: GD}]\nsource: fixture").is_err());
    }

    #[tokio::test]
    async fn fixture_path_resolves_next_to_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.yaml");
        std::fs::write(
            &path,
            "prefixes: [{prefix: GD}]\nsource: fixture\nfixture_path: fixtures/catalog.json\n",
        )
        .unwrap();
        let registry = CatalogRegistry::load(&path).await.unwrap();
        assert_eq!(
            registry.fixture_path,
            Some(dir.path().join("fixtures/catalog.json"))
        );
    }
}
