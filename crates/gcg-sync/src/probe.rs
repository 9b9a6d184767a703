//! Existence prober: folds every failure mode of one remote lookup into `Missing`.

use std::sync::Arc;

use gcg_adapters::{AssetProbe, CatalogSource, DetailDocument, SourceError};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    NotFound,
    SoftRedirect,
    /// Fetch succeeded but the content marker (name, image content type) was absent.
    NoMarker,
    Transport,
}

impl MissReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissReason::NotFound => "not_found",
            MissReason::SoftRedirect => "soft_redirect",
            MissReason::NoMarker => "no_marker",
            MissReason::Transport => "transport",
        }
    }

    fn from_source_error(err: &SourceError) -> Self {
        match err {
            SourceError::SoftNotFound { .. } => MissReason::SoftRedirect,
            SourceError::Parse { .. } => MissReason::NoMarker,
            err if err.is_transient() => MissReason::Transport,
            SourceError::HttpStatus { .. } => MissReason::NotFound,
            SourceError::Transport { .. } => MissReason::Transport,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome<T> {
    Found(T),
    Missing(MissReason),
}

impl<T> ProbeOutcome<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, ProbeOutcome::Found(_))
    }

    pub fn found(self) -> Option<T> {
        match self {
            ProbeOutcome::Found(value) => Some(value),
            ProbeOutcome::Missing(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct Prober {
    source: Arc<dyn CatalogSource>,
}

impl Prober {
    pub fn new(source: Arc<dyn CatalogSource>) -> Self {
        Self { source }
    }

    /// Found only when the page fetched, was not a listing redirect, and carries a name.
    pub async fn probe_detail(&self, item_id: &str) -> ProbeOutcome<DetailDocument> {
        match self.source.fetch_detail(item_id).await {
            Ok(doc) if doc.has_name() => ProbeOutcome::Found(doc),
            Ok(_) => Self::miss(item_id, MissReason::NoMarker, None),
            Err(err) => Self::miss(item_id, MissReason::from_source_error(&err), Some(&err)),
        }
    }

    /// Found only when the asset answered with an image content type.
    pub async fn probe_asset(&self, asset_id: &str) -> ProbeOutcome<AssetProbe> {
        match self.source.check_asset(asset_id).await {
            Ok(asset) if asset.is_image() => ProbeOutcome::Found(asset),
            Ok(_) => Self::miss(asset_id, MissReason::NoMarker, None),
            Err(err) => Self::miss(asset_id, MissReason::from_source_error(&err), Some(&err)),
        }
    }

    fn miss<T>(id: &str, reason: MissReason, err: Option<&SourceError>) -> ProbeOutcome<T> {
        match err {
            Some(err) => debug!(id, reason = reason.as_str(), error = %err, "probe miss"),
            None => debug!(id, reason = reason.as_str(), "probe miss"),
        }
        ProbeOutcome::Missing(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcg_adapters::{FixtureCatalog, FixtureSource, LabelValue};

    fn prober() -> Prober {
        let mut catalog = FixtureCatalog::default();
        catalog.details.insert(
            "GD01-001".into(),
            DetailDocument {
                name: Some("Gundam".into()),
                pairs: vec![LabelValue::new("AP", "3")],
            },
        );
        catalog.details.insert(
            "GD01-002".into(),
            DetailDocument {
                name: Some("   ".into()),
                pairs: vec![],
            },
        );
        catalog.details.insert("GD01-003".into(), DetailDocument::default());
        catalog.soft_redirects.insert("GD01-003".into());
        catalog.flaky.insert("GD01-004".into(), 1);
        catalog.assets.insert("GD01-001".into());
        Prober::new(Arc::new(FixtureSource::new(catalog)))
    }

    #[tokio::test]
    async fn found_requires_a_named_page() {
        let prober = prober();
        assert!(prober.probe_detail("GD01-001").await.is_found());
        assert_eq!(
            prober.probe_detail("GD01-002").await,
            ProbeOutcome::Missing(MissReason::NoMarker)
        );
    }

    #[tokio::test]
    async fn every_failure_is_folded_into_missing() {
        let prober = prober();
        assert_eq!(
            prober.probe_detail("GD01-003").await,
            ProbeOutcome::Missing(MissReason::SoftRedirect)
        );
        assert_eq!(
            prober.probe_detail("GD01-004").await,
            ProbeOutcome::Missing(MissReason::Transport)
        );
        assert_eq!(
            prober.probe_detail("GD01-099").await,
            ProbeOutcome::Missing(MissReason::NotFound)
        );
    }

    #[tokio::test]
    async fn asset_probe_checks_existence_only() {
        let prober = prober();
        let found = prober.probe_asset("GD01-001").await.found().expect("asset");
        assert!(found.url.ends_with("GD01-001.webp"));
        assert!(!prober.probe_asset("GD01-001_p1").await.is_found());
    }
}
