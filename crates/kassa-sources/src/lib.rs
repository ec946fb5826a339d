//! kassa-sources
//!
//! The five revenue-channel adapters behind one [`SourceAdapter`] contract,
//! the credential resolver they depend on, the business-day window, and the
//! [`Aggregator`] that fans out to all of them.

mod adapter;
mod aggregator;
mod bearer;
mod click;
mod error;
mod marketplace;
mod pos;
mod resolver;
mod window;

use std::sync::Arc;

use kassa_config::secrets::{LoginSecret, ResolvedSecrets};
use kassa_config::SourcesConfig;

pub use adapter::{amount_field, amount_from_value, SourceAdapter, SourceFetch, SourceRequest};
pub use aggregator::{AggregateOutcome, Aggregator, SourceFailure};
pub use bearer::{BearerProfile, BearerReportAdapter};
pub use click::{ClickAdapter, FrameBuffer, SERVICE_IDS_KEY};
pub use error::SourceError;
pub use marketplace::{MarketplaceAdapter, SessionState, PLACE_ID_KEY};
pub use pos::PosAdapter;
pub use resolver::{CachedResolver, CredentialResolver, Credentials, KeyedByType, ResolvedTerminal, StaticDirectory};
pub use window::BusinessWindow;

/// Build an adapter for every enabled source.
pub fn build_adapters(
    cfg: &SourcesConfig,
    secrets: &ResolvedSecrets,
) -> Result<Vec<Arc<dyn SourceAdapter>>, SourceError> {
    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();

    if cfg.pos.enabled {
        let secret = require(&secrets.pos, "pos")?;
        adapters.push(Arc::new(PosAdapter::new(&cfg.pos, secret)?));
    }
    if cfg.card_gateway.enabled {
        adapters.push(Arc::new(BearerReportAdapter::card_gateway(&cfg.card_gateway)?));
    }
    if cfg.click_gateway.enabled {
        let secret = require(&secrets.click, "click_gateway")?;
        adapters.push(Arc::new(ClickAdapter::new(&cfg.click_gateway, secret)));
    }
    if cfg.marketplace.enabled {
        let secret = require(&secrets.marketplace, "marketplace")?;
        adapters.push(Arc::new(MarketplaceAdapter::new(&cfg.marketplace, secret)?));
    }
    if cfg.courier.enabled {
        adapters.push(Arc::new(BearerReportAdapter::courier(&cfg.courier)?));
    }

    tracing::info!(
        sources = ?adapters.iter().map(|a| a.kind().as_str()).collect::<Vec<_>>(),
        "source adapters ready"
    );
    Ok(adapters)
}

fn require(secret: &Option<LoginSecret>, source: &str) -> Result<LoginSecret, SourceError> {
    secret
        .clone()
        .ok_or_else(|| SourceError::Config(format!("{source}: enabled without login secret")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kassa_schemas::SourceKind;

    #[test]
    fn only_enabled_sources_are_built() {
        let mut cfg = SourcesConfig::default();
        cfg.card_gateway.enabled = true;
        cfg.card_gateway.base_url = "http://127.0.0.1:1".into();
        cfg.courier.enabled = true;
        cfg.courier.base_url = "http://127.0.0.1:1".into();

        let adapters = build_adapters(&cfg, &ResolvedSecrets::default()).unwrap();
        let kinds: Vec<_> = adapters.iter().map(|a| a.kind()).collect();
        assert_eq!(kinds, vec![SourceKind::CardGateway, SourceKind::Courier]);
    }

    #[test]
    fn enabled_login_source_without_secret_is_rejected() {
        let mut cfg = SourcesConfig::default();
        cfg.pos.enabled = true;
        cfg.pos.base_url = "http://127.0.0.1:1".into();
        let err = build_adapters(&cfg, &ResolvedSecrets::default()).err().unwrap();
        assert!(matches!(err, SourceError::Config(_)));
    }
}
