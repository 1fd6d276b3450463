//! Periodic candidate refresh from the configured proxy-list sources.

use crate::config::ProxyPoolConfig;
use crate::error::SourceError;
use crate::source::ProxySource;
use crate::store::ProxyStore;
use crate::utils;

use futures::future;
use log::{info, warn};
use std::sync::Arc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Keeps the candidate set populated from the proxy-list sources.
///
/// Refreshing is fail-open: when nothing usable comes back, the previous
/// candidates stay in place. The preferred set is never touched.
pub struct Refresher {
    store: Arc<ProxyStore>,
    sources: Vec<Arc<dyn ProxySource>>,
    config: Arc<ProxyPoolConfig>,
}

impl Refresher {
    pub fn new(store: Arc<ProxyStore>, sources: Vec<Arc<dyn ProxySource>>, config: Arc<ProxyPoolConfig>) -> Self {
        Self { store, sources, config }
    }

    /// Fetch every source once and replace the candidate set with the union.
    ///
    /// Returns the number of candidates installed.
    pub async fn refresh(&self) -> Result<usize, SourceError> {
        info!("Refreshing proxy pool from {} sources", self.sources.len());

        let timeout = self.config.source_timeout;
        let fetches = self.sources.iter().map(|source| async move {
            let body = match time::timeout(timeout, source.fetch_list()).await {
                Ok(body) => body,
                Err(_) => Err(SourceError::Timeout(timeout)),
            };
            (source.name(), body)
        });

        let mut proxies = Vec::new();
        let mut failed = 0;
        for (name, body) in future::join_all(fetches).await {
            match body {
                Ok(body) => {
                    let parsed = utils::parse_proxy_list(&body, self.config.default_scheme);
                    info!("Fetched {} proxies from {}", parsed.len(), name);
                    proxies.extend(parsed);
                }
                Err(e) => {
                    warn!("Failed to fetch proxies from {}: {}", name, e);
                    failed += 1;
                }
            }
        }

        if failed > 0 && failed == self.sources.len() {
            return Err(SourceError::AllFailed(failed));
        }
        if proxies.is_empty() {
            return Err(SourceError::Empty);
        }

        let installed = self.store.replace_candidates(proxies);
        info!("Candidate set replaced: {} unique proxies", installed);
        Ok(installed)
    }

    /// Refresh every `refresh_interval` until `shutdown` fires.
    ///
    /// The first refresh happens one interval after start; run [`refresh`]
    /// yourself for the eager one.
    ///
    /// [`refresh`]: Refresher::refresh
    pub async fn run(self, shutdown: CancellationToken) {
        let period = self.config.refresh_interval;
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            if let Err(e) = self.refresh().await {
                warn!(
                    "Proxy refresh failed, keeping {} existing candidates: {}",
                    self.store.counts().candidates,
                    e
                );
            }
        }
        info!("Proxy refresher stopped");
    }
}
