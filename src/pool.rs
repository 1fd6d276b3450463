//! The proxy pool facade.

use crate::checker::HealthChecker;
use crate::config::ProxyPoolConfig;
use crate::error::{FetchError, SourceError};
use crate::fetch::{FetchOrchestrator, ProxyFetcher, ReqwestFetcher};
use crate::refresher::Refresher;
use crate::source::{self, ProxySource};
use crate::store::{PoolCounts, ProxyStore};

use log::{info, warn};
use reqwest::header::HeaderMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A self-maintaining pool of proxies that HTTP fetches are routed through.
///
/// The pool owns the store and wires the refresher, health checker and
/// fetch orchestrator to it. Background maintenance starts with
/// [`ProxyPool::start`].
pub struct ProxyPool {
    store: Arc<ProxyStore>,
    orchestrator: FetchOrchestrator,
    checker: HealthChecker,
    sources: Vec<Arc<dyn ProxySource>>,
    /// Configuration for the pool.
    pub config: Arc<ProxyPoolConfig>,
}

/// Handles of the loops spawned by [`ProxyPool::start`].
pub struct BackgroundTasks {
    refresher: JoinHandle<()>,
    checker: JoinHandle<()>,
}

impl BackgroundTasks {
    /// Wait for both loops to exit after their shutdown token fired.
    pub async fn join(self) {
        if let Err(e) = self.refresher.await {
            warn!("Proxy refresher task failed: {}", e);
        }
        if let Err(e) = self.checker.await {
            warn!("Health checker task failed: {}", e);
        }
    }
}

impl ProxyPool {
    /// Create a pool that fetches through real proxies with reqwest.
    pub fn new(config: ProxyPoolConfig) -> Result<Arc<Self>, SourceError> {
        let sources = source::sources_from_config(&config)?;
        let fetcher = Arc::new(ReqwestFetcher::new(config.accept_invalid_certs));
        Ok(Self::with_parts(config, fetcher, sources))
    }

    /// Create a pool from explicit collaborators.
    pub fn with_parts(
        config: ProxyPoolConfig,
        fetcher: Arc<dyn ProxyFetcher>,
        sources: Vec<Arc<dyn ProxySource>>,
    ) -> Arc<Self> {
        let config = Arc::new(config);
        let store = Arc::new(ProxyStore::new(config.scoring_policy));
        Arc::new(Self {
            orchestrator: FetchOrchestrator::new(Arc::clone(&store), Arc::clone(&fetcher), Arc::clone(&config)),
            checker: HealthChecker::new(Arc::clone(&store), fetcher, Arc::clone(&config)),
            store,
            sources,
            config,
        })
    }

    /// Load the candidate list once, then spawn the refresh and health check
    /// loops. Both stop when `shutdown` is cancelled.
    pub async fn start(self: &Arc<Self>, shutdown: &CancellationToken) -> BackgroundTasks {
        let refresher = self.refresher();
        match refresher.refresh().await {
            Ok(count) => info!("Initial proxy pool loaded with {} candidates", count),
            Err(e) => warn!("Initial proxy refresh failed, starting with an empty pool: {}", e),
        }

        let recheck = self.orchestrator.recheck_signal();
        BackgroundTasks {
            refresher: tokio::spawn(refresher.run(shutdown.clone())),
            checker: tokio::spawn(self.checker.clone().run(recheck, shutdown.clone())),
        }
    }

    /// Fetch `url` through the pool with the configured strategy.
    pub async fn fetch(&self, url: &str, headers: &HeaderMap) -> Result<String, FetchError> {
        self.orchestrator.fetch(url, headers).await
    }

    /// Candidate and preferred set sizes.
    pub fn get_stats(&self) -> PoolCounts {
        self.store.counts()
    }

    pub fn store(&self) -> &Arc<ProxyStore> {
        &self.store
    }

    pub fn checker(&self) -> &HealthChecker {
        &self.checker
    }

    fn refresher(&self) -> Refresher {
        Refresher::new(Arc::clone(&self.store), self.sources.clone(), Arc::clone(&self.config))
    }
}
