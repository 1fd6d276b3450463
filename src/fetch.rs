//! Fetching through the pool.
//!
//! [`ProxyFetcher`] is the single-proxy primitive: one GET through one proxy,
//! 200 or failure. [`FetchOrchestrator`] turns it into a fetch that survives
//! individual proxies failing, either by walking the pool in preference order
//! or by racing many proxies at once.

use crate::config::{FetchStrategy, ProxyPoolConfig};
use crate::error::{AttemptFailure, FetchError, ProxyError};
use crate::proxy::Proxy;
use crate::store::ProxyStore;

use async_trait::async_trait;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use std::collections::HashSet;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// One GET through one proxy.
#[async_trait]
pub trait ProxyFetcher: Send + Sync {
    /// Fetch `url` through `proxy`, returning the body of a 200 response.
    ///
    /// Any other status, and any dial, TLS or timeout error, is a failure.
    async fn fetch(
        &self,
        proxy: &Proxy,
        url: &str,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<String, ProxyError>;
}

/// [`ProxyFetcher`] backed by a per-proxy reqwest client.
#[derive(Debug, Clone, Default)]
pub struct ReqwestFetcher {
    accept_invalid_certs: bool,
}

impl ReqwestFetcher {
    pub fn new(accept_invalid_certs: bool) -> Self {
        Self { accept_invalid_certs }
    }

    fn client(&self, proxy: &Proxy, timeout: Duration) -> Result<Client, ProxyError> {
        let client = Client::builder()
            .proxy(proxy.to_reqwest_proxy()?)
            .timeout(timeout)
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .build()?;
        Ok(client)
    }
}

#[async_trait]
impl ProxyFetcher for ReqwestFetcher {
    async fn fetch(
        &self,
        proxy: &Proxy,
        url: &str,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<String, ProxyError> {
        let client = self.client(proxy, timeout)?;
        let response = client.get(url).headers(headers.clone()).send().await?;
        if response.status() != StatusCode::OK {
            return Err(ProxyError::Status(response.status()));
        }
        Ok(response.text().await?)
    }
}

/// Run one rate-limited, time-bounded attempt.
async fn attempt(
    fetcher: &dyn ProxyFetcher,
    limiter: &DefaultKeyedRateLimiter<Proxy>,
    proxy: &Proxy,
    url: &str,
    headers: &HeaderMap,
    timeout: Duration,
) -> Result<String, ProxyError> {
    limiter.until_key_ready(proxy).await;
    match tokio::time::timeout(timeout, fetcher.fetch(proxy, url, headers, timeout)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ProxyError::Timeout(timeout)),
    }
}

/// Resilient fetch over the shared proxy store.
pub struct FetchOrchestrator {
    store: Arc<ProxyStore>,
    fetcher: Arc<dyn ProxyFetcher>,
    config: Arc<ProxyPoolConfig>,
    limiter: Arc<DefaultKeyedRateLimiter<Proxy>>,
    recheck: Arc<Notify>,
}

impl FetchOrchestrator {
    pub fn new(store: Arc<ProxyStore>, fetcher: Arc<dyn ProxyFetcher>, config: Arc<ProxyPoolConfig>) -> Self {
        let per_second = NonZeroU32::new(config.max_requests_per_second.ceil() as u32).unwrap_or(NonZeroU32::MIN);
        Self {
            store,
            fetcher,
            config,
            limiter: Arc::new(RateLimiter::keyed(Quota::per_second(per_second))),
            recheck: Arc::new(Notify::new()),
        }
    }

    /// Signalled every time a live fetch evicts a proxy.
    pub fn recheck_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.recheck)
    }

    /// Fetch `url` with the configured strategy.
    pub async fn fetch(&self, url: &str, headers: &HeaderMap) -> Result<String, FetchError> {
        let result = match self.config.fetch_strategy {
            FetchStrategy::Sequential => self.fetch_sequential(url, headers).await,
            FetchStrategy::Race => self.fetch_race(url, headers).await,
        };
        self.limiter.retain_recent();
        result
    }

    /// Try preferred proxies best-first, then up to `retry_count` random candidates.
    ///
    /// A proxy that fails is evicted before the next one is tried.
    pub async fn fetch_sequential(&self, url: &str, headers: &HeaderMap) -> Result<String, FetchError> {
        let counts = self.store.counts();
        if counts.is_empty() {
            warn!("No proxy available. Candidates: {}, Preferred: {}", counts.candidates, counts.preferred);
            return Err(FetchError::PoolEmpty);
        }

        let mut failures = Vec::new();
        let mut tried = HashSet::new();

        for proxy in self.store.preferred_ranked() {
            // another caller may have evicted it since the snapshot
            if !self.store.is_preferred(&proxy) {
                continue;
            }
            tried.insert(proxy.clone());
            match self.try_proxy(&proxy, url, headers, failures.len() + 1).await {
                Ok(body) => return Ok(body),
                Err(error) => failures.push(self.evict(proxy, error)),
            }
        }

        for _ in 0..self.config.retry_count {
            let Some(proxy) = self.untried_candidate(&tried) else {
                break;
            };
            tried.insert(proxy.clone());
            match self.try_proxy(&proxy, url, headers, failures.len() + 1).await {
                Ok(body) => return Ok(body),
                Err(error) => failures.push(self.evict(proxy, error)),
            }
        }

        if failures.is_empty() {
            return Err(FetchError::PoolEmpty);
        }
        Err(FetchError::Exhausted(failures))
    }

    /// Race up to `race_fanout` proxies and return the first success.
    ///
    /// Losing attempts are cancelled, not abandoned: this returns only after
    /// every sibling has stopped.
    pub async fn fetch_race(&self, url: &str, headers: &HeaderMap) -> Result<String, FetchError> {
        let field = self.race_field();
        if field.is_empty() {
            let counts = self.store.counts();
            warn!("No proxy available. Candidates: {}, Preferred: {}", counts.candidates, counts.preferred);
            return Err(FetchError::PoolEmpty);
        }
        debug!("Racing {} proxies for {}", field.len(), url);

        let cancel = CancellationToken::new();
        let mut attempts = JoinSet::new();
        for proxy in field {
            let fetcher = Arc::clone(&self.fetcher);
            let limiter = Arc::clone(&self.limiter);
            let cancel = cancel.clone();
            let url = url.to_string();
            let headers = headers.clone();
            let timeout = self.config.fetch_timeout;
            attempts.spawn(async move {
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => Err(ProxyError::Cancelled),
                    outcome = attempt(fetcher.as_ref(), &limiter, &proxy, &url, &headers, timeout) => outcome,
                };
                (proxy, outcome)
            });
        }

        let deadline = tokio::time::sleep(self.config.race_deadline);
        tokio::pin!(deadline);
        let mut failures = Vec::new();

        let result = loop {
            tokio::select! {
                joined = attempts.join_next() => match joined {
                    None => break Err(FetchError::Exhausted(std::mem::take(&mut failures))),
                    Some(Ok((proxy, Ok(body)))) => {
                        info!("Race won by proxy {}", proxy);
                        break Ok(body);
                    }
                    Some(Ok((_, Err(ProxyError::Cancelled)))) => {}
                    Some(Ok((proxy, Err(error)))) => {
                        warn!("Request failed with proxy {}: {}", proxy, error);
                        failures.push(self.evict(proxy, error));
                    }
                    Some(Err(e)) => warn!("Race attempt aborted: {}", e),
                },
                _ = &mut deadline => {
                    warn!("No proxy answered within {:?}", self.config.race_deadline);
                    break Err(FetchError::DeadlineExceeded {
                        deadline: self.config.race_deadline,
                        failures: std::mem::take(&mut failures),
                    });
                }
            }
        };

        cancel.cancel();
        while attempts.join_next().await.is_some() {}
        result
    }

    /// A random candidate not in `tried`.
    ///
    /// A refresh may reinstall a proxy this call already evicted; when the
    /// random pick is one of those, fall back to the first untried candidate.
    fn untried_candidate(&self, tried: &HashSet<Proxy>) -> Option<Proxy> {
        match self.store.random_candidate() {
            Some(proxy) if !tried.contains(&proxy) => Some(proxy),
            Some(_) => self.store.candidates().into_iter().find(|proxy| !tried.contains(proxy)),
            None => None,
        }
    }

    /// Preferred proxies best-first, then shuffled candidates, capped at the fanout.
    fn race_field(&self) -> Vec<Proxy> {
        let mut field = self.store.preferred_ranked();
        let preferred: HashSet<_> = field.iter().cloned().collect();
        let mut candidates: Vec<_> = self
            .store
            .candidates()
            .into_iter()
            .filter(|proxy| !preferred.contains(proxy))
            .collect();
        candidates.shuffle(&mut rand::rng());
        field.extend(candidates);
        field.truncate(self.config.race_fanout);
        field
    }

    async fn try_proxy(
        &self,
        proxy: &Proxy,
        url: &str,
        headers: &HeaderMap,
        attempt_no: usize,
    ) -> Result<String, ProxyError> {
        info!("Using proxy: {} (attempt {})", proxy, attempt_no);
        let outcome = attempt(
            self.fetcher.as_ref(),
            &self.limiter,
            proxy,
            url,
            headers,
            self.config.fetch_timeout,
        )
        .await;
        if let Err(error) = &outcome {
            warn!("Request failed with proxy {} (attempt {}): {}", proxy, attempt_no, error);
        }
        outcome
    }

    fn evict(&self, proxy: Proxy, error: ProxyError) -> AttemptFailure {
        self.store.remove(&proxy);
        self.recheck.notify_one();
        AttemptFailure { proxy, error }
    }
}
