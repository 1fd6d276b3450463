//! Health checking: probe proxies against a known-good endpoint and keep the
//! preferred set scored.

use crate::config::ProxyPoolConfig;
use crate::error::ProxyError;
use crate::fetch::ProxyFetcher;
use crate::proxy::Proxy;
use crate::store::{ProbeVerdict, ProxyStore};

use log::{debug, info, warn};
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// What a single health check did to a proxy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbeOutcome {
    /// Probe passed; the proxy is preferred with `score`.
    Promoted { latency: Duration, score: f64 },
    /// Probe failed but the proxy keeps a lowered reputation.
    Demoted { score: f64 },
    /// Probe failed and the proxy left both sets.
    Evicted,
}

/// Tally of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub promoted: usize,
    /// Promotions of proxies that were not preferred before the sweep.
    pub newly_promoted: usize,
    pub demoted: usize,
    pub evicted: usize,
    /// The sweep did no work: the preferred set was full or there was nothing to probe.
    pub skipped: bool,
}

/// Probes proxies and applies the results to the store.
#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<ProxyStore>,
    fetcher: Arc<dyn ProxyFetcher>,
    config: Arc<ProxyPoolConfig>,
}

impl HealthChecker {
    pub fn new(store: Arc<ProxyStore>, fetcher: Arc<dyn ProxyFetcher>, config: Arc<ProxyPoolConfig>) -> Self {
        Self { store, fetcher, config }
    }

    /// Probe `proxy` against the health check URL.
    ///
    /// Tries up to `probe_attempts` times; the timeout and the pause between
    /// tries both double after every failure. Returns the latency of the
    /// successful try.
    pub async fn probe(&self, proxy: &Proxy) -> Result<Duration, ProxyError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/plain"));

        let url = &self.config.health_check_url;
        let mut timeout = self.config.health_check_timeout;
        let mut backoff = self.config.probe_backoff;
        let mut attempt = 1;

        loop {
            let start = Instant::now();
            let outcome = match time::timeout(timeout, self.fetcher.fetch(proxy, url, &headers, timeout)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ProxyError::Timeout(timeout)),
            };

            match outcome {
                Ok(_) => {
                    let latency = start.elapsed();
                    debug!("Proxy {} healthy, response time {} ms", proxy, latency.as_millis());
                    return Ok(latency);
                }
                Err(e) if attempt >= self.config.probe_attempts => {
                    debug!("Proxy {} failed {} probes, last: {}", proxy, attempt, e);
                    return Err(e);
                }
                Err(e) => debug!("Probe {} of proxy {} failed: {}", attempt, proxy, e),
            }

            time::sleep(backoff).await;
            backoff *= 2;
            timeout *= 2;
            attempt += 1;
        }
    }

    /// Probe `proxy` and record the result in the store.
    pub async fn check(&self, proxy: &Proxy) -> ProbeOutcome {
        match self.probe(proxy).await {
            Ok(latency) => {
                let score = self.store.record_probe_success(proxy, latency);
                ProbeOutcome::Promoted { latency, score }
            }
            Err(e) => match self.store.record_probe_failure(proxy) {
                ProbeVerdict::Evicted => {
                    info!("Proxy {} evicted after failed health check: {}", proxy, e);
                    ProbeOutcome::Evicted
                }
                ProbeVerdict::Kept { score } => {
                    debug!("Proxy {} demoted to score {}", proxy, score);
                    ProbeOutcome::Demoted { score }
                }
            },
        }
    }

    /// Probe the pool once, preferred proxies first, then shuffled candidates.
    ///
    /// Skipped entirely while the preferred set holds `preferred_target`
    /// proxies. Stops launching probes once `new_preferred_per_sweep` new
    /// proxies were promoted, the target is reached, or `shutdown` fires;
    /// probes already running are allowed to finish.
    pub async fn sweep(&self, shutdown: &CancellationToken) -> SweepReport {
        let counts = self.store.counts();
        if counts.preferred >= self.config.preferred_target {
            debug!(
                "Skipping health check: {} preferred proxies already (target {})",
                counts.preferred, self.config.preferred_target
            );
            return SweepReport {
                skipped: true,
                ..SweepReport::default()
            };
        }

        let mut queue = self.store.preferred_ranked();
        let known: HashSet<Proxy> = queue.iter().cloned().collect();
        let mut fresh: Vec<Proxy> = self
            .store
            .candidates()
            .into_iter()
            .filter(|proxy| !known.contains(proxy))
            .collect();
        fresh.shuffle(&mut rand::rng());
        queue.extend(fresh);

        if queue.is_empty() {
            debug!("Skipping health check: pool is empty");
            return SweepReport {
                skipped: true,
                ..SweepReport::default()
            };
        }
        info!("Starting health check for {} proxies", queue.len());

        let stop = shutdown.child_token();
        let found = Arc::new(AtomicUsize::new(0));
        let semaphore = Arc::new(Semaphore::new(self.config.probe_concurrency));
        let mut probes = JoinSet::new();

        for proxy in queue {
            let permit = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            if stop.is_cancelled() {
                break;
            }

            let checker = self.clone();
            let stop = stop.clone();
            let found = Arc::clone(&found);
            let was_preferred = known.contains(&proxy);
            probes.spawn(async move {
                let outcome = checker.check(&proxy).await;
                if !was_preferred && matches!(outcome, ProbeOutcome::Promoted { .. }) {
                    let new = found.fetch_add(1, Ordering::SeqCst) + 1;
                    if checker.enough_found(new) {
                        stop.cancel();
                    }
                }
                drop(permit);
                (was_preferred, outcome)
            });
        }

        let mut report = SweepReport::default();
        while let Some(joined) = probes.join_next().await {
            let (was_preferred, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!("Health probe task failed: {}", e);
                    continue;
                }
            };
            report.probed += 1;
            match outcome {
                ProbeOutcome::Promoted { .. } => {
                    report.promoted += 1;
                    if !was_preferred {
                        report.newly_promoted += 1;
                    }
                }
                ProbeOutcome::Demoted { .. } => report.demoted += 1,
                ProbeOutcome::Evicted => report.evicted += 1,
            }
        }

        info!(
            "Health check completed: {} probed, {} healthy ({} new), {} evicted",
            report.probed, report.promoted, report.newly_promoted, report.evicted
        );
        report
    }

    fn enough_found(&self, new: usize) -> bool {
        let limit = self.config.new_preferred_per_sweep;
        (limit > 0 && new >= limit) || self.store.counts().preferred >= self.config.preferred_target
    }

    /// Sweep every `health_check_interval`, and whenever `recheck` is
    /// signalled, until `shutdown` fires. The first sweep starts immediately.
    pub async fn run(self, recheck: Arc<Notify>, shutdown: CancellationToken) {
        let mut interval = time::interval(self.config.health_check_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
                _ = recheck.notified() => debug!("Health check requested after a failed fetch"),
            }
            self.sweep(&shutdown).await;

            let counts = self.store.counts();
            info!(
                "Proxy pool status update: {}/{} preferred proxies",
                counts.preferred, counts.candidates
            );
        }
        info!("Health checker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyPoolConfigBuilder;
    use crate::store::{ReputationPolicy, ScoringPolicy};
    use crate::testkit::{self, Reply, ScriptedFetcher};
    use tokio_test::{assert_err, assert_ok};

    fn base() -> ProxyPoolConfigBuilder {
        ProxyPoolConfig::builder()
            .health_check_url("http://probe.test/")
            .health_check_timeout(Duration::from_secs(2))
            .probe_backoff(Duration::from_millis(5))
    }

    fn checker(store: &Arc<ProxyStore>, fetcher: &Arc<ScriptedFetcher>, config: ProxyPoolConfigBuilder) -> HealthChecker {
        HealthChecker::new(Arc::clone(store), fetcher.clone(), Arc::new(config.build()))
    }

    #[tokio::test]
    async fn probe_retries_then_succeeds() {
        testkit::init_logger();
        let store = Arc::new(ProxyStore::default());
        let fetcher = Arc::new(ScriptedFetcher::new(Reply::body("ok")));
        fetcher.script([Reply::Fail, Reply::Fail, Reply::body("ok")]);
        let checker = checker(&store, &fetcher, base());

        assert_ok!(checker.probe(&testkit::proxy(1)).await);
        assert_eq!(fetcher.calls().len(), 3);
        assert!(fetcher.urls().iter().all(|url| url == "http://probe.test/"));
    }

    #[tokio::test]
    async fn probe_gives_up_after_budget() {
        testkit::init_logger();
        let store = Arc::new(ProxyStore::default());
        let fetcher = Arc::new(ScriptedFetcher::new(Reply::Fail));
        let checker = checker(&store, &fetcher, base().probe_attempts(2));

        assert_err!(checker.probe(&testkit::proxy(1)).await);
        assert_eq!(fetcher.calls().len(), 2);
    }

    #[tokio::test]
    async fn probe_timeout_doubles() {
        testkit::init_logger();
        let store = Arc::new(ProxyStore::default());
        let fetcher = Arc::new(ScriptedFetcher::new(Reply::Hang));
        fetcher.script([Reply::delayed(Duration::from_millis(60), "slow"), Reply::delayed(Duration::from_millis(60), "slow")]);
        let checker = checker(&store, &fetcher, base().health_check_timeout(Duration::from_millis(40)).probe_attempts(2));

        // 60ms misses the 40ms first try but fits the doubled 80ms second try
        let latency = assert_ok!(checker.probe(&testkit::proxy(1)).await);
        assert!(latency >= Duration::from_millis(60));
        assert_eq!(fetcher.cancelled(), 1);
    }

    #[tokio::test]
    async fn check_promotes_with_latency() {
        testkit::init_logger();
        let store = Arc::new(ProxyStore::default());
        let proxy = testkit::proxy(1);
        store.replace_candidates(vec![proxy.clone()]);
        let fetcher = Arc::new(ScriptedFetcher::new(Reply::delayed(Duration::from_millis(20), "ok")));
        let checker = checker(&store, &fetcher, base());

        let outcome = checker.check(&proxy).await;
        assert!(matches!(outcome, ProbeOutcome::Promoted { .. }));
        assert!(store.score(&proxy).unwrap() >= 20.0);
        assert_eq!(store.best_preferred(), Some(proxy));
    }

    #[tokio::test]
    async fn failed_check_evicts_under_latency_policy() {
        testkit::init_logger();
        let store = Arc::new(ProxyStore::default());
        let proxy = testkit::proxy(1);
        store.replace_candidates(vec![proxy.clone()]);
        store.add_preferred(proxy.clone(), 10.0);
        let fetcher = Arc::new(ScriptedFetcher::new(Reply::Fail));
        let checker = checker(&store, &fetcher, base());

        assert_eq!(checker.check(&proxy).await, ProbeOutcome::Evicted);
        assert!(store.counts().is_empty());
    }

    #[tokio::test]
    async fn three_failed_checks_evict_under_reputation_policy() {
        testkit::init_logger();
        let store = Arc::new(ProxyStore::new(ScoringPolicy::Reputation(ReputationPolicy::default())));
        let proxy = testkit::proxy(1);
        store.replace_candidates(vec![proxy.clone()]);
        let fetcher = Arc::new(ScriptedFetcher::new(Reply::Fail));
        fetcher.script([Reply::body("ok")]);
        let checker = checker(&store, &fetcher, base().probe_attempts(1));

        assert!(matches!(checker.check(&proxy).await, ProbeOutcome::Promoted { score, .. } if score == 1.0));
        assert_eq!(checker.check(&proxy).await, ProbeOutcome::Demoted { score: -1.0 });
        assert_eq!(store.best_preferred(), Some(proxy.clone()));
        assert_eq!(checker.check(&proxy).await, ProbeOutcome::Demoted { score: -3.0 });
        assert_eq!(checker.check(&proxy).await, ProbeOutcome::Evicted);

        assert_eq!(store.best_preferred(), None);
        // still failing: a new failure starts a fresh, unpromoted record
        assert_eq!(checker.check(&proxy).await, ProbeOutcome::Demoted { score: -2.0 });
        assert_eq!(store.best_preferred(), None);
    }

    #[tokio::test]
    async fn sweep_is_skipped_when_preferred_set_is_full() {
        testkit::init_logger();
        let store = Arc::new(ProxyStore::default());
        store.replace_candidates(testkit::proxies(10));
        for proxy in testkit::proxies(3) {
            store.add_preferred(proxy, 5.0);
        }
        let fetcher = Arc::new(ScriptedFetcher::new(Reply::body("ok")));
        let checker = checker(&store, &fetcher, base().preferred_target(3));

        let report = checker.sweep(&CancellationToken::new()).await;
        assert!(report.skipped);
        assert_eq!(fetcher.calls().len(), 0);
    }

    #[tokio::test]
    async fn sweep_stops_after_enough_new_proxies() {
        testkit::init_logger();
        let store = Arc::new(ProxyStore::default());
        store.replace_candidates(testkit::proxies(30));
        let fetcher = Arc::new(ScriptedFetcher::new(Reply::body("ok")));
        let checker = checker(&store, &fetcher, base().probe_concurrency(1).new_preferred_per_sweep(3));

        let report = checker.sweep(&CancellationToken::new()).await;
        assert_eq!(report.newly_promoted, 3);
        assert_eq!(fetcher.calls().len(), 3);
        assert_eq!(store.counts().preferred, 3);
    }

    #[tokio::test]
    async fn sweep_revalidates_preferred_and_bounds_concurrency() {
        testkit::init_logger();
        let store = Arc::new(ProxyStore::default());
        let proxies = testkit::proxies(20);
        store.replace_candidates(proxies.clone());
        store.add_preferred(proxies[0].clone(), 1.0);
        let fetcher = Arc::new(ScriptedFetcher::new(Reply::delayed(Duration::from_millis(20), "ok")));
        fetcher.reply_for(&proxies[0], Reply::Fail);
        let checker = checker(&store, &fetcher, base().probe_concurrency(4).probe_attempts(1).new_preferred_per_sweep(0));

        let report = checker.sweep(&CancellationToken::new()).await;
        assert!(fetcher.calls().contains(&proxies[0]));
        assert_eq!(report.probed, 20);
        assert_eq!(report.evicted, 1);
        assert_eq!(report.newly_promoted, 19);
        assert!(fetcher.peak() <= 4);
        assert!(!store.is_preferred(&proxies[0]));
        assert!(!store.is_candidate(&proxies[0]));
    }

    #[tokio::test]
    async fn run_sweeps_on_start_and_on_recheck() {
        testkit::init_logger();
        let store = Arc::new(ProxyStore::default());
        store.replace_candidates(testkit::proxies(1));
        let fetcher = Arc::new(ScriptedFetcher::new(Reply::Fail));
        let checker = checker(&store, &fetcher, base().health_check_interval(Duration::from_secs(3600)).probe_attempts(1));

        let recheck = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(checker.run(Arc::clone(&recheck), shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fetcher.calls().len(), 1);

        store.replace_candidates(testkit::proxies(2));
        recheck.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fetcher.calls().len(), 3);

        shutdown.cancel();
        assert_ok!(tokio::time::timeout(Duration::from_secs(1), task).await);
    }
}
