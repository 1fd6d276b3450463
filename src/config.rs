//! Configuration for the proxy pool.

use crate::proxy::ProxyScheme;
use crate::store::ScoringPolicy;

use std::time::Duration;

/// Strategy the orchestrator uses to fetch through the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Preferred proxies best-first, then a bounded number of random candidates.
    Sequential,
    /// Fan out to many proxies at once and keep the first success.
    Race,
}

/// Configuration for the proxy pool.
#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// Source URLs or file paths to fetch proxy lists from.
    pub sources: Vec<String>,
    /// Scheme applied to list entries without one.
    pub default_scheme: ProxyScheme,
    /// Interval between candidate refreshes.
    pub refresh_interval: Duration,
    /// Timeout for fetching one proxy list.
    pub source_timeout: Duration,
    /// URL used for health checks.
    pub health_check_url: String,
    /// Interval between health check sweeps.
    pub health_check_interval: Duration,
    /// Timeout of the first probe attempt; doubles on every retry.
    pub health_check_timeout: Duration,
    /// Attempts per probe before the proxy counts as failed.
    pub probe_attempts: usize,
    /// Base delay between probe attempts; doubles on every retry.
    pub probe_backoff: Duration,
    /// Maximum number of probes in flight.
    pub probe_concurrency: usize,
    /// A sweep is skipped while the preferred set holds at least this many proxies.
    pub preferred_target: usize,
    /// A sweep stops after promoting this many new proxies.
    pub new_preferred_per_sweep: usize,
    /// How probe outcomes score proxies.
    pub scoring_policy: ScoringPolicy,
    /// Strategy for fetching through the pool.
    pub fetch_strategy: FetchStrategy,
    /// Timeout for one live fetch attempt.
    pub fetch_timeout: Duration,
    /// Number of random candidates tried after the preferred set is exhausted.
    pub retry_count: usize,
    /// Overall deadline of a race fetch.
    pub race_deadline: Duration,
    /// Maximum number of proxies raced at once.
    pub race_fanout: usize,
    /// Maximum requests per second per proxy.
    pub max_requests_per_second: f64,
    /// Accept invalid TLS certificates on proxied requests.
    pub accept_invalid_certs: bool,
}

impl ProxyPoolConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ProxyPoolConfigBuilder {
        ProxyPoolConfigBuilder::new()
    }
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        ProxyPoolConfigBuilder::new().build()
    }
}

/// Builder for `ProxyPoolConfig`.
#[derive(Default)]
pub struct ProxyPoolConfigBuilder {
    sources: Vec<String>,
    default_scheme: Option<ProxyScheme>,
    refresh_interval: Option<Duration>,
    source_timeout: Option<Duration>,
    health_check_url: Option<String>,
    health_check_interval: Option<Duration>,
    health_check_timeout: Option<Duration>,
    probe_attempts: Option<usize>,
    probe_backoff: Option<Duration>,
    probe_concurrency: Option<usize>,
    preferred_target: Option<usize>,
    new_preferred_per_sweep: Option<usize>,
    scoring_policy: Option<ScoringPolicy>,
    fetch_strategy: Option<FetchStrategy>,
    fetch_timeout: Option<Duration>,
    retry_count: Option<usize>,
    race_deadline: Option<Duration>,
    race_fanout: Option<usize>,
    max_requests_per_second: Option<f64>,
    accept_invalid_certs: Option<bool>,
}

impl ProxyPoolConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source URLs or file paths to fetch proxy lists from.
    pub fn sources(mut self, sources: Vec<impl Into<String>>) -> Self {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    /// Set the scheme applied to bare `host:port` entries.
    pub fn default_scheme(mut self, scheme: ProxyScheme) -> Self {
        self.default_scheme = Some(scheme);
        self
    }

    /// Set the interval between candidate refreshes.
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    /// Set the timeout for fetching one proxy list.
    pub fn source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = Some(timeout);
        self
    }

    /// Set the URL used for health checks.
    pub fn health_check_url(mut self, url: impl Into<String>) -> Self {
        self.health_check_url = Some(url.into());
        self
    }

    /// Set the interval between health checks.
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = Some(interval);
        self
    }

    /// Set the timeout for health checks.
    pub fn health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout = Some(timeout);
        self
    }

    /// Set the number of attempts per probe.
    pub fn probe_attempts(mut self, attempts: usize) -> Self {
        self.probe_attempts = Some(attempts);
        self
    }

    /// Set the base delay between probe attempts.
    pub fn probe_backoff(mut self, backoff: Duration) -> Self {
        self.probe_backoff = Some(backoff);
        self
    }

    /// Set the maximum number of concurrent probes.
    pub fn probe_concurrency(mut self, concurrency: usize) -> Self {
        self.probe_concurrency = Some(concurrency);
        self
    }

    /// Set the preferred-set size at which sweeps are skipped.
    pub fn preferred_target(mut self, count: usize) -> Self {
        self.preferred_target = Some(count);
        self
    }

    /// Set how many new proxies a sweep promotes before stopping.
    pub fn new_preferred_per_sweep(mut self, count: usize) -> Self {
        self.new_preferred_per_sweep = Some(count);
        self
    }

    /// Set the scoring policy.
    pub fn scoring_policy(mut self, policy: ScoringPolicy) -> Self {
        self.scoring_policy = Some(policy);
        self
    }

    /// Set the fetch strategy.
    pub fn fetch_strategy(mut self, strategy: FetchStrategy) -> Self {
        self.fetch_strategy = Some(strategy);
        self
    }

    /// Set the timeout for one live fetch attempt.
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    /// Set the number of times to retry a request with different proxies.
    pub fn retry_count(mut self, count: usize) -> Self {
        self.retry_count = Some(count);
        self
    }

    /// Set the overall deadline of a race fetch.
    pub fn race_deadline(mut self, deadline: Duration) -> Self {
        self.race_deadline = Some(deadline);
        self
    }

    /// Set how many proxies a race fetch uses at most.
    pub fn race_fanout(mut self, fanout: usize) -> Self {
        self.race_fanout = Some(fanout);
        self
    }

    /// Set the maximum requests per second per proxy.
    pub fn max_requests_per_second(mut self, rps: f64) -> Self {
        self.max_requests_per_second = Some(rps);
        self
    }

    /// Accept invalid TLS certificates on proxied requests.
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = Some(accept);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ProxyPoolConfig {
        ProxyPoolConfig {
            sources: self.sources,
            default_scheme: self.default_scheme.unwrap_or(ProxyScheme::Socks5),
            refresh_interval: self.refresh_interval.unwrap_or(Duration::from_secs(300)),
            source_timeout: self.source_timeout.unwrap_or(Duration::from_secs(10)),
            health_check_url: self.health_check_url.unwrap_or_else(|| "http://ipinfo.io".to_string()),
            health_check_interval: self.health_check_interval.unwrap_or(Duration::from_secs(300)),
            health_check_timeout: self.health_check_timeout.unwrap_or(Duration::from_secs(10)),
            probe_attempts: self.probe_attempts.unwrap_or(3).max(1),
            probe_backoff: self.probe_backoff.unwrap_or(Duration::from_millis(500)),
            // a zero-permit semaphore would never let a probe run
            probe_concurrency: self.probe_concurrency.unwrap_or(10).max(1),
            preferred_target: self.preferred_target.unwrap_or(50),
            new_preferred_per_sweep: self.new_preferred_per_sweep.unwrap_or(10),
            scoring_policy: self.scoring_policy.unwrap_or_default(),
            fetch_strategy: self.fetch_strategy.unwrap_or(FetchStrategy::Sequential),
            fetch_timeout: self.fetch_timeout.unwrap_or(Duration::from_secs(10)),
            retry_count: self.retry_count.unwrap_or(3),
            race_deadline: self.race_deadline.unwrap_or(Duration::from_secs(30)),
            race_fanout: self.race_fanout.unwrap_or(64).max(1),
            max_requests_per_second: self.max_requests_per_second.unwrap_or(5.0),
            accept_invalid_certs: self.accept_invalid_certs.unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ProxyPoolConfig::default();
        assert!(config.sources.is_empty());
        assert_eq!(config.default_scheme, ProxyScheme::Socks5);
        assert_eq!(config.probe_attempts, 3);
        assert_eq!(config.probe_concurrency, 10);
        assert_eq!(config.preferred_target, 50);
        assert_eq!(config.new_preferred_per_sweep, 10);
        assert_eq!(config.fetch_strategy, FetchStrategy::Sequential);
        assert_eq!(config.scoring_policy, ScoringPolicy::Latency);
        assert_eq!(config.race_deadline, Duration::from_secs(30));
    }

    #[test]
    fn zero_concurrency_is_clamped() {
        let config = ProxyPoolConfig::builder()
            .probe_concurrency(0)
            .probe_attempts(0)
            .race_fanout(0)
            .build();
        assert_eq!(config.probe_concurrency, 1);
        assert_eq!(config.probe_attempts, 1);
        assert_eq!(config.race_fanout, 1);
    }

    #[test]
    fn builder_overrides() {
        let config = ProxyPoolConfig::builder()
            .sources(vec!["https://example.com/list.txt", "proxies.txt"])
            .fetch_strategy(FetchStrategy::Race)
            .retry_count(5)
            .build();
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.fetch_strategy, FetchStrategy::Race);
        assert_eq!(config.retry_count, 5);
    }
}
