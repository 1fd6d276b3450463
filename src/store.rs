//! Shared proxy store: the candidate set and the scored preferred set.
//!
//! All pool state lives behind one lock. Callers only get snapshots out and
//! only change state through the operations below, so a refresh replacing the
//! candidates never races with a checker or orchestrator half-way through an
//! update.

use crate::proxy::Proxy;

use parking_lot::RwLock;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;

/// Additive reputation parameters. Higher scores are better.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReputationPolicy {
    /// Score of a proxy the store has not seen before.
    pub initial: f64,
    /// Added on every successful probe.
    pub reward: f64,
    /// Subtracted on every failed probe.
    pub penalty: f64,
    /// A proxy whose score drops to or below this is evicted.
    pub floor: f64,
}

impl Default for ReputationPolicy {
    fn default() -> Self {
        Self {
            initial: 0.0,
            reward: 1.0,
            penalty: 2.0,
            floor: -5.0,
        }
    }
}

/// How probe results turn into preferred-set scores.
///
/// Exactly one policy is active per store.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ScoringPolicy {
    /// Score is the probe latency in milliseconds; lower is better. A failed
    /// probe evicts immediately.
    #[default]
    Latency,
    /// Score is an additive reputation; higher is better. A failed probe only
    /// evicts once the score reaches the floor.
    Reputation(ReputationPolicy),
}

impl ScoringPolicy {
    /// Order two scores so that the better one sorts first.
    pub fn rank(&self, a: f64, b: f64) -> Ordering {
        match self {
            ScoringPolicy::Latency => a.total_cmp(&b),
            ScoringPolicy::Reputation(_) => b.total_cmp(&a),
        }
    }
}

/// Sizes of the two proxy collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolCounts {
    pub candidates: usize,
    pub preferred: usize,
}

impl PoolCounts {
    /// True when there is no proxy at all to fetch through.
    pub fn is_empty(&self) -> bool {
        self.candidates == 0 && self.preferred == 0
    }
}

/// What a failed probe did to a proxy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbeVerdict {
    /// Still tracked, with its lowered score.
    Kept { score: f64 },
    /// Removed from both sets.
    Evicted,
}

#[derive(Default)]
struct PoolState {
    // Vec + index map gives O(1) uniform sampling and O(1) swap-removal.
    candidates: Vec<Proxy>,
    positions: HashMap<Proxy, usize>,
    preferred: HashMap<Proxy, f64>,
    // Reputation of every probed proxy, preferred or not.
    reputation: HashMap<Proxy, f64>,
}

impl PoolState {
    fn remove_candidate(&mut self, proxy: &Proxy) -> bool {
        let Some(idx) = self.positions.remove(proxy) else {
            return false;
        };
        self.candidates.swap_remove(idx);
        if let Some(moved) = self.candidates.get(idx) {
            self.positions.insert(moved.clone(), idx);
        }
        true
    }

    fn remove_all(&mut self, proxy: &Proxy) -> bool {
        let was_candidate = self.remove_candidate(proxy);
        let was_preferred = self.preferred.remove(proxy).is_some();
        self.reputation.remove(proxy);
        was_candidate || was_preferred
    }
}

/// Concurrency-safe repository of candidate and preferred proxies.
pub struct ProxyStore {
    state: RwLock<PoolState>,
    policy: ScoringPolicy,
}

impl ProxyStore {
    /// Create an empty store scoring with `policy`.
    pub fn new(policy: ScoringPolicy) -> Self {
        Self {
            state: RwLock::new(PoolState::default()),
            policy,
        }
    }

    /// The active scoring policy.
    pub fn policy(&self) -> ScoringPolicy {
        self.policy
    }

    /// Discard the candidate set and install `proxies` in its place.
    ///
    /// Duplicates are collapsed. The preferred set is left untouched.
    /// Reputation of proxies that are now in neither set is dropped. Returns
    /// the number of candidates installed.
    pub fn replace_candidates(&self, proxies: impl IntoIterator<Item = Proxy>) -> usize {
        let mut candidates = Vec::new();
        let mut positions = HashMap::new();
        for proxy in proxies {
            if positions.contains_key(&proxy) {
                continue;
            }
            positions.insert(proxy.clone(), candidates.len());
            candidates.push(proxy);
        }
        let installed = candidates.len();

        let mut state = self.state.write();
        state.candidates = candidates;
        state.positions = positions;
        // reputation only outlives a refresh for proxies still in the pool
        let PoolState {
            positions,
            preferred,
            reputation,
            ..
        } = &mut *state;
        reputation.retain(|proxy, _| positions.contains_key(proxy) || preferred.contains_key(proxy));
        installed
    }

    /// Insert or overwrite the preferred score of `proxy`. Last write wins.
    pub fn add_preferred(&self, proxy: Proxy, score: f64) {
        self.state.write().preferred.insert(proxy, score);
    }

    /// Remove `proxy` from the preferred set. No-op for non-members.
    pub fn remove_preferred(&self, proxy: &Proxy) -> bool {
        self.state.write().preferred.remove(proxy).is_some()
    }

    /// Remove `proxy` from the candidate set. No-op for non-members.
    pub fn remove_candidate(&self, proxy: &Proxy) -> bool {
        self.state.write().remove_candidate(proxy)
    }

    /// Remove `proxy` from both sets and forget its reputation.
    pub fn remove(&self, proxy: &Proxy) -> bool {
        self.state.write().remove_all(proxy)
    }

    /// The preferred proxy with the best score, if any.
    pub fn best_preferred(&self) -> Option<Proxy> {
        let state = self.state.read();
        state
            .preferred
            .iter()
            .min_by(|(pa, sa), (pb, sb)| self.policy.rank(**sa, **sb).then_with(|| pa.cmp(pb)))
            .map(|(proxy, _)| proxy.clone())
    }

    /// All preferred proxies, best first.
    pub fn preferred_ranked(&self) -> Vec<Proxy> {
        let mut ranked = self.preferred();
        ranked.sort_by(|(pa, sa), (pb, sb)| self.policy.rank(*sa, *sb).then_with(|| pa.cmp(pb)));
        ranked.into_iter().map(|(proxy, _)| proxy).collect()
    }

    /// A uniformly selected candidate, if any.
    pub fn random_candidate(&self) -> Option<Proxy> {
        let state = self.state.read();
        if state.candidates.is_empty() {
            return None;
        }
        let idx = rand::rng().random_range(0..state.candidates.len());
        Some(state.candidates[idx].clone())
    }

    /// Snapshot of the candidate set.
    pub fn candidates(&self) -> Vec<Proxy> {
        self.state.read().candidates.clone()
    }

    /// Snapshot of the preferred set with scores, in no particular order.
    pub fn preferred(&self) -> Vec<(Proxy, f64)> {
        self.state
            .read()
            .preferred
            .iter()
            .map(|(proxy, score)| (proxy.clone(), *score))
            .collect()
    }

    /// Preferred score of `proxy`.
    pub fn score(&self, proxy: &Proxy) -> Option<f64> {
        self.state.read().preferred.get(proxy).copied()
    }

    pub fn is_preferred(&self, proxy: &Proxy) -> bool {
        self.state.read().preferred.contains_key(proxy)
    }

    pub fn is_candidate(&self, proxy: &Proxy) -> bool {
        self.state.read().positions.contains_key(proxy)
    }

    /// Current sizes of both sets.
    pub fn counts(&self) -> PoolCounts {
        let state = self.state.read();
        PoolCounts {
            candidates: state.candidates.len(),
            preferred: state.preferred.len(),
        }
    }

    /// Apply a successful probe and return the proxy's new preferred score.
    pub fn record_probe_success(&self, proxy: &Proxy, latency: Duration) -> f64 {
        let mut state = self.state.write();
        let score = match self.policy {
            ScoringPolicy::Latency => latency.as_secs_f64() * 1000.0,
            ScoringPolicy::Reputation(rep) => {
                let current = state.reputation.get(proxy).copied().unwrap_or(rep.initial);
                let score = current + rep.reward;
                state.reputation.insert(proxy.clone(), score);
                score
            }
        };
        state.preferred.insert(proxy.clone(), score);
        score
    }

    /// Apply a probe that exhausted its retries.
    pub fn record_probe_failure(&self, proxy: &Proxy) -> ProbeVerdict {
        let mut state = self.state.write();
        match self.policy {
            ScoringPolicy::Latency => {
                state.remove_all(proxy);
                ProbeVerdict::Evicted
            }
            ScoringPolicy::Reputation(rep) => {
                let current = state.reputation.get(proxy).copied().unwrap_or(rep.initial);
                let score = current - rep.penalty;
                if score <= rep.floor {
                    state.remove_all(proxy);
                    return ProbeVerdict::Evicted;
                }
                state.reputation.insert(proxy.clone(), score);
                if let Some(preferred) = state.preferred.get_mut(proxy) {
                    *preferred = score;
                }
                ProbeVerdict::Kept { score }
            }
        }
    }
}

impl Default for ProxyStore {
    fn default() -> Self {
        Self::new(ScoringPolicy::default())
    }
}
