//! Error types for the informer-pool crate.

use crate::proxy::Proxy;

use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// A proxy-list entry that could not be turned into a [`Proxy`].
#[derive(Debug, Clone, Error)]
#[error("invalid proxy address `{raw}`: {reason}")]
pub struct InvalidProxy {
    raw: String,
    reason: String,
}

impl InvalidProxy {
    pub(crate) fn new(raw: &str, reason: impl Into<String>) -> Self {
        Self {
            raw: raw.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failure of a single request through a single proxy.
///
/// Every variant means the same thing to the pool: this proxy failed now.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("proxy unreachable: {0}")]
    Unreachable(String),
    #[error("attempt cancelled")]
    Cancelled,
}

/// One failed entry of a fetch attempt record.
#[derive(Debug)]
pub struct AttemptFailure {
    pub proxy: Proxy,
    pub error: ProxyError,
}

/// Error returned by the fetch orchestrator.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Neither candidates nor preferred proxies exist.
    #[error("No proxy available in pool")]
    PoolEmpty,
    /// Every proxy tried within the retry budget failed.
    #[error("all {} proxy attempts failed", .0.len())]
    Exhausted(Vec<AttemptFailure>),
    /// A race did not produce a winner before its overall deadline.
    #[error("no proxy answered within {deadline:?} ({} failed)", .failures.len())]
    DeadlineExceeded {
        deadline: Duration,
        failures: Vec<AttemptFailure>,
    },
}

impl FetchError {
    /// Proxies that failed during the call, in the order they were recorded.
    pub fn failures(&self) -> &[AttemptFailure] {
        match self {
            FetchError::PoolEmpty => &[],
            FetchError::Exhausted(failures) => failures,
            FetchError::DeadlineExceeded { failures, .. } => failures,
        }
    }
}

/// Error fetching a proxy list from its source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("source answered with status {0}")]
    Status(StatusCode),
    #[error("cannot read proxy list: {0}")]
    Io(#[from] std::io::Error),
    #[error("source timed out after {0:?}")]
    Timeout(Duration),
    #[error("all {0} proxy sources failed")]
    AllFailed(usize),
    #[error("proxy sources returned no usable entries")]
    Empty,
}

/// Error delivering a notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification rejected: {0}")]
    Rejected(String),
    #[error("notification transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Error turning page markup into posts.
#[derive(Debug, Error)]
#[error("failed to parse page: {0}")]
pub struct ParseError(pub String);

/// Error from one monitor cycle.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}
