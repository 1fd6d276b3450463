//! # informer-pool
//!
//! A self-maintaining proxy pool for scraping, with a page monitor on top.
//!
//! Proxy lists are pulled from HTTP or file sources, probed in the
//! background, and ranked by score. Fetches go through the pool with
//! automatic fallback to other proxies, either one at a time or as a race.
//! New posts found by the monitor are batched into merged notifications.

pub mod checker;
pub mod config;
pub mod error;
pub mod fetch;
pub mod monitor;
pub mod notify;
pub mod pool;
pub mod proxy;
pub mod refresher;
pub mod source;
pub mod store;
#[cfg(test)]
mod testkit;
mod utils;

pub use checker::{HealthChecker, ProbeOutcome, SweepReport};
pub use config::{FetchStrategy, ProxyPoolConfig, ProxyPoolConfigBuilder};
pub use error::{
    AttemptFailure, FetchError, InvalidProxy, MonitorError, NotifyError, ParseError, ProxyError, SourceError,
};
pub use fetch::{FetchOrchestrator, ProxyFetcher, ReqwestFetcher};
pub use monitor::{MemorySeenStore, Monitor, MonitorConfig, Post, PostParser, SeenStore, Subscriptions};
pub use notify::{BatcherConfig, Notification, NotificationBatcher, Notifier};
pub use pool::{BackgroundTasks, ProxyPool};
pub use proxy::{Proxy, ProxyScheme};
pub use refresher::Refresher;
pub use source::{FileSource, HttpSource, ProxySource};
pub use store::{PoolCounts, ProbeVerdict, ProxyStore, ReputationPolicy, ScoringPolicy};
