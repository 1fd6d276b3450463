//! Page monitoring on top of the pool.
//!
//! A [`Monitor`] polls one page through the [`ProxyPool`], turns it into
//! posts with a [`PostParser`], and queues a notification for every post it
//! has not seen before. Scraping markup, persisting seen posts and
//! delivering messages are left to the collaborators.

use crate::error::{FetchError, MonitorError, ParseError};
use crate::notify::NotificationBatcher;
use crate::pool::ProxyPool;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rand::Rng;
use reqwest::header::HeaderMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// One entry of a monitored listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    /// Stable identifier used for deduplication.
    pub id: String,
    pub title: String,
    pub link: String,
}

/// Turns fetched pages into posts.
pub trait PostParser: Send + Sync {
    /// Extract the posts of a listing page.
    fn parse(&self, page: &str) -> Result<Vec<Post>, ParseError>;

    /// Page to fetch for the details of a new post, if the forum has one.
    fn detail_url<'a>(&self, _post: &'a Post) -> Option<&'a str> {
        None
    }

    /// Turn a post's detail page into text appended to its notification.
    fn parse_detail(&self, _page: &str) -> Result<String, ParseError> {
        Ok(String::new())
    }
}

/// Remembers which posts were already announced.
pub trait SeenStore: Send + Sync {
    /// Record `id`; returns `true` the first time an id is seen.
    fn mark_seen(&self, id: &str) -> bool;

    /// Forget ids recorded more than `older_than` ago. Returns how many were
    /// dropped.
    fn prune(&self, _older_than: Duration) -> usize {
        0
    }
}

/// [`SeenStore`] that forgets everything on restart.
#[derive(Debug, Default)]
pub struct MemorySeenStore {
    seen: Mutex<HashMap<String, Instant>>,
}

impl MemorySeenStore {
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

impl SeenStore for MemorySeenStore {
    fn mark_seen(&self, id: &str) -> bool {
        let mut seen = self.seen.lock();
        if seen.contains_key(id) {
            return false;
        }
        seen.insert(id.to_string(), Instant::now());
        true
    }

    fn prune(&self, older_than: Duration) -> usize {
        let mut seen = self.seen.lock();
        let before = seen.len();
        seen.retain(|_, at| at.elapsed() < older_than);
        before - seen.len()
    }
}

/// Keyword subscriptions per recipient.
#[derive(Debug, Clone, Default)]
pub struct Subscriptions {
    entries: Vec<(String, Vec<String>)>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `keywords` for `recipient`. Keywords match case-insensitively.
    pub fn subscribe<I, S>(mut self, recipient: impl Into<String>, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let recipient = recipient.into();
        let keywords = keywords.into_iter().map(|k| k.as_ref().to_lowercase());
        match self.entries.iter_mut().find(|(r, _)| *r == recipient) {
            Some((_, existing)) => existing.extend(keywords),
            None => self.entries.push((recipient, keywords.collect())),
        }
        self
    }

    /// Recipients with a keyword contained in `title`, in subscription order.
    pub fn recipients_for(&self, title: &str) -> Vec<String> {
        let title = title.to_lowercase();
        self.entries
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|k| !k.is_empty() && title.contains(k.as_str())))
            .map(|(recipient, _)| recipient.clone())
            .collect()
    }
}

/// Settings for [`Monitor`].
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub page_url: String,
    /// Sent with every page request (cookies, user agent).
    pub headers: HeaderMap,
    /// Wait after a successful cycle is drawn from `wait_min..=wait_max`.
    pub wait_min: Duration,
    pub wait_max: Duration,
    /// Wait after the first failed fetch; doubles per consecutive failure.
    pub failure_backoff: Duration,
    pub failure_backoff_max: Duration,
    /// Wait when the pool had no proxy at all.
    pub pool_empty_backoff: Duration,
    /// Consecutive fetch failures that are reported through the batcher.
    pub report_failures_up_to: u32,
    /// Seen post ids older than this are forgotten.
    pub seen_retention: Duration,
}

impl MonitorConfig {
    pub fn new(page_url: impl Into<String>) -> Self {
        Self {
            page_url: page_url.into(),
            ..Self::default()
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            page_url: String::new(),
            headers: HeaderMap::new(),
            wait_min: Duration::from_secs(10),
            wait_max: Duration::from_secs(15),
            failure_backoff: Duration::from_secs(10),
            failure_backoff_max: Duration::from_secs(600),
            pool_empty_backoff: Duration::from_secs(300),
            report_failures_up_to: 3,
            seen_retention: Duration::from_secs(720 * 3600),
        }
    }
}

/// Polls a page through the pool and announces new posts.
pub struct Monitor {
    pool: Arc<ProxyPool>,
    parser: Arc<dyn PostParser>,
    seen: Arc<dyn SeenStore>,
    subscriptions: Subscriptions,
    batcher: Arc<NotificationBatcher>,
    config: MonitorConfig,
    consecutive_failures: u32,
}

impl Monitor {
    pub fn new(
        pool: Arc<ProxyPool>,
        parser: Arc<dyn PostParser>,
        seen: Arc<dyn SeenStore>,
        subscriptions: Subscriptions,
        batcher: Arc<NotificationBatcher>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            pool,
            parser,
            seen,
            subscriptions,
            batcher,
            config,
            consecutive_failures: 0,
        }
    }

    /// Fetch and parse the page once and queue a message per new post.
    ///
    /// Returns the number of new posts.
    pub async fn poll_once(&self) -> Result<usize, MonitorError> {
        let page = self.pool.fetch(&self.config.page_url, &self.config.headers).await?;
        let posts = self.parser.parse(&page)?;

        let mut new_posts = 0;
        for post in posts {
            if !self.seen.mark_seen(&post.id) {
                continue;
            }
            new_posts += 1;
            info!("New post detected: {} ({})", post.title, post.link);

            let mut body = format!("{}\n{}", post.title, post.link);
            if let Some(detail) = self.fetch_detail(&post).await {
                body.push('\n');
                body.push_str(&detail);
            }
            let recipients = self.subscriptions.recipients_for(&post.title);
            self.batcher.enqueue(post.title, body, recipients);
        }

        let pruned = self.seen.prune(self.config.seen_retention);
        if pruned > 0 {
            debug!("Forgot {} seen posts", pruned);
        }
        Ok(new_posts)
    }

    /// Fetch and parse the detail page of `post`. Failures only cost the detail.
    async fn fetch_detail(&self, post: &Post) -> Option<String> {
        let url = self.parser.detail_url(post)?;
        let page = match self.pool.fetch(url, &self.config.headers).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Failed to fetch details of post {}: {}", post.id, e);
                return None;
            }
        };
        match self.parser.parse_detail(&page) {
            Ok(detail) if detail.is_empty() => None,
            Ok(detail) => Some(detail),
            Err(e) => {
                warn!("Failed to parse details of post {}: {}", post.id, e);
                None
            }
        }
    }

    /// Poll once and return how long to wait before the next poll.
    pub async fn cycle(&mut self) -> Duration {
        let outcome = self.poll_once().await;
        self.settle(outcome)
    }

    /// Poll until `shutdown` fires. A poll in progress is finished first.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Monitoring {}", self.config.page_url);
        loop {
            let wait = self.cycle().await;
            debug!("Next poll in {:?}", wait);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        info!("Monitor stopped");
    }

    fn settle(&mut self, outcome: Result<usize, MonitorError>) -> Duration {
        let err = match outcome {
            Ok(new_posts) => {
                if self.consecutive_failures > 0 {
                    info!("Page fetch recovered after {} failures", self.consecutive_failures);
                }
                self.consecutive_failures = 0;
                debug!("{} new posts", new_posts);
                return self.normal_wait();
            }
            Err(e) => e,
        };

        match err {
            MonitorError::Parse(e) => {
                self.consecutive_failures = 0;
                error!("Failed to parse page: {}", e);
                self.batcher.enqueue("Failed to parse page", e.to_string(), Vec::new());
                self.normal_wait()
            }
            MonitorError::Fetch(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                let n = self.consecutive_failures;
                if n <= self.config.report_failures_up_to {
                    self.batcher.enqueue("Failed to fetch page", e.to_string(), Vec::new());
                }

                let wait = match e {
                    FetchError::PoolEmpty => self.config.pool_empty_backoff,
                    _ => self.failure_wait(n),
                };
                warn!("Page fetch failed {} times in a row, retrying in {:?}: {}", n, wait, e);
                wait
            }
        }
    }

    fn failure_wait(&self, failures: u32) -> Duration {
        let factor = 1u32 << failures.saturating_sub(1).min(20);
        self.config
            .failure_backoff
            .saturating_mul(factor)
            .min(self.config.failure_backoff_max)
    }

    fn normal_wait(&self) -> Duration {
        let (min, max) = (self.config.wait_min, self.config.wait_max);
        if max <= min {
            return min;
        }
        rand::rng().random_range(min..=max)
    }
}
