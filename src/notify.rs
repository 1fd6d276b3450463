//! Outbound notifications.
//!
//! Producers call [`NotificationBatcher::enqueue`], which never blocks. A
//! timer drains the queue and hands one merged [`Notification`] to the
//! [`Notifier`], so a burst of new posts costs a single delivery.

use crate::error::NotifyError;

use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time;
use tokio_util::sync::CancellationToken;

/// A message for a set of recipients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Recipient identifiers; empty means "everyone on the channel".
    pub recipients: Vec<String>,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>, recipients: Vec<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            recipients,
        }
    }
}

/// Sink that delivers a notification somewhere (chat webhook, mail, ...).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// A queued notification.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub notification: Notification,
    pub enqueued_at: Instant,
}

/// Settings for [`NotificationBatcher`].
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// How often the queue is drained.
    pub flush_interval: Duration,
    /// Queue bound; the oldest message is dropped when it is reached.
    pub capacity: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(3),
            capacity: 1000,
        }
    }
}

/// Queue of pending notifications, flushed as one merged message per tick.
pub struct NotificationBatcher {
    queue: Mutex<VecDeque<OutboundMessage>>,
    notifier: Arc<dyn Notifier>,
    config: BatcherConfig,
}

impl NotificationBatcher {
    pub fn new(notifier: Arc<dyn Notifier>, config: BatcherConfig) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notifier,
            config,
        }
    }

    /// Queue a message for the next flush. Never blocks.
    pub fn enqueue(&self, title: impl Into<String>, body: impl Into<String>, recipients: Vec<String>) {
        let message = OutboundMessage {
            notification: Notification::new(title, body, recipients),
            enqueued_at: Instant::now(),
        };

        let mut queue = self.queue.lock();
        while queue.len() >= self.config.capacity.max(1) {
            if let Some(dropped) = queue.pop_front() {
                warn!(
                    "Notification queue full ({}), dropping oldest message `{}`",
                    self.config.capacity, dropped.notification.title
                );
            }
        }
        queue.push_back(message);
    }

    /// Number of messages waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Drain the queue and deliver its contents as one message.
    ///
    /// Returns how many queued messages the delivery covered; zero when the
    /// queue was empty. A failed delivery is not re-queued.
    pub async fn flush(&self) -> Result<usize, NotifyError> {
        let drained = mem::take(&mut *self.queue.lock());
        let count = drained.len();
        if let Some(oldest) = drained.front() {
            debug!(
                "Flushing {} notifications, oldest queued {:?} ago",
                count,
                oldest.enqueued_at.elapsed()
            );
        }

        let Some(merged) = merge(drained.into_iter().map(|m| m.notification).collect()) else {
            return Ok(0);
        };
        self.notifier.send(&merged).await?;
        info!("Delivered {} notifications to {} recipients", count, merged.recipients.len());
        Ok(count)
    }

    /// Flush every `flush_interval` until `shutdown` fires, then flush once
    /// more so nothing queued before shutdown is left behind.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let period = self.config.flush_interval;
        let mut interval = time::interval_at(time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            if let Err(e) = self.flush().await {
                warn!("Failed to deliver notifications: {}", e);
            }
        }

        if let Err(e) = self.flush().await {
            warn!("Failed to deliver notifications on shutdown: {}", e);
        }
        info!("Notification batcher stopped");
    }
}

/// Combine queued notifications into a single message.
///
/// A lone message passes through unchanged. Several become numbered
/// sections under the first title, with recipients deduplicated in
/// first-seen order.
pub fn merge(messages: Vec<Notification>) -> Option<Notification> {
    if messages.len() <= 1 {
        return messages.into_iter().next();
    }

    let title = format!("{} (+{} more)", messages[0].title, messages.len() - 1);
    let body = messages
        .iter()
        .enumerate()
        .map(|(i, m)| format!("{}. {}\n{}", i + 1, m.title, m.body))
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut seen = HashSet::new();
    let recipients = messages
        .iter()
        .flat_map(|m| m.recipients.iter())
        .filter(|r| seen.insert(r.as_str()))
        .cloned()
        .collect();

    Some(Notification { title, body, recipients })
}
