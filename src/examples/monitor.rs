//! Watch a listing page through a proxy pool and log new posts.
//!
//! ```text
//! PROXY_LIST_URL=https://example.org/socks5.txt \
//! PAGE_URL=https://forum.example.org/new.txt \
//! RUST_LOG=info cargo run --example monitor
//! ```
//!
//! The page is expected to hold one `id|title|link` entry per line.

use anyhow::Context;
use async_trait::async_trait;
use informer_pool::{
    BatcherConfig, FetchStrategy, MemorySeenStore, Monitor, MonitorConfig, Notification, NotificationBatcher,
    Notifier, NotifyError, ParseError, Post, PostParser, ProxyPool, ProxyPoolConfig, Subscriptions,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct PipeParser;

impl PostParser for PipeParser {
    fn parse(&self, page: &str) -> Result<Vec<Post>, ParseError> {
        page.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                let mut parts = line.splitn(3, '|');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(id), Some(title), Some(link)) => Ok(Post {
                        id: id.trim().to_string(),
                        title: title.trim().to_string(),
                        link: link.trim().to_string(),
                    }),
                    _ => Err(ParseError(format!("malformed line `{}`", line))),
                }
            })
            .collect()
    }
}

struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        log::info!(
            "[notify {:?}] {}\n{}",
            notification.recipients,
            notification.title,
            notification.body
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let list_url = std::env::var("PROXY_LIST_URL").context("PROXY_LIST_URL is not set")?;
    let page_url = std::env::var("PAGE_URL").context("PAGE_URL is not set")?;

    let config = ProxyPoolConfig::builder()
        .sources(vec![list_url])
        .health_check_timeout(Duration::from_secs(5))
        .health_check_url("https://httpbin.org/ip")
        .fetch_strategy(FetchStrategy::Race)
        .retry_count(2)
        // rate limit for each proxy, lower throughput but fewer bans
        .max_requests_per_second(3.0)
        .build();

    let shutdown = CancellationToken::new();
    let pool = ProxyPool::new(config)?;
    let tasks = pool.start(&shutdown).await;

    let batcher = Arc::new(NotificationBatcher::new(Arc::new(LogNotifier), BatcherConfig::default()));
    let batcher_task = tokio::spawn(Arc::clone(&batcher).run(shutdown.clone()));

    let subscriptions = Subscriptions::new().subscribe("everyone", ["sale", "wts"]);
    let monitor = Monitor::new(
        Arc::clone(&pool),
        Arc::new(PipeParser),
        Arc::new(MemorySeenStore::default()),
        subscriptions,
        batcher,
        MonitorConfig::new(page_url),
    );
    let monitor_task = tokio::spawn(monitor.run(shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    println!("Shutting down...");
    shutdown.cancel();

    monitor_task.await?;
    batcher_task.await?;
    tasks.join().await;
    Ok(())
}
