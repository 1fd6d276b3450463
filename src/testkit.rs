//! Test doubles shared by the unit tests.

use crate::error::{NotifyError, ParseError, ProxyError, SourceError};
use crate::fetch::ProxyFetcher;
use crate::monitor::{Post, PostParser};
use crate::notify::{Notification, Notifier};
use crate::proxy::Proxy;
use crate::source::ProxySource;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub(crate) fn proxy(n: usize) -> Proxy {
    format!("10.1.{}.{}:1080", n / 256, n % 256).parse().unwrap()
}

pub(crate) fn proxies(count: usize) -> Vec<Proxy> {
    (0..count).map(proxy).collect()
}

/// How a scripted fetch behaves.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Body(String),
    Fail,
    Hang,
    Delayed(Duration, String),
}

impl Reply {
    pub(crate) fn body(body: &str) -> Self {
        Reply::Body(body.to_string())
    }

    pub(crate) fn delayed(delay: Duration, body: &str) -> Self {
        Reply::Delayed(delay, body.to_string())
    }
}

#[derive(Default)]
struct Counters {
    started: AtomicUsize,
    finished: AtomicUsize,
    cancelled: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

// Counts a call as cancelled when its future is dropped before completing.
struct CallGuard<'a> {
    counters: &'a Counters,
    done: bool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if self.done {
            self.counters.finished.fetch_add(1, Ordering::SeqCst);
        } else {
            self.counters.cancelled.fetch_add(1, Ordering::SeqCst);
        }
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fetcher whose replies come from a script, a per-proxy table, or a default.
pub(crate) struct ScriptedFetcher {
    script: Mutex<VecDeque<Reply>>,
    per_proxy: Mutex<HashMap<Proxy, Reply>>,
    default: Reply,
    calls: Mutex<Vec<(Proxy, String)>>,
    counters: Counters,
}

impl ScriptedFetcher {
    pub(crate) fn new(default: Reply) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            per_proxy: Mutex::new(HashMap::new()),
            default,
            calls: Mutex::new(Vec::new()),
            counters: Counters::default(),
        }
    }

    /// Replies consumed in call order, regardless of proxy.
    pub(crate) fn script(&self, replies: impl IntoIterator<Item = Reply>) {
        self.script.lock().extend(replies);
    }

    pub(crate) fn reply_for(&self, proxy: &Proxy, reply: Reply) {
        self.per_proxy.lock().insert(proxy.clone(), reply);
    }

    pub(crate) fn calls(&self) -> Vec<Proxy> {
        self.calls.lock().iter().map(|(proxy, _)| proxy.clone()).collect()
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(_, url)| url.clone()).collect()
    }

    pub(crate) fn started(&self) -> usize {
        self.counters.started.load(Ordering::SeqCst)
    }

    pub(crate) fn finished(&self) -> usize {
        self.counters.finished.load(Ordering::SeqCst)
    }

    pub(crate) fn cancelled(&self) -> usize {
        self.counters.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn active(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Most calls ever in flight at once.
    pub(crate) fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    fn next_reply(&self, proxy: &Proxy) -> Reply {
        if let Some(reply) = self.script.lock().pop_front() {
            return reply;
        }
        self.per_proxy
            .lock()
            .get(proxy)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

#[async_trait]
impl ProxyFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        proxy: &Proxy,
        url: &str,
        _headers: &HeaderMap,
        _timeout: Duration,
    ) -> Result<String, ProxyError> {
        self.calls.lock().push((proxy.clone(), url.to_string()));
        let reply = self.next_reply(proxy);

        self.counters.started.fetch_add(1, Ordering::SeqCst);
        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(active, Ordering::SeqCst);
        let mut guard = CallGuard {
            counters: &self.counters,
            done: false,
        };

        let outcome = match reply {
            Reply::Body(body) => Ok(body),
            Reply::Fail => Err(ProxyError::Unreachable(format!("{} refused", proxy))),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProxyError::Timeout(Duration::from_secs(3600)))
            }
            Reply::Delayed(delay, body) => {
                tokio::time::sleep(delay).await;
                Ok(body)
            }
        };
        guard.done = true;
        outcome
    }
}

/// Proxy-list source with a swappable body; `None` means the source is down.
pub(crate) struct StaticSource {
    name: String,
    body: Mutex<Option<String>>,
    fetches: AtomicUsize,
}

impl StaticSource {
    pub(crate) fn new(name: &str, body: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            body: Mutex::new(body.map(str::to_string)),
            fetches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_body(&self, body: Option<&str>) {
        *self.body.lock() = body.map(str::to_string);
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProxySource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_list(&self) -> Result<String, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.body
            .lock()
            .clone()
            .ok_or_else(|| SourceError::Io(std::io::Error::other("source down")))
    }
}

/// Notifier that keeps every delivery, optionally failing them.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
    attempts: AtomicUsize,
}

impl RecordingNotifier {
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Rejected("webhook down".to_string()));
        }
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}

/// Parser reading one post per line as `id|title|link`; `!` fails the parse.
/// Detail pages are the post's link, taken verbatim.
pub(crate) struct LineParser;

impl PostParser for LineParser {
    fn parse(&self, page: &str) -> Result<Vec<Post>, ParseError> {
        if page.starts_with('!') {
            return Err(ParseError("unexpected markup".to_string()));
        }
        Ok(page
            .lines()
            .filter_map(|line| {
                let mut parts = line.splitn(3, '|');
                Some(Post {
                    id: parts.next()?.to_string(),
                    title: parts.next()?.to_string(),
                    link: parts.next()?.to_string(),
                })
            })
            .collect())
    }

    fn detail_url<'a>(&self, post: &'a Post) -> Option<&'a str> {
        Some(&post.link)
    }

    fn parse_detail(&self, page: &str) -> Result<String, ParseError> {
        if page.starts_with('!') {
            return Err(ParseError("post removed".to_string()));
        }
        Ok(page.trim().to_string())
    }
}
