use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, anyhow};
use reqwest::{Client, ClientBuilder};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::model::{AssetSnapshot, ElephantSnapshot, LogBatch, StatusSnapshot, TradeRecord};
use crate::page::Page;

/// Which display handler a feed's responses are bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    Status,
    Elephants,
    RecentTrades,
    Logs,
    Assets,
    Trades,
}

/// A decoded feed response, ready for its handler.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedPayload {
    Status(StatusSnapshot),
    Elephants(ElephantSnapshot),
    RecentTrades(Vec<TradeRecord>),
    Logs(LogBatch),
    Assets(AssetSnapshot),
    Trades(Vec<TradeRecord>),
}

impl FeedKind {
    pub fn decode(self, value: Value) -> Result<FeedPayload, serde_json::Error> {
        Ok(match self {
            FeedKind::Status => FeedPayload::Status(serde_json::from_value(value)?),
            FeedKind::Elephants => FeedPayload::Elephants(serde_json::from_value(value)?),
            FeedKind::RecentTrades => FeedPayload::RecentTrades(serde_json::from_value(value)?),
            FeedKind::Logs => FeedPayload::Logs(serde_json::from_value(value)?),
            FeedKind::Assets => FeedPayload::Assets(serde_json::from_value(value)?),
            FeedKind::Trades => FeedPayload::Trades(serde_json::from_value(value)?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedSpec {
    pub name: &'static str,
    pub url: &'static str,
    pub kind: FeedKind,
    pub interval: Duration,
}

pub const STATUS_FEED: FeedSpec = FeedSpec {
    name: "status",
    url: "/api/status",
    kind: FeedKind::Status,
    interval: Duration::from_millis(3000),
};

/// Today's full trade list, fetched on request rather than on a timer.
pub const TRADES_REFRESH: FeedSpec = FeedSpec {
    name: "trades",
    url: "/api/trades?date=today",
    kind: FeedKind::Trades,
    interval: Duration::ZERO,
};

/// Feeds a page needs besides the global status feed.
pub fn page_feeds(page: &Page) -> Vec<FeedSpec> {
    match page {
        Page::Dashboard => vec![
            FeedSpec {
                name: "elephants",
                url: "/api/elephants",
                kind: FeedKind::Elephants,
                interval: Duration::from_millis(5000),
            },
            FeedSpec {
                name: "recent_trades",
                url: "/api/trades?date=today&limit=10",
                kind: FeedKind::RecentTrades,
                interval: Duration::from_millis(5000),
            },
        ],
        Page::Logs => vec![FeedSpec {
            name: "logs",
            url: "/api/logs",
            kind: FeedKind::Logs,
            interval: Duration::from_millis(3000),
        }],
        Page::Stats => vec![FeedSpec {
            name: "assets",
            url: "/api/assets",
            kind: FeedKind::Assets,
            interval: Duration::from_millis(10000),
        }],
        // see TRADES_REFRESH
        Page::Trades | Page::Other(_) => Vec::new(),
    }
}

/// Somewhere feed URLs can be fetched from.
pub trait FeedSource: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = anyhow::Result<Value>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    client: Client,
    base_url: String,
}

impl HttpFeedSource {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        HttpFeedSource {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}{}", self.base_url, url)
        }
    }
}

impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str) -> anyhow::Result<Value> {
        let full_url = self.resolve(url);
        let response = self
            .client
            .get(&full_url)
            .send()
            .await
            .with_context(|| format!("requesting {full_url}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("HTTP error! Status: {}", status.as_u16()));
        }
        response
            .json::<Value>()
            .await
            .with_context(|| format!("decoding {full_url}"))
    }
}

pub fn build_http_client() -> Result<Client, anyhow::Error> {
    Ok(ClientBuilder::new()
        .connect_timeout(Duration::from_secs(5))
        .read_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(20))
        .build()?)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedInfo {
    pub name: String,
    pub url: String,
    pub kind: FeedKind,
    pub interval: Duration,
}

impl From<FeedSpec> for FeedInfo {
    fn from(spec: FeedSpec) -> Self {
        FeedInfo {
            name: spec.name.to_string(),
            url: spec.url.to_string(),
            kind: spec.kind,
            interval: spec.interval,
        }
    }
}

/// Fetches a feed once, outside any timer. The enabled flag does not apply.
pub fn spawn_refresh<S: FeedSource>(
    spec: FeedSpec,
    source: Arc<S>,
    tx: broadcast::Sender<Command>,
) -> JoinHandle<()> {
    let info = FeedInfo::from(spec);
    info!(feed = %info.name, "one-shot refresh");
    tokio::spawn(async move { poll_once(&info, source.as_ref(), &tx).await })
}

struct FeedTimer {
    info: FeedInfo,
    handle: JoinHandle<()>,
}

/// Named interval timers, one per feed, gated by a global enabled flag.
pub struct PollingClient<S: FeedSource> {
    source: Arc<S>,
    tx: broadcast::Sender<Command>,
    page: Page,
    enabled: Arc<AtomicBool>,
    timers: HashMap<String, FeedTimer>,
}

impl<S: FeedSource> PollingClient<S> {
    pub fn new(source: S, tx: broadcast::Sender<Command>, page: Page) -> Self {
        PollingClient {
            source: Arc::new(source),
            tx,
            page,
            enabled: Arc::new(AtomicBool::new(true)),
            timers: HashMap::new(),
        }
    }

    /// Starts the page feeds and the global status feed.
    pub fn init(&mut self) {
        info!(page = %self.page, "initialising polling");
        self.setup_page_feeds();
        self.start_spec(STATUS_FEED);
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Registers `name`, replacing any timer already running under it. The
    /// first firing happens immediately.
    pub fn start(&mut self, name: &str, url: &str, kind: FeedKind, interval: Duration) {
        if let Some(previous) = self.timers.remove(name) {
            previous.handle.abort();
        }
        let info = FeedInfo {
            name: name.to_string(),
            url: url.to_string(),
            kind,
            interval,
        };
        let handle = tokio::spawn(run_feed(
            info.clone(),
            self.source.clone(),
            self.enabled.clone(),
            self.tx.clone(),
        ));
        info!(feed = name, interval_ms = interval.as_millis() as u64, "polling started");
        self.timers.insert(name.to_string(), FeedTimer { info, handle });
    }

    pub fn stop(&mut self, name: &str) -> bool {
        match self.timers.remove(name) {
            Some(timer) => {
                timer.handle.abort();
                info!(feed = name, "polling stopped");
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
        self.enabled.store(false, Ordering::SeqCst);
        info!("all polling stopped");
    }

    /// Re-derives the feed set for the current page from scratch. Nothing
    /// about the paused state is restored.
    pub fn resume_all(&mut self) {
        self.enabled.store(true, Ordering::SeqCst);
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
        self.setup_page_feeds();
        self.start_spec(STATUS_FEED);
        info!("all polling resumed");
    }

    /// Moves to another page; the feed set follows it.
    pub fn navigate(&mut self, page: Page) {
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
        self.page = page;
        self.init();
    }

    pub fn feed(&self, name: &str) -> Option<&FeedInfo> {
        self.timers.get(name).map(|timer| &timer.info)
    }

    pub fn feed_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.timers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn dispose(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
    }

    fn setup_page_feeds(&mut self) {
        for spec in page_feeds(&self.page) {
            self.start_spec(spec);
        }
    }

    fn start_spec(&mut self, spec: FeedSpec) {
        self.start(spec.name, spec.url, spec.kind, spec.interval);
    }
}

impl<S: FeedSource> Drop for PollingClient<S> {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn run_feed<S: FeedSource>(
    info: FeedInfo,
    source: Arc<S>,
    enabled: Arc<AtomicBool>,
    tx: broadcast::Sender<Command>,
) {
    let mut ticker = tokio::time::interval(info.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !enabled.load(Ordering::SeqCst) {
            continue;
        }
        poll_once(&info, source.as_ref(), &tx).await;
    }
}

/// One firing: fetch, decode, forward. Failures never stop the timer.
async fn poll_once<S: FeedSource>(info: &FeedInfo, source: &S, tx: &broadcast::Sender<Command>) {
    let result = async {
        let value = source.fetch(&info.url).await?;
        info.kind
            .decode(value)
            .with_context(|| format!("unexpected payload from {}", info.url))
    }
    .await;
    match result {
        Ok(payload) => {
            debug!(feed = %info.name, "feed updated");
            let _ = tx.send(Command::Feed(payload));
        }
        Err(err) => {
            warn!(feed = %info.name, error = %err, "failed to fetch feed");
            let _ = tx.send(Command::FeedFailed {
                feed: info.name.clone(),
                error: format!("{err:#}"),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone, Default)]
    struct RecordingSource {
        hits: Arc<AtomicUsize>,
        urls: Arc<Mutex<Vec<String>>>,
        fail: bool,
        reply: Option<Value>,
    }

    impl FeedSource for RecordingSource {
        async fn fetch(&self, url: &str) -> anyhow::Result<Value> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().unwrap().push(url.to_string());
            if self.fail {
                return Err(anyhow!("HTTP error! Status: 500"));
            }
            Ok(self.reply.clone().unwrap_or_else(|| json!({})))
        }
    }

    fn client(
        page: Page,
        source: RecordingSource,
    ) -> (PollingClient<RecordingSource>, broadcast::Receiver<Command>) {
        let (tx, rx) = broadcast::channel(64);
        (PollingClient::new(source, tx, page), rx)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    /// Walks the paused clock forward in small steps so every tick lands on time.
    async fn run_for(duration: Duration) {
        let step = Duration::from_millis(100);
        let mut elapsed = Duration::ZERO;
        while elapsed < duration {
            tokio::time::advance(step).await;
            settle().await;
            elapsed += step;
        }
    }

    #[test]
    fn page_feed_sets() {
        let names = |page: Page| -> Vec<&'static str> {
            page_feeds(&page).iter().map(|spec| spec.name).collect()
        };
        assert_eq!(names(Page::Dashboard), vec!["elephants", "recent_trades"]);
        assert_eq!(names(Page::Logs), vec!["logs"]);
        assert_eq!(names(Page::Stats), vec!["assets"]);
        assert!(names(Page::Trades).is_empty());
        assert_eq!(
            page_feeds(&Page::Dashboard)[1].url,
            "/api/trades?date=today&limit=10"
        );
    }

    #[test]
    fn decodes_feed_payloads_by_kind() {
        let logs = FeedKind::Logs
            .decode(json!([{"时间": "10:00:00", "消息": "x"}]))
            .unwrap();
        assert!(matches!(logs, FeedPayload::Logs(ref batch) if batch.len() == 1));
        assert!(FeedKind::RecentTrades.decode(json!({"oops": 1})).is_err());
    }

    #[test]
    fn relative_urls_resolve_against_the_server() {
        let source = HttpFeedSource::new(Client::new(), "http://localhost:8088/");
        assert_eq!(source.resolve("/api/status"), "http://localhost:8088/api/status");
        assert_eq!(source.resolve("http://other/x"), "http://other/x");
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_a_feed_replaces_its_timer() {
        let source = RecordingSource::default();
        let (mut polling, _rx) = client(Page::Trades, source.clone());
        polling.start("status", "/a", FeedKind::Status, Duration::from_millis(1000));
        polling.start("status", "/b", FeedKind::Status, Duration::from_millis(2000));
        assert_eq!(polling.feed_names(), vec!["status".to_string()]);
        let feed = polling.feed("status").unwrap();
        assert_eq!(feed.url, "/b");
        assert_eq!(feed.interval, Duration::from_millis(2000));

        settle().await;
        run_for(Duration::from_millis(4100)).await;
        let urls = source.urls.lock().unwrap().clone();
        assert!(urls.iter().all(|url| url == "/b"), "stale timer fired: {urls:?}");
        assert_eq!(urls.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn first_firing_is_immediate_and_failures_keep_the_timer() {
        let source = RecordingSource {
            fail: true,
            ..Default::default()
        };
        let (mut polling, mut rx) = client(Page::Trades, source.clone());
        polling.start("status", "/api/status", FeedKind::Status, Duration::from_millis(3000));
        settle().await;
        assert_eq!(source.hits.load(Ordering::SeqCst), 1);
        assert!(matches!(rx.try_recv(), Ok(Command::FeedFailed { ref feed, .. }) if feed == "status"));

        run_for(Duration::from_millis(3000)).await;
        assert_eq!(source.hits.load(Ordering::SeqCst), 2);
        assert!(polling.feed("status").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_all_suppresses_requests() {
        let source = RecordingSource::default();
        let (mut polling, _rx) = client(Page::Dashboard, source.clone());
        polling.init();
        settle().await;
        let before = source.hits.load(Ordering::SeqCst);
        assert_eq!(before, 3);

        polling.stop_all();
        assert!(!polling.is_enabled());
        assert!(polling.feed_names().is_empty());
        run_for(Duration::from_secs(30)).await;
        assert_eq!(source.hits.load(Ordering::SeqCst), before);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_flag_gates_running_timers() {
        let source = RecordingSource::default();
        let (mut polling, _rx) = client(Page::Trades, source.clone());
        polling.enabled.store(false, Ordering::SeqCst);
        polling.start("status", "/api/status", FeedKind::Status, Duration::from_millis(1000));
        run_for(Duration::from_millis(5500)).await;
        assert_eq!(source.hits.load(Ordering::SeqCst), 0);
        assert!(polling.feed("status").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn resume_all_rebuilds_the_page_feed_set() {
        let source = RecordingSource::default();
        let (mut polling, _rx) = client(Page::Logs, source.clone());
        polling.start("adhoc", "/api/extra", FeedKind::Status, Duration::from_secs(1));
        polling.resume_all();
        assert_eq!(polling.feed_names(), vec!["logs".to_string(), "status".to_string()]);

        polling.stop_all();
        polling.resume_all();
        polling.resume_all();
        assert!(polling.is_enabled());
        assert_eq!(polling.feed_names(), vec!["logs".to_string(), "status".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn trades_refresh_fetches_once() {
        let source = RecordingSource {
            reply: Some(json!([
                {"交易时间": "2024-01-02 09:31:00", "股票代码": "600000", "盈亏": 1.5},
                {"交易时间": "2024-01-02 09:30:00", "股票代码": "000001", "盈亏": -2}
            ])),
            ..Default::default()
        };
        let (tx, mut rx) = broadcast::channel(64);
        spawn_refresh(TRADES_REFRESH, Arc::new(source.clone()), tx)
            .await
            .unwrap();
        run_for(Duration::from_secs(10)).await;

        assert_eq!(
            source.urls.lock().unwrap().clone(),
            vec!["/api/trades?date=today".to_string()]
        );
        match rx.try_recv() {
            Ok(Command::Feed(FeedPayload::Trades(trades))) => assert_eq!(trades.len(), 2),
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_reports_the_feed() {
        let source = RecordingSource {
            fail: true,
            ..Default::default()
        };
        let (tx, mut rx) = broadcast::channel(64);
        spawn_refresh(TRADES_REFRESH, Arc::new(source), tx).await.unwrap();
        assert!(matches!(rx.try_recv(), Ok(Command::FeedFailed { ref feed, .. }) if feed == "trades"));
    }

    #[tokio::test(start_paused = true)]
    async fn navigate_switches_feed_set() {
        let source = RecordingSource::default();
        let (mut polling, _rx) = client(Page::Dashboard, source);
        polling.init();
        assert_eq!(
            polling.feed_names(),
            vec![
                "elephants".to_string(),
                "recent_trades".to_string(),
                "status".to_string()
            ]
        );
        polling.navigate(Page::Stats);
        assert_eq!(polling.page(), &Page::Stats);
        assert_eq!(polling.feed_names(), vec!["assets".to_string(), "status".to_string()]);
        assert!(polling.stop("assets"));
        assert!(!polling.stop("assets"));
    }
}
