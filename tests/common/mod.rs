//! Fakes shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use rsshub::feed::{FeedItem, FetchError, Fetcher};
use rsshub::storage::{Database, DatabaseError, Feed, NewArticle, Repository};

pub async fn test_db() -> Database {
    Database::open(":memory:").await.unwrap()
}

pub async fn seed_feeds(db: &Database, count: usize) -> Vec<Feed> {
    let mut feeds = Vec::new();
    for i in 0..count {
        feeds.push(
            db.create_feed(&format!("feed-{}", i), &format!("https://example.com/{}/rss", i))
                .await
                .unwrap(),
        );
    }
    feeds
}

pub fn item(link: &str) -> FeedItem {
    FeedItem {
        title: format!("Title of {}", link),
        link: link.to_string(),
        description: None,
        published_at: Some(1_700_000_000_000),
    }
}

/// Poll `check` every 10ms until it holds, panicking after `timeout`.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached within {:?}", timeout);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Fetcher returning canned items per URL.
///
/// When gated, every fetch waits for a permit on `gate`, which lets a test
/// hold workers busy and observe how many run at once. `overlaps` counts
/// fetches that started while the same URL was already being fetched.
pub struct FakeFetcher {
    items: HashMap<String, Vec<FeedItem>>,
    gate: Option<Arc<Semaphore>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
    active: Mutex<HashSet<String>>,
    overlaps: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self {
            items: HashMap::new(),
            gate: None,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            active: Mutex::new(HashSet::new()),
            overlaps: AtomicUsize::new(0),
        }
    }

    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    pub fn with_items(mut self, url: &str, items: Vec<FeedItem>) -> Self {
        self.items.insert(url.to_string(), items);
        self
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch_and_parse(&self, url: &str) -> Result<Vec<FeedItem>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.active.lock().unwrap().insert(url.to_string()) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.active.lock().unwrap().remove(url);
        Ok(self.items.get(url).cloned().unwrap_or_default())
    }
}

/// Repository wrapper recording every `oldest_feeds` limit.
pub struct RecordingRepo {
    inner: Database,
    requests: Mutex<Vec<usize>>,
}

impl RecordingRepo {
    pub fn new(inner: Database) -> Self {
        Self {
            inner,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<usize> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Repository for RecordingRepo {
    async fn create_feed(&self, name: &str, url: &str) -> Result<Feed, DatabaseError> {
        self.inner.create_feed(name, url).await
    }

    async fn get_feed_by_name(&self, name: &str) -> Result<Option<Feed>, DatabaseError> {
        self.inner.get_feed_by_name(name).await
    }

    async fn list_feeds(&self, limit: Option<usize>) -> Result<Vec<Feed>, DatabaseError> {
        self.inner.list_feeds(limit).await
    }

    async fn oldest_feeds(&self, limit: usize) -> Result<Vec<Feed>, DatabaseError> {
        self.requests.lock().unwrap().push(limit);
        self.inner.oldest_feeds(limit).await
    }

    async fn update_feed_timestamp(&self, feed_id: i64) -> Result<(), DatabaseError> {
        self.inner.update_feed_timestamp(feed_id).await
    }

    async fn delete_feed(&self, name: &str) -> Result<(), DatabaseError> {
        self.inner.delete_feed(name).await
    }

    async fn create_article(&self, article: &NewArticle) -> Result<bool, DatabaseError> {
        self.inner.create_article(article).await
    }

    async fn article_exists(&self, link: &str) -> Result<bool, DatabaseError> {
        self.inner.article_exists(link).await
    }
}
