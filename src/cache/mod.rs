//! Entity cache with read-through fetching
//!
//! Entries are keyed by query identity. Concurrent reads of the same key share
//! a single fetch: the first caller becomes the fetcher, later callers wait on
//! a watch channel and re-read once it completes. Every entry carries a
//! generation counter as the request identity; a fetch result is applied only
//! if the generation still matches, so an invalidation during flight simply
//! discards the superseded response.
//!
//! Writes use two policies: toggles patch entries in place with the
//! server-confirmed flag and counter (no refetch), creations mark the affected
//! list keys stale so the next read refetches.

use crate::error::{ClientError, Result};
use crate::types::{Artifact, Comment, Problem, ProblemEvent, Summary};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};

/// Query identity for a cached entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Summary,
    ProblemList,
    Problem(String),
    ProblemComments(String),
    Artifacts(String),
    ArtifactComments(String),
    Events(String),
}

/// Payload stored under a cache key
#[derive(Debug, Clone)]
pub enum CacheValue {
    Summary(Summary),
    Problems(Vec<Problem>),
    Problem(Problem),
    Comments(Vec<Comment>),
    Artifacts(Vec<Artifact>),
    Events(Vec<ProblemEvent>),
}

impl CacheValue {
    fn kind(&self) -> &'static str {
        match self {
            CacheValue::Summary(_) => "summary",
            CacheValue::Problems(_) => "problem list",
            CacheValue::Problem(_) => "problem",
            CacheValue::Comments(_) => "comment list",
            CacheValue::Artifacts(_) => "artifact list",
            CacheValue::Events(_) => "event list",
        }
    }

    pub fn into_summary(self) -> Result<Summary> {
        match self {
            CacheValue::Summary(v) => Ok(v),
            other => Err(shape_error("summary", &other)),
        }
    }

    pub fn into_problems(self) -> Result<Vec<Problem>> {
        match self {
            CacheValue::Problems(v) => Ok(v),
            other => Err(shape_error("problem list", &other)),
        }
    }

    pub fn into_problem(self) -> Result<Problem> {
        match self {
            CacheValue::Problem(v) => Ok(v),
            other => Err(shape_error("problem", &other)),
        }
    }

    pub fn into_comments(self) -> Result<Vec<Comment>> {
        match self {
            CacheValue::Comments(v) => Ok(v),
            other => Err(shape_error("comment list", &other)),
        }
    }

    pub fn into_artifacts(self) -> Result<Vec<Artifact>> {
        match self {
            CacheValue::Artifacts(v) => Ok(v),
            other => Err(shape_error("artifact list", &other)),
        }
    }

    pub fn into_events(self) -> Result<Vec<ProblemEvent>> {
        match self {
            CacheValue::Events(v) => Ok(v),
            other => Err(shape_error("event list", &other)),
        }
    }
}

fn shape_error(expected: &str, got: &CacheValue) -> ClientError {
    ClientError::Cache(format!("expected {expected}, found {}", got.kind()))
}

/// Hit/miss accounting, exposed for diagnostics
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

#[derive(Default)]
struct Entry {
    value: Option<CacheValue>,
    fetched_at: Option<Instant>,
    /// Request identity; bumped on every new fetch and every invalidation
    generation: u64,
    /// Present while a fetch for this key is in flight; dropping the sender
    /// wakes all waiters
    inflight: Option<watch::Sender<()>>,
}

enum Role {
    Fetcher(u64),
    Waiter(watch::Receiver<()>),
}

/// Key-addressed cache of fetched entities
pub struct EntityCache {
    fresh_for: Duration,
    entries: Mutex<HashMap<CacheKey, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EntityCache {
    pub fn new(fresh_for: Duration) -> Self {
        Self {
            fresh_for,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Read-through access. Returns the cached payload if fresh, otherwise
    /// fetches (sharing the fetch with any concurrent caller of the same key).
    ///
    /// If the shared fetch fails, its waiters wake, observe no fresh entry,
    /// and take over as the new fetcher; only the failure path can issue a
    /// second call for a key within its freshness window.
    pub async fn get_or_fetch<F, Fut>(&self, key: CacheKey, fetch: F) -> Result<CacheValue>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<CacheValue>>,
    {
        loop {
            let role = {
                let mut entries = self.entries.lock().await;
                let entry = entries.entry(key.clone()).or_default();
                if let (Some(value), Some(at)) = (&entry.value, entry.fetched_at) {
                    if at.elapsed() < self.fresh_for {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(value.clone());
                    }
                }
                match &entry.inflight {
                    Some(tx) => Role::Waiter(tx.subscribe()),
                    None => {
                        let (tx, _rx) = watch::channel(());
                        entry.inflight = Some(tx);
                        entry.generation += 1;
                        Role::Fetcher(entry.generation)
                    }
                }
            };

            match role {
                Role::Waiter(mut rx) => {
                    // Wakes when the fetcher finishes (sender dropped).
                    let _ = rx.changed().await;
                    continue;
                }
                Role::Fetcher(generation) => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    let result = fetch().await;
                    let mut entries = self.entries.lock().await;
                    let entry = entries.entry(key.clone()).or_default();
                    if entry.generation == generation {
                        if let Ok(value) = &result {
                            entry.value = Some(value.clone());
                            entry.fetched_at = Some(Instant::now());
                        }
                        // Dropping the sender releases the waiters.
                        entry.inflight = None;
                    } else {
                        tracing::debug!(?key, "discarding superseded fetch result");
                    }
                    return result;
                }
            }
        }
    }

    /// Current payload regardless of freshness, without fetching
    pub async fn peek(&self, key: &CacheKey) -> Option<CacheValue> {
        self.entries.lock().await.get(key)?.value.clone()
    }

    /// Prime or overwrite an entry; any in-flight fetch for the key is
    /// superseded.
    pub async fn insert(&self, key: CacheKey, value: CacheValue) {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(key).or_default();
        entry.value = Some(value);
        entry.fetched_at = Some(Instant::now());
        entry.generation += 1;
        entry.inflight = None;
    }

    /// Mark a key stale: the next read refetches, and any in-flight result
    /// for the key is discarded on arrival.
    pub async fn invalidate(&self, key: &CacheKey) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(key) {
            entry.fetched_at = None;
            entry.generation += 1;
            entry.inflight = None;
        }
    }

    /// Patch the problem entry and its list element under one lock, so flag
    /// and counter always move together from the caller's perspective.
    pub async fn patch_problem<F>(&self, id: &str, patch: F)
    where
        F: Fn(&mut Problem),
    {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&CacheKey::Problem(id.to_string())) {
            if let Some(CacheValue::Problem(problem)) = entry.value.as_mut() {
                patch(problem);
            }
        }
        if let Some(entry) = entries.get_mut(&CacheKey::ProblemList) {
            if let Some(CacheValue::Problems(problems)) = entry.value.as_mut() {
                if let Some(problem) = problems.iter_mut().find(|p| p.id == id) {
                    patch(problem);
                }
            }
        }
    }

    /// Patch one comment inside a cached comment list
    pub async fn patch_comment<F>(&self, key: &CacheKey, comment_id: &str, patch: F)
    where
        F: Fn(&mut Comment),
    {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(key) {
            if let Some(CacheValue::Comments(comments)) = entry.value.as_mut() {
                if let Some(comment) = comments.iter_mut().find(|c| c.id == comment_id) {
                    patch(comment);
                }
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
