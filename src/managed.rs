//! Shared retriever behavior.
//!
//! [`ManagedRetriever`] wraps any [`SearchBackend`] with the cross-cutting
//! pipeline every engine gets for free, applied in this order:
//!
//! 1. TTL response cache (lazy eviction, hits short-circuit everything below)
//! 2. Sliding-window rate limiting (waiters sleep, requests are never dropped)
//! 3. Retry with exponential backoff for transient failures
//! 4. Fallback queries, each sent through the same path
//! 5. Quality filtering and ordering
//!
//! Per-retriever statistics feed a counter-derived health status.

use anyhow::Result;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::{EngineConfig, SearchConfig};
use crate::models::RetrievedItem;
use crate::retriever::SearchBackend;
use crate::scoring;

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Health derived from traffic counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Warning,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// Counters for one managed retriever. Cache hits never touch the
/// succeeded/failed tallies; health reflects real backend traffic only.
#[derive(Debug, Clone, Default)]
pub struct RetrieverStats {
    pub total_queries: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cache_hits: u64,
    pub total_response_ms: u64,
}

impl RetrieverStats {
    pub fn success_rate(&self) -> f64 {
        let attempts = self.succeeded + self.failed;
        if attempts == 0 {
            return 1.0;
        }
        self.succeeded as f64 / attempts as f64
    }

    pub fn avg_response_ms(&self) -> f64 {
        if self.succeeded == 0 {
            return 0.0;
        }
        self.total_response_ms as f64 / self.succeeded as f64
    }

    pub fn health(&self) -> HealthStatus {
        let rate = self.success_rate();
        if rate >= 0.9 {
            HealthStatus::Healthy
        } else if rate >= 0.7 {
            HealthStatus::Warning
        } else {
            HealthStatus::Unhealthy
        }
    }
}

struct CacheEntry {
    results: Vec<RetrievedItem>,
    created: Instant,
}

/// A [`SearchBackend`] plus the shared pipeline state around it.
pub struct ManagedRetriever {
    backend: Box<dyn SearchBackend>,
    engine_config: EngineConfig,
    search_config: SearchConfig,
    cache: Mutex<HashMap<String, CacheEntry>>,
    window: tokio::sync::Mutex<VecDeque<Instant>>,
    stats: Mutex<RetrieverStats>,
}

impl ManagedRetriever {
    pub fn new(
        backend: Box<dyn SearchBackend>,
        engine_config: EngineConfig,
        search_config: SearchConfig,
    ) -> Self {
        Self {
            backend,
            engine_config,
            search_config,
            cache: Mutex::new(HashMap::new()),
            window: tokio::sync::Mutex::new(VecDeque::new()),
            stats: Mutex::new(RetrieverStats::default()),
        }
    }

    pub fn engine_id(&self) -> &str {
        self.backend.engine_id()
    }

    pub fn source_type(&self) -> crate::models::SourceType {
        self.backend.source_type()
    }

    pub fn description(&self) -> &str {
        self.backend.description()
    }

    pub fn stats(&self) -> RetrieverStats {
        self.stats.lock().expect("stats lock poisoned").clone()
    }

    /// Re-run the backend's config check against current settings.
    pub fn config_valid(&self) -> bool {
        self.backend.check_config_valid(&self.engine_config)
    }

    /// Search with the primary query only.
    pub async fn search(&self, query: &str) -> Result<Vec<RetrievedItem>> {
        self.search_with_fallbacks(query, &[]).await
    }

    /// Search the primary query, then each fallback in order until one
    /// yields results. Every query goes through the full cache / rate-limit
    /// / retry path. Returns `Ok(vec![])` when every query succeeded but
    /// found nothing; returns an error only when every query failed.
    pub async fn search_with_fallbacks(
        &self,
        query: &str,
        fallbacks: &[String],
    ) -> Result<Vec<RetrievedItem>> {
        let mut last_err = None;
        let mut any_succeeded = false;

        for (i, q) in std::iter::once(query)
            .chain(fallbacks.iter().map(|s| s.as_str()))
            .enumerate()
        {
            match self.run_query(q).await {
                Ok(results) => {
                    any_succeeded = true;
                    if !results.is_empty() {
                        return Ok(results);
                    }
                    if i == 0 && !fallbacks.is_empty() {
                        tracing::debug!(
                            engine = self.engine_id(),
                            query = q,
                            "primary query empty, trying fallbacks"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        engine = self.engine_id(),
                        query = q,
                        error = %e,
                        "query failed"
                    );
                    last_err = Some(e);
                }
            }
        }

        if any_succeeded {
            Ok(Vec::new())
        } else {
            Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no queries attempted")))
        }
    }

    /// One query through cache, rate limit, retry, and filtering.
    async fn run_query(&self, query: &str) -> Result<Vec<RetrievedItem>> {
        {
            let mut stats = self.stats.lock().expect("stats lock poisoned");
            stats.total_queries += 1;
        }

        let key = self.cache_key(query);
        if let Some(results) = self.cache_lookup(&key) {
            let mut stats = self.stats.lock().expect("stats lock poisoned");
            stats.cache_hits += 1;
            return Ok(results);
        }

        let max_retries = self.search_config.max_retries;
        let mut last_err = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            self.acquire_rate_slot().await;

            let started = Instant::now();
            match self
                .backend
                .search(query, &self.engine_config, self.search_config.max_results)
                .await
            {
                Ok(raw) => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    let filtered = self.filter_results(raw);
                    {
                        let mut stats = self.stats.lock().expect("stats lock poisoned");
                        stats.succeeded += 1;
                        stats.total_response_ms += elapsed_ms;
                    }
                    if !filtered.is_empty() {
                        self.cache_store(key, filtered.clone());
                    }
                    return Ok(filtered);
                }
                Err(e) => {
                    tracing::debug!(
                        engine = self.engine_id(),
                        attempt,
                        error = %e,
                        "search attempt failed"
                    );
                    last_err = Some(e);
                }
            }
        }

        {
            let mut stats = self.stats.lock().expect("stats lock poisoned");
            stats.failed += 1;
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("search failed")))
    }

    /// Wait until the sliding window has room, then claim a slot.
    /// Admission is FIFO relative to eligibility; nothing is ever dropped.
    async fn acquire_rate_slot(&self) {
        let limit = self.engine_config.rate_limit_per_minute.max(1);
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                while window
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= RATE_WINDOW)
                {
                    window.pop_front();
                }
                if window.len() < limit {
                    window.push_back(now);
                    None
                } else {
                    let oldest = *window.front().expect("window non-empty");
                    Some(RATE_WINDOW - now.duration_since(oldest))
                }
            };
            match wait {
                None => return,
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }
    }

    /// Drop items without a URL or title, drop items below the quality
    /// threshold, and order the rest best-first.
    fn filter_results(&self, raw: Vec<RetrievedItem>) -> Vec<RetrievedItem> {
        let threshold = self.search_config.min_quality_score;
        let mut scored: Vec<(f64, RetrievedItem)> = raw
            .into_iter()
            .filter(|item| !item.url.trim().is_empty() && !item.title.trim().is_empty())
            .map(|item| (scoring::blended_quality(&item), item))
            .filter(|(score, _)| *score >= threshold)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().map(|(_, item)| item).collect()
    }

    fn cache_key(&self, query: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.backend.source_type().as_str().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.backend.engine_id().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(query.as_bytes());
        for key in self.backend.required_config_keys() {
            hasher.update(b"\x1f");
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(self.engine_config.get(key).unwrap_or_default().as_bytes());
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    fn cache_lookup(&self, key: &str) -> Option<Vec<RetrievedItem>> {
        let ttl = Duration::from_secs(self.search_config.cache_ttl_secs);
        let mut cache = self.cache.lock().expect("cache lock poisoned");
        match cache.get(key) {
            Some(entry) if entry.created.elapsed() < ttl => Some(entry.results.clone()),
            Some(_) => {
                // Stale: evict on touch.
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    fn cache_store(&self, key: String, results: Vec<RetrievedItem>) {
        let mut cache = self.cache.lock().expect("cache lock poisoned");
        cache.insert(
            key,
            CacheEntry {
                results,
                created: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, SearchConfig};
    use crate::models::{RetrievedItem, SourceType};
    use crate::retriever::SearchBackend;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn item(url: &str, title: &str) -> RetrievedItem {
        let mut it = RetrievedItem::new(url, title, SourceType::Web);
        it.snippet = "A reasonably informative snippet describing the page in enough detail."
            .to_string();
        it.relevance_score = 0.8;
        it
    }

    /// Backend that fails the first `fail_first` calls, then returns
    /// per-query canned results.
    struct ScriptedBackend {
        fail_first: usize,
        calls: Arc<AtomicUsize>,
        results: HashMap<String, Vec<RetrievedItem>>,
    }

    impl ScriptedBackend {
        fn new() -> Self {
            Self {
                fail_first: 0,
                calls: Arc::new(AtomicUsize::new(0)),
                results: HashMap::new(),
            }
        }

        fn with_results(mut self, query: &str, results: Vec<RetrievedItem>) -> Self {
            self.results.insert(query.to_string(), results);
            self
        }
    }

    #[async_trait]
    impl SearchBackend for ScriptedBackend {
        fn engine_id(&self) -> &str {
            "scripted"
        }
        fn source_type(&self) -> SourceType {
            SourceType::Web
        }
        fn description(&self) -> &str {
            "scripted test backend"
        }
        fn check_config_valid(&self, _config: &EngineConfig) -> bool {
            true
        }
        async fn search(
            &self,
            query: &str,
            _config: &EngineConfig,
            _max_results: usize,
        ) -> Result<Vec<RetrievedItem>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                anyhow::bail!("transient failure {}", n);
            }
            Ok(self.results.get(query).cloned().unwrap_or_default())
        }
    }

    fn managed(backend: ScriptedBackend) -> ManagedRetriever {
        managed_with(backend, SearchConfig::default(), EngineConfig::default())
    }

    fn managed_with(
        backend: ScriptedBackend,
        search: SearchConfig,
        engine: EngineConfig,
    ) -> ManagedRetriever {
        ManagedRetriever::new(Box::new(backend), engine, search)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_backend() {
        let backend = ScriptedBackend::new().with_results("rust", vec![item("https://a.com", "Rust language overview")]);
        let calls = backend.calls.clone();
        let retriever = managed(backend);

        let first = retriever.search("rust").await.unwrap();
        let second = retriever.search("rust").await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = retriever.stats();
        assert_eq!(stats.total_queries, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.succeeded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_expires_after_ttl() {
        let backend = ScriptedBackend::new().with_results("rust", vec![item("https://a.com", "Rust language overview")]);
        let calls = backend.calls.clone();
        let mut search = SearchConfig::default();
        search.cache_ttl_secs = 300;
        let retriever = managed_with(backend, search, EngineConfig::default());

        retriever.search("rust").await.unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;
        retriever.search("rust").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(retriever.stats().cache_hits, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_results_not_cached() {
        let backend = ScriptedBackend::new();
        let calls = backend.calls.clone();
        let retriever = managed(backend);

        assert!(retriever.search("nothing").await.unwrap().is_empty());
        assert!(retriever.search("nothing").await.unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_delays_excess_requests() {
        let backend = ScriptedBackend::new()
            .with_results("q1", vec![item("https://a.com/1", "First result page title")])
            .with_results("q2", vec![item("https://a.com/2", "Second result page title")])
            .with_results("q3", vec![item("https://a.com/3", "Third result page title")]);
        let mut engine = EngineConfig::default();
        engine.rate_limit_per_minute = 2;
        let retriever = managed_with(backend, SearchConfig::default(), engine);

        let start = Instant::now();
        retriever.search("q1").await.unwrap();
        retriever.search("q2").await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));

        // Third request must wait for the oldest slot to age out.
        retriever.search("q3").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(59));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success() {
        let mut backend =
            ScriptedBackend::new().with_results("rust", vec![item("https://a.com", "Rust language overview")]);
        backend.fail_first = 2;
        let calls = backend.calls.clone();
        let mut search = SearchConfig::default();
        search.max_retries = 2;
        let retriever = managed_with(backend, search, EngineConfig::default());

        let start = Instant::now();
        let results = retriever.search("rust").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two failed attempts back off 1s then 2s before the third succeeds.
        assert!(start.elapsed() >= Duration::from_secs(3));

        let stats = retriever.stats();
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_is_error() {
        let mut backend = ScriptedBackend::new();
        backend.fail_first = usize::MAX;
        let calls = backend.calls.clone();
        let mut search = SearchConfig::default();
        search.max_retries = 2;
        let retriever = managed_with(backend, search, EngineConfig::default());

        assert!(retriever.search("rust").await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let stats = retriever.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.health(), HealthStatus::Unhealthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_query_used_when_primary_empty() {
        let backend = ScriptedBackend::new()
            .with_results("fallback one", vec![item("https://b.com", "Fallback result page title")]);
        let retriever = managed(backend);

        let results = retriever
            .search_with_fallbacks("primary", &["fallback one".to_string()])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://b.com");
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_drops_incomplete_and_low_quality() {
        let good = item("https://en.wikipedia.org/wiki/Rust", "Rust programming language history");
        let mut no_url = item("", "Has a title but no url at all");
        no_url.url = String::new();
        let mut junk = RetrievedItem::new("https://weird.xyz/x", "Ad", SourceType::Web);
        junk.snippet = String::new();
        junk.relevance_score = 0.0;

        let backend =
            ScriptedBackend::new().with_results("rust", vec![no_url, junk, good.clone()]);
        let retriever = managed(backend);

        let results = retriever.search("rust").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, good.url);
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_sorted_best_first() {
        let mut strong = item("https://en.wikipedia.org/wiki/A", "A long and descriptive title here");
        strong.relevance_score = 0.9;
        let mut weak = item("https://weird.xyz/b", "Short");
        weak.snippet = "tiny".to_string();
        weak.relevance_score = 0.4;

        let backend =
            ScriptedBackend::new().with_results("q", vec![weak.clone(), strong.clone()]);
        let retriever = managed(backend);

        let results = retriever.search("q").await.unwrap();
        assert_eq!(results.first().map(|r| r.url.as_str()), Some(strong.url.as_str()));
    }

    #[test]
    fn test_health_thresholds() {
        let mut stats = RetrieverStats::default();
        assert_eq!(stats.health(), HealthStatus::Healthy);
        stats.succeeded = 9;
        stats.failed = 1;
        assert_eq!(stats.health(), HealthStatus::Healthy);
        stats.succeeded = 8;
        stats.failed = 2;
        assert_eq!(stats.health(), HealthStatus::Warning);
        stats.succeeded = 6;
        stats.failed = 4;
        assert_eq!(stats.health(), HealthStatus::Unhealthy);
    }
}
