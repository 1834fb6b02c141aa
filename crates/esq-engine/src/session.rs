//! # Search Session
//!
//! Lookup-or-execute front door for searches. Owns the [`ResultCache`] and
//! the most recent search, which paging and prefetch are relative to. Every
//! query that actually reaches the backend is fed to the
//! [`PerformanceAnalyzer`] and the [`QueryHistory`].

use crate::cache::{CacheKey, CacheStats, ResultCache};
use crate::config::EngineConfig;
use crate::connections::ConnectionRegistry;
use crate::error::{EngineError, Result};
use crate::executor::{self, NormalizedResult, StreamOutcome};
use crate::history::{HistorySnapshot, QueryHistory};
use crate::performance::{PerformanceAnalyzer, PerformanceSnapshot, SlowLogSnapshot};
use crate::store::{
    load_snapshot, save_snapshot, SnapshotStore, PERFORMANCE_KEY, QUERY_HISTORY_KEY,
    SLOW_QUERIES_KEY,
};
use esq_core::mapping::{index_fields, FieldInfo};
use esq_core::{compile_query, compile_sort, AggregationSpec, Group, SearchQuery, SortSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// A search authored as a filter tree rather than raw DSL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderSearch {
    pub index: String,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub sort: Vec<SortSpec>,
    #[serde(default)]
    pub from: usize,
    #[serde(default = "default_page_size")]
    pub size: usize,
}

fn default_page_size() -> usize {
    10
}

impl BuilderSearch {
    pub fn to_query(&self) -> SearchQuery {
        SearchQuery {
            index: self.index.clone(),
            query: compile_query(&self.groups),
            from: self.from,
            size: self.size,
            sort: compile_sort(&self.sort),
        }
    }
}

/// What paging and prefetch are computed from.
#[derive(Debug, Clone, Serialize)]
pub struct LastSearch {
    pub connection_id: String,
    pub query: SearchQuery,
    pub total: u64,
}

pub struct SearchSession {
    registry: Arc<ConnectionRegistry>,
    cache: Arc<Mutex<ResultCache>>,
    last: RwLock<Option<LastSearch>>,
    pub performance: Arc<PerformanceAnalyzer>,
    pub history: Arc<QueryHistory>,
    stream_batch_size: usize,
}

impl SearchSession {
    pub fn new(registry: Arc<ConnectionRegistry>, config: &EngineConfig) -> Self {
        Self {
            registry,
            cache: Arc::new(Mutex::new(ResultCache::new(config.cache_capacity))),
            last: RwLock::new(None),
            performance: Arc::new(PerformanceAnalyzer::new(config)),
            history: Arc::new(QueryHistory::new(config.max_query_history)),
            stream_batch_size: config.stream_batch_size,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Serve from the cache when allowed, otherwise run the query. Failed
    /// executions leave the cache untouched.
    pub async fn execute(
        &self,
        connection_id: &str,
        query: &SearchQuery,
        use_cache: bool,
    ) -> Result<NormalizedResult> {
        let key = CacheKey::new(connection_id, query);
        if use_cache {
            if let Some(hit) = self.cache.lock().await.get(&key) {
                self.remember(connection_id, query, hit.total).await;
                return Ok(hit);
            }
        }

        let backend = self.registry.get(connection_id).await?;
        let start = Instant::now();
        let result = executor::execute(backend.as_ref(), query).await?;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        if use_cache {
            self.cache.lock().await.insert(key, result.clone());
        }
        self.performance
            .record(connection_id, query, elapsed_ms, &result)
            .await;
        self.history
            .add(query, connection_id, Some(elapsed_ms), Some(result.total))
            .await;
        self.remember(connection_id, query, result.total).await;
        Ok(result)
    }

    pub async fn execute_builder(
        &self,
        connection_id: &str,
        search: &BuilderSearch,
        use_cache: bool,
    ) -> Result<NormalizedResult> {
        self.execute(connection_id, &search.to_query(), use_cache)
            .await
    }

    /// 1-based `page` of the most recent query. `page_size` defaults to
    /// that query's size; page 0 is treated as page 1.
    pub async fn go_to_page(
        &self,
        connection_id: &str,
        page: usize,
        page_size: Option<usize>,
    ) -> Result<NormalizedResult> {
        let last = self
            .last
            .read()
            .await
            .clone()
            .ok_or(EngineError::NoPreviousQuery)?;
        let size = page_size.unwrap_or(last.query.size);
        let from = page
            .saturating_sub(1)
            .checked_mul(size)
            .ok_or(EngineError::InvalidPage(page))?;
        self.execute(connection_id, &last.query.with_window(from, size), true)
            .await
    }

    /// Fetch the page after the most recent one into the cache, in the
    /// background. Returns `None` when there is nothing to fetch: no previous
    /// query, already past the end, or already cached.
    pub async fn preload_next_page(&self, connection_id: &str) -> Option<JoinHandle<()>> {
        let last = self.last.read().await.clone()?;
        let size = last.query.size;
        let next_from = last.query.from.checked_add(size)?;
        if size == 0 || next_from as u64 >= last.total {
            return None;
        }

        let next = last.query.with_window(next_from, size);
        let key = CacheKey::new(connection_id, &next);
        if self.cache.lock().await.contains(&key) {
            return None;
        }

        let registry = self.registry.clone();
        let cache = self.cache.clone();
        let connection_id = connection_id.to_string();
        Some(tokio::spawn(async move {
            let fetched = match registry.get(&connection_id).await {
                Ok(backend) => executor::execute(backend.as_ref(), &next).await,
                Err(e) => Err(e),
            };
            match fetched {
                Ok(result) => {
                    cache.lock().await.insert(key, result);
                    tracing::debug!("Prefetched {}[{}..]", next.index, next.from);
                }
                Err(e) => tracing::warn!("Prefetch of {} failed: {}", next.index, e),
            }
        }))
    }

    /// Multi-page fetch; bypasses the cache.
    pub async fn stream(
        &self,
        connection_id: &str,
        query: &SearchQuery,
        page_size: Option<usize>,
        max_results: Option<usize>,
    ) -> Result<StreamOutcome> {
        let backend = self.registry.get(connection_id).await?;
        executor::execute_stream(
            backend.as_ref(),
            query,
            page_size.unwrap_or(self.stream_batch_size),
            max_results,
        )
        .await
    }

    pub async fn aggregate(
        &self,
        connection_id: &str,
        index: &str,
        query: Option<&Value>,
        specs: &[AggregationSpec],
        size: Option<usize>,
    ) -> Result<NormalizedResult> {
        let backend = self.registry.get(connection_id).await?;
        executor::execute_aggregation(backend.as_ref(), index, query, specs, size).await
    }

    /// Field catalog of `index`.
    pub async fn fields(&self, connection_id: &str, index: &str) -> Result<Vec<FieldInfo>> {
        let backend = self.registry.get(connection_id).await?;
        let mapping = backend.mapping(index).await?;
        Ok(index_fields(&mapping, index))
    }

    pub async fn last_search(&self) -> Option<LastSearch> {
        self.last.read().await.clone()
    }

    /// Drop every cached page and forget the most recent search.
    pub async fn reset(&self) {
        self.cache.lock().await.clear();
        *self.last.write().await = None;
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.lock().await.stats()
    }

    async fn remember(&self, connection_id: &str, query: &SearchQuery, total: u64) {
        *self.last.write().await = Some(LastSearch {
            connection_id: connection_id.to_string(),
            query: query.clone(),
            total,
        });
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    pub async fn persist(&self, store: &dyn SnapshotStore) {
        save_snapshot(store, PERFORMANCE_KEY, &self.performance.snapshot().await).await;
        let slow = self.performance.slow_log.read().await.snapshot();
        save_snapshot(store, SLOW_QUERIES_KEY, &slow).await;
        save_snapshot(store, QUERY_HISTORY_KEY, &self.history.snapshot().await).await;
    }

    pub async fn restore(&self, store: &dyn SnapshotStore) {
        if let Some(snapshot) = load_snapshot::<PerformanceSnapshot>(store, PERFORMANCE_KEY).await
        {
            self.performance.restore(snapshot).await;
        }
        if let Some(snapshot) = load_snapshot::<SlowLogSnapshot>(store, SLOW_QUERIES_KEY).await {
            self.performance.slow_log.write().await.restore(snapshot);
        }
        if let Some(snapshot) = load_snapshot::<HistorySnapshot>(store, QUERY_HISTORY_KEY).await {
            self.history.restore(snapshot).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::ConnectionInfo;
    use crate::store::JsonFileStore;
    use crate::transport::mock::MockBackend;
    use esq_core::match_all;
    use serde_json::json;
    use std::time::Duration;

    async fn session_with(
        backend: Arc<MockBackend>,
        config: EngineConfig,
    ) -> SearchSession {
        let registry = Arc::new(ConnectionRegistry::default());
        registry
            .add(
                ConnectionInfo {
                    id: "c1".into(),
                    name: "mock".into(),
                    url: "mock://".into(),
                    authenticated: false,
                },
                backend,
            )
            .await;
        SearchSession::new(registry, &config)
    }

    fn page(from: usize, size: usize) -> SearchQuery {
        SearchQuery::new("logs", match_all()).with_window(from, size)
    }

    #[tokio::test]
    async fn test_identical_execution_hits_network_once() {
        let backend = Arc::new(MockBackend::with_hits(30));
        let session = session_with(backend.clone(), EngineConfig::default()).await;

        let first = session.execute("c1", &page(0, 10), true).await.unwrap();
        let second = session.execute("c1", &page(0, 10), true).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.calls(), 1);

        let stats = session.cache_stats().await;
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn test_cache_disabled_always_executes() {
        let backend = Arc::new(MockBackend::with_hits(30));
        let session = session_with(backend.clone(), EngineConfig::default()).await;
        session.execute("c1", &page(0, 10), false).await.unwrap();
        session.execute("c1", &page(0, 10), false).await.unwrap();
        assert_eq!(backend.calls(), 2);
        assert_eq!(session.cache_stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_overflow_evicts_earliest_page() {
        let backend = Arc::new(MockBackend::with_hits(100));
        let config = EngineConfig {
            cache_capacity: 2,
            ..Default::default()
        };
        let session = session_with(backend.clone(), config).await;
        for from in [0, 10, 20] {
            session.execute("c1", &page(from, 10), true).await.unwrap();
        }
        session.execute("c1", &page(10, 10), true).await.unwrap();
        session.execute("c1", &page(20, 10), true).await.unwrap();
        assert_eq!(backend.calls(), 3);

        session.execute("c1", &page(0, 10), true).await.unwrap();
        assert_eq!(backend.calls(), 4);
    }

    #[tokio::test]
    async fn test_failed_execution_is_not_cached() {
        let backend = Arc::new(MockBackend::with_hits(10));
        let session = session_with(backend.clone(), EngineConfig::default()).await;

        backend.set_failing(true);
        let err = session.execute("c1", &page(0, 10), true).await.unwrap_err();
        assert!(err.is_execution());
        assert_eq!(session.cache_stats().await.entries, 0);
        assert!(session.history.list().await.is_empty());

        backend.set_failing(false);
        session.execute("c1", &page(0, 10), true).await.unwrap();
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_unknown_connection() {
        let backend = Arc::new(MockBackend::with_hits(10));
        let session = session_with(backend, EngineConfig::default()).await;
        let err = session.execute("nope", &page(0, 10), true).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownConnection(_)));
    }

    #[tokio::test]
    async fn test_go_to_page() {
        let backend = Arc::new(MockBackend::with_hits(50));
        let session = session_with(backend.clone(), EngineConfig::default()).await;

        assert!(matches!(
            session.go_to_page("c1", 2, None).await,
            Err(EngineError::NoPreviousQuery)
        ));

        session.execute("c1", &page(0, 10), true).await.unwrap();
        let third = session.go_to_page("c1", 3, None).await.unwrap();
        assert_eq!(third.hits[0]["_id"], "20");

        let first = session.go_to_page("c1", 0, Some(5)).await.unwrap();
        assert_eq!(first.hits.len(), 5);
        assert_eq!(first.hits[0]["_id"], "0");
    }

    #[tokio::test]
    async fn test_go_to_page_rejects_offset_overflow() {
        let backend = Arc::new(MockBackend::with_hits(50));
        let session = session_with(backend.clone(), EngineConfig::default()).await;

        session.execute("c1", &page(0, 10), true).await.unwrap();
        let err = session
            .go_to_page("c1", usize::MAX / 2, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidPage(p) if p == usize::MAX / 2));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_preload_skips_when_next_offset_overflows() {
        let backend = Arc::new(MockBackend::with_hits(25));
        let session = session_with(backend.clone(), EngineConfig::default()).await;

        session
            .execute("c1", &page(usize::MAX - 2, 10), true)
            .await
            .unwrap();
        assert!(session.preload_next_page("c1").await.is_none());
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_preload_fills_cache_for_next_page() {
        let backend = Arc::new(MockBackend::with_hits(25));
        let session = session_with(backend.clone(), EngineConfig::default()).await;

        session.execute("c1", &page(0, 10), true).await.unwrap();
        let handle = session.preload_next_page("c1").await.unwrap();
        handle.await.unwrap();
        assert_eq!(backend.calls(), 2);

        let second = session.go_to_page("c1", 2, None).await.unwrap();
        assert_eq!(second.hits[0]["_id"], "10");
        assert_eq!(backend.calls(), 2);

        // Page two is cached, page three is next.
        let handle = session.preload_next_page("c1").await.unwrap();
        handle.await.unwrap();
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_preload_skips_when_past_the_end() {
        let backend = Arc::new(MockBackend::with_hits(10));
        let session = session_with(backend.clone(), EngineConfig::default()).await;

        assert!(session.preload_next_page("c1").await.is_none());
        session.execute("c1", &page(0, 10), true).await.unwrap();
        assert!(session.preload_next_page("c1").await.is_none());
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_preload_failure_is_swallowed() {
        let backend = Arc::new(MockBackend::with_hits(25));
        let session = session_with(backend.clone(), EngineConfig::default()).await;

        session.execute("c1", &page(0, 10), true).await.unwrap();
        backend.set_failing(true);
        let handle = session.preload_next_page("c1").await.unwrap();
        assert!(handle.await.is_ok());
        assert_eq!(session.cache_stats().await.entries, 1);
    }

    #[tokio::test]
    async fn test_reset_clears_cache_and_last_search() {
        let backend = Arc::new(MockBackend::with_hits(25));
        let session = session_with(backend.clone(), EngineConfig::default()).await;
        session.execute("c1", &page(0, 10), true).await.unwrap();

        session.reset().await;
        assert_eq!(session.cache_stats().await.entries, 0);
        assert!(session.last_search().await.is_none());

        session.execute("c1", &page(0, 10), true).await.unwrap();
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_execution_feeds_analyzer_and_history() {
        let backend = Arc::new(MockBackend::with_hits(5).with_delay(Duration::from_millis(30)));
        let config = EngineConfig {
            slow_query_threshold_ms: 5,
            ..Default::default()
        };
        let session = session_with(backend.clone(), config).await;
        session.execute("c1", &page(0, 10), true).await.unwrap();
        // Cache hits are not re-recorded.
        session.execute("c1", &page(0, 10), true).await.unwrap();

        assert_eq!(session.performance.history(10).await.len(), 1);
        assert_eq!(session.performance.analyses().await.len(), 1);
        let items = session.history.list().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].result_count, Some(5));
    }

    #[tokio::test]
    async fn test_execute_builder_compiles_groups() {
        let backend = Arc::new(MockBackend::with_hits(5));
        let session = session_with(backend.clone(), EngineConfig::default()).await;
        let search: BuilderSearch = serde_json::from_value(json!({
            "index": "logs",
            "groups": [{"operator": "must", "conditions": [
                {"field": "status", "operator": "equals", "value": "ok", "dataType": "keyword"}
            ]}],
            "sort": [{"field": "ts", "order": "desc"}]
        }))
        .unwrap();
        session.execute_builder("c1", &search, true).await.unwrap();

        let body = &backend.requests()[0];
        assert_eq!(body["query"]["bool"]["must"][0]["term"]["status"], "ok");
        assert_eq!(body["sort"][0]["ts"]["order"], "desc");
    }

    #[tokio::test]
    async fn test_stream_and_fields() {
        let backend = Arc::new(MockBackend::with_hits(7));
        let config = EngineConfig {
            stream_batch_size: 3,
            ..Default::default()
        };
        let session = session_with(backend.clone(), config).await;
        let outcome = session
            .stream("c1", &page(0, 10), None, None)
            .await
            .unwrap();
        assert_eq!(outcome.hits.len(), 7);
        assert_eq!(outcome.pages, 3);

        let fields = session.fields("c1", "logs").await.unwrap();
        assert_eq!(fields[0].name, "title");
    }

    #[tokio::test]
    async fn test_persist_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let backend = Arc::new(MockBackend::with_hits(5));
        let session = session_with(backend.clone(), EngineConfig::default()).await;
        session.execute("c1", &page(0, 10), true).await.unwrap();
        session.persist(&store).await;

        let fresh = session_with(backend, EngineConfig::default()).await;
        fresh.restore(&store).await;
        assert_eq!(fresh.performance.history(10).await.len(), 1);
        assert_eq!(fresh.history.list().await.len(), 1);
        // The cache is never persisted.
        assert_eq!(fresh.cache_stats().await.entries, 0);
    }
}
