//! # Search Executor
//!
//! Sends compiled requests through a [`SearchBackend`] and normalizes the
//! responses, tolerating the different `hits.total` shapes backends emit.

use crate::error::Result;
use crate::transport::SearchBackend;
use esq_core::{compile_aggregations, match_all, AggregationSpec, SearchQuery, MAX_RESULT_WINDOW};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardStats {
    pub total: u64,
    pub successful: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Backend response reduced to the fields callers rely on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResult {
    pub total: u64,
    pub took: u64,
    pub timed_out: bool,
    pub hits: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregations: Option<Value>,
    pub shards: ShardStats,
}

/// Hits accumulated across pages by [`execute_stream`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamOutcome {
    pub hits: Vec<Value>,
    /// `hits.total` reported by the first page.
    pub total: u64,
    pub pages: usize,
}

/// Missing fields default; nothing here fails.
pub fn normalize(response: &Value) -> NormalizedResult {
    let total = match response.pointer("/hits/total") {
        Some(Value::Object(wrapper)) => wrapper.get("value").and_then(Value::as_u64).unwrap_or(0),
        Some(v) => v.as_u64().unwrap_or(0),
        None => 0,
    };
    let hits = response
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let shard = |name: &str| {
        response
            .get("_shards")
            .and_then(|s| s.get(name))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };

    NormalizedResult {
        total,
        took: response.get("took").and_then(Value::as_u64).unwrap_or(0),
        timed_out: response
            .get("timed_out")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        hits,
        aggregations: response.get("aggregations").cloned(),
        shards: ShardStats {
            total: shard("total"),
            successful: shard("successful"),
            skipped: shard("skipped"),
            failed: shard("failed"),
        },
    }
}

/// `{query, from, size, sort?}` with `size` capped at the backend limit.
pub fn build_request_body(query: &SearchQuery) -> Value {
    let mut body = Map::new();
    body.insert("query".into(), query.query.clone());
    body.insert("from".into(), json!(query.from));
    body.insert("size".into(), json!(query.effective_size()));
    if let Some(sort) = &query.sort {
        body.insert("sort".into(), Value::Array(sort.clone()));
    }
    Value::Object(body)
}

pub async fn execute(backend: &dyn SearchBackend, query: &SearchQuery) -> Result<NormalizedResult> {
    let body = build_request_body(query);
    let response = backend.search(&query.index, &body).await?;
    Ok(normalize(&response))
}

/// Page through results starting at `query.from`.
///
/// Each request asks for at most `page_size` (capped at the backend limit)
/// and never more than what is left of `max_results`. `from` advances by the
/// number of hits actually returned. Stops on an empty page, a short page,
/// or once `max_results` hits are collected.
pub async fn execute_stream(
    backend: &dyn SearchBackend,
    query: &SearchQuery,
    page_size: usize,
    max_results: Option<usize>,
) -> Result<StreamOutcome> {
    let page_size = page_size.min(MAX_RESULT_WINDOW);
    let limit = max_results.unwrap_or(usize::MAX);
    let mut outcome = StreamOutcome::default();
    let mut from = query.from;

    while page_size > 0 && outcome.hits.len() < limit {
        let requested = page_size.min(limit - outcome.hits.len());
        let page = execute(backend, &query.with_window(from, requested)).await?;
        if outcome.pages == 0 {
            outcome.total = page.total;
        }
        outcome.pages += 1;

        let returned = page.hits.len();
        if returned == 0 {
            break;
        }
        let room = limit - outcome.hits.len();
        outcome.hits.extend(page.hits.into_iter().take(room));
        from += returned;

        if returned < requested {
            break;
        }
    }

    tracing::debug!(
        "Streamed {} hits from {} in {} pages",
        outcome.hits.len(),
        query.index,
        outcome.pages
    );
    Ok(outcome)
}

/// Compile `specs` and run them as `{size, query, aggs}`. Compilation errors
/// surface before anything is sent.
pub async fn execute_aggregation(
    backend: &dyn SearchBackend,
    index: &str,
    query: Option<&Value>,
    specs: &[AggregationSpec],
    size: Option<usize>,
) -> Result<NormalizedResult> {
    let aggs = compile_aggregations(specs)?;
    let body = json!({
        "size": size.unwrap_or(0).min(MAX_RESULT_WINDOW),
        "query": query.cloned().unwrap_or_else(match_all),
        "aggs": aggs,
    });
    let response = backend.search(index, &body).await?;
    Ok(normalize(&response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockBackend;
    use crate::EngineError;

    #[test]
    fn test_normalize_accepts_both_total_shapes() {
        let plain = normalize(&json!({"hits": {"total": 42, "hits": []}}));
        assert_eq!(plain.total, 42);
        let wrapped = normalize(&json!({"hits": {"total": {"value": 7, "relation": "eq"}}}));
        assert_eq!(wrapped.total, 7);
    }

    #[test]
    fn test_normalize_defaults_missing_fields() {
        let result = normalize(&json!({}));
        assert_eq!(result, NormalizedResult::default());
        assert!(result.aggregations.is_none());
    }

    #[test]
    fn test_normalize_reads_shards_and_aggregations() {
        let result = normalize(&json!({
            "took": 12,
            "timed_out": true,
            "_shards": {"total": 5, "successful": 4, "failed": 1},
            "aggregations": {"by_status": {"buckets": []}}
        }));
        assert_eq!(result.took, 12);
        assert!(result.timed_out);
        assert_eq!(result.shards.failed, 1);
        assert_eq!(result.shards.skipped, 0);
        assert!(result.aggregations.is_some());
    }

    #[test]
    fn test_request_body_caps_size_and_omits_missing_sort() {
        let mut query = SearchQuery::new("logs", match_all());
        query.size = 25_000;
        let body = build_request_body(&query);
        assert_eq!(body["size"], json!(10_000));
        assert!(body.get("sort").is_none());

        query.sort = Some(vec![json!({"ts": {"order": "desc"}})]);
        assert_eq!(build_request_body(&query)["sort"][0]["ts"]["order"], "desc");
    }

    #[tokio::test]
    async fn test_stream_never_exceeds_max_results() {
        let backend = MockBackend::with_hits(95);
        let query = SearchQuery::new("logs", match_all());
        let outcome = execute_stream(&backend, &query, 20, Some(50)).await.unwrap();
        assert_eq!(outcome.hits.len(), 50);
        assert_eq!(outcome.total, 95);
        assert_eq!(backend.calls(), 3);
        // Third page only asks for the remainder.
        assert_eq!(backend.requests()[2]["size"], json!(10));
        assert_eq!(backend.requests()[2]["from"], json!(40));
    }

    #[tokio::test]
    async fn test_stream_stops_on_short_page() {
        let backend = MockBackend::with_hits(45);
        let query = SearchQuery::new("logs", match_all());
        let outcome = execute_stream(&backend, &query, 20, None).await.unwrap();
        assert_eq!(outcome.hits.len(), 45);
        assert_eq!(outcome.pages, 3);
    }

    #[tokio::test]
    async fn test_stream_stops_on_empty_page() {
        let backend = MockBackend::with_hits(40);
        let query = SearchQuery::new("logs", match_all());
        let outcome = execute_stream(&backend, &query, 20, None).await.unwrap();
        assert_eq!(outcome.hits.len(), 40);
        // Two full pages, then an empty one.
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_stream_with_zero_page_size_sends_nothing() {
        let backend = MockBackend::with_hits(10);
        let query = SearchQuery::new("logs", match_all());
        let outcome = execute_stream(&backend, &query, 0, None).await.unwrap();
        assert!(outcome.hits.is_empty());
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_aggregation_fails_before_network() {
        let backend = MockBackend::with_hits(10);
        let specs: Vec<AggregationSpec> =
            serde_json::from_value(json!([{"name": "p", "type": "percentiles", "field": "x"}]))
                .unwrap();
        let err = execute_aggregation(&backend, "logs", None, &specs, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Compile(_)));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_aggregation_body_defaults() {
        let backend = MockBackend::with_hits(10);
        let specs: Vec<AggregationSpec> =
            serde_json::from_value(json!([{"name": "by_status", "type": "terms", "field": "status"}]))
                .unwrap();
        execute_aggregation(&backend, "logs", None, &specs, None)
            .await
            .unwrap();
        let body = &backend.requests()[0];
        assert_eq!(body["size"], json!(0));
        assert_eq!(body["query"], match_all());
        assert_eq!(body["aggs"]["by_status"]["terms"]["field"], "status");
    }
}
