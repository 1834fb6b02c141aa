//! # Engine Configuration
//!
//! Every knob has a default, so an empty `[engine]` table (or none at all)
//! is a valid configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_slow_query_threshold")]
    pub slow_query_threshold_ms: u64,
    #[serde(default = "default_max_performance_history")]
    pub max_performance_history: usize,
    #[serde(default = "default_max_analyses")]
    pub max_analyses: usize,
    /// Number of most recent records `stats()` looks at.
    #[serde(default = "default_stats_window")]
    pub stats_window: usize,
    #[serde(default = "default_max_slow_queries")]
    pub max_slow_queries: usize,
    #[serde(default = "default_slow_query_retention_days")]
    pub slow_query_retention_days: i64,
    #[serde(default = "default_similar_limit")]
    pub similar_limit: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_max_query_history")]
    pub max_query_history: usize,
    #[serde(default = "default_stream_batch_size")]
    pub stream_batch_size: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            slow_query_threshold_ms: default_slow_query_threshold(),
            max_performance_history: default_max_performance_history(),
            max_analyses: default_max_analyses(),
            stats_window: default_stats_window(),
            max_slow_queries: default_max_slow_queries(),
            slow_query_retention_days: default_slow_query_retention_days(),
            similar_limit: default_similar_limit(),
            similarity_threshold: default_similarity_threshold(),
            max_query_history: default_max_query_history(),
            stream_batch_size: default_stream_batch_size(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_cache_capacity() -> usize {
    50
}
fn default_slow_query_threshold() -> u64 {
    1000
}
fn default_max_performance_history() -> usize {
    1000
}
fn default_max_analyses() -> usize {
    100
}
fn default_stats_window() -> usize {
    100
}
fn default_max_slow_queries() -> usize {
    1000
}
fn default_slow_query_retention_days() -> i64 {
    30
}
fn default_similar_limit() -> usize {
    10
}
fn default_similarity_threshold() -> f64 {
    esq_core::SIMILARITY_THRESHOLD
}
fn default_max_query_history() -> usize {
    100
}
fn default_stream_batch_size() -> usize {
    1000
}
fn default_request_timeout() -> u64 {
    30
}
