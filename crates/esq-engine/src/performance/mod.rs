//! # Performance Analyzer
//!
//! Records every executed query, scores the slow ones and keeps them in the
//! [`SlowQueryLog`] for similarity lookups and clustering.
//!
//! Scoring starts at 100 and subtracts one penalty per finding:
//!
//! | Finding                          | Penalty |
//! |----------------------------------|---------|
//! | execution time > 5000ms          | 30      |
//! | execution time > 2000ms          | 20      |
//! | any failed shard                 | 25      |
//! | more than 10,000 results         | 10      |
//! | structural complexity score > 7  | 15      |
//! | timed out                        | 40      |
//!
//! The score never drops below 0.

pub mod slow_log;

pub use slow_log::{
    ExportFormat, HourlyBucket, SimilarQuery, SlowLogSnapshot, SlowQueryCluster, SlowQueryEntry,
    SlowQueryGroup, SlowQueryLog, SlowQueryStats, Trend,
};

use crate::config::EngineConfig;
use crate::executor::{NormalizedResult, ShardStats};
use chrono::{DateTime, Utc};
use esq_core::{analyze_complexity, ComplexityReport, SearchQuery};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Records kept in a snapshot.
pub const PERSISTED_RECORDS: usize = 100;
/// Analyses kept in a snapshot.
pub const PERSISTED_ANALYSES: usize = 50;

const LARGE_RESULT_COUNT: u64 = 10_000;
const COMPLEX_QUERY_SCORE: u32 = 7;

/// One executed query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceRecord {
    pub query_id: String,
    pub connection_id: String,
    pub index: String,
    pub query: Value,
    pub execution_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub result_count: u64,
    pub took_ms: u64,
    pub timed_out: bool,
    pub shards: ShardStats,
}

impl PerformanceRecord {
    pub fn new(
        connection_id: &str,
        query: &SearchQuery,
        execution_time_ms: u64,
        result: &NormalizedResult,
    ) -> Self {
        Self {
            query_id: format!("q-{}", uuid::Uuid::new_v4().as_simple()),
            connection_id: connection_id.to_string(),
            index: query.index.clone(),
            query: query.query.clone(),
            execution_time_ms,
            timestamp: Utc::now(),
            result_count: result.total,
            took_ms: result.took,
            timed_out: result.timed_out,
            shards: result.shards.clone(),
        }
    }

    fn to_slow_entry(&self, threshold_ms: u64) -> SlowQueryEntry {
        SlowQueryEntry {
            query_id: self.query_id.clone(),
            connection_id: self.connection_id.clone(),
            index: self.index.clone(),
            query: self.query.clone(),
            execution_time_ms: self.execution_time_ms,
            timestamp: self.timestamp,
            result_count: self.result_count,
            threshold_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    ExecutionTime,
    Shards,
    ResultSize,
    QueryComplexity,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub category: Category,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub suggestion: String,
    /// 0-10.
    pub impact_score: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryAnalysis {
    pub query_id: String,
    /// 0-100.
    pub performance_score: u32,
    pub recommendations: Vec<Recommendation>,
    pub complexity: ComplexityReport,
    pub record: PerformanceRecord,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct PerformanceStats {
    pub total_queries: usize,
    pub avg_execution_time: f64,
    pub slow_queries: usize,
    pub fast_queries: usize,
    pub avg_result_count: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub records: Vec<PerformanceRecord>,
    pub analyses: Vec<QueryAnalysis>,
}

/// Score one record. Pure; never fails.
pub fn analyze(record: &PerformanceRecord) -> QueryAnalysis {
    let mut recommendations = Vec::new();
    let mut penalty = 0u32;

    if record.execution_time_ms > 5000 {
        recommendations.push(Recommendation {
            category: Category::ExecutionTime,
            severity: Severity::Critical,
            title: "Query execution time is very long".into(),
            description: format!(
                "Query took {}ms, above the recommended 5000ms",
                record.execution_time_ms
            ),
            suggestion: "Add more selective filters or review the index mapping".into(),
            impact_score: 9,
        });
        penalty += 30;
    } else if record.execution_time_ms > 2000 {
        recommendations.push(Recommendation {
            category: Category::ExecutionTime,
            severity: Severity::High,
            title: "Query execution time is long".into(),
            description: format!("Query took {}ms", record.execution_time_ms),
            suggestion: "Check whether the conditions can be narrowed or cached".into(),
            impact_score: 6,
        });
        penalty += 20;
    }

    if record.shards.failed > 0 {
        recommendations.push(Recommendation {
            category: Category::Shards,
            severity: Severity::Critical,
            title: "Shard failures".into(),
            description: format!("{} shard(s) failed", record.shards.failed),
            suggestion: "Check cluster health and shard allocation".into(),
            impact_score: 8,
        });
        penalty += 25;
    }

    if record.result_count > LARGE_RESULT_COUNT {
        recommendations.push(Recommendation {
            category: Category::ResultSize,
            severity: Severity::Medium,
            title: "Result set is large".into(),
            description: format!("Query matched {} documents", record.result_count),
            suggestion: "Page through results or add more precise filters".into(),
            impact_score: 4,
        });
        penalty += 10;
    }

    let complexity = analyze_complexity(&record.query);
    if complexity.score > COMPLEX_QUERY_SCORE {
        recommendations.push(Recommendation {
            category: Category::QueryComplexity,
            severity: Severity::Medium,
            title: "Query is structurally complex".into(),
            description: complexity.description(),
            suggestion: "Flatten nested bool queries and avoid wildcard or regexp clauses".into(),
            impact_score: 5,
        });
        penalty += 15;
    }

    if record.timed_out {
        recommendations.push(Recommendation {
            category: Category::Timeout,
            severity: Severity::Critical,
            title: "Query timed out".into(),
            description: "The backend did not finish within its time budget".into(),
            suggestion: "Raise the timeout or make the query cheaper".into(),
            impact_score: 10,
        });
        penalty += 40;
    }

    QueryAnalysis {
        query_id: record.query_id.clone(),
        performance_score: 100u32.saturating_sub(penalty),
        recommendations,
        complexity,
        record: record.clone(),
        analyzed_at: Utc::now(),
    }
}

pub struct PerformanceAnalyzer {
    history: RwLock<VecDeque<PerformanceRecord>>,
    analyses: RwLock<VecDeque<QueryAnalysis>>,
    pub slow_log: RwLock<SlowQueryLog>,
    max_history: usize,
    max_analyses: usize,
    stats_window: usize,
}

impl PerformanceAnalyzer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            history: RwLock::new(VecDeque::new()),
            analyses: RwLock::new(VecDeque::new()),
            slow_log: RwLock::new(SlowQueryLog::new(config)),
            max_history: config.max_performance_history,
            max_analyses: config.max_analyses,
            stats_window: config.stats_window,
        }
    }

    pub async fn threshold_ms(&self) -> u64 {
        self.slow_log.read().await.threshold_ms()
    }

    /// Applies to records from now on; logged entries keep their threshold.
    pub async fn set_threshold_ms(&self, threshold_ms: u64) {
        self.slow_log.write().await.set_threshold_ms(threshold_ms);
        tracing::info!("Slow query threshold set to {}ms", threshold_ms);
    }

    /// Append a record; slow queries are also analyzed and logged.
    pub async fn record(
        &self,
        connection_id: &str,
        query: &SearchQuery,
        execution_time_ms: u64,
        result: &NormalizedResult,
    ) -> Option<QueryAnalysis> {
        let record = PerformanceRecord::new(connection_id, query, execution_time_ms, result);
        self.record_entry(record).await
    }

    pub async fn record_entry(&self, record: PerformanceRecord) -> Option<QueryAnalysis> {
        {
            let mut history = self.history.write().await;
            history.push_front(record.clone());
            history.truncate(self.max_history);
        }

        let mut slow_log = self.slow_log.write().await;
        if !slow_log.is_slow(record.execution_time_ms) {
            return None;
        }
        let threshold_ms = slow_log.threshold_ms();
        slow_log.push(record.to_slow_entry(threshold_ms));
        drop(slow_log);

        let analysis = analyze(&record);
        tracing::info!(
            "Slow query on {} ({}ms, score {})",
            record.index,
            record.execution_time_ms,
            analysis.performance_score
        );

        let mut analyses = self.analyses.write().await;
        analyses.push_front(analysis.clone());
        analyses.truncate(self.max_analyses);
        Some(analysis)
    }

    /// Computed over the newest `stats_window` records.
    pub async fn stats(&self) -> PerformanceStats {
        let threshold_ms = self.threshold_ms().await;
        let history = self.history.read().await;
        let recent: Vec<&PerformanceRecord> = history.iter().take(self.stats_window).collect();
        if recent.is_empty() {
            return PerformanceStats::default();
        }

        let n = recent.len() as f64;
        let slow = recent
            .iter()
            .filter(|r| r.execution_time_ms > threshold_ms)
            .count();
        PerformanceStats {
            total_queries: recent.len(),
            avg_execution_time: recent.iter().map(|r| r.execution_time_ms).sum::<u64>() as f64
                / n,
            slow_queries: slow,
            fast_queries: recent.len() - slow,
            avg_result_count: recent.iter().map(|r| r.result_count).sum::<u64>() as f64 / n,
        }
    }

    /// Newest first.
    pub async fn history(&self, limit: usize) -> Vec<PerformanceRecord> {
        self.history.read().await.iter().take(limit).cloned().collect()
    }

    /// Newest first.
    pub async fn analyses(&self) -> Vec<QueryAnalysis> {
        self.analyses.read().await.iter().cloned().collect()
    }

    pub async fn find_similar(&self, query: &Value) -> Vec<SimilarQuery> {
        self.slow_log.read().await.find_similar(query)
    }

    /// Empties records and analyses. The slow log is cleared separately.
    pub async fn clear(&self) {
        self.history.write().await.clear();
        self.analyses.write().await.clear();
    }

    pub async fn snapshot(&self) -> PerformanceSnapshot {
        PerformanceSnapshot {
            records: self.history(PERSISTED_RECORDS).await,
            analyses: self
                .analyses
                .read()
                .await
                .iter()
                .take(PERSISTED_ANALYSES)
                .cloned()
                .collect(),
        }
    }

    pub async fn restore(&self, snapshot: PerformanceSnapshot) {
        let mut history: VecDeque<PerformanceRecord> = snapshot.records.into_iter().collect();
        history.truncate(self.max_history);
        *self.history.write().await = history;

        let mut analyses: VecDeque<QueryAnalysis> = snapshot.analyses.into_iter().collect();
        analyses.truncate(self.max_analyses);
        *self.analyses.write().await = analyses;
    }
}
