//! # Slow Query Log
//!
//! Newest-first, bounded log of queries that ran longer than the threshold.
//! Entries older than the retention window are pruned on every insert.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use chrono::{DateTime, Duration, Timelike, Utc};
use esq_core::query_similarity;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::str::FromStr;

/// Entries kept in a snapshot.
pub const PERSISTED_SLOW_QUERIES: usize = 500;

/// Trend comparison needs this many entries on each side.
const TREND_WINDOW: usize = 10;

const CSV_HEADERS: [&str; 5] = [
    "timestamp",
    "index",
    "execution_time_ms",
    "result_count",
    "query",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlowQueryEntry {
    pub query_id: String,
    pub connection_id: String,
    pub index: String,
    pub query: Value,
    pub execution_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub result_count: u64,
    /// Threshold in force when the entry was logged.
    pub threshold_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SlowQueryStats {
    pub total: usize,
    pub avg_execution_time: f64,
    pub max_execution_time: u64,
    pub min_execution_time: u64,
    pub trend: Trend,
}

/// Count and mean execution time of one index or connection.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SlowQueryGroup {
    pub key: String,
    pub count: usize,
    pub avg_time: f64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct HourlyBucket {
    /// Hour of day, UTC.
    pub hour: u32,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SimilarQuery {
    pub entry: SlowQueryEntry,
    pub similarity: f64,
}

/// Slow queries grouped around the first entry that opened the cluster.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SlowQueryCluster {
    pub representative: SlowQueryEntry,
    pub query_ids: Vec<String>,
    pub count: usize,
    pub avg_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(format!("unknown export format '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlowLogSnapshot {
    pub queries: Vec<SlowQueryEntry>,
    pub threshold_ms: u64,
}

pub struct SlowQueryLog {
    entries: VecDeque<SlowQueryEntry>,
    threshold_ms: u64,
    max_entries: usize,
    retention: Duration,
    similarity_threshold: f64,
    similar_limit: usize,
}

impl SlowQueryLog {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            entries: VecDeque::new(),
            threshold_ms: config.slow_query_threshold_ms,
            max_entries: config.max_slow_queries,
            retention: Duration::days(config.slow_query_retention_days),
            similarity_threshold: config.similarity_threshold,
            similar_limit: config.similar_limit,
        }
    }

    pub fn threshold_ms(&self) -> u64 {
        self.threshold_ms
    }

    pub fn set_threshold_ms(&mut self, threshold_ms: u64) {
        self.threshold_ms = threshold_ms;
    }

    pub fn is_slow(&self, execution_time_ms: u64) -> bool {
        execution_time_ms > self.threshold_ms
    }

    /// Log an entry if it is slow. Returns whether it was kept.
    pub fn push(&mut self, entry: SlowQueryEntry) -> bool {
        if !self.is_slow(entry.execution_time_ms) {
            return false;
        }
        let id = entry.query_id.clone();
        self.entries.push_front(entry);
        self.entries.truncate(self.max_entries);
        self.prune_expired();
        self.entries.iter().any(|e| e.query_id == id)
    }

    fn prune_expired(&mut self) {
        let cutoff = Utc::now() - self.retention;
        self.entries.retain(|e| e.timestamp > cutoff);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest first.
    pub fn entries(&self) -> impl Iterator<Item = &SlowQueryEntry> {
        self.entries.iter()
    }

    pub fn recent(&self, limit: usize) -> Vec<SlowQueryEntry> {
        self.entries.iter().take(limit).cloned().collect()
    }

    pub fn stats(&self) -> SlowQueryStats {
        if self.entries.is_empty() {
            return SlowQueryStats {
                total: 0,
                avg_execution_time: 0.0,
                max_execution_time: 0,
                min_execution_time: 0,
                trend: Trend::Stable,
            };
        }

        let times: Vec<u64> = self.entries.iter().map(|e| e.execution_time_ms).collect();
        SlowQueryStats {
            total: times.len(),
            avg_execution_time: mean(&times),
            max_execution_time: times.iter().copied().max().unwrap_or(0),
            min_execution_time: times.iter().copied().min().unwrap_or(0),
            trend: trend(&times),
        }
    }

    pub fn by_index(&self) -> Vec<SlowQueryGroup> {
        self.group_by(|e| &e.index)
    }

    pub fn by_connection(&self) -> Vec<SlowQueryGroup> {
        self.group_by(|e| &e.connection_id)
    }

    fn group_by(&self, key: impl Fn(&SlowQueryEntry) -> &String) -> Vec<SlowQueryGroup> {
        let mut groups: BTreeMap<&String, Vec<u64>> = BTreeMap::new();
        for entry in &self.entries {
            groups.entry(key(entry)).or_default().push(entry.execution_time_ms);
        }
        groups
            .into_iter()
            .map(|(key, times)| SlowQueryGroup {
                key: key.clone(),
                count: times.len(),
                avg_time: mean(&times),
            })
            .collect()
    }

    /// Only hours with at least one entry, ascending.
    pub fn hourly_distribution(&self) -> Vec<HourlyBucket> {
        let mut hours: BTreeMap<u32, usize> = BTreeMap::new();
        for entry in &self.entries {
            *hours.entry(entry.timestamp.hour()).or_default() += 1;
        }
        hours
            .into_iter()
            .map(|(hour, count)| HourlyBucket { hour, count })
            .collect()
    }

    /// Logged queries at or above the similarity threshold, most similar
    /// first, at most `similar_limit` of them.
    pub fn find_similar(&self, query: &Value) -> Vec<SimilarQuery> {
        let mut similar: Vec<SimilarQuery> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let similarity = query_similarity(query, &entry.query);
                (similarity >= self.similarity_threshold).then(|| SimilarQuery {
                    entry: entry.clone(),
                    similarity,
                })
            })
            .collect();
        // Stable sort: ties stay newest first.
        similar.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        similar.truncate(self.similar_limit);
        similar
    }

    /// Single greedy pass, newest first: an entry joins the first cluster
    /// whose representative it is similar to, otherwise opens a new one.
    pub fn clusters(&self) -> Vec<SlowQueryCluster> {
        let mut clusters: Vec<(SlowQueryEntry, Vec<&SlowQueryEntry>)> = Vec::new();

        for entry in &self.entries {
            let home = clusters.iter_mut().find(|(rep, _)| {
                query_similarity(&rep.query, &entry.query) >= self.similarity_threshold
            });
            match home {
                Some((_, members)) => members.push(entry),
                None => clusters.push((entry.clone(), vec![entry])),
            }
        }

        clusters
            .into_iter()
            .map(|(representative, members)| {
                let times: Vec<u64> = members.iter().map(|m| m.execution_time_ms).collect();
                SlowQueryCluster {
                    representative,
                    query_ids: members.iter().map(|m| m.query_id.clone()).collect(),
                    count: members.len(),
                    avg_time: mean(&times),
                }
            })
            .collect()
    }

    pub fn export(&self, format: ExportFormat) -> Result<String> {
        match format {
            ExportFormat::Json => {
                let entries: Vec<&SlowQueryEntry> = self.entries.iter().collect();
                Ok(serde_json::to_string_pretty(&entries)?)
            }
            ExportFormat::Csv => {
                let mut wtr = csv::Writer::from_writer(Vec::new());
                wtr.write_record(CSV_HEADERS)?;
                for e in &self.entries {
                    wtr.write_record([
                        e.timestamp.to_rfc3339(),
                        e.index.clone(),
                        e.execution_time_ms.to_string(),
                        e.result_count.to_string(),
                        e.query.to_string(),
                    ])?;
                }
                let bytes = wtr.into_inner().map_err(|e| e.into_error())?;
                String::from_utf8(bytes).map_err(|e| {
                    EngineError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
                })
            }
        }
    }

    /// Drop entries at or before `timestamp`. Returns how many were removed.
    pub fn clear_before(&mut self, timestamp: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.timestamp > timestamp);
        before - self.entries.len()
    }

    pub fn remove(&mut self, query_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.query_id != query_id);
        before != self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn snapshot(&self) -> SlowLogSnapshot {
        SlowLogSnapshot {
            queries: self.recent(PERSISTED_SLOW_QUERIES),
            threshold_ms: self.threshold_ms,
        }
    }

    pub fn restore(&mut self, snapshot: SlowLogSnapshot) {
        if snapshot.threshold_ms > 0 {
            self.threshold_ms = snapshot.threshold_ms;
        }
        self.entries = snapshot.queries.into_iter().collect();
        self.entries.truncate(self.max_entries);
        self.prune_expired();
    }
}

fn mean(values: &[u64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<u64>() as f64 / values.len() as f64
}

/// Newest `TREND_WINDOW` against the `TREND_WINDOW` before them; a change
/// above 10% of the older mean counts.
fn trend(newest_first: &[u64]) -> Trend {
    if newest_first.len() < TREND_WINDOW * 2 {
        return Trend::Stable;
    }
    let recent = mean(&newest_first[..TREND_WINDOW]);
    let previous = mean(&newest_first[TREND_WINDOW..TREND_WINDOW * 2]);
    if (recent - previous).abs() > previous * 0.1 {
        if recent > previous {
            Trend::Increasing
        } else {
            Trend::Decreasing
        }
    } else {
        Trend::Stable
    }
}
