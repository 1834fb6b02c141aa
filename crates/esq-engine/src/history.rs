//! # Query History
//!
//! Recently executed queries, newest first, plus user-named favorites.

use chrono::{DateTime, Utc};
use esq_core::SearchQuery;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub query: SearchQuery,
    pub connection_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub execution_time_ms: Option<u64>,
    #[serde(default)]
    pub result_count: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub history: Vec<HistoryItem>,
    pub favorites: Vec<HistoryItem>,
}

fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().as_simple())
}

pub struct QueryHistory {
    history: RwLock<Vec<HistoryItem>>,
    favorites: RwLock<Vec<HistoryItem>>,
    capacity: usize,
}

impl QueryHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: RwLock::new(Vec::new()),
            favorites: RwLock::new(Vec::new()),
            capacity,
        }
    }

    /// Record an execution. An identical query on the same connection is
    /// replaced where it stands instead of being duplicated.
    pub async fn add(
        &self,
        query: &SearchQuery,
        connection_id: &str,
        execution_time_ms: Option<u64>,
        result_count: Option<u64>,
    ) -> HistoryItem {
        let item = HistoryItem {
            id: new_id("h"),
            name: None,
            query: query.clone(),
            connection_id: connection_id.to_string(),
            timestamp: Utc::now(),
            execution_time_ms,
            result_count,
        };

        let mut history = self.history.write().await;
        match history
            .iter_mut()
            .find(|h| h.connection_id == connection_id && h.query == *query)
        {
            Some(existing) => *existing = item.clone(),
            None => {
                history.insert(0, item.clone());
                history.truncate(self.capacity);
            }
        }
        item
    }

    pub async fn list(&self) -> Vec<HistoryItem> {
        self.history.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<HistoryItem> {
        self.history.read().await.iter().find(|h| h.id == id).cloned()
    }

    pub async fn for_connection(&self, connection_id: &str) -> Vec<HistoryItem> {
        self.history
            .read()
            .await
            .iter()
            .filter(|h| h.connection_id == connection_id)
            .cloned()
            .collect()
    }

    /// Case-insensitive match against the serialized query and the name.
    pub async fn search(&self, keyword: &str) -> Vec<HistoryItem> {
        let keyword = keyword.to_lowercase();
        self.history
            .read()
            .await
            .iter()
            .filter(|h| {
                let query = serde_json::to_string(&h.query).unwrap_or_default();
                query.to_lowercase().contains(&keyword)
                    || h
                        .name
                        .as_deref()
                        .is_some_and(|n| n.to_lowercase().contains(&keyword))
            })
            .cloned()
            .collect()
    }

    pub async fn remove(&self, id: &str) -> bool {
        let mut history = self.history.write().await;
        let before = history.len();
        history.retain(|h| h.id != id);
        before != history.len()
    }

    pub async fn clear(&self) {
        self.history.write().await.clear();
    }

    // -------------------------------------------------------------------------
    // Favorites
    // -------------------------------------------------------------------------

    /// Save a copy of a history item under a fresh id.
    pub async fn add_favorite(&self, item: &HistoryItem, name: Option<String>) -> HistoryItem {
        let favorite = HistoryItem {
            id: new_id("fav"),
            name: Some(name.unwrap_or_else(|| {
                format!("Query {}", item.timestamp.format("%Y-%m-%d %H:%M:%S"))
            })),
            ..item.clone()
        };
        self.favorites.write().await.insert(0, favorite.clone());
        favorite
    }

    pub async fn rename_favorite(&self, id: &str, name: &str) -> Option<HistoryItem> {
        let mut favorites = self.favorites.write().await;
        let favorite = favorites.iter_mut().find(|f| f.id == id)?;
        favorite.name = Some(name.to_string());
        Some(favorite.clone())
    }

    pub async fn remove_favorite(&self, id: &str) -> bool {
        let mut favorites = self.favorites.write().await;
        let before = favorites.len();
        favorites.retain(|f| f.id != id);
        before != favorites.len()
    }

    pub async fn favorites(&self) -> Vec<HistoryItem> {
        self.favorites.read().await.clone()
    }

    pub async fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            history: self.list().await,
            favorites: self.favorites().await,
        }
    }

    pub async fn restore(&self, snapshot: HistorySnapshot) {
        let mut history = snapshot.history;
        history.truncate(self.capacity);
        *self.history.write().await = history;
        *self.favorites.write().await = snapshot.favorites;
    }
}
