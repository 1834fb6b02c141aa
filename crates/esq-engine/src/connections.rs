//! # Connection Registry
//!
//! Thread-safe map of connection id to live [`SearchBackend`]. The session
//! resolves every request through here.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::transport::{ConnectionConfig, HttpBackend, SearchBackend};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Descriptive view of a registered connection. Never carries credentials.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: String,
    pub name: String,
    pub url: String,
    pub authenticated: bool,
}

impl ConnectionInfo {
    fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            id: config.id.clone(),
            name: if config.name.is_empty() {
                config.id.clone()
            } else {
                config.name.clone()
            },
            url: config.url.clone(),
            authenticated: config.username.is_some(),
        }
    }
}

struct Registered {
    backend: Arc<dyn SearchBackend>,
    info: ConnectionInfo,
}

pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Registered>>,
    /// Applied to connections that do not set `timeout_secs`.
    request_timeout: Duration,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl ConnectionRegistry {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    fn build_backend(&self, config: ConnectionConfig) -> Result<HttpBackend> {
        HttpBackend::new(config, self.request_timeout)
    }

    /// Build an HTTP backend from config and register it. Replaces any
    /// connection with the same id.
    pub async fn register(&self, config: ConnectionConfig) -> Result<ConnectionInfo> {
        let info = ConnectionInfo::from_config(&config);
        let backend = self.build_backend(config)?;
        self.add(info.clone(), Arc::new(backend)).await;
        tracing::info!("Registered connection {} -> {}", info.id, info.url);
        Ok(info)
    }

    /// Register an already-built backend.
    pub async fn add(&self, info: ConnectionInfo, backend: Arc<dyn SearchBackend>) {
        let mut connections = self.connections.write().await;
        connections.insert(info.id.clone(), Registered { backend, info });
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut connections = self.connections.write().await;
        match connections.remove(id) {
            Some(_) => {
                tracing::info!("Removed connection {}", id);
                Ok(())
            }
            None => Err(EngineError::UnknownConnection(id.to_string())),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Arc<dyn SearchBackend>> {
        let connections = self.connections.read().await;
        connections
            .get(id)
            .map(|c| c.backend.clone())
            .ok_or_else(|| EngineError::UnknownConnection(id.to_string()))
    }

    /// All connections, sorted by id.
    pub async fn list(&self) -> Vec<ConnectionInfo> {
        let connections = self.connections.read().await;
        let mut infos: Vec<ConnectionInfo> =
            connections.values().map(|c| c.info.clone()).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }
}
