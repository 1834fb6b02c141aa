//! # Backend Transport
//!
//! The seam between the engine and a search cluster. Every backend
//! implements [`SearchBackend`]; the engine never talks HTTP directly.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// A search cluster the engine can send requests to.
#[async_trait::async_trait]
pub trait SearchBackend: Send + Sync {
    /// `POST <index>/_search` with the given body; returns the raw response.
    async fn search(&self, index: &str, body: &Value) -> Result<Value>;

    /// `GET <index>/_mapping`; returns the raw response.
    async fn mapping(&self, index: &str) -> Result<Value>;
}

/// How to reach a cluster over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Base URL, e.g. `http://localhost:9200`.
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Falls back to the engine's `request_timeout_secs` when unset.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

/// [`SearchBackend`] over the cluster's REST API.
pub struct HttpBackend {
    client: reqwest::Client,
    config: ConnectionConfig,
    base: reqwest::Url,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(config: ConnectionConfig, default_timeout: Duration) -> Result<Self> {
        let base = reqwest::Url::parse(&config.url)
            .map_err(|e| EngineError::InvalidUrl(format!("{}: {}", config.url, e)))?;
        if base.cannot_be_a_base() {
            return Err(EngineError::InvalidUrl(config.url.clone()));
        }
        let timeout = config
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(default_timeout);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;
        Ok(Self {
            client,
            config,
            base,
            timeout,
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `<base>/<index>/<endpoint>`, with `index` percent-encoded as one segment.
    fn url(&self, index: &str, endpoint: &str) -> Result<reqwest::Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| EngineError::InvalidUrl(self.config.url.clone()))?
            .pop_if_empty()
            .push(index)
            .push(endpoint);
        Ok(url)
    }

    fn authorize(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_ref());
        }
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }
        request
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Backend request failed with status {}: {}", status, body);
            return Err(EngineError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<Value>().await?)
    }
}

#[async_trait::async_trait]
impl SearchBackend for HttpBackend {
    async fn search(&self, index: &str, body: &Value) -> Result<Value> {
        let url = self.url(index, "_search")?;
        tracing::debug!("POST {}", url);
        self.send(self.client.post(url).json(body)).await
    }

    async fn mapping(&self, index: &str) -> Result<Value> {
        let url = self.url(index, "_mapping")?;
        tracing::debug!("GET {}", url);
        self.send(self.client.get(url)).await
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str, timeout_secs: Option<u64>) -> ConnectionConfig {
        ConnectionConfig {
            id: "c1".into(),
            name: "local".into(),
            url: url.into(),
            username: None,
            password: None,
            headers: HashMap::new(),
            timeout_secs,
            accept_invalid_certs: false,
        }
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let backend =
            HttpBackend::new(config("http://localhost:9200/", Some(5)), Duration::from_secs(30))
                .unwrap();
        assert_eq!(
            backend.url("logs", "_search").unwrap().as_str(),
            "http://localhost:9200/logs/_search"
        );

        let prefixed =
            HttpBackend::new(config("https://host/es", None), Duration::from_secs(30)).unwrap();
        assert_eq!(
            prefixed.url("logs", "_mapping").unwrap().as_str(),
            "https://host/es/logs/_mapping"
        );
    }

    #[test]
    fn test_index_is_encoded_as_one_segment() {
        let backend =
            HttpBackend::new(config("http://localhost:9200", None), Duration::from_secs(30))
                .unwrap();
        assert_eq!(
            backend.url("logs/_doc?x=1", "_search").unwrap().as_str(),
            "http://localhost:9200/logs%2F_doc%3Fx=1/_search"
        );
    }

    #[test]
    fn test_timeout_falls_back_to_default() {
        let inherited =
            HttpBackend::new(config("http://x", None), Duration::from_secs(12)).unwrap();
        assert_eq!(inherited.timeout(), Duration::from_secs(12));

        let own = HttpBackend::new(config("http://x", Some(3)), Duration::from_secs(12)).unwrap();
        assert_eq!(own.timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_rejects_unparseable_url() {
        let err = HttpBackend::new(config("not a url", None), Duration::from_secs(1));
        assert!(matches!(err, Err(EngineError::InvalidUrl(_))));
    }

    #[test]
    fn test_password_is_never_serialized() {
        let config: ConnectionConfig = serde_json::from_str(
            r#"{"id": "c1", "url": "http://x", "username": "u", "password": "secret"}"#,
        )
        .unwrap();
        assert_eq!(config.password.as_deref(), Some("secret"));
        let out = serde_json::to_string(&config).unwrap();
        assert!(!out.contains("secret"));
    }
}
