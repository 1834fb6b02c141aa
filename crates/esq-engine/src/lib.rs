//! # esq-engine — The "Engine" of ESQ
//!
//! Executes compiled requests against a search backend and keeps the
//! short-lived state around them:
//!
//! - [`executor`] — single request, capped multi-page streaming, response normalization.
//! - [`cache`] — bounded FIFO page cache keyed by request identity.
//! - [`session`] — lookup-or-execute, paging, background prefetch of the next page.
//! - [`performance`] — execution records, slow-query scoring and clustering.
//! - [`history`] — recently executed queries and favorites.
//! - [`store`] — best-effort JSON snapshot persistence.

pub mod cache;
pub mod config;
pub mod connections;
pub mod error;
pub mod executor;
pub mod history;
pub mod performance;
pub mod session;
pub mod store;
pub mod transport;

pub use cache::{CacheKey, CacheStats, ResultCache};
pub use config::EngineConfig;
pub use connections::{ConnectionInfo, ConnectionRegistry};
pub use error::{EngineError, Result};
pub use executor::{NormalizedResult, ShardStats, StreamOutcome};
pub use history::{HistoryItem, QueryHistory};
pub use performance::{PerformanceAnalyzer, PerformanceStats, QueryAnalysis};
pub use session::{BuilderSearch, SearchSession};
pub use store::{JsonFileStore, SnapshotStore};
pub use transport::{ConnectionConfig, HttpBackend, SearchBackend};
