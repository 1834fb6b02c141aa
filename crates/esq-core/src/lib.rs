//! # esq-core — The "Compiler" of ESQ
//!
//! Turns user-authored filter trees and aggregation trees into the JSON
//! search DSL understood by the backend. Everything in this crate is pure
//! and synchronous: no I/O, no clocks, no shared state.
//!
//! - [`condition`] — one atomic condition to one leaf clause (or omission).
//! - [`query`] — a forest of boolean [`Group`]s to one `bool` query.
//! - [`aggregation`] — a forest of [`AggregationSpec`]s to an `aggs` body.
//! - [`complexity`] — structural complexity score of a compiled query.
//! - [`similarity`] — normalized edit-distance similarity of query bodies.
//! - [`mapping`] — field catalog extraction from an index mapping.

pub mod aggregation;
pub mod complexity;
pub mod condition;
pub mod error;
pub mod mapping;
pub mod model;
pub mod query;
pub mod similarity;

pub use aggregation::compile_aggregations;
pub use complexity::{analyze_complexity, ComplexityReport};
pub use condition::compile_condition;
pub use error::CompileError;
pub use model::{
    AggregationKind, AggregationSpec, BoolOccur, Condition, DataType, Group, Operator,
    SearchQuery, SortOrder, SortSpec, MAX_RESULT_WINDOW,
};
pub use query::{compile_query, compile_sort, match_all};
pub use similarity::{query_similarity, similarity, SIMILARITY_THRESHOLD};
