use thiserror::Error;

/// Compilation failures. These are loud by contract: a misconfigured
/// aggregation must reach its author, never degrade into an empty body.
///
/// An incomplete filter condition is *not* an error; see
/// [`crate::condition::compile_condition`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("unsupported aggregation type '{kind}' for aggregation '{name}'")]
    UnsupportedAggregation { name: String, kind: String },

    #[error("aggregation name must not be empty")]
    EmptyAggregationName,

    #[error("duplicate aggregation name '{name}' at the same nesting level")]
    DuplicateAggregationName { name: String },
}
