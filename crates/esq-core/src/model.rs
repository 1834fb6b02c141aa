//! # Data Model
//!
//! Authoring-side trees ([`Group`], [`AggregationSpec`]) and the executable
//! [`SearchQuery`]. Trees own their children exclusively; there are no parent
//! back-pointers, so cycles cannot be expressed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Backend hard limit on `size` for a single request.
pub const MAX_RESULT_WINDOW: usize = 10_000;

// =============================================================================
// Filter tree
// =============================================================================

/// Comparison operator of an atomic [`Condition`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    StartsWith,
    EndsWith,
    GreaterThan,
    GreaterEqual,
    LessThan,
    LessEqual,
    Between,
    In,
    NotIn,
    Exists,
    NotExists,
    Regex,
    /// Anything the authoring UI sent that we do not understand.
    #[serde(other)]
    Unsupported,
}

impl Operator {
    /// Operators that ignore `value` entirely.
    pub fn ignores_value(self) -> bool {
        matches!(self, Self::Exists | Self::NotExists)
    }
}

/// Declared type of the field a condition targets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    #[default]
    Text,
    Keyword,
    Number,
    Date,
    Boolean,
    #[serde(other)]
    Other,
}

/// One atomic filter condition. Leaf of the filter tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub operator: Option<Operator>,
    /// Scalar, list, or 2-element pair depending on the operator.
    #[serde(default)]
    pub value: Value,
    #[serde(default, alias = "dataType")]
    pub data_type: DataType,
}

/// Boolean bucket a [`Group`] contributes its fragments to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum BoolOccur {
    #[default]
    Must,
    Should,
    MustNot,
    Filter,
}

impl BoolOccur {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Must => "must",
            Self::Should => "should",
            Self::MustNot => "must_not",
            Self::Filter => "filter",
        }
    }
}

/// A boolean group: owns its conditions and its sub-groups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Group {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub operator: BoolOccur,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, alias = "subgroups")]
    pub groups: Vec<Group>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Sort directive authored next to the filter tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

// =============================================================================
// Aggregation tree
// =============================================================================

/// Supported aggregation types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AggregationKind {
    Terms,
    DateHistogram,
    Histogram,
    Range,
    Avg,
    Sum,
    Max,
    Min,
    Count,
    Cardinality,
}

impl AggregationKind {
    /// Bucket aggregations partition documents; the rest are metrics.
    pub fn is_bucket(self) -> bool {
        matches!(
            self,
            Self::Terms | Self::DateHistogram | Self::Histogram | Self::Range
        )
    }

    /// Key used in the compiled DSL. `count` maps to `value_count`.
    pub fn dsl_name(self) -> &'static str {
        match self {
            Self::Terms => "terms",
            Self::DateHistogram => "date_histogram",
            Self::Histogram => "histogram",
            Self::Range => "range",
            Self::Avg => "avg",
            Self::Sum => "sum",
            Self::Max => "max",
            Self::Min => "min",
            Self::Count => "value_count",
            Self::Cardinality => "cardinality",
        }
    }
}

impl FromStr for AggregationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "terms" => Ok(Self::Terms),
            "date_histogram" => Ok(Self::DateHistogram),
            "histogram" => Ok(Self::Histogram),
            "range" => Ok(Self::Range),
            "avg" => Ok(Self::Avg),
            "sum" => Ok(Self::Sum),
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            "count" => Ok(Self::Count),
            "cardinality" => Ok(Self::Cardinality),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count => write!(f, "count"),
            other => write!(f, "{}", other.dsl_name()),
        }
    }
}

/// A named aggregation, optionally owning sub-aggregations.
///
/// `kind` is kept as authored text so an unknown type reaches the compiler
/// and fails there with a [`crate::CompileError`], instead of being lost at
/// deserialization time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregationSpec {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub field: String,
    /// Caller overrides merged over the type's defaults.
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default, alias = "subAggregations")]
    pub sub_aggregations: Vec<AggregationSpec>,
}

// =============================================================================
// Executable query
// =============================================================================

/// A compiled, executable search request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchQuery {
    pub index: String,
    /// Compiled query DSL (`{"match_all": {}}`, `{"bool": {...}}`, ...).
    #[serde(default = "crate::query::match_all")]
    pub query: Value,
    #[serde(default)]
    pub from: usize,
    #[serde(default = "default_size")]
    pub size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Vec<Value>>,
}

fn default_size() -> usize {
    10
}

impl SearchQuery {
    pub fn new(index: impl Into<String>, query: Value) -> Self {
        Self {
            index: index.into(),
            query,
            from: 0,
            size: default_size(),
            sort: None,
        }
    }

    /// `size` clamped to the backend hard limit.
    pub fn effective_size(&self) -> usize {
        self.size.min(MAX_RESULT_WINDOW)
    }

    /// Same query, a different window.
    pub fn with_window(&self, from: usize, size: usize) -> Self {
        Self {
            from,
            size,
            ..self.clone()
        }
    }
}
