//! # Query Tree Compiler
//!
//! Reduces an ordered forest of [`Group`]s into a single `bool` query.
//!
//! Each group compiles its own conditions (omissions dropped) and its own
//! sub-groups (each wrapped as a nested `bool` fragment), then appends the
//! fragments to the bucket named by its operator. Sibling groups that target
//! the same bucket **concatenate** into it; they never overwrite each other.

use crate::condition::compile_condition;
use crate::model::{BoolOccur, Group, SortSpec};
use serde::Serialize;
use serde_json::{json, Value};

/// The match-everything sentinel.
pub fn match_all() -> Value {
    json!({ "match_all": {} })
}

/// Accumulated `bool` buckets for one nesting level.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct BoolQuery {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub must: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub should: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub must_not: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<Value>,
}

impl BoolQuery {
    pub fn bucket_mut(&mut self, occur: BoolOccur) -> &mut Vec<Value> {
        match occur {
            BoolOccur::Must => &mut self.must,
            BoolOccur::Should => &mut self.should,
            BoolOccur::MustNot => &mut self.must_not,
            BoolOccur::Filter => &mut self.filter,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
            && self.should.is_empty()
            && self.must_not.is_empty()
            && self.filter.is_empty()
    }

    /// Total number of fragments across all buckets.
    pub fn len(&self) -> usize {
        self.must.len() + self.should.len() + self.must_not.len() + self.filter.len()
    }

    fn into_value(self) -> Value {
        json!({ "bool": self })
    }
}

/// Compile the root groups into one query.
///
/// No groups, or groups that all reduce to nothing, yield [`match_all`].
pub fn compile_query(groups: &[Group]) -> Value {
    match reduce_groups(groups) {
        Some(bool_query) => bool_query.into_value(),
        None => match_all(),
    }
}

/// Reduce sibling groups into one set of buckets. `None` if nothing survived.
pub fn reduce_groups(groups: &[Group]) -> Option<BoolQuery> {
    let mut acc = BoolQuery::default();
    for group in groups {
        let fragments = group_fragments(group);
        if fragments.is_empty() {
            continue;
        }
        acc.bucket_mut(group.operator).extend(fragments);
    }
    (!acc.is_empty()).then_some(acc)
}

/// Fragments a single group contributes to its parent's bucket.
fn group_fragments(group: &Group) -> Vec<Value> {
    let mut fragments: Vec<Value> = group
        .conditions
        .iter()
        .filter_map(compile_condition)
        .collect();

    for nested in &group.groups {
        if let Some(nested_bool) = reduce_groups(std::slice::from_ref(nested)) {
            fragments.push(nested_bool.into_value());
        }
    }

    fragments
}

/// Compile sort directives. Directives without a field are skipped; an
/// empty result is `None` so callers can omit the `sort` key.
pub fn compile_sort(sort: &[SortSpec]) -> Option<Vec<Value>> {
    let clauses: Vec<Value> = sort
        .iter()
        .filter(|s| !s.field.is_empty())
        .map(|s| json!({ s.field.as_str(): { "order": s.order } }))
        .collect();
    (!clauses.is_empty()).then_some(clauses)
}
