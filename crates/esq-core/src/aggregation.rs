//! # Aggregation Tree Compiler
//!
//! Compiles a forest of [`AggregationSpec`]s into an `aggs` body keyed by
//! aggregation name:
//!
//! ```text
//! { "<name>": { "<type>": { "field": ..., ...defaults, ...params }, "aggs": { ... } } }
//! ```
//!
//! Unknown types are a hard [`CompileError`]. Sibling names must be unique;
//! a duplicate is reported rather than silently overwriting its sibling.

use crate::error::CompileError;
use crate::model::{AggregationKind, AggregationSpec};
use serde_json::{json, Map, Value};
use std::collections::HashSet;

/// Key under which compiled children are attached.
pub const SUB_AGGREGATIONS_KEY: &str = "aggs";

/// Compile sibling aggregation specs. An empty slice yields `{}`.
pub fn compile_aggregations(specs: &[AggregationSpec]) -> Result<Value, CompileError> {
    let mut body = Map::new();
    let mut seen = HashSet::with_capacity(specs.len());

    for spec in specs {
        if spec.name.is_empty() {
            return Err(CompileError::EmptyAggregationName);
        }
        if !seen.insert(spec.name.as_str()) {
            return Err(CompileError::DuplicateAggregationName {
                name: spec.name.clone(),
            });
        }
        body.insert(spec.name.clone(), compile_one(spec)?);
    }

    Ok(Value::Object(body))
}

fn compile_one(spec: &AggregationSpec) -> Result<Value, CompileError> {
    let kind: AggregationKind =
        spec.kind
            .parse()
            .map_err(|kind| CompileError::UnsupportedAggregation {
                name: spec.name.clone(),
                kind,
            })?;

    let mut body = Map::new();
    body.insert("field".into(), Value::String(spec.field.clone()));

    if kind.is_bucket() {
        for (key, value) in bucket_defaults(kind) {
            body.insert(key.into(), value);
        }
        for (key, value) in &spec.params {
            body.insert(key.clone(), value.clone());
        }
    }

    let mut fragment = Map::new();
    fragment.insert(kind.dsl_name().into(), Value::Object(body));

    if !spec.sub_aggregations.is_empty() {
        fragment.insert(
            SUB_AGGREGATIONS_KEY.into(),
            compile_aggregations(&spec.sub_aggregations)?,
        );
    }

    Ok(Value::Object(fragment))
}

/// Defaults that caller `params` may override key by key.
fn bucket_defaults(kind: AggregationKind) -> Vec<(&'static str, Value)> {
    match kind {
        AggregationKind::DateHistogram => vec![("calendar_interval", json!("1d"))],
        AggregationKind::Histogram => vec![("interval", json!(1))],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, kind: &str, field: &str) -> AggregationSpec {
        AggregationSpec {
            id: format!("agg-{name}"),
            name: name.into(),
            kind: kind.into(),
            field: field.into(),
            params: Map::new(),
            sub_aggregations: Vec::new(),
        }
    }

    #[test]
    fn test_empty_specs_compile_to_empty_object() {
        assert_eq!(compile_aggregations(&[]).unwrap(), json!({}));
    }

    #[test]
    fn test_metric_types() {
        let specs = vec![
            spec("avg_price", "avg", "price"),
            spec("n", "count", "id"),
            spec("uniq", "cardinality", "user"),
        ];
        assert_eq!(
            compile_aggregations(&specs).unwrap(),
            json!({
                "avg_price": {"avg": {"field": "price"}},
                "n": {"value_count": {"field": "id"}},
                "uniq": {"cardinality": {"field": "user"}}
            })
        );
    }

    #[test]
    fn test_bucket_defaults_and_param_override() {
        let mut by_day = spec("by_day", "date_histogram", "ts");
        by_day
            .params
            .insert("time_zone".into(), json!("+08:00"));
        let mut by_hour = spec("by_hour", "date_histogram", "ts");
        by_hour
            .params
            .insert("calendar_interval".into(), json!("1h"));
        let buckets = spec("widths", "histogram", "size");

        assert_eq!(
            compile_aggregations(&[by_day, by_hour, buckets]).unwrap(),
            json!({
                "by_day": {"date_histogram": {"field": "ts", "calendar_interval": "1d", "time_zone": "+08:00"}},
                "by_hour": {"date_histogram": {"field": "ts", "calendar_interval": "1h"}},
                "widths": {"histogram": {"field": "size", "interval": 1}}
            })
        );
    }

    #[test]
    fn test_terms_and_range_take_params_verbatim() {
        let mut top = spec("top", "terms", "tag");
        top.params.insert("size".into(), json!(5));
        let mut ranges = spec("bands", "range", "age");
        ranges
            .params
            .insert("ranges".into(), json!([{"to": 18}, {"from": 18}]));
        assert_eq!(
            compile_aggregations(&[top, ranges]).unwrap(),
            json!({
                "top": {"terms": {"field": "tag", "size": 5}},
                "bands": {"range": {"field": "age", "ranges": [{"to": 18}, {"from": 18}]}}
            })
        );
    }

    #[test]
    fn test_sub_aggregations_nest_under_aggs() {
        let mut top = spec("by_tag", "terms", "tag");
        let mut per_day = spec("per_day", "date_histogram", "ts");
        per_day.sub_aggregations.push(spec("total", "sum", "bytes"));
        top.sub_aggregations.push(per_day);

        assert_eq!(
            compile_aggregations(&[top]).unwrap(),
            json!({
                "by_tag": {
                    "terms": {"field": "tag"},
                    "aggs": {
                        "per_day": {
                            "date_histogram": {"field": "ts", "calendar_interval": "1d"},
                            "aggs": {"total": {"sum": {"field": "bytes"}}}
                        }
                    }
                }
            })
        );
    }

    #[test]
    fn test_unsupported_type_is_an_error() {
        let err = compile_aggregations(&[spec("p", "percentiles", "latency")]).unwrap_err();
        assert_eq!(
            err,
            CompileError::UnsupportedAggregation {
                name: "p".into(),
                kind: "percentiles".into()
            }
        );
    }

    #[test]
    fn test_unsupported_type_deep_in_tree_is_an_error() {
        let mut top = spec("top", "terms", "tag");
        top.sub_aggregations.push(spec("bad", "geo_grid", "loc"));
        assert!(matches!(
            compile_aggregations(&[top]),
            Err(CompileError::UnsupportedAggregation { .. })
        ));
    }

    #[test]
    fn test_duplicate_sibling_names_are_rejected() {
        let specs = vec![spec("x", "avg", "a"), spec("x", "sum", "b")];
        assert_eq!(
            compile_aggregations(&specs).unwrap_err(),
            CompileError::DuplicateAggregationName { name: "x".into() }
        );
    }

    #[test]
    fn test_same_name_at_different_levels_is_fine() {
        let mut top = spec("x", "terms", "tag");
        top.sub_aggregations.push(spec("x", "avg", "price"));
        assert!(compile_aggregations(&[top]).is_ok());
    }

    #[test]
    fn test_compilation_is_idempotent() {
        let mut top = spec("top", "terms", "tag");
        top.sub_aggregations.push(spec("avg", "avg", "price"));
        let specs = vec![top];
        assert_eq!(
            compile_aggregations(&specs).unwrap(),
            compile_aggregations(&specs).unwrap()
        );
    }
}
