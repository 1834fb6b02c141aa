//! # Condition Compiler
//!
//! Compiles one atomic [`Condition`] into a leaf clause of the search DSL.
//!
//! Incomplete conditions (no field, no operator, empty value, malformed
//! `between` pair) are *omitted*: the compiler returns `None` and the caller
//! drops them silently. Omission is not an error.

use crate::model::{Condition, DataType, Operator};
use serde_json::{json, Value};

/// Compile a single condition. `None` means "omit this condition".
pub fn compile_condition(condition: &Condition) -> Option<Value> {
    let field = condition.field.as_str();
    if field.is_empty() {
        return None;
    }
    let op = condition.operator?;
    let value = &condition.value;
    if !op.ignores_value() && is_empty_value(value) {
        return None;
    }

    match op {
        Operator::Equals => Some(equality_clause(field, value, condition.data_type)),
        Operator::NotEquals => Some(must_not(equality_clause(
            field,
            value,
            condition.data_type,
        ))),
        Operator::Contains => Some(wildcard(field, format!("*{}*", text_of(value)))),
        Operator::StartsWith => Some(json!({ "prefix": { field: value } })),
        Operator::EndsWith => Some(wildcard(field, format!("*{}", text_of(value)))),
        Operator::GreaterThan => Some(range(field, "gt", value)),
        Operator::GreaterEqual => Some(range(field, "gte", value)),
        Operator::LessThan => Some(range(field, "lt", value)),
        Operator::LessEqual => Some(range(field, "lte", value)),
        Operator::Between => match value.as_array().map(Vec::as_slice) {
            Some([low, high]) => Some(json!({ "range": { field: { "gte": low, "lte": high } } })),
            _ => None,
        },
        Operator::In => Some(json!({ "terms": { field: term_list(value) } })),
        Operator::NotIn => Some(must_not(json!({ "terms": { field: term_list(value) } }))),
        Operator::Exists => Some(json!({ "exists": { "field": field } })),
        Operator::NotExists => Some(must_not(json!({ "exists": { "field": field } }))),
        Operator::Regex => Some(json!({ "regexp": { field: value } })),
        Operator::Unsupported => None,
    }
}

/// `null`, `""` and `[]` count as "no value".
fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn equality_clause(field: &str, value: &Value, data_type: DataType) -> Value {
    if data_type == DataType::Text {
        json!({ "match": { field: value } })
    } else {
        json!({ "term": { field: value } })
    }
}

fn must_not(clause: Value) -> Value {
    json!({ "bool": { "must_not": [clause] } })
}

fn wildcard(field: &str, pattern: String) -> Value {
    json!({ "wildcard": { field: pattern } })
}

fn range(field: &str, bound: &str, value: &Value) -> Value {
    json!({ "range": { field: { bound: value } } })
}

/// Lists pass through; a comma-separated string is split and trimmed;
/// any other scalar becomes a one-element list.
fn term_list(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.clone()),
        Value::String(s) => Value::Array(
            s.split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| Value::String(part.to_string()))
                .collect(),
        ),
        other => Value::Array(vec![other.clone()]),
    }
}

/// Raw text of a scalar, without JSON quoting.
fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cond(field: &str, op: Operator, value: Value, data_type: DataType) -> Condition {
        Condition {
            id: "c1".into(),
            field: field.into(),
            operator: Some(op),
            value,
            data_type,
        }
    }

    #[test]
    fn test_equals_text_uses_match() {
        let c = cond("title", Operator::Equals, json!("rust"), DataType::Text);
        assert_eq!(
            compile_condition(&c),
            Some(json!({"match": {"title": "rust"}}))
        );
    }

    #[test]
    fn test_equals_keyword_uses_term() {
        let c = cond("status", Operator::Equals, json!("open"), DataType::Keyword);
        assert_eq!(
            compile_condition(&c),
            Some(json!({"term": {"status": "open"}}))
        );
    }

    #[test]
    fn test_not_equals_wraps_in_must_not() {
        let c = cond("status", Operator::NotEquals, json!(3), DataType::Number);
        assert_eq!(
            compile_condition(&c),
            Some(json!({"bool": {"must_not": [{"term": {"status": 3}}]}}))
        );
    }

    #[test]
    fn test_contains_and_ends_with_build_wildcards() {
        let c = cond("path", Operator::Contains, json!("api"), DataType::Keyword);
        assert_eq!(
            compile_condition(&c),
            Some(json!({"wildcard": {"path": "*api*"}}))
        );
        let c = cond("path", Operator::EndsWith, json!(".rs"), DataType::Keyword);
        assert_eq!(
            compile_condition(&c),
            Some(json!({"wildcard": {"path": "*.rs"}}))
        );
    }

    #[test]
    fn test_starts_with_uses_prefix() {
        let c = cond("path", Operator::StartsWith, json!("/v1"), DataType::Keyword);
        assert_eq!(
            compile_condition(&c),
            Some(json!({"prefix": {"path": "/v1"}}))
        );
    }

    #[test]
    fn test_range_operators() {
        let cases = [
            (Operator::GreaterThan, "gt"),
            (Operator::GreaterEqual, "gte"),
            (Operator::LessThan, "lt"),
            (Operator::LessEqual, "lte"),
        ];
        for (op, bound) in cases {
            let c = cond("age", op, json!(30), DataType::Number);
            assert_eq!(
                compile_condition(&c),
                Some(json!({"range": {"age": {bound: 30}}}))
            );
        }
    }

    #[test]
    fn test_between_requires_exact_pair() {
        let c = cond("age", Operator::Between, json!([5, 10]), DataType::Number);
        assert_eq!(
            compile_condition(&c),
            Some(json!({"range": {"age": {"gte": 5, "lte": 10}}}))
        );

        let c = cond("age", Operator::Between, json!([5]), DataType::Number);
        assert_eq!(compile_condition(&c), None);

        let c = cond("age", Operator::Between, json!(5), DataType::Number);
        assert_eq!(compile_condition(&c), None);

        let c = cond("age", Operator::Between, json!([1, 2, 3]), DataType::Number);
        assert_eq!(compile_condition(&c), None);
    }

    #[test]
    fn test_in_accepts_list_or_comma_string() {
        let from_string = cond("tag", Operator::In, json!("a, b,c"), DataType::Keyword);
        let from_list = cond("tag", Operator::In, json!(["a", "b", "c"]), DataType::Keyword);
        let expected = json!({"terms": {"tag": ["a", "b", "c"]}});
        assert_eq!(compile_condition(&from_string), Some(expected.clone()));
        assert_eq!(compile_condition(&from_list), Some(expected));
    }

    #[test]
    fn test_not_in_negates_terms() {
        let c = cond("tag", Operator::NotIn, json!("x,y"), DataType::Keyword);
        assert_eq!(
            compile_condition(&c),
            Some(json!({"bool": {"must_not": [{"terms": {"tag": ["x", "y"]}}]}}))
        );
    }

    #[test]
    fn test_exists_family_ignores_value() {
        let c = cond("email", Operator::Exists, Value::Null, DataType::Keyword);
        assert_eq!(
            compile_condition(&c),
            Some(json!({"exists": {"field": "email"}}))
        );
        let c = cond("email", Operator::NotExists, json!(""), DataType::Keyword);
        assert_eq!(
            compile_condition(&c),
            Some(json!({"bool": {"must_not": [{"exists": {"field": "email"}}]}}))
        );
    }

    #[test]
    fn test_regex_uses_regexp() {
        let c = cond("code", Operator::Regex, json!("E[0-9]+"), DataType::Keyword);
        assert_eq!(
            compile_condition(&c),
            Some(json!({"regexp": {"code": "E[0-9]+"}}))
        );
    }

    #[test]
    fn test_incomplete_conditions_are_omitted() {
        let c = cond("", Operator::Equals, json!("x"), DataType::Keyword);
        assert_eq!(compile_condition(&c), None);

        let mut c = cond("a", Operator::Equals, json!("x"), DataType::Keyword);
        c.operator = None;
        assert_eq!(compile_condition(&c), None);

        let c = cond("a", Operator::Equals, json!(""), DataType::Keyword);
        assert_eq!(compile_condition(&c), None);

        let c = cond("a", Operator::Equals, Value::Null, DataType::Keyword);
        assert_eq!(compile_condition(&c), None);

        let c = cond("a", Operator::Unsupported, json!("x"), DataType::Keyword);
        assert_eq!(compile_condition(&c), None);
    }

    #[test]
    fn test_falsy_scalars_are_not_empty() {
        let c = cond("flag", Operator::Equals, json!(false), DataType::Boolean);
        assert_eq!(
            compile_condition(&c),
            Some(json!({"term": {"flag": false}}))
        );
        let c = cond("n", Operator::Equals, json!(0), DataType::Number);
        assert_eq!(compile_condition(&c), Some(json!({"term": {"n": 0}})));
    }
}
