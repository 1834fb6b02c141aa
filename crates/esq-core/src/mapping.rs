//! # Field Catalog
//!
//! Flattens an index mapping into the list of fields a query builder can
//! offer, with dotted paths for object and multi-field children.

use serde::{Deserialize, Serialize};
use serde_json::Value;

const SEARCHABLE_TYPES: [&str; 10] = [
    "text", "keyword", "long", "integer", "short", "byte", "double", "float", "date", "boolean",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub searchable: bool,
    pub aggregatable: bool,
}

pub fn is_searchable(field_type: &str) -> bool {
    SEARCHABLE_TYPES.contains(&field_type)
}

/// Everything searchable except analyzed text.
pub fn is_aggregatable(field_type: &str) -> bool {
    field_type != "text" && is_searchable(field_type)
}

/// Walk a `properties` object.
pub fn extract_fields(properties: &Value) -> Vec<FieldInfo> {
    let mut fields = Vec::new();
    collect(properties, "", &mut fields);
    fields
}

/// Read `<index>.mappings.properties` from a `GET <index>/_mapping` response.
pub fn index_fields(mapping_response: &Value, index: &str) -> Vec<FieldInfo> {
    mapping_response
        .get(index)
        .and_then(|m| m.pointer("/mappings/properties"))
        .map(extract_fields)
        .unwrap_or_default()
}

fn collect(properties: &Value, prefix: &str, out: &mut Vec<FieldInfo>) {
    let Some(map) = properties.as_object() else {
        return;
    };

    for (name, config) in map {
        let full_name = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };

        if let Some(field_type) = config.get("type").and_then(Value::as_str) {
            out.push(FieldInfo {
                name: full_name.clone(),
                field_type: field_type.to_string(),
                searchable: is_searchable(field_type),
                aggregatable: is_aggregatable(field_type),
            });
        }
        if let Some(nested) = config.get("properties") {
            collect(nested, &full_name, out);
        }
        if let Some(multi) = config.get("fields") {
            collect(multi, &full_name, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extracts_nested_and_multi_fields() {
        let mapping = json!({
            "logs": {"mappings": {"properties": {
                "message": {"type": "text", "fields": {"raw": {"type": "keyword"}}},
                "user": {"properties": {
                    "id": {"type": "long"},
                    "geo": {"type": "geo_point"}
                }}
            }}}
        });
        let fields = index_fields(&mapping, "logs");
        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["message", "message.raw", "user.geo", "user.id"]
        );

        let message = &fields[0];
        assert!(message.searchable);
        assert!(!message.aggregatable);

        let raw = &fields[1];
        assert!(raw.aggregatable);

        let geo = &fields[2];
        assert!(!geo.searchable && !geo.aggregatable);
    }

    #[test]
    fn test_missing_index_yields_nothing() {
        assert!(index_fields(&json!({}), "nope").is_empty());
    }
}
