//! Check tool call arguments against the tool's JSON Schema before execution.
//!
//! Covers the subset tools actually declare: top-level type, required
//! properties, property types, string enums and closed objects.

use serde_json::Value;

use crate::error::CadenceError;

/// Validate `args` against `schema`, reporting the first violation.
pub fn validate_arguments(args: &Value, schema: &Value) -> Result<(), CadenceError> {
    check(args, schema).map_err(CadenceError::InvalidArgument)
}

fn check(args: &Value, schema: &Value) -> Result<(), String> {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !matches_type(args, expected) {
            return Err(format!(
                "expected {expected} arguments, got {}",
                type_name(args)
            ));
        }
    }

    let Some(object) = args.as_object() else {
        return Ok(());
    };

    let required = schema
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str);
    for name in required {
        if !object.contains_key(name) {
            return Err(format!("missing required field '{name}'"));
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

    for (key, value) in object {
        let Some(property) = properties.and_then(|p| p.get(key)) else {
            if closed {
                return Err(format!("unexpected field '{key}'"));
            }
            continue;
        };
        if let Some(expected) = property.get("type").and_then(Value::as_str) {
            if !matches_type(value, expected) {
                return Err(format!(
                    "field '{key}' expected type '{expected}', got {}",
                    type_name(value)
                ));
            }
        }
        if let Some(allowed) = property.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                return Err(format!("field '{key}' is not one of the allowed values"));
            }
        }
    }

    Ok(())
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolParameters;
    use serde_json::json;

    fn search_schema() -> Value {
        ToolParameters::object()
            .string("q", "query", true)
            .integer("limit", "max hits", false)
            .string_enum("mode", "match mode", &["exact", "fuzzy"], false)
            .build()
            .schema
    }

    fn violation(args: Value, schema: &Value) -> String {
        match validate_arguments(&args, schema) {
            Err(CadenceError::InvalidArgument(message)) => message,
            other => panic!("expected InvalidArgument, got {other:?}"),
        }
    }

    #[test]
    fn accepts_conforming_arguments() {
        let schema = search_schema();
        assert!(validate_arguments(&json!({ "q": "x" }), &schema).is_ok());
        let full = json!({ "q": "x", "limit": 2, "mode": "exact" });
        assert!(validate_arguments(&full, &schema).is_ok());
        assert!(validate_arguments(&json!({ "q": "x", "extra": true }), &schema).is_ok());
    }

    #[test]
    fn reports_first_violation() {
        let schema = search_schema();
        assert!(violation(json!("x"), &schema).contains("expected object"));
        assert!(violation(json!({}), &schema).contains("missing required field 'q'"));
        assert!(violation(json!({ "q": 1 }), &schema).contains("expected type 'string'"));
        assert!(violation(json!({ "q": "x", "limit": 1.5 }), &schema).contains("'integer'"));
        let message = violation(json!({ "q": "x", "mode": "regex" }), &schema);
        assert!(message.contains("allowed values"));
    }

    #[test]
    fn closed_schema_rejects_unknown_fields() {
        let schema = ToolParameters::object().string("q", "query", true).closed().build().schema;
        let message = violation(json!({ "q": "x", "page": 2 }), &schema);
        assert!(message.contains("unexpected field 'page'"));
    }

    #[test]
    fn schema_without_type_accepts_anything() {
        assert!(validate_arguments(&Value::Null, &json!({})).is_ok());
    }
}
