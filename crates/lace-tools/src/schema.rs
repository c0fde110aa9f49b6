// Copyright (c) 2025-2026 The Lace Authors
//
// SPDX-License-Identifier: MIT
use serde_json::Value;

/// Validate a tool input object against its declared JSON-schema document.
///
/// Validation is exact: unknown fields are rejected unless the schema sets
/// `additionalProperties: true`.  The supported subset covers what tool
/// descriptors declare — object/array/scalar types, `required`, nested
/// `properties`, `items`, and `enum`.
pub fn validate_input(schema: &Value, input: &Value) -> Result<(), String> {
    validate_value(schema, input, "$")
}

fn validate_value(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(format!("{path}: value {value} not in enum"));
        }
        return Ok(());
    }

    let declared = schema.get("type").and_then(Value::as_str);
    match declared {
        Some("object") => validate_object(schema, value, path),
        None if schema.get("properties").is_some() => validate_object(schema, value, path),
        Some("array") => {
            let items = value
                .as_array()
                .ok_or_else(|| format!("{path}: expected array, got {}", type_name(value)))?;
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    validate_value(item_schema, item, &format!("{path}[{i}]"))?;
                }
            }
            Ok(())
        }
        Some("string") => value
            .as_str()
            .map(|_| ())
            .ok_or_else(|| format!("{path}: expected string, got {}", type_name(value))),
        Some("integer") => {
            if value.is_i64() || value.is_u64() {
                Ok(())
            } else {
                Err(format!("{path}: expected integer, got {}", type_name(value)))
            }
        }
        Some("number") => {
            if value.is_number() {
                Ok(())
            } else {
                Err(format!("{path}: expected number, got {}", type_name(value)))
            }
        }
        Some("boolean") => value
            .as_bool()
            .map(|_| ())
            .ok_or_else(|| format!("{path}: expected boolean, got {}", type_name(value))),
        Some("null") => {
            if value.is_null() {
                Ok(())
            } else {
                Err(format!("{path}: expected null, got {}", type_name(value)))
            }
        }
        Some(other) => Err(format!("{path}: unsupported schema type {other}")),
        // No type and no properties: nothing to check.
        None => Ok(()),
    }
}

fn validate_object(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    let obj = value
        .as_object()
        .ok_or_else(|| format!("{path}: expected object, got {}", type_name(value)))?;

    let empty = serde_json::Map::new();
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(field) {
                return Err(format!("{path}: missing required field \"{field}\""));
            }
        }
    }

    let allow_extra = schema
        .get("additionalProperties")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    for (key, field_value) in obj {
        match properties.get(key) {
            Some(field_schema) => {
                validate_value(field_schema, field_value, &format!("{path}.{key}"))?
            }
            None if allow_extra => {}
            None => return Err(format!("{path}: unknown field \"{key}\"")),
        }
    }
    Ok(())
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn file_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "offset": { "type": "integer" },
            },
            "required": ["path"]
        })
    }

    #[test]
    fn valid_input_passes() {
        assert!(validate_input(&file_schema(), &json!({"path": "a.txt"})).is_ok());
        assert!(validate_input(&file_schema(), &json!({"path": "a.txt", "offset": 3})).is_ok());
    }

    #[test]
    fn missing_required_field_rejected() {
        let err = validate_input(&file_schema(), &json!({"offset": 3})).unwrap_err();
        assert!(err.contains("missing required field"), "{err}");
    }

    #[test]
    fn unknown_field_rejected_by_default() {
        let err = validate_input(&file_schema(), &json!({"path": "a", "extra": 1})).unwrap_err();
        assert!(err.contains("unknown field"), "{err}");
    }

    #[test]
    fn unknown_field_allowed_when_opted_in() {
        let schema = json!({
            "type": "object",
            "properties": { "a": { "type": "string" } },
            "additionalProperties": true
        });
        assert!(validate_input(&schema, &json!({"a": "x", "b": 1})).is_ok());
    }

    #[test]
    fn wrong_scalar_type_rejected() {
        let err = validate_input(&file_schema(), &json!({"path": 42})).unwrap_err();
        assert!(err.contains("expected string"), "{err}");
    }

    #[test]
    fn float_is_not_an_integer() {
        let err = validate_input(&file_schema(), &json!({"path": "a", "offset": 1.5})).unwrap_err();
        assert!(err.contains("expected integer"), "{err}");
    }

    #[test]
    fn non_object_input_rejected() {
        let err = validate_input(&file_schema(), &json!("just a string")).unwrap_err();
        assert!(err.contains("expected object"), "{err}");
    }

    #[test]
    fn enum_membership_enforced() {
        let schema = json!({
            "type": "object",
            "properties": { "mode": { "type": "string", "enum": ["fast", "safe"] } },
            "required": ["mode"]
        });
        assert!(validate_input(&schema, &json!({"mode": "fast"})).is_ok());
        let err = validate_input(&schema, &json!({"mode": "yolo"})).unwrap_err();
        assert!(err.contains("not in enum"), "{err}");
    }

    #[test]
    fn nested_object_validated_recursively() {
        let schema = json!({
            "type": "object",
            "properties": {
                "opts": {
                    "type": "object",
                    "properties": { "depth": { "type": "integer" } },
                    "required": ["depth"]
                }
            },
            "required": ["opts"]
        });
        assert!(validate_input(&schema, &json!({"opts": {"depth": 2}})).is_ok());
        let err = validate_input(&schema, &json!({"opts": {}})).unwrap_err();
        assert!(err.contains("depth"), "{err}");
    }

    #[test]
    fn array_items_validated() {
        let schema = json!({
            "type": "object",
            "properties": {
                "names": { "type": "array", "items": { "type": "string" } }
            }
        });
        assert!(validate_input(&schema, &json!({"names": ["a", "b"]})).is_ok());
        let err = validate_input(&schema, &json!({"names": ["a", 7]})).unwrap_err();
        assert!(err.contains("[1]"), "{err}");
    }

    #[test]
    fn empty_schema_accepts_any_object() {
        assert!(validate_input(&json!({"type": "object"}), &json!({})).is_ok());
    }
}
