//! Validation of structured replies against the JSON schemas produced by
//! `#[derive(OutputSchema)]`.
//!
//! Only the subset the derive emits is understood: `type`, `properties`,
//! `required`, `enum` and `items`. Unknown keywords are ignored.

use serde_json::Value;

/// Check `value` against `schema`. The error names the offending path.
pub fn validate(value: &Value, schema: &Value) -> Result<(), String> {
    validate_at(value, schema, "$")
}

fn validate_at(value: &Value, schema: &Value, path: &str) -> Result<(), String> {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !type_matches(value, expected) {
            return Err(format!(
                "{path}: expected {expected}, found {}",
                type_name(value)
            ));
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(format!("{path}: {value} is not one of {}", Value::Array(allowed.clone())));
        }
    }

    if let Value::Object(map) = value {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                match map.get(key) {
                    None | Some(Value::Null) => {
                        return Err(format!("{path}: missing required field '{key}'"))
                    }
                    Some(_) => {}
                }
            }
        }
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (key, property_schema) in properties {
                match map.get(key) {
                    // Optional fields may be omitted or null.
                    None | Some(Value::Null) => {}
                    Some(field) => validate_at(field, property_schema, &format!("{path}.{key}"))?,
                }
            }
        }
    }

    if let (Value::Array(items), Some(item_schema)) = (value, schema.get("items")) {
        for (i, item) in items.iter().enumerate() {
            validate_at(item, item_schema, &format!("{path}[{i}]"))?;
        }
    }

    Ok(())
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
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
    use serde_json::json;

    fn judgement_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "is_reasonable": {"type": "boolean"},
                "entities": {"type": "array", "items": {"type": "string"}},
                "kind": {"type": "string", "enum": ["NPC", "LOCATION"]},
                "note": {"type": "string"}
            },
            "required": ["is_reasonable", "entities"]
        })
    }

    #[test]
    fn test_accepts_valid_value() {
        let value = json!({"is_reasonable": true, "entities": ["Mira"], "kind": "NPC", "note": null});
        assert!(validate(&value, &judgement_schema()).is_ok());
    }

    #[test]
    fn test_reports_missing_required() {
        let err = validate(&json!({"entities": []}), &judgement_schema()).unwrap_err();
        assert!(err.contains("is_reasonable"), "{err}");
    }

    #[test]
    fn test_reports_nested_type_errors() {
        let value = json!({"is_reasonable": true, "entities": ["Mira", 4]});
        let err = validate(&value, &judgement_schema()).unwrap_err();
        assert!(err.starts_with("$.entities[1]"), "{err}");
    }

    #[test]
    fn test_enforces_enums() {
        let value = json!({"is_reasonable": false, "entities": [], "kind": "DRAGON"});
        assert!(validate(&value, &judgement_schema()).is_err());
    }

    #[test]
    fn test_integer_rejects_fraction() {
        let schema = json!({"type": "integer"});
        assert!(validate(&json!(3), &schema).is_ok());
        assert!(validate(&json!(3.5), &schema).is_err());
    }
}
