//! Validate tool call arguments against a tool's input schema.
//!
//! Runs once at the registry boundary; everything downstream receives
//! arguments that already match the advertised shape.

/// Validate tool arguments against a JSON Schema.
///
/// Covers the subset of JSON Schema the market catalog uses: object type,
/// required fields, per-property primitive types, string enums and the item
/// type of string arrays. Returns the first violation found.
pub fn validate_arguments(
    args: &serde_json::Value,
    schema: &serde_json::Value,
) -> Result<(), String> {
    if schema.get("type").and_then(|v| v.as_str()) == Some("object") && !args.is_object() {
        return Err(format!(
            "expected object arguments, got {}",
            json_type_name(args)
        ));
    }

    let Some(obj) = args.as_object() else {
        return Ok(());
    };

    if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
        for name in required.iter().filter_map(|field| field.as_str()) {
            if !obj.contains_key(name) {
                return Err(format!("missing required field '{name}'"));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) else {
        return Ok(());
    };

    for (key, value) in obj {
        let Some(prop_schema) = properties.get(key) else {
            continue;
        };
        check_property(key, value, prop_schema)?;
    }

    Ok(())
}

fn check_property(
    key: &str,
    value: &serde_json::Value,
    prop_schema: &serde_json::Value,
) -> Result<(), String> {
    if let Some(expected_type) = prop_schema.get("type").and_then(|v| v.as_str()) {
        if !value_matches_type(value, expected_type) {
            return Err(format!(
                "field '{key}' expected type '{expected_type}', got {}",
                json_type_name(value)
            ));
        }
    }

    if let (Some(allowed), Some(actual)) = (
        prop_schema.get("enum").and_then(|v| v.as_array()),
        value.as_str(),
    ) {
        if !allowed.iter().any(|candidate| candidate.as_str() == Some(actual)) {
            return Err(format!("field '{key}' has unsupported value '{actual}'"));
        }
    }

    if let (Some(items), Some(elements)) = (
        prop_schema
            .get("items")
            .and_then(|v| v.get("type"))
            .and_then(|v| v.as_str()),
        value.as_array(),
    ) {
        if let Some(bad) = elements.iter().find(|e| !value_matches_type(e, items)) {
            return Err(format!(
                "field '{key}' expected items of type '{items}', got {}",
                json_type_name(bad)
            ));
        }
    }

    Ok(())
}

fn value_matches_type(value: &serde_json::Value, expected: &str) -> bool {
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

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
