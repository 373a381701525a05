//! Structural schemas with parse semantics.
//!
//! Tool inputs and agent outputs arrive as dynamic JSON, so they are checked
//! against the JSON-Schema-shaped `parameters` values that tool definitions
//! and templates carry. The supported subset covers what the runtime's
//! schemas actually use: `type`, `properties`, `required`, `items`, `enum`,
//! and `additionalProperties: false`. Unknown keywords are ignored.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// A validation failure with the offending path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{path}: {message}")]
pub struct SchemaError {
    /// JSON-pointer-ish path of the failing value (`input`, `input.agents[0]`, ...).
    pub path: String,
    /// What was expected.
    pub message: String,
}

impl SchemaError {
    /// Create a mismatch error.
    #[must_use]
    pub fn mismatch(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A compiled structural schema.
///
/// Wraps a raw JSON Schema value and exposes `parse` semantics: a value
/// either satisfies the schema or fails with a path-labelled error.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    root: Value,
}

impl Schema {
    /// Wrap a raw schema value.
    #[must_use]
    pub const fn new(root: Value) -> Self {
        Self { root }
    }

    /// The schema accepting any JSON object.
    #[must_use]
    pub fn any_object() -> Self {
        Self::new(serde_json::json!({ "type": "object" }))
    }

    /// The underlying schema value.
    #[must_use]
    pub const fn as_value(&self) -> &Value {
        &self.root
    }

    /// Validate a value against this schema.
    pub fn parse(&self, value: &Value) -> Result<(), SchemaError> {
        validate_value(&self.root, value, "input")
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::any_object()
    }
}

/// Validate `value` against the JSON-schema subset in `schema`.
///
/// `path` labels the value's position for error messages.
pub fn validate_value(schema: &Value, value: &Value, path: &str) -> Result<(), SchemaError> {
    let Some(schema_obj) = schema.as_object() else {
        // Non-object schemas (true/false/absent) accept everything.
        return Ok(());
    };

    if let Some(expected) = schema_obj.get("type").and_then(Value::as_str) {
        check_type(expected, value, path)?;
    }

    if let Some(allowed) = schema_obj.get("enum").and_then(Value::as_array)
        && !allowed.contains(value)
    {
        return Err(SchemaError::mismatch(
            path,
            format!("must be one of {}", Value::Array(allowed.clone())),
        ));
    }

    if let Some(object) = value.as_object() {
        let properties = schema_obj.get("properties").and_then(Value::as_object);

        if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(name) {
                    return Err(SchemaError::mismatch(
                        path,
                        format!("missing required field `{name}`"),
                    ));
                }
            }
        }

        if let Some(properties) = properties {
            for (name, field) in object {
                if let Some(field_schema) = properties.get(name) {
                    validate_value(field_schema, field, &format!("{path}.{name}"))?;
                } else if schema_obj.get("additionalProperties") == Some(&Value::Bool(false)) {
                    return Err(SchemaError::mismatch(
                        path,
                        format!("unknown field `{name}`"),
                    ));
                }
            }
        }
    }

    if let Some(items) = value.as_array()
        && let Some(item_schema) = schema_obj.get("items")
    {
        for (index, item) in items.iter().enumerate() {
            validate_value(item_schema, item, &format!("{path}[{index}]"))?;
        }
    }

    Ok(())
}

fn check_type(expected: &str, value: &Value, path: &str) -> Result<(), SchemaError> {
    let ok = match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        // Unknown type names accept everything.
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(SchemaError::mismatch(
            path,
            format!("expected {expected}, got {}", type_name(value)),
        ))
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
