//! Structured-output validation against a JSON-Schema subset.
//!
//! Supported keywords: `type` (single or list), `properties`, `required`,
//! `additionalProperties`, `items`, `enum`, `minimum`/`maximum`,
//! `minItems`/`maxItems`, `minLength`/`maxLength`. Annotation keywords such as
//! `description` or `title` are accepted and ignored.

use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

const TYPE_NAMES: &[&str] = &["object", "array", "string", "number", "integer", "boolean", "null"];

/// The schema document itself is unusable.
#[derive(Debug, Error, PartialEq)]
#[error("invalid schema at {path}: {reason}")]
pub struct SchemaError {
    pub path: String,
    pub reason: String,
}

/// First place where an instance departs from the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// JSON-pointer-like location, `/` for the root.
    pub path: String,
    pub reason: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

impl std::error::Error for Violation {}

/// A schema document checked once for well-formedness.
#[derive(Debug, Clone)]
pub struct Schema {
    document: Value,
}

fn child(path: &str, segment: &str) -> String {
    if path == "/" {
        format!("/{segment}")
    } else {
        format!("{path}/{segment}")
    }
}

fn schema_err(path: &str, reason: impl Into<String>) -> SchemaError {
    SchemaError { path: path.to_string(), reason: reason.into() }
}

fn check_non_negative(node: &Map<String, Value>, key: &str, path: &str) -> Result<(), SchemaError> {
    match node.get(key) {
        None => Ok(()),
        Some(v) if v.as_u64().is_some() => Ok(()),
        Some(_) => Err(schema_err(path, format!("{key} must be a non-negative integer"))),
    }
}

fn compile_node(node: &Value, path: &str) -> Result<(), SchemaError> {
    let obj = match node {
        Value::Bool(_) => return Ok(()),
        Value::Object(obj) => obj,
        _ => return Err(schema_err(path, "schema must be an object or boolean")),
    };

    if let Some(t) = obj.get("type") {
        let names: Vec<&Value> = match t {
            Value::Array(list) if !list.is_empty() => list.iter().collect(),
            Value::String(_) => vec![t],
            _ => return Err(schema_err(path, "type must be a string or non-empty list")),
        };
        for name in names {
            match name.as_str() {
                Some(n) if TYPE_NAMES.contains(&n) => {}
                _ => return Err(schema_err(path, format!("unknown type {name}"))),
            }
        }
    }

    if let Some(props) = obj.get("properties") {
        let props = props
            .as_object()
            .ok_or_else(|| schema_err(path, "properties must be an object"))?;
        for (key, sub) in props {
            compile_node(sub, &child(&child(path, "properties"), key))?;
        }
    }

    if let Some(required) = obj.get("required") {
        let ok = required.as_array().is_some_and(|r| r.iter().all(Value::is_string));
        if !ok {
            return Err(schema_err(path, "required must be a list of strings"));
        }
    }

    if let Some(additional) = obj.get("additionalProperties") {
        compile_node(additional, &child(path, "additionalProperties"))?;
    }

    if let Some(items) = obj.get("items") {
        compile_node(items, &child(path, "items"))?;
    }

    if let Some(e) = obj.get("enum") {
        if !e.is_array() {
            return Err(schema_err(path, "enum must be a list"));
        }
    }

    for key in ["minimum", "maximum"] {
        if obj.get(key).is_some_and(|v| !v.is_number()) {
            return Err(schema_err(path, format!("{key} must be a number")));
        }
    }

    for key in ["minItems", "maxItems", "minLength", "maxLength"] {
        check_non_negative(obj, key, path)?;
    }
    Ok(())
}

fn type_matches(name: &str, value: &Value) -> bool {
    match name {
        "object"  => value.is_object(),
        "array"   => value.is_array(),
        "string"  => value.is_string(),
        "number"  => value.is_number(),
        "integer" => value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|f| f.fract() == 0.0),
        "boolean" => value.is_boolean(),
        "null"    => value.is_null(),
        _         => false,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null      => "null",
        Value::Bool(_)   => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_)  => "array",
        Value::Object(_) => "object",
    }
}

fn violation(path: &str, reason: impl Into<String>) -> Violation {
    Violation { path: path.to_string(), reason: reason.into() }
}

fn validate_node(schema: &Value, value: &Value, path: &str) -> Result<(), Violation> {
    let obj = match schema {
        Value::Bool(true) => return Ok(()),
        Value::Bool(false) => return Err(violation(path, "no value is allowed here")),
        Value::Object(obj) => obj,
        _ => return Ok(()),
    };

    if let Some(t) = obj.get("type") {
        let allowed: Vec<&str> = match t {
            Value::String(s) => vec![s.as_str()],
            Value::Array(list) => list.iter().filter_map(Value::as_str).collect(),
            _ => vec![],
        };
        if !allowed.iter().any(|name| type_matches(name, value)) {
            return Err(violation(
                path,
                format!("expected {}, got {}", allowed.join(" or "), type_name(value)),
            ));
        }
    }

    if let Some(Value::Array(options)) = obj.get("enum") {
        if !options.contains(value) {
            return Err(violation(path, format!("{value} is not one of {}", Value::Array(options.clone()))));
        }
    }

    match value {
        Value::Number(n) => {
            let x = n.as_f64().unwrap_or(f64::NAN);
            if let Some(min) = obj.get("minimum").and_then(Value::as_f64) {
                if x < min {
                    return Err(violation(path, format!("{x} is less than the minimum of {min}")));
                }
            }
            if let Some(max) = obj.get("maximum").and_then(Value::as_f64) {
                if x > max {
                    return Err(violation(path, format!("{x} is greater than the maximum of {max}")));
                }
            }
        }
        Value::String(s) => {
            let len = s.chars().count() as u64;
            if let Some(min) = obj.get("minLength").and_then(Value::as_u64) {
                if len < min {
                    return Err(violation(path, format!("string shorter than {min} characters")));
                }
            }
            if let Some(max) = obj.get("maxLength").and_then(Value::as_u64) {
                if len > max {
                    return Err(violation(path, format!("string longer than {max} characters")));
                }
            }
        }
        Value::Array(items) => {
            let len = items.len() as u64;
            if let Some(min) = obj.get("minItems").and_then(Value::as_u64) {
                if len < min {
                    return Err(violation(path, format!("expected at least {min} items, got {len}")));
                }
            }
            if let Some(max) = obj.get("maxItems").and_then(Value::as_u64) {
                if len > max {
                    return Err(violation(path, format!("expected at most {max} items, got {len}")));
                }
            }
            if let Some(item_schema) = obj.get("items") {
                for (i, item) in items.iter().enumerate() {
                    validate_node(item_schema, item, &child(path, &i.to_string()))?;
                }
            }
        }
        Value::Object(fields) => {
            if let Some(Value::Array(required)) = obj.get("required") {
                for key in required.iter().filter_map(Value::as_str) {
                    if !fields.contains_key(key) {
                        return Err(violation(path, format!("'{key}' is a required property")));
                    }
                }
            }
            let props = obj.get("properties").and_then(Value::as_object);
            for (key, field) in fields {
                match props.and_then(|p| p.get(key)) {
                    Some(sub) => validate_node(sub, field, &child(path, key))?,
                    None => match obj.get("additionalProperties") {
                        Some(Value::Bool(false)) => {
                            return Err(violation(path, format!("additional property '{key}' is not allowed")));
                        }
                        Some(extra) => validate_node(extra, field, &child(path, key))?,
                        None => {}
                    },
                }
            }
        }
        _ => {}
    }
    Ok(())
}

impl Schema {
    /// Check the document once. An unusable schema is a configuration error.
    pub fn compile(document: Value) -> Result<Self, SchemaError> {
        compile_node(&document, "/")?;
        Ok(Self { document })
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Compact JSON rendering, used in repair prompts.
    pub fn to_json_string(&self) -> String {
        self.document.to_string()
    }

    pub fn validate(&self, instance: &Value) -> Result<(), Violation> {
        validate_node(&self.document, instance, "/")
    }
}
