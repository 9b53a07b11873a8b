//! Schema validation helpers.
//!
//! Checks a resource configuration (`serde_json::Value`) against its
//! [`Schema`] before any remote call is made.
//!
//! ```
//! use apigee_provider::schema::{Schema, Attribute};
//! use apigee_provider::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("proxy_name", Attribute::required_string())
//!     .with_attribute("revision", Attribute::required_int64().with_min(1));
//!
//! assert!(validate(&schema, &json!({"proxy_name": "orders-api", "revision": 3})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"proxy_name": "orders-api", "revision": 0}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("revision".to_string()));
//! ```

use crate::schema::{Attribute, AttributeType, Diagnostic, Schema};
use serde_json::Value;

/// Validate a JSON value against a schema.
///
/// Returns a list of diagnostics for any validation errors found.
/// An empty list means the value is valid.
///
/// - Required attributes must be present and non-null
/// - Computed-only attributes are skipped
/// - Attribute types must match the schema
/// - Integer bounds and string value sets are enforced
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let obj = match value {
        Value::Object(map) => map,
        other => {
            diagnostics.push(
                Diagnostic::error("Expected object")
                    .with_detail(format!("Got {}", value_type_name(other))),
            );
            return diagnostics;
        }
    };

    for (name, attr) in &schema.attributes {
        validate_attribute(attr, obj.get(name), name, &mut diagnostics);
    }
    diagnostics
}

/// Validate, returning `Ok` if valid or `Err` with the diagnostics.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Check if a JSON value is valid against a schema.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.flags.computed && !attr.flags.optional && !attr.flags.required {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        }
        Some(v) => {
            if validate_attribute_type(&attr.attr_type, v, path, diagnostics) {
                validate_constraints(attr, v, path, diagnostics);
            }
        }
    }
}

fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) -> bool {
    let before = diagnostics.len();
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        }
        AttributeType::Int64 => {
            if !value.is_i64() {
                diagnostics.push(type_error(path, "int64", value));
            }
        }
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
            }
        }
        AttributeType::Map(value_type) => match value.as_object() {
            Some(obj) => {
                for (key, val) in obj {
                    let key_path = format!("{}.{}", path, key);
                    validate_attribute_type(value_type, val, &key_path, diagnostics);
                }
            }
            None => diagnostics.push(type_error(path, "map", value)),
        },
    }
    diagnostics.len() == before
}

fn validate_constraints(attr: &Attribute, value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    if let Some(n) = value.as_i64() {
        let below = attr.min.is_some_and(|min| n < min);
        let above = attr.max.is_some_and(|max| n > max);
        if below || above {
            let bounds = match (attr.min, attr.max) {
                (Some(min), Some(max)) => format!("between {} and {}", min, max),
                (Some(min), None) => format!("at least {}", min),
                (None, Some(max)) => format!("at most {}", max),
                (None, None) => String::from("in range"),
            };
            diagnostics.push(
                Diagnostic::error(format!("Invalid value for '{}'", path))
                    .with_detail(format!("Expected a value {}, got {}", bounds, n))
                    .with_attribute(path),
            );
        }
    }

    if let Some(s) = value.as_str() {
        if !attr.one_of.is_empty() && !attr.one_of.iter().any(|allowed| allowed == s) {
            diagnostics.push(
                Diagnostic::error(format!("Invalid value for '{}'", path))
                    .with_detail(format!(
                        "Expected one of [{}], got '{}'",
                        attr.one_of.join(", "),
                        s
                    ))
                    .with_attribute(path),
            );
        }
    }
}

fn type_error(path: &str, expected: &str, value: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for '{}'", path))
        .with_detail(format!("Expected {}, got {}", expected, value_type_name(value)))
        .with_attribute(path)
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
