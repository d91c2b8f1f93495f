//! Schema validation.
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - A type mismatch stops descent into that branch only; siblings are still checked
//! - Custom predicates run inside `catch_unwind`, a panic becomes a violation

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::schema::node::{SchemaNode, ValueKind};

/// A single schema violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    /// Dot-path of the offending field (empty for the root).
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "<root>: {}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Validate `tree` against `schema`, collecting every violation.
pub fn validate(tree: &Value, schema: &SchemaNode) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    check_node(tree, schema, "", &mut errors);
    errors
}

fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

fn check_node(value: &Value, schema: &SchemaNode, path: &str, errors: &mut Vec<ValidationError>) {
    if !schema.kind.matches(value) && schema.kind != ValueKind::Any {
        errors.push(ValidationError::new(
            path,
            format!("expected {}, got {}", schema.kind, ValueKind::describe(value)),
        ));
        return;
    }

    match value {
        Value::Number(n) => {
            if let Some(n) = n.as_f64() {
                check_bounds(n, schema, path, errors);
            }
        }
        Value::String(s) => check_length(s.chars().count(), schema, path, errors),
        Value::Array(items) => {
            check_length(items.len(), schema, path, errors);
            if let Some(item_schema) = &schema.items {
                for (i, item) in items.iter().enumerate() {
                    let item_path = child_path(path, &i.to_string());
                    if item.is_null() {
                        errors.push(ValidationError::new(item_path, "null array element"));
                        continue;
                    }
                    check_node(item, item_schema, &item_path, errors);
                }
            }
        }
        Value::Object(map) => check_properties(map, schema, path, errors),
        Value::Bool(_) | Value::Null => {}
    }

    if let Some(allowed) = &schema.allowed {
        if !allowed.contains(value) {
            let listed = allowed
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            errors.push(ValidationError::new(path, format!("must be one of [{listed}]")));
        }
    }

    if let Some(predicate) = &schema.predicate {
        match panic::catch_unwind(AssertUnwindSafe(|| predicate(value))) {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => errors.push(ValidationError::new(path, reason)),
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::warn!(path = %path, reason = %reason, "Custom validator panicked");
                errors.push(ValidationError::new(
                    path,
                    format!("custom validator panicked: {reason}"),
                ));
            }
        }
    }
}

fn check_properties(
    map: &Map<String, Value>,
    schema: &SchemaNode,
    path: &str,
    errors: &mut Vec<ValidationError>,
) {
    for (key, prop) in &schema.properties {
        let prop_path = child_path(path, key);
        match map.get(key) {
            None | Some(Value::Null) => {
                if prop.required {
                    errors.push(ValidationError::new(prop_path, "required field missing"));
                }
            }
            Some(value) => check_node(value, prop, &prop_path, errors),
        }
    }
}

fn check_bounds(n: f64, schema: &SchemaNode, path: &str, errors: &mut Vec<ValidationError>) {
    if let Some(min) = schema.minimum {
        if n < min {
            errors.push(ValidationError::new(path, format!("below minimum ({min})")));
        }
    }
    if let Some(max) = schema.maximum {
        if n > max {
            errors.push(ValidationError::new(path, format!("above maximum ({max})")));
        }
    }
}

fn check_length(len: usize, schema: &SchemaNode, path: &str, errors: &mut Vec<ValidationError>) {
    if let Some(min) = schema.min_length {
        if len < min {
            errors.push(ValidationError::new(
                path,
                format!("shorter than minimum length ({min})"),
            ));
        }
    }
    if let Some(max) = schema.max_length {
        if len > max {
            errors.push(ValidationError::new(
                path,
                format!("longer than maximum length ({max})"),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> SchemaNode {
        SchemaNode::object()
            .property(
                "minecraft",
                SchemaNode::object()
                    .required()
                    .property("port", SchemaNode::integer().required().range(1024.0, 65535.0))
                    .property("motd", SchemaNode::string().max_length(8)),
            )
            .property(
                "logging",
                SchemaNode::object().property(
                    "level",
                    SchemaNode::string().one_of(["debug", "info", "warn", "error"]),
                ),
            )
            .property("tags", SchemaNode::array(SchemaNode::string().min_length(1)))
    }

    #[test]
    fn test_valid_tree_has_no_errors() {
        let tree = json!({
            "minecraft": { "port": 25565, "motd": "hello" },
            "logging": { "level": "info" },
            "tags": ["a", "b"]
        });
        assert!(validate(&tree, &schema()).is_empty());
    }

    #[test]
    fn test_above_maximum_message() {
        let tree = json!({ "minecraft": { "port": 70000 } });
        assert_eq!(
            validate(&tree, &schema()),
            vec![ValidationError::new("minecraft.port", "above maximum (65535)")]
        );
    }

    #[test]
    fn test_collects_all_violations() {
        let tree = json!({
            "minecraft": { "port": 80, "motd": "a very long message" },
            "logging": { "level": "loud" },
            "tags": ["ok", "", 3]
        });
        let errors = validate(&tree, &schema());
        let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "logging.level",
                "minecraft.motd",
                "minecraft.port",
                "tags.1",
                "tags.2"
            ]
        );
        assert_eq!(errors[2].message, "below minimum (1024)");
        assert_eq!(errors[4].message, "expected string, got integer");
    }

    #[test]
    fn test_type_mismatch_skips_branch_but_not_siblings() {
        let tree = json!({ "minecraft": "not-an-object", "logging": { "level": 5 } });
        let errors = validate(&tree, &schema());
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].path, "logging.level");
        assert_eq!(errors[1], ValidationError::new("minecraft", "expected object, got string"));
    }

    #[test]
    fn test_required_null_is_missing() {
        let tree = json!({ "minecraft": { "port": null } });
        assert_eq!(
            validate(&tree, &schema()),
            vec![ValidationError::new("minecraft.port", "required field missing")]
        );
    }

    #[test]
    fn test_predicate_failure_and_panic() {
        let schema = SchemaNode::object()
            .property(
                "even",
                SchemaNode::integer().check(|v| match v.as_i64() {
                    Some(n) if n % 2 == 0 => Ok(()),
                    _ => Err("must be even".to_string()),
                }),
            )
            .property("boom", SchemaNode::string().check(|_| panic!("exploded")))
            .property("after", SchemaNode::boolean());

        let tree = json!({ "even": 3, "boom": "x", "after": "nope" });
        let errors = validate(&tree, &schema);
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0], ValidationError::new("after", "expected boolean, got string"));
        assert_eq!(errors[1].message, "custom validator panicked: exploded");
        assert_eq!(errors[2], ValidationError::new("even", "must be even"));
    }
}
