//! Declarative schema descriptors.
//!
//! A schema is a tree of [`SchemaNode`]s mirroring the shape of the
//! configuration tree. Nodes are built in code with the builder methods or
//! deserialized from a JSON document; custom predicates are code-only.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Custom check run against a resolved value after the built-in checks pass.
pub type Predicate = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Expected kind of a configuration value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    /// Accepts any value; only `required`, `enum` and the predicate apply.
    Any,
}

impl ValueKind {
    /// Whether `value` is of this kind. Null matches nothing.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            ValueKind::String => value.is_string(),
            ValueKind::Number => value.is_number(),
            ValueKind::Integer => value.is_i64() || value.is_u64(),
            ValueKind::Boolean => value.is_boolean(),
            ValueKind::Array => value.is_array(),
            ValueKind::Object => value.is_object(),
            ValueKind::Any => !value.is_null(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Number => "number",
            ValueKind::Integer => "integer",
            ValueKind::Boolean => "boolean",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
            ValueKind::Any => "any",
        }
    }

    /// Name of the kind a value actually has, for error messages.
    pub fn describe(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(n) if n.is_f64() => "number",
            Value::Number(_) => "integer",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor for one field of the configuration tree.
#[derive(Clone, Serialize, Deserialize)]
pub struct SchemaNode {
    #[serde(rename = "type")]
    pub kind: ValueKind,

    #[serde(default)]
    pub required: bool,

    /// Inclusive lower bound for numbers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    /// Inclusive upper bound for numbers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,

    /// Minimum character count for strings, element count for arrays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,

    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,

    /// Schema applied to every array element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<SchemaNode>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, SchemaNode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(skip)]
    pub predicate: Option<Predicate>,
}

impl fmt::Debug for SchemaNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaNode")
            .field("kind", &self.kind)
            .field("required", &self.required)
            .field("minimum", &self.minimum)
            .field("maximum", &self.maximum)
            .field("min_length", &self.min_length)
            .field("max_length", &self.max_length)
            .field("allowed", &self.allowed)
            .field("items", &self.items)
            .field("properties", &self.properties)
            .field("default", &self.default)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl SchemaNode {
    pub fn new(kind: ValueKind) -> Self {
        Self {
            kind,
            required: false,
            minimum: None,
            maximum: None,
            min_length: None,
            max_length: None,
            allowed: None,
            items: None,
            properties: BTreeMap::new(),
            default: None,
            predicate: None,
        }
    }

    pub fn string() -> Self {
        Self::new(ValueKind::String)
    }

    pub fn number() -> Self {
        Self::new(ValueKind::Number)
    }

    pub fn integer() -> Self {
        Self::new(ValueKind::Integer)
    }

    pub fn boolean() -> Self {
        Self::new(ValueKind::Boolean)
    }

    pub fn object() -> Self {
        Self::new(ValueKind::Object)
    }

    pub fn any() -> Self {
        Self::new(ValueKind::Any)
    }

    /// Array whose elements must satisfy `items`.
    pub fn array(items: SchemaNode) -> Self {
        let mut node = Self::new(ValueKind::Array);
        node.items = Some(Box::new(items));
        node
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn min(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    pub fn max(mut self, maximum: f64) -> Self {
        self.maximum = Some(maximum);
        self
    }

    pub fn range(self, minimum: f64, maximum: f64) -> Self {
        self.min(minimum).max(maximum)
    }

    pub fn min_length(mut self, len: usize) -> Self {
        self.min_length = Some(len);
        self
    }

    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }

    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn property(mut self, name: impl Into<String>, node: SchemaNode) -> Self {
        self.properties.insert(name.into(), node);
        self
    }

    /// Attach a custom predicate. Returning `Err(reason)` reports a violation.
    pub fn check<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Whether this node or any descendant declares a default.
    pub fn has_defaults(&self) -> bool {
        self.default.is_some() || self.properties.values().any(SchemaNode::has_defaults)
    }

    /// Parse a schema from its JSON representation.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_matching() {
        assert!(ValueKind::Integer.matches(&json!(5)));
        assert!(!ValueKind::Integer.matches(&json!(5.5)));
        assert!(ValueKind::Number.matches(&json!(5)));
        assert!(!ValueKind::Any.matches(&Value::Null));
        assert_eq!(ValueKind::describe(&json!(1.5)), "number");
        assert_eq!(ValueKind::describe(&json!("x")), "string");
    }

    #[test]
    fn test_schema_from_json() {
        let schema = SchemaNode::from_json(
            r#"{
                "type": "object",
                "properties": {
                    "port": { "type": "integer", "required": true, "minimum": 1024, "maximum": 65535, "default": 25565 },
                    "level": { "type": "string", "enum": ["info", "debug"] }
                }
            }"#,
        )
        .unwrap();

        let port = &schema.properties["port"];
        assert_eq!(port.kind, ValueKind::Integer);
        assert!(port.required);
        assert_eq!(port.maximum, Some(65535.0));
        assert_eq!(port.default, Some(json!(25565)));
        assert_eq!(schema.properties["level"].allowed.as_ref().unwrap().len(), 2);
        assert!(schema.has_defaults());
    }
}
