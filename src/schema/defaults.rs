//! Default application.

use serde_json::{Map, Value};

use crate::schema::node::{SchemaNode, ValueKind};

/// Return a copy of `tree` with schema defaults filled in where values are absent.
///
/// Purely additive: present values are never replaced, so applying twice
/// yields the same tree as applying once. A missing key and an explicit
/// `null` are both treated as absent.
pub fn apply_defaults(tree: &Value, schema: &SchemaNode) -> Value {
    let mut out = tree.clone();
    fill(&mut out, schema);
    out
}

fn fill(value: &mut Value, schema: &SchemaNode) {
    match value {
        Value::Object(map) if schema.kind == ValueKind::Object => fill_object(map, schema),
        Value::Array(items) => {
            if let Some(item_schema) = &schema.items {
                for item in items.iter_mut().filter(|item| item.is_object()) {
                    fill(item, item_schema);
                }
            }
        }
        _ => {}
    }
}

fn fill_object(map: &mut Map<String, Value>, schema: &SchemaNode) {
    for (key, prop) in &schema.properties {
        let absent = matches!(map.get(key), None | Some(Value::Null));
        if absent {
            if let Some(default) = &prop.default {
                map.insert(key.clone(), default.clone());
            } else if prop.kind == ValueKind::Object && prop.has_defaults() {
                map.insert(key.clone(), Value::Object(Map::new()));
            } else {
                continue;
            }
        }
        if let Some(child) = map.get_mut(key) {
            fill(child, prop);
        }
    }
}
