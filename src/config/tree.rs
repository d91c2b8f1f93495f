//! Dot-path addressing and leaf-level diffing over configuration trees.

use serde_json::{Map, Value};

use crate::config::events::{ChangeEvent, ChangeType};
use crate::error::{EngineError, EngineResult};

/// Split a dot-path into segments. The empty path addresses the root.
fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|s| !s.is_empty())
}

fn join(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

/// Resolve `path` against `tree`. Numeric segments index into arrays.
pub fn lookup<'a>(tree: &'a Value, path: &str) -> Option<&'a Value> {
    segments(path).try_fold(tree, |node, seg| match node {
        Value::Object(map) => map.get(seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Set `path` to `value`, creating intermediate objects as needed.
///
/// Traversing through a scalar is an error rather than a silent overwrite.
pub fn set_path(tree: &mut Value, path: &str, value: Value) -> EngineResult<()> {
    let segs: Vec<&str> = segments(path).collect();
    let Some((last, parents)) = segs.split_last() else {
        return Err(EngineError::invalid_path(path, "empty path"));
    };

    let mut node = tree;
    for seg in parents {
        node = match node {
            Value::Object(map) => map
                .entry(seg.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => {
                let len = items.len();
                seg.parse::<usize>()
                    .ok()
                    .and_then(|i| items.get_mut(i))
                    .ok_or_else(|| {
                        EngineError::invalid_path(path, format!("index '{seg}' out of range ({len})"))
                    })?
            }
            other => {
                return Err(EngineError::invalid_path(
                    path,
                    format!("cannot descend into {} at '{seg}'", kind_name(other)),
                ))
            }
        };
        if node.is_null() {
            *node = Value::Object(Map::new());
        }
    }

    match node {
        Value::Object(map) => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            let len = items.len();
            let slot = last
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get_mut(i))
                .ok_or_else(|| {
                    EngineError::invalid_path(path, format!("index '{last}' out of range ({len})"))
                })?;
            *slot = value;
            Ok(())
        }
        other => Err(EngineError::invalid_path(
            path,
            format!("parent of '{last}' is {}", kind_name(other)),
        )),
    }
}

/// Remove the key at `path`, returning the removed value if it existed.
pub fn remove_path(tree: &mut Value, path: &str) -> EngineResult<Option<Value>> {
    let segs: Vec<&str> = segments(path).collect();
    let Some((last, parents)) = segs.split_last() else {
        return Err(EngineError::invalid_path(path, "cannot remove the root"));
    };

    let mut node = tree;
    for seg in parents {
        node = match node {
            Value::Object(map) => match map.get_mut(*seg) {
                Some(child) => child,
                None => return Ok(None),
            },
            _ => return Ok(None),
        };
    }

    match node {
        Value::Object(map) => Ok(map.remove(*last)),
        Value::Array(_) => Err(EngineError::invalid_path(
            path,
            "array elements cannot be removed by path",
        )),
        _ => Ok(None),
    }
}

/// Every leaf of `tree` with its dot-path. Arrays, scalars and empty
/// objects are leaves; non-empty objects are descended.
pub fn flatten(tree: &Value) -> Vec<(String, &Value)> {
    let mut out = Vec::new();
    flatten_into(tree, "", &mut out);
    out
}

fn flatten_into<'a>(node: &'a Value, path: &str, out: &mut Vec<(String, &'a Value)>) {
    match node {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                flatten_into(child, &join(path, key), out);
            }
        }
        _ => out.push((path.to_string(), node)),
    }
}

/// Depth of the deepest nested container.
pub fn depth(tree: &Value) -> usize {
    match tree {
        Value::Object(map) => 1 + map.values().map(depth).max().unwrap_or(0),
        Value::Array(items) => 1 + items.iter().map(depth).max().unwrap_or(0),
        _ => 0,
    }
}

/// Leaf-level differences between two trees.
pub fn diff(old: &Value, new: &Value) -> Vec<ChangeEvent> {
    let mut out = Vec::new();
    diff_into(Some(old), Some(new), "", &mut out);
    out
}

fn diff_into(old: Option<&Value>, new: Option<&Value>, path: &str, out: &mut Vec<ChangeEvent>) {
    match (old, new) {
        (Some(Value::Object(a)), Some(Value::Object(b))) if !a.is_empty() && !b.is_empty() => {
            for (key, old_child) in a {
                diff_into(Some(old_child), b.get(key), &join(path, key), out);
            }
            for (key, new_child) in b.iter().filter(|(k, _)| !a.contains_key(*k)) {
                diff_into(None, Some(new_child), &join(path, key), out);
            }
        }
        (Some(a), Some(b)) if a == b => {}
        (Some(a), Some(b)) if a.is_object() || b.is_object() => {
            diff_into(Some(a), None, path, out);
            diff_into(None, Some(b), path, out);
        }
        (Some(a), Some(b)) => out.push(ChangeEvent::new(
            path,
            ChangeType::Modified,
            Some(a.clone()),
            Some(b.clone()),
        )),
        (Some(a), None) => {
            for (leaf, value) in flatten_at(a, path) {
                out.push(ChangeEvent::new(leaf, ChangeType::Removed, Some(value.clone()), None));
            }
        }
        (None, Some(b)) => {
            for (leaf, value) in flatten_at(b, path) {
                out.push(ChangeEvent::new(leaf, ChangeType::Added, None, Some(value.clone())));
            }
        }
        (None, None) => {}
    }
}

fn flatten_at<'a>(node: &'a Value, path: &str) -> Vec<(String, &'a Value)> {
    let mut out = Vec::new();
    flatten_into(node, path, &mut out);
    out
}

fn kind_name(value: &Value) -> &'static str {
    crate::schema::ValueKind::describe(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup() {
        let tree = json!({ "a": { "b": [10, { "c": false }] } });
        assert_eq!(lookup(&tree, "a.b.0"), Some(&json!(10)));
        assert_eq!(lookup(&tree, "a.b.1.c"), Some(&json!(false)));
        assert_eq!(lookup(&tree, "a.x"), None);
        assert_eq!(lookup(&tree, "a.b.9"), None);
        assert_eq!(lookup(&tree, ""), Some(&tree));
    }

    #[test]
    fn test_set_path_creates_intermediates() {
        let mut tree = json!({ "a": 1 });
        set_path(&mut tree, "x.y.z", json!("v")).unwrap();
        assert_eq!(tree, json!({ "a": 1, "x": { "y": { "z": "v" } } }));
    }

    #[test]
    fn test_set_path_through_scalar_fails() {
        let mut tree = json!({ "a": 1 });
        let err = set_path(&mut tree, "a.b", json!(2)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidPath { .. }));
        assert_eq!(tree, json!({ "a": 1 }));
    }

    #[test]
    fn test_set_path_array_index() {
        let mut tree = json!({ "list": [1, 2] });
        set_path(&mut tree, "list.1", json!(5)).unwrap();
        assert_eq!(tree, json!({ "list": [1, 5] }));
        assert!(set_path(&mut tree, "list.7", json!(0)).is_err());
    }

    #[test]
    fn test_remove_path() {
        let mut tree = json!({ "a": { "b": 1, "c": 2 } });
        assert_eq!(remove_path(&mut tree, "a.b").unwrap(), Some(json!(1)));
        assert_eq!(remove_path(&mut tree, "a.missing.deep").unwrap(), None);
        assert_eq!(tree, json!({ "a": { "c": 2 } }));
    }

    #[test]
    fn test_flatten_and_depth() {
        let tree = json!({ "a": { "b": 1, "e": {} }, "l": [1, [2]] });
        let leaves: Vec<String> = flatten(&tree).into_iter().map(|(p, _)| p).collect();
        assert_eq!(leaves, vec!["a.b", "a.e", "l"]);
        assert_eq!(depth(&tree), 3);
        assert_eq!(depth(&json!(1)), 0);
    }

    #[test]
    fn test_diff_leaves() {
        let old = json!({ "cloudflare": { "ttl": 60, "zone": "z" }, "gone": { "x": 1, "y": 2 } });
        let new = json!({ "cloudflare": { "ttl": 120, "zone": "z" }, "fresh": true });
        let changes = diff(&old, &new);

        assert_eq!(changes.len(), 4);
        assert_eq!(
            changes[0],
            ChangeEvent::new("cloudflare.ttl", ChangeType::Modified, Some(json!(60)), Some(json!(120)))
        );
        assert_eq!(changes[1].path, "gone.x");
        assert_eq!(changes[1].change_type, ChangeType::Removed);
        assert_eq!(changes[2].path, "gone.y");
        assert_eq!(changes[3], ChangeEvent::new("fresh", ChangeType::Added, None, Some(json!(true))));
    }

    #[test]
    fn test_diff_kind_change() {
        let old = json!({ "a": { "b": 1 } });
        let new = json!({ "a": 5 });
        let changes = diff(&old, &new);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].change_type, ChangeType::Removed);
        assert_eq!(changes[0].path, "a.b");
        assert_eq!(changes[1], ChangeEvent::new("a", ChangeType::Added, None, Some(json!(5))));
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let tree = json!({ "a": [1, 2], "b": {} });
        assert!(diff(&tree, &tree).is_empty());
    }
}
