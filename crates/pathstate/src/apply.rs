//! Structural-sharing updates.
//!
//! Updates never touch the input snapshot. Only the chain of nodes from the
//! root to the target is copied, and each copy is shallow: its children are
//! reference-count clones, so every subtree off that chain stays
//! pointer-identical to the one in the old root.

use crate::error::{StoreError, StoreResult};
use crate::value::Map;
use crate::{resolve, Op, Path, Value};
use std::sync::Arc;

/// Produce a new root with the slot at `path` replaced by `update`'s result.
///
/// `update` receives the current value at the path (`None` if undefined) and
/// returns the replacement, or `None` to remove the slot from its parent.
/// Missing or scalar ancestors become empty objects. Array ancestors are
/// descended by decimal index and must already hold that index.
///
/// # Examples
///
/// ```
/// use pathstate::{apply_at_path, Path, Value};
/// use serde_json::json;
///
/// let doc = Value::from(json!({"a": {"b": 1}, "c": [1, 2]}));
/// let next = apply_at_path(&doc, &Path::parse("a.b"), |_| Ok(Some(Value::from(2)))).unwrap();
///
/// assert_eq!(next["a"]["b"], 2);
/// assert_eq!(doc["a"]["b"], 1);
/// assert!(Value::ptr_eq(&next["c"], &doc["c"]));
/// ```
pub fn apply_at_path<F>(root: &Value, path: &Path, update: F) -> StoreResult<Value>
where
    F: FnOnce(Option<&Value>) -> StoreResult<Option<Value>>,
{
    if path.is_empty() {
        return Err(StoreError::invalid_path(
            path.clone(),
            "path-targeted write needs at least one segment",
        ));
    }
    rebuild(Some(root), 0, path, update)
}

/// Rebuild the container at `depth` along `path`.
fn rebuild<F>(node: Option<&Value>, depth: usize, path: &Path, update: F) -> StoreResult<Value>
where
    F: FnOnce(Option<&Value>) -> StoreResult<Option<Value>>,
{
    match node {
        Some(Value::Object(map)) => rebuild_object(map, depth, path, update),
        Some(Value::Array(items)) => rebuild_array(node, items, depth, path, update),
        // Missing and scalar ancestors are overwritten by a fresh object.
        _ => rebuild_object(&Arc::new(Map::new()), depth, path, update),
    }
}

fn rebuild_object<F>(map: &Arc<Map>, depth: usize, path: &Path, update: F) -> StoreResult<Value>
where
    F: FnOnce(Option<&Value>) -> StoreResult<Option<Value>>,
{
    let key = &path.segments()[depth];
    let child = map.get(key);

    let replacement = if depth + 1 == path.len() {
        update(child)?
    } else {
        Some(rebuild(child, depth + 1, path, update)?)
    };

    let mut next = Arc::clone(map);
    let slots = Arc::make_mut(&mut next);
    match replacement {
        Some(value) => {
            slots.insert(key.clone(), value);
        }
        None => {
            slots.remove(key);
        }
    }
    Ok(Value::Object(next))
}

fn rebuild_array<F>(
    node: Option<&Value>,
    items: &Arc<Vec<Value>>,
    depth: usize,
    path: &Path,
    update: F,
) -> StoreResult<Value>
where
    F: FnOnce(Option<&Value>) -> StoreResult<Option<Value>>,
{
    let segment = &path.segments()[depth];
    let index: usize = segment
        .parse()
        .map_err(|_| StoreError::type_mismatch(path.prefix(depth), "object", node))?;
    let len = items.len();
    let child = items.get(index);

    let replacement = if depth + 1 == path.len() {
        update(child)?
    } else if child.is_none() {
        return Err(StoreError::index_out_of_bounds(path.prefix(depth + 1), index, len));
    } else {
        Some(rebuild(child, depth + 1, path, update)?)
    };

    let mut next = Arc::clone(items);
    match replacement {
        Some(value) if index < len => Arc::make_mut(&mut next)[index] = value,
        Some(_) => return Err(StoreError::index_out_of_bounds(path.prefix(depth + 1), index, len)),
        None if index < len => {
            Arc::make_mut(&mut next).remove(index);
        }
        // Removing an element that isn't there.
        None => {}
    }
    Ok(Value::Array(next))
}

/// Apply a single built-in operation (pure function).
///
/// Returns the new root; `root` is left unchanged.
pub fn apply_op(root: &Value, op: &Op) -> StoreResult<Value> {
    match op {
        Op::Set { path, value } => apply_at_path(root, path, |_| Ok(Some(value.clone()))),
        Op::Push { path, elements } => apply_at_path(root, path, |current| {
            let items = expect_array(path, current)?;
            let mut next = Arc::clone(items);
            Arc::make_mut(&mut next).extend(elements.iter().cloned());
            Ok(Some(Value::Array(next)))
        }),
        Op::Filter { path, predicate } => apply_at_path(root, path, |current| {
            let items = expect_array(path, current)?;
            Ok(Some(Value::array(
                items.iter().filter(|item| predicate(*item)).cloned(),
            )))
        }),
        Op::Map { path, mapper } => apply_at_path(root, path, |current| {
            let items = expect_array(path, current)?;
            Ok(Some(Value::array(items.iter().map(|item| mapper(item)))))
        }),
        Op::Transform { path, transform } => {
            apply_at_path(root, path, |current| Ok(Some(transform(current))))
        }
        Op::Delete { path } => {
            // Nothing to remove: keep the root as is rather than materialize
            // the missing ancestors.
            if !path.is_empty() && resolve(root, path).is_none() {
                return Ok(root.clone());
            }
            apply_at_path(root, path, |_| Ok(None))
        }
        Op::Init { value } | Op::Resolved { value } => Ok(value.clone()),
    }
}

fn expect_array<'a>(path: &Path, current: Option<&'a Value>) -> StoreResult<&'a Arc<Vec<Value>>> {
    match current {
        Some(Value::Array(items)) => Ok(items),
        other => Err(StoreError::type_mismatch(path.clone(), "array", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        Value::from(json!({
            "person": {"name": "Ann", "colors": ["red", "blue"]},
            "settings": {"theme": "dark"},
            "list": [1, 2, 3, 4]
        }))
    }

    #[test]
    fn test_set_shares_untouched_subtrees() {
        let old = doc();
        let new = apply_op(&old, &Op::set("person.name", "Bob")).unwrap();

        assert_eq!(new["person"]["name"], "Bob");
        assert_eq!(old["person"]["name"], "Ann");
        assert!(Value::ptr_eq(&new["settings"], &old["settings"]));
        assert!(Value::ptr_eq(&new["person"]["colors"], &old["person"]["colors"]));
        assert!(!Value::ptr_eq(&new["person"], &old["person"]));
        assert!(!Value::ptr_eq(&new, &old));
    }

    #[test]
    fn test_set_creates_missing_ancestors() {
        let new = apply_op(&Value::empty_object(), &Op::set("a.b.c", 1)).unwrap();
        assert_eq!(new, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn test_set_replaces_scalar_ancestor() {
        let old = Value::from(json!({"a": 5}));
        let new = apply_op(&old, &Op::set("a.b", true)).unwrap();
        assert_eq!(new, json!({"a": {"b": true}}));
    }

    #[test]
    fn test_set_same_value_yields_new_root() {
        let old = doc();
        let new = apply_op(&old, &Op::set("person.name", "Ann")).unwrap();
        assert_eq!(new, old);
        assert!(!Value::ptr_eq(&new, &old));
    }

    #[test]
    fn test_set_through_array_index() {
        let old = doc();
        let new = apply_op(&old, &Op::set("person.colors.1", "green")).unwrap();
        assert_eq!(new["person"]["colors"], json!(["red", "green"]));
        assert_eq!(old["person"]["colors"], json!(["red", "blue"]));
    }

    #[test]
    fn test_set_array_index_out_of_bounds() {
        let err = apply_op(&doc(), &Op::set("person.colors.5", "x")).unwrap_err();
        assert!(matches!(err, StoreError::IndexOutOfBounds { index: 5, len: 2, .. }));

        let err = apply_op(&doc(), &Op::set("list.9.x", 1)).unwrap_err();
        assert!(matches!(err, StoreError::IndexOutOfBounds { index: 9, len: 4, .. }));
    }

    #[test]
    fn test_set_non_index_segment_on_array() {
        let err = apply_op(&doc(), &Op::set("list.first", 1)).unwrap_err();
        match err {
            StoreError::TypeMismatch { path, expected, found } => {
                assert_eq!(path, Path::parse("list"));
                assert_eq!(expected, "object");
                assert_eq!(found, "array");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_empty_path_is_invalid() {
        let err = apply_op(&doc(), &Op::set("", 1)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath { .. }));
    }

    #[test]
    fn test_push_appends_in_order() {
        let old = doc();
        let new = apply_op(&old, &Op::push("person.colors", ["green", "white"])).unwrap();
        assert_eq!(new["person"]["colors"], json!(["red", "blue", "green", "white"]));
        assert_eq!(old["person"]["colors"], json!(["red", "blue"]));
    }

    #[test]
    fn test_push_onto_non_array_is_refused() {
        let err = apply_op(&doc(), &Op::push("person.name", [1])).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { found: "string", .. }));

        let err = apply_op(&doc(), &Op::push("person.pets", [1])).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { found: "undefined", .. }));
    }

    #[test]
    fn test_filter_keeps_matching() {
        let new = apply_op(
            &doc(),
            &Op::filter("list", |v| v.as_i64().is_some_and(|n| n % 2 == 0)),
        )
        .unwrap();
        assert_eq!(new["list"], json!([2, 4]));
    }

    #[test]
    fn test_filter_preserves_element_identity() {
        let old = Value::from(json!({"rows": [{"id": 1}, {"id": 2}]}));
        let new = apply_op(&old, &Op::filter("rows", |row| row["id"] == 2)).unwrap();
        assert!(Value::ptr_eq(&new["rows"][0], &old["rows"][1]));
    }

    #[test]
    fn test_filter_on_scalar_is_refused() {
        let err = apply_op(&doc(), &Op::filter("settings.theme", |_| true)).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { expected: "array", .. }));
    }

    #[test]
    fn test_map_each_element() {
        let new = apply_op(
            &doc(),
            &Op::map("list", |v| Value::from(v.as_i64().unwrap_or(0) * 10)),
        )
        .unwrap();
        assert_eq!(new["list"], json!([10, 20, 30, 40]));
    }

    #[test]
    fn test_map_on_object_is_refused() {
        let err = apply_op(&doc(), &Op::map("settings", |v| v.clone())).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { expected: "array", .. }));
    }

    #[test]
    fn test_transform_sees_undefined() {
        let new = apply_op(
            &doc(),
            &Op::transform("counter", |current| {
                Value::from(current.and_then(Value::as_i64).unwrap_or(0) + 1)
            }),
        )
        .unwrap();
        assert_eq!(new["counter"], 1);
    }

    #[test]
    fn test_delete_key() {
        let old = doc();
        let new = apply_op(&old, &Op::delete("person.name")).unwrap();
        assert!(new["person"].get("name").is_none());
        assert_eq!(old["person"]["name"], "Ann");
        assert!(Value::ptr_eq(&new["person"]["colors"], &old["person"]["colors"]));
    }

    #[test]
    fn test_delete_array_element() {
        let new = apply_op(&doc(), &Op::delete("list.0")).unwrap();
        assert_eq!(new["list"], json!([2, 3, 4]));
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let old = doc();
        let new = apply_op(&old, &Op::delete("nothing.here")).unwrap();
        assert!(Value::ptr_eq(&new, &old));
    }

    #[test]
    fn test_init_replaces_root() {
        let new = apply_op(&doc(), &Op::init(json!({"fresh": true}))).unwrap();
        assert_eq!(new, json!({"fresh": true}));
    }
}
