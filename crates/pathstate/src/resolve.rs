//! Path resolution against a snapshot.
//!
//! Resolution is total: a missing segment anywhere along the path yields
//! `None` (undefined) instead of an error.

use crate::{Path, Value};

/// Get a reference to the value at `path`, or `None` if any segment is missing.
///
/// The empty path resolves to `None`.
///
/// ```
/// use pathstate::{resolve, Path, Value};
/// use serde_json::json;
///
/// let doc = Value::from(json!({"a": {}}));
/// assert_eq!(resolve(&doc, &Path::parse("a.b.c")), None);
/// ```
pub fn resolve<'a>(root: &'a Value, path: &Path) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    path.iter().try_fold(root, |node, segment| node.get(segment))
}

/// [`resolve`] for a dotted path string.
#[inline]
pub fn get_path_value<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    resolve(root, &Path::parse(path))
}
