//! Built-in operations and the action record handed to dispatch.
//!
//! Each built-in operation targets a single path (or the whole root, for
//! `Init` and `Resolved`) and describes exactly one change.

use crate::error::{StoreError, StoreResult};
use crate::{Path, Value};
use std::fmt;
use std::sync::Arc;

/// Element predicate for [`Op::Filter`].
pub type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Element mapping for [`Op::Map`].
pub type Mapper = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Whole-value transform for [`Op::Transform`]. Receives `None` when the
/// target is undefined.
pub type Transformer = Arc<dyn Fn(Option<&Value>) -> Value + Send + Sync>;

/// Identifier of a built-in operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
    Set,
    Push,
    Filter,
    Map,
    Transform,
    Delete,
    Init,
    Resolved,
}

impl OpKind {
    /// Every built-in kind, in registration order.
    pub const ALL: [OpKind; 8] = [
        OpKind::Set,
        OpKind::Push,
        OpKind::Filter,
        OpKind::Map,
        OpKind::Transform,
        OpKind::Delete,
        OpKind::Init,
        OpKind::Resolved,
    ];

    /// The reserved kind string.
    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::Set => "@@set",
            OpKind::Push => "@@push",
            OpKind::Filter => "@@filter",
            OpKind::Map => "@@map",
            OpKind::Transform => "@@transform",
            OpKind::Delete => "@@delete",
            OpKind::Init => "@@init",
            OpKind::Resolved => "@@async",
        }
    }

    /// Look up a built-in by its kind string.
    pub fn from_kind(kind: &str) -> Option<OpKind> {
        OpKind::ALL.into_iter().find(|k| k.as_str() == kind)
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single built-in operation.
#[derive(Clone)]
pub enum Op {
    /// Replace the value at the path.
    ///
    /// Missing ancestors are created as empty objects.
    Set {
        /// Target path.
        path: Path,
        /// Value to store.
        value: Value,
    },

    /// Append elements to the array at the path.
    ///
    /// Returns an error if the target is not an array, including when it is
    /// undefined.
    Push {
        /// Target path (must be an array).
        path: Path,
        /// Elements to append, in order.
        elements: Vec<Value>,
    },

    /// Keep the array elements for which the predicate holds.
    Filter {
        /// Target path (must be an array).
        path: Path,
        predicate: Predicate,
    },

    /// Replace every array element with the mapper's result.
    Map {
        /// Target path (must be an array).
        path: Path,
        mapper: Mapper,
    },

    /// Replace the value at the path with a function of its current value.
    Transform {
        /// Target path.
        path: Path,
        transform: Transformer,
    },

    /// Remove the final key from its parent.
    ///
    /// No-op if the key doesn't exist.
    Delete {
        /// Target path.
        path: Path,
    },

    /// Replace the whole root.
    Init {
        /// New root.
        value: Value,
    },

    /// Replace the whole root with the outcome of a deferred reducer.
    Resolved {
        /// New root.
        value: Value,
    },
}

impl Op {
    // Convenience constructors

    /// Create a Set operation.
    #[inline]
    pub fn set(path: impl Into<Path>, value: impl Into<Value>) -> Self {
        Op::Set {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Create a Push operation.
    pub fn push<I>(path: impl Into<Path>, elements: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        Op::Push {
            path: path.into(),
            elements: elements.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a Filter operation.
    pub fn filter<F>(path: impl Into<Path>, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Op::Filter {
            path: path.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Create a Map operation.
    pub fn map<F>(path: impl Into<Path>, mapper: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Op::Map {
            path: path.into(),
            mapper: Arc::new(mapper),
        }
    }

    /// Create a Transform operation.
    pub fn transform<F>(path: impl Into<Path>, transform: F) -> Self
    where
        F: Fn(Option<&Value>) -> Value + Send + Sync + 'static,
    {
        Op::Transform {
            path: path.into(),
            transform: Arc::new(transform),
        }
    }

    /// Create a Delete operation.
    #[inline]
    pub fn delete(path: impl Into<Path>) -> Self {
        Op::Delete { path: path.into() }
    }

    /// Create an Init operation.
    #[inline]
    pub fn init(value: impl Into<Value>) -> Self {
        Op::Init {
            value: value.into(),
        }
    }

    pub fn kind(&self) -> OpKind {
        match self {
            Op::Set { .. } => OpKind::Set,
            Op::Push { .. } => OpKind::Push,
            Op::Filter { .. } => OpKind::Filter,
            Op::Map { .. } => OpKind::Map,
            Op::Transform { .. } => OpKind::Transform,
            Op::Delete { .. } => OpKind::Delete,
            Op::Init { .. } => OpKind::Init,
            Op::Resolved { .. } => OpKind::Resolved,
        }
    }

    /// Target path, or `None` for whole-root operations.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Op::Set { path, .. }
            | Op::Push { path, .. }
            | Op::Filter { path, .. }
            | Op::Map { path, .. }
            | Op::Transform { path, .. }
            | Op::Delete { path } => Some(path),
            Op::Init { .. } | Op::Resolved { .. } => None,
        }
    }

    /// `"<kind> <path>"` for path-targeted operations, the bare kind otherwise.
    pub fn dispatch_key(&self) -> String {
        match self.path() {
            Some(path) => format!("{} {}", self.kind(), path),
            None => self.kind().as_str().to_owned(),
        }
    }

    /// Decode a data-only built-in from its JSON payload.
    ///
    /// Path-targeted kinds take `{"path": "...", "value": ...}`; `@@push`
    /// expects `value` to be the array of elements to append and `@@delete`
    /// also accepts the bare path string. `@@init` and `@@async` take the new
    /// root as the payload itself.
    pub fn from_payload(kind: OpKind, payload: &Value) -> StoreResult<Op> {
        match kind {
            OpKind::Init => Ok(Op::Init {
                value: payload.clone(),
            }),
            OpKind::Resolved => Ok(Op::Resolved {
                value: payload.clone(),
            }),
            OpKind::Delete => match payload.as_str() {
                Some(path) => Ok(Op::delete(path)),
                None => Ok(Op::delete(payload_path(kind, payload)?)),
            },
            OpKind::Set => Ok(Op::Set {
                path: payload_path(kind, payload)?,
                value: payload["value"].clone(),
            }),
            OpKind::Push => {
                let elements = payload["value"].as_array().ok_or_else(|| {
                    StoreError::invalid_payload(kind.as_str(), "\"value\" must be an array")
                })?;
                Ok(Op::Push {
                    path: payload_path(kind, payload)?,
                    elements: elements.to_vec(),
                })
            }
            OpKind::Filter | OpKind::Map | OpKind::Transform => Err(StoreError::invalid_payload(
                kind.as_str(),
                "operation carries a function and cannot be decoded",
            )),
        }
    }
}

fn payload_path(kind: OpKind, payload: &Value) -> StoreResult<Path> {
    payload
        .get("path")
        .and_then(Value::as_str)
        .map(Path::parse)
        .ok_or_else(|| StoreError::invalid_payload(kind.as_str(), "missing string \"path\""))
}

impl fmt::Debug for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Set { path, value } => f
                .debug_struct("Set")
                .field("path", path)
                .field("value", value)
                .finish(),
            Op::Push { path, elements } => f
                .debug_struct("Push")
                .field("path", path)
                .field("elements", elements)
                .finish(),
            Op::Filter { path, .. } => f
                .debug_struct("Filter")
                .field("path", path)
                .finish_non_exhaustive(),
            Op::Map { path, .. } => f
                .debug_struct("Map")
                .field("path", path)
                .finish_non_exhaustive(),
            Op::Transform { path, .. } => f
                .debug_struct("Transform")
                .field("path", path)
                .finish_non_exhaustive(),
            Op::Delete { path } => f.debug_struct("Delete").field("path", path).finish(),
            Op::Init { value } => f.debug_struct("Init").field("value", value).finish(),
            Op::Resolved { value } => f.debug_struct("Resolved").field("value", value).finish(),
        }
    }
}

/// A request handed to `Store::dispatch`.
#[derive(Clone, Debug)]
pub enum Action {
    /// A typed built-in operation.
    Op(Op),
    /// A kind string plus JSON payload.
    ///
    /// The kind may carry a space-separated suffix (`"increment counter"`) that
    /// labels the action without affecting which reducer runs.
    Custom { kind: String, payload: Value },
}

impl Action {
    pub fn custom(kind: impl Into<String>, payload: impl Into<Value>) -> Self {
        Action::Custom {
            kind: kind.into(),
            payload: payload.into(),
        }
    }

    /// Full label of the action, used for logs and history entries.
    pub fn dispatch_key(&self) -> String {
        match self {
            Action::Op(op) => op.dispatch_key(),
            Action::Custom { kind, .. } => kind.clone(),
        }
    }

    /// Registry key: the dispatch key up to the first space.
    pub fn lookup_key(&self) -> &str {
        match self {
            Action::Op(op) => op.kind().as_str(),
            Action::Custom { kind, .. } => kind.split(' ').next().unwrap_or_default(),
        }
    }
}

impl From<Op> for Action {
    fn from(op: Op) -> Self {
        Action::Op(op)
    }
}
