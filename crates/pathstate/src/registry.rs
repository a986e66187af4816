//! Operation registry: kind string to handler.
//!
//! Built-in kinds are always present and cannot be replaced. Custom kinds are
//! [`Reducer`] trait objects added at runtime.

use crate::error::{StoreError, StoreResult};
use crate::op::OpKind;
use crate::Value;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Outcome of a custom reducer.
pub enum Reduction {
    /// The new root, published immediately.
    Ready(Value),
    /// The new root, available later.
    ///
    /// The prior snapshot stays current until the future resolves; its value
    /// is then published through an `@@async` dispatch.
    Deferred(BoxFuture<'static, StoreResult<Value>>),
    /// Keep the current root; nothing is published.
    Unchanged,
}

impl Reduction {
    #[inline]
    pub fn ready(value: impl Into<Value>) -> Self {
        Reduction::Ready(value.into())
    }

    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = StoreResult<Value>> + Send + 'static,
    {
        Reduction::Deferred(Box::pin(future))
    }
}

impl fmt::Debug for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reduction::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            Reduction::Deferred(_) => f.write_str("Deferred(..)"),
            Reduction::Unchanged => f.write_str("Unchanged"),
        }
    }
}

/// A custom operation: `(current root, payload) -> new root`.
///
/// Implemented for any `Fn(&Value, &Value) -> StoreResult<Reduction>`.
pub trait Reducer: Send + Sync {
    fn reduce(&self, state: &Value, payload: &Value) -> StoreResult<Reduction>;
}

impl<F> Reducer for F
where
    F: Fn(&Value, &Value) -> StoreResult<Reduction> + Send + Sync,
{
    fn reduce(&self, state: &Value, payload: &Value) -> StoreResult<Reduction> {
        self(state, payload)
    }
}

/// What a lookup key resolves to.
#[derive(Clone)]
pub enum Handler {
    Builtin(OpKind),
    Custom(Arc<dyn Reducer>),
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Builtin(kind) => f.debug_tuple("Builtin").field(kind).finish(),
            Handler::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Kind to handler table.
#[derive(Default, Clone)]
pub struct OperationRegistry {
    custom: HashMap<String, Arc<dyn Reducer>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a custom kind.
    ///
    /// Kinds must be non-empty, contain no whitespace (a space separates the
    /// kind from its label) and must not name a built-in.
    pub fn register(&mut self, kind: impl Into<String>, reducer: Arc<dyn Reducer>) -> StoreResult<()> {
        let kind = kind.into();
        if kind.is_empty() || kind.chars().any(char::is_whitespace) {
            return Err(StoreError::InvalidKind { kind });
        }
        if OpKind::from_kind(&kind).is_some() {
            return Err(StoreError::ReservedKind { kind });
        }
        if self.custom.insert(kind.clone(), reducer).is_some() {
            tracing::debug!(kind = %kind, "replaced custom reducer");
        }
        Ok(())
    }

    /// Remove a custom kind. Returns whether it was registered.
    pub fn unregister(&mut self, kind: &str) -> bool {
        self.custom.remove(kind).is_some()
    }

    /// Resolve a lookup key.
    pub fn resolve(&self, kind: &str) -> StoreResult<Handler> {
        if let Some(builtin) = OpKind::from_kind(kind) {
            return Ok(Handler::Builtin(builtin));
        }
        self.custom
            .get(kind)
            .map(|reducer| Handler::Custom(Arc::clone(reducer)))
            .ok_or_else(|| StoreError::unknown_operation(kind))
    }

    pub fn contains(&self, kind: &str) -> bool {
        OpKind::from_kind(kind).is_some() || self.custom.contains_key(kind)
    }

    /// All registered kinds: built-ins first, then custom kinds sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut custom: Vec<_> = self.custom.keys().cloned().collect();
        custom.sort();
        OpKind::ALL
            .iter()
            .map(|k| k.as_str().to_string())
            .chain(custom)
            .collect()
    }
}

impl fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
