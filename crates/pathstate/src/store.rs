//! The state container.
//!
//! A [`Store`] owns the current snapshot and is the single entry point for
//! writes. Every successful dispatch computes a new root from the old one,
//! publishes it, records it in history, notifies subscribers whose value
//! changed and schedules a debounced save.

use crate::apply::apply_op;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::history::{History, HistoryEntry};
use crate::op::{Action, Op, OpKind};
use crate::persist::{Persister, SessionStorage};
use crate::registry::{Handler, OperationRegistry, Reducer, Reduction};
use crate::subscribe::{Callback, SubscriptionHandle, Subscriptions, WatchHandle, WatchTarget};
use crate::{lock, read, resolve, write, Path, Value};
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Snapshots waiting to be delivered to subscribers, in publish order.
#[derive(Default)]
struct RoundQueue {
    pending: VecDeque<(u64, Value)>,
    draining: bool,
}

struct StoreInner {
    config: StoreConfig,
    /// `None` until `set_initial_state`.
    state: RwLock<Option<Value>>,
    /// Revision of the snapshot in `state`; bumped while `state` is write-locked.
    revision: AtomicU64,
    /// Serializes writers; readers only take `state`.
    writer: Mutex<()>,
    registry: RwLock<OperationRegistry>,
    history: Mutex<History>,
    subscriptions: Arc<Subscriptions>,
    rounds: Mutex<RoundQueue>,
    persister: Option<Persister>,
}

/// Path-addressed immutable state container.
///
/// Cheap to clone; clones share the same state.
///
/// # Example
///
/// ```
/// use pathstate::{Store, StoreConfig};
/// use serde_json::json;
///
/// # futures::executor::block_on(async {
/// let store = Store::new(StoreConfig::default());
/// store.set_initial_state(json!({"person": {"name": "Ann"}})).await.unwrap();
///
/// store.dispatch_set("person.name", "Bob").unwrap();
/// assert_eq!(store.get_state().unwrap()["person"]["name"], "Bob");
/// # });
/// ```
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Create a store without session persistence.
    pub fn new(config: StoreConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a store that rehydrates from and saves to `storage`.
    ///
    /// Must be called inside a tokio runtime: the debounced save worker is
    /// spawned here.
    pub fn with_storage(config: StoreConfig, storage: Arc<dyn SessionStorage>) -> StoreResult<Self> {
        let persister = Persister::spawn(storage, config.storage_key.clone(), config.persist_delay())?;
        Ok(Self::build(config, Some(persister)))
    }

    fn build(config: StoreConfig, persister: Option<Persister>) -> Self {
        let history = History::new(config.history_limit);
        Self {
            inner: Arc::new(StoreInner {
                config,
                state: RwLock::new(None),
                revision: AtomicU64::new(0),
                writer: Mutex::new(()),
                registry: RwLock::new(OperationRegistry::new()),
                history: Mutex::new(history),
                subscriptions: Arc::new(Subscriptions::default()),
                rounds: Mutex::new(RoundQueue::default()),
                persister,
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Whether `set_initial_state` has completed.
    pub fn is_ready(&self) -> bool {
        read(&self.inner.state).is_some()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Install the first snapshot.
    ///
    /// A persisted record that is a non-empty object wins over `initial`.
    /// Subscribers registered before this call receive their first value here.
    /// Calling it again is a no-op.
    pub async fn set_initial_state(&self, initial: impl Into<Value>) -> StoreResult<()> {
        if self.is_ready() {
            tracing::warn!("set_initial_state called on an initialized store; ignoring");
            return Ok(());
        }

        let rehydrated = match &self.inner.persister {
            Some(persister) => persister.load_persisted().await,
            None => None,
        };
        let root = match rehydrated {
            Some(saved) if saved.as_object().is_some_and(|map| !map.is_empty()) => {
                tracing::debug!(key = %self.inner.config.storage_key, "rehydrated state from session storage");
                saved
            }
            _ => initial.into(),
        };

        {
            let _writer = lock(&self.inner.writer);
            if self.is_ready() {
                tracing::warn!("set_initial_state raced with another initialization; ignoring");
                return Ok(());
            }
            self.publish(OpKind::Init.as_str(), root);
        }
        self.drain_rounds();
        Ok(())
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Apply an action and publish the result.
    ///
    /// Errors leave the current snapshot untouched. Custom reducers run while
    /// the writer lock is held and must not dispatch themselves; subscriber
    /// callbacks may.
    ///
    /// Notification rounds are delivered by whichever caller is already
    /// draining the queue. A dispatch made from a callback, or from another
    /// thread while a drain is running, returns once its snapshot is current
    /// and queued; its subscribers are notified when the drain reaches it.
    pub fn dispatch(&self, action: impl Into<Action>) -> StoreResult<()> {
        let action = action.into();
        {
            let _writer = lock(&self.inner.writer);
            let current = self.current()?;

            let kind = action.lookup_key();
            if kind.is_empty() {
                return Err(StoreError::MissingKind);
            }
            let handler = read(&self.inner.registry).resolve(kind)?;

            let next = match (&action, handler) {
                (Action::Op(op), _) => apply_op(&current, op)?,
                (Action::Custom { payload, .. }, Handler::Builtin(builtin)) => {
                    apply_op(&current, &Op::from_payload(builtin, payload)?)?
                }
                (Action::Custom { payload, .. }, Handler::Custom(reducer)) => {
                    match reducer.reduce(&current, payload)? {
                        Reduction::Ready(next) => next,
                        Reduction::Unchanged => {
                            tracing::debug!(action = %action.dispatch_key(), "reducer kept current state");
                            return Ok(());
                        }
                        Reduction::Deferred(future) => {
                            return self.spawn_resolution(action.dispatch_key(), future);
                        }
                    }
                }
            };
            self.publish(&action.dispatch_key(), next);
        }
        self.drain_rounds();
        Ok(())
    }

    /// Set the value at `path`, creating missing ancestors.
    pub fn dispatch_set(&self, path: impl Into<Path>, value: impl Into<Value>) -> StoreResult<()> {
        self.dispatch(Op::set(path, value))
    }

    /// Append `elements` to the array at `path`.
    pub fn dispatch_push<I>(&self, path: impl Into<Path>, elements: I) -> StoreResult<()>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.dispatch(Op::push(path, elements))
    }

    /// Keep the elements of the array at `path` for which `predicate` holds.
    pub fn dispatch_filter<F>(&self, path: impl Into<Path>, predicate: F) -> StoreResult<()>
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.dispatch(Op::filter(path, predicate))
    }

    /// Replace each element of the array at `path` with `mapper`'s result.
    pub fn dispatch_map<F>(&self, path: impl Into<Path>, mapper: F) -> StoreResult<()>
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.dispatch(Op::map(path, mapper))
    }

    /// Replace the value at `path` with a function of its current value.
    pub fn dispatch_transform<F>(&self, path: impl Into<Path>, transform: F) -> StoreResult<()>
    where
        F: Fn(Option<&Value>) -> Value + Send + Sync + 'static,
    {
        self.dispatch(Op::transform(path, transform))
    }

    /// Remove the value at `path` from its parent.
    pub fn dispatch_delete(&self, path: impl Into<Path>) -> StoreResult<()> {
        self.dispatch(Op::delete(path))
    }

    /// Replace the root with the outcome of `future` once it resolves.
    ///
    /// The current snapshot stays in place meanwhile. Requires a tokio runtime.
    pub fn dispatch_async<F>(&self, future: F) -> StoreResult<()>
    where
        F: Future<Output = StoreResult<Value>> + Send + 'static,
    {
        self.current()?;
        self.spawn_resolution(OpKind::Resolved.as_str().to_string(), Box::pin(future))
    }

    /// Register a custom reducer under `kind`.
    pub fn add_reducer<R>(&self, kind: impl Into<String>, reducer: R) -> StoreResult<()>
    where
        R: Fn(&Value, &Value) -> StoreResult<Reduction> + Send + Sync + 'static,
    {
        self.register_reducer(kind, Arc::new(reducer))
    }

    /// Register a shared [`Reducer`] under `kind`.
    pub fn register_reducer(&self, kind: impl Into<String>, reducer: Arc<dyn Reducer>) -> StoreResult<()> {
        write(&self.inner.registry).register(kind, reducer)
    }

    /// Remove a custom reducer. Returns whether it was registered.
    pub fn remove_reducer(&self, kind: &str) -> bool {
        write(&self.inner.registry).unregister(kind)
    }

    /// Registered operation kinds, built-ins first.
    pub fn registered_kinds(&self) -> Vec<String> {
        read(&self.inner.registry).kinds()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// The current root.
    pub fn get_state(&self) -> StoreResult<Value> {
        self.current()
    }

    /// Resolve `path` against `state`, or against the current root when
    /// `state` is `None`.
    ///
    /// An empty path or a missing segment yields `Ok(None)`.
    pub fn get_path_value(&self, path: &str, state: Option<&Value>) -> StoreResult<Option<Value>> {
        let path = Path::parse(path);
        match state {
            Some(state) => Ok(resolve(state, &path).cloned()),
            None => Ok(resolve(&self.current()?, &path).cloned()),
        }
    }

    /// Recently published snapshots, oldest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        lock(&self.inner.history).entries().cloned().collect()
    }

    pub fn clear_history(&self) {
        lock(&self.inner.history).clear();
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Call `callback` with the value at `path` now (if initialized) and after
    /// every publish that changes it.
    pub fn subscribe<F>(&self, path: impl Into<Path>, callback: F) -> SubscriptionHandle
    where
        F: Fn(Option<&Value>) + Send + Sync + 'static,
    {
        self.subscribe_callback(path.into(), Arc::new(callback))
    }

    fn subscribe_callback(&self, path: Path, callback: Callback) -> SubscriptionHandle {
        let subscription = self.inner.subscriptions.insert(path, callback);
        let handle = SubscriptionHandle::new(Arc::clone(&subscription), &self.inner.subscriptions);
        let current = {
            let state = read(&self.inner.state);
            let revision = self.inner.revision.load(Ordering::Acquire);
            state.clone().map(|root| (revision, root))
        };
        if let Some((revision, root)) = current {
            subscription.notify(revision, &root);
        }
        handle
    }

    /// Mirror state paths into properties of `target`.
    ///
    /// `mapping` pairs a property name with a dotted path; an empty path means
    /// the path equal to the property name. The target is held weakly.
    pub fn watch<T, I, K, P>(&self, target: &Arc<T>, mapping: I) -> WatchHandle
    where
        T: WatchTarget + 'static,
        I: IntoIterator<Item = (K, P)>,
        K: Into<String>,
        P: AsRef<str>,
    {
        let handles = mapping
            .into_iter()
            .map(|(property, path)| {
                let property: String = property.into();
                let path = match path.as_ref() {
                    "" => Path::parse(&property),
                    path => Path::parse(path),
                };
                let weak = Arc::downgrade(target);
                self.subscribe(path, move |value| {
                    let Some(target) = weak.upgrade() else {
                        return;
                    };
                    target.set_property(&property, value);
                    if let Some(detector) = target.change_detector() {
                        detector.mark_for_check();
                    }
                })
            })
            .collect();
        WatchHandle::new(handles)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Save the pending snapshot now, if any. No-op without storage.
    pub async fn flush(&self) {
        if let Some(persister) = &self.inner.persister {
            persister.flush().await;
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn current(&self) -> StoreResult<Value> {
        read(&self.inner.state)
            .clone()
            .ok_or(StoreError::NotInitialized)
    }

    /// Make `next` current. Caller holds the writer lock.
    fn publish(&self, label: &str, next: Value) {
        let revision = {
            let mut state = write(&self.inner.state);
            *state = Some(next.clone());
            self.inner.revision.fetch_add(1, Ordering::AcqRel) + 1
        };
        lock(&self.inner.history).record(label, next.clone());
        if let Some(persister) = &self.inner.persister {
            persister.schedule_persist(next.clone());
        }
        lock(&self.inner.rounds).pending.push_back((revision, next));
        tracing::debug!(action = %label, "state published");
    }

    /// Deliver queued rounds unless another caller is already doing so.
    fn drain_rounds(&self) {
        {
            let mut rounds = lock(&self.inner.rounds);
            if rounds.draining {
                return;
            }
            rounds.draining = true;
        }
        loop {
            let (revision, root) = {
                let mut rounds = lock(&self.inner.rounds);
                match rounds.pending.pop_front() {
                    Some(round) => round,
                    None => {
                        rounds.draining = false;
                        return;
                    }
                }
            };
            self.inner.subscriptions.notify_all(revision, &root);
        }
    }

    fn spawn_resolution(
        &self,
        label: String,
        future: BoxFuture<'static, StoreResult<Value>>,
    ) -> StoreResult<()> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| StoreError::NoAsyncRuntime)?;
        let store = self.clone();
        tracing::debug!(action = %label, "waiting for deferred state");
        handle.spawn(async move {
            match future.await {
                Ok(value) => {
                    if let Err(e) = store.dispatch(Op::Resolved { value }) {
                        tracing::error!(error = %e, action = %label, "failed to publish deferred state");
                    }
                }
                Err(e) => tracing::error!(error = %e, action = %label, "deferred reducer failed"),
            }
        });
        Ok(())
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("ready", &self.is_ready())
            .field("subscribers", &self.subscriber_count())
            .field("persistent", &self.inner.persister.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn ready_store() -> Store {
        let store = Store::default();
        store
            .set_initial_state(json!({"person": {"name": "Ann", "colors": ["red"]}}))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_uninitialized_store_rejects_everything() {
        let store = Store::default();
        assert!(matches!(store.get_state(), Err(StoreError::NotInitialized)));
        assert!(matches!(
            store.dispatch_set("a", 1),
            Err(StoreError::NotInitialized)
        ));
        assert!(matches!(
            store.get_path_value("a", None),
            Err(StoreError::NotInitialized)
        ));
        // An explicit snapshot does not need the store.
        let snapshot = Value::from(json!({"a": 1}));
        assert_eq!(store.get_path_value("a", Some(&snapshot)).unwrap(), Some(Value::from(1)));
    }

    #[tokio::test]
    async fn test_second_initialization_is_ignored() {
        let store = ready_store().await;
        store.set_initial_state(json!({"other": true})).await.unwrap();
        assert_eq!(store.get_state().unwrap()["person"]["name"], "Ann");
        assert_eq!(store.history().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_records_history() {
        let store = ready_store().await;
        store.dispatch_set("person.name", "Bob").unwrap();
        store.dispatch_push("person.colors", ["blue"]).unwrap();

        let labels: Vec<_> = store.history().into_iter().map(|e| e.label).collect();
        assert_eq!(labels, ["@@init", "@@set person.name", "@@push person.colors"]);
    }

    #[tokio::test]
    async fn test_failed_dispatch_keeps_state() {
        let store = ready_store().await;
        let before = store.get_state().unwrap();

        let err = store.dispatch_push("person.name", ["x"]).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { .. }));
        assert!(Value::ptr_eq(&store.get_state().unwrap(), &before));
        assert_eq!(store.history().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_and_unknown_kind() {
        let store = ready_store().await;
        assert!(matches!(
            store.dispatch(Action::custom("", json!(null))),
            Err(StoreError::MissingKind)
        ));
        assert!(matches!(
            store.dispatch(Action::custom("shout loudly", json!(null))),
            Err(StoreError::UnknownOperation { kind }) if kind == "shout"
        ));
    }

    #[tokio::test]
    async fn test_unchanged_reduction_publishes_nothing() {
        let store = ready_store().await;
        store
            .add_reducer("noop", |_: &Value, _: &Value| Ok(Reduction::Unchanged))
            .unwrap();
        store.dispatch(Action::custom("noop", json!(null))).unwrap();
        assert_eq!(store.history().len(), 1);
    }

    #[test]
    fn test_store_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync + Clone>() {}
        assert_send_sync::<Store>();
    }
}
