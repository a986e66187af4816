//! Path-addressed immutable application state.
//!
//! `pathstate` keeps an application's state as one immutable JSON-like tree
//! and replaces action/reducer boilerplate with direct writes at dotted paths:
//!
//! - **Structural sharing**: every write copies only the chain of nodes from
//!   the root to its target; all other subtrees are shared with the previous
//!   snapshot.
//! - **Value-level notifications**: subscribers are called only when the value
//!   at their path actually changes.
//! - **Session persistence**: snapshots are saved with a trailing debounce and
//!   rehydrated at startup.
//!
//! # Quick Start
//!
//! ```
//! use pathstate::{Store, StoreConfig, Value};
//! use serde_json::json;
//! use std::sync::{Arc, Mutex};
//!
//! # futures::executor::block_on(async {
//! let store = Store::new(StoreConfig::default());
//! store
//!     .set_initial_state(json!({"person": {"name": "Ann", "colors": ["red"]}}))
//!     .await
//!     .unwrap();
//!
//! let names = Arc::new(Mutex::new(Vec::new()));
//! let sink = names.clone();
//! let _subscription = store.subscribe("person.name", move |name: Option<&Value>| {
//!     sink.lock().unwrap().push(name.cloned());
//! });
//!
//! store.dispatch_push("person.colors", ["blue"]).unwrap();
//! store.dispatch_set("person.name", "Bob").unwrap();
//!
//! // One delivery on subscribe, one for the name change; the push is unrelated.
//! assert_eq!(names.lock().unwrap().len(), 2);
//! assert_eq!(store.get_state().unwrap()["person"]["colors"], json!(["red", "blue"]));
//! # });
//! ```

pub mod apply;
pub mod config;
pub mod error;
pub mod history;
pub mod op;
pub mod path;
pub mod persist;
pub mod registry;
pub mod resolve;
pub mod store;
pub mod subscribe;
pub mod value;

pub use apply::{apply_at_path, apply_op};
pub use config::{StoreConfig, DEFAULT_PERSIST_DELAY_MS, DEFAULT_STORAGE_KEY};
pub use error::{value_type_name, PersistenceError, StoreError, StoreResult};
pub use history::{History, HistoryEntry, DEFAULT_HISTORY_LIMIT};
pub use op::{Action, Mapper, Op, OpKind, Predicate, Transformer};
pub use path::{Path, PATH_DELIMITER};
pub use persist::{FileSessionStorage, MemorySessionStorage, Persister, SessionStorage};
pub use registry::{Handler, OperationRegistry, Reducer, Reduction};
pub use resolve::{get_path_value, resolve};
pub use store::Store;
pub use subscribe::{Callback, ChangeDetector, SubscriptionHandle, WatchHandle, WatchTarget};
pub use value::{Map, Value};

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

// Poisoned locks are entered anyway: every critical section leaves its data valid.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
