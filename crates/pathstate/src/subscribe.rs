//! Per-path subscriptions with value-level change suppression.
//!
//! A subscription remembers the last value it delivered. On every publish the
//! value at its path is resolved again and the callback only runs when that
//! value differs, so writes to unrelated paths never reach it.
//!
//! Every published snapshot carries a revision number. A subscription ignores
//! any snapshot not newer than the last one it looked at, so a late subscriber
//! seeded with the newest snapshot never sees queued older ones afterwards.

use crate::{lock, resolve, Path, Value};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Subscriber callback. Receives `None` when the path is undefined.
pub type Callback = Arc<dyn Fn(Option<&Value>) + Send + Sync>;

pub(crate) struct Subscription {
    id: u64,
    path: Path,
    callback: Callback,
    last: Mutex<Delivered>,
    active: AtomicBool,
}

#[derive(Default)]
struct Delivered {
    /// Newest revision examined; older snapshots are skipped.
    revision: u64,
    /// `None` until the first delivery.
    value: Option<Option<Value>>,
}

impl Subscription {
    /// Run the callback if `root` is newer than anything seen so far and the
    /// value at the path changed since the last delivery. Panics in the
    /// callback are caught and logged.
    pub(crate) fn notify(&self, revision: u64, root: &Value) -> bool {
        if !self.active.load(Ordering::Acquire) {
            return false;
        }

        let current = resolve(root, &self.path).cloned();
        {
            let mut last = lock(&self.last);
            if revision <= last.revision {
                return false;
            }
            last.revision = revision;
            if last.value.as_ref() == Some(&current) {
                return false;
            }
            last.value = Some(current.clone());
        }

        let callback = Arc::clone(&self.callback);
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(current.as_ref()))) {
            tracing::error!(
                path = %self.path,
                subscription = self.id,
                panic = panic_message(panic.as_ref()),
                "subscriber callback panicked"
            );
        }
        true
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

/// Registration-ordered subscription list.
#[derive(Default)]
pub(crate) struct Subscriptions {
    next_id: AtomicU64,
    entries: Mutex<Vec<Arc<Subscription>>>,
}

impl Subscriptions {
    pub(crate) fn insert(&self, path: Path, callback: Callback) -> Arc<Subscription> {
        let subscription = Arc::new(Subscription {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            path,
            callback,
            last: Mutex::new(Delivered::default()),
            active: AtomicBool::new(true),
        });
        lock(&self.entries).push(Arc::clone(&subscription));
        subscription
    }

    pub(crate) fn remove(&self, id: u64) {
        lock(&self.entries).retain(|s| s.id != id);
    }

    /// Copy of the current list, so callbacks run without the lock held.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Subscription>> {
        lock(&self.entries).clone()
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Deliver `root` to every subscription, in registration order.
    pub(crate) fn notify_all(&self, revision: u64, root: &Value) -> usize {
        self.snapshot()
            .iter()
            .filter(|subscription| subscription.notify(revision, root))
            .count()
    }
}

/// Keeps a subscription alive.
///
/// Dropping the handle unsubscribes; call [`detach`](Self::detach) to keep the
/// subscription for the lifetime of the store.
#[must_use = "dropping a SubscriptionHandle unsubscribes immediately"]
pub struct SubscriptionHandle {
    subscription: Arc<Subscription>,
    registry: Weak<Subscriptions>,
    detached: bool,
}

impl SubscriptionHandle {
    pub(crate) fn new(subscription: Arc<Subscription>, registry: &Arc<Subscriptions>) -> Self {
        Self {
            subscription,
            registry: Arc::downgrade(registry),
            detached: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.subscription.id
    }

    pub fn path(&self) -> &Path {
        &self.subscription.path
    }

    pub fn is_active(&self) -> bool {
        self.subscription.active.load(Ordering::Acquire)
    }

    /// Stop deliveries. No callback runs after this returns, except one that
    /// was already executing on another thread.
    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    /// Keep the subscription registered after the handle is dropped.
    pub fn detach(mut self) {
        self.detached = true;
    }

    fn cancel(&mut self) {
        if self.subscription.active.swap(false, Ordering::AcqRel) {
            if let Some(registry) = self.registry.upgrade() {
                registry.remove(self.subscription.id);
            }
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if !self.detached {
            self.cancel();
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id())
            .field("path", self.path())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Host hook for "something this component renders has changed".
pub trait ChangeDetector: Send + Sync {
    fn mark_for_check(&self);
}

/// A collaborator whose properties mirror state paths.
///
/// Used with [`Store::watch`](crate::Store::watch): every change at a watched
/// path is written into the matching property.
pub trait WatchTarget: Send + Sync {
    /// Store the new value (`None` when the path is undefined).
    fn set_property(&self, property: &str, value: Option<&Value>);

    /// Optional change detector, poked after each property update.
    fn change_detector(&self) -> Option<&dyn ChangeDetector> {
        None
    }
}

/// Subscriptions created by one `watch` call.
#[must_use = "dropping a WatchHandle unsubscribes every watched property"]
#[derive(Debug)]
pub struct WatchHandle {
    handles: Vec<SubscriptionHandle>,
}

impl WatchHandle {
    pub(crate) fn new(handles: Vec<SubscriptionHandle>) -> Self {
        Self { handles }
    }

    /// Number of watched properties.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn unsubscribe(self) {
        self.handles
            .into_iter()
            .for_each(SubscriptionHandle::unsubscribe);
    }

    pub fn detach(self) {
        self.handles.into_iter().for_each(SubscriptionHandle::detach);
    }
}
