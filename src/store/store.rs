use crate::error::{Result, StoreError};
use crate::runtime::Runtime;
use crate::store::subscriptions::{Subscriber, SubscriptionTable, WatchFn};
use crate::store::{GetStore, Path, UseStore};
use crate::sync::{lock, read, write};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, Weak};
use tracing::debug;

type Updater<'a> = Box<dyn FnOnce(&Value) -> Value + 'a>;

/// How a write computes the next value at its path.
pub enum Update<'a> {
    /// Replace the value outright.
    Replace(Value),
    /// Compute the next value from the current one (`null` if absent).
    With(Updater<'a>),
}

impl<'a> Update<'a> {
    pub fn with<F>(f: F) -> Self
    where
        F: FnOnce(&Value) -> Value + 'a,
    {
        Update::With(Box::new(f))
    }

    fn apply(self, current: &Value) -> Value {
        match self {
            Update::Replace(value) => value,
            Update::With(f) => f(current),
        }
    }
}

impl From<Value> for Update<'_> {
    fn from(value: Value) -> Self {
        Update::Replace(value)
    }
}

impl fmt::Debug for Update<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Update::Replace(value) => f.debug_tuple("Replace").field(value).finish(),
            Update::With(_) => f.write_str("With(..)"),
        }
    }
}

pub(crate) struct StoreInner {
    state: RwLock<Value>,
    subscriptions: Mutex<SubscriptionTable>,
    runtime: Runtime,
}

/// A container for one nested root value with path-scoped subscriptions.
///
/// Reads through [`UseStore`] subscribe the rendering unit to the path they
/// read; a write at a path re-renders the units subscribed to that path, to
/// any of its ancestors, and to any descendant whose value actually changed.
/// Cloning a store yields another handle to the same state.
///
/// # Examples
///
/// ```
/// use pathstore::{Path, Store};
/// use serde_json::json;
///
/// let store = Store::new(json!({"cart": {"price": 0}}));
/// store.update(&Path::parse("cart.price"), |v| json!(v.as_i64().unwrap_or(0) + 1)).unwrap();
/// assert_eq!(store.read(&Path::parse("cart.price")), json!(1));
/// ```
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Create a store bound to the current runtime.
    pub fn new(initial: impl Into<Value>) -> Self {
        Self::with_runtime(Runtime::current(), initial)
    }

    pub fn with_runtime(runtime: Runtime, initial: impl Into<Value>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(initial.into()),
                subscriptions: Mutex::new(SubscriptionTable::default()),
                runtime,
            }),
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Subscribing accessor rooted at the whole state.
    pub fn use_store(&self) -> UseStore {
        UseStore::new(self.clone(), Path::root())
    }

    /// Non-subscribing accessor rooted at the whole state.
    pub fn get_store(&self) -> GetStore {
        GetStore::new(self.clone(), Path::root())
    }

    /// A clone of the whole state.
    pub fn snapshot(&self) -> Value {
        read(&self.inner.state).clone()
    }

    /// The value at `path`, or `null` if nothing is there.
    pub fn read(&self, path: &Path) -> Value {
        let state = read(&self.inner.state);
        path.lookup(&state).cloned().unwrap_or(Value::Null)
    }

    pub fn read_as<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        serde_json::from_value(self.read(path)).map_err(|source| StoreError::Decode {
            path: path.clone(),
            source,
        })
    }

    pub fn set(&self, path: &Path, value: impl Into<Value>) -> Result<()> {
        self.write(path, Update::Replace(value.into()))
    }

    /// Store `f(current)` at `path`. Last writer wins against concurrent
    /// writes from other threads; see [`write`](Store::write).
    pub fn update<F>(&self, path: &Path, f: F) -> Result<()>
    where
        F: FnOnce(&Value) -> Value,
    {
        self.write(path, Update::with(f))
    }

    /// Serialize `value` and store it at `path`.
    pub fn set_as<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|source| StoreError::Encode {
            path: path.clone(),
            source,
        })?;
        self.set(path, value)
    }

    /// Write at `path` and notify.
    ///
    /// A write that leaves the value unchanged is a no-op. Otherwise the state
    /// is updated first, then subscribers are re-rendered (right away, or at
    /// the end of the enclosing [`Runtime::batch`]). The updater runs without
    /// any lock held; if it panics the state is left as it was.
    ///
    /// A path the value cannot be stored at is an error even when the write
    /// would not change anything.
    ///
    /// Reading the current value and storing the next one are separate
    /// steps. Two threads writing the same path at once are last-writer-wins:
    /// an update computed from a value another thread has since replaced
    /// overwrites that thread's result.
    pub fn write(&self, path: &Path, update: Update<'_>) -> Result<()> {
        path.check_writable(&read(&self.inner.state))?;
        let before = self.read(path);
        let after = update.apply(&before);
        if after == before {
            debug!(path = %path, "write skipped, value unchanged");
            return Ok(());
        }

        {
            let mut state = write(&self.inner.state);
            *path.slot_mut(&mut state)? = after.clone();
        }
        debug!(path = %path, "write");

        self.notify(path, &before, &after);
        Ok(())
    }

    fn notify(&self, path: &Path, before: &Value, after: &Value) {
        let affected = lock(&self.inner.subscriptions).affected(path, before, after);
        if affected.is_empty() {
            return;
        }
        debug!(
            path = %path,
            units = affected.units.len(),
            watchers = affected.watchers.len(),
            "notify"
        );

        // Units are queued before any watcher runs: a panicking watcher
        // unwinds through the batch, which still renders them.
        let runtime = &self.inner.runtime;
        runtime.batch(|| {
            for id in &affected.units {
                runtime.schedule(*id);
            }
            for (callback, watched) in &affected.watchers {
                callback(&self.read(watched));
            }
        });
    }

    /// Subscribe the unit rendering on this thread to `path`.
    ///
    /// The registration lasts until the unit renders again or unmounts.
    /// Returns false when no unit of this store's runtime is rendering.
    pub(crate) fn track(&self, path: &Path) -> bool {
        let Some((runtime, unit)) = Runtime::current_unit() else {
            debug!(path = %path, "subscribing read outside of a render, not tracked");
            return false;
        };
        if !runtime.ptr_eq(&self.inner.runtime) {
            debug!(unit = %unit, path = %path, "rendering unit belongs to another runtime, not tracked");
            return false;
        }

        let subscriber = Subscriber::Unit(unit);
        let first = lock(&self.inner.subscriptions).subscribe(subscriber, path);
        if first {
            let store = Arc::downgrade(&self.inner);
            Runtime::on_cleanup(move || release(&store, subscriber));
        }
        true
    }

    /// Call `callback` with the new value at `path` after every write that
    /// would re-render a unit subscribed there. Stops when the guard drops.
    pub fn watch<F>(&self, path: &Path, callback: F) -> WatchGuard
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let callback: WatchFn = Arc::new(callback);
        let id = lock(&self.inner.subscriptions).add_watcher(path, callback);
        WatchGuard {
            subscriber: Subscriber::Watch(id),
            store: Arc::downgrade(&self.inner),
        }
    }

    /// Number of live subscribers registered exactly at `path`.
    pub fn subscriber_count(&self, path: &Path) -> usize {
        lock(&self.inner.subscriptions).count(path)
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("state", &*read(&self.inner.state))
            .finish_non_exhaustive()
    }
}

fn release(store: &Weak<StoreInner>, subscriber: Subscriber) {
    if let Some(store) = store.upgrade() {
        lock(&store.subscriptions).remove(subscriber);
    }
}

/// RAII guard for a path watcher.
pub struct WatchGuard {
    subscriber: Subscriber,
    store: Weak<StoreInner>,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        release(&self.store, self.subscriber);
    }
}
