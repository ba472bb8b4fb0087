//! Path-scoped state sharing.
//!
//! A [`Store`] holds one nested root value. Accessors bound to a path read
//! and write the value there; the subscribing flavor also registers the
//! rendering unit so that it re-renders when that path changes.

mod accessor;
mod path;
#[allow(clippy::module_inception)]
mod store;
mod subscriptions;

pub use accessor::{Accessor, GetStore, Mode, Peek, Setter, Subscribe, UseStore};
pub use path::{Key, Path};
pub use store::{Store, Update, WatchGuard};

use serde_json::Value;

/// Create a store bound to the current runtime and return its two accessor
/// families, both rooted at the whole state.
pub fn create_store(initial: impl Into<Value>) -> (UseStore, GetStore) {
    let store = Store::new(initial);
    (store.use_store(), store.get_store())
}
