//! # Pathstore
//!
//! Path-scoped reactive state sharing for component-based UIs.
//!
//! [`create_store`] takes an initial nested value and returns two accessor
//! families over it:
//!
//! - [`UseStore`] - reading a path subscribes the rendering unit, which then
//!   re-renders whenever that path (or anything below it) changes
//! - [`GetStore`] - same reads and writes, without subscribing
//!
//! Rendering units live in a [`Runtime`](runtime::Runtime), which plays the
//! host framework: it mounts units, batches the re-renders requested during
//! one event-handling turn, and runs cleanups when a unit re-renders or
//! unmounts.
//!
//! ```
//! use pathstore::{create_store, runtime::Runtime};
//! use serde_json::json;
//!
//! Runtime::scope(|| {
//!     let runtime = Runtime::current();
//!     let (use_store, get_store) = create_store(json!({"cart": {"price": 0}, "username": "Hamza"}));
//!
//!     let price = runtime.mount("price", {
//!         let use_store = use_store.clone();
//!         move || {
//!             let (_price, _set_price) = use_store.at("cart").at("price").get();
//!         }
//!     });
//!     let name = runtime.mount("name", move || {
//!         let (_name, _) = use_store.at("username").get();
//!     });
//!
//!     let (_, set_price) = get_store.at("cart").at("price").get();
//!     set_price.update(|v| json!(v.as_i64().unwrap_or(0) + 1)).unwrap();
//!
//!     assert_eq!(price.render_count(), 2);
//!     assert_eq!(name.render_count(), 1);
//! });
//! ```

pub mod error;
pub mod runtime;
pub mod store;
mod sync;

// Re-export main types for convenience
pub use error::{Result, StoreError};
pub use store::{create_store, GetStore, Key, Path, Setter, Store, Update, UseStore, WatchGuard};
