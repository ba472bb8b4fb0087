//! Render runtime: the host side of the store.
//!
//! Holds rendering units, re-renders them on request, batches the requests
//! issued during one event-handling turn, and runs per-unit cleanups.

mod context;

pub use context::{Mounted, Runtime, RuntimeConfig, UnitId};
