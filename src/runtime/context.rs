use crate::sync::lock;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use tracing::{debug, trace, warn};

type Render = Arc<dyn Fn() + Send + Sync>;
type Cleanup = Box<dyn FnOnce() + Send>;

/// Identifies a mounted rendering unit. Ids grow with mount order, and
/// pending re-renders run in id order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(usize);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Tuning knobs for a [`Runtime`].
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Most re-renders a single flush may perform. A render that writes to
    /// state it subscribes to would otherwise loop forever; once the cap is
    /// hit the remaining queue is dropped with a warning.
    pub max_flush_renders: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_flush_renders: 10_000,
        }
    }
}

struct Unit {
    name: String,
    render: Render,
    // Run before the next render and on unmount.
    cleanups: Vec<Cleanup>,
    renders: Arc<AtomicUsize>,
}

#[derive(Default)]
struct Scheduler {
    pending: BTreeSet<UnitId>,
    batch_depth: usize,
    flushing: bool,
}

pub(crate) struct RuntimeInner {
    config: RuntimeConfig,
    next_id: AtomicUsize,
    units: Mutex<HashMap<UnitId, Unit>>,
    scheduler: Mutex<Scheduler>,
}

/// Host for rendering units.
///
/// A runtime mounts units (a render function plus bookkeeping), re-renders
/// them on request, batches requests made inside [`Runtime::batch`], and runs
/// each unit's cleanups before it renders again and when it unmounts. Stores
/// use it to re-render exactly the units subscribed to a changed path.
///
/// Supports both a global runtime (default) and scoped runtimes for isolation.
///
/// # Examples
///
/// ```
/// use pathstore::runtime::Runtime;
/// use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
///
/// Runtime::scope(|| {
///     let runtime = Runtime::current();
///     let hits = Arc::new(AtomicUsize::new(0));
///     let unit = runtime.mount("counter", {
///         let hits = hits.clone();
///         move || {
///             hits.fetch_add(1, Ordering::SeqCst);
///         }
///     });
///
///     assert_eq!(unit.render_count(), 1);
///     runtime.schedule(unit.id());
///     assert_eq!(hits.load(Ordering::SeqCst), 2);
/// });
/// ```
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

// Thread-local stack for scoped runtimes
thread_local! {
    static RUNTIME_STACK: RefCell<Vec<Runtime>> = const { RefCell::new(Vec::new()) };
    static RENDER_STACK: RefCell<Vec<(Runtime, UnitId)>> = const { RefCell::new(Vec::new()) };
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Runtime {
            inner: Arc::new(RuntimeInner {
                config,
                next_id: AtomicUsize::new(0),
                units: Mutex::new(HashMap::new()),
                scheduler: Mutex::new(Scheduler::default()),
            }),
        }
    }

    /// Run a function with a fresh isolated runtime as the current one.
    ///
    /// The runtime and all its state is dropped when the function returns
    /// (unless something created inside still holds a handle to it).
    pub fn scope<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        Self::new().enter(f)
    }

    /// Get or create the global runtime (fallback).
    pub fn global() -> Self {
        static RUNTIME: OnceLock<Runtime> = OnceLock::new();
        RUNTIME.get_or_init(Runtime::new).clone()
    }

    /// The innermost entered runtime on this thread, or the global one.
    pub fn current() -> Self {
        RUNTIME_STACK
            .with(|stack| stack.borrow().last().cloned())
            .unwrap_or_else(Self::global)
    }

    /// Run a function with this runtime as the current one.
    pub fn enter<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        RUNTIME_STACK.with(|stack| stack.borrow_mut().push(self.clone()));

        let result = panic::catch_unwind(AssertUnwindSafe(f));

        RUNTIME_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });

        match result {
            Ok(r) => r,
            Err(e) => panic::resume_unwind(e),
        }
    }

    /// The unit whose render is running on this thread, if any.
    pub fn current_unit() -> Option<(Runtime, UnitId)> {
        RENDER_STACK.with(|stack| stack.borrow().last().cloned())
    }

    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn unit_count(&self) -> usize {
        lock(&self.inner.units).len()
    }

    /// Mount a unit and render it once.
    ///
    /// The unit stays mounted until the returned handle is dropped. Writes
    /// made by the initial render are flushed before this returns.
    pub fn mount<F>(&self, name: impl Into<String>, render: F) -> Mounted
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = UnitId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let name = name.into();
        let renders = Arc::new(AtomicUsize::new(0));

        lock(&self.inner.units).insert(
            id,
            Unit {
                name: name.clone(),
                render: Arc::new(render),
                cleanups: Vec::new(),
                renders: Arc::clone(&renders),
            },
        );
        debug!(unit = %id, name = %name, "mount");

        let first = panic::catch_unwind(AssertUnwindSafe(|| self.batch(|| self.render_unit(id))));
        if let Err(e) = first {
            self.inner.unmount(id);
            panic::resume_unwind(e);
        }

        Mounted {
            id,
            name,
            renders,
            runtime: Arc::downgrade(&self.inner),
        }
    }

    /// Register a cleanup for the unit currently rendering on this thread.
    ///
    /// The cleanup runs right before that unit's next render, or when it
    /// unmounts. Returns `false` (and drops `f` unrun) outside of a render. If
    /// the unit was unmounted during its own render, `f` runs right away.
    pub fn on_cleanup<F>(f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let Some((runtime, id)) = Self::current_unit() else {
            return false;
        };
        let mut units = lock(&runtime.inner.units);
        if let Some(unit) = units.get_mut(&id) {
            unit.cleanups.push(Box::new(f));
            return true;
        }
        // Unmounted mid-render: nothing left to clean up later.
        drop(units);
        f();
        true
    }

    /// Request a re-render of `id`.
    ///
    /// Inside a batch (or while a flush or a mount is in progress) the request
    /// is queued; otherwise the unit re-renders before this returns. A unit is
    /// queued at most once, however many times it is scheduled.
    pub fn schedule(&self, id: UnitId) {
        let idle = {
            let mut scheduler = lock(&self.inner.scheduler);
            scheduler.pending.insert(id);
            scheduler.batch_depth == 0 && !scheduler.flushing
        };
        trace!(unit = %id, "schedule");
        if idle {
            self.flush();
        }
    }

    /// Run `f` as one event-handling turn: every re-render it requests is
    /// deferred and each affected unit renders exactly once when the
    /// outermost batch ends.
    pub fn batch<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        lock(&self.inner.scheduler).batch_depth += 1;

        let result = panic::catch_unwind(AssertUnwindSafe(f));

        let outermost = {
            let mut scheduler = lock(&self.inner.scheduler);
            scheduler.batch_depth -= 1;
            scheduler.batch_depth == 0
        };

        match result {
            Ok(r) => {
                if outermost {
                    self.flush();
                }
                r
            }
            Err(e) => {
                // Renders requested before the panic are still owed. The
                // batch's own panic is the one that propagates.
                if outermost {
                    let _ = panic::catch_unwind(AssertUnwindSafe(|| self.flush()));
                }
                panic::resume_unwind(e)
            }
        }
    }

    /// Render every queued unit, including units queued by those renders.
    ///
    /// Does nothing inside a batch or a running flush; the outer one picks the
    /// queue up. A panicking render does not stop the others: the queue is
    /// drained first, then the first panic is resumed.
    pub fn flush(&self) {
        {
            let mut scheduler = lock(&self.inner.scheduler);
            if scheduler.flushing || scheduler.batch_depth > 0 {
                return;
            }
            scheduler.flushing = true;
        }
        let _guard = FlushGuard(&self.inner);

        let cap = self.inner.config.max_flush_renders;
        let mut rendered = 0;
        let mut panicked = None;
        loop {
            let next = lock(&self.inner.scheduler).pending.pop_first();
            let Some(id) = next else { break };
            if rendered >= cap {
                let dropped = {
                    let mut scheduler = lock(&self.inner.scheduler);
                    let dropped = scheduler.pending.len() + 1;
                    scheduler.pending.clear();
                    dropped
                };
                warn!(renders = rendered, dropped, "flush render cap reached, dropping queued renders");
                break;
            }
            rendered += 1;
            if let Err(e) = panic::catch_unwind(AssertUnwindSafe(|| self.render_unit(id))) {
                warn!(unit = %id, "render panicked");
                panicked.get_or_insert(e);
            }
        }

        if let Some(e) = panicked {
            panic::resume_unwind(e);
        }
    }

    fn render_unit(&self, id: UnitId) {
        let (render, cleanups) = {
            let mut units = lock(&self.inner.units);
            let Some(unit) = units.get_mut(&id) else {
                return;
            };
            let count = unit.renders.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(unit = %id, name = %unit.name, renders = count, "render");
            (Arc::clone(&unit.render), std::mem::take(&mut unit.cleanups))
        };

        for cleanup in cleanups {
            cleanup();
        }

        RENDER_STACK.with(|stack| stack.borrow_mut().push((self.clone(), id)));

        let result = panic::catch_unwind(AssertUnwindSafe(|| render()));

        RENDER_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });

        if let Err(e) = result {
            panic::resume_unwind(e);
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeInner {
    fn unmount(&self, id: UnitId) {
        let unit = lock(&self.units).remove(&id);
        lock(&self.scheduler).pending.remove(&id);
        if let Some(unit) = unit {
            debug!(unit = %id, name = %unit.name, "unmount");
            for cleanup in unit.cleanups {
                cleanup();
            }
        }
    }
}

struct FlushGuard<'a>(&'a RuntimeInner);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        lock(&self.0.scheduler).flushing = false;
    }
}

/// RAII handle for a mounted unit. Dropping it unmounts the unit.
pub struct Mounted {
    id: UnitId,
    name: String,
    renders: Arc<AtomicUsize>,
    runtime: Weak<RuntimeInner>,
}

impl Mounted {
    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// How many times the unit has rendered, the initial render included.
    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    pub fn unmount(self) {}
}

impl Drop for Mounted {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.unmount(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let render = {
            let hits = hits.clone();
            move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }
        };
        (hits, render)
    }

    #[test]
    fn mount_renders_once() {
        let runtime = Runtime::new();
        let (hits, render) = counter();
        let unit = runtime.mount("unit", render);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(unit.render_count(), 1);
        assert_eq!(unit.name(), "unit");
        assert_eq!(runtime.unit_count(), 1);
    }

    #[test]
    fn schedule_outside_batch_renders_immediately() {
        let runtime = Runtime::new();
        let (_, render) = counter();
        let unit = runtime.mount("unit", render);

        runtime.schedule(unit.id());
        assert_eq!(unit.render_count(), 2);
    }

    #[test]
    fn batch_renders_each_unit_once() {
        let runtime = Runtime::new();
        let (_, render_a) = counter();
        let (_, render_b) = counter();
        let a = runtime.mount("a", render_a);
        let b = runtime.mount("b", render_b);

        runtime.batch(|| {
            runtime.schedule(a.id());
            runtime.schedule(a.id());
            runtime.batch(|| runtime.schedule(b.id()));
            // Nested batch does not flush.
            assert_eq!(b.render_count(), 1);
        });

        assert_eq!(a.render_count(), 2);
        assert_eq!(b.render_count(), 2);
    }

    #[test]
    fn cleanups_run_before_rerender_and_on_unmount() {
        let runtime = Runtime::new();
        let cleaned = Arc::new(AtomicUsize::new(0));
        let unit = runtime.mount("unit", {
            let cleaned = cleaned.clone();
            move || {
                let cleaned = cleaned.clone();
                assert!(Runtime::on_cleanup(move || {
                    cleaned.fetch_add(1, Ordering::SeqCst);
                }));
            }
        });
        assert_eq!(cleaned.load(Ordering::SeqCst), 0);

        runtime.schedule(unit.id());
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);

        drop(unit);
        assert_eq!(cleaned.load(Ordering::SeqCst), 2);
        assert_eq!(runtime.unit_count(), 0);
    }

    #[test]
    fn on_cleanup_outside_render_is_rejected() {
        let ran = Arc::new(AtomicBool::new(false));
        let registered = Runtime::on_cleanup({
            let ran = ran.clone();
            move || ran.store(true, Ordering::SeqCst)
        });
        assert!(!registered);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn current_unit_is_set_during_render() {
        let runtime = Runtime::new();
        let seen = Arc::new(Mutex::new(None));
        let unit = runtime.mount("unit", {
            let seen = seen.clone();
            move || {
                *seen.lock().unwrap() = Runtime::current_unit().map(|(_, id)| id);
            }
        });

        assert_eq!(*seen.lock().unwrap(), Some(unit.id()));
        assert!(Runtime::current_unit().is_none());
    }

    #[test]
    fn unmounted_unit_is_not_rendered() {
        let runtime = Runtime::new();
        let (hits, render) = counter();
        let unit = runtime.mount("unit", render);
        let id = unit.id();
        unit.unmount();

        runtime.schedule(id);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn flush_cap_stops_render_loops() {
        let runtime = Runtime::with_config(RuntimeConfig {
            max_flush_renders: 5,
        });
        let hits = Arc::new(AtomicUsize::new(0));
        let unit = runtime.mount("looping", {
            let hits = hits.clone();
            let runtime = runtime.clone();
            move || {
                hits.fetch_add(1, Ordering::SeqCst);
                if let Some((_, id)) = Runtime::current_unit() {
                    runtime.schedule(id);
                }
            }
        });

        // Initial render plus five capped re-renders.
        assert_eq!(hits.load(Ordering::SeqCst), 6);
        assert_eq!(unit.render_count(), 6);
    }

    #[test]
    fn panicking_render_leaves_runtime_usable() {
        let runtime = Runtime::new();
        let explode = Arc::new(AtomicBool::new(false));
        let unit = runtime.mount("fragile", {
            let explode = explode.clone();
            move || {
                if explode.load(Ordering::SeqCst) {
                    panic!("render failed");
                }
            }
        });

        explode.store(true, Ordering::SeqCst);
        let result = panic::catch_unwind(AssertUnwindSafe(|| runtime.schedule(unit.id())));
        assert!(result.is_err());
        assert!(Runtime::current_unit().is_none());

        explode.store(false, Ordering::SeqCst);
        runtime.schedule(unit.id());
        assert_eq!(unit.render_count(), 3);
    }

    #[test]
    fn panicking_render_does_not_strand_queued_units() {
        let runtime = Runtime::new();
        let explode = Arc::new(AtomicBool::new(false));
        let bad = runtime.mount("bad", {
            let explode = explode.clone();
            move || {
                if explode.load(Ordering::SeqCst) {
                    panic!("render failed");
                }
            }
        });
        let (_, render) = counter();
        let good = runtime.mount("good", render);

        explode.store(true, Ordering::SeqCst);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            runtime.batch(|| {
                runtime.schedule(bad.id());
                runtime.schedule(good.id());
            })
        }));

        assert!(result.is_err());
        assert_eq!(bad.render_count(), 2);
        assert_eq!(good.render_count(), 2);
    }

    #[test]
    fn panicking_batch_still_flushes_its_renders() {
        let runtime = Runtime::new();
        let (_, render) = counter();
        let unit = runtime.mount("unit", render);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            runtime.batch(|| {
                runtime.schedule(unit.id());
                panic!("handler failed");
            })
        }));

        assert!(result.is_err());
        assert_eq!(unit.render_count(), 2);
    }

    #[test]
    fn scope_sets_current_runtime() {
        let outer = Runtime::current();
        Runtime::scope(|| {
            assert!(!Runtime::current().ptr_eq(&outer));
        });
        assert!(Runtime::current().ptr_eq(&outer));
    }
}
