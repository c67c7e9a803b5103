//! The runtime context: active-watcher stack, scheduler, tick driving and
//! configuration.
//!
//! All of the pipeline's shared state hangs off one [`Runtime`] value -
//! there are no globals, and two runtimes never share a queue. That keeps
//! tests isolated and lets an application run several independent reactive
//! graphs side by side.
use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use crate::{
    error::{LogReporter, PipelineError, Reporter},
    scheduler::Scheduler,
    store::{wrap, Plain, Value},
    watcher::{Watcher, WatcherInner, WatcherOptions},
};

/// How flushes get from "requested" to "run".
///
/// The scheduler requests at most one tick at a time; the driver decides
/// when that tick actually happens. The default [`ManualTicks`] queues ticks
/// until [`Runtime::turn`] is called. Hosts with a microtask equivalent
/// install their own driver; hosts with nothing at all can fall back to
/// [`ImmediateTicks`].
pub trait TickDriver {
    /// Deliver the tick. Calling it runs the flush.
    fn schedule(&self, tick: Box<dyn FnOnce()>);
}

/// The default driver: ticks wait until the caller pumps them.
#[derive(Default)]
pub struct ManualTicks {
    pending: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl ManualTicks {
    /// Run every pending tick, including ticks scheduled by the ticks being
    /// run. Returns how many ran.
    pub fn pump(&self) -> usize {
        let mut count = 0;
        loop {
            let ticks: Vec<Box<dyn FnOnce()>> = self.pending.borrow_mut().drain(..).collect();
            if ticks.is_empty() {
                break;
            }
            for tick in ticks {
                count += 1;
                tick();
            }
        }
        count
    }
}

impl TickDriver for ManualTicks {
    fn schedule(&self, tick: Box<dyn FnOnce()>) {
        self.pending.borrow_mut().push(tick);
    }
}

/// A coarse fallback driver that runs the flush inside the first enqueue.
pub struct ImmediateTicks;

impl TickDriver for ImmediateTicks {
    fn schedule(&self, tick: Box<dyn FnOnce()>) {
        tick();
    }
}

/// Construction-time configuration for a [`Runtime`].
#[derive(Clone, Copy, Debug)]
pub struct RuntimeConfig {
    /// Report observed-state writes that happen outside of a
    /// [`Runtime::commit`] bracket.
    pub strict: bool,
    /// Start in forced-synchronous mode: every mark-dirty runs its watcher
    /// immediately instead of batching. See [`Runtime::set_synchronous`].
    pub synchronous: bool,
    /// How many times one watcher may re-queue itself within a single flush
    /// before that entry is aborted with a diagnostic.
    pub max_flush_repeats: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            strict: false,
            synchronous: false,
            max_flush_repeats: 100,
        }
    }
}

/// The reactive runtime. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Rc<RuntimeInner>,
}

pub(crate) struct RuntimeInner {
    weak: Weak<RuntimeInner>,
    strict: bool,
    synchronous: Cell<bool>,
    max_flush_repeats: usize,
    active: RefCell<Vec<Rc<WatcherInner>>>,
    scheduler: Scheduler,
    next_watcher: Cell<u64>,
    next_dep: Cell<u64>,
    commit_depth: Cell<usize>,
    reporter: RefCell<Rc<dyn Reporter>>,
    driver: RefCell<Rc<dyn TickDriver>>,
    manual: Rc<ManualTicks>,
}

impl RuntimeInner {
    pub(crate) fn active_watcher(&self) -> Option<Rc<WatcherInner>> {
        self.active.borrow().last().cloned()
    }

    pub(crate) fn push_active(&self, watcher: Rc<WatcherInner>) {
        self.active.borrow_mut().push(watcher);
    }

    pub(crate) fn pop_active(&self) {
        self.active.borrow_mut().pop();
    }

    pub(crate) fn next_watcher_id(&self) -> u64 {
        let id = self.next_watcher.get();
        self.next_watcher.set(id + 1);
        id
    }

    pub(crate) fn next_dep_id(&self) -> u64 {
        let id = self.next_dep.get();
        self.next_dep.set(id + 1);
        id
    }

    pub(crate) fn synchronous(&self) -> bool {
        self.synchronous.get()
    }

    pub(crate) fn max_flush_repeats(&self) -> usize {
        self.max_flush_repeats
    }

    pub(crate) fn enqueue(&self, watcher: Rc<WatcherInner>) {
        self.scheduler.enqueue(self, watcher);
    }

    pub(crate) fn schedule_tick(&self) {
        let weak = self.weak.clone();
        let driver = self.driver.borrow().clone();
        driver.schedule(Box::new(move || {
            if let Some(rt) = weak.upgrade() {
                rt.scheduler.flush(&rt);
            }
        }));
    }

    pub(crate) fn report(&self, error: &PipelineError) {
        let reporter = self.reporter.borrow().clone();
        reporter.report(error);
    }

    /// Strict-mode check, called by the store on every notifying write.
    pub(crate) fn note_store_write(&self, label: &str) {
        if self.strict && self.commit_depth.get() == 0 {
            self.report(&PipelineError::StrictMutation {
                label: label.to_string(),
            });
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Runtime::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let manual = Rc::new(ManualTicks::default());
        let inner = Rc::new_cyclic(|weak| RuntimeInner {
            weak: weak.clone(),
            strict: config.strict,
            synchronous: Cell::new(config.synchronous),
            max_flush_repeats: config.max_flush_repeats,
            active: RefCell::new(Vec::new()),
            scheduler: Scheduler::new(),
            next_watcher: Cell::new(0),
            next_dep: Cell::new(0),
            commit_depth: Cell::new(0),
            reporter: RefCell::new(Rc::new(LogReporter)),
            driver: RefCell::new(manual.clone()),
            manual,
        });
        Runtime { inner }
    }

    /// Wrap plain data into the observed graph. Primitives pass through
    /// unwrapped; a sealed map is kept but silently skipped.
    pub fn observe(&self, plain: Plain) -> Value {
        let value = wrap(&self.inner.weak, plain, true);
        if let Value::Map(map) = &value {
            map.mark_root();
        }
        value
    }

    /// Create a watcher over `expr`, firing `on_change` with (new, old) when
    /// a re-run produces a possibly-changed value. Unless lazy, the first
    /// evaluation happens here and does not fire the callback.
    pub fn watch(
        &self,
        label: impl Into<String>,
        expr: impl FnMut() -> anyhow::Result<Value> + 'static,
        on_change: impl FnMut(&Value, &Value) + 'static,
        options: WatcherOptions,
    ) -> Watcher {
        Watcher::create(
            &self.inner,
            label,
            Box::new(expr),
            Some(Box::new(on_change)),
            options,
            false,
        )
    }

    /// A lazy watcher with no callback: the value is recomputed only when
    /// [`Watcher::value`] finds it dirty.
    pub fn computed(
        &self,
        label: impl Into<String>,
        expr: impl FnMut() -> anyhow::Result<Value> + 'static,
    ) -> Watcher {
        Watcher::create(
            &self.inner,
            label,
            Box::new(expr),
            None,
            WatcherOptions::lazy(),
            false,
        )
    }

    pub(crate) fn watch_render(
        &self,
        label: impl Into<String>,
        expr: impl FnMut() -> anyhow::Result<Value> + 'static,
    ) -> Watcher {
        Watcher::create(
            &self.inner,
            label,
            Box::new(expr),
            None,
            WatcherOptions::default(),
            true,
        )
    }

    /// Bracket a batch of mutations. In strict mode, notifying writes that
    /// happen outside of a commit are reported.
    pub fn commit<T>(&self, f: impl FnOnce() -> T) -> T {
        self.inner.commit_depth.set(self.inner.commit_depth.get() + 1);
        let out = f();
        self.inner.commit_depth.set(self.inner.commit_depth.get() - 1);
        out
    }

    /// Switch forced-synchronous mode on or off. While on, every mark-dirty
    /// runs its watcher immediately (server-side/no-batching contexts).
    pub fn set_synchronous(&self, synchronous: bool) {
        self.inner.synchronous.set(synchronous);
    }

    pub fn is_synchronous(&self) -> bool {
        self.inner.synchronous.get()
    }

    /// Replace the error reporter.
    pub fn set_reporter(&self, reporter: Rc<dyn Reporter>) {
        *self.inner.reporter.borrow_mut() = reporter;
    }

    /// Replace the tick driver. Ticks already queued on the default manual
    /// driver still run on the next [`Runtime::turn`].
    pub fn set_tick_driver(&self, driver: Rc<dyn TickDriver>) {
        *self.inner.driver.borrow_mut() = driver;
    }

    /// Run `f` once the next flush completes. Schedules a tick even when the
    /// queue is empty.
    pub fn after_flush(&self, f: impl FnOnce() + 'static) {
        self.inner.scheduler.after(&self.inner, Box::new(f));
    }

    /// Whether a flush is scheduled or watchers are queued.
    pub fn has_pending(&self) -> bool {
        self.inner.scheduler.has_pending()
    }

    /// Pump ticks queued on the default manual driver. A no-op when a custom
    /// driver is installed.
    pub fn turn(&self) -> usize {
        self.inner.manual.pump()
    }

    /// Force an out-of-band flush, bypassing the tick driver. A no-op while
    /// a flush is already in progress.
    pub fn flush_now(&self) {
        self.inner.scheduler.flush(&self.inner);
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("strict", &self.inner.strict)
            .field("synchronous", &self.inner.synchronous.get())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::{
        cell::{Cell, RefCell},
        rc::Rc,
    };

    use crate::{
        error::{PipelineError, Reporter},
        store::{Plain, Value},
    };

    use super::*;

    #[derive(Default)]
    struct Collecting {
        seen: RefCell<Vec<String>>,
    }

    impl Reporter for Collecting {
        fn report(&self, error: &PipelineError) {
            self.seen.borrow_mut().push(format!("{}", error));
        }
    }

    #[test]
    fn one_flush_per_tick() {
        let rt = Runtime::new();
        let state = rt.observe(Plain::map(vec![
            ("a", Plain::from(0i64)),
            ("b", Plain::from(0i64)),
        ]));
        let map = state.as_map().unwrap().clone();

        let runs = Rc::new(Cell::new(0u32));
        let _w = rt.watch(
            "ab",
            {
                let map = map.clone();
                let runs = runs.clone();
                move || {
                    runs.set(runs.get() + 1);
                    let a = map.get("a").and_then(|v| v.as_f64()).unwrap_or(0.0);
                    let b = map.get("b").and_then(|v| v.as_f64()).unwrap_or(0.0);
                    Ok(Value::Number(a + b))
                }
            },
            |_, _| {},
            Default::default(),
        );

        // Many writes to both fields before the tick: exactly one re-run.
        map.set("a", 1i64);
        map.set("b", 2i64);
        map.set("a", 3i64);
        let ticks = rt.turn();
        assert_eq!(ticks, 1);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn flush_order_is_creation_order() {
        let rt = Runtime::new();
        let state = rt.observe(Plain::map(vec![("n", Plain::from(0i64))]));
        let map = state.as_map().unwrap().clone();

        let order = Rc::new(RefCell::new(Vec::new()));
        let _parent = rt.watch(
            "parent",
            {
                let map = map.clone();
                let order = order.clone();
                move || {
                    order.borrow_mut().push("parent");
                    Ok(map.get("n").unwrap_or(Value::Null))
                }
            },
            |_, _| {},
            Default::default(),
        );
        let _child = rt.watch(
            "child",
            {
                let map = map.clone();
                let order = order.clone();
                move || {
                    order.borrow_mut().push("child");
                    Ok(map.get("n").unwrap_or(Value::Null))
                }
            },
            |_, _| {},
            Default::default(),
        );

        order.borrow_mut().clear();
        map.set("n", 1i64);
        rt.turn();
        assert_eq!(order.borrow().as_slice(), &["parent", "child"]);
    }

    #[test]
    fn strict_mode_reports_uncommitted_writes() {
        let rt = Runtime::with_config(RuntimeConfig {
            strict: true,
            ..Default::default()
        });
        let reporter = Rc::new(Collecting::default());
        rt.set_reporter(reporter.clone());

        let state = rt.observe(Plain::map(vec![("n", Plain::from(0i64))]));
        let map = state.as_map().unwrap().clone();

        rt.commit(|| map.set("n", 1i64));
        assert!(reporter.seen.borrow().is_empty());

        map.set("n", 2i64);
        assert_eq!(reporter.seen.borrow().len(), 1);
        assert!(reporter.seen.borrow()[0].contains("outside of a commit"));
    }

    #[test]
    fn runaway_watcher_is_aborted_with_a_diagnostic() {
        let _ = env_logger::builder().is_test(true).try_init();
        let rt = Runtime::with_config(RuntimeConfig {
            max_flush_repeats: 5,
            ..Default::default()
        });
        let reporter = Rc::new(Collecting::default());
        rt.set_reporter(reporter.clone());

        let state = rt.observe(Plain::map(vec![("n", Plain::from(0i64))]));
        let map = state.as_map().unwrap().clone();

        let _w = rt.watch(
            "self-perpetuating",
            {
                let map = map.clone();
                move || {
                    let n = map.get("n").and_then(|v| v.as_f64()).unwrap_or(0.0);
                    // Writing the field it reads re-queues this watcher
                    // within the same flush, forever.
                    map.set("n", (n + 1.0) as i64);
                    Ok(Value::Number(n))
                }
            },
            |_, _| {},
            Default::default(),
        );

        map.set("n", 100i64);
        rt.turn();

        let seen = reporter.seen.borrow();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("infinite update loop"));
        assert!(seen[0].contains("self-perpetuating"));
    }

    #[test]
    fn after_flush_runs_on_an_idle_runtime() {
        let rt = Runtime::new();
        let done = Rc::new(Cell::new(false));
        rt.after_flush({
            let done = done.clone();
            move || done.set(true)
        });
        assert!(!done.get());
        rt.turn();
        assert!(done.get());
    }

    #[test]
    fn synchronous_mode_skips_batching() {
        let rt = Runtime::new();
        let state = rt.observe(Plain::map(vec![("n", Plain::from(0i64))]));
        let map = state.as_map().unwrap().clone();

        let runs = Rc::new(Cell::new(0u32));
        let _w = rt.watch(
            "n",
            {
                let map = map.clone();
                let runs = runs.clone();
                move || {
                    runs.set(runs.get() + 1);
                    Ok(map.get("n").unwrap_or(Value::Null))
                }
            },
            |_, _| {},
            Default::default(),
        );

        rt.set_synchronous(true);
        map.set("n", 1i64);
        map.set("n", 2i64);
        // No turn(): both writes ran the watcher in place.
        assert_eq!(runs.get(), 3);

        rt.set_synchronous(false);
        map.set("n", 3i64);
        assert_eq!(runs.get(), 3);
        rt.turn();
        assert_eq!(runs.get(), 4);
    }

    #[test]
    fn runtimes_are_isolated() {
        let rt_a = Runtime::new();
        let rt_b = Runtime::new();

        let state_a = rt_a.observe(Plain::map(vec![("n", Plain::from(0i64))]));
        let map_a = state_a.as_map().unwrap().clone();

        let runs = Rc::new(Cell::new(0u32));
        let _w = rt_a.watch(
            "n",
            {
                let map_a = map_a.clone();
                let runs = runs.clone();
                move || {
                    runs.set(runs.get() + 1);
                    Ok(map_a.get("n").unwrap_or(Value::Null))
                }
            },
            |_, _| {},
            Default::default(),
        );

        map_a.set("n", 1i64);
        // Pumping the other runtime does nothing for this one.
        assert_eq!(rt_b.turn(), 0);
        assert_eq!(runs.get(), 1);
        assert_eq!(rt_a.turn(), 1);
        assert_eq!(runs.get(), 2);
    }
}
