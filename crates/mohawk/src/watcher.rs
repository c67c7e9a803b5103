//! Re-runnable computations with recorded dependency sets.
//!
//! A [`Watcher`] wraps one expression - a render, a computed value, or a user
//! watch. Evaluating the expression records every observed cell it reads;
//! when any of those cells changes the watcher is marked dirty and re-run,
//! normally through the scheduler, immediately when the watcher (or the
//! runtime) is synchronous, or on demand when the watcher is lazy.
//!
//! Dependency sets are double-buffered: the deps confirmed by the last run
//! and the deps discovered by the current run are kept apart, so a watcher
//! whose expression stops reading a cell is unsubscribed from it at the end
//! of the run. That is what keeps a conditional expression from being
//! re-triggered by branches it no longer reads.
use std::{
    cell::{Cell, RefCell},
    collections::HashSet,
    rc::{Rc, Weak},
};

use crate::{
    dep::{Dep, DepId},
    error::PipelineError,
    runtime::RuntimeInner,
    store::Value,
};

pub(crate) type WatcherId = u64;

type Expr = Box<dyn FnMut() -> anyhow::Result<Value>>;
type OnChange = Box<dyn FnMut(&Value, &Value)>;

/// Behavior flags for a watcher.
#[derive(Clone, Copy, Debug, Default)]
pub struct WatcherOptions {
    /// Compute the value only when it is read, not when dependencies change.
    pub lazy: bool,
    /// Re-run immediately on notification instead of going through the
    /// scheduler.
    pub sync: bool,
    /// After each evaluation, recursively read the whole result so the
    /// watcher depends on every nested field, and always fire the callback.
    pub deep: bool,
}

impl WatcherOptions {
    pub fn lazy() -> Self {
        WatcherOptions {
            lazy: true,
            ..Default::default()
        }
    }

    pub fn sync() -> Self {
        WatcherOptions {
            sync: true,
            ..Default::default()
        }
    }

    pub fn deep() -> Self {
        WatcherOptions {
            deep: true,
            ..Default::default()
        }
    }
}

/// A handle to one re-runnable computation.
///
/// Cheap to clone; clones refer to the same computation. Deps hold the
/// computation weakly, so it lives only as long as some handle does; call
/// [`Watcher::teardown`] to unsubscribe deterministically instead of relying
/// on the last handle being dropped.
#[derive(Clone)]
pub struct Watcher {
    pub(crate) inner: Rc<WatcherInner>,
}

pub(crate) struct WatcherInner {
    id: WatcherId,
    rt: Weak<RuntimeInner>,
    label: String,
    expr: RefCell<Expr>,
    on_change: RefCell<Option<OnChange>>,
    value: RefCell<Value>,
    deps: RefCell<Vec<Dep>>,
    dep_ids: RefCell<HashSet<DepId>>,
    new_deps: RefCell<Vec<Dep>>,
    new_dep_ids: RefCell<HashSet<DepId>>,
    lazy: bool,
    sync: bool,
    deep: bool,
    dirty: Cell<bool>,
    active: Cell<bool>,
    render: bool,
    runs: Cell<u64>,
    settled: RefCell<Option<Box<dyn FnMut()>>>,
}

impl WatcherInner {
    pub(crate) fn id(&self) -> WatcherId {
        self.id
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn is_render(&self) -> bool {
        self.render
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.get()
    }

    pub(crate) fn runs(&self) -> u64 {
        self.runs.get()
    }

    pub(crate) fn set_settled(&self, cb: Box<dyn FnMut()>) {
        *self.settled.borrow_mut() = Some(cb);
    }

    pub(crate) fn settle(&self) {
        if !self.active.get() {
            return;
        }
        if let Some(cb) = self.settled.borrow_mut().as_mut() {
            cb();
        }
    }

    /// Evaluate the expression with this watcher on the active stack,
    /// then reconcile the dependency sets.
    ///
    /// Returns `None` when the expression failed; the failure has been
    /// reported and the previous value stands.
    pub(crate) fn get(this: &Rc<Self>) -> Option<Value> {
        let rt = this.rt.upgrade()?;
        rt.push_active(this.clone());
        let result = (this.expr.borrow_mut())();
        let value = match result {
            Ok(value) => {
                if this.deep {
                    traverse(&value);
                }
                Some(value)
            }
            Err(source) => {
                rt.report(&PipelineError::Evaluation {
                    label: this.label.clone(),
                    source,
                });
                None
            }
        };
        rt.pop_active();
        this.cleanup_deps();
        this.runs.set(this.runs.get() + 1);
        value
    }

    /// Register `dep` as a dependency discovered by the current run.
    /// Idempotent within one evaluation.
    pub(crate) fn add_dep(this: &Rc<Self>, dep: Dep) {
        let id = dep.id();
        if this.new_dep_ids.borrow().contains(&id) {
            return;
        }
        this.new_dep_ids.borrow_mut().insert(id);
        let known = this.dep_ids.borrow().contains(&id);
        this.new_deps.borrow_mut().push(dep.clone());
        if !known {
            dep.add_sub(this);
        }
    }

    // Unsubscribe from deps the last run confirmed but this run did not see,
    // then promote this run's set.
    fn cleanup_deps(&self) {
        {
            let new_ids = self.new_dep_ids.borrow();
            for dep in self.deps.borrow().iter() {
                if !new_ids.contains(&dep.id()) {
                    dep.remove_sub(self.id);
                }
            }
        }
        std::mem::swap(
            &mut *self.deps.borrow_mut(),
            &mut *self.new_deps.borrow_mut(),
        );
        std::mem::swap(
            &mut *self.dep_ids.borrow_mut(),
            &mut *self.new_dep_ids.borrow_mut(),
        );
        self.new_deps.borrow_mut().clear();
        self.new_dep_ids.borrow_mut().clear();
    }

    /// Mark dirty. Lazy watchers flag themselves, synchronous watchers run
    /// in place, everything else is handed to the scheduler.
    pub(crate) fn update(this: &Rc<Self>) {
        if !this.active.get() {
            return;
        }
        if this.lazy {
            this.dirty.set(true);
            return;
        }
        let Some(rt) = this.rt.upgrade() else {
            return;
        };
        if this.sync || rt.synchronous() {
            Self::run(this);
        } else {
            rt.enqueue(this.clone());
        }
    }

    /// Re-evaluate and fire the change callback when the result may differ.
    ///
    /// A result that is a container handle is always treated as
    /// possibly-changed, as is any result of a deep watcher.
    pub(crate) fn run(this: &Rc<Self>) {
        if !this.active.get() {
            return;
        }
        let old = this.value.borrow().clone();
        if let Some(new) = Self::get(this) {
            let changed = !new.same_identity(&old) || new.is_container() || this.deep;
            *this.value.borrow_mut() = new.clone();
            if changed {
                if let Some(cb) = this.on_change.borrow_mut().as_mut() {
                    cb(&new, &old);
                }
            }
        }
    }

    /// Re-register every confirmed dep on the currently active watcher.
    /// This is how a computed value's dependencies propagate to its readers.
    pub(crate) fn depend(&self) {
        for dep in self.deps.borrow().iter() {
            dep.depend();
        }
    }
}

impl Watcher {
    pub(crate) fn create(
        rt: &Rc<RuntimeInner>,
        label: impl Into<String>,
        expr: Expr,
        on_change: Option<OnChange>,
        options: WatcherOptions,
        render: bool,
    ) -> Watcher {
        let inner = Rc::new(WatcherInner {
            id: rt.next_watcher_id(),
            rt: Rc::downgrade(rt),
            label: label.into(),
            expr: RefCell::new(expr),
            on_change: RefCell::new(on_change),
            value: RefCell::new(Value::Null),
            deps: RefCell::new(Vec::new()),
            dep_ids: RefCell::new(HashSet::new()),
            new_deps: RefCell::new(Vec::new()),
            new_dep_ids: RefCell::new(HashSet::new()),
            lazy: options.lazy,
            sync: options.sync,
            deep: options.deep,
            dirty: Cell::new(options.lazy),
            active: Cell::new(true),
            render,
            runs: Cell::new(0),
            settled: RefCell::new(None),
        });
        if !options.lazy {
            if let Some(value) = WatcherInner::get(&inner) {
                *inner.value.borrow_mut() = value;
            }
        }
        Watcher { inner }
    }

    /// The label given at creation, used in diagnostics.
    pub fn label(&self) -> &str {
        self.inner.label()
    }

    /// Whether the watcher is still subscribed anywhere.
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// The current value, recomputing first when the watcher is lazy and
    /// dirty. Reading a lazy watcher from inside another watcher's
    /// evaluation forwards all of its dependencies to the reader.
    pub fn value(&self) -> Value {
        if self.inner.lazy && self.inner.dirty.get() {
            if let Some(value) = WatcherInner::get(&self.inner) {
                *self.inner.value.borrow_mut() = value;
            }
            self.inner.dirty.set(false);
        }
        self.inner.depend();
        let value = self.inner.value.borrow().clone();
        value
    }

    /// Force an immediate re-evaluation, bypassing the scheduler. The change
    /// callback fires as it would in a flush.
    pub fn evaluate_now(&self) {
        WatcherInner::run(&self.inner);
    }

    /// Unsubscribe from every dep and drop the expression and callbacks.
    /// Idempotent, and safe to call while the watcher sits in a flush queue.
    pub fn teardown(&self) {
        let inner = &self.inner;
        if !inner.active.get() {
            return;
        }
        inner.active.set(false);
        for dep in inner.deps.borrow().iter() {
            dep.remove_sub(inner.id);
        }
        inner.deps.borrow_mut().clear();
        inner.dep_ids.borrow_mut().clear();
        *inner.expr.borrow_mut() = Box::new(|| Ok(Value::Null));
        inner.on_change.borrow_mut().take();
        inner.settled.borrow_mut().take();
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("active", &self.inner.active.get())
            .finish()
    }
}

// Touch every nested field of the value so the active watcher registers with
// the whole subtree. The seen set guards against aliased and cyclic graphs.
fn traverse(value: &Value) {
    let mut seen: HashSet<usize> = HashSet::new();
    traverse_value(value, &mut seen);
}

fn traverse_value(value: &Value, seen: &mut HashSet<usize>) {
    match value {
        Value::Map(map) => {
            if !seen.insert(Rc::as_ptr(&map.inner) as usize) {
                return;
            }
            for key in map.keys() {
                if let Some(v) = map.get(&key) {
                    traverse_value(&v, seen);
                }
            }
        }
        Value::List(list) => {
            if !seen.insert(Rc::as_ptr(&list.inner) as usize) {
                return;
            }
            for i in 0..list.len() {
                if let Some(v) = list.get(i) {
                    traverse_value(&v, seen);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod test {
    use std::{cell::Cell, rc::Rc};

    use crate::{
        runtime::Runtime,
        store::{Plain, Value},
    };

    use super::WatcherOptions;

    #[test]
    fn stale_deps_are_pruned() {
        let rt = Runtime::new();
        let state = rt.observe(Plain::map(vec![
            ("use_a", Plain::Bool(true)),
            ("a", Plain::from(1i64)),
            ("b", Plain::from(2i64)),
        ]));
        let map = state.as_map().unwrap().clone();

        let runs = Rc::new(Cell::new(0u32));
        let _w = rt.watch(
            "conditional",
            {
                let map = map.clone();
                let runs = runs.clone();
                move || {
                    runs.set(runs.get() + 1);
                    let v = if map.get("use_a").unwrap().as_bool() == Some(true) {
                        map.get("a")
                    } else {
                        map.get("b")
                    };
                    Ok(v.unwrap_or(Value::Null))
                }
            },
            |_, _| {},
            Default::default(),
        );
        assert_eq!(runs.get(), 1);

        // Switch the branch: the watcher now reads `b` instead of `a`.
        map.set("use_a", false);
        rt.turn();
        assert_eq!(runs.get(), 2);

        // Writing the abandoned branch must not re-trigger.
        map.set("a", 10i64);
        rt.turn();
        assert_eq!(runs.get(), 2);

        map.set("b", 20i64);
        rt.turn();
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn lazy_watcher_recomputes_on_read() {
        let rt = Runtime::new();
        let state = rt.observe(Plain::map(vec![("n", Plain::from(2i64))]));
        let map = state.as_map().unwrap().clone();

        let evals = Rc::new(Cell::new(0u32));
        let doubled = rt.computed("doubled", {
            let map = map.clone();
            let evals = evals.clone();
            move || {
                evals.set(evals.get() + 1);
                let n = map.get("n").and_then(|v| v.as_f64()).unwrap_or(0.0);
                Ok(Value::Number(n * 2.0))
            }
        });
        // Lazy: not evaluated at creation.
        assert_eq!(evals.get(), 0);
        assert_eq!(doubled.value().as_f64(), Some(4.0));
        assert_eq!(doubled.value().as_f64(), Some(4.0));
        // Memoized between changes.
        assert_eq!(evals.get(), 1);

        map.set("n", 5i64);
        assert_eq!(doubled.value().as_f64(), Some(10.0));
        assert_eq!(evals.get(), 2);
    }

    #[test]
    fn computed_read_through_tracks_transitively() {
        let rt = Runtime::new();
        let state = rt.observe(Plain::map(vec![("n", Plain::from(1i64))]));
        let map = state.as_map().unwrap().clone();

        let doubled = rt.computed("doubled", {
            let map = map.clone();
            move || {
                let n = map.get("n").and_then(|v| v.as_f64()).unwrap_or(0.0);
                Ok(Value::Number(n * 2.0))
            }
        });

        let seen = Rc::new(Cell::new(0.0f64));
        let _w = rt.watch(
            "reader",
            {
                let doubled = doubled.clone();
                move || Ok(doubled.value())
            },
            {
                let seen = seen.clone();
                move |new: &Value, _: &Value| {
                    seen.set(new.as_f64().unwrap_or(f64::NAN));
                }
            },
            Default::default(),
        );

        map.set("n", 3i64);
        rt.turn();
        assert_eq!(seen.get(), 6.0);
    }

    #[test]
    fn sync_watcher_runs_without_a_flush() {
        let rt = Runtime::new();
        let state = rt.observe(Plain::map(vec![("n", Plain::from(0i64))]));
        let map = state.as_map().unwrap().clone();

        let seen = Rc::new(Cell::new(0.0f64));
        let _w = rt.watch(
            "sync",
            {
                let map = map.clone();
                move || Ok(map.get("n").unwrap_or(Value::Null))
            },
            {
                let seen = seen.clone();
                move |new: &Value, _: &Value| seen.set(new.as_f64().unwrap_or(f64::NAN))
            },
            WatcherOptions::sync(),
        );
        map.set("n", 7i64);
        // No turn() - the callback already ran.
        assert_eq!(seen.get(), 7.0);
    }

    #[test]
    fn failed_expression_retains_previous_value() {
        let rt = Runtime::new();
        let state = rt.observe(Plain::map(vec![("n", Plain::from(1i64))]));
        let map = state.as_map().unwrap().clone();
        let fail = Rc::new(Cell::new(false));

        let w = rt.watch(
            "flaky",
            {
                let map = map.clone();
                let fail = fail.clone();
                move || {
                    // Read first so the dependency stays registered even on
                    // the failing path.
                    let n = map.get("n").unwrap_or(Value::Null);
                    if fail.get() {
                        anyhow::bail!("broken expression");
                    }
                    Ok(n)
                }
            },
            |_, _| {},
            Default::default(),
        );
        assert_eq!(w.value().as_f64(), Some(1.0));

        fail.set(true);
        map.set("n", 2i64);
        rt.turn();
        // The failure was contained; the previous value stands.
        assert_eq!(w.value().as_f64(), Some(1.0));

        fail.set(false);
        map.set("n", 3i64);
        rt.turn();
        assert_eq!(w.value().as_f64(), Some(3.0));
    }

    #[test]
    fn deep_watcher_sees_nested_writes() {
        let rt = Runtime::new();
        let state = rt.observe(Plain::map(vec![(
            "tree",
            Plain::map(vec![("leaf", Plain::from(1i64))]),
        )]));
        let map = state.as_map().unwrap().clone();

        let fired = Rc::new(Cell::new(0u32));
        let _w = rt.watch(
            "deep",
            {
                let map = map.clone();
                move || Ok(map.get("tree").unwrap_or(Value::Null))
            },
            {
                let fired = fired.clone();
                move |_: &Value, _: &Value| fired.set(fired.get() + 1)
            },
            WatcherOptions::deep(),
        );

        let tree = map.get("tree").unwrap().as_map().unwrap().clone();
        tree.set("leaf", 2i64);
        rt.turn();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn teardown_unsubscribes() {
        let rt = Runtime::new();
        let state = rt.observe(Plain::map(vec![("n", Plain::from(0i64))]));
        let map = state.as_map().unwrap().clone();

        let runs = Rc::new(Cell::new(0u32));
        let w = rt.watch(
            "n-reader",
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
        assert_eq!(runs.get(), 1);

        w.teardown();
        map.set("n", 1i64);
        rt.turn();
        assert_eq!(runs.get(), 1);
        assert!(!w.is_active());
        // Idempotent.
        w.teardown();
    }
}
