//! The de-duplicating, ordered, deferred flush queue.
//!
//! Dirty watchers are enqueued at most once and drained in ascending
//! creation-id order, which transitively yields parent-before-child and
//! watch-registration-order semantics. One flush is scheduled per tick no
//! matter how many watchers were enqueued before it runs.
use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    rc::Rc,
};

use crate::{
    error::PipelineError,
    runtime::RuntimeInner,
    watcher::{WatcherId, WatcherInner},
};

pub(crate) struct Scheduler {
    queue: RefCell<Vec<Rc<WatcherInner>>>,
    queued: RefCell<HashSet<WatcherId>>,
    flushing: Cell<bool>,
    index: Cell<usize>,
    tick_scheduled: Cell<bool>,
    // id -> times the id re-appeared within the current flush.
    circular: RefCell<HashMap<WatcherId, usize>>,
    after_flush: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Scheduler {
            queue: RefCell::new(Vec::new()),
            queued: RefCell::new(HashSet::new()),
            flushing: Cell::new(false),
            index: Cell::new(0),
            tick_scheduled: Cell::new(false),
            circular: RefCell::new(HashMap::new()),
            after_flush: RefCell::new(Vec::new()),
        }
    }

    /// Queue a watcher for the next flush. A watcher already queued is left
    /// where it is. Mid-flush, the watcher is inserted in id order among the
    /// entries not yet processed, so it still runs in this flush; an id the
    /// cursor already passed goes immediately next.
    pub(crate) fn enqueue(&self, rt: &RuntimeInner, watcher: Rc<WatcherInner>) {
        let id = watcher.id();
        if self.queued.borrow().contains(&id) {
            return;
        }
        self.queued.borrow_mut().insert(id);
        if !self.flushing.get() {
            self.queue.borrow_mut().push(watcher);
        } else {
            let mut queue = self.queue.borrow_mut();
            let index = self.index.get();
            let mut at = queue.len();
            while at > index + 1 && queue[at - 1].id() > id {
                at -= 1;
            }
            queue.insert(at, watcher);
        }
        self.request_tick(rt);
    }

    /// Register a callback to run after the next flush completes. Schedules
    /// a tick even when nothing is queued.
    pub(crate) fn after(&self, rt: &RuntimeInner, cb: Box<dyn FnOnce()>) {
        self.after_flush.borrow_mut().push(cb);
        self.request_tick(rt);
    }

    fn request_tick(&self, rt: &RuntimeInner) {
        if !self.tick_scheduled.get() {
            self.tick_scheduled.set(true);
            rt.schedule_tick();
        }
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.tick_scheduled.get() || !self.queue.borrow().is_empty()
    }

    /// Drain the queue in creation order, then run the settled pass and any
    /// after-flush callbacks.
    pub(crate) fn flush(&self, rt: &RuntimeInner) {
        if self.flushing.get() {
            return;
        }
        self.flushing.set(true);
        self.queue.borrow_mut().sort_by_key(|w| w.id());

        log::trace!("flushing {} queued watcher(s)", self.queue.borrow().len());
        let mut ran: Vec<(Rc<WatcherInner>, u64)> = Vec::new();
        loop {
            let next = {
                let queue = self.queue.borrow();
                queue.get(self.index.get()).cloned()
            };
            let Some(watcher) = next else {
                break;
            };
            let id = watcher.id();
            // Cleared before the run so the watcher may re-queue itself.
            self.queued.borrow_mut().remove(&id);
            let prior_runs = watcher.runs();
            WatcherInner::run(&watcher);

            if self.queued.borrow().contains(&id) {
                // The watcher dirtied itself during its own run.
                let repeats = {
                    let mut circular = self.circular.borrow_mut();
                    let entry = circular.entry(id).or_insert(0);
                    *entry += 1;
                    *entry
                };
                if repeats > rt.max_flush_repeats() {
                    rt.report(&PipelineError::RunawayFlush {
                        label: watcher.label().to_string(),
                        render: watcher.is_render(),
                        repeats,
                    });
                    // Abort this entry only; the rest of the queue drains.
                    self.queued.borrow_mut().remove(&id);
                    let mut queue = self.queue.borrow_mut();
                    let index = self.index.get();
                    if let Some(at) = queue
                        .iter()
                        .skip(index + 1)
                        .position(|w| w.id() == id)
                    {
                        queue.remove(index + 1 + at);
                    }
                }
            }
            ran.push((watcher, prior_runs));
            self.index.set(self.index.get() + 1);
        }

        // Reset before any callback runs, so work scheduled from a callback
        // starts a fresh tick.
        self.queue.borrow_mut().clear();
        self.queued.borrow_mut().clear();
        self.circular.borrow_mut().clear();
        self.index.set(0);
        self.flushing.set(false);
        self.tick_scheduled.set(false);

        // Settled pass: only primary render watchers that had completed a
        // run before this flush, so a first mount never counts as an update.
        for (watcher, prior_runs) in ran.iter().rev() {
            if watcher.is_render() && *prior_runs >= 1 {
                watcher.settle();
            }
        }

        let callbacks: Vec<Box<dyn FnOnce()>> = self.after_flush.borrow_mut().drain(..).collect();
        for cb in callbacks {
            cb();
        }
    }
}
