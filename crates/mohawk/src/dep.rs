//! Per-cell registries of interested watchers.
//!
//! Every observed storage location owns one [`Dep`]. Reading the location
//! while a watcher is evaluating registers that watcher with the dep; writing
//! the location notifies every registered watcher. Registration is idempotent
//! within one evaluation, and watchers prune their own membership every time
//! they re-evaluate.
use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use crate::{runtime::RuntimeInner, watcher::WatcherInner};

pub(crate) type DepId = u64;

/// A registry of the watchers that read one observed storage cell.
///
/// `Dep` is a cheap-to-clone handle; clones refer to the same registry.
#[derive(Clone)]
pub struct Dep {
    inner: Rc<DepInner>,
}

struct DepInner {
    id: DepId,
    rt: Weak<RuntimeInner>,
    // Insertion order, no duplicates. Weak, so a torn down watcher does not
    // keep its registrations alive.
    subs: RefCell<Vec<Weak<WatcherInner>>>,
}

impl Dep {
    pub(crate) fn new(rt: &Weak<RuntimeInner>) -> Self {
        let id = rt
            .upgrade()
            .map(|rt| rt.next_dep_id())
            .unwrap_or(u64::MAX);
        Dep {
            inner: Rc::new(DepInner {
                id,
                rt: rt.clone(),
                subs: RefCell::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn id(&self) -> DepId {
        self.inner.id
    }

    /// Register the currently evaluating watcher, if any, as a listener.
    ///
    /// Reading the same cell many times within one evaluation registers the
    /// watcher once.
    pub fn depend(&self) {
        let Some(rt) = self.inner.rt.upgrade() else {
            return;
        };
        if let Some(watcher) = rt.active_watcher() {
            WatcherInner::add_dep(&watcher, self.clone());
        }
    }

    /// Notify every registered watcher that the cell changed.
    ///
    /// The listener list is snapshotted first, so listeners that add or
    /// remove themselves mid-notification are tolerated.
    pub fn notify(&self) {
        let subs: Vec<Rc<WatcherInner>> = self
            .inner
            .subs
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for watcher in subs {
            WatcherInner::update(&watcher);
        }
    }

    /// Whether any live watcher is registered.
    pub fn has_subscribers(&self) -> bool {
        self.inner.subs.borrow().iter().any(|w| w.strong_count() > 0)
    }

    pub(crate) fn add_sub(&self, watcher: &Rc<WatcherInner>) {
        self.inner.subs.borrow_mut().push(Rc::downgrade(watcher));
    }

    pub(crate) fn remove_sub(&self, watcher_id: u64) {
        self.inner
            .subs
            .borrow_mut()
            .retain(|w| match w.upgrade() {
                Some(w) => w.id() != watcher_id,
                None => false,
            });
    }
}

impl std::fmt::Debug for Dep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.inner.id)
            .field("subs", &self.inner.subs.borrow().len())
            .finish()
    }
}
