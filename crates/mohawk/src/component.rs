//! Component boundaries: local re-render without touching the rest of the
//! tree.
//!
//! A [`Component`] is a named render function behind its own render watcher.
//! When state the render reads changes, only this component re-renders and
//! re-patches its retained tree - the engine never recurses into a component
//! from the outside.
//!
//! A component placed into a virtual tree is matched across renders by
//! handle identity: create the component once, keep it, and clone it into
//! each tree you produce. A render that constructs a fresh `Component` every
//! time will tear down and remount the boundary on every parent re-render.
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use anyhow::Context;

use crate::{
    host::{Host as _, HostId},
    patch::Patcher,
    runtime::Runtime,
    store::Value,
    vnode::VNode,
    watcher::{Watcher, WatcherOptions},
};

type RenderFn = Box<dyn FnMut() -> anyhow::Result<VNode>>;

/// A mountable, locally re-rendering boundary. Cheap to clone; clones refer
/// to the same boundary.
#[derive(Clone)]
pub struct Component {
    inner: Rc<ComponentInner>,
}

struct ComponentInner {
    name: String,
    rt: Runtime,
    render: RefCell<RenderFn>,
    watcher: RefCell<Option<Watcher>>,
    watches: RefCell<Vec<Watcher>>,
    tree: RefCell<Option<VNode>>,
    patcher: RefCell<Option<Patcher>>,
    mount_point: Cell<Option<(HostId, Option<HostId>)>>,
    pending_hydrate: Cell<Option<HostId>>,
    pending_settled: RefCell<Option<Box<dyn FnMut()>>>,
    on_teardown: RefCell<Option<Box<dyn FnOnce()>>>,
    mounted: Cell<bool>,
}

impl Component {
    pub fn new(
        rt: &Runtime,
        name: impl Into<String>,
        render: impl FnMut() -> anyhow::Result<VNode> + 'static,
    ) -> Self {
        Component {
            inner: Rc::new(ComponentInner {
                name: name.into(),
                rt: rt.clone(),
                render: RefCell::new(Box::new(render)),
                watcher: RefCell::new(None),
                watches: RefCell::new(Vec::new()),
                tree: RefCell::new(None),
                patcher: RefCell::new(None),
                mount_point: Cell::new(None),
                pending_hydrate: Cell::new(None),
                pending_settled: RefCell::new(None),
                on_teardown: RefCell::new(None),
                mounted: Cell::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.get()
    }

    pub(crate) fn ptr_eq(&self, other: &Component) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The live host root of this component's tree, if mounted.
    pub fn root_host(&self) -> Option<HostId> {
        self.inner.tree.borrow().as_ref().and_then(|t| t.host())
    }

    /// The primary render watcher, if mounted.
    pub fn render_watcher(&self) -> Option<Watcher> {
        self.inner.watcher.borrow().clone()
    }

    /// Called after any flush in which this component re-rendered. The first
    /// mount never counts as an update, so this distinguishes "mounted" from
    /// "updated".
    pub fn on_settled(&self, cb: impl FnMut() + 'static) {
        match self.inner.watcher.borrow().as_ref() {
            Some(watcher) => watcher.inner.set_settled(Box::new(cb)),
            None => *self.inner.pending_settled.borrow_mut() = Some(Box::new(cb)),
        }
    }

    /// Called once when the boundary is retired, after its watchers are torn
    /// down and before its host subtree is detached.
    pub fn on_teardown(&self, cb: impl FnOnce() + 'static) {
        *self.inner.on_teardown.borrow_mut() = Some(Box::new(cb));
    }

    /// Register a user watch owned by this component; it is torn down with
    /// the component. Watches created after the mount get higher creation
    /// ids than the render watcher and therefore flush after it.
    pub fn watch(
        &self,
        label: impl Into<String>,
        expr: impl FnMut() -> anyhow::Result<Value> + 'static,
        on_change: impl FnMut(&Value, &Value) + 'static,
        options: WatcherOptions,
    ) -> Watcher {
        let watcher = self.inner.rt.watch(label, expr, on_change, options);
        self.inner.watches.borrow_mut().push(watcher.clone());
        watcher
    }

    /// Render and splice this component under `parent`, before `before`.
    /// Returns the host root of the rendered tree.
    pub fn mount(
        &self,
        patcher: &Patcher,
        parent: HostId,
        before: Option<HostId>,
    ) -> anyhow::Result<HostId> {
        anyhow::ensure!(
            self.inner.watcher.borrow().is_none(),
            "component '{}' is already mounted",
            self.inner.name
        );
        *self.inner.patcher.borrow_mut() = Some(patcher.clone());
        self.inner.mount_point.set(Some((parent, before)));
        self.mount_inner()
    }

    /// Render and adopt the existing host subtree at `existing` instead of
    /// creating nodes. On a shape mismatch the subtree is replaced with a
    /// fresh render.
    pub fn mount_hydrating(
        &self,
        patcher: &Patcher,
        existing: HostId,
    ) -> anyhow::Result<HostId> {
        anyhow::ensure!(
            self.inner.watcher.borrow().is_none(),
            "component '{}' is already mounted",
            self.inner.name
        );
        *self.inner.patcher.borrow_mut() = Some(patcher.clone());
        self.inner.pending_hydrate.set(Some(existing));
        let parent = patcher.host().parent_of(existing);
        self.inner
            .mount_point
            .set(parent.map(|p| (p, patcher.host().next_sibling_of(existing))));
        self.mount_inner()
    }

    fn mount_inner(&self) -> anyhow::Result<HostId> {
        let weak = Rc::downgrade(&self.inner);
        let expr = move || -> anyhow::Result<Value> {
            let Some(comp) = weak.upgrade() else {
                return Ok(Value::Null);
            };
            let new_tree = (comp.render.borrow_mut())()?;
            let patcher = comp
                .patcher
                .borrow()
                .clone()
                .context("component is not mounted")?;
            let old_tree = comp.tree.borrow().clone();
            match old_tree {
                Some(old) => {
                    patcher.patch(&old, &new_tree)?;
                }
                None => {
                    if let Some(existing) = comp.pending_hydrate.take() {
                        patcher.hydrate(existing, &new_tree)?;
                    } else {
                        let (parent, before) = comp
                            .mount_point
                            .get()
                            .context("component has no mount point")?;
                        patcher.mount(&new_tree, parent, before)?;
                    }
                }
            }
            *comp.tree.borrow_mut() = Some(new_tree);
            Ok(Value::Null)
        };

        let watcher = self.inner.rt.watch_render(self.inner.name.clone(), expr);
        if let Some(cb) = self.inner.pending_settled.borrow_mut().take() {
            watcher.inner.set_settled(cb);
        }
        match self.root_host() {
            Some(root) => {
                *self.inner.watcher.borrow_mut() = Some(watcher);
                self.inner.mounted.set(true);
                Ok(root)
            }
            None => {
                // The first render failed (already reported); leave the
                // component unmounted rather than half-alive.
                watcher.teardown();
                self.inner.patcher.borrow_mut().take();
                anyhow::bail!("component '{}' produced no host root", self.inner.name)
            }
        }
    }

    /// Retire watchers and hooks, children-first, without detaching host
    /// nodes. The caller detaches the subtree root afterwards.
    pub(crate) fn retire(&self, patcher: &Patcher) {
        let tree = self.inner.tree.borrow_mut().take();
        if let Some(tree) = tree {
            // Nested boundaries release their own resources first.
            patcher.destroy_hooks(&tree);
        }
        for watcher in self.inner.watches.borrow_mut().drain(..) {
            watcher.teardown();
        }
        if let Some(watcher) = self.inner.watcher.borrow_mut().take() {
            watcher.teardown();
        }
        if let Some(cb) = self.inner.on_teardown.borrow_mut().take() {
            cb();
        }
        self.inner.mounted.set(false);
        self.inner.patcher.borrow_mut().take();
        self.inner.mount_point.set(None);
    }

    /// Tear the component down and detach its host subtree. Subscribers are
    /// retired strictly before any host node is removed.
    pub fn unmount(&self) -> anyhow::Result<()> {
        let patcher = self
            .inner
            .patcher
            .borrow()
            .clone()
            .context("component is not mounted")?;
        let root = self
            .root_host()
            .context("component has no host root")?;
        let parent = patcher.host().parent_of(root);
        self.retire(&patcher);
        if let Some(parent) = parent {
            patcher.host().remove_child(parent, root);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.inner.name)
            .field("mounted", &self.inner.mounted.get())
            .finish()
    }
}
