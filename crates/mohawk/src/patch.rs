//! The diff/patch engine: reconcile two virtual trees into host operations.
//!
//! Given the previous tree and a freshly rendered one, the engine classifies
//! each pair of nodes at the same structural position as *same-node*
//! (reusable) or *different-node* (replace wholesale), diffs element data
//! through the installed [`Module`]s, and reconciles child lists with a
//! keyed four-pointer walk. Component boundaries are never recursed into -
//! each component's own render watcher keeps its subtree current, which is
//! what keeps re-render cost local.
//!
//! The engine is strict in its Rust API but lenient towards the host: in
//! normal operation it trusts its own same-node classification and never
//! re-validates host state. Structural checks happen only in diagnostics
//! mode, during hydration, where a mismatch is reported and answered with a
//! full client-side render.
use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
};

use anyhow::Context;

use crate::{
    error::{LogReporter, PipelineError, Reporter},
    host::{Host, HostId, HostKind},
    module::{default_modules, Module},
    vnode::{VElement, VNode, VNodeKind},
};

/// The patch engine. Cheap to clone; clones share the host, module set and
/// configuration.
#[derive(Clone)]
pub struct Patcher {
    inner: Rc<PatcherInner>,
}

struct PatcherInner {
    host: Rc<dyn Host>,
    modules: Vec<Box<dyn Module>>,
    diagnostics: Cell<bool>,
    reporter: RefCell<Rc<dyn Reporter>>,
}

impl Patcher {
    /// An engine over `host` with the default module set.
    pub fn new(host: Rc<dyn Host>) -> Self {
        Patcher::with_modules(host, default_modules())
    }

    /// An engine over `host` with a custom module set.
    pub fn with_modules(host: Rc<dyn Host>, modules: Vec<Box<dyn Module>>) -> Self {
        Patcher {
            inner: Rc::new(PatcherInner {
                host,
                modules,
                diagnostics: Cell::new(cfg!(debug_assertions)),
                reporter: RefCell::new(Rc::new(LogReporter)),
            }),
        }
    }

    /// Toggle hydration shape checking.
    pub fn set_diagnostics(&self, on: bool) {
        self.inner.diagnostics.set(on);
    }

    pub fn set_reporter(&self, reporter: Rc<dyn Reporter>) {
        *self.inner.reporter.borrow_mut() = reporter;
    }

    /// The escape hatch: the host this engine drives.
    pub fn host(&self) -> &Rc<dyn Host> {
        &self.inner.host
    }

    /// The one-call entry point. With a previous tree, diff against it; with
    /// none, either hydrate onto `anchor` or mount fresh under it. Returns
    /// the host root of the new tree.
    pub fn apply(
        &self,
        anchor: HostId,
        old: Option<&VNode>,
        new: &VNode,
        hydrate_existing: bool,
    ) -> anyhow::Result<HostId> {
        match old {
            Some(old) => self.patch(old, new),
            None if hydrate_existing => self.hydrate(anchor, new),
            None => self.mount(new, anchor, None),
        }
    }

    /// Create the tree fresh and splice it under `parent`, before
    /// `before` (append when `None`).
    pub fn mount(
        &self,
        vnode: &VNode,
        parent: HostId,
        before: Option<HostId>,
    ) -> anyhow::Result<HostId> {
        self.create_node(vnode, parent, before)
    }

    /// Reconcile `new` against `old`, reusing host nodes wherever the trees
    /// classify as same-node. A different-node root replaces the whole host
    /// subtree in place.
    pub fn patch(&self, old: &VNode, new: &VNode) -> anyhow::Result<HostId> {
        if self.same_node(old, new) {
            self.patch_node(old, new)?;
            return new.host().context("patched tree has no host root");
        }
        let old_id = old.host().context("previous tree was never mounted")?;
        let parent = self
            .inner
            .host
            .parent_of(old_id)
            .context("cannot replace a detached root")?;
        let after = self.inner.host.next_sibling_of(old_id);
        let id = self.create_node(new, parent, after)?;
        self.remove_node(parent, old);
        Ok(id)
    }

    /// Tear down the tree's hooks bottom-up, then detach its host root.
    pub fn remove(&self, vnode: &VNode) -> anyhow::Result<()> {
        let id = vnode.host().context("tree was never mounted")?;
        let parent = self
            .inner
            .host
            .parent_of(id)
            .context("tree root is already detached")?;
        self.remove_node(parent, vnode);
        Ok(())
    }

    /// Adopt an existing host subtree as the rendering of `vnode`.
    ///
    /// In diagnostics mode every adopted node is shape-checked against the
    /// virtual node; on a mismatch the mismatch is reported, hydration is
    /// abandoned and a fresh render replaces the host subtree.
    pub fn hydrate(&self, existing: HostId, vnode: &VNode) -> anyhow::Result<HostId> {
        if self.adopt(existing, vnode) {
            return vnode.host().context("hydrated tree has no host root");
        }
        let parent = self
            .inner
            .host
            .parent_of(existing)
            .context("cannot re-render a detached hydration root")?;
        let after = self.inner.host.next_sibling_of(existing);
        let id = self.create_node(vnode, parent, after)?;
        self.inner.host.remove_child(parent, existing);
        Ok(id)
    }

    pub(crate) fn report(&self, error: &PipelineError) {
        let reporter = self.inner.reporter.borrow().clone();
        reporter.report(error);
    }

    // Reuse `b`'s host node for `a`? Tag, comment flag, data presence, and -
    // for inputs - the input type must all agree, as must keys.
    fn same_node(&self, a: &VNode, b: &VNode) -> bool {
        if a.key() != b.key() {
            return false;
        }
        match (a.kind(), b.kind()) {
            (VNodeKind::Element(ae), VNodeKind::Element(be)) => {
                ae.tag == be.tag
                    && ae.is_data_empty() == be.is_data_empty()
                    && same_input_type(ae, be)
            }
            (VNodeKind::Text(_), VNodeKind::Text(_)) => true,
            (VNodeKind::Comment(_), VNodeKind::Comment(_)) => true,
            (VNodeKind::Component(ca), VNodeKind::Component(cb)) => ca.ptr_eq(cb),
            _ => false,
        }
    }

    fn create_node(
        &self,
        vnode: &VNode,
        parent: HostId,
        before: Option<HostId>,
    ) -> anyhow::Result<HostId> {
        let host = self.inner.host.as_ref();
        match vnode.kind() {
            VNodeKind::Element(el) => {
                let id = host.create_element(&el.tag);
                vnode.set_hosted(Some(id));
                for module in &self.inner.modules {
                    module.create(host, id, el);
                }
                for child in &el.children {
                    self.create_node(child, id, None)?;
                }
                host.insert_before(parent, id, before);
                Ok(id)
            }
            VNodeKind::Text(text) => {
                let id = host.create_text(text);
                vnode.set_hosted(Some(id));
                host.insert_before(parent, id, before);
                Ok(id)
            }
            VNodeKind::Comment(text) => {
                let id = host.create_comment(text);
                vnode.set_hosted(Some(id));
                host.insert_before(parent, id, before);
                Ok(id)
            }
            VNodeKind::Component(component) => component.mount(self, parent, before),
        }
    }

    // `old` and `new` are same-node: reuse the host node, diff data through
    // the modules, then reconcile children.
    fn patch_node(&self, old: &VNode, new: &VNode) -> anyhow::Result<()> {
        let host = self.inner.host.as_ref();
        let id = old.host().context("old node was never mounted")?;
        new.set_hosted(Some(id));
        match (old.kind(), new.kind()) {
            (VNodeKind::Text(a), VNodeKind::Text(b))
            | (VNodeKind::Comment(a), VNodeKind::Comment(b)) => {
                if a != b {
                    host.set_text(id, b);
                }
            }
            (VNodeKind::Element(oe), VNodeKind::Element(ne)) => {
                for module in &self.inner.modules {
                    module.update(host, id, oe, ne);
                }
                match (oe.children.is_empty(), ne.children.is_empty()) {
                    (false, false) => self.update_children(id, &oe.children, &ne.children)?,
                    (true, false) => {
                        for child in &ne.children {
                            self.create_node(child, id, None)?;
                        }
                    }
                    (false, true) => {
                        for child in &oe.children {
                            self.remove_node(id, child);
                        }
                    }
                    (true, true) => {}
                }
            }
            (VNodeKind::Component(_), VNodeKind::Component(_)) => {
                // Same boundary: its own watcher keeps the subtree current,
                // and VNode::host already resolves the live root.
            }
            _ => unreachable!("patch_node requires same-node classification"),
        }
        Ok(())
    }

    // The keyed four-pointer children walk.
    fn update_children(
        &self,
        parent: HostId,
        old_ch: &[VNode],
        new_ch: &[VNode],
    ) -> anyhow::Result<()> {
        let host = self.inner.host.as_ref();
        // Moved entries are nulled out of this scratch copy so later
        // pointer probes skip them.
        let mut old: Vec<Option<VNode>> = old_ch.iter().cloned().map(Some).collect();
        let mut old_start: isize = 0;
        let mut old_end: isize = old.len() as isize - 1;
        let mut new_start: isize = 0;
        let mut new_end: isize = new_ch.len() as isize - 1;
        // key -> index in `old`, built at most once per call, over the range
        // the pointers held at that moment.
        let mut key_map: Option<HashMap<String, isize>> = None;

        while old_start <= old_end && new_start <= new_end {
            if old[old_start as usize].is_none() {
                old_start += 1;
                continue;
            }
            if old[old_end as usize].is_none() {
                old_end -= 1;
                continue;
            }
            let os_node = old[old_start as usize].clone().expect("checked above");
            let oe_node = old[old_end as usize].clone().expect("checked above");
            let ns_node = &new_ch[new_start as usize];
            let ne_node = &new_ch[new_end as usize];

            if self.same_node(&os_node, ns_node) {
                self.patch_node(&os_node, ns_node)?;
                old_start += 1;
                new_start += 1;
            } else if self.same_node(&oe_node, ne_node) {
                self.patch_node(&oe_node, ne_node)?;
                old_end -= 1;
                new_end -= 1;
            } else if self.same_node(&os_node, ne_node) {
                // Element moved right: re-insert just after old-end.
                self.patch_node(&os_node, ne_node)?;
                let after = oe_node.host().and_then(|id| host.next_sibling_of(id));
                if let Some(id) = os_node.host() {
                    host.insert_before(parent, id, after);
                }
                old_start += 1;
                new_end -= 1;
            } else if self.same_node(&oe_node, ns_node) {
                // Element moved left: re-insert before old-start.
                self.patch_node(&oe_node, ns_node)?;
                if let Some(id) = oe_node.host() {
                    host.insert_before(parent, id, os_node.host());
                }
                old_end -= 1;
                new_start += 1;
            } else {
                let map = key_map.get_or_insert_with(|| {
                    let mut map = HashMap::new();
                    for i in old_start..=old_end {
                        if let Some(node) = &old[i as usize] {
                            if let Some(key) = node.key() {
                                map.insert(key.to_string(), i);
                            }
                        }
                    }
                    map
                });
                // Unkeyed new entries are positional-only: no map lookup, no
                // scan - they are treated as brand new here.
                let found = ns_node.key().and_then(|k| map.get(k).copied());
                match found.and_then(|i| old[i as usize].clone().map(|n| (i, n))) {
                    Some((i, candidate)) if self.same_node(&candidate, ns_node) => {
                        self.patch_node(&candidate, ns_node)?;
                        old[i as usize] = None;
                        if let Some(id) = candidate.host() {
                            host.insert_before(parent, id, os_node.host());
                        }
                    }
                    // Not found, slot consumed, or a key collision with a
                    // different tag: create and insert.
                    _ => {
                        self.create_node(ns_node, parent, os_node.host())?;
                    }
                }
                new_start += 1;
            }
        }

        if old_start > old_end {
            // Old range exhausted first: bulk-insert what's left of new.
            let before = if ((new_end + 1) as usize) < new_ch.len() {
                new_ch[(new_end + 1) as usize].host()
            } else {
                None
            };
            for i in new_start..=new_end {
                self.create_node(&new_ch[i as usize], parent, before)?;
            }
        } else if new_start > new_end {
            // New range exhausted first: bulk-remove what's left of old.
            for i in old_start..=old_end {
                if let Some(node) = old[i as usize].take() {
                    self.remove_node(parent, &node);
                }
            }
        }
        Ok(())
    }

    // Teardown hooks bottom-up, then detach the subtree root.
    fn remove_node(&self, parent: HostId, vnode: &VNode) {
        let id = vnode.host();
        self.destroy_hooks(vnode);
        if let Some(id) = id {
            self.inner.host.remove_child(parent, id);
        }
    }

    // Run destroy hooks for the whole subtree, children before parents, so
    // nested component boundaries release their own resources first. Host
    // nodes are not detached here.
    pub(crate) fn destroy_hooks(&self, vnode: &VNode) {
        match vnode.kind() {
            VNodeKind::Element(el) => {
                for child in &el.children {
                    self.destroy_hooks(child);
                }
                if let Some(id) = vnode.host() {
                    for module in &self.inner.modules {
                        module.destroy(self.inner.host.as_ref(), id, el);
                    }
                }
            }
            VNodeKind::Component(component) => {
                component.retire(self);
            }
            _ => {}
        }
    }

    // Adopt `node` and its host subtree as the rendering of `vnode`.
    // Returns false on a (reported) shape mismatch.
    fn adopt(&self, node: HostId, vnode: &VNode) -> bool {
        let host = self.inner.host.as_ref();
        let diagnostics = self.inner.diagnostics.get();
        match vnode.kind() {
            VNodeKind::Element(el) => {
                if diagnostics {
                    let matches = host.kind_of(node) == Some(HostKind::Element)
                        && host.tag_of(node).as_deref() == Some(el.tag.as_str());
                    if !matches {
                        self.report_mismatch(el, node);
                        return false;
                    }
                }
                vnode.set_hosted(Some(node));
                for module in &self.inner.modules {
                    module.create(host, node, el);
                }
                let mut next = host.first_child_of(node);
                for child in &el.children {
                    match next {
                        Some(child_host) => {
                            let sibling = host.next_sibling_of(child_host);
                            if !self.adopt(child_host, child) {
                                return false;
                            }
                            next = sibling;
                        }
                        None => {
                            if self.create_node(child, node, None).is_err() {
                                return false;
                            }
                        }
                    }
                }
                if next.is_some() && diagnostics {
                    self.report(&PipelineError::HydrationMismatch {
                        expected: format!("<{}> with {} children", el.tag, el.children.len()),
                        found: "extra host children".to_string(),
                    });
                    return false;
                }
                // Lenient mode: trim whatever trails the described children.
                while let Some(extra) = next {
                    next = host.next_sibling_of(extra);
                    host.remove_child(node, extra);
                }
                true
            }
            VNodeKind::Text(text) => {
                if diagnostics && host.kind_of(node) != Some(HostKind::Text) {
                    self.report(&PipelineError::HydrationMismatch {
                        expected: format!("text {:?}", text),
                        found: describe_host(host, node),
                    });
                    return false;
                }
                vnode.set_hosted(Some(node));
                if host.text_of(node).as_deref() != Some(text.as_str()) {
                    host.set_text(node, text);
                }
                true
            }
            VNodeKind::Comment(text) => {
                if diagnostics && host.kind_of(node) != Some(HostKind::Comment) {
                    self.report(&PipelineError::HydrationMismatch {
                        expected: "comment".to_string(),
                        found: describe_host(host, node),
                    });
                    return false;
                }
                vnode.set_hosted(Some(node));
                if host.text_of(node).as_deref() != Some(text.as_str()) {
                    host.set_text(node, text);
                }
                true
            }
            VNodeKind::Component(component) => component.mount_hydrating(self, node).is_ok(),
        }
    }

    fn report_mismatch(&self, expected: &VElement, node: HostId) {
        self.report(&PipelineError::HydrationMismatch {
            expected: format!("<{}>", expected.tag),
            found: describe_host(self.inner.host.as_ref(), node),
        });
    }
}

fn describe_host(host: &dyn Host, node: HostId) -> String {
    match host.kind_of(node) {
        Some(HostKind::Element) => format!(
            "<{}>",
            host.tag_of(node).unwrap_or_else(|| "?".to_string())
        ),
        Some(HostKind::Text) => format!("text {:?}", host.text_of(node).unwrap_or_default()),
        Some(HostKind::Comment) => "comment".to_string(),
        None => "no node".to_string(),
    }
}

// Text-input-like elements only reuse one another when the input type
// matches exactly.
fn same_input_type(a: &VElement, b: &VElement) -> bool {
    if a.tag != "input" {
        return true;
    }
    a.attr("type") == b.attr("type")
}
