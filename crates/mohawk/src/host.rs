//! The host-adapter seam.
//!
//! The engine never creates platform nodes itself. Every rendered object is
//! addressed by an opaque [`HostId`] handle and manipulated through the
//! [`Host`] trait, so the same pipeline drives a browser DOM, a terminal
//! scene graph, or the in-memory arena used for tests - whatever implements
//! `Host`.
use std::rc::Rc;

/// An event callback attached to a host node. Payloads are plain JSON
/// values, whatever the host's event system produces.
pub type Listener = Rc<dyn Fn(serde_json::Value)>;

/// Opaque handle to one host node. Allocation and meaning belong entirely to
/// the host; the engine only stores and passes these around.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct HostId(pub u64);

/// The coarse shape of a host node, used for hydration checks.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HostKind {
    Element,
    Text,
    Comment,
}

/// What a UI domain must provide to be driven by the patch engine.
///
/// Structural methods mirror the usual tree API. Nodes are created detached
/// and spliced in with [`Host::insert_before`]; inserting a node that
/// already has a parent moves it. The attribute-level methods are the
/// primitives the per-concern patch modules are written against.
pub trait Host {
    fn create_element(&self, tag: &str) -> HostId;
    fn create_text(&self, text: &str) -> HostId;
    fn create_comment(&self, text: &str) -> HostId;

    /// Replace the payload of a text or comment node.
    fn set_text(&self, node: HostId, text: &str);

    /// Splice `node` into `parent` just before `reference`, or append when
    /// `reference` is `None`. Re-inserting an attached node moves it.
    fn insert_before(&self, parent: HostId, node: HostId, reference: Option<HostId>);

    /// Detach `node` from `parent` and release the subtree under it.
    fn remove_child(&self, parent: HostId, node: HostId);

    fn parent_of(&self, node: HostId) -> Option<HostId>;
    fn next_sibling_of(&self, node: HostId) -> Option<HostId>;
    fn first_child_of(&self, node: HostId) -> Option<HostId>;

    /// The coarse node shape, if the node is known to this host.
    fn kind_of(&self, node: HostId) -> Option<HostKind>;

    /// The element tag, or `None` for non-elements.
    fn tag_of(&self, node: HostId) -> Option<String>;

    /// The payload of a text or comment node, or `None` for elements.
    fn text_of(&self, node: HostId) -> Option<String>;

    fn set_attribute(&self, node: HostId, name: &str, value: &str);
    fn remove_attribute(&self, node: HostId, name: &str);

    /// Set or clear the whole class string.
    fn set_class(&self, node: HostId, class: Option<&str>);

    fn set_style(&self, node: HostId, name: &str, value: &str);
    fn remove_style(&self, node: HostId, name: &str);

    fn attach_listener(&self, node: HostId, name: &str, listener: Listener);
    fn detach_listener(&self, node: HostId, name: &str);
}
