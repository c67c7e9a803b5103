//! The virtual tree: an immutable-per-render description of what the UI
//! should look like.
//!
//! A [`VNode`] is a cheap-to-clone handle over a tagged description -
//! element, text, comment placeholder, or component boundary. Trees are
//! produced fresh by each render and must be treated as immutable once
//! handed to the patch engine; the only thing the engine writes back is the
//! host-node bookkeeping slot.
use std::{cell::Cell, rc::Rc};

use crate::{component::Component, host::HostId, host::Listener};

/// One node of a virtual tree.
#[derive(Clone)]
pub struct VNode {
    data: Rc<VNodeData>,
}

struct VNodeData {
    kind: VNodeKind,
    key: Option<String>,
    // Written by the engine during create/patch/hydrate. Never meaningful
    // for component nodes, whose host root is looked up live.
    hosted: Cell<Option<HostId>>,
}

/// The tagged node value.
pub enum VNodeKind {
    Element(VElement),
    Text(String),
    Comment(String),
    Component(Component),
}

/// The data an element node carries, split per concern so the patch modules
/// can diff each independently.
pub struct VElement {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub class: Option<String>,
    pub styles: Vec<(String, String)>,
    pub listeners: Vec<(String, Listener)>,
    pub children: Vec<VNode>,
}

impl VElement {
    /// Look up a raw attribute.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn is_data_empty(&self) -> bool {
        self.attrs.is_empty()
            && self.class.is_none()
            && self.styles.is_empty()
            && self.listeners.is_empty()
    }
}

impl VNode {
    /// Start building an element node.
    pub fn element(tag: impl Into<String>) -> VNodeBuilder {
        VNodeBuilder {
            tag: tag.into(),
            key: None,
            attrs: vec![],
            class: None,
            styles: vec![],
            listeners: vec![],
            children: vec![],
        }
    }

    /// A text leaf.
    pub fn text(text: impl Into<String>) -> VNode {
        VNode::from_kind(VNodeKind::Text(text.into()), None)
    }

    /// An empty placeholder.
    pub fn comment(text: impl Into<String>) -> VNode {
        VNode::from_kind(VNodeKind::Comment(text.into()), None)
    }

    /// A component boundary. The engine does not recurse into it; the
    /// component's own render watcher keeps its subtree up to date.
    pub fn component(component: Component) -> VNode {
        VNode::from_kind(VNodeKind::Component(component), None)
    }

    /// A keyed component boundary, for components inside keyed lists.
    pub fn component_keyed(key: impl Into<String>, component: Component) -> VNode {
        VNode::from_kind(VNodeKind::Component(component), Some(key.into()))
    }

    fn from_kind(kind: VNodeKind, key: Option<String>) -> VNode {
        VNode {
            data: Rc::new(VNodeData {
                kind,
                key,
                hosted: Cell::new(None),
            }),
        }
    }

    pub fn kind(&self) -> &VNodeKind {
        &self.data.kind
    }

    pub fn key(&self) -> Option<&str> {
        self.data.key.as_deref()
    }

    pub fn is_element(&self) -> bool {
        matches!(self.data.kind, VNodeKind::Element(_))
    }

    pub fn is_text(&self) -> bool {
        matches!(self.data.kind, VNodeKind::Text(_))
    }

    pub fn is_comment(&self) -> bool {
        matches!(self.data.kind, VNodeKind::Comment(_))
    }

    pub fn is_component(&self) -> bool {
        matches!(self.data.kind, VNodeKind::Component(_))
    }

    /// The host node this virtual node is rendered as, if any.
    ///
    /// For a component node this is the live root of the component's own
    /// tree, which may have been replaced since the node was produced.
    pub fn host(&self) -> Option<HostId> {
        match &self.data.kind {
            VNodeKind::Component(c) => c.root_host(),
            _ => self.data.hosted.get(),
        }
    }

    pub(crate) fn set_hosted(&self, id: Option<HostId>) {
        if !self.is_component() {
            self.data.hosted.set(id);
        }
    }
}

impl std::fmt::Debug for VNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.data.kind {
            VNodeKind::Element(el) => f
                .debug_struct("VNode::Element")
                .field("tag", &el.tag)
                .field("key", &self.data.key)
                .field("children", &el.children.len())
                .finish(),
            VNodeKind::Text(s) => write!(f, "VNode::Text({:?})", s),
            VNodeKind::Comment(s) => write!(f, "VNode::Comment({:?})", s),
            VNodeKind::Component(c) => write!(f, "VNode::Component({:?})", c.name()),
        }
    }
}

impl From<&str> for VNode {
    fn from(s: &str) -> Self {
        VNode::text(s)
    }
}

impl From<String> for VNode {
    fn from(s: String) -> Self {
        VNode::text(s)
    }
}

/// An un-built element node.
pub struct VNodeBuilder {
    tag: String,
    key: Option<String>,
    attrs: Vec<(String, String)>,
    class: Option<String>,
    styles: Vec<(String, String)>,
    listeners: Vec<(String, Listener)>,
    children: Vec<VNode>,
}

impl VNodeBuilder {
    /// Set the key used by the children diff to match this node across
    /// renders.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_attrib(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push((name.into(), value.into()));
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn with_style(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.styles.push((name.into(), value.into()));
        self
    }

    pub fn with_listener(
        mut self,
        name: impl Into<String>,
        listener: impl Fn(serde_json::Value) + 'static,
    ) -> Self {
        self.listeners.push((name.into(), Rc::new(listener)));
        self
    }

    /// Append a child or an iterator of children.
    pub fn append(mut self, children: impl Into<AppendArg>) -> Self {
        match children.into() {
            AppendArg::Single(child) => self.children.push(child),
            AppendArg::Iter(mut kids) => self.children.append(&mut kids),
        }
        self
    }

    pub fn build(self) -> VNode {
        VNode {
            data: Rc::new(VNodeData {
                kind: VNodeKind::Element(VElement {
                    tag: self.tag,
                    attrs: self.attrs,
                    class: self.class,
                    styles: self.styles,
                    listeners: self.listeners,
                    children: self.children,
                }),
                key: self.key,
                hosted: Cell::new(None),
            }),
        }
    }
}

/// An enumeration of types that can be appended as children.
pub enum AppendArg {
    /// A single child.
    Single(VNode),
    /// A collection of children.
    Iter(Vec<VNode>),
}

impl<T: Into<VNode>> From<T> for AppendArg {
    fn from(t: T) -> Self {
        AppendArg::Single(t.into())
    }
}

impl From<Vec<VNode>> for AppendArg {
    fn from(kids: Vec<VNode>) -> Self {
        AppendArg::Iter(kids)
    }
}

impl From<Option<VNode>> for AppendArg {
    fn from(kid: Option<VNode>) -> Self {
        AppendArg::Iter(kid.into_iter().collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builder_collects_concerns() {
        let node = VNode::element("input")
            .with_key("name-field")
            .with_attrib("type", "text")
            .with_class("field")
            .with_style("width", "100%")
            .append(VNode::text("hi"))
            .build();

        assert_eq!(node.key(), Some("name-field"));
        match node.kind() {
            VNodeKind::Element(el) => {
                assert_eq!(el.tag, "input");
                assert_eq!(el.attr("type"), Some("text"));
                assert_eq!(el.class.as_deref(), Some("field"));
                assert_eq!(el.children.len(), 1);
                assert!(!el.is_data_empty());
            }
            _ => panic!("expected an element"),
        }
    }

    #[test]
    fn can_append_vec() {
        let node = VNode::element("div")
            .append(vec![VNode::text("a"), VNode::text("b")])
            .build();
        match node.kind() {
            VNodeKind::Element(el) => assert_eq!(el.children.len(), 2),
            _ => panic!("expected an element"),
        }
    }

    #[test]
    fn can_append_option() {
        let node = VNode::element("div").append(None as Option<VNode>).build();
        match node.kind() {
            VNodeKind::Element(el) => assert!(el.children.is_empty()),
            _ => panic!("expected an element"),
        }
    }
}
