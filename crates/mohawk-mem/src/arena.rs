//! The node arena and its operation log.
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use mohawk::host::{Host, HostId, HostKind, Listener};

// Only certain tags can be written as <tag /> when empty. Writing non-void
// tags in void notation does spooky things to downstream parsers.
fn tag_is_voidable(tag: &str) -> bool {
    tag == "area"
        || tag == "base"
        || tag == "br"
        || tag == "col"
        || tag == "hr"
        || tag == "img"
        || tag == "input"
        || tag == "link"
        || tag == "meta"
        || tag == "param"
        || tag == "command"
        || tag == "keygen"
        || tag == "source"
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// One structural or data operation applied to the arena, as recorded in the
/// operation log. Tests assert diff minimality against these.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostOp {
    CreateElement { node: HostId, tag: String },
    CreateText { node: HostId },
    CreateComment { node: HostId },
    SetText { node: HostId },
    /// An insert or a move - the node may or may not have had a parent.
    Insert { parent: HostId, node: HostId },
    Remove { parent: HostId, node: HostId },
    SetAttribute { node: HostId, name: String },
    RemoveAttribute { node: HostId, name: String },
    SetClass { node: HostId },
    SetStyle { node: HostId, name: String },
    RemoveStyle { node: HostId, name: String },
    AttachListener { node: HostId, name: String },
    DetachListener { node: HostId, name: String },
}

impl HostOp {
    /// Whether this op creates or destroys node identity (as opposed to
    /// moving or updating what already exists).
    pub fn changes_identity(&self) -> bool {
        matches!(
            self,
            HostOp::CreateElement { .. }
                | HostOp::CreateText { .. }
                | HostOp::CreateComment { .. }
                | HostOp::Remove { .. }
        )
    }
}

enum NodeKind {
    Element { tag: String },
    Text,
    Comment,
}

struct MemNode {
    kind: NodeKind,
    text: String,
    attrs: Vec<(String, String)>,
    class: Option<String>,
    styles: Vec<(String, String)>,
    listeners: Vec<(String, Listener)>,
    parent: Option<HostId>,
    children: Vec<HostId>,
    alive: bool,
}

impl MemNode {
    fn new(kind: NodeKind, text: String) -> Self {
        MemNode {
            kind,
            text,
            attrs: vec![],
            class: None,
            styles: vec![],
            listeners: vec![],
            parent: None,
            children: vec![],
            alive: true,
        }
    }
}

/// An arena-backed host. Cheap to clone; clones share the arena.
#[derive(Clone, Default)]
pub struct MemHost {
    inner: Rc<MemHostInner>,
}

#[derive(Default)]
struct MemHostInner {
    nodes: RefCell<Vec<MemNode>>,
    ops: RefCell<Vec<HostOp>>,
    recording: Cell<bool>,
}

impl MemHost {
    pub fn new() -> Self {
        MemHost::default()
    }

    /// A detached element to mount things under, typically the tree root of
    /// a test.
    pub fn root(&self) -> HostId {
        self.create_element("root")
    }

    /// Start recording host operations (clears the log).
    pub fn record(&self) {
        self.inner.ops.borrow_mut().clear();
        self.inner.recording.set(true);
    }

    /// Stop recording and return the log.
    pub fn take_ops(&self) -> Vec<HostOp> {
        self.inner.recording.set(false);
        self.inner.ops.borrow_mut().drain(..).collect()
    }

    fn log(&self, op: HostOp) {
        if self.inner.recording.get() {
            self.inner.ops.borrow_mut().push(op);
        }
    }

    fn alloc(&self, node: MemNode) -> HostId {
        let mut nodes = self.inner.nodes.borrow_mut();
        nodes.push(node);
        HostId(nodes.len() as u64 - 1)
    }

    fn index(&self, node: HostId) -> usize {
        node.0 as usize
    }

    /// Whether the node is still attached-or-attachable (not released).
    pub fn is_alive(&self, node: HostId) -> bool {
        self.inner
            .nodes
            .borrow()
            .get(self.index(node))
            .map(|n| n.alive)
            .unwrap_or(false)
    }

    /// Child handles in order, for test introspection.
    pub fn children_of(&self, node: HostId) -> Vec<HostId> {
        self.inner
            .nodes
            .borrow()
            .get(self.index(node))
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    /// Look up an attribute value.
    pub fn attribute_of(&self, node: HostId, name: &str) -> Option<String> {
        let nodes = self.inner.nodes.borrow();
        let n = nodes.get(self.index(node))?;
        n.attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
    }

    /// Invoke the listener attached to `node` under `name`. Returns whether
    /// a listener was found.
    pub fn fire_event(&self, node: HostId, name: &str, payload: serde_json::Value) -> bool {
        let listener = {
            let nodes = self.inner.nodes.borrow();
            let Some(n) = nodes.get(self.index(node)) else {
                return false;
            };
            n.listeners
                .iter()
                .find(|(event, _)| event == name)
                .map(|(_, l)| l.clone())
        };
        match listener {
            Some(listener) => {
                // The borrow is released: the listener may mutate state and
                // force patches back into this arena.
                listener(payload);
                true
            }
            None => false,
        }
    }

    /// Render the subtree under `node` as markup.
    pub fn markup_string(&self, node: HostId) -> String {
        let (kind_markup, children) = {
            let nodes = self.inner.nodes.borrow();
            let Some(n) = nodes.get(self.index(node)) else {
                return String::new();
            };
            match &n.kind {
                NodeKind::Text => (Err(escape(&n.text)), vec![]),
                NodeKind::Comment => (Err(format!("<!--{}-->", n.text)), vec![]),
                NodeKind::Element { tag } => {
                    let mut attributes = n.attrs.clone();
                    if let Some(class) = &n.class {
                        attributes.push(("class".to_string(), class.clone()));
                    }
                    if !n.styles.is_empty() {
                        let styles = n
                            .styles
                            .iter()
                            .map(|(k, v)| format!("{}: {};", k, v))
                            .collect::<Vec<_>>()
                            .join(" ");
                        let mut style_added = false;
                        for (key, value) in attributes.iter_mut() {
                            if key == "style" {
                                *value = vec![value.as_str(), styles.as_str()].join(" ");
                                style_added = true;
                                break;
                            }
                        }
                        if !style_added {
                            attributes.push(("style".to_string(), styles));
                        }
                    }
                    let atts = attributes
                        .iter()
                        .map(|(key, val)| format!(r#"{}="{}""#, key, val))
                        .collect::<Vec<_>>()
                        .join(" ");
                    (Ok((tag.clone(), atts)), n.children.clone())
                }
            }
        };
        match kind_markup {
            Err(leaf) => leaf,
            Ok((tag, atts)) => {
                if children.is_empty() {
                    match (atts.is_empty(), tag_is_voidable(&tag)) {
                        (true, true) => format!("<{} />", tag),
                        (true, false) => format!("<{}></{}>", tag, tag),
                        (false, true) => format!("<{} {} />", tag, atts),
                        (false, false) => format!("<{} {}></{}>", tag, atts, tag),
                    }
                } else {
                    let kids = children
                        .iter()
                        .map(|child| self.markup_string(*child))
                        .collect::<Vec<_>>()
                        .join(" ");
                    if atts.is_empty() {
                        format!("<{}>{}</{}>", tag, kids, tag)
                    } else {
                        format!("<{} {}>{}</{}>", tag, atts, kids, tag)
                    }
                }
            }
        }
    }

    fn detach(&self, node: HostId) {
        let mut nodes = self.inner.nodes.borrow_mut();
        let index = self.index(node);
        if let Some(parent) = nodes[index].parent.take() {
            let p = self.index(parent);
            nodes[p].children.retain(|c| *c != node);
        }
    }

    fn release(&self, node: HostId) {
        let children = {
            let mut nodes = self.inner.nodes.borrow_mut();
            let index = self.index(node);
            nodes[index].alive = false;
            nodes[index].parent = None;
            std::mem::take(&mut nodes[index].children)
        };
        for child in children {
            self.release(child);
        }
    }
}

impl Host for MemHost {
    fn create_element(&self, tag: &str) -> HostId {
        let id = self.alloc(MemNode::new(
            NodeKind::Element {
                tag: tag.to_string(),
            },
            String::new(),
        ));
        self.log(HostOp::CreateElement {
            node: id,
            tag: tag.to_string(),
        });
        id
    }

    fn create_text(&self, text: &str) -> HostId {
        let id = self.alloc(MemNode::new(NodeKind::Text, text.to_string()));
        self.log(HostOp::CreateText { node: id });
        id
    }

    fn create_comment(&self, text: &str) -> HostId {
        let id = self.alloc(MemNode::new(NodeKind::Comment, text.to_string()));
        self.log(HostOp::CreateComment { node: id });
        id
    }

    fn set_text(&self, node: HostId, text: &str) {
        {
            let mut nodes = self.inner.nodes.borrow_mut();
            let index = self.index(node);
            if let Some(n) = nodes.get_mut(index) {
                n.text = text.to_string();
            }
        }
        self.log(HostOp::SetText { node });
    }

    fn insert_before(&self, parent: HostId, node: HostId, reference: Option<HostId>) {
        self.detach(node);
        {
            let mut nodes = self.inner.nodes.borrow_mut();
            let p = self.index(parent);
            let at = match reference {
                Some(reference) => match nodes[p].children.iter().position(|c| *c == reference) {
                    Some(at) => at,
                    None => {
                        log::warn!(
                            "insert_before: {:?} is not a child of {:?}, appending",
                            reference,
                            parent
                        );
                        nodes[p].children.len()
                    }
                },
                None => nodes[p].children.len(),
            };
            nodes[p].children.insert(at, node);
            let i = self.index(node);
            nodes[i].parent = Some(parent);
        }
        self.log(HostOp::Insert { parent, node });
    }

    fn remove_child(&self, parent: HostId, node: HostId) {
        self.detach(node);
        self.release(node);
        self.log(HostOp::Remove { parent, node });
    }

    fn parent_of(&self, node: HostId) -> Option<HostId> {
        self.inner.nodes.borrow().get(self.index(node))?.parent
    }

    fn next_sibling_of(&self, node: HostId) -> Option<HostId> {
        let nodes = self.inner.nodes.borrow();
        let parent = nodes.get(self.index(node))?.parent?;
        let siblings = &nodes[self.index(parent)].children;
        let at = siblings.iter().position(|c| *c == node)?;
        siblings.get(at + 1).copied()
    }

    fn first_child_of(&self, node: HostId) -> Option<HostId> {
        self.inner
            .nodes
            .borrow()
            .get(self.index(node))?
            .children
            .first()
            .copied()
    }

    fn kind_of(&self, node: HostId) -> Option<HostKind> {
        let nodes = self.inner.nodes.borrow();
        let n = nodes.get(self.index(node))?;
        if !n.alive {
            return None;
        }
        Some(match n.kind {
            NodeKind::Element { .. } => HostKind::Element,
            NodeKind::Text => HostKind::Text,
            NodeKind::Comment => HostKind::Comment,
        })
    }

    fn tag_of(&self, node: HostId) -> Option<String> {
        let nodes = self.inner.nodes.borrow();
        match &nodes.get(self.index(node))?.kind {
            NodeKind::Element { tag } => Some(tag.clone()),
            _ => None,
        }
    }

    fn text_of(&self, node: HostId) -> Option<String> {
        let nodes = self.inner.nodes.borrow();
        let n = nodes.get(self.index(node))?;
        match n.kind {
            NodeKind::Element { .. } => None,
            _ => Some(n.text.clone()),
        }
    }

    fn set_attribute(&self, node: HostId, name: &str, value: &str) {
        {
            let mut nodes = self.inner.nodes.borrow_mut();
            let index = self.index(node);
            if let Some(n) = nodes.get_mut(index) {
                match n.attrs.iter_mut().find(|(k, _)| k == name) {
                    Some((_, v)) => *v = value.to_string(),
                    None => n.attrs.push((name.to_string(), value.to_string())),
                }
            }
        }
        self.log(HostOp::SetAttribute {
            node,
            name: name.to_string(),
        });
    }

    fn remove_attribute(&self, node: HostId, name: &str) {
        {
            let mut nodes = self.inner.nodes.borrow_mut();
            let index = self.index(node);
            if let Some(n) = nodes.get_mut(index) {
                n.attrs.retain(|(k, _)| k != name);
            }
        }
        self.log(HostOp::RemoveAttribute {
            node,
            name: name.to_string(),
        });
    }

    fn set_class(&self, node: HostId, class: Option<&str>) {
        {
            let mut nodes = self.inner.nodes.borrow_mut();
            let index = self.index(node);
            if let Some(n) = nodes.get_mut(index) {
                n.class = class.map(String::from);
            }
        }
        self.log(HostOp::SetClass { node });
    }

    fn set_style(&self, node: HostId, name: &str, value: &str) {
        {
            let mut nodes = self.inner.nodes.borrow_mut();
            let index = self.index(node);
            if let Some(n) = nodes.get_mut(index) {
                match n.styles.iter_mut().find(|(k, _)| k == name) {
                    Some((_, v)) => *v = value.to_string(),
                    None => n.styles.push((name.to_string(), value.to_string())),
                }
            }
        }
        self.log(HostOp::SetStyle {
            node,
            name: name.to_string(),
        });
    }

    fn remove_style(&self, node: HostId, name: &str) {
        {
            let mut nodes = self.inner.nodes.borrow_mut();
            let index = self.index(node);
            if let Some(n) = nodes.get_mut(index) {
                n.styles.retain(|(k, _)| k != name);
            }
        }
        self.log(HostOp::RemoveStyle {
            node,
            name: name.to_string(),
        });
    }

    fn attach_listener(&self, node: HostId, name: &str, listener: Listener) {
        {
            let mut nodes = self.inner.nodes.borrow_mut();
            let index = self.index(node);
            if let Some(n) = nodes.get_mut(index) {
                match n.listeners.iter_mut().find(|(k, _)| k == name) {
                    Some((_, l)) => *l = listener.clone(),
                    None => n.listeners.push((name.to_string(), listener.clone())),
                }
            }
        }
        self.log(HostOp::AttachListener {
            node,
            name: name.to_string(),
        });
    }

    fn detach_listener(&self, node: HostId, name: &str) {
        {
            let mut nodes = self.inner.nodes.borrow_mut();
            let index = self.index(node);
            if let Some(n) = nodes.get_mut(index) {
                n.listeners.retain(|(k, _)| k != name);
            }
        }
        self.log(HostOp::DetachListener {
            node,
            name: name.to_string(),
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn arena_structure() {
        let host = MemHost::new();
        let root = host.root();
        let a = host.create_text("a");
        let b = host.create_text("b");
        host.insert_before(root, a, None);
        host.insert_before(root, b, None);
        assert_eq!(host.children_of(root), vec![a, b]);
        assert_eq!(host.first_child_of(root), Some(a));
        assert_eq!(host.next_sibling_of(a), Some(b));
        assert_eq!(host.next_sibling_of(b), None);
        assert_eq!(host.parent_of(a), Some(root));

        // Re-inserting an attached node moves it.
        host.insert_before(root, b, Some(a));
        assert_eq!(host.children_of(root), vec![b, a]);

        host.remove_child(root, b);
        assert_eq!(host.children_of(root), vec![a]);
        assert!(!host.is_alive(b));
        assert!(host.is_alive(a));
    }

    #[test]
    fn markup_escapes_and_merges_styles() {
        let host = MemHost::new();
        let div = host.create_element("div");
        host.set_attribute(div, "id", "greeting");
        host.set_style(div, "float", "right");
        host.set_style(div, "width", "100px");
        let text = host.create_text("a < b & c");
        host.insert_before(div, text, None);
        assert_eq!(
            host.markup_string(div),
            r#"<div id="greeting" style="float: right; width: 100px;">a &lt; b &amp; c</div>"#
        );

        host.set_style(div, "float", "left");
        assert!(host.markup_string(div).contains("float: left;"));
    }

    #[test]
    fn markup_void_tags() {
        let host = MemHost::new();
        let input = host.create_element("input");
        assert_eq!(host.markup_string(input), "<input />");
        let div = host.create_element("div");
        assert_eq!(host.markup_string(div), "<div></div>");
    }

    #[test]
    fn events_fire_attached_listeners() {
        let host = MemHost::new();
        let button = host.create_element("button");
        let clicked = std::rc::Rc::new(std::cell::Cell::new(false));
        host.attach_listener(button, "click", {
            let clicked = clicked.clone();
            std::rc::Rc::new(move |_| clicked.set(true))
        });
        assert!(host.fire_event(button, "click", serde_json::Value::Null));
        assert!(clicked.get());
        assert!(!host.fire_event(button, "hover", serde_json::Value::Null));

        host.detach_listener(button, "click");
        clicked.set(false);
        assert!(!host.fire_event(button, "click", serde_json::Value::Null));
        assert!(!clicked.get());
    }

    #[test]
    fn op_log_records_identity_changes() {
        let host = MemHost::new();
        let root = host.root();
        host.record();
        let t = host.create_text("x");
        host.insert_before(root, t, None);
        host.insert_before(root, t, None);
        let ops = host.take_ops();
        assert_eq!(
            ops.iter().filter(|op| op.changes_identity()).count(),
            1,
            "a move is not an identity change"
        );
    }
}
