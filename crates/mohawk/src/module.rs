//! Per-concern patch modules.
//!
//! When the engine reuses a host node it does not diff the node's data
//! itself; it hands old and new element data to each installed [`Module`]
//! and lets the module apply the delta for its concern. The default set
//! covers raw attributes, the class string, inline styles and event
//! listeners.
use std::rc::Rc;

use crate::{
    host::{Host, HostId},
    vnode::VElement,
};

/// One concern's create/update/destroy hooks.
pub trait Module {
    /// A host node was just created for `new`.
    fn create(&self, host: &dyn Host, node: HostId, new: &VElement);

    /// `node` is being reused; apply the delta between `old` and `new`.
    fn update(&self, host: &dyn Host, node: HostId, old: &VElement, new: &VElement);

    /// `node` is about to be detached for good.
    fn destroy(&self, host: &dyn Host, node: HostId, old: &VElement) {
        let _ = (host, node, old);
    }
}

/// The default module set, in application order.
pub fn default_modules() -> Vec<Box<dyn Module>> {
    vec![
        Box::new(AttribModule),
        Box::new(ClassModule),
        Box::new(StyleModule),
        Box::new(EventModule),
    ]
}

fn find<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

/// Raw attributes.
pub struct AttribModule;

impl Module for AttribModule {
    fn create(&self, host: &dyn Host, node: HostId, new: &VElement) {
        for (name, value) in &new.attrs {
            host.set_attribute(node, name, value);
        }
    }

    fn update(&self, host: &dyn Host, node: HostId, old: &VElement, new: &VElement) {
        for (name, value) in &new.attrs {
            if find(&old.attrs, name) != Some(value.as_str()) {
                host.set_attribute(node, name, value);
            }
        }
        for (name, _) in &old.attrs {
            if find(&new.attrs, name).is_none() {
                host.remove_attribute(node, name);
            }
        }
    }
}

/// The class string.
pub struct ClassModule;

impl Module for ClassModule {
    fn create(&self, host: &dyn Host, node: HostId, new: &VElement) {
        if let Some(class) = &new.class {
            host.set_class(node, Some(class));
        }
    }

    fn update(&self, host: &dyn Host, node: HostId, old: &VElement, new: &VElement) {
        if old.class != new.class {
            host.set_class(node, new.class.as_deref());
        }
    }
}

/// Inline styles.
pub struct StyleModule;

impl Module for StyleModule {
    fn create(&self, host: &dyn Host, node: HostId, new: &VElement) {
        for (name, value) in &new.styles {
            host.set_style(node, name, value);
        }
    }

    fn update(&self, host: &dyn Host, node: HostId, old: &VElement, new: &VElement) {
        for (name, value) in &new.styles {
            if find(&old.styles, name) != Some(value.as_str()) {
                host.set_style(node, name, value);
            }
        }
        for (name, _) in &old.styles {
            if find(&new.styles, name).is_none() {
                host.remove_style(node, name);
            }
        }
    }
}

/// Event listeners. Callbacks are compared by identity, so a render that
/// rebuilds the same closure every time re-attaches it every time - hoist
/// shared handlers out of the render when that matters.
pub struct EventModule;

impl Module for EventModule {
    fn create(&self, host: &dyn Host, node: HostId, new: &VElement) {
        for (name, listener) in &new.listeners {
            host.attach_listener(node, name, listener.clone());
        }
    }

    fn update(&self, host: &dyn Host, node: HostId, old: &VElement, new: &VElement) {
        for (name, _) in &old.listeners {
            if !new.listeners.iter().any(|(n, _)| n == name) {
                host.detach_listener(node, name);
            }
        }
        for (name, listener) in &new.listeners {
            let unchanged = old
                .listeners
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, l)| Rc::ptr_eq(l, listener))
                .unwrap_or(false);
            if !unchanged {
                host.attach_listener(node, name, listener.clone());
            }
        }
    }

    fn destroy(&self, host: &dyn Host, node: HostId, old: &VElement) {
        for (name, _) in &old.listeners {
            host.detach_listener(node, name);
        }
    }
}
