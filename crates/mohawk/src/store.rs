//! Observed state: plain data wrapped so that reads and writes route through
//! [`Dep`] registries.
//!
//! There is no property interception here. Plain input data ([`Plain`]) is
//! walked once and rebuilt as an observed graph ([`Value`]): maps become
//! [`ObservedMap`]s with one tracked cell per field plus one shape-level dep,
//! lists become [`ObservedList`]s whose mutating methods perform the real
//! mutation and then notify. Primitives are held by value and never wrapped.
//!
//! Wrapping is idempotent - a container is wrapped at most once, and storing
//! an already-observed handle into a field keeps the handle as-is. Wrapping a
//! sealed (non-extensible) map is a silent no-op: the data is kept, but no
//! deps are installed.
use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use crate::{dep::Dep, error::PipelineError, runtime::RuntimeInner};

/// Unobserved input data.
///
/// This is the shape state has before it enters the store. It converts from
/// [`serde_json::Value`] and from the usual scalar types.
#[derive(Clone, Debug, PartialEq)]
pub enum Plain {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    List(Vec<Plain>),
    Map(Vec<(String, Plain)>),
    /// A non-extensible map. Observation of a sealed map is skipped
    /// silently: its fields are kept but never tracked, and its children are
    /// not visited.
    SealedMap(Vec<(String, Plain)>),
}

impl Plain {
    /// A map builder in insertion order.
    pub fn map<K: Into<String>>(fields: impl IntoIterator<Item = (K, Plain)>) -> Self {
        Plain::Map(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// A sealed map. See [`Plain::SealedMap`].
    pub fn sealed_map<K: Into<String>>(fields: impl IntoIterator<Item = (K, Plain)>) -> Self {
        Plain::SealedMap(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// A list builder.
    pub fn list(items: impl IntoIterator<Item = Plain>) -> Self {
        Plain::List(items.into_iter().collect())
    }
}

impl From<serde_json::Value> for Plain {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Plain::Null,
            serde_json::Value::Bool(b) => Plain::Bool(b),
            serde_json::Value::Number(n) => Plain::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Plain::Str(s),
            serde_json::Value::Array(items) => {
                Plain::List(items.into_iter().map(Plain::from).collect())
            }
            serde_json::Value::Object(fields) => {
                Plain::Map(fields.into_iter().map(|(k, v)| (k, Plain::from(v))).collect())
            }
        }
    }
}

impl From<bool> for Plain {
    fn from(b: bool) -> Self {
        Plain::Bool(b)
    }
}

impl From<f64> for Plain {
    fn from(n: f64) -> Self {
        Plain::Number(n)
    }
}

impl From<i64> for Plain {
    fn from(n: i64) -> Self {
        Plain::Number(n as f64)
    }
}

impl From<&str> for Plain {
    fn from(s: &str) -> Self {
        Plain::Str(s.to_string())
    }
}

impl From<String> for Plain {
    fn from(s: String) -> Self {
        Plain::Str(s)
    }
}

/// A node of the observed data graph.
///
/// Primitives are plain values. Containers are cheap-to-clone handles; clones
/// refer to the same observed storage.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Map(ObservedMap),
    List(ObservedList),
}

impl Value {
    /// Whether this value is a container handle.
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Map(_) | Value::List(_))
    }

    /// Identity comparison: primitives by value, containers by handle.
    pub fn same_identity(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => Rc::ptr_eq(&a.inner, &b.inner),
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(&a.inner, &b.inner),
            _ => false,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ObservedMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ObservedList> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Deep snapshot as JSON. Reads performed by the snapshot register deps
    /// like any other read.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => {
                // Numbers that carry no fraction go back out as integers, so
                // data that came in from JSON round-trips exactly.
                if n.fract() == 0.0 && *n >= i64::MIN as f64 && *n <= i64::MAX as f64 {
                    serde_json::Value::Number(serde_json::Number::from(*n as i64))
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
            }
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Map(m) => {
                let mut fields = serde_json::Map::new();
                for key in m.keys() {
                    if let Some(v) = m.get(&key) {
                        fields.insert(key, v.to_json());
                    }
                }
                serde_json::Value::Object(fields)
            }
            Value::List(l) => {
                serde_json::Value::Array(l.snapshot().iter().map(Value::to_json).collect())
            }
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Number(n) => write!(f, "Number({})", n),
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Map(m) => m.fmt(f),
            Value::List(l) => l.fmt(f),
        }
    }
}

/// Register the shape-level deps of a container read out of a cell.
///
/// Watchers that read a field holding a container must also re-run when the
/// container's shape changes (reactive insert/remove, list mutation), not
/// only when the field itself is re-assigned. List elements that are
/// themselves containers register recursively.
pub(crate) fn track_child(value: &Value) {
    match value {
        Value::Map(m) => m.depend_shape(),
        Value::List(l) => l.depend_tree(),
        _ => {}
    }
}

/// Rebuild plain data as an observed graph.
pub(crate) fn wrap(rt: &Weak<RuntimeInner>, plain: Plain, observed: bool) -> Value {
    match plain {
        Plain::Null => Value::Null,
        Plain::Bool(b) => Value::Bool(b),
        Plain::Number(n) => Value::Number(n),
        Plain::Str(s) => Value::Str(s),
        Plain::List(items) => Value::List(ObservedList::from_plain(rt, items, observed)),
        Plain::Map(fields) => Value::Map(ObservedMap::from_plain(rt, fields, observed, false)),
        // Sealed: keep the data, skip observation entirely.
        Plain::SealedMap(fields) => Value::Map(ObservedMap::from_plain(rt, fields, false, true)),
    }
}

struct FieldCell {
    // None for plain (untracked) fields: reads register nothing and writes
    // notify nothing.
    dep: Option<Dep>,
    value: RefCell<Value>,
}

/// An observed map of string keys to [`Value`]s.
///
/// Every field carries its own dep; the map itself carries one shape-level
/// dep notified when keys are added or removed reactively. Assigning to a
/// missing key stores a plain, untracked field - growing the reactive key
/// set requires [`ObservedMap::insert_reactive`].
#[derive(Clone)]
pub struct ObservedMap {
    pub(crate) inner: Rc<MapInner>,
}

pub(crate) struct MapInner {
    rt: Weak<RuntimeInner>,
    dep: Dep,
    fields: RefCell<Vec<(String, FieldCell)>>,
    root_refs: Cell<usize>,
    observed: bool,
    sealed: bool,
}

impl ObservedMap {
    pub(crate) fn from_plain(
        rt: &Weak<RuntimeInner>,
        plain_fields: Vec<(String, Plain)>,
        observed: bool,
        sealed: bool,
    ) -> Self {
        let fields = plain_fields
            .into_iter()
            .map(|(key, plain)| {
                let cell = FieldCell {
                    dep: observed.then(|| Dep::new(rt)),
                    value: RefCell::new(wrap(rt, plain, observed)),
                };
                (key, cell)
            })
            .collect();
        ObservedMap {
            inner: Rc::new(MapInner {
                rt: rt.clone(),
                dep: Dep::new(rt),
                fields: RefCell::new(fields),
                root_refs: Cell::new(0),
                observed,
                sealed,
            }),
        }
    }

    /// Whether this map was built as non-extensible.
    pub fn is_sealed(&self) -> bool {
        self.inner.sealed
    }

    /// Whether reads and writes of this map are tracked at all.
    pub fn is_observed(&self) -> bool {
        self.inner.observed
    }

    pub(crate) fn mark_root(&self) {
        self.inner.root_refs.set(self.inner.root_refs.get() + 1);
    }

    pub(crate) fn depend_shape(&self) {
        if self.inner.observed {
            self.inner.dep.depend();
        }
    }

    /// Read a field, registering the active watcher with the field's dep and
    /// with the shape dep of any container the field holds.
    pub fn get(&self, key: &str) -> Option<Value> {
        let fields = self.inner.fields.borrow();
        let (_, cell) = fields.iter().find(|(k, _)| k == key)?;
        if let Some(dep) = &cell.dep {
            dep.depend();
        }
        let value = cell.value.borrow().clone();
        drop(fields);
        if self.inner.observed {
            track_child(&value);
        }
        Some(value)
    }

    /// Read a dot-separated path of nested map fields, eg `"user.name"`.
    pub fn get_path(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        let mut value = self.get(segments.next()?)?;
        for segment in segments {
            let map = value.as_map()?.clone();
            value = map.get(segment)?;
        }
        Some(value)
    }

    /// Assign a field.
    ///
    /// An existing tracked field is written through its cell and its dep is
    /// notified; the new value is wrapped lazily at this point. Assigning a
    /// value identical to the current one notifies nobody. Assigning to a
    /// missing key stores a plain, untracked field. Writes to a sealed map
    /// are dropped.
    pub fn set(&self, key: &str, value: impl Into<Plain>) {
        if self.inner.sealed {
            log::debug!("dropping write of '{}' to a sealed map", key);
            return;
        }
        let exists_tracked = {
            let fields = self.inner.fields.borrow();
            fields.iter().find(|(k, _)| k == key).map(|(_, c)| c.dep.is_some())
        };
        match exists_tracked {
            Some(tracked) => {
                let wrapped = wrap(&self.inner.rt, value.into(), tracked && self.inner.observed);
                self.store(key, wrapped);
            }
            None => {
                // Brand-new key: a plain property, not reactive until
                // `insert_reactive` is used.
                let wrapped = wrap(&self.inner.rt, value.into(), false);
                self.inner.fields.borrow_mut().push((
                    key.to_string(),
                    FieldCell {
                        dep: None,
                        value: RefCell::new(wrapped),
                    },
                ));
            }
        }
    }

    /// Assign a field to an already-observed value handle.
    ///
    /// Wrapping is idempotent: the handle is stored as-is.
    pub fn set_value(&self, key: &str, value: Value) {
        if self.inner.sealed {
            log::debug!("dropping write of '{}' to a sealed map", key);
            return;
        }
        let exists = {
            let fields = self.inner.fields.borrow();
            fields.iter().any(|(k, _)| k == key)
        };
        if exists {
            self.store(key, value);
        } else {
            self.inner.fields.borrow_mut().push((
                key.to_string(),
                FieldCell {
                    dep: None,
                    value: RefCell::new(value),
                },
            ));
        }
    }

    // Write through an existing cell and notify its dep if the identity
    // changed.
    fn store(&self, key: &str, value: Value) {
        let dep = {
            let fields = self.inner.fields.borrow();
            let (_, cell) = fields
                .iter()
                .find(|(k, _)| k == key)
                .expect("store() requires an existing field");
            {
                let current = cell.value.borrow();
                if current.same_identity(&value) {
                    return;
                }
            }
            *cell.value.borrow_mut() = value;
            cell.dep.clone()
        };
        if let Some(dep) = dep {
            guard_write(&self.inner.rt, key);
            dep.notify();
        }
    }

    /// Install a new tracked field and notify the shape dep.
    ///
    /// This is the explicit "set property reactively" operation for keys the
    /// map did not start with. Refused (with a report) on a map that is a
    /// root observation point. On an existing tracked key this is a plain
    /// assignment.
    pub fn insert_reactive(&self, key: &str, value: impl Into<Plain>) {
        if self.inner.sealed {
            log::debug!("dropping reactive insert of '{}' into a sealed map", key);
            return;
        }
        let already_tracked = {
            let fields = self.inner.fields.borrow();
            fields.iter().find(|(k, _)| k == key).map(|(_, c)| c.dep.is_some())
        };
        if let Some(true) = already_tracked {
            self.set(key, value);
            return;
        }
        if self.inner.root_refs.get() > 0 {
            report(&self.inner.rt, PipelineError::RootGrowth { key: key.to_string() });
            return;
        }
        let wrapped = wrap(&self.inner.rt, value.into(), self.inner.observed);
        {
            let mut fields = self.inner.fields.borrow_mut();
            fields.retain(|(k, _)| k != key);
            fields.push((
                key.to_string(),
                FieldCell {
                    dep: self.inner.observed.then(|| Dep::new(&self.inner.rt)),
                    value: RefCell::new(wrapped),
                },
            ));
        }
        if self.inner.observed {
            guard_write(&self.inner.rt, key);
            self.inner.dep.notify();
        }
    }

    /// Remove a field and notify the shape dep. The symmetric "delete
    /// reactively" operation.
    pub fn remove_reactive(&self, key: &str) -> Option<Value> {
        if self.inner.sealed {
            return None;
        }
        let removed = {
            let mut fields = self.inner.fields.borrow_mut();
            let index = fields.iter().position(|(k, _)| k == key)?;
            let (_, cell) = fields.remove(index);
            cell.value.into_inner()
        };
        if self.inner.observed {
            guard_write(&self.inner.rt, key);
            self.inner.dep.notify();
        }
        Some(removed)
    }

    /// Whether the key exists. Registers the shape dep.
    pub fn contains_key(&self, key: &str) -> bool {
        self.depend_shape();
        self.inner.fields.borrow().iter().any(|(k, _)| k == key)
    }

    /// Number of fields. Registers the shape dep.
    pub fn len(&self) -> usize {
        self.depend_shape();
        self.inner.fields.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The keys in insertion order. Registers the shape dep.
    pub fn keys(&self) -> Vec<String> {
        self.depend_shape();
        self.inner
            .fields
            .borrow()
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }
}

impl std::fmt::Debug for ObservedMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservedMap")
            .field("len", &self.inner.fields.borrow().len())
            .field("observed", &self.inner.observed)
            .field("sealed", &self.inner.sealed)
            .finish()
    }
}

/// An observed list of [`Value`]s.
///
/// Elements are wrapped eagerly. Every mutating method performs the real
/// mutation, wraps whatever it inserted, and notifies the list's shape-level
/// dep.
#[derive(Clone)]
pub struct ObservedList {
    pub(crate) inner: Rc<ListInner>,
}

pub(crate) struct ListInner {
    rt: Weak<RuntimeInner>,
    dep: Dep,
    items: RefCell<Vec<Value>>,
    observed: bool,
}

impl ObservedList {
    pub(crate) fn from_plain(rt: &Weak<RuntimeInner>, plain: Vec<Plain>, observed: bool) -> Self {
        let items = plain
            .into_iter()
            .map(|p| wrap(rt, p, observed))
            .collect::<Vec<_>>();
        ObservedList {
            inner: Rc::new(ListInner {
                rt: rt.clone(),
                dep: Dep::new(rt),
                items: RefCell::new(items),
                observed,
            }),
        }
    }

    pub fn is_observed(&self) -> bool {
        self.inner.observed
    }

    pub(crate) fn depend_tree(&self) {
        if !self.inner.observed {
            return;
        }
        self.inner.dep.depend();
        for item in self.inner.items.borrow().iter() {
            track_child(item);
        }
    }

    /// Read one element. Registers the list's shape dep.
    pub fn get(&self, index: usize) -> Option<Value> {
        if self.inner.observed {
            self.inner.dep.depend();
        }
        let value = self.inner.items.borrow().get(index).cloned()?;
        if self.inner.observed {
            track_child(&value);
        }
        Some(value)
    }

    /// Number of elements. Registers the shape dep.
    pub fn len(&self) -> usize {
        if self.inner.observed {
            self.inner.dep.depend();
        }
        self.inner.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clone of the whole element list. Registers the shape dep and the
    /// shape deps of container elements.
    pub fn snapshot(&self) -> Vec<Value> {
        self.depend_tree();
        self.inner.items.borrow().clone()
    }

    pub fn push(&self, value: impl Into<Plain>) {
        let wrapped = wrap(&self.inner.rt, value.into(), self.inner.observed);
        self.inner.items.borrow_mut().push(wrapped);
        self.notify("push");
    }

    /// Push an already-observed value handle.
    pub fn push_value(&self, value: Value) {
        self.inner.items.borrow_mut().push(value);
        self.notify("push");
    }

    pub fn pop(&self) -> Option<Value> {
        let value = self.inner.items.borrow_mut().pop();
        if value.is_some() {
            self.notify("pop");
        }
        value
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Option<Value> {
        let value = {
            let mut items = self.inner.items.borrow_mut();
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        };
        if value.is_some() {
            self.notify("shift");
        }
        value
    }

    /// Insert at the front.
    pub fn unshift(&self, value: impl Into<Plain>) {
        let wrapped = wrap(&self.inner.rt, value.into(), self.inner.observed);
        self.inner.items.borrow_mut().insert(0, wrapped);
        self.notify("unshift");
    }

    pub fn insert(&self, index: usize, value: impl Into<Plain>) {
        let wrapped = wrap(&self.inner.rt, value.into(), self.inner.observed);
        self.inner.items.borrow_mut().insert(index, wrapped);
        self.notify("insert");
    }

    pub fn remove(&self, index: usize) -> Option<Value> {
        let value = {
            let mut items = self.inner.items.borrow_mut();
            if index < items.len() {
                Some(items.remove(index))
            } else {
                None
            }
        };
        if value.is_some() {
            self.notify("remove");
        }
        value
    }

    /// Replace `delete_count` elements starting at `start` with
    /// `replace_with`, returning the removed elements.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        replace_with: impl IntoIterator<Item = Plain>,
    ) -> Vec<Value> {
        let wrapped: Vec<Value> = replace_with
            .into_iter()
            .map(|p| wrap(&self.inner.rt, p, self.inner.observed))
            .collect();
        let removed = {
            let mut items = self.inner.items.borrow_mut();
            let start = start.min(items.len());
            let end = (start + delete_count).min(items.len());
            items.splice(start..end, wrapped).collect()
        };
        self.notify("splice");
        removed
    }

    /// Overwrite one index.
    pub fn set(&self, index: usize, value: impl Into<Plain>) {
        let wrapped = wrap(&self.inner.rt, value.into(), self.inner.observed);
        {
            let mut items = self.inner.items.borrow_mut();
            if index >= items.len() {
                return;
            }
            items[index] = wrapped;
        }
        self.notify("set");
    }

    pub fn reverse(&self) {
        self.inner.items.borrow_mut().reverse();
        self.notify("reverse");
    }

    pub fn sort_by(&self, mut compare: impl FnMut(&Value, &Value) -> std::cmp::Ordering) {
        self.inner.items.borrow_mut().sort_by(|a, b| compare(a, b));
        self.notify("sort");
    }

    fn notify(&self, what: &str) {
        if self.inner.observed {
            guard_write(&self.inner.rt, what);
            self.inner.dep.notify();
        }
    }
}

impl std::fmt::Debug for ObservedList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservedList")
            .field("len", &self.inner.items.borrow().len())
            .field("observed", &self.inner.observed)
            .finish()
    }
}

fn guard_write(rt: &Weak<RuntimeInner>, label: &str) {
    if let Some(rt) = rt.upgrade() {
        rt.note_store_write(label);
    }
}

fn report(rt: &Weak<RuntimeInner>, error: PipelineError) {
    if let Some(rt) = rt.upgrade() {
        rt.report(&error);
    } else {
        log::error!("{}", error);
    }
}

#[cfg(test)]
mod test {
    use crate::runtime::Runtime;

    use super::*;

    #[test]
    fn wrapping_never_wraps_primitives() {
        let rt = Runtime::new();
        let v = rt.observe(Plain::Number(1.0));
        assert!(!v.is_container());
        let v = rt.observe(Plain::Null);
        assert!(v.same_identity(&Value::Null));
    }

    #[test]
    fn sealed_map_is_skipped_silently() {
        let rt = Runtime::new();
        let v = rt.observe(Plain::sealed_map(vec![("a", Plain::from(1i64))]));
        let map = v.as_map().unwrap();
        assert!(map.is_sealed());
        assert!(!map.is_observed());
        // Mutation is dropped, not an error.
        map.set("a", 2i64);
        assert_eq!(map.get("a").unwrap().as_f64(), Some(1.0));
    }

    #[test]
    fn plain_insert_is_not_reactive() {
        let rt = Runtime::new();
        let v = rt.observe(Plain::map(vec![("a", Plain::from(1i64))]));
        let map = v.as_map().unwrap();
        map.set("b", 2i64);
        assert_eq!(map.get("b").unwrap().as_f64(), Some(2.0));

        let runs = std::rc::Rc::new(std::cell::Cell::new(0));
        let _w = rt.watch(
            "b-reader",
            {
                let map = map.clone();
                let runs = runs.clone();
                move || {
                    runs.set(runs.get() + 1);
                    Ok(map.get("b").unwrap_or(Value::Null))
                }
            },
            |_, _| {},
            Default::default(),
        );
        assert_eq!(runs.get(), 1);
        map.set("b", 3i64);
        rt.turn();
        // The plain field has no dep, so the watcher never re-ran.
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn reactive_insert_notifies_shape_readers() {
        let rt = Runtime::new();
        let v = rt.observe(Plain::map(vec![("inner", Plain::map(Vec::<(String, Plain)>::new()))]));
        let map = v.as_map().unwrap();

        let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let _w = rt.watch(
            "inner-reader",
            {
                let map = map.clone();
                move || Ok(map.get_path("inner.later").unwrap_or(Value::Null))
            },
            {
                let seen = seen.clone();
                move |new: &Value, _old: &Value| {
                    seen.borrow_mut().push(new.as_f64());
                }
            },
            Default::default(),
        );

        let inner = map.get("inner").unwrap().as_map().unwrap().clone();
        inner.insert_reactive("later", 5i64);
        rt.turn();
        assert_eq!(seen.borrow().as_slice(), &[Some(5.0)]);
    }

    #[test]
    fn equal_write_does_not_notify() {
        let rt = Runtime::new();
        let v = rt.observe(Plain::map(vec![("a", Plain::from("x"))]));
        let map = v.as_map().unwrap();
        let runs = std::rc::Rc::new(std::cell::Cell::new(0));
        let _w = rt.watch(
            "a-reader",
            {
                let map = map.clone();
                let runs = runs.clone();
                move || {
                    runs.set(runs.get() + 1);
                    Ok(map.get("a").unwrap_or(Value::Null))
                }
            },
            |_, _| {},
            Default::default(),
        );
        map.set("a", "x");
        rt.turn();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn list_mutators_notify_once() {
        let rt = Runtime::new();
        let v = rt.observe(Plain::list(vec![Plain::from(1i64), Plain::from(2i64)]));
        let list = v.as_list().unwrap().clone();

        let runs = std::rc::Rc::new(std::cell::Cell::new(0));
        let _w = rt.watch(
            "len-reader",
            {
                let list = list.clone();
                let runs = runs.clone();
                move || {
                    runs.set(runs.get() + 1);
                    Ok(Value::Number(list.len() as f64))
                }
            },
            |_, _| {},
            Default::default(),
        );
        assert_eq!(runs.get(), 1);

        list.push(3i64);
        list.reverse();
        list.splice(0, 1, vec![Plain::from(9i64)]);
        rt.turn();
        // Three mutations coalesced into one re-run.
        assert_eq!(runs.get(), 2);
        assert_eq!(list.get(0).unwrap().as_f64(), Some(9.0));
    }

    #[test]
    fn json_round_trip() {
        let rt = Runtime::new();
        let json: serde_json::Value = serde_json::from_str(
            r#"{"items":[{"id":1,"v":"a"},{"id":2,"v":"b"}],"title":"list"}"#,
        )
        .unwrap();
        let v = rt.observe(Plain::from(json.clone()));
        assert_eq!(v.to_json(), json);
    }
}
