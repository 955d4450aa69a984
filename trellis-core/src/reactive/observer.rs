//! Reactive Wrapper
//!
//! [`observe`] turns a plain object or array into a tracked one:
//!
//! - every property of an object gets its own [`Dep`], so reading it inside
//!   a watcher subscribes the watcher and writing it notifies subscribers;
//! - every object and array gets an [`Observer`] carrying a container-level
//!   dep, notified on structural changes (keys added or removed through
//!   [`set`]/[`del`], any of the seven array mutations);
//! - nested values are observed recursively.
//!
//! Arrays expose no index write. Index writes and growth go through
//! [`set`], which routes them through `splice`, so every mutation path of an
//! array is one of its seven methods.
//!
//! Assigning a key that does not exist yet with [`ReactiveObject::assign`]
//! adds a plain property: nothing is tracked or notified until the key is
//! made reactive with [`set`].

use std::cell::{Cell, OnceCell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::context::{untracked, ReactiveContext};
use super::dep::{self, Dep};
use super::value::Value;
use super::DepId;
use crate::error::warn;

/// The wrapper attached to an observed object or array.
///
/// Cloning shares the wrapper; [`Observer::ptr_eq`] tells two handles apart.
#[derive(Clone)]
pub struct Observer(Rc<ObserverInner>);

struct ObserverInner {
    /// Notified on structural changes of the container.
    dep: Dep,
    /// How many components use this object as their root data.
    vm_count: Cell<usize>,
}

impl Observer {
    fn new() -> Self {
        Self(Rc::new(ObserverInner {
            dep: Dep::new(),
            vm_count: Cell::new(0),
        }))
    }

    pub fn dep_id(&self) -> DepId {
        self.0.dep.id()
    }

    pub fn vm_count(&self) -> usize {
        self.0.vm_count.get()
    }

    pub(crate) fn release_root(&self) {
        self.0.vm_count.set(self.0.vm_count.get().saturating_sub(1));
    }

    pub fn depend(&self) {
        self.0.dep.depend();
    }

    pub fn notify(&self) {
        self.0.dep.notify();
    }

    pub fn ptr_eq(&self, other: &Observer) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("dep", &self.dep_id())
            .field("vm_count", &self.vm_count())
            .finish()
    }
}

/// Observe a value, returning its wrapper.
///
/// Primitives are not observable. Observing an already observed container
/// returns the existing wrapper. With `as_root` the container is counted
/// as a component's root data.
pub fn observe(value: &Value, as_root: bool) -> Option<Observer> {
    let ob = match value {
        Value::Object(o) => o.ensure_observed(),
        Value::Array(a) => a.ensure_observed(),
        _ => return None,
    };
    if as_root {
        ob.0.vm_count.set(ob.0.vm_count.get() + 1);
    }
    Some(ob)
}

/// Define a reactive property on `obj`, replacing any existing one.
///
/// A shallow property does not observe its value and does not depend on
/// the nested container when read.
pub fn define_reactive(obj: &ReactiveObject, key: &str, value: Value, shallow: bool) {
    obj.0.props.borrow_mut().insert(
        key.to_string(),
        Slot {
            value: value.clone(),
            dep: Some(Dep::new()),
            shallow,
        },
    );
    if !shallow {
        observe(&value, false);
    }
}

/// Depend on the container dep of `value`, and on every nested array
/// element when it is an array.
fn depend_child(value: &Value) {
    if let Some(ob) = value.observer() {
        ob.depend();
        if let Value::Array(items) = value {
            depend_array(items);
        }
    }
}

fn depend_array(array: &ReactiveArray) {
    for item in array.items_untracked() {
        if let Some(ob) = item.observer() {
            ob.depend();
        }
        if let Value::Array(inner) = &item {
            depend_array(inner);
        }
    }
}

// ----------------------------------------------------------------------------
// Objects
// ----------------------------------------------------------------------------

struct Slot {
    value: Value,
    /// `None` for plain properties.
    dep: Option<Dep>,
    shallow: bool,
}

impl Slot {
    fn plain(value: Value) -> Self {
        Self {
            value,
            dep: None,
            shallow: false,
        }
    }
}

/// A key/value container whose properties can be tracked.
#[derive(Clone, Default)]
pub struct ReactiveObject(Rc<ObjectInner>);

#[derive(Default)]
struct ObjectInner {
    props: RefCell<IndexMap<String, Slot>>,
    observer: OnceCell<Observer>,
}

impl ReactiveObject {
    /// Create an empty, unobserved object.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ptr_eq(&self, other: &ReactiveObject) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    /// The attached wrapper, if this object has been observed.
    pub fn observer(&self) -> Option<Observer> {
        self.0.observer.get().cloned()
    }

    fn ensure_observed(&self) -> Observer {
        if let Some(ob) = self.0.observer.get() {
            return ob.clone();
        }
        let ob = Observer::new();
        let _ = self.0.observer.set(ob.clone());

        let children: Vec<Value> = {
            let mut props = self.0.props.borrow_mut();
            for slot in props.values_mut() {
                if slot.dep.is_none() {
                    slot.dep = Some(Dep::new());
                }
            }
            props
                .values()
                .filter(|slot| !slot.shallow)
                .map(|slot| slot.value.clone())
                .collect()
        };
        for child in &children {
            observe(child, false);
        }
        ob
    }

    /// Read a property, tracking it if a watcher is evaluating.
    pub fn get(&self, key: &str) -> Option<Value> {
        let (value, dep, shallow) = {
            let props = self.0.props.borrow();
            let slot = props.get(key)?;
            (slot.value.clone(), slot.dep.as_ref().map(Dep::id), slot.shallow)
        };
        if let Some(dep) = dep {
            if ReactiveContext::is_active() {
                dep::depend(dep);
                if !shallow {
                    depend_child(&value);
                }
            }
        }
        Some(value)
    }

    /// Read a property without tracking.
    pub fn get_untracked(&self, key: &str) -> Option<Value> {
        self.0.props.borrow().get(key).map(|slot| slot.value.clone())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.props.borrow().contains_key(key)
    }

    /// Direct assignment.
    ///
    /// Writing a reactive property notifies its subscribers unless the new
    /// value is the same as the old one. Writing a key that does not exist
    /// adds a plain property and notifies nobody; use [`set`] to add a
    /// reactive one.
    pub fn assign(&self, key: &str, value: Value) {
        let changed = {
            let mut props = self.0.props.borrow_mut();
            match props.get_mut(key) {
                Some(slot) => {
                    if slot.dep.is_some() && slot.value.same_value(&value) {
                        return;
                    }
                    slot.value = value.clone();
                    slot.dep.as_ref().map(|dep| (dep.id(), slot.shallow))
                }
                None => {
                    props.insert(key.to_string(), Slot::plain(value));
                    return;
                }
            }
        };
        if let Some((dep, shallow)) = changed {
            if !shallow {
                observe(&value, false);
            }
            dep::notify(dep);
        }
    }

    /// The dep of a reactive property.
    pub fn property_dep(&self, key: &str) -> Option<DepId> {
        self.0
            .props
            .borrow()
            .get(key)
            .and_then(|slot| slot.dep.as_ref().map(Dep::id))
    }

    /// Keys in insertion order. Tracks structural changes.
    pub fn keys(&self) -> Vec<String> {
        self.depend_container();
        self.0.props.borrow().keys().cloned().collect()
    }

    /// Number of properties. Tracks structural changes.
    pub fn len(&self) -> usize {
        self.depend_container();
        self.0.props.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every property, read through its accessor.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.keys()
            .into_iter()
            .filter_map(|key| self.get(&key).map(|value| (key, value)))
            .collect()
    }

    fn depend_container(&self) {
        if ReactiveContext::is_active() {
            if let Some(ob) = self.0.observer.get() {
                ob.depend();
            }
        }
    }

    fn remove(&self, key: &str) -> Option<Value> {
        self.0
            .props
            .borrow_mut()
            .shift_remove(key)
            .map(|slot| slot.value)
    }
}

impl FromIterator<(String, Value)> for ReactiveObject {
    /// Builds a plain, unobserved object.
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let props = iter
            .into_iter()
            .map(|(k, v)| (k, Slot::plain(v)))
            .collect();
        Self(Rc::new(ObjectInner {
            props: RefCell::new(props),
            observer: OnceCell::new(),
        }))
    }
}

impl fmt::Debug for ReactiveObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = untracked(|| self.entries());
        f.debug_map().entries(entries.iter().map(|(k, v)| (k, v))).finish()
    }
}

// ----------------------------------------------------------------------------
// Arrays
// ----------------------------------------------------------------------------

/// A sequence whose structural changes can be tracked.
#[derive(Clone, Default)]
pub struct ReactiveArray(Rc<ArrayInner>);

#[derive(Default)]
struct ArrayInner {
    items: RefCell<Vec<Value>>,
    observer: OnceCell<Observer>,
}

impl ReactiveArray {
    /// Create an empty, unobserved array.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ptr_eq(&self, other: &ReactiveArray) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn observer(&self) -> Option<Observer> {
        self.0.observer.get().cloned()
    }

    fn ensure_observed(&self) -> Observer {
        if let Some(ob) = self.0.observer.get() {
            return ob.clone();
        }
        let ob = Observer::new();
        let _ = self.0.observer.set(ob.clone());
        for item in self.items_untracked() {
            observe(&item, false);
        }
        ob
    }

    fn depend_container(&self) {
        if ReactiveContext::is_active() {
            if let Some(ob) = self.0.observer.get() {
                ob.depend();
            }
        }
    }

    pub(crate) fn items_untracked(&self) -> Vec<Value> {
        self.0.items.borrow().clone()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.depend_container();
        self.0.items.borrow().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.depend_container();
        self.0.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the items.
    pub fn to_vec(&self) -> Vec<Value> {
        self.depend_container();
        self.items_untracked()
    }

    /// Apply a structural change, observe what it inserted, and notify.
    fn mutate<R>(&self, f: impl FnOnce(&mut Vec<Value>) -> (R, Vec<Value>)) -> R {
        let (result, inserted) = f(&mut self.0.items.borrow_mut());
        if let Some(ob) = self.observer() {
            for value in &inserted {
                observe(value, false);
            }
            ob.notify();
        }
        result
    }

    pub fn push(&self, value: Value) -> usize {
        self.mutate(|items| {
            items.push(value.clone());
            (items.len(), vec![value])
        })
    }

    pub fn pop(&self) -> Option<Value> {
        self.mutate(|items| (items.pop(), Vec::new()))
    }

    pub fn shift(&self) -> Option<Value> {
        self.mutate(|items| {
            let first = if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            };
            (first, Vec::new())
        })
    }

    pub fn unshift(&self, value: Value) -> usize {
        self.mutate(|items| {
            items.insert(0, value.clone());
            (items.len(), vec![value])
        })
    }

    /// Remove `delete_count` items at `start` and insert `insert` there.
    /// Out-of-range arguments are clamped. Returns the removed items.
    pub fn splice(&self, start: usize, delete_count: usize, insert: Vec<Value>) -> Vec<Value> {
        self.mutate(|items| {
            let start = start.min(items.len());
            let end = start.saturating_add(delete_count).min(items.len());
            let removed = items.splice(start..end, insert.iter().cloned()).collect();
            (removed, insert)
        })
    }

    /// Sort in place with a comparator.
    pub fn sort_by(&self, mut compare: impl FnMut(&Value, &Value) -> Ordering) {
        // The comparator is user code; do not hold the borrow across it.
        let mut items = std::mem::take(&mut *self.0.items.borrow_mut());
        items.sort_by(&mut compare);
        self.mutate(move |slot| {
            *slot = items;
            ((), Vec::new())
        });
    }

    pub fn reverse(&self) {
        self.mutate(|items| {
            items.reverse();
            ((), Vec::new())
        });
    }

    /// Index write used by [`set`]: grow with nulls, then splice.
    fn set_index(&self, index: usize, value: Value) {
        {
            let mut items = self.0.items.borrow_mut();
            if index > items.len() {
                items.resize(index, Value::Null);
            }
        }
        self.splice(index, 1, vec![value]);
    }
}

impl FromIterator<Value> for ReactiveArray {
    /// Builds a plain, unobserved array.
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

impl From<Vec<Value>> for ReactiveArray {
    fn from(items: Vec<Value>) -> Self {
        Self(Rc::new(ArrayInner {
            items: RefCell::new(items),
            observer: OnceCell::new(),
        }))
    }
}

impl fmt::Debug for ReactiveArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items_untracked().iter()).finish()
    }
}

// ----------------------------------------------------------------------------
// Explicit set / delete
// ----------------------------------------------------------------------------

/// A property key or array index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prop {
    Key(String),
    Index(usize),
}

impl fmt::Display for Prop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prop::Key(key) => f.write_str(key),
            Prop::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for Prop {
    fn from(key: &str) -> Self {
        Prop::Key(key.to_string())
    }
}

impl From<String> for Prop {
    fn from(key: String) -> Self {
        Prop::Key(key)
    }
}

impl From<usize> for Prop {
    fn from(index: usize) -> Self {
        Prop::Index(index)
    }
}

/// Set a property and make sure the change is observed.
///
/// This is the only way to add a reactive key to an observed object, or to
/// write an array index (including past the end).
pub fn set(target: &Value, prop: impl Into<Prop>, value: Value) -> Value {
    match (target, normalize(target, prop.into())) {
        (Value::Array(array), Prop::Index(index)) => {
            array.set_index(index, value.clone());
            value
        }
        (Value::Object(obj), Prop::Key(key)) => {
            if obj.contains_key(&key) {
                obj.assign(&key, value.clone());
                return value;
            }
            let Some(ob) = obj.observer() else {
                obj.assign(&key, value.clone());
                return value;
            };
            if ob.vm_count() > 0 {
                warn(
                    &format!(
                        "Avoid adding reactive properties to a component's root data at runtime: \
                         declare `{key}` upfront in the data option."
                    ),
                    None,
                );
                return value;
            }
            define_reactive(obj, &key, value.clone(), false);
            ob.notify();
            value
        }
        (Value::Array(_), Prop::Key(key)) => {
            warn(&format!("Cannot set key `{key}` on an array; use an index."), None);
            value
        }
        (_, prop) => {
            warn(
                &format!("Cannot set reactive property `{prop}` on a null or primitive value."),
                None,
            );
            value
        }
    }
}

/// Delete a property and notify if necessary.
pub fn del(target: &Value, prop: impl Into<Prop>) {
    match (target, normalize(target, prop.into())) {
        (Value::Array(array), Prop::Index(index)) => {
            if index < array.0.items.borrow().len() {
                array.splice(index, 1, Vec::new());
            }
        }
        (Value::Object(obj), Prop::Key(key)) => {
            let ob = obj.observer();
            if ob.as_ref().is_some_and(|ob| ob.vm_count() > 0) {
                warn(
                    &format!("Avoid deleting `{key}` from a component's root data; set it to null instead."),
                    None,
                );
                return;
            }
            if obj.remove(&key).is_none() {
                return;
            }
            if let Some(ob) = ob {
                ob.notify();
            }
        }
        (_, prop) => warn(
            &format!("Cannot delete reactive property `{prop}` on a null or primitive value."),
            None,
        ),
    }
}

/// Objects are keyed by strings; an index on an object names the key.
fn normalize(target: &Value, prop: Prop) -> Prop {
    match (target, prop) {
        (Value::Object(_), Prop::Index(index)) => Prop::Key(index.to_string()),
        (_, prop) => prop,
    }
}
