//! Watcher Implementation
//!
//! A Watcher pairs a getter with re-evaluation bookkeeping. Computed
//! properties, explicit watches and component render steps are all
//! watchers.
//!
//! # How Watchers Work
//!
//! 1. `get()` runs the getter inside a reactive context. Every dep read
//!    along the way lands in `new_deps`.
//!
//! 2. After the getter returns, deps from the previous pass that were not
//!    touched again are unsubscribed, and `new_deps` becomes `deps`. A
//!    watcher whose getter stops reading a property stops hearing about it.
//!
//! 3. When a dep notifies, `update()` either marks a lazy watcher dirty,
//!    runs a sync watcher on the spot, or queues the watcher in the
//!    scheduler.
//!
//! 4. `run()` re-evaluates and calls the callback with `(new, old)` if the
//!    value changed. Objects and deep watchers always call back, since a
//!    nested mutation does not change the container's identity.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexSet;
use smallvec::SmallVec;

use super::context::ReactiveContext;
use super::dep;
use super::runtime::Runtime;
use super::value::Value;
use super::{DepId, WatcherId};
use crate::component::{Component, WeakComponent};
use crate::error::{handle_error, report_uncaught, warn, Result};
use crate::scheduler;

/// A getter evaluated inside a tracking context.
pub type Getter = Rc<dyn Fn() -> Result<Value>>;

/// Called with `(new, old)` after a watcher's value changes.
pub type WatchCallback = Rc<dyn Fn(&Value, &Value) -> Result<()>>;

/// Runs right before the scheduler re-runs a watcher.
pub type BeforeHook = Rc<dyn Fn() -> Result<()>>;

/// Watcher flags.
#[derive(Clone, Default)]
pub struct WatcherOptions {
    /// Subscribe to every nested reactive value of the result.
    pub deep: bool,
    /// Errors are reported, never returned.
    pub user: bool,
    /// Evaluate on demand instead of eagerly.
    pub lazy: bool,
    /// Run on notification instead of being queued.
    pub sync: bool,
    pub before: Option<BeforeHook>,
}

impl fmt::Debug for WatcherOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherOptions")
            .field("deep", &self.deep)
            .field("user", &self.user)
            .field("lazy", &self.lazy)
            .field("sync", &self.sync)
            .field("before", &self.before.is_some())
            .finish()
    }
}

pub(crate) struct WatcherInner {
    id: WatcherId,
    expression: String,
    getter: Getter,
    callback: Option<WatchCallback>,
    options: WatcherOptions,
    owner: Option<WeakComponent>,
    is_render: bool,

    active: Cell<bool>,
    dirty: Cell<bool>,
    value: RefCell<Value>,

    /// Deps subscribed to after the last complete evaluation.
    deps: RefCell<IndexSet<DepId>>,
    /// Deps touched by the evaluation in progress.
    new_deps: RefCell<IndexSet<DepId>>,
}

impl Drop for WatcherInner {
    fn drop(&mut self) {
        for dep in self.deps.get_mut().iter() {
            Runtime::remove_sub(*dep, self.id);
        }
        Runtime::unregister(self.id);
    }
}

/// A tracked evaluation unit. Cloning shares the watcher.
#[derive(Clone)]
pub struct Watcher(Rc<WatcherInner>);

impl Watcher {
    /// Create a watcher over a getter function and evaluate it, unless lazy.
    pub fn new<F>(getter: F, callback: Option<WatchCallback>, options: WatcherOptions) -> Result<Self>
    where
        F: Fn() -> Result<Value> + 'static,
    {
        Self::build(None, "<fn>", Rc::new(getter), callback, options, false).init()
    }

    /// Create a watcher over a dot-delimited path into `root`.
    pub fn with_path(
        root: Value,
        path: &str,
        callback: Option<WatchCallback>,
        options: WatcherOptions,
    ) -> Result<Self> {
        let getter: Getter = match parse_path(path) {
            Some(segments) => Rc::new(move || Ok(resolve_path(&root, &segments))),
            None => {
                warn_invalid_path(path, None);
                Rc::new(|| Ok(Value::Null))
            }
        };
        Self::build(None, path, getter, callback, options, false).init()
    }

    /// Allocate and register a watcher without evaluating it.
    pub(crate) fn build(
        owner: Option<&Component>,
        expression: impl Into<String>,
        getter: Getter,
        callback: Option<WatchCallback>,
        options: WatcherOptions,
        is_render: bool,
    ) -> Self {
        let inner = Rc::new(WatcherInner {
            id: WatcherId::next(),
            expression: expression.into(),
            getter,
            callback,
            dirty: Cell::new(options.lazy),
            options,
            owner: owner.map(Component::downgrade),
            is_render,
            active: Cell::new(true),
            value: RefCell::new(Value::Null),
            deps: RefCell::new(IndexSet::new()),
            new_deps: RefCell::new(IndexSet::new()),
        });
        Runtime::register(inner.id, Rc::downgrade(&inner));
        Watcher(inner)
    }

    /// First evaluation.
    pub(crate) fn init(self) -> Result<Self> {
        if !self.0.options.lazy {
            let value = self.get()?;
            *self.0.value.borrow_mut() = value;
        }
        Ok(self)
    }

    pub(crate) fn from_inner(inner: Rc<WatcherInner>) -> Self {
        Watcher(inner)
    }

    pub fn id(&self) -> WatcherId {
        self.0.id
    }

    pub fn expression(&self) -> &str {
        &self.0.expression
    }

    /// Last computed value.
    pub fn value(&self) -> Value {
        self.0.value.borrow().clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.0.dirty.get()
    }

    pub fn is_active(&self) -> bool {
        self.0.active.get()
    }

    pub fn is_lazy(&self) -> bool {
        self.0.options.lazy
    }

    pub(crate) fn is_render(&self) -> bool {
        self.0.is_render
    }

    pub(crate) fn before(&self) -> Option<BeforeHook> {
        self.0.options.before.clone()
    }

    pub fn owner(&self) -> Option<Component> {
        self.0.owner.as_ref().and_then(WeakComponent::upgrade)
    }

    /// Deps the watcher is currently subscribed to.
    pub fn deps(&self) -> Vec<DepId> {
        self.0.deps.borrow().iter().copied().collect()
    }

    /// Evaluate the getter and re-collect dependencies.
    pub fn get(&self) -> Result<Value> {
        let result = {
            let _ctx = ReactiveContext::enter(self.clone());
            (self.0.getter)().map(|value| {
                if self.0.options.deep {
                    traverse(&value);
                }
                value
            })
        };
        self.cleanup_deps();

        match result {
            Err(err) if self.0.options.user => {
                let owner = self.owner();
                let info = format!("getter for watcher \"{}\"", self.0.expression);
                let _ = handle_error(err, owner.as_ref(), &info);
                Ok(self.value())
            }
            other => other,
        }
    }

    /// Record a dependency for the evaluation in progress.
    pub(crate) fn add_dep(&self, dep: DepId) {
        if self.0.new_deps.borrow_mut().insert(dep) && !self.0.deps.borrow().contains(&dep) {
            Runtime::add_sub(dep, self.0.id);
        }
    }

    /// Drop subscriptions not renewed by the last evaluation, then swap the
    /// two sets.
    fn cleanup_deps(&self) {
        let mut deps = self.0.deps.borrow_mut();
        let mut new_deps = self.0.new_deps.borrow_mut();
        for dep in deps.iter() {
            if !new_deps.contains(dep) {
                Runtime::remove_sub(*dep, self.0.id);
            }
        }
        std::mem::swap(&mut *deps, &mut *new_deps);
        new_deps.clear();
    }

    /// React to a dependency change.
    pub fn update(&self) {
        if self.0.options.lazy {
            self.0.dirty.set(true);
        } else if self.0.options.sync {
            if let Err(err) = self.run() {
                report_uncaught(err);
            }
        } else {
            scheduler::queue_watcher(self.clone());
        }
    }

    /// Re-evaluate and call back if the value changed.
    pub fn run(&self) -> Result<()> {
        if !self.0.active.get() {
            return Ok(());
        }
        let value = self.get()?;
        let old = self.value();
        if value.same_value(&old) && !value.is_object() && !self.0.options.deep {
            return Ok(());
        }
        *self.0.value.borrow_mut() = value.clone();

        let Some(callback) = &self.0.callback else {
            return Ok(());
        };
        match callback(&value, &old) {
            Err(err) if self.0.options.user => {
                let owner = self.owner();
                let info = format!("callback for watcher \"{}\"", self.0.expression);
                let _ = handle_error(err, owner.as_ref(), &info);
                Ok(())
            }
            other => other,
        }
    }

    /// Recompute a lazy watcher.
    pub fn evaluate(&self) -> Result<()> {
        let value = self.get()?;
        *self.0.value.borrow_mut() = value;
        self.0.dirty.set(false);
        Ok(())
    }

    /// Make the current evaluator depend on everything this watcher depends on.
    pub fn depend(&self) {
        let deps: SmallVec<[DepId; 8]> = self.0.deps.borrow().iter().copied().collect();
        for id in deps {
            dep::depend(id);
        }
    }

    /// Unsubscribe from every dep and deactivate. Idempotent.
    pub fn teardown(&self) {
        if !self.0.active.get() {
            return;
        }
        if let Some(owner) = self.owner() {
            if !owner.is_being_destroyed() {
                owner.remove_watcher(self.0.id);
            }
        }
        let deps = std::mem::take(&mut *self.0.deps.borrow_mut());
        for dep in deps {
            Runtime::remove_sub(dep, self.0.id);
        }
        self.0.active.set(false);
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.0.id)
            .field("expression", &self.0.expression)
            .field("active", &self.0.active.get())
            .field("dirty", &self.0.dirty.get())
            .field("dep_count", &self.0.deps.borrow().len())
            .finish()
    }
}

/// Read every nested reactive value so the current watcher depends on all
/// of them. Safe on cyclic structures.
pub fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    traverse_inner(value, &mut seen);
}

fn traverse_inner(value: &Value, seen: &mut HashSet<usize>) {
    match value {
        Value::Array(array) => {
            if !seen.insert(array.addr()) {
                return;
            }
            for item in array.to_vec() {
                traverse_inner(&item, seen);
            }
        }
        Value::Object(object) => {
            if !seen.insert(object.addr()) {
                return;
            }
            for key in object.keys() {
                if let Some(item) = object.get(&key) {
                    traverse_inner(&item, seen);
                }
            }
        }
        _ => {}
    }
}

/// Split a simple dot-delimited path. Returns `None` if the path contains
/// anything but word characters, `$` and `.`.
pub fn parse_path(path: &str) -> Option<SmallVec<[String; 4]>> {
    let valid = path
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '.');
    if !valid {
        return None;
    }
    Some(path.split('.').map(str::to_string).collect())
}

/// Walk `segments` from `root`, yielding null as soon as a step misses.
pub(crate) fn resolve_path(root: &Value, segments: &[String]) -> Value {
    let mut current = root.clone();
    for segment in segments {
        current = match &current {
            Value::Object(object) => object.get(segment).unwrap_or_default(),
            Value::Array(array) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| array.get(index))
                .unwrap_or_default(),
            _ => return Value::Null,
        };
    }
    current
}

pub(crate) fn warn_invalid_path(path: &str, vm: Option<&Component>) {
    warn(
        &format!(
            "Failed watching path: \"{path}\". Watchers only accept simple dot-delimited paths; \
             use a function getter instead."
        ),
        vm,
    );
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::reactive::observe;
    use serde_json::json;

    fn reactive(json: serde_json::Value) -> Value {
        let value = Value::from(json);
        observe(&value, false);
        value
    }

    fn sync() -> WatcherOptions {
        WatcherOptions { sync: true, ..Default::default() }
    }

    #[test]
    fn watcher_evaluates_on_creation() {
        let state = reactive(json!({ "a": 2 }));
        let obj = state.as_object().unwrap().clone();
        let watcher = Watcher::new(move || Ok(obj.get("a").unwrap_or_default()), None, sync()).unwrap();
        assert_eq!(watcher.value(), Value::from(2.0));
        assert_eq!(watcher.deps().len(), 1);
    }

    #[test]
    fn conditional_reads_prune_stale_subscriptions() {
        let state = reactive(json!({ "flag": true, "a": 1, "b": 2 }));
        let obj = state.as_object().unwrap().clone();
        let dep_a = obj.property_dep("a").unwrap();
        let dep_b = obj.property_dep("b").unwrap();

        let reader = obj.clone();
        let watcher = Watcher::new(
            move || {
                let flag = reader.get("flag").and_then(|v| v.as_bool()).unwrap_or(false);
                Ok(if flag { reader.get("a") } else { reader.get("b") }.unwrap_or_default())
            },
            None,
            sync(),
        )
        .unwrap();

        assert_eq!(Runtime::subscriber_count(dep_a), 1);
        assert_eq!(Runtime::subscriber_count(dep_b), 0);

        obj.assign("flag", Value::Bool(false));

        assert_eq!(Runtime::subscriber_count(dep_a), 0);
        assert_eq!(Runtime::subscriber_count(dep_b), 1);
        assert_eq!(watcher.value(), Value::from(2.0));
        assert!(!watcher.deps().contains(&dep_a));
    }

    #[test]
    fn callback_receives_new_and_old() {
        let state = reactive(json!({ "a": 1 }));
        let obj = state.as_object().unwrap().clone();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();

        let reader = obj.clone();
        let _watcher = Watcher::new(
            move || Ok(reader.get("a").unwrap_or_default()),
            Some(Rc::new(move |new: &Value, old: &Value| {
                sink.borrow_mut().push((new.as_f64(), old.as_f64()));
                Ok(())
            })),
            sync(),
        )
        .unwrap();

        obj.assign("a", Value::from(5.0));
        assert_eq!(seen.borrow().as_slice(), &[(Some(5.0), Some(1.0))]);
    }

    #[test]
    fn lazy_watcher_marks_dirty_and_evaluates_on_demand() {
        let state = reactive(json!({ "a": 1 }));
        let obj = state.as_object().unwrap().clone();
        let reader = obj.clone();
        let watcher = Watcher::new(
            move || Ok(Value::from(reader.get("a").and_then(|v| v.as_f64()).unwrap_or(0.0) * 2.0)),
            None,
            WatcherOptions { lazy: true, ..Default::default() },
        )
        .unwrap();

        assert!(watcher.is_dirty());
        watcher.evaluate().unwrap();
        assert_eq!(watcher.value(), Value::from(2.0));
        assert!(!watcher.is_dirty());

        obj.assign("a", Value::from(4.0));
        assert!(watcher.is_dirty());
        assert_eq!(watcher.value(), Value::from(2.0));
    }

    #[test]
    fn deep_watcher_sees_nested_mutation() {
        let state = reactive(json!({ "user": { "profile": { "name": "a" } } }));
        let obj = state.as_object().unwrap().clone();
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();

        let reader = obj.clone();
        let _watcher = Watcher::new(
            move || Ok(reader.get("user").unwrap_or_default()),
            Some(Rc::new(move |_: &Value, _: &Value| {
                counter.set(counter.get() + 1);
                Ok(())
            })),
            WatcherOptions { deep: true, sync: true, ..Default::default() },
        )
        .unwrap();

        let profile = resolve_path(&state, &["user".into(), "profile".into()]);
        profile.as_object().unwrap().assign("name", Value::from("b"));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn user_getter_error_is_reported_and_keeps_old_value() {
        let state = reactive(json!({ "fail": false }));
        let obj = state.as_object().unwrap().clone();
        let reader = obj.clone();
        let watcher = Watcher::new(
            move || {
                if reader.get("fail").and_then(|v| v.as_bool()).unwrap_or(false) {
                    Err(Error::msg("getter failed"))
                } else {
                    Ok(Value::from(1.0))
                }
            },
            None,
            WatcherOptions { user: true, ..Default::default() },
        )
        .unwrap();

        obj.assign("fail", Value::Bool(true));
        assert!(watcher.run().is_ok());
        assert_eq!(watcher.value(), Value::from(1.0));
    }

    #[test]
    fn non_user_getter_error_propagates() {
        let result = Watcher::new(|| Err(Error::msg("nope")), None, WatcherOptions::default());
        assert_eq!(result.err(), Some(Error::msg("nope")));
    }

    #[test]
    fn teardown_unsubscribes_and_is_idempotent() {
        let state = reactive(json!({ "a": 1 }));
        let obj = state.as_object().unwrap().clone();
        let dep = obj.property_dep("a").unwrap();
        let reader = obj.clone();
        let watcher = Watcher::new(move || Ok(reader.get("a").unwrap_or_default()), None, sync()).unwrap();

        assert_eq!(Runtime::subscriber_count(dep), 1);
        watcher.teardown();
        watcher.teardown();
        assert_eq!(Runtime::subscriber_count(dep), 0);
        assert!(!watcher.is_active());
        assert!(watcher.run().is_ok());
    }

    #[test]
    fn dropping_a_watcher_unsubscribes_it() {
        let state = reactive(json!({ "a": 1 }));
        let obj = state.as_object().unwrap().clone();
        let dep = obj.property_dep("a").unwrap();
        let reader = obj.clone();
        let watcher = Watcher::new(move || Ok(reader.get("a").unwrap_or_default()), None, sync()).unwrap();

        drop(watcher);
        assert_eq!(Runtime::subscriber_count(dep), 0);
    }

    #[test]
    fn path_watcher_follows_nested_keys() {
        let state = reactive(json!({ "a": { "b": [10, 20] } }));
        let watcher = Watcher::with_path(state.clone(), "a.b.1", None, sync()).unwrap();
        assert_eq!(watcher.value(), Value::from(20.0));
    }

    #[test]
    fn invalid_paths_are_rejected() {
        assert!(parse_path("a.b").is_some());
        assert!(parse_path("$data.x_1").is_some());
        assert!(parse_path("a[0]").is_none());
        assert!(parse_path("a + b").is_none());
    }

    #[test]
    fn computed_style_depend_forwards_dependencies() {
        let state = reactive(json!({ "a": 1 }));
        let obj = state.as_object().unwrap().clone();
        let dep = obj.property_dep("a").unwrap();
        let reader = obj.clone();
        let inner = Watcher::new(
            move || Ok(reader.get("a").unwrap_or_default()),
            None,
            WatcherOptions { lazy: true, ..Default::default() },
        )
        .unwrap();
        inner.evaluate().unwrap();

        let forwarded = inner.clone();
        let _outer = Watcher::new(
            move || {
                forwarded.depend();
                Ok(Value::Null)
            },
            None,
            sync(),
        )
        .unwrap();

        assert_eq!(Runtime::subscriber_count(dep), 2);
    }
}
