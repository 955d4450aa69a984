//! Component Instances
//!
//! A [`Component`] owns reactive state (props, data, computed properties and
//! watches), a render watcher that re-renders and patches whenever that
//! state changes, and its place in the component tree.
//!
//! # Lifecycle
//!
//! 1. Creation: `beforeCreate`, then props, data, computed properties and
//!    watches are set up, then `created`.
//! 2. Mount: `beforeMount`, then the first render and patch. A root
//!    component gets `mounted` right away; a child gets it once the parent's
//!    tree is attached, children first.
//! 3. Updates: the scheduler runs `beforeUpdate`, re-renders, and after the
//!    flush runs `updated` (children before parents).
//! 4. Keep-alive: a kept-alive child removed from the tree is deactivated
//!    instead of destroyed, and reactivated when it comes back.
//! 5. Destruction: `beforeDestroy`, teardown of every watcher, destroy hooks
//!    over the rendered tree, then `destroyed`.

pub(crate) mod lifecycle;
mod options;

use std::cell::{Cell, OnceCell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use crate::error::{handle_error, warn, Error, Result};
use crate::reactive::{
    parse_path, resolve_path, untracked, warn_invalid_path, Getter, ReactiveObject, Value,
    WatchCallback, Watcher, WatcherId, WatcherOptions,
};
use crate::vdom::{Inserted, Key, Listener, NodeHandle, Patcher, RefTarget, VNode};

pub use options::{
    ComponentBuilder, ComponentOptions, ComputedFn, DataFn, ErrorCapturedFn, Hook, HookFn,
    PropDefault, RenderFn, WatchDef, WatchHandler, WatchSource,
};

static NEXT_UID: AtomicU64 = AtomicU64::new(0);

/// Keep-alive cache key: component type plus placeholder key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CacheKey {
    options: usize,
    key: Option<Key>,
}

impl CacheKey {
    pub(crate) fn new(options: &Rc<ComponentOptions>, key: Option<&Key>) -> Self {
        Self {
            options: Rc::as_ptr(options) as usize,
            key: key.cloned(),
        }
    }
}

pub(crate) struct ComponentInner {
    uid: u64,
    options: Rc<ComponentOptions>,
    parent: Option<WeakComponent>,
    children: RefCell<Vec<Component>>,

    props: ReactiveObject,
    /// Props currently holding their default value.
    defaulted: RefCell<HashSet<String>>,
    data: OnceCell<ReactiveObject>,
    computed: RefCell<IndexMap<String, Watcher>>,
    watchers: RefCell<Vec<Watcher>>,
    render_watcher: RefCell<Option<Watcher>>,

    patcher: RefCell<Option<Rc<Patcher>>>,
    container: Cell<Option<NodeHandle>>,
    /// Last rendered tree.
    vnode: RefCell<Option<VNode>>,
    el: Cell<Option<NodeHandle>>,
    /// Created from a placeholder in a parent's tree.
    has_placeholder: Cell<bool>,
    pending_insert: RefCell<Vec<Inserted>>,

    listeners: RefCell<IndexMap<String, Listener>>,
    refs: RefCell<IndexMap<String, RefTarget>>,
    kept_alive: RefCell<IndexMap<CacheKey, Vec<Component>>>,

    is_mounted: Cell<bool>,
    is_destroyed: Cell<bool>,
    being_destroyed: Cell<bool>,
    /// `None` until first activated or deactivated.
    inactive: Cell<Option<bool>>,
    direct_inactive: Cell<bool>,
}

/// A component instance. Cloning shares the instance.
#[derive(Clone)]
pub struct Component(Rc<ComponentInner>);

/// A non-owning reference to a component.
#[derive(Clone)]
pub struct WeakComponent(Weak<ComponentInner>);

impl WeakComponent {
    pub fn upgrade(&self) -> Option<Component> {
        self.0.upgrade().map(Component)
    }
}

impl Component {
    /// Create a root component.
    pub fn new(options: Rc<ComponentOptions>) -> Self {
        Self::with_props(options, IndexMap::new())
    }

    /// Create a root component with initial prop values.
    pub fn with_props(options: Rc<ComponentOptions>, props: IndexMap<String, Value>) -> Self {
        Self::create(options, None, &props, IndexMap::new())
    }

    pub(crate) fn create(
        options: Rc<ComponentOptions>,
        parent: Option<&Component>,
        props: &IndexMap<String, Value>,
        listeners: IndexMap<String, Listener>,
    ) -> Self {
        let vm = Component(Rc::new(ComponentInner {
            uid: NEXT_UID.fetch_add(1, Ordering::Relaxed),
            options,
            parent: parent.map(Component::downgrade),
            children: RefCell::new(Vec::new()),
            props: ReactiveObject::new(),
            defaulted: RefCell::new(HashSet::new()),
            data: OnceCell::new(),
            computed: RefCell::new(IndexMap::new()),
            watchers: RefCell::new(Vec::new()),
            render_watcher: RefCell::new(None),
            patcher: RefCell::new(None),
            container: Cell::new(None),
            vnode: RefCell::new(None),
            el: Cell::new(None),
            has_placeholder: Cell::new(false),
            pending_insert: RefCell::new(Vec::new()),
            listeners: RefCell::new(listeners),
            refs: RefCell::new(IndexMap::new()),
            kept_alive: RefCell::new(IndexMap::new()),
            is_mounted: Cell::new(false),
            is_destroyed: Cell::new(false),
            being_destroyed: Cell::new(false),
            inactive: Cell::new(None),
            direct_inactive: Cell::new(false),
        }));
        if let Some(parent) = parent {
            parent.0.children.borrow_mut().push(vm.clone());
        }
        lifecycle::init(&vm, props);
        vm
    }

    /// Render into `container` and run `mounted`.
    pub fn mount(&self, patcher: &Rc<Patcher>, container: NodeHandle) -> Result<()> {
        if self.is_mounted() {
            return Ok(());
        }
        lifecycle::mount_component(self, patcher, Some(container))
    }

    /// Read a prop, data property or computed property, in that order.
    pub fn get(&self, key: &str) -> Value {
        if self.0.props.contains_key(key) {
            return self.0.props.get(key).unwrap_or_default();
        }
        let data = self.data();
        if data.contains_key(key) {
            return data.get(key).unwrap_or_default();
        }
        if self.0.computed.borrow().contains_key(key) {
            return self.computed(key).unwrap_or_else(|err| {
                let _ = handle_error(err, Some(self), &format!("computed property \"{key}\""));
                Value::Null
            });
        }
        warn(&format!("Property `{key}` is not defined on the instance."), Some(self));
        Value::Null
    }

    /// Write a data property. Writing a prop works but is overwritten the
    /// next time the parent re-renders.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        if self.0.props.contains_key(key) {
            warn(
                &format!(
                    "Avoid mutating a prop directly since the value will be overwritten whenever \
                     the parent re-renders. Prop being mutated: `{key}`"
                ),
                Some(self),
            );
            self.0.props.assign(key, value);
            return;
        }
        self.data().assign(key, value);
    }

    /// Read a computed property, recomputing it if it is stale.
    pub fn computed(&self, key: &str) -> Result<Value> {
        let watcher = self.0.computed.borrow().get(key).cloned();
        let Some(watcher) = watcher else {
            return Ok(Value::Null);
        };
        if watcher.is_dirty() {
            watcher.evaluate()?;
        }
        watcher.depend();
        Ok(watcher.value())
    }

    /// Watch a path or getter. Tear the returned watcher down to stop.
    pub fn watch(&self, def: WatchDef) -> Result<Watcher> {
        let expression = def.expression();
        let getter: Getter = match &def.source {
            WatchSource::Path(path) => match parse_path(path) {
                Some(segments) => {
                    let weak = self.downgrade();
                    Rc::new(move || {
                        let Some(vm) = weak.upgrade() else {
                            return Ok(Value::Null);
                        };
                        let Some((head, rest)) = segments.split_first() else {
                            return Ok(Value::Null);
                        };
                        Ok(resolve_path(&vm.get(head), rest))
                    })
                }
                None => {
                    warn_invalid_path(path, Some(self));
                    Rc::new(|| Ok(Value::Null))
                }
            },
            WatchSource::Getter(f) => {
                let f = f.clone();
                let weak = self.downgrade();
                Rc::new(move || match weak.upgrade() {
                    Some(vm) => f(&vm),
                    None => Ok(Value::Null),
                })
            }
        };

        let handler = def.handler.clone();
        let weak = self.downgrade();
        let callback: WatchCallback = Rc::new(move |new, old| match weak.upgrade() {
            Some(vm) => handler(&vm, new, old),
            None => Ok(()),
        });

        let options = WatcherOptions {
            deep: def.deep,
            user: true,
            sync: def.sync,
            ..Default::default()
        };
        let watcher = Watcher::build(Some(self), expression.clone(), getter, Some(callback), options, false);
        self.0.watchers.borrow_mut().push(watcher.clone());
        let watcher = watcher.init()?;

        if def.immediate {
            let value = watcher.value();
            if let Err(err) = untracked(|| (def.handler)(self, &value, &Value::Null)) {
                let info = format!("callback for immediate watcher \"{expression}\"");
                let _ = handle_error(err, Some(self), &info);
            }
        }
        Ok(watcher)
    }

    /// Queue a re-render.
    pub fn force_update(&self) -> Result<()> {
        let watcher = self.0.render_watcher.borrow().clone();
        match watcher {
            Some(watcher) => {
                watcher.update();
                Ok(())
            }
            None => Err(Error::NotMounted {
                name: self.name().to_string(),
            }),
        }
    }

    /// Tear the instance down. Idempotent.
    pub fn destroy(&self) {
        lifecycle::destroy(self);
    }

    /// Call the listener the parent registered for `event`.
    pub fn emit(&self, event: &str, args: &[Value]) -> Result<()> {
        let listener = self.0.listeners.borrow().get(event).cloned();
        match listener {
            Some(listener) => listener(args)
                .or_else(|err| handle_error(err, Some(self), &format!("event handler for \"{event}\""))),
            None => Ok(()),
        }
    }

    pub fn refs(&self) -> IndexMap<String, RefTarget> {
        self.0.refs.borrow().clone()
    }

    pub fn get_ref(&self, name: &str) -> Option<RefTarget> {
        self.0.refs.borrow().get(name).cloned()
    }

    pub fn children(&self) -> Vec<Component> {
        self.0.children.borrow().clone()
    }

    pub fn parent(&self) -> Option<Component> {
        self.0.parent.as_ref().and_then(WeakComponent::upgrade)
    }

    /// Root data object.
    pub fn data(&self) -> ReactiveObject {
        self.0.data.get().cloned().unwrap_or_default()
    }

    pub fn props(&self) -> ReactiveObject {
        self.0.props.clone()
    }

    /// Instances cached by kept-alive placeholders in this component's tree.
    pub fn kept_alive(&self) -> Vec<Component> {
        self.0.kept_alive.borrow().values().flatten().cloned().collect()
    }

    pub fn name(&self) -> &str {
        self.0.options.name()
    }

    pub fn uid(&self) -> u64 {
        self.0.uid
    }

    pub fn options(&self) -> Rc<ComponentOptions> {
        self.0.options.clone()
    }

    /// Root backend node of the rendered tree.
    pub fn el(&self) -> Option<NodeHandle> {
        self.0.el.get()
    }

    pub fn is_mounted(&self) -> bool {
        self.0.is_mounted.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.0.is_destroyed.get()
    }

    pub fn is_being_destroyed(&self) -> bool {
        self.0.being_destroyed.get()
    }

    pub fn is_inactive(&self) -> bool {
        self.0.inactive.get() == Some(true)
    }

    pub fn ptr_eq(&self, other: &Component) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakComponent {
        WeakComponent(Rc::downgrade(&self.0))
    }

    pub(crate) fn patcher(&self) -> Option<Rc<Patcher>> {
        self.0.patcher.borrow().clone()
    }

    pub(crate) fn set_inactive(&self, inactive: bool) {
        self.0.inactive.set(Some(inactive));
    }

    pub(crate) fn remove_watcher(&self, id: WatcherId) {
        let removed = {
            let mut watchers = self.0.watchers.borrow_mut();
            watchers
                .iter()
                .position(|w| w.id() == id)
                .map(|index| watchers.remove(index))
        };
        drop(removed);
    }

    pub(crate) fn register_ref(&self, name: &str, target: RefTarget) {
        self.0.refs.borrow_mut().insert(name.to_string(), target);
    }

    pub(crate) fn unregister_ref(&self, name: &str, target: &RefTarget) {
        let mut refs = self.0.refs.borrow_mut();
        if refs.get(name).is_some_and(|current| current.same_target(target)) {
            refs.shift_remove(name);
        }
    }

    /// A cached instance free to take a new placeholder: inactive, alive and
    /// not yet claimed by the current patch.
    pub(crate) fn cached_child(&self, key: &CacheKey, claimed: &HashSet<u64>) -> Option<Component> {
        self.0
            .kept_alive
            .borrow()
            .get(key)?
            .iter()
            .find(|vm| vm.is_inactive() && !vm.is_destroyed() && !claimed.contains(&vm.uid()))
            .cloned()
    }

    /// Cache `vm` under `key`. Returns how many instances now share the key.
    pub(crate) fn cache_child(&self, key: CacheKey, vm: Component) -> usize {
        let mut cache = self.0.kept_alive.borrow_mut();
        let slot = cache.entry(key).or_default();
        slot.push(vm);
        slot.len()
    }

    pub(crate) fn take_pending_insert(&self) -> Vec<Inserted> {
        std::mem::take(&mut *self.0.pending_insert.borrow_mut())
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("uid", &self.0.uid)
            .field("name", &self.name())
            .field("mounted", &self.is_mounted())
            .field("destroyed", &self.is_destroyed())
            .field("inactive", &self.0.inactive.get())
            .finish()
    }
}
