//! Instance lifecycle: initialization, mounting, the render watcher,
//! keep-alive activation and teardown.

use std::rc::Rc;

use indexmap::IndexMap;

use super::{Component, Hook};
use crate::error::{handle_error, report_uncaught, warn, Error, Result};
use crate::reactive::{
    define_reactive, observe, untracked, BeforeHook, Getter, ReactiveContext, ReactiveObject, Value,
    Watcher, WatcherOptions,
};
use crate::scheduler::queue_activated_component;
use crate::vdom::{invoke_insert_hooks, ComponentVNode, NodeHandle, Patcher, VNode};

/// Run every handler registered for `hook`. Handler errors go through the
/// error funnel and never abort the caller.
pub(crate) fn call_hook(vm: &Component, hook: Hook) {
    let options = vm.options();
    let handlers = options.hooks(hook);
    if handlers.is_empty() {
        return;
    }
    tracing::debug!(component = %vm.name(), uid = vm.uid(), %hook, "hook");

    let _untracked = ReactiveContext::untracked();
    for handler in handlers {
        if let Err(err) = handler(vm) {
            if let Err(err) = handle_error(err, Some(vm), &format!("{hook} hook")) {
                report_uncaught(err);
            }
        }
    }
}

pub(crate) fn init(vm: &Component, props: &IndexMap<String, Value>) {
    call_hook(vm, Hook::BeforeCreate);
    init_props(vm, props);
    init_data(vm);
    init_computed(vm);
    init_watch(vm);
    call_hook(vm, Hook::Created);
}

fn init_props(vm: &Component, props: &IndexMap<String, Value>) {
    let options = vm.options();
    for (key, default) in options.props() {
        let value = match (props.get(key), default) {
            (Some(value), _) => value.clone(),
            (None, Some(default)) => {
                vm.0.defaulted.borrow_mut().insert(key.clone());
                default()
            }
            (None, None) => Value::Null,
        };
        define_reactive(&vm.0.props, key, value, false);
    }
}

fn init_data(vm: &Component) {
    let options = vm.options();
    let data = match options.data() {
        Some(factory) => match untracked(|| factory(vm)) {
            Ok(Value::Object(data)) => data,
            Ok(_) => {
                warn("data functions should return an object.", Some(vm));
                ReactiveObject::new()
            }
            Err(err) => {
                let _ = handle_error(err, Some(vm), "data()");
                ReactiveObject::new()
            }
        },
        None => ReactiveObject::new(),
    };

    for key in data.keys() {
        if vm.0.props.contains_key(&key) {
            warn(
                &format!("The data property `{key}` is already declared as a prop. Use prop default value instead."),
                Some(vm),
            );
        }
    }
    observe(&Value::Object(data.clone()), true);
    let _ = vm.0.data.set(data);
}

fn init_computed(vm: &Component) {
    let options = vm.options();
    let data = vm.data();
    for (key, compute) in options.computed() {
        if vm.0.props.contains_key(key) || data.contains_key(key) {
            warn(
                &format!("The computed property `{key}` is already defined as a prop or in data."),
                Some(vm),
            );
            continue;
        }
        let compute = compute.clone();
        let weak = vm.downgrade();
        let getter: Getter = Rc::new(move || match weak.upgrade() {
            Some(vm) => compute(&vm),
            None => Ok(Value::Null),
        });
        let options = WatcherOptions {
            lazy: true,
            ..Default::default()
        };
        let watcher = Watcher::build(Some(vm), key.clone(), getter, None, options, false);
        vm.0.computed.borrow_mut().insert(key.clone(), watcher);
    }
}

fn init_watch(vm: &Component) {
    let options = vm.options();
    for def in options.watch() {
        if let Err(err) = vm.watch(def.clone()) {
            let _ = handle_error(err, Some(vm), &format!("watcher \"{}\"", def.expression()));
        }
    }
}

/// Install the render watcher, which renders and patches immediately.
pub(crate) fn mount_component(vm: &Component, patcher: &Rc<Patcher>, container: Option<NodeHandle>) -> Result<()> {
    *vm.0.patcher.borrow_mut() = Some(patcher.clone());
    vm.0.container.set(container);

    if vm.options().render().is_none() {
        let err = Error::MissingRender {
            name: vm.name().to_string(),
        };
        if !vm.0.has_placeholder.get() {
            return Err(err);
        }
        warn(&err.to_string(), Some(vm));
    }

    call_hook(vm, Hook::BeforeMount);

    let weak = vm.downgrade();
    let getter: Getter = Rc::new(move || {
        if let Some(vm) = weak.upgrade() {
            render_and_patch(&vm);
        }
        Ok(Value::Null)
    });
    let weak = vm.downgrade();
    let before: BeforeHook = Rc::new(move || {
        if let Some(vm) = weak.upgrade() {
            if vm.is_mounted() && !vm.is_destroyed() {
                call_hook(&vm, Hook::BeforeUpdate);
            }
        }
        Ok(())
    });
    let options = WatcherOptions {
        before: Some(before),
        ..Default::default()
    };
    let watcher = Watcher::build(Some(vm), format!("render <{}>", vm.name()), getter, None, options, true);
    *vm.0.render_watcher.borrow_mut() = Some(watcher.clone());
    watcher.init()?;

    // Children are marked mounted by their parent's insert queue.
    if !vm.0.has_placeholder.get() {
        vm.0.is_mounted.set(true);
        call_hook(vm, Hook::Mounted);
    }
    Ok(())
}

/// The render watcher's getter.
fn render_and_patch(vm: &Component) {
    let options = vm.options();
    let rendered = match options.render() {
        Some(render) => render(vm),
        None => Ok(VNode::comment("")),
    };
    let vnode = match rendered {
        Ok(vnode) => vnode,
        Err(err) => {
            if let Err(err) = handle_error(err, Some(vm), "render") {
                report_uncaught(err);
            }
            // Keep showing the last good tree.
            if vm.0.vnode.borrow().is_some() {
                return;
            }
            VNode::comment("")
        }
    };
    let Some(patcher) = vm.patcher() else {
        return;
    };

    let _untracked = ReactiveContext::untracked();
    let _span = tracing::debug_span!("patch", component = %vm.name(), uid = vm.uid()).entered();

    let prev = vm.0.vnode.borrow_mut().take();
    let queue = patcher.patch_with_owner(Some(vm), prev.as_ref(), &vnode);
    vm.0.el.set(vnode.elm());
    *vm.0.vnode.borrow_mut() = Some(vnode);
    propagate_el(vm);

    if prev.is_some() {
        invoke_insert_hooks(queue);
    } else if vm.0.has_placeholder.get() {
        // Flushed by the parent once its own tree is attached.
        vm.0.pending_insert.borrow_mut().extend(queue);
    } else {
        if let (Some(container), Some(elm)) = (vm.0.container.get(), vm.el()) {
            patcher.backend().append_child(container, elm);
        }
        invoke_insert_hooks(queue);
    }
}

/// Ancestors whose root node is this component share its element.
fn propagate_el(vm: &Component) {
    let mut child = vm.clone();
    while let Some(parent) = child.parent() {
        let shares_root = parent
            .0
            .vnode
            .borrow()
            .as_ref()
            .and_then(VNode::as_component)
            .and_then(ComponentVNode::instance)
            .is_some_and(|instance| instance.ptr_eq(&child));
        if !shares_root {
            break;
        }
        parent.0.el.set(child.el());
        child = parent;
    }
}

/// Instantiate and render the component behind a placeholder. The result
/// stays detached until the parent inserts it.
pub(crate) fn create_child_component(
    patcher: &Rc<Patcher>,
    owner: Option<&Component>,
    placeholder: &ComponentVNode,
) -> Component {
    let vm = Component::create(
        placeholder.options.clone(),
        owner,
        &placeholder.props,
        placeholder.listeners.clone(),
    );
    vm.0.has_placeholder.set(true);
    if let Err(err) = mount_component(&vm, patcher, None) {
        if let Err(err) = handle_error(err, Some(&vm), "mount") {
            report_uncaught(err);
        }
    }
    vm
}

/// Hand a re-rendered placeholder's props and listeners to its instance.
pub(crate) fn update_child_component(vm: &Component, placeholder: &ComponentVNode) {
    if vm.is_destroyed() {
        return;
    }
    *vm.0.listeners.borrow_mut() = placeholder.listeners.clone();

    let options = vm.options();
    for (key, default) in options.props() {
        match placeholder.props.get(key) {
            Some(value) => {
                vm.0.defaulted.borrow_mut().remove(key);
                vm.0.props.assign(key, value.clone());
            }
            None => {
                if vm.0.defaulted.borrow().contains(key) {
                    continue;
                }
                let value = match default {
                    Some(default) => {
                        vm.0.defaulted.borrow_mut().insert(key.clone());
                        default()
                    }
                    None => Value::Null,
                };
                vm.0.props.assign(key, value);
            }
        }
    }
}

/// Insert notification for a component placeholder.
pub(crate) fn component_inserted(vm: &Component, owner: Option<&Component>, keep_alive: bool) {
    if !vm.is_mounted() {
        vm.0.is_mounted.set(true);
        call_hook(vm, Hook::Mounted);
    }
    if keep_alive {
        if owner.is_some_and(Component::is_mounted) {
            // Owner is re-rendering; activate once the flush drains.
            queue_activated_component(vm.clone());
        } else {
            activate_child_component(vm, true);
        }
    }
}

fn is_in_inactive_tree(vm: &Component) -> bool {
    let mut current = vm.parent();
    while let Some(parent) = current {
        if parent.is_inactive() {
            return true;
        }
        current = parent.parent();
    }
    false
}

pub(crate) fn activate_child_component(vm: &Component, direct: bool) {
    if direct {
        vm.0.direct_inactive.set(false);
        if is_in_inactive_tree(vm) {
            return;
        }
    } else if vm.0.direct_inactive.get() {
        return;
    }
    if vm.0.inactive.get() != Some(false) {
        vm.0.inactive.set(Some(false));
        for child in vm.children() {
            activate_child_component(&child, false);
        }
        call_hook(vm, Hook::Activated);
    }
}

pub(crate) fn deactivate_child_component(vm: &Component, direct: bool) {
    if direct {
        vm.0.direct_inactive.set(true);
        if is_in_inactive_tree(vm) {
            return;
        }
    }
    if vm.0.inactive.get() != Some(true) {
        vm.0.inactive.set(Some(true));
        for child in vm.children() {
            deactivate_child_component(&child, false);
        }
        call_hook(vm, Hook::Deactivated);
    }
}

pub(crate) fn destroy(vm: &Component) {
    if vm.is_being_destroyed() {
        return;
    }
    call_hook(vm, Hook::BeforeDestroy);
    vm.0.being_destroyed.set(true);

    if let Some(parent) = vm.parent() {
        if !parent.is_being_destroyed() {
            parent.0.children.borrow_mut().retain(|child| !child.ptr_eq(vm));
        }
    }

    let render = vm.0.render_watcher.borrow_mut().take();
    if let Some(watcher) = render {
        watcher.teardown();
    }
    let watchers = std::mem::take(&mut *vm.0.watchers.borrow_mut());
    for watcher in &watchers {
        watcher.teardown();
    }
    let computed: Vec<Watcher> = vm.0.computed.borrow().values().cloned().collect();
    for watcher in &computed {
        watcher.teardown();
    }

    if let Some(ob) = vm.0.data.get().and_then(ReactiveObject::observer) {
        ob.release_root();
    }
    vm.0.is_destroyed.set(true);

    let vnode = vm.0.vnode.borrow_mut().take();
    if let (Some(patcher), Some(vnode)) = (vm.patcher(), vnode.as_ref()) {
        patcher.destroy_with_owner(Some(vm), vnode);
    }

    call_hook(vm, Hook::Destroyed);
    vm.0.listeners.borrow_mut().clear();

    let cached: Vec<Component> = vm.0.kept_alive.borrow_mut().drain(..).flat_map(|(_, slot)| slot).collect();
    for child in cached {
        child.destroy();
    }
    tracing::debug!(component = %vm.name(), uid = vm.uid(), "destroyed");
}
