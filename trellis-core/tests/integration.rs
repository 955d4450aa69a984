//! Integration Tests for the Update Engine
//!
//! These tests drive components, the scheduler and the differ together
//! through the public API.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::json;

use trellis_core::config;
use trellis_core::reactive::{observe, set, Value, Watcher, WatcherOptions};
use trellis_core::vdom::{Backend, MemoryBackend, NodeHandle, Op, Patcher, VNode};
use trellis_core::{next_tick_async, run_microtasks, Capture, Component, ComponentOptions, Error, Hook};

fn setup() -> (Rc<MemoryBackend>, Rc<Patcher>, NodeHandle) {
    let backend = Rc::new(MemoryBackend::new());
    let patcher = Patcher::new(backend.clone());
    let root = backend.create_element("root");
    (backend, patcher, root)
}

fn keyed_list(items: &[(&str, &str)]) -> VNode {
    VNode::element(
        "ul",
        items
            .iter()
            .map(|(key, text)| VNode::element("li", vec![VNode::text(*text)]).with_key(*key))
            .collect(),
    )
}

fn list(keys: &[&str]) -> VNode {
    keyed_list(&keys.iter().map(|k| (*k, *k)).collect::<Vec<_>>())
}

/// Patch `old` into `new` and return the recorded operations.
fn diff(old: &VNode, new: &VNode) -> (Rc<MemoryBackend>, Vec<Op>) {
    let (backend, patcher, root) = setup();
    patcher.create(old, Some(root), None);
    backend.clear_ops();
    patcher.patch(Some(old), new);
    let ops = backend.take_ops();
    (backend, ops)
}

fn count(ops: &[Op], pred: impl Fn(&Op) -> bool) -> usize {
    ops.iter().filter(|op| pred(op)).count()
}

/// Moving the first item to the end is a single relocation.
#[test]
fn moving_one_item_to_the_end_is_one_move() {
    let old = list(&["a", "b", "c", "d"]);
    let new = list(&["b", "c", "d", "a"]);
    let (backend, ops) = diff(&old, &new);

    assert_eq!(count(&ops, Op::is_move), 1);
    assert_eq!(count(&ops, Op::is_create), 0);
    assert_eq!(count(&ops, Op::is_remove), 0);
    assert_eq!(
        backend.serialize(new.elm().unwrap()),
        "<ul><li>b</li><li>c</li><li>d</li><li>a</li></ul>"
    );
}

/// Rotating the last item to the front is a single relocation.
#[test]
fn moving_the_last_item_to_the_front_is_one_move() {
    let old = list(&["a", "b", "c"]);
    let new = list(&["c", "a", "b"]);
    let (backend, ops) = diff(&old, &new);

    assert_eq!(count(&ops, Op::is_move), 1);
    assert_eq!(count(&ops, Op::is_create), 0);
    assert_eq!(
        backend.serialize(new.elm().unwrap()),
        "<ul><li>c</li><li>a</li><li>b</li></ul>"
    );
}

/// Changing content under stable keys patches in place.
#[test]
fn changed_values_under_the_same_keys_do_not_move() {
    let old = keyed_list(&[("1", "one"), ("2", "two")]);
    let new = keyed_list(&[("1", "uno"), ("2", "dos")]);
    let (_, ops) = diff(&old, &new);

    assert_eq!(count(&ops, Op::is_move), 0);
    assert_eq!(count(&ops, Op::is_create), 0);
    assert_eq!(count(&ops, |op| matches!(op, Op::SetText { .. })), 2);
}

/// Patching a tree into an identical one touches nothing.
#[test]
fn identical_trees_produce_no_operations() {
    let build = || {
        VNode::element(
            "div",
            vec![VNode::text("x"), VNode::element("span", vec![]).with_attr("class", "c")],
        )
        .with_attr("id", "app")
    };
    let (_, ops) = diff(&build(), &build());
    assert!(ops.is_empty(), "unexpected ops: {ops:?}");
}

/// A failing re-render is captured once and the last good tree stays.
#[test]
fn render_errors_keep_the_previous_tree() {
    let captured = Rc::new(Cell::new(0));
    let counter = captured.clone();

    let child = ComponentOptions::builder("Fragile")
        .data(|_| Ok(json!({ "fail": false, "text": "ok" }).into()))
        .render(|vm| {
            if vm.get("fail").as_bool() == Some(true) {
                return Err(Error::msg("render failed"));
            }
            Ok(VNode::element("span", vec![VNode::text(vm.get("text").to_display_string())]))
        })
        .build();
    let parent = ComponentOptions::builder("Boundary")
        .error_captured(move |err, _, info| {
            assert_eq!(info, "render");
            assert_eq!(err, &Error::msg("render failed"));
            counter.set(counter.get() + 1);
            Ok(Capture::Handled)
        })
        .render(move |_| Ok(VNode::element("div", vec![VNode::component(&child)])))
        .build();

    let (backend, patcher, root) = setup();
    let vm = Component::new(parent);
    vm.mount(&patcher, root).unwrap();
    backend.clear_ops();

    let child = vm.children()[0].clone();
    child.set("text", "changed");
    child.set("fail", true);
    run_microtasks().unwrap();

    assert_eq!(captured.get(), 1);
    assert!(backend.ops().is_empty());
    assert_eq!(backend.serialize(root), "<root><div><span>ok</span></div></root>");
}

/// `updated` runs for children before their parents.
#[test]
fn updated_hooks_run_child_first() {
    let log = Rc::new(RefCell::new(Vec::new()));

    let child_log = log.clone();
    let child = ComponentOptions::builder("Child")
        .prop("label")
        .hook(Hook::Updated, move |_| {
            child_log.borrow_mut().push("child");
            Ok(())
        })
        .render(|vm| Ok(VNode::element("span", vec![VNode::text(vm.get("label").to_display_string())])))
        .build();

    let parent_log = log.clone();
    let parent = ComponentOptions::builder("Parent")
        .data(|_| Ok(json!({ "label": "a" }).into()))
        .hook(Hook::Updated, move |_| {
            parent_log.borrow_mut().push("parent");
            Ok(())
        })
        .render(move |vm| {
            Ok(VNode::element(
                "div",
                vec![VNode::component(&child).with_prop("label", vm.get("label"))],
            ))
        })
        .build();

    let (backend, patcher, root) = setup();
    let vm = Component::new(parent);
    vm.mount(&patcher, root).unwrap();

    vm.set("label", "b");
    run_microtasks().unwrap();

    assert_eq!(log.borrow().as_slice(), ["child", "parent"]);
    assert_eq!(backend.serialize(root), "<root><div><span>b</span></div></root>");
}

/// A kept-alive child survives being toggled out and back in.
#[test]
fn keep_alive_round_trip() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let hook = |name: &'static str| {
        let log = log.clone();
        move |_: &Component| -> trellis_core::Result<()> {
            log.borrow_mut().push(name);
            Ok(())
        }
    };

    let child = ComponentOptions::builder("Tab")
        .hook(Hook::Created, hook("created"))
        .hook(Hook::Mounted, hook("mounted"))
        .hook(Hook::Activated, hook("activated"))
        .hook(Hook::Deactivated, hook("deactivated"))
        .hook(Hook::Destroyed, hook("destroyed"))
        .render(|_| Ok(VNode::element("span", vec![VNode::text("kept")])))
        .build();
    let parent = ComponentOptions::builder("Tabs")
        .data(|_| Ok(json!({ "show": true }).into()))
        .render(move |vm| {
            let children = if vm.get("show").as_bool() == Some(true) {
                vec![VNode::component(&child).keep_alive()]
            } else {
                vec![]
            };
            Ok(VNode::element("div", children))
        })
        .build();

    let (backend, patcher, root) = setup();
    let vm = Component::new(parent);
    vm.mount(&patcher, root).unwrap();
    let instance = vm.children()[0].clone();
    assert_eq!(log.borrow().as_slice(), ["created", "mounted", "activated"]);
    log.borrow_mut().clear();

    vm.set("show", false);
    run_microtasks().unwrap();
    assert_eq!(log.borrow().as_slice(), ["deactivated"]);
    assert!(instance.is_inactive());
    assert_eq!(backend.serialize(root), "<root><div></div></root>");
    log.borrow_mut().clear();

    vm.set("show", true);
    run_microtasks().unwrap();
    assert_eq!(log.borrow().as_slice(), ["activated"]);
    assert!(!instance.is_inactive());
    assert!(vm.children()[0].ptr_eq(&instance));
    assert_eq!(backend.serialize(root), "<root><div><span>kept</span></div></root>");

    log.borrow_mut().clear();
    vm.destroy();
    assert!(instance.is_destroyed());
    assert_eq!(log.borrow().last(), Some(&"destroyed"));
}

/// Unkeyed kept-alive siblings of one type each get their own instance,
/// and removed ones are reused rather than shared.
#[test]
fn kept_alive_siblings_get_their_own_instances() {
    let warnings = Rc::new(RefCell::new(Vec::new()));
    let sink = warnings.clone();
    config::configure(|c| c.warn_handler = Some(Rc::new(move |msg, _| sink.borrow_mut().push(msg.to_string()))));

    let tab = ComponentOptions::builder("Tab")
        .render(|_| Ok(VNode::element("span", vec![VNode::text("t")])))
        .build();
    let parent = ComponentOptions::builder("Tabs")
        .data(|_| Ok(json!({ "n": 2 }).into()))
        .render(move |vm| {
            let n = vm.get("n").as_f64().unwrap_or(0.0) as usize;
            Ok(VNode::element("div", (0..n).map(|_| VNode::component(&tab).keep_alive()).collect()))
        })
        .build();

    let (backend, patcher, root) = setup();
    let vm = Component::new(parent);
    vm.mount(&patcher, root).unwrap();
    assert_eq!(vm.children().len(), 2);
    assert_eq!(backend.serialize(root), "<root><div><span>t</span><span>t</span></div></root>");
    assert_eq!(warnings.borrow().len(), 1);

    vm.set("n", 3.0);
    run_microtasks().unwrap();
    assert_eq!(vm.children().len(), 3);
    assert_eq!(vm.kept_alive().len(), 3);
    assert_eq!(
        backend.serialize(root),
        "<root><div><span>t</span><span>t</span><span>t</span></div></root>"
    );
    assert_eq!(warnings.borrow().len(), 2);

    vm.set("n", 1.0);
    run_microtasks().unwrap();
    assert_eq!(vm.children().iter().filter(|c| c.is_inactive()).count(), 2);
    assert_eq!(backend.serialize(root), "<root><div><span>t</span></div></root>");

    vm.set("n", 3.0);
    run_microtasks().unwrap();
    assert_eq!(vm.children().len(), 3);
    assert!(vm.children().iter().all(|c| !c.is_inactive()));
    assert_eq!(
        backend.serialize(root),
        "<root><div><span>t</span><span>t</span><span>t</span></div></root>"
    );
    assert_eq!(warnings.borrow().len(), 2);

    config::configure(|c| c.warn_handler = None);
}

fn counting_watcher(read: impl Fn() + 'static) -> (Watcher, Rc<Cell<usize>>) {
    let runs = Rc::new(Cell::new(0));
    let counter = runs.clone();
    let watcher = Watcher::new(
        move || {
            read();
            counter.set(counter.get() + 1);
            Ok(Value::Null)
        },
        None,
        WatcherOptions {
            sync: true,
            ..Default::default()
        },
    )
    .unwrap();
    (watcher, runs)
}

/// Plain assignment of a new key is invisible; `set` notifies once.
#[test]
fn new_keys_need_set_to_be_reactive() {
    let state = Value::from(json!({ "a": 1 }));
    observe(&state, false);
    let obj = state.as_object().unwrap().clone();

    let reader = obj.clone();
    let (_watcher, runs) = counting_watcher(move || {
        reader.keys();
    });
    assert_eq!(runs.get(), 1);

    obj.assign("b", Value::from(2.0));
    assert_eq!(runs.get(), 1);

    set(&state, "c", Value::from(3.0));
    assert_eq!(runs.get(), 2);
    assert!(obj.property_dep("c").is_some());
}

/// Each invalid `set` target yields exactly one diagnostic.
#[test]
fn invalid_set_targets_warn_once_each() {
    let warnings = Rc::new(RefCell::new(Vec::new()));
    let sink = warnings.clone();
    config::configure(|c| c.warn_handler = Some(Rc::new(move |msg, _| sink.borrow_mut().push(msg.to_string()))));

    set(&Value::Null, "x", Value::from(1.0));
    assert_eq!(warnings.borrow().len(), 1);

    set(&Value::from(3.0), "x", Value::from(1.0));
    assert_eq!(warnings.borrow().len(), 2);

    let vm = Component::new(
        ComponentOptions::builder("App")
            .data(|_| Ok(json!({ "a": 1 }).into()))
            .build(),
    );
    set(&Value::Object(vm.data()), "late", Value::from(1.0));
    assert_eq!(warnings.borrow().len(), 3);
    assert!(!vm.data().contains_key("late"));

    config::configure(|c| c.warn_handler = None);
}

/// Without the async scheduler, subscribers run in creation order no matter
/// when they subscribed.
#[test]
fn sync_mode_notifies_in_creation_order() {
    config::configure(|c| c.async_mode = false);

    let state = Value::from(json!({ "flag": false, "x": 0 }));
    observe(&state, false);
    let obj = state.as_object().unwrap().clone();
    let log = Rc::new(RefCell::new(Vec::new()));

    let (o1, l1) = (obj.clone(), log.clone());
    let first = Watcher::new(
        move || {
            if o1.get("flag").and_then(|v| v.as_bool()) == Some(true) {
                o1.get("x");
            }
            l1.borrow_mut().push("first");
            Ok(Value::Null)
        },
        None,
        WatcherOptions::default(),
    )
    .unwrap();
    let (o2, l2) = (obj.clone(), log.clone());
    let second = Watcher::new(
        move || {
            o2.get("x");
            l2.borrow_mut().push("second");
            Ok(Value::Null)
        },
        None,
        WatcherOptions::default(),
    )
    .unwrap();
    assert!(first.id() < second.id());

    // `first` now subscribes to `x` after `second` did.
    obj.assign("flag", Value::from(true));
    log.borrow_mut().clear();

    obj.assign("x", Value::from(1.0));
    assert_eq!(log.borrow().as_slice(), ["first", "second"]);

    config::configure(|c| c.async_mode = true);
}

/// `next_tick_async` resolves once the pending re-render has been applied.
#[tokio::test]
async fn next_tick_async_resolves_after_the_flush() {
    let options = ComponentOptions::builder("Counter")
        .data(|_| Ok(json!({ "count": 0 }).into()))
        .render(|vm| Ok(VNode::element("b", vec![VNode::text(vm.get("count").to_display_string())])))
        .build();
    let (backend, patcher, root) = setup();
    let vm = Component::new(options);
    vm.mount(&patcher, root).unwrap();

    vm.set("count", 1.0);
    let ticked = next_tick_async();
    assert_eq!(run_microtasks().unwrap(), 2);
    ticked.await;

    assert_eq!(backend.serialize(root), "<root><b>1</b></root>");
}
