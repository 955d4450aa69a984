//! Update Scheduler
//!
//! The scheduler batches watcher re-runs. Many writes in one turn of the
//! host's event loop collapse into a single flush at the next microtask
//! boundary.
//!
//! # Algorithm
//!
//! 1. `queue_watcher` adds a watcher unless it is already pending. The first
//!    watcher of a batch schedules a flush with [`next_tick`].
//! 2. The flush sorts the queue by watcher id. Ids grow with creation order
//!    and parents are created before children, so parents re-render first.
//! 3. Each watcher's `before` hook runs, then the watcher itself.
//! 4. A watcher queued while flushing is inserted at its sorted position
//!    after the cursor, so it still runs in this flush.
//! 5. A watcher that re-queues itself more than `max_update_count` times in
//!    one flush stops the flush with a diagnostic.
//! 6. Once the queue drains, components re-entering a kept-alive state get
//!    their `activated` hook, and then `updated` hooks run in reverse queue
//!    order so children finish before their parents.

mod tick;

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use crate::component::{lifecycle, Component, Hook};
use crate::config;
use crate::error::{report_uncaught, warn, Error};
use crate::reactive::{Watcher, WatcherId};

pub use tick::{next_tick, next_tick_async, run_microtasks};

#[derive(Default)]
struct SchedulerState {
    queue: Vec<Watcher>,
    /// Ids currently pending in `queue`.
    has: HashSet<WatcherId>,
    /// Re-queue counts within the current flush.
    circular: HashMap<WatcherId, u32>,
    activated: Vec<Component>,
    waiting: bool,
    flushing: bool,
    /// Cursor into `queue` while flushing.
    index: usize,
}

thread_local! {
    static STATE: RefCell<SchedulerState> = RefCell::new(SchedulerState::default());
}

fn with_state<R>(f: impl FnOnce(&mut SchedulerState) -> R) -> R {
    STATE.with(|state| f(&mut state.borrow_mut()))
}

/// Queue a watcher for the next flush. Duplicates are ignored.
pub fn queue_watcher(watcher: Watcher) {
    let id = watcher.id();
    let schedule = with_state(|s| {
        if !s.has.insert(id) {
            return false;
        }
        if s.flushing {
            // Keep the queue sorted ahead of the cursor.
            let mut i = s.queue.len();
            while i > s.index + 1 && s.queue[i - 1].id() > id {
                i -= 1;
            }
            s.queue.insert(i, watcher);
        } else {
            s.queue.push(watcher);
        }
        !std::mem::replace(&mut s.waiting, true)
    });
    tracing::trace!(watcher = %id, "queued");

    if schedule {
        schedule_flush();
    }
}

/// Queue a kept-alive component for its `activated` hook at the end of the
/// current flush.
pub(crate) fn queue_activated_component(vm: Component) {
    vm.set_inactive(false);
    let schedule = with_state(|s| {
        s.activated.push(vm);
        !s.flushing && !std::mem::replace(&mut s.waiting, true)
    });
    if schedule {
        schedule_flush();
    }
}

fn schedule_flush() {
    if config::is_async() {
        next_tick(|| {
            flush_scheduler_queue();
            Ok(())
        });
    } else {
        flush_scheduler_queue();
    }
}

/// True while a flush is in progress.
pub fn is_flushing() -> bool {
    with_state(|s| s.flushing)
}

/// Number of watchers waiting for the next flush.
pub fn pending() -> usize {
    with_state(|s| s.queue.len().saturating_sub(s.index))
}

fn flush_scheduler_queue() {
    let limit = config::with_config(|c| c.max_update_count);
    let len = with_state(|s| {
        s.flushing = true;
        s.queue.sort_by_key(Watcher::id);
        s.queue.len()
    });
    let _span = tracing::debug_span!("flush", queued = len).entered();

    loop {
        let next = with_state(|s| s.queue.get(s.index).cloned());
        let Some(watcher) = next else {
            break;
        };
        let id = watcher.id();

        if let Some(before) = watcher.before() {
            if let Err(err) = before() {
                report_uncaught(err);
            }
        }
        with_state(|s| s.has.remove(&id));

        if let Err(err) = watcher.run() {
            report_uncaught(err);
        }

        let runaway = with_state(|s| {
            if !s.has.contains(&id) {
                return false;
            }
            let count = s.circular.entry(id).or_insert(0);
            *count += 1;
            *count > limit
        });
        if runaway {
            let err = Error::InfiniteUpdate {
                expression: watcher.expression().to_string(),
                limit,
            };
            let owner = watcher.owner();
            warn(&err.to_string(), owner.as_ref());
            break;
        }

        with_state(|s| s.index += 1);
    }

    // Keep copies of the queues before resetting state.
    let (queue, activated) = with_state(|s| {
        let queue = std::mem::take(&mut s.queue);
        let activated = std::mem::take(&mut s.activated);
        s.has.clear();
        s.circular.clear();
        s.index = 0;
        s.waiting = false;
        s.flushing = false;
        (queue, activated)
    });

    call_activated_hooks(activated);
    call_updated_hooks(&queue);
    tracing::debug!(ran = queue.len(), "flushed");
}

fn call_activated_hooks(activated: Vec<Component>) {
    for vm in activated {
        vm.set_inactive(true);
        lifecycle::activate_child_component(&vm, true);
    }
}

fn call_updated_hooks(queue: &[Watcher]) {
    for watcher in queue.iter().rev() {
        if !watcher.is_render() {
            continue;
        }
        if let Some(vm) = watcher.owner() {
            if vm.is_mounted() && !vm.is_destroyed() {
                lifecycle::call_hook(&vm, Hook::Updated);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{observe, Value, WatcherOptions};
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    fn state(json: serde_json::Value) -> crate::reactive::ReactiveObject {
        let value = Value::from(json);
        observe(&value, false);
        value.as_object().cloned().unwrap()
    }

    fn counting_watcher(obj: &crate::reactive::ReactiveObject, key: &'static str, runs: &Rc<Cell<u32>>) -> Watcher {
        let reader = obj.clone();
        let counter = runs.clone();
        Watcher::new(
            move || {
                counter.set(counter.get() + 1);
                Ok(reader.get(key).unwrap_or_default())
            },
            None,
            WatcherOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn writes_in_one_turn_run_the_watcher_once() {
        let obj = state(json!({ "a": 1 }));
        let runs = Rc::new(Cell::new(0));
        let _watcher = counting_watcher(&obj, "a", &runs);

        obj.assign("a", Value::from(2.0));
        obj.assign("a", Value::from(3.0));
        assert_eq!(runs.get(), 1);
        assert_eq!(pending(), 1);

        run_microtasks().unwrap();
        assert_eq!(runs.get(), 2);
        assert_eq!(pending(), 0);
    }

    #[test]
    fn each_turn_gets_its_own_flush() {
        let obj = state(json!({ "a": 1 }));
        let runs = Rc::new(Cell::new(0));
        let _watcher = counting_watcher(&obj, "a", &runs);

        obj.assign("a", Value::from(2.0));
        run_microtasks().unwrap();
        obj.assign("a", Value::from(3.0));
        run_microtasks().unwrap();

        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn flush_runs_watchers_in_creation_order() {
        let obj = state(json!({ "a": 1, "b": 1 }));
        let order = Rc::new(RefCell::new(Vec::new()));

        let mut watchers = Vec::new();
        for (label, key) in [("first", "b"), ("second", "a")] {
            let reader = obj.clone();
            let log = order.clone();
            watchers.push(
                Watcher::new(
                    move || {
                        log.borrow_mut().push(label);
                        Ok(reader.get(key).unwrap_or_default())
                    },
                    None,
                    WatcherOptions::default(),
                )
                .unwrap(),
            );
        }
        order.borrow_mut().clear();

        // Queue the later watcher first.
        obj.assign("a", Value::from(2.0));
        obj.assign("b", Value::from(2.0));
        run_microtasks().unwrap();

        assert_eq!(order.borrow().as_slice(), &["first", "second"]);
    }

    #[test]
    fn before_hook_runs_ahead_of_the_watcher() {
        let obj = state(json!({ "a": 1 }));
        let order = Rc::new(RefCell::new(Vec::new()));

        let reader = obj.clone();
        let log = order.clone();
        let before_log = order.clone();
        let _watcher = Watcher::new(
            move || {
                log.borrow_mut().push("run");
                Ok(reader.get("a").unwrap_or_default())
            },
            None,
            WatcherOptions {
                before: Some(Rc::new(move || {
                    before_log.borrow_mut().push("before");
                    Ok(())
                })),
                ..Default::default()
            },
        )
        .unwrap();
        order.borrow_mut().clear();

        obj.assign("a", Value::from(2.0));
        run_microtasks().unwrap();
        assert_eq!(order.borrow().as_slice(), &["before", "run"]);
    }

    #[test]
    fn runaway_watcher_stops_after_the_limit() {
        config::configure(|c| c.silent = true);
        let obj = state(json!({ "n": 0 }));
        let runs = Rc::new(Cell::new(0));

        let reader = obj.clone();
        let counter = runs.clone();
        let writer = obj.clone();
        let _watcher = Watcher::new(
            move || Ok(reader.get("n").unwrap_or_default()),
            Some(Rc::new(move |new: &Value, _: &Value| {
                counter.set(counter.get() + 1);
                writer.assign("n", Value::from(new.as_f64().unwrap_or(0.0) + 1.0));
                Ok(())
            })),
            WatcherOptions::default(),
        )
        .unwrap();

        obj.assign("n", Value::from(1.0));
        run_microtasks().unwrap();

        let limit = config::MAX_UPDATE_COUNT;
        assert_eq!(runs.get(), limit + 1);
        assert!(!is_flushing());
        config::configure(|c| c.silent = false);

        // The aborted flush leaves nothing queued behind.
        assert_eq!(pending(), 0);
        assert_eq!(run_microtasks().unwrap(), 0);
    }

    #[test]
    fn watcher_queued_behind_the_cursor_runs_in_the_same_flush() {
        let obj = state(json!({ "a": 1, "b": 1 }));
        let order = Rc::new(RefCell::new(Vec::new()));

        let reader = obj.clone();
        let log = order.clone();
        let _first = Watcher::new(
            move || {
                log.borrow_mut().push("w1");
                Ok(reader.get("a").unwrap_or_default())
            },
            None,
            WatcherOptions::default(),
        )
        .unwrap();

        let reader = obj.clone();
        let log = order.clone();
        let writer = obj.clone();
        let _second = Watcher::new(
            move || {
                log.borrow_mut().push("w2");
                Ok(reader.get("b").unwrap_or_default())
            },
            Some(Rc::new(move |new: &Value, _: &Value| {
                writer.assign("a", new.clone());
                Ok(())
            })),
            WatcherOptions::default(),
        )
        .unwrap();
        order.borrow_mut().clear();

        obj.assign("b", Value::from(2.0));
        // One callback: the lower id re-queued mid-flush did not need a second tick.
        assert_eq!(run_microtasks().unwrap(), 1);
        assert_eq!(order.borrow().as_slice(), &["w2", "w1"]);
        assert_eq!(pending(), 0);
    }

    #[test]
    fn activated_hooks_run_before_updated_hooks() {
        use crate::component::ComponentOptions;
        use crate::vdom::{Backend, MemoryBackend, Patcher, VNode};

        let order = Rc::new(RefCell::new(Vec::new()));
        let log = order.clone();
        let tab = ComponentOptions::builder("Tab")
            .hook(Hook::Activated, move |_: &Component| {
                log.borrow_mut().push("activated");
                Ok(())
            })
            .render(|_| Ok(VNode::element("span", vec![])))
            .build();
        let log = order.clone();
        let parent = ComponentOptions::builder("Tabs")
            .data(|_| Ok(json!({ "show": true }).into()))
            .hook(Hook::Updated, move |_: &Component| {
                log.borrow_mut().push("updated");
                Ok(())
            })
            .render(move |vm| {
                let children = if vm.get("show").as_bool() == Some(true) {
                    vec![VNode::component(&tab).keep_alive()]
                } else {
                    vec![]
                };
                Ok(VNode::element("div", children))
            })
            .build();

        let backend = Rc::new(MemoryBackend::new());
        let patcher = Patcher::new(backend.clone());
        let root = backend.create_element("root");
        let vm = Component::new(parent);
        vm.mount(&patcher, root).unwrap();

        vm.set("show", false);
        run_microtasks().unwrap();
        order.borrow_mut().clear();

        vm.set("show", true);
        run_microtasks().unwrap();
        assert_eq!(order.borrow().as_slice(), &["activated", "updated"]);
    }

    #[test]
    fn sync_mode_flushes_immediately() {
        config::configure(|c| c.async_mode = false);
        let obj = state(json!({ "a": 1 }));
        let runs = Rc::new(Cell::new(0));
        let _watcher = counting_watcher(&obj, "a", &runs);

        obj.assign("a", Value::from(2.0));
        assert_eq!(runs.get(), 2);
        config::configure(|c| c.async_mode = true);
    }
}
