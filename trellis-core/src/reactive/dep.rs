//! Dependency Nodes
//!
//! A [`Dep`] is the subscriber list of one reactive property (or of one
//! reactive container, for structural changes). Reading the property while
//! a watcher evaluates calls [`depend`]; writing it calls [`notify`].

use super::context::ReactiveContext;
use super::runtime::Runtime;
use super::DepId;
use crate::config;

/// Owner of a dep slot in the runtime arena.
///
/// Not `Clone`: exactly one property slot or observer owns each dep, and
/// dropping it frees the slot.
#[derive(Debug)]
pub struct Dep {
    id: DepId,
}

impl Dep {
    pub fn new() -> Self {
        let id = DepId::next();
        Runtime::alloc_dep(id);
        Self { id }
    }

    pub fn id(&self) -> DepId {
        self.id
    }

    /// Register the current watcher as a subscriber.
    pub fn depend(&self) {
        depend(self.id);
    }

    /// Re-run every subscriber.
    pub fn notify(&self) {
        notify(self.id);
    }

    pub fn subscriber_count(&self) -> usize {
        Runtime::subscriber_count(self.id)
    }
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Dep {
    fn drop(&mut self) {
        Runtime::free_dep(self.id);
    }
}

/// Register the current watcher, if any, as a subscriber of `dep`.
pub fn depend(dep: DepId) {
    if let Some(watcher) = ReactiveContext::current() {
        watcher.add_dep(dep);
    }
}

/// Call `update()` on every subscriber of `dep`.
///
/// The subscriber list is snapshotted first, so watchers may subscribe or
/// unsubscribe while being notified.
pub fn notify(dep: DepId) {
    let mut subs = Runtime::subscribers(dep);
    if !config::is_async() {
        // Without the scheduler there is no sort at flush time, so sort
        // here to keep parents ahead of children.
        subs.sort();
    }
    tracing::trace!(dep = dep.raw(), subscribers = subs.len(), "notify");
    for id in subs {
        if let Some(watcher) = Runtime::watcher(id) {
            watcher.update();
        }
    }
}
