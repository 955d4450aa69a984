//! Microtask boundary.
//!
//! The engine never owns an event loop. Deferred work is collected here and
//! the host drains it with [`run_microtasks`] at its microtask boundary. A
//! host that wants to be told when work becomes pending installs
//! `Config::microtask_hook`.

use std::cell::RefCell;
use std::future::Future;

use tokio::sync::oneshot;

use crate::config;
use crate::error::{handle_error, take_uncaught, Error, Result};

type Callback = Box<dyn FnOnce() -> Result<()>>;

#[derive(Default)]
struct TickState {
    callbacks: Vec<Callback>,
    pending: bool,
}

thread_local! {
    static TICK: RefCell<TickState> = RefCell::new(TickState::default());
}

/// Defer `callback` to the next microtask drain.
pub fn next_tick(callback: impl FnOnce() -> Result<()> + 'static) {
    let first = TICK.with(|tick| {
        let mut tick = tick.borrow_mut();
        tick.callbacks.push(Box::new(callback));
        !std::mem::replace(&mut tick.pending, true)
    });
    if first {
        if let Some(hook) = config::with_config(|c| c.microtask_hook.clone()) {
            hook();
        }
    }
}

/// Resolve once the next drain has run every callback queued before it.
pub fn next_tick_async() -> impl Future<Output = ()> {
    let (tx, rx) = oneshot::channel();
    next_tick(move || {
        let _ = tx.send(());
        Ok(())
    });
    async move {
        let _ = rx.await;
    }
}

/// Drain deferred callbacks, including any queued while draining.
///
/// Returns how many callbacks ran. Errors that nothing handled are
/// surfaced here: the first one is returned, after every callback has run.
pub fn run_microtasks() -> Result<usize> {
    let mut ran = 0;
    let mut first_error: Option<Error> = None;

    loop {
        let batch = TICK.with(|tick| {
            let mut tick = tick.borrow_mut();
            tick.pending = false;
            std::mem::take(&mut tick.callbacks)
        });
        if batch.is_empty() {
            break;
        }
        for callback in batch {
            ran += 1;
            if let Err(err) = callback().or_else(|err| handle_error(err, None, "nextTick")) {
                first_error.get_or_insert(err);
            }
        }
    }

    for err in take_uncaught() {
        first_error.get_or_insert(err);
    }
    tracing::trace!(ran, "microtasks drained");

    match first_error {
        Some(err) => Err(err),
        None => Ok(ran),
    }
}
