//! Errors and Diagnostics
//!
//! Every failure raised by user code (getters, render functions, hooks,
//! listeners) flows through a single funnel, [`handle_error`]. The funnel
//! walks up the component tree looking for `error_captured` hooks, then
//! falls back to the configured global handler, and finally logs the error
//! and hands it back to the caller.
//!
//! Structural problems that do not abort an operation (duplicate keys,
//! invalid `set` targets, runaway updates) are reported through [`warn`]
//! instead. They never fail the operation that detected them.

use std::cell::RefCell;

use thiserror::Error;

use crate::component::Component;
use crate::config;
use crate::reactive::ReactiveContext;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the runtime or raised by user code.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// An error raised by user code (a getter, render function, or hook).
    #[error("{message}")]
    Thrown { message: String },

    /// A component was mounted without a render function.
    #[error("component `{name}` has no render function")]
    MissingRender { name: String },

    /// An operation required a mounted component.
    #[error("component `{name}` is not mounted")]
    NotMounted { name: String },

    /// A watcher kept re-queueing itself during a single flush.
    #[error("infinite update loop in watcher `{expression}` (over {limit} runs in one flush)")]
    InfiniteUpdate { expression: String, limit: u32 },
}

impl Error {
    /// Create an error from a user-facing message.
    pub fn msg(message: impl Into<String>) -> Self {
        Error::Thrown {
            message: message.into(),
        }
    }
}

/// What an `error_captured` hook decided to do with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// Keep walking up the component tree.
    Propagate,
    /// Stop here; the error is considered handled.
    Handled,
}

thread_local! {
    /// Errors that could not be returned to a caller (for example, from a
    /// synchronous watcher triggered inside a property write).
    static UNCAUGHT: RefCell<Vec<Error>> = const { RefCell::new(Vec::new()) };
}

/// Route an error through the capture chain and the global handler.
///
/// Returns `Ok(())` when some handler took responsibility for the error,
/// or the error itself when nothing did (after logging it).
pub fn handle_error(err: Error, vm: Option<&Component>, info: &str) -> Result<()> {
    // Handlers may read reactive state; that must not leak dependencies
    // into whatever evaluation is in progress.
    let _untracked = ReactiveContext::untracked();

    if let Some(vm) = vm {
        let mut current = vm.parent();
        while let Some(component) = current {
            for hook in component.options().error_captured_hooks() {
                match hook(&err, vm, info) {
                    Ok(Capture::Handled) => return Ok(()),
                    Ok(Capture::Propagate) => {}
                    Err(hook_err) => {
                        let _ = global_handle_error(hook_err, Some(&component), "errorCaptured hook");
                    }
                }
            }
            current = component.parent();
        }
    }

    global_handle_error(err, vm, info)
}

fn global_handle_error(err: Error, vm: Option<&Component>, info: &str) -> Result<()> {
    if let Some(handler) = config::with_config(|c| c.error_handler.clone()) {
        match handler(&err, vm, info) {
            Ok(()) => return Ok(()),
            Err(handler_err) => {
                // A handler that rethrows the same error should not be
                // logged twice.
                if handler_err != err {
                    log_error(&handler_err, None, "config.error_handler");
                }
            }
        }
    }
    log_error(&err, vm, info);
    Err(err)
}

fn log_error(err: &Error, vm: Option<&Component>, info: &str) {
    match vm {
        Some(vm) => tracing::error!(component = %vm.name(), info, error = %err, "unhandled error"),
        None => tracing::error!(info, error = %err, "unhandled error"),
    }
}

/// Park an error that has no caller to return to.
///
/// The next call to [`run_microtasks`](crate::scheduler::run_microtasks)
/// surfaces it.
pub(crate) fn report_uncaught(err: Error) {
    let _ = UNCAUGHT.try_with(|errors| errors.borrow_mut().push(err));
}

/// Take every parked error.
pub(crate) fn take_uncaught() -> Vec<Error> {
    UNCAUGHT
        .try_with(|errors| std::mem::take(&mut *errors.borrow_mut()))
        .unwrap_or_default()
}

/// Emit a non-fatal diagnostic.
pub fn warn(message: &str, vm: Option<&Component>) {
    let (silent, handler) = config::with_config(|c| (c.silent, c.warn_handler.clone()));
    if silent {
        return;
    }
    match handler {
        Some(handler) => handler(message, vm),
        None => match vm {
            Some(vm) => tracing::warn!(trace = %component_trace(vm), "{message}"),
            None => tracing::warn!("{message}"),
        },
    }
}

/// Render the ancestor chain of a component, innermost first.
pub fn component_trace(vm: &Component) -> String {
    let mut names = vec![format!("<{}>", vm.name())];
    let mut current = vm.parent();
    while let Some(component) = current {
        names.push(format!("<{}>", component.name()));
        current = component.parent();
    }
    names.join(" <- ")
}
