#![forbid(unsafe_code)]

//! Dirty-checking reactive state for a frontend runtime.
//!
//! This crate provides a tree of mutable data scopes that can register
//! watchers over arbitrary derived values, detect changes by re-evaluating
//! those watchers, and converge to a stable state through repeated digest
//! sweeps:
//!
//! - [`Scope`]: a node in the tree — property namespace with prototype-style
//!   inheritance, watcher registry, children, and a handle to the root's
//!   shared scheduler.
//! - [`Scope::watch`] / [`Scope::watch_deep`] / [`Scope::watch_effect`]:
//!   change observation with identity or structural equality.
//! - [`Scope::digest`] / [`Scope::apply`]: run watchers to a fixpoint, with
//!   non-convergence detection and a last-dirty-watch short-circuit.
//! - [`Scope::eval_async`] / [`Scope::apply_async`] / [`Scope::post_digest`]:
//!   task queues bound to the digest lifecycle, with debounced deferred
//!   triggering drained by the host through [`Scope::run_deferred`].
//! - [`Scope::watch_group`]: batch N watch functions into one listener call
//!   per digest.
//! - [`Scope::watch_collection`]: structural shallow diffing over lists and
//!   maps without full cloning.
//! - [`Scope::on`] / [`Scope::emit`] / [`Scope::broadcast`]: hierarchical
//!   event dispatch with cancellation flags.
//!
//! # Architecture
//!
//! Everything is single-threaded and cooperative: `Rc<RefCell<..>>` shared
//! ownership, no locks, no `Send`. Re-entrancy concerns are phase re-entry
//! (a digest starting inside a digest), guarded by an error-raising phase
//! marker rather than a queue. The only suspension points are the explicit
//! deferred-task boundaries; `digest` and `apply` run to completion before
//! returning.
//!
//! User-supplied callables return [`CallbackResult`]; faults are logged via
//! `tracing` and isolated, never aborting a sweep. Only phase re-entry and
//! non-convergence abort an API call, both via [`ScopeError`].
//!
//! # Example
//!
//! ```
//! use quiesce::{Scope, Value};
//!
//! let scope = Scope::new();
//! scope.set("name", "jane");
//! scope.set("greeting", "");
//!
//! scope.watch(
//!     |s| Ok(s.get("name")),
//!     |new, _, s| {
//!         s.set("greeting", format!("hello, {}", new.as_str().unwrap_or("?")));
//!         Ok(())
//!     },
//! );
//!
//! scope.digest().unwrap();
//! assert_eq!(scope.get("greeting"), Value::from("hello, jane"));
//!
//! scope.set("name", "joe");
//! scope.digest().unwrap();
//! assert_eq!(scope.get("greeting"), Value::from("hello, joe"));
//! ```

pub mod collection;
pub mod digest;
pub mod error;
pub mod event;
pub mod group;
mod scheduler;
pub mod scope;
pub mod value;

pub use digest::{DIGEST_ITERATION_LIMIT, WatchHandle};
pub use error::{CallbackError, CallbackResult, ScopeError};
pub use event::{ListenerHandle, ScopeEvent};
pub use group::{GroupHandle, GroupWatchFn};
pub use scope::{Phase, Scope};
pub use value::Value;
