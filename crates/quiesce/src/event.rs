//! Hierarchical event bus: publish up with `emit`, down with `broadcast`.
//!
//! Each scope keeps per-name listener lists. A dispatch builds one
//! [`ScopeEvent`] record and hands the same record, by mutable reference, to
//! every listener it invokes, so a flag one listener sets is visible to the
//! listeners after it and to the caller once dispatch returns.
//!
//! # Invariants
//!
//! 1. `emit` visits the origin scope first, then each ancestor in order;
//!    `broadcast` visits the origin's subtree in pre-order.
//! 2. `stop_propagation` halts the upward walk after the current scope's
//!    listeners; it has no effect on a broadcast.
//! 3. `prevent_default` only sets a flag; observing it is the caller's
//!    business.
//! 4. Deregistering a listener during dispatch never skips another listener
//!    of the same dispatch.
//! 5. Listener faults are logged and do not stop dispatch.

use std::fmt;
use std::rc::Rc;

use crate::error::CallbackResult;
use crate::scope::{Scope, WeakScopeRef};
use crate::value::Value;

pub(crate) type EventHandler = Rc<dyn Fn(&mut ScopeEvent, &[Value]) -> CallbackResult<()>>;

pub(crate) struct RegisteredListener {
    pub(crate) id: u64,
    pub(crate) handler: EventHandler,
}

/// The record shared by every listener of one `emit`/`broadcast` dispatch.
pub struct ScopeEvent {
    name: String,
    target: Scope,
    current: Option<Scope>,
    default_prevented: bool,
    propagation_stopped: bool,
}

impl ScopeEvent {
    fn new(name: &str, target: Scope) -> Self {
        Self {
            name: name.to_owned(),
            target,
            current: None,
            default_prevented: false,
            propagation_stopped: false,
        }
    }

    /// The event name it was dispatched under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scope the dispatch originated from.
    #[must_use]
    pub fn target(&self) -> &Scope {
        &self.target
    }

    /// The scope whose listeners are currently being invoked. `None` once
    /// dispatch has completed.
    #[must_use]
    pub fn current(&self) -> Option<&Scope> {
        self.current.as_ref()
    }

    /// Mark the event's default action as prevented. Observable through
    /// [`default_prevented`](ScopeEvent::default_prevented) after dispatch,
    /// in both directions.
    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    /// Whether any listener called [`prevent_default`](ScopeEvent::prevent_default).
    #[must_use]
    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }

    /// Stop an `emit` from walking further up the ancestor chain. The
    /// remaining listeners on the current scope still run; scopes above it
    /// are skipped. No effect on `broadcast`.
    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }
}

impl fmt::Debug for ScopeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeEvent")
            .field("name", &self.name)
            .field("default_prevented", &self.default_prevented)
            .field("propagation_stopped", &self.propagation_stopped)
            .finish()
    }
}

/// Deregistration handle for one event listener.
#[derive(Debug)]
pub struct ListenerHandle {
    scope: WeakScopeRef,
    name: String,
    id: u64,
}

impl ListenerHandle {
    /// Remove exactly the listener this handle was returned for. A no-op if
    /// the scope is gone or the listener was already removed.
    pub fn deregister(self) {
        let Some(inner) = self.scope.upgrade() else {
            return;
        };
        let mut inner = inner.borrow_mut();
        if let Some(listeners) = inner.listeners.get_mut(&self.name) {
            listeners.retain(|listener| listener.id != self.id);
            if listeners.is_empty() {
                inner.listeners.remove(&self.name);
            }
        }
    }
}

impl Scope {
    /// Register a listener for events dispatched under `name` at or through
    /// this scope.
    pub fn on(
        &self,
        name: impl Into<String>,
        handler: impl Fn(&mut ScopeEvent, &[Value]) -> CallbackResult<()> + 'static,
    ) -> ListenerHandle {
        let name = name.into();
        let id = self.scheduler().borrow_mut().next_listener_id();
        self.inner
            .borrow_mut()
            .listeners
            .entry(name.clone())
            .or_default()
            .push(RegisteredListener {
                id,
                handler: Rc::new(handler),
            });
        ListenerHandle {
            scope: Rc::downgrade(&self.inner),
            name,
            id,
        }
    }

    /// Number of listeners registered under `name` on this scope alone.
    #[must_use]
    pub fn listener_count(&self, name: &str) -> usize {
        self.inner
            .borrow()
            .listeners
            .get(name)
            .map_or(0, Vec::len)
    }

    /// Dispatch an event upward: this scope first, then each ancestor, until
    /// the root is reached or a listener stops propagation. Returns the
    /// event record for flag inspection.
    pub fn emit(&self, name: &str, args: &[Value]) -> ScopeEvent {
        let mut event = ScopeEvent::new(name, self.clone());
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            event.current = Some(scope.clone());
            scope.dispatch(name, &mut event, args);
            if event.propagation_stopped {
                break;
            }
            current = scope.parent();
        }
        event.current = None;
        event
    }

    /// Dispatch an event downward over this scope's subtree in pre-order.
    /// Propagation cannot be stopped; the flag is still recorded on the
    /// returned event.
    pub fn broadcast(&self, name: &str, args: &[Value]) -> ScopeEvent {
        let mut event = ScopeEvent::new(name, self.clone());
        self.every_scope(&mut |scope| {
            event.current = Some(scope.clone());
            scope.dispatch(name, &mut event, args);
            true
        });
        event.current = None;
        event
    }

    /// Invoke this scope's listeners for `name`. Iterates an id snapshot and
    /// re-checks registration before each call, so a listener removed during
    /// dispatch is skipped without disturbing its neighbors.
    fn dispatch(&self, name: &str, event: &mut ScopeEvent, args: &[Value]) {
        let snapshot: Vec<(u64, EventHandler)> = {
            let inner = self.inner.borrow();
            match inner.listeners.get(name) {
                Some(listeners) => listeners
                    .iter()
                    .map(|listener| (listener.id, Rc::clone(&listener.handler)))
                    .collect(),
                None => return,
            }
        };
        for (id, handler) in snapshot {
            let still_registered = {
                let inner = self.inner.borrow();
                inner
                    .listeners
                    .get(name)
                    .is_some_and(|listeners| listeners.iter().any(|l| l.id == id))
            };
            if !still_registered {
                continue;
            }
            if let Err(error) = handler(event, args) {
                tracing::error!(%error, event = name, "event listener failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listeners_register_per_name() {
        let scope = Scope::new();
        scope.on("some_event", |_, _| Ok(()));
        scope.on("some_event", |_, _| Ok(()));
        scope.on("other_event", |_, _| Ok(()));
        assert_eq!(scope.listener_count("some_event"), 2);
        assert_eq!(scope.listener_count("other_event"), 1);
        assert_eq!(scope.listener_count("unknown"), 0);
    }

    #[test]
    fn emit_and_broadcast_call_only_matching_listeners() {
        for direction in ["emit", "broadcast"] {
            let scope = Scope::new();
            scope.set("matched", 0);
            scope.set("unmatched", 0);
            scope.on("some_event", |_, _| Ok(())).deregister();
            scope.on("some_event", |event, _| {
                event.current().unwrap().set(
                    "matched",
                    event.current().unwrap().get("matched").as_number().unwrap() + 1.0,
                );
                Ok(())
            });
            scope.on("other_event", |event, _| {
                event.current().unwrap().set("unmatched", 1);
                Ok(())
            });

            if direction == "emit" {
                scope.emit("some_event", &[]);
            } else {
                scope.broadcast("some_event", &[]);
            }
            assert_eq!(scope.get("matched"), Value::from(1), "direction: {direction}");
            assert_eq!(scope.get("unmatched"), Value::from(0), "direction: {direction}");
        }
    }

    #[test]
    fn listeners_receive_the_arguments() {
        let scope = Scope::new();
        scope.on("some_event", |event, args| {
            event.target().set("got", Value::list_of(args.to_vec()));
            Ok(())
        });
        scope.emit("some_event", &[Value::from("and"), Value::from("...")]);
        assert_eq!(
            scope.get("got"),
            Value::list_of([Value::from("and"), Value::from("...")])
        );
    }

    #[test]
    fn deregistration_during_dispatch_does_not_skip_the_next_listener() {
        let scope = Scope::new();
        scope.set("second_ran", false);

        let slot: Rc<std::cell::RefCell<Option<ListenerHandle>>> =
            Rc::new(std::cell::RefCell::new(None));
        let taken = Rc::clone(&slot);
        let first = scope.on("some_event", move |_, _| {
            if let Some(handle) = taken.borrow_mut().take() {
                handle.deregister();
            }
            Ok(())
        });
        *slot.borrow_mut() = Some(first);

        scope.on("some_event", |event, _| {
            event.target().set("second_ran", true);
            Ok(())
        });

        scope.emit("some_event", &[]);
        assert_eq!(scope.get("second_ran"), Value::from(true));
        assert_eq!(scope.listener_count("some_event"), 1);
    }

    #[test]
    fn prevent_default_is_observable_both_directions() {
        let scope = Scope::new();
        scope.on("some_event", |event, _| {
            event.prevent_default();
            Ok(())
        });
        assert!(scope.emit("some_event", &[]).default_prevented());
        assert!(scope.broadcast("some_event", &[]).default_prevented());
        assert!(!scope.emit("unheard_event", &[]).default_prevented());
    }

    #[test]
    fn faulting_listener_does_not_stop_dispatch() {
        let scope = Scope::new();
        scope.set("after", false);
        scope.on("some_event", |_, _| Err("listener fault".into()));
        scope.on("some_event", |event, _| {
            event.target().set("after", true);
            Ok(())
        });
        scope.emit("some_event", &[]);
        assert_eq!(scope.get("after"), Value::from(true));
    }
}
