//! Batch several watch functions into one listener call per digest.
//!
//! [`Scope::watch_group`] registers one ordinary watcher per input function.
//! Each member writes its slot into shared `new_values`/`old_values`
//! vectors; the first member to change within a digest schedules (through
//! `eval_async`, so it runs later in the same cycle) a single combined
//! invocation of the group listener. A guard flag coalesces further changes
//! in the same digest into that one invocation.
//!
//! # Invariants
//!
//! 1. The group listener fires at most once per digest, however many member
//!    watch functions changed.
//! 2. On the first combined invocation, `old_values` is passed equal to
//!    `new_values`.
//! 3. A zero-length group schedules exactly one asynchronous
//!    `listener(&[], &[], scope)` call; deregistering before it fires
//!    suppresses it.
//! 4. Deregistering the group removes every member watcher.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::digest::WatchHandle;
use crate::error::CallbackResult;
use crate::scope::Scope;
use crate::value::Value;

/// A watch function boxed for heterogeneous group membership.
pub type GroupWatchFn = Box<dyn Fn(&Scope) -> CallbackResult<Value>>;

/// Deregistration handle for a watch group.
#[derive(Debug)]
pub struct GroupHandle {
    handles: Vec<WatchHandle>,
    /// Set for zero-length groups: flipping it suppresses the pending
    /// first-and-only listener call.
    suppress: Option<Rc<Cell<bool>>>,
}

impl GroupHandle {
    /// Remove every member watcher. For a zero-length group, suppresses the
    /// scheduled listener call if it has not fired yet.
    pub fn deregister(self) {
        if let Some(should_call) = self.suppress {
            should_call.set(false);
        }
        for handle in self.handles {
            handle.deregister();
        }
    }
}

impl Scope {
    /// Watch several expressions as a unit.
    ///
    /// `listener` receives slices of the current and previous values of all
    /// members, in input order, once per digest in which any member changed.
    pub fn watch_group(
        &self,
        watch_fns: Vec<GroupWatchFn>,
        listener: impl Fn(&[Value], &[Value], &Scope) -> CallbackResult<()> + 'static,
    ) -> GroupHandle {
        let listener = Rc::new(listener);

        if watch_fns.is_empty() {
            let should_call = Rc::new(Cell::new(true));
            let gate = Rc::clone(&should_call);
            let listener = Rc::clone(&listener);
            self.eval_async(move |scope| {
                if gate.get() {
                    listener(&[], &[], scope)
                } else {
                    Ok(())
                }
            });
            return GroupHandle {
                handles: Vec::new(),
                suppress: Some(should_call),
            };
        }

        let len = watch_fns.len();
        let new_values = Rc::new(RefCell::new(vec![Value::Null; len]));
        let old_values = Rc::new(RefCell::new(vec![Value::Null; len]));
        let first_run = Rc::new(Cell::new(true));
        let scheduled = Rc::new(Cell::new(false));

        let mut handles = Vec::with_capacity(len);
        for (index, watch_fn) in watch_fns.into_iter().enumerate() {
            let new_values = Rc::clone(&new_values);
            let old_values = Rc::clone(&old_values);
            let first_run = Rc::clone(&first_run);
            let scheduled = Rc::clone(&scheduled);
            let listener = Rc::clone(&listener);

            let handle = self.watch(
                move |scope| watch_fn(scope),
                move |new, old, scope| {
                    new_values.borrow_mut()[index] = new.clone();
                    old_values.borrow_mut()[index] = old.clone();
                    if !scheduled.get() {
                        scheduled.set(true);
                        let new_values = Rc::clone(&new_values);
                        let old_values = Rc::clone(&old_values);
                        let first_run = Rc::clone(&first_run);
                        let scheduled = Rc::clone(&scheduled);
                        let listener = Rc::clone(&listener);
                        scope.eval_async(move |scope| {
                            // Clone the slots out so the listener can touch
                            // group members without hitting a live borrow.
                            let current: Vec<Value> = new_values.borrow().clone();
                            let result = if first_run.get() {
                                first_run.set(false);
                                listener(&current, &current, scope)
                            } else {
                                let previous: Vec<Value> = old_values.borrow().clone();
                                listener(&current, &previous, scope)
                            };
                            scheduled.set(false);
                            result
                        });
                    }
                    Ok(())
                },
            );
            handles.push(handle);
        }

        GroupHandle {
            handles,
            suppress: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
