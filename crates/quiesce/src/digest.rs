//! The digest engine: watcher registry, sweep loop, and convergence.
//!
//! A watcher pairs a watch function (compute a [`Value`] from a scope) with
//! a listener (react to a change). [`Scope::digest`] re-evaluates every
//! watcher in the subtree until a full sweep finds nothing dirty, which is
//! what lets listeners mutate state other watchers depend on: the loop
//! simply keeps sweeping until the tree settles.
//!
//! Two refinements keep that loop honest:
//!
//! - **Iteration budget.** Watchers whose listeners keep invalidating each
//!   other would sweep forever; after [`DIGEST_ITERATION_LIMIT`] dirty
//!   sweeps the digest aborts with
//!   [`ScopeError::IterationLimitExceeded`].
//! - **Last-dirty-watch short-circuit.** The tree-wide marker remembers the
//!   most recent watcher seen dirty. When a sweep reaches that watcher again
//!   and finds it clean, every other watcher has already been confirmed
//!   clean since the marker was set, so the sweep concludes early.
//!   Registering or deregistering a watcher resets the marker, because it
//!   invalidates that proof.
//!
//! # Invariants
//!
//! 1. Watchers are evaluated in registration order within each scope, and
//!    scopes in pre-order over the tree.
//! 2. A listener's old-value argument equals the new value on that watcher's
//!    first invocation, and the true previous value afterwards.
//! 3. A faulting watch or listen function is logged and skipped; the sweep
//!    continues, and a faulting evaluation never updates the stored
//!    previous value.
//! 4. Deep-mode watchers store a deep copy as the previous value, so
//!    in-place mutation of a shared structure is detected.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | Digest re-entry | `ScopeError::PhaseInProgress`, tree state untouched |
//! | Mutually-dirtying watchers | `ScopeError::IterationLimitExceeded` after 10 sweeps; partial changes remain |
//! | Watcher deregistered mid-sweep | skipped for the rest of the sweep |
//! | Watcher registered mid-sweep | first evaluated on the next sweep |

use std::fmt;
use std::rc::Rc;

use crate::error::{CallbackResult, ScopeError};
use crate::scheduler::QueuedTask;
use crate::scope::{Phase, Scope, WeakScopeRef};
use crate::value::Value;

/// Dirty sweeps a single digest may run before giving up.
pub const DIGEST_ITERATION_LIMIT: u32 = 10;

pub(crate) type WatchCallable = Rc<dyn Fn(&Scope) -> CallbackResult<Value>>;
pub(crate) type ListenCallable = Rc<dyn Fn(&Value, &Value, &Scope) -> CallbackResult<()>>;

/// The previous result of a watch function.
///
/// `Uninit` is the private never-evaluated sentinel: it compares unequal to
/// every value, which is what makes a listener fire on the first digest
/// after registration even when the watched value is `Null`.
#[derive(Clone)]
pub(crate) enum Last {
    Uninit,
    Seen(Value),
}

pub(crate) struct Watcher {
    pub(crate) id: u64,
    pub(crate) watch: WatchCallable,
    pub(crate) listen: ListenCallable,
    pub(crate) value_eq: bool,
    pub(crate) last: Last,
}

fn is_clean(new_value: &Value, last: &Last, value_eq: bool) -> bool {
    match last {
        Last::Uninit => false,
        Last::Seen(old) => {
            if value_eq {
                new_value.deep_equal(old)
            } else {
                new_value.ref_equal(old)
            }
        }
    }
}

/// Deregistration handle for a single watcher.
///
/// Dropping the handle leaves the watcher registered — watchers live until
/// their scope is destroyed or [`deregister`](WatchHandle::deregister) is
/// called explicitly.
pub struct WatchHandle {
    scope: WeakScopeRef,
    id: u64,
}

impl WatchHandle {
    /// Remove exactly this watcher from its scope, by identity.
    ///
    /// Also resets the digest short-circuit marker: the clean-pass proof no
    /// longer covers a changed watcher population. A no-op if the scope is
    /// gone or the watcher was already removed.
    pub fn deregister(self) {
        let Some(inner) = self.scope.upgrade() else {
            return;
        };
        let scheduler = {
            let mut inner = inner.borrow_mut();
            let before = inner.watchers.len();
            inner.watchers.retain(|watcher| watcher.id != self.id);
            if inner.watchers.len() == before {
                return;
            }
            Rc::clone(&inner.scheduler)
        };
        scheduler.borrow_mut().last_dirty = None;
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle").field("id", &self.id).finish()
    }
}

impl Scope {
    /// Register a watcher with identity-equality change detection.
    ///
    /// `watch_fn` computes the observed value; `listen_fn` runs when it
    /// changes, receiving `(new, old, scope)`. On the first digest after
    /// registration the listener always fires, with `old` equal to `new`.
    pub fn watch(
        &self,
        watch_fn: impl Fn(&Scope) -> CallbackResult<Value> + 'static,
        listen_fn: impl Fn(&Value, &Value, &Scope) -> CallbackResult<()> + 'static,
    ) -> WatchHandle {
        self.register_watch(Rc::new(watch_fn), Rc::new(listen_fn), false)
    }

    /// Register a watcher with structural-equality change detection.
    ///
    /// Detects in-place mutation of a shared list or map, at the cost of a
    /// deep comparison per sweep and a deep copy per change.
    pub fn watch_deep(
        &self,
        watch_fn: impl Fn(&Scope) -> CallbackResult<Value> + 'static,
        listen_fn: impl Fn(&Value, &Value, &Scope) -> CallbackResult<()> + 'static,
    ) -> WatchHandle {
        self.register_watch(Rc::new(watch_fn), Rc::new(listen_fn), true)
    }

    /// Register a watcher with no listener, for watch functions kept purely
    /// for their side effects.
    pub fn watch_effect(
        &self,
        watch_fn: impl Fn(&Scope) -> CallbackResult<Value> + 'static,
    ) -> WatchHandle {
        self.register_watch(Rc::new(watch_fn), Rc::new(|_: &Value, _: &Value, _: &Scope| Ok(())), false)
    }

    pub(crate) fn register_watch(
        &self,
        watch: WatchCallable,
        listen: ListenCallable,
        value_eq: bool,
    ) -> WatchHandle {
        let scheduler = self.scheduler();
        let id = {
            let mut scheduler = scheduler.borrow_mut();
            scheduler.last_dirty = None;
            scheduler.next_watcher_id()
        };
        // Newest at the front; sweeps iterate back-to-front to restore
        // registration order.
        self.inner.borrow_mut().watchers.insert(
            0,
            Watcher {
                id,
                watch,
                listen,
                value_eq,
                last: Last::Uninit,
            },
        );
        WatchHandle {
            scope: Rc::downgrade(&self.inner),
            id,
        }
    }

    /// Number of watchers registered on this scope.
    #[must_use]
    pub fn watch_count(&self) -> usize {
        self.inner.borrow().watchers.len()
    }

    /// Run the digest loop over this scope's subtree until it settles.
    ///
    /// Each iteration first drains the `eval_async` queue (every queued
    /// expression evaluated against its bound scope, faults logged), then
    /// sweeps all watchers once. The loop repeats while the sweep was dirty
    /// or more async work arrived, so listeners may mutate state and queue
    /// work freely — bounded by the iteration budget. Afterwards the
    /// post-digest queue runs, each callback exactly once, in order.
    ///
    /// A pending `apply_async` flush is cancelled and drained synchronously
    /// up front, so deferred work is neither duplicated nor lost.
    ///
    /// # Errors
    ///
    /// [`ScopeError::PhaseInProgress`] on re-entry,
    /// [`ScopeError::IterationLimitExceeded`] on non-convergence. Either
    /// way, state changes already made stay in place.
    pub fn digest(&self) -> Result<(), ScopeError> {
        let scheduler = self.scheduler();
        scheduler.borrow_mut().last_dirty = None;
        self.begin_phase(Phase::Digest)?;

        let pending_flush = scheduler.borrow_mut().apply_async_flush.take();
        if let Some(id) = pending_flush {
            scheduler.borrow_mut().deferred.cancel(id);
            self.flush_apply_async();
        }

        let mut budget = DIGEST_ITERATION_LIMIT;
        loop {
            loop {
                let task = scheduler.borrow_mut().async_queue.pop_front();
                let Some(QueuedTask { scope, expr }) = task else {
                    break;
                };
                if let Err(error) = expr(&scope) {
                    tracing::error!(%error, "eval_async task failed");
                }
            }

            let dirty = self.digest_once();
            let more = dirty || !scheduler.borrow().async_queue.is_empty();
            if !more {
                break;
            }
            if budget == 0 {
                self.clear_phase();
                return Err(ScopeError::IterationLimitExceeded {
                    limit: DIGEST_ITERATION_LIMIT,
                });
            }
            budget -= 1;
        }
        self.clear_phase();

        loop {
            let task = scheduler.borrow_mut().post_digest_queue.pop_front();
            let Some(task) = task else { break };
            if let Err(error) = task() {
                tracing::error!(%error, "post-digest task failed");
            }
        }
        Ok(())
    }

    /// One full sweep over the subtree. Returns whether any watcher changed.
    pub(crate) fn digest_once(&self) -> bool {
        let scheduler = self.scheduler();
        let mut dirty = false;
        self.every_scope(&mut |scope| {
            // Snapshot ids in registration order; re-validate each watcher
            // at evaluation time so listeners may register and deregister
            // watchers mid-sweep.
            let snapshot: Vec<u64> = {
                let inner = scope.inner.borrow();
                if inner.destroyed {
                    return true;
                }
                inner.watchers.iter().rev().map(|w| w.id).collect()
            };

            for id in snapshot {
                let current = {
                    let inner = scope.inner.borrow();
                    inner.watchers.iter().find(|w| w.id == id).map(|w| {
                        (Rc::clone(&w.watch), Rc::clone(&w.listen), w.value_eq, w.last.clone())
                    })
                };
                let Some((watch, listen, value_eq, last)) = current else {
                    continue;
                };

                let new_value = match watch(scope) {
                    Ok(value) => value,
                    Err(error) => {
                        tracing::error!(%error, "watch function failed");
                        continue;
                    }
                };

                if !is_clean(&new_value, &last, value_eq) {
                    scheduler.borrow_mut().last_dirty = Some(id);
                    {
                        let mut inner = scope.inner.borrow_mut();
                        if let Some(watcher) = inner.watchers.iter_mut().find(|w| w.id == id) {
                            watcher.last = Last::Seen(if value_eq {
                                new_value.deep_clone()
                            } else {
                                new_value.clone()
                            });
                        }
                    }
                    let old_for_listener = match last {
                        Last::Seen(old) => old,
                        Last::Uninit => new_value.clone(),
                    };
                    if let Err(error) = listen(&new_value, &old_for_listener, scope) {
                        tracing::error!(%error, "watch listener failed");
                    }
                    dirty = true;
                } else if scheduler.borrow().last_dirty == Some(id) {
                    // This watcher was the last one seen dirty and is now
                    // clean again: everything since is proven clean too.
                    return false;
                }
            }
            true
        });
        dirty
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
