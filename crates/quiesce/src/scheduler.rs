//! Root-shared scheduling state and the deferred-task facility.
//!
//! Every scope in a tree holds a handle to one [`Scheduler`], owned
//! conceptually by the root: the three task queues (`eval_async`,
//! `apply_async`, post-digest), the phase marker, the last-dirty-watch
//! marker, and the id counters all live here. Isolation affects data
//! visibility only; isolated scopes schedule against the same state.
//!
//! The original environment's "run this later, once" boundary is modeled as
//! an explicit single-shot task queue ([`DeferredQueue`]) that the embedding
//! host drains with [`Scope::run_deferred`] whenever its event loop is idle.
//! Tasks carry ids so a pending flush can be cancelled by an intervening
//! digest, and scheduling is guarded by explicit "already scheduled" checks
//! to preserve the debouncing contract.
//!
//! # Invariants
//!
//! 1. At most one `TriggerDigest` task is pending per idle period,
//!    regardless of how many `eval_async` calls queued work.
//! 2. At most one `FlushApplyAsync` task is pending at a time; a `digest()`
//!    that starts first cancels it and flushes synchronously, so
//!    `apply_async` work runs exactly once.
//! 3. `apply_async` work never runs inside the digest cycle that scheduled
//!    it.
//! 4. Post-digest callbacks run exactly once, in queue order, after the
//!    digest loop has settled; their faults are logged, not propagated.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | Queued task returns an error | logged via `tracing`, remaining tasks still run |
//! | Deferred digest hits the iteration limit | `run_deferred` returns the error; undrained tasks stay queued |
//! | `run_deferred` with nothing pending | returns `Ok(0)` |

use std::collections::VecDeque;

use crate::error::{CallbackResult, ScopeError};
use crate::scope::{Phase, Scope};

/// A queued expression bound to the scope it should be evaluated against.
pub(crate) struct QueuedTask {
    pub(crate) scope: Scope,
    pub(crate) expr: Box<dyn FnOnce(&Scope) -> CallbackResult<()>>,
}

pub(crate) type PostDigestTask = Box<dyn FnOnce() -> CallbackResult<()>>;

/// Identifier of a scheduled deferred task, used for cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct DeferredId(u64);

/// What a deferred task does when the host fires it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DeferredTask {
    /// Digest the root, but only if the `eval_async` queue is still
    /// non-empty (a digest may have drained it in the meantime).
    TriggerDigest,
    /// Drain the `apply_async` queue inside a full root `apply`.
    FlushApplyAsync,
}

/// Single-shot deferred tasks, fired in scheduling order by the host.
#[derive(Default)]
pub(crate) struct DeferredQueue {
    next_id: u64,
    tasks: VecDeque<(DeferredId, DeferredTask)>,
}

impl DeferredQueue {
    pub(crate) fn schedule(&mut self, task: DeferredTask) -> DeferredId {
        self.next_id += 1;
        let id = DeferredId(self.next_id);
        self.tasks.push_back((id, task));
        id
    }

    /// Remove a scheduled task before it fires. Firing and cancellation are
    /// idempotent against each other: cancelling an already-fired id is a
    /// no-op.
    pub(crate) fn cancel(&mut self, id: DeferredId) {
        self.tasks.retain(|(task_id, _)| *task_id != id);
    }

    pub(crate) fn pop(&mut self) -> Option<(DeferredId, DeferredTask)> {
        self.tasks.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }
}

/// Shared engine state held by every scope of one tree.
pub(crate) struct Scheduler {
    pub(crate) phase: Option<Phase>,
    /// Id of the most recent watcher observed dirty, for the digest
    /// short-circuit. Reset whenever the watcher population changes.
    pub(crate) last_dirty: Option<u64>,
    pub(crate) async_queue: VecDeque<QueuedTask>,
    pub(crate) apply_async_queue: VecDeque<QueuedTask>,
    pub(crate) post_digest_queue: VecDeque<PostDigestTask>,
    pub(crate) deferred: DeferredQueue,
    /// Pending `FlushApplyAsync` task, if one is scheduled.
    pub(crate) apply_async_flush: Option<DeferredId>,
    next_watcher_id: u64,
    next_scope_id: u64,
    next_listener_id: u64,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self {
            phase: None,
            last_dirty: None,
            async_queue: VecDeque::new(),
            apply_async_queue: VecDeque::new(),
            post_digest_queue: VecDeque::new(),
            deferred: DeferredQueue::default(),
            apply_async_flush: None,
            next_watcher_id: 0,
            next_scope_id: 0,
            next_listener_id: 0,
        }
    }

    pub(crate) fn next_watcher_id(&mut self) -> u64 {
        self.next_watcher_id += 1;
        self.next_watcher_id
    }

    pub(crate) fn next_scope_id(&mut self) -> u64 {
        self.next_scope_id += 1;
        self.next_scope_id
    }

    pub(crate) fn next_listener_id(&mut self) -> u64 {
        self.next_listener_id += 1;
        self.next_listener_id
    }
}

impl Scope {
    /// Queue `expr` for evaluation against this scope during the next
    /// digest.
    ///
    /// If a digest is already running, the expression executes within that
    /// same cycle, strictly after the code currently running returns but
    /// before the digest concludes. If the tree is idle, a single deferred
    /// [`TriggerDigest`](DeferredTask::TriggerDigest) task is scheduled (at
    /// most one per idle period, however many expressions are queued) and
    /// the digest happens when the host next calls
    /// [`run_deferred`](Scope::run_deferred).
    pub fn eval_async(&self, expr: impl FnOnce(&Scope) -> CallbackResult<()> + 'static) {
        let scheduler = self.scheduler();
        let mut scheduler = scheduler.borrow_mut();
        if scheduler.phase.is_none() && scheduler.async_queue.is_empty() {
            scheduler.deferred.schedule(DeferredTask::TriggerDigest);
        }
        scheduler.async_queue.push_back(QueuedTask {
            scope: self.clone(),
            expr: Box::new(expr),
        });
    }

    /// Queue `expr` to run inside a future `apply` on the root.
    ///
    /// The work never executes within the digest cycle that scheduled it.
    /// The first `apply_async` after an empty queue schedules one deferred
    /// flush; a `digest()` that starts before the flush fires cancels it and
    /// drains the queue synchronously instead, so the work runs exactly
    /// once either way.
    pub fn apply_async(&self, expr: impl FnOnce(&Scope) -> CallbackResult<()> + 'static) {
        let scheduler = self.scheduler();
        let mut scheduler = scheduler.borrow_mut();
        scheduler.apply_async_queue.push_back(QueuedTask {
            scope: self.clone(),
            expr: Box::new(expr),
        });
        if scheduler.apply_async_flush.is_none() {
            let id = scheduler.deferred.schedule(DeferredTask::FlushApplyAsync);
            scheduler.apply_async_flush = Some(id);
        }
    }

    /// Queue a one-shot callback to run after the next digest settles.
    ///
    /// Not itself digest-triggering: the callback waits for whatever causes
    /// the next digest.
    pub fn post_digest(&self, f: impl FnOnce() -> CallbackResult<()> + 'static) {
        self.scheduler()
            .borrow_mut()
            .post_digest_queue
            .push_back(Box::new(f));
    }

    /// Number of deferred tasks waiting for [`run_deferred`](Scope::run_deferred).
    ///
    /// Lets an embedding event loop decide whether a pump pass is needed.
    #[must_use]
    pub fn pending_deferred(&self) -> usize {
        self.scheduler().borrow().deferred.len()
    }

    /// Fire pending deferred tasks in scheduling order, returning how many
    /// ran.
    ///
    /// This is the host's event-loop hook: call it when idle. Tasks
    /// scheduled by the tasks themselves (a post-digest callback queueing
    /// more async work, say) are drained in the same call.
    ///
    /// # Errors
    ///
    /// Propagates the first [`ScopeError`] a triggered digest produces.
    /// Tasks not yet fired stay queued for the next call.
    pub fn run_deferred(&self) -> Result<usize, ScopeError> {
        let root = self.root();
        let scheduler = self.scheduler();
        let mut ran = 0;
        loop {
            let task = scheduler.borrow_mut().deferred.pop();
            let Some((_, task)) = task else { break };
            match task {
                DeferredTask::TriggerDigest => {
                    let pending = !scheduler.borrow().async_queue.is_empty();
                    if pending {
                        root.digest()?;
                    }
                }
                DeferredTask::FlushApplyAsync => {
                    root.apply(|scope| scope.flush_apply_async())?;
                }
            }
            ran += 1;
        }
        Ok(ran)
    }

    /// Drain the `apply_async` queue, evaluating each expression against its
    /// bound scope. Faults are logged per task; the rest of the queue still
    /// runs.
    pub(crate) fn flush_apply_async(&self) {
        let scheduler = self.scheduler();
        loop {
            let task = scheduler.borrow_mut().apply_async_queue.pop_front();
            let Some(QueuedTask { scope, expr }) = task else {
                break;
            };
            if let Err(error) = expr(&scope) {
                tracing::error!(%error, "apply_async task failed");
            }
        }
        scheduler.borrow_mut().apply_async_flush = None;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
