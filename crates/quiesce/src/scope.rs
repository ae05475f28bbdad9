//! The scope tree: handles, property inheritance, phases, and lifecycle.
//!
//! A [`Scope`] is a cheap-clone handle (`Rc<RefCell<..>>`) to a node in a
//! tree of mutable property namespaces. Parents exclusively own their
//! children; children hold non-owning back-references to their parent and to
//! the tree's root. Every scope also holds a handle to the root's shared
//! scheduler state (queues, phase marker, dirty-watch marker), so scheduling
//! behaves identically no matter which scope in the tree is asked.
//!
//! Property reads on a non-isolated child fall through to its ancestors;
//! writes always land locally, shadowing the ancestor value from then on.
//! Isolated children have a disjoint namespace but still share the root's
//! scheduler.
//!
//! # Invariants
//!
//! 1. A scope's root reference is fixed at creation and never changes.
//! 2. The scopes reachable from the root through `children`, minus destroyed
//!    ones, are exactly the scopes a digest visits.
//! 3. At most one phase (`Digest` or `Apply`) is active on the root at a
//!    time; re-entry is an error, not a queue.
//! 4. Destroying a scope detaches it immediately: in-flight traversals skip
//!    it and later digests never reach it.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | Root handle dropped while children are still held | scheduling and digests degrade to the surviving subtree; hold the root for the tree's lifetime |
//! | `destroy()` on the root | clears its watchers and children; the handle stays usable as an empty scope |
//! | Property read of an absent key | `Value::Null`, never an error |

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;

use crate::digest::Watcher;
use crate::error::ScopeError;
use crate::event::RegisteredListener;
use crate::scheduler::Scheduler;
use crate::value::Value;

pub(crate) type ScopeRef = Rc<RefCell<ScopeInner>>;
pub(crate) type WeakScopeRef = Weak<RefCell<ScopeInner>>;

/// Which engine phase is active on the root.
///
/// The phase marker is a mutual-exclusion tag, not a lock: starting a digest
/// or apply while either phase is active fails with
/// [`ScopeError::PhaseInProgress`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// A digest loop is running.
    Digest,
    /// An `apply` expression is being evaluated.
    Apply,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Digest => f.write_str("digest"),
            Phase::Apply => f.write_str("apply"),
        }
    }
}

pub(crate) struct ScopeInner {
    pub(crate) id: u64,
    pub(crate) props: AHashMap<String, Value>,
    pub(crate) isolated: bool,
    /// Hierarchy parent: where this scope sits in the tree.
    pub(crate) parent: WeakScopeRef,
    /// Inheritance parent: where property reads fall through to. Differs
    /// from `parent` only for `new_child_under`; empty for roots and
    /// isolated scopes.
    pub(crate) data_parent: WeakScopeRef,
    pub(crate) root: WeakScopeRef,
    pub(crate) children: Vec<Scope>,
    pub(crate) watchers: Vec<Watcher>,
    pub(crate) listeners: AHashMap<String, Vec<RegisteredListener>>,
    pub(crate) destroyed: bool,
    pub(crate) scheduler: Rc<RefCell<Scheduler>>,
}

/// A handle to one node of the scope tree.
///
/// Cloning a `Scope` clones the handle, not the node; all clones observe the
/// same state. Equality between handles is node identity.
pub struct Scope {
    pub(crate) inner: ScopeRef,
}

impl Scope {
    /// Create a new root scope with fresh scheduler state.
    #[must_use]
    pub fn new() -> Scope {
        let scheduler = Rc::new(RefCell::new(Scheduler::new()));
        let inner = Rc::new_cyclic(|weak: &WeakScopeRef| {
            RefCell::new(ScopeInner {
                id: 0,
                props: AHashMap::new(),
                isolated: false,
                parent: Weak::new(),
                data_parent: Weak::new(),
                root: weak.clone(),
                children: Vec::new(),
                watchers: Vec::new(),
                listeners: AHashMap::new(),
                destroyed: false,
                scheduler,
            })
        });
        Scope { inner }
    }

    /// Create a child that inherits this scope's properties.
    #[must_use]
    pub fn new_child(&self) -> Scope {
        self.make_child(false, None)
    }

    /// Create a child with a disjoint property namespace.
    ///
    /// Isolation affects data visibility only: the child still shares the
    /// root's queues and phase marker, and is digested with the rest of the
    /// tree.
    #[must_use]
    pub fn new_isolated_child(&self) -> Scope {
        self.make_child(true, None)
    }

    /// Create a child that inherits properties from `self` but is attached
    /// under `parent` in the tree (and is therefore digested and destroyed
    /// with `parent`'s subtree).
    #[must_use]
    pub fn new_child_under(&self, parent: &Scope) -> Scope {
        self.make_child(false, Some(parent))
    }

    fn make_child(&self, isolated: bool, attach_to: Option<&Scope>) -> Scope {
        let hierarchy_parent = attach_to.unwrap_or(self);
        let scheduler = self.scheduler();
        let id = scheduler.borrow_mut().next_scope_id();
        let root = self.inner.borrow().root.clone();
        let child = Scope {
            inner: Rc::new(RefCell::new(ScopeInner {
                id,
                props: AHashMap::new(),
                isolated,
                parent: Rc::downgrade(&hierarchy_parent.inner),
                data_parent: if isolated {
                    Weak::new()
                } else {
                    Rc::downgrade(&self.inner)
                },
                root,
                children: Vec::new(),
                watchers: Vec::new(),
                listeners: AHashMap::new(),
                destroyed: false,
                scheduler,
            })),
        };
        hierarchy_parent
            .inner
            .borrow_mut()
            .children
            .push(child.clone());
        child
    }

    /// The hierarchy parent, if this scope has one and it is still alive.
    #[must_use]
    pub fn parent(&self) -> Option<Scope> {
        self.inner
            .borrow()
            .parent
            .upgrade()
            .map(|inner| Scope { inner })
    }

    /// The tree's root scope. A root returns itself.
    #[must_use]
    pub fn root(&self) -> Scope {
        match self.inner.borrow().root.upgrade() {
            Some(inner) => Scope { inner },
            None => self.clone(),
        }
    }

    /// Whether this scope was created with an isolated namespace.
    #[must_use]
    pub fn is_isolated(&self) -> bool {
        self.inner.borrow().isolated
    }

    /// Whether [`destroy`](Scope::destroy) has been called.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.borrow().destroyed
    }

    /// Number of live children.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.inner.borrow().children.len()
    }

    pub(crate) fn scheduler(&self) -> Rc<RefCell<Scheduler>> {
        Rc::clone(&self.inner.borrow().scheduler)
    }

    // -- property namespace -------------------------------------------------

    /// Read a property, falling through to ancestors for non-isolated
    /// scopes. Absent keys read as [`Value::Null`].
    #[must_use]
    pub fn get(&self, key: &str) -> Value {
        let mut current = Rc::clone(&self.inner);
        loop {
            let next = {
                let inner = current.borrow();
                if let Some(value) = inner.props.get(key) {
                    return value.clone();
                }
                match inner.data_parent.upgrade() {
                    Some(parent) => parent,
                    None => return Value::Null,
                }
            };
            current = next;
        }
    }

    /// Write a property. Writes are always local: a child writing a key an
    /// ancestor also has shadows the ancestor's value for this subtree.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.borrow_mut().props.insert(key.into(), value.into());
    }

    /// Remove a *local* property, returning it. Inherited values are not
    /// touched; after removal, reads fall through to the ancestor again.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.borrow_mut().props.remove(key)
    }

    /// Whether the key resolves on this scope or, for non-isolated scopes,
    /// any ancestor.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        let mut current = Rc::clone(&self.inner);
        loop {
            let next = {
                let inner = current.borrow();
                if inner.props.contains_key(key) {
                    return true;
                }
                match inner.data_parent.upgrade() {
                    Some(parent) => parent,
                    None => return false,
                }
            };
            current = next;
        }
    }

    // -- traversal and lifecycle --------------------------------------------

    /// Pre-order traversal. Visits this scope; recurses into children only
    /// if `f` returned true for it. The first `false` anywhere aborts the
    /// whole traversal (including siblings not yet visited) and makes the
    /// call return false.
    ///
    /// Children are iterated over a snapshot, so `f` may create or destroy
    /// scopes while the traversal runs.
    pub(crate) fn every_scope(&self, f: &mut dyn FnMut(&Scope) -> bool) -> bool {
        if !f(self) {
            return false;
        }
        let children: Vec<Scope> = self.inner.borrow().children.clone();
        for child in children {
            if !child.every_scope(f) {
                return false;
            }
        }
        true
    }

    /// Detach this scope from the tree and invalidate it.
    ///
    /// Removes it from the parent's children (by identity), clears its
    /// watchers, listeners, and children, and marks it destroyed so an
    /// in-flight sweep skips it. Subsequent digests never reach it or its
    /// former subtree.
    pub fn destroy(&self) {
        if let Some(parent) = self.parent() {
            parent
                .inner
                .borrow_mut()
                .children
                .retain(|child| !Rc::ptr_eq(&child.inner, &self.inner));
        }
        let mut inner = self.inner.borrow_mut();
        inner.destroyed = true;
        inner.watchers.clear();
        inner.children.clear();
        inner.listeners.clear();
    }

    // -- evaluation and phases ----------------------------------------------

    /// Evaluate an arbitrary expression against this scope and return its
    /// result. Synchronous; does not trigger a digest.
    pub fn eval<R>(&self, expr: impl FnOnce(&Scope) -> R) -> R {
        expr(self)
    }

    /// Evaluate `expr` inside the `Apply` phase, then digest the whole tree
    /// from the root.
    ///
    /// The phase is cleared and the digest runs regardless of what `expr`
    /// did to scope state; the expression's value is returned once the tree
    /// has settled.
    ///
    /// # Errors
    ///
    /// [`ScopeError::PhaseInProgress`] if a digest or apply is already
    /// active; [`ScopeError::IterationLimitExceeded`] if the follow-up
    /// digest fails to converge.
    pub fn apply<R>(&self, expr: impl FnOnce(&Scope) -> R) -> Result<R, ScopeError> {
        self.begin_phase(Phase::Apply)?;
        let result = expr(self);
        self.clear_phase();
        self.root().digest()?;
        Ok(result)
    }

    /// The phase currently active on the root, if any.
    #[must_use]
    pub fn phase(&self) -> Option<Phase> {
        self.scheduler().borrow().phase
    }

    pub(crate) fn begin_phase(&self, phase: Phase) -> Result<(), ScopeError> {
        let scheduler = self.scheduler();
        let mut scheduler = scheduler.borrow_mut();
        if let Some(active) = scheduler.phase {
            return Err(ScopeError::PhaseInProgress(active));
        }
        scheduler.phase = Some(phase);
        Ok(())
    }

    pub(crate) fn clear_phase(&self) {
        self.scheduler().borrow_mut().phase = None;
    }
}

impl Clone for Scope {
    fn clone(&self) -> Self {
        Scope {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Scope::new()
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Scope {}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Scope")
            .field("id", &inner.id)
            .field("props", &inner.props.len())
            .field("watchers", &inner.watchers.len())
            .field("children", &inner.children.len())
            .field("destroyed", &inner.destroyed)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
