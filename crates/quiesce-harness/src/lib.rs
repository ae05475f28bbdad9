#![forbid(unsafe_code)]

//! Test harness and recording fixtures for `quiesce`.
//!
//! Watch listeners and event handlers are plain closures, so most scope
//! tests need the same two things: a shared place to record what happened,
//! in order, and quick numeric counters on scope properties. This crate
//! provides both, plus nothing else.
//!
//! Everything here is for tests: helpers panic with a message on misuse
//! (reading a non-numeric counter, say) instead of returning errors, because
//! in a test a panic *is* the failure report.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use quiesce::{Scope, Value};

/// An ordered, shared log of labels.
///
/// Clones share the log, so a `Recorder` can be captured by any number of
/// closures and asserted on afterwards.
///
/// # Example
///
/// ```
/// use quiesce_harness::Recorder;
///
/// let recorder = Recorder::new();
/// let r = recorder.clone();
/// let callback = move || r.note("fired");
///
/// callback();
/// assert_eq!(recorder.entries(), ["fired"]);
/// ```
#[derive(Clone, Default)]
pub struct Recorder {
    entries: Rc<RefCell<Vec<String>>>,
}

impl Recorder {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a label to the log.
    pub fn note(&self, label: impl Into<String>) {
        self.entries.borrow_mut().push(label.into());
    }

    /// The labels recorded so far, in order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.borrow().clone()
    }

    /// Number of labels recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.borrow().iter()).finish()
    }
}

/// A shared call counter for closures that only need "how many times".
#[derive(Clone, Default, Debug)]
pub struct Counter {
    count: Rc<Cell<u64>>,
}

impl Counter {
    /// Create a counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment by one.
    pub fn bump(&self) {
        self.count.set(self.count.get() + 1);
    }

    /// The current count.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.count.get()
    }
}

/// Increment a numeric scope property, treating an absent property as zero.
///
/// # Panics
///
/// Panics if the property exists but is not a number.
pub fn bump(scope: &Scope, key: &str) {
    let current = match scope.get(key) {
        Value::Null => 0.0,
        other => other
            .as_number()
            .unwrap_or_else(|| panic!("property '{key}' is not a number")),
    };
    scope.set(key, current + 1.0);
}

/// Read a numeric scope property.
///
/// # Panics
///
/// Panics if the property is absent or not a number.
#[must_use]
pub fn number(scope: &Scope, key: &str) -> f64 {
    scope
        .get(key)
        .as_number()
        .unwrap_or_else(|| panic!("property '{key}' is not a number"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_preserves_order_across_clones() {
        let recorder = Recorder::new();
        let a = recorder.clone();
        let b = recorder.clone();
        a.note("first");
        b.note("second");
        a.note("third");
        assert_eq!(recorder.entries(), ["first", "second", "third"]);
        assert_eq!(recorder.len(), 3);
    }

    #[test]
    fn counter_shares_state() {
        let counter = Counter::new();
        let clone = counter.clone();
        clone.bump();
        clone.bump();
        assert_eq!(counter.value(), 2);
    }

    #[test]
    fn bump_starts_absent_properties_at_zero() {
        let scope = Scope::new();
        bump(&scope, "count");
        bump(&scope, "count");
        assert_eq!(number(&scope, "count"), 2.0);
    }

    #[test]
    #[should_panic(expected = "not a number")]
    fn bump_rejects_non_numeric_properties() {
        let scope = Scope::new();
        scope.set("count", "nope");
        bump(&scope, "count");
    }
}
