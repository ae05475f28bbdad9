//! Dynamic values stored in scope properties and produced by watch functions.
//!
//! A [`Value`] is the unit of state the digest engine compares. Scalars are
//! carried inline; lists and maps are shared through `Rc<RefCell<..>>`, so
//! cloning a `Value` is a *reference* copy: mutating a list through one
//! handle is visible through every clone. That distinction is load-bearing:
//! identity-equality watchers see a mutated-in-place list as unchanged,
//! while structural-equality watchers see the mutation.
//!
//! # Equality modes
//!
//! - [`ref_equal`](Value::ref_equal): scalar values by value, with the one
//!   numeric exception that two NaNs compare equal; lists and maps by
//!   pointer identity only.
//! - [`deep_equal`](Value::deep_equal): full recursive structural
//!   comparison, NaN-aware.
//!
//! `PartialEq` delegates to `deep_equal` so tests can use `assert_eq!`
//! naturally. Note this makes `Value::from(f64::NAN) == Value::from(f64::NAN)`
//! true, deliberately diverging from IEEE float comparison.
//!
//! # Invariants
//!
//! 1. `clone()` never copies list or map storage.
//! 2. `deep_clone()` produces a value sharing no storage with the original.
//! 3. `shallow_clone()` produces a fresh outer container whose elements are
//!    reference copies.
//! 4. `ref_equal` implies `deep_equal`.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | Cyclic list/map | `deep_equal`/`deep_clone` recurse forever; cyclic values are unsupported |
//! | Borrowed container during `Debug` | elided as `[...]` / `{...}` rather than panicking |

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;

/// A dynamically typed value held by a scope property.
#[derive(Clone, Default)]
pub enum Value {
    /// The absent/undefined value. Reading a property a scope does not have
    /// yields `Null`.
    #[default]
    Null,
    /// A boolean.
    Bool(bool),
    /// A double-precision number. NaN is a legal, comparable inhabitant.
    Number(f64),
    /// An immutable string, compared by content.
    Str(Rc<str>),
    /// A shared, mutable list.
    List(Rc<RefCell<Vec<Value>>>),
    /// A shared, mutable string-keyed map.
    Map(Rc<RefCell<AHashMap<String, Value>>>),
}

impl Value {
    /// Build a list value from anything convertible to values.
    pub fn list_of<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Value {
        Value::List(Rc::new(RefCell::new(
            items.into_iter().map(Into::into).collect(),
        )))
    }

    /// Build a map value from key/value pairs.
    pub fn map_of<K: Into<String>, T: Into<Value>>(
        entries: impl IntoIterator<Item = (K, T)>,
    ) -> Value {
        Value::Map(Rc::new(RefCell::new(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )))
    }

    /// Whether this is the `Null` value.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The boolean payload, if any.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The numeric payload, if any.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The string payload, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The shared list storage, if this is a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&Rc<RefCell<Vec<Value>>>> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// The shared map storage, if this is a map.
    #[must_use]
    pub fn as_map(&self) -> Option<&Rc<RefCell<AHashMap<String, Value>>>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Identity comparison: scalars by value (two NaNs are equal), lists and
    /// maps by pointer identity.
    ///
    /// This is the comparison identity-mode watchers use, so an in-place
    /// mutation of a shared list does not register as a change here.
    #[must_use]
    pub fn ref_equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Structural comparison: recursive over lists and maps, NaN-aware for
    /// numbers. Shared-pointer containers short-circuit to equal.
    #[must_use]
    pub fn deep_equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.deep_equal(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter()
                        .all(|(key, v)| b.get(key).is_some_and(|w| v.deep_equal(w)))
            }
            _ => self.ref_equal(other),
        }
    }

    /// Recursive copy sharing no storage with the original.
    ///
    /// Deep-equality watchers store this as their previous value, so later
    /// in-place mutations of the watched structure are detectable.
    #[must_use]
    pub fn deep_clone(&self) -> Value {
        match self {
            Value::List(items) => Value::List(Rc::new(RefCell::new(
                items.borrow().iter().map(Value::deep_clone).collect(),
            ))),
            Value::Map(entries) => Value::Map(Rc::new(RefCell::new(
                entries
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_clone()))
                    .collect(),
            ))),
            other => other.clone(),
        }
    }

    /// One-level copy: a fresh outer container whose elements are reference
    /// copies. Scalars copy as themselves.
    #[must_use]
    pub fn shallow_clone(&self) -> Value {
        match self {
            Value::List(items) => Value::List(Rc::new(RefCell::new(items.borrow().clone()))),
            Value::Map(entries) => Value::Map(Rc::new(RefCell::new(entries.borrow().clone()))),
            other => other.clone(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.deep_equal(other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Value {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Value {
        Value::Number(f64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Value {
        Value::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::Str(Rc::from(s.as_str()))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::List(items) => match items.try_borrow() {
                Ok(items) => f.debug_list().entries(items.iter()).finish(),
                Err(_) => f.write_str("[...]"),
            },
            Value::Map(entries) => match entries.try_borrow() {
                Ok(entries) => f.debug_map().entries(entries.iter()).finish(),
                Err(_) => f.write_str("{...}"),
            },
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
    fn scalars_compare_by_value() {
        assert!(Value::from(1).ref_equal(&Value::from(1)));
        assert!(Value::from("abc").ref_equal(&Value::from("abc")));
        assert!(Value::from(true).ref_equal(&Value::from(true)));
        assert!(Value::Null.ref_equal(&Value::Null));
        assert!(!Value::from(1).ref_equal(&Value::from(2)));
        assert!(!Value::from(0).ref_equal(&Value::from(false)));
    }

    #[test]
    fn nan_equals_nan_in_both_modes() {
        let a = Value::from(f64::NAN);
        let b = Value::from(f64::NAN);
        assert!(a.ref_equal(&b));
        assert!(a.deep_equal(&b));
        assert!(!a.ref_equal(&Value::from(1)));
    }

    #[test]
    fn lists_compare_by_pointer_in_ref_mode() {
        let a = Value::list_of([1, 2, 3]);
        let b = Value::list_of([1, 2, 3]);
        assert!(!a.ref_equal(&b), "distinct allocations are ref-unequal");
        assert!(a.ref_equal(&a.clone()), "clone shares the allocation");
        assert!(a.deep_equal(&b));
    }

    #[test]
    fn clone_is_a_reference_copy() {
        let a = Value::list_of([1, 2]);
        let b = a.clone();
        a.as_list().unwrap().borrow_mut().push(Value::from(3));
        assert_eq!(b.as_list().unwrap().borrow().len(), 3);
    }

    #[test]
    fn deep_clone_shares_nothing() {
        let a = Value::list_of([Value::list_of([1]), Value::from("x")]);
        let b = a.deep_clone();
        assert!(a.deep_equal(&b));

        a.as_list().unwrap().borrow()[0]
            .as_list()
            .unwrap()
            .borrow_mut()
            .push(Value::from(2));
        assert!(!a.deep_equal(&b), "mutating the original must not touch the deep clone");
    }

    #[test]
    fn shallow_clone_copies_one_level() {
        let inner = Value::list_of([1]);
        let a = Value::list_of([inner.clone()]);
        let b = a.shallow_clone();

        // Outer containers are distinct...
        a.as_list().unwrap().borrow_mut().push(Value::from(9));
        assert_eq!(b.as_list().unwrap().borrow().len(), 1);

        // ...but elements are shared.
        inner.as_list().unwrap().borrow_mut().push(Value::from(2));
        assert_eq!(
            b.as_list().unwrap().borrow()[0]
                .as_list()
                .unwrap()
                .borrow()
                .len(),
            2
        );
    }

    #[test]
    fn map_structural_equality_ignores_insertion_order() {
        let a = Value::map_of([("x", 1), ("y", 2)]);
        let b = Value::map_of([("y", 2), ("x", 1)]);
        assert!(a.deep_equal(&b));
        assert!(!a.ref_equal(&b));
    }

    #[test]
    fn map_length_mismatch_is_unequal() {
        let a = Value::map_of([("x", 1)]);
        let b = Value::map_of([("x", 1), ("y", 2)]);
        assert!(!a.deep_equal(&b));
        assert!(!b.deep_equal(&a));
    }

    #[test]
    fn null_is_default_and_distinct() {
        assert!(Value::default().is_null());
        assert!(!Value::from(0).is_null());
        assert!(!Value::Null.ref_equal(&Value::from(false)));
    }

    #[test]
    fn debug_renders_json_like() {
        let v = Value::list_of([Value::from(1), Value::from("a"), Value::Null]);
        assert_eq!(format!("{v:?}"), r#"[1, "a", null]"#);
    }
}
