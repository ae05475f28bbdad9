//! Structural shallow diffing over lists and maps, without full cloning.
//!
//! [`Scope::watch_collection`] wraps a single ordinary watcher whose watched
//! "value" is a monotonically increasing change counter. The internal watch
//! function diffs the new collection against a retained shadow copy and
//! bumps the counter once per structural change it finds; the digest
//! engine's ordinary identity comparison on the counter then decides whether
//! the listener fires. This detects element-level changes that identity
//! comparison misses, without the per-sweep deep comparison and deep copies
//! a `watch_deep` pays for.
//!
//! Changes counted per evaluation:
//!
//! - lists: shadow not previously a list (one), length difference (one),
//!   each index whose element is identity-unequal (NaN-aware) to the shadow
//!   (one each);
//! - maps: shadow not previously a map (one), each added key (one each),
//!   each value-changed key (one each), any keys removed (one for the
//!   shrink, stale shadow keys dropped);
//! - everything else: identity-unequal to the previous value (one).
//!
//! # Invariants
//!
//! 1. The change counter never decreases.
//! 2. The shadow is updated in the same evaluation that counts the change,
//!    so an unchanged collection on the next sweep counts nothing.
//! 3. On the listener's first run, the old value equals the new value.
//! 4. The previous-value snapshot for later runs is maintained only when
//!    `track_old_value` is set — skipping the per-change shallow copy when
//!    the caller does not need a distinguishable previous state.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | Watched fn faults | logged by the digest engine; counter and shadow untouched |
//! | Listener faults | logged; first-run flag and snapshot not advanced |
//! | Value flips type (list → map → scalar) | each flip counts one change |

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;

use crate::digest::WatchHandle;
use crate::error::CallbackResult;
use crate::scope::Scope;
use crate::value::Value;

/// Retained copy of the previously observed collection shape.
enum Shadow {
    /// Nothing observed yet (distinct from having observed `Null`).
    Uninit,
    List(Vec<Value>),
    Map(AHashMap<String, Value>),
    Scalar(Value),
}

struct CollectionState {
    change_count: u64,
    shadow: Shadow,
    /// Latest watch result, handed to the listener.
    current: Value,
    /// Shallow snapshot for the listener's old-value argument.
    very_old: Value,
    first_run: bool,
}

fn diff_into_shadow(state: &mut CollectionState, new_value: &Value) {
    let CollectionState {
        change_count,
        shadow,
        ..
    } = state;

    match new_value {
        Value::List(items) => {
            let items = items.borrow();
            if !matches!(shadow, Shadow::List(_)) {
                *change_count += 1;
                *shadow = Shadow::List(Vec::new());
            }
            if let Shadow::List(old_items) = shadow {
                if items.len() != old_items.len() {
                    *change_count += 1;
                    old_items.resize(items.len(), Value::Null);
                }
                for (index, item) in items.iter().enumerate() {
                    if !item.ref_equal(&old_items[index]) {
                        *change_count += 1;
                        old_items[index] = item.clone();
                    }
                }
            }
        }
        Value::Map(entries) => {
            let entries = entries.borrow();
            if !matches!(shadow, Shadow::Map(_)) {
                *change_count += 1;
                *shadow = Shadow::Map(AHashMap::new());
            }
            if let Shadow::Map(old_entries) = shadow {
                for (key, value) in entries.iter() {
                    match old_entries.get_mut(key) {
                        Some(old_value) => {
                            if !value.ref_equal(old_value) {
                                *change_count += 1;
                                *old_value = value.clone();
                            }
                        }
                        None => {
                            *change_count += 1;
                            old_entries.insert(key.clone(), value.clone());
                        }
                    }
                }
                if old_entries.len() > entries.len() {
                    *change_count += 1;
                    old_entries.retain(|key, _| entries.contains_key(key));
                }
            }
        }
        other => {
            let changed = match shadow {
                Shadow::Scalar(previous) => !other.ref_equal(previous),
                // Nothing observed yet behaves like a previous `Null`.
                Shadow::Uninit => !other.is_null(),
                _ => true,
            };
            if changed {
                *change_count += 1;
            }
            *shadow = Shadow::Scalar(other.clone());
        }
    }
}

impl Scope {
    /// Watch a collection for shallow structural changes.
    ///
    /// The listener receives the collection itself as the new value. When
    /// `track_old_value` is true, later runs also receive a shallow snapshot
    /// of the previous state; when false, the snapshot is skipped and the
    /// old-value argument repeats the new value.
    pub fn watch_collection(
        &self,
        watch_fn: impl Fn(&Scope) -> CallbackResult<Value> + 'static,
        listen_fn: impl Fn(&Value, &Value, &Scope) -> CallbackResult<()> + 'static,
        track_old_value: bool,
    ) -> WatchHandle {
        let state = Rc::new(RefCell::new(CollectionState {
            change_count: 0,
            shadow: Shadow::Uninit,
            current: Value::Null,
            very_old: Value::Null,
            first_run: true,
        }));

        let watch_state = Rc::clone(&state);
        let internal_watch = move |scope: &Scope| -> CallbackResult<Value> {
            let new_value = watch_fn(scope)?;
            let mut state = watch_state.borrow_mut();
            state.current = new_value.clone();
            diff_into_shadow(&mut state, &new_value);
            Ok(Value::from(state.change_count as f64))
        };

        let listen_state = Rc::clone(&state);
        let internal_listen = move |_: &Value, _: &Value, scope: &Scope| -> CallbackResult<()> {
            let (current, previous, first) = {
                let state = listen_state.borrow();
                let previous = if state.first_run {
                    state.current.clone()
                } else {
                    state.very_old.clone()
                };
                (state.current.clone(), previous, state.first_run)
            };

            let result = listen_fn(&current, &previous, scope);
            if result.is_ok() {
                let mut state = listen_state.borrow_mut();
                if first {
                    state.first_run = false;
                }
                if track_old_value {
                    state.very_old = current.shallow_clone();
                }
            }
            result
        };

        self.watch(internal_watch, internal_listen)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
