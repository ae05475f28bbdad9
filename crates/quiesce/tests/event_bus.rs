//! Event bus contract across the tree: upward emit, downward broadcast,
//! shared event records, and cancellation flags.

use quiesce::{Scope, Value};
use quiesce_harness::Recorder;

fn tree() -> (Scope, Scope, Scope, Scope) {
    let parent = Scope::new();
    let scope = parent.new_child();
    let child = scope.new_child();
    let isolated_child = scope.new_isolated_child();
    (parent, scope, child, isolated_child)
}

#[test]
fn emit_walks_origin_then_ancestors_in_order() {
    let (parent, scope, child, _) = tree();
    let recorder = Recorder::new();

    for (who, label) in [(&parent, "parent"), (&scope, "scope"), (&child, "child")] {
        let r = recorder.clone();
        who.on("some_event", move |_, _| {
            r.note(label);
            Ok(())
        });
    }

    scope.emit("some_event", &[]);
    assert_eq!(recorder.entries(), ["scope", "parent"]);
}

#[test]
fn broadcast_walks_the_subtree_in_preorder() {
    let (parent, scope, child, isolated_child) = tree();
    let recorder = Recorder::new();

    for (who, label) in [
        (&parent, "parent"),
        (&scope, "scope"),
        (&child, "child"),
        (&isolated_child, "isolated"),
    ] {
        let r = recorder.clone();
        who.on("some_event", move |_, _| {
            r.note(label);
            Ok(())
        });
    }

    scope.broadcast("some_event", &[]);
    assert_eq!(
        recorder.entries(),
        ["scope", "child", "isolated"],
        "descendants only, origin first, isolation irrelevant to events"
    );
}

#[test]
fn one_shared_record_per_emit_dispatch() {
    let (parent, scope, _, _) = tree();

    // The child's listener flags the record; the parent's listener, invoked
    // later in the same dispatch, must observe the flag.
    scope.on("some_event", |event, _| {
        event.prevent_default();
        Ok(())
    });
    let observed = Recorder::new();
    let r = observed.clone();
    parent.on("some_event", move |event, _| {
        r.note(if event.default_prevented() {
            "flag_seen"
        } else {
            "flag_missing"
        });
        Ok(())
    });

    let event = scope.emit("some_event", &[]);
    assert_eq!(observed.entries(), ["flag_seen"]);
    assert!(event.default_prevented(), "caller observes the flag too");
}

#[test]
fn one_shared_record_per_broadcast_dispatch() {
    let (_, scope, child, _) = tree();

    scope.on("some_event", |event, _| {
        event.prevent_default();
        Ok(())
    });
    let observed = Recorder::new();
    let r = observed.clone();
    child.on("some_event", move |event, _| {
        r.note(if event.default_prevented() {
            "flag_seen"
        } else {
            "flag_missing"
        });
        Ok(())
    });

    let event = scope.broadcast("some_event", &[]);
    assert_eq!(observed.entries(), ["flag_seen"]);
    assert!(event.default_prevented());
}

#[test]
fn current_scope_tracks_the_hop_and_target_stays_fixed() {
    let (parent, scope, _, _) = tree();
    let recorder = Recorder::new();

    let origin = scope.clone();
    let at_parent = parent.clone();
    let r = recorder.clone();
    parent.on("some_event", move |event, _| {
        r.note(format!(
            "current_is_parent={} target_is_origin={}",
            event.current() == Some(&at_parent),
            event.target() == &origin,
        ));
        Ok(())
    });

    let event = scope.emit("some_event", &[]);
    assert_eq!(recorder.entries(), ["current_is_parent=true target_is_origin=true"]);
    assert!(event.current().is_none(), "cleared once dispatch completes");
}

#[test]
fn stop_propagation_halts_the_upward_walk() {
    let (parent, scope, _, _) = tree();
    let recorder = Recorder::new();

    scope.on("some_event", |event, _| {
        event.stop_propagation();
        Ok(())
    });
    let r = recorder.clone();
    let sibling = recorder.clone();
    scope.on("some_event", move |_, _| {
        sibling.note("same_scope_still_runs");
        Ok(())
    });
    parent.on("some_event", move |_, _| {
        r.note("parent_ran");
        Ok(())
    });

    scope.emit("some_event", &[]);
    assert_eq!(recorder.entries(), ["same_scope_still_runs"]);
}

#[test]
fn stop_propagation_does_not_affect_broadcast() {
    let (_, scope, child, _) = tree();
    let recorder = Recorder::new();

    scope.on("some_event", |event, _| {
        event.stop_propagation();
        Ok(())
    });
    let r = recorder.clone();
    child.on("some_event", move |_, _| {
        r.note("child_ran");
        Ok(())
    });

    scope.broadcast("some_event", &[]);
    assert_eq!(recorder.entries(), ["child_ran"]);
}

#[test]
fn arguments_reach_every_hop() {
    let (parent, scope, _, _) = tree();
    let recorder = Recorder::new();

    for who in [&parent, &scope] {
        let r = recorder.clone();
        who.on("some_event", move |_, args| {
            r.note(args[0].as_str().unwrap_or("?").to_owned());
            Ok(())
        });
    }

    scope.emit("some_event", &[Value::from("payload"), Value::from(7)]);
    assert_eq!(recorder.entries(), ["payload", "payload"]);
}

#[test]
fn emit_returns_the_event_record() {
    let scope = Scope::new();
    let event = scope.emit("quiet_event", &[]);
    assert_eq!(event.name(), "quiet_event");
    assert!(!event.default_prevented());
    assert_eq!(event.target(), &scope);
}

#[test]
fn destroyed_scope_no_longer_hears_broadcasts() {
    let (_, scope, child, _) = tree();
    let recorder = Recorder::new();

    let r = recorder.clone();
    child.on("some_event", move |_, _| {
        r.note("child");
        Ok(())
    });

    scope.broadcast("some_event", &[]);
    child.destroy();
    scope.broadcast("some_event", &[]);
    assert_eq!(recorder.entries(), ["child"]);
}
