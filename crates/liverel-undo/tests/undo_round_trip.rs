//! Full-stack round trips: undoable mutations observed through a live
//! array view. Undo and redo must reach the view as ordinary minimal
//! change batches, indistinguishable from user edits.

use std::cell::RefCell;
use std::rc::Rc;

use liverel_array::{ArrayChange, ArrayEvent, RowArray};
use liverel_store::{Pump, Relation, Row, Scheme, Select, Store, Value};
use liverel_undo::{UndoConfig, UndoManager, UndoableStore};

fn todo(id: i64, order: f64, name: &str) -> Row {
    Row::from_pairs([
        ("id", Value::from(id)),
        ("order", Value::from(order)),
        ("name", Value::from(name)),
    ])
}

fn setup() -> (Pump, UndoableStore, Relation) {
    let pump = Pump::new();
    let store = Store::new(pump.clone());
    let rel = store
        .create_relation("todo", Scheme::new(["id", "order", "name"]))
        .expect("create relation");
    let undoable = UndoableStore::new(store, UndoManager::new(UndoConfig::default()));
    (pump, undoable, rel)
}

fn observed(
    pump: &Pump,
    rel: &Relation,
) -> (RowArray, Rc<RefCell<Vec<Vec<ArrayChange>>>>, liverel_array::ArraySubscription) {
    let view = RowArray::new(rel.clone(), "id", "order", false, None).expect("view");
    let batches = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&batches);
    let sub = view.observe(move |event| {
        if let ArrayEvent::Changes(changes) = event {
            log.borrow_mut().push(changes.clone());
        }
    });
    pump.run_until_idle();
    batches.borrow_mut().clear();
    (view, batches, sub)
}

#[test]
fn undo_and_redo_replay_through_the_array_view() {
    let (pump, undoable, rel) = setup();
    let target = rel.clone();
    undoable.perform_undoable("Add Todos", move || {
        target.async_add(todo(1, 1.0, "a"));
        target.async_add(todo(2, 2.0, "b"));
    });
    pump.run_until_idle();

    let (view, batches, _sub) = observed(&pump, &rel);

    // Undo arrives as one coalesced delete batch.
    undoable.manager().undo();
    pump.run_until_idle();
    assert_eq!(
        *batches.borrow(),
        vec![vec![ArrayChange::Delete(0), ArrayChange::Delete(0)]]
    );
    assert!(view.is_empty());
    batches.borrow_mut().clear();

    // Redo arrives as one coalesced insert batch.
    undoable.manager().redo();
    pump.run_until_idle();
    assert_eq!(
        *batches.borrow(),
        vec![vec![ArrayChange::Insert(0), ArrayChange::Insert(1)]]
    );
    assert_eq!(view.len(), 2);
}

#[test]
fn undoing_a_reorder_is_a_single_move() {
    let (pump, undoable, rel) = setup();
    for (id, order, name) in [(1, 1.0, "a"), (2, 2.0, "b"), (3, 3.0, "c")] {
        rel.async_add(todo(id, order, name));
    }
    pump.run_until_idle();

    let (view, batches, _sub) = observed(&pump, &rel);

    // Drag "a" past "c" as one undoable action.
    let key = view.order_for_move(0, 2).expect("move key");
    let target = rel.clone();
    undoable.perform_undoable("Move Todo", move || {
        target.async_update(
            Select::Eq("id".into(), Value::Integer(1)),
            Row::from_pairs([("order", key)]),
        );
    });
    pump.run_until_idle();
    assert_eq!(
        *batches.borrow(),
        vec![vec![ArrayChange::Move { src: 0, dst: 2 }]]
    );
    batches.borrow_mut().clear();

    undoable.manager().undo();
    pump.run_until_idle();
    assert_eq!(
        *batches.borrow(),
        vec![vec![ArrayChange::Move { src: 2, dst: 0 }]],
        "the inverse is also a single move"
    );
}

#[test]
fn interleaved_actions_unwind_in_reverse_order() {
    let (pump, undoable, rel) = setup();

    for (name, row) in [
        ("Add A", todo(1, 1.0, "a")),
        ("Add B", todo(2, 2.0, "b")),
        ("Add C", todo(3, 3.0, "c")),
    ] {
        let target = rel.clone();
        undoable.perform_undoable(name, move || target.async_add(row));
        pump.run_until_idle();
    }
    assert_eq!(rel.rows().len(), 3);

    assert_eq!(undoable.manager().undo().as_deref(), Some("Add C"));
    assert_eq!(undoable.manager().undo().as_deref(), Some("Add B"));
    pump.run_until_idle();
    assert_eq!(rel.rows(), vec![todo(1, 1.0, "a")]);

    assert_eq!(undoable.manager().redo().as_deref(), Some("Add B"));
    pump.run_until_idle();
    assert_eq!(rel.rows().len(), 2);

    // A fresh action forks history: C is no longer redoable.
    let target = rel.clone();
    undoable.perform_undoable("Add D", move || target.async_add(todo(4, 4.0, "d")));
    pump.run_until_idle();
    assert!(!undoable.manager().can_redo());
    assert_eq!(rel.rows().len(), 3);
}

#[test]
fn repeated_undo_redo_cycles_are_stable() {
    let (pump, undoable, rel) = setup();
    let target = rel.clone();
    undoable.perform_undoable("Add Todo", move || {
        target.async_add(todo(1, 1.0, "a"));
    });
    pump.run_until_idle();

    for _ in 0..5 {
        undoable.manager().undo();
        pump.run_until_idle();
        assert!(rel.rows().is_empty());

        undoable.manager().redo();
        pump.run_until_idle();
        assert_eq!(rel.rows(), vec![todo(1, 1.0, "a")]);
    }
}

#[test]
fn rebalance_written_back_as_one_undoable_action() {
    let (pump, undoable, rel) = setup();
    for (id, order) in [(1, 1.0), (2, 1.0078125), (3, 1.015625)] {
        rel.async_add(todo(id, order, "x"));
    }
    pump.run_until_idle();

    let (view, _batches, _sub) = observed(&pump, &rel);
    let keys = view.rebalanced_order_keys();
    let target = rel.clone();
    undoable.perform_undoable("Rebalance", move || {
        for (id, key) in keys {
            target.async_update(
                Select::Eq("id".into(), id),
                Row::from_pairs([("order", key)]),
            );
        }
    });
    pump.run_until_idle();

    let order_of = |id: i64| {
        view.element_for_id(&Value::Integer(id))
            .and_then(|e| e.row.get(&"order".into()).and_then(Value::as_real))
            .expect("real order key")
    };
    assert_eq!(order_of(1), 1.0);
    assert_eq!(order_of(2), 2.0);
    assert_eq!(order_of(3), 3.0);

    // One undo restores every squeezed key.
    undoable.manager().undo();
    pump.run_until_idle();
    assert_eq!(order_of(2), 1.0078125);
    assert_eq!(order_of(3), 1.015625);
}
