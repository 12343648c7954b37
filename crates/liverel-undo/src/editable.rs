#![forbid(unsafe_code)]

//! The bidirectional editable value.
//!
//! [`EditableValue`] binds a UI control to the store in both directions.
//! Reads mirror a [`Signal<Value>`] (typically `one_value_signal`).
//! Writes come in two flavors:
//!
//! - [`set_transient`](EditableValue::set_transient): the live keystroke
//!   path. Applies the update directly with no undo registration, echoing
//!   the value on the signal with `ChangeMetadata::TRANSIENT`. The *before*
//!   snapshot is captured once, at the first transient edit of a session.
//! - [`commit`](EditableValue::commit): closes the session as one undoable
//!   action spanning every transient edit since the snapshot, via
//!   `perform_undoable_from`. The committed value reaches the signal
//!   through the store's own change notification.
//!
//! A commit without a preceding transient edit snapshots on the spot, so a
//! plain programmatic set is a one-edit session.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use liverel_store::{ChangeMetadata, Signal, StoreDelta, StoreSnapshot, Value};

use crate::coordinator::UndoableStore;
use crate::promise::Promise;

type UpdateFn = Rc<dyn Fn(Value)>;

/// A two-way binding between a signal-backed value and undoable store
/// writes.
pub struct EditableValue {
    coordinator: UndoableStore,
    action: String,
    signal: Signal<Value>,
    update: UpdateFn,
    /// Store state at the start of the current edit session, if one is
    /// open.
    session_before: Rc<RefCell<Option<StoreSnapshot>>>,
}

impl fmt::Debug for EditableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditableValue")
            .field("action", &self.action)
            .field("editing", &self.session_before.borrow().is_some())
            .finish()
    }
}

impl EditableValue {
    pub(crate) fn new(
        coordinator: UndoableStore,
        action: &str,
        signal: Signal<Value>,
        update: UpdateFn,
    ) -> Self {
        EditableValue {
            coordinator,
            action: action.to_string(),
            signal,
            update,
            session_before: Rc::new(RefCell::new(None)),
        }
    }

    /// Current value as mirrored by the signal.
    #[must_use]
    pub fn get(&self) -> Option<Value> {
        self.signal.get()
    }

    /// The underlying signal, for attaching observers.
    #[must_use]
    pub fn signal(&self) -> &Signal<Value> {
        &self.signal
    }

    /// True while a transient edit session is open (edits made, not yet
    /// committed).
    #[must_use]
    pub fn is_editing(&self) -> bool {
        self.session_before.borrow().is_some()
    }

    /// Apply an in-progress value with no undo registration. The first
    /// transient edit of a session captures the *before* snapshot the later
    /// commit will bracket against.
    pub fn set_transient(&self, value: Value) {
        {
            let mut before = self.session_before.borrow_mut();
            if before.is_none() {
                *before = Some(self.coordinator.store().take_snapshot());
            }
        }
        (self.update)(value.clone());
        self.signal.emit(value, ChangeMetadata::TRANSIENT);
    }

    /// Commit `value`, closing the edit session as one undoable action.
    /// Undoing it restores the state before the session's first transient
    /// edit.
    pub fn commit(&self, value: Value) -> Promise<StoreDelta> {
        let before = self
            .session_before
            .borrow_mut()
            .take()
            .unwrap_or_else(|| self.coordinator.store().take_snapshot());
        let update = Rc::clone(&self.update);
        self.coordinator
            .perform_undoable_from(&self.action, before, move || update(value))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::UndoManager;
    use liverel_store::{
        one_value_signal, Pump, Relation, Row, Scheme, Select, Store,
    };

    fn setup() -> (Pump, UndoableStore, Relation, EditableValue) {
        let pump = Pump::new();
        let store = Store::new(pump.clone());
        let rel = store
            .create_relation("title", Scheme::new(["id", "text"]))
            .expect("create relation");
        rel.async_add(Row::from_pairs([
            ("id", Value::from(1i64)),
            ("text", Value::from("untitled")),
        ]));
        pump.run_until_idle();

        let undoable = UndoableStore::new(store, UndoManager::default());
        let signal = one_value_signal(&rel, "text".into(), Value::from(""));
        let target = rel.clone();
        let editable = undoable.bidi_value("Rename", signal, move |value| {
            target.async_update(
                Select::Eq("id".into(), Value::Integer(1)),
                Row::from_pairs([("text", value)]),
            );
        });
        (pump, undoable, rel, editable)
    }

    fn text(rel: &Relation) -> Value {
        rel.rows()[0].get(&"text".into()).cloned().expect("text")
    }

    #[test]
    fn transient_edits_echo_without_undo_registration() {
        let (pump, undoable, rel, editable) = setup();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _token = editable
            .signal()
            .observe(move |v, meta| s.borrow_mut().push((v.clone(), meta.transient)));

        editable.set_transient(Value::from("d"));
        editable.set_transient(Value::from("dr"));
        assert!(editable.is_editing());
        assert_eq!(editable.get(), Some(Value::Text("dr".into())));
        assert!(
            seen.borrow().iter().all(|(_, transient)| *transient),
            "keystrokes are transient"
        );
        assert!(!undoable.manager().can_undo(), "no undo step yet");

        pump.run_until_idle();
        assert_eq!(text(&rel), Value::Text("dr".into()));
        assert!(!undoable.manager().can_undo());
    }

    #[test]
    fn commit_registers_one_undo_step_for_the_whole_session() {
        let (pump, undoable, rel, editable) = setup();

        editable.set_transient(Value::from("d"));
        editable.set_transient(Value::from("dr"));
        pump.run_until_idle();

        editable.commit(Value::from("draft"));
        pump.run_until_idle();
        assert!(!editable.is_editing());
        assert_eq!(text(&rel), Value::Text("draft".into()));
        assert_eq!(undoable.manager().undo_action_name().as_deref(), Some("Rename"));

        // One undo erases the whole session, back past the keystrokes.
        undoable.manager().undo();
        pump.run_until_idle();
        assert_eq!(text(&rel), Value::Text("untitled".into()));
        assert_eq!(editable.get(), Some(Value::Text("untitled".into())));

        undoable.manager().redo();
        pump.run_until_idle();
        assert_eq!(text(&rel), Value::Text("draft".into()));
    }

    #[test]
    fn commit_without_transient_edit_is_a_one_edit_session() {
        let (pump, undoable, rel, editable) = setup();

        editable.commit(Value::from("direct"));
        pump.run_until_idle();
        assert_eq!(text(&rel), Value::Text("direct".into()));

        undoable.manager().undo();
        pump.run_until_idle();
        assert_eq!(text(&rel), Value::Text("untitled".into()));
    }

    #[test]
    fn committed_value_reaches_the_signal_as_committed() {
        let (pump, _undoable, _rel, editable) = setup();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _token = editable
            .signal()
            .observe(move |v, meta| s.borrow_mut().push((v.clone(), meta.transient)));

        editable.commit(Value::from("final"));
        pump.run_until_idle();

        assert!(
            seen.borrow()
                .contains(&(Value::Text("final".into()), false)),
            "store notification emits the committed value: {:?}",
            seen.borrow()
        );
    }
}
