#![forbid(unsafe_code)]

//! Snapshot-bracketed undoable mutations.
//!
//! [`UndoableStore`] wraps a store mutation in a transactional envelope:
//! a checkpoint captures the *before* snapshot, the mutation queues its
//! writes, a second checkpoint captures the *after* snapshot, and the diff
//! of the two becomes a forward/backward [`StoreDelta`] fulfilled into a
//! [`Promise`]. The undo record registered with the host manager applies
//! the delta (or its inverse) through that promise, so undo/redo requested
//! before the delta exists simply waits for it — a partial delta is never
//! applied.
//!
//! The coordinator owns no store state. Checkpoint capture cannot fail;
//! store errors raised by the mutation's writes surface through the
//! relation observer channel, not here.

use std::cell::RefCell;
use std::rc::Rc;

use liverel_store::{Signal, Store, StoreDelta, StoreSnapshot, Value};
use tracing::debug;

use crate::editable::EditableValue;
use crate::manager::UndoManager;
use crate::promise::Promise;

/// Lifecycle of one undoable action, traced as it advances.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionPhase {
    BeforeSnapshotTaken,
    MutationApplied,
    AfterSnapshotTaken,
    DeltaComputed,
    Registered,
}

/// Coordinates undoable mutations against one store and one host manager.
/// Cloning shares both.
#[derive(Clone)]
pub struct UndoableStore {
    store: Store,
    manager: UndoManager,
}

impl std::fmt::Debug for UndoableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoableStore")
            .field("store", &self.store)
            .field("manager", &self.manager)
            .finish()
    }
}

impl UndoableStore {
    #[must_use]
    pub fn new(store: Store, manager: UndoManager) -> Self {
        UndoableStore { store, manager }
    }

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    #[must_use]
    pub fn manager(&self) -> &UndoManager {
        &self.manager
    }

    /// Run `mutation` as a named undoable action.
    ///
    /// The mutation must do its work by enqueueing store writes
    /// (`async_add` and friends); the before/after snapshots bracket
    /// exactly those writes via checkpoints on the store's pump. Returns
    /// the promise fulfilled with the forward delta once the after
    /// snapshot is taken.
    pub fn perform_undoable(
        &self,
        name: &str,
        mutation: impl FnOnce() + 'static,
    ) -> Promise<StoreDelta> {
        self.perform_bracketed(name, Rc::new(RefCell::new(None)), mutation)
    }

    /// Like [`perform_undoable`](Self::perform_undoable), with the *before*
    /// snapshot already captured — used by transient edit sessions that
    /// snapshot at the first keystroke and commit later.
    pub fn perform_undoable_from(
        &self,
        name: &str,
        before: StoreSnapshot,
        mutation: impl FnOnce() + 'static,
    ) -> Promise<StoreDelta> {
        let action = name.to_string();
        debug!(
            action = %action,
            phase = ?ActionPhase::BeforeSnapshotTaken,
            "undoable action"
        );
        self.perform_bracketed(name, Rc::new(RefCell::new(Some(before))), mutation)
    }

    /// A bidirectional editable value for `signal`: reads mirror the
    /// signal, transient writes go through `update` with no undo record,
    /// and `commit` closes the edit session as one undoable action.
    pub fn bidi_value(
        &self,
        action: &str,
        signal: Signal<Value>,
        update: impl Fn(Value) + 'static,
    ) -> EditableValue {
        EditableValue::new(self.clone(), action, signal, Rc::new(update))
    }

    fn perform_bracketed(
        &self,
        name: &str,
        before_cell: Rc<RefCell<Option<StoreSnapshot>>>,
        mutation: impl FnOnce() + 'static,
    ) -> Promise<StoreDelta> {
        let pump = self.store.pump().clone();
        let promise: Promise<StoreDelta> = Promise::new();
        let name = name.to_string();

        if before_cell.borrow().is_none() {
            let store = self.store.clone();
            let cell = Rc::clone(&before_cell);
            let action = name.clone();
            pump.register_checkpoint(move || {
                *cell.borrow_mut() = Some(store.take_snapshot());
                debug!(
                    action = %action,
                    phase = ?ActionPhase::BeforeSnapshotTaken,
                    "undoable action"
                );
            });
        }

        // The mutation enqueues its writes now; FIFO order puts them after
        // the before checkpoint and before the after checkpoint.
        mutation();

        {
            let store = self.store.clone();
            let cell = Rc::clone(&before_cell);
            let action = name.clone();
            let done = promise.clone();
            pump.register_checkpoint(move || {
                debug!(
                    action = %action,
                    phase = ?ActionPhase::MutationApplied,
                    "undoable action"
                );
                let before = cell
                    .borrow_mut()
                    .take()
                    .expect("before snapshot captured by the earlier checkpoint");
                let after = store.take_snapshot();
                debug!(
                    action = %action,
                    phase = ?ActionPhase::AfterSnapshotTaken,
                    "undoable action"
                );
                let forward = store.compute_delta(&before, &after);
                debug!(
                    action = %action,
                    phase = ?ActionPhase::DeltaComputed,
                    "undoable action"
                );
                done.fulfill(forward);
            });
        }

        // The mutation's effect is (or will be) applied by the pump, so the
        // record never performs forward at registration.
        let forward = {
            let store = self.store.clone();
            let delta = promise.clone();
            move || {
                let store = store.clone();
                delta.when_fulfilled(move |delta: &StoreDelta| {
                    store.async_apply(delta.clone());
                });
            }
        };
        let backward = {
            let store = self.store.clone();
            let delta = promise.clone();
            move || {
                let store = store.clone();
                delta.when_fulfilled(move |delta: &StoreDelta| {
                    store.async_apply(delta.reversed());
                });
            }
        };
        self.manager.register(&name, false, forward, backward);
        debug!(
            action = %name,
            phase = ?ActionPhase::Registered,
            "undoable action"
        );

        promise
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
