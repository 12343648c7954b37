#![forbid(unsafe_code)]

//! Undo-coordinated mutations over `liverel-store`.
//!
//! Every user-visible store mutation should be reversible. This crate
//! provides the machinery: [`UndoableStore`] brackets a mutation with
//! before/after snapshot checkpoints on the store's pump, diffs them into a
//! forward/backward delta, and registers the pair with a host
//! [`UndoManager`]. The delta arrives through a [`Promise`], so undo and
//! redo requested before the mutation has finished applying wait for the
//! real delta instead of acting on a partial one.
//!
//! [`EditableValue`] builds the common text-field pattern on top:
//! transient per-keystroke writes with no undo noise, one undo step per
//! committed edit session.

pub mod coordinator;
pub mod editable;
pub mod manager;
pub mod promise;

pub use coordinator::{ActionPhase, UndoableStore};
pub use editable::EditableValue;
pub use manager::{UndoConfig, UndoManager};
pub use promise::Promise;
