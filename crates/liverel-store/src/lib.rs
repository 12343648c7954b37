#![forbid(unsafe_code)]

//! In-memory observable relational store.
//!
//! This crate is the foundation of the `liverel` workspace: named relations
//! of [`Row`]s with fixed [`Scheme`]s, mutated asynchronously through an
//! explicit [`Pump`], observed through coalesced per-transaction
//! [`RowChangeSet`]s, and captured wholesale as structurally-shared
//! [`StoreSnapshot`]s that diff into reversible [`StoreDelta`]s.
//!
//! # Key Components
//!
//! - [`Store`] / [`Relation`] - named row sets with an async mutation surface
//! - [`Pump`] - the injected serial scheduler; `run_until_idle()` is the
//!   deterministic test hook
//! - [`RowChangeSet`] / [`ChangeParts`] - cancelling change sets and their
//!   partition into adds, updates, and deletes
//! - [`StoreSnapshot`] / [`StoreDelta`] - O(1) captures and reversible diffs
//! - [`Signal`] - single-threaded value channel with transient/committed
//!   metadata
//!
//! # Role in liverel
//!
//! `liverel-array` projects a relation into a live sorted array of minimal
//! deltas; `liverel-undo` brackets mutations with snapshot checkpoints for
//! transactional undo/redo. Both consume only the interfaces defined here.

pub mod change;
pub mod error;
pub mod pump;
pub mod relation;
pub mod row;
pub mod signal;
pub mod snapshot;
pub mod value;

pub use change::{ChangeParts, RowChangeSet};
pub use error::StoreError;
pub use pump::{FlushOutcome, Pump, PumpState};
pub use relation::{ObserverGuard, Relation, RelationObserver, Select, Store};
pub use row::{Attribute, Row, Scheme};
pub use signal::{ChangeMetadata, Signal, SignalToken, one_value_signal};
pub use snapshot::{RelationDelta, StoreDelta, StoreSnapshot};
pub use value::Value;
