#![forbid(unsafe_code)]

//! The array delta vocabulary.
//!
//! A [`RowArray`](crate::view::RowArray) reports every relational change as
//! a sequence of [`ArrayChange`]s: the minimal, index-accurate mutations a
//! consumer applies to its own presentation state. Indices are relative to
//! the array *after* all prior changes in the same batch have been applied,
//! so consumers must apply them in order and re-fetch elements by index as
//! they go.

use liverel_store::StoreError;

use crate::view::RowElement;

/// One minimal mutation to the projected array.
#[derive(Clone, Debug, PartialEq)]
pub enum ArrayChange {
    /// The full array, delivered once per activation.
    Initial(Vec<RowElement>),
    /// A new element appeared at `index`.
    Insert(usize),
    /// The element at `index` was removed.
    Delete(usize),
    /// The element at `index` changed contents without moving.
    Update(usize),
    /// The element at `src` moved to `dst` (indices as seen by a consumer
    /// applying changes in order: remove at `src`, then insert at `dst`).
    Move { src: usize, dst: usize },
}

/// Events delivered to array observers.
///
/// `BeginAsync`/`EndAsync` bracket change windows: a `BeginAsync` announces
/// an indeterminate-duration change is in flight (the initial query, or a
/// registered mutation), and the matching `EndAsync` closes it. Windows may
/// nest; every open is balanced by a close.
#[derive(Clone, Debug, PartialEq)]
pub enum ArrayEvent {
    BeginAsync,
    Changes(Vec<ArrayChange>),
    EndAsync,
    /// A store error surfaced during the fetch or a change cycle. The view
    /// stays attached; the consumer decides whether to drop it.
    Failed(StoreError),
}
