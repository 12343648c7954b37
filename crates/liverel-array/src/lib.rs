#![forbid(unsafe_code)]

//! Live array projection over an observable relational store.
//!
//! This crate turns a relation from `liverel-store` into a [`RowArray`]: a
//! sorted array of rows that stays current as the relation changes, and
//! that describes each change to its observers as a minimal sequence of
//! [`ArrayChange`]s (insert, delete, update, move) instead of a reload.
//! List-shaped UI sits directly on top: apply the changes to the
//! presentation in order and the screen matches the store.
//!
//! The crate has three pieces:
//!
//! - [`view`]: the projection itself, with its activation lifecycle and
//!   change-application rules.
//! - [`change`]: the [`ArrayChange`]/[`ArrayEvent`] vocabulary delivered to
//!   observers.
//! - [`order`] (private): fractional order-key arithmetic backing the
//!   [`RowArray::order_for_insertion_between`] and
//!   [`RowArray::order_for_move`] helpers.

pub mod change;
mod order;
pub mod view;

pub use change::{ArrayChange, ArrayEvent};
pub use view::{ArraySubscription, RowArray, RowElement, ViewError};
