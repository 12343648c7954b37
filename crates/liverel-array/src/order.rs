#![forbid(unsafe_code)]

//! Fractional order-key arithmetic.
//!
//! Reordering by drag-and-drop needs a key strictly between two neighbors
//! without renumbering the whole array, so keys live in a fractional `f64`
//! domain and a moved element takes the midpoint of its new neighbors.
//! At the array boundaries there is no second neighbor to bisect against,
//! so the key steps outward by a whole unit instead.
//!
//! Repeated midpoints exhaust `f64` precision eventually; [`respaced`]
//! produces the evenly spaced keys a caller writes back to reset the
//! domain (the view never renumbers implicitly).

/// A key strictly between `prev` and `next` for the given sort direction.
///
/// Boundary rules: with only a `prev` neighbor the key steps one unit past
/// it (in sort direction); with only a `next` neighbor, one unit before it;
/// with no neighbors at all, `1.0`.
#[must_use]
pub(crate) fn order_between(prev: Option<f64>, next: Option<f64>, descending: bool) -> f64 {
    let step = if descending { -1.0 } else { 1.0 };
    match (prev, next) {
        (Some(p), Some(n)) => p + (n - p) / 2.0,
        (Some(p), None) => p + step,
        (None, Some(n)) => n - step,
        (None, None) => 1.0,
    }
}

/// Evenly spaced keys (`1.0, 2.0, ...`) for `len` elements, emitted in the
/// order that keeps an array of that direction sorted.
#[must_use]
pub(crate) fn respaced(len: usize, descending: bool) -> Vec<f64> {
    let ascending = (1..=len).map(|i| i as f64);
    if descending {
        ascending.rev().collect()
    } else {
        ascending.collect()
    }
}
