#![forbid(unsafe_code)]

//! Coalesced row change sets.
//!
//! A [`RowChangeSet`] is a cancelling pair of added/removed row sets: within
//! one transaction, adding a row that is pending removal cancels the removal
//! (and vice versa), so any number of row-level events collapse into one net
//! change. Observers receive exactly one change set per relation per pump
//! cycle.
//!
//! [`ChangeParts`] partitions a coalesced set by an id attribute into the
//! three disjoint groups the array layer consumes: added rows, updated rows
//! (id present on both sides), and deleted ids.

use im::OrdSet;

use crate::row::{Attribute, Row};
use crate::value::Value;

/// Net added/removed rows for one relation within one transaction.
///
/// # Invariants
///
/// 1. `added` and `removed` are disjoint: a row never appears in both.
/// 2. `add(r)` after `remove(r)` leaves the set unchanged with respect to
///    `r`, and vice versa (cancellation).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RowChangeSet {
    added: OrdSet<Row>,
    removed: OrdSet<Row>,
}

impl RowChangeSet {
    #[must_use]
    pub fn new() -> Self {
        RowChangeSet::default()
    }

    /// Record a row addition, cancelling a pending removal of the same row.
    pub fn add(&mut self, row: Row) {
        if self.removed.remove(&row).is_none() {
            self.added.insert(row);
        }
    }

    /// Record a row removal, cancelling a pending addition of the same row.
    pub fn remove(&mut self, row: Row) {
        if self.added.remove(&row).is_none() {
            self.removed.insert(row);
        }
    }

    pub fn added(&self) -> impl Iterator<Item = &Row> {
        self.added.iter()
    }

    pub fn removed(&self) -> impl Iterator<Item = &Row> {
        self.removed.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// A coalesced change set partitioned by an id attribute.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeParts {
    /// Rows whose id appears only on the added side.
    pub added_rows: Vec<Row>,
    /// Full post-change rows whose id appears on both sides.
    pub updated_rows: Vec<Row>,
    /// Ids of rows that appear only on the removed side.
    pub deleted_ids: Vec<Value>,
}

impl ChangeParts {
    /// Partition `set` into adds, updates, and deletes keyed by `id_attr`.
    ///
    /// A row id present in both the added and removed sets means the row was
    /// updated: the added side carries the new contents. Rows missing the id
    /// attribute entirely are ignored.
    #[must_use]
    pub fn partition(set: &RowChangeSet, id_attr: &Attribute) -> Self {
        let mut deleted: Vec<&Row> = set.removed().collect();

        let mut added_rows = Vec::new();
        let mut updated_rows = Vec::new();
        for row in set.added() {
            let Some(id) = row.get(id_attr) else {
                continue;
            };
            if let Some(pos) = deleted.iter().position(|r| r.get(id_attr) == Some(id)) {
                // Same id on both sides: an update. The removed entry is
                // accounted for and must not also report a delete.
                updated_rows.push(row.clone());
                deleted.swap_remove(pos);
            } else {
                added_rows.push(row.clone());
            }
        }

        let deleted_ids = deleted
            .into_iter()
            .filter_map(|r| r.get(id_attr).cloned())
            .collect();

        ChangeParts {
            added_rows,
            updated_rows,
            deleted_ids,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added_rows.is_empty() && self.updated_rows.is_empty() && self.deleted_ids.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn id_attr() -> Attribute {
        "id".into()
    }

    fn row(id: i64, name: &str) -> Row {
        Row::from_pairs([("id", Value::from(id)), ("name", Value::from(name))])
    }

    #[test]
    fn add_then_remove_cancels() {
        let mut set = RowChangeSet::new();
        set.add(row(1, "a"));
        set.remove(row(1, "a"));
        assert!(set.is_empty());
    }

    #[test]
    fn remove_then_add_cancels() {
        let mut set = RowChangeSet::new();
        set.remove(row(1, "a"));
        set.add(row(1, "a"));
        assert!(set.is_empty());
    }

    #[test]
    fn distinct_rows_do_not_cancel() {
        let mut set = RowChangeSet::new();
        set.remove(row(1, "a"));
        set.add(row(1, "b"));
        assert_eq!(set.added().count(), 1);
        assert_eq!(set.removed().count(), 1);
    }

    #[test]
    fn partition_pure_adds_and_deletes() {
        let mut set = RowChangeSet::new();
        set.add(row(1, "a"));
        set.add(row(2, "b"));
        set.remove(row(3, "c"));

        let parts = ChangeParts::partition(&set, &id_attr());
        assert_eq!(parts.added_rows.len(), 2);
        assert!(parts.updated_rows.is_empty());
        assert_eq!(parts.deleted_ids, vec![Value::Integer(3)]);
    }

    #[test]
    fn partition_same_id_both_sides_is_update() {
        let mut set = RowChangeSet::new();
        set.remove(row(1, "old"));
        set.add(row(1, "new"));

        let parts = ChangeParts::partition(&set, &id_attr());
        assert!(parts.added_rows.is_empty());
        assert!(parts.deleted_ids.is_empty());
        assert_eq!(parts.updated_rows, vec![row(1, "new")]);
    }

    #[test]
    fn partition_mixed_transaction() {
        let mut set = RowChangeSet::new();
        // Row 1 updated, row 2 deleted, row 3 added.
        set.remove(row(1, "old"));
        set.add(row(1, "new"));
        set.remove(row(2, "gone"));
        set.add(row(3, "fresh"));

        let parts = ChangeParts::partition(&set, &id_attr());
        assert_eq!(parts.added_rows, vec![row(3, "fresh")]);
        assert_eq!(parts.updated_rows, vec![row(1, "new")]);
        assert_eq!(parts.deleted_ids, vec![Value::Integer(2)]);
        assert!(!parts.is_empty());
    }

    #[test]
    fn empty_set_partitions_empty() {
        let parts = ChangeParts::partition(&RowChangeSet::new(), &id_attr());
        assert!(parts.is_empty());
    }
}
