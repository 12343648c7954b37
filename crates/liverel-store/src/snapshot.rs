#![forbid(unsafe_code)]

//! Whole-store snapshots and deltas.
//!
//! A [`StoreSnapshot`] captures every relation's row set at a point in time.
//! Relations are kept as persistent ordered sets (`im::OrdSet`), so a
//! snapshot is a handful of pointer copies regardless of store size, and a
//! retained snapshot shares structure with the live store. Two snapshots
//! diff into a [`StoreDelta`]; a delta's [`reversed`](StoreDelta::reversed)
//! form is its exact inverse, which is all the undo coordinator needs.

use im::{OrdMap, OrdSet};

use crate::row::Row;

/// An immutable capture of the entire store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreSnapshot {
    relations: OrdMap<String, OrdSet<Row>>,
}

impl StoreSnapshot {
    pub(crate) fn new(relations: OrdMap<String, OrdSet<Row>>) -> Self {
        StoreSnapshot { relations }
    }

    pub(crate) fn rows(&self, relation: &str) -> Option<&OrdSet<Row>> {
        self.relations.get(relation)
    }

    pub fn relation_names(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }

    /// Diff this snapshot against a later one.
    #[must_use]
    pub fn delta_to(&self, after: &StoreSnapshot) -> StoreDelta {
        let mut relations = Vec::new();

        let empty = OrdSet::new();
        let names: std::collections::BTreeSet<&String> = self
            .relations
            .keys()
            .chain(after.relations.keys())
            .collect();

        for name in names {
            let before_rows = self.relations.get(name).unwrap_or(&empty);
            let after_rows = after.relations.get(name).unwrap_or(&empty);

            let added: Vec<Row> = after_rows
                .iter()
                .filter(|r| !before_rows.contains(*r))
                .cloned()
                .collect();
            let removed: Vec<Row> = before_rows
                .iter()
                .filter(|r| !after_rows.contains(*r))
                .cloned()
                .collect();

            if !added.is_empty() || !removed.is_empty() {
                relations.push((name.clone(), RelationDelta { added, removed }));
            }
        }

        StoreDelta { relations }
    }
}

/// Net row changes for one relation between two snapshots.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelationDelta {
    pub added: Vec<Row>,
    pub removed: Vec<Row>,
}

impl RelationDelta {
    #[must_use]
    pub fn reversed(&self) -> RelationDelta {
        RelationDelta {
            added: self.removed.clone(),
            removed: self.added.clone(),
        }
    }
}

/// Forward changes between two snapshots, per relation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreDelta {
    relations: Vec<(String, RelationDelta)>,
}

impl StoreDelta {
    /// The inverse delta: applying it undoes this one.
    #[must_use]
    pub fn reversed(&self) -> StoreDelta {
        StoreDelta {
            relations: self
                .relations
                .iter()
                .map(|(name, delta)| (name.clone(), delta.reversed()))
                .collect(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RelationDelta)> {
        self.relations
            .iter()
            .map(|(name, delta)| (name.as_str(), delta))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
