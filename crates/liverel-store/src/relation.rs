#![forbid(unsafe_code)]

//! The in-memory observable store and its relation handles.
//!
//! A [`Store`] owns a set of named relations, each a persistent ordered row
//! set with a fixed [`Scheme`]. All mutation goes through the store's
//! [`Pump`]: `async_add`/`async_delete`/`async_update` enqueue and return,
//! and the actual write happens when the pump runs. Row validation happens
//! at application time; failures surface through the observer channel, not
//! as a panic or a return value.
//!
//! # Observation protocol
//!
//! An observer attached with [`Relation::add_observer`] receives
//! `relation_will_change` synchronously when the first mutation targeting
//! the relation is registered in a cycle, and `relation_did_change` with
//! the cycle's coalesced [`RowChangeSet`] (or the first error) when the
//! pump flushes. Every will-change is balanced by exactly one did-change.
//!
//! Snapshot application ([`Store::async_apply`],
//! [`Store::async_restore`]) routes through the same pending-change
//! machinery, so views update identically whether a change came from a
//! user mutation, an undo, or a restore.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use im::{OrdMap, OrdSet};
use tracing::debug;

use crate::change::RowChangeSet;
use crate::error::StoreError;
use crate::pump::{FlushOutcome, Pump};
use crate::row::{Attribute, Row, Scheme};
use crate::snapshot::{StoreDelta, StoreSnapshot};
use crate::value::Value;

/// Row predicate for deletes and updates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Select {
    /// Every row.
    All,
    /// Rows whose `attribute` equals `value`.
    Eq(Attribute, Value),
}

impl Select {
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Select::All => true,
            Select::Eq(attr, value) => row.get(attr) == Some(value),
        }
    }
}

/// Coalesced observer of one relation.
///
/// Implementors are registered as shared handles; callbacks take `&self`
/// and interior-mutate their own state.
pub trait RelationObserver {
    /// An asynchronous change affecting the relation has been registered.
    fn relation_will_change(&self);
    /// The coalesced net change for one pump cycle, or the first error
    /// encountered while applying the cycle's mutations.
    fn relation_did_change(&self, result: Result<RowChangeSet, StoreError>);
}

/// RAII registration guard. Dropping it detaches the observer; the store
/// prunes the dead entry on the next notification.
pub struct ObserverGuard {
    _observer: Rc<dyn RelationObserver>,
}

impl std::fmt::Debug for ObserverGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverGuard").finish_non_exhaustive()
    }
}

#[derive(Default)]
struct PendingChange {
    set: RowChangeSet,
    error: Option<StoreError>,
}

struct RelationState {
    scheme: Scheme,
    rows: OrdSet<Row>,
    observers: Vec<Weak<dyn RelationObserver>>,
}

struct StoreInner {
    relations: BTreeMap<String, RelationState>,
    /// Per-relation net change for the current pump cycle. An entry exists
    /// from the first registered mutation until the cycle-boundary flush.
    pending: BTreeMap<String, PendingChange>,
}

impl StoreInner {
    fn live_observers(&mut self, relation: &str) -> Vec<Rc<dyn RelationObserver>> {
        let Some(state) = self.relations.get_mut(relation) else {
            return Vec::new();
        };
        state.observers.retain(|w| w.strong_count() > 0);
        state.observers.iter().filter_map(Weak::upgrade).collect()
    }
}

/// An in-memory observable relational store bound to a [`Pump`].
///
/// Cloning a `Store` yields another handle to the same state.
pub struct Store {
    inner: Rc<RefCell<StoreInner>>,
    pump: Pump,
    /// Keeps the pump's weak flusher registration alive.
    _flusher: Rc<dyn Fn() -> FlushOutcome>,
}

impl Clone for Store {
    fn clone(&self) -> Self {
        Store {
            inner: Rc::clone(&self.inner),
            pump: self.pump.clone(),
            _flusher: Rc::clone(&self._flusher),
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Store")
            .field("relations", &inner.relations.len())
            .field("pending", &inner.pending.len())
            .finish()
    }
}

impl Store {
    #[must_use]
    pub fn new(pump: Pump) -> Self {
        let inner = Rc::new(RefCell::new(StoreInner {
            relations: BTreeMap::new(),
            pending: BTreeMap::new(),
        }));

        let flush_target = Rc::downgrade(&inner);
        let flusher: Rc<dyn Fn() -> FlushOutcome> = Rc::new(move || {
            flush_target
                .upgrade()
                .map_or_else(FlushOutcome::default, |inner| flush_pending(&inner))
        });
        pump.add_flusher(&flusher);

        Store {
            inner,
            pump,
            _flusher: flusher,
        }
    }

    #[must_use]
    pub fn pump(&self) -> &Pump {
        &self.pump
    }

    /// Create a named relation. Duplicate names and empty schemes are errors.
    pub fn create_relation(
        &self,
        name: &str,
        scheme: Scheme,
    ) -> Result<Relation, StoreError> {
        if scheme.is_empty() {
            return Err(StoreError::SchemeMismatch {
                relation: name.to_string(),
            });
        }
        let mut inner = self.inner.borrow_mut();
        if inner.relations.contains_key(name) {
            return Err(StoreError::DuplicateRelation(name.to_string()));
        }
        inner.relations.insert(
            name.to_string(),
            RelationState {
                scheme,
                rows: OrdSet::new(),
                observers: Vec::new(),
            },
        );
        drop(inner);
        self.relation(name)
    }

    /// Look up an existing relation by name.
    pub fn relation(&self, name: &str) -> Result<Relation, StoreError> {
        let inner = self.inner.borrow();
        if !inner.relations.contains_key(name) {
            return Err(StoreError::UnknownRelation(name.to_string()));
        }
        Ok(Relation {
            store: Rc::clone(&self.inner),
            pump: self.pump.clone(),
            name: name.to_string(),
        })
    }

    /// Capture the entire store. O(1)-ish thanks to structural sharing.
    #[must_use]
    pub fn take_snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.borrow();
        let mut relations = OrdMap::new();
        for (name, state) in &inner.relations {
            relations.insert(name.clone(), state.rows.clone());
        }
        StoreSnapshot::new(relations)
    }

    /// Diff two snapshots of this store.
    #[must_use]
    pub fn compute_delta(&self, before: &StoreSnapshot, after: &StoreSnapshot) -> StoreDelta {
        before.delta_to(after)
    }

    /// Enqueue application of a delta. Observers are notified exactly as
    /// for user mutations.
    pub fn async_apply(&self, delta: StoreDelta) {
        let names: Vec<String> = delta.iter().map(|(name, _)| name.to_string()).collect();
        for name in &names {
            begin_pending(&self.inner, name);
        }
        let inner = Rc::clone(&self.inner);
        self.pump.register_mutation(move || {
            let mut store = inner.borrow_mut();
            for (name, rd) in delta.iter() {
                apply_relation_rows(&mut store, name, &rd.removed, &rd.added);
            }
        });
    }

    /// Enqueue a restore to `snapshot`. The delta is computed against the
    /// store's state at application time, so intervening mutations are
    /// rolled into the same notification.
    pub fn async_restore(&self, snapshot: StoreSnapshot) {
        let names: Vec<String> = {
            let inner = self.inner.borrow();
            inner.relations.keys().cloned().collect()
        };
        for name in &names {
            begin_pending(&self.inner, name);
        }
        let inner = Rc::clone(&self.inner);
        self.pump.register_mutation(move || {
            let current = {
                let store = inner.borrow();
                let mut relations = OrdMap::new();
                for (name, state) in &store.relations {
                    relations.insert(name.clone(), state.rows.clone());
                }
                StoreSnapshot::new(relations)
            };
            let delta = current.delta_to(&snapshot);
            let mut store = inner.borrow_mut();
            for (name, rd) in delta.iter() {
                apply_relation_rows(&mut store, name, &rd.removed, &rd.added);
            }
        });
    }
}

/// A cheap handle to one named relation.
pub struct Relation {
    store: Rc<RefCell<StoreInner>>,
    pump: Pump,
    name: String,
}

impl Clone for Relation {
    fn clone(&self) -> Self {
        Relation {
            store: Rc::clone(&self.store),
            pump: self.pump.clone(),
            name: self.name.clone(),
        }
    }
}

impl std::fmt::Debug for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relation").field("name", &self.name).finish()
    }
}

impl Relation {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn scheme(&self) -> Scheme {
        self.store
            .borrow()
            .relations
            .get(&self.name)
            .map(|s| s.scheme.clone())
            .unwrap_or_default()
    }

    /// Synchronous read of the current contents, in row order.
    #[must_use]
    pub fn rows(&self) -> Vec<Row> {
        self.store
            .borrow()
            .relations
            .get(&self.name)
            .map(|s| s.rows.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Attach a coalesced observer. The returned guard keeps the
    /// registration alive; dropping it detaches.
    #[must_use]
    pub fn add_observer(&self, observer: Rc<dyn RelationObserver>) -> ObserverGuard {
        if let Some(state) = self.store.borrow_mut().relations.get_mut(&self.name) {
            state.observers.push(Rc::downgrade(&observer));
        }
        ObserverGuard {
            _observer: observer,
        }
    }

    /// Enqueue an asynchronous full-table query. The completion callback
    /// runs on the pump with the relation's rows at query time.
    pub fn async_all_rows(&self, completion: impl FnOnce(Result<Vec<Row>, StoreError>) + 'static) {
        let store = Rc::clone(&self.store);
        let name = self.name.clone();
        self.pump.register_query(move || {
            let rows = {
                let inner = store.borrow();
                match inner.relations.get(&name) {
                    Some(state) => Ok(state.rows.iter().cloned().collect()),
                    None => Err(StoreError::UnknownRelation(name.clone())),
                }
            };
            completion(rows);
        });
    }

    /// Enqueue adding a row. The row is validated against the scheme at
    /// application time; adding an already present row is a no-op.
    pub fn async_add(&self, row: Row) {
        begin_pending(&self.store, &self.name);
        let store = Rc::clone(&self.store);
        let name = self.name.clone();
        self.pump.register_mutation(move || {
            let mut inner = store.borrow_mut();
            let Some(state) = inner.relations.get_mut(&name) else {
                record_error(&mut inner, &name, StoreError::UnknownRelation(name.clone()));
                return;
            };
            if !state.scheme.matches_row(&row) {
                let err = StoreError::SchemeMismatch {
                    relation: name.clone(),
                };
                record_error(&mut inner, &name, err);
                return;
            }
            if state.rows.contains(&row) {
                return;
            }
            state.rows.insert(row.clone());
            debug!(relation = %name, row = ?row, "row added");
            pending_for(&mut inner, &name).set.add(row);
        });
    }

    /// Enqueue deleting every row matched by `select`.
    pub fn async_delete(&self, select: Select) {
        begin_pending(&self.store, &self.name);
        let store = Rc::clone(&self.store);
        let name = self.name.clone();
        self.pump.register_mutation(move || {
            let mut inner = store.borrow_mut();
            let matched: Vec<Row> = match inner.relations.get(&name) {
                Some(state) => state.rows.iter().filter(|r| select.matches(r)).cloned().collect(),
                None => {
                    record_error(&mut inner, &name, StoreError::UnknownRelation(name.clone()));
                    return;
                }
            };
            for row in matched {
                if let Some(state) = inner.relations.get_mut(&name) {
                    state.rows.remove(&row);
                }
                debug!(relation = %name, row = ?row, "row deleted");
                pending_for(&mut inner, &name).set.remove(row);
            }
        });
    }

    /// Enqueue merging `values` into every row matched by `select`. A row
    /// whose post-merge contents equal another existing row coalesces with
    /// it (set semantics).
    pub fn async_update(&self, select: Select, values: Row) {
        begin_pending(&self.store, &self.name);
        let store = Rc::clone(&self.store);
        let name = self.name.clone();
        self.pump.register_mutation(move || {
            let mut inner = store.borrow_mut();
            let scheme = match inner.relations.get(&name) {
                Some(state) => state.scheme.clone(),
                None => {
                    record_error(&mut inner, &name, StoreError::UnknownRelation(name.clone()));
                    return;
                }
            };
            if let Some(stray) = values.attributes().find(|a| !scheme.contains(a)) {
                let err = StoreError::MissingAttribute {
                    relation: name.clone(),
                    attribute: stray.clone(),
                };
                record_error(&mut inner, &name, err);
                return;
            }
            let matched: Vec<Row> = inner
                .relations
                .get(&name)
                .map(|s| s.rows.iter().filter(|r| select.matches(r)).cloned().collect())
                .unwrap_or_default();
            let mut changed = 0usize;
            for old in matched {
                let new = old.merged(&values);
                if new == old {
                    continue;
                }
                let mut collapsed = false;
                if let Some(state) = inner.relations.get_mut(&name) {
                    state.rows.remove(&old);
                    collapsed = state.rows.contains(&new);
                    if !collapsed {
                        state.rows.insert(new.clone());
                    }
                }
                pending_for(&mut inner, &name).set.remove(old);
                if !collapsed {
                    pending_for(&mut inner, &name).set.add(new);
                }
                changed += 1;
            }
            if changed > 0 {
                debug!(relation = %name, rows = changed, "rows updated");
            }
        });
    }
}

/// Open (or reuse) the relation's pending entry for this cycle, sending
/// will-change to its observers when the entry is new.
fn begin_pending(store: &Rc<RefCell<StoreInner>>, relation: &str) {
    let observers = {
        let mut inner = store.borrow_mut();
        if inner.pending.contains_key(relation) {
            None
        } else {
            inner
                .pending
                .insert(relation.to_string(), PendingChange::default());
            Some(inner.live_observers(relation))
        }
    };
    if let Some(observers) = observers {
        for obs in observers {
            obs.relation_will_change();
        }
    }
}

fn pending_for<'a>(inner: &'a mut StoreInner, relation: &str) -> &'a mut PendingChange {
    inner
        .pending
        .entry(relation.to_string())
        .or_default()
}

fn record_error(inner: &mut StoreInner, relation: &str, err: StoreError) {
    debug!(relation = %relation, error = %err, "mutation failed");
    let pending = pending_for(inner, relation);
    if pending.error.is_none() {
        pending.error = Some(err);
    }
}

fn apply_relation_rows(inner: &mut StoreInner, relation: &str, removed: &[Row], added: &[Row]) {
    debug_assert!(
        inner.relations.contains_key(relation),
        "delta references relation {relation:?} unknown to this store"
    );
    for row in removed {
        let Some(state) = inner.relations.get_mut(relation) else {
            return;
        };
        if state.rows.remove(row).is_some() {
            pending_for(inner, relation).set.remove(row.clone());
        }
    }
    for row in added {
        let Some(state) = inner.relations.get_mut(relation) else {
            return;
        };
        if !state.rows.contains(row) {
            state.rows.insert(row.clone());
            pending_for(inner, relation).set.add(row.clone());
        }
    }
}

/// Deliver every pending change set to its relation's observers. Called by
/// the pump at each cycle boundary.
fn flush_pending(store: &Rc<RefCell<StoreInner>>) -> FlushOutcome {
    let deliveries: Vec<(Vec<Rc<dyn RelationObserver>>, Result<RowChangeSet, StoreError>)> = {
        let mut inner = store.borrow_mut();
        let pending = std::mem::take(&mut inner.pending);
        pending
            .into_iter()
            .map(|(name, change)| {
                let observers = inner.live_observers(&name);
                let result = match change.error {
                    Some(err) => Err(err),
                    None => Ok(change.set),
                };
                (observers, result)
            })
            .collect()
    };

    let relations_changed = deliveries.len();
    for (observers, result) in deliveries {
        for obs in observers {
            obs.relation_did_change(result.clone());
        }
    }
    FlushOutcome { relations_changed }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
