#![forbid(unsafe_code)]

//! The live sorted array projection.
//!
//! [`RowArray`] subscribes to an observable relation and maintains a local
//! array of [`RowElement`]s, sorted by a designated order attribute and
//! keyed by a designated id attribute. Every coalesced relational change is
//! translated into the minimal ordered [`ArrayChange`] sequence a list
//! consumer needs: no full reloads, no spurious delete/insert pairs for a
//! row that merely moved.
//!
//! # Lifecycle
//!
//! Construction validates the relation's scheme eagerly and does no other
//! work. The first observer starts the view: it attaches a relation
//! observer, opens an async window, and issues the initial full-table
//! query; the sorted result is delivered as one `Initial` change. Dropping
//! the last [`ArraySubscription`] stops the view and discards its state
//! (explicit [`start`](RowArray::start)/[`stop`](RowArray::stop) are also
//! available). Observers attaching after the load completes receive a
//! synchronous `Initial`; observers attaching mid-load receive one
//! `BeginAsync` per open window so their begin/end events stay balanced.
//!
//! # Change application order
//!
//! Within one transaction, changes apply **deletes → inserts → updates**.
//! Deletes report the index at removal time; inserts are all performed
//! first and then reported in ascending final-index order; an update whose
//! order key changed becomes a single `Move` (or an `Update`, when the
//! sorted position happens not to change).
//!
//! # Invariants
//!
//! 1. `elements` is always strictly ordered by the configured comparator
//!    over order keys.
//! 2. No two elements share an id.
//! 3. Indices in an emitted batch are valid against the array state after
//!    all prior changes in the same batch.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use liverel_store::{
    Attribute, ChangeParts, ObserverGuard, Relation, RelationObserver, Row, RowChangeSet,
    StoreError, Value,
};
use tracing::debug;

use crate::change::{ArrayChange, ArrayEvent};
use crate::order::{order_between, respaced};

/// Errors from view construction and the order-key helpers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewError {
    /// The relation's scheme lacks the designated id attribute.
    MissingIdAttribute(Attribute),
    /// The relation's scheme lacks the designated order attribute.
    MissingOrderAttribute(Attribute),
    /// An order-key computation needed a `Real` neighbor key and found
    /// something else on the element with this id.
    NonNumericOrderKey { id: Value },
}

impl fmt::Display for ViewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewError::MissingIdAttribute(attr) => {
                write!(f, "relation scheme has no id attribute {attr}")
            }
            ViewError::MissingOrderAttribute(attr) => {
                write!(f, "relation scheme has no order attribute {attr}")
            }
            ViewError::NonNumericOrderKey { id } => {
                write!(f, "order key of element {id} is not a real number")
            }
        }
    }
}

impl std::error::Error for ViewError {}

/// One projected row: its extracted id plus the full record. The record is
/// merged in place as updates arrive.
#[derive(Clone, Debug, PartialEq)]
pub struct RowElement {
    pub id: Value,
    pub row: Row,
}

impl RowElement {
    fn from_row(row: Row, id_attr: &Attribute) -> Self {
        let id = row.get(id_attr).cloned().unwrap_or(Value::Null);
        RowElement { id, row }
    }
}

type EventCallback = Rc<dyn Fn(&ArrayEvent)>;

struct ViewInner {
    relation: Relation,
    id_attr: Attribute,
    order_attr: Attribute,
    descending: bool,
    tag: Option<Rc<dyn Any>>,
    elements: Vec<RowElement>,
    subscribers: Vec<Weak<dyn Fn(&ArrayEvent)>>,
    /// Open async-change windows. Every open is balanced by a close.
    windows: usize,
    started: bool,
    loaded: bool,
    guard: Option<ObserverGuard>,
    /// Bumped on stop; a queued initial-query completion from an earlier
    /// activation sees a stale value and discards its result.
    generation: u64,
}

impl ViewInner {
    fn order_before(&self, a: &Value, b: &Value) -> bool {
        if self.descending { a > b } else { a < b }
    }

    fn key_of(row: &Row, order_attr: &Attribute) -> Value {
        row.get(order_attr).cloned().unwrap_or(Value::Null)
    }

    fn insertion_index(&self, key: &Value) -> usize {
        let order_attr = self.order_attr.clone();
        self.elements.partition_point(|e| {
            let existing = Self::key_of(&e.row, &order_attr);
            // Equal keys insert after existing ones (stable).
            !self.order_before(key, &existing)
        })
    }

    fn index_for_id(&self, id: &Value) -> Option<usize> {
        self.elements.iter().position(|e| &e.id == id)
    }

    fn on_delete(&mut self, ids: &[Value], changes: &mut Vec<ArrayChange>) {
        for id in ids {
            if let Some(index) = self.index_for_id(id) {
                self.elements.remove(index);
                // Index at removal time: valid against the array as the
                // consumer sees it after the prior deletes in this batch.
                changes.push(ArrayChange::Delete(index));
            }
        }
    }

    fn on_insert(&mut self, rows: &[Row], changes: &mut Vec<ArrayChange>) {
        let mut inserted_ids = Vec::new();
        for row in rows {
            let element = RowElement::from_row(row.clone(), &self.id_attr);
            if self.index_for_id(&element.id).is_some() {
                // Already present: this change predates the initial load
                // and is reflected in the loaded elements.
                continue;
            }
            let key = Self::key_of(&element.row, &self.order_attr);
            let index = self.insertion_index(&key);
            self.elements.insert(index, element);
            inserted_ids.push(row.get(&self.id_attr).cloned().unwrap_or(Value::Null));
        }

        // Report final indices in ascending order so multi-row inserts are
        // deterministic regardless of arrival order.
        let mut indexes: Vec<usize> = inserted_ids
            .iter()
            .filter_map(|id| self.index_for_id(id))
            .collect();
        indexes.sort_unstable();
        for index in indexes {
            changes.push(ArrayChange::Insert(index));
        }
    }

    fn on_update(&mut self, rows: &[Row], changes: &mut Vec<ArrayChange>) {
        for row in rows {
            let Some(id) = row.get(&self.id_attr) else {
                continue;
            };
            let Some(src) = self.index_for_id(id) else {
                continue;
            };

            let old_order = self.elements[src].row.get(&self.order_attr).cloned();
            let new_order = row.get(&self.order_attr).cloned();
            self.elements[src].row.merge(row);

            let order_changed = match (&old_order, &new_order) {
                (_, None) => false,
                (Some(old), Some(new)) => old != new,
                (None, Some(_)) => true,
            };

            if order_changed {
                let element = self.elements.remove(src);
                let key = Self::key_of(&element.row, &self.order_attr);
                let dst = self.insertion_index(&key);
                self.elements.insert(dst, element);
                if dst != src {
                    changes.push(ArrayChange::Move { src, dst });
                } else {
                    // The key changed but the sorted position did not.
                    changes.push(ArrayChange::Update(dst));
                }
            } else {
                changes.push(ArrayChange::Update(src));
            }
        }
    }
}

/// A live, sorted, diffable array over one relation.
///
/// Cloning is shallow: clones share the same projection state and
/// subscriber list.
#[derive(Clone)]
pub struct RowArray {
    inner: Rc<RefCell<ViewInner>>,
}

impl fmt::Debug for RowArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("RowArray")
            .field("relation", &inner.relation.name())
            .field("elements", &inner.elements.len())
            .field("started", &inner.started)
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

impl RowArray {
    /// Create a view over `relation`, keyed by `id_attr` and sorted by
    /// `order_attr`. Both attributes must be in the relation's scheme; the
    /// view does no further work until started.
    pub fn new(
        relation: Relation,
        id_attr: impl Into<Attribute>,
        order_attr: impl Into<Attribute>,
        descending: bool,
        tag: Option<Rc<dyn Any>>,
    ) -> Result<RowArray, ViewError> {
        let id_attr = id_attr.into();
        let order_attr = order_attr.into();
        let scheme = relation.scheme();
        if !scheme.contains(&id_attr) {
            return Err(ViewError::MissingIdAttribute(id_attr));
        }
        if !scheme.contains(&order_attr) {
            return Err(ViewError::MissingOrderAttribute(order_attr));
        }
        Ok(RowArray {
            inner: Rc::new(RefCell::new(ViewInner {
                relation,
                id_attr,
                order_attr,
                descending,
                tag,
                elements: Vec::new(),
                subscribers: Vec::new(),
                windows: 0,
                started: false,
                loaded: false,
                guard: None,
                generation: 0,
            })),
        })
    }

    /// Attach an observer. Starts the view if this is the first one;
    /// otherwise replays the current state (`Initial` once loaded, or one
    /// `BeginAsync` per open window mid-load) to just this observer.
    /// Dropping the returned subscription detaches it; dropping the last
    /// one stops the view.
    #[must_use]
    pub fn observe(&self, on_event: impl Fn(&ArrayEvent) + 'static) -> ArraySubscription {
        let callback: EventCallback = Rc::new(on_event);
        let needs_start;
        let replay: Vec<ArrayEvent> = {
            let mut inner = self.inner.borrow_mut();
            inner.subscribers.push(Rc::downgrade(&callback));
            needs_start = !inner.started;
            if needs_start {
                Vec::new()
            } else {
                let mut events = Vec::new();
                if inner.loaded {
                    events.push(ArrayEvent::Changes(vec![ArrayChange::Initial(
                        inner.elements.clone(),
                    )]));
                }
                for _ in 0..inner.windows {
                    events.push(ArrayEvent::BeginAsync);
                }
                events
            }
        };

        if needs_start {
            activate(&self.inner);
        } else {
            for event in &replay {
                callback(event);
            }
        }

        ArraySubscription {
            callback: Some(callback),
            view: Rc::downgrade(&self.inner),
        }
    }

    /// Start explicitly (idempotent). Normally driven by the first
    /// observer.
    pub fn start(&self) {
        activate(&self.inner);
    }

    /// Stop explicitly: detach from the relation and discard all state.
    pub fn stop(&self) {
        deactivate(&self.inner);
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.inner.borrow().started
    }

    /// Current elements, valid synchronously between notifications.
    #[must_use]
    pub fn elements(&self) -> Vec<RowElement> {
        self.inner.borrow().elements.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().elements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().elements.is_empty()
    }

    #[must_use]
    pub fn index_for_id(&self, id: &Value) -> Option<usize> {
        self.inner.borrow().index_for_id(id)
    }

    #[must_use]
    pub fn element_for_id(&self, id: &Value) -> Option<RowElement> {
        let inner = self.inner.borrow();
        inner.index_for_id(id).map(|i| inner.elements[i].clone())
    }

    /// The opaque consumer tag passed at construction.
    #[must_use]
    pub fn tag(&self) -> Option<Rc<dyn Any>> {
        self.inner.borrow().tag.clone()
    }

    /// An order key placing a new element between the elements with ids
    /// `prev_id` and `next_id`. With both absent the key appends after the
    /// last element. Neighbor keys must be `Real`.
    pub fn order_for_insertion_between(
        &self,
        prev_id: Option<&Value>,
        next_id: Option<&Value>,
    ) -> Result<f64, ViewError> {
        let inner = self.inner.borrow();
        let prev = prev_id.and_then(|id| inner.index_for_id(id));
        let next = next_id.and_then(|id| inner.index_for_id(id));
        let prev = match (prev, next) {
            // Neither neighbor given: append after the last element.
            (None, None) => inner.elements.len().checked_sub(1),
            (p, _) => p,
        };
        let lo = prev
            .and_then(|i| inner.elements.get(i))
            .map(|e| real_key(e, &inner.order_attr))
            .transpose()?;
        let hi = next
            .and_then(|i| inner.elements.get(i))
            .map(|e| real_key(e, &inner.order_attr))
            .transpose()?;
        Ok(order_between(lo, hi, inner.descending))
    }

    /// An order key that moves the element at `src` to position `dst`,
    /// where `dst` is relative to the array with the moving element
    /// already removed. Neighbor keys must be `Real`.
    ///
    /// # Panics
    ///
    /// Panics if `src` is out of bounds.
    pub fn order_for_move(&self, src: usize, dst: usize) -> Result<f64, ViewError> {
        let inner = self.inner.borrow();
        assert!(src < inner.elements.len(), "move source out of bounds");

        // Map a post-removal index back into the current array, which
        // still contains the moving element.
        let live_index = |j: usize| if j >= src { j + 1 } else { j };

        let lo = if dst == 0 {
            None
        } else {
            inner.elements.get(live_index(dst - 1))
        };
        let hi = inner.elements.get(live_index(dst));

        let lo = lo.map(|e| real_key(e, &inner.order_attr)).transpose()?;
        let hi = hi.map(|e| real_key(e, &inner.order_attr)).transpose()?;
        Ok(order_between(lo, hi, inner.descending))
    }

    /// Evenly respaced `(id, order key)` pairs for every element, in the
    /// current order. The caller writes these back (in one undoable
    /// mutation) when repeated fractional moves have squeezed the key
    /// domain; the view never renumbers on its own.
    #[must_use]
    pub fn rebalanced_order_keys(&self) -> Vec<(Value, f64)> {
        let inner = self.inner.borrow();
        let keys = respaced(inner.elements.len(), inner.descending);
        inner
            .elements
            .iter()
            .zip(keys)
            .map(|(e, key)| (e.id.clone(), key))
            .collect()
    }

    #[cfg(test)]
    fn live_subscriber_count(&self) -> usize {
        self.inner
            .borrow()
            .subscribers
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

fn real_key(element: &RowElement, order_attr: &Attribute) -> Result<f64, ViewError> {
    element
        .row
        .get(order_attr)
        .and_then(Value::as_real)
        .ok_or_else(|| ViewError::NonNumericOrderKey {
            id: element.id.clone(),
        })
}

/// RAII observer registration. Dropping the last live subscription stops
/// the view.
pub struct ArraySubscription {
    callback: Option<EventCallback>,
    view: Weak<RefCell<ViewInner>>,
}

impl fmt::Debug for ArraySubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArraySubscription").finish_non_exhaustive()
    }
}

impl Drop for ArraySubscription {
    fn drop(&mut self) {
        // Release our callback first so the prune below sees it dead.
        self.callback = None;
        let Some(view) = self.view.upgrade() else {
            return;
        };
        let last_one_out = {
            let mut inner = view.borrow_mut();
            inner.subscribers.retain(|w| w.strong_count() > 0);
            inner.started && inner.subscribers.is_empty()
        };
        if last_one_out {
            deactivate(&view);
        }
    }
}

// ---------------------------------------------------------------------------
// Activation and change handling
// ---------------------------------------------------------------------------

struct RelationWatcher {
    view: Weak<RefCell<ViewInner>>,
}

impl RelationObserver for RelationWatcher {
    fn relation_will_change(&self) {
        if let Some(view) = self.view.upgrade() {
            open_window(&view);
        }
    }

    fn relation_did_change(&self, result: Result<RowChangeSet, StoreError>) {
        if let Some(view) = self.view.upgrade() {
            handle_did_change(&view, result);
        }
    }
}

fn emit(view: &Rc<RefCell<ViewInner>>, event: &ArrayEvent) {
    let callbacks: Vec<EventCallback> = {
        let mut inner = view.borrow_mut();
        inner.subscribers.retain(|w| w.strong_count() > 0);
        inner.subscribers.iter().filter_map(Weak::upgrade).collect()
    };
    for cb in callbacks {
        cb(event);
    }
}

fn open_window(view: &Rc<RefCell<ViewInner>>) {
    view.borrow_mut().windows += 1;
    emit(view, &ArrayEvent::BeginAsync);
}

fn close_window(view: &Rc<RefCell<ViewInner>>) {
    let opened = {
        let mut inner = view.borrow_mut();
        if inner.windows > 0 {
            inner.windows -= 1;
            true
        } else {
            false
        }
    };
    if opened {
        emit(view, &ArrayEvent::EndAsync);
    }
}

fn activate(view: &Rc<RefCell<ViewInner>>) {
    {
        let mut inner = view.borrow_mut();
        if inner.started {
            return;
        }
        inner.started = true;
        let watcher: Rc<dyn RelationObserver> = Rc::new(RelationWatcher {
            view: Rc::downgrade(view),
        });
        inner.guard = Some(inner.relation.add_observer(watcher));
    }

    open_window(view);

    let (relation, id_attr, order_attr, descending, generation) = {
        let inner = view.borrow();
        (
            inner.relation.clone(),
            inner.id_attr.clone(),
            inner.order_attr.clone(),
            inner.descending,
            inner.generation,
        )
    };
    let weak = Rc::downgrade(view);
    relation.async_all_rows(move |result| {
        let Some(view) = weak.upgrade() else { return };
        if view.borrow().generation != generation {
            // Stopped (and possibly restarted) while the query was queued;
            // this result belongs to the old activation.
            return;
        }
        match result {
            Ok(mut rows) => {
                rows.sort_by(|a, b| {
                    let ka = ViewInner::key_of(a, &order_attr);
                    let kb = ViewInner::key_of(b, &order_attr);
                    if descending { kb.cmp(&ka) } else { ka.cmp(&kb) }
                });
                let elements: Vec<RowElement> = rows
                    .into_iter()
                    .map(|row| RowElement::from_row(row, &id_attr))
                    .collect();
                {
                    let mut inner = view.borrow_mut();
                    inner.elements = elements.clone();
                    inner.loaded = true;
                    debug!(rows = inner.elements.len(), "array view loaded");
                }
                emit(
                    &view,
                    &ArrayEvent::Changes(vec![ArrayChange::Initial(elements)]),
                );
            }
            Err(err) => {
                emit(&view, &ArrayEvent::Failed(err));
            }
        }
        close_window(&view);
    });
}

fn deactivate(view: &Rc<RefCell<ViewInner>>) {
    let mut inner = view.borrow_mut();
    inner.guard = None;
    inner.started = false;
    inner.loaded = false;
    inner.windows = 0;
    inner.elements.clear();
    inner.generation += 1;
}

fn handle_did_change(
    view: &Rc<RefCell<ViewInner>>,
    result: Result<RowChangeSet, StoreError>,
) {
    match result {
        Ok(set) => {
            let changes = {
                let mut inner = view.borrow_mut();
                if !inner.loaded {
                    // The initial query ran after this transaction's
                    // mutations, so its result already includes them.
                    Vec::new()
                } else {
                    let id_attr = inner.id_attr.clone();
                    let parts = ChangeParts::partition(&set, &id_attr);
                    let mut changes = Vec::new();
                    if !parts.is_empty() {
                        inner.on_delete(&parts.deleted_ids, &mut changes);
                        inner.on_insert(&parts.added_rows, &mut changes);
                        inner.on_update(&parts.updated_rows, &mut changes);
                        debug!(
                            deleted = parts.deleted_ids.len(),
                            added = parts.added_rows.len(),
                            updated = parts.updated_rows.len(),
                            changes = changes.len(),
                            "array change batch"
                        );
                    }
                    changes
                }
            };
            if !changes.is_empty() {
                emit(view, &ArrayEvent::Changes(changes));
            }
            close_window(view);
        }
        Err(err) => {
            emit(view, &ArrayEvent::Failed(err));
            close_window(view);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
