#![forbid(unsafe_code)]

//! Single-threaded value signals.
//!
//! [`Signal<T>`] is an observable value channel: emissions carry the new
//! value plus [`ChangeMetadata`], whose `transient` flag distinguishes
//! in-progress edits (a keystroke in a text field) from committed values.
//! The undo layer registers an undo step only for committed changes.
//!
//! Subscribers are held weakly and pruned on emit; [`SignalToken`] is the
//! RAII guard keeping a subscription alive.
//!
//! [`one_value_signal`] adapts a relation to a `Signal<Value>` that
//! re-emits the first row's projected value after each coalesced change.
//! This is the read side of the undo layer's bidirectional binding.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::change::RowChangeSet;
use crate::error::StoreError;
use crate::relation::{Relation, RelationObserver};
use crate::row::Attribute;
use crate::value::Value;

/// Metadata attached to every signal emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeMetadata {
    /// True for in-progress values that should not create an undo step.
    pub transient: bool,
}

impl ChangeMetadata {
    pub const TRANSIENT: ChangeMetadata = ChangeMetadata { transient: true };
    pub const COMMITTED: ChangeMetadata = ChangeMetadata { transient: false };
}

type Callback<T> = Rc<dyn Fn(&T, ChangeMetadata)>;

struct SignalInner<T> {
    current: Option<T>,
    subscribers: Vec<Weak<dyn Fn(&T, ChangeMetadata)>>,
    /// Upstream registrations (relation observers) that must live as long
    /// as the signal does.
    retained: Vec<Rc<dyn Any>>,
}

/// An observable value. Cloning shares the same channel.
pub struct Signal<T> {
    inner: Rc<RefCell<SignalInner<T>>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Signal {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Signal")
            .field("current", &inner.current)
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

impl<T: Clone + 'static> Default for Signal<T> {
    fn default() -> Self {
        Signal::new()
    }
}

impl<T: Clone + 'static> Signal<T> {
    #[must_use]
    pub fn new() -> Self {
        Signal {
            inner: Rc::new(RefCell::new(SignalInner {
                current: None,
                subscribers: Vec::new(),
                retained: Vec::new(),
            })),
        }
    }

    #[must_use]
    pub fn with_initial(value: T) -> Self {
        let signal = Signal::new();
        signal.inner.borrow_mut().current = Some(value);
        signal
    }

    /// Last emitted (or initial) value, if any.
    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.inner.borrow().current.clone()
    }

    /// Subscribe to emissions. Dropping the token unsubscribes.
    #[must_use]
    pub fn observe(&self, callback: impl Fn(&T, ChangeMetadata) + 'static) -> SignalToken {
        let strong: Callback<T> = Rc::new(callback);
        self.inner
            .borrow_mut()
            .subscribers
            .push(Rc::downgrade(&strong));
        SignalToken {
            _guard: Box::new(strong),
        }
    }

    /// Emit a value to all live subscribers, pruning dead ones.
    pub fn emit(&self, value: T, metadata: ChangeMetadata) {
        let callbacks: Vec<Callback<T>> = {
            let mut inner = self.inner.borrow_mut();
            inner.current = Some(value.clone());
            inner.subscribers.retain(|w| w.strong_count() > 0);
            inner.subscribers.iter().filter_map(Weak::upgrade).collect()
        };
        for cb in callbacks {
            cb(&value, metadata);
        }
    }

    fn retain(&self, upstream: Rc<dyn Any>) {
        self.inner.borrow_mut().retained.push(upstream);
    }
}

/// RAII guard for a signal subscription.
pub struct SignalToken {
    _guard: Box<dyn Any>,
}

impl std::fmt::Debug for SignalToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalToken").finish_non_exhaustive()
    }
}

/// Relation observer that projects the first row's `attr` value into a
/// signal after each coalesced change. Holds the signal interior weakly to
/// avoid a retain cycle through the signal's `retained` list.
struct OneValueObserver {
    relation: Relation,
    attr: Attribute,
    default: Value,
    signal: Weak<RefCell<SignalInner<Value>>>,
}

impl OneValueObserver {
    fn project(&self) -> Value {
        self.relation
            .rows()
            .first()
            .and_then(|row| row.get(&self.attr).cloned())
            .unwrap_or_else(|| self.default.clone())
    }
}

impl RelationObserver for OneValueObserver {
    fn relation_will_change(&self) {}

    fn relation_did_change(&self, result: Result<RowChangeSet, StoreError>) {
        if result.is_err() {
            return;
        }
        let Some(inner) = self.signal.upgrade() else {
            return;
        };
        let value = self.project();
        let callbacks: Vec<Callback<Value>> = {
            let mut inner = inner.borrow_mut();
            inner.current = Some(value.clone());
            inner.subscribers.retain(|w| w.strong_count() > 0);
            inner.subscribers.iter().filter_map(Weak::upgrade).collect()
        };
        for cb in callbacks {
            cb(&value, ChangeMetadata::COMMITTED);
        }
    }
}

/// A `Signal<Value>` mirroring the first row's `attr` in `relation`,
/// falling back to `default` while the relation is empty. The relation
/// observer registration lives as long as the signal.
#[must_use]
pub fn one_value_signal(relation: &Relation, attr: Attribute, default: Value) -> Signal<Value> {
    let signal = Signal::new();

    let observer = Rc::new(OneValueObserver {
        relation: relation.clone(),
        attr,
        default,
        signal: Rc::downgrade(&signal.inner),
    });
    signal.inner.borrow_mut().current = Some(observer.project());

    let guard = relation.add_observer(Rc::clone(&observer) as Rc<dyn RelationObserver>);
    signal.retain(Rc::new(guard));
    signal
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pump::Pump;
    use crate::relation::{Select, Store};
    use crate::row::{Row, Scheme};
    use std::cell::RefCell;

    #[test]
    fn emit_reaches_subscribers_with_metadata() {
        let signal: Signal<i64> = Signal::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let s = Rc::clone(&seen);
        let _token = signal.observe(move |v, meta| s.borrow_mut().push((*v, meta.transient)));

        signal.emit(1, ChangeMetadata::TRANSIENT);
        signal.emit(2, ChangeMetadata::COMMITTED);

        assert_eq!(*seen.borrow(), vec![(1, true), (2, false)]);
        assert_eq!(signal.get(), Some(2));
    }

    #[test]
    fn dropped_token_unsubscribes() {
        let signal: Signal<i64> = Signal::new();
        let seen = Rc::new(RefCell::new(0));

        let s = Rc::clone(&seen);
        let token = signal.observe(move |_, _| *s.borrow_mut() += 1);

        signal.emit(1, ChangeMetadata::COMMITTED);
        drop(token);
        signal.emit(2, ChangeMetadata::COMMITTED);

        assert_eq!(*seen.borrow(), 1);
    }

    #[test]
    fn with_initial_seeds_current() {
        let signal = Signal::with_initial(Value::from("hello"));
        assert_eq!(signal.get(), Some(Value::Text("hello".into())));
    }

    #[test]
    fn one_value_signal_tracks_relation() {
        let pump = Pump::new();
        let store = Store::new(pump.clone());
        let rel = store
            .create_relation("title", Scheme::new(["id", "text"]))
            .expect("create");

        let signal = one_value_signal(&rel, "text".into(), Value::from(""));
        assert_eq!(signal.get(), Some(Value::Text(String::new())));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _token = signal.observe(move |v, meta| {
            s.borrow_mut().push((v.clone(), meta.transient));
        });

        rel.async_add(Row::from_pairs([
            ("id", Value::from(1i64)),
            ("text", Value::from("draft")),
        ]));
        pump.run_until_idle();

        assert_eq!(
            *seen.borrow(),
            vec![(Value::Text("draft".into()), false)]
        );
        assert_eq!(signal.get(), Some(Value::Text("draft".into())));
    }

    #[test]
    fn one_value_signal_falls_back_to_default_when_emptied() {
        let pump = Pump::new();
        let store = Store::new(pump.clone());
        let rel = store
            .create_relation("title", Scheme::new(["id", "text"]))
            .expect("create");

        rel.async_add(Row::from_pairs([
            ("id", Value::from(1i64)),
            ("text", Value::from("draft")),
        ]));
        pump.run_until_idle();

        let signal = one_value_signal(&rel, "text".into(), Value::from("(none)"));
        assert_eq!(signal.get(), Some(Value::Text("draft".into())));

        rel.async_delete(Select::All);
        pump.run_until_idle();
        assert_eq!(signal.get(), Some(Value::Text("(none)".into())));
    }
}
