#![forbid(unsafe_code)]

//! Single-threaded completion promises.
//!
//! A [`Promise`] starts `Pending` and is fulfilled exactly once. Callbacks
//! attached with [`when_fulfilled`](Promise::when_fulfilled) run
//! immediately when the value is already present, or queue and run in
//! attachment order at fulfillment. The undo layer hangs undo/redo closures
//! off the delta promise this way, so an undo requested before the delta
//! exists waits for it instead of applying a partial change.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

type Waiter<T> = Box<dyn FnOnce(&T)>;

enum PromiseState<T> {
    Pending(Vec<Waiter<T>>),
    Fulfilled(T),
}

/// A value that arrives later. Cloning shares the same cell.
pub struct Promise<T> {
    inner: Rc<RefCell<PromiseState<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.inner.borrow() {
            PromiseState::Pending(waiters) => f
                .debug_struct("Promise")
                .field("state", &"pending")
                .field("waiters", &waiters.len())
                .finish(),
            PromiseState::Fulfilled(value) => f
                .debug_struct("Promise")
                .field("state", &"fulfilled")
                .field("value", value)
                .finish(),
        }
    }
}

impl<T: Clone + 'static> Default for Promise<T> {
    fn default() -> Self {
        Promise::new()
    }
}

impl<T: Clone + 'static> Promise<T> {
    #[must_use]
    pub fn new() -> Self {
        Promise {
            inner: Rc::new(RefCell::new(PromiseState::Pending(Vec::new()))),
        }
    }

    /// A promise born fulfilled.
    #[must_use]
    pub fn fulfilled(value: T) -> Self {
        Promise {
            inner: Rc::new(RefCell::new(PromiseState::Fulfilled(value))),
        }
    }

    /// Fulfill the promise, running queued waiters in attachment order.
    /// Fulfilling twice is a bug; the second call is dropped (debug
    /// assertion).
    pub fn fulfill(&self, value: T) {
        let waiters = {
            let mut state = self.inner.borrow_mut();
            match &mut *state {
                PromiseState::Pending(waiters) => {
                    let waiters = std::mem::take(waiters);
                    *state = PromiseState::Fulfilled(value.clone());
                    waiters
                }
                PromiseState::Fulfilled(_) => {
                    debug_assert!(false, "promise fulfilled twice");
                    return;
                }
            }
        };
        // Waiters run outside the borrow; they may attach further waiters.
        for waiter in waiters {
            waiter(&value);
        }
    }

    /// Run `f` with the value: now if fulfilled, at fulfillment otherwise.
    pub fn when_fulfilled(&self, f: impl FnOnce(&T) + 'static) {
        let value = {
            let mut state = self.inner.borrow_mut();
            match &mut *state {
                PromiseState::Pending(waiters) => {
                    waiters.push(Box::new(f));
                    return;
                }
                PromiseState::Fulfilled(value) => value.clone(),
            }
        };
        f(&value);
    }

    /// The value, if already fulfilled.
    #[must_use]
    pub fn get(&self) -> Option<T> {
        match &*self.inner.borrow() {
            PromiseState::Pending(_) => None,
            PromiseState::Fulfilled(value) => Some(value.clone()),
        }
    }

    #[must_use]
    pub fn is_fulfilled(&self) -> bool {
        matches!(&*self.inner.borrow(), PromiseState::Fulfilled(_))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
