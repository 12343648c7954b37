#![forbid(unsafe_code)]

//! The host undo manager.
//!
//! Holds paired undo/redo stacks of named [`UndoRecord`]s. Registration
//! pushes onto the undo stack and clears the redo stack (a new edit forks
//! history); `undo` runs a record's backward closure and moves it to the
//! redo stack, `redo` the reverse. The stacks are bounded by
//! [`UndoConfig::max_depth`], evicting the oldest record on overflow.
//!
//! Calling `undo`/`redo` with nothing to do is not an error: both return
//! `None`, leaving guard logic (menu item enablement and the like) to
//! `can_undo`/`can_redo`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

/// Undo manager tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UndoConfig {
    /// Maximum retained undo records; the oldest is evicted past this.
    pub max_depth: usize,
}

impl Default for UndoConfig {
    fn default() -> Self {
        UndoConfig { max_depth: 100 }
    }
}

impl UndoConfig {
    #[must_use]
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

type ActionFn = Box<dyn Fn()>;

/// One registered undoable action: a name for presentation plus the two
/// directions.
struct UndoRecord {
    name: String,
    forward: ActionFn,
    backward: ActionFn,
}

struct ManagerInner {
    config: UndoConfig,
    undo_stack: VecDeque<UndoRecord>,
    redo_stack: VecDeque<UndoRecord>,
}

/// Shared-handle undo manager. Cloning shares the same stacks.
#[derive(Clone)]
pub struct UndoManager {
    inner: Rc<RefCell<ManagerInner>>,
}

impl fmt::Debug for UndoManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("UndoManager")
            .field("undo_depth", &inner.undo_stack.len())
            .field("redo_depth", &inner.redo_stack.len())
            .field("max_depth", &inner.config.max_depth)
            .finish()
    }
}

impl Default for UndoManager {
    fn default() -> Self {
        UndoManager::new(UndoConfig::default())
    }
}

impl UndoManager {
    #[must_use]
    pub fn new(config: UndoConfig) -> Self {
        UndoManager {
            inner: Rc::new(RefCell::new(ManagerInner {
                config,
                undo_stack: VecDeque::new(),
                redo_stack: VecDeque::new(),
            })),
        }
    }

    /// Register an undoable action. With `perform_forward` set the forward
    /// closure runs immediately; pass false when the action's effect has
    /// already been applied. Registration clears the redo stack.
    pub fn register(
        &self,
        name: &str,
        perform_forward: bool,
        forward: impl Fn() + 'static,
        backward: impl Fn() + 'static,
    ) {
        if perform_forward {
            forward();
        }
        let mut inner = self.inner.borrow_mut();
        inner.redo_stack.clear();
        inner.undo_stack.push_back(UndoRecord {
            name: name.to_string(),
            forward: Box::new(forward),
            backward: Box::new(backward),
        });
        if inner.undo_stack.len() > inner.config.max_depth {
            inner.undo_stack.pop_front();
        }
        debug!(action = %name, depth = inner.undo_stack.len(), "undo action registered");
    }

    /// Undo the most recent action, returning its name; `None` when the
    /// undo stack is empty.
    pub fn undo(&self) -> Option<String> {
        let record = self.inner.borrow_mut().undo_stack.pop_back()?;
        debug!(action = %record.name, "undo");
        // Run outside the borrow: the closure may enqueue store work that
        // re-enters observer callbacks.
        (record.backward)();
        let name = record.name.clone();
        self.inner.borrow_mut().redo_stack.push_back(record);
        Some(name)
    }

    /// Redo the most recently undone action, returning its name; `None`
    /// when the redo stack is empty.
    pub fn redo(&self) -> Option<String> {
        let record = self.inner.borrow_mut().redo_stack.pop_back()?;
        debug!(action = %record.name, "redo");
        (record.forward)();
        let name = record.name.clone();
        self.inner.borrow_mut().undo_stack.push_back(record);
        Some(name)
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.inner.borrow().undo_stack.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.inner.borrow().redo_stack.is_empty()
    }

    /// Name of the action `undo` would perform.
    #[must_use]
    pub fn undo_action_name(&self) -> Option<String> {
        self.inner
            .borrow()
            .undo_stack
            .back()
            .map(|r| r.name.clone())
    }

    /// Name of the action `redo` would perform.
    #[must_use]
    pub fn redo_action_name(&self) -> Option<String> {
        self.inner
            .borrow()
            .redo_stack
            .back()
            .map(|r| r.name.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// A counter with record/replay closures over a shared cell.
    fn counter() -> (Rc<RefCell<i64>>, impl Fn(i64) -> (Box<dyn Fn()>, Box<dyn Fn()>)) {
        let cell = Rc::new(RefCell::new(0i64));
        let make = {
            let cell = Rc::clone(&cell);
            move |delta: i64| {
                let fwd_cell = Rc::clone(&cell);
                let bwd_cell = Rc::clone(&cell);
                let forward: Box<dyn Fn()> = Box::new(move || *fwd_cell.borrow_mut() += delta);
                let backward: Box<dyn Fn()> = Box::new(move || *bwd_cell.borrow_mut() -= delta);
                (forward, backward)
            }
        };
        (cell, make)
    }

    #[test]
    fn undo_redo_round_trip() {
        let manager = UndoManager::default();
        let (cell, make) = counter();

        let (forward, backward) = make(5);
        manager.register("Add Five", true, forward, backward);
        assert_eq!(*cell.borrow(), 5);
        assert!(manager.can_undo());
        assert_eq!(manager.undo_action_name().as_deref(), Some("Add Five"));

        assert_eq!(manager.undo().as_deref(), Some("Add Five"));
        assert_eq!(*cell.borrow(), 0);
        assert!(!manager.can_undo());
        assert_eq!(manager.redo_action_name().as_deref(), Some("Add Five"));

        assert_eq!(manager.redo().as_deref(), Some("Add Five"));
        assert_eq!(*cell.borrow(), 5);
    }

    #[test]
    fn perform_flag_false_skips_forward_at_registration() {
        let manager = UndoManager::default();
        let (cell, make) = counter();

        let (forward, backward) = make(5);
        manager.register("Add Five", false, forward, backward);
        assert_eq!(*cell.borrow(), 0, "effect assumed already applied");
        manager.undo();
        assert_eq!(*cell.borrow(), -5);
    }

    #[test]
    fn empty_stacks_are_not_errors() {
        let manager = UndoManager::default();
        assert_eq!(manager.undo(), None);
        assert_eq!(manager.redo(), None);
        assert!(!manager.can_undo());
        assert!(!manager.can_redo());
        assert_eq!(manager.undo_action_name(), None);
    }

    #[test]
    fn new_registration_clears_redo() {
        let manager = UndoManager::default();
        let (cell, make) = counter();

        let (forward, backward) = make(1);
        manager.register("One", true, forward, backward);
        manager.undo();
        assert!(manager.can_redo());

        let (forward, backward) = make(10);
        manager.register("Ten", true, forward, backward);
        assert!(!manager.can_redo(), "history forked");
        assert_eq!(*cell.borrow(), 10);
    }

    #[test]
    fn overflow_evicts_oldest_record() {
        let manager = UndoManager::new(UndoConfig::default().max_depth(2));
        let (cell, make) = counter();

        for (name, delta) in [("A", 1), ("B", 10), ("C", 100)] {
            let (forward, backward) = make(delta);
            manager.register(name, true, forward, backward);
        }
        assert_eq!(*cell.borrow(), 111);

        assert_eq!(manager.undo().as_deref(), Some("C"));
        assert_eq!(manager.undo().as_deref(), Some("B"));
        assert_eq!(manager.undo(), None, "oldest record was evicted");
        assert_eq!(*cell.borrow(), 1);
    }
}
