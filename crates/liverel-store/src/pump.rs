#![forbid(unsafe_code)]

//! The action pump: an explicit, injected scheduler.
//!
//! All store mutations, queries, and checkpoints run serially on a [`Pump`].
//! Callers never block: `register_*` enqueues and returns, and results are
//! delivered by callbacks when the pump runs. Every store is constructed
//! over a pump; tests construct their own and drive it with
//! [`Pump::run_until_idle`], which is the deterministic "await async
//! completion" hook.
//!
//! # Ordering
//!
//! The queue is strictly FIFO, which gives checkpoints their contract for
//! free: a checkpoint registered now runs after all previously queued work
//! and before anything queued later. The undo coordinator leans on this to
//! bracket mutations with snapshot captures.
//!
//! # Cycles
//!
//! One cycle drains the queue (actions may enqueue more work mid-drain;
//! the drain continues until the queue is empty) and then flushes: each
//! registered flusher delivers its coalesced per-relation change sets.
//! Deliveries may themselves enqueue actions, in which case another cycle
//! runs. A cycle is traced with the number of actions run, the number of
//! relations whose changes were delivered, and its duration.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use tracing::info_span;
use web_time::Instant;

/// What a cycle-boundary flush delivered.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlushOutcome {
    /// Number of relations whose coalesced change set was delivered.
    pub relations_changed: usize,
}

/// Pump lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    /// Queue empty, nothing pending.
    Idle,
    /// Work queued but not yet run.
    Pending,
    /// A cycle is executing.
    Running,
}

enum ActionKind {
    Mutation,
    Query,
    Checkpoint,
}

struct Action {
    kind: ActionKind,
    run: Box<dyn FnOnce()>,
}

type Flusher = Rc<dyn Fn() -> FlushOutcome>;

struct PumpInner {
    state: PumpState,
    queue: VecDeque<Action>,
    /// Stores register a flusher at construction; held weakly so a dropped
    /// store unregisters itself.
    flushers: Vec<Weak<dyn Fn() -> FlushOutcome>>,
}

/// A serial action queue shared by handles. Cloning a `Pump` yields another
/// handle to the same queue.
pub struct Pump {
    inner: Rc<RefCell<PumpInner>>,
}

impl Clone for Pump {
    fn clone(&self) -> Self {
        Pump {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl Default for Pump {
    fn default() -> Self {
        Pump::new()
    }
}

impl std::fmt::Debug for Pump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Pump")
            .field("state", &inner.state)
            .field("queued", &inner.queue.len())
            .finish()
    }
}

impl Pump {
    #[must_use]
    pub fn new() -> Self {
        Pump {
            inner: Rc::new(RefCell::new(PumpInner {
                state: PumpState::Idle,
                queue: VecDeque::new(),
                flushers: Vec::new(),
            })),
        }
    }

    #[must_use]
    pub fn state(&self) -> PumpState {
        self.inner.borrow().state
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state() == PumpState::Idle
    }

    /// Enqueue a store mutation.
    pub fn register_mutation(&self, f: impl FnOnce() + 'static) {
        self.enqueue(ActionKind::Mutation, Box::new(f));
    }

    /// Enqueue a read-only query.
    pub fn register_query(&self, f: impl FnOnce() + 'static) {
        self.enqueue(ActionKind::Query, Box::new(f));
    }

    /// Enqueue a checkpoint: runs after all previously queued work and
    /// before anything queued after this call.
    pub fn register_checkpoint(&self, f: impl FnOnce() + 'static) {
        self.enqueue(ActionKind::Checkpoint, Box::new(f));
    }

    /// Register a cycle-boundary flusher. The pump holds it weakly; the
    /// caller keeps the strong reference alive for as long as it wants to
    /// be flushed.
    pub fn add_flusher(&self, flusher: &Flusher) {
        self.inner.borrow_mut().flushers.push(Rc::downgrade(flusher));
    }

    fn enqueue(&self, kind: ActionKind, run: Box<dyn FnOnce()>) {
        let mut inner = self.inner.borrow_mut();
        inner.queue.push_back(Action { kind, run });
        if inner.state == PumpState::Idle {
            inner.state = PumpState::Pending;
        }
    }

    /// Run cycles until the queue is drained and a flush delivers nothing.
    pub fn run_until_idle(&self) {
        while self.run_cycle() {}
    }

    /// Run one cycle. Returns false when the cycle did no work.
    fn run_cycle(&self) -> bool {
        if self.inner.borrow().queue.is_empty() && !self.has_live_flusher() {
            return false;
        }

        let started = Instant::now();
        let span = info_span!(
            "liverel.pump.cycle",
            actions = tracing::field::Empty,
            relations_changed = tracing::field::Empty,
            duration_us = tracing::field::Empty
        );
        let entered = span.enter();

        self.inner.borrow_mut().state = PumpState::Running;

        let mut actions = 0usize;
        loop {
            // Pop under the borrow, run with it released: actions enqueue
            // more actions and flush deliveries call back into the pump.
            let next = self.inner.borrow_mut().queue.pop_front();
            let Some(action) = next else { break };
            let _ = action.kind;
            (action.run)();
            actions += 1;
        }

        let mut relations_changed = 0usize;
        for flusher in self.live_flushers() {
            relations_changed += flusher().relations_changed;
        }

        {
            let mut inner = self.inner.borrow_mut();
            inner.state = if inner.queue.is_empty() {
                PumpState::Idle
            } else {
                PumpState::Pending
            };
        }

        span.record("actions", actions as u64);
        span.record("relations_changed", relations_changed as u64);
        span.record("duration_us", started.elapsed().as_micros() as u64);
        drop(entered);

        actions > 0 || relations_changed > 0
    }

    fn has_live_flusher(&self) -> bool {
        self.inner
            .borrow()
            .flushers
            .iter()
            .any(|w| w.strong_count() > 0)
    }

    fn live_flushers(&self) -> Vec<Flusher> {
        let mut inner = self.inner.borrow_mut();
        inner.flushers.retain(|w| w.strong_count() > 0);
        inner.flushers.iter().filter_map(Weak::upgrade).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn starts_idle() {
        let pump = Pump::new();
        assert_eq!(pump.state(), PumpState::Idle);
        pump.run_until_idle();
        assert!(pump.is_idle());
    }

    #[test]
    fn registration_moves_to_pending() {
        let pump = Pump::new();
        pump.register_mutation(|| {});
        assert_eq!(pump.state(), PumpState::Pending);
        pump.run_until_idle();
        assert_eq!(pump.state(), PumpState::Idle);
    }

    #[test]
    fn fifo_order_across_action_kinds() {
        let pump = Pump::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = Rc::clone(&log);
        pump.register_checkpoint(move || l.borrow_mut().push("before"));
        let l = Rc::clone(&log);
        pump.register_mutation(move || l.borrow_mut().push("write"));
        let l = Rc::clone(&log);
        pump.register_query(move || l.borrow_mut().push("read"));
        let l = Rc::clone(&log);
        pump.register_checkpoint(move || l.borrow_mut().push("after"));

        pump.run_until_idle();
        assert_eq!(*log.borrow(), vec!["before", "write", "read", "after"]);
    }

    #[test]
    fn actions_enqueued_mid_drain_run_in_same_call() {
        let pump = Pump::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = Rc::clone(&log);
        let p = pump.clone();
        pump.register_mutation(move || {
            l.borrow_mut().push(1);
            let l2 = Rc::clone(&l);
            p.register_mutation(move || l2.borrow_mut().push(2));
        });

        pump.run_until_idle();
        assert_eq!(*log.borrow(), vec![1, 2]);
        assert!(pump.is_idle());
    }

    #[test]
    fn checkpoint_runs_before_later_registrations() {
        // The checkpoint contract the undo coordinator depends on: work
        // queued after the checkpoint never runs before it.
        let pump = Pump::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = Rc::clone(&log);
        pump.register_mutation(move || l.borrow_mut().push("m1"));
        let l = Rc::clone(&log);
        pump.register_checkpoint(move || l.borrow_mut().push("ckpt"));
        let l = Rc::clone(&log);
        pump.register_mutation(move || l.borrow_mut().push("m2"));

        pump.run_until_idle();
        assert_eq!(*log.borrow(), vec!["m1", "ckpt", "m2"]);
    }

    #[test]
    fn flusher_runs_at_cycle_boundary() {
        let pump = Pump::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        let o = Rc::clone(&order);
        let flusher: Rc<dyn Fn() -> FlushOutcome> = Rc::new(move || {
            o.borrow_mut().push("flush");
            FlushOutcome::default()
        });
        pump.add_flusher(&flusher);

        let o = Rc::clone(&order);
        pump.register_mutation(move || o.borrow_mut().push("action"));

        pump.run_until_idle();
        let log = order.borrow();
        assert_eq!(log[0], "action");
        assert_eq!(log[1], "flush");
    }

    #[test]
    fn dropped_flusher_is_pruned() {
        let pump = Pump::new();
        let count = Rc::new(RefCell::new(0));

        let c = Rc::clone(&count);
        let flusher: Rc<dyn Fn() -> FlushOutcome> = Rc::new(move || {
            *c.borrow_mut() += 1;
            FlushOutcome::default()
        });
        pump.add_flusher(&flusher);

        pump.register_mutation(|| {});
        pump.run_until_idle();
        let after_first = *count.borrow();
        assert!(after_first >= 1);

        drop(flusher);
        pump.register_mutation(|| {});
        pump.run_until_idle();
        assert_eq!(*count.borrow(), after_first);
    }

    #[test]
    fn flush_enqueued_work_runs_in_a_following_cycle() {
        // A flush delivery that enqueues an action (an undo closure fired by
        // a fulfilled promise, say) must still be drained by run_until_idle.
        let pump = Pump::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let armed = Rc::new(RefCell::new(true));

        let l = Rc::clone(&log);
        let a = Rc::clone(&armed);
        let p = pump.clone();
        let flusher: Rc<dyn Fn() -> FlushOutcome> = Rc::new(move || {
            if *a.borrow() {
                *a.borrow_mut() = false;
                let l2 = Rc::clone(&l);
                p.register_mutation(move || l2.borrow_mut().push("late"));
                return FlushOutcome {
                    relations_changed: 1,
                };
            }
            FlushOutcome::default()
        });
        pump.add_flusher(&flusher);

        let l = Rc::clone(&log);
        pump.register_mutation(move || l.borrow_mut().push("early"));

        pump.run_until_idle();
        assert_eq!(*log.borrow(), vec!["early", "late"]);
        assert!(pump.is_idle());
    }
}
