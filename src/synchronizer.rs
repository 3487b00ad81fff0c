/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Gate between full-graph walks and every operation that must not interleave with one.
//!
//! Producing a snapshot while an unrelated mutation is applied to the same graph can silently lose
//! that mutation: the walk may have already passed the mutated slot, and the mutation's command may
//! be sent before the snapshot. The [`WalkSynchronizer`] prevents this.
//!
//! ## Modes
//!
//! The synchronizer is in one of two modes:
//! 1. **Free**: no walk is running or waiting. Operations of every class except
//!    [`Walk`](OperationClass::Walk) run concurrently with each other.
//! 2. **Gated**: a walk has been requested. New operations do not start; they are queued instead.
//!    Once every operation that started in free mode has finished, queued operations run one at a
//!    time, in [class priority](OperationClass) order, and in arrival order within a class. When the
//!    queue is empty, the synchronizer returns to free mode.
//!
//! A queued walk therefore waits out any walk that is already running, and every release, including
//! one caused by a panic inside the operation, hands the gate to the next queued operation.
//!
//! ## Re-entrancy
//!
//! A thread that already holds a permit of a synchronizer may acquire further permits of the same
//! synchronizer without blocking.

use std::{
    cell::RefCell,
    collections::BTreeSet,
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::{Condvar, Mutex};

/// Kinds of operation the synchronizer orders, from highest to lowest priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperationClass {
    /// A mutation made by the host application on this peer.
    LocalChange,
    /// A batch of commands received from a peer.
    IncomingCommands,
    /// A full-graph walk, e.g. a snapshot.
    Walk,
    /// Test and diagnostic code that wants to observe the graph between operations.
    Diagnostic,
}

static NEXT_SYNCHRONIZER_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// Ids of the synchronizers whose permits the current thread holds.
    static HELD: RefCell<Vec<u64>> = RefCell::new(Vec::new());
}

#[derive(Default)]
struct GateState {
    gated: bool,
    /// Operations started in free mode that have not finished.
    active: usize,
    /// Whether a queued operation is running.
    exclusive: bool,
    queue: BTreeSet<(OperationClass, u64)>,
    next_ticket: u64,
}

pub struct WalkSynchronizer {
    id: u64,
    state: Mutex<GateState>,
    released: Condvar,
}

enum PermitKind {
    Shared,
    Exclusive,
    Reentrant,
}

/// Proof that the holder may run an operation. Releases the gate when dropped.
pub struct Permit<'a> {
    synchronizer: &'a WalkSynchronizer,
    kind: PermitKind,
}

impl Default for WalkSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl WalkSynchronizer {
    pub fn new() -> Self {
        Self {
            id: NEXT_SYNCHRONIZER_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(GateState::default()),
            released: Condvar::new(),
        }
    }

    /// Run `operation` once the gate allows an operation of `class` to run.
    pub fn run<R>(&self, class: OperationClass, operation: impl FnOnce() -> R) -> R {
        let _permit = self.acquire(class);
        operation()
    }

    /// Run `walk` with exclusive access to the graph.
    pub fn walk<R>(&self, walk: impl FnOnce() -> R) -> R {
        self.run(OperationClass::Walk, walk)
    }

    /// Block until an operation of `class` may run.
    pub fn acquire(&self, class: OperationClass) -> Permit<'_> {
        if self.held_by_current_thread() {
            return Permit {
                synchronizer: self,
                kind: PermitKind::Reentrant,
            };
        }

        let mut state = self.state.lock();
        let kind = if !state.gated && class != OperationClass::Walk {
            state.active += 1;
            PermitKind::Shared
        } else {
            state.gated = true;
            let ticket = (class, state.next_ticket);
            state.next_ticket += 1;
            state.queue.insert(ticket);
            while state.exclusive || state.active > 0 || state.queue.first() != Some(&ticket) {
                self.released.wait(&mut state);
            }
            state.queue.remove(&ticket);
            state.exclusive = true;
            PermitKind::Exclusive
        };
        drop(state);

        HELD.with(|held| held.borrow_mut().push(self.id));
        Permit {
            synchronizer: self,
            kind,
        }
    }

    /// Whether no walk is running or waiting.
    pub fn is_free(&self) -> bool {
        !self.state.lock().gated
    }

    /// Number of operations waiting for the gate.
    pub fn waiting(&self) -> usize {
        self.state.lock().queue.len()
    }

    fn held_by_current_thread(&self) -> bool {
        HELD.with(|held| held.borrow().contains(&self.id))
    }

    fn release(&self, kind: &PermitKind) {
        let mut state = self.state.lock();
        match kind {
            PermitKind::Shared => state.active -= 1,
            PermitKind::Exclusive => state.exclusive = false,
            PermitKind::Reentrant => return,
        }
        if state.gated && !state.exclusive && state.active == 0 && state.queue.is_empty() {
            state.gated = false;
        }
        drop(state);

        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(position) = held.iter().rposition(|id| *id == self.id) {
                held.remove(position);
            }
        });
        self.released.notify_all();
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.synchronizer.release(&self.kind);
    }
}
