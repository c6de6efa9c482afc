//! In-flight request tracking.
//!
//! Every client-initiated request creates an operation. The caller keeps a
//! cheap [`Operation`] handle observing completion; the registry keeps the
//! completion callback until the reply (or its timeout, or the terminal
//! sweep) claims it. Each operation completes exactly once.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;

use super::context::{Context, DaemonStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// The request is in flight.
    Running,
    /// The completion callback ran.
    Done,
    /// The operation was swept away before completing normally.
    Cancelled,
}

/// Caller-side handle to an in-flight request.
#[derive(Clone)]
pub struct Operation {
    state: Rc<Cell<OperationState>>,
}

impl Operation {
    pub fn state(&self) -> OperationState {
        self.state.get()
    }

    pub fn is_running(&self) -> bool {
        self.state() == OperationState::Running
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Operation").field(&self.state()).finish()
    }
}

/// Completion callback variants, by request shape.
pub(crate) enum OperationCallback {
    /// Success/failure acknowledgment.
    Ack(Box<dyn FnOnce(&mut Context, bool)>),
    /// Daemon statistics; `None` on failure.
    Stat(Box<dyn FnOnce(&mut Context, Option<DaemonStats>)>),
    /// Drain completion.
    Drain(Box<dyn FnOnce(&mut Context)>),
}

pub(crate) struct OperationSlot {
    pub shared: Rc<Cell<OperationState>>,
    pub callback: Option<OperationCallback>,
}

pub(crate) struct OperationRegistry {
    slots: BTreeMap<u64, OperationSlot>,
    next_id: u64,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
            next_id: 0,
        }
    }

    pub fn insert(&mut self, callback: Option<OperationCallback>) -> (u64, Operation) {
        let id = self.next_id;
        self.next_id += 1;

        let shared = Rc::new(Cell::new(OperationState::Running));
        self.slots.insert(
            id,
            OperationSlot {
                shared: Rc::clone(&shared),
                callback,
            },
        );
        (id, Operation { state: shared })
    }

    pub fn take(&mut self, id: u64) -> Option<OperationSlot> {
        self.slots.remove(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Remove every slot; used for the terminal sweep.
    pub fn drain(&mut self) -> Vec<(u64, OperationSlot)> {
        std::mem::take(&mut self.slots).into_iter().collect()
    }
}
