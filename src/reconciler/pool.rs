//! Work-Item Slot Pool
//!
//! Both queues draw their entries from one fixed-capacity pool, sized so that
//! every drive the platform supports can have one discover entry and one
//! connect entry outstanding at the same time. Exhaustion therefore means a
//! logic error or a notification storm, never normal load.
//!
//! Tickets are move-only: enqueueing consumes the ticket and releasing it
//! requires giving it back, so a slot cannot be freed twice or used after
//! return.

use crate::error::{Error, Result};

/// A claim on one pool slot. Not cloneable; dropping a ticket without
/// returning it leaks the slot, which the pool counts as outstanding.
#[derive(Debug, PartialEq, Eq)]
pub struct SlotTicket {
    index: usize,
}

impl SlotTicket {
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Fixed-capacity index arena shared by the discover and connect queues.
#[derive(Debug)]
pub struct SlotPool {
    capacity: usize,
    free: Vec<usize>,
}

impl SlotPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            free: (0..capacity).rev().collect(),
        }
    }

    /// Claim a slot, failing when the pool is exhausted
    pub fn acquire(&mut self) -> Result<SlotTicket> {
        match self.free.pop() {
            Some(index) => Ok(SlotTicket { index }),
            None => Err(Error::PoolExhausted),
        }
    }

    /// Return a slot to the pool, consuming the ticket
    pub fn release(&mut self, ticket: SlotTicket) {
        self.free.push(ticket.index);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn outstanding(&self) -> usize {
        self.capacity - self.free.len()
    }
}
