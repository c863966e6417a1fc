//! Discover and Connect Queues
//!
//! Two ordered, deduplicated queues sharing one slot pool. The discover queue
//! holds physical drives awaiting classification; the connect queue holds
//! logical drives awaiting their downstream edge. Duplicate notifications for
//! a drive merge into the existing entry instead of growing the queue, so the
//! queues are bounded by drive count no matter how chatty the hardware layer
//! is.
//!
//! Everything here runs under one lock held only for queue mutation, never
//! across IO. The worker pops an item, drops the lock, processes it, then
//! either returns the ticket or reinserts the item.

use crate::error::Result;
use crate::reconciler::pool::{SlotPool, SlotTicket};
use crate::topology::types::{LifecycleState, LogicalDriveId, PhysicalDriveId, ProcessFlags};
use std::collections::BTreeMap;
use tokio::time::Instant;

// =============================================================================
// Items
// =============================================================================

/// A physical drive awaiting classification
#[derive(Debug)]
pub struct DiscoverItem {
    pub drive: PhysicalDriveId,
    pub state: LifecycleState,
    pub flags: ProcessFlags,
    /// Last time an action was attempted for this drive; drives the reinit cooldown
    pub last_attempt: Option<Instant>,
    ticket: SlotTicket,
}

impl DiscoverItem {
    pub fn into_ticket(self) -> SlotTicket {
        self.ticket
    }
}

/// A logical drive awaiting its downstream edge
#[derive(Debug)]
pub struct ConnectItem {
    pub logical: LogicalDriveId,
    ticket: SlotTicket,
}

impl ConnectItem {
    pub fn into_ticket(self) -> SlotTicket {
        self.ticket
    }
}

// =============================================================================
// Queue Set
// =============================================================================

/// Both queues plus the shared pool, mutated under one mutex.
#[derive(Debug)]
pub struct QueueSet {
    pool: SlotPool,
    discover: BTreeMap<PhysicalDriveId, DiscoverItem>,
    connect: BTreeMap<LogicalDriveId, ConnectItem>,
}

impl QueueSet {
    pub fn new(pool_capacity: usize) -> Self {
        Self {
            pool: SlotPool::new(pool_capacity),
            discover: BTreeMap::new(),
            connect: BTreeMap::new(),
        }
    }

    /// Add or merge a discover entry. Returns true if the queue gained a new
    /// entry; a merge overwrites the lifecycle state and ORs the flags.
    pub fn enqueue_discover(
        &mut self,
        drive: PhysicalDriveId,
        state: LifecycleState,
        flags: ProcessFlags,
    ) -> Result<bool> {
        if let Some(existing) = self.discover.get_mut(&drive) {
            existing.state = state;
            existing.flags.merge(flags);
            return Ok(false);
        }
        let ticket = self.pool.acquire()?;
        self.discover.insert(
            drive,
            DiscoverItem {
                drive,
                state,
                flags,
                last_attempt: None,
                ticket,
            },
        );
        Ok(true)
    }

    /// Add a connect entry unless one is already pending
    pub fn enqueue_connect(&mut self, logical: LogicalDriveId) -> Result<bool> {
        if self.connect.contains_key(&logical) {
            return Ok(false);
        }
        let ticket = self.pool.acquire()?;
        self.connect.insert(logical, ConnectItem { logical, ticket });
        Ok(true)
    }

    /// Pop the lowest-keyed discover item; the caller owns it until it is
    /// released or requeued
    pub fn pop_discover(&mut self) -> Option<DiscoverItem> {
        self.discover.pop_first().map(|(_, item)| item)
    }

    /// Pop the lowest discover item keyed strictly above `after`; a pass
    /// walks the queue with this so a requeued item is not revisited until
    /// the next pass
    pub fn pop_discover_after(&mut self, after: PhysicalDriveId) -> Option<DiscoverItem> {
        use std::ops::Bound::{Excluded, Unbounded};
        let key = *self.discover.range((Excluded(after), Unbounded)).next()?.0;
        self.discover.remove(&key)
    }

    /// Pop the lowest-keyed connect item
    pub fn pop_connect(&mut self) -> Option<ConnectItem> {
        self.connect.pop_first().map(|(_, item)| item)
    }

    /// Pop the lowest connect item keyed strictly above `after`
    pub fn pop_connect_after(&mut self, after: LogicalDriveId) -> Option<ConnectItem> {
        use std::ops::Bound::{Excluded, Unbounded};
        let key = *self.connect.range((Excluded(after), Unbounded)).next()?.0;
        self.connect.remove(&key)
    }

    /// Put a discover item back, merging with any entry that raced in while
    /// the item was being processed. The raced-in entry carries the newer
    /// lifecycle state, so its state wins; flags accumulate.
    pub fn requeue_discover(&mut self, item: DiscoverItem) {
        if let Some(existing) = self.discover.get_mut(&item.drive) {
            existing.flags.merge(item.flags);
            if existing.last_attempt.is_none() {
                existing.last_attempt = item.last_attempt;
            }
            self.pool.release(item.into_ticket());
        } else {
            self.discover.insert(item.drive, item);
        }
    }

    /// Put a connect item back
    pub fn requeue_connect(&mut self, item: ConnectItem) {
        if self.connect.contains_key(&item.logical) {
            self.pool.release(item.into_ticket());
        } else {
            self.connect.insert(item.logical, item);
        }
    }

    /// Release a finished item's ticket back to the pool
    pub fn release(&mut self, ticket: SlotTicket) {
        self.pool.release(ticket);
    }

    pub fn is_drive_pending_connect(&self, logical: LogicalDriveId) -> bool {
        self.connect.contains_key(&logical)
    }

    pub fn discover_len(&self) -> usize {
        self.discover.len()
    }

    pub fn connect_len(&self) -> usize {
        self.connect.len()
    }

    pub fn has_work(&self) -> bool {
        !self.discover.is_empty() || !self.connect.is_empty()
    }

    pub fn pool_free(&self) -> usize {
        self.pool.free_count()
    }

    pub fn pool_outstanding(&self) -> usize {
        self.pool.outstanding()
    }

    pub fn pool_capacity(&self) -> usize {
        self.pool.capacity()
    }
}
