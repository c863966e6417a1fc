//! Reconciler Configuration
//!
//! Sizing, timing and layout parameters for the reconciliation engine.
//! The system-slot layout is fixed per platform; everything else has
//! conservative defaults matching a mid-range array.

use crate::topology::types::LogicalDriveId;
use std::time::Duration;

/// Default number of reserved system slots (bus 0, enclosure 0, slots 0..N)
pub const DEFAULT_SYSTEM_SLOT_COUNT: u32 = 4;

/// First logical drive id reserved for system slots; slot N maps to id FIRST+N
pub const FIRST_SYSTEM_LOGICAL_ID: u32 = 1;

/// Configuration for the reconciliation engine
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Number of reserved system slots
    pub system_slot_count: u32,
    /// Maximum physical drives the platform supports
    pub platform_drive_limit: usize,
    /// Work-item pool capacity; at least twice the drive limit so both queues
    /// can hold an entry per drive
    pub pool_capacity: usize,
    /// Maximum create requests batched into a single job
    pub create_batch_limit: usize,
    /// Minimum interval between reinitialize submissions for one system slot
    pub reinit_cooldown: Duration,
    /// Minimum interval between forced garbage-collection jobs
    pub gc_debounce: Duration,
    /// Bounded wait on the wake signal; periodic self-wake against missed signals
    pub wake_timeout: Duration,
    /// Capacity of the lifecycle-event ingestion channel
    pub ingest_channel_capacity: usize,
    /// Allow 6G drives despite the 12G link requirement
    pub allow_6g_links: bool,
    /// 4K-native drives accepted only once the feature is committed array-wide
    pub native_4k_committed: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            system_slot_count: DEFAULT_SYSTEM_SLOT_COUNT,
            platform_drive_limit: 1000,
            pool_capacity: 2000,
            create_batch_limit: 64,
            reinit_cooldown: Duration::from_secs(120),
            gc_debounce: Duration::from_secs(300),
            wake_timeout: Duration::from_secs(2),
            ingest_channel_capacity: 256,
            allow_6g_links: true,
            native_4k_committed: true,
        }
    }
}

impl ReconcilerConfig {
    /// The fixed logical drive id owning a given system slot
    pub fn system_logical_id_for_slot(&self, slot: u32) -> Option<LogicalDriveId> {
        if slot < self.system_slot_count {
            Some(LogicalDriveId(FIRST_SYSTEM_LOGICAL_ID + slot))
        } else {
            None
        }
    }

    /// True if the id is one of the reserved system logical drives
    pub fn is_system_logical_id(&self, id: LogicalDriveId) -> bool {
        id.0 >= FIRST_SYSTEM_LOGICAL_ID
            && id.0 < FIRST_SYSTEM_LOGICAL_ID + self.system_slot_count
    }
}
