//! Configuration-table and hardware-topology views
//!
//! The classifier and connector never touch the configuration database or the
//! hardware layer directly; they work against these two traits. Production
//! wires them to the real services, tests and standalone mode use the
//! in-memory versions in [`crate::sim`].

use crate::error::Result;
use crate::topology::types::{
    DriveLocation, EdgeState, LogicalDriveId, PhysicalDriveId, PhysicalDriveInfo, SerialNumber,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// =============================================================================
// Logical Drive Records
// =============================================================================

/// How a logical drive is consumed on the configuration side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveConfigType {
    /// Not yet claimed by any consumer
    Unconsumed,
    /// Member of one or more RAID groups
    Raid,
}

/// One logical drive row from the configuration tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalDriveRecord {
    pub id: LogicalDriveId,
    pub serial: SerialNumber,
    pub config_type: DriveConfigType,
    /// Slot the record was created against; used for boot-path validation
    pub location: DriveLocation,
    /// Exported capacity in blocks
    pub capacity: u64,
}

// =============================================================================
// Configuration Snapshot
// =============================================================================

/// Read-side view of the configuration tables.
///
/// Lookups are synchronous; implementations hold the tables in memory and the
/// classifier runs entirely against a consistent snapshot.
pub trait ConfigSnapshot: Send + Sync {
    /// Find the logical drive record whose stamped serial matches
    fn lookup_by_serial(&self, serial: &SerialNumber) -> Option<LogicalDriveRecord>;

    /// Find a logical drive record by id
    fn lookup_by_id(&self, id: LogicalDriveId) -> Option<LogicalDriveRecord>;

    /// True if any RAID group consumes this logical drive
    fn is_consumed_by_raid_group(&self, id: LogicalDriveId) -> bool;

    /// Number of logical drive records currently in the tables
    fn drive_record_count(&self) -> usize;
}

// =============================================================================
// Drive Topology
// =============================================================================

/// Hardware-layer view: physical drive inquiry, edges, and drive control.
#[async_trait]
pub trait DriveTopology: Send + Sync {
    /// Fetch the identity and characteristics of a physical drive
    async fn drive_info(&self, id: PhysicalDriveId) -> Result<PhysicalDriveInfo>;

    /// Find the present physical drive with this serial, if any
    async fn find_by_serial(&self, serial: &SerialNumber) -> Result<Option<PhysicalDriveId>>;

    /// State of the downstream edge of a logical drive
    async fn edge_state(&self, id: LogicalDriveId) -> Result<EdgeState>;

    /// Attach the downstream edge between a logical and a physical drive
    async fn attach_edge(
        &self,
        logical: LogicalDriveId,
        physical: PhysicalDriveId,
        capacity: u64,
    ) -> Result<()>;

    /// Fail a physical drive locally (unsupported or incompatible hardware)
    async fn fail_drive(&self, id: PhysicalDriveId, reason: &str) -> Result<()>;

    /// Mark a drive logically offline without failing the hardware
    async fn set_logically_offline(&self, id: PhysicalDriveId, offline: bool) -> Result<()>;

    /// Enumerate every physical drive currently in the ready state
    async fn list_ready_drives(&self) -> Result<Vec<PhysicalDriveId>>;
}
