//! Peer Coordination
//!
//! Exactly one controller runs the reconciler actively; the passive side keeps
//! its queues warm but submits no configuration mutations. Drive kills must
//! reach both sides, since each controller owns its own path to the drive.

use crate::error::Result;
use crate::topology::types::PhysicalDriveId;
use async_trait::async_trait;

/// Active/passive role of this controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerRole {
    Active,
    Passive,
}

/// Coordination with the partner controller.
#[async_trait]
pub trait PeerCoordinator: Send + Sync {
    /// Current role of this controller; may change at failover
    fn role(&self) -> ControllerRole;

    /// Ask the peer to fail its path to a drive we just failed locally
    async fn relay_drive_kill(&self, drive: PhysicalDriveId, reason: &str) -> Result<()>;
}
