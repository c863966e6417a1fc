//! Identity Store
//!
//! Access to the stamp region of physical drives. Reads can fail transiently
//! when the drive is inaccessible; the worker requeues the item in that case.

use crate::error::Result;
use crate::identity::stamp::{IdentityStamp, StampRead};
use crate::topology::types::PhysicalDriveId;
use async_trait::async_trait;

/// Reads and writes the per-drive identity stamp region.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Read and decode the stamp region of a drive
    async fn read_stamp(&self, drive: PhysicalDriveId) -> Result<StampRead>;

    /// Write a stamp record to a drive, replacing whatever was there
    async fn write_stamp(&self, drive: PhysicalDriveId, stamp: &IdentityStamp) -> Result<()>;
}
