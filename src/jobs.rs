//! Job Service
//!
//! Configuration mutations never happen inline in the worker; they are
//! submitted as jobs to the array's transactional job service and take effect
//! asynchronously. The reconciler observes the result through updated
//! configuration tables on a later pass.

use crate::error::Result;
use crate::topology::types::{
    BlockGeometry, DriveLocation, LogicalDriveId, PhysicalDriveId, SerialNumber,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job:{}", self.0)
    }
}

/// One drive in a batched create request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDriveSpec {
    pub serial: SerialNumber,
    pub location: DriveLocation,
    pub capacity: u64,
    pub block_geometry: BlockGeometry,
    /// New records start sniff-verify enabled and unconsumed
    pub sniff_enabled: bool,
}

impl CreateDriveSpec {
    pub fn new(
        serial: SerialNumber,
        location: DriveLocation,
        capacity: u64,
        block_geometry: BlockGeometry,
    ) -> Self {
        Self {
            serial,
            location,
            capacity,
            block_geometry,
            sniff_enabled: true,
        }
    }
}

/// Requests the reconciler submits to the job service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobRequest {
    /// Create logical drive records for a batch of newly accepted drives
    CreateDrives(Vec<CreateDriveSpec>),
    /// Reinitialize a reserved system logical drive against a replacement
    ReinitSystemDrive {
        logical: LogicalDriveId,
        physical: PhysicalDriveId,
        serial: SerialNumber,
    },
    /// Rewrite the serial recorded on a logical drive (zeroed to orphan it)
    UpdateSerial {
        logical: LogicalDriveId,
        serial: SerialNumber,
    },
    /// Destroy unconsumed logical drive records whose drives have departed
    DestroyUnconsumed,
}

/// Transactional configuration-mutation service.
#[async_trait]
pub trait JobService: Send + Sync {
    /// Submit a job; returns once the job is queued, not once it completes
    async fn submit(&self, request: JobRequest) -> Result<JobId>;
}
