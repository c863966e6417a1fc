//! Topology: drive identifiers, locations and configuration tables
//!
//! This module owns the shared vocabulary of the engine (ids, locations,
//! drive descriptors) and the read-side view of the array's configuration
//! tables that the classifier consults.

pub mod tables;
pub mod types;

pub use tables::{ConfigSnapshot, DriveConfigType, DriveTopology, LogicalDriveRecord};
pub use types::{
    BlockGeometry, DriveClass, DriveLocation, EdgeState, LifecycleState, LinkSpeed,
    LogicalDriveId, PhysicalDriveId, PhysicalDriveInfo, ProcessFlags, SerialNumber,
    SystemDescriptor,
};
