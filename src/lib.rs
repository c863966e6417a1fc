//! # Homewrecker
//!
//! Drive identity, classification and connection reconciliation for
//! dual-controller block arrays.
//!
//! When a drive shows up in a slot, the engine works out what its presence
//! means: a factory-fresh drive, a drive from another array, one of our own
//! user drives moved around, or a system drive somewhere it should not be.
//! Each scenario maps to an action that converges the configuration tables
//! and the object topology on reality, without ever destroying data the
//! operator did not ask to lose.
//!
//! ## Architecture
//!
//! ```text
//! hardware notifications
//!         |
//!         v
//!   +-----------+     +----------------+     +------------+
//!   | ingestion | --> | discover queue | --> | classifier |
//!   +-----------+     +----------------+     +------------+
//!                             |                    |
//!                             v                    v
//!                     +---------------+     +------------+
//!                     | connect queue | <-- | dispatcher | --> jobs, events
//!                     +---------------+     +------------+
//!                             |
//!                             v
//!                     +-----------+
//!                     | connector | --> edges, identity stamps
//!                     +-----------+
//! ```
//!
//! Both queues draw from one fixed pool and are serviced by a single worker
//! task; all mutations of array configuration go through the job service, and
//! only on the active controller.

pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod jobs;
pub mod peer;
pub mod reconciler;
pub mod sim;
pub mod topology;

pub use config::ReconcilerConfig;
pub use error::{Error, ErrorAction, Result};
pub use reconciler::{
    classify, ClassifiedDrive, DriveMovement, DriveOriginalType, LifecycleEvent, Reconciler,
    ReconcilerContext, SlotType,
};
pub use topology::types::{
    DriveLocation, LifecycleState, LogicalDriveId, PhysicalDriveId, ProcessFlags, SerialNumber,
    SystemDescriptor,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
