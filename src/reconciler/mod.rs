//! The Reconciliation Engine
//!
//! Turns hardware notifications into configuration state: discovers drives,
//! classifies what their presence means, and drives every logical drive toward
//! a connected downstream edge. All collaborators are passed in explicitly
//! through [`ReconcilerContext`]; the engine holds no global state.

pub mod classify;
pub mod connector;
pub mod dispatch;
pub mod ingest;
pub mod pool;
pub mod queues;
pub mod worker;

use crate::config::ReconcilerConfig;
use crate::events::EventLog;
use crate::identity::store::IdentityStore;
use crate::jobs::JobService;
use crate::peer::PeerCoordinator;
use crate::topology::tables::{ConfigSnapshot, DriveTopology};
use crate::topology::types::SystemDescriptor;
use std::sync::Arc;

pub use classify::{classify, ClassifiedDrive, DriveMovement, DriveOriginalType, SlotType};
pub use ingest::LifecycleEvent;
pub use worker::Reconciler;

/// Everything the engine needs, wired explicitly at construction.
#[derive(Clone)]
pub struct ReconcilerContext {
    pub config: ReconcilerConfig,
    /// This array's identity and system-drive serials
    pub descriptor: SystemDescriptor,
    pub identity: Arc<dyn IdentityStore>,
    pub topology: Arc<dyn DriveTopology>,
    pub tables: Arc<dyn ConfigSnapshot>,
    pub jobs: Arc<dyn JobService>,
    pub events: Arc<dyn EventLog>,
    pub peer: Arc<dyn PeerCoordinator>,
}
