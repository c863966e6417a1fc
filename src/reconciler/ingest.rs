//! Notification Ingestion
//!
//! The hardware layer pushes lifecycle events into a bounded channel instead
//! of calling into the engine; this task drains the channel and feeds the
//! discover queue. Backpressure on the channel bounds a notification storm
//! before it ever reaches the queues.

use crate::reconciler::worker::Reconciler;
use crate::topology::types::{LifecycleState, PhysicalDriveId, ProcessFlags};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// A drive lifecycle notification from the hardware layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub drive: PhysicalDriveId,
    pub state: LifecycleState,
    #[serde(default)]
    pub flags: ProcessFlags,
}

impl LifecycleEvent {
    pub fn ready(drive: PhysicalDriveId) -> Self {
        Self {
            drive,
            state: LifecycleState::Ready,
            flags: ProcessFlags::NORMAL,
        }
    }
}

/// Drain lifecycle events into the engine until the channel closes
pub async fn run_ingest(engine: Arc<Reconciler>, mut rx: mpsc::Receiver<LifecycleEvent>) {
    info!("notification ingestion started");
    while let Some(event) = rx.recv().await {
        if let Err(e) = engine.enqueue_discovery(event.drive, event.state, event.flags) {
            // pool exhaustion here means a storm; the drive will be picked up
            // by a rescan or its next notification
            warn!(drive = %event.drive, error = %e, "discovery notification dropped");
        }
    }
    info!("notification ingestion stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconcilerConfig;
    use crate::peer::ControllerRole;
    use crate::reconciler::Reconciler;
    use crate::sim::SimCluster;
    use crate::topology::types::SystemDescriptor;

    #[tokio::test]
    async fn test_ingest_drains_channel_into_queue() {
        let cluster = SimCluster::new(ControllerRole::Active);
        let engine = Reconciler::new(
            cluster.context(ReconcilerConfig::default(), SystemDescriptor::default()),
        );
        let (tx, rx) = mpsc::channel(8);

        tx.send(LifecycleEvent::ready(PhysicalDriveId(1))).await.unwrap();
        tx.send(LifecycleEvent::ready(PhysicalDriveId(2))).await.unwrap();
        // duplicate notification merges into the existing entry
        tx.send(LifecycleEvent::ready(PhysicalDriveId(1))).await.unwrap();
        drop(tx);

        run_ingest(Arc::clone(&engine), rx).await;
        assert_eq!(engine.queue_depths().0, 2);
    }
}
