//! Edge Connector
//!
//! Drives one logical drive toward a connected downstream edge. Connecting is
//! idempotent: an already-enabled edge and a concurrently-deleted record both
//! count as completed work. The identity stamp is written after a successful
//! attach, on the active side only, and only when the on-drive record is
//! missing or stale.

use crate::error::{Error, Result};
use crate::events::{Event, EventKind};
use crate::identity::stamp::{IdentityStamp, StampRead};
use crate::peer::ControllerRole;
use crate::reconciler::ReconcilerContext;
use crate::topology::types::{EdgeState, LogicalDriveId};
use tracing::{debug, info};

/// Result of one connect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Edge attached this pass
    Connected,
    /// Edge was already enabled; nothing to do
    AlreadyConnected,
    /// The record no longer exists; someone destroyed it while we held the item
    RecordGone,
    /// The matching physical drive is not present; wait for it
    DriveAbsent,
    /// The drive sits in a slot class the record forbids; not connectable
    Rejected,
}

impl ConnectOutcome {
    /// True when the item is finished and its ticket can be released
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConnectOutcome::DriveAbsent)
    }
}

/// Check whether a connect item can be retired without touching hardware:
/// record gone or edge already up.
pub async fn fast_connect(ctx: &ReconcilerContext, logical: LogicalDriveId) -> Result<Option<ConnectOutcome>> {
    if ctx.tables.lookup_by_id(logical).is_none() {
        debug!(%logical, "record deleted while queued, treating as complete");
        return Ok(Some(ConnectOutcome::RecordGone));
    }
    if ctx.topology.edge_state(logical).await? == EdgeState::Enabled {
        return Ok(Some(ConnectOutcome::AlreadyConnected));
    }
    Ok(None)
}

/// Full connect: locate the drive by serial, validate placement, attach the
/// edge, then bring the stamp up to date.
pub async fn connect(ctx: &ReconcilerContext, logical: LogicalDriveId) -> Result<ConnectOutcome> {
    if let Some(outcome) = fast_connect(ctx, logical).await? {
        return Ok(outcome);
    }
    let record = ctx
        .tables
        .lookup_by_id(logical)
        .ok_or(Error::RecordNotFound(logical))?;

    let physical = match ctx.topology.find_by_serial(&record.serial).await? {
        Some(id) => id,
        None => {
            debug!(%logical, serial = %record.serial, "drive not present yet");
            return Ok(ConnectOutcome::DriveAbsent);
        }
    };
    let info = ctx.topology.drive_info(physical).await?;

    // A persisted record may only reconnect to a drive sitting in the same
    // slot class it was created against.
    let record_is_system = record.location.is_system_slot(ctx.config.system_slot_count);
    let drive_is_system = info.location.is_system_slot(ctx.config.system_slot_count);
    if record_is_system != drive_is_system {
        ctx.events.record(Event::now(EventKind::DriveInWrongSlot {
            serial: record.serial.clone(),
            location: info.location,
            correct_slot: record.location,
        }));
        return Ok(ConnectOutcome::Rejected);
    }

    ctx.topology
        .attach_edge(logical, physical, record.capacity)
        .await?;
    info!(%logical, drive = %physical, location = %info.location, "edge connected");

    if ctx.peer.role() == ControllerRole::Active {
        refresh_stamp(ctx, &info).await?;
    }
    Ok(ConnectOutcome::Connected)
}

/// Rewrite the on-drive stamp when it is missing, foreign, or records a slot
/// the drive no longer occupies
async fn refresh_stamp(
    ctx: &ReconcilerContext,
    info: &crate::topology::types::PhysicalDriveInfo,
) -> Result<()> {
    let needs_write = match ctx.identity.read_stamp(info.id).await? {
        StampRead::Valid(stamp) => {
            !stamp.belongs_to(ctx.descriptor.array_wwn_seed) || stamp.location != info.location
        }
        StampRead::Uninitialized | StampRead::Invalid => true,
    };
    if needs_write {
        let stamp = IdentityStamp::new(ctx.descriptor.array_wwn_seed, info.location);
        ctx.identity.write_stamp(info.id, &stamp).await?;
        debug!(drive = %info.id, location = %info.location, "identity stamp refreshed");
    }
    Ok(())
}
