//! Movement Dispatch
//!
//! Maps a classified drive to the action that reconciles it: joining the
//! create batch, reinitializing a system logical drive, queueing an edge
//! connect, or rejecting the drive with an operator event. The dispatcher is
//! the only component that submits jobs, and it submits nothing when this
//! controller is passive.

use crate::error::{Error, Result};
use crate::events::{Event, EventKind};
use crate::jobs::{CreateDriveSpec, JobRequest};
use crate::peer::ControllerRole;
use crate::reconciler::classify::{ClassifiedDrive, DriveMovement};
use crate::reconciler::queues::DiscoverItem;
use crate::reconciler::ReconcilerContext;
use crate::topology::types::{
    BlockGeometry, DriveClass, DriveLocation, LinkSpeed, LogicalDriveId, PhysicalDriveInfo,
    SerialNumber,
};
use std::collections::HashSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

// =============================================================================
// Outcome
// =============================================================================

/// What the dispatcher decided for one discover item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A matching record exists; queue the logical drive for edge connect
    Connect(LogicalDriveId),
    /// The drive joined the pending create batch; its record will appear later
    BatchedCreate,
    /// A configuration job was submitted; revisit once the tables catch up
    JobSubmitted,
    /// The drive was rejected; an event explains what the operator must do
    Rejected,
    /// Action is on cooldown or blocked by a concurrent action; retry later
    Deferred,
    /// Passive controller; the active side will act
    SuppressedPassive,
}

/// True while the item's last submitted action is still settling; keeps a
/// queued drive from resubmitting the same job every pass
fn on_cooldown(ctx: &ReconcilerContext, item: &DiscoverItem) -> bool {
    item.last_attempt
        .map(|last| last.elapsed() < ctx.config.reinit_cooldown)
        .unwrap_or(false)
}

/// The classified drive's own user record, when one exists. A reinit against
/// a system slot must orphan it so the serial is not left on two records.
fn stale_user_record(
    ctx: &ReconcilerContext,
    classified: &ClassifiedDrive,
) -> Option<LogicalDriveId> {
    classified
        .record
        .as_ref()
        .map(|r| r.id)
        .filter(|id| !ctx.config.is_system_logical_id(*id))
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Long-lived dispatch state: the create batch, the garbage-collection
/// debounce, and the one-reinit-per-pass guard.
pub struct Dispatcher {
    batch: Vec<CreateDriveSpec>,
    batch_serials: HashSet<SerialNumber>,
    last_gc: Option<Instant>,
    /// System slot whose reinit was submitted this pass, if any
    reinit_this_pass: Option<u32>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            batch: Vec::new(),
            batch_serials: HashSet::new(),
            last_gc: None,
            reinit_this_pass: None,
        }
    }

    /// Reset per-pass state; called at the start of every discover pass
    pub fn begin_pass(&mut self) {
        self.reinit_this_pass = None;
    }

    /// Number of create requests waiting to be flushed
    pub fn pending_creates(&self) -> usize {
        self.batch.len()
    }

    // =========================================================================
    // Pre-classification gates
    // =========================================================================

    /// Reject drives whose hardware class this configuration cannot use.
    /// Returns the rejection reason, or None when the drive is acceptable.
    pub fn unsupported_reason(
        &self,
        ctx: &ReconcilerContext,
        info: &PhysicalDriveInfo,
    ) -> Option<String> {
        if info.link_speed < LinkSpeed::Speed12G && !ctx.config.allow_6g_links {
            return Some(format!("link speed {:?} not allowed", info.link_speed));
        }
        if info.block_geometry == BlockGeometry::Native4k && !ctx.config.native_4k_committed {
            return Some("4K-native geometry not committed on this array".to_string());
        }
        None
    }

    /// Handle an unsupported drive: event, local fail, kill relay to the peer
    pub async fn reject_unsupported(
        &self,
        ctx: &ReconcilerContext,
        info: &PhysicalDriveInfo,
        reason: String,
    ) -> Result<()> {
        warn!(drive = %info.id, location = %info.location, %reason, "unsupported drive rejected");
        ctx.events.record(Event::now(EventKind::UnsupportedDrive {
            serial: info.serial.clone(),
            location: info.location,
            reason: reason.clone(),
        }));
        ctx.topology.fail_drive(info.id, &reason).await?;
        ctx.peer.relay_drive_kill(info.id, &reason).await?;
        Ok(())
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Act on a classified drive. `item` carries the retry timestamp that
    /// drives the reinit cooldown.
    pub async fn dispatch(
        &mut self,
        ctx: &ReconcilerContext,
        item: &mut DiscoverItem,
        info: &PhysicalDriveInfo,
        classified: &ClassifiedDrive,
    ) -> Result<DispatchOutcome> {
        use DriveMovement::*;

        info!(
            drive = %info.id,
            serial = %info.serial,
            location = %info.location,
            movement = ?classified.movement,
            "drive movement resolved"
        );
        ctx.events.record(Event::now(EventKind::MovementResolved {
            serial: info.serial.clone(),
            location: info.location,
            movement: classified.movement,
        }));

        // A record already holding this serial means the create or reinit
        // submitted on an earlier pass has landed; the remaining work is the
        // edge, and resubmitting the job would duplicate the record. The drive
        // still classifies as new or foreign until the connect rewrites its
        // stamp.
        if let Some(logical) = self.landed_record(ctx, info, classified.movement) {
            debug!(drive = %info.id, %logical, "record landed for serial, queueing connect");
            return Ok(DispatchOutcome::Connect(logical));
        }

        // Drives that already have a record connect regardless of role; job
        // submission is what the passive side must not do.
        match classified.movement {
            UnboundUserToUserSlot | BoundUserToUserSlot => {
                let record = classified
                    .record
                    .as_ref()
                    .ok_or_else(|| Error::Internal("user movement without record".into()))?;
                return Ok(DispatchOutcome::Connect(record.id));
            }
            SystemToOriginalSlot => {
                let logical = classified
                    .record
                    .as_ref()
                    .map(|r| r.id)
                    .or_else(|| ctx.config.system_logical_id_for_slot(info.location.slot))
                    .ok_or_else(|| Error::Internal("system slot without logical id".into()))?;
                return Ok(DispatchOutcome::Connect(logical));
            }
            _ => {}
        }

        if ctx.peer.role() == ControllerRole::Passive {
            debug!(drive = %info.id, "passive controller, deferring to active side");
            return Ok(DispatchOutcome::SuppressedPassive);
        }

        match classified.movement {
            NewDriveToUserSlot | ForeignUserToUserSlot | ForeignSystemToUserSlot => {
                if on_cooldown(ctx, item) {
                    return Ok(DispatchOutcome::Deferred);
                }
                if let Some(seed) = classified.foreign_wwn_seed {
                    ctx.events.record(Event::now(EventKind::CrossArrayImport {
                        serial: info.serial.clone(),
                        location: info.location,
                        foreign_wwn_seed: seed,
                    }));
                }
                let outcome = self.batch_create(ctx, info).await?;
                item.last_attempt = Some(Instant::now());
                Ok(outcome)
            }

            NewDriveToSystemSlot | ForeignSystemToSystemSlot | UnboundUserToSystemSlot
            | ForeignUserToSystemSlot => {
                if let Some(seed) = classified.foreign_wwn_seed {
                    ctx.events.record(Event::now(EventKind::CrossArrayImport {
                        serial: info.serial.clone(),
                        location: info.location,
                        foreign_wwn_seed: seed,
                    }));
                }
                let stale = stale_user_record(ctx, classified);
                self.reinit_system_drive(ctx, item, info, stale).await
            }

            BoundUserToSystemSlot => {
                if item.flags.force_online() {
                    let stale = stale_user_record(ctx, classified);
                    self.reinit_system_drive(ctx, item, info, stale).await
                } else {
                    self.reject_wrong_slot(ctx, info, classified.correct_slot);
                    Ok(DispatchOutcome::Rejected)
                }
            }

            SystemToUserSlot => {
                if item.flags.force_online() {
                    if on_cooldown(ctx, item) {
                        return Ok(DispatchOutcome::Deferred);
                    }
                    let outcome = self.orphan_and_recreate(ctx, info).await?;
                    item.last_attempt = Some(Instant::now());
                    Ok(outcome)
                } else {
                    self.reject_wrong_slot(ctx, info, classified.correct_slot);
                    Ok(DispatchOutcome::Rejected)
                }
            }

            // Never auto-fixed; two system drives swapped is a situation only
            // an operator can untangle safely.
            SystemToAnotherSystemSlot => {
                self.reject_wrong_slot(ctx, info, classified.correct_slot);
                ctx.events
                    .record(Event::now(EventKind::OperatorActionRequired {
                        location: info.location,
                        detail: format!(
                            "system drive {} is in system slot {} but belongs in {}",
                            info.serial,
                            info.location,
                            classified
                                .correct_slot
                                .map(|s| s.to_string())
                                .unwrap_or_else(|| "unknown".to_string()),
                        ),
                    }));
                Ok(DispatchOutcome::Rejected)
            }

            UnboundUserToUserSlot | BoundUserToUserSlot | SystemToOriginalSlot => unreachable!(),
        }
    }

    /// The logical drive to connect when an earlier create or reinit for this
    /// serial has already landed in the tables. Only movements that would
    /// otherwise submit a job resolve this way; a reinit counts as landed only
    /// when the slot's own reserved id holds the serial.
    fn landed_record(
        &self,
        ctx: &ReconcilerContext,
        info: &PhysicalDriveInfo,
        movement: DriveMovement,
    ) -> Option<LogicalDriveId> {
        use DriveMovement::*;
        match movement {
            NewDriveToUserSlot | ForeignUserToUserSlot | ForeignSystemToUserSlot => {
                ctx.tables.lookup_by_serial(&info.serial).map(|r| r.id)
            }
            NewDriveToSystemSlot | ForeignUserToSystemSlot | ForeignSystemToSystemSlot => ctx
                .tables
                .lookup_by_serial(&info.serial)
                .map(|r| r.id)
                .filter(|id| {
                    ctx.config.system_logical_id_for_slot(info.location.slot) == Some(*id)
                }),
            _ => None,
        }
    }

    // =========================================================================
    // Actions
    // =========================================================================

    /// Add the drive to the pending create batch, flushing when full
    async fn batch_create(
        &mut self,
        ctx: &ReconcilerContext,
        info: &PhysicalDriveInfo,
    ) -> Result<DispatchOutcome> {
        if self.batch_serials.contains(&info.serial) {
            debug!(serial = %info.serial, "create already pending for serial");
            return Ok(DispatchOutcome::BatchedCreate);
        }
        if let Some(record) = ctx.tables.lookup_by_serial(&info.serial) {
            debug!(serial = %info.serial, logical = %record.id, "record already exists for serial");
            return Ok(DispatchOutcome::Connect(record.id));
        }

        let occupied = ctx.tables.drive_record_count() + self.batch.len();
        if occupied >= ctx.config.platform_drive_limit {
            self.maybe_garbage_collect(ctx).await?;
            return Err(Error::DriveLimitReached {
                limit: ctx.config.platform_drive_limit,
            });
        }

        self.batch_serials.insert(info.serial.clone());
        self.batch.push(CreateDriveSpec::new(
            info.serial.clone(),
            info.location,
            info.capacity,
            info.block_geometry,
        ));
        debug!(serial = %info.serial, pending = self.batch.len(), "drive joined create batch");

        if self.batch.len() >= ctx.config.create_batch_limit {
            self.flush(ctx).await?;
        }
        Ok(DispatchOutcome::BatchedCreate)
    }

    /// Submit any pending create batch; called when full and at pass end.
    /// Returns the number of create requests submitted.
    pub async fn flush(&mut self, ctx: &ReconcilerContext) -> Result<usize> {
        if self.batch.is_empty() {
            return Ok(0);
        }
        let specs = std::mem::take(&mut self.batch);
        self.batch_serials.clear();
        let count = specs.len();
        let job = ctx.jobs.submit(JobRequest::CreateDrives(specs)).await?;
        info!(%job, count, "create batch submitted");
        Ok(count)
    }

    /// Reinitialize the system logical drive owning this slot against the
    /// replacement drive. Gated on drive class, the per-item cooldown, and a
    /// one-reinit-per-pass limit. A stale user record still holding the
    /// drive's serial is orphaned first so the serial ends up on exactly one
    /// record.
    async fn reinit_system_drive(
        &mut self,
        ctx: &ReconcilerContext,
        item: &mut DiscoverItem,
        info: &PhysicalDriveInfo,
        stale_record: Option<LogicalDriveId>,
    ) -> Result<DispatchOutcome> {
        // Slow media cannot back the system drives
        if info.drive_class <= DriveClass::NearLine {
            warn!(drive = %info.id, class = ?info.drive_class, "drive class too slow for a system slot");
            ctx.topology
                .fail_drive(info.id, "drive class incompatible with system slot")
                .await?;
            ctx.peer
                .relay_drive_kill(info.id, "drive class incompatible with system slot")
                .await?;
            ctx.events.record(Event::now(EventKind::DriveKilled {
                drive: info.id,
                location: info.location,
                drive_class: info.drive_class,
            }));
            return Ok(DispatchOutcome::Rejected);
        }

        let logical = ctx
            .config
            .system_logical_id_for_slot(info.location.slot)
            .ok_or_else(|| Error::Internal("reinit outside system slot range".into()))?;

        if on_cooldown(ctx, item) {
            debug!(drive = %info.id, "reinit on cooldown");
            return Ok(DispatchOutcome::Deferred);
        }

        // Losing several system drives at once is not a replacement scenario;
        // refuse to rebuild identity wholesale and page the operator instead.
        if let Some(slot) = self.reinit_this_pass {
            if slot != info.location.slot {
                warn!(
                    slot_a = slot,
                    slot_b = info.location.slot,
                    "multiple system slots need reinitialization, refusing automatic recovery"
                );
                ctx.events
                    .record(Event::now(EventKind::OperatorActionRequired {
                        location: info.location,
                        detail: "multiple system drives invalid at once; manual recovery required"
                            .to_string(),
                    }));
                return Ok(DispatchOutcome::Deferred);
            }
        }

        if let Some(stale) = stale_record {
            let job = ctx
                .jobs
                .submit(JobRequest::UpdateSerial {
                    logical: stale,
                    serial: SerialNumber::new(""),
                })
                .await?;
            info!(%job, %stale, drive = %info.id, "stale user record orphaned before reinitialization");
        }

        let job = ctx
            .jobs
            .submit(JobRequest::ReinitSystemDrive {
                logical,
                physical: info.id,
                serial: info.serial.clone(),
            })
            .await?;
        info!(%job, %logical, drive = %info.id, "system drive reinitialization submitted");
        self.reinit_this_pass = Some(info.location.slot);
        item.last_attempt = Some(Instant::now());
        Ok(DispatchOutcome::JobSubmitted)
    }

    /// Force-online path for a system drive demoted to a user slot: orphan the
    /// stale system record by zeroing its serial, then recreate the drive as a
    /// plain user drive.
    async fn orphan_and_recreate(
        &mut self,
        ctx: &ReconcilerContext,
        info: &PhysicalDriveInfo,
    ) -> Result<DispatchOutcome> {
        let original_slot = ctx
            .descriptor
            .original_slot_for(&info.serial)
            .ok_or_else(|| Error::Internal("system drive without original slot".into()))?;
        let logical = ctx
            .config
            .system_logical_id_for_slot(original_slot)
            .ok_or_else(|| Error::Internal("original slot outside system range".into()))?;

        let job = ctx
            .jobs
            .submit(JobRequest::UpdateSerial {
                logical,
                serial: SerialNumber::new(""),
            })
            .await?;
        info!(%job, %logical, drive = %info.id, "stale system identity cleared for forced demotion");

        self.batch_create(ctx, info).await?;
        Ok(DispatchOutcome::JobSubmitted)
    }

    fn reject_wrong_slot(
        &self,
        ctx: &ReconcilerContext,
        info: &PhysicalDriveInfo,
        correct_slot: Option<DriveLocation>,
    ) {
        let correct_slot = correct_slot.unwrap_or(info.location);
        warn!(
            drive = %info.id,
            serial = %info.serial,
            location = %info.location,
            correct = %correct_slot,
            "drive rejected, wrong slot"
        );
        ctx.events.record(Event::now(EventKind::DriveInWrongSlot {
            serial: info.serial.clone(),
            location: info.location,
            correct_slot,
        }));
    }

    /// Reclaim records for departed, unconsumed drives; debounced so limit
    /// pressure cannot flood the job service
    async fn maybe_garbage_collect(&mut self, ctx: &ReconcilerContext) -> Result<()> {
        if let Some(last) = self.last_gc {
            if last.elapsed() < ctx.config.gc_debounce {
                return Ok(());
            }
        }
        self.last_gc = Some(Instant::now());
        let job = ctx.jobs.submit(JobRequest::DestroyUnconsumed).await?;
        info!(%job, "garbage collection of unconsumed drive records requested");
        Ok(())
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconcilerConfig;
    use crate::peer::ControllerRole;
    use crate::sim::{SimCluster, SimJobService};
    use crate::topology::tables::{DriveConfigType, LogicalDriveRecord};
    use crate::topology::types::{
        BlockGeometry, DriveClass, LinkSpeed, PhysicalDriveId, SystemDescriptor,
    };
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn make_info(id: u32, slot: u32, serial: &str) -> PhysicalDriveInfo {
        PhysicalDriveInfo {
            id: PhysicalDriveId(id),
            location: DriveLocation::new(1, 0, slot),
            serial: serial.into(),
            capacity: 0x1000,
            block_geometry: BlockGeometry::Native512,
            drive_class: DriveClass::Sas10k,
            link_speed: LinkSpeed::Speed12G,
            maintenance_mode: false,
        }
    }

    fn make_ctx(cluster: &SimCluster, config: ReconcilerConfig) -> ReconcilerContext {
        cluster.context(config, SystemDescriptor::new(0xA1, vec![]))
    }

    #[tokio::test]
    async fn test_duplicate_serial_joins_batch_once() {
        let cluster = SimCluster::new(ControllerRole::Active);
        let ctx = make_ctx(&cluster, ReconcilerConfig::default());
        let mut dispatcher = Dispatcher::new();

        dispatcher
            .batch_create(&ctx, &make_info(1, 1, "DUP"))
            .await
            .unwrap();
        dispatcher
            .batch_create(&ctx, &make_info(2, 2, "DUP"))
            .await
            .unwrap();
        assert_eq!(dispatcher.pending_creates(), 1);
    }

    #[tokio::test]
    async fn test_batch_flushes_when_full() {
        let cluster = SimCluster::new(ControllerRole::Active);
        let config = ReconcilerConfig {
            create_batch_limit: 2,
            ..ReconcilerConfig::default()
        };
        let ctx = make_ctx(&cluster, config);
        let mut dispatcher = Dispatcher::new();

        dispatcher
            .batch_create(&ctx, &make_info(1, 1, "A"))
            .await
            .unwrap();
        assert_eq!(dispatcher.pending_creates(), 1);
        dispatcher
            .batch_create(&ctx, &make_info(2, 2, "B"))
            .await
            .unwrap();

        assert_eq!(dispatcher.pending_creates(), 0);
        let submitted = cluster.jobs.submitted();
        assert_eq!(submitted.len(), 1);
        assert_matches!(&submitted[0], JobRequest::CreateDrives(specs) if specs.len() == 2);
    }

    #[tokio::test]
    async fn test_drive_limit_triggers_debounced_gc() {
        let cluster = SimCluster::new(ControllerRole::Active);
        cluster.tables.insert(LogicalDriveRecord {
            id: crate::topology::types::LogicalDriveId(200),
            serial: "OLD".into(),
            config_type: DriveConfigType::Unconsumed,
            location: DriveLocation::new(2, 0, 0),
            capacity: 0x1000,
        });
        let jobs = Arc::new(SimJobService::recording_only(
            Arc::clone(&cluster.tables),
            Arc::clone(&cluster.topology),
        ));
        let config = ReconcilerConfig {
            platform_drive_limit: 1,
            ..ReconcilerConfig::default()
        };
        let mut ctx = make_ctx(&cluster, config);
        ctx.jobs = jobs.clone();
        let mut dispatcher = Dispatcher::new();

        let err = dispatcher
            .batch_create(&ctx, &make_info(1, 1, "NEW"))
            .await
            .unwrap_err();
        assert_matches!(err, Error::DriveLimitReached { limit: 1 });
        assert_eq!(jobs.submitted(), vec![JobRequest::DestroyUnconsumed]);

        // a second hit inside the debounce window submits nothing more
        let _ = dispatcher
            .batch_create(&ctx, &make_info(1, 1, "NEW"))
            .await
            .unwrap_err();
        assert_eq!(jobs.submitted().len(), 1);
    }
}
