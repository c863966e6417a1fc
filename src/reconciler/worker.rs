//! Worker Loop
//!
//! One dedicated task services both queues. Each wake runs rounds of three
//! passes: fast-connect retires trivially-completable connect items, connect
//! does the full edge work, and discover classifies and dispatches. A
//! transient failure requeues the item and ends the pass; the next wake tries
//! again. Rounds repeat while items are actually being retired, then the
//! worker sleeps on the wake signal with a bounded timeout so a lost wake can
//! never stall the engine.

use crate::error::{ErrorAction, Result};
use crate::reconciler::classify::classify;
use crate::reconciler::connector::{self, ConnectOutcome};
use crate::reconciler::dispatch::{DispatchOutcome, Dispatcher};
use crate::reconciler::queues::{DiscoverItem, QueueSet};
use crate::reconciler::ReconcilerContext;
use crate::topology::types::{LifecycleState, LogicalDriveId, PhysicalDriveId, ProcessFlags};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What processing decided for one popped item
enum ItemResult {
    /// Finished; release the ticket
    Done,
    /// Keep the item queued; `acted` is true when something externally
    /// visible happened, so another round is worth running
    Retry { acted: bool },
}

/// Outcome of one pass over a queue
#[derive(Debug, Clone, Copy)]
struct PassReport {
    /// At least one item was retired or a job went out
    progressed: bool,
    /// A transient failure ended the pass; stop working until the next wake
    interrupted: bool,
}

impl PassReport {
    fn idle() -> Self {
        Self {
            progressed: false,
            interrupted: false,
        }
    }
}

/// The reconciliation engine: queues, wake signal and worker lifecycle.
pub struct Reconciler {
    ctx: ReconcilerContext,
    queues: Mutex<QueueSet>,
    wake: Semaphore,
    stopping: AtomicBool,
}

impl Reconciler {
    pub fn new(ctx: ReconcilerContext) -> Arc<Self> {
        let pool_capacity = ctx.config.pool_capacity;
        Arc::new(Self {
            ctx,
            queues: Mutex::new(QueueSet::new(pool_capacity)),
            wake: Semaphore::new(0),
            stopping: AtomicBool::new(false),
        })
    }

    // =========================================================================
    // Public surface
    // =========================================================================

    /// Record a drive lifecycle notification. Constant-time: merges into any
    /// existing entry and signals the worker.
    pub fn enqueue_discovery(
        &self,
        drive: PhysicalDriveId,
        state: LifecycleState,
        flags: ProcessFlags,
    ) -> Result<()> {
        let new_entry = self.queues.lock().enqueue_discover(drive, state, flags)?;
        debug!(%drive, ?state, new_entry, "discovery queued");
        self.signal();
        Ok(())
    }

    /// Queue a logical drive for edge connection
    pub fn enqueue_connect(&self, logical: LogicalDriveId) -> Result<()> {
        let new_entry = self.queues.lock().enqueue_connect(logical)?;
        debug!(%logical, new_entry, "connect queued");
        self.signal();
        Ok(())
    }

    /// True if a connect is pending for this logical drive
    pub fn is_drive_pending_connect(&self, logical: LogicalDriveId) -> bool {
        self.queues.lock().is_drive_pending_connect(logical)
    }

    /// Enqueue every currently-ready drive; the boot-path sweep
    pub async fn rescan(&self) -> Result<()> {
        let drives = self.ctx.topology.list_ready_drives().await?;
        info!(count = drives.len(), "rescanning ready drives");
        for drive in drives {
            self.enqueue_discovery(drive, LifecycleState::Ready, ProcessFlags::NORMAL)?;
        }
        Ok(())
    }

    /// Spawn the worker task
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run().await })
    }

    /// Ask the worker to finish its current pass and exit
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.wake.add_permits(1);
    }

    /// Depth of the two queues, (discover, connect)
    pub fn queue_depths(&self) -> (usize, usize) {
        let q = self.queues.lock();
        (q.discover_len(), q.connect_len())
    }

    fn signal(&self) {
        // one pending permit is enough; the worker drains all work per wake
        if self.wake.available_permits() == 0 {
            self.wake.add_permits(1);
        }
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Worker loop
    // =========================================================================

    async fn run(&self) {
        info!("reconciliation worker started");
        let mut dispatcher = Dispatcher::new();
        while !self.is_stopping() {
            // bounded wait; a missed signal costs at most one timeout
            let waited =
                tokio::time::timeout(self.ctx.config.wake_timeout, self.wake.acquire()).await;
            if let Ok(Ok(permit)) = waited {
                permit.forget();
            }
            if self.is_stopping() {
                break;
            }
            self.run_rounds(&mut dispatcher).await;
        }
        info!("reconciliation worker stopped");
    }

    /// Run rounds of the three passes until nothing moves, shutdown is
    /// requested, or a transient failure asks for a break. The break ends the
    /// whole wake-up, not just one pass; conditions may clear by the next one.
    async fn run_rounds(&self, dispatcher: &mut Dispatcher) {
        loop {
            let fast = self.fast_connect_pass().await;
            if fast.interrupted {
                break;
            }
            let connect = self.connect_pass().await;
            if connect.interrupted {
                break;
            }
            let discover = self.discover_pass(dispatcher).await;
            let progressed = fast.progressed || connect.progressed || discover.progressed;
            if discover.interrupted || !progressed || self.is_stopping() {
                break;
            }
        }
    }

    // =========================================================================
    // Passes
    // =========================================================================

    /// Retire connect items that need no hardware work
    async fn fast_connect_pass(&self) -> PassReport {
        let mut cursor: Option<LogicalDriveId> = None;
        let mut report = PassReport::idle();
        loop {
            let popped = {
                let mut q = self.queues.lock();
                match cursor {
                    None => q.pop_connect(),
                    Some(c) => q.pop_connect_after(c),
                }
            };
            let Some(item) = popped else {
                break;
            };
            cursor = Some(item.logical);
            match connector::fast_connect(&self.ctx, item.logical).await {
                Ok(Some(outcome)) => {
                    debug!(logical = %item.logical, ?outcome, "fast-connect retired item");
                    self.queues.lock().release(item.into_ticket());
                    report.progressed = true;
                }
                Ok(None) => {
                    self.queues.lock().requeue_connect(item);
                }
                Err(e) => {
                    if self.handle_connect_error(item, e) {
                        report.progressed = true;
                    } else {
                        report.interrupted = true;
                        break;
                    }
                }
            }
        }
        report
    }

    /// Full connect pass
    async fn connect_pass(&self) -> PassReport {
        let mut cursor: Option<LogicalDriveId> = None;
        let mut report = PassReport::idle();
        loop {
            let popped = {
                let mut q = self.queues.lock();
                match cursor {
                    None => q.pop_connect(),
                    Some(c) => q.pop_connect_after(c),
                }
            };
            let Some(item) = popped else {
                break;
            };
            cursor = Some(item.logical);
            match connector::connect(&self.ctx, item.logical).await {
                Ok(outcome) if outcome.is_terminal() => {
                    if outcome != ConnectOutcome::AlreadyConnected {
                        debug!(logical = %item.logical, ?outcome, "connect item finished");
                    }
                    self.queues.lock().release(item.into_ticket());
                    report.progressed = true;
                }
                Ok(_) => {
                    self.queues.lock().requeue_connect(item);
                }
                Err(e) => {
                    if self.handle_connect_error(item, e) {
                        report.progressed = true;
                    } else {
                        report.interrupted = true;
                        break;
                    }
                }
            }
        }
        report
    }

    /// Classify and dispatch discover items, flushing the create batch at the
    /// end of the pass
    async fn discover_pass(&self, dispatcher: &mut Dispatcher) -> PassReport {
        dispatcher.begin_pass();
        let mut cursor: Option<PhysicalDriveId> = None;
        let mut report = PassReport::idle();
        loop {
            let popped = {
                let mut q = self.queues.lock();
                match cursor {
                    None => q.pop_discover(),
                    Some(c) => q.pop_discover_after(c),
                }
            };
            let Some(mut item) = popped else {
                break;
            };
            cursor = Some(item.drive);
            match self.process_discover(dispatcher, &mut item).await {
                Ok(ItemResult::Done) => {
                    self.queues.lock().release(item.into_ticket());
                    report.progressed = true;
                }
                Ok(ItemResult::Retry { acted }) => {
                    self.queues.lock().requeue_discover(item);
                    report.progressed |= acted;
                }
                Err(e) => match e.action() {
                    ErrorAction::Requeue => {
                        // take a break; conditions may clear by the next wake
                        warn!(drive = %item.drive, error = %e, "discover pass interrupted");
                        self.queues.lock().requeue_discover(item);
                        report.interrupted = true;
                        break;
                    }
                    ErrorAction::DropItem => {
                        error!(drive = %item.drive, error = %e, "dropping undiscoverable drive");
                        self.queues.lock().release(item.into_ticket());
                        report.progressed = true;
                    }
                },
            }
        }
        match dispatcher.flush(&self.ctx).await {
            Ok(flushed) => report.progressed |= flushed > 0,
            Err(e) => warn!(error = %e, "create batch flush failed, will retry"),
        }
        report
    }

    /// Process one discover item end to end
    async fn process_discover(
        &self,
        dispatcher: &mut Dispatcher,
        item: &mut DiscoverItem,
    ) -> Result<ItemResult> {
        if item.state == LifecycleState::Specializing {
            return Ok(ItemResult::Retry { acted: false });
        }

        let info = match self.ctx.topology.drive_info(item.drive).await {
            Ok(info) => info,
            Err(crate::error::Error::DriveNotPresent(_)) => {
                // pulled before we got to it
                debug!(drive = %item.drive, "drive departed while queued");
                return Ok(ItemResult::Done);
            }
            Err(e) => return Err(e),
        };

        if info.maintenance_mode {
            self.ctx.topology.set_logically_offline(item.drive, true).await?;
            return Ok(ItemResult::Retry { acted: false });
        }

        if let Some(reason) = dispatcher.unsupported_reason(&self.ctx, &info) {
            dispatcher.reject_unsupported(&self.ctx, &info, reason).await?;
            return Ok(ItemResult::Done);
        }

        let stamp = self.ctx.identity.read_stamp(item.drive).await?;
        let classified = classify(
            &stamp,
            &info.serial,
            info.location,
            &self.ctx.descriptor,
            self.ctx.tables.as_ref(),
            &self.ctx.config,
        );

        match dispatcher.dispatch(&self.ctx, item, &info, &classified).await? {
            DispatchOutcome::Connect(logical) => {
                self.queues.lock().enqueue_connect(logical)?;
                Ok(ItemResult::Done)
            }
            DispatchOutcome::Rejected => Ok(ItemResult::Done),
            DispatchOutcome::BatchedCreate | DispatchOutcome::JobSubmitted => {
                Ok(ItemResult::Retry { acted: true })
            }
            DispatchOutcome::Deferred | DispatchOutcome::SuppressedPassive => {
                Ok(ItemResult::Retry { acted: false })
            }
        }
    }

    /// Connect-pass error handling; returns true when the item was retired
    /// (structural failure), false when the pass should stop
    fn handle_connect_error(
        &self,
        item: crate::reconciler::queues::ConnectItem,
        e: crate::error::Error,
    ) -> bool {
        match e.action() {
            ErrorAction::Requeue => {
                warn!(logical = %item.logical, error = %e, "connect pass interrupted");
                self.queues.lock().requeue_connect(item);
                false
            }
            ErrorAction::DropItem => {
                error!(logical = %item.logical, error = %e, "dropping unconnectable drive");
                self.queues.lock().release(item.into_ticket());
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReconcilerConfig, FIRST_SYSTEM_LOGICAL_ID};
    use crate::events::EventKind;
    use crate::identity::stamp::IdentityStamp;
    use crate::jobs::JobRequest;
    use crate::peer::ControllerRole;
    use crate::sim::{SimCluster, SimJobService};
    use crate::topology::tables::{ConfigSnapshot, DriveConfigType, LogicalDriveRecord};
    use crate::topology::types::{
        BlockGeometry, DriveClass, DriveLocation, EdgeState, LinkSpeed, PhysicalDriveInfo,
        SerialNumber, SystemDescriptor,
    };

    const SEED: u64 = 0xA1;

    fn descriptor() -> SystemDescriptor {
        SystemDescriptor::new(
            SEED,
            vec!["SYS0".into(), "SYS1".into(), "SYS2".into(), "SYS3".into()],
        )
    }

    fn make_info(id: u32, location: DriveLocation, serial: &str) -> PhysicalDriveInfo {
        PhysicalDriveInfo {
            id: PhysicalDriveId(id),
            location,
            serial: serial.into(),
            capacity: 0x1000,
            block_geometry: BlockGeometry::Native512,
            drive_class: DriveClass::Sas15k,
            link_speed: LinkSpeed::Speed12G,
            maintenance_mode: false,
        }
    }

    fn seed_system_records(cluster: &SimCluster) {
        for slot in 0..4u32 {
            cluster.tables.insert(LogicalDriveRecord {
                id: LogicalDriveId(FIRST_SYSTEM_LOGICAL_ID + slot),
                serial: SerialNumber::new(format!("SYS{slot}")),
                config_type: DriveConfigType::Raid,
                location: DriveLocation::new(0, 0, slot),
                capacity: 0x1000,
            });
        }
    }

    fn make_engine(cluster: &SimCluster) -> Arc<Reconciler> {
        Reconciler::new(cluster.context(ReconcilerConfig::default(), descriptor()))
    }

    /// Run rounds of all three passes until nothing moves
    async fn settle(engine: &Reconciler, dispatcher: &mut Dispatcher) {
        engine.run_rounds(dispatcher).await;
    }

    fn assert_pool_conserved(engine: &Reconciler) {
        let q = engine.queues.lock();
        assert_eq!(q.pool_outstanding() + q.pool_free(), q.pool_capacity());
        assert_eq!(q.pool_outstanding(), q.discover_len() + q.connect_len());
    }

    #[tokio::test]
    async fn test_new_user_drive_created_and_connected() {
        let cluster = SimCluster::new(ControllerRole::Active);
        cluster
            .topology
            .add_drive(make_info(10, DriveLocation::new(1, 0, 5), "NEWDRV"));
        let engine = make_engine(&cluster);

        engine
            .enqueue_discovery(PhysicalDriveId(10), LifecycleState::Ready, ProcessFlags::NORMAL)
            .unwrap();
        settle(&engine, &mut Dispatcher::new()).await;

        let record = cluster.tables.lookup_by_serial(&"NEWDRV".into()).unwrap();
        assert_eq!(record.config_type, DriveConfigType::Unconsumed);
        assert_eq!(
            cluster.topology.edge_of(record.id),
            Some((PhysicalDriveId(10), EdgeState::Enabled))
        );

        let stamp = cluster.identity.stamp_of(PhysicalDriveId(10)).unwrap();
        assert_eq!(stamp.array_wwn_seed, SEED);
        assert_eq!(stamp.location, DriveLocation::new(1, 0, 5));

        assert_eq!(engine.queue_depths(), (0, 0));
        assert_pool_conserved(&engine);
    }

    #[tokio::test]
    async fn test_foreign_drive_imported_with_event() {
        let cluster = SimCluster::new(ControllerRole::Active);
        cluster
            .topology
            .add_drive(make_info(11, DriveLocation::new(2, 0, 3), "FRGN"));
        cluster.identity.preload(
            PhysicalDriveId(11),
            IdentityStamp::new(0xDEAD, DriveLocation::new(0, 0, 1)),
        );
        let engine = make_engine(&cluster);

        engine
            .enqueue_discovery(PhysicalDriveId(11), LifecycleState::Ready, ProcessFlags::NORMAL)
            .unwrap();
        settle(&engine, &mut Dispatcher::new()).await;

        assert!(cluster.tables.lookup_by_serial(&"FRGN".into()).is_some());
        assert_eq!(
            cluster.events.count_matching(|k| matches!(
                k,
                EventKind::CrossArrayImport { foreign_wwn_seed: 0xDEAD, .. }
            )),
            1
        );
    }

    #[tokio::test]
    async fn test_system_drive_replacement_reinitializes() {
        let cluster = SimCluster::new(ControllerRole::Active);
        seed_system_records(&cluster);
        cluster
            .topology
            .add_drive(make_info(20, DriveLocation::new(0, 0, 1), "REPL"));
        let engine = make_engine(&cluster);

        engine
            .enqueue_discovery(PhysicalDriveId(20), LifecycleState::Ready, ProcessFlags::NORMAL)
            .unwrap();
        settle(&engine, &mut Dispatcher::new()).await;

        let logical = LogicalDriveId(FIRST_SYSTEM_LOGICAL_ID + 1);
        let record = cluster.tables.lookup_by_id(logical).unwrap();
        assert_eq!(record.serial, SerialNumber::new("REPL"));
        assert_eq!(
            cluster.topology.edge_of(logical),
            Some((PhysicalDriveId(20), EdgeState::Enabled))
        );
        assert_eq!(engine.queue_depths(), (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reinit_cooldown_blocks_resubmission() {
        let cluster = SimCluster::new(ControllerRole::Active);
        seed_system_records(&cluster);
        cluster
            .topology
            .add_drive(make_info(21, DriveLocation::new(0, 0, 2), "REPL2"));

        // jobs recorded but never applied, so the tables never catch up
        let jobs = Arc::new(SimJobService::recording_only(
            Arc::clone(&cluster.tables),
            Arc::clone(&cluster.topology),
        ));
        let mut ctx = cluster.context(ReconcilerConfig::default(), descriptor());
        ctx.jobs = jobs.clone();
        let engine = Reconciler::new(ctx);
        let mut dispatcher = Dispatcher::new();

        engine
            .enqueue_discovery(PhysicalDriveId(21), LifecycleState::Ready, ProcessFlags::NORMAL)
            .unwrap();
        engine.discover_pass(&mut dispatcher).await;
        assert_eq!(jobs.submitted().len(), 1);

        engine.discover_pass(&mut dispatcher).await;
        assert_eq!(jobs.submitted().len(), 1, "resubmitted during cooldown");

        tokio::time::advance(std::time::Duration::from_secs(121)).await;
        engine.discover_pass(&mut dispatcher).await;
        assert_eq!(jobs.submitted().len(), 2);
        assert!(matches!(
            jobs.submitted()[1],
            JobRequest::ReinitSystemDrive { .. }
        ));
    }

    #[tokio::test]
    async fn test_bound_user_drive_in_system_slot_rejected() {
        let cluster = SimCluster::new(ControllerRole::Active);
        seed_system_records(&cluster);
        cluster.tables.insert(LogicalDriveRecord {
            id: LogicalDriveId(80),
            serial: "USRB".into(),
            config_type: DriveConfigType::Raid,
            location: DriveLocation::new(2, 0, 7),
            capacity: 0x1000,
        });
        cluster
            .topology
            .add_drive(make_info(30, DriveLocation::new(0, 0, 3), "USRB"));
        cluster.identity.preload(
            PhysicalDriveId(30),
            IdentityStamp::new(SEED, DriveLocation::new(2, 0, 7)),
        );
        let engine = make_engine(&cluster);

        engine
            .enqueue_discovery(PhysicalDriveId(30), LifecycleState::Ready, ProcessFlags::NORMAL)
            .unwrap();
        settle(&engine, &mut Dispatcher::new()).await;

        assert_eq!(
            cluster.events.count_matching(|k| matches!(
                k,
                EventKind::DriveInWrongSlot { correct_slot, .. }
                    if *correct_slot == DriveLocation::new(2, 0, 7)
            )),
            1
        );
        // record untouched, nothing connected to the system slot
        assert_eq!(
            cluster
                .tables
                .lookup_by_id(LogicalDriveId(FIRST_SYSTEM_LOGICAL_ID + 3))
                .unwrap()
                .serial,
            SerialNumber::new("SYS3")
        );
        assert_eq!(engine.queue_depths(), (0, 0));
        assert_pool_conserved(&engine);
    }

    #[tokio::test]
    async fn test_slow_drive_in_system_slot_killed_on_both_sides() {
        let cluster = SimCluster::new(ControllerRole::Active);
        seed_system_records(&cluster);
        let mut info = make_info(31, DriveLocation::new(0, 0, 0), "SLOW");
        info.drive_class = DriveClass::NearLine;
        cluster.topology.add_drive(info);
        let engine = make_engine(&cluster);

        engine
            .enqueue_discovery(PhysicalDriveId(31), LifecycleState::Ready, ProcessFlags::NORMAL)
            .unwrap();
        settle(&engine, &mut Dispatcher::new()).await;

        assert!(cluster.topology.is_failed(PhysicalDriveId(31)));
        assert_eq!(cluster.peer.kills(), vec![PhysicalDriveId(31)]);
        assert_eq!(
            cluster
                .events
                .count_matching(|k| matches!(k, EventKind::DriveKilled { .. })),
            1
        );
        assert!(cluster.jobs.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_passive_controller_submits_no_jobs() {
        let cluster = SimCluster::new(ControllerRole::Passive);
        cluster
            .topology
            .add_drive(make_info(40, DriveLocation::new(1, 0, 2), "PASV"));
        let engine = make_engine(&cluster);
        let mut dispatcher = Dispatcher::new();

        engine
            .enqueue_discovery(PhysicalDriveId(40), LifecycleState::Ready, ProcessFlags::NORMAL)
            .unwrap();
        engine.discover_pass(&mut dispatcher).await;
        engine.discover_pass(&mut dispatcher).await;

        assert!(cluster.jobs.submitted().is_empty());
        assert!(cluster.tables.lookup_by_serial(&"PASV".into()).is_none());
        // the item stays queued for when this side becomes active
        assert_eq!(engine.queue_depths().0, 1);
        assert_pool_conserved(&engine);
    }

    #[tokio::test]
    async fn test_passive_controller_still_connects_known_drives() {
        let cluster = SimCluster::new(ControllerRole::Passive);
        cluster.tables.insert(LogicalDriveRecord {
            id: LogicalDriveId(90),
            serial: "KNOWN".into(),
            config_type: DriveConfigType::Unconsumed,
            location: DriveLocation::new(1, 0, 4),
            capacity: 0x1000,
        });
        cluster
            .topology
            .add_drive(make_info(41, DriveLocation::new(1, 0, 4), "KNOWN"));
        cluster.identity.preload(
            PhysicalDriveId(41),
            IdentityStamp::new(SEED, DriveLocation::new(1, 0, 4)),
        );
        let engine = make_engine(&cluster);

        engine
            .enqueue_discovery(PhysicalDriveId(41), LifecycleState::Ready, ProcessFlags::NORMAL)
            .unwrap();
        settle(&engine, &mut Dispatcher::new()).await;

        assert_eq!(
            cluster.topology.edge_of(LogicalDriveId(90)),
            Some((PhysicalDriveId(41), EdgeState::Enabled))
        );
        assert!(cluster.jobs.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_system_drive_swap_never_auto_fixed() {
        let cluster = SimCluster::new(ControllerRole::Active);
        seed_system_records(&cluster);
        cluster
            .topology
            .add_drive(make_info(50, DriveLocation::new(0, 0, 2), "SYS1"));
        cluster.identity.preload(
            PhysicalDriveId(50),
            IdentityStamp::new(SEED, DriveLocation::new(0, 0, 1)),
        );
        let engine = make_engine(&cluster);

        // even a forced override must not touch swapped system drives
        engine
            .enqueue_discovery(
                PhysicalDriveId(50),
                LifecycleState::Ready,
                ProcessFlags::FORCE_ONLINE,
            )
            .unwrap();
        settle(&engine, &mut Dispatcher::new()).await;

        assert!(cluster.jobs.submitted().is_empty());
        assert_eq!(
            cluster.events.count_matching(|k| matches!(
                k,
                EventKind::DriveInWrongSlot { correct_slot, .. }
                    if *correct_slot == DriveLocation::new(0, 0, 1)
            )),
            1
        );
        assert_eq!(
            cluster
                .events
                .count_matching(|k| matches!(k, EventKind::OperatorActionRequired { .. })),
            1
        );
    }

    #[tokio::test]
    async fn test_forced_demotion_of_system_drive_to_user_slot() {
        let cluster = SimCluster::new(ControllerRole::Active);
        seed_system_records(&cluster);
        cluster
            .topology
            .add_drive(make_info(51, DriveLocation::new(1, 0, 5), "SYS2"));
        cluster.identity.preload(
            PhysicalDriveId(51),
            IdentityStamp::new(SEED, DriveLocation::new(0, 0, 2)),
        );
        let engine = make_engine(&cluster);

        engine
            .enqueue_discovery(
                PhysicalDriveId(51),
                LifecycleState::Ready,
                ProcessFlags::FORCE_ONLINE,
            )
            .unwrap();
        settle(&engine, &mut Dispatcher::new()).await;

        // stale system identity cleared
        let system = cluster
            .tables
            .lookup_by_id(LogicalDriveId(FIRST_SYSTEM_LOGICAL_ID + 2))
            .unwrap();
        assert_eq!(system.serial, SerialNumber::new(""));

        // recreated as a user drive and connected
        let user = cluster.tables.lookup_by_serial(&"SYS2".into()).unwrap();
        assert_eq!(user.config_type, DriveConfigType::Unconsumed);
        assert_eq!(
            cluster.topology.edge_of(user.id),
            Some((PhysicalDriveId(51), EdgeState::Enabled))
        );
    }

    #[tokio::test]
    async fn test_system_drive_in_user_slot_rejected_without_force() {
        let cluster = SimCluster::new(ControllerRole::Active);
        seed_system_records(&cluster);
        cluster
            .topology
            .add_drive(make_info(52, DriveLocation::new(1, 0, 6), "SYS0"));
        cluster.identity.preload(
            PhysicalDriveId(52),
            IdentityStamp::new(SEED, DriveLocation::new(0, 0, 0)),
        );
        let engine = make_engine(&cluster);

        engine
            .enqueue_discovery(PhysicalDriveId(52), LifecycleState::Ready, ProcessFlags::NORMAL)
            .unwrap();
        settle(&engine, &mut Dispatcher::new()).await;

        assert!(cluster.jobs.submitted().is_empty());
        assert_eq!(
            cluster.events.count_matching(|k| matches!(
                k,
                EventKind::DriveInWrongSlot { correct_slot, .. }
                    if *correct_slot == DriveLocation::new(0, 0, 0)
            )),
            1
        );
    }

    #[tokio::test]
    async fn test_transient_stamp_error_requeues_and_recovers() {
        let cluster = SimCluster::new(ControllerRole::Active);
        cluster
            .topology
            .add_drive(make_info(60, DriveLocation::new(2, 1, 0), "FLAKY"));
        cluster.identity.set_inaccessible(PhysicalDriveId(60), true);
        let engine = make_engine(&cluster);
        let mut dispatcher = Dispatcher::new();

        engine
            .enqueue_discovery(PhysicalDriveId(60), LifecycleState::Ready, ProcessFlags::NORMAL)
            .unwrap();
        engine.discover_pass(&mut dispatcher).await;
        assert_eq!(engine.queue_depths().0, 1);
        assert_pool_conserved(&engine);

        cluster.identity.set_inaccessible(PhysicalDriveId(60), false);
        settle(&engine, &mut dispatcher).await;
        assert!(cluster.tables.lookup_by_serial(&"FLAKY".into()).is_some());
        assert_eq!(engine.queue_depths(), (0, 0));
    }

    #[tokio::test]
    async fn test_maintenance_drive_flagged_offline_and_skipped() {
        let cluster = SimCluster::new(ControllerRole::Active);
        let mut info = make_info(61, DriveLocation::new(1, 0, 1), "MAINT");
        info.maintenance_mode = true;
        cluster.topology.add_drive(info);
        let engine = make_engine(&cluster);

        engine
            .enqueue_discovery(PhysicalDriveId(61), LifecycleState::Ready, ProcessFlags::NORMAL)
            .unwrap();
        engine.discover_pass(&mut Dispatcher::new()).await;

        assert!(cluster.topology.is_logically_offline(PhysicalDriveId(61)));
        assert!(cluster.jobs.submitted().is_empty());
        assert_eq!(engine.queue_depths().0, 1);
    }

    #[tokio::test]
    async fn test_deleted_record_retires_connect_item() {
        let cluster = SimCluster::new(ControllerRole::Active);
        let engine = make_engine(&cluster);

        engine.enqueue_connect(LogicalDriveId(999)).unwrap();
        assert!(engine.is_drive_pending_connect(LogicalDriveId(999)));

        engine.fast_connect_pass().await;
        assert!(!engine.is_drive_pending_connect(LogicalDriveId(999)));
        assert_pool_conserved(&engine);
    }

    #[tokio::test]
    async fn test_departed_drive_dropped_from_queue() {
        let cluster = SimCluster::new(ControllerRole::Active);
        let engine = make_engine(&cluster);

        // notification for a drive that was pulled before processing
        engine
            .enqueue_discovery(PhysicalDriveId(70), LifecycleState::Ready, ProcessFlags::NORMAL)
            .unwrap();
        engine.discover_pass(&mut Dispatcher::new()).await;
        assert_eq!(engine.queue_depths(), (0, 0));
        assert_pool_conserved(&engine);
    }

    #[tokio::test(start_paused = true)]
    async fn test_landed_create_connects_without_resubmission() {
        let cluster = SimCluster::new(ControllerRole::Active);
        cluster
            .topology
            .add_drive(make_info(62, DriveLocation::new(1, 0, 8), "ONCE"));
        let engine = make_engine(&cluster);
        let mut dispatcher = Dispatcher::new();

        engine
            .enqueue_discovery(PhysicalDriveId(62), LifecycleState::Ready, ProcessFlags::NORMAL)
            .unwrap();
        settle(&engine, &mut dispatcher).await;

        let record = cluster.tables.lookup_by_serial(&"ONCE".into()).unwrap();
        assert_eq!(
            cluster.topology.edge_of(record.id),
            Some((PhysicalDriveId(62), EdgeState::Enabled))
        );
        assert_eq!(engine.queue_depths(), (0, 0));

        // past the cooldown, the landed record must not be created again
        tokio::time::advance(std::time::Duration::from_secs(121)).await;
        settle(&engine, &mut dispatcher).await;
        let creates = cluster
            .jobs
            .submitted()
            .iter()
            .filter(|r| matches!(r, JobRequest::CreateDrives(_)))
            .count();
        assert_eq!(creates, 1);
    }

    #[tokio::test]
    async fn test_transient_failure_ends_wake_after_one_attempt() {
        let cluster = SimCluster::new(ControllerRole::Active);
        cluster
            .topology
            .add_drive(make_info(1, DriveLocation::new(2, 0, 0), "BUSY"));
        cluster.identity.set_inaccessible(PhysicalDriveId(1), true);
        let engine = make_engine(&cluster);
        let mut dispatcher = Dispatcher::new();

        // a trivially-retirable connect item keeps the rounds progressing
        engine.enqueue_connect(LogicalDriveId(999)).unwrap();
        engine
            .enqueue_discovery(PhysicalDriveId(1), LifecycleState::Ready, ProcessFlags::NORMAL)
            .unwrap();
        engine.run_rounds(&mut dispatcher).await;

        // the busy drive was tried once; the wake ended instead of re-spinning
        assert_eq!(cluster.identity.read_attempts(PhysicalDriveId(1)), 1);
        assert_eq!(engine.queue_depths().0, 1);
        assert_pool_conserved(&engine);

        cluster.identity.set_inaccessible(PhysicalDriveId(1), false);
        engine.run_rounds(&mut dispatcher).await;
        assert!(cluster.tables.lookup_by_serial(&"BUSY".into()).is_some());
        assert_eq!(engine.queue_depths(), (0, 0));
    }

    #[tokio::test]
    async fn test_forced_promotion_orphans_stale_user_record() {
        let cluster = SimCluster::new(ControllerRole::Active);
        seed_system_records(&cluster);
        cluster.tables.insert(LogicalDriveRecord {
            id: LogicalDriveId(80),
            serial: "USRB".into(),
            config_type: DriveConfigType::Raid,
            location: DriveLocation::new(2, 0, 7),
            capacity: 0x1000,
        });
        cluster
            .topology
            .add_drive(make_info(32, DriveLocation::new(0, 0, 3), "USRB"));
        cluster.identity.preload(
            PhysicalDriveId(32),
            IdentityStamp::new(SEED, DriveLocation::new(2, 0, 7)),
        );
        let engine = make_engine(&cluster);

        engine
            .enqueue_discovery(
                PhysicalDriveId(32),
                LifecycleState::Ready,
                ProcessFlags::FORCE_ONLINE,
            )
            .unwrap();
        settle(&engine, &mut Dispatcher::new()).await;

        // exactly one record holds the serial: the reinitialized system drive
        let holders: Vec<_> = cluster
            .tables
            .all()
            .into_iter()
            .filter(|r| r.serial == SerialNumber::new("USRB"))
            .collect();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].id, LogicalDriveId(FIRST_SYSTEM_LOGICAL_ID + 3));

        // the old bound-user record was orphaned, not destroyed
        assert_eq!(
            cluster.tables.lookup_by_id(LogicalDriveId(80)).unwrap().serial,
            SerialNumber::new("")
        );
        assert_eq!(
            cluster.topology.edge_of(LogicalDriveId(FIRST_SYSTEM_LOGICAL_ID + 3)),
            Some((PhysicalDriveId(32), EdgeState::Enabled))
        );
    }

    #[tokio::test]
    async fn test_rescan_enqueues_ready_drives() {
        let cluster = SimCluster::new(ControllerRole::Active);
        for n in 0..5 {
            cluster
                .topology
                .add_drive(make_info(n, DriveLocation::new(1, 0, n), &format!("RS{n}")));
        }
        let engine = make_engine(&cluster);
        engine.rescan().await.unwrap();
        assert_eq!(engine.queue_depths().0, 5);
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let cluster = SimCluster::new(ControllerRole::Active);
        cluster
            .topology
            .add_drive(make_info(1, DriveLocation::new(1, 0, 0), "LIFE"));
        let engine = make_engine(&cluster);

        let worker = engine.start();
        engine
            .enqueue_discovery(PhysicalDriveId(1), LifecycleState::Ready, ProcessFlags::NORMAL)
            .unwrap();

        // wait for the worker to converge
        for _ in 0..50 {
            if engine.queue_depths() == (0, 0) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(cluster.tables.lookup_by_serial(&"LIFE".into()).is_some());

        engine.stop();
        worker.await.unwrap();
    }
}
