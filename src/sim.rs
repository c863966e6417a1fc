//! In-Memory Collaborators
//!
//! Simulated versions of every external interface, used by the standalone
//! binary and by tests. The job service applies configuration mutations
//! immediately, so a test can drive the worker end to end without any real
//! array services.

use crate::config::FIRST_SYSTEM_LOGICAL_ID;
use crate::error::{Error, Result};
use crate::events::{Event, EventKind, EventLog};
use crate::identity::stamp::{IdentityStamp, StampRead};
use crate::identity::store::IdentityStore;
use crate::jobs::{JobId, JobRequest, JobService};
use crate::peer::{ControllerRole, PeerCoordinator};
use crate::topology::tables::{
    ConfigSnapshot, DriveConfigType, DriveTopology, LogicalDriveRecord,
};
use crate::topology::types::{
    DriveLocation, EdgeState, LogicalDriveId, PhysicalDriveId, PhysicalDriveInfo, SerialNumber,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// =============================================================================
// Configuration Tables
// =============================================================================

/// In-memory configuration tables
#[derive(Debug, Default)]
pub struct SimConfigTables {
    records: Mutex<HashMap<LogicalDriveId, LogicalDriveRecord>>,
}

impl SimConfigTables {
    pub fn insert(&self, record: LogicalDriveRecord) {
        self.records.lock().insert(record.id, record);
    }

    pub fn remove(&self, id: LogicalDriveId) -> Option<LogicalDriveRecord> {
        self.records.lock().remove(&id)
    }

    pub fn all(&self) -> Vec<LogicalDriveRecord> {
        self.records.lock().values().cloned().collect()
    }
}

impl ConfigSnapshot for SimConfigTables {
    fn lookup_by_serial(&self, serial: &SerialNumber) -> Option<LogicalDriveRecord> {
        self.records
            .lock()
            .values()
            .find(|r| &r.serial == serial)
            .cloned()
    }

    fn lookup_by_id(&self, id: LogicalDriveId) -> Option<LogicalDriveRecord> {
        self.records.lock().get(&id).cloned()
    }

    fn is_consumed_by_raid_group(&self, id: LogicalDriveId) -> bool {
        self.records
            .lock()
            .get(&id)
            .map(|r| r.config_type == DriveConfigType::Raid)
            .unwrap_or(false)
    }

    fn drive_record_count(&self) -> usize {
        self.records.lock().len()
    }
}

// =============================================================================
// Drive Topology
// =============================================================================

#[derive(Debug, Clone)]
struct SimDrive {
    info: PhysicalDriveInfo,
    failed: bool,
    logically_offline: bool,
}

/// In-memory hardware topology
#[derive(Debug, Default)]
pub struct SimTopology {
    drives: Mutex<HashMap<PhysicalDriveId, SimDrive>>,
    edges: Mutex<HashMap<LogicalDriveId, (PhysicalDriveId, EdgeState)>>,
}

impl SimTopology {
    pub fn add_drive(&self, info: PhysicalDriveInfo) {
        self.drives.lock().insert(
            info.id,
            SimDrive {
                info,
                failed: false,
                logically_offline: false,
            },
        );
    }

    pub fn remove_drive(&self, id: PhysicalDriveId) {
        self.drives.lock().remove(&id);
    }

    pub fn set_maintenance(&self, id: PhysicalDriveId, maintenance: bool) {
        if let Some(d) = self.drives.lock().get_mut(&id) {
            d.info.maintenance_mode = maintenance;
        }
    }

    pub fn is_failed(&self, id: PhysicalDriveId) -> bool {
        self.drives.lock().get(&id).map(|d| d.failed).unwrap_or(false)
    }

    pub fn is_logically_offline(&self, id: PhysicalDriveId) -> bool {
        self.drives
            .lock()
            .get(&id)
            .map(|d| d.logically_offline)
            .unwrap_or(false)
    }

    pub fn edge_of(&self, logical: LogicalDriveId) -> Option<(PhysicalDriveId, EdgeState)> {
        self.edges.lock().get(&logical).copied()
    }

    fn capacity_of(&self, id: PhysicalDriveId) -> Option<u64> {
        self.drives.lock().get(&id).map(|d| d.info.capacity)
    }

    fn serial_present(&self, serial: &SerialNumber) -> bool {
        self.drives
            .lock()
            .values()
            .any(|d| !d.failed && &d.info.serial == serial)
    }
}

#[async_trait]
impl DriveTopology for SimTopology {
    async fn drive_info(&self, id: PhysicalDriveId) -> Result<PhysicalDriveInfo> {
        self.drives
            .lock()
            .get(&id)
            .map(|d| d.info.clone())
            .ok_or(Error::DriveNotPresent(id))
    }

    async fn find_by_serial(&self, serial: &SerialNumber) -> Result<Option<PhysicalDriveId>> {
        Ok(self
            .drives
            .lock()
            .values()
            .find(|d| !d.failed && &d.info.serial == serial)
            .map(|d| d.info.id))
    }

    async fn edge_state(&self, id: LogicalDriveId) -> Result<EdgeState> {
        Ok(self
            .edges
            .lock()
            .get(&id)
            .map(|(_, state)| *state)
            .unwrap_or(EdgeState::Detached))
    }

    async fn attach_edge(
        &self,
        logical: LogicalDriveId,
        physical: PhysicalDriveId,
        _capacity: u64,
    ) -> Result<()> {
        if !self.drives.lock().contains_key(&physical) {
            return Err(Error::DriveNotPresent(physical));
        }
        self.edges
            .lock()
            .insert(logical, (physical, EdgeState::Enabled));
        Ok(())
    }

    async fn fail_drive(&self, id: PhysicalDriveId, _reason: &str) -> Result<()> {
        if let Some(d) = self.drives.lock().get_mut(&id) {
            d.failed = true;
        }
        Ok(())
    }

    async fn set_logically_offline(&self, id: PhysicalDriveId, offline: bool) -> Result<()> {
        if let Some(d) = self.drives.lock().get_mut(&id) {
            d.logically_offline = offline;
        }
        Ok(())
    }

    async fn list_ready_drives(&self) -> Result<Vec<PhysicalDriveId>> {
        Ok(self
            .drives
            .lock()
            .values()
            .filter(|d| !d.failed)
            .map(|d| d.info.id)
            .collect())
    }
}

// =============================================================================
// Identity Store
// =============================================================================

/// In-memory stamp store with fault injection for transient read errors
#[derive(Debug, Default)]
pub struct SimIdentityStore {
    stamps: Mutex<HashMap<PhysicalDriveId, StampRead>>,
    inaccessible: Mutex<HashSet<PhysicalDriveId>>,
    reads: Mutex<HashMap<PhysicalDriveId, usize>>,
}

impl SimIdentityStore {
    pub fn preload(&self, drive: PhysicalDriveId, stamp: IdentityStamp) {
        self.stamps.lock().insert(drive, StampRead::Valid(stamp));
    }

    pub fn preload_invalid(&self, drive: PhysicalDriveId) {
        self.stamps.lock().insert(drive, StampRead::Invalid);
    }

    pub fn set_inaccessible(&self, drive: PhysicalDriveId, inaccessible: bool) {
        if inaccessible {
            self.inaccessible.lock().insert(drive);
        } else {
            self.inaccessible.lock().remove(&drive);
        }
    }

    pub fn stamp_of(&self, drive: PhysicalDriveId) -> Option<IdentityStamp> {
        match self.stamps.lock().get(&drive) {
            Some(StampRead::Valid(s)) => Some(*s),
            _ => None,
        }
    }

    /// How many times the stamp region of a drive was read, failed attempts
    /// included
    pub fn read_attempts(&self, drive: PhysicalDriveId) -> usize {
        self.reads.lock().get(&drive).copied().unwrap_or(0)
    }
}

#[async_trait]
impl IdentityStore for SimIdentityStore {
    async fn read_stamp(&self, drive: PhysicalDriveId) -> Result<StampRead> {
        *self.reads.lock().entry(drive).or_insert(0) += 1;
        if self.inaccessible.lock().contains(&drive) {
            return Err(Error::ObjectBusy(format!("stamp region of {drive} busy")));
        }
        Ok(self
            .stamps
            .lock()
            .get(&drive)
            .copied()
            .unwrap_or(StampRead::Uninitialized))
    }

    async fn write_stamp(&self, drive: PhysicalDriveId, stamp: &IdentityStamp) -> Result<()> {
        self.stamps.lock().insert(drive, StampRead::Valid(*stamp));
        Ok(())
    }
}

// =============================================================================
// Job Service
// =============================================================================

/// Job service that applies mutations straight to the sim tables
pub struct SimJobService {
    tables: Arc<SimConfigTables>,
    topology: Arc<SimTopology>,
    next_job: AtomicU64,
    next_logical: AtomicU64,
    submitted: Mutex<Vec<JobRequest>>,
    /// When false, jobs are recorded but never applied
    apply: bool,
}

impl SimJobService {
    pub fn new(tables: Arc<SimConfigTables>, topology: Arc<SimTopology>) -> Self {
        Self {
            tables,
            topology,
            next_job: AtomicU64::new(1),
            next_logical: AtomicU64::new(0x100),
            submitted: Mutex::new(Vec::new()),
            apply: true,
        }
    }

    /// A service that records submissions without applying them
    pub fn recording_only(tables: Arc<SimConfigTables>, topology: Arc<SimTopology>) -> Self {
        Self {
            apply: false,
            ..Self::new(tables, topology)
        }
    }

    pub fn submitted(&self) -> Vec<JobRequest> {
        self.submitted.lock().clone()
    }

    fn apply(&self, request: &JobRequest) {
        match request {
            JobRequest::CreateDrives(specs) => {
                for spec in specs {
                    let id = LogicalDriveId(self.next_logical.fetch_add(1, Ordering::SeqCst) as u32);
                    self.tables.insert(LogicalDriveRecord {
                        id,
                        serial: spec.serial.clone(),
                        config_type: DriveConfigType::Unconsumed,
                        location: spec.location,
                        capacity: spec.capacity,
                    });
                }
            }
            JobRequest::ReinitSystemDrive {
                logical,
                physical,
                serial,
            } => {
                let slot = logical.0 - FIRST_SYSTEM_LOGICAL_ID;
                self.tables.insert(LogicalDriveRecord {
                    id: *logical,
                    serial: serial.clone(),
                    config_type: DriveConfigType::Raid,
                    location: DriveLocation::new(0, 0, slot),
                    capacity: self.topology.capacity_of(*physical).unwrap_or(0),
                });
            }
            JobRequest::UpdateSerial { logical, serial } => {
                if let Some(mut record) = self.tables.lookup_by_id(*logical) {
                    record.serial = serial.clone();
                    self.tables.insert(record);
                }
            }
            JobRequest::DestroyUnconsumed => {
                for record in self.tables.all() {
                    if record.config_type == DriveConfigType::Unconsumed
                        && !self.topology.serial_present(&record.serial)
                    {
                        self.tables.remove(record.id);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl JobService for SimJobService {
    async fn submit(&self, request: JobRequest) -> Result<JobId> {
        self.submitted.lock().push(request.clone());
        if self.apply {
            self.apply(&request);
        }
        Ok(JobId(self.next_job.fetch_add(1, Ordering::SeqCst)))
    }
}

// =============================================================================
// Event Log & Peer
// =============================================================================

/// Event log capturing everything in memory
#[derive(Debug, Default)]
pub struct SimEventLog {
    events: Mutex<Vec<Event>>,
}

impl SimEventLog {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn count_matching(&self, pred: impl Fn(&EventKind) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(&e.kind)).count()
    }
}

impl EventLog for SimEventLog {
    fn record(&self, event: Event) {
        self.events.lock().push(event);
    }
}

/// Peer coordinator with a settable role and a kill log
#[derive(Debug)]
pub struct SimPeer {
    role: Mutex<ControllerRole>,
    kills: Mutex<Vec<PhysicalDriveId>>,
}

impl SimPeer {
    pub fn new(role: ControllerRole) -> Self {
        Self {
            role: Mutex::new(role),
            kills: Mutex::new(Vec::new()),
        }
    }

    pub fn set_role(&self, role: ControllerRole) {
        *self.role.lock() = role;
    }

    pub fn kills(&self) -> Vec<PhysicalDriveId> {
        self.kills.lock().clone()
    }
}

#[async_trait]
impl PeerCoordinator for SimPeer {
    fn role(&self) -> ControllerRole {
        *self.role.lock()
    }

    async fn relay_drive_kill(&self, drive: PhysicalDriveId, _reason: &str) -> Result<()> {
        self.kills.lock().push(drive);
        Ok(())
    }
}

// =============================================================================
// Cluster Bundle
// =============================================================================

/// Every sim collaborator, pre-wired; what the standalone binary and the
/// worker tests run against
pub struct SimCluster {
    pub tables: Arc<SimConfigTables>,
    pub topology: Arc<SimTopology>,
    pub identity: Arc<SimIdentityStore>,
    pub jobs: Arc<SimJobService>,
    pub events: Arc<SimEventLog>,
    pub peer: Arc<SimPeer>,
}

impl SimCluster {
    pub fn new(role: ControllerRole) -> Self {
        let tables = Arc::new(SimConfigTables::default());
        let topology = Arc::new(SimTopology::default());
        let jobs = Arc::new(SimJobService::new(Arc::clone(&tables), Arc::clone(&topology)));
        Self {
            tables,
            topology,
            identity: Arc::new(SimIdentityStore::default()),
            jobs,
            events: Arc::new(SimEventLog::default()),
            peer: Arc::new(SimPeer::new(role)),
        }
    }

    pub fn context(
        &self,
        config: crate::config::ReconcilerConfig,
        descriptor: crate::topology::types::SystemDescriptor,
    ) -> crate::reconciler::ReconcilerContext {
        crate::reconciler::ReconcilerContext {
            config,
            descriptor,
            identity: self.identity.clone(),
            topology: self.topology.clone(),
            tables: self.tables.clone(),
            jobs: self.jobs.clone(),
            events: self.events.clone(),
            peer: self.peer.clone(),
        }
    }
}
