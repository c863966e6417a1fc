//! Core Topology Types
//!
//! Identifiers, locations and drive descriptors shared by every component of
//! the reconciliation engine. Physical drives are what the hardware layer
//! reports; logical drives are the array's configuration-side abstraction,
//! bound to exactly one physical drive through a downstream edge.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier of a physical drive object at the hardware layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PhysicalDriveId(pub u32);

impl fmt::Display for PhysicalDriveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pdo:0x{:x}", self.0)
    }
}

/// Identifier of a logical drive record in the configuration tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogicalDriveId(pub u32);

impl fmt::Display for LogicalDriveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lvd:0x{:x}", self.0)
    }
}

/// Drive serial number as reported by inquiry
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SerialNumber(pub String);

impl SerialNumber {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SerialNumber {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// Location
// =============================================================================

/// Physical location of a drive slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DriveLocation {
    pub bus: u32,
    pub enclosure: u32,
    pub slot: u32,
}

impl DriveLocation {
    pub fn new(bus: u32, enclosure: u32, slot: u32) -> Self {
        Self {
            bus,
            enclosure,
            slot,
        }
    }

    /// True if this location falls inside the reserved system-slot range
    pub fn is_system_slot(&self, system_slot_count: u32) -> bool {
        self.bus == 0 && self.enclosure == 0 && self.slot < system_slot_count
    }
}

impl fmt::Display for DriveLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.bus, self.enclosure, self.slot)
    }
}

// =============================================================================
// Lifecycle & Process Flags
// =============================================================================

/// Lifecycle state of a physical drive as reported by the hardware layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    /// The drive object exists but is still initializing; not yet actionable
    Specializing,
    /// The drive is fully up and can be classified and connected
    Ready,
}

/// Processing flags carried on a discover item, OR-merged across duplicate
/// notifications for the same drive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessFlags(u8);

impl ProcessFlags {
    pub const NORMAL: ProcessFlags = ProcessFlags(0);
    pub const FORCE_ONLINE: ProcessFlags = ProcessFlags(1);

    /// OR another flag set into this one
    pub fn merge(&mut self, other: ProcessFlags) {
        self.0 |= other.0;
    }

    /// Operator override: bring the drive online despite a placement anomaly
    pub fn force_online(&self) -> bool {
        self.0 & Self::FORCE_ONLINE.0 != 0
    }
}

// =============================================================================
// Drive Characteristics
// =============================================================================

/// Block geometry exported by the drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockGeometry {
    /// 512-byte native sectors
    Native512,
    /// 4K native sectors
    Native4k,
}

/// Performance class of a drive, ordered slowest to fastest. Used to gate
/// whether a replacement drive may back a system logical drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DriveClass {
    NearLine,
    Sas10k,
    Sas15k,
    Flash,
}

/// Link speed negotiated by the drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LinkSpeed {
    Speed6G,
    Speed12G,
}

// =============================================================================
// Physical Drive Info
// =============================================================================

/// Snapshot of a physical drive's identity and characteristics, fetched from
/// the hardware layer when a discover item is processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalDriveInfo {
    pub id: PhysicalDriveId,
    pub location: DriveLocation,
    pub serial: SerialNumber,
    /// Exported capacity in blocks
    pub capacity: u64,
    pub block_geometry: BlockGeometry,
    pub drive_class: DriveClass,
    pub link_speed: LinkSpeed,
    /// Drive is undergoing firmware maintenance and must not be connected
    pub maintenance_mode: bool,
}

/// State of the downstream edge between a logical and a physical drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeState {
    /// No edge exists
    Detached,
    /// Edge exists and the path is usable
    Enabled,
    /// Edge exists but the path is down
    Disabled,
}

// =============================================================================
// System Descriptor
// =============================================================================

/// The array's own identity: its chassis seed and the serial numbers of the
/// drives that last legitimately occupied the system slots, indexed by slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemDescriptor {
    /// World-wide-name seed identifying this array
    pub array_wwn_seed: u64,
    /// Serial of the drive owning each system slot, indexed by slot number
    pub system_serials: Vec<SerialNumber>,
}

impl SystemDescriptor {
    pub fn new(array_wwn_seed: u64, system_serials: Vec<SerialNumber>) -> Self {
        Self {
            array_wwn_seed,
            system_serials,
        }
    }

    /// True if the serial belongs to one of this array's system drives
    pub fn is_system_serial(&self, serial: &SerialNumber) -> bool {
        self.system_serials.iter().any(|s| s == serial)
    }

    /// The system slot this serial originally occupied, if any
    pub fn original_slot_for(&self, serial: &SerialNumber) -> Option<u32> {
        self.system_serials
            .iter()
            .position(|s| s == serial)
            .map(|i| i as u32)
    }
}
