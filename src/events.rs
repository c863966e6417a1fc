//! Structured Events
//!
//! Operator-visible events raised by the reconciler. These are the array's
//! audit trail for drive movement decisions; rejections in particular must
//! tell the operator which slot the drive actually belongs in.

use crate::reconciler::classify::DriveMovement;
use crate::topology::types::{DriveClass, DriveLocation, PhysicalDriveId, SerialNumber};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An operator-visible event with its payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// A drive is in a slot it does not belong in; `correct_slot` is where it goes
    DriveInWrongSlot {
        serial: SerialNumber,
        location: DriveLocation,
        correct_slot: DriveLocation,
    },
    /// A drive provisioned by another array was accepted into this one
    CrossArrayImport {
        serial: SerialNumber,
        location: DriveLocation,
        foreign_wwn_seed: u64,
    },
    /// The drive's hardware class cannot be used in this configuration
    UnsupportedDrive {
        serial: SerialNumber,
        location: DriveLocation,
        reason: String,
    },
    /// A drive was failed locally and its kill relayed to the peer
    DriveKilled {
        drive: PhysicalDriveId,
        location: DriveLocation,
        drive_class: DriveClass,
    },
    /// A situation the engine refuses to fix automatically
    OperatorActionRequired {
        location: DriveLocation,
        detail: String,
    },
    /// A movement decision worth auditing
    MovementResolved {
        serial: SerialNumber,
        location: DriveLocation,
        movement: DriveMovement,
    },
}

/// A recorded event with timestamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub at: DateTime<Utc>,
    pub kind: EventKind,
}

impl Event {
    pub fn now(kind: EventKind) -> Self {
        Self {
            at: Utc::now(),
            kind,
        }
    }
}

/// Sink for operator-visible events.
///
/// Recording is synchronous and must not block; implementations buffer or
/// forward out of band.
pub trait EventLog: Send + Sync {
    fn record(&self, event: Event);
}
