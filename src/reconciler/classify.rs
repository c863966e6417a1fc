//! Drive Movement Classification
//!
//! Pure decision logic: given what the drive says about itself (its identity
//! stamp and serial), where it is, and what the configuration tables know, the
//! classifier derives where the drive came from and what its presence in this
//! slot means. No IO happens here; the worker gathers the inputs and the
//! dispatcher acts on the output, so every movement scenario is directly
//! testable.

use crate::config::ReconcilerConfig;
use crate::identity::stamp::StampRead;
use crate::topology::tables::{ConfigSnapshot, LogicalDriveRecord};
use crate::topology::types::{DriveLocation, SerialNumber, SystemDescriptor};
use serde::{Deserialize, Serialize};
use tracing::warn;

// =============================================================================
// Derived Types
// =============================================================================

/// Class of the slot a drive was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotType {
    /// One of the reserved slots backing the system logical drives
    System,
    /// Any other slot
    User,
}

impl SlotType {
    pub fn of(location: DriveLocation, config: &ReconcilerConfig) -> Self {
        if location.is_system_slot(config.system_slot_count) {
            SlotType::System
        } else {
            SlotType::User
        }
    }
}

/// Where the drive originally came from, derived from its stamp and the tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveOriginalType {
    /// Never stamped, or stamped by us but unknown to the tables
    New,
    /// Stamped by a different array, in that array's system-slot range
    OtherArraySystem,
    /// Stamped by a different array, in a user slot
    OtherArrayUser,
    /// One of this array's own system drives
    CurrentArraySystem,
    /// A user drive of this array, consumed by a RAID group
    CurrentArrayUserBound,
    /// A user drive of this array, not consumed by anything
    CurrentArrayUserUnbound,
}

/// The movement scenario a drive's presence represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveMovement {
    NewDriveToUserSlot,
    NewDriveToSystemSlot,
    ForeignUserToUserSlot,
    ForeignUserToSystemSlot,
    ForeignSystemToUserSlot,
    ForeignSystemToSystemSlot,
    UnboundUserToUserSlot,
    UnboundUserToSystemSlot,
    BoundUserToUserSlot,
    BoundUserToSystemSlot,
    /// System drive back in the slot it belongs to
    SystemToOriginalSlot,
    SystemToUserSlot,
    SystemToAnotherSystemSlot,
}

/// Full classification result the dispatcher acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedDrive {
    pub movement: DriveMovement,
    pub original_type: DriveOriginalType,
    /// Matching configuration record, when the tables know this drive
    pub record: Option<LogicalDriveRecord>,
    /// The slot the drive actually belongs in, for wrong-slot rejections
    pub correct_slot: Option<DriveLocation>,
    /// Seed of the provisioning array, when it is not this one
    pub foreign_wwn_seed: Option<u64>,
}

// =============================================================================
// Classification
// =============================================================================

/// Derive the movement scenario for a drive.
///
/// Pure with respect to its inputs; `snapshot` is a consistent read-side view
/// of the configuration tables.
pub fn classify(
    stamp: &StampRead,
    serial: &SerialNumber,
    location: DriveLocation,
    descriptor: &SystemDescriptor,
    snapshot: &dyn ConfigSnapshot,
    config: &ReconcilerConfig,
) -> ClassifiedDrive {
    let slot_type = SlotType::of(location, config);

    // An unstamped or unreadable-content stamp means the drive carries no
    // provenance we can trust. It is new to us regardless of its history.
    let stamp = match stamp {
        StampRead::Valid(s) => s,
        StampRead::Uninitialized | StampRead::Invalid => {
            return resolved(DriveOriginalType::New, slot_type, None, None, None);
        }
    };

    if !stamp.belongs_to(descriptor.array_wwn_seed) {
        let original_type = if stamp.location.is_system_slot(config.system_slot_count) {
            DriveOriginalType::OtherArraySystem
        } else {
            DriveOriginalType::OtherArrayUser
        };
        return resolved(original_type, slot_type, None, None, Some(stamp.array_wwn_seed));
    }

    // Our own stamp. A serial in the system descriptor marks a system drive
    // unless the tables already track that serial as a plain user drive,
    // which happens after a forced demotion.
    let record = snapshot.lookup_by_serial(serial);
    if descriptor.is_system_serial(serial) {
        let demoted = record
            .as_ref()
            .map(|r| !config.is_system_logical_id(r.id))
            .unwrap_or(false);
        if !demoted {
            let original_slot = descriptor.original_slot_for(serial);
            return classify_own_system(slot_type, location, original_slot, None);
        }
    }

    match record {
        Some(record) => {
            if config.is_system_logical_id(record.id) {
                // The descriptor does not know this serial but a reserved
                // logical id does. Trust the tables over the descriptor and
                // treat the drive as a system drive.
                warn!(
                    serial = %serial,
                    logical = %record.id,
                    "serial maps to a reserved logical drive but is absent from the system descriptor"
                );
                let original_slot = Some(record.location.slot);
                return classify_own_system(slot_type, location, original_slot, Some(record));
            }
            let original_type = if snapshot.is_consumed_by_raid_group(record.id) {
                DriveOriginalType::CurrentArrayUserBound
            } else {
                DriveOriginalType::CurrentArrayUserUnbound
            };
            let correct_slot = match (original_type, slot_type) {
                // A bound user drive in a system slot belongs back where it
                // was provisioned
                (DriveOriginalType::CurrentArrayUserBound, SlotType::System) => {
                    Some(stamp.location)
                }
                _ => None,
            };
            resolved(original_type, slot_type, Some(record), correct_slot, None)
        }
        // Stamped by us but the tables have no trace of it; the record was
        // destroyed while the drive was away. Start over.
        None => resolved(DriveOriginalType::New, slot_type, None, None, None),
    }
}

fn classify_own_system(
    slot_type: SlotType,
    location: DriveLocation,
    original_slot: Option<u32>,
    record: Option<LogicalDriveRecord>,
) -> ClassifiedDrive {
    let correct_slot = original_slot.map(|slot| DriveLocation::new(0, 0, slot));
    let movement = match slot_type {
        SlotType::User => DriveMovement::SystemToUserSlot,
        SlotType::System => match original_slot {
            Some(slot) if slot == location.slot => DriveMovement::SystemToOriginalSlot,
            _ => DriveMovement::SystemToAnotherSystemSlot,
        },
    };
    ClassifiedDrive {
        movement,
        original_type: DriveOriginalType::CurrentArraySystem,
        record,
        correct_slot,
        foreign_wwn_seed: None,
    }
}

fn resolved(
    original_type: DriveOriginalType,
    slot_type: SlotType,
    record: Option<LogicalDriveRecord>,
    correct_slot: Option<DriveLocation>,
    foreign_wwn_seed: Option<u64>,
) -> ClassifiedDrive {
    let movement = match (original_type, slot_type) {
        (DriveOriginalType::New, SlotType::User) => DriveMovement::NewDriveToUserSlot,
        (DriveOriginalType::New, SlotType::System) => DriveMovement::NewDriveToSystemSlot,
        (DriveOriginalType::OtherArrayUser, SlotType::User) => DriveMovement::ForeignUserToUserSlot,
        (DriveOriginalType::OtherArrayUser, SlotType::System) => {
            DriveMovement::ForeignUserToSystemSlot
        }
        (DriveOriginalType::OtherArraySystem, SlotType::User) => {
            DriveMovement::ForeignSystemToUserSlot
        }
        (DriveOriginalType::OtherArraySystem, SlotType::System) => {
            DriveMovement::ForeignSystemToSystemSlot
        }
        (DriveOriginalType::CurrentArrayUserUnbound, SlotType::User) => {
            DriveMovement::UnboundUserToUserSlot
        }
        (DriveOriginalType::CurrentArrayUserUnbound, SlotType::System) => {
            DriveMovement::UnboundUserToSystemSlot
        }
        (DriveOriginalType::CurrentArrayUserBound, SlotType::User) => {
            DriveMovement::BoundUserToUserSlot
        }
        (DriveOriginalType::CurrentArrayUserBound, SlotType::System) => {
            DriveMovement::BoundUserToSystemSlot
        }
        // Own system drives take the dedicated path above
        (DriveOriginalType::CurrentArraySystem, _) => unreachable!(),
    };
    ClassifiedDrive {
        movement,
        original_type,
        record,
        correct_slot,
        foreign_wwn_seed,
    }
}
