//! Error types for the reconciliation engine
//!
//! Provides structured error types for all subsystem components, plus the
//! retry-action classification the worker loop uses to decide whether a
//! failed item is requeued or dropped.

use crate::topology::types::{DriveLocation, LogicalDriveId, PhysicalDriveId};
use thiserror::Error;

/// Unified error type for the reconciliation engine
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Transient Errors
    // =========================================================================
    #[error("Drive at {location} is not accessible")]
    DriveInaccessible { location: DriveLocation },

    #[error("Object busy: {0}")]
    ObjectBusy(String),

    #[error("Physical drive {0} not present in topology")]
    DriveNotPresent(PhysicalDriveId),

    // =========================================================================
    // Resource Exhaustion
    // =========================================================================
    #[error("Work-item pool exhausted")]
    PoolExhausted,

    #[error("Platform drive limit reached: {limit}")]
    DriveLimitReached { limit: usize },

    // =========================================================================
    // Structural Errors
    // =========================================================================
    #[error("Configuration tables corrupted: {0}")]
    ConfigCorrupt(String),

    #[error("Logical drive {0} has no configuration record")]
    RecordNotFound(LogicalDriveId),

    #[error("Identity stamp encoding error: {0}")]
    StampEncoding(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    #[error("Job submission failed: {0}")]
    JobSubmission(String),

    #[error("Peer coordination failed: {0}")]
    PeerUnreachable(String),

    // =========================================================================
    // IO / Parse Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

/// Action the worker loop takes when an item fails with an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Put the item back on its queue and break the current pass
    Requeue,
    /// Release the item permanently; a later notification rediscovers the drive
    DropItem,
}

impl Error {
    /// Determine what the worker should do with the failed item
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient - the drive or object will come back
            Error::DriveInaccessible { .. }
            | Error::ObjectBusy(_)
            | Error::DriveNotPresent(_) => ErrorAction::Requeue,

            // Resource pressure - retried once the pressure clears
            Error::PoolExhausted | Error::DriveLimitReached { .. } => ErrorAction::Requeue,

            // Structural - retrying cannot help
            Error::ConfigCorrupt(_)
            | Error::RecordNotFound(_)
            | Error::StampEncoding(_)
            | Error::Internal(_) => ErrorAction::DropItem,

            // Collaborator failures degrade to a retry on the next wake
            Error::JobSubmission(_) | Error::PeerUnreachable(_) => ErrorAction::Requeue,

            Error::Io(_) | Error::JsonParse(_) => ErrorAction::DropItem,
        }
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(self.action(), ErrorAction::Requeue)
    }
}

/// Result type alias for the reconciliation engine
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_requeue() {
        let err = Error::DriveInaccessible {
            location: DriveLocation::new(0, 0, 5),
        };
        assert_eq!(err.action(), ErrorAction::Requeue);
        assert!(err.is_transient());

        let err = Error::ObjectBusy("logical drive 12 locked".into());
        assert_eq!(err.action(), ErrorAction::Requeue);
    }

    #[test]
    fn test_structural_errors_drop() {
        let err = Error::ConfigCorrupt("duplicate serial index".into());
        assert_eq!(err.action(), ErrorAction::DropItem);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_exhaustion_requeues() {
        let err = Error::DriveLimitReached { limit: 1000 };
        assert_eq!(err.action(), ErrorAction::Requeue);
    }
}
