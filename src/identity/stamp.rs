//! Identity Stamp
//!
//! The fixed-size record written to a reserved region of every provisioned
//! drive. It records which array the drive belongs to and which slot it was
//! provisioned in, so a drive that has been moved can be recognized wherever
//! it shows up.

use crate::error::{Error, Result};
use crate::topology::types::DriveLocation;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Magic prefix identifying an initialized stamp region
pub const STAMP_MAGIC: [u8; 8] = *b"FRU_SIG\0";

/// Current stamp record version
pub const STAMP_VERSION: u32 = 1;

/// Encoded size of a stamp record in bytes
pub const STAMP_SIZE: usize = 32;

/// The on-drive identity record: array membership plus provisioned slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityStamp {
    pub version: u32,
    /// World-wide-name seed of the array that provisioned the drive
    pub array_wwn_seed: u64,
    /// Slot the drive was provisioned in
    pub location: DriveLocation,
}

impl IdentityStamp {
    pub fn new(array_wwn_seed: u64, location: DriveLocation) -> Self {
        Self {
            version: STAMP_VERSION,
            array_wwn_seed,
            location,
        }
    }

    /// Encode to the fixed 32-byte wire layout
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(STAMP_SIZE);
        buf.put_slice(&STAMP_MAGIC);
        buf.put_u32(self.version);
        buf.put_u64(self.array_wwn_seed);
        buf.put_u32(self.location.bus);
        buf.put_u32(self.location.enclosure);
        buf.put_u32(self.location.slot);
        buf.freeze()
    }

    /// Decode from raw stamp-region bytes.
    ///
    /// An all-zero or wrong-magic region is not an error; it means the drive
    /// was never stamped (or was zeroed) and decodes to `Uninitialized`.
    pub fn decode(raw: &[u8]) -> Result<StampRead> {
        if raw.len() < STAMP_SIZE {
            return Err(Error::StampEncoding(format!(
                "stamp region too short: {} bytes",
                raw.len()
            )));
        }
        if raw[..8] != STAMP_MAGIC {
            return Ok(StampRead::Uninitialized);
        }
        let mut buf = &raw[8..STAMP_SIZE];
        let version = buf.get_u32();
        if version == 0 || version > STAMP_VERSION {
            return Ok(StampRead::Invalid);
        }
        let array_wwn_seed = buf.get_u64();
        let bus = buf.get_u32();
        let enclosure = buf.get_u32();
        let slot = buf.get_u32();
        Ok(StampRead::Valid(IdentityStamp {
            version,
            array_wwn_seed,
            location: DriveLocation::new(bus, enclosure, slot),
        }))
    }

    /// True if the stamp belongs to the given array
    pub fn belongs_to(&self, array_wwn_seed: u64) -> bool {
        self.array_wwn_seed == array_wwn_seed
    }
}

/// Outcome of reading the stamp region of a drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampRead {
    /// A well-formed stamp was present
    Valid(IdentityStamp),
    /// The region has never been stamped (or was deliberately zeroed)
    Uninitialized,
    /// The magic matched but the record content is unusable
    Invalid,
}

impl StampRead {
    pub fn stamp(&self) -> Option<&IdentityStamp> {
        match self {
            StampRead::Valid(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let stamp = IdentityStamp::new(0xCAFE_F00D, DriveLocation::new(0, 0, 2));
        let raw = stamp.encode();
        assert_eq!(raw.len(), STAMP_SIZE);
        match IdentityStamp::decode(&raw).unwrap() {
            StampRead::Valid(decoded) => assert_eq!(decoded, stamp),
            other => panic!("expected valid stamp, got {:?}", other),
        }
    }

    #[test]
    fn test_zeroed_region_is_uninitialized() {
        let raw = [0u8; STAMP_SIZE];
        assert_eq!(
            IdentityStamp::decode(&raw).unwrap(),
            StampRead::Uninitialized
        );
    }

    #[test]
    fn test_bad_version_is_invalid() {
        let stamp = IdentityStamp::new(1, DriveLocation::new(0, 0, 0));
        let mut raw = stamp.encode().to_vec();
        raw[8..12].copy_from_slice(&99u32.to_be_bytes());
        assert_eq!(IdentityStamp::decode(&raw).unwrap(), StampRead::Invalid);
    }

    #[test]
    fn test_short_region_errors() {
        let raw = [0u8; 8];
        assert!(IdentityStamp::decode(&raw).is_err());
    }

    #[test]
    fn test_belongs_to() {
        let stamp = IdentityStamp::new(0xAA, DriveLocation::new(1, 0, 7));
        assert!(stamp.belongs_to(0xAA));
        assert!(!stamp.belongs_to(0xBB));
    }
}
