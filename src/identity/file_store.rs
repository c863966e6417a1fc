//! File-Backed Identity Store
//!
//! Standalone-mode persistence: one fixed-size record file per drive under a
//! root directory. A missing file reads as an uninitialized stamp region,
//! matching a factory-fresh drive.

use crate::error::Result;
use crate::identity::stamp::{IdentityStamp, StampRead, STAMP_SIZE};
use crate::identity::store::IdentityStore;
use crate::topology::types::PhysicalDriveId;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Identity store persisting stamp records as files on the local filesystem.
pub struct FileIdentityStore {
    root: PathBuf,
}

impl FileIdentityStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn stamp_path(&self, drive: PhysicalDriveId) -> PathBuf {
        self.root.join(format!("stamp_{:08x}.bin", drive.0))
    }
}

#[async_trait]
impl IdentityStore for FileIdentityStore {
    async fn read_stamp(&self, drive: PhysicalDriveId) -> Result<StampRead> {
        let path = self.stamp_path(drive);
        match tokio::fs::read(&path).await {
            Ok(raw) => IdentityStamp::decode(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(StampRead::Uninitialized)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_stamp(&self, drive: PhysicalDriveId, stamp: &IdentityStamp) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.stamp_path(drive);
        let tmp = path.with_extension("tmp");
        let raw = stamp.encode();
        debug_assert_eq!(raw.len(), STAMP_SIZE);
        tokio::fs::write(&tmp, &raw).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(drive = %drive, location = %stamp.location, "stamp written");
        Ok(())
    }
}
