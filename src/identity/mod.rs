//! Drive identity: the on-drive stamp record and the stores that read it

pub mod file_store;
pub mod stamp;
pub mod store;

pub use file_store::FileIdentityStore;
pub use stamp::{IdentityStamp, StampRead, STAMP_MAGIC, STAMP_SIZE, STAMP_VERSION};
pub use store::IdentityStore;
