//! Core library for gitrow
//!
//! Holds the data model shared by the server and the remote helper, the
//! sled-backed row store, configuration, and the virtual object filesystem
//! used on the client read path.

pub mod config;
pub mod error;
pub mod store;
pub mod types;
pub mod vfs;

pub use error::GitrowError;
pub use store::{AuditEntry, CasOutcome, LockedStore, PackInsert, RefRow, RowStore, StoredPack};
pub use types::pack::PackRecord;
pub use types::refs::{PushOutcome, PushUpdate, Ref, RefResult, RefStatus};
pub use vfs::{FsError, MemoryBlobStore, PackBlobStore, PosixCode, SledBlobStore, VirtualFs};
