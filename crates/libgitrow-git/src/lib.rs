//! Git object plumbing for gitrow
//!
//! - [`pack`]: pack decoding with delta resolution and trailer verification
//! - [`loose`] / [`objects`]: loose-object database over the virtual filesystem
//! - [`index_queue`]: the client-side queue that indexes replicated packs
//! - [`mirror`]: the server-side bare repository used for ancestry checks
//! - [`toolchain`]: local repository operations for the remote helper

mod error;
pub mod index_queue;
pub mod loose;
pub mod mirror;
pub mod object;
pub mod objects;
pub mod pack;
pub mod toolchain;

pub use error::GitError;
pub use index_queue::{
    FileIndexState, IndexProgress, IndexReport, IndexStateStore, IndexStatus, MemoryIndexState,
    ObjectIndexQueue, Subscription,
};
pub use loose::LooseObjectStore;
pub use mirror::{Ancestry, ObjectMirror};
pub use object::ObjectKind;
pub use objects::{Commit, ObjectReader, TreeEntry};
pub use pack::{decode_pack, decode_pack_with, inspect_pack, DecodedPack, PackHeader, PackObject};
