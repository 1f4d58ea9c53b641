//! Loose-object database on top of [`VirtualFs`]

use std::io::{Read, Write};
use std::sync::Arc;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use libgitrow_core::types::ids::{id_to_hex, ObjectId};
use libgitrow_core::{PosixCode, VirtualFs};

use crate::object::{hash_object, object_header, parse_loose, ObjectKind};
use crate::GitError;

/// Default object directory inside the virtual filesystem
pub const OBJECTS_DIR: &str = "/objects";

/// Reads and writes zlib-compressed loose objects at `<root>/xx/yyyy…`
#[derive(Debug, Clone)]
pub struct LooseObjectStore {
    fs: Arc<VirtualFs>,
    root: String,
}

impl LooseObjectStore {
    pub fn new(fs: Arc<VirtualFs>) -> Self {
        Self::with_root(fs, OBJECTS_DIR)
    }

    pub fn with_root(fs: Arc<VirtualFs>, root: &str) -> Self {
        Self {
            fs,
            root: libgitrow_core::vfs::path::normalize(root),
        }
    }

    pub fn fs(&self) -> &Arc<VirtualFs> {
        &self.fs
    }

    pub fn object_path(&self, oid: &ObjectId) -> String {
        let hex = id_to_hex(oid);
        format!("{}/{}/{}", self.root, &hex[..2], &hex[2..])
    }

    pub fn pack_dir(&self) -> String {
        format!("{}/pack", self.root)
    }

    pub fn pack_path(&self, pack_oid: &str) -> String {
        format!("{}/pack-{}.pack", self.pack_dir(), pack_oid)
    }

    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.fs.exists(&self.object_path(oid))
    }

    /// Store an object; an object already present is left untouched
    pub fn write(&self, kind: ObjectKind, data: &[u8]) -> Result<ObjectId, GitError> {
        let oid = hash_object(kind, data);
        let path = self.object_path(&oid);
        if self.fs.exists(&path) {
            return Ok(oid);
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&object_header(kind, data.len()))?;
        encoder.write_all(data)?;
        let compressed = encoder.finish()?;

        let hex = id_to_hex(&oid);
        self.fs.mkdir_all(&format!("{}/{}", self.root, &hex[..2]))?;
        self.fs.write_file(&path, &compressed)?;
        Ok(oid)
    }

    /// Read an object; `None` if it is not stored
    pub fn read(&self, oid: &ObjectId) -> Result<Option<(ObjectKind, Vec<u8>)>, GitError> {
        let compressed = match self.fs.read_file(&self.object_path(oid)) {
            Ok(bytes) => bytes,
            Err(e) if e.code == PosixCode::ENOENT => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut raw = Vec::new();
        ZlibDecoder::new(compressed.as_slice())
            .read_to_end(&mut raw)
            .map_err(|e| GitError::InvalidObject {
                oid: id_to_hex(oid),
                reason: format!("zlib: {}", e),
            })?;
        parse_loose(&id_to_hex(oid), &raw).map(Some)
    }

    /// Keep the raw pack alongside the exploded objects
    pub fn write_pack(&self, pack_oid: &str, bytes: &[u8]) -> Result<String, GitError> {
        self.fs.mkdir_all(&self.pack_dir())?;
        let path = self.pack_path(pack_oid);
        self.fs.write_file(&path, bytes)?;
        Ok(path)
    }
}
