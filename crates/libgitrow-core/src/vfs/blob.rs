//! Byte-buffer stores backing pack files in the virtual filesystem

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GitrowError;

/// Size and modification time of a stored blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMeta {
    pub size: u64,
    pub mtime: DateTime<Utc>,
}

impl BlobMeta {
    fn for_bytes(bytes: &[u8]) -> Self {
        Self {
            size: bytes.len() as u64,
            mtime: Utc::now(),
        }
    }
}

/// Keyed blob storage. Keys are normalized filesystem paths.
pub trait PackBlobStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any previous value
    fn put(&self, key: &str, bytes: &[u8]) -> Result<BlobMeta, GitrowError>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, GitrowError>;

    fn meta(&self, key: &str) -> Result<Option<BlobMeta>, GitrowError>;

    /// Returns false if nothing was stored under `key`
    fn delete(&self, key: &str) -> Result<bool, GitrowError>;

    /// Move a blob to a new key. Returns false if `from` was absent.
    fn rename(&self, from: &str, to: &str) -> Result<bool, GitrowError>;

    fn keys(&self) -> Result<Vec<String>, GitrowError>;
}

/// Blob store held entirely in process memory
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, (Vec<u8>, BlobMeta)>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (Vec<u8>, BlobMeta)>> {
        self.blobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PackBlobStore for MemoryBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<BlobMeta, GitrowError> {
        let meta = BlobMeta::for_bytes(bytes);
        self.lock().insert(key.to_string(), (bytes.to_vec(), meta));
        Ok(meta)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, GitrowError> {
        Ok(self.lock().get(key).map(|(bytes, _)| bytes.clone()))
    }

    fn meta(&self, key: &str) -> Result<Option<BlobMeta>, GitrowError> {
        Ok(self.lock().get(key).map(|(_, meta)| *meta))
    }

    fn delete(&self, key: &str) -> Result<bool, GitrowError> {
        Ok(self.lock().remove(key).is_some())
    }

    fn rename(&self, from: &str, to: &str) -> Result<bool, GitrowError> {
        let mut blobs = self.lock();
        match blobs.remove(from) {
            Some(entry) => {
                blobs.insert(to.to_string(), entry);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn keys(&self) -> Result<Vec<String>, GitrowError> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Blob store persisted in sled, surviving process restarts
#[derive(Clone)]
pub struct SledBlobStore {
    data: sled::Tree,
    meta: sled::Tree,
}

impl SledBlobStore {
    pub fn open(path: &Path) -> Result<Self, GitrowError> {
        let db = sled::open(path)?;
        Self::from_db(&db)
    }

    pub fn from_db(db: &sled::Db) -> Result<Self, GitrowError> {
        Ok(Self {
            data: db.open_tree("blob_data")?,
            meta: db.open_tree("blob_meta")?,
        })
    }

    pub fn flush(&self) -> Result<(), GitrowError> {
        self.data.flush()?;
        self.meta.flush()?;
        Ok(())
    }
}

impl PackBlobStore for SledBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<BlobMeta, GitrowError> {
        let meta = BlobMeta::for_bytes(bytes);
        self.data.insert(key.as_bytes(), bytes)?;
        self.meta.insert(key.as_bytes(), serde_json::to_vec(&meta)?)?;
        Ok(meta)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, GitrowError> {
        Ok(self.data.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    fn meta(&self, key: &str) -> Result<Option<BlobMeta>, GitrowError> {
        match self.meta.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn delete(&self, key: &str) -> Result<bool, GitrowError> {
        self.meta.remove(key.as_bytes())?;
        Ok(self.data.remove(key.as_bytes())?.is_some())
    }

    fn rename(&self, from: &str, to: &str) -> Result<bool, GitrowError> {
        let Some(bytes) = self.data.get(from.as_bytes())? else {
            return Ok(false);
        };
        let meta = self.meta.get(from.as_bytes())?;
        self.data.insert(to.as_bytes(), bytes)?;
        if let Some(meta) = meta {
            self.meta.insert(to.as_bytes(), meta)?;
        }
        self.data.remove(from.as_bytes())?;
        self.meta.remove(from.as_bytes())?;
        Ok(true)
    }

    fn keys(&self) -> Result<Vec<String>, GitrowError> {
        let mut keys = Vec::new();
        for result in self.data.iter().keys() {
            let key = result?;
            keys.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(keys)
    }
}
