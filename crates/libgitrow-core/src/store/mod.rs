//! Row store backed by sled
//!
//! Rows are keyed by `<org>/<repo>/...` so a repository's refs and packs can
//! be scanned by prefix. Ref rows are only ever replaced through
//! [`RowStore::compare_and_set_ref`]; pack rows are append-only.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::GitrowError;
use crate::types::pack::PackRecord;
use crate::types::refs::{PushUpdate, Ref, RefResult};

/// Encoding tag for pack payloads held in the row store
pub const PACK_ENCODING_BASE64: &str = "base64";

/// A ref row together with the exact bytes it was read from.
///
/// The raw bytes are the compare-and-set guard: a write only lands if the
/// row still holds them.
#[derive(Debug, Clone)]
pub struct RefRow {
    pub value: Ref,
    raw: Vec<u8>,
}

/// Result of a compare-and-set on a ref row
#[derive(Debug)]
pub enum CasOutcome {
    Applied,
    /// The row changed underneath us; `current` is what is stored now
    Conflict { current: Option<RefRow> },
}

/// Result of inserting a pack row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackInsert {
    Inserted,
    /// A pack with the same content id is already stored
    Existing,
}

/// Pack row as persisted: the payload is kept in a text-safe encoding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPack {
    pub pack_oid: String,
    pub encoding: String,
    pub data: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

impl StoredPack {
    /// Encode a record for storage
    pub fn encode(record: &PackRecord) -> Self {
        Self {
            pack_oid: record.pack_oid.clone(),
            encoding: PACK_ENCODING_BASE64.to_string(),
            data: BASE64.encode(&record.bytes),
            size: record.bytes.len() as u64,
            created_at: record.created_at,
        }
    }

    /// Decode the stored payload back into a record
    pub fn decode(&self, org: &str, repo: &str) -> Result<PackRecord, GitrowError> {
        if self.encoding != PACK_ENCODING_BASE64 {
            return Err(GitrowError::Encoding(format!(
                "unsupported pack encoding '{}'",
                self.encoding
            )));
        }
        let bytes = BASE64
            .decode(self.data.as_bytes())
            .map_err(|e| GitrowError::Encoding(format!("pack {}: {}", self.pack_oid, e)))?;
        if bytes.len() as u64 != self.size {
            return Err(GitrowError::Encoding(format!(
                "pack {}: size mismatch (stored {}, decoded {})",
                self.pack_oid,
                self.size,
                bytes.len()
            )));
        }
        Ok(PackRecord {
            org: org.to_string(),
            repo: repo.to_string(),
            pack_oid: self.pack_oid.clone(),
            bytes,
            created_at: self.created_at,
        })
    }
}

/// Audit trail entry for one push call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub org: String,
    pub repo: String,
    pub updates: Vec<PushUpdate>,
    pub pack_oid: Option<String>,
    pub results: BTreeMap<String, RefResult>,
    pub at: DateTime<Utc>,
}

/// A RowStore with filesystem-level exclusive lock.
///
/// The lock is held for the lifetime of this struct and automatically
/// released when dropped. This prevents multiple processes from opening
/// the same sled database concurrently.
pub struct LockedStore {
    /// Lock file handle - flock released on drop
    _lock_file: File,
    store: RowStore,
}

impl std::fmt::Debug for LockedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedStore")
            .field("store", &"RowStore { ... }")
            .finish()
    }
}

impl std::ops::Deref for LockedStore {
    type Target = RowStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Ref and pack rows for every repository
#[derive(Clone)]
pub struct RowStore {
    db: sled::Db,
    refs: sled::Tree,
    packs: sled::Tree,
    pack_index: sled::Tree,
    audit: sled::Tree,
}

impl RowStore {
    /// Open or create a store at the given path
    pub fn open(path: &Path) -> Result<Self, GitrowError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Open a throwaway in-memory store
    pub fn temporary() -> Result<Self, GitrowError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, GitrowError> {
        let refs = db.open_tree("refs")?;
        let packs = db.open_tree("packs")?;
        let pack_index = db.open_tree("pack_index")?;
        let audit = db.open_tree("audit")?;
        Ok(Self {
            db,
            refs,
            packs,
            pack_index,
            audit,
        })
    }

    /// Open store with exclusive filesystem lock (non-blocking).
    ///
    /// Lock file is created at `<path>.lock`.
    /// Returns `GitrowError::DbBusy` if another process holds the lock.
    pub fn open_locked(path: &Path) -> Result<LockedStore, GitrowError> {
        let lock_path = path.with_extension("lock");
        let lock_file = File::create(&lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|e| GitrowError::database_locked(Some(&e.to_string())))?;

        let store = Self::open(path)?;
        Ok(LockedStore {
            _lock_file: lock_file,
            store,
        })
    }

    /// Open store with exclusive filesystem lock (blocking with timeout).
    ///
    /// Retries with exponential backoff until the lock is acquired or timeout is reached.
    pub fn open_locked_blocking(path: &Path, timeout: Duration) -> Result<LockedStore, GitrowError> {
        let lock_path = path.with_extension("lock");
        let lock_file = File::create(&lock_path)?;

        let start = Instant::now();
        let mut delay = Duration::from_millis(10);

        loop {
            match lock_file.try_lock_exclusive() {
                Ok(()) => break,
                Err(_) if start.elapsed() < timeout => {
                    std::thread::sleep(delay);
                    delay = (delay * 2).min(Duration::from_millis(200));
                }
                Err(e) => {
                    return Err(GitrowError::DbBusy(format!(
                        "Timeout waiting for database lock: {}",
                        e
                    )))
                }
            }
        }

        let store = Self::open(path)?;
        Ok(LockedStore {
            _lock_file: lock_file,
            store,
        })
    }

    // --- Refs ---

    /// Read a ref row
    pub fn get_ref(&self, org: &str, repo: &str, name: &str) -> Result<Option<RefRow>, GitrowError> {
        let key = ref_key(org, repo, name);
        match self.refs.get(&key)? {
            Some(bytes) => Ok(Some(RefRow {
                value: serde_json::from_slice(&bytes)?,
                raw: bytes.to_vec(),
            })),
            None => Ok(None),
        }
    }

    /// All refs of a repository, sorted by name
    pub fn list_refs(&self, org: &str, repo: &str) -> Result<Vec<Ref>, GitrowError> {
        let mut refs = Vec::new();
        for result in self.refs.scan_prefix(repo_prefix(org, repo)) {
            let (_, value) = result?;
            refs.push(serde_json::from_slice::<Ref>(&value)?);
        }
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(refs)
    }

    /// Replace a ref row only if it still holds `expected`.
    ///
    /// `expected = None` means the ref must not exist yet.
    pub fn compare_and_set_ref(
        &self,
        expected: Option<&RefRow>,
        new: &Ref,
    ) -> Result<CasOutcome, GitrowError> {
        let key = ref_key(&new.org, &new.repo, &new.name);
        let new_bytes = serde_json::to_vec(new)?;
        let old = expected.map(|row| row.raw.as_slice());

        match self.refs.compare_and_swap(&key, old, Some(new_bytes))? {
            Ok(()) => Ok(CasOutcome::Applied),
            Err(_) => Ok(CasOutcome::Conflict {
                current: self.get_ref(&new.org, &new.repo, &new.name)?,
            }),
        }
    }

    // --- Packs ---

    /// Append a pack row; storing an already known pack id is a no-op
    pub fn insert_pack(&self, record: &PackRecord) -> Result<PackInsert, GitrowError> {
        self.insert_stored(&record.org, &record.repo, &StoredPack::encode(record))
    }

    /// Append an already encoded pack row
    pub fn insert_stored(
        &self,
        org: &str,
        repo: &str,
        stored: &StoredPack,
    ) -> Result<PackInsert, GitrowError> {
        let idx_key = pack_index_key(org, repo, &stored.pack_oid);
        if self.pack_index.contains_key(&idx_key)? {
            return Ok(PackInsert::Existing);
        }

        let seq = self.db.generate_id()?;
        let row_key = pack_key(org, repo, seq);
        self.packs.insert(&row_key, serde_json::to_vec(stored)?)?;

        // A concurrent writer may have stored the same content meanwhile
        match self
            .pack_index
            .compare_and_swap(&idx_key, None as Option<&[u8]>, Some(row_key.clone()))?
        {
            Ok(()) => Ok(PackInsert::Inserted),
            Err(_) => {
                self.packs.remove(&row_key)?;
                Ok(PackInsert::Existing)
            }
        }
    }

    /// Most recently stored pack of a repository
    pub fn latest_pack(&self, org: &str, repo: &str) -> Result<Option<StoredPack>, GitrowError> {
        match self.packs.scan_prefix(repo_prefix(org, repo)).next_back() {
            Some(result) => {
                let (_, value) = result?;
                Ok(Some(serde_json::from_slice(&value)?))
            }
            None => Ok(None),
        }
    }

    /// Every stored pack of a repository, oldest first
    pub fn list_packs(&self, org: &str, repo: &str) -> Result<Vec<StoredPack>, GitrowError> {
        let mut packs = Vec::new();
        for result in self.packs.scan_prefix(repo_prefix(org, repo)) {
            let (_, value) = result?;
            packs.push(serde_json::from_slice(&value)?);
        }
        Ok(packs)
    }

    /// Look up a pack by its content id
    pub fn get_pack(
        &self,
        org: &str,
        repo: &str,
        pack_oid: &str,
    ) -> Result<Option<StoredPack>, GitrowError> {
        let Some(row_key) = self.pack_index.get(pack_index_key(org, repo, pack_oid))? else {
            return Ok(None);
        };
        match self.packs.get(&row_key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Remove a pack row (retention only)
    pub fn delete_pack(&self, org: &str, repo: &str, pack_oid: &str) -> Result<bool, GitrowError> {
        let Some(row_key) = self.pack_index.remove(pack_index_key(org, repo, pack_oid))? else {
            return Ok(false);
        };
        self.packs.remove(&row_key)?;
        Ok(true)
    }

    pub fn pack_count(&self, org: &str, repo: &str) -> usize {
        self.packs.scan_prefix(repo_prefix(org, repo)).count()
    }

    // --- Audit ---

    pub fn record_audit(&self, entry: &AuditEntry) -> Result<(), GitrowError> {
        let seq = self.db.generate_id()?;
        let key = pack_key(&entry.org, &entry.repo, seq);
        self.audit.insert(key, serde_json::to_vec(entry)?)?;
        Ok(())
    }

    /// Audit entries of a repository, oldest first
    pub fn list_audit(&self, org: &str, repo: &str) -> Result<Vec<AuditEntry>, GitrowError> {
        let mut entries = Vec::new();
        for result in self.audit.scan_prefix(repo_prefix(org, repo)) {
            let (_, value) = result?;
            entries.push(serde_json::from_slice(&value)?);
        }
        Ok(entries)
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<(), GitrowError> {
        self.db.flush()?;
        Ok(())
    }
}

// Key construction helpers

fn repo_prefix(org: &str, repo: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(org.len() + repo.len() + 2);
    key.extend_from_slice(org.as_bytes());
    key.push(b'/');
    key.extend_from_slice(repo.as_bytes());
    key.push(b'/');
    key
}

fn ref_key(org: &str, repo: &str, name: &str) -> Vec<u8> {
    let mut key = repo_prefix(org, repo);
    key.extend_from_slice(name.as_bytes());
    key
}

fn pack_key(org: &str, repo: &str, seq: u64) -> Vec<u8> {
    let mut key = repo_prefix(org, repo);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn pack_index_key(org: &str, repo: &str, pack_oid: &str) -> Vec<u8> {
    let mut key = repo_prefix(org, repo);
    key.extend_from_slice(pack_oid.as_bytes());
    key
}

/// Org and repo names become key segments and mirror directory names
pub fn validate_repo_name(name: &str) -> Result<(), GitrowError> {
    let valid = !name.is_empty()
        && name.len() <= 100
        && name != "."
        && name != ".."
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    if valid {
        Ok(())
    } else {
        Err(GitrowError::InvalidArgs(format!("invalid org or repo name '{}'", name)))
    }
}
