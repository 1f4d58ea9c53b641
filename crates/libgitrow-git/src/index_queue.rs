//! Client-side queue that explodes replicated pack rows into the local
//! object database
//!
//! Packs are decoded strictly one at a time. A pack id is recorded as
//! indexed only once its objects are all written, and the set of indexed
//! ids is persisted through an [`IndexStateStore`] so a reload skips packs
//! that were already handled.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use libgitrow_core::{PackRecord, VirtualFs};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::loose::LooseObjectStore;
use crate::objects::ObjectReader;
use crate::pack::decode_pack_with;
use crate::GitError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    Idle,
    Indexing,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexProgress {
    pub status: IndexStatus,
    pub total: usize,
    pub completed: usize,
}

impl IndexProgress {
    fn idle() -> Self {
        Self {
            status: IndexStatus::Idle,
            total: 0,
            completed: 0,
        }
    }
}

/// What one `index_packs` call did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexReport {
    pub indexed: Vec<String>,
    /// Already indexed or duplicated within the call
    pub skipped: usize,
    /// Packs whose bytes failed to decode, with the reason
    pub failed: Vec<(String, String)>,
}

/// Persistence for the set of already indexed pack ids
pub trait IndexStateStore: Send + Sync {
    fn load(&self) -> Result<BTreeSet<String>, GitError>;
    fn save(&self, indexed: &BTreeSet<String>) -> Result<(), GitError>;
}

#[derive(Serialize, Deserialize)]
struct IndexStateFile {
    indexed: BTreeSet<String>,
}

/// Indexed set kept in a JSON file
#[derive(Debug, Clone)]
pub struct FileIndexState {
    path: PathBuf,
}

impl FileIndexState {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl IndexStateStore for FileIndexState {
    fn load(&self) -> Result<BTreeSet<String>, GitError> {
        if !self.path.exists() {
            return Ok(BTreeSet::new());
        }
        let content = std::fs::read(&self.path)?;
        let state: IndexStateFile = serde_json::from_slice(&content)?;
        Ok(state.indexed)
    }

    fn save(&self, indexed: &BTreeSet<String>) -> Result<(), GitError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let state = IndexStateFile {
            indexed: indexed.clone(),
        };
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&state)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Indexed set that lives only as long as the process
#[derive(Debug, Default)]
pub struct MemoryIndexState {
    indexed: Mutex<BTreeSet<String>>,
}

impl MemoryIndexState {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndexStateStore for MemoryIndexState {
    fn load(&self) -> Result<BTreeSet<String>, GitError> {
        Ok(lock(&self.indexed).clone())
    }

    fn save(&self, indexed: &BTreeSet<String>) -> Result<(), GitError> {
        *lock(&self.indexed) = indexed.clone();
        Ok(())
    }
}

type Listener = Arc<dyn Fn(&IndexProgress) + Send + Sync>;
type ListenerList = Mutex<Vec<(u64, Listener)>>;

/// Handle returned by [`ObjectIndexQueue::subscribe`]
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl Subscription {
    /// Stop receiving progress updates
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            lock(&listeners).retain(|(id, _)| *id != self.id);
        }
    }
}

pub struct ObjectIndexQueue {
    objects: LooseObjectStore,
    state: Arc<dyn IndexStateStore>,
    indexed: Mutex<BTreeSet<String>>,
    progress: Mutex<IndexProgress>,
    listeners: Arc<ListenerList>,
    next_listener: AtomicU64,
    decodes: AtomicU64,
    run_lock: tokio::sync::Mutex<()>,
}

impl ObjectIndexQueue {
    /// Create a queue writing into `fs`, loading the indexed set from `state`
    pub fn new(fs: Arc<VirtualFs>, state: Arc<dyn IndexStateStore>) -> Result<Self, GitError> {
        let indexed = state.load()?;
        debug!(count = indexed.len(), "loaded indexed pack set");
        Ok(Self {
            objects: LooseObjectStore::new(fs),
            state,
            indexed: Mutex::new(indexed),
            progress: Mutex::new(IndexProgress::idle()),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener: AtomicU64::new(1),
            decodes: AtomicU64::new(0),
            run_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn reader(&self) -> ObjectReader {
        ObjectReader::new(self.objects.clone())
    }

    pub fn objects(&self) -> &LooseObjectStore {
        &self.objects
    }

    pub fn progress(&self) -> IndexProgress {
        *lock(&self.progress)
    }

    pub fn is_indexed(&self, pack_oid: &str) -> bool {
        lock(&self.indexed).contains(pack_oid)
    }

    /// Number of pack decodes performed by this queue
    pub fn decode_count(&self) -> u64 {
        self.decodes.load(Ordering::SeqCst)
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&IndexProgress) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        lock(&self.listeners).push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    fn set_progress(&self, progress: IndexProgress) {
        *lock(&self.progress) = progress;
        // Snapshot so a listener may subscribe or unsubscribe re-entrantly
        let listeners: Vec<Listener> = lock(&self.listeners)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(&progress);
        }
    }

    /// Forget one pack so the next `index_packs` decodes it again
    pub fn invalidate(&self, pack_oid: &str) -> Result<bool, GitError> {
        let mut indexed = lock(&self.indexed);
        let removed = indexed.remove(pack_oid);
        if removed {
            self.state.save(&indexed)?;
        }
        Ok(removed)
    }

    pub fn invalidate_all(&self) -> Result<(), GitError> {
        let mut indexed = lock(&self.indexed);
        indexed.clear();
        self.state.save(&indexed)?;
        Ok(())
    }

    /// Decode every pack not yet indexed, one at a time.
    ///
    /// Calls are serialized; a second caller waits for the first to finish.
    /// A pack that fails to decode is reported and left unindexed, the rest
    /// of the batch still runs.
    pub async fn index_packs(&self, packs: &[PackRecord]) -> Result<IndexReport, GitError> {
        let _running = self.run_lock.lock().await;

        let mut report = IndexReport::default();
        let mut queued = BTreeSet::new();
        let todo: Vec<&PackRecord> = {
            let indexed = lock(&self.indexed);
            packs
                .iter()
                .filter(|p| {
                    let fresh = !indexed.contains(&p.pack_oid) && queued.insert(p.pack_oid.clone());
                    if !fresh {
                        report.skipped += 1;
                    }
                    fresh
                })
                .collect()
        };

        let total = todo.len();
        self.set_progress(IndexProgress {
            status: IndexStatus::Indexing,
            total,
            completed: 0,
        });

        for (i, pack) in todo.into_iter().enumerate() {
            match self.index_one(pack) {
                Ok(count) => {
                    info!(pack_oid = %pack.pack_oid, objects = count, "indexed pack");
                    report.indexed.push(pack.pack_oid.clone());
                }
                Err(e) => {
                    warn!(pack_oid = %pack.pack_oid, error = %e, "failed to index pack");
                    report.failed.push((pack.pack_oid.clone(), e.to_string()));
                }
            }
            self.set_progress(IndexProgress {
                status: IndexStatus::Indexing,
                total,
                completed: i + 1,
            });
            tokio::task::yield_now().await;
        }

        self.set_progress(IndexProgress {
            status: IndexStatus::Ready,
            total,
            completed: total,
        });
        Ok(report)
    }

    /// Decode fully before touching the filesystem so a bad pack leaves
    /// nothing behind
    fn index_one(&self, pack: &PackRecord) -> Result<usize, GitError> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        let decoded = decode_pack_with(&pack.bytes, |oid| self.objects.read(oid).ok().flatten())?;

        if decoded.pack_oid() != pack.pack_oid {
            warn!(
                expected = %pack.pack_oid,
                actual = %decoded.pack_oid(),
                "pack row id differs from trailer checksum"
            );
        }

        self.objects.write_pack(&pack.pack_oid, &pack.bytes)?;
        for object in &decoded.objects {
            self.objects.write(object.kind, &object.data)?;
        }

        let mut indexed = lock(&self.indexed);
        let mut next = indexed.clone();
        next.insert(pack.pack_oid.clone());
        self.state.save(&next)?;
        *indexed = next;
        Ok(decoded.objects.len())
    }
}
