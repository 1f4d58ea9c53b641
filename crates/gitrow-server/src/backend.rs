//! Storage shared by the push and fetch services
//!
//! The row store is the source of truth. Each repository additionally gets
//! a bare object mirror so ancestry and existence checks do not have to
//! decode packs; a missing mirror is rebuilt by replaying the stored packs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use libgitrow_core::config::ServerConfig;
use libgitrow_core::store::validate_repo_name;
use libgitrow_core::{LockedStore, RowStore};
use libgitrow_git::ObjectMirror;
use libgitrow_wire::Notification;
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::notify::{LogSink, NotificationSink};

pub type MirrorHandle = Arc<Mutex<ObjectMirror>>;

pub struct Backend {
    store: LockedStore,
    mirrors_root: PathBuf,
    mirrors: Mutex<HashMap<(String, String), MirrorHandle>>,
    config: ServerConfig,
    sink: Arc<dyn NotificationSink>,
}

impl Backend {
    /// Open the data directory, taking the row store's process lock
    pub fn open(config: ServerConfig) -> Result<Self, ServerError> {
        Self::open_with_sink(config, Arc::new(LogSink))
    }

    pub fn open_with_sink(
        config: ServerConfig,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self, ServerError> {
        let mirrors_root = config.mirrors_path();
        std::fs::create_dir_all(&mirrors_root)
            .map_err(|e| ServerError::Internal(format!("{}: {}", mirrors_root.display(), e)))?;
        let store = match config.lock_wait_ms {
            0 => RowStore::open_locked(&config.rows_path())?,
            wait => RowStore::open_locked_blocking(&config.rows_path(), Duration::from_millis(wait))?,
        };
        info!(data_dir = %config.data_dir.display(), "backend opened");
        Ok(Self {
            store,
            mirrors_root,
            mirrors: Mutex::new(HashMap::new()),
            config,
            sink,
        })
    }

    pub fn store(&self) -> &RowStore {
        &self.store
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn notify(&self, notification: Notification) {
        self.sink.notify(&notification);
    }

    /// Object mirror of a repository, opened (and rebuilt if absent) on
    /// first use
    pub fn mirror(&self, org: &str, repo: &str) -> Result<MirrorHandle, ServerError> {
        validate_repo_name(org)?;
        validate_repo_name(repo)?;

        let mut mirrors = self
            .mirrors
            .lock()
            .map_err(|_| ServerError::lock_poisoned("mirror table"))?;
        let key = (org.to_string(), repo.to_string());
        if let Some(handle) = mirrors.get(&key) {
            return Ok(handle.clone());
        }

        let path = self.mirrors_root.join(org).join(format!("{}.git", repo));
        let (mirror, created) = ObjectMirror::open_or_init(&path)?;
        debug!(org, repo, path = %mirror.path().display(), created, "object mirror opened");
        if created {
            self.replay_packs(org, repo, &mirror)?;
        }
        let handle = Arc::new(Mutex::new(mirror));
        mirrors.insert(key, handle.clone());
        Ok(handle)
    }

    /// Recreate a mirror from the pack rows that remain, dropping objects
    /// whose rows were deleted
    pub fn rebuild_mirror(&self, org: &str, repo: &str, handle: &MirrorHandle) -> Result<(), ServerError> {
        let mut mirror = lock_mirror(handle)?;
        let path = mirror.path().to_path_buf();
        std::fs::remove_dir_all(&path)
            .map_err(|e| ServerError::Internal(format!("{}: {}", path.display(), e)))?;
        let (fresh, _) = ObjectMirror::open_or_init(&path)?;
        self.replay_packs(org, repo, &fresh)?;
        *mirror = fresh;
        debug!(org, repo, "object mirror rebuilt");
        Ok(())
    }

    fn replay_packs(&self, org: &str, repo: &str, mirror: &ObjectMirror) -> Result<(), ServerError> {
        let packs = self.store.list_packs(org, repo)?;
        if packs.is_empty() {
            return Ok(());
        }
        debug!(org, repo, packs = packs.len(), "rebuilding object mirror");
        for stored in &packs {
            let record = match stored.decode(org, repo) {
                Ok(record) => record,
                Err(e) => {
                    warn!(org, repo, pack_oid = %stored.pack_oid, error = %e, "skipping undecodable pack");
                    continue;
                }
            };
            if let Err(e) = mirror.ingest_pack(&record.bytes) {
                warn!(org, repo, pack_oid = %stored.pack_oid, error = %e, "skipping unreadable pack");
            }
        }
        Ok(())
    }
}

pub(crate) fn lock_mirror(handle: &MirrorHandle) -> Result<MutexGuard<'_, ObjectMirror>, ServerError> {
    handle.lock().map_err(|_| ServerError::lock_poisoned("mirror"))
}
