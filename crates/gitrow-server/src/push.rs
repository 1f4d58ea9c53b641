//! Push persistence
//!
//! A push stores its pack as a new row, then moves each requested ref with
//! a compare-and-set on the ref row. Refs are independent: one failing
//! does not stop the others.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use libgitrow_core::store::validate_repo_name;
use libgitrow_core::types::ids::{is_hex_oid, is_null_oid};
use libgitrow_core::{
    AuditEntry, CasOutcome, PackInsert, PackRecord, PushOutcome, PushUpdate, Ref, RefResult,
};
use libgitrow_git::{inspect_pack, Ancestry};
use libgitrow_wire::Notification;
use tracing::{debug, info, warn};

use crate::backend::{lock_mirror, Backend, MirrorHandle};
use crate::error::ServerError;

/// Validation attempts per ref: the first try plus one re-validation after
/// losing a compare-and-set
const CAS_ATTEMPTS: usize = 2;

pub struct PushPersistenceService {
    backend: Arc<Backend>,
}

impl PushPersistenceService {
    pub fn new(backend: Arc<Backend>) -> Self {
        Self { backend }
    }

    /// Persist a pack and apply ref updates.
    ///
    /// Request-level problems (bad names, malformed or oversized pack) fail
    /// the whole call before anything is written. Everything after that is
    /// reported per ref.
    pub fn persist_push(
        &self,
        org: &str,
        repo: &str,
        updates: &[PushUpdate],
        pack: &[u8],
    ) -> Result<PushOutcome, ServerError> {
        validate_repo_name(org)?;
        validate_repo_name(repo)?;
        if updates.is_empty() {
            return Err(ServerError::BadRequest("push carries no ref updates".to_string()));
        }
        let limit = self.backend.config().max_pack_bytes;
        if pack.len() > limit {
            return Err(ServerError::PayloadTooLarge(format!(
                "pack of {} bytes exceeds the limit of {} bytes",
                pack.len(),
                limit
            )));
        }

        let mirror = self.backend.mirror(org, repo)?;
        let pack_oid = self.store_pack(org, repo, &mirror, pack)?;

        let mut results = BTreeMap::new();
        for update in updates {
            let result = match self.apply_update(org, repo, &mirror, update) {
                Ok(result) => result,
                Err(e) => {
                    warn!(org, repo, ref_name = %update.dst_ref, error = %e, "ref update failed");
                    RefResult::error(e.to_string())
                }
            };
            results.insert(update.dst_ref.clone(), result);
        }
        let outcome = PushOutcome::from_results(results);

        let entry = AuditEntry {
            id: uuid::Uuid::new_v4().to_string(),
            org: org.to_string(),
            repo: repo.to_string(),
            updates: updates.to_vec(),
            pack_oid: pack_oid.clone(),
            results: outcome.results.clone(),
            at: Utc::now(),
        };
        if let Err(e) = self.backend.store().record_audit(&entry) {
            warn!(org, repo, error = %e, "failed to record push audit entry");
        }

        if pack_oid.is_some() {
            if let Some(keep) = self.backend.config().retention.keep_recent {
                if let Err(e) = self.apply_retention(org, repo, &mirror, keep) {
                    warn!(org, repo, error = %e, "pack retention failed");
                }
            }
        }
        self.backend.store().flush()?;

        info!(
            org,
            repo,
            refs = updates.len(),
            ok = outcome.ok,
            pack_oid = pack_oid.as_deref().unwrap_or("-"),
            "push persisted"
        );
        Ok(outcome)
    }

    /// Validate the pack, make its objects visible to the mirror and append
    /// it as a row. Returns `None` for a pack without objects.
    fn store_pack(
        &self,
        org: &str,
        repo: &str,
        mirror: &MirrorHandle,
        pack: &[u8],
    ) -> Result<Option<String>, ServerError> {
        if pack.is_empty() {
            return Ok(None);
        }
        let header = inspect_pack(pack)?;
        if header.object_count == 0 {
            return Ok(None);
        }
        let pack_oid = header.pack_oid();

        let store = self.backend.store();
        let record = PackRecord::new(org, repo, &pack_oid, pack.to_vec());
        let inserted = store.insert_pack(&record)?;

        // The mirror only ever holds objects some pack row also holds
        if let Err(e) = lock_mirror(mirror)?.ingest_pack(pack) {
            if inserted == PackInsert::Inserted {
                store.delete_pack(org, repo, &pack_oid)?;
            }
            return Err(e.into());
        }

        match inserted {
            PackInsert::Inserted => {
                debug!(org, repo, pack_oid = %pack_oid, size = record.size(), "pack stored");
                self.backend.notify(Notification::pack_stored(
                    org,
                    repo,
                    &pack_oid,
                    record.size() as u64,
                ));
            }
            PackInsert::Existing => {
                debug!(org, repo, pack_oid = %pack_oid, "pack already stored");
            }
        }
        Ok(Some(pack_oid))
    }

    fn apply_update(
        &self,
        org: &str,
        repo: &str,
        mirror: &MirrorHandle,
        update: &PushUpdate,
    ) -> Result<RefResult, ServerError> {
        let name = update.dst_ref.as_str();
        if !name.starts_with("refs/") || !git2::Reference::is_valid_name(name) {
            return Ok(RefResult::error(format!("invalid ref name '{}'", name)));
        }
        let target = update.src_oid.to_ascii_lowercase();
        if !is_hex_oid(&target) {
            return Ok(RefResult::error(format!("invalid object id '{}'", update.src_oid)));
        }
        if is_null_oid(&target) {
            return Ok(RefResult::error(format!("deleting {} is not supported", name)));
        }
        if !lock_mirror(mirror)?.contains(&target) {
            return Ok(RefResult::error(format!(
                "object {} not found in any stored pack",
                target
            )));
        }

        let store = self.backend.store();
        let walk_limit = self.backend.config().ancestry_walk_limit;
        let mut current = store.get_ref(org, repo, name)?;

        for attempt in 1..=CAS_ATTEMPTS {
            if let Some(row) = &current {
                let old = row.value.target_oid.as_str();
                if old == target {
                    return Ok(RefResult::ok_with("up to date"));
                }
                if !update.force {
                    match lock_mirror(mirror)?.is_descendant(&target, old, walk_limit)? {
                        Ancestry::Descendant => {}
                        Ancestry::NotDescendant => {
                            return Ok(RefResult::error(format!(
                                "non-fast-forward: {} is not a descendant of {}",
                                target, old
                            )));
                        }
                        Ancestry::LimitExceeded => {
                            return Ok(RefResult::error(format!(
                                "non-fast-forward: {} not found within {} commits of {}",
                                old, walk_limit, target
                            )));
                        }
                    }
                }
            }

            let new = Ref::new(org, repo, name, &target);
            match store.compare_and_set_ref(current.as_ref(), &new)? {
                CasOutcome::Applied => {
                    let old_target = current.map(|row| row.value.target_oid);
                    debug!(org, repo, ref_name = name, old = ?old_target, new = %target, "ref updated");
                    self.backend.notify(Notification::ref_updated(
                        org,
                        repo,
                        name,
                        old_target,
                        &target,
                        update.force,
                    ));
                    return Ok(RefResult::ok());
                }
                CasOutcome::Conflict { current: latest } => {
                    debug!(org, repo, ref_name = name, attempt, "ref changed concurrently, re-validating");
                    current = latest;
                }
            }
        }

        Ok(RefResult::error(format!(
            "{} was updated concurrently; fetch and try again",
            name
        )))
    }

    /// Consolidate reachable history into one row, then drop all but the
    /// newest `keep` rows
    fn apply_retention(
        &self,
        org: &str,
        repo: &str,
        mirror: &MirrorHandle,
        keep: usize,
    ) -> Result<(), ServerError> {
        let store = self.backend.store();
        if store.pack_count(org, repo) <= keep {
            return Ok(());
        }

        let tips: Vec<String> = store
            .list_refs(org, repo)?
            .into_iter()
            .map(|r| r.target_oid)
            .collect();
        let bytes = lock_mirror(mirror)?.build_full_pack(&tips)?;
        let header = inspect_pack(&bytes)?;
        let consolidated = if header.object_count > 0 {
            let pack_oid = header.pack_oid();
            store.insert_pack(&PackRecord::new(org, repo, &pack_oid, bytes))?;
            Some(pack_oid)
        } else {
            None
        };

        // The consolidated row may already have existed at an older position
        let packs = store.list_packs(org, repo)?;
        let mut excess = packs.len().saturating_sub(keep);
        let mut removed = Vec::new();
        for stored in packs {
            if excess == 0 {
                break;
            }
            if consolidated.as_deref() == Some(stored.pack_oid.as_str()) {
                continue;
            }
            if store.delete_pack(org, repo, &stored.pack_oid)? {
                removed.push(stored.pack_oid);
            }
            excess -= 1;
        }
        if !removed.is_empty() {
            self.backend.rebuild_mirror(org, repo, mirror)?;
            info!(org, repo, removed = removed.len(), kept = keep, "pruned superseded packs");
            self.backend.notify(Notification::PacksPruned {
                org: org.to_string(),
                repo: repo.to_string(),
                removed,
            });
        }
        Ok(())
    }
}
