//! Fetch pack service

use std::sync::Arc;

use libgitrow_core::store::{validate_repo_name, PACK_ENCODING_BASE64};
use libgitrow_core::types::ids::is_hex_oid;
use libgitrow_core::PackRecord;
use libgitrow_git::inspect_pack;
use libgitrow_wire::messages::encode_pack;
use libgitrow_wire::FetchResponse;
use tracing::{debug, warn};

use crate::backend::{lock_mirror, Backend};
use crate::error::ServerError;

/// A pack answering a fetch
#[derive(Debug, Clone)]
pub struct FetchedPack {
    pub record: PackRecord,
    /// True when the pack is a stored row returned as-is
    pub stored: bool,
}

impl FetchedPack {
    pub fn into_response(self) -> FetchResponse {
        FetchResponse {
            pack: encode_pack(&self.record.bytes),
            pack_encoding: PACK_ENCODING_BASE64.to_string(),
            keep: Some(self.stored),
            pack_oid: Some(self.record.pack_oid.clone()),
            size: Some(self.record.size() as u64),
            created_at: Some(self.record.created_at),
        }
    }
}

pub struct FetchPackService {
    backend: Arc<Backend>,
}

impl FetchPackService {
    pub fn new(backend: Arc<Backend>) -> Self {
        Self { backend }
    }

    /// Without wants: the newest stored pack, byte for byte. With wants: a
    /// pack holding the full closure of every want, or `None` if any want
    /// is unknown to the repository.
    pub fn fetch_pack(
        &self,
        org: &str,
        repo: &str,
        wants: Option<&[String]>,
    ) -> Result<Option<FetchedPack>, ServerError> {
        validate_repo_name(org)?;
        validate_repo_name(repo)?;

        match wants {
            Some(wants) if !wants.is_empty() => self.pack_for_wants(org, repo, wants),
            _ => self.latest(org, repo),
        }
    }

    fn latest(&self, org: &str, repo: &str) -> Result<Option<FetchedPack>, ServerError> {
        let Some(stored) = self.backend.store().latest_pack(org, repo)? else {
            debug!(org, repo, "no packs stored");
            return Ok(None);
        };
        match stored.decode(org, repo) {
            Ok(record) => Ok(Some(FetchedPack {
                record,
                stored: true,
            })),
            Err(e) => {
                warn!(org, repo, pack_oid = %stored.pack_oid, error = %e, "stored pack is malformed");
                Ok(None)
            }
        }
    }

    fn pack_for_wants(
        &self,
        org: &str,
        repo: &str,
        wants: &[String],
    ) -> Result<Option<FetchedPack>, ServerError> {
        let wants: Vec<String> = wants.iter().map(|w| w.to_ascii_lowercase()).collect();
        if let Some(bad) = wants.iter().find(|w| !is_hex_oid(w)) {
            return Err(ServerError::BadRequest(format!("invalid object id '{}'", bad)));
        }
        if self.backend.store().pack_count(org, repo) == 0 {
            return Ok(None);
        }

        let handle = self.backend.mirror(org, repo)?;
        let mirror = lock_mirror(&handle)?;
        if let Some(missing) = wants.iter().find(|w| !mirror.contains(w)) {
            debug!(org, repo, want = %missing, "want not present");
            return Ok(None);
        }
        let bytes = mirror.build_pack(&wants)?;
        drop(mirror);

        let header = inspect_pack(&bytes)?;
        debug!(org, repo, wants = wants.len(), objects = header.object_count, "built pack for wants");
        Ok(Some(FetchedPack {
            record: PackRecord::new(org, repo, &header.pack_oid(), bytes),
            stored: false,
        }))
    }
}
