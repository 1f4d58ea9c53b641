//! Local repository operations used by the remote helper

use std::io::Write;

use git2::{ErrorCode, ObjectType, Oid, Repository};
use tracing::debug;

use crate::pack::inspect_pack;
use crate::GitError;

/// Resolve a push source (`HEAD`, `refs/heads/x`, an oid) to an object id
pub fn resolve_src(repo: &Repository, src: &str) -> Result<Oid, GitError> {
    let object = repo.revparse_single(src)?;
    Ok(object.id())
}

pub fn has_object(repo: &Repository, oid: &str) -> bool {
    let Ok(oid) = Oid::from_str(oid) else {
        return false;
    };
    repo.odb().map(|odb| odb.exists(oid)).unwrap_or(false)
}

/// Pack the objects needed to move the remote from `have` to `want`.
///
/// `have` entries the local repository does not know are ignored. Returns
/// empty bytes when the remote already has everything.
pub fn build_push_pack(repo: &Repository, want: &[Oid], have: &[String]) -> Result<Vec<u8>, GitError> {
    let mut builder = repo.packbuilder()?;
    let mut walk = repo.revwalk()?;
    let mut has_commits = false;

    for oid in want {
        let object = repo.find_object(*oid, None)?;
        match object.kind() {
            Some(ObjectType::Commit) => {
                walk.push(*oid)?;
                has_commits = true;
            }
            Some(ObjectType::Tag) => {
                builder.insert_object(*oid, None)?;
                if let Ok(commit) = object.peel(ObjectType::Commit) {
                    walk.push(commit.id())?;
                    has_commits = true;
                }
            }
            _ => builder.insert_recursive(*oid, None)?,
        }
    }

    for remote in have {
        let Ok(oid) = Oid::from_str(remote) else {
            continue;
        };
        match repo.find_commit(oid) {
            Ok(_) => walk.hide(oid)?,
            Err(e) if e.code() == ErrorCode::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    if has_commits {
        builder.insert_walk(&mut walk)?;
    }

    if builder.object_count() == 0 {
        debug!("nothing to pack");
        return Ok(Vec::new());
    }
    let mut buf = git2::Buf::new();
    builder.write_buf(&mut buf)?;
    debug!(objects = builder.object_count(), bytes = buf.len(), "built push pack");
    Ok(buf.to_vec())
}

/// Feed a fetched pack to the local object database
pub fn index_pack(repo: &Repository, bytes: &[u8]) -> Result<(), GitError> {
    let header = inspect_pack(bytes)?;
    if header.object_count == 0 {
        return Ok(());
    }
    let odb = repo.odb()?;
    let mut writer = odb.packwriter()?;
    writer.write_all(bytes)?;
    writer.commit()?;
    Ok(())
}
