//! Server-side object mirror
//!
//! Every accepted pack is also written into a bare repository so the server
//! can answer "does this object exist" and "is this a fast-forward" without
//! decoding packs on every request, and can build packs for fetches.

use std::collections::{HashSet, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};

use git2::{ErrorCode, ObjectType, Oid, Repository};
use tracing::debug;

use crate::pack::inspect_pack;
use crate::GitError;

/// Answer of a bounded ancestry walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ancestry {
    Descendant,
    NotDescendant,
    /// The walk visited `limit` commits without reaching the old target
    LimitExceeded,
}

/// Bare repository materialised from a repository's pack rows
pub struct ObjectMirror {
    repo: Repository,
    path: PathBuf,
}

impl std::fmt::Debug for ObjectMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectMirror").field("path", &self.path).finish()
    }
}

impl ObjectMirror {
    /// Open the mirror at `path`, creating an empty bare repository if
    /// needed. The flag is true when the repository was just created.
    pub fn open_or_init(path: &Path) -> Result<(Self, bool), GitError> {
        let created = !path.exists();
        let repo = if created {
            std::fs::create_dir_all(path)?;
            debug!(path = %path.display(), "initialising object mirror");
            Repository::init_bare(path)?
        } else {
            Repository::open_bare(path)?
        };
        Ok((
            Self {
                repo,
                path: path.to_path_buf(),
            },
            created,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Index a pack into the mirror's object database
    pub fn ingest_pack(&self, bytes: &[u8]) -> Result<(), GitError> {
        if bytes.is_empty() || inspect_pack(bytes)?.object_count == 0 {
            return Ok(());
        }
        let odb = self.repo.odb()?;
        let mut writer = odb.packwriter()?;
        writer.write_all(bytes)?;
        writer.commit()?;
        Ok(())
    }

    pub fn contains(&self, oid: &str) -> bool {
        let Ok(oid) = Oid::from_str(oid) else {
            return false;
        };
        self.repo.odb().map(|odb| odb.exists(oid)).unwrap_or(false)
    }

    /// Breadth-first walk over parents of `new` looking for `old`, visiting
    /// at most `limit` commits
    pub fn is_descendant(&self, new: &str, old: &str, limit: usize) -> Result<Ancestry, GitError> {
        let new = Oid::from_str(new)?;
        let old = Oid::from_str(old)?;
        if new == old {
            return Ok(Ancestry::Descendant);
        }
        let Some(start) = self.peel_commit(new)? else {
            return Ok(Ancestry::NotDescendant);
        };
        let target = self.peel_commit(old)?.unwrap_or(old);

        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        seen.insert(start);
        queue.push_back(start);
        let mut visited = 0usize;

        while let Some(oid) = queue.pop_front() {
            if oid == target {
                return Ok(Ancestry::Descendant);
            }
            visited += 1;
            if visited > limit {
                return Ok(Ancestry::LimitExceeded);
            }
            let commit = match self.repo.find_commit(oid) {
                Ok(commit) => commit,
                Err(e) if e.code() == ErrorCode::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for parent in commit.parent_ids() {
                if seen.insert(parent) {
                    queue.push_back(parent);
                }
            }
        }
        Ok(Ancestry::NotDescendant)
    }

    fn peel_commit(&self, oid: Oid) -> Result<Option<Oid>, GitError> {
        let object = match self.repo.find_object(oid, None) {
            Ok(object) => object,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match object.peel(ObjectType::Commit) {
            Ok(commit) => Ok(Some(commit.id())),
            Err(_) => Ok(None),
        }
    }

    /// Pack holding the full closure of `wants`
    pub fn build_pack(&self, wants: &[String]) -> Result<Vec<u8>, GitError> {
        let mut builder = self.repo.packbuilder()?;
        let mut walk = self.repo.revwalk()?;
        let mut has_commits = false;

        for want in wants {
            let oid = Oid::from_str(want)?;
            let object = self
                .repo
                .find_object(oid, None)
                .map_err(|_| GitError::ObjectNotFound(want.clone()))?;
            match object.kind() {
                Some(ObjectType::Commit) => {
                    walk.push(oid)?;
                    has_commits = true;
                }
                Some(ObjectType::Tag) => {
                    builder.insert_object(oid, None)?;
                    if let Ok(commit) = object.peel(ObjectType::Commit) {
                        walk.push(commit.id())?;
                        has_commits = true;
                    }
                }
                _ => builder.insert_recursive(oid, None)?,
            }
        }
        if has_commits {
            builder.insert_walk(&mut walk)?;
        }

        let mut buf = git2::Buf::new();
        builder.write_buf(&mut buf)?;
        Ok(buf.to_vec())
    }

    /// Pack of everything reachable from `tips`; tips missing from the
    /// mirror are skipped
    pub fn build_full_pack(&self, tips: &[String]) -> Result<Vec<u8>, GitError> {
        let mut present: Vec<String> = tips.iter().filter(|t| self.contains(t)).cloned().collect();
        present.sort();
        present.dedup();
        if present.len() < tips.len() {
            debug!(skipped = tips.len() - present.len(), "building pack without unknown tips");
        }
        self.build_pack(&present)
    }
}
