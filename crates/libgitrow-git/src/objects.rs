//! Browsing the decoded object graph

use libgitrow_core::types::ids::{id_to_hex, parse_object_id, ObjectId};

use crate::loose::LooseObjectStore;
use crate::object::ObjectKind;
use crate::GitError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub oid: ObjectId,
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author: String,
    pub committer: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: u32,
    pub name: String,
    pub oid: ObjectId,
}

impl TreeEntry {
    pub fn is_tree(&self) -> bool {
        self.mode == 0o040000
    }
}

/// Read-side view over a [`LooseObjectStore`]
#[derive(Debug, Clone)]
pub struct ObjectReader {
    store: LooseObjectStore,
}

impl ObjectReader {
    pub fn new(store: LooseObjectStore) -> Self {
        Self { store }
    }

    pub fn read_object(&self, oid: &ObjectId) -> Result<(ObjectKind, Vec<u8>), GitError> {
        self.store
            .read(oid)?
            .ok_or_else(|| GitError::ObjectNotFound(id_to_hex(oid)))
    }

    fn read_kind(&self, oid: &ObjectId, want: ObjectKind) -> Result<Vec<u8>, GitError> {
        let (kind, data) = self.read_object(oid)?;
        if kind != want {
            return Err(GitError::InvalidObject {
                oid: id_to_hex(oid),
                reason: format!("expected {}, found {}", want, kind),
            });
        }
        Ok(data)
    }

    pub fn read_blob(&self, oid: &ObjectId) -> Result<Vec<u8>, GitError> {
        self.read_kind(oid, ObjectKind::Blob)
    }

    pub fn read_commit(&self, oid: &ObjectId) -> Result<Commit, GitError> {
        let data = self.read_kind(oid, ObjectKind::Commit)?;
        parse_commit(oid, &data)
    }

    pub fn read_tree(&self, oid: &ObjectId) -> Result<Vec<TreeEntry>, GitError> {
        let data = self.read_kind(oid, ObjectKind::Tree)?;
        parse_tree(oid, &data)
    }

    /// First-parent history starting at `from`, newest first
    pub fn log(&self, from: &ObjectId, limit: usize) -> Result<Vec<Commit>, GitError> {
        let mut commits = Vec::new();
        let mut next = Some(*from);
        while let Some(oid) = next {
            if commits.len() >= limit {
                break;
            }
            let commit = self.read_commit(&oid)?;
            next = commit.parents.first().copied();
            commits.push(commit);
        }
        Ok(commits)
    }
}

fn parse_commit(oid: &ObjectId, data: &[u8]) -> Result<Commit, GitError> {
    let invalid = |reason: &str| GitError::InvalidObject {
        oid: id_to_hex(oid),
        reason: reason.to_string(),
    };
    let text = String::from_utf8_lossy(data);
    let (headers, message) = text.split_once("\n\n").unwrap_or((&*text, ""));

    let mut tree = None;
    let mut parents = Vec::new();
    let mut author = String::new();
    let mut committer = String::new();

    for line in headers.lines() {
        // continuation lines of multi-line headers (gpgsig) start with a space
        if line.starts_with(' ') {
            continue;
        }
        let Some((key, value)) = line.split_once(' ') else {
            continue;
        };
        match key {
            "tree" => tree = Some(parse_object_id(value).map_err(|_| invalid("bad tree id"))?),
            "parent" => parents.push(parse_object_id(value).map_err(|_| invalid("bad parent id"))?),
            "author" => author = value.to_string(),
            "committer" => committer = value.to_string(),
            _ => {}
        }
    }

    Ok(Commit {
        oid: *oid,
        tree: tree.ok_or_else(|| invalid("missing tree header"))?,
        parents,
        author,
        committer,
        message: message.to_string(),
    })
}

fn parse_tree(oid: &ObjectId, data: &[u8]) -> Result<Vec<TreeEntry>, GitError> {
    let invalid = |reason: &str| GitError::InvalidObject {
        oid: id_to_hex(oid),
        reason: reason.to_string(),
    };

    let mut entries = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let space = data[pos..]
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| invalid("entry without mode"))?;
        let mode = std::str::from_utf8(&data[pos..pos + space])
            .ok()
            .and_then(|m| u32::from_str_radix(m, 8).ok())
            .ok_or_else(|| invalid("bad mode"))?;
        pos += space + 1;

        let nul = data[pos..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| invalid("entry without name terminator"))?;
        let name = String::from_utf8_lossy(&data[pos..pos + nul]).into_owned();
        pos += nul + 1;

        if pos + 20 > data.len() {
            return Err(invalid("truncated entry id"));
        }
        let mut entry_oid = [0u8; 20];
        entry_oid.copy_from_slice(&data[pos..pos + 20]);
        pos += 20;

        entries.push(TreeEntry {
            mode,
            name,
            oid: entry_oid,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use libgitrow_core::VirtualFs;
    use std::sync::Arc;

    fn reader() -> (ObjectReader, LooseObjectStore) {
        let store = LooseObjectStore::new(Arc::new(VirtualFs::in_memory()));
        (ObjectReader::new(store.clone()), store)
    }

    fn tree_bytes(entries: &[(&str, &str, ObjectId)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (mode, name, oid) in entries {
            out.extend_from_slice(format!("{} {}\0", mode, name).as_bytes());
            out.extend_from_slice(oid);
        }
        out
    }

    fn commit_bytes(tree: &ObjectId, parent: Option<&ObjectId>, message: &str) -> Vec<u8> {
        let mut text = format!("tree {}\n", id_to_hex(tree));
        if let Some(parent) = parent {
            text.push_str(&format!("parent {}\n", id_to_hex(parent)));
        }
        text.push_str("author A U Thor <a@example.com> 1700000000 +0000\n");
        text.push_str("committer A U Thor <a@example.com> 1700000000 +0000\n\n");
        text.push_str(message);
        text.into_bytes()
    }

    #[test]
    fn test_read_tree_and_commit() {
        let (reader, store) = reader();
        let blob = store.write(ObjectKind::Blob, b"fn main() {}\n").unwrap();
        let tree = store
            .write(ObjectKind::Tree, &tree_bytes(&[("100644", "main.rs", blob)]))
            .unwrap();
        let commit = store
            .write(ObjectKind::Commit, &commit_bytes(&tree, None, "initial\n"))
            .unwrap();

        let parsed = reader.read_commit(&commit).unwrap();
        assert_eq!(parsed.tree, tree);
        assert!(parsed.parents.is_empty());
        assert_eq!(parsed.message, "initial\n");
        assert!(parsed.author.starts_with("A U Thor"));

        let entries = reader.read_tree(&tree).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "main.rs");
        assert_eq!(entries[0].mode, 0o100644);
        assert!(!entries[0].is_tree());
        assert_eq!(reader.read_blob(&entries[0].oid).unwrap(), b"fn main() {}\n");
    }

    #[test]
    fn test_log_follows_first_parent() {
        let (reader, store) = reader();
        let tree = store.write(ObjectKind::Tree, b"").unwrap();
        let first = store
            .write(ObjectKind::Commit, &commit_bytes(&tree, None, "one"))
            .unwrap();
        let second = store
            .write(ObjectKind::Commit, &commit_bytes(&tree, Some(&first), "two"))
            .unwrap();
        let third = store
            .write(ObjectKind::Commit, &commit_bytes(&tree, Some(&second), "three"))
            .unwrap();

        let log = reader.log(&third, 10).unwrap();
        let messages: Vec<_> = log.iter().map(|c| c.message.as_str()).collect();
        assert_eq!(messages, vec!["three", "two", "one"]);

        assert_eq!(reader.log(&third, 2).unwrap().len(), 2);
    }

    #[test]
    fn test_kind_mismatch() {
        let (reader, store) = reader();
        let blob = store.write(ObjectKind::Blob, b"x").unwrap();
        assert!(matches!(reader.read_commit(&blob), Err(GitError::InvalidObject { .. })));
        assert!(matches!(reader.read_object(&[9u8; 20]), Err(GitError::ObjectNotFound(_))));
    }
}
