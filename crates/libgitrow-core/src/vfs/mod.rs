//! In-memory POSIX-like filesystem for object and pack paths
//!
//! Files whose path ends in a pack suffix are written through to a
//! [`PackBlobStore`] keyed by their normalized path; the tree only keeps
//! their size and mtime. Everything else is held inline.

mod blob;
mod error;
pub mod path;

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tracing::warn;

pub use blob::{BlobMeta, MemoryBlobStore, PackBlobStore, SledBlobStore};
pub use error::{FsError, PosixCode};

use crate::error::GitrowError;
use path::{components, join, normalize};

/// Default suffixes routed to the blob store
pub const DEFAULT_PACK_SUFFIXES: &[&str] = &[".pack"];

#[derive(Debug, Clone)]
enum Node {
    Directory(DirectoryNode),
    File(FileNode),
}

#[derive(Debug, Clone)]
struct DirectoryNode {
    children: BTreeMap<String, Node>,
    mtime: DateTime<Utc>,
}

impl DirectoryNode {
    fn new() -> Self {
        Self {
            children: BTreeMap::new(),
            mtime: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
struct FileNode {
    content: FileContent,
    size: u64,
    mtime: DateTime<Utc>,
}

/// Blob store change made by a rename in progress
#[derive(Debug)]
enum BlobUndo {
    Rename { from: String, to: String },
    Remove(String),
    Restore { key: String, bytes: Vec<u8> },
}

#[derive(Debug, Clone)]
enum FileContent {
    Inline(Vec<u8>),
    /// Bytes live in the blob store under the file's path
    External,
}

impl FileNode {
    fn inline(bytes: Vec<u8>) -> Self {
        Self {
            size: bytes.len() as u64,
            content: FileContent::Inline(bytes),
            mtime: Utc::now(),
        }
    }

    fn external(meta: BlobMeta) -> Self {
        Self {
            content: FileContent::External,
            size: meta.size,
            mtime: meta.mtime,
        }
    }

    fn is_external(&self) -> bool {
        matches!(self.content, FileContent::External)
    }
}

enum NodeRef<'a> {
    Dir(&'a DirectoryNode),
    File(&'a FileNode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

/// Result of `stat`/`lstat`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub kind: NodeKind,
    pub size: u64,
    pub mtime: DateTime<Utc>,
    /// Content is held by the blob store
    pub external: bool,
}

impl Metadata {
    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }
}

/// The virtual filesystem. Cheap to share: all methods take `&self`.
pub struct VirtualFs {
    root: RwLock<DirectoryNode>,
    blobs: Arc<dyn PackBlobStore>,
    pack_suffixes: Vec<String>,
}

impl std::fmt::Debug for VirtualFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualFs")
            .field("pack_suffixes", &self.pack_suffixes)
            .finish()
    }
}

impl VirtualFs {
    pub fn new(blobs: Arc<dyn PackBlobStore>) -> Self {
        Self::with_pack_suffixes(
            blobs,
            DEFAULT_PACK_SUFFIXES.iter().map(|s| s.to_string()).collect(),
        )
    }

    pub fn with_pack_suffixes(blobs: Arc<dyn PackBlobStore>, pack_suffixes: Vec<String>) -> Self {
        Self {
            root: RwLock::new(DirectoryNode::new()),
            blobs,
            pack_suffixes,
        }
    }

    /// Filesystem backed by a fresh [`MemoryBlobStore`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBlobStore::new()))
    }

    /// True if writes to `path` go to the blob store
    pub fn is_pack_path(&self, path: &str) -> bool {
        self.pack_suffixes.iter().any(|s| path.ends_with(s.as_str()))
    }

    fn read_root(&self) -> RwLockReadGuard<'_, DirectoryNode> {
        self.root.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_root(&self) -> RwLockWriteGuard<'_, DirectoryNode> {
        self.root.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn backend_error(path: &str, err: GitrowError) -> FsError {
        warn!(path, error = %err, "blob store failure");
        FsError::new(PosixCode::EIO, path)
    }

    pub fn read_file(&self, path: &str) -> Result<Vec<u8>, FsError> {
        let path = normalize(path);
        let root = self.read_root();
        match lookup(&root, &components(&path), &path)? {
            NodeRef::Dir(_) => Err(FsError::new(PosixCode::EISDIR, path)),
            NodeRef::File(file) => match &file.content {
                FileContent::Inline(bytes) => Ok(bytes.clone()),
                FileContent::External => self
                    .blobs
                    .get(&path)
                    .map_err(|e| Self::backend_error(&path, e))?
                    .ok_or_else(|| FsError::new(PosixCode::ENOENT, path.as_str())),
            },
        }
    }

    /// Create or replace a file. The parent directory must exist.
    pub fn write_file(&self, path: &str, data: &[u8]) -> Result<(), FsError> {
        let path = normalize(path);
        let parts = components(&path);
        let Some((name, parents)) = parts.split_last() else {
            return Err(FsError::new(PosixCode::EISDIR, path));
        };

        let mut root = self.write_root();
        let dir = dir_mut(&mut root, parents, &path)?;
        if let Some(Node::Directory(_)) = dir.children.get(*name) {
            return Err(FsError::new(PosixCode::EISDIR, path));
        }

        let node = if self.is_pack_path(&path) {
            let meta = self
                .blobs
                .put(&path, data)
                .map_err(|e| Self::backend_error(&path, e))?;
            FileNode::external(meta)
        } else {
            FileNode::inline(data.to_vec())
        };
        dir.children.insert(name.to_string(), Node::File(node));
        dir.mtime = Utc::now();
        Ok(())
    }

    pub fn unlink(&self, path: &str) -> Result<(), FsError> {
        let path = normalize(path);
        let parts = components(&path);
        let Some((name, parents)) = parts.split_last() else {
            return Err(FsError::new(PosixCode::EISDIR, path));
        };

        let mut root = self.write_root();
        let dir = dir_mut(&mut root, parents, &path)?;
        match dir.children.get(*name) {
            None => return Err(FsError::new(PosixCode::ENOENT, path)),
            Some(Node::Directory(_)) => return Err(FsError::new(PosixCode::EISDIR, path)),
            Some(Node::File(file)) if file.is_external() => {
                self.blobs
                    .delete(&path)
                    .map_err(|e| Self::backend_error(&path, e))?;
            }
            Some(Node::File(_)) => {}
        }
        dir.children.remove(*name);
        dir.mtime = Utc::now();
        Ok(())
    }

    /// Sorted entry names of a directory
    pub fn readdir(&self, path: &str) -> Result<Vec<String>, FsError> {
        let path = normalize(path);
        let root = self.read_root();
        match lookup(&root, &components(&path), &path)? {
            NodeRef::Dir(dir) => Ok(dir.children.keys().cloned().collect()),
            NodeRef::File(_) => Err(FsError::new(PosixCode::ENOTDIR, path)),
        }
    }

    pub fn mkdir(&self, path: &str) -> Result<(), FsError> {
        let path = normalize(path);
        let parts = components(&path);
        let Some((name, parents)) = parts.split_last() else {
            return Err(FsError::new(PosixCode::EEXIST, path));
        };

        let mut root = self.write_root();
        let dir = dir_mut(&mut root, parents, &path)?;
        if dir.children.contains_key(*name) {
            return Err(FsError::new(PosixCode::EEXIST, path));
        }
        dir.children
            .insert(name.to_string(), Node::Directory(DirectoryNode::new()));
        dir.mtime = Utc::now();
        Ok(())
    }

    /// Create a directory and any missing ancestors
    pub fn mkdir_all(&self, path: &str) -> Result<(), FsError> {
        let path = normalize(path);
        let mut root = self.write_root();
        let mut dir: &mut DirectoryNode = &mut root;
        for part in components(&path) {
            let child = dir
                .children
                .entry(part.to_string())
                .or_insert_with(|| Node::Directory(DirectoryNode::new()));
            dir = match child {
                Node::Directory(child) => child,
                Node::File(_) => return Err(FsError::new(PosixCode::ENOTDIR, path)),
            };
        }
        Ok(())
    }

    pub fn rmdir(&self, path: &str) -> Result<(), FsError> {
        let path = normalize(path);
        let parts = components(&path);
        let Some((name, parents)) = parts.split_last() else {
            return Err(FsError::new(PosixCode::EBUSY, path));
        };

        let mut root = self.write_root();
        let dir = dir_mut(&mut root, parents, &path)?;
        match dir.children.get(*name) {
            None => return Err(FsError::new(PosixCode::ENOENT, path)),
            Some(Node::File(_)) => return Err(FsError::new(PosixCode::ENOTDIR, path)),
            Some(Node::Directory(child)) if !child.children.is_empty() => {
                return Err(FsError::new(PosixCode::ENOTEMPTY, path))
            }
            Some(Node::Directory(_)) => {}
        }
        dir.children.remove(*name);
        dir.mtime = Utc::now();
        Ok(())
    }

    /// Move a file or directory.
    ///
    /// Blob keys of external files move with them; a file whose new name
    /// crosses the pack-suffix boundary is migrated into or out of the
    /// blob store.
    pub fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        let from = normalize(from);
        let to = normalize(to);
        if from == "/" || to == "/" {
            return Err(FsError::new(PosixCode::EBUSY, from));
        }
        if path::is_within(&to, &from) && to != from {
            return Err(FsError::new(PosixCode::EINVAL, to));
        }

        let from_parts = components(&from);
        let to_parts = components(&to);
        let mut root = self.write_root();

        let src_is_dir = matches!(lookup(&root, &from_parts, &from)?, NodeRef::Dir(_));
        if from == to {
            return Ok(());
        }
        match lookup(&root, &to_parts, &to) {
            Ok(NodeRef::Dir(dest)) => {
                if !src_is_dir {
                    return Err(FsError::new(PosixCode::EISDIR, to));
                }
                if !dest.children.is_empty() {
                    return Err(FsError::new(PosixCode::ENOTEMPTY, to));
                }
            }
            Ok(NodeRef::File(_)) => {
                if src_is_dir {
                    return Err(FsError::new(PosixCode::ENOTDIR, to));
                }
            }
            Err(e) if e.is_not_found() => {
                dir_ref(&root, &to_parts[..to_parts.len() - 1], &to)?;
            }
            Err(e) => return Err(e),
        }

        let (from_name, from_parents) = from_parts
            .split_last()
            .ok_or_else(|| FsError::new(PosixCode::EBUSY, from.as_str()))?;
        let node = dir_mut(&mut root, from_parents, &from)?
            .children
            .remove(*from_name)
            .ok_or_else(|| FsError::new(PosixCode::ENOENT, from.as_str()))?;

        let mut journal = Vec::new();
        let node = match self.relocate(node.clone(), &from, &to, &mut journal) {
            Ok(moved) => moved,
            Err(e) => {
                self.undo_blob_moves(journal);
                if let Ok(dir) = dir_mut(&mut root, from_parents, &from) {
                    dir.children.insert(from_name.to_string(), node);
                }
                return Err(e);
            }
        };

        let (to_name, to_parents) = to_parts
            .split_last()
            .ok_or_else(|| FsError::new(PosixCode::EBUSY, to.as_str()))?;
        let dest = dir_mut(&mut root, to_parents, &to)?;
        dest.children.insert(to_name.to_string(), node);
        dest.mtime = Utc::now();
        Ok(())
    }

    fn relocate(
        &self,
        node: Node,
        from: &str,
        to: &str,
        journal: &mut Vec<BlobUndo>,
    ) -> Result<Node, FsError> {
        match node {
            Node::Directory(mut dir) => {
                let children = std::mem::take(&mut dir.children);
                for (name, child) in children {
                    let moved = self.relocate(child, &join(from, &name), &join(to, &name), journal)?;
                    dir.children.insert(name, moved);
                }
                Ok(Node::Directory(dir))
            }
            Node::File(file) => {
                let to_external = self.is_pack_path(to);
                let moved = match (file.content, to_external) {
                    (FileContent::External, true) => {
                        self.blobs
                            .rename(from, to)
                            .map_err(|e| Self::backend_error(from, e))?;
                        journal.push(BlobUndo::Rename {
                            from: from.to_string(),
                            to: to.to_string(),
                        });
                        FileNode {
                            content: FileContent::External,
                            ..file
                        }
                    }
                    (FileContent::External, false) => {
                        let bytes = self
                            .blobs
                            .get(from)
                            .map_err(|e| Self::backend_error(from, e))?
                            .ok_or_else(|| FsError::new(PosixCode::ENOENT, from))?;
                        self.blobs
                            .delete(from)
                            .map_err(|e| Self::backend_error(from, e))?;
                        journal.push(BlobUndo::Restore {
                            key: from.to_string(),
                            bytes: bytes.clone(),
                        });
                        FileNode::inline(bytes)
                    }
                    (FileContent::Inline(bytes), true) => {
                        let meta = self
                            .blobs
                            .put(to, &bytes)
                            .map_err(|e| Self::backend_error(to, e))?;
                        journal.push(BlobUndo::Remove(to.to_string()));
                        FileNode::external(meta)
                    }
                    (FileContent::Inline(bytes), false) => FileNode {
                        content: FileContent::Inline(bytes),
                        ..file
                    },
                };
                Ok(Node::File(moved))
            }
        }
    }

    /// Reverse blob store changes of a failed rename, newest first
    fn undo_blob_moves(&self, journal: Vec<BlobUndo>) {
        for step in journal.into_iter().rev() {
            let result = match &step {
                BlobUndo::Rename { from, to } => self.blobs.rename(to, from).map(|_| ()),
                BlobUndo::Remove(key) => self.blobs.delete(key).map(|_| ()),
                BlobUndo::Restore { key, bytes } => self.blobs.put(key, bytes).map(|_| ()),
            };
            if let Err(e) = result {
                warn!(step = ?step, error = %e, "could not undo blob move");
            }
        }
    }

    pub fn stat(&self, path: &str) -> Result<Metadata, FsError> {
        let path = normalize(path);
        let root = self.read_root();
        Ok(match lookup(&root, &components(&path), &path)? {
            NodeRef::Dir(dir) => Metadata {
                kind: NodeKind::Directory,
                size: 0,
                mtime: dir.mtime,
                external: false,
            },
            NodeRef::File(file) => Metadata {
                kind: NodeKind::File,
                size: file.size,
                mtime: file.mtime,
                external: file.is_external(),
            },
        })
    }

    /// There are no symlinks, so this is `stat`
    pub fn lstat(&self, path: &str) -> Result<Metadata, FsError> {
        self.stat(path)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.stat(path).is_ok()
    }
}

fn dir_ref<'a>(
    root: &'a DirectoryNode,
    parts: &[&str],
    path: &str,
) -> Result<&'a DirectoryNode, FsError> {
    let mut dir = root;
    for part in parts {
        dir = match dir.children.get(*part) {
            Some(Node::Directory(child)) => child,
            Some(Node::File(_)) => return Err(FsError::new(PosixCode::ENOTDIR, path)),
            None => return Err(FsError::new(PosixCode::ENOENT, path)),
        };
    }
    Ok(dir)
}

fn dir_mut<'a>(
    root: &'a mut DirectoryNode,
    parts: &[&str],
    path: &str,
) -> Result<&'a mut DirectoryNode, FsError> {
    let mut dir = root;
    for part in parts {
        dir = match dir.children.get_mut(*part) {
            Some(Node::Directory(child)) => child,
            Some(Node::File(_)) => return Err(FsError::new(PosixCode::ENOTDIR, path)),
            None => return Err(FsError::new(PosixCode::ENOENT, path)),
        };
    }
    Ok(dir)
}

fn lookup<'a>(root: &'a DirectoryNode, parts: &[&str], path: &str) -> Result<NodeRef<'a>, FsError> {
    let Some((name, parents)) = parts.split_last() else {
        return Ok(NodeRef::Dir(root));
    };
    match dir_ref(root, parents, path)?.children.get(*name) {
        Some(Node::Directory(dir)) => Ok(NodeRef::Dir(dir)),
        Some(Node::File(file)) => Ok(NodeRef::File(file)),
        None => Err(FsError::new(PosixCode::ENOENT, path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fs_with_store() -> (VirtualFs, Arc<MemoryBlobStore>) {
        let store = Arc::new(MemoryBlobStore::new());
        (VirtualFs::new(store.clone()), store)
    }

    #[test]
    fn test_write_and_read_inline() {
        let fs = VirtualFs::in_memory();
        fs.mkdir("/objects").unwrap();
        fs.write_file("/objects/HEAD", b"ref: refs/heads/main\n").unwrap();
        assert_eq!(fs.read_file("objects/./HEAD").unwrap(), b"ref: refs/heads/main\n");

        let meta = fs.stat("/objects/HEAD").unwrap();
        assert!(meta.is_file());
        assert!(!meta.external);
        assert_eq!(meta.size, 21);
    }

    #[test]
    fn test_pack_files_go_to_blob_store() {
        let (fs, store) = fs_with_store();
        fs.mkdir_all("/objects/pack").unwrap();
        fs.write_file("/objects/pack/pack-1.pack", b"PACK....").unwrap();
        fs.write_file("/objects/pack/pack-1.idx", b"index").unwrap();

        assert_eq!(store.keys().unwrap(), vec!["/objects/pack/pack-1.pack".to_string()]);
        let meta = fs.stat("/objects/pack/pack-1.pack").unwrap();
        assert!(meta.external);
        assert_eq!(meta.size, 8);
        assert_eq!(fs.read_file("/objects/pack/pack-1.pack").unwrap(), b"PACK....");

        fs.unlink("/objects/pack/pack-1.pack").unwrap();
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn test_custom_pack_suffixes() {
        let store = Arc::new(MemoryBlobStore::new());
        let fs = VirtualFs::with_pack_suffixes(store.clone(), vec![".bundle".to_string()]);
        fs.write_file("/x.bundle", b"b").unwrap();
        fs.write_file("/x.pack", b"p").unwrap();
        assert_eq!(store.keys().unwrap(), vec!["/x.bundle".to_string()]);
    }

    #[test]
    fn test_error_codes() {
        let fs = VirtualFs::in_memory();
        let code = |r: Result<(), FsError>| r.unwrap_err().code;

        assert_eq!(code(fs.write_file("/missing/file", b"x")), PosixCode::ENOENT);
        fs.mkdir("/dir").unwrap();
        assert_eq!(code(fs.mkdir("/dir")), PosixCode::EEXIST);
        assert_eq!(code(fs.write_file("/dir", b"x")), PosixCode::EISDIR);
        assert_eq!(fs.read_file("/dir").unwrap_err().code, PosixCode::EISDIR);
        assert_eq!(code(fs.unlink("/dir")), PosixCode::EISDIR);

        fs.write_file("/dir/file", b"x").unwrap();
        assert_eq!(code(fs.rmdir("/dir")), PosixCode::ENOTEMPTY);
        assert_eq!(code(fs.rmdir("/dir/file")), PosixCode::ENOTDIR);
        assert_eq!(code(fs.write_file("/dir/file/nested", b"x")), PosixCode::ENOTDIR);
        assert_eq!(fs.readdir("/dir/file").unwrap_err().code, PosixCode::ENOTDIR);
        assert_eq!(code(fs.unlink("/dir/nope")), PosixCode::ENOENT);
        assert_eq!(code(fs.rmdir("/")), PosixCode::EBUSY);
    }

    #[test]
    fn test_readdir_sorted_and_rmdir() {
        let fs = VirtualFs::in_memory();
        fs.mkdir_all("/refs/heads").unwrap();
        fs.write_file("/refs/heads/main", b"a").unwrap();
        fs.write_file("/refs/heads/dev", b"b").unwrap();
        assert_eq!(fs.readdir("/refs/heads").unwrap(), vec!["dev", "main"]);

        fs.unlink("/refs/heads/main").unwrap();
        fs.unlink("/refs/heads/dev").unwrap();
        fs.rmdir("/refs/heads").unwrap();
        assert!(!fs.exists("/refs/heads"));
        assert!(fs.lstat("/refs").unwrap().is_dir());
    }

    #[test]
    fn test_rename_file_into_pack_suffix_moves_to_blob_store() {
        let (fs, store) = fs_with_store();
        fs.mkdir_all("/objects/pack").unwrap();
        fs.write_file("/objects/pack/tmp_pack_1", b"PACKBYTES").unwrap();
        assert!(store.keys().unwrap().is_empty());

        fs.rename("/objects/pack/tmp_pack_1", "/objects/pack/pack-1.pack").unwrap();
        assert_eq!(store.keys().unwrap(), vec!["/objects/pack/pack-1.pack".to_string()]);
        assert!(fs.stat("/objects/pack/pack-1.pack").unwrap().external);
        assert!(!fs.exists("/objects/pack/tmp_pack_1"));
    }

    #[test]
    fn test_rename_directory_moves_blob_keys() {
        let (fs, store) = fs_with_store();
        fs.mkdir_all("/a/pack").unwrap();
        fs.write_file("/a/pack/p.pack", b"P").unwrap();
        fs.write_file("/a/pack/p.idx", b"I").unwrap();

        fs.rename("/a", "/b").unwrap();
        assert_eq!(store.keys().unwrap(), vec!["/b/pack/p.pack".to_string()]);
        assert_eq!(fs.read_file("/b/pack/p.pack").unwrap(), b"P");
        assert_eq!(fs.read_file("/b/pack/p.idx").unwrap(), b"I");
        assert!(!fs.exists("/a"));
    }

    /// Refuses to move one key, otherwise a memory store
    struct StuckKey {
        inner: MemoryBlobStore,
        stuck: &'static str,
    }

    impl PackBlobStore for StuckKey {
        fn put(&self, key: &str, bytes: &[u8]) -> Result<BlobMeta, GitrowError> {
            self.inner.put(key, bytes)
        }
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, GitrowError> {
            self.inner.get(key)
        }
        fn meta(&self, key: &str) -> Result<Option<BlobMeta>, GitrowError> {
            self.inner.meta(key)
        }
        fn delete(&self, key: &str) -> Result<bool, GitrowError> {
            self.inner.delete(key)
        }
        fn rename(&self, from: &str, to: &str) -> Result<bool, GitrowError> {
            if from == self.stuck {
                return Err(GitrowError::Encoding(format!("cannot move {}", from)));
            }
            self.inner.rename(from, to)
        }
        fn keys(&self) -> Result<Vec<String>, GitrowError> {
            self.inner.keys()
        }
    }

    #[test]
    fn test_failed_directory_rename_restores_blob_keys() {
        let store = Arc::new(StuckKey {
            inner: MemoryBlobStore::new(),
            stuck: "/d/b.pack",
        });
        let fs = VirtualFs::new(store.clone());
        fs.mkdir("/d").unwrap();
        fs.write_file("/d/a.pack", b"A").unwrap();
        fs.write_file("/d/b.pack", b"B").unwrap();
        fs.write_file("/d/c", b"C").unwrap();

        assert_eq!(fs.rename("/d", "/e").unwrap_err().code, PosixCode::EIO);
        let mut keys = store.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["/d/a.pack".to_string(), "/d/b.pack".to_string()]);
        assert_eq!(fs.read_file("/d/a.pack").unwrap(), b"A");
        assert_eq!(fs.read_file("/d/c").unwrap(), b"C");
        assert!(!fs.exists("/e"));
    }

    #[test]
    fn test_rename_errors() {
        let fs = VirtualFs::in_memory();
        fs.mkdir_all("/a/b").unwrap();
        fs.mkdir("/full").unwrap();
        fs.write_file("/full/x", b"x").unwrap();
        fs.write_file("/f", b"f").unwrap();

        assert_eq!(fs.rename("/a", "/a/b/c").unwrap_err().code, PosixCode::EINVAL);
        assert_eq!(fs.rename("/a", "/full").unwrap_err().code, PosixCode::ENOTEMPTY);
        assert_eq!(fs.rename("/f", "/a").unwrap_err().code, PosixCode::EISDIR);
        assert_eq!(fs.rename("/a", "/f").unwrap_err().code, PosixCode::ENOTDIR);
        assert_eq!(fs.rename("/nope", "/x").unwrap_err().code, PosixCode::ENOENT);
        assert_eq!(fs.rename("/f", "/nodir/f").unwrap_err().code, PosixCode::ENOENT);

        // replacing an existing file is allowed
        fs.write_file("/g", b"g").unwrap();
        fs.rename("/f", "/g").unwrap();
        assert_eq!(fs.read_file("/g").unwrap(), b"f");
    }
}
