use std::fmt;

use libgitrow_core::types::ids::ObjectId;
use sha1::{Digest, Sha1};

use crate::GitError;

/// The four git object types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectKind {
    /// Type code used in pack entry headers
    pub fn from_pack_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ObjectKind::Commit),
            2 => Some(ObjectKind::Tree),
            3 => Some(ObjectKind::Blob),
            4 => Some(ObjectKind::Tag),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Commit => "commit",
            ObjectKind::Tree => "tree",
            ObjectKind::Blob => "blob",
            ObjectKind::Tag => "tag",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "commit" => Some(ObjectKind::Commit),
            "tree" => Some(ObjectKind::Tree),
            "blob" => Some(ObjectKind::Blob),
            "tag" => Some(ObjectKind::Tag),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `"<kind> <len>\0"`, the prefix hashed and stored ahead of object content
pub fn object_header(kind: ObjectKind, len: usize) -> Vec<u8> {
    format!("{} {}\0", kind, len).into_bytes()
}

/// Object id of `data` stored as `kind`
pub fn hash_object(kind: ObjectKind, data: &[u8]) -> ObjectId {
    let mut hasher = Sha1::new();
    hasher.update(object_header(kind, data.len()));
    hasher.update(data);
    let mut oid = [0u8; 20];
    oid.copy_from_slice(&hasher.finalize());
    oid
}

/// Split `"<kind> <len>\0<content>"` into kind and content
pub fn parse_loose(oid: &str, raw: &[u8]) -> Result<(ObjectKind, Vec<u8>), GitError> {
    let invalid = |reason: &str| GitError::InvalidObject {
        oid: oid.to_string(),
        reason: reason.to_string(),
    };

    let nul = raw
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| invalid("missing header terminator"))?;
    let header = std::str::from_utf8(&raw[..nul]).map_err(|_| invalid("header is not utf-8"))?;
    let (kind, len) = header
        .split_once(' ')
        .ok_or_else(|| invalid("malformed header"))?;
    let kind = ObjectKind::parse(kind).ok_or_else(|| invalid("unknown object type"))?;
    let len: usize = len.parse().map_err(|_| invalid("malformed length"))?;

    let content = &raw[nul + 1..];
    if content.len() != len {
        return Err(invalid("length does not match header"));
    }
    Ok((kind, content.to_vec()))
}
