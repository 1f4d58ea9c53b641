use chrono::{DateTime, Utc};

/// An accepted pack, append-only per repository.
///
/// `pack_oid` is derived from the content (the pack trailer checksum), so
/// storing the same bytes twice yields the same record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackRecord {
    pub org: String,
    pub repo: String,
    pub pack_oid: String,
    pub bytes: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl PackRecord {
    pub fn new(org: &str, repo: &str, pack_oid: &str, bytes: Vec<u8>) -> Self {
        Self {
            org: org.to_string(),
            repo: repo.to_string(),
            pack_oid: pack_oid.to_string(),
            bytes,
            created_at: Utc::now(),
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}
