//! Pack file decoding
//!
//! Layout: `PACK`, version (2 or 3), object count, then one entry per object
//! and a trailing SHA-1 over everything before it. Each entry is a
//! type/size varint header, an optional delta base reference, and a zlib
//! stream. Deltas are resolved against other entries of the same pack or,
//! for thin packs, against objects supplied by the caller.

use std::collections::HashMap;

use flate2::{Decompress, FlushDecompress, Status};
use libgitrow_core::types::ids::{id_to_hex, ObjectId, PackId};
use sha1::{Digest, Sha1};

use crate::object::{hash_object, ObjectKind};
use crate::GitError;

const PACK_SIGNATURE: &[u8; 4] = b"PACK";
const HEADER_LEN: usize = 12;
const TRAILER_LEN: usize = 20;

/// Upper bound on how far deflate can expand its input
const MAX_DEFLATE_RATIO: usize = 1032;

const OFS_DELTA: u8 = 6;
const REF_DELTA: u8 = 7;

/// Parsed pack header plus the verified trailer checksum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackHeader {
    pub version: u32,
    pub object_count: u32,
    pub checksum: PackId,
}

impl PackHeader {
    /// Content-derived pack id: hex of the trailer checksum
    pub fn pack_oid(&self) -> String {
        id_to_hex(&self.checksum)
    }
}

/// A fully resolved object from a pack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackObject {
    pub oid: ObjectId,
    pub kind: ObjectKind,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct DecodedPack {
    pub header: PackHeader,
    pub objects: Vec<PackObject>,
}

impl DecodedPack {
    pub fn pack_oid(&self) -> String {
        self.header.pack_oid()
    }
}

enum EntryKind {
    Base(ObjectKind),
    OfsDelta { base_offset: usize },
    RefDelta { base: ObjectId },
}

struct RawEntry {
    kind: EntryKind,
    data: Vec<u8>,
}

/// Validate header and trailer checksum without inflating any entry
pub fn inspect_pack(bytes: &[u8]) -> Result<PackHeader, GitError> {
    if bytes.len() < HEADER_LEN + TRAILER_LEN {
        return Err(GitError::invalid_pack(format!(
            "pack is {} bytes, shorter than header and trailer",
            bytes.len()
        )));
    }
    if &bytes[..4] != PACK_SIGNATURE {
        return Err(GitError::invalid_pack("missing PACK signature"));
    }
    let version = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != 2 && version != 3 {
        return Err(GitError::invalid_pack(format!("unsupported pack version {}", version)));
    }
    let object_count = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);

    let body_end = bytes.len() - TRAILER_LEN;
    let mut hasher = Sha1::new();
    hasher.update(&bytes[..body_end]);
    let computed = hasher.finalize();
    if computed.as_slice() != &bytes[body_end..] {
        return Err(GitError::invalid_pack("trailer checksum mismatch"));
    }

    let mut checksum = [0u8; 20];
    checksum.copy_from_slice(&bytes[body_end..]);
    Ok(PackHeader {
        version,
        object_count,
        checksum,
    })
}

/// Decode a self-contained pack
pub fn decode_pack(bytes: &[u8]) -> Result<DecodedPack, GitError> {
    decode_pack_with(bytes, |_| None)
}

/// Decode a pack, looking up ref-delta bases missing from the pack via
/// `external_base`
pub fn decode_pack_with<F>(bytes: &[u8], external_base: F) -> Result<DecodedPack, GitError>
where
    F: Fn(&ObjectId) -> Option<(ObjectKind, Vec<u8>)>,
{
    let header = inspect_pack(bytes)?;
    let body = &bytes[..bytes.len() - TRAILER_LEN];

    // every entry needs at least a header byte and a zlib stream
    let room = body.len() - HEADER_LEN;
    if header.object_count as usize > room / 2 {
        return Err(GitError::invalid_pack(format!(
            "{} objects cannot fit in {} bytes",
            header.object_count, room
        )));
    }
    let mut entries = Vec::with_capacity(header.object_count as usize);
    let mut by_offset = HashMap::with_capacity(header.object_count as usize);
    let mut pos = HEADER_LEN;

    for _ in 0..header.object_count {
        let entry_offset = pos;
        let (type_code, size, consumed) = read_entry_header(body, pos)?;
        pos += consumed;

        let kind = match type_code {
            OFS_DELTA => {
                let (distance, consumed) = read_offset(body, pos)?;
                pos += consumed;
                let base_offset = entry_offset.checked_sub(distance).ok_or_else(|| {
                    GitError::invalid_pack(format!("delta at {} points before pack start", entry_offset))
                })?;
                EntryKind::OfsDelta { base_offset }
            }
            REF_DELTA => {
                let end = pos + 20;
                if end > body.len() {
                    return Err(GitError::invalid_pack("truncated ref-delta base"));
                }
                let mut base = [0u8; 20];
                base.copy_from_slice(&body[pos..end]);
                pos = end;
                EntryKind::RefDelta { base }
            }
            code => EntryKind::Base(ObjectKind::from_pack_code(code).ok_or_else(|| {
                GitError::invalid_pack(format!("unknown object type {} at {}", code, entry_offset))
            })?),
        };

        let (data, consumed) = inflate(&body[pos..], size)
            .map_err(|reason| GitError::invalid_pack(format!("entry at {}: {}", entry_offset, reason)))?;
        pos += consumed;

        by_offset.insert(entry_offset, entries.len());
        entries.push(RawEntry { kind, data });
    }

    if pos != body.len() {
        return Err(GitError::invalid_pack(format!(
            "{} unexpected bytes after last entry",
            body.len() - pos
        )));
    }

    let objects = resolve_entries(&entries, &by_offset, &external_base)?;
    Ok(DecodedPack { header, objects })
}

/// Resolve delta chains. Ref-delta bases may appear later in the pack, so
/// unresolved entries are retried until a pass makes no progress.
fn resolve_entries<F>(
    entries: &[RawEntry],
    by_offset: &HashMap<usize, usize>,
    external_base: &F,
) -> Result<Vec<PackObject>, GitError>
where
    F: Fn(&ObjectId) -> Option<(ObjectKind, Vec<u8>)>,
{
    let mut resolved: Vec<Option<(ObjectKind, Vec<u8>)>> = vec![None; entries.len()];
    let mut oids: Vec<Option<ObjectId>> = vec![None; entries.len()];
    let mut by_oid: HashMap<ObjectId, usize> = HashMap::new();
    let mut pending: Vec<usize> = (0..entries.len()).collect();

    while !pending.is_empty() {
        let before = pending.len();
        let mut deferred = Vec::new();

        for idx in pending {
            if resolve_one(idx, entries, by_offset, &by_oid, external_base, &mut resolved)? {
                if let Some((kind, data)) = &resolved[idx] {
                    let oid = hash_object(*kind, data);
                    by_oid.insert(oid, idx);
                    oids[idx] = Some(oid);
                }
            } else {
                deferred.push(idx);
            }
        }

        if deferred.len() == before {
            return Err(GitError::invalid_pack(format!(
                "{} delta entries reference missing bases",
                deferred.len()
            )));
        }
        pending = deferred;
    }

    let mut objects = Vec::with_capacity(entries.len());
    for (slot, oid) in resolved.into_iter().zip(oids) {
        if let (Some((kind, data)), Some(oid)) = (slot, oid) {
            objects.push(PackObject { oid, kind, data });
        }
    }
    Ok(objects)
}

/// Returns false when a ref-delta base is not available yet
fn resolve_one<F>(
    idx: usize,
    entries: &[RawEntry],
    by_offset: &HashMap<usize, usize>,
    by_oid: &HashMap<ObjectId, usize>,
    external_base: &F,
    resolved: &mut [Option<(ObjectKind, Vec<u8>)>],
) -> Result<bool, GitError>
where
    F: Fn(&ObjectId) -> Option<(ObjectKind, Vec<u8>)>,
{
    let mut chain = Vec::new();
    let mut cur = idx;

    let (kind, mut data) = loop {
        if let Some((kind, data)) = &resolved[cur] {
            break (*kind, data.clone());
        }
        if chain.len() > entries.len() {
            return Err(GitError::invalid_pack("delta chain cycle"));
        }
        match &entries[cur].kind {
            EntryKind::Base(kind) => {
                resolved[cur] = Some((*kind, entries[cur].data.clone()));
                break (*kind, entries[cur].data.clone());
            }
            EntryKind::OfsDelta { base_offset } => {
                chain.push(cur);
                cur = *by_offset.get(base_offset).ok_or_else(|| {
                    GitError::invalid_pack(format!("no entry at delta base offset {}", base_offset))
                })?;
            }
            EntryKind::RefDelta { base } => {
                chain.push(cur);
                if let Some(&base_idx) = by_oid.get(base) {
                    cur = base_idx;
                } else if let Some(found) = external_base(base) {
                    break found;
                } else {
                    return Ok(false);
                }
            }
        }
    };

    for &link in chain.iter().rev() {
        data = apply_delta(&data, &entries[link].data)?;
        resolved[link] = Some((kind, data.clone()));
    }
    Ok(true)
}

/// Type code, inflated size, and header length of the entry at `pos`
fn read_entry_header(buf: &[u8], pos: usize) -> Result<(u8, usize, usize), GitError> {
    let mut i = pos;
    let mut byte = *buf.get(i).ok_or_else(|| GitError::invalid_pack("truncated entry header"))?;
    i += 1;
    let type_code = (byte >> 4) & 0x07;
    let mut size = (byte & 0x0f) as usize;
    let mut shift = 4;
    while byte & 0x80 != 0 {
        byte = *buf.get(i).ok_or_else(|| GitError::invalid_pack("truncated entry header"))?;
        i += 1;
        if shift > 57 {
            return Err(GitError::invalid_pack("entry size overflows"));
        }
        size |= ((byte & 0x7f) as usize) << shift;
        shift += 7;
    }
    Ok((type_code, size, i - pos))
}

/// Offset-delta distance; each continuation adds one before shifting
fn read_offset(buf: &[u8], pos: usize) -> Result<(usize, usize), GitError> {
    let mut i = pos;
    let mut byte = *buf.get(i).ok_or_else(|| GitError::invalid_pack("truncated delta offset"))?;
    i += 1;
    let mut offset = (byte & 0x7f) as usize;
    while byte & 0x80 != 0 {
        byte = *buf.get(i).ok_or_else(|| GitError::invalid_pack("truncated delta offset"))?;
        i += 1;
        offset = offset
            .checked_add(1)
            .and_then(|o| o.checked_mul(128))
            .ok_or_else(|| GitError::invalid_pack("delta offset overflows"))?
            | (byte & 0x7f) as usize;
    }
    Ok((offset, i - pos))
}

/// Inflate one zlib stream from the front of `input`.
/// Returns the data and the number of compressed bytes consumed.
fn inflate(input: &[u8], expected: usize) -> Result<(Vec<u8>, usize), String> {
    if expected > input.len().saturating_mul(MAX_DEFLATE_RATIO) {
        return Err(format!(
            "declared size {} exceeds what {} compressed bytes can hold",
            expected,
            input.len()
        ));
    }
    let mut z = Decompress::new(true);
    let mut out = Vec::with_capacity(expected.saturating_add(1).min(input.len().saturating_mul(4) + 64));

    loop {
        let in_before = z.total_in();
        let out_before = z.total_out();
        let status = z
            .decompress_vec(&input[in_before as usize..], &mut out, FlushDecompress::None)
            .map_err(|e| format!("zlib: {}", e))?;

        if status == Status::StreamEnd {
            break;
        }
        if out.len() > expected {
            return Err(format!("inflates past declared size {}", expected));
        }
        if out.len() == out.capacity() {
            out.reserve(4096);
            continue;
        }
        if z.total_in() == in_before && z.total_out() == out_before {
            return Err("truncated zlib stream".to_string());
        }
    }

    if out.len() != expected {
        return Err(format!("inflated {} bytes, header says {}", out.len(), expected));
    }
    Ok((out, z.total_in() as usize))
}

fn read_delta_size(delta: &[u8], pos: &mut usize) -> Result<usize, GitError> {
    let mut size = 0usize;
    let mut shift = 0;
    loop {
        let byte = *delta.get(*pos).ok_or_else(|| GitError::invalid_pack("truncated delta size"))?;
        *pos += 1;
        if shift > 57 {
            return Err(GitError::invalid_pack("delta size overflows"));
        }
        size |= ((byte & 0x7f) as usize) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok(size);
        }
    }
}

/// Apply a git delta (copy/insert instructions) to `base`
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>, GitError> {
    let mut pos = 0;
    let source_size = read_delta_size(delta, &mut pos)?;
    if source_size != base.len() {
        return Err(GitError::invalid_pack(format!(
            "delta expects base of {} bytes, got {}",
            source_size,
            base.len()
        )));
    }
    let target_size = read_delta_size(delta, &mut pos)?;
    // a copy op spends at most 8 delta bytes for up to 64 KiB of output
    let reachable = (delta.len() / 8 + 1).saturating_mul(0x10000).saturating_add(delta.len());
    if target_size > reachable {
        return Err(GitError::invalid_pack(format!(
            "delta target of {} bytes cannot come from a {} byte delta",
            target_size,
            delta.len()
        )));
    }
    let mut out = Vec::with_capacity(target_size.min(base.len() + delta.len()));

    let byte_at = |i: usize| {
        delta
            .get(i)
            .copied()
            .ok_or_else(|| GitError::invalid_pack("truncated delta instruction"))
    };

    while pos < delta.len() {
        let op = delta[pos];
        pos += 1;

        if op & 0x80 != 0 {
            let mut offset = 0usize;
            let mut size = 0usize;
            for bit in 0..4 {
                if op & (1 << bit) != 0 {
                    offset |= (byte_at(pos)? as usize) << (8 * bit);
                    pos += 1;
                }
            }
            for bit in 0..3 {
                if op & (0x10 << bit) != 0 {
                    size |= (byte_at(pos)? as usize) << (8 * bit);
                    pos += 1;
                }
            }
            if size == 0 {
                size = 0x10000;
            }
            let end = offset
                .checked_add(size)
                .filter(|&end| end <= base.len())
                .ok_or_else(|| GitError::invalid_pack("delta copy out of base bounds"))?;
            out.extend_from_slice(&base[offset..end]);
        } else if op != 0 {
            let end = pos + op as usize;
            if end > delta.len() {
                return Err(GitError::invalid_pack("delta insert past end"));
            }
            out.extend_from_slice(&delta[pos..end]);
            pos = end;
        } else {
            return Err(GitError::invalid_pack("reserved delta opcode"));
        }
        if out.len() > target_size {
            return Err(GitError::invalid_pack("delta writes past its target size"));
        }
    }

    if out.len() != target_size {
        return Err(GitError::invalid_pack(format!(
            "delta produced {} bytes, expected {}",
            out.len(),
            target_size
        )));
    }
    Ok(out)
}


#[cfg(test)]
mod tests {
    use super::test_support::{build_pack, deflate, delta, entry_header, seal, Entry};
    use super::*;

    #[test]
    fn test_decode_base_objects() {
        let pack = build_pack(&[Entry::Base(3, b"hello\n"), Entry::Base(3, b"")]);
        let decoded = decode_pack(&pack).unwrap();

        assert_eq!(decoded.header.object_count, 2);
        assert_eq!(decoded.objects.len(), 2);
        assert_eq!(
            id_to_hex(&decoded.objects[0].oid),
            "ce013625030ba8dba906f756967f9e9ca394464a"
        );
        assert_eq!(decoded.objects[1].data, b"");
        assert_eq!(decoded.pack_oid(), hex::encode(&pack[pack.len() - 20..]));
    }

    #[test]
    fn test_decode_ofs_delta_chain() {
        let base = b"the quick brown fox";
        let first = delta(base.len(), 9, b" red fox");
        let second = delta(17, 17, b"!");
        let pack = build_pack(&[
            Entry::Base(3, base),
            Entry::OfsDelta(0, first),
            Entry::OfsDelta(1, second),
        ]);

        let decoded = decode_pack(&pack).unwrap();
        assert_eq!(decoded.objects[1].data, b"the quick red fox");
        assert_eq!(decoded.objects[2].data, b"the quick red fox!");
        assert_eq!(decoded.objects[2].kind, ObjectKind::Blob);
    }

    #[test]
    fn test_decode_ref_delta_before_base() {
        let base = b"base content";
        let base_oid = hash_object(ObjectKind::Blob, base);
        let pack = build_pack(&[
            Entry::RefDelta(base_oid, delta(base.len(), 4, b" camp")),
            Entry::Base(3, base),
        ]);

        let decoded = decode_pack(&pack).unwrap();
        assert_eq!(decoded.objects[0].data, b"base camp");
    }

    #[test]
    fn test_thin_pack_needs_external_base() {
        let base = b"outside the pack";
        let base_oid = hash_object(ObjectKind::Blob, base);
        let pack = build_pack(&[Entry::RefDelta(base_oid, delta(base.len(), 7, b"!"))]);

        assert!(matches!(decode_pack(&pack), Err(GitError::InvalidPack(_))));

        let decoded = decode_pack_with(&pack, |oid| {
            (oid == &base_oid).then(|| (ObjectKind::Blob, base.to_vec()))
        })
        .unwrap();
        assert_eq!(decoded.objects[0].data, b"outside!");
    }

    #[test]
    fn test_rejects_bad_checksum() {
        let mut pack = build_pack(&[Entry::Base(3, b"x")]);
        let last = pack.len() - 1;
        pack[last] ^= 0xff;
        let err = decode_pack(&pack).unwrap_err();
        assert!(err.to_string().contains("checksum"));
        assert!(err.is_encoding());
    }

    #[test]
    fn test_rejects_bad_header() {
        assert!(inspect_pack(b"").is_err());
        assert!(inspect_pack(&[0u8; 40]).is_err());

        let mut pack = build_pack(&[]);
        pack[7] = 9;
        assert!(inspect_pack(&pack).unwrap_err().to_string().contains("version"));
    }

    #[test]
    fn test_rejects_count_mismatch() {
        let mut pack = build_pack(&[Entry::Base(3, b"one")]);
        // claim two objects and recompute the trailer
        pack.truncate(pack.len() - 20);
        pack[11] = 2;
        let mut hasher = Sha1::new();
        hasher.update(&pack);
        let digest = hasher.finalize();
        pack.extend_from_slice(&digest);

        assert!(matches!(decode_pack(&pack), Err(GitError::InvalidPack(_))));
    }

    #[test]
    fn test_apply_delta_bounds() {
        assert!(apply_delta(b"abc", &[3, 10, 0x90, 10]).is_err());
        assert!(apply_delta(b"abc", &[4, 1, 1, b'x']).is_err());
        assert_eq!(apply_delta(b"abc", &[3, 2, 0x90, 2]).unwrap(), b"ab");
    }

    fn raw_pack(count: u32, body: &[u8]) -> Vec<u8> {
        let mut pack = b"PACK".to_vec();
        pack.extend_from_slice(&2u32.to_be_bytes());
        pack.extend_from_slice(&count.to_be_bytes());
        pack.extend_from_slice(body);
        seal(pack)
    }

    #[test]
    fn test_rejects_object_count_beyond_pack_size() {
        let err = decode_pack(&raw_pack(u32::MAX, &[])).unwrap_err();
        assert!(err.is_encoding());
        assert!(err.to_string().contains("cannot fit"));
    }

    #[test]
    fn test_rejects_entry_size_beyond_pack_size() {
        let mut body = entry_header(3, 1usize << 59);
        body.extend(deflate(b"tiny"));
        let err = decode_pack(&raw_pack(1, &body)).unwrap_err();
        assert!(err.is_encoding());
        assert!(err.to_string().contains("declared size"));
    }

    #[test]
    fn test_rejects_delta_target_beyond_delta_size() {
        // source 3, target 2^49, then one insert
        let mut d = vec![3, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x01];
        d.extend_from_slice(&[1, b'x']);
        let err = apply_delta(b"abc", &d).unwrap_err();
        assert!(err.to_string().contains("cannot come from"));
    }
}
