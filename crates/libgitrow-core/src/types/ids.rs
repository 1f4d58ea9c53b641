use thiserror::Error;

/// 160-bit git object identifier (SHA-1)
pub type ObjectId = [u8; 20];

/// 160-bit pack identifier (the pack's trailing SHA-1 checksum)
pub type PackId = [u8; 20];

/// Length of a hex-encoded object id
pub const OID_HEX_LEN: usize = 40;

#[derive(Debug, Error)]
pub enum IdParseError {
    #[error("invalid hex string: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Convert a fixed-size byte array to lowercase hex string
pub fn id_to_hex<const N: usize>(id: &[u8; N]) -> String {
    hex::encode(id)
}

/// Parse a hex string into a fixed-size byte array
pub fn hex_to_id<const N: usize>(hex_str: &str) -> Result<[u8; N], IdParseError> {
    let bytes = hex::decode(hex_str)?;
    if bytes.len() != N {
        return Err(IdParseError::InvalidLength {
            expected: N,
            actual: bytes.len(),
        });
    }
    let mut arr = [0u8; N];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

/// Parse an object ID from hex string
pub fn parse_object_id(hex_str: &str) -> Result<ObjectId, IdParseError> {
    hex_to_id::<20>(hex_str)
}

/// True if `s` is a 40-character lowercase hex object id
pub fn is_hex_oid(s: &str) -> bool {
    s.len() == OID_HEX_LEN && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// The all-zero id git uses for "no object"
pub fn is_null_oid(s: &str) -> bool {
    s.len() == OID_HEX_LEN && s.bytes().all(|b| b == b'0')
}
