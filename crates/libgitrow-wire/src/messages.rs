//! Request and response bodies of the HTTP interface

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use libgitrow_core::store::PACK_ENCODING_BASE64;
use libgitrow_core::PushUpdate;
use serde::{Deserialize, Serialize};

use crate::error::WireError;

/// Multipart field carrying the JSON [`PushMetadata`]
pub const METADATA_FIELD: &str = "metadata";
/// Multipart field carrying the raw pack
pub const PACK_FIELD: &str = "pack";
pub const PACK_MIME: &str = "application/x-git-packed-objects";

pub use libgitrow_core::PushOutcome as PushResponse;

/// JSON part of a multipart push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMetadata {
    pub updates: Vec<PushUpdate>,
}

/// Push sent as a single JSON document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushJsonBody {
    pub updates: Vec<PushUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack_encoding: Option<String>,
}

impl PushJsonBody {
    pub fn new(updates: Vec<PushUpdate>, pack: &[u8]) -> Self {
        Self {
            updates,
            pack: Some(encode_pack(pack)),
            pack_encoding: Some(PACK_ENCODING_BASE64.to_string()),
        }
    }

    /// Raw pack bytes; an absent pack is empty
    pub fn pack_bytes(&self) -> Result<Vec<u8>, WireError> {
        match &self.pack {
            Some(data) => decode_pack(self.pack_encoding.as_deref(), data),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wants: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    pub pack: String,
    pub pack_encoding: String,
    /// Client should retain the pack as-is (no repacking)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack_oid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl FetchResponse {
    /// Decode the payload, checking it against the advertised size
    pub fn pack_bytes(&self) -> Result<Vec<u8>, WireError> {
        let bytes = decode_pack(Some(&self.pack_encoding), &self.pack)?;
        if let Some(size) = self.size {
            if size != bytes.len() as u64 {
                return Err(WireError::Encoding(format!(
                    "pack size {} does not match advertised {}",
                    bytes.len(),
                    size
                )));
            }
        }
        Ok(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefEntry {
    pub name: String,
    pub target_sha: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadInfo {
    /// Ref name HEAD points at
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefsResponse {
    pub refs: Vec<RefEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<HeadInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub ok: bool,
    pub error: ErrorPayload,
}

impl ErrorBody {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: ErrorPayload {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }
}

pub fn encode_pack(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode a pack payload; a missing encoding means base64
pub fn decode_pack(encoding: Option<&str>, data: &str) -> Result<Vec<u8>, WireError> {
    match encoding.unwrap_or(PACK_ENCODING_BASE64) {
        PACK_ENCODING_BASE64 => BASE64
            .decode(data.as_bytes())
            .map_err(|e| WireError::Encoding(format!("pack payload: {}", e))),
        other => Err(WireError::Encoding(format!("unsupported pack encoding '{}'", other))),
    }
}
