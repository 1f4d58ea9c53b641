use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named reference stored for a repository.
///
/// Unique per `(org, repo, name)`. Only push persistence mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    pub org: String,
    pub repo: String,
    pub name: String,
    /// Hex object id the ref points at
    pub target_oid: String,
    pub updated_at: DateTime<Utc>,
}

impl Ref {
    pub fn new(org: &str, repo: &str, name: &str, target_oid: &str) -> Self {
        Self {
            org: org.to_string(),
            repo: repo.to_string(),
            name: name.to_string(),
            target_oid: target_oid.to_string(),
            updated_at: Utc::now(),
        }
    }
}

/// One requested reference update within a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushUpdate {
    #[serde(rename = "src")]
    pub src_oid: String,
    #[serde(rename = "dst")]
    pub dst_ref: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub force: bool,
}

impl PushUpdate {
    pub fn new(src_oid: impl Into<String>, dst_ref: impl Into<String>, force: bool) -> Self {
        Self {
            src_oid: src_oid.into(),
            dst_ref: dst_ref.into(),
            force,
        }
    }
}

/// Per-ref push status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefStatus {
    Ok,
    Error,
}

/// Outcome for a single ref in a push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefResult {
    pub status: RefStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RefResult {
    pub fn ok() -> Self {
        Self {
            status: RefStatus::Ok,
            message: None,
        }
    }

    pub fn ok_with(message: impl Into<String>) -> Self {
        Self {
            status: RefStatus::Ok,
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: RefStatus::Error,
            message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == RefStatus::Ok
    }
}

/// Result set of a push: one entry per requested ref
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushOutcome {
    pub ok: bool,
    pub results: BTreeMap<String, RefResult>,
}

impl PushOutcome {
    /// Build an outcome, `ok` is true only when every ref succeeded
    pub fn from_results(results: BTreeMap<String, RefResult>) -> Self {
        let ok = results.values().all(RefResult::is_ok);
        Self { ok, results }
    }
}
