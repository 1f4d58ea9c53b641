//! Notifications emitted after a push is persisted
//!
//! Downstream mirrors subscribe to these. Consumers should treat unknown
//! variants as ignorable.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A new pack row was written
    PackStored {
        org: String,
        repo: String,
        pack_oid: String,
        size: u64,
    },

    /// A ref row moved
    RefUpdated {
        org: String,
        repo: String,
        ref_name: String,
        /// Previous target, absent when the ref was created
        old_target: Option<String>,
        new_target: String,
        forced: bool,
    },

    /// Superseded pack rows were removed by retention
    PacksPruned {
        org: String,
        repo: String,
        removed: Vec<String>,
    },
}

impl Notification {
    /// Get the notification type as a string (for filtering)
    pub fn notification_type(&self) -> &'static str {
        match self {
            Notification::PackStored { .. } => "PackStored",
            Notification::RefUpdated { .. } => "RefUpdated",
            Notification::PacksPruned { .. } => "PacksPruned",
        }
    }

    /// `(org, repo)` the notification concerns
    pub fn repository(&self) -> (&str, &str) {
        match self {
            Notification::PackStored { org, repo, .. }
            | Notification::RefUpdated { org, repo, .. }
            | Notification::PacksPruned { org, repo, .. } => (org, repo),
        }
    }

    pub fn pack_stored(org: &str, repo: &str, pack_oid: &str, size: u64) -> Self {
        Notification::PackStored {
            org: org.to_string(),
            repo: repo.to_string(),
            pack_oid: pack_oid.to_string(),
            size,
        }
    }

    pub fn ref_updated(
        org: &str,
        repo: &str,
        ref_name: &str,
        old_target: Option<String>,
        new_target: &str,
        forced: bool,
    ) -> Self {
        Notification::RefUpdated {
            org: org.to_string(),
            repo: repo.to_string(),
            ref_name: ref_name.to_string(),
            old_target,
            new_target: new_target.to_string(),
            forced,
        }
    }
}
