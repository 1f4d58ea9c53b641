//! Wire types and HTTP client for the gitrow server
//!
//! This crate provides:
//! - Request and response bodies of the push/fetch/refs endpoints
//! - Remote URL parsing (`RemoteLocation`)
//! - The `CredentialProvider` capability
//! - `WireClient`, with bounded exponential backoff
//! - Notification types emitted after a push is persisted

pub mod client;
pub mod credentials;
pub mod error;
pub mod location;
pub mod messages;
pub mod notifications;

pub use client::{RetryPolicy, WireClient};
pub use credentials::{Credential, CredentialProvider};
pub use error::WireError;
pub use location::RemoteLocation;
pub use messages::{
    ErrorBody, FetchRequest, FetchResponse, HeadInfo, PushJsonBody, PushMetadata, PushResponse,
    RefEntry, RefsResponse,
};
pub use notifications::Notification;
