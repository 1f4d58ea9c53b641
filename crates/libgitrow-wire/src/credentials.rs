//! Credential capability consumed by [`WireClient`](crate::WireClient)

use async_trait::async_trait;

use crate::error::WireError;

/// A bearer token, optionally bound to the endpoint it was issued for
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub endpoint: Option<String>,
    pub token: String,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            endpoint: None,
            token: token.into(),
        }
    }

    pub fn for_endpoint(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            token: token.into(),
        }
    }
}

// Keep tokens out of logs
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("endpoint", &self.endpoint)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Source of credentials. Failing to produce one is an authentication
/// failure; implementations must not loop retrying on their own.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn fetch(&self) -> Result<Credential, WireError>;

    /// Short name for log lines
    fn name(&self) -> &str;
}
