//! Credential provider variants
//!
//! All of them hand out a bearer token through the same
//! [`CredentialProvider`] capability; the helper composes them in a
//! [`ChainProvider`].

use std::sync::Arc;

use async_trait::async_trait;
use libgitrow_wire::{Credential, CredentialProvider, WireError};
use serde::Deserialize;
use tracing::debug;

pub const TOKEN_ENV: &str = "GITROW_TOKEN";
pub const ENDPOINT_ENV: &str = "GITROW_ENDPOINT";
pub const CREDENTIAL_COMMAND_ENV: &str = "GITROW_CREDENTIAL_COMMAND";

/// A token handed over up front
pub struct StaticToken {
    credential: Credential,
}

impl StaticToken {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn fetch(&self) -> Result<Credential, WireError> {
        Ok(self.credential.clone())
    }

    fn name(&self) -> &str {
        "static token"
    }
}

/// Token (and optional endpoint) read from environment variables on every
/// fetch
pub struct EnvToken {
    token_var: String,
    endpoint_var: String,
}

impl EnvToken {
    pub fn new(token_var: impl Into<String>, endpoint_var: impl Into<String>) -> Self {
        Self {
            token_var: token_var.into(),
            endpoint_var: endpoint_var.into(),
        }
    }
}

impl Default for EnvToken {
    fn default() -> Self {
        Self::new(TOKEN_ENV, ENDPOINT_ENV)
    }
}

#[async_trait]
impl CredentialProvider for EnvToken {
    async fn fetch(&self) -> Result<Credential, WireError> {
        let token = std::env::var(&self.token_var)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| WireError::Auth(format!("{} is not set", self.token_var)))?;
        Ok(Credential {
            endpoint: std::env::var(&self.endpoint_var).ok().filter(|e| !e.is_empty()),
            token,
        })
    }

    fn name(&self) -> &str {
        &self.token_var
    }
}

#[derive(Deserialize)]
struct CommandOutput {
    #[serde(default)]
    endpoint: Option<String>,
    token: String,
}

/// Runs a shell command that prints `{"endpoint": ..., "token": ...}`.
///
/// This is the hook for device-flow logins and service tokens: the command
/// owns any interaction and caching, the helper only reads its answer.
pub struct CommandToken {
    command: String,
}

impl CommandToken {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn shell(&self) -> tokio::process::Command {
        let (program, flag) = if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") };
        let mut cmd = tokio::process::Command::new(program);
        cmd.arg(flag).arg(&self.command);
        cmd
    }
}

#[async_trait]
impl CredentialProvider for CommandToken {
    async fn fetch(&self) -> Result<Credential, WireError> {
        let output = self
            .shell()
            .stdin(std::process::Stdio::null())
            .stderr(std::process::Stdio::inherit())
            .output()
            .await
            .map_err(|e| WireError::Auth(format!("cannot run credential command: {}", e)))?;
        if !output.status.success() {
            return Err(WireError::Auth(format!(
                "credential command exited with {}",
                output.status
            )));
        }
        let parsed: CommandOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| WireError::Auth(format!("credential command output: {}", e)))?;
        Ok(Credential {
            endpoint: parsed.endpoint,
            token: parsed.token,
        })
    }

    fn name(&self) -> &str {
        "credential command"
    }
}

/// First provider that yields a credential wins
pub struct ChainProvider {
    providers: Vec<Arc<dyn CredentialProvider>>,
}

impl ChainProvider {
    pub fn new(providers: Vec<Arc<dyn CredentialProvider>>) -> Self {
        Self { providers }
    }

    /// Environment token first, then `$GITROW_CREDENTIAL_COMMAND` if set
    pub fn from_env() -> Self {
        let mut providers: Vec<Arc<dyn CredentialProvider>> = vec![Arc::new(EnvToken::default())];
        if let Ok(command) = std::env::var(CREDENTIAL_COMMAND_ENV) {
            if !command.trim().is_empty() {
                providers.push(Arc::new(CommandToken::new(command)));
            }
        }
        Self::new(providers)
    }
}

#[async_trait]
impl CredentialProvider for ChainProvider {
    async fn fetch(&self) -> Result<Credential, WireError> {
        let mut failures = Vec::new();
        for provider in &self.providers {
            match provider.fetch().await {
                Ok(credential) => {
                    debug!(provider = provider.name(), "credential obtained");
                    return Ok(credential);
                }
                Err(e) => failures.push(format!("{}: {}", provider.name(), e)),
            }
        }
        if failures.is_empty() {
            return Err(WireError::Auth("no credential providers configured".to_string()));
        }
        Err(WireError::Auth(failures.join("; ")))
    }

    fn name(&self) -> &str {
        "credential chain"
    }
}
