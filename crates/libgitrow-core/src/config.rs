use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::GitrowError;

/// Environment variable naming the server config file
pub const SERVER_CONFIG_ENV: &str = "GITROW_SERVER_CONFIG";
/// Environment variable naming the helper config file
pub const HELPER_CONFIG_ENV: &str = "GITROW_HELPER_CONFIG";

/// Server configuration, usually `gitrow-server.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Holds the row store (`rows/`) and object mirrors (`mirrors/`)
    pub data_dir: PathBuf,
    /// Accepted bearer tokens; empty means no authentication
    pub tokens: Vec<String>,
    /// Commits visited before a fast-forward check gives up
    pub ancestry_walk_limit: usize,
    /// Preferred HEAD target reported by ref listing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
    /// Largest accepted pack upload in bytes
    pub max_pack_bytes: usize,
    /// How long startup waits for another process to release the data
    /// directory; 0 fails immediately
    pub lock_wait_ms: u64,
    pub retention: RetentionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8787)),
            data_dir: PathBuf::from("gitrow-data"),
            tokens: Vec::new(),
            ancestry_walk_limit: 100_000,
            default_branch: None,
            max_pack_bytes: 256 * 1024 * 1024,
            lock_wait_ms: 0,
            retention: RetentionConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn rows_path(&self) -> PathBuf {
        self.data_dir.join("rows")
    }

    pub fn mirrors_path(&self) -> PathBuf {
        self.data_dir.join("mirrors")
    }
}

/// Pack retention policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Keep this many newest pack rows per repository; `None` keeps all
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_recent: Option<usize>,
}

/// Remote helper configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperConfig {
    /// Attempts per HTTP call, including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Upload packs as multipart; JSON+base64 otherwise
    pub multipart: bool,
    pub request_timeout_secs: u64,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 2000,
            multipart: true,
            request_timeout_secs: 60,
        }
    }
}

impl HelperConfig {
    /// Apply `GITROW_MAX_ATTEMPTS` and `GITROW_NO_MULTIPART` style overrides
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(attempts) = lookup("GITROW_MAX_ATTEMPTS").and_then(|v| v.parse::<u32>().ok()) {
            self.max_attempts = attempts.max(1);
        }
        if let Some(v) = lookup("GITROW_NO_MULTIPART") {
            if !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false") {
                self.multipart = false;
            }
        }
    }
}

/// Load server config from a TOML file
pub fn load_server_config(path: &Path) -> Result<ServerConfig, GitrowError> {
    let content = std::fs::read_to_string(path)?;
    let config: ServerConfig = toml::from_str(&content)?;
    if config.ancestry_walk_limit == 0 {
        return Err(GitrowError::InvalidArgs(
            "ancestry_walk_limit must be at least 1".to_string(),
        ));
    }
    if config.retention.keep_recent == Some(0) {
        return Err(GitrowError::InvalidArgs(
            "retention.keep_recent must be at least 1".to_string(),
        ));
    }
    Ok(config)
}

/// Save server config as TOML
pub fn save_server_config(path: &Path, config: &ServerConfig) -> Result<(), GitrowError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Default helper config location: `~/.config/gitrow/helper.toml`
pub fn default_helper_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| {
        PathBuf::from(home)
            .join(".config")
            .join("gitrow")
            .join("helper.toml")
    })
}

/// Load helper config; a missing file yields the defaults
pub fn load_helper_config(path: Option<&Path>) -> Result<HelperConfig, GitrowError> {
    let Some(path) = path else {
        return Ok(HelperConfig::default());
    };
    if !path.exists() {
        return Ok(HelperConfig::default());
    }
    let content = std::fs::read_to_string(path)?;
    let config: HelperConfig = toml::from_str(&content)?;
    Ok(config)
}
