//! Remote URL parsing: `[<scheme>::]https://<endpoint>/orgs/<org>/repos/<repo>`

use std::fmt;

use libgitrow_core::store::validate_repo_name;
use reqwest::Url;

use crate::error::WireError;

/// Where a repository lives on a gitrow server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLocation {
    /// Server base URL, without the `/orgs/...` suffix and without a trailing slash
    pub endpoint: Url,
    pub org: String,
    pub repo: String,
}

impl RemoteLocation {
    pub fn parse(raw: &str) -> Result<Self, WireError> {
        let invalid = |reason: &str| WireError::InvalidUrl(format!("{}: {}", raw, reason));

        // git passes `<scheme>::<url>` through unchanged for some invocations
        let url_part = match raw.split_once("::") {
            Some((scheme, rest)) if !scheme.contains('/') => rest,
            _ => raw,
        };
        let url = Url::parse(url_part).map_err(|e| invalid(&e.to_string()))?;
        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(invalid("expected an http(s) URL"));
        }

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();
        let n = segments.len();
        if n < 4 || segments[n - 4] != "orgs" || segments[n - 2] != "repos" {
            return Err(invalid("path must end with /orgs/<org>/repos/<repo>"));
        }
        let org = segments[n - 3].to_string();
        let repo = segments[n - 1].trim_end_matches(".git").to_string();
        validate_repo_name(&org).map_err(|e| invalid(&e.to_string()))?;
        validate_repo_name(&repo).map_err(|e| invalid(&e.to_string()))?;

        let mut endpoint = url.clone();
        endpoint.set_query(None);
        endpoint.set_fragment(None);
        let prefix = segments[..n - 4].join("/");
        endpoint.set_path(&prefix);

        Ok(Self {
            endpoint,
            org,
            repo,
        })
    }

    fn repo_url(&self, suffix: &str) -> String {
        let base = self.endpoint.as_str().trim_end_matches('/');
        format!("{}/orgs/{}/repos/{}/{}", base, self.org, self.repo, suffix)
    }

    pub fn refs_url(&self) -> String {
        self.repo_url("refs")
    }

    pub fn push_url(&self) -> String {
        self.repo_url("git/push")
    }

    pub fn fetch_url(&self) -> String {
        self.repo_url("git/fetch")
    }

    /// True if `other` names the same server as this location
    pub fn same_endpoint(&self, other: &str) -> bool {
        match Url::parse(other) {
            Ok(url) => {
                url.scheme() == self.endpoint.scheme()
                    && url.host_str() == self.endpoint.host_str()
                    && url.port_or_known_default() == self.endpoint.port_or_known_default()
            }
            Err(_) => false,
        }
    }
}

impl fmt::Display for RemoteLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repo_url("").trim_end_matches('/'))
    }
}
