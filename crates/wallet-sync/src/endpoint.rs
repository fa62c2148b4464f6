//! Endpoint candidates and mint URL normalization.
//!
//! An [EndpointCandidate] can only be built through [EndpointCandidate::parse_with], so every
//! candidate held by the prober or the discovery orchestrator is already sanitized: absolute,
//! `https` (scheme defaulted when missing), trailing-slash terminated, never an `.onion` host.

use reqwest::Url;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Transport policy applied when sanitizing candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointPolicy {
    /// Accept `http://` for loopback hosts only (local development nodes). Off by default.
    pub allow_loopback_http: bool,
}

/// Why a raw endpoint string was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("empty endpoint")]
    Empty,

    #[error("unparseable endpoint: {0}")]
    Unparseable(String),

    #[error("endpoint has no host: {0}")]
    NoHost(String),

    #[error("unsupported scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("plaintext transport rejected: {0}")]
    Plaintext(String),

    #[error("onion-routed host rejected: {0}")]
    Onion(String),
}

/// Normalized, sanitized routing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EndpointCandidate(String);

impl EndpointCandidate {
    /// Sanitize with the default (strict) policy.
    pub fn parse(raw: &str) -> Result<Self, EndpointError> {
        Self::parse_with(raw, EndpointPolicy::default())
    }

    pub fn parse_with(raw: &str, policy: EndpointPolicy) -> Result<Self, EndpointError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(EndpointError::Empty);
        }
        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("https://{}", trimmed)
        };
        let mut url =
            Url::parse(&with_scheme).map_err(|_| EndpointError::Unparseable(trimmed.to_string()))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| EndpointError::NoHost(trimmed.to_string()))?
            .to_ascii_lowercase();
        if is_onion(&host) {
            return Err(EndpointError::Onion(host));
        }
        match url.scheme() {
            "https" => {}
            "http" if policy.allow_loopback_http && is_loopback(&host) => {}
            "http" => return Err(EndpointError::Plaintext(trimmed.to_string())),
            other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
        }
        url.set_query(None);
        url.set_fragment(None);
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(Self(url.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve a relative API path against this endpoint (`v1/info` -> `https://host/v1/info`).
    pub fn join(&self, path: &str) -> String {
        format!("{}{}", self.0, path.trim_start_matches('/'))
    }
}

impl fmt::Display for EndpointCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_onion(host: &str) -> bool {
    host.trim_end_matches('.').ends_with(".onion")
}

fn is_loopback(host: &str) -> bool {
    host == "localhost" || host == "[::1]" || host.starts_with("127.")
}

/// Normalize a mint URL: trimmed, `http`/`https` only, no query or fragment, no trailing slash.
/// Returns `None` for anything that does not parse as such.
pub fn normalize_mint_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut url = Url::parse(trimmed).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().map_or(true, str::is_empty) {
        return None;
    }
    url.set_query(None);
    url.set_fragment(None);
    Some(url.as_str().trim_end_matches('/').to_string())
}
