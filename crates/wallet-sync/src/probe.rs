//! Bounded-time reachability probes for routing endpoints and mints.
//!
//! Every probe runs under its own timer and collapses every failure (timeout, connect error,
//! unreadable body) into the negative outcome; nothing escapes as an error.

use crate::endpoint::{normalize_mint_url, EndpointCandidate};
use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::timeout;

/// Endpoint accepted the credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidProbe {
    pub endpoint: EndpointCandidate,
    /// Credential as echoed back by the server (may be canonicalized).
    pub credential: String,
    /// Balance reported by the endpoint, in its smallest unit.
    pub balance: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Valid(ValidProbe),
    Invalid { endpoint: EndpointCandidate },
    Unreachable { endpoint: EndpointCandidate },
}

impl ProbeOutcome {
    pub fn endpoint(&self) -> &EndpointCandidate {
        match self {
            ProbeOutcome::Valid(v) => &v.endpoint,
            ProbeOutcome::Invalid { endpoint } | ProbeOutcome::Unreachable { endpoint } => endpoint,
        }
    }
}

/// Presents a credential to one endpoint.
#[async_trait]
pub trait CredentialProbe: Send + Sync {
    /// Must resolve within `budget`; a timeout is reported as [ProbeOutcome::Unreachable].
    async fn probe_credential(
        &self,
        endpoint: &EndpointCandidate,
        credential: &str,
        budget: Duration,
    ) -> ProbeOutcome;
}

/// Classification of a non-2xx credential response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The server positively said the credential is not known / not valid.
    InvalidCredential,
    /// Anything else; treated as unreachable so a valid credential is never discarded.
    Unknown,
}

const INVALID_CODES: &[&str] = &["invalid_api_key", "invalid_credential", "api_key_not_found"];

const INVALID_PHRASES: &[&str] = &[
    "invalid api key",
    "api key not found",
    "invalid credential",
    "unknown api key",
    "key not found",
];

const CODE_PATHS: &[&[&str]] = &[
    &["error", "type"],
    &["error", "code"],
    &["detail", "error", "type"],
    &["detail", "error", "code"],
    &["detail", "type"],
    &["detail", "code"],
    &["code"],
    &["type"],
];

/// Decide whether a non-2xx body says "this credential is invalid".
///
/// Structured codes are checked first, then case-insensitive phrase matching over the raw body.
pub fn classify_rejection(body: &str) -> Rejection {
    if let Ok(v) = serde_json::from_str::<Value>(body) {
        let structured = CODE_PATHS.iter().any(|path| {
            lookup(&v, path)
                .and_then(Value::as_str)
                .map(|code| INVALID_CODES.contains(&code.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        });
        if structured {
            return Rejection::InvalidCredential;
        }
    }
    let lower = body.to_lowercase();
    if INVALID_PHRASES.iter().any(|p| lower.contains(p)) {
        Rejection::InvalidCredential
    } else {
        Rejection::Unknown
    }
}

fn lookup<'a>(v: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(v, |cur, key| cur.get(*key))
}

#[derive(Debug, Deserialize)]
struct Keyset {
    #[serde(default)]
    unit: String,
    #[serde(default)]
    active: bool,
}

#[derive(Debug, Deserialize)]
struct KeysetsResponse {
    #[serde(default)]
    keysets: Vec<Keyset>,
}

/// HTTP prober backed by one shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn get_text(
        &self,
        url: &str,
        bearer: Option<&str>,
        budget: Duration,
    ) -> anyhow::Result<(reqwest::StatusCode, String)> {
        let attempt = async {
            let mut req = self.client.get(url);
            if let Some(token) = bearer {
                req = req.bearer_auth(token);
            }
            let resp = req.send().await?;
            let status = resp.status();
            let body = resp.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };
        match timeout(budget, attempt).await {
            Ok(res) => Ok(res?),
            Err(_) => anyhow::bail!("timed out after {:?}", budget),
        }
    }

    /// A mint is live when `/v1/keysets` answers 2xx with at least one active keyset in `unit`.
    pub async fn probe_mint(&self, mint_url: &str, unit: &str, budget: Duration) -> bool {
        let Some(mint) = normalize_mint_url(mint_url) else {
            return false;
        };
        let url = format!("{}/v1/keysets", mint);
        let (status, body) = match self.get_text(&url, None, budget).await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(%mint, reason = %e, "mint probe failed");
                return false;
            }
        };
        if !status.is_success() {
            tracing::debug!(%mint, %status, "mint probe non-2xx");
            return false;
        }
        match serde_json::from_str::<KeysetsResponse>(&body) {
            Ok(resp) => resp.keysets.iter().any(|k| k.active && k.unit == unit),
            Err(e) => {
                tracing::debug!(%mint, reason = %e, "mint keysets unreadable");
                false
            }
        }
    }

    /// Probe all mints concurrently; live ones are returned in input order.
    pub async fn reachable_mints(&self, mints: &[String], unit: &str, budget: Duration) -> Vec<String> {
        let live = join_all(mints.iter().map(|m| self.probe_mint(m, unit, budget))).await;
        let out: Vec<String> = mints
            .iter()
            .zip(live)
            .filter(|(_, ok)| *ok)
            .map(|(m, _)| m.clone())
            .collect();
        tracing::info!(probed = mints.len(), reachable = out.len(), "mint liveness checked");
        out
    }

    /// Mints an endpoint advertises via `v1/info`. Best-effort: empty on any failure.
    pub async fn advertised_mints(&self, endpoint: &EndpointCandidate, budget: Duration) -> Vec<String> {
        let url = endpoint.join("v1/info");
        let body = match self.get_text(&url, None, budget).await {
            Ok((status, body)) if status.is_success() => body,
            Ok((status, _)) => {
                tracing::debug!(%endpoint, %status, "info request non-2xx");
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!(%endpoint, reason = %e, "info request failed");
                return Vec::new();
            }
        };
        parse_advertised_mints(&body)
    }
}

fn parse_advertised_mints(body: &str) -> Vec<String> {
    let Ok(v) = serde_json::from_str::<Value>(body) else {
        return Vec::new();
    };
    let mut seen = BTreeSet::new();
    v.get("mints")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .filter_map(normalize_mint_url)
                .filter(|m| seen.insert(m.clone()))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_wallet_info(endpoint: &EndpointCandidate, credential: &str, body: &str) -> ValidProbe {
    let v: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let echoed = v
        .get("api_key")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .unwrap_or(credential);
    let balance = v.get("balance").and_then(|b| {
        b.as_u64()
            .or_else(|| b.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
    });
    ValidProbe {
        endpoint: endpoint.clone(),
        credential: echoed.to_string(),
        balance,
    }
}

#[async_trait]
impl CredentialProbe for HttpProber {
    async fn probe_credential(
        &self,
        endpoint: &EndpointCandidate,
        credential: &str,
        budget: Duration,
    ) -> ProbeOutcome {
        let url = endpoint.join("v1/wallet/info");
        let (status, body) = match self.get_text(&url, Some(credential), budget).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(%endpoint, reason = %e, "credential probe failed");
                return ProbeOutcome::Unreachable {
                    endpoint: endpoint.clone(),
                };
            }
        };
        if status.is_success() {
            return ProbeOutcome::Valid(parse_wallet_info(endpoint, credential, &body));
        }
        match classify_rejection(&body) {
            Rejection::InvalidCredential => {
                tracing::debug!(%endpoint, %status, "credential rejected");
                ProbeOutcome::Invalid {
                    endpoint: endpoint.clone(),
                }
            }
            Rejection::Unknown => {
                tracing::debug!(%endpoint, %status, "unrecognized error body, treating as unreachable");
                ProbeOutcome::Unreachable {
                    endpoint: endpoint.clone(),
                }
            }
        }
    }
}
