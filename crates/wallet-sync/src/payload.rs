//! Decrypted payload shapes and their validation.
//!
//! Two shapes exist, selected by event kind:
//!
//! - token snapshot (kind 7375): `{"mint": url, "proofs": [{id, amount, secret, C}], "del": [event ids]}`
//! - wallet config (kind 17375): `[["privkey", hex], ["mint", url], ...]`
//!
//! Decoding is all-or-nothing for a snapshot: any shape mismatch rejects the whole payload with
//! a [PayloadError] instead of yielding a partially populated value. Wallet-config rows are the
//! exception: a malformed row is skipped, but the payload itself must still be an array.

use crate::endpoint::normalize_mint_url;
use crate::event::{RelayEvent, TOKEN_SNAPSHOT_KIND, WALLET_CONFIG_KIND};
use crate::identity::Identity;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use thiserror::Error;

/// Why a decrypted payload was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("JSON decode error: {0}")]
    Json(String),

    #[error("payload is not an object")]
    NotAnObject,

    #[error("payload is not an array")]
    NotAnArray,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("wrong type for '{0}': expected {1}")]
    WrongType(&'static str, &'static str),

    #[error("invalid mint url: {0:?}")]
    InvalidMint(String),

    #[error("proof {0} has zero amount")]
    ZeroAmount(usize),

    #[error("proof {0} has neither a secret nor an (id, C) pair")]
    NoProofIdentity(usize),

    #[error("event kind {0} carries no wallet payload")]
    UnsupportedKind(u32),
}

/// One bearer proof as carried in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofRecord {
    /// Keyset id.
    pub id: String,
    pub amount: u64,
    pub secret: String,
    /// Unblinded signature.
    #[serde(rename = "C")]
    pub commitment: String,
}

impl ProofRecord {
    /// Dedup identity: the secret when present, otherwise `id:amount:C`.
    pub fn identity(&self) -> String {
        if !self.secret.is_empty() {
            self.secret.clone()
        } else {
            format!("{}:{}:{}", self.id, self.amount, self.commitment)
        }
    }
}

/// Proofs valid as of one event for one mint, optionally retiring earlier events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenSnapshotPayload {
    pub mint: String,
    pub proofs: Vec<ProofRecord>,
    #[serde(rename = "del", skip_serializing_if = "BTreeSet::is_empty")]
    pub deleted_event_ids: BTreeSet<String>,
}

impl TokenSnapshotPayload {
    pub fn to_content(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Well-formed `(key, value)` rows of a wallet-config payload, in original order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WalletConfigPayload {
    pub tags: Vec<(String, String)>,
}

impl WalletConfigPayload {
    pub fn new(privkey: &str, mints: &[String]) -> Self {
        let mut tags = vec![("privkey".to_string(), privkey.to_string())];
        tags.extend(mints.iter().map(|m| ("mint".to_string(), m.clone())));
        Self { tags }
    }

    /// First well-formed (trimmed, non-empty) `privkey` value; later ones are ignored.
    pub fn privkey(&self) -> Option<String> {
        self.tags
            .iter()
            .filter(|(k, _)| k == "privkey")
            .map(|(_, v)| v.trim())
            .find(|v| !v.is_empty())
            .map(str::to_string)
    }

    /// Normalized `mint` values, deduplicated, first-seen order.
    pub fn mints(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.tags
            .iter()
            .filter(|(k, _)| k == "mint")
            .filter_map(|(_, v)| normalize_mint_url(v))
            .filter(|m| seen.insert(m.clone()))
            .collect()
    }

    pub fn to_content(&self) -> Result<String, serde_json::Error> {
        let rows: Vec<[&str; 2]> = self
            .tags
            .iter()
            .map(|(k, v)| [k.as_str(), v.as_str()])
            .collect();
        serde_json::to_string(&rows)
    }
}

/// Decoded payload of one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    TokenSnapshot(TokenSnapshotPayload),
    WalletConfig(WalletConfigPayload),
}

/// Parse a decrypted token-snapshot payload.
pub fn parse_token_snapshot(plaintext: &str) -> Result<TokenSnapshotPayload, PayloadError> {
    let value: Value =
        serde_json::from_str(plaintext).map_err(|e| PayloadError::Json(e.to_string()))?;
    let obj = value.as_object().ok_or(PayloadError::NotAnObject)?;

    let mint_raw = obj
        .get("mint")
        .ok_or(PayloadError::MissingField("mint"))?
        .as_str()
        .ok_or(PayloadError::WrongType("mint", "string"))?;
    let mint =
        normalize_mint_url(mint_raw).ok_or_else(|| PayloadError::InvalidMint(mint_raw.into()))?;

    let proofs = obj
        .get("proofs")
        .ok_or(PayloadError::MissingField("proofs"))?
        .as_array()
        .ok_or(PayloadError::WrongType("proofs", "array"))?
        .iter()
        .enumerate()
        .map(|(i, p)| parse_proof(i, p))
        .collect::<Result<Vec<_>, _>>()?;

    let deleted_event_ids = match obj.get("del") {
        None | Some(Value::Null) => BTreeSet::new(),
        Some(Value::Array(ids)) => ids
            .iter()
            .map(|id| {
                id.as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or(PayloadError::WrongType("del", "array of strings"))
            })
            .filter(|r| r.as_ref().map_or(true, |s| !s.is_empty()))
            .collect::<Result<BTreeSet<_>, _>>()?,
        Some(_) => return Err(PayloadError::WrongType("del", "array of strings")),
    };

    Ok(TokenSnapshotPayload {
        mint,
        proofs,
        deleted_event_ids,
    })
}

fn parse_proof(index: usize, value: &Value) -> Result<ProofRecord, PayloadError> {
    let obj = value
        .as_object()
        .ok_or(PayloadError::WrongType("proofs", "array of objects"))?;
    let amount = obj
        .get("amount")
        .ok_or(PayloadError::MissingField("amount"))?
        .as_u64()
        .ok_or(PayloadError::WrongType("amount", "unsigned integer"))?;
    if amount == 0 {
        return Err(PayloadError::ZeroAmount(index));
    }
    let proof = ProofRecord {
        id: optional_str(obj, "id")?,
        amount,
        secret: optional_str(obj, "secret")?,
        commitment: optional_str(obj, "C")?,
    };
    if proof.secret.is_empty() && (proof.id.is_empty() || proof.commitment.is_empty()) {
        return Err(PayloadError::NoProofIdentity(index));
    }
    Ok(proof)
}

fn optional_str(obj: &Map<String, Value>, key: &'static str) -> Result<String, PayloadError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(PayloadError::WrongType(key, "string")),
    }
}

/// Parse a decrypted wallet-config payload. Rows that are not arrays starting with two
/// strings are skipped.
pub fn parse_wallet_config(plaintext: &str) -> Result<WalletConfigPayload, PayloadError> {
    let value: Value =
        serde_json::from_str(plaintext).map_err(|e| PayloadError::Json(e.to_string()))?;
    let rows = value.as_array().ok_or(PayloadError::NotAnArray)?;
    let tags = rows
        .iter()
        .filter_map(|row| match row.as_array().map(Vec::as_slice) {
            Some([Value::String(k), Value::String(v), ..]) => Some((k.clone(), v.clone())),
            _ => {
                tracing::debug!(%row, "malformed wallet tag row skipped");
                None
            }
        })
        .collect();
    Ok(WalletConfigPayload { tags })
}

/// Parse a decrypted payload according to the event kind it came from.
pub fn parse_payload(kind: u32, plaintext: &str) -> Result<Payload, PayloadError> {
    match kind {
        TOKEN_SNAPSHOT_KIND => parse_token_snapshot(plaintext).map(Payload::TokenSnapshot),
        WALLET_CONFIG_KIND => parse_wallet_config(plaintext).map(Payload::WalletConfig),
        other => Err(PayloadError::UnsupportedKind(other)),
    }
}

/// Decrypt an event's content with `identity` and decode it.
///
/// Undecryptable or malformed events yield `None`; nothing is surfaced past this point.
pub async fn decrypt_and_parse(event: &RelayEvent, identity: &dyn Identity) -> Option<Payload> {
    let plaintext = match identity
        .decrypt(&event.author_id, &event.encrypted_content)
        .await
    {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!(event = %event.id, reason = %e, "undecryptable event dropped");
            return None;
        }
    };
    match parse_payload(event.kind, &plaintext) {
        Ok(p) => Some(p),
        Err(e) => {
            tracing::debug!(event = %event.id, kind = event.kind, reason = %e, "malformed payload dropped");
            None
        }
    }
}
