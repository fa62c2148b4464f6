//! Relay event types, query filters and wire decoding.
//!
//! Decodes the relay JSON event shape (`id, pubkey, created_at, kind, tags, content, sig`) into
//! [RelayEvent]. Identifiers are validated as 32-byte hex; anything else is rejected.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::btree_map::{BTreeMap, Entry};
use thiserror::Error;

/// Encrypted wallet configuration (privkey + mint tags).
pub const WALLET_CONFIG_KIND: u32 = 17375;

/// Encrypted token snapshot (proofs held for one mint).
pub const TOKEN_SNAPSHOT_KIND: u32 = 7375;

/// Event as received from (or published to) a relay. Immutable once received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEvent {
    /// Content-addressed id, 64 lowercase hex chars.
    pub id: String,
    #[serde(rename = "pubkey")]
    pub author_id: String,
    pub created_at: u64,
    pub kind: u32,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    /// Ciphertext for the wallet kinds.
    #[serde(rename = "content")]
    pub encrypted_content: String,
    #[serde(default)]
    pub sig: String,
}

impl RelayEvent {
    /// Wire form for `["EVENT", <event>]`.
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "pubkey": self.author_id,
            "created_at": self.created_at,
            "kind": self.kind,
            "tags": self.tags,
            "content": self.encrypted_content,
            "sig": self.sig,
        })
    }
}

/// Unsigned event handed to the identity for signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    pub kind: u32,
    pub created_at: u64,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl EventTemplate {
    /// Template stamped with the current wall-clock second.
    pub fn now(kind: u32, content: String) -> Self {
        let created_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            kind,
            created_at,
            tags: Vec::new(),
            content,
        }
    }
}

/// Malformed query filter. This is a caller bug, never a network condition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("filter has no kinds")]
    NoKinds,

    #[error("filter has no authors")]
    NoAuthors,

    #[error("author is not a 32-byte hex key: {0}")]
    BadAuthor(String),

    #[error("limit must be > 0")]
    ZeroLimit,
}

/// Relay query filter (`{kinds, authors, limit}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub kinds: Vec<u32>,
    pub authors: Vec<String>,
    pub limit: u32,
}

impl Filter {
    /// Single-kind, single-author filter.
    pub fn new(kind: u32, author: impl Into<String>, limit: u32) -> Self {
        Self {
            kinds: vec![kind],
            authors: vec![author.into()],
            limit,
        }
    }

    pub fn validate(&self) -> Result<(), FilterError> {
        if self.kinds.is_empty() {
            return Err(FilterError::NoKinds);
        }
        if self.authors.is_empty() {
            return Err(FilterError::NoAuthors);
        }
        if let Some(bad) = self.authors.iter().find(|a| !is_hex_32(a)) {
            return Err(FilterError::BadAuthor(bad.clone()));
        }
        if self.limit == 0 {
            return Err(FilterError::ZeroLimit);
        }
        Ok(())
    }

    /// Whether an event satisfies kind and author constraints (relays are not trusted to filter).
    pub fn matches(&self, ev: &RelayEvent) -> bool {
        self.kinds.contains(&ev.kind) && self.authors.iter().any(|a| a == &ev.author_id)
    }

    pub fn to_json(&self) -> Value {
        json!({
            "kinds": self.kinds,
            "authors": self.authors,
            "limit": self.limit,
        })
    }
}

/// Decode a relay event JSON object into [RelayEvent].
pub fn decode_event(value: &Value) -> Result<RelayEvent> {
    let ev: RelayEvent = serde_json::from_value(value.clone()).context("event shape")?;
    if !is_hex_32(&ev.id) {
        anyhow::bail!("event id is not 32-byte hex: {}", ev.id);
    }
    if !is_hex_32(&ev.author_id) {
        anyhow::bail!("event pubkey is not 32-byte hex: {}", ev.author_id);
    }
    Ok(ev)
}

/// True for exactly 64 hex characters.
pub fn is_hex_32(s: &str) -> bool {
    s.len() == 64 && hex::decode(s).is_ok()
}

/// Collapse events sharing an id, returned in id order. If two bodies claim the same id, the one
/// with the smaller wire form is kept so the choice never depends on arrival order.
pub fn dedup_by_id<'a>(events: impl IntoIterator<Item = &'a RelayEvent>) -> Vec<&'a RelayEvent> {
    let mut unique: BTreeMap<&str, &RelayEvent> = BTreeMap::new();
    for ev in events {
        match unique.entry(ev.id.as_str()) {
            Entry::Vacant(slot) => {
                slot.insert(ev);
            }
            Entry::Occupied(mut slot) => {
                if *slot.get() == ev {
                    continue;
                }
                tracing::debug!(event = %ev.id, "conflicting bodies under one event id");
                if ev.to_json().to_string() < slot.get().to_json().to_string() {
                    slot.insert(ev);
                }
            }
        }
    }
    unique.into_values().collect()
}
