//! Proof reconciliation: rebuilds the spendable proof set from token-snapshot events.
//!
//! Input is whatever the relays returned: unordered, duplicated, partially retired. The merge is
//! a single replay in `(created_at, event id)` order, so the output depends only on the set of
//! events, never on arrival order. Retired events (listed in any snapshot's `del`) contribute
//! nothing; a later snapshot narrating the same proof identity overwrites the earlier entry.
//! Every run starts from an empty state.

use crate::event::{dedup_by_id, RelayEvent, TOKEN_SNAPSHOT_KIND};
use crate::identity::Identity;
use crate::payload::{decrypt_and_parse, Payload, ProofRecord, TokenSnapshotPayload};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// A proof in the reconciled state, tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeldProof {
    #[serde(flatten)]
    pub proof: ProofRecord,
    pub mint_url: String,
    /// Snapshot event that last narrated this proof.
    pub event_id: String,
}

/// Authoritative proof set keyed by proof identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciledWalletState {
    proofs: BTreeMap<String, HeldProof>,
}

impl ReconciledWalletState {
    pub fn proofs(&self) -> &BTreeMap<String, HeldProof> {
        &self.proofs
    }

    pub fn get(&self, identity: &str) -> Option<&HeldProof> {
        self.proofs.get(identity)
    }

    pub fn len(&self) -> usize {
        self.proofs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proofs.is_empty()
    }

    /// Total amount across all mints.
    pub fn balance(&self) -> u64 {
        self.proofs
            .values()
            .fold(0u64, |acc, p| acc.saturating_add(p.proof.amount))
    }

    pub fn balance_by_mint(&self) -> BTreeMap<String, u64> {
        let mut out = BTreeMap::new();
        for p in self.proofs.values() {
            let entry = out.entry(p.mint_url.clone()).or_insert(0u64);
            *entry = entry.saturating_add(p.proof.amount);
        }
        out
    }

    pub fn proofs_for_mint<'a>(&'a self, mint: &'a str) -> impl Iterator<Item = &'a HeldProof> + 'a {
        self.proofs.values().filter(move |p| p.mint_url == mint)
    }

    /// Mints tagged on currently held proofs.
    pub fn mints(&self) -> BTreeSet<String> {
        self.proofs.values().map(|p| p.mint_url.clone()).collect()
    }

    /// Events still contributing proofs for `mint`; a replacement snapshot lists these in `del`.
    pub fn event_ids_for_mint(&self, mint: &str) -> BTreeSet<String> {
        self.proofs_for_mint(mint)
            .map(|p| p.event_id.clone())
            .collect()
    }
}

/// A successfully decoded snapshot with its event metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSnapshot {
    pub event_id: String,
    pub created_at: u64,
    pub payload: TokenSnapshotPayload,
}

/// Decrypt every token-snapshot event and reconcile.
pub async fn reconcile(events: &[RelayEvent], identity: &dyn Identity) -> ReconciledWalletState {
    let decoded = decode_snapshots(events, identity).await;
    merge_snapshots(decoded)
}

/// Decode token-snapshot events, dropping duplicates, other kinds, other authors and anything
/// unparseable.
pub async fn decode_snapshots(
    events: &[RelayEvent],
    identity: &dyn Identity,
) -> Vec<DecodedSnapshot> {
    let owner = identity.public_id();
    let unique = dedup_by_id(
        events
            .iter()
            .filter(|ev| ev.kind == TOKEN_SNAPSHOT_KIND && is_own(ev, owner)),
    );
    let decoded = join_all(unique.into_iter().map(|ev| async move {
        match decrypt_and_parse(ev, identity).await {
            Some(Payload::TokenSnapshot(payload)) => Some(DecodedSnapshot {
                event_id: ev.id.clone(),
                created_at: ev.created_at,
                payload,
            }),
            _ => None,
        }
    }))
    .await;
    decoded.into_iter().flatten().collect()
}

/// Wallet events must be authored by `owner`; others are dropped.
pub(crate) fn is_own(ev: &RelayEvent, owner: &str) -> bool {
    if ev.author_id == owner {
        return true;
    }
    tracing::debug!(event = %ev.id, author = %ev.author_id, "foreign wallet event dropped");
    false
}

/// Replay decoded snapshots into a fresh state.
pub fn merge_snapshots(mut decoded: Vec<DecodedSnapshot>) -> ReconciledWalletState {
    let tombstoned: BTreeSet<String> = decoded
        .iter()
        .flat_map(|d| d.payload.deleted_event_ids.iter().cloned())
        .collect();

    decoded.sort_by(|a, b| {
        (a.created_at, a.event_id.as_str()).cmp(&(b.created_at, b.event_id.as_str()))
    });
    decoded.dedup_by(|a, b| a.event_id == b.event_id);

    let mut state = ReconciledWalletState::default();
    let mut skipped = 0usize;
    for snap in decoded.iter() {
        if tombstoned.contains(&snap.event_id) {
            skipped += 1;
            continue;
        }
        for proof in &snap.payload.proofs {
            state.proofs.insert(
                proof.identity(),
                HeldProof {
                    proof: proof.clone(),
                    mint_url: snap.payload.mint.clone(),
                    event_id: snap.event_id.clone(),
                },
            );
        }
    }
    tracing::info!(
        snapshots = decoded.len(),
        retired = skipped,
        proofs = state.len(),
        balance = state.balance(),
        "reconciled wallet state"
    );
    state
}
