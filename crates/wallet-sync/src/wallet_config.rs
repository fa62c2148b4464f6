//! Wallet configuration resolution and the wallet's mint list.

use crate::endpoint::normalize_mint_url;
use crate::event::{dedup_by_id, RelayEvent, WALLET_CONFIG_KIND};
use crate::identity::Identity;
use crate::payload::{decrypt_and_parse, Payload, WalletConfigPayload};
use crate::reconcile::is_own;
use futures_util::future::join_all;
use std::collections::BTreeSet;

/// Result of resolving the latest wallet-config event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedConfig {
    /// Wallet private key material, if any config event carried one.
    pub private_key: Option<String>,
    pub mints: BTreeSet<String>,
    /// Event the config was taken from.
    pub event_id: Option<String>,
}

/// Pick the latest decodable wallet-config event (by `created_at`, then event id) and extract
/// its key and mints. No decodable event is not an error: the result is empty.
pub async fn resolve_config(events: &[RelayEvent], identity: &dyn Identity) -> ResolvedConfig {
    let owner = identity.public_id();
    let decoded = join_all(
        dedup_by_id(
            events
                .iter()
                .filter(|ev| ev.kind == WALLET_CONFIG_KIND && is_own(ev, owner)),
        )
        .into_iter()
        .map(|ev| async move {
            match decrypt_and_parse(ev, identity).await {
                Some(Payload::WalletConfig(cfg)) => Some((ev, cfg)),
                _ => None,
            }
        }),
    )
    .await;

    let latest = decoded
        .into_iter()
        .flatten()
        .max_by(|(a, _), (b, _)| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));

    match latest {
        Some((ev, cfg)) => {
            tracing::debug!(event = %ev.id, created_at = ev.created_at, "wallet config resolved");
            from_payload(&ev.id, &cfg)
        }
        None => ResolvedConfig::default(),
    }
}

fn from_payload(event_id: &str, cfg: &WalletConfigPayload) -> ResolvedConfig {
    ResolvedConfig {
        private_key: cfg.privkey(),
        mints: cfg.mints().into_iter().collect(),
        event_id: Some(event_id.to_string()),
    }
}

/// The wallet's mint list: fallback mint first, then config mints, proof mints and mints
/// advertised by the active routing endpoint. Normalized and deduplicated, first-seen order.
pub fn wallet_mints<'a>(
    fallback: &'a str,
    config_mints: impl IntoIterator<Item = &'a String>,
    proof_mints: impl IntoIterator<Item = &'a String>,
    advertised: impl IntoIterator<Item = &'a String>,
) -> Vec<String> {
    let mut seen = BTreeSet::new();
    std::iter::once(fallback)
        .chain(config_mints.into_iter().map(String::as_str))
        .chain(proof_mints.into_iter().map(String::as_str))
        .chain(advertised.into_iter().map(String::as_str))
        .filter_map(normalize_mint_url)
        .filter(|m| seen.insert(m.clone()))
        .collect()
}
