//! Wallet sync: fetch, resolve and reconcile the wallet from relays, and publish updates.

use crate::config::WalletConfig;
use crate::endpoint::EndpointCandidate;
use crate::event::{EventTemplate, Filter, RelayEvent, TOKEN_SNAPSHOT_KIND, WALLET_CONFIG_KIND};
use crate::identity::{ensure_usable, Identity, IdentityError};
use crate::payload::{TokenSnapshotPayload, WalletConfigPayload};
use crate::probe::HttpProber;
use crate::reconcile::{reconcile, ReconciledWalletState};
use crate::relay::{PublishReport, RelayError, RelayGateway};
use crate::wallet_config::{resolve_config, wallet_mints, ResolvedConfig};
use thiserror::Error;

const CONFIG_QUERY_LIMIT: u32 = 20;
const SNAPSHOT_QUERY_LIMIT: u32 = 1000;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Wallet state recomputed from scratch by one [WalletSync::load].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletSnapshot {
    pub config: ResolvedConfig,
    pub state: ReconciledWalletState,
}

impl WalletSnapshot {
    /// Mint list per [wallet_mints], given the mints the active endpoint advertises.
    pub fn mints(&self, fallback: &str, advertised: &[String]) -> Vec<String> {
        wallet_mints(fallback, &self.config.mints, &self.state.mints(), advertised)
    }
}

pub struct WalletSync {
    config: WalletConfig,
    gateway: RelayGateway,
}

impl WalletSync {
    pub fn new(config: WalletConfig) -> Self {
        let gateway = RelayGateway::from_config(&config.relay);
        Self { config, gateway }
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    /// Fetch both wallet kinds concurrently and rebuild config and proof state.
    pub async fn load(&self, identity: &dyn Identity) -> Result<WalletSnapshot, WalletError> {
        ensure_usable(identity)?;
        let author = identity.public_id();
        let relays = &self.config.relay.relays;
        let wait = self.config.relay.max_wait;
        let config_filter = Filter::new(WALLET_CONFIG_KIND, author, CONFIG_QUERY_LIMIT);
        let token_filter = Filter::new(TOKEN_SNAPSHOT_KIND, author, SNAPSHOT_QUERY_LIMIT);

        let (config_events, token_events) = tokio::join!(
            self.gateway.query(relays, &config_filter, wait),
            self.gateway.query(relays, &token_filter, wait),
        );
        let (config_events, token_events) = (config_events?, token_events?);
        let (config, state) = tokio::join!(
            resolve_config(&config_events, identity),
            reconcile(&token_events, identity),
        );
        Ok(WalletSnapshot { config, state })
    }

    /// Mint list including what `active` advertises (best-effort).
    pub async fn mints(
        &self,
        snapshot: &WalletSnapshot,
        prober: &HttpProber,
        active: Option<&EndpointCandidate>,
    ) -> Vec<String> {
        let advertised = match active {
            Some(endpoint) => {
                prober
                    .advertised_mints(endpoint, self.config.mint_probe_timeout)
                    .await
            }
            None => Vec::new(),
        };
        snapshot.mints(&self.config.fallback_mint, &advertised)
    }

    /// Subset of `mints` that currently serve an active keyset in the configured unit.
    pub async fn reachable_mints(&self, prober: &HttpProber, mints: &[String]) -> Vec<String> {
        prober
            .reachable_mints(mints, &self.config.unit, self.config.mint_probe_timeout)
            .await
    }

    /// Publish a wallet-config event (after mints are added or removed).
    pub async fn publish_wallet_config(
        &self,
        identity: &dyn Identity,
        payload: &WalletConfigPayload,
    ) -> Result<(RelayEvent, PublishReport), WalletError> {
        self.publish_encrypted(identity, WALLET_CONFIG_KIND, payload.to_content()?)
            .await
    }

    /// Publish a token snapshot (new proofs captured, or earlier snapshots superseded via `del`).
    pub async fn publish_token_snapshot(
        &self,
        identity: &dyn Identity,
        payload: &TokenSnapshotPayload,
    ) -> Result<(RelayEvent, PublishReport), WalletError> {
        self.publish_encrypted(identity, TOKEN_SNAPSHOT_KIND, payload.to_content()?)
            .await
    }

    async fn publish_encrypted(
        &self,
        identity: &dyn Identity,
        kind: u32,
        plaintext: String,
    ) -> Result<(RelayEvent, PublishReport), WalletError> {
        ensure_usable(identity)?;
        let ciphertext = identity.encrypt(identity.public_id(), &plaintext).await?;
        let event = identity.sign(EventTemplate::now(kind, ciphertext)).await?;
        let report = self
            .gateway
            .publish(&self.config.relay.relays, &event, self.config.relay.max_wait)
            .await;
        Ok((event, report))
    }
}
