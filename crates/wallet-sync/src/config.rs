//! Relay, wallet and discovery configuration.

use crate::endpoint::EndpointPolicy;
use std::time::Duration;

/// Mint always present in the wallet's mint list.
pub const DEFAULT_FALLBACK_MINT: &str = "https://mint.minibits.cash/Bitcoin";

/// Default directory of routing providers.
pub const DEFAULT_DIRECTORY_URL: &str = "https://api.routstr.com/v1/providers/";

/// Relay query/publish settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Relay websocket URLs (`wss://...`).
    pub relays: Vec<String>,
    /// Upper bound on a whole query or publish round across all relays.
    pub max_wait: Duration,
    /// Time allowed for the CLOSE frame and websocket close handshake after a relay finishes.
    /// Never extends a call past `max_wait`.
    pub close_grace: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            relays: vec![
                "wss://relay.damus.io".to_string(),
                "wss://nos.lol".to_string(),
                "wss://relay.nostr.band".to_string(),
            ],
            max_wait: Duration::from_millis(7000),
            close_grace: Duration::from_millis(500),
        }
    }
}

/// Wallet sync settings.
#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub relay: RelayConfig,
    /// Unit a mint keyset must be denominated in to count as live.
    pub unit: String,
    pub fallback_mint: String,
    /// Per-mint liveness probe budget.
    pub mint_probe_timeout: Duration,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            unit: "sat".to_string(),
            fallback_mint: DEFAULT_FALLBACK_MINT.to_string(),
            mint_probe_timeout: Duration::from_millis(5000),
        }
    }
}

/// Credential discovery settings.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Candidates probed concurrently per batch.
    pub batch_size: usize,
    /// Per-candidate credential probe budget.
    pub probe_timeout: Duration,
    /// Provider directory; `None` disables the directory contribution.
    pub directory_url: Option<String>,
    pub directory_timeout: Duration,
    pub policy: EndpointPolicy,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            batch_size: 6,
            probe_timeout: Duration::from_millis(6000),
            directory_url: Some(DEFAULT_DIRECTORY_URL.to_string()),
            directory_timeout: Duration::from_millis(5000),
            policy: EndpointPolicy::default(),
        }
    }
}
