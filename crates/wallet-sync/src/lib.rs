//! Relay-backed wallet reconciliation and credential endpoint discovery.
//!
//! - **RelayGateway**: ephemeral websocket queries against a set of relays, bounded by one
//!   deadline, deduplicated by event id.
//! - **reconcile**: rebuilds the spendable proof set from encrypted token snapshots, honoring
//!   `del` tombstones, deterministically regardless of relay order or duplicate delivery.
//! - **resolve_config**: latest wallet-config event wins; yields key material and mints.
//! - **HttpProber**: bounded-time credential and mint liveness probes.
//! - **CredentialDiscovery**: batched search for the endpoint that recognizes a credential.
//!
//! Cryptography stays behind the caller-supplied [Identity].

pub mod config;
pub mod directory;
pub mod discovery;
pub mod endpoint;
pub mod event;
pub mod identity;
pub mod payload;
pub mod probe;
pub mod reconcile;
pub mod relay;
pub mod wallet;
pub mod wallet_config;

pub use config::{
    DiscoveryConfig, RelayConfig, WalletConfig, DEFAULT_DIRECTORY_URL, DEFAULT_FALLBACK_MINT,
};
pub use directory::{Directory, HttpDirectory};
pub use discovery::{assemble_candidates, CredentialDiscovery, DiscoveryResult};
pub use endpoint::{normalize_mint_url, EndpointCandidate, EndpointError, EndpointPolicy};
pub use event::{
    EventTemplate, Filter, FilterError, RelayEvent, TOKEN_SNAPSHOT_KIND, WALLET_CONFIG_KIND,
};
pub use identity::{Identity, IdentityError};
pub use payload::{
    decrypt_and_parse, Payload, PayloadError, ProofRecord, TokenSnapshotPayload,
    WalletConfigPayload,
};
pub use probe::{classify_rejection, CredentialProbe, HttpProber, ProbeOutcome, Rejection, ValidProbe};
pub use reconcile::{reconcile, HeldProof, ReconciledWalletState};
pub use relay::{PublishAck, PublishReport, RelayError, RelayGateway};
pub use wallet::{WalletError, WalletSnapshot, WalletSync};
pub use wallet_config::{resolve_config, wallet_mints, ResolvedConfig};
