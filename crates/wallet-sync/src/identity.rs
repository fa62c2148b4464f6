//! Signing/encryption identity supplied by the caller.
//!
//! The core never holds key material; it only calls these operations. Implementations must be
//! safe to call concurrently (decrypts for one reconciliation run are issued in parallel).

use crate::event::{is_hex_32, EventTemplate, RelayEvent};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    /// No usable identity: the one caller precondition the core reports upward.
    #[error("identity unusable: {0}")]
    Unusable(String),

    #[error("signing failed: {0}")]
    Sign(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),
}

/// Caller-owned signer with pairwise symmetric encryption.
#[async_trait]
pub trait Identity: Send + Sync {
    /// Public identifier (32-byte hex key).
    fn public_id(&self) -> &str;

    async fn sign(&self, template: EventTemplate) -> Result<RelayEvent, IdentityError>;

    async fn encrypt(&self, peer_id: &str, plaintext: &str) -> Result<String, IdentityError>;

    async fn decrypt(&self, peer_id: &str, ciphertext: &str) -> Result<String, IdentityError>;
}

/// Check that an identity can be used as a query author and decryption key.
pub fn ensure_usable(identity: &dyn Identity) -> Result<(), IdentityError> {
    let id = identity.public_id();
    if id.is_empty() {
        return Err(IdentityError::Unusable("empty public id".into()));
    }
    if !is_hex_32(id) {
        return Err(IdentityError::Unusable(format!(
            "public id is not a 32-byte hex key: {}",
            id
        )));
    }
    Ok(())
}
