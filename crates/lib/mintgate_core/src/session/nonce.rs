//! Single-use login nonces.
//!
//! Nonces are stored hashed; the plaintext only lives in the pending session
//! cookie and in the message the wallet signs.

use std::time::Duration;

use chrono::Utc;
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use sha2::{Digest, Sha256};

use crate::store::{NonceStore, StoreError};

/// Nonce length. EIP-4361 requires at least 8 alphanumeric characters.
pub const NONCE_LEN: usize = 32;

/// Outcome of consuming a nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceStatus {
    /// The nonce existed, was live and is now gone. Only one caller sees this.
    Consumed,
    /// The nonce existed but had expired. It is gone as well.
    Expired,
    /// No such nonce: never issued or already consumed.
    Unknown,
}

/// Generate a cryptographically random nonce.
pub fn generate_nonce() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}

/// SHA-256 hash a nonce for storage.
pub fn hash_nonce(nonce: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(nonce.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Generate a nonce and register it with `ttl` in the store.
pub async fn issue_nonce(store: &dyn NonceStore, ttl: Duration) -> Result<String, StoreError> {
    let nonce = generate_nonce();
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|e| StoreError::Database(format!("nonce ttl: {e}")))?;
    store.issue(&hash_nonce(&nonce), Utc::now() + ttl).await?;
    Ok(nonce)
}

/// Spend a nonce without verifying anything against it. Used when a login
/// attempt fails before any verifier runs.
pub async fn discard_nonce(store: &dyn NonceStore, nonce: &str) -> Result<(), StoreError> {
    store.consume(&hash_nonce(nonce)).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonces_are_alphanumeric_and_unique() {
        let a = generate_nonce();
        let b = generate_nonce();
        assert_eq!(a.len(), NONCE_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn hash_is_stable_hex() {
        let h = hash_nonce("abc");
        assert_eq!(h.len(), 64);
        assert_eq!(h, hash_nonce("abc"));
        assert_ne!(h, hash_nonce("abd"));
    }

    #[tokio::test]
    async fn discarded_nonces_cannot_be_consumed() {
        let store = crate::store::MemoryStore::new();
        let nonce = issue_nonce(&store, Duration::from_secs(60)).await.unwrap();
        discard_nonce(&store, &nonce).await.unwrap();
        assert_eq!(
            store.consume(&hash_nonce(&nonce)).await.unwrap(),
            NonceStatus::Unknown
        );
    }
}
