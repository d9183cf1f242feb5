//! Wallet signature verification (EIP-4361 message, EIP-191 signature).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use sha3::{Digest, Keccak256};
use tracing::debug;

use super::{
    CredentialVerifier, Identity, MessagePolicy, SiweMessage, VerifyError, VerifyExtras,
    consume_nonce,
};
use crate::models::Address;
use crate::session::AuthMethod;
use crate::store::NonceStore;

/// Keccak-256 of the EIP-191 personal-message encoding of `message`.
pub fn personal_message_digest(message: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message.as_bytes());
    hasher.finalize().into()
}

/// Ethereum address of a public key.
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&hash[12..]);
    Address::from_bytes(bytes)
}

/// Recover the address that produced a 65-byte hex `signature` over
/// `message`. Accepts `v` as 27/28 or 0/1.
pub fn recover_address(message: &str, signature: &str) -> Result<Address, VerifyError> {
    let raw = signature.strip_prefix("0x").unwrap_or(signature);
    let bytes = hex::decode(raw).map_err(|_| VerifyError::BadSignature)?;
    if bytes.len() != 65 {
        return Err(VerifyError::BadSignature);
    }
    let v = match bytes[64] {
        27 | 28 => bytes[64] - 27,
        0 | 1 => bytes[64],
        _ => return Err(VerifyError::BadSignature),
    };
    let sig = Signature::from_slice(&bytes[..64]).map_err(|_| VerifyError::BadSignature)?;
    let recovery_id = RecoveryId::from_byte(v).ok_or(VerifyError::BadSignature)?;
    let digest = personal_message_digest(message);
    let key = VerifyingKey::recover_from_prehash(&digest, &sig, recovery_id)
        .map_err(|_| VerifyError::BadSignature)?;
    Ok(address_of(&key))
}

/// Verifies plain wallet sign-ins.
pub struct WalletVerifier {
    nonces: Arc<dyn NonceStore>,
    policy: MessagePolicy,
}

impl WalletVerifier {
    pub fn new(nonces: Arc<dyn NonceStore>, policy: MessagePolicy) -> Self {
        Self { nonces, policy }
    }
}

#[async_trait]
impl CredentialVerifier for WalletVerifier {
    fn method(&self) -> AuthMethod {
        AuthMethod::Wallet
    }

    async fn verify(
        &self,
        nonce: &str,
        message: &str,
        signature: &str,
        _extras: &VerifyExtras,
    ) -> Result<Identity, VerifyError> {
        consume_nonce(self.nonces.as_ref(), nonce).await?;

        let parsed = SiweMessage::parse(message)?;
        self.policy.check(&parsed, nonce, Utc::now())?;

        let signer = recover_address(message, signature)?;
        if signer != parsed.address {
            debug!(%signer, claimed = %parsed.address, "signer does not match message address");
            return Err(VerifyError::BadSignature);
        }

        Ok(Identity {
            address: parsed.address,
            chain_id: Some(parsed.chain_id),
            fid: None,
            method: AuthMethod::Wallet,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use k256::ecdsa::SigningKey;

    use super::*;
    use crate::config::AuthConfig;
    use crate::session::nonce::issue_nonce;
    use crate::store::MemoryStore;
    use crate::verify::message::tests::MessageBuilder;

    pub(crate) fn signing_key(seed: u8) -> SigningKey {
        SigningKey::from_slice(&[seed; 32]).unwrap()
    }

    pub(crate) fn sign(key: &SigningKey, message: &str) -> String {
        let digest = personal_message_digest(message);
        let (sig, recid) = key.sign_prehash_recoverable(&digest).unwrap();
        let mut bytes = sig.to_bytes().to_vec();
        bytes.push(recid.to_byte() + 27);
        format!("0x{}", hex::encode(bytes))
    }

    fn verifier(store: Arc<MemoryStore>) -> WalletVerifier {
        let config = AuthConfig::new("app.example.com", "secret");
        WalletVerifier::new(store, MessagePolicy::from_config(&config))
    }

    #[test]
    fn recovers_signer() {
        let key = signing_key(7);
        let sig = sign(&key, "hello");
        assert_eq!(
            recover_address("hello", &sig).unwrap(),
            address_of(key.verifying_key())
        );
        assert_ne!(
            recover_address("hello!", &sig).unwrap(),
            address_of(key.verifying_key())
        );
    }

    #[test]
    fn accepts_zero_based_recovery_byte() {
        let key = signing_key(9);
        let digest = personal_message_digest("hi");
        let (sig, recid) = key.sign_prehash_recoverable(&digest).unwrap();
        let mut bytes = sig.to_bytes().to_vec();
        bytes.push(recid.to_byte());
        let sig = hex::encode(bytes);
        assert_eq!(
            recover_address("hi", &sig).unwrap(),
            address_of(key.verifying_key())
        );
    }

    #[test]
    fn rejects_garbage_signatures() {
        assert_eq!(recover_address("m", "0x1234"), Err(VerifyError::BadSignature));
        assert_eq!(recover_address("m", "zz"), Err(VerifyError::BadSignature));
        let mut bytes = vec![1u8; 64];
        bytes.push(5);
        assert_eq!(
            recover_address("m", &hex::encode(bytes)),
            Err(VerifyError::BadSignature)
        );
    }

    #[tokio::test]
    async fn verifies_and_spends_nonce() {
        let store = Arc::new(MemoryStore::new());
        let nonce = issue_nonce(store.as_ref(), std::time::Duration::from_secs(60))
            .await
            .unwrap();
        let key = signing_key(3);
        let address = address_of(key.verifying_key());
        let message = MessageBuilder::new(address, &nonce).build();
        let signature = sign(&key, &message);

        let v = verifier(store.clone());
        let identity = v
            .verify(&nonce, &message, &signature, &VerifyExtras::default())
            .await
            .unwrap();
        assert_eq!(identity.address, address);
        assert_eq!(identity.chain_id, Some(8453));
        assert_eq!(identity.method, AuthMethod::Wallet);

        // Replaying the same signed message fails: the nonce is gone.
        let replay = v
            .verify(&nonce, &message, &signature, &VerifyExtras::default())
            .await;
        assert_eq!(replay, Err(VerifyError::NonceMismatch));
    }

    #[tokio::test]
    async fn failed_attempt_still_spends_nonce() {
        let store = Arc::new(MemoryStore::new());
        let nonce = issue_nonce(store.as_ref(), std::time::Duration::from_secs(60))
            .await
            .unwrap();
        let key = signing_key(3);
        let other = signing_key(4);
        let message = MessageBuilder::new(address_of(key.verifying_key()), &nonce).build();

        let v = verifier(store.clone());
        let forged = v
            .verify(&nonce, &message, &sign(&other, &message), &VerifyExtras::default())
            .await;
        assert_eq!(forged, Err(VerifyError::BadSignature));

        let honest = v
            .verify(&nonce, &message, &sign(&key, &message), &VerifyExtras::default())
            .await;
        assert_eq!(honest, Err(VerifyError::NonceMismatch));
    }

    #[tokio::test]
    async fn expired_nonce_is_reported() {
        let store = Arc::new(MemoryStore::new());
        let nonce = issue_nonce(store.as_ref(), std::time::Duration::ZERO)
            .await
            .unwrap();
        let key = signing_key(3);
        let message = MessageBuilder::new(address_of(key.verifying_key()), &nonce).build();
        let result = verifier(store)
            .verify(&nonce, &message, &sign(&key, &message), &VerifyExtras::default())
            .await;
        assert_eq!(result, Err(VerifyError::NonceExpired));
    }

    #[tokio::test]
    async fn store_outage_fails_closed() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let result = verifier(store)
            .verify("whatever1", "m", "0x00", &VerifyExtras::default())
            .await;
        assert!(matches!(result, Err(VerifyError::Dependency(_))));
    }
}
