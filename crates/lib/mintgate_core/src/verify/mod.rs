//! Credential verifiers.
//!
//! A verifier turns a signed sign-in message into an [`Identity`]. Both
//! verifiers consume the session's nonce before looking at anything else, so
//! a nonce is spent by the first attempt that presents it, successful or not.

pub mod farcaster;
pub mod message;
pub mod wallet;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::AuthConfig;
use crate::models::Address;
use crate::session::AuthMethod;
use crate::session::nonce::{NonceStatus, hash_nonce};
use crate::store::{NonceStore, StoreError};

pub use farcaster::{FarcasterVerifier, FidResolver, HubFidResolver, StaticFidResolver};
pub use message::SiweMessage;
pub use wallet::{WalletVerifier, recover_address};

/// A verified signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub address: Address,
    pub chain_id: Option<u64>,
    pub fid: Option<u64>,
    pub method: AuthMethod,
}

/// Verification failures. The HTTP layer collapses all of these into one
/// generic response; the variant is only logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Nonce mismatch")]
    NonceMismatch,

    #[error("Nonce expired")]
    NonceExpired,

    #[error("Bad signature")]
    BadSignature,

    #[error("Identity mismatch")]
    IdentityMismatch,

    #[error("Dependency unavailable: {0}")]
    Dependency(String),
}

impl VerifyError {
    /// Short tag for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            VerifyError::MalformedMessage(_) => "malformed_message",
            VerifyError::NonceMismatch => "nonce_mismatch",
            VerifyError::NonceExpired => "nonce_expired",
            VerifyError::BadSignature => "bad_signature",
            VerifyError::IdentityMismatch => "identity_mismatch",
            VerifyError::Dependency(_) => "dependency",
        }
    }
}

impl From<StoreError> for VerifyError {
    fn from(e: StoreError) -> Self {
        VerifyError::Dependency(e.to_string())
    }
}

/// Method-specific inputs beyond message and signature.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyExtras {
    /// Farcaster id the client claims to sign in as.
    pub fid: Option<u64>,
}

/// Verifies a signed sign-in message against the session's pending nonce.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    fn method(&self) -> AuthMethod;

    async fn verify(
        &self,
        nonce: &str,
        message: &str,
        signature: &str,
        extras: &VerifyExtras,
    ) -> Result<Identity, VerifyError>;
}

/// Checks on message fields shared by every verifier.
#[derive(Debug, Clone)]
pub struct MessagePolicy {
    pub domain: String,
    /// Empty accepts any chain.
    pub allowed_chain_ids: Vec<u64>,
    pub max_age: Duration,
    pub clock_skew: Duration,
}

impl MessagePolicy {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            domain: config.domain.clone(),
            allowed_chain_ids: config.allowed_chain_ids.clone(),
            max_age: config.message_max_age,
            clock_skew: config.clock_skew,
        }
    }

    /// Validate the binding fields of `message` for the session `nonce`.
    pub fn check(
        &self,
        message: &SiweMessage,
        nonce: &str,
        now: DateTime<Utc>,
    ) -> Result<(), VerifyError> {
        if !message.domain.eq_ignore_ascii_case(&self.domain) {
            return Err(VerifyError::MalformedMessage(format!(
                "domain {} is not {}",
                message.domain, self.domain
            )));
        }
        if message.nonce != nonce {
            return Err(VerifyError::NonceMismatch);
        }
        if !self.allowed_chain_ids.is_empty() && !self.allowed_chain_ids.contains(&message.chain_id)
        {
            return Err(VerifyError::MalformedMessage(format!(
                "chain id {} not allowed",
                message.chain_id
            )));
        }

        let skew = chrono::Duration::from_std(self.clock_skew).unwrap_or_default();
        let max_age = chrono::Duration::from_std(self.max_age).unwrap_or_default();
        if message.issued_at > now + skew {
            return Err(VerifyError::MalformedMessage("issued in the future".into()));
        }
        if message.issued_at + max_age + skew < now {
            return Err(VerifyError::NonceExpired);
        }
        if message.expiration_time.is_some_and(|t| t <= now) {
            return Err(VerifyError::NonceExpired);
        }
        if message.not_before.is_some_and(|t| t > now + skew) {
            return Err(VerifyError::MalformedMessage("not yet valid".into()));
        }
        Ok(())
    }
}

/// Spend `nonce`, mapping the store's verdict to verification errors.
pub(crate) async fn consume_nonce(store: &dyn NonceStore, nonce: &str) -> Result<(), VerifyError> {
    match store.consume(&hash_nonce(nonce)).await? {
        NonceStatus::Consumed => Ok(()),
        NonceStatus::Expired => Err(VerifyError::NonceExpired),
        NonceStatus::Unknown => Err(VerifyError::NonceMismatch),
    }
}

#[cfg(test)]
mod tests {
    use super::message::tests::MessageBuilder;
    use super::*;

    fn policy() -> MessagePolicy {
        let mut config = AuthConfig::new("app.example.com", "secret");
        config.allowed_chain_ids = vec![8453];
        MessagePolicy::from_config(&config)
    }

    fn builder() -> MessageBuilder {
        MessageBuilder::new(
            "0x3333333333333333333333333333333333333333".parse().unwrap(),
            "nonce12345",
        )
    }

    fn check(b: &MessageBuilder) -> Result<(), VerifyError> {
        let m = SiweMessage::parse(&b.build()).unwrap();
        policy().check(&m, "nonce12345", Utc::now())
    }

    #[test]
    fn accepts_fresh_bound_message() {
        assert_eq!(check(&builder()), Ok(()));
    }

    #[test]
    fn rejects_wrong_domain_and_chain() {
        let mut b = builder();
        b.domain = "evil.example.com".into();
        assert!(matches!(check(&b), Err(VerifyError::MalformedMessage(_))));

        let mut b = builder();
        b.chain_id = 1;
        assert!(matches!(check(&b), Err(VerifyError::MalformedMessage(_))));
    }

    #[test]
    fn rejects_other_nonce() {
        let m = SiweMessage::parse(&builder().build()).unwrap();
        assert_eq!(
            policy().check(&m, "othernonce1", Utc::now()),
            Err(VerifyError::NonceMismatch)
        );
    }

    #[test]
    fn enforces_time_window() {
        let mut b = builder();
        b.issued_at = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(check(&b), Err(VerifyError::NonceExpired));

        let mut b = builder();
        b.expiration_time = Some(Utc::now() - chrono::Duration::seconds(1));
        assert_eq!(check(&b), Err(VerifyError::NonceExpired));

        let mut b = builder();
        b.issued_at = Utc::now() + chrono::Duration::hours(1);
        assert!(matches!(check(&b), Err(VerifyError::MalformedMessage(_))));

        let mut b = builder();
        b.not_before = Some(Utc::now() + chrono::Duration::hours(1));
        assert!(matches!(check(&b), Err(VerifyError::MalformedMessage(_))));
    }
}
