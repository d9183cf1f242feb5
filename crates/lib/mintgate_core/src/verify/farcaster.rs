//! Farcaster sign-in verification.
//!
//! Farcaster clients sign a standard EIP-4361 message with the fid's custody
//! key and name the fid in a `farcaster://fid/<n>` resource. The custody
//! address is looked up through a [`FidResolver`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::wallet::recover_address;
use super::{
    CredentialVerifier, Identity, MessagePolicy, SiweMessage, VerifyError, VerifyExtras,
    consume_nonce,
};
use crate::models::Address;
use crate::session::AuthMethod;
use crate::store::NonceStore;

/// Looks up the custody address of a Farcaster id.
#[async_trait]
pub trait FidResolver: Send + Sync {
    /// `Ok(None)` when the fid is not registered.
    async fn custody_address(&self, fid: u64) -> Result<Option<Address>, VerifyError>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdRegistryEvent {
    id_register_event_body: Option<IdRegisterEventBody>,
}

#[derive(Deserialize)]
struct IdRegisterEventBody {
    to: String,
}

/// Resolves custody addresses through a Farcaster hub's HTTP API.
pub struct HubFidResolver {
    client: Client,
    base_url: String,
}

impl HubFidResolver {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, VerifyError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VerifyError::Dependency(format!("hub client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl FidResolver for HubFidResolver {
    async fn custody_address(&self, fid: u64) -> Result<Option<Address>, VerifyError> {
        let url = format!("{}/v1/onChainIdRegistryEventByFid", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("fid", fid)])
            .send()
            .await
            .map_err(|e| VerifyError::Dependency(format!("hub request failed: {e}")))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(VerifyError::Dependency(format!(
                "hub lookup failed: {}",
                resp.status()
            )));
        }

        let event: IdRegistryEvent = resp
            .json()
            .await
            .map_err(|e| VerifyError::Dependency(format!("hub response parse error: {e}")))?;
        event
            .id_register_event_body
            .map(|body| {
                body.to
                    .parse::<Address>()
                    .map_err(|e| VerifyError::Dependency(format!("hub custody address: {e}")))
            })
            .transpose()
    }
}

/// Fixed fid → custody table, for tests and local development.
#[derive(Default)]
pub struct StaticFidResolver {
    custody: HashMap<u64, Address>,
}

impl StaticFidResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, fid: u64, custody: Address) -> Self {
        self.custody.insert(fid, custody);
        self
    }
}

#[async_trait]
impl FidResolver for StaticFidResolver {
    async fn custody_address(&self, fid: u64) -> Result<Option<Address>, VerifyError> {
        Ok(self.custody.get(&fid).copied())
    }
}

/// Verifies Farcaster sign-ins.
pub struct FarcasterVerifier {
    nonces: Arc<dyn NonceStore>,
    resolver: Arc<dyn FidResolver>,
    policy: MessagePolicy,
}

impl FarcasterVerifier {
    pub fn new(
        nonces: Arc<dyn NonceStore>,
        resolver: Arc<dyn FidResolver>,
        policy: MessagePolicy,
    ) -> Self {
        Self {
            nonces,
            resolver,
            policy,
        }
    }
}

#[async_trait]
impl CredentialVerifier for FarcasterVerifier {
    fn method(&self) -> AuthMethod {
        AuthMethod::Farcaster
    }

    async fn verify(
        &self,
        nonce: &str,
        message: &str,
        signature: &str,
        extras: &VerifyExtras,
    ) -> Result<Identity, VerifyError> {
        consume_nonce(self.nonces.as_ref(), nonce).await?;

        let parsed = SiweMessage::parse(message)?;
        self.policy.check(&parsed, nonce, Utc::now())?;

        let fid = parsed
            .farcaster_fid()
            .ok_or_else(|| VerifyError::MalformedMessage("missing farcaster fid resource".into()))?;
        if extras.fid != Some(fid) {
            debug!(claimed = ?extras.fid, fid, "claimed fid does not match message");
            return Err(VerifyError::IdentityMismatch);
        }

        let signer = recover_address(message, signature)?;
        let custody = self
            .resolver
            .custody_address(fid)
            .await?
            .ok_or(VerifyError::IdentityMismatch)?;
        if signer != custody {
            debug!(%signer, %custody, fid, "signer is not the fid custody address");
            return Err(VerifyError::IdentityMismatch);
        }

        Ok(Identity {
            address: custody,
            chain_id: Some(parsed.chain_id),
            fid: Some(fid),
            method: AuthMethod::Farcaster,
        })
    }
}
