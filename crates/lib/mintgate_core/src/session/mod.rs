//! Session state and its lifecycle.
//!
//! A session slot is exactly one of anonymous, pending (a nonce was issued
//! and awaits a signed message) or authenticated. The slot travels to the
//! client as a signed token (see [`token`]); the server keeps no session
//! table.

pub mod nonce;
pub mod token;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Address;
use crate::verify::Identity;

pub use token::SessionCodec;

/// Session lifecycle errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Session is already authenticated")]
    AlreadyAuthenticated,

    #[error("No pending login for this session")]
    NoPendingLogin,

    #[error("Session is not authenticated")]
    NotAuthenticated,

    #[error("Token error: {0}")]
    Token(String),
}

/// How the session was authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Wallet,
    Farcaster,
}

/// Payload of an authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedSession {
    pub address: Address,
    pub chain_id: Option<u64>,
    pub fid: Option<u64>,
    pub auth_method: AuthMethod,
    pub logged_in_at: DateTime<Utc>,
    pub tos_accepted_version: Option<String>,
    pub tos_accepted_at: Option<DateTime<Utc>>,
}

/// The content of one session slot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SessionState {
    #[default]
    Anonymous,
    Pending {
        nonce: String,
    },
    Authenticated(AuthenticatedSession),
}

impl SessionState {
    /// Start a login attempt. Replaces any earlier pending nonce.
    pub fn begin_pending(&self, nonce: String) -> Result<SessionState, SessionError> {
        match self {
            SessionState::Authenticated(_) => Err(SessionError::AlreadyAuthenticated),
            SessionState::Anonymous | SessionState::Pending { .. } => {
                Ok(SessionState::Pending { nonce })
            }
        }
    }

    /// Complete a login attempt with a verified identity. Clears the nonce.
    pub fn finalize(
        &self,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<SessionState, SessionError> {
        match self {
            SessionState::Authenticated(_) => Err(SessionError::AlreadyAuthenticated),
            SessionState::Anonymous => Err(SessionError::NoPendingLogin),
            SessionState::Pending { .. } => {
                Ok(SessionState::Authenticated(AuthenticatedSession {
                    address: identity.address,
                    chain_id: identity.chain_id,
                    fid: identity.fid,
                    auth_method: identity.method,
                    logged_in_at: now,
                    tos_accepted_version: None,
                    tos_accepted_at: None,
                }))
            }
        }
    }

    /// Record terms-of-service acceptance on an authenticated session.
    pub fn accept_terms(
        &self,
        version: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionState, SessionError> {
        match self {
            SessionState::Authenticated(s) => Ok(SessionState::Authenticated(AuthenticatedSession {
                tos_accepted_version: Some(version.to_string()),
                tos_accepted_at: Some(now),
                ..s.clone()
            })),
            _ => Err(SessionError::NotAuthenticated),
        }
    }

    pub fn pending_nonce(&self) -> Option<&str> {
        match self {
            SessionState::Pending { nonce } => Some(nonce),
            _ => None,
        }
    }

    pub fn authenticated(&self) -> Option<&AuthenticatedSession> {
        match self {
            SessionState::Authenticated(s) => Some(s),
            _ => None,
        }
    }

    pub fn address(&self) -> Option<Address> {
        self.authenticated().map(|s| s.address)
    }

    pub fn is_logged_in(&self) -> bool {
        self.authenticated().is_some()
    }

    /// Client-facing view. Never includes the nonce.
    pub fn view(&self) -> SessionView {
        match self.authenticated() {
            Some(s) => SessionView {
                is_logged_in: true,
                address: Some(s.address),
                chain_id: s.chain_id,
                auth_method: Some(s.auth_method),
                tos_accepted_version: s.tos_accepted_version.clone(),
                fid: s.fid,
            },
            None => SessionView::default(),
        }
    }
}

/// What `GET /auth/session` reports.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub is_logged_in: bool,
    pub address: Option<Address>,
    pub chain_id: Option<u64>,
    pub auth_method: Option<AuthMethod>,
    pub tos_accepted_version: Option<String>,
    pub fid: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity {
            address: "0x1111111111111111111111111111111111111111".parse().unwrap(),
            chain_id: Some(8453),
            fid: None,
            method: AuthMethod::Wallet,
        }
    }

    #[test]
    fn pending_then_finalize_clears_nonce() {
        let s = SessionState::Anonymous.begin_pending("n1".into()).unwrap();
        assert_eq!(s.pending_nonce(), Some("n1"));

        let s = s.finalize(&identity(), Utc::now()).unwrap();
        assert!(s.is_logged_in());
        assert_eq!(s.pending_nonce(), None);
        assert_eq!(s.view().chain_id, Some(8453));
    }

    #[test]
    fn begin_pending_overwrites_prior_nonce() {
        let s = SessionState::Anonymous.begin_pending("n1".into()).unwrap();
        let s = s.begin_pending("n2".into()).unwrap();
        assert_eq!(s.pending_nonce(), Some("n2"));
    }

    #[test]
    fn finalize_twice_is_rejected() {
        let s = SessionState::Anonymous
            .begin_pending("n1".into())
            .unwrap()
            .finalize(&identity(), Utc::now())
            .unwrap();
        assert_eq!(
            s.finalize(&identity(), Utc::now()),
            Err(SessionError::AlreadyAuthenticated)
        );
        assert_eq!(
            s.begin_pending("n2".into()),
            Err(SessionError::AlreadyAuthenticated)
        );
    }

    #[test]
    fn finalize_without_pending_is_rejected() {
        assert_eq!(
            SessionState::Anonymous.finalize(&identity(), Utc::now()),
            Err(SessionError::NoPendingLogin)
        );
    }

    #[test]
    fn anonymous_view_is_empty() {
        let view = SessionState::Pending { nonce: "n".into() }.view();
        assert_eq!(view, SessionView::default());
        assert!(!view.is_logged_in);
    }

    #[test]
    fn accept_terms_requires_login() {
        assert_eq!(
            SessionState::Anonymous.accept_terms("v1", Utc::now()),
            Err(SessionError::NotAuthenticated)
        );
        let s = SessionState::Anonymous
            .begin_pending("n".into())
            .unwrap()
            .finalize(&identity(), Utc::now())
            .unwrap()
            .accept_terms("2026-01", Utc::now())
            .unwrap();
        assert_eq!(s.view().tos_accepted_version.as_deref(), Some("2026-01"));
    }
}
