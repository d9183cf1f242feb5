//! Signed session tokens (HS256 JWT carrying the session slot).

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{SessionError, SessionState};

/// Claims embedded in a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionClaims {
    session: SessionState,
    /// Issued at (unix timestamp).
    iat: i64,
    /// Expiry (unix timestamp).
    exp: i64,
}

/// Encodes and validates session tokens.
///
/// Pending sessions live only as long as their nonce; authenticated sessions
/// get the full session TTL.
#[derive(Clone)]
pub struct SessionCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    session_ttl: Duration,
    pending_ttl: Duration,
}

impl SessionCodec {
    pub fn new(secret: &[u8], session_ttl: Duration, pending_ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            session_ttl,
            pending_ttl,
        }
    }

    /// Lifetime a token for `state` is issued with.
    pub fn ttl_for(&self, state: &SessionState) -> Duration {
        match state {
            SessionState::Authenticated(_) => self.session_ttl,
            _ => self.pending_ttl,
        }
    }

    /// Sign a session slot.
    pub fn encode(&self, state: &SessionState) -> Result<String, SessionError> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(self.ttl_for(state).as_secs())
            .map_err(|_| SessionError::Token("ttl out of range".into()))?;
        let claims = SessionClaims {
            session: state.clone(),
            iat: now,
            exp: now + ttl,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| SessionError::Token(format!("jwt encode: {e}")))
    }

    /// Validate a token. Bad signatures, expired or malformed tokens all read
    /// as an anonymous session.
    pub fn decode(&self, token: &str) -> SessionState {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);
        match decode::<SessionClaims>(token, &self.decoding, &validation) {
            Ok(data) => data.claims.session,
            Err(e) => {
                debug!(error = %e, "rejected session token");
                SessionState::Anonymous
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{AuthMethod, AuthenticatedSession};

    fn codec(secret: &[u8]) -> SessionCodec {
        SessionCodec::new(secret, Duration::from_secs(3600), Duration::from_secs(60))
    }

    fn authenticated() -> SessionState {
        SessionState::Authenticated(AuthenticatedSession {
            address: "0x2222222222222222222222222222222222222222".parse().unwrap(),
            chain_id: Some(1),
            fid: Some(42),
            auth_method: AuthMethod::Farcaster,
            logged_in_at: Utc::now(),
            tos_accepted_version: None,
            tos_accepted_at: None,
        })
    }

    #[test]
    fn encode_decode_preserves_session() {
        let c = codec(b"secret");
        let state = authenticated();
        let token = c.encode(&state).unwrap();
        assert_eq!(c.decode(&token), state);
    }

    #[test]
    fn wrong_secret_reads_as_anonymous() {
        let token = codec(b"secret-a").encode(&authenticated()).unwrap();
        assert_eq!(codec(b"secret-b").decode(&token), SessionState::Anonymous);
    }

    #[test]
    fn tampered_token_reads_as_anonymous() {
        let c = codec(b"secret");
        let mut token = c.encode(&authenticated()).unwrap();
        token.push('x');
        assert_eq!(c.decode(&token), SessionState::Anonymous);
        assert_eq!(c.decode("not-a-token"), SessionState::Anonymous);
    }

    #[test]
    fn expired_token_reads_as_anonymous() {
        let c = codec(b"secret");
        let claims = SessionClaims {
            session: authenticated(),
            iat: Utc::now().timestamp() - 7200,
            exp: Utc::now().timestamp() - 3600,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert_eq!(c.decode(&token), SessionState::Anonymous);
    }

    #[test]
    fn pending_sessions_use_short_ttl() {
        let c = codec(b"secret");
        let pending = SessionState::Pending { nonce: "n".into() };
        assert_eq!(c.ttl_for(&pending), Duration::from_secs(60));
        assert_eq!(c.ttl_for(&authenticated()), Duration::from_secs(3600));
    }
}
