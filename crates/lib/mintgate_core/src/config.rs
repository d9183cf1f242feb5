//! Auth configuration passed explicitly into the session codec, the
//! verifiers, the resolver and the gate.

use std::path::PathBuf;
use std::time::Duration;

use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use tracing::info;

/// Default session lifetime: 7 days.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Default nonce lifetime: 10 minutes.
pub const DEFAULT_NONCE_TTL_SECS: u64 = 10 * 60;

/// Default maximum age of a sign-in message's `Issued At`: 10 minutes.
pub const DEFAULT_MESSAGE_MAX_AGE_SECS: u64 = 10 * 60;

/// Tolerated clock skew for `Issued At` / `Not Before`.
pub const DEFAULT_CLOCK_SKEW_SECS: u64 = 60;

/// Default upper bound on any store call made while gating a request.
pub const DEFAULT_DEPENDENCY_TIMEOUT_MS: u64 = 2_000;

/// Configuration of the authentication core.
#[derive(Clone)]
pub struct AuthConfig {
    /// Domain that sign-in messages must be bound to (e.g. `app.example.com`).
    pub domain: String,
    /// HS256 secret signing session tokens.
    pub session_secret: String,
    pub session_ttl: Duration,
    pub nonce_ttl: Duration,
    pub message_max_age: Duration,
    pub clock_skew: Duration,
    /// Chain ids accepted in wallet sign-in messages. Empty accepts any.
    pub allowed_chain_ids: Vec<u64>,
    /// Resolver cache TTL. `Duration::ZERO` disables caching.
    pub permission_cache_ttl: Duration,
    pub dependency_timeout: Duration,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("domain", &self.domain)
            .field("session_secret", &"[REDACTED]")
            .field("session_ttl", &self.session_ttl)
            .field("nonce_ttl", &self.nonce_ttl)
            .field("message_max_age", &self.message_max_age)
            .field("clock_skew", &self.clock_skew)
            .field("allowed_chain_ids", &self.allowed_chain_ids)
            .field("permission_cache_ttl", &self.permission_cache_ttl)
            .field("dependency_timeout", &self.dependency_timeout)
            .finish()
    }
}

impl AuthConfig {
    /// Config with default lifetimes for the given domain and secret.
    pub fn new(domain: impl Into<String>, session_secret: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            session_secret: session_secret.into(),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            nonce_ttl: Duration::from_secs(DEFAULT_NONCE_TTL_SECS),
            message_max_age: Duration::from_secs(DEFAULT_MESSAGE_MAX_AGE_SECS),
            clock_skew: Duration::from_secs(DEFAULT_CLOCK_SKEW_SECS),
            allowed_chain_ids: Vec::new(),
            permission_cache_ttl: Duration::ZERO,
            dependency_timeout: Duration::from_millis(DEFAULT_DEPENDENCY_TIMEOUT_MS),
        }
    }
}

/// Resolve the session secret: env var `SESSION_SECRET` → persisted file.
///
/// A generated secret is written under the platform data dir so sessions
/// survive restarts of a single-node deployment.
pub fn resolve_session_secret() -> String {
    if let Ok(secret) = std::env::var("SESSION_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    let secret_path = session_secret_path();
    if let Ok(existing) = std::fs::read_to_string(&secret_path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    if let Some(parent) = secret_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(&secret_path, &secret);
    info!(path = %secret_path.display(), "generated new session secret");
    secret
}

/// Path to the persisted session secret file.
fn session_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mintgate")
        .join("session-secret")
}
