//! API server configuration.

use std::str::FromStr;
use std::time::Duration;

use mintgate_core::config::{AuthConfig, resolve_session_secret};
use mintgate_core::models::Address;
use thiserror::Error;

/// Default sign-in attempts per client IP per minute.
pub const DEFAULT_AUTH_RATE_LIMIT_PER_MIN: u32 = 20;

/// Default admin requests per caller per minute.
pub const DEFAULT_ADMIN_RATE_LIMIT_PER_MIN: u32 = 120;

/// Default interval between maintenance sweeps.
pub const DEFAULT_MAINTENANCE_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3100").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub pg_connection_url: String,
    pub auth: AuthConfig,
    /// Mark the session cookie `Secure`.
    pub secure_cookies: bool,
    /// Per-IP budget for `/auth/nonce` and `/auth/verify`. 0 disables.
    pub auth_rate_limit_per_min: u32,
    /// Per-caller budget for admin routes. 0 disables.
    pub admin_rate_limit_per_min: u32,
    /// Take the client IP from `X-Forwarded-For` (behind a trusted proxy).
    pub trust_forwarded_for: bool,
    /// Farcaster hub base URL. Farcaster sign-in is disabled without it.
    pub farcaster_hub_url: Option<String>,
    /// Accounts promoted to superadmin at startup.
    pub superadmin_addresses: Vec<Address>,
    pub maintenance_interval: Duration,
}

impl ApiConfig {
    /// Defaults around an explicit auth config. Used by tests and embedders.
    pub fn new(auth: AuthConfig) -> Self {
        Self {
            bind_addr: "127.0.0.1:3100".into(),
            pg_connection_url: "postgres://localhost:5432/mintgate".into(),
            auth,
            secure_cookies: false,
            auth_rate_limit_per_min: DEFAULT_AUTH_RATE_LIMIT_PER_MIN,
            admin_rate_limit_per_min: DEFAULT_ADMIN_RATE_LIMIT_PER_MIN,
            trust_forwarded_for: false,
            farcaster_hub_url: None,
            superadmin_addresses: Vec::new(),
            maintenance_interval: Duration::from_secs(DEFAULT_MAINTENANCE_INTERVAL_SECS),
        }
    }

    /// Reads configuration from environment variables.
    ///
    /// | Variable                    | Default                                |
    /// |-----------------------------|----------------------------------------|
    /// | `BIND_ADDR`                 | `127.0.0.1:3100`                       |
    /// | `DATABASE_URL`              | `postgres://localhost:5432/mintgate`   |
    /// | `SESSION_SECRET`            | generated & persisted to file          |
    /// | `SIWE_DOMAIN`               | `localhost:3100`                       |
    /// | `SESSION_TTL_SECS`          | 7 days                                 |
    /// | `NONCE_TTL_SECS`            | 600                                    |
    /// | `MESSAGE_MAX_AGE_SECS`      | 600                                    |
    /// | `ALLOWED_CHAIN_IDS`         | any (comma separated)                  |
    /// | `PERMISSION_CACHE_TTL_SECS` | 0 (disabled)                           |
    /// | `DEPENDENCY_TIMEOUT_MS`     | 2000                                   |
    /// | `SECURE_COOKIES`            | `false`                                |
    /// | `RATE_LIMIT_AUTH_PER_MIN`   | 20                                     |
    /// | `RATE_LIMIT_ADMIN_PER_MIN`  | 120                                    |
    /// | `TRUST_FORWARDED_FOR`       | `false`                                |
    /// | `FARCASTER_HUB_URL`         | unset                                  |
    /// | `SUPERADMIN_ADDRESSES`      | none (comma separated)                 |
    /// | `MAINTENANCE_INTERVAL_SECS` | 300                                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        let domain = std::env::var("SIWE_DOMAIN").unwrap_or_else(|_| "localhost:3100".into());
        let mut auth = AuthConfig::new(domain, resolve_session_secret());
        auth.session_ttl = secs_var("SESSION_TTL_SECS", auth.session_ttl)?;
        auth.nonce_ttl = secs_var("NONCE_TTL_SECS", auth.nonce_ttl)?;
        auth.message_max_age = secs_var("MESSAGE_MAX_AGE_SECS", auth.message_max_age)?;
        auth.permission_cache_ttl =
            secs_var("PERMISSION_CACHE_TTL_SECS", auth.permission_cache_ttl)?;
        auth.dependency_timeout = Duration::from_millis(parse_var(
            "DEPENDENCY_TIMEOUT_MS",
            auth.dependency_timeout.as_millis() as u64,
        )?);
        auth.allowed_chain_ids = list_var("ALLOWED_CHAIN_IDS")?;

        let mut config = Self::new(auth);
        if let Ok(bind_addr) = std::env::var("BIND_ADDR") {
            config.bind_addr = bind_addr;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.pg_connection_url = url;
        }
        config.secure_cookies = parse_var("SECURE_COOKIES", false)?;
        config.auth_rate_limit_per_min =
            parse_var("RATE_LIMIT_AUTH_PER_MIN", DEFAULT_AUTH_RATE_LIMIT_PER_MIN)?;
        config.admin_rate_limit_per_min =
            parse_var("RATE_LIMIT_ADMIN_PER_MIN", DEFAULT_ADMIN_RATE_LIMIT_PER_MIN)?;
        config.trust_forwarded_for = parse_var("TRUST_FORWARDED_FOR", false)?;
        config.farcaster_hub_url = std::env::var("FARCASTER_HUB_URL")
            .ok()
            .filter(|url| !url.is_empty());
        config.superadmin_addresses = list_var("SUPERADMIN_ADDRESSES")?;
        config.maintenance_interval = non_zero(
            "MAINTENANCE_INTERVAL_SECS",
            secs_var("MAINTENANCE_INTERVAL_SECS", config.maintenance_interval)?,
        )?;
        Ok(config)
    }
}

fn parse_var<T>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) if !raw.trim().is_empty() => parse_value(var, &raw),
        _ => Ok(default),
    }
}

fn parse_value<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        reason: e.to_string(),
    })
}

fn secs_var(var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    parse_var(var, default.as_secs()).map(Duration::from_secs)
}

fn non_zero(var: &'static str, value: Duration) -> Result<Duration, ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::Invalid {
            var,
            reason: "must be greater than zero".into(),
        });
    }
    Ok(value)
}

fn list_var<T>(var: &'static str) -> Result<Vec<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_list(var, &std::env::var(var).unwrap_or_default())
}

fn parse_list<T>(var: &'static str, raw: &str) -> Result<Vec<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| parse_value(var, item))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_skip_blanks_and_reject_garbage() {
        let ids: Vec<u64> = parse_list("ALLOWED_CHAIN_IDS", " 1, 8453 ,,").unwrap();
        assert_eq!(ids, vec![1, 8453]);

        let bad: Result<Vec<Address>, _> = parse_list("SUPERADMIN_ADDRESSES", "0x12");
        assert!(matches!(
            bad,
            Err(ConfigError::Invalid {
                var: "SUPERADMIN_ADDRESSES",
                ..
            })
        ));
    }

    #[test]
    fn defaults_are_conservative() {
        let config = ApiConfig::new(AuthConfig::new("app.example.com", "s"));
        assert!(!config.trust_forwarded_for);
        assert!(config.farcaster_hub_url.is_none());
        assert!(config.superadmin_addresses.is_empty());
        assert!(config.auth.permission_cache_ttl.is_zero());
    }

    #[test]
    fn zero_maintenance_interval_is_rejected() {
        assert!(matches!(
            non_zero("MAINTENANCE_INTERVAL_SECS", Duration::ZERO),
            Err(ConfigError::Invalid {
                var: "MAINTENANCE_INTERVAL_SECS",
                ..
            })
        ));
        assert_eq!(
            non_zero("MAINTENANCE_INTERVAL_SECS", Duration::from_secs(5)).unwrap(),
            Duration::from_secs(5)
        );
    }
}
