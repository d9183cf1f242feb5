//! Persistence seams.
//!
//! The resolver, the verifiers and the gate only see these traits. The
//! Postgres backend is the production store and the serialization point for
//! conflicting writes; the in-memory backend implements the same contracts
//! for tests and local runs.
//!
//! Every mutating call that changes access (grants, roles, status, settings)
//! writes its audit entry atomically with the change: if the audit row cannot
//! be written, the mutation is not applied.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::audit::AuditContext;
use crate::models::{
    Account, AccountStatus, Address, AuditEntry, AuditFilter, NewAuditEntry, Permission,
    PermissionGrant, Role, Setting,
};
use crate::session::nonce::NonceStatus;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Store errors.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Connection refused, pool exhausted or timed out.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".into()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(e.to_string())
            }
            _ => StoreError::Database(e.to_string()),
        }
    }
}

/// Result of a grant or revoke. `changed` is false for idempotent no-ops.
#[derive(Debug, Clone)]
pub struct GrantOutcome {
    pub account: Account,
    pub changed: bool,
}

/// Result of a role update.
#[derive(Debug, Clone)]
pub struct RoleChange {
    pub account: Account,
    pub previous: Role,
}

/// Result of a status update.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub account: Account,
    pub previous: AccountStatus,
}

/// Single-use login nonces, keyed by their hash.
#[async_trait]
pub trait NonceStore: Send + Sync {
    async fn issue(&self, nonce_hash: &str, expires_at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Atomically remove a nonce. Among concurrent callers at most one
    /// observes `Consumed`.
    async fn consume(&self, nonce_hash: &str) -> Result<NonceStatus, StoreError>;

    /// Drop expired nonces, returning how many were removed.
    async fn purge_expired(&self) -> Result<u64, StoreError>;
}

/// Account records.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Cheap connectivity check.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn find_by_address(&self, address: &Address) -> Result<Option<Account>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError>;

    /// Create a `user` account on first login, otherwise touch last-seen
    /// (and record the fid when one is supplied).
    async fn record_login(&self, address: &Address, fid: Option<u64>)
    -> Result<Account, StoreError>;

    async fn update_role(
        &self,
        account_id: Uuid,
        role: Role,
        ctx: &AuditContext,
    ) -> Result<RoleChange, StoreError>;

    async fn set_status(
        &self,
        account_id: Uuid,
        status: AccountStatus,
        ctx: &AuditContext,
    ) -> Result<StatusChange, StoreError>;
}

/// Explicit permission grants.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn list_grants(&self, account_id: Uuid) -> Result<Vec<PermissionGrant>, StoreError>;

    async fn grant(
        &self,
        account_id: Uuid,
        permission: Permission,
        ctx: &AuditContext,
    ) -> Result<GrantOutcome, StoreError>;

    /// Revoking an absent grant succeeds with `changed == false`.
    async fn revoke(
        &self,
        account_id: Uuid,
        permission: Permission,
        ctx: &AuditContext,
    ) -> Result<GrantOutcome, StoreError>;
}

/// Append-only audit log.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: NewAuditEntry) -> Result<AuditEntry, StoreError>;

    /// Newest first.
    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, StoreError>;
}

/// Application settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn list_settings(&self) -> Result<Vec<Setting>, StoreError>;

    async fn put_setting(
        &self,
        key: &str,
        value: serde_json::Value,
        ctx: &AuditContext,
    ) -> Result<Setting, StoreError>;
}

/// The store handles the rest of the crate is wired with.
#[derive(Clone)]
pub struct Stores {
    pub accounts: Arc<dyn AccountStore>,
    pub permissions: Arc<dyn PermissionStore>,
    pub audit: Arc<dyn AuditStore>,
    pub nonces: Arc<dyn NonceStore>,
    pub settings: Arc<dyn SettingsStore>,
}

impl Stores {
    /// Wire every seam to one backend.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: AccountStore + PermissionStore + AuditStore + NonceStore + SettingsStore + 'static,
    {
        Self {
            accounts: backend.clone(),
            permissions: backend.clone(),
            audit: backend.clone(),
            nonces: backend.clone(),
            settings: backend,
        }
    }
}
