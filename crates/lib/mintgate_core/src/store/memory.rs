//! In-memory store backend.
//!
//! Holds all state behind one async mutex, which makes every operation
//! (including nonce consumption and mutation-plus-audit) atomic. Fault
//! switches let tests simulate an unreachable or slow database and failing
//! audit writes.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AccountStore, AuditStore, GrantOutcome, NonceStore, PermissionStore, RoleChange,
    SettingsStore, StatusChange, StoreError,
};
use crate::audit::{self, AuditContext};
use crate::models::{
    Account, AccountStatus, Address, AuditEntry, AuditFilter, NewAuditEntry, Permission,
    PermissionGrant, Role, Setting,
};
use crate::session::nonce::NonceStatus;

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<Uuid, Account>,
    by_address: HashMap<Address, Uuid>,
    grants: HashMap<Uuid, BTreeMap<Permission, PermissionGrant>>,
    audit: Vec<AuditEntry>,
    nonces: HashMap<String, DateTime<Utc>>,
    settings: BTreeMap<String, Setting>,
}

impl MemoryState {
    fn account(&self, id: Uuid) -> Result<Account, StoreError> {
        self.accounts
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("account {id}")))
    }
}

/// In-memory implementation of every store trait.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
    fail_audit: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make audit writes fail (and with them, the mutations they guard).
    pub fn fail_audit_writes(&self, fail: bool) {
        self.fail_audit.store(fail, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Insert an account with the given role directly.
    pub async fn seed_account(&self, address: Address, role: Role) -> Account {
        let mut state = self.state.lock().await;
        let mut account = Account::new(address, None);
        account.role = role;
        state.by_address.insert(address, account.id);
        state.accounts.insert(account.id, account.clone());
        account
    }

    /// Snapshot of the audit log, oldest first.
    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.state.lock().await.audit.clone()
    }

    async fn ready(&self) -> Result<(), StoreError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(())
    }

    fn audit_writable(&self) -> Result<(), StoreError> {
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(StoreError::Database("audit write failed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl NonceStore for MemoryStore {
    async fn issue(&self, nonce_hash: &str, expires_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.ready().await?;
        let mut state = self.state.lock().await;
        state.nonces.insert(nonce_hash.to_string(), expires_at);
        Ok(())
    }

    async fn consume(&self, nonce_hash: &str) -> Result<NonceStatus, StoreError> {
        self.ready().await?;
        let mut state = self.state.lock().await;
        Ok(match state.nonces.remove(nonce_hash) {
            None => NonceStatus::Unknown,
            Some(expires_at) if expires_at <= Utc::now() => NonceStatus::Expired,
            Some(_) => NonceStatus::Consumed,
        })
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        self.ready().await?;
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let before = state.nonces.len();
        state.nonces.retain(|_, expires_at| *expires_at > now);
        Ok((before - state.nonces.len()) as u64)
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.ready().await
    }

    async fn find_by_address(&self, address: &Address) -> Result<Option<Account>, StoreError> {
        self.ready().await?;
        let state = self.state.lock().await;
        Ok(state
            .by_address
            .get(address)
            .and_then(|id| state.accounts.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        self.ready().await?;
        Ok(self.state.lock().await.accounts.get(&id).cloned())
    }

    async fn record_login(
        &self,
        address: &Address,
        fid: Option<u64>,
    ) -> Result<Account, StoreError> {
        self.ready().await?;
        let mut state = self.state.lock().await;
        if let Some(id) = state.by_address.get(address).copied()
            && let Some(account) = state.accounts.get_mut(&id)
        {
            account.last_seen_at = Some(Utc::now());
            if fid.is_some() {
                account.fid = fid;
            }
            return Ok(account.clone());
        }
        let account = Account::new(*address, fid);
        state.by_address.insert(*address, account.id);
        state.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn update_role(
        &self,
        account_id: Uuid,
        role: Role,
        ctx: &AuditContext,
    ) -> Result<RoleChange, StoreError> {
        self.ready().await?;
        let mut state = self.state.lock().await;
        let mut account = state.account(account_id)?;
        self.audit_writable()?;
        let previous = account.role;
        account.role = role;
        state.accounts.insert(account_id, account.clone());
        let entry = audit::role_update_entry(ctx, account_id, previous, role);
        state.audit.push(entry.into_entry());
        Ok(RoleChange { account, previous })
    }

    async fn set_status(
        &self,
        account_id: Uuid,
        status: AccountStatus,
        ctx: &AuditContext,
    ) -> Result<StatusChange, StoreError> {
        self.ready().await?;
        let mut state = self.state.lock().await;
        let mut account = state.account(account_id)?;
        self.audit_writable()?;
        let previous = account.status;
        account.status = status;
        state.accounts.insert(account_id, account.clone());
        let entry = audit::status_change_entry(ctx, account_id, previous, status);
        state.audit.push(entry.into_entry());
        Ok(StatusChange { account, previous })
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn list_grants(&self, account_id: Uuid) -> Result<Vec<PermissionGrant>, StoreError> {
        self.ready().await?;
        let state = self.state.lock().await;
        Ok(state
            .grants
            .get(&account_id)
            .map(|g| g.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn grant(
        &self,
        account_id: Uuid,
        permission: Permission,
        ctx: &AuditContext,
    ) -> Result<GrantOutcome, StoreError> {
        self.ready().await?;
        let mut state = self.state.lock().await;
        let account = state.account(account_id)?;
        self.audit_writable()?;
        let grants = state.grants.entry(account_id).or_default();
        let changed = !grants.contains_key(&permission);
        if changed {
            grants.insert(
                permission,
                PermissionGrant {
                    account_id,
                    permission,
                    granted_by: ctx.actor_id,
                    granted_at: Utc::now(),
                },
            );
        }
        let entry = audit::permission_grant_entry(ctx, account_id, permission, changed);
        state.audit.push(entry.into_entry());
        Ok(GrantOutcome { account, changed })
    }

    async fn revoke(
        &self,
        account_id: Uuid,
        permission: Permission,
        ctx: &AuditContext,
    ) -> Result<GrantOutcome, StoreError> {
        self.ready().await?;
        let mut state = self.state.lock().await;
        let account = state.account(account_id)?;
        self.audit_writable()?;
        let changed = state
            .grants
            .get_mut(&account_id)
            .is_some_and(|g| g.remove(&permission).is_some());
        let entry = audit::permission_revoke_entry(ctx, account_id, permission, changed);
        state.audit.push(entry.into_entry());
        Ok(GrantOutcome { account, changed })
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append(&self, entry: NewAuditEntry) -> Result<AuditEntry, StoreError> {
        self.ready().await?;
        self.audit_writable()?;
        let entry = entry.into_entry();
        self.state.lock().await.audit.push(entry.clone());
        Ok(entry)
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, StoreError> {
        self.ready().await?;
        let state = self.state.lock().await;
        Ok(state
            .audit
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn list_settings(&self) -> Result<Vec<Setting>, StoreError> {
        self.ready().await?;
        Ok(self.state.lock().await.settings.values().cloned().collect())
    }

    async fn put_setting(
        &self,
        key: &str,
        value: serde_json::Value,
        ctx: &AuditContext,
    ) -> Result<Setting, StoreError> {
        self.ready().await?;
        let mut state = self.state.lock().await;
        self.audit_writable()?;
        let previous = state.settings.get(key).map(|s| s.value.clone());
        let setting = Setting {
            key: key.to_string(),
            value,
            updated_by: ctx.actor_id,
            updated_at: Utc::now(),
        };
        let entry = audit::setting_update_entry(ctx, key, previous.as_ref(), &setting.value);
        state.settings.insert(key.to_string(), setting.clone());
        state.audit.push(entry.into_entry());
        Ok(setting)
    }
}
