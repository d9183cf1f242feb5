//! Authorization resolver.
//!
//! Turns an address into an [`Authorization`] and applies access-changing
//! mutations. Mutations do not check the caller; the gate does that before a
//! handler reaches them.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use uuid::Uuid;

use super::{Access, Authorization, AuthzError, PermissionCache};
use crate::audit::AuditContext;
use crate::models::{Account, AccountStatus, Address, Permission, Role};
use crate::store::{
    AccountStore, GrantOutcome, PermissionStore, RoleChange, StatusChange, Stores,
};

pub struct Resolver {
    accounts: Arc<dyn AccountStore>,
    permissions: Arc<dyn PermissionStore>,
    cache: Option<PermissionCache>,
}

impl Resolver {
    /// A zero `cache_ttl` disables caching.
    pub fn new(stores: &Stores, cache_ttl: Duration) -> Self {
        Self {
            accounts: stores.accounts.clone(),
            permissions: stores.permissions.clone(),
            cache: PermissionCache::with_ttl(cache_ttl),
        }
    }

    pub fn cache(&self) -> Option<&PermissionCache> {
        self.cache.as_ref()
    }

    /// Resolve the role and effective permissions of `address`. An address
    /// with no account resolves to a plain user.
    pub async fn resolve(&self, address: &Address) -> Result<Authorization, AuthzError> {
        let seen = match &self.cache {
            Some(cache) => {
                if let Some(hit) = cache.get(address).await {
                    return Ok(hit);
                }
                Some(cache.generation(address).await)
            }
            None => None,
        };

        let authorization = match self.accounts.find_by_address(address).await? {
            Some(account) => self.resolve_account(&account).await?,
            None => Authorization::anonymous_user(),
        };
        debug!(%address, role = %authorization.role, "resolved authorization");

        if let (Some(cache), Some(seen)) = (&self.cache, seen)
            && !cache.set(*address, authorization.clone(), seen).await
        {
            debug!(%address, "skipped caching; invalidated during resolve");
        }
        Ok(authorization)
    }

    /// Resolve an already-loaded account. Grants are only read for admins.
    pub async fn resolve_account(&self, account: &Account) -> Result<Authorization, AuthzError> {
        let access = match account.role {
            Role::Admin => {
                let grants = self.permissions.list_grants(account.id).await?;
                Access::from_role(Role::Admin, grants.into_iter().map(|g| g.permission))
            }
            role => Access::from_role(role, std::iter::empty()),
        };
        Ok(Authorization::new(
            Some(account.id),
            &access,
            account.is_banned(),
        ))
    }

    async fn invalidate(&self, address: &Address) {
        if let Some(cache) = &self.cache {
            cache.invalidate(address).await;
        }
    }

    /// Grant `permission`. Granting a held permission succeeds with
    /// `changed == false` and is still audited.
    pub async fn grant_permission(
        &self,
        account_id: Uuid,
        permission: Permission,
        ctx: &AuditContext,
    ) -> Result<GrantOutcome, AuthzError> {
        let outcome = self.permissions.grant(account_id, permission, ctx).await?;
        self.invalidate(&outcome.account.address).await;
        info!(
            %account_id,
            %permission,
            changed = outcome.changed,
            actor = ?ctx.actor_id,
            "permission granted"
        );
        Ok(outcome)
    }

    /// Revoke `permission`. Revoking an absent grant succeeds with
    /// `changed == false`.
    pub async fn revoke_permission(
        &self,
        account_id: Uuid,
        permission: Permission,
        ctx: &AuditContext,
    ) -> Result<GrantOutcome, AuthzError> {
        let outcome = self.permissions.revoke(account_id, permission, ctx).await?;
        self.invalidate(&outcome.account.address).await;
        info!(
            %account_id,
            %permission,
            changed = outcome.changed,
            actor = ?ctx.actor_id,
            "permission revoked"
        );
        Ok(outcome)
    }

    pub async fn update_role(
        &self,
        account_id: Uuid,
        role: Role,
        ctx: &AuditContext,
    ) -> Result<RoleChange, AuthzError> {
        let change = self.accounts.update_role(account_id, role, ctx).await?;
        self.invalidate(&change.account.address).await;
        info!(
            %account_id,
            from = %change.previous,
            to = %role,
            actor = ?ctx.actor_id,
            "role updated"
        );
        Ok(change)
    }

    pub async fn set_account_status(
        &self,
        account_id: Uuid,
        status: AccountStatus,
        ctx: &AuditContext,
    ) -> Result<StatusChange, AuthzError> {
        let change = self.accounts.set_status(account_id, status, ctx).await?;
        self.invalidate(&change.account.address).await;
        info!(
            %account_id,
            from = change.previous.as_str(),
            to = status.as_str(),
            actor = ?ctx.actor_id,
            "account status updated"
        );
        Ok(change)
    }

    /// Make sure `address` exists and is a superadmin.
    pub async fn bootstrap_superadmin(&self, address: &Address) -> Result<Account, AuthzError> {
        let account = match self.accounts.find_by_address(address).await? {
            Some(account) => account,
            None => self.accounts.record_login(address, None).await?,
        };
        if account.role == Role::SuperAdmin {
            return Ok(account);
        }
        let change = self
            .update_role(account.id, Role::SuperAdmin, &AuditContext::system())
            .await?;
        Ok(change.account)
    }
}
