//! Role and permission resolution.

pub mod cache;
pub mod resolver;

use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{DEFAULT_ADMIN_PERMISSIONS, Permission, Role};
use crate::store::StoreError;

pub use cache::PermissionCache;
pub use resolver::Resolver;

/// Resolver errors.
#[derive(Debug, Clone, Error)]
pub enum AuthzError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// The store could not be reached in time.
    #[error("Dependency unavailable: {0}")]
    Dependency(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl From<StoreError> for AuthzError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => AuthzError::NotFound(what),
            StoreError::Unavailable(msg) => AuthzError::Dependency(msg),
            StoreError::Database(msg) => AuthzError::Store(msg),
        }
    }
}

/// Effective access of an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    User,
    /// Admin with its explicit grants.
    Admin(BTreeSet<Permission>),
    SuperAdmin,
}

impl Access {
    /// Build from a stored role and its grants. Grants on a `user` are ignored.
    pub fn from_role(role: Role, grants: impl IntoIterator<Item = Permission>) -> Self {
        match role {
            Role::User => Access::User,
            Role::Admin => Access::Admin(grants.into_iter().collect()),
            Role::SuperAdmin => Access::SuperAdmin,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Access::User => Role::User,
            Access::Admin(_) => Role::Admin,
            Access::SuperAdmin => Role::SuperAdmin,
        }
    }

    /// Full effective permission set.
    pub fn permissions_of(&self) -> BTreeSet<Permission> {
        match self {
            Access::User => BTreeSet::new(),
            Access::Admin(grants) => DEFAULT_ADMIN_PERMISSIONS
                .into_iter()
                .chain(grants.iter().copied())
                .collect(),
            Access::SuperAdmin => Permission::ALL.into_iter().collect(),
        }
    }
}

/// Resolved authorization of one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    /// None when no account exists for the address yet.
    pub account_id: Option<Uuid>,
    pub role: Role,
    pub permissions: BTreeSet<Permission>,
    pub is_admin: bool,
    pub is_super_admin: bool,
    pub banned: bool,
}

impl Authorization {
    pub fn new(account_id: Option<Uuid>, access: &Access, banned: bool) -> Self {
        let role = access.role();
        Self {
            account_id,
            role,
            permissions: access.permissions_of(),
            is_admin: matches!(role, Role::Admin | Role::SuperAdmin),
            is_super_admin: role == Role::SuperAdmin,
            banned,
        }
    }

    /// Authorization of an address with no account.
    pub fn anonymous_user() -> Self {
        Self::new(None, &Access::User, false)
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.is_super_admin || self.permissions.contains(&permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_ignores_stray_grants() {
        let access = Access::from_role(Role::User, [Permission::BanUsers]);
        assert!(access.permissions_of().is_empty());
    }

    #[test]
    fn admin_is_defaults_plus_grants() {
        let access = Access::from_role(Role::Admin, [Permission::ManagePermissions]);
        let perms = access.permissions_of();
        assert_eq!(perms.len(), DEFAULT_ADMIN_PERMISSIONS.len() + 1);
        assert!(perms.contains(&Permission::ManagePermissions));
        for p in DEFAULT_ADMIN_PERMISSIONS {
            assert!(perms.contains(&p));
        }
    }

    #[test]
    fn superadmin_holds_everything() {
        let auth = Authorization::new(None, &Access::SuperAdmin, false);
        assert!(auth.is_admin);
        assert!(auth.is_super_admin);
        assert_eq!(auth.permissions.len(), Permission::ALL.len());
        assert!(Permission::ALL.iter().all(|p| auth.has_permission(*p)));
    }

    #[test]
    fn unknown_address_is_plain_user() {
        let auth = Authorization::anonymous_user();
        assert_eq!(auth.role, Role::User);
        assert!(auth.permissions.is_empty());
        assert!(!auth.is_admin);
        assert!(!auth.is_super_admin);
    }
}
