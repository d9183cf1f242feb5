//! Audit entry construction.
//!
//! Stores write these inside the same transaction as the mutation they
//! describe, so every backend records identical shapes.

use serde_json::json;
use uuid::Uuid;

use crate::models::{AccountStatus, NewAuditEntry, Permission, Role};

/// Action tags.
pub mod actions {
    pub const PERMISSION_GRANT: &str = "permission.grant";
    pub const PERMISSION_REVOKE: &str = "permission.revoke";
    pub const ROLE_UPDATE: &str = "role.update";
    pub const ACCOUNT_STATUS: &str = "account.status";
    pub const SETTING_UPDATE: &str = "setting.update";
    pub const ACCESS_DENIED: &str = "access.denied";
    pub const ACCESS_GRANTED: &str = "access.granted";
}

/// Resource type tags.
pub mod resources {
    pub const ACCOUNT: &str = "account";
    pub const SETTING: &str = "setting";
}

/// Who is acting, and under which request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditContext {
    /// None for system actions.
    pub actor_id: Option<Uuid>,
    pub correlation_id: Uuid,
}

impl AuditContext {
    pub fn actor(actor_id: Uuid, correlation_id: Uuid) -> Self {
        Self {
            actor_id: Some(actor_id),
            correlation_id,
        }
    }

    /// Context for actions taken by the service itself (bootstrap).
    pub fn system() -> Self {
        Self {
            actor_id: None,
            correlation_id: crate::ids::correlation_id(),
        }
    }

    fn entry(&self, action: &str, resource_type: &str, resource_id: String) -> NewAuditEntry {
        NewAuditEntry {
            actor_id: self.actor_id,
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: Some(resource_id),
            before: None,
            after: None,
            success: true,
            error_message: None,
            correlation_id: self.correlation_id,
        }
    }
}

/// `changed` is false when the account already held the permission.
pub fn permission_grant_entry(
    ctx: &AuditContext,
    account_id: Uuid,
    permission: Permission,
    changed: bool,
) -> NewAuditEntry {
    NewAuditEntry {
        before: Some(json!({ "permission": permission, "held": !changed })),
        after: Some(json!({ "permission": permission, "held": true })),
        ..ctx.entry(
            actions::PERMISSION_GRANT,
            resources::ACCOUNT,
            account_id.to_string(),
        )
    }
}

/// `changed` is false when the account did not hold the permission.
pub fn permission_revoke_entry(
    ctx: &AuditContext,
    account_id: Uuid,
    permission: Permission,
    changed: bool,
) -> NewAuditEntry {
    NewAuditEntry {
        before: Some(json!({ "permission": permission, "held": changed })),
        after: Some(json!({ "permission": permission, "held": false })),
        ..ctx.entry(
            actions::PERMISSION_REVOKE,
            resources::ACCOUNT,
            account_id.to_string(),
        )
    }
}

pub fn role_update_entry(
    ctx: &AuditContext,
    account_id: Uuid,
    previous: Role,
    role: Role,
) -> NewAuditEntry {
    NewAuditEntry {
        before: Some(json!({ "role": previous })),
        after: Some(json!({ "role": role })),
        ..ctx.entry(actions::ROLE_UPDATE, resources::ACCOUNT, account_id.to_string())
    }
}

pub fn status_change_entry(
    ctx: &AuditContext,
    account_id: Uuid,
    previous: AccountStatus,
    status: AccountStatus,
) -> NewAuditEntry {
    NewAuditEntry {
        before: Some(json!({ "status": previous })),
        after: Some(json!({ "status": status })),
        ..ctx.entry(
            actions::ACCOUNT_STATUS,
            resources::ACCOUNT,
            account_id.to_string(),
        )
    }
}

pub fn setting_update_entry(
    ctx: &AuditContext,
    key: &str,
    previous: Option<&serde_json::Value>,
    value: &serde_json::Value,
) -> NewAuditEntry {
    NewAuditEntry {
        before: previous.cloned(),
        after: Some(value.clone()),
        ..ctx.entry(actions::SETTING_UPDATE, resources::SETTING, key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_grant_records_already_held() {
        let ctx = AuditContext::actor(Uuid::new_v4(), Uuid::new_v4());
        let account = Uuid::new_v4();
        let e = permission_grant_entry(&ctx, account, Permission::BanUsers, false);
        assert_eq!(e.action, actions::PERMISSION_GRANT);
        assert_eq!(e.resource_id, Some(account.to_string()));
        assert_eq!(e.before.unwrap()["held"], true);
        assert_eq!(e.actor_id, ctx.actor_id);
        assert_eq!(e.correlation_id, ctx.correlation_id);
    }

    #[test]
    fn role_update_snapshots_both_sides() {
        let ctx = AuditContext::system();
        let e = role_update_entry(&ctx, Uuid::new_v4(), Role::User, Role::Admin);
        assert_eq!(e.before.unwrap()["role"], "user");
        assert_eq!(e.after.unwrap()["role"], "admin");
        assert!(e.actor_id.is_none());
    }
}
