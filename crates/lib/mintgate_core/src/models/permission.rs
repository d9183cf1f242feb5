//! Permission models.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named capability that admin-tier accounts may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    ViewAnalytics,
    ManageUsers,
    ManageContent,
    ViewAuditLog,
    ManageSettings,
    ManagePermissions,
    BanUsers,
    SendNotifications,
}

impl Permission {
    /// Every permission. A superadmin holds all of these.
    pub const ALL: [Permission; 8] = [
        Permission::ViewAnalytics,
        Permission::ManageUsers,
        Permission::ManageContent,
        Permission::ViewAuditLog,
        Permission::ManageSettings,
        Permission::ManagePermissions,
        Permission::BanUsers,
        Permission::SendNotifications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ViewAnalytics => "VIEW_ANALYTICS",
            Permission::ManageUsers => "MANAGE_USERS",
            Permission::ManageContent => "MANAGE_CONTENT",
            Permission::ViewAuditLog => "VIEW_AUDIT_LOG",
            Permission::ManageSettings => "MANAGE_SETTINGS",
            Permission::ManagePermissions => "MANAGE_PERMISSIONS",
            Permission::BanUsers => "BAN_USERS",
            Permission::SendNotifications => "SEND_NOTIFICATIONS",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown permission: {s}"))
    }
}

/// Permissions every `admin` holds without explicit grants.
pub const DEFAULT_ADMIN_PERMISSIONS: [Permission; 4] = [
    Permission::ViewAnalytics,
    Permission::ManageUsers,
    Permission::ManageContent,
    Permission::ViewAuditLog,
];

/// An explicit grant on top of role defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionGrant {
    pub account_id: Uuid,
    pub permission: Permission,
    /// None for grants made by the system (bootstrap).
    pub granted_by: Option<Uuid>,
    pub granted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrips_every_permission() {
        for p in Permission::ALL {
            assert_eq!(p.as_str().parse::<Permission>().unwrap(), p);
            let json = serde_json::to_string(&p).unwrap();
            assert_eq!(json, format!("\"{}\"", p.as_str()));
        }
    }

    #[test]
    fn unknown_permission_is_rejected() {
        assert!("MANAGE_EVERYTHING".parse::<Permission>().is_err());
        assert!(serde_json::from_str::<Permission>("\"manage_users\"").is_err());
    }

    #[test]
    fn defaults_exclude_permission_management() {
        assert!(!DEFAULT_ADMIN_PERMISSIONS.contains(&Permission::ManagePermissions));
        assert!(DEFAULT_ADMIN_PERMISSIONS.contains(&Permission::ViewAuditLog));
    }
}
