//! Audit log models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default page size for audit queries.
pub const DEFAULT_AUDIT_LIMIT: i64 = 50;

/// Upper bound on a single audit page.
pub const MAX_AUDIT_LIMIT: i64 = 200;

/// Immutable, append-only record of a sensitive action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    /// None for system actions (bootstrap, maintenance).
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub success: bool,
    pub error_message: Option<String>,
    pub correlation_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// An audit entry about to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub success: bool,
    pub error_message: Option<String>,
    pub correlation_id: Uuid,
}

impl NewAuditEntry {
    /// Materialize with a fresh time-ordered id.
    pub fn into_entry(self) -> AuditEntry {
        AuditEntry {
            id: crate::ids::uuidv7(),
            actor_id: self.actor_id,
            action: self.action,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            before: self.before,
            after: self.after,
            success: self.success,
            error_message: self.error_message,
            correlation_id: self.correlation_id,
            created_at: Utc::now(),
        }
    }
}

/// Filter and pagination for audit queries.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub account_id: Option<Uuid>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditFilter {
    /// Effective page size, clamped to `1..=MAX_AUDIT_LIMIT`.
    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_AUDIT_LIMIT)
            .clamp(1, MAX_AUDIT_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    /// Whether an entry passes the filter. `account_id` matches the actor.
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.account_id.is_none_or(|id| entry.actor_id == Some(id))
            && self.action.as_deref().is_none_or(|a| entry.action == a)
            && self
                .resource_type
                .as_deref()
                .is_none_or(|t| entry.resource_type == t)
            && self
                .resource_id
                .as_deref()
                .is_none_or(|r| entry.resource_id.as_deref() == Some(r))
    }
}
