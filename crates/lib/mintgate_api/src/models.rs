//! Request and response bodies. All JSON is camelCase.

use mintgate_core::authz::Authorization;
use mintgate_core::models::{
    Account, AuditEntry, AuditFilter, Permission, PermissionGrant, Role, Setting,
};
use mintgate_core::session::{AuthMethod, SessionView};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub db_connected: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NonceResponse {
    pub nonce: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VerifyRequest {
    pub message: String,
    pub signature: String,
    /// Defaults to wallet.
    pub method: Option<AuthMethod>,
    pub fid: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<SessionView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TosRequest {
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    /// None until the first login has created the account row.
    pub account: Option<Account>,
    pub authorization: Authorization,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PermissionChangeRequest {
    pub account_id: Uuid,
    pub permission: Permission,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PermissionChangeResponse {
    pub success: bool,
    /// False when the request was a no-op.
    pub changed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleUpdateRequest {
    pub role: Role,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountPermissionsResponse {
    pub account_id: Uuid,
    pub role: Role,
    /// Effective permissions after role defaults.
    pub permissions: Vec<Permission>,
    /// Explicit grants only.
    pub grants: Vec<PermissionGrant>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuditQuery {
    pub account_id: Option<Uuid>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl From<AuditQuery> for AuditFilter {
    fn from(q: AuditQuery) -> Self {
        AuditFilter {
            account_id: q.account_id,
            action: q.action,
            resource_type: q.resource_type,
            resource_id: q.resource_id,
            limit: q.limit,
            offset: q.offset,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuditLogResponse {
    pub entries: Vec<AuditEntry>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub settings: Vec<Setting>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingUpdateRequest {
    pub value: serde_json::Value,
}
