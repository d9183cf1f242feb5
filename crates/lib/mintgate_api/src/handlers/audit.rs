//! Audit log query handler.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::{Extension, Json};
use mintgate_core::gate::AuditDetails;
use mintgate_core::models::AuditFilter;
use serde_json::json;

use crate::AppState;
use crate::error::AppResult;
use crate::models::{AuditLogResponse, AuditQuery};

/// Action recorded when the audit log itself is read.
pub const AUDIT_READ: &str = "audit.read";

pub const AUDIT_RESOURCE: &str = "audit_log";

/// `GET /admin/audit`: filtered, newest-first page of audit entries.
pub async fn query_audit_handler(
    State(state): State<AppState>,
    query: Result<Query<AuditQuery>, QueryRejection>,
) -> AppResult<(Extension<AuditDetails>, Json<AuditLogResponse>)> {
    let Query(query) = query?;
    let filter = AuditFilter::from(query);
    let entries = state.stores.audit.query(&filter).await?;

    let details = AuditDetails {
        resource_id: None,
        before: None,
        after: Some(json!({
            "accountId": filter.account_id,
            "action": filter.action,
            "resourceType": filter.resource_type,
            "resourceId": filter.resource_id,
            "returned": entries.len(),
        })),
    };
    Ok((
        Extension(details),
        Json(AuditLogResponse {
            limit: filter.limit(),
            offset: filter.offset(),
            entries,
        }),
    ))
}
