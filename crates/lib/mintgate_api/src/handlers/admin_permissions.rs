//! Permission grant handlers. Superadmin only (enforced by the gate).

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::{Extension, Json};
use mintgate_core::gate::CallerContext;

use crate::AppState;
use crate::error::AppResult;
use crate::models::{PermissionChangeRequest, PermissionChangeResponse};

/// `POST /admin/permissions`: grant a permission. Re-granting is a no-op
/// that still succeeds.
pub async fn grant_permission_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    body: Result<Json<PermissionChangeRequest>, JsonRejection>,
) -> AppResult<Json<PermissionChangeResponse>> {
    let Json(request) = body?;
    let outcome = state
        .resolver
        .grant_permission(
            request.account_id,
            request.permission,
            &caller.audit_context(),
        )
        .await?;
    Ok(Json(PermissionChangeResponse {
        success: true,
        changed: outcome.changed,
    }))
}

/// `DELETE /admin/permissions`: revoke a permission. Revoking an absent
/// grant succeeds with `changed: false`.
pub async fn revoke_permission_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    body: Result<Json<PermissionChangeRequest>, JsonRejection>,
) -> AppResult<Json<PermissionChangeResponse>> {
    let Json(request) = body?;
    let outcome = state
        .resolver
        .revoke_permission(
            request.account_id,
            request.permission,
            &caller.audit_context(),
        )
        .await?;
    Ok(Json(PermissionChangeResponse {
        success: true,
        changed: outcome.changed,
    }))
}
