//! Account administration handlers: role, effective permissions, ban.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::{Extension, Json};
use mintgate_core::gate::CallerContext;
use mintgate_core::models::{Account, AccountStatus, Role};
use uuid::Uuid;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{AccountPermissionsResponse, RoleUpdateRequest};

async fn load_account(state: &AppState, account_id: Uuid) -> AppResult<Account> {
    state
        .stores
        .accounts
        .find_by_id(account_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("account {account_id}")))
}

/// `PATCH /admin/accounts/{accountId}/role`
pub async fn update_role_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    path: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<RoleUpdateRequest>, JsonRejection>,
) -> AppResult<Json<Account>> {
    let Path(account_id) = path?;
    let Json(request) = body?;
    if caller.account_id() == Some(account_id) && request.role != Role::SuperAdmin {
        return Err(AppError::Validation("cannot demote yourself".into()));
    }
    let change = state
        .resolver
        .update_role(account_id, request.role, &caller.audit_context())
        .await?;
    Ok(Json(change.account))
}

/// `GET /admin/accounts/{accountId}/permissions`
pub async fn account_permissions_handler(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Json<AccountPermissionsResponse>> {
    let Path(account_id) = path?;
    let account = load_account(&state, account_id).await?;
    let authorization = state.resolver.resolve_account(&account).await?;
    let grants = state.stores.permissions.list_grants(account_id).await?;
    Ok(Json(AccountPermissionsResponse {
        account_id,
        role: account.role,
        permissions: authorization.permissions.into_iter().collect(),
        grants,
    }))
}

async fn set_status(
    state: &AppState,
    caller: &CallerContext,
    account_id: Uuid,
    status: AccountStatus,
) -> AppResult<Json<Account>> {
    if caller.account_id() == Some(account_id) {
        return Err(AppError::Validation(
            "cannot change your own account status".into(),
        ));
    }
    let target = load_account(state, account_id).await?;
    let caller_is_super_admin = caller
        .authorization
        .as_ref()
        .is_some_and(|a| a.is_super_admin);
    if target.role == Role::SuperAdmin && !caller_is_super_admin {
        return Err(AppError::Forbidden(
            "Only a superadmin can change a superadmin's status".into(),
        ));
    }
    let change = state
        .resolver
        .set_account_status(account_id, status, &caller.audit_context())
        .await?;
    Ok(Json(change.account))
}

/// `POST /admin/accounts/{accountId}/ban`
pub async fn ban_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    path: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Json<Account>> {
    let Path(account_id) = path?;
    set_status(&state, &caller, account_id, AccountStatus::Banned).await
}

/// `POST /admin/accounts/{accountId}/unban`
pub async fn unban_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    path: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Json<Account>> {
    let Path(account_id) = path?;
    set_status(&state, &caller, account_id, AccountStatus::Active).await
}
