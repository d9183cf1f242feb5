//! Application settings handlers.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::{Extension, Json};
use mintgate_core::gate::CallerContext;
use mintgate_core::models::Setting;
use tracing::info;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{SettingUpdateRequest, SettingsResponse};

const MAX_KEY_LEN: usize = 128;

fn validate_key(key: &str) -> AppResult<()> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'_' | b'-'));
    if valid {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "setting key must be 1-{MAX_KEY_LEN} characters of [a-z0-9._-]"
        )))
    }
}

/// `GET /admin/settings`
pub async fn list_settings_handler(
    State(state): State<AppState>,
) -> AppResult<Json<SettingsResponse>> {
    let settings = state.stores.settings.list_settings().await?;
    Ok(Json(SettingsResponse { settings }))
}

/// `PUT /admin/settings/{key}`: upsert one setting. The change is audited
/// with its previous value.
pub async fn put_setting_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    path: Result<Path<String>, PathRejection>,
    body: Result<Json<SettingUpdateRequest>, JsonRejection>,
) -> AppResult<Json<Setting>> {
    let Path(key) = path?;
    validate_key(&key)?;
    let Json(request) = body?;
    let setting = state
        .stores
        .settings
        .put_setting(&key, request.value, &caller.audit_context())
        .await?;
    info!(key = %setting.key, actor = ?caller.account_id(), "setting updated");
    Ok(Json(setting))
}
