//! Sign-in and session request handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use axum_extra::extract::CookieJar;
use mintgate_core::gate::CallerContext;
use mintgate_core::session::{SessionState, SessionView};

use crate::AppState;
use crate::error::{AppError, AppResult, INVALID_LOGIN};
use crate::models::{
    MeResponse, NonceResponse, SuccessResponse, TosRequest, VerifyRequest, VerifyResponse,
};
use crate::services::{auth, session};

/// `GET /auth/nonce`: issue a nonce and start a pending session.
pub async fn nonce_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<NonceResponse>)> {
    let current = session::read_session(&state, &jar);
    let (nonce, pending) = auth::create_pending_session(&state, &current).await?;
    let jar = session::write_session(&state, jar, &pending)?;
    Ok((jar, Json(NonceResponse { nonce })))
}

/// `POST /auth/verify`: verify a signed sign-in message.
///
/// Every verification failure answers with the same body; the pending
/// session is dropped since its nonce is spent.
pub async fn verify_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> Response {
    let result: AppResult<SessionState> = async {
        let Json(request) = body?;
        let current = session::read_session(&state, &jar);
        auth::verify_login(&state, &current, request).await
    }
    .await;

    match result {
        Ok(authenticated) => match session::write_session(&state, jar, &authenticated) {
            Ok(jar) => (
                jar,
                Json(VerifyResponse {
                    success: true,
                    user: Some(authenticated.view()),
                    error: None,
                }),
            )
                .into_response(),
            Err(e) => e.into_response(),
        },
        Err(AppError::InvalidLogin(_)) => (
            StatusCode::UNAUTHORIZED,
            session::clear_session(&state, jar),
            Json(VerifyResponse {
                success: false,
                user: None,
                error: Some(INVALID_LOGIN.to_string()),
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /auth/session`: current session view. Never fails.
pub async fn session_handler(State(state): State<AppState>, jar: CookieJar) -> Json<SessionView> {
    Json(session::read_session(&state, &jar).view())
}

/// `POST /auth/logout`: clear the session. Idempotent.
pub async fn logout_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<SuccessResponse>) {
    (
        session::clear_session(&state, jar),
        Json(SuccessResponse { success: true }),
    )
}

/// `POST /auth/tos`: record terms-of-service acceptance.
pub async fn accept_tos_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Result<Json<TosRequest>, JsonRejection>,
) -> AppResult<(CookieJar, Json<SessionView>)> {
    let Json(request) = body?;
    let current = session::read_session(&state, &jar);
    let updated = auth::accept_terms(&current, &request.version)?;
    let jar = session::write_session(&state, jar, &updated)?;
    Ok((jar, Json(updated.view())))
}

/// `GET /auth/me`: the caller's account and resolved authorization.
pub async fn me_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
) -> AppResult<Json<MeResponse>> {
    let authorization = caller
        .authorization
        .ok_or_else(|| AppError::Unauthorized("Authentication required".into()))?;
    let account = match authorization.account_id {
        Some(id) => state.stores.accounts.find_by_id(id).await?,
        None => None,
    };
    Ok(Json(MeResponse {
        account,
        authorization,
    }))
}
