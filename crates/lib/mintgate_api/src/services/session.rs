//! Session slot storage in the session cookie.

use axum_extra::extract::CookieJar;
use mintgate_core::session::SessionState;

use crate::AppState;
use crate::error::AppResult;
use crate::services::cookies::{SESSION_COOKIE, clear_session_cookie, session_cookie};

/// Current session. A missing, forged or expired cookie reads as anonymous.
pub fn read_session(state: &AppState, jar: &CookieJar) -> SessionState {
    jar.get(SESSION_COOKIE)
        .map(|cookie| state.codec.decode(cookie.value()))
        .unwrap_or_default()
}

/// Store `session` in the cookie, or clear the cookie for anonymous.
pub fn write_session(state: &AppState, jar: CookieJar, session: &SessionState) -> AppResult<CookieJar> {
    if matches!(session, SessionState::Anonymous) {
        return Ok(clear_session(state, jar));
    }
    let token = state.codec.encode(session)?;
    let max_age = state.codec.ttl_for(session);
    Ok(jar.add(session_cookie(
        &token,
        max_age,
        state.config.secure_cookies,
    )))
}

/// Logout. Idempotent.
pub fn clear_session(state: &AppState, jar: CookieJar) -> CookieJar {
    jar.add(clear_session_cookie(state.config.secure_cookies))
}
