//! Cookie service: build and clear the httpOnly session cookie.

use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

/// Cookie name for the signed session token.
pub const SESSION_COOKIE: &str = "mintgate_session";

/// Build the httpOnly session cookie.
pub fn session_cookie(token: &str, max_age: std::time::Duration, secure: bool) -> Cookie<'static> {
    let max_age = Duration::seconds(i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX));
    Cookie::build((SESSION_COOKIE.to_string(), token.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/".to_string())
        .max_age(max_age)
        .build()
}

/// Build an expired cookie to clear the session.
pub fn clear_session_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE.to_string(), String::new()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/".to_string())
        .max_age(Duration::ZERO)
        .build()
}
