//! Application error types.

use std::time::Duration;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use mintgate_core::authz::AuthzError;
use mintgate_core::gate::Denial;
use mintgate_core::session::SessionError;
use mintgate_core::store::StoreError;
use thiserror::Error;
use tracing::error;

use crate::models::ErrorResponse;

/// Body of every failed sign-in, whatever the reason.
pub const INVALID_LOGIN: &str = "Invalid login attempt";

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Sign-in failed. The reason is logged, never returned.
    #[error("Invalid login: {0}")]
    InvalidLogin(&'static str),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limited")]
    RateLimited { retry_after: Duration },

    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, "validation_error", m.as_str()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.as_str()),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthorized", m.as_str()),
            AppError::InvalidLogin(_) => (StatusCode::UNAUTHORIZED, "invalid_login", INVALID_LOGIN),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, "forbidden", m.as_str()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, "conflict", m.as_str()),
            AppError::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many requests",
            ),
            AppError::DependencyUnavailable(m) => {
                error!(reason = %m, "dependency unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "dependency_unavailable",
                    "Service temporarily unavailable",
                )
            }
            AppError::Internal(m) => {
                error!(reason = %m, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error",
                )
            }
        };
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        });
        let mut response = (status, body).into_response();
        if let AppError::RateLimited { retry_after } = &self
            && let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().max(1).to_string())
        {
            response.headers_mut().insert(RETRY_AFTER, value);
        }
        response
    }
}

impl From<Denial> for AppError {
    fn from(denial: Denial) -> Self {
        match denial {
            Denial::TooManyRequests { retry_after } => AppError::RateLimited { retry_after },
            Denial::Unauthenticated => AppError::Unauthorized("Authentication required".into()),
            Denial::Dependency(msg) => AppError::DependencyUnavailable(msg),
            forbidden => AppError::Forbidden(forbidden.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => AppError::NotFound(msg),
            StoreError::Unavailable(msg) => AppError::DependencyUnavailable(msg),
            StoreError::Database(msg) => AppError::Internal(msg),
        }
    }
}

impl From<AuthzError> for AppError {
    fn from(e: AuthzError) -> Self {
        match e {
            AuthzError::NotFound(msg) => AppError::NotFound(msg),
            AuthzError::Dependency(msg) => AppError::DependencyUnavailable(msg),
            AuthzError::Store(msg) => AppError::Internal(msg),
        }
    }
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::AlreadyAuthenticated => {
                AppError::Conflict("Already signed in; log out first".into())
            }
            SessionError::NoPendingLogin => AppError::InvalidLogin("no_pending_login"),
            SessionError::NotAuthenticated => {
                AppError::Unauthorized("Authentication required".into())
            }
            SessionError::Token(msg) => AppError::Internal(msg),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(e: JsonRejection) -> Self {
        AppError::Validation(e.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(e: QueryRejection) -> Self {
        AppError::Validation(e.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(e: PathRejection) -> Self {
        AppError::Validation(e.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mintgate_core::models::Permission;

    #[test]
    fn denials_map_to_statuses() {
        let cases = [
            (Denial::Unauthenticated, StatusCode::UNAUTHORIZED),
            (Denial::MissingAdmin, StatusCode::FORBIDDEN),
            (
                Denial::MissingPermission(Permission::BanUsers),
                StatusCode::FORBIDDEN,
            ),
            (Denial::Banned, StatusCode::FORBIDDEN),
            (
                Denial::Dependency("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                Denial::TooManyRequests {
                    retry_after: Duration::from_secs(30),
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
        ];
        for (denial, status) in cases {
            assert_eq!(AppError::from(denial).into_response().status(), status);
        }
    }

    #[test]
    fn rate_limit_sets_retry_after() {
        let response = AppError::RateLimited {
            retry_after: Duration::from_secs(42),
        }
        .into_response();
        assert_eq!(response.headers()[RETRY_AFTER], "42");
    }

    #[test]
    fn already_authenticated_is_conflict() {
        let response = AppError::from(SessionError::AlreadyAuthenticated).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
