//! Gate middleware: runs the request gate before a route group's handlers.
//!
//! On allow the gate's `CallerContext` is inserted into request extensions.
//! For audited routes, the handler reports its resource id and snapshots by
//! attaching [`AuditDetails`] to the response extensions.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::{Next, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use mintgate_core::gate::{AuditDetails, RouteRequirements};
use mintgate_core::ids;
use tracing::debug;
use uuid::Uuid;

use crate::AppState;
use crate::error::AppError;
use crate::services::session;

/// Response header carrying the request's correlation id.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
struct GateGuard {
    state: AppState,
    requirements: Arc<RouteRequirements>,
}

/// Put every route of `router` behind the gate with `requirements`.
pub fn gated(
    router: Router<AppState>,
    state: &AppState,
    requirements: RouteRequirements,
) -> Router<AppState> {
    let guard = GateGuard {
        state: state.clone(),
        requirements: Arc::new(requirements),
    };
    router.route_layer(from_fn_with_state(guard, enforce))
}

/// Client IP: the first `X-Forwarded-For` hop when trusted, else the peer.
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_forwarded_for: bool,
) -> Option<IpAddr> {
    if trust_forwarded_for
        && let Some(ip) = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|first| first.trim().parse().ok())
    {
        return Some(ip);
    }
    peer.map(|addr| addr.ip())
}

fn with_correlation_id(mut response: Response, correlation_id: Uuid) -> Response {
    if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

async fn enforce(
    State(guard): State<GateGuard>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let GateGuard {
        state,
        requirements,
    } = guard;
    let correlation_id = ids::correlation_id();
    let session = session::read_session(&state, &jar);
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(request.headers(), peer, state.config.trust_forwarded_for);

    let caller = match state
        .gate
        .authorize_with(&session, ip, &requirements, correlation_id)
        .await
    {
        Ok(caller) => caller,
        Err(denial) => {
            debug!(
                path = %request.uri().path(),
                %correlation_id,
                %denial,
                "request denied"
            );
            return with_correlation_id(AppError::from(denial).into_response(), correlation_id);
        }
    };

    request.extensions_mut().insert(caller.clone());
    let mut response = next.run(request).await;

    if let Some(tag) = &requirements.audit {
        let details = response
            .extensions_mut()
            .remove::<AuditDetails>()
            .unwrap_or_default();
        let status = response.status();
        let error = (!status.is_success()).then(|| status.to_string());
        state.gate.record_outcome(&caller, tag, details, error).await;
    }

    with_correlation_id(response, correlation_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_for_is_ignored_unless_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        let peer: SocketAddr = "192.0.2.4:5555".parse().unwrap();

        assert_eq!(
            client_ip(&headers, Some(peer), false),
            Some("192.0.2.4".parse().unwrap())
        );
        assert_eq!(
            client_ip(&headers, Some(peer), true),
            Some("203.0.113.9".parse().unwrap())
        );
        assert_eq!(client_ip(&HeaderMap::new(), None, true), None);
    }
}
