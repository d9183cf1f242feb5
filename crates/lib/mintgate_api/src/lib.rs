//! # mintgate_api
//!
//! HTTP API library for Mintgate: sign-in endpoints, session cookies and the
//! admin surface, every privileged route behind the request gate.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post, put};
use mintgate_core::authz::Resolver;
use mintgate_core::gate::{Gate, RouteRequirements};
use mintgate_core::models::Permission;
use mintgate_core::rate_limit::{RateLimitKey, RateLimitRule, RateLimiter};
use mintgate_core::session::SessionCodec;
use mintgate_core::store::Stores;
use mintgate_core::verify::{
    CredentialVerifier, FarcasterVerifier, FidResolver, MessagePolicy, WalletVerifier,
};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::handlers::{accounts, admin_permissions, audit, auth, health, settings};
use crate::middleware::gate::gated;

/// Sign-in verifiers by method.
#[derive(Clone)]
pub struct Verifiers {
    pub wallet: Arc<dyn CredentialVerifier>,
    /// None when no Farcaster hub is configured.
    pub farcaster: Option<Arc<dyn CredentialVerifier>>,
}

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub resolver: Arc<Resolver>,
    pub gate: Arc<Gate>,
    pub verifiers: Verifiers,
    pub codec: Arc<SessionCodec>,
    pub config: Arc<ApiConfig>,
}

impl AppState {
    /// Wire the core services over `stores`.
    pub fn new(
        stores: Stores,
        config: ApiConfig,
        fid_resolver: Option<Arc<dyn FidResolver>>,
    ) -> Self {
        let auth = &config.auth;
        let resolver = Arc::new(Resolver::new(&stores, auth.permission_cache_ttl));
        let gate = Arc::new(Gate::new(
            resolver.clone(),
            Arc::new(RateLimiter::new()),
            stores.audit.clone(),
            auth.dependency_timeout,
        ));
        let policy = MessagePolicy::from_config(auth);
        let verifiers = Verifiers {
            wallet: Arc::new(WalletVerifier::new(stores.nonces.clone(), policy.clone())),
            farcaster: fid_resolver.map(|fids| {
                Arc::new(FarcasterVerifier::new(stores.nonces.clone(), fids, policy))
                    as Arc<dyn CredentialVerifier>
            }),
        };
        let codec = Arc::new(SessionCodec::new(
            auth.session_secret.as_bytes(),
            auth.session_ttl,
            auth.nonce_ttl,
        ));
        Self {
            stores,
            resolver,
            gate,
            verifiers,
            codec,
            config: Arc::new(config),
        }
    }

    fn auth_rate_limit(&self) -> Option<RateLimitRule> {
        let max = self.config.auth_rate_limit_per_min;
        (max > 0).then(|| RateLimitRule::per_minute("auth", max, RateLimitKey::Ip))
    }

    fn admin_rate_limit(&self) -> Option<RateLimitRule> {
        let max = self.config.admin_rate_limit_per_min;
        (max > 0).then(|| RateLimitRule::per_minute("admin", max, RateLimitKey::Address))
    }

    fn admin_route(&self, requirements: RouteRequirements) -> RouteRequirements {
        match self.admin_rate_limit() {
            Some(rule) => requirements.with_rate_limit(rule),
            None => requirements,
        }
    }
}

/// Run embedded database migrations.
///
/// Delegates to `mintgate_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    mintgate_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no gate)
    let public = Router::new()
        .route("/api/health", get(health::health_handler))
        .route("/auth/session", get(auth::session_handler))
        .route("/auth/logout", post(auth::logout_handler));

    let mut sign_in = RouteRequirements::public();
    if let Some(rule) = state.auth_rate_limit() {
        sign_in = sign_in.with_rate_limit(rule);
    }
    let login = gated(
        Router::new()
            .route("/auth/nonce", get(auth::nonce_handler))
            .route("/auth/verify", post(auth::verify_handler)),
        &state,
        sign_in,
    );

    let signed_in = gated(
        Router::new()
            .route("/auth/tos", post(auth::accept_tos_handler))
            .route("/auth/me", get(auth::me_handler)),
        &state,
        RouteRequirements::authenticated(),
    );

    let super_admin = gated(
        Router::new()
            .route(
                "/admin/permissions",
                post(admin_permissions::grant_permission_handler)
                    .delete(admin_permissions::revoke_permission_handler),
            )
            .route(
                "/admin/accounts/{account_id}/role",
                patch(accounts::update_role_handler),
            ),
        &state,
        state.admin_route(RouteRequirements::super_admin()),
    );

    let manage_users = gated(
        Router::new().route(
            "/admin/accounts/{account_id}/permissions",
            get(accounts::account_permissions_handler),
        ),
        &state,
        state.admin_route(RouteRequirements::permission(Permission::ManageUsers)),
    );

    let ban_users = gated(
        Router::new()
            .route("/admin/accounts/{account_id}/ban", post(accounts::ban_handler))
            .route(
                "/admin/accounts/{account_id}/unban",
                post(accounts::unban_handler),
            ),
        &state,
        state.admin_route(RouteRequirements::permission(Permission::BanUsers)),
    );

    let audit_log = gated(
        Router::new().route("/admin/audit", get(audit::query_audit_handler)),
        &state,
        state.admin_route(
            RouteRequirements::permission(Permission::ViewAuditLog)
                .audited(audit::AUDIT_READ, audit::AUDIT_RESOURCE),
        ),
    );

    let manage_settings = gated(
        Router::new()
            .route("/admin/settings", get(settings::list_settings_handler))
            .route("/admin/settings/{key}", put(settings::put_setting_handler)),
        &state,
        state.admin_route(RouteRequirements::permission(Permission::ManageSettings)),
    );

    Router::new()
        .merge(public)
        .merge(login)
        .merge(signed_in)
        .merge(super_admin)
        .merge(manage_users)
        .merge(ban_users)
        .merge(audit_log)
        .merge(manage_settings)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
