//! Request gate.
//!
//! Every protected route runs [`Gate::authorize`] before its handler. The
//! steps run in a fixed order and the first failing step decides the
//! response:
//!
//! 1. rate limit
//! 2. authentication
//! 3. role and permission checks against the resolved authorization
//!
//! Routes tagged with an [`AuditTag`] also get audit entries: one for a
//! denial at step 3, or one when the request passes followed by one for the
//! handler's outcome. Both carry the request's correlation id.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::audit::{AuditContext, actions};
use crate::authz::{Authorization, Resolver};
use crate::models::{Address, NewAuditEntry, Permission};
use crate::rate_limit::{RateLimitDecision, RateLimitRule, RateLimiter};
use crate::session::SessionState;
use crate::store::AuditStore;

/// Marks a route as sensitive: its outcome is written to the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditTag {
    pub action: &'static str,
    pub resource_type: &'static str,
}

/// What a route needs from its caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteRequirements {
    pub authenticated: bool,
    pub admin: bool,
    pub super_admin: bool,
    pub permission: Option<Permission>,
    pub rate_limit: Option<RateLimitRule>,
    pub audit: Option<AuditTag>,
}

impl RouteRequirements {
    pub fn public() -> Self {
        Self::default()
    }

    pub fn authenticated() -> Self {
        Self {
            authenticated: true,
            ..Self::default()
        }
    }

    pub fn admin() -> Self {
        Self {
            admin: true,
            ..Self::default()
        }
    }

    pub fn super_admin() -> Self {
        Self {
            super_admin: true,
            ..Self::default()
        }
    }

    pub fn permission(permission: Permission) -> Self {
        Self {
            permission: Some(permission),
            ..Self::default()
        }
    }

    pub fn with_rate_limit(mut self, rule: RateLimitRule) -> Self {
        self.rate_limit = Some(rule);
        self
    }

    pub fn audited(mut self, action: &'static str, resource_type: &'static str) -> Self {
        self.audit = Some(AuditTag {
            action,
            resource_type,
        });
        self
    }

    /// Admin and permission requirements imply authentication.
    pub fn requires_session(&self) -> bool {
        self.authenticated || self.admin || self.super_admin || self.permission.is_some()
    }
}

/// Why the gate refused a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Denial {
    #[error("Too many requests")]
    TooManyRequests { retry_after: Duration },

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Account is banned")]
    Banned,

    #[error("Superadmin role required")]
    MissingSuperAdmin,

    #[error("Admin role required")]
    MissingAdmin,

    #[error("Missing permission {0}")]
    MissingPermission(Permission),

    /// The store did not answer in time or at all.
    #[error("Dependency unavailable: {0}")]
    Dependency(String),
}

impl Denial {
    fn is_authorization_failure(&self) -> bool {
        matches!(
            self,
            Denial::Banned
                | Denial::MissingSuperAdmin
                | Denial::MissingAdmin
                | Denial::MissingPermission(_)
        )
    }
}

/// Caller context handed to handlers on allow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    /// Session address, when the session is authenticated.
    pub address: Option<Address>,
    /// Resolved authorization, present whenever the route required a session.
    pub authorization: Option<Authorization>,
    pub correlation_id: Uuid,
}

impl CallerContext {
    pub fn account_id(&self) -> Option<Uuid> {
        self.authorization.as_ref().and_then(|a| a.account_id)
    }

    pub fn audit_context(&self) -> AuditContext {
        AuditContext {
            actor_id: self.account_id(),
            correlation_id: self.correlation_id,
        }
    }
}

/// Resource id and snapshots a handler reports for its audit entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditDetails {
    pub resource_id: Option<String>,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

pub struct Gate {
    resolver: Arc<Resolver>,
    limiter: Arc<RateLimiter>,
    audit: Arc<dyn AuditStore>,
    dependency_timeout: Duration,
}

impl Gate {
    pub fn new(
        resolver: Arc<Resolver>,
        limiter: Arc<RateLimiter>,
        audit: Arc<dyn AuditStore>,
        dependency_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            limiter,
            audit,
            dependency_timeout,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Decide a request under a fresh correlation id.
    pub async fn authorize(
        &self,
        session: &SessionState,
        client_ip: Option<IpAddr>,
        requirements: &RouteRequirements,
    ) -> Result<CallerContext, Denial> {
        self.authorize_with(session, client_ip, requirements, crate::ids::correlation_id())
            .await
    }

    pub async fn authorize_with(
        &self,
        session: &SessionState,
        client_ip: Option<IpAddr>,
        requirements: &RouteRequirements,
        correlation_id: Uuid,
    ) -> Result<CallerContext, Denial> {
        let address = session.address();

        if let Some(rule) = &requirements.rate_limit {
            let identifier = rule.identifier(client_ip, address.as_ref());
            if let RateLimitDecision::Limited { retry_after } =
                self.limiter.check(rule, &identifier)
            {
                debug!(%identifier, ?retry_after, "rate limited");
                return Err(Denial::TooManyRequests { retry_after });
            }
        }

        if !requirements.requires_session() {
            return Ok(CallerContext {
                address,
                authorization: None,
                correlation_id,
            });
        }

        let Some(address) = address else {
            debug!(%correlation_id, "no authenticated session");
            return Err(Denial::Unauthenticated);
        };

        let authorization =
            match tokio::time::timeout(self.dependency_timeout, self.resolver.resolve(&address))
                .await
            {
                Ok(Ok(authorization)) => authorization,
                Ok(Err(e)) => {
                    warn!(%address, error = %e, "authorization lookup failed");
                    return Err(Denial::Dependency(e.to_string()));
                }
                Err(_) => {
                    warn!(%address, timeout = ?self.dependency_timeout, "authorization lookup timed out");
                    return Err(Denial::Dependency("authorization lookup timed out".into()));
                }
            };

        if let Err(denial) = check_requirements(&authorization, requirements) {
            debug!(%address, %denial, "access denied");
            if let Some(tag) = &requirements.audit {
                let caller = CallerContext {
                    address: Some(address),
                    authorization: Some(authorization),
                    correlation_id,
                };
                self.record_denial(&caller, tag, &denial).await;
            }
            return Err(denial);
        }

        let caller = CallerContext {
            address: Some(address),
            authorization: Some(authorization),
            correlation_id,
        };
        if let Some(tag) = &requirements.audit {
            self.record_pass(&caller, tag).await;
        }
        Ok(caller)
    }

    /// Entry for an allowed request, written before its handler runs.
    async fn record_pass(&self, caller: &CallerContext, tag: &AuditTag) {
        let entry = NewAuditEntry {
            actor_id: caller.account_id(),
            action: actions::ACCESS_GRANTED.to_string(),
            resource_type: tag.resource_type.to_string(),
            resource_id: None,
            before: None,
            after: Some(json!({ "route": tag.action, "address": caller.address })),
            success: true,
            error_message: None,
            correlation_id: caller.correlation_id,
        };
        self.append(entry).await;
    }

    async fn record_denial(&self, caller: &CallerContext, tag: &AuditTag, denial: &Denial) {
        debug_assert!(denial.is_authorization_failure());
        let entry = NewAuditEntry {
            actor_id: caller.account_id(),
            action: actions::ACCESS_DENIED.to_string(),
            resource_type: tag.resource_type.to_string(),
            resource_id: None,
            before: None,
            after: Some(json!({ "route": tag.action, "address": caller.address })),
            success: false,
            error_message: Some(denial.to_string()),
            correlation_id: caller.correlation_id,
        };
        self.append(entry).await;
    }

    /// Write the audit entry for a tagged route's handler outcome.
    pub async fn record_outcome(
        &self,
        caller: &CallerContext,
        tag: &AuditTag,
        details: AuditDetails,
        error_message: Option<String>,
    ) {
        let entry = NewAuditEntry {
            actor_id: caller.account_id(),
            action: tag.action.to_string(),
            resource_type: tag.resource_type.to_string(),
            resource_id: details.resource_id,
            before: details.before,
            after: details.after,
            success: error_message.is_none(),
            error_message,
            correlation_id: caller.correlation_id,
        };
        self.append(entry).await;
    }

    async fn append(&self, entry: NewAuditEntry) {
        let action = entry.action.clone();
        let correlation_id = entry.correlation_id;
        match tokio::time::timeout(self.dependency_timeout, self.audit.append(entry)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!(%action, %correlation_id, error = %e, "audit write failed"),
            Err(_) => error!(%action, %correlation_id, "audit write timed out"),
        }
    }
}

/// Step 3: banned, then superadmin, admin and permission requirements.
fn check_requirements(
    authorization: &Authorization,
    requirements: &RouteRequirements,
) -> Result<(), Denial> {
    if authorization.banned {
        return Err(Denial::Banned);
    }
    if requirements.super_admin && !authorization.is_super_admin {
        return Err(Denial::MissingSuperAdmin);
    }
    if requirements.admin && !authorization.is_admin {
        return Err(Denial::MissingAdmin);
    }
    if let Some(permission) = requirements.permission
        && !authorization.has_permission(permission)
    {
        return Err(Denial::MissingPermission(permission));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::audit::resources;
    use crate::models::{AccountStatus, Role};
    use crate::rate_limit::RateLimitKey;
    use crate::session::{AuthMethod, AuthenticatedSession};
    use crate::store::{MemoryStore, Stores};

    struct Harness {
        store: Arc<MemoryStore>,
        resolver: Arc<Resolver>,
        gate: Gate,
    }

    fn harness(timeout: Duration) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let stores = Stores::from_backend(store.clone());
        let resolver = Arc::new(Resolver::new(&stores, Duration::ZERO));
        let gate = Gate::new(
            resolver.clone(),
            Arc::new(RateLimiter::new()),
            stores.audit.clone(),
            timeout,
        );
        Harness {
            store,
            resolver,
            gate,
        }
    }

    fn session(address: Address) -> SessionState {
        SessionState::Authenticated(AuthenticatedSession {
            address,
            chain_id: Some(8453),
            fid: None,
            auth_method: AuthMethod::Wallet,
            logged_in_at: Utc::now(),
            tos_accepted_version: None,
            tos_accepted_at: None,
        })
    }

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    fn ctx() -> AuditContext {
        AuditContext::actor(Uuid::new_v4(), Uuid::new_v4())
    }

    #[tokio::test]
    async fn anonymous_is_unauthenticated_on_admin_routes() {
        let h = harness(Duration::from_secs(1));
        for session in [
            SessionState::Anonymous,
            SessionState::Pending {
                nonce: "n".into(),
            },
        ] {
            for req in [
                RouteRequirements::admin(),
                RouteRequirements::super_admin(),
                RouteRequirements::permission(Permission::ViewAuditLog),
            ] {
                assert_eq!(
                    h.gate.authorize(&session, None, &req).await,
                    Err(Denial::Unauthenticated)
                );
            }
        }
    }

    #[tokio::test]
    async fn public_route_passes_without_session() {
        let h = harness(Duration::from_secs(1));
        let caller = h
            .gate
            .authorize(&SessionState::Anonymous, None, &RouteRequirements::public())
            .await
            .unwrap();
        assert!(caller.address.is_none());
        assert!(caller.authorization.is_none());
    }

    #[tokio::test]
    async fn user_is_forbidden_on_admin_routes() {
        let h = harness(Duration::from_secs(1));
        h.store.seed_account(addr(1), Role::User).await;
        let result = h
            .gate
            .authorize(&session(addr(1)), None, &RouteRequirements::admin())
            .await;
        assert_eq!(result, Err(Denial::MissingAdmin));

        // Unknown addresses resolve to users too.
        let result = h
            .gate
            .authorize(&session(addr(2)), None, &RouteRequirements::admin())
            .await;
        assert_eq!(result, Err(Denial::MissingAdmin));
    }

    #[tokio::test]
    async fn grant_and_revoke_flip_the_decision() {
        let h = harness(Duration::from_secs(1));
        let admin = h.store.seed_account(addr(3), Role::Admin).await;
        let req = RouteRequirements::permission(Permission::BanUsers);

        assert_eq!(
            h.gate.authorize(&session(addr(3)), None, &req).await,
            Err(Denial::MissingPermission(Permission::BanUsers))
        );

        h.resolver
            .grant_permission(admin.id, Permission::BanUsers, &ctx())
            .await
            .unwrap();
        let caller = h.gate.authorize(&session(addr(3)), None, &req).await.unwrap();
        assert_eq!(caller.account_id(), Some(admin.id));

        h.resolver
            .revoke_permission(admin.id, Permission::BanUsers, &ctx())
            .await
            .unwrap();
        assert_eq!(
            h.gate.authorize(&session(addr(3)), None, &req).await,
            Err(Denial::MissingPermission(Permission::BanUsers))
        );
    }

    #[tokio::test]
    async fn superadmin_passes_every_permission() {
        let h = harness(Duration::from_secs(1));
        h.store.seed_account(addr(4), Role::SuperAdmin).await;
        for p in Permission::ALL {
            let req = RouteRequirements::permission(p);
            assert!(h.gate.authorize(&session(addr(4)), None, &req).await.is_ok());
        }
        assert!(
            h.gate
                .authorize(&session(addr(4)), None, &RouteRequirements::super_admin())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn admin_is_not_superadmin() {
        let h = harness(Duration::from_secs(1));
        h.store.seed_account(addr(5), Role::Admin).await;
        assert_eq!(
            h.gate
                .authorize(&session(addr(5)), None, &RouteRequirements::super_admin())
                .await,
            Err(Denial::MissingSuperAdmin)
        );
    }

    #[tokio::test]
    async fn banned_accounts_are_refused() {
        let h = harness(Duration::from_secs(1));
        let account = h.store.seed_account(addr(6), Role::SuperAdmin).await;
        h.resolver
            .set_account_status(account.id, AccountStatus::Banned, &ctx())
            .await
            .unwrap();
        assert_eq!(
            h.gate
                .authorize(&session(addr(6)), None, &RouteRequirements::authenticated())
                .await,
            Err(Denial::Banned)
        );
    }

    #[tokio::test]
    async fn store_outage_and_timeout_fail_closed() {
        let h = harness(Duration::from_millis(20));
        h.store.seed_account(addr(7), Role::SuperAdmin).await;

        h.store.set_unavailable(true);
        assert!(matches!(
            h.gate
                .authorize(&session(addr(7)), None, &RouteRequirements::admin())
                .await,
            Err(Denial::Dependency(_))
        ));

        h.store.set_unavailable(false);
        h.store.set_latency(Duration::from_millis(200));
        assert!(matches!(
            h.gate
                .authorize(&session(addr(7)), None, &RouteRequirements::admin())
                .await,
            Err(Denial::Dependency(_))
        ));
    }

    #[tokio::test]
    async fn rate_limit_runs_before_authentication() {
        let h = harness(Duration::from_secs(1));
        let rule = RateLimitRule::per_minute("auth", 2, RateLimitKey::Ip);
        let req = RouteRequirements::public().with_rate_limit(rule);
        let ip: IpAddr = "192.0.2.1".parse().unwrap();

        for _ in 0..2 {
            assert!(
                h.gate
                    .authorize(&SessionState::Anonymous, Some(ip), &req)
                    .await
                    .is_ok()
            );
        }
        assert!(matches!(
            h.gate.authorize(&SessionState::Anonymous, Some(ip), &req).await,
            Err(Denial::TooManyRequests { .. })
        ));

        let other: IpAddr = "192.0.2.2".parse().unwrap();
        assert!(
            h.gate
                .authorize(&SessionState::Anonymous, Some(other), &req)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn tagged_denials_and_outcomes_are_audited() {
        let h = harness(Duration::from_secs(1));
        h.store.seed_account(addr(8), Role::User).await;
        let admin = h.store.seed_account(addr(9), Role::Admin).await;
        let req = RouteRequirements::permission(Permission::ViewAuditLog)
            .audited("audit.read", resources::ACCOUNT);

        let denied = h.gate.authorize(&session(addr(8)), None, &req).await;
        assert!(denied.is_err());
        let entries = h.store.audit_entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, actions::ACCESS_DENIED);
        assert!(!entries[0].success);

        let caller = h.gate.authorize(&session(addr(9)), None, &req).await.unwrap();
        let entries = h.store.audit_entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].action, actions::ACCESS_GRANTED);
        assert_eq!(entries[1].actor_id, Some(admin.id));
        assert_eq!(entries[1].correlation_id, caller.correlation_id);
        assert!(entries[1].success);

        let tag = req.audit.unwrap();
        h.gate
            .record_outcome(
                &caller,
                &tag,
                AuditDetails {
                    resource_id: Some("all".into()),
                    ..Default::default()
                },
                None,
            )
            .await;
        let entries = h.store.audit_entries().await;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].action, "audit.read");
        assert_eq!(entries[2].actor_id, Some(admin.id));
        assert_eq!(entries[2].correlation_id, caller.correlation_id);
        assert!(entries[2].success);
    }

    #[tokio::test]
    async fn untagged_passes_write_nothing() {
        let h = harness(Duration::from_secs(1));
        h.store.seed_account(addr(11), Role::Admin).await;
        let caller = h
            .gate
            .authorize(&session(addr(11)), None, &RouteRequirements::admin())
            .await;
        assert!(caller.is_ok());
        assert!(h.store.audit_entries().await.is_empty());
    }

    #[tokio::test]
    async fn audit_failure_does_not_change_the_decision() {
        let h = harness(Duration::from_secs(1));
        h.store.seed_account(addr(10), Role::User).await;
        h.store.fail_audit_writes(true);
        let req = RouteRequirements::admin().audited("x", resources::ACCOUNT);
        assert_eq!(
            h.gate.authorize(&session(addr(10)), None, &req).await,
            Err(Denial::MissingAdmin)
        );
        assert!(h.store.audit_entries().await.is_empty());
    }
}
