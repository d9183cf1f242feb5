//! Sign-in flows: nonce issue, signature verification and session finalize.

use chrono::Utc;
use mintgate_core::session::nonce::{discard_nonce, issue_nonce};
use mintgate_core::session::{AuthMethod, SessionState};
use mintgate_core::verify::{VerifyError, VerifyExtras};
use tracing::{info, warn};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::VerifyRequest;

/// Start a login attempt: register a fresh nonce and move the slot to
/// pending. Refused on an authenticated slot.
pub async fn create_pending_session(
    state: &AppState,
    current: &SessionState,
) -> AppResult<(String, SessionState)> {
    if current.is_logged_in() {
        return Err(AppError::Conflict("Already signed in; log out first".into()));
    }
    let nonce = issue_nonce(state.stores.nonces.as_ref(), state.config.auth.nonce_ttl).await?;
    let pending = current.begin_pending(nonce.clone())?;
    Ok((nonce, pending))
}

/// Verify a signed message against the slot's pending nonce and finalize the
/// session. Creates the account on first login.
pub async fn verify_login(
    state: &AppState,
    current: &SessionState,
    request: VerifyRequest,
) -> AppResult<SessionState> {
    if current.is_logged_in() {
        return Err(AppError::Conflict("Already signed in; log out first".into()));
    }
    let Some(nonce) = current.pending_nonce() else {
        warn!("verify without a pending login");
        return Err(AppError::InvalidLogin("no_pending_login"));
    };

    let method = request.method.unwrap_or(AuthMethod::Wallet);
    let verifier = match (method, &state.verifiers.farcaster) {
        (AuthMethod::Wallet, _) => state.verifiers.wallet.clone(),
        (AuthMethod::Farcaster, Some(farcaster)) => farcaster.clone(),
        (AuthMethod::Farcaster, None) => {
            discard_nonce(state.stores.nonces.as_ref(), nonce).await?;
            return Err(AppError::Validation(
                "Farcaster sign-in is not enabled".into(),
            ));
        }
    };

    let extras = VerifyExtras { fid: request.fid };
    let identity = match verifier
        .verify(nonce, &request.message, &request.signature, &extras)
        .await
    {
        Ok(identity) => identity,
        Err(VerifyError::Dependency(msg)) => return Err(AppError::DependencyUnavailable(msg)),
        Err(e) => {
            warn!(
                kind = e.kind(),
                method = ?verifier.method(),
                error = %e,
                "sign-in verification failed"
            );
            return Err(AppError::InvalidLogin(e.kind()));
        }
    };

    let accounts = &state.stores.accounts;
    if let Some(existing) = accounts.find_by_address(&identity.address).await?
        && existing.is_banned()
    {
        warn!(address = %identity.address, "banned account attempted sign-in");
        return Err(AppError::Forbidden("Account is banned".into()));
    }
    let account = accounts
        .record_login(&identity.address, identity.fid)
        .await?;

    let session = current.finalize(&identity, Utc::now())?;
    info!(address = %identity.address, ?method, account_id = %account.id, "signed in");
    Ok(session)
}

/// Stamp terms-of-service acceptance on the session.
pub fn accept_terms(current: &SessionState, version: &str) -> AppResult<SessionState> {
    let version = version.trim();
    if version.is_empty() || version.len() > 64 {
        return Err(AppError::Validation(
            "version must be 1-64 characters".into(),
        ));
    }
    Ok(current.accept_terms(version, Utc::now())?)
}
