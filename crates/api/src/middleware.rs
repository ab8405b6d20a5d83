use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use commons_authz::{ActorContext, TokenVerifier};
use commons_store::AuthzStore;

use crate::app::services::AppServices;

#[derive(Clone)]
pub struct AuthState {
    pub verifier: Arc<dyn TokenVerifier>,
    pub services: Arc<AppServices>,
}

/// Authenticate the request, then sync the membership ledger from the
/// claimed organizations **before** any handler (and so any permission
/// check) runs. A claim never outlives its credential: every synced row
/// lapses at the token's expiry.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_bearer(req.headers())?;

    let claims = state
        .verifier
        .verify(token, Utc::now())
        .map_err(|_e| StatusCode::UNAUTHORIZED)?;

    let ctx = ActorContext::from_claims(&claims);
    state
        .services
        .store
        .sync_membership(ctx.actor.user_id, &ctx.claimed_organizations, ctx.token_expiry)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "membership sync failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    req.extensions_mut().insert(ctx);

    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, StatusCode> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    let header = header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(token)
}
