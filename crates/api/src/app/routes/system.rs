use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use chrono::Utc;

use commons_authz::{ActorContext, MembershipReader};

use crate::app::{errors, services::AppServices};

/// GET /health - liveness probe (unauthenticated).
pub async fn health() -> axum::response::Response {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response()
}

/// GET /whoami - the actor context as the engine sees it, including the
/// currently active organization memberships from the ledger.
pub async fn whoami(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
) -> axum::response::Response {
    let active = match services
        .ledger
        .active_organizations(ctx.actor.user_id, Utc::now())
        .await
    {
        Ok(orgs) => orgs,
        Err(e) => return errors::source_error_to_response(e),
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "user_id": ctx.actor.user_id.to_string(),
            "is_administrator": ctx.actor.is_administrator,
            "active_organizations": active.iter().map(|o| o.to_string()).collect::<Vec<_>>(),
        })),
    )
        .into_response()
}
