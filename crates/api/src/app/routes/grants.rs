//! Generalized grant administration: create/list/get/delete.
//!
//! Mutation requires the caller to be an administrator or to hold effective
//! MANAGE over the context entity (self-service delegation). A grant a
//! caller may neither administer nor holds is reported as not-found rather
//! than forbidden, so its existence is not disclosed.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};

use commons_authz::{ActorContext, GranteeRef, MembershipReader, PermissionGrant, SourceError};
use commons_core::GrantId;
use commons_store::AuthzStore;

use crate::app::routes::entities::may_administer_or_response;
use crate::app::{dto, errors, services::AppServices};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_grant).get(list_grants))
        .route("/:id", get(get_grant).delete(delete_grant))
}

/// Whether the caller holds the grant: named directly, or an active member
/// of the named organization.
async fn holds_grant(
    services: &AppServices,
    ctx: &ActorContext,
    grant: &PermissionGrant,
    now: DateTime<Utc>,
) -> Result<bool, SourceError> {
    match grant.grantee {
        GranteeRef::User(user) => Ok(user == ctx.actor.user_id),
        GranteeRef::Organization(organization) => {
            services
                .ledger
                .is_active_member(ctx.actor.user_id, organization, now)
                .await
        }
    }
}

pub async fn create_grant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
    Json(body): Json<dto::CreateGrantRequest>,
) -> axum::response::Response {
    let grant = match body.into_new_grant() {
        Ok(grant) => grant,
        Err(e) => return errors::domain_error_to_response(&e),
    };
    // Shape validation precedes any permission evaluation.
    if let Err(e) = grant.validate() {
        return errors::domain_error_to_response(&e);
    }

    let now = Utc::now();
    let context_entity = grant.context.entity_ref();
    match services
        .resolver
        .may_administer(&ctx.actor, &context_entity, now)
        .await
    {
        Ok(true) => {}
        // A delegation can never exceed what the delegator effectively
        // holds: without MANAGE over the context entity this request is a
        // privilege conflict, not a missing resource.
        Ok(false) => {
            return errors::json_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "insufficient_privilege",
                "creating this grant requires administrator status or MANAGE over the context entity",
            );
        }
        Err(e) => return errors::source_error_to_response(e),
    }

    match services
        .store
        .create_permission_grant(grant, ctx.actor.user_id, now)
        .await
    {
        Ok(stored) => (StatusCode::CREATED, Json(dto::grant_to_json(&stored))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn list_grants(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
    Query(query): Query<dto::ListGrantsQuery>,
) -> axum::response::Response {
    let filter = match query.into_filter() {
        Ok(filter) => filter,
        Err(e) => return errors::domain_error_to_response(&e),
    };

    let grants = match services.store.list_permission_grants(&filter).await {
        Ok(grants) => grants,
        Err(e) => return errors::store_error_to_response(e),
    };

    let now = Utc::now();
    let mut items = Vec::with_capacity(grants.len());
    for grant in grants {
        let visible = if ctx.actor.is_administrator {
            true
        } else {
            match holds_grant(&services, &ctx, &grant, now).await {
                Ok(true) => true,
                Ok(false) => match services
                    .resolver
                    .may_administer(&ctx.actor, &grant.context.entity_ref(), now)
                    .await
                {
                    Ok(visible) => visible,
                    Err(e) => return errors::source_error_to_response(e),
                },
                Err(e) => return errors::source_error_to_response(e),
            }
        };
        if visible {
            items.push(dto::grant_to_json(&grant));
        }
    }

    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn get_grant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: GrantId = match id.parse() {
        Ok(id) => id,
        Err(e) => return errors::domain_error_to_response(&e),
    };

    let grant = match services.store.get_permission_grant(id).await {
        Ok(grant) => grant,
        Err(e) => return errors::store_error_to_response(e),
    };

    let now = Utc::now();
    if !ctx.actor.is_administrator {
        let holds = match holds_grant(&services, &ctx, &grant, now).await {
            Ok(holds) => holds,
            Err(e) => return errors::source_error_to_response(e),
        };
        if !holds {
            match services
                .resolver
                .may_administer(&ctx.actor, &grant.context.entity_ref(), now)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    // Existence non-disclosure.
                    return errors::json_error(StatusCode::NOT_FOUND, "not_found", "not found");
                }
                Err(e) => return errors::source_error_to_response(e),
            }
        }
    }

    (StatusCode::OK, Json(dto::grant_to_json(&grant))).into_response()
}

pub async fn delete_grant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: GrantId = match id.parse() {
        Ok(id) => id,
        Err(e) => return errors::domain_error_to_response(&e),
    };

    let grant = match services.store.get_permission_grant(id).await {
        Ok(grant) => grant,
        Err(e) => return errors::store_error_to_response(e),
    };

    let now = Utc::now();
    if !ctx.actor.is_administrator {
        // A grantee can see its own grant, so refusing the deletion is
        // unprocessable rather than not-found.
        let visible = match holds_grant(&services, &ctx, &grant, now).await {
            Ok(holds) => holds,
            Err(e) => return errors::source_error_to_response(e),
        };
        if let Some(response) =
            may_administer_or_response(&services, &ctx, &grant.context.entity_ref(), now, visible)
                .await
        {
            return response;
        }
    }

    match services.store.delete_permission_grant(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
