//! Entity registry, legacy per-entity permission routes, and list scoping.
//!
//! The legacy set/remove-permission surface is structurally identical across
//! entity-type pairs: one route template parameterized by (entity kind,
//! entity id, grantee kind, grantee id, verb). Registry mutation is the
//! deletion hook surface and is administrator-only.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use commons_authz::{ActorContext, EntityKind, EntityPermission, EntityRef, Selector, Verb};
use commons_store::AuthzStore;

use crate::app::{dto, errors, services::AppServices};

pub fn router() -> Router {
    Router::new()
        .route("/", post(register_entity))
        .route("/:kind", get(list_accessible))
        .route("/:kind/:id", delete(delete_entity))
        .route("/:kind/:id/permissions", get(list_entity_permissions))
        .route(
            "/:kind/:id/permissions/:grantee_kind/:grantee_id/:verb",
            put(put_entity_permission).delete(delete_entity_permission),
        )
}

/// Authorize an admin-or-MANAGE operation over `entity`, or produce the
/// refusal response: unprocessable when the resource is already known to the
/// caller (`visible`), not-found otherwise so existence is not disclosed.
pub(crate) async fn may_administer_or_response(
    services: &AppServices,
    ctx: &ActorContext,
    entity: &EntityRef,
    now: DateTime<Utc>,
    visible: bool,
) -> Option<axum::response::Response> {
    match services.resolver.may_administer(&ctx.actor, entity, now).await {
        Ok(true) => None,
        Ok(false) => Some(if visible {
            errors::json_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "insufficient_privilege",
                "this operation requires administrator status or MANAGE over the entity",
            )
        } else {
            errors::json_error(StatusCode::NOT_FOUND, "not_found", "not found")
        }),
        Err(e) => Some(errors::source_error_to_response(e)),
    }
}

fn parse_entity(kind: &str, id: &str) -> Result<EntityRef, axum::response::Response> {
    let kind: EntityKind = kind
        .parse()
        .map_err(|e| errors::domain_error_to_response(&e))?;
    let id = Uuid::parse_str(id).map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid entity id")
    })?;
    Ok(EntityRef::from_parts(kind, id))
}

/// POST /entities - register a protected entity (administrator only; this is
/// the registration half of the entity lifecycle hooks).
pub async fn register_entity(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
    Json(body): Json<dto::RegisterEntityRequest>,
) -> axum::response::Response {
    if !ctx.actor.is_administrator {
        return errors::json_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            "the entity registry is administrator-only",
        );
    }

    let (entity, parent) = match body.into_parts() {
        Ok(parts) => parts,
        Err(e) => return errors::domain_error_to_response(&e),
    };

    match services.store.register_entity(entity, parent).await {
        Ok(()) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "kind": entity.kind().as_str(),
                "id": entity.id().to_string(),
            })),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// DELETE /entities/:kind/:id - the deletion hook: removes the entity and,
/// in the same transaction, every grant referencing it (administrator only).
pub async fn delete_entity(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
    Path((kind, id)): Path<(String, String)>,
) -> axum::response::Response {
    if !ctx.actor.is_administrator {
        return errors::json_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            "the entity registry is administrator-only",
        );
    }

    let entity = match parse_entity(&kind, &id) {
        Ok(entity) => entity,
        Err(response) => return response,
    };

    match services.store.delete_entity(&entity).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// GET /entities/:kind?verb=V&ids=a,b,c - the list-scoping surface: the ids
/// of `kind` the caller may apply `verb` to, intersected with the optional
/// caller-supplied id filter before pagination.
pub async fn list_accessible(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
    Path(kind): Path<String>,
    Query(query): Query<dto::AccessibleIdsQuery>,
) -> axum::response::Response {
    let kind: EntityKind = match kind.parse() {
        Ok(kind) => kind,
        Err(e) => return errors::domain_error_to_response(&e),
    };
    let verb: Verb = match query.verb.parse() {
        Ok(verb) => verb,
        Err(e) => return errors::domain_error_to_response(&e),
    };

    let selector = match services
        .resolver
        .accessible_ids(&ctx.actor, verb, kind, Utc::now())
        .await
    {
        Ok(selector) => selector,
        Err(e) => return errors::source_error_to_response(e),
    };

    let selector = match &query.ids {
        Some(csv) => {
            let mut filter = BTreeSet::new();
            for part in csv.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                match Uuid::parse_str(part) {
                    Ok(id) => {
                        filter.insert(id);
                    }
                    Err(_) => {
                        return errors::json_error(
                            StatusCode::BAD_REQUEST,
                            "invalid_id",
                            format!("invalid id '{part}' in ids filter"),
                        );
                    }
                }
            }
            selector.restrict(&filter)
        }
        None => selector,
    };

    let body = match &selector {
        Selector::Unrestricted => serde_json::json!({
            "unrestricted": true,
            "ids": serde_json::Value::Null,
        }),
        Selector::Ids(ids) => serde_json::json!({
            "unrestricted": false,
            "ids": ids.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
        }),
    };

    (StatusCode::OK, Json(body)).into_response()
}

/// GET /entities/:kind/:id/permissions - list the legacy rows on an entity
/// (admin-or-MANAGE; hidden entities answer not-found).
pub async fn list_entity_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
    Path((kind, id)): Path<(String, String)>,
) -> axum::response::Response {
    let entity = match parse_entity(&kind, &id) {
        Ok(entity) => entity,
        Err(response) => return response,
    };

    match services.store.entity_exists(&entity).await {
        Ok(true) => {}
        Ok(false) => return errors::json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        Err(e) => return errors::store_error_to_response(e),
    }

    let now = Utc::now();
    if !ctx.actor.is_administrator {
        if let Some(response) =
            may_administer_or_response(&services, &ctx, &entity, now, false).await
        {
            return response;
        }
    }

    match services.store.list_entity_permissions(&entity).await {
        Ok(rows) => {
            let items: Vec<_> = rows.iter().map(dto::entity_permission_to_json).collect();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

/// PUT /entities/:kind/:id/permissions/:grantee_kind/:grantee_id/:verb -
/// legacy set-permission (idempotent upsert; admin-or-MANAGE).
pub async fn put_entity_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
    Path((kind, id, grantee_kind, grantee_id, verb)): Path<(String, String, String, String, String)>,
) -> axum::response::Response {
    let (entity, row) = match parse_permission_path(&kind, &id, &grantee_kind, &grantee_id, &verb) {
        Ok(parts) => parts,
        Err(response) => return response,
    };

    if let Some(response) = authorize_permission_mutation(&services, &ctx, &entity).await {
        return response;
    }

    match services.store.put_entity_permission(row).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// DELETE /entities/:kind/:id/permissions/:grantee_kind/:grantee_id/:verb -
/// legacy remove-permission; removing an absent row answers not-found, never
/// a silent success.
pub async fn delete_entity_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
    Path((kind, id, grantee_kind, grantee_id, verb)): Path<(String, String, String, String, String)>,
) -> axum::response::Response {
    let (entity, row) = match parse_permission_path(&kind, &id, &grantee_kind, &grantee_id, &verb) {
        Ok(parts) => parts,
        Err(response) => return response,
    };

    if let Some(response) = authorize_permission_mutation(&services, &ctx, &entity).await {
        return response;
    }

    match services
        .store
        .delete_entity_permission(&row.grantee, &entity, row.permission)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

fn parse_permission_path(
    kind: &str,
    id: &str,
    grantee_kind: &str,
    grantee_id: &str,
    verb: &str,
) -> Result<(EntityRef, EntityPermission), axum::response::Response> {
    let entity = parse_entity(kind, id)?;
    let grantee_id = Uuid::parse_str(grantee_id).map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid grantee id")
    })?;
    let grantee = dto::parse_grantee_segment(grantee_kind, grantee_id)
        .map_err(|e| errors::domain_error_to_response(&e))?;
    let permission: Verb = verb
        .parse()
        .map_err(|e| errors::domain_error_to_response(&e))?;

    let row = EntityPermission {
        grantee,
        entity,
        permission,
    };
    // Shape validation precedes any permission evaluation.
    row.validate()
        .map_err(|e| errors::domain_error_to_response(&e))?;

    Ok((entity, row))
}

/// Path-addressed legacy mutations: an unregistered entity, or one the
/// caller may not administer, answers not-found (the entity is a path
/// identifier, not payload data).
async fn authorize_permission_mutation(
    services: &AppServices,
    ctx: &ActorContext,
    entity: &EntityRef,
) -> Option<axum::response::Response> {
    match services.store.entity_exists(entity).await {
        Ok(true) => {}
        Ok(false) => {
            return Some(errors::json_error(StatusCode::NOT_FOUND, "not_found", "not found"));
        }
        Err(e) => return Some(errors::store_error_to_response(e)),
    }

    if ctx.actor.is_administrator {
        return None;
    }
    may_administer_or_response(services, ctx, entity, Utc::now(), false).await
}
