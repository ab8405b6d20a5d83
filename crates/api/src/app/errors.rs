use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use commons_authz::SourceError;
use commons_core::DomainError;
use commons_store::StoreError;

/// Map a domain error to its response.
///
/// Validation failures are rejected before any permission evaluation (400);
/// referential conflicts — a grant referencing a nonexistent entity, or a
/// requester without the privilege to create it — are unprocessable (422),
/// distinct from not-found because the invalid reference is payload data.
pub fn domain_error_to_response(err: &DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg.clone())
        }
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg.clone()),
        DomainError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DomainError::Conflict(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "conflict", msg.clone())
        }
        DomainError::Unauthorized => {
            json_error(StatusCode::UNAUTHORIZED, "unauthorized", "unauthorized")
        }
    }
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::Domain(e) => domain_error_to_response(&e),
        StoreError::Backend(msg) => {
            tracing::error!(error = %msg, "store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn source_error_to_response(err: SourceError) -> axum::response::Response {
    tracing::error!(error = %err, "permission resolution failure");
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "resolver_error",
        err.to_string(),
    )
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
