//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store/resolver wiring shared by all handlers
//! - `routes/`: HTTP routes + handlers (one file per resource)
//! - `dto.rs`: request/response shapes and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::middleware;
use crate::token::Hs256TokenVerifier;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs` and the
/// black-box tests).
pub async fn build_app(jwt_secret: String) -> Router {
    let verifier = Arc::new(Hs256TokenVerifier::new(jwt_secret.into_bytes()));
    let services = Arc::new(services::build_services().await);
    let auth_state = middleware::AuthState {
        verifier,
        services: services.clone(),
    };

    // Protected routes: require auth; the middleware syncs the membership
    // ledger before any handler runs.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}
