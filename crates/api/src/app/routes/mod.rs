use axum::{Router, routing::get};

pub mod entities;
pub mod grants;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/grants", grants::router())
        .nest("/entities", entities::router())
}
