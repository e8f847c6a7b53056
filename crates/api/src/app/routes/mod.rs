use axum::{Router, routing::get};

pub mod actors;
pub mod events;
pub mod products;
pub mod system;

/// Router for everything under `/api`.
pub fn router() -> Router {
    Router::new()
        .route("/stream", get(system::stream))
        .nest("/actors", actors::router())
        .nest("/events", events::router())
        .nest("/products", products::router())
}
