use axum::{Router, routing::get};

pub mod products;
pub mod reservations;
pub mod stock;
pub mod system;

/// Router for all inventory endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/products", products::router())
        .nest("/stock", stock::router())
        .route("/reservations/:order_id", get(reservations::get_reservation))
}
