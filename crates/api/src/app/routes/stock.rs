use axum::{
    Json, Router,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};

use stockroom_core::OrderId;
use stockroom_infra::InventoryService;

use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/check", post(check_stock))
        .route("/reserve", post(reserve_stock))
        .route("/release", post(release_stock))
}

pub async fn check_stock(
    Extension(service): Extension<InventoryService>,
    body: Result<Json<dto::CheckStockRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::invalid_body(rejection),
    };

    match service.check_stock(&body.items).await {
        Ok(check) => (StatusCode::OK, Json(dto::StockCheckResponse::from(check))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn reserve_stock(
    Extension(service): Extension<InventoryService>,
    body: Result<Json<dto::ReserveStockRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::invalid_body(rejection),
    };
    let order_id = match OrderId::parse(body.order_id) {
        Ok(id) => id,
        Err(e) => return errors::invalid_id(e),
    };

    match service.reserve_stock(order_id.clone(), body.items).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(dto::ReserveStockResponse::new(order_id, outcome)),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn release_stock(
    Extension(service): Extension<InventoryService>,
    body: Result<Json<dto::ReleaseStockRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::invalid_body(rejection),
    };
    let order_id = match OrderId::parse(body.order_id) {
        Ok(id) => id,
        Err(e) => return errors::invalid_id(e),
    };

    match service.release_stock(order_id.clone(), body.items).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(dto::ReleaseStockResponse::new(order_id, outcome)),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
