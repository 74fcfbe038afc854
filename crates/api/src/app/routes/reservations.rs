use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
};

use stockroom_core::OrderId;
use stockroom_infra::InventoryService;

use crate::app::{dto, errors};

pub async fn get_reservation(
    Extension(service): Extension<InventoryService>,
    Path(order_id): Path<String>,
) -> axum::response::Response {
    let order_id = match OrderId::parse(order_id) {
        Ok(id) => id,
        Err(e) => return errors::invalid_id(e),
    };
    match service.get_reservation(&order_id).await {
        Ok(r) => (StatusCode::OK, Json(dto::reservation_to_json(r))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
