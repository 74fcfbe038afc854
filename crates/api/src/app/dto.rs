use serde::{Deserialize, Serialize};

use stockroom_core::{OrderId, ReservationId};
use stockroom_inventory::{
    ReleaseOutcome, Reservation, ReservationOutcome, ReservationStatus, StockCheck, StockItem,
};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct ListProductsParams {
    pub category: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct AdjustStockRequest {
    pub delta: i64,
}

#[derive(Debug, Deserialize)]
pub struct CheckStockRequest {
    pub items: Vec<StockItem>,
}

#[derive(Debug, Deserialize)]
pub struct ReserveStockRequest {
    pub order_id: String,
    pub items: Vec<StockItem>,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseStockRequest {
    pub order_id: String,
    /// Empty releases everything still held.
    #[serde(default)]
    pub items: Vec<StockItem>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct StockLevelResponse {
    pub product_id: String,
    pub stock_quantity: i64,
}

#[derive(Debug, Serialize)]
pub struct StockCheckResponse {
    pub available: bool,
    pub unavailable_items: Vec<StockItem>,
}

impl From<StockCheck> for StockCheckResponse {
    fn from(check: StockCheck) -> Self {
        Self {
            available: check.available,
            unavailable_items: check.unavailable,
        }
    }
}

/// Result of a reserve call. Unavailable items are a normal `success: false`
/// response, not an error.
#[derive(Debug, Serialize)]
pub struct ReserveStockResponse {
    pub success: bool,
    pub order_id: OrderId,
    pub reservation_id: Option<ReservationId>,
    pub replayed: bool,
    pub unavailable_items: Vec<StockItem>,
}

impl ReserveStockResponse {
    pub fn new(order_id: OrderId, outcome: ReservationOutcome) -> Self {
        match outcome {
            ReservationOutcome::Reserved {
                reservation_id,
                replayed,
            } => Self {
                success: true,
                order_id,
                reservation_id: Some(reservation_id),
                replayed,
                unavailable_items: Vec::new(),
            },
            ReservationOutcome::Unavailable(unavailable) => Self {
                success: false,
                order_id: unavailable.order_id,
                reservation_id: None,
                replayed: false,
                unavailable_items: unavailable.items,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReleaseStockResponse {
    pub success: bool,
    pub order_id: OrderId,
    pub reservation_id: ReservationId,
    pub released_items: Vec<StockItem>,
    pub status: ReservationStatus,
}

impl ReleaseStockResponse {
    pub fn new(order_id: OrderId, outcome: ReleaseOutcome) -> Self {
        Self {
            success: true,
            order_id,
            reservation_id: outcome.reservation_id,
            released_items: outcome.released,
            status: outcome.status,
        }
    }
}

pub fn reservation_to_json(r: Reservation) -> serde_json::Value {
    serde_json::json!({
        "reservation_id": r.id,
        "order_id": r.order_id,
        "status": r.status,
        "items": r.items,
        "outstanding": r.outstanding,
        "created_at": r.created_at,
        "updated_at": r.updated_at,
        "expires_at": r.expires_at,
    })
}
