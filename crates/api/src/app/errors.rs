use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use stockroom_core::DomainError;
use stockroom_infra::ServiceError;

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    let retryable = err.is_retryable();
    let (status, code) = match &err {
        ServiceError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        ServiceError::DuplicateSku(_) => (StatusCode::CONFLICT, "duplicate_sku"),
        ServiceError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
        ServiceError::OrderConflict(_) => (StatusCode::CONFLICT, "order_conflict"),
        ServiceError::InsufficientStock { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "insufficient_stock")
        }
        ServiceError::StoreUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable"),
        ServiceError::LedgerUnavailable(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "ledger_unavailable")
        }
        ServiceError::Cancelled(_) => (StatusCode::GATEWAY_TIMEOUT, "cancelled"),
        ServiceError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    };
    if status.is_server_error() {
        tracing::warn!(error = %err, "request failed");
    }

    (
        status,
        axum::Json(json!({
            "error": code,
            "message": err.to_string(),
            "retryable": retryable,
        })),
    )
        .into_response()
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

pub fn invalid_body(rejection: JsonRejection) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_body", rejection.body_text())
}

pub fn invalid_query(rejection: QueryRejection) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_query", rejection.body_text())
}

pub fn invalid_id(err: DomainError) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_id", err.to_string())
}
