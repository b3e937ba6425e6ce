//! Order lifecycle handlers.

use super::CreateOrderResponse;
use crate::api::AppState;
use crate::error::{ApiError, Error};
use crate::types::{FulfillmentJob, OrderId, TaskId};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// POST /order - Create an order and queue its first fulfillment run
#[utoipa::path(
    post,
    path = "/api/order",
    tag = "orders",
    request_body = crate::types::FulfillmentJob,
    responses(
        (status = 202, description = "Order created, fulfillment queued", body = CreateOrderResponse),
        (status = 400, description = "Missing fields or empty download list", body = crate::error::ApiError),
        (status = 401, description = "Missing or invalid API key", body = crate::error::ApiError),
        (status = 409, description = "Order already exists", body = crate::error::ApiError)
    ),
    security(("api_key" = []))
)]
pub async fn create_order(
    State(state): State<AppState>,
    Json(job): Json<FulfillmentJob>,
) -> Response {
    if let Err(message) = check_job(&job) {
        return (StatusCode::BAD_REQUEST, Json(ApiError::validation(message))).into_response();
    }

    match state.service.create_order(job).await {
        Ok(task_id) => (StatusCode::ACCEPTED, Json(CreateOrderResponse { task_id })).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to create order");
            e.into_response()
        }
    }
}

/// Reject jobs the pipeline would only turn into an empty order
fn check_job(job: &FulfillmentJob) -> Result<(), String> {
    for (field, value) in [
        ("request_id", &job.request_id),
        ("tenant_id", &job.tenant_id),
        ("order_number", &job.order_number),
    ] {
        if value.trim().is_empty() {
            return Err(format!("{field} must not be empty"));
        }
    }
    if job.downloads.is_empty() {
        return Err("downloads must not be empty".to_string());
    }
    Ok(())
}

/// GET /order/task/:id - Status of a fulfillment job
#[utoipa::path(
    get,
    path = "/api/order/task/{id}",
    tag = "orders",
    params(
        ("id" = uuid::Uuid, Path, description = "Task ID returned by POST /api/order")
    ),
    responses(
        (status = 200, description = "Current job status", body = crate::types::TaskStatus),
        (status = 404, description = "Unknown task", body = crate::error::ApiError)
    ),
    security(("api_key" = []))
)]
pub async fn task_status(State(state): State<AppState>, Path(id): Path<TaskId>) -> Response {
    match state.service.task_status(&id).await {
        Some(status) => (StatusCode::OK, Json(status)).into_response(),
        None => Error::NotFound(format!("task {id}")).into_response(),
    }
}

/// DELETE /order/:tenant_id/:order_number - Remove an order and its files
#[utoipa::path(
    delete,
    path = "/api/order/{tenant_id}/{order_number}",
    tag = "orders",
    params(
        ("tenant_id" = String, Path, description = "Tenant owning the order"),
        ("order_number" = String, Path, description = "Order number")
    ),
    responses(
        (status = 204, description = "Order removed"),
        (status = 400, description = "Invalid identifier", body = crate::error::ApiError),
        (status = 404, description = "Order not found", body = crate::error::ApiError)
    ),
    security(("api_key" = []))
)]
pub async fn delete_order(
    State(state): State<AppState>,
    Path((tenant_id, order_number)): Path<(String, String)>,
) -> Response {
    let order = match OrderId::new(tenant_id, order_number) {
        Ok(order) => order,
        Err(e) => return e.into_response(),
    };

    match state.service.delete_order(&order).await {
        Ok(()) => {
            tracing::info!(order = %order, "Order deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => e.into_response(),
    }
}
