//! Download link handlers.

use crate::api::AppState;
use crate::error::Error;
use crate::types::OrderId;
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio_util::io::ReaderStream;

/// GET /download/:tenant_id/:order_number - Revoke old links and mint new ones
#[utoipa::path(
    get,
    path = "/api/download/{tenant_id}/{order_number}",
    tag = "downloads",
    params(
        ("tenant_id" = String, Path, description = "Tenant owning the order"),
        ("order_number" = String, Path, description = "Order number")
    ),
    responses(
        (status = 200, description = "One link per published chunk", body = crate::types::DownloadLinks),
        (status = 400, description = "Invalid identifier", body = crate::error::ApiError),
        (status = 404, description = "Order not found", body = crate::error::ApiError)
    ),
    security(("api_key" = []))
)]
pub async fn request_links(
    State(state): State<AppState>,
    Path((tenant_id, order_number)): Path<(String, String)>,
) -> Response {
    let order = match OrderId::new(tenant_id, order_number) {
        Ok(order) => order,
        Err(e) => return e.into_response(),
    };

    match state.service.request_links(&order).await {
        Ok(links) => (StatusCode::OK, Json(links)).into_response(),
        Err(e) => {
            if !matches!(e, Error::Order(_)) {
                tracing::error!(order = %order, error = %e, "Failed to mint download links");
            }
            e.into_response()
        }
    }
}

/// GET /download/:token - Stream the chunk a token grants
#[utoipa::path(
    get,
    path = "/api/download/{token}",
    tag = "downloads",
    params(
        ("token" = String, Path, description = "Download token from a minted link")
    ),
    responses(
        (status = 200, description = "Zip chunk", content_type = "application/zip"),
        (status = 401, description = "Invalid or revoked token", body = crate::error::ApiError),
        (status = 404, description = "Chunk no longer exists", body = crate::error::ApiError)
    )
)]
pub async fn download_chunk(State(state): State<AppState>, Path(token): Path<String>) -> Response {
    let resolved = match state.service.open_download(&token).await {
        Ok(resolved) => resolved,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected download token");
            return e.into_response();
        }
    };

    let file = match tokio::fs::File::open(&resolved.path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Error::NotFound(resolved.download_name).into_response();
        }
        Err(e) => return Error::Io(e).into_response(),
    };

    tracing::info!(
        file = %resolved.path.display(),
        size = resolved.size,
        "Serving download"
    );

    let disposition = format!("attachment; filename=\"{}\"", resolved.download_name);
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_LENGTH, resolved.size.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response()
}
