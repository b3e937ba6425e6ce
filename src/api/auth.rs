//! Authentication middleware for the REST API
//!
//! Provides optional API key authentication via the X-Api-Key header.
//! When `ApiConfig::api_key` is set, the order management routes require a
//! matching header or answer 401 Unauthorized. Token downloads are not
//! covered; the token itself authorizes them.

use crate::error::ApiError;
use crate::token::constant_time_eq;
use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Reject requests whose X-Api-Key header does not match the configured key
///
/// Passes every request through when no key is configured.
///
/// # Examples
///
/// ```no_run
/// use axum::{Router, middleware};
/// use order_dl::api::auth::require_api_key;
///
/// let api_key = Some("secret-key-123".to_string());
/// let router: Router = Router::new()
///     .layer(middleware::from_fn_with_state(
///         api_key,
///         require_api_key
///     ));
/// ```
pub async fn require_api_key(
    State(expected_api_key): State<Option<String>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected_key) = expected_api_key else {
        return next.run(request).await;
    };

    let api_key_header = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok());

    match api_key_header {
        Some(provided_key)
            if constant_time_eq(provided_key.as_bytes(), expected_key.as_bytes()) =>
        {
            next.run(request).await
        }
        Some(_) => unauthorized_response("Invalid API key"),
        None => unauthorized_response("Missing X-Api-Key header"),
    }
}

fn unauthorized_response(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(ApiError::unauthorized(message))).into_response()
}
