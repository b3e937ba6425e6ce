//! REST API server module
//!
//! Exposes order creation, deletion, link minting and token-authenticated
//! chunk downloads over HTTP, described by an OpenAPI 3.1 document.

use crate::Result;
use crate::service::OrderService;
use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{delete, get, post},
};
use std::future::Future;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Orders (API key protected when configured)
/// - `POST /api/order` - Create an order and queue its first run
/// - `GET /api/order/task/:id` - Status of a queued run
/// - `DELETE /api/order/:tenant_id/:order_number` - Remove an order
/// - `GET /api/download/:tenant_id/:order_number` - Revoke and mint download links
///
/// ## Public
/// - `GET /api/download/:token` - Stream a chunk; the token is the credential
/// - `GET /api/health` - Health check
/// - `GET /api/openapi.json` - OpenAPI specification
pub fn create_router(service: OrderService) -> Router {
    let api_config = service.config().api.clone();
    let state = AppState::new(service);

    let management = Router::new()
        .route("/api/order", post(routes::create_order))
        .route("/api/order/task/:id", get(routes::task_status))
        .route(
            "/api/order/:tenant_id/:order_number",
            delete(routes::delete_order),
        )
        .route(
            "/api/download/:tenant_id/:order_number",
            get(routes::request_links),
        );

    // route_layer keeps unmatched paths falling through to the public routes
    let management = if api_config.api_key.is_some() {
        management.route_layer(middleware::from_fn_with_state(
            api_config.api_key.clone(),
            auth::require_api_key,
        ))
    } else {
        management
    };

    let public = Router::new()
        .route("/api/download/:token", get(routes::download_chunk))
        .route("/api/health", get(routes::health_check))
        .route("/api/openapi.json", get(routes::openapi_spec));

    let router = management
        .merge(public)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if api_config.cors_enabled {
        router.layer(build_cors_layer(&api_config.cors_origins))
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// `"*"` or an empty list allows any origin.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Serve the API on the configured bind address until `shutdown` resolves
///
/// In-flight requests are allowed to finish before this returns.
///
/// # Example
///
/// ```no_run
/// use order_dl::{Config, OrderService};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let service = OrderService::new(Config::default())?;
/// order_dl::api::start_api_server(service, async {
///     tokio::signal::ctrl_c().await.ok();
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server<F>(service: OrderService, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let bind_address = service.config().api.bind_address;

    tracing::info!(address = %bind_address, "Starting API server");

    let app = create_router(service);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(
        address = %listener.local_addr().unwrap_or(bind_address),
        "API server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
