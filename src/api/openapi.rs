//! OpenAPI documentation and schema generation
//!
//! The document is generated at compile time by utoipa from the handler
//! attributes and served at `/api/openapi.json`.

use utoipa::OpenApi;

/// OpenAPI documentation for the order-dl REST API
#[derive(OpenApi)]
#[openapi(
    info(
        title = "order-dl REST API",
        version = "0.1.0",
        description = "Order fulfillment service: downloads order files, packs them into size-capped zip archives and serves them through revocable links",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development server")
    ),
    paths(
        // Orders
        crate::api::routes::create_order,
        crate::api::routes::task_status,
        crate::api::routes::delete_order,

        // Downloads
        crate::api::routes::request_links,
        crate::api::routes::download_chunk,

        // System
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
    ),
    components(schemas(
        crate::types::OrderId,
        crate::types::DownloadSpec,
        crate::types::FulfillmentJob,
        crate::types::FetchFailure,
        crate::types::FulfillmentReport,
        crate::types::TaskStatus,
        crate::types::DownloadLink,
        crate::types::DownloadLinks,

        crate::api::routes::CreateOrderResponse,

        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "orders", description = "Order lifecycle - Create orders, follow fulfillment jobs, delete orders"),
        (name = "downloads", description = "Download links - Mint revocable links and stream archive chunks"),
        (name = "system", description = "System endpoints - Health check and OpenAPI spec"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Registers the X-Api-Key scheme used by the order routes
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = &mut openapi.components {
            components.add_security_scheme(
                "api_key",
                utoipa::openapi::security::SecurityScheme::ApiKey(
                    utoipa::openapi::security::ApiKey::Header(
                        utoipa::openapi::security::ApiKeyValue::new("X-Api-Key"),
                    ),
                ),
            );
        }
    }
}
