//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`orders`] - Order creation, deletion and job status
//! - [`downloads`] - Link minting and token downloads
//! - [`system`] - Health and OpenAPI

use serde::{Deserialize, Serialize};

mod downloads;
mod orders;
mod system;

pub use downloads::*;
pub use orders::*;
pub use system::*;

/// Response body for POST /order
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct CreateOrderResponse {
    /// Id of the queued fulfillment job
    pub task_id: uuid::Uuid,
}
