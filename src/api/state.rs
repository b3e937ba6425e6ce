//! Application state for the API server

use crate::service::OrderService;

/// Shared application state accessible to all route handlers
///
/// Cloned per request; the service itself is a bundle of `Arc`s.
#[derive(Clone)]
pub struct AppState {
    /// Order lifecycle operations
    pub service: OrderService,
}

impl AppState {
    /// Create a new AppState
    pub fn new(service: OrderService) -> Self {
        Self { service }
    }
}
