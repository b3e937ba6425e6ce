//! Error types for order-dl
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (Order, Archive, Token, Fetch)
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for order-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for order-dl
///
/// Only order-directory problems, token problems and failures inside the
/// guarded archive section surface through this type. Per-item download
/// failures are recorded in the run report as [`FetchError`]s instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "archive.max_zip_size")
        key: Option<String>,
    },

    /// Order lifecycle error (missing, duplicate, malformed identifiers)
    #[error("order error: {0}")]
    Order(#[from] OrderError),

    /// Archive build error
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Download-link token error
    #[error("invalid token: {0}")]
    Token(#[from] TokenError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Zip format error
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Requested resource not found (chunk file, task id)
    #[error("not found: {0}")]
    NotFound(String),

    /// Lock acquisition or release failed
    #[error("lock error: {0}")]
    Lock(String),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Order lifecycle errors
#[derive(Debug, Error)]
pub enum OrderError {
    /// The order directory does not exist
    #[error("order {order_number} does not exist for tenant {tenant_id}")]
    NotFound {
        /// Tenant owning the order
        tenant_id: String,
        /// Order number
        order_number: String,
    },

    /// The order directory already exists
    #[error("order {order_number} already exists for tenant {tenant_id}")]
    AlreadyExists {
        /// Tenant owning the order
        tenant_id: String,
        /// Order number
        order_number: String,
    },

    /// A tenant id or order number cannot be used as a path segment
    #[error("invalid identifier {value:?}: {reason}")]
    InvalidId {
        /// The rejected value
        value: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Archive build errors
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Splitting the base archive into chunks failed
    #[error("split failed: {reason}")]
    Split {
        /// The reason the split failed
        reason: String,
    },

    /// A produced chunk did not verify as a well-formed archive
    #[error("chunk {path} failed verification: {reason}")]
    Verify {
        /// The chunk that failed
        path: PathBuf,
        /// The reason verification failed
        reason: String,
    },

    /// Building an archive failed
    #[error("failed to build {path}: {reason}")]
    Build {
        /// The archive being written
        path: PathBuf,
        /// The reason the build failed
        reason: String,
    },
}

/// Download-link token errors
///
/// All variants are reported to clients the same way (401); the distinction
/// only exists for logging.
#[derive(Debug, Error)]
pub enum TokenError {
    /// Token is not valid base64 or is too short to hold a nonce
    #[error("malformed token")]
    Malformed,

    /// Authenticated decryption failed (tampering, wrong key)
    #[error("token could not be decrypted")]
    Decrypt,

    /// Decrypted payload does not carry a usable relative path
    #[error("token payload has an invalid path")]
    InvalidPath,

    /// Embedded seed differs from the order's current seed
    #[error("token seed does not match the current order seed")]
    SeedMismatch,
}

/// Per-item download failure, recorded in the run report
#[derive(Debug, Error)]
pub enum FetchError {
    /// DNS/connection failure, malformed URL or unsupported scheme
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// Source answered with a non-success status
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Connect or read timed out
    #[error("timed out: {0}")]
    Timeout(String),

    /// Transfer completed with zero bytes
    #[error("downloaded file is empty")]
    EmptyFile,

    /// The target filename cannot be used inside the cache directory
    #[error("invalid target filename {0:?}")]
    InvalidTarget(String),

    /// Anything else
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl FetchError {
    /// Error number reported to the order owner
    pub fn error_number(&self) -> &'static str {
        match self {
            FetchError::Unreachable(_) => "001",
            FetchError::InvalidResponse(_) => "002",
            FetchError::Timeout(_) => "003",
            FetchError::EmptyFile => "004",
            FetchError::InvalidTarget(_) | FetchError::Unexpected(_) => "999",
        }
    }
}

/// API error response format
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "order_not_found",
///     "message": "order error: order 42 does not exist for tenant acme"
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "validation_error")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "unauthorized" error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("unauthorized", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::Config { .. } => 400,
            Error::Order(OrderError::InvalidId { .. }) => 400,

            // 401 - every token problem is an authorization failure
            Error::Token(_) => 401,

            Error::Order(OrderError::NotFound { .. }) => 404,
            Error::NotFound(_) => 404,

            Error::Order(OrderError::AlreadyExists { .. }) => 409,

            Error::Archive(_) => 500,
            Error::Io(_) => 500,
            Error::Zip(_) => 500,
            Error::Serialization(_) => 500,
            Error::Lock(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,

            Error::Network(_) => 502,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Order(e) => match e {
                OrderError::NotFound { .. } => "order_not_found",
                OrderError::AlreadyExists { .. } => "order_exists",
                OrderError::InvalidId { .. } => "invalid_identifier",
            },
            Error::Archive(e) => match e {
                ArchiveError::Split { .. } => "split_failed",
                ArchiveError::Verify { .. } => "verify_failed",
                ArchiveError::Build { .. } => "build_failed",
            },
            Error::Token(_) => "invalid_token",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Zip(_) => "zip_error",
            Error::Serialization(_) => "serialization_error",
            Error::NotFound(_) => "not_found",
            Error::Lock(_) => "lock_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();

        // Token failures never echo the underlying reason back to the client
        let message = match &error {
            Error::Token(_) => "Invalid token".to_string(),
            other => other.to_string(),
        };

        let details = match &error {
            Error::Order(OrderError::NotFound {
                tenant_id,
                order_number,
            })
            | Error::Order(OrderError::AlreadyExists {
                tenant_id,
                order_number,
            }) => Some(serde_json::json!({
                "tenant_id": tenant_id,
                "order_number": order_number,
            })),
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({ "key": key })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn all_error_variants() -> Vec<(Error, u16, &'static str)> {
        vec![
            (
                Error::Config {
                    message: "bad value".into(),
                    key: Some("archive.max_zip_size".into()),
                },
                400,
                "config_error",
            ),
            (
                Error::Order(OrderError::InvalidId {
                    value: "..".into(),
                    reason: "path traversal".into(),
                }),
                400,
                "invalid_identifier",
            ),
            (Error::Token(TokenError::Decrypt), 401, "invalid_token"),
            (Error::Token(TokenError::SeedMismatch), 401, "invalid_token"),
            (
                Error::Order(OrderError::NotFound {
                    tenant_id: "acme".into(),
                    order_number: "42".into(),
                }),
                404,
                "order_not_found",
            ),
            (Error::NotFound("output.zip".into()), 404, "not_found"),
            (
                Error::Order(OrderError::AlreadyExists {
                    tenant_id: "acme".into(),
                    order_number: "42".into(),
                }),
                409,
                "order_exists",
            ),
            (
                Error::Archive(ArchiveError::Split {
                    reason: "entry too large".into(),
                }),
                500,
                "split_failed",
            ),
            (
                Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")),
                500,
                "io_error",
            ),
            (
                Error::Network(
                    reqwest::Client::new()
                        .get("not a url")
                        .build()
                        .unwrap_err(),
                ),
                502,
                "network_error",
            ),
            (Error::Lock("marker vanished".into()), 500, "lock_error"),
            (Error::Other("unknown".into()), 500, "internal_error"),
        ]
    }

    #[test]
    fn every_variant_maps_to_expected_status_and_code() {
        for (error, expected_status, expected_code) in all_error_variants() {
            assert_eq!(
                error.status_code(),
                expected_status,
                "error_code={expected_code} returned the wrong status"
            );
            assert_eq!(error.error_code(), expected_code);
        }
    }

    #[test]
    fn fetch_error_numbers_match_wire_codes() {
        assert_eq!(FetchError::Unreachable("dns".into()).error_number(), "001");
        assert_eq!(
            FetchError::InvalidResponse("404".into()).error_number(),
            "002"
        );
        assert_eq!(FetchError::Timeout("read".into()).error_number(), "003");
        assert_eq!(FetchError::EmptyFile.error_number(), "004");
        assert_eq!(FetchError::Unexpected("disk".into()).error_number(), "999");
        assert_eq!(FetchError::InvalidTarget("..".into()).error_number(), "999");
    }

    #[test]
    fn api_error_from_token_error_hides_reason() {
        let api: ApiError = Error::Token(TokenError::SeedMismatch).into();
        assert_eq!(api.error.code, "invalid_token");
        assert_eq!(api.error.message, "Invalid token");
        assert!(api.error.details.is_none());
    }

    #[test]
    fn api_error_from_order_not_found_has_identifiers() {
        let api: ApiError = Error::Order(OrderError::NotFound {
            tenant_id: "acme".into(),
            order_number: "42".into(),
        })
        .into();

        let details = api.error.details.expect("should have details");
        assert_eq!(details["tenant_id"], "acme");
        assert_eq!(details["order_number"], "42");
    }

    #[test]
    fn api_error_without_details_omits_details_in_json() {
        let api: ApiError = Error::Other("boom".into()).into();
        let json = serde_json::to_value(&api).unwrap();
        assert!(json["error"].get("details").is_none());
        assert_eq!(json["error"]["message"], "boom");
    }
}
