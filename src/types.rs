//! Core types for order-dl

use crate::error::{OrderError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use utoipa::ToSchema;
use uuid::Uuid;

/// Identity of an order: the `(tenant_id, order_number)` pair
///
/// Both parts are used verbatim as directory names, so construction rejects
/// anything that is not a single plain path segment.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct OrderId {
    /// Tenant owning the order
    pub tenant_id: String,
    /// Order number, unique within the tenant
    pub order_number: String,
}

impl OrderId {
    /// Create a validated order identity
    pub fn new(tenant_id: impl Into<String>, order_number: impl Into<String>) -> Result<Self> {
        let tenant_id = tenant_id.into();
        let order_number = order_number.into();
        validate_segment(&tenant_id)?;
        validate_segment(&order_number)?;
        Ok(Self {
            tenant_id,
            order_number,
        })
    }

    /// Directory of this order relative to the data directory
    pub fn relative_dir(&self) -> PathBuf {
        Path::new(&self.tenant_id).join(&self.order_number)
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.order_number)
    }
}

fn validate_segment(value: &str) -> Result<()> {
    let reason = if value.is_empty() {
        Some("must not be empty")
    } else if value == "." || value == ".." {
        Some("must not be a relative path component")
    } else if value.contains(['/', '\\']) {
        Some("must not contain path separators")
    } else if value.contains('\0') {
        Some("must not contain NUL bytes")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(OrderError::InvalidId {
            value: value.to_string(),
            reason: reason.to_string(),
        }
        .into()),
        None => Ok(()),
    }
}

/// One file to retrieve for an order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DownloadSpec {
    /// Source URL (`http`, `https` or `ftp`)
    pub url: String,
    /// Name of the file inside the order cache
    pub filename: String,
    /// Caller's line reference, echoed back in failures
    pub order_line: String,
}

/// A failed retrieval, as recorded in the run report
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FetchFailure {
    /// URL that could not be retrieved
    pub url: String,
    /// Order line of the failed spec
    pub order_line: String,
    /// Wire error number ("001".."004", "999")
    pub error_number: String,
}

/// Result record of one fulfillment run
///
/// Persisted verbatim under the order's `logs/` directory and POSTed to the
/// callback endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FulfillmentReport {
    /// Caller-supplied request id
    pub request_id: String,
    /// Order number the run belongs to
    pub order_number: String,
    /// Every spec that failed, in input order
    pub errors: Vec<FetchFailure>,
}

/// Input of one fulfillment run
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct FulfillmentJob {
    /// Caller-supplied request id
    pub request_id: String,
    /// Tenant owning the order
    pub tenant_id: String,
    /// Order number
    pub order_number: String,
    /// Files to retrieve
    pub downloads: Vec<DownloadSpec>,
    /// Skip the completion callback
    #[serde(default)]
    pub debug: bool,
}

impl FulfillmentJob {
    /// Validated identity of the order this job targets
    pub fn order_id(&self) -> Result<OrderId> {
        OrderId::new(&self.tenant_id, &self.order_number)
    }
}

/// Outcome of an archive rebuild
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArchiveSet {
    /// `output.zip`, present when the set consists of a single archive
    pub canonical: Option<PathBuf>,
    /// `output1.zip ..= outputN.zip`, present when the set has several chunks
    pub chunks: Vec<PathBuf>,
}

impl ArchiveSet {
    /// All published files, canonical first
    pub fn files(&self) -> Vec<&Path> {
        self.canonical
            .iter()
            .chain(self.chunks.iter())
            .map(PathBuf::as_path)
            .collect()
    }
}

/// A minted download link
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DownloadLink {
    /// Absolute URL carrying the token
    pub url: String,
    /// Chunk size in bytes
    pub size: u64,
}

/// Response body of a link request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DownloadLinks {
    /// One link per published chunk
    pub urls: Vec<DownloadLink>,
}

/// Unique identifier of a queued fulfillment job
pub type TaskId = Uuid;

/// Lifecycle of a queued fulfillment job
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for a worker slot
    Queued,
    /// Currently running
    Running,
    /// Finished; per-item failures are listed in the report
    Completed {
        /// The run report
        report: FulfillmentReport,
    },
    /// Aborted by a fatal error (missing order, archive failure)
    Failed {
        /// Error description
        message: String,
    },
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn order_id_accepts_plain_segments() {
        let id = OrderId::new("acme", "1042").unwrap();
        assert_eq!(id.relative_dir(), PathBuf::from("acme/1042"));
        assert_eq!(id.to_string(), "acme/1042");
    }

    #[test]
    fn order_id_rejects_traversal_and_separators() {
        for bad in ["", ".", "..", "a/b", "a\\b", "x\0y"] {
            let err = OrderId::new("acme", bad).unwrap_err();
            assert!(
                matches!(err, Error::Order(OrderError::InvalidId { .. })),
                "{bad:?} should be rejected, got {err:?}"
            );
            assert!(OrderId::new(bad, "1").is_err(), "{bad:?} as tenant");
        }
    }

    #[test]
    fn job_debug_defaults_to_false() {
        let job: FulfillmentJob = serde_json::from_str(
            r#"{"request_id":"r1","tenant_id":"t","order_number":"1","downloads":[]}"#,
        )
        .unwrap();
        assert!(!job.debug);
        assert!(job.downloads.is_empty());
    }

    #[test]
    fn report_serializes_with_wire_field_names() {
        let report = FulfillmentReport {
            request_id: "r1".into(),
            order_number: "1042".into(),
            errors: vec![FetchFailure {
                url: "http://example.invalid/a".into(),
                order_line: "3".into(),
                error_number: "001".into(),
            }],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["request_id"], "r1");
        assert_eq!(json["errors"][0]["error_number"], "001");
        assert_eq!(json["errors"][0]["order_line"], "3");
    }

    #[test]
    fn task_status_is_internally_tagged() {
        let json = serde_json::to_value(TaskStatus::Failed {
            message: "boom".into(),
        })
        .unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["message"], "boom");

        let json = serde_json::to_value(TaskStatus::Queued).unwrap();
        assert_eq!(json["state"], "queued");
    }

    #[test]
    fn archive_set_files_lists_canonical_first() {
        let set = ArchiveSet {
            canonical: Some(PathBuf::from("output.zip")),
            chunks: vec![],
        };
        assert_eq!(set.files(), vec![Path::new("output.zip")]);

        let set = ArchiveSet {
            canonical: None,
            chunks: vec![PathBuf::from("output1.zip"), PathBuf::from("output2.zip")],
        };
        assert_eq!(set.files().len(), 2);
    }
}
