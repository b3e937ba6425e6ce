//! Retrieval of order payload files
//!
//! The [`Fetcher`] parses each [`DownloadSpec`] URL, dispatches on its scheme
//! to a [`Transport`] (HTTP(S) or FTP), and runs every attempt through the
//! shared retry engine. Failures are classified into [`FetchError`] kinds and
//! collected; one bad spec never aborts the batch.

mod ftp;
mod http;

pub use ftp::FtpTransport;
pub use http::HttpTransport;

use crate::config::{NetworkConfig, RetryConfig};
use crate::error::{FetchError, Result};
use crate::retry::run_with_retry;
use crate::types::{DownloadSpec, FetchFailure};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// A protocol able to copy one remote file to a local path
#[async_trait]
pub trait Transport: Send + Sync {
    /// Retrieve `url` into `dest`, returning the number of bytes written
    ///
    /// Implementations create (or truncate) `dest` only once the source has
    /// answered positively, and remove it again if the transfer fails midway.
    async fn fetch(&self, url: &Url, dest: &Path) -> std::result::Result<u64, FetchError>;
}

/// Downloads specs into an order's cache directory
#[derive(Clone)]
pub struct Fetcher {
    http: Arc<dyn Transport>,
    ftp: Arc<dyn Transport>,
    retry: RetryConfig,
}

impl Fetcher {
    /// Build a fetcher with the stock HTTP and FTP transports
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        Ok(Self {
            http: Arc::new(HttpTransport::new(config)?),
            ftp: Arc::new(FtpTransport::new(config.timeout)),
            retry: config.retry.clone(),
        })
    }

    /// Build a fetcher from explicit transports
    pub fn with_transports(
        http: Arc<dyn Transport>,
        ftp: Arc<dyn Transport>,
        retry: RetryConfig,
    ) -> Self {
        Self { http, ftp, retry }
    }

    /// Fetch every spec into `cache_dir`, returning the failures in input order
    pub async fn fetch_all(&self, specs: &[DownloadSpec], cache_dir: &Path) -> Vec<FetchFailure> {
        let mut failures = Vec::new();

        for spec in specs {
            match self.fetch_one(spec, cache_dir).await {
                Ok(path) => {
                    tracing::info!(
                        url = %spec.url,
                        order_line = %spec.order_line,
                        path = %path.display(),
                        "Downloaded file"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        url = %spec.url,
                        order_line = %spec.order_line,
                        error_number = e.error_number(),
                        error = %e,
                        "Download failed"
                    );
                    failures.push(FetchFailure {
                        url: spec.url.clone(),
                        order_line: spec.order_line.clone(),
                        error_number: e.error_number().to_string(),
                    });
                }
            }
        }

        failures
    }

    /// Fetch one spec into `cache_dir`, returning the path of the cached file
    pub async fn fetch_one(
        &self,
        spec: &DownloadSpec,
        cache_dir: &Path,
    ) -> std::result::Result<PathBuf, FetchError> {
        let target = sanitize_target(&spec.filename)?;
        let url = Url::parse(&spec.url)
            .map_err(|e| FetchError::Unreachable(format!("malformed URL {:?}: {e}", spec.url)))?;
        let transport = self.transport_for(&url)?;
        let dest = cache_dir.join(target);

        run_with_retry(&self.retry, || {
            let transport = transport.clone();
            let url = &url;
            let dest = &dest;
            async move {
                let written = transport.fetch(url, dest).await?;
                if written == 0 {
                    discard_partial(dest).await;
                    return Err(FetchError::EmptyFile);
                }
                Ok(written)
            }
        })
        .await?;

        Ok(dest)
    }

    fn transport_for(&self, url: &Url) -> std::result::Result<Arc<dyn Transport>, FetchError> {
        match url.scheme() {
            "http" | "https" => Ok(self.http.clone()),
            "ftp" => Ok(self.ftp.clone()),
            other => Err(FetchError::Unreachable(format!(
                "unsupported scheme {other:?}"
            ))),
        }
    }
}

/// Reduce a requested filename to its final path component
///
/// Both separators are honoured regardless of platform; names that reduce to
/// nothing, `.` or `..` are rejected.
pub fn sanitize_target(filename: &str) -> std::result::Result<String, FetchError> {
    let normalized = filename.replace('\\', "/");
    let last = normalized
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .trim();

    if last.is_empty() || last == "." || last == ".." || last.contains('\0') {
        return Err(FetchError::InvalidTarget(filename.to_string()));
    }
    Ok(last.to_string())
}

/// Delete a partially written file, ignoring a file that never appeared
pub(crate) async fn discard_partial(dest: &Path) {
    if let Err(e) = tokio::fs::remove_file(dest).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %dest.display(), error = %e, "Failed to remove partial download");
    }
}
