//! Completion callbacks
//!
//! After each non-debug run the report is POSTed as JSON to the configured
//! endpoint. Delivery is retried with the network retry budget and then
//! abandoned; a lost callback never fails the run.

use crate::config::{CallbackConfig, RetryConfig};
use crate::retry::{IsRetryable, run_with_retry};
use crate::types::FulfillmentReport;
use std::time::Duration;

/// Why a single delivery attempt failed
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    /// The request could not be sent or timed out
    #[error("failed to send callback: {0}")]
    Send(String),

    /// The endpoint answered with a non-success status
    #[error("callback returned status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, for the log
        body: String,
    },
}

/// Every delivery failure is worth another attempt
impl IsRetryable for CallbackError {
    fn is_retryable(&self) -> bool {
        true
    }
}

/// Sends run reports to the callback endpoint
#[derive(Clone, Debug)]
pub struct CallbackClient {
    client: reqwest::Client,
    url: Option<String>,
    auth_header: Option<String>,
    timeout: Duration,
    retry: RetryConfig,
}

impl CallbackClient {
    /// Client for the configured endpoint; without a URL every send is a no-op
    pub fn new(config: &CallbackConfig, retry: RetryConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.url.clone(),
            auth_header: config.auth_header.clone(),
            timeout: config.timeout,
            retry,
        }
    }

    /// Whether an endpoint is configured
    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    /// Deliver `report`, retrying failed attempts; returns whether it was accepted
    pub async fn send(&self, report: &FulfillmentReport) -> bool {
        let Some(url) = self.url.as_deref() else {
            return false;
        };

        let result = run_with_retry(&self.retry, || self.attempt(url, report)).await;

        match result {
            Ok(()) => {
                tracing::debug!(
                    url = %url,
                    request_id = %report.request_id,
                    "callback sent successfully"
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    url = %url,
                    request_id = %report.request_id,
                    error = %e,
                    "callback abandoned"
                );
                false
            }
        }
    }

    async fn attempt(&self, url: &str, report: &FulfillmentReport) -> Result<(), CallbackError> {
        let mut request = self.client.post(url).json(report).timeout(self.timeout);

        if let Some(auth) = &self.auth_header {
            request = request.header("Authorization", auth);
        }

        match tokio::time::timeout(self.timeout, request.send()).await {
            Ok(Ok(response)) if response.status().is_success() => Ok(()),
            Ok(Ok(response)) => Err(CallbackError::Status {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
            Ok(Err(e)) => Err(CallbackError::Send(e.to_string())),
            Err(_) => Err(CallbackError::Send(format!(
                "no response within {}s",
                self.timeout.as_secs_f64()
            ))),
        }
    }
}
