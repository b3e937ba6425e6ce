//! HTTP(S) transport

use super::{Transport, discard_partial};
use crate::config::NetworkConfig;
use crate::error::{FetchError, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use url::Url;

/// Streams HTTP(S) responses to disk
///
/// The connect phase and every body read are bounded by the network timeout;
/// the transfer as a whole is not, so large files on slow links still finish.
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Build the transport from network settings
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        if config.accept_invalid_certs {
            tracing::debug!("TLS certificate verification disabled for source downloads");
        }

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .connect_timeout(config.timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self {
            client,
            timeout: config.timeout,
        })
    }

    async fn stream_to_file(
        &self,
        mut response: reqwest::Response,
        dest: &Path,
    ) -> std::result::Result<u64, FetchError> {
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| FetchError::Unexpected(format!("cannot create {}: {e}", dest.display())))?;
        let mut written = 0u64;

        loop {
            let chunk = match tokio::time::timeout(self.timeout, response.chunk()).await {
                Ok(Ok(Some(chunk))) => chunk,
                Ok(Ok(None)) => break,
                Ok(Err(e)) => return Err(classify(e)),
                Err(_) => {
                    return Err(FetchError::Timeout(format!(
                        "no data for {}s while reading body",
                        self.timeout.as_secs_f64()
                    )));
                }
            };
            file.write_all(&chunk)
                .await
                .map_err(|e| FetchError::Unexpected(format!("write failed: {e}")))?;
            written += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| FetchError::Unexpected(format!("flush failed: {e}")))?;
        Ok(written)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &Url, dest: &Path) -> std::result::Result<u64, FetchError> {
        let request = self.client.get(url.clone()).send();
        let response = match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(classify(e)),
            Err(_) => {
                return Err(FetchError::Timeout(format!(
                    "no response within {}s",
                    self.timeout.as_secs_f64()
                )));
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::InvalidResponse(format!("HTTP {status}")));
        }

        let result = self.stream_to_file(response, dest).await;
        if result.is_err() {
            discard_partial(dest).await;
        }
        result
    }
}

/// Map a reqwest failure onto the fetch error taxonomy
fn classify(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(e.to_string())
    } else if e.is_connect() || e.is_builder() {
        FetchError::Unreachable(e.to_string())
    } else if e.is_status() {
        FetchError::InvalidResponse(e.to_string())
    } else {
        FetchError::Unexpected(e.to_string())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn sends_browser_like_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .and(header_exists("user-agent"))
            .and(header_exists("accept-language"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"abc".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let transport = HttpTransport::new(&NetworkConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/a", server.uri())).unwrap();
        let written = transport.fetch(&url, &dir.path().join("a")).await.unwrap();
        assert_eq!(written, 3);
    }

    #[tokio::test]
    async fn server_error_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let transport = HttpTransport::new(&NetworkConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/x", server.uri())).unwrap();
        let err = transport.fetch(&url, &dir.path().join("x")).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidResponse(_)));
        assert!(!dir.path().join("x").exists());
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        let dir = tempdir().unwrap();
        let transport = HttpTransport::new(&NetworkConfig {
            timeout: Duration::from_secs(2),
            ..NetworkConfig::default()
        })
        .unwrap();
        let url = Url::parse("http://127.0.0.1:1/x").unwrap();
        let err = transport.fetch(&url, &dir.path().join("x")).await.unwrap_err();
        assert!(matches!(err, FetchError::Unreachable(_)), "{err:?}");
    }
}
