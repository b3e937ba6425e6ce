//! FTP transport
//!
//! `suppaftp` is synchronous, so each transfer runs on the blocking pool.
//! Credentials come from the URL; without them the login is anonymous.

use super::{Transport, discard_partial};
use crate::error::FetchError;
use async_trait::async_trait;
use std::io::{ErrorKind, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream};
use url::Url;

const ANONYMOUS_USER: &str = "anonymous";
const ANONYMOUS_PASSWORD: &str = "anonymous@";

/// Retrieves files over plain FTP in binary mode
pub struct FtpTransport {
    timeout: Duration,
}

impl FtpTransport {
    /// Transport with the given connect/read timeout
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Everything the blocking worker needs, detached from the borrowed URL
struct FtpRequest {
    host: String,
    port: u16,
    user: String,
    password: String,
    remote_path: String,
    dest: PathBuf,
    timeout: Duration,
}

#[async_trait]
impl Transport for FtpTransport {
    async fn fetch(&self, url: &Url, dest: &Path) -> Result<u64, FetchError> {
        let request = FtpRequest::from_url(url, dest, self.timeout)?;

        let result = tokio::task::spawn_blocking(move || request.run())
            .await
            .map_err(|e| FetchError::Unexpected(format!("FTP task panicked: {e}")))?;

        if matches!(
            result,
            Err(FetchError::Timeout(_) | FetchError::Unexpected(_))
        ) {
            discard_partial(dest).await;
        }
        result
    }
}

impl FtpRequest {
    fn from_url(url: &Url, dest: &Path, timeout: Duration) -> Result<Self, FetchError> {
        let host = url
            .host_str()
            .ok_or_else(|| FetchError::Unreachable(format!("no host in {url}")))?;
        let port = url.port_or_known_default().unwrap_or(21);

        let remote_path = urlencoding::decode(url.path())
            .map_err(|e| FetchError::Unreachable(format!("bad path encoding: {e}")))?
            .into_owned();

        let user = match url.username() {
            "" => ANONYMOUS_USER.to_string(),
            name => urlencoding::decode(name)
                .map(|n| n.into_owned())
                .unwrap_or_else(|_| name.to_string()),
        };
        let password = url
            .password()
            .map(|p| {
                urlencoding::decode(p)
                    .map(|p| p.into_owned())
                    .unwrap_or_else(|_| p.to_string())
            })
            .unwrap_or_else(|| ANONYMOUS_PASSWORD.to_string());

        Ok(Self {
            host: host.to_string(),
            port,
            user,
            password,
            remote_path,
            dest: dest.to_path_buf(),
            timeout,
        })
    }

    /// Blocking name resolution; only called on the blocking pool
    fn resolve(&self) -> Result<SocketAddr, FetchError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| FetchError::Unreachable(format!("cannot resolve {}: {e}", self.host)))?
            .next()
            .ok_or_else(|| FetchError::Unreachable(format!("no address for {}", self.host)))
    }

    fn run(self) -> Result<u64, FetchError> {
        let addr = self.resolve()?;
        let mut ftp = FtpStream::connect_timeout(addr, self.timeout)
            .map_err(|e| classify(e, Phase::Connect))?;
        ftp.get_ref()
            .set_read_timeout(Some(self.timeout))
            .map_err(|e| FetchError::Unexpected(e.to_string()))?;

        ftp.login(&self.user, &self.password)
            .map_err(|e| classify(e, Phase::Session))?;
        ftp.transfer_type(FileType::Binary)
            .map_err(|e| classify(e, Phase::Session))?;

        let mut stream = ftp
            .retr_as_stream(&self.remote_path)
            .map_err(|e| classify(e, Phase::Session))?;
        stream
            .get_ref()
            .set_read_timeout(Some(self.timeout))
            .map_err(|e| FetchError::Unexpected(e.to_string()))?;

        let mut file = std::fs::File::create(&self.dest).map_err(|e| {
            FetchError::Unexpected(format!("cannot create {}: {e}", self.dest.display()))
        })?;
        let written = std::io::copy(&mut stream, &mut file).map_err(|e| match e.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => FetchError::Timeout(e.to_string()),
            _ => FetchError::Unexpected(e.to_string()),
        })?;
        file.flush()
            .map_err(|e| FetchError::Unexpected(format!("flush failed: {e}")))?;

        if let Err(e) = ftp.finalize_retr_stream(stream) {
            if let Err(rm) = std::fs::remove_file(&self.dest) {
                tracing::warn!(path = %self.dest.display(), error = %rm, "Failed to remove partial download");
            }
            return Err(classify(e, Phase::Transfer));
        }
        if let Err(e) = ftp.quit() {
            tracing::debug!(error = %e, "FTP quit failed after transfer");
        }

        Ok(written)
    }
}

#[derive(Clone, Copy)]
enum Phase {
    Connect,
    Session,
    Transfer,
}

fn classify(e: FtpError, phase: Phase) -> FetchError {
    match e {
        FtpError::ConnectionError(io)
            if matches!(io.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) =>
        {
            FetchError::Timeout(io.to_string())
        }
        FtpError::ConnectionError(io) => match phase {
            Phase::Connect | Phase::Session => FetchError::Unreachable(io.to_string()),
            Phase::Transfer => FetchError::Unexpected(io.to_string()),
        },
        FtpError::UnexpectedResponse(response) => {
            FetchError::InvalidResponse(format!("FTP reply {response:?}"))
        }
        FtpError::BadResponse => FetchError::InvalidResponse("malformed FTP reply".to_string()),
        other => FetchError::Unexpected(other.to_string()),
    }
}
