//! HTTP client plumbing shared by both collectors
//!
//! Provides:
//! - Client construction with connect/read timeouts and optional CA pinning
//! - Bounded retry with exponential backoff for transient transport failures
//!
//! Only connection failures and timeouts are retried. A response with any
//! status code, including 4xx/5xx, is returned to the caller as is.

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Upper bound for a single backoff sleep
const BACKOFF_MAX: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("failed to read CA certificate {path:?}: {source}")]
    Certificate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

/// How server certificates are checked
#[derive(Debug, Clone)]
pub enum TlsVerification {
    /// System roots plus an optional extra CA file
    Verify { ca_path: Option<PathBuf> },
    /// Accept any certificate
    Insecure,
}

/// Status and body of a completed exchange
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Timeouts and retry policy of an outgoing HTTP session
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub max_retries: u32,
    /// Seconds; retry n sleeps `backoff_factor * 2^(n-1)`
    pub backoff_factor: f64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(12),
            max_retries: 3,
            backoff_factor: 1.0,
        }
    }
}

impl HttpSettings {
    /// Build a reqwest client honouring the timeouts and TLS policy
    pub fn build_client(&self, tls: &TlsVerification) -> Result<reqwest::Client, TransportError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .read_timeout(self.read_timeout);

        match tls {
            TlsVerification::Verify { ca_path: Some(path) } => {
                builder = builder.add_root_certificate(load_certificate(path)?);
            }
            TlsVerification::Verify { ca_path: None } => {}
            TlsVerification::Insecure => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder.build().map_err(TransportError::Build)
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let secs = self.backoff_factor * 2f64.powi(exponent);
        if !secs.is_finite() || secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(secs).min(BACKOFF_MAX)
    }

    /// Send the request built by `request`, retrying transient failures.
    ///
    /// `request` is invoked once per attempt because a reqwest builder is
    /// consumed by `send`.
    pub async fn send_with_retry<F>(&self, request: F) -> Result<RawResponse, TransportError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            match send_once(request()).await {
                Ok(response) => return Ok(response),
                Err(e) if is_transient(&e) && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        "Transient HTTP failure ({}), retry {}/{} in {:?}",
                        e, attempt, self.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(TransportError::Request(e)),
            }
        }
    }
}

async fn send_once(request: reqwest::RequestBuilder) -> Result<RawResponse, reqwest::Error> {
    let response = request.send().await?;
    let status = response.status().as_u16();
    let body = response.bytes().await?;
    debug!("HTTP {} ({} bytes)", status, body.len());
    Ok(RawResponse { status, body: body.to_vec() })
}

fn is_transient(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout()
}

fn load_certificate(path: &Path) -> Result<reqwest::Certificate, TransportError> {
    let pem = std::fs::read(path).map_err(|source| TransportError::Certificate {
        path: path.to_path_buf(),
        source,
    })?;
    reqwest::Certificate::from_pem(&pem).map_err(TransportError::Build)
}
