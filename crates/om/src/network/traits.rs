//! HTTP layer trait and common error type.

use async_trait::async_trait;
use thiserror::Error;

use super::request::{Request, Response};
use crate::error::{Classify, ErrorKind};
use crate::target::TargetError;

/// Errors raised by the transport layers.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Target URL problems.
    #[error(transparent)]
    Target(#[from] TargetError),

    /// The token endpoint did not hand out a token.
    #[error("token could not be retrieved from target url: {0}")]
    Auth(String),

    /// The unlock endpoint rejected the passphrase.
    #[error("could not unlock ops manager, check if the decryption passphrase is correct")]
    Unlock,

    /// The unlock endpoint could not be reached.
    #[error("could not unlock ops manager: {0}")]
    UnlockUnavailable(String),

    /// Readiness polling was redirected to the setup page.
    #[error("ops manager is not configured, run one of the configure-*-authentication commands first")]
    NotConfigured,

    /// Readiness polling answered something unexpected.
    #[error("could not determine ops manager availability: {0}")]
    Availability(String),

    /// A request reached the base transport without an absolute URL.
    #[error("request to {0} has no target url")]
    NoUrl(String),

    /// Invalid header name or value.
    #[error("invalid header: {0}")]
    Header(String),

    /// Invalid TLS material.
    #[error("could not load CA certificate: {0}")]
    Certificate(String),

    /// Request body could not be encoded.
    #[error("could not encode request body: {0}")]
    Encode(#[from] serde_json::Error),

    /// Response body could not be decoded.
    #[error("could not parse json: {0}")]
    Decode(String),

    /// Local I/O while streaming a body.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetworkError {
    /// Whether another attempt might succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            Self::Io(_) => true,
            _ => false,
        }
    }
}

impl Classify for NetworkError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Target(e) => e.kind(),
            Self::Auth(_) => ErrorKind::AuthFailure,
            Self::Unlock | Self::UnlockUnavailable(_) | Self::NotConfigured => {
                ErrorKind::UnlockFailed
            }
            Self::NoUrl(_) => ErrorKind::InvalidTarget,
            Self::Http(_) | Self::Availability(_) | Self::Decode(_) => ErrorKind::Upstream,
            Self::Header(_) | Self::Certificate(_) | Self::Encode(_) | Self::Io(_) => {
                ErrorKind::Other
            }
        }
    }
}

/// One layer of the HTTP stack. Every wrapper has exactly this shape.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send a request and produce a response.
    async fn execute(&self, request: Request) -> Result<Response, NetworkError>;
}

/// Observer fed with byte counts as bodies stream through the stack.
///
/// Sinks only count; they never see or alter the bytes.
pub trait ProgressSink: Send + Sync {
    /// A transfer of `total` bytes (if known) is starting.
    fn start(&self, total: Option<u64>);
    /// `bytes` more bytes went through.
    fn advance(&self, bytes: u64);
    /// The transfer finished.
    fn finish(&self);
}
