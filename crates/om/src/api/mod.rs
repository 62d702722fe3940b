//! Typed wrappers over the Ops Manager REST API.
//!
//! Every endpoint the commands use has one method on [`Api`]. Responses
//! outside 2xx are turned into [`ApiError`] with a dump of the response so
//! operators see exactly what the appliance said.

mod certificates;
mod collections;
mod credentials;
mod diagnostic;
mod director;
mod info;
mod installations;
mod jobs;
mod products;
mod settings;
mod setup;
mod stemcells;
mod verifiers;
mod vm;

use std::fmt::Write as _;
use std::sync::Arc;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::error::{Classify, ErrorKind};
use crate::network::{ClientStack, HttpClient, NetworkError, Request, Response};

pub use certificates::{
    CertificateAuthority, DeployedCertificate, GeneratedCertificate, SslCertificate,
};
pub use collections::assign_collection_guids;
pub use credentials::Credential;
pub use diagnostic::{DiagnosticProduct, DiagnosticReport, DiagnosticStemcell};
pub use director::{DirectorDiff, DirectorProperties, ManifestDiff, NamedDiff};
pub use info::Info;
pub use installations::{
    CompletenessChecks, DeployProducts, ErrandChanges, Installation, InstallationStatus,
    PendingChange, ProductErrands,
};
pub use jobs::{Errand, ErrandState};
pub use products::{
    AvailableProduct, DeployedProduct, ProductDiff, ResponseProperty, StageOutcome,
    StagedProduct,
};
pub use settings::{LicensedProduct, SyslogSettings};
pub use setup::{Availability, IdentityProvider, SetupInput};
pub use stemcells::{ProductStemcells, StemcellAssignments, StemcellRef};
pub use verifiers::{PreDeployCheck, PreDeployReport, Verifier};
pub use vm::{VmExtension, VmType};

/// Errors raised by the API layer.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The request never produced a response.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// The appliance answered 404.
    #[error("request failed: unexpected response from {path}:\n{dump}")]
    NotFound { path: String, dump: String },

    /// A certificate operation was refused in the resource's current state.
    #[error("request failed: unexpected response from {path}:\n{dump}")]
    Conflict { path: String, dump: String },

    /// Any other non-2xx status.
    #[error("request failed: unexpected response from {path}:\n{dump}")]
    Unexpected { path: String, dump: String },

    /// A 2xx response whose body could not be decoded.
    #[error("could not unmarshal {what} response: {reason}")]
    Decode { what: String, reason: String },

    /// The requested product is missing from available products.
    #[error("cannot find product {name} {version}")]
    ProductNotAvailable { name: String, version: String },

    /// No staged product of that name.
    #[error("could not find product {0:?}: it may be invalid, not yet be staged, or be marked for deletion")]
    ProductNotStaged(String),

    /// Anything the appliance accepted syntactically but the tool rejects.
    #[error("{0}")]
    Invalid(String),
}

impl ApiError {
    /// Whether the appliance answered 404.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl Classify for ApiError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(e) => e.kind(),
            Self::NotFound { .. } | Self::ProductNotStaged(_) => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Unexpected { .. } | Self::Decode { .. } => ErrorKind::Upstream,
            Self::ProductNotAvailable { .. } => ErrorKind::ProductNotAvailable,
            Self::Invalid(_) => ErrorKind::Other,
        }
    }
}

/// How non-2xx answers are classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusPolicy {
    Plain,
    /// 409 and 422 mean the operation conflicts with current state.
    Certificate,
}

/// Client of the appliance API.
#[derive(Clone)]
pub struct Api {
    client: Arc<dyn HttpClient>,
    unauthenticated: Arc<dyn HttpClient>,
}

impl Api {
    /// Wrap both client stacks.
    #[must_use]
    pub fn new(stack: ClientStack) -> Self {
        Self {
            client: stack.authenticated,
            unauthenticated: stack.unauthenticated,
        }
    }

    /// Send a request through the authenticated stack without checking status.
    pub async fn send(&self, request: Request) -> Result<Response, ApiError> {
        debug!(method = %request.method(), path = %request.path(), "api request");
        Ok(self.client.execute(request).await?)
    }

    /// Send through the unauthenticated stack without checking status.
    pub async fn send_unauthenticated(&self, request: Request) -> Result<Response, ApiError> {
        debug!(method = %request.method(), path = %request.path(), "unauthenticated api request");
        Ok(self.unauthenticated.execute(request).await?)
    }

    async fn expect_ok(&self, request: Request) -> Result<Response, ApiError> {
        let path = request.path().to_string();
        let response = self.send(request).await?;
        check(response, &path, StatusPolicy::Plain).await
    }

    async fn expect_ok_with(
        &self,
        request: Request,
        policy: StatusPolicy,
    ) -> Result<Response, ApiError> {
        let path = request.path().to_string();
        let response = self.send(request).await?;
        check(response, &path, policy).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.expect_ok(Request::get(path)).await?;
        decode(response, path).await
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<Response, ApiError> {
        let request = Request::new(method, path).json(body)?;
        self.expect_ok(request).await
    }
}

/// Decode a JSON body, naming the endpoint on failure.
async fn decode<T: DeserializeOwned>(response: Response, what: &str) -> Result<T, ApiError> {
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| ApiError::Decode {
        what: what.to_string(),
        reason: e.to_string(),
    })
}

/// Map a response onto success or an [`ApiError`] carrying its dump.
async fn check(response: Response, path: &str, policy: StatusPolicy) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let dump = dump_response(response).await;
    let path = path.to_string();
    Err(match status {
        StatusCode::NOT_FOUND => ApiError::NotFound { path, dump },
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY
            if policy == StatusPolicy::Certificate =>
        {
            ApiError::Conflict { path, dump }
        }
        _ => ApiError::Unexpected { path, dump },
    })
}

/// Render a response the way an HTTP/1.1 wire dump reads.
pub(crate) async fn dump_response(response: Response) -> String {
    let status = response.status();
    let mut dump = format!(
        "HTTP/1.1 {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default()
    );
    for (name, value) in response.headers() {
        let _ = write!(
            dump,
            "\n{}: {}",
            canonical_header(name.as_str()),
            value.to_str().unwrap_or("")
        );
    }
    let body = response.text().await.unwrap_or_default();
    let _ = write!(dump, "\n\n{body}");
    dump
}

fn canonical_header(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
