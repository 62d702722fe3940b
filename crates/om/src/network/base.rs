//! Base transport: the only layer that touches the wire.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Certificate, Client};
use tracing::debug;

use super::request::{Request, Response};
use super::traits::{HttpClient, NetworkError};

/// Default TCP connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default whole-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 1800;

/// TLS and timeout settings of the base transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Accept any server certificate.
    pub skip_ssl_validation: bool,
    /// PEM bundle, given inline or as a path to a file.
    pub ca_cert: Option<String>,
    /// Bound on TCP establishment.
    pub connect_timeout: Duration,
    /// Bound on each HTTP call.
    pub request_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            skip_ssl_validation: false,
            ca_cert: None,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// reqwest-backed transport. Redirects are returned, not followed.
#[derive(Clone)]
pub struct BaseTransport {
    client: Client,
}

impl BaseTransport {
    /// Build the transport.
    ///
    /// # Errors
    /// Returns error if the CA bundle is unreadable or the client cannot be built.
    pub fn new(config: &TransportConfig) -> Result<Self, NetworkError> {
        let mut builder = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .danger_accept_invalid_certs(config.skip_ssl_validation);

        if let Some(ca_cert) = config.ca_cert.as_deref().filter(|c| !c.trim().is_empty()) {
            for certificate in load_certificates(ca_cert)? {
                builder = builder.add_root_certificate(certificate);
            }
        }

        Ok(Self {
            client: builder.build()?,
        })
    }
}

fn load_certificates(ca_cert: &str) -> Result<Vec<Certificate>, NetworkError> {
    let pem = if ca_cert.contains("-----BEGIN") {
        ca_cert.as_bytes().to_vec()
    } else {
        std::fs::read(ca_cert)
            .map_err(|e| NetworkError::Certificate(format!("could not read {ca_cert}: {e}")))?
    };
    let certificates = Certificate::from_pem_bundle(&pem)
        .map_err(|e| NetworkError::Certificate(e.to_string()))?;
    if certificates.is_empty() {
        return Err(NetworkError::Certificate(
            "no certificates found in provided CA bundle".to_string(),
        ));
    }
    Ok(certificates)
}

#[async_trait]
impl HttpClient for BaseTransport {
    async fn execute(&self, request: Request) -> Result<Response, NetworkError> {
        let path = request.path().to_string();
        let (method, url, headers, body, observer) = request.into_parts();
        let url = url.ok_or(NetworkError::NoUrl(path))?;
        debug!(method = %method, url = %url, "sending request");

        let length = body.content_length();
        let mut builder = self.client.request(method, url).headers(headers);
        if let Some(length) = length {
            builder = builder.header(CONTENT_LENGTH, length);
        }
        if let Some(body) = body.into_reqwest(observer) {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        debug!(status = %response.status(), "received response");
        Ok(Response::from_reqwest(response))
    }
}
