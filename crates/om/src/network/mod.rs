//! Layered HTTP stack.
//!
//! Each layer is an [`HttpClient`] wrapping another. The authenticated
//! stack, outermost first, is trace → progress → decrypt → oauth → retry →
//! unauthenticated → base. The unauthenticated stack drops the auth layers.

mod base;
mod decrypt;
mod oauth;
mod progress;
mod request;
mod retry;
mod trace;
mod traits;
mod unauthenticated;

use std::sync::Arc;
use std::time::Duration;

pub use base::{
    BaseTransport, TransportConfig, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT_SECS,
};
pub use decrypt::{DecryptClient, SLOW_START_NOTICE, WAITING_FOR_AUTH};
pub use oauth::{Credentials, OAuthClient, TOKEN_ATTEMPTS};
pub use progress::{BarSink, ProgressClient};
pub use request::{Body, ProgressOptions, Request, Response};
pub use retry::{RetryClient, DEFAULT_RETRIES, DEFAULT_RETRY_DELAY};
pub use trace::{TraceClient, MAX_TRACED_BODY};
pub use traits::{HttpClient, NetworkError, ProgressSink};
pub use unauthenticated::UnauthenticatedClient;

use crate::target::Target;
use crate::ui::Console;

/// Everything needed to assemble both stacks.
#[derive(Debug, Clone)]
pub struct StackConfig {
    pub target: Target,
    pub credentials: Option<Credentials>,
    pub decryption_passphrase: Option<String>,
    pub transport: TransportConfig,
    pub trace: bool,
    pub retries: u32,
    pub retry_delay: Duration,
}

impl StackConfig {
    /// Config with default transport and retry settings.
    #[must_use]
    pub fn new(target: Target) -> Self {
        Self {
            target,
            credentials: None,
            decryption_passphrase: None,
            transport: TransportConfig::default(),
            trace: false,
            retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// The two client stacks handed to the API layer.
#[derive(Clone)]
pub struct ClientStack {
    pub authenticated: Arc<dyn HttpClient>,
    pub unauthenticated: Arc<dyn HttpClient>,
}

/// Assemble the authenticated and unauthenticated stacks.
///
/// # Errors
/// Returns error if the base transport cannot be built.
pub fn build(config: &StackConfig, console: &Console) -> Result<ClientStack, NetworkError> {
    let base: Arc<dyn HttpClient> = Arc::new(BaseTransport::new(&config.transport)?);

    let unauthenticated: Arc<dyn HttpClient> =
        Arc::new(UnauthenticatedClient::new(base.clone(), config.target.clone()));
    let retried: Arc<dyn HttpClient> = Arc::new(RetryClient::new(
        unauthenticated,
        config.retries,
        config.retry_delay,
    ));

    let plain: Arc<dyn HttpClient> = Arc::new(TraceClient::new(
        Arc::new(ProgressClient::new(retried.clone(), console.clone())),
        console.clone(),
        config.trace,
    ));

    let mut authenticated: Arc<dyn HttpClient> = Arc::new(
        OAuthClient::new(
            retried,
            base,
            config.target.clone(),
            config.credentials.clone(),
            console.clone(),
        )
        .with_retry_delay(config.retry_delay),
    );

    if let Some(passphrase) = config
        .decryption_passphrase
        .as_deref()
        .filter(|p| !p.is_empty())
    {
        authenticated = Arc::new(DecryptClient::new(
            authenticated,
            plain.clone(),
            passphrase,
            console.clone(),
        ));
    }

    let authenticated: Arc<dyn HttpClient> = Arc::new(TraceClient::new(
        Arc::new(ProgressClient::new(authenticated, console.clone())),
        console.clone(),
        config.trace,
    ));

    Ok(ClientStack {
        authenticated,
        unauthenticated: plain,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_authenticated_stack_signs_requests() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/uaa/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "some-token",
                "token_type": "bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v0/info"))
            .and(header("authorization", "Bearer some-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "info": {"version": "3.0.0"}
            })))
            .expect(2)
            .mount(&server)
            .await;

        let mut config = StackConfig::new(Target::parse(&server.uri(), None).unwrap());
        config.credentials = Some(Credentials::Password {
            username: "admin".into(),
            password: "secret".into(),
        });
        let (console, _) = Console::buffered();
        let stack = build(&config, &console).unwrap();

        for _ in 0..2 {
            let response = stack
                .authenticated
                .execute(Request::get("/api/v0/info"))
                .await
                .unwrap();
            assert_eq!(response.status().as_u16(), 200);
        }
    }

    #[tokio::test]
    async fn test_unauthenticated_stack_sends_no_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v0/info"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let config = StackConfig::new(Target::parse(&server.uri(), None).unwrap());
        let (console, _) = Console::buffered();
        let stack = build(&config, &console).unwrap();
        stack
            .unauthenticated
            .execute(Request::get("/api/v0/info"))
            .await
            .unwrap();

        let received = server.received_requests().await.unwrap();
        assert!(received[0].headers.get("authorization").is_none());
    }
}
