//! OAuth layer: fetches and caches a UAA token, then signs every request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use super::request::{Request, Response};
use super::traits::{HttpClient, NetworkError};
use crate::target::Target;
use crate::ui::Console;

/// Attempts made to obtain a token before giving up.
pub const TOKEN_ATTEMPTS: u32 = 3;

/// Client id used for the password grant.
const OPSMAN_CLIENT_ID: &str = "opsman";

/// Tokens are refreshed this long before UAA says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(10);

/// Who we log in as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Password grant through the `opsman` client.
    Password { username: String, password: String },
    /// Client credentials grant.
    Client { id: String, secret: String },
}

impl Credentials {
    /// Pick a credential set from the global options. A client id wins.
    #[must_use]
    pub fn from_options(
        username: Option<&str>,
        password: Option<&str>,
        client_id: Option<&str>,
        client_secret: Option<&str>,
    ) -> Option<Self> {
        match (client_id.filter(|c| !c.is_empty()), username.filter(|u| !u.is_empty())) {
            (Some(id), _) => Some(Self::Client {
                id: id.to_string(),
                secret: client_secret.unwrap_or_default().to_string(),
            }),
            (None, Some(username)) => Some(Self::Password {
                username: username.to_string(),
                password: password.unwrap_or_default().to_string(),
            }),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    target: Url,
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid_for(&self, target: &Url) -> bool {
        &self.target == target && Instant::now() < self.expires_at
    }
}

/// Signs requests with a bearer token from UAA.
pub struct OAuthClient {
    inner: Arc<dyn HttpClient>,
    token_transport: Arc<dyn HttpClient>,
    target: Target,
    credentials: Option<Credentials>,
    console: Console,
    retry_delay: Duration,
    cache: Mutex<Option<CachedToken>>,
}

impl OAuthClient {
    /// Create the layer.
    ///
    /// `token_transport` talks to UAA directly; `inner` carries API requests.
    pub fn new(
        inner: Arc<dyn HttpClient>,
        token_transport: Arc<dyn HttpClient>,
        target: Target,
        credentials: Option<Credentials>,
        console: Console,
    ) -> Self {
        Self {
            inner,
            token_transport,
            target,
            credentials,
            console,
            retry_delay: Duration::from_secs(1),
            cache: Mutex::new(None),
        }
    }

    /// Delay between token attempts.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Current bearer token, fetching one if needed.
    async fn token(&self, force: bool) -> Result<String, NetworkError> {
        let mut cache = self.cache.lock().await;
        if !force {
            if let Some(cached) = cache.as_ref().filter(|c| c.is_valid_for(self.target.url())) {
                return Ok(cached.access_token.clone());
            }
        }

        let mut last_error = None;
        for attempt in 1..=TOKEN_ATTEMPTS {
            if attempt > 1 {
                self.console
                    .log(format!("Retrying, attempt {attempt} out of {TOKEN_ATTEMPTS}..."));
                tokio::time::sleep(self.retry_delay).await;
            }
            match self.fetch_token().await {
                Ok(token) => {
                    let access_token = token.access_token.clone();
                    *cache = Some(token);
                    return Ok(access_token);
                }
                Err(e) => {
                    debug!(attempt, error = %e, "token request failed");
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(NetworkError::Auth(reason)) => NetworkError::Auth(reason),
            Some(other) => NetworkError::Auth(other.to_string()),
            None => NetworkError::Auth("no attempts made".to_string()),
        })
    }

    async fn fetch_token(&self) -> Result<CachedToken, NetworkError> {
        let endpoint = self.target.token_endpoint();
        let request = Request::absolute(Method::POST, endpoint.clone()).without_retry();
        let request = match &self.credentials {
            Some(Credentials::Password { username, password }) => request.form(&[
                ("grant_type", "password"),
                ("username", username),
                ("password", password),
                ("client_id", OPSMAN_CLIENT_ID),
                ("client_secret", ""),
                ("token_format", "jwt"),
            ]),
            Some(Credentials::Client { id, secret }) => request
                .form(&[("grant_type", "client_credentials"), ("token_format", "jwt")])
                .basic_auth(id, secret),
            None => {
                return Err(NetworkError::Auth(
                    "no credentials provided, set --username/--password or --client-id/--client-secret"
                        .to_string(),
                ))
            }
        };
        let mut request = request;
        request
            .headers_mut()
            .insert(ACCEPT, HeaderValue::from_static("application/json"));

        info!(endpoint = %endpoint, "requesting token");
        let response = self.token_transport.execute(request).await?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(NetworkError::Auth(format!(
                "{endpoint}: unexpected status {status}: {}",
                body.trim()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| NetworkError::Auth(format!("{endpoint}: {e}")))?;
        if let Some(kind) = token.token_type.as_deref() {
            if !kind.eq_ignore_ascii_case("bearer") {
                return Err(NetworkError::Auth(format!(
                    "{endpoint}: unsupported token type {kind}"
                )));
            }
        }

        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600));
        Ok(CachedToken {
            target: self.target.url().clone(),
            access_token: token.access_token,
            expires_at: Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN),
        })
    }

    fn sign(request: &Request, token: &str) -> Result<Request, NetworkError> {
        let mut signed = request.clone();
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| NetworkError::Header(e.to_string()))?;
        signed.headers_mut().insert(AUTHORIZATION, value);
        Ok(signed)
    }
}

#[async_trait]
impl HttpClient for OAuthClient {
    async fn execute(&self, request: Request) -> Result<Response, NetworkError> {
        let token = self.token(false).await?;
        let response = self.inner.execute(Self::sign(&request, &token)?).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!(path = %request.path(), "token rejected, fetching a new one");
        let token = self.token(true).await?;
        self.inner.execute(Self::sign(&request, &token)?).await
    }
}
