//! Decrypt layer: unlocks an encrypted appliance before the first request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::request::{Request, Response};
use super::traits::{HttpClient, NetworkError};
use crate::ui::Console;

/// Attempts at the unlock endpoint when it times out.
const UNLOCK_ATTEMPTS: u32 = 3;

/// Body text served while UAA is still booting.
pub const WAITING_FOR_AUTH: &str = "Waiting for authentication system to start...";

/// Notice printed once the wait starts to drag.
pub const SLOW_START_NOTICE: &str =
    "Waiting for Ops Manager's auth systems to start. This may take a few minutes...";

/// Unlocks the appliance once per process, then delegates.
pub struct DecryptClient {
    inner: Arc<dyn HttpClient>,
    unauthenticated: Arc<dyn HttpClient>,
    passphrase: String,
    console: Console,
    poll_interval: Duration,
    unlocked: OnceCell<()>,
}

impl DecryptClient {
    /// Create the layer.
    pub fn new(
        inner: Arc<dyn HttpClient>,
        unauthenticated: Arc<dyn HttpClient>,
        passphrase: impl Into<String>,
        console: Console,
    ) -> Self {
        Self {
            inner,
            unauthenticated,
            passphrase: passphrase.into(),
            console,
            poll_interval: Duration::from_secs(1),
            unlocked: OnceCell::new(),
        }
    }

    /// Interval between readiness polls.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn unlock(&self) -> Result<(), NetworkError> {
        let body = json!({ "passphrase": self.passphrase });

        let mut response = None;
        for attempt in 1..=UNLOCK_ATTEMPTS {
            let request = Request::put("/api/v0/unlock").json(&body)?.without_retry();
            match self.unauthenticated.execute(request).await {
                Ok(r) => {
                    response = Some(r);
                    break;
                }
                Err(NetworkError::Http(e)) if e.is_timeout() && attempt < UNLOCK_ATTEMPTS => {
                    debug!(attempt, "unlock timed out, retrying");
                }
                Err(e) => return Err(NetworkError::UnlockUnavailable(e.to_string())),
            }
        }

        let response = response
            .ok_or_else(|| NetworkError::UnlockUnavailable("unlock endpoint timed out".into()))?;
        if response.status() != StatusCode::OK {
            debug!(status = %response.status(), "unlock rejected");
            return Err(NetworkError::Unlock);
        }

        info!("ops manager unlocked, waiting for authentication system");
        self.wait_for_availability().await
    }

    async fn wait_for_availability(&self) -> Result<(), NetworkError> {
        let mut polls = 0u32;
        loop {
            let response = self
                .unauthenticated
                .execute(Request::get("/login/ensure_availability"))
                .await?;
            let status = response.status();

            if status.is_redirection() {
                let location = response.location().unwrap_or_default().to_string();
                if location.contains("/auth/cloudfoundry") {
                    return Ok(());
                }
                if location.contains("/setup") {
                    return Err(NetworkError::NotConfigured);
                }
                return Err(NetworkError::Availability(format!(
                    "unexpected redirect to {location}"
                )));
            }

            let body = response.text().await?;
            if status != StatusCode::OK || !body.contains(WAITING_FOR_AUTH) {
                return Err(NetworkError::Availability(format!(
                    "unexpected response {status}"
                )));
            }

            polls += 1;
            if polls == 2 {
                self.console.log(SLOW_START_NOTICE);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl HttpClient for DecryptClient {
    async fn execute(&self, request: Request) -> Result<Response, NetworkError> {
        self.unlocked.get_or_try_init(|| self.unlock()).await?;
        self.inner.execute(request).await
    }
}
