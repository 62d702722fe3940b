//! Fixed-delay retry layer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::request::{Request, Response};
use super::traits::{HttpClient, NetworkError};

/// Extra attempts after the first one.
pub const DEFAULT_RETRIES: u32 = 2;

/// Delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Retries transport errors and 5xx responses.
#[derive(Clone)]
pub struct RetryClient {
    inner: Arc<dyn HttpClient>,
    retries: u32,
    delay: Duration,
}

impl RetryClient {
    /// Wrap `inner`, retrying `retries` extra times with `delay` between attempts.
    pub fn new(inner: Arc<dyn HttpClient>, retries: u32, delay: Duration) -> Self {
        Self {
            inner,
            retries,
            delay,
        }
    }
}

#[async_trait]
impl HttpClient for RetryClient {
    async fn execute(&self, request: Request) -> Result<Response, NetworkError> {
        if !request.is_retryable() {
            return self.inner.execute(request).await;
        }

        let mut attempt = 0;
        loop {
            let last_attempt = attempt >= self.retries;
            match self.inner.execute(request.clone()).await {
                Ok(response) if response.status().is_server_error() && !last_attempt => {
                    warn!(
                        path = %request.path(),
                        status = %response.status(),
                        attempt = attempt + 1,
                        "server error, retrying"
                    );
                }
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && !last_attempt => {
                    warn!(path = %request.path(), error = %e, attempt = attempt + 1, "request failed, retrying");
                }
                Err(e) => return Err(e),
            }
            attempt += 1;
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use reqwest::header::HeaderMap;
    use reqwest::StatusCode;

    struct Scripted {
        calls: AtomicU32,
        status: StatusCode,
    }

    #[async_trait]
    impl HttpClient for Scripted {
        async fn execute(&self, _request: Request) -> Result<Response, NetworkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Response::from_parts(self.status, HeaderMap::new(), None, ""))
        }
    }

    struct Failing {
        calls: AtomicU32,
    }

    #[async_trait]
    impl HttpClient for Failing {
        async fn execute(&self, _request: Request) -> Result<Response, NetworkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(NetworkError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            )))
        }
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_returned() {
        let inner = Arc::new(Scripted {
            calls: AtomicU32::new(0),
            status: StatusCode::BAD_GATEWAY,
        });
        let client = RetryClient::new(inner.clone(), 2, Duration::ZERO);

        let response = client.execute(Request::get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transport_errors_are_retried_then_returned() {
        let inner = Arc::new(Failing {
            calls: AtomicU32::new(0),
        });
        let client = RetryClient::new(inner.clone(), 2, Duration::ZERO);

        assert!(client.execute(Request::get("/")).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_success_is_not_retried() {
        let inner = Arc::new(Scripted {
            calls: AtomicU32::new(0),
            status: StatusCode::OK,
        });
        let client = RetryClient::new(inner.clone(), 2, Duration::ZERO);

        client.execute(Request::get("/")).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_requests_are_sent_once() {
        let inner = Arc::new(Scripted {
            calls: AtomicU32::new(0),
            status: StatusCode::SERVICE_UNAVAILABLE,
        });
        let client = RetryClient::new(inner.clone(), 2, Duration::ZERO);

        client
            .execute(Request::post("/api/v0/installations").without_retry())
            .await
            .unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }
}
