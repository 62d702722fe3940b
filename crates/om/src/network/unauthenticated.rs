//! Layer that points relative requests at the appliance.

use std::sync::Arc;

use async_trait::async_trait;

use super::request::{Request, Response};
use super::traits::{HttpClient, NetworkError};
use crate::target::Target;

/// Resolves each request's path against the target URL.
#[derive(Clone)]
pub struct UnauthenticatedClient {
    inner: Arc<dyn HttpClient>,
    target: Target,
}

impl UnauthenticatedClient {
    /// Wrap `inner` so requests go to `target`.
    pub fn new(inner: Arc<dyn HttpClient>, target: Target) -> Self {
        Self { inner, target }
    }
}

#[async_trait]
impl HttpClient for UnauthenticatedClient {
    async fn execute(&self, mut request: Request) -> Result<Response, NetworkError> {
        if request.url().is_none() {
            let url = self.target.resolve(request.path());
            request.set_url(url);
        }
        self.inner.execute(request).await
    }
}
