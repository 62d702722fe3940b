//! Request and response values passed between the layers.
//!
//! Request bodies are always re-creatable (plain bytes or a multipart form
//! that re-opens its file parts), so any layer may send a request twice.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use url::Url;

use super::traits::{NetworkError, ProgressSink};
use crate::formcontent::Form;

/// Request payload.
#[derive(Clone, Default)]
pub enum Body {
    /// No body.
    #[default]
    Empty,
    /// In-memory body.
    Bytes(Bytes),
    /// Streamed multipart form.
    Form(Arc<Form>),
}

impl Body {
    /// Length in bytes, if there is a body.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        match self {
            Self::Empty => None,
            Self::Bytes(b) => Some(b.len() as u64),
            Self::Form(f) => Some(f.content_length()),
        }
    }

    /// Bytes of an in-memory body.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Body for one send. An observer is restarted here so every attempt
    /// counts from zero.
    pub(crate) fn into_reqwest(
        self,
        observer: Option<Arc<dyn ProgressSink>>,
    ) -> Option<reqwest::Body> {
        if let Some(sink) = &observer {
            sink.start(self.content_length());
        }
        match (self, observer) {
            (Self::Empty, _) => None,
            (Self::Bytes(bytes), None) => Some(reqwest::Body::from(bytes)),
            (Self::Bytes(bytes), Some(sink)) => {
                let stream = futures::stream::once(async move {
                    sink.advance(bytes.len() as u64);
                    Ok::<Bytes, std::io::Error>(bytes)
                });
                Some(reqwest::Body::wrap_stream(stream))
            }
            (Self::Form(form), observer) => {
                let stream = form.stream().inspect_ok(move |chunk| {
                    if let Some(sink) = &observer {
                        sink.advance(chunk.len() as u64);
                    }
                });
                Some(reqwest::Body::wrap_stream(stream))
            }
        }
    }
}

/// Options for requests that render progress.
#[derive(Debug, Clone, Copy)]
pub struct ProgressOptions {
    /// How often the liveness ticker prints while waiting.
    pub tick_interval: Duration,
}

impl Default for ProgressOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// A request travelling through the stack.
#[derive(Clone)]
pub struct Request {
    method: Method,
    path: String,
    url: Option<Url>,
    headers: HeaderMap,
    body: Body,
    retry: bool,
    progress: Option<ProgressOptions>,
    observer: Option<Arc<dyn ProgressSink>>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl Request {
    /// Request for a path relative to the appliance target.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            url: None,
            headers: HeaderMap::new(),
            body: Body::Empty,
            retry: true,
            progress: None,
            observer: None,
        }
    }

    /// Request for an absolute URL (token endpoint, blob stores).
    #[must_use]
    pub fn absolute(method: Method, url: Url) -> Self {
        let mut request = Self::new(method, url.path().to_string());
        request.url = Some(url);
        request
    }

    /// `GET path`.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// `POST path`.
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// `PUT path`.
    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// `PATCH path`.
    #[must_use]
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    /// `DELETE path`.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body.
    ///
    /// # Errors
    /// Returns error if the value cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, NetworkError> {
        let bytes = serde_json::to_vec(value)?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Body::Bytes(Bytes::from(bytes));
        Ok(self)
    }

    /// Attach a raw JSON document.
    #[must_use]
    pub fn raw_json(mut self, json: impl Into<Bytes>) -> Self {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Body::Bytes(json.into());
        self
    }

    /// Attach an `application/x-www-form-urlencoded` body.
    #[must_use]
    pub fn form(mut self, pairs: &[(&str, &str)]) -> Self {
        let encoded = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        self.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        self.body = Body::Bytes(Bytes::from(encoded));
        self
    }

    /// Attach a multipart form.
    #[must_use]
    pub fn multipart(mut self, form: Form) -> Self {
        if let Ok(value) = HeaderValue::from_str(&form.content_type()) {
            self.headers.insert(CONTENT_TYPE, value);
        }
        self.body = Body::Form(Arc::new(form));
        self
    }

    /// Attach any body.
    #[must_use]
    pub fn body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Add a header.
    ///
    /// # Errors
    /// Returns error if the name or value is not valid HTTP.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, NetworkError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| NetworkError::Header(format!("{name}: {e}")))?;
        let value =
            HeaderValue::from_str(value).map_err(|e| NetworkError::Header(format!("{name}: {e}")))?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Set HTTP basic authentication.
    #[must_use]
    pub fn basic_auth(mut self, user: &str, password: &str) -> Self {
        let token = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
        if let Ok(value) = HeaderValue::from_str(&format!("Basic {token}")) {
            self.headers.insert(AUTHORIZATION, value);
        }
        self
    }

    /// Set a bearer token.
    #[must_use]
    pub fn bearer(mut self, token: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
            self.headers.insert(AUTHORIZATION, value);
        }
        self
    }

    /// Never retry this request.
    #[must_use]
    pub fn without_retry(mut self) -> Self {
        self.retry = false;
        self
    }

    /// Render progress for this request.
    #[must_use]
    pub fn with_progress(mut self, options: ProgressOptions) -> Self {
        self.progress = Some(options);
        self
    }

    /// HTTP method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path (and query) relative to the target.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Absolute URL, once resolved.
    #[must_use]
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// Headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Body.
    #[must_use]
    pub fn payload(&self) -> &Body {
        &self.body
    }

    /// Whether retry layers may resend this request.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retry
    }

    /// Progress options, if progress was requested.
    #[must_use]
    pub fn progress(&self) -> Option<ProgressOptions> {
        self.progress
    }

    pub(crate) fn set_url(&mut self, url: Url) {
        self.url = Some(url);
    }

    pub(crate) fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub(crate) fn set_observer(&mut self, sink: Arc<dyn ProgressSink>) {
        self.observer = Some(sink);
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        Method,
        Option<Url>,
        HeaderMap,
        Body,
        Option<Arc<dyn ProgressSink>>,
    ) {
        (self.method, self.url, self.headers, self.body, self.observer)
    }
}

enum ResponseBody {
    Stream(reqwest::Response),
    Buffered(Option<Bytes>),
}

/// A response travelling back up the stack.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    url: Option<Url>,
    body: ResponseBody,
    observer: Option<Arc<dyn ProgressSink>>,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl Response {
    pub(crate) fn from_reqwest(response: reqwest::Response) -> Self {
        Self {
            status: response.status(),
            headers: response.headers().clone(),
            url: Some(response.url().clone()),
            body: ResponseBody::Stream(response),
            observer: None,
        }
    }

    /// Response with an in-memory body.
    #[must_use]
    pub fn from_parts(
        status: StatusCode,
        headers: HeaderMap,
        url: Option<Url>,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            status,
            headers,
            url,
            body: ResponseBody::Buffered(Some(body.into())),
            observer: None,
        }
    }

    /// Status code.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// URL that produced this response.
    #[must_use]
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// `Location` header of a redirect.
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
    }

    /// Declared `Content-Length`.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }

    /// Report body chunks to `sink` as they are read.
    #[must_use]
    pub fn observe(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        sink.start(self.content_length());
        self.observer = Some(sink);
        self
    }

    /// Next chunk of the body.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, NetworkError> {
        let chunk = match &mut self.body {
            ResponseBody::Stream(response) => response.chunk().await?,
            ResponseBody::Buffered(bytes) => bytes.take(),
        };
        if let Some(sink) = &self.observer {
            match &chunk {
                Some(c) => sink.advance(c.len() as u64),
                None => sink.finish(),
            }
        }
        Ok(chunk)
    }

    /// Whole body.
    pub async fn bytes(mut self) -> Result<Bytes, NetworkError> {
        if self.observer.is_none() {
            return match self.body {
                ResponseBody::Stream(response) => Ok(response.bytes().await?),
                ResponseBody::Buffered(bytes) => Ok(bytes.unwrap_or_default()),
            };
        }
        let mut buffer = Vec::new();
        while let Some(chunk) = self.chunk().await? {
            buffer.extend_from_slice(&chunk);
        }
        Ok(Bytes::from(buffer))
    }

    /// Whole body as text.
    pub async fn text(self) -> Result<String, NetworkError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Whole body decoded as JSON.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, NetworkError> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| NetworkError::Decode(e.to_string()))
    }

    /// Stream the body into `writer`, returning the byte count.
    pub async fn copy_to<W: AsyncWrite + Unpin>(mut self, writer: &mut W) -> Result<u64, NetworkError> {
        let mut written = 0u64;
        while let Some(chunk) = self.chunk().await? {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }

    /// Body as a stream of chunks.
    pub fn into_stream(self) -> impl futures::Stream<Item = Result<Bytes, NetworkError>> {
        futures::stream::try_unfold(self, |mut response| async move {
            Ok(response.chunk().await?.map(|chunk| (chunk, response)))
        })
        .boxed()
    }
}
