//! Trace layer: dumps requests and responses to the log sink.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;

use super::request::{Body, Request, Response};
use super::traits::{HttpClient, NetworkError};
use crate::ui::Console;

/// Bodies at or above this size are elided from dumps.
pub const MAX_TRACED_BODY: u64 = 1024 * 1024;

/// Dumps traffic when enabled, otherwise delegates untouched.
pub struct TraceClient {
    inner: Arc<dyn HttpClient>,
    console: Console,
    enabled: bool,
}

impl TraceClient {
    /// Create the layer.
    pub fn new(inner: Arc<dyn HttpClient>, console: Console, enabled: bool) -> Self {
        Self {
            inner,
            console,
            enabled,
        }
    }
}

fn write_headers(dump: &mut String, headers: &HeaderMap) {
    for (name, value) in headers {
        let _ = writeln!(dump, "{}: {}", name, value.to_str().unwrap_or("<binary>"));
    }
}

fn dump_request(request: &Request) -> String {
    let mut dump = String::new();
    let _ = writeln!(dump, "{} {} HTTP/1.1", request.method(), request.path());
    write_headers(&mut dump, request.headers());
    dump.push('\n');
    match request.payload() {
        Body::Empty => {}
        Body::Bytes(bytes) if (bytes.len() as u64) < MAX_TRACED_BODY => {
            dump.push_str(&String::from_utf8_lossy(bytes));
            dump.push('\n');
        }
        body => {
            let _ = writeln!(
                dump,
                "[{} byte body omitted]",
                body.content_length().unwrap_or_default()
            );
        }
    }
    dump
}

#[async_trait]
impl HttpClient for TraceClient {
    async fn execute(&self, request: Request) -> Result<Response, NetworkError> {
        if !self.enabled {
            return self.inner.execute(request).await;
        }

        self.console.log_bytes(dump_request(&request).as_bytes());
        let response = self.inner.execute(request).await?;

        let mut dump = String::new();
        let status = response.status();
        let _ = writeln!(
            dump,
            "HTTP/1.1 {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or_default()
        );
        write_headers(&mut dump, response.headers());
        dump.push('\n');

        let small = response
            .content_length()
            .is_some_and(|length| length < MAX_TRACED_BODY);
        if !small {
            dump.push_str("[response body not traced]\n");
            self.console.log_bytes(dump.as_bytes());
            return Ok(response);
        }

        let headers = response.headers().clone();
        let url = response.url().cloned();
        let body = response.bytes().await?;
        dump.push_str(&String::from_utf8_lossy(&body));
        dump.push('\n');
        self.console.log_bytes(dump.as_bytes());
        Ok(Response::from_parts(status, headers, url, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use reqwest::header::{HeaderValue, CONTENT_LENGTH};
    use reqwest::StatusCode;

    struct Echo;

    #[async_trait]
    impl HttpClient for Echo {
        async fn execute(&self, _request: Request) -> Result<Response, NetworkError> {
            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_LENGTH, HeaderValue::from_static("15"));
            Ok(Response::from_parts(
                StatusCode::OK,
                headers,
                None,
                Bytes::from_static(b"{\"info\":\"3.0\"}\n"),
            ))
        }
    }

    #[tokio::test]
    async fn test_trace_dumps_both_directions() {
        let (console, captured) = Console::buffered();
        let client = TraceClient::new(Arc::new(Echo), console, true);

        let request = Request::put("/api/v0/staged/director/properties")
            .raw_json(r#"{"a":1}"#);
        let response = client.execute(request).await.unwrap();
        assert_eq!(response.text().await.unwrap(), "{\"info\":\"3.0\"}\n");

        let log = captured.stderr();
        assert!(log.contains("PUT /api/v0/staged/director/properties HTTP/1.1"));
        assert!(log.contains("content-type: application/json"));
        assert!(log.contains(r#"{"a":1}"#));
        assert!(log.contains("HTTP/1.1 200 OK"));
        assert!(log.contains(r#"{"info":"3.0"}"#));
    }

    #[tokio::test]
    async fn test_disabled_trace_is_silent() {
        let (console, captured) = Console::buffered();
        let client = TraceClient::new(Arc::new(Echo), console, false);
        client.execute(Request::get("/api/v0/info")).await.unwrap();
        assert!(captured.stderr().is_empty());
    }
}
