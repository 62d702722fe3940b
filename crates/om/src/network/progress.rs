//! Progress layer: upload/download bars and a liveness ticker.
//!
//! Requests that did not opt in with [`Request::with_progress`] pass
//! straight through.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use reqwest::Method;

use super::request::{Request, Response};
use super::traits::{HttpClient, NetworkError, ProgressSink};
use crate::ui::Console;

const BAR_TEMPLATE: &str = "{bytes}/{total_bytes} [{bar:40}] {percent}% {elapsed}";

/// Byte counter rendered with indicatif.
pub struct BarSink {
    bar: ProgressBar,
}

impl BarSink {
    /// Bar drawing to stderr, or hidden when stderr is not a terminal.
    #[must_use]
    pub fn new(console: &Console) -> Self {
        let target = if console.is_interactive() {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(None, target);
        if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
            bar.set_style(style.progress_chars("=> "));
        }
        Self { bar }
    }

    /// Bytes counted so far.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

impl ProgressSink for BarSink {
    fn start(&self, total: Option<u64>) {
        if let Some(total) = total {
            self.bar.set_length(total);
        }
        self.bar.set_position(0);
    }

    fn advance(&self, bytes: u64) {
        self.bar.inc(bytes);
    }

    fn finish(&self) {
        self.bar.finish();
    }
}

/// Renders progress for opted-in requests.
pub struct ProgressClient {
    inner: Arc<dyn HttpClient>,
    console: Console,
}

impl ProgressClient {
    /// Create the layer.
    pub fn new(inner: Arc<dyn HttpClient>, console: Console) -> Self {
        Self { inner, console }
    }
}

/// Aborts the ticker when the request completes or is dropped.
struct Ticker(tokio::task::JoinHandle<()>);

impl Ticker {
    fn spawn(console: Console, interval: Duration) -> Self {
        let started = Instant::now();
        Self(tokio::spawn(async move {
            let mut ticks = tokio::time::interval(interval);
            ticks.tick().await;
            loop {
                ticks.tick().await;
                console.log(format!(
                    "{}s elapsed, waiting for response from Ops Manager...",
                    started.elapsed().as_secs()
                ));
            }
        }))
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[async_trait]
impl HttpClient for ProgressClient {
    async fn execute(&self, mut request: Request) -> Result<Response, NetworkError> {
        let Some(options) = request.progress() else {
            return self.inner.execute(request).await;
        };

        if *request.method() == Method::GET {
            let response = self.inner.execute(request).await?;
            let sink: Arc<dyn ProgressSink> = Arc::new(BarSink::new(&self.console));
            return Ok(response.observe(sink));
        }

        let bar = Arc::new(BarSink::new(&self.console));
        request.set_observer(bar.clone());

        let ticker = Ticker::spawn(self.console.clone(), options.tick_interval);
        let result = self.inner.execute(request).await;
        drop(ticker);
        bar.finish();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::request::{Body, ProgressOptions};
    use bytes::Bytes;
    use reqwest::header::HeaderMap;
    use reqwest::StatusCode;

    struct Slow(Duration);

    #[async_trait]
    impl HttpClient for Slow {
        async fn execute(&self, request: Request) -> Result<Response, NetworkError> {
            tokio::time::sleep(self.0).await;
            let length = request.payload().content_length().unwrap_or_default();
            Ok(Response::from_parts(
                StatusCode::OK,
                HeaderMap::new(),
                None,
                length.to_string(),
            ))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_prints_while_waiting() {
        let (console, captured) = Console::buffered();
        let client = ProgressClient::new(Arc::new(Slow(Duration::from_millis(3500))), console);

        let request = Request::post("/api/v0/available_products")
            .body(Body::Bytes(Bytes::from_static(b"tile")))
            .with_progress(ProgressOptions {
                tick_interval: Duration::from_secs(1),
            });
        client.execute(request).await.unwrap();

        let log = captured.stderr();
        assert_eq!(
            log.matches("elapsed, waiting for response from Ops Manager...")
                .count(),
            3
        );
    }

    #[derive(Default)]
    struct Recording {
        starts: std::sync::Mutex<Vec<Option<u64>>>,
    }

    impl ProgressSink for Recording {
        fn start(&self, total: Option<u64>) {
            self.starts.lock().unwrap().push(total);
        }

        fn advance(&self, _bytes: u64) {}

        fn finish(&self) {}
    }

    #[test]
    fn test_every_send_restarts_the_observer() {
        let body = Body::Bytes(Bytes::from_static(b"tile"));
        let sink = Arc::new(Recording::default());
        for _ in 0..2 {
            let observer: Arc<dyn ProgressSink> = sink.clone();
            assert!(body.clone().into_reqwest(Some(observer)).is_some());
        }
        assert_eq!(*sink.starts.lock().unwrap(), vec![Some(4), Some(4)]);

        let (console, _) = Console::buffered();
        let bar = BarSink::new(&console);
        bar.start(Some(4));
        bar.advance(3);
        bar.start(Some(4));
        assert_eq!(bar.position(), 0);
    }

    #[tokio::test]
    async fn test_requests_without_progress_pass_through() {
        let (console, captured) = Console::buffered();
        let client = ProgressClient::new(Arc::new(Slow(Duration::ZERO)), console);

        let response = client.execute(Request::get("/api/v0/info")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(captured.stderr().is_empty());
    }
}
