//! Streaming `multipart/form-data` encoder.
//!
//! The total length is known before the first byte is sent, and every call
//! to [`Form::stream`] re-opens file parts, so one form can be sent again
//! after a failed attempt.

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use tokio_util::io::ReaderStream;

#[derive(Debug, Clone)]
enum Segment {
    Bytes(Bytes),
    File { path: PathBuf, size: u64 },
}

impl Segment {
    fn len(&self) -> u64 {
        match self {
            Self::Bytes(b) => b.len() as u64,
            Self::File { size, .. } => *size,
        }
    }
}

/// Multipart form with text fields and file parts.
#[derive(Debug, Clone)]
pub struct Form {
    boundary: String,
    segments: Vec<Segment>,
}

impl Default for Form {
    fn default() -> Self {
        Self::new()
    }
}

impl Form {
    /// Empty form with a random boundary.
    #[must_use]
    pub fn new() -> Self {
        Self {
            boundary: uuid::Uuid::new_v4().simple().to_string(),
            segments: Vec::new(),
        }
    }

    /// Add a text field.
    pub fn add_field(&mut self, name: &str, value: &str) {
        let part = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
            self.boundary,
            escape(name),
            value
        );
        self.segments.push(Segment::Bytes(Bytes::from(part)));
    }

    /// Add a file part. Empty files are rejected.
    ///
    /// # Errors
    /// Returns error if the file cannot be inspected or has no content.
    pub fn add_file(&mut self, name: &str, path: impl AsRef<Path>) -> io::Result<()> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.add_file_as(name, path, &filename)
    }

    /// Add a file part announced under `filename` instead of its own name.
    pub fn add_file_as(&mut self, name: &str, path: impl AsRef<Path>, filename: &str) -> io::Result<()> {
        let path = path.as_ref();
        let size = std::fs::metadata(path)?.len();
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "file provided has no content",
            ));
        }

        let header = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            self.boundary,
            escape(name),
            escape(filename)
        );
        self.segments.push(Segment::Bytes(Bytes::from(header)));
        self.segments.push(Segment::File {
            path: path.to_path_buf(),
            size,
        });
        self.segments.push(Segment::Bytes(Bytes::from_static(b"\r\n")));
        Ok(())
    }

    /// `Content-Type` header value.
    #[must_use]
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Exact encoded length in bytes.
    #[must_use]
    pub fn content_length(&self) -> u64 {
        self.segments.iter().map(Segment::len).sum::<u64>() + self.trailer().len() as u64
    }

    fn trailer(&self) -> String {
        format!("--{}--\r\n", self.boundary)
    }

    /// Fresh stream over the encoded form.
    pub fn stream(&self) -> BoxStream<'static, io::Result<Bytes>> {
        let mut segments = self.segments.clone();
        segments.push(Segment::Bytes(Bytes::from(self.trailer())));

        stream::iter(segments)
            .map(|segment| match segment {
                Segment::Bytes(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
                Segment::File { path, .. } => stream::once(tokio::fs::File::open(path))
                    .map_ok(ReaderStream::new)
                    .try_flatten()
                    .boxed(),
            })
            .flatten()
            .boxed()
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
