//! Read tile metadata from a remote zip with ranged reads.
//!
//! Only the central directory and the metadata entry are fetched, so
//! `--check-already-uploaded` does not need the whole tile on disk.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use bytes::Bytes;
use tokio::runtime::Handle;

use super::traits::RangeReader;
use super::DownloadError;
use crate::extractor::{self, Metadata};

const WINDOW: u64 = 256 * 1024;

struct RemoteFile {
    reader: Arc<dyn RangeReader>,
    handle: Handle,
    size: u64,
    position: u64,
    window_start: u64,
    window: Bytes,
}

impl RemoteFile {
    fn fill(&mut self) -> io::Result<()> {
        let start = self.position;
        let end = (start + WINDOW).min(self.size);
        let reader = self.reader.clone();
        let bytes = self
            .handle
            .block_on(async move { reader.read_range(start..end).await })
            .map_err(|e| io::Error::other(e.to_string()))?;
        self.window_start = start;
        self.window = bytes;
        Ok(())
    }

    fn window_contains(&self, position: u64) -> bool {
        position >= self.window_start && position < self.window_start + self.window.len() as u64
    }
}

impl Read for RemoteFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.position >= self.size || buf.is_empty() {
            return Ok(0);
        }
        if !self.window_contains(self.position) {
            self.fill()?;
            if self.window.is_empty() {
                return Ok(0);
            }
        }
        let offset = usize::try_from(self.position - self.window_start).map_err(io::Error::other)?;
        let available = &self.window[offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for RemoteFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(delta) => self.size.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of file")
        })?;
        self.position = target;
        Ok(target)
    }
}

/// Extract tile metadata from a remote object of `size` bytes.
pub async fn read_remote_metadata(
    reader: Arc<dyn RangeReader>,
    size: u64,
) -> Result<Metadata, DownloadError> {
    let handle = Handle::current();
    tokio::task::spawn_blocking(move || {
        let file = RemoteFile {
            reader,
            handle,
            size,
            position: 0,
            window_start: 0,
            window: Bytes::new(),
        };
        extractor::extract(file).map_err(DownloadError::from)
    })
    .await
    .map_err(|e| DownloadError::Worker(e.to_string()))?
}
