//! Parallel ranged download into a staging file.

use std::io::SeekFrom;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use futures::stream::{self, TryStreamExt};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use super::traits::RangeReader;
use super::DownloadError;
use crate::network::ProgressSink;

pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_WORKERS: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct ParallelOptions {
    pub chunk_size: u64,
    pub workers: usize,
}

impl Default for ParallelOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: DEFAULT_WORKERS,
        }
    }
}

fn ranges(size: u64, chunk_size: u64) -> Vec<Range<u64>> {
    let chunk_size = chunk_size.max(1);
    (0..size.div_ceil(chunk_size))
        .map(|i| {
            let start = i * chunk_size;
            start..(start + chunk_size).min(size)
        })
        .collect()
}

/// Fetch `size` bytes through `reader` into `destination`, each worker
/// writing its own disjoint region. The first failing range stops the
/// others and `destination` is removed.
pub async fn download_ranges(
    reader: Arc<dyn RangeReader>,
    size: u64,
    destination: &Path,
    options: ParallelOptions,
    progress: Option<Arc<dyn ProgressSink>>,
) -> Result<(), DownloadError> {
    let file = tokio::fs::File::create(destination).await?;
    file.set_len(size).await?;
    drop(file);

    if let Some(sink) = &progress {
        sink.start(Some(size));
    }

    let result = stream::iter(ranges(size, options.chunk_size).into_iter().map(Ok))
        .try_for_each_concurrent(options.workers.max(1), |range| {
            let reader = reader.clone();
            let progress = progress.clone();
            async move {
                debug!(start = range.start, end = range.end, "fetching range");
                let expected = range.end - range.start;
                let bytes = reader.read_range(range.clone()).await?;
                if bytes.len() as u64 != expected {
                    return Err(DownloadError::Worker(format!(
                        "range {}-{} returned {} bytes, expected {expected}",
                        range.start,
                        range.end,
                        bytes.len()
                    )));
                }
                let mut file = OpenOptions::new().write(true).open(destination).await?;
                file.seek(SeekFrom::Start(range.start)).await?;
                file.write_all(&bytes).await?;
                file.flush().await?;
                if let Some(sink) = &progress {
                    sink.advance(expected);
                }
                Ok(())
            }
        })
        .await;

    if let Some(sink) = &progress {
        sink.finish();
    }

    if let Err(err) = result {
        let _ = tokio::fs::remove_file(destination).await;
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::traits::Blobstore;
    use crate::download::MemoryBlobstore;
    use async_trait::async_trait;
    use bytes::Bytes;

    struct Object {
        store: Arc<MemoryBlobstore>,
        key: String,
    }

    #[async_trait]
    impl RangeReader for Object {
        async fn read_range(&self, range: Range<u64>) -> Result<Bytes, DownloadError> {
            self.store.get_range(&self.key, range).await
        }
    }

    #[test]
    fn test_ranges_cover_file() {
        assert_eq!(ranges(25, 10), vec![0..10, 10..20, 20..25]);
        assert_eq!(ranges(20, 10), vec![0..10, 10..20]);
        assert!(ranges(0, 10).is_empty());
    }

    #[tokio::test]
    async fn test_download_reassembles_ranges() {
        let contents: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let store = Arc::new(MemoryBlobstore::new());
        store.insert("tile.pivotal", contents.clone());
        let reader = Arc::new(Object {
            store,
            key: "tile.pivotal".into(),
        });

        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("tile.pivotal.partial");
        download_ranges(
            reader,
            1000,
            &destination,
            ParallelOptions {
                chunk_size: 64,
                workers: 4,
            },
            None,
        )
        .await
        .unwrap();

        let written = std::fs::read(&destination).unwrap();
        assert_eq!(written.len(), 1000);
        assert_eq!(written, contents);
    }

    #[tokio::test]
    async fn test_failed_range_removes_partial() {
        let store = Arc::new(MemoryBlobstore::new());
        store.insert("tile.pivotal", vec![1u8; 300]);
        store.fail_reads("tile.pivotal", "connection reset");
        let reader = Arc::new(Object {
            store,
            key: "tile.pivotal".into(),
        });

        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("tile.pivotal.partial");
        let err = download_ranges(
            reader,
            300,
            &destination,
            ParallelOptions {
                chunk_size: 100,
                workers: 2,
            },
            None,
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("connection reset"));
        assert!(!destination.exists());
    }
}
