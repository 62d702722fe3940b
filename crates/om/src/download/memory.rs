//! In-memory blob store.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;

use super::traits::Blobstore;
use super::DownloadError;

/// Objects kept in a map, listed in insertion order.
#[derive(Default)]
pub struct MemoryBlobstore {
    objects: Mutex<Vec<(String, Bytes)>>,
    /// Keys whose ranged reads fail, for exercising error paths.
    failing: Mutex<BTreeMap<String, String>>,
}

impl MemoryBlobstore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, contents: impl Into<Bytes>) {
        let key = key.into();
        let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        objects.retain(|(k, _)| *k != key);
        objects.push((key, contents.into()));
    }

    /// Make every ranged read of `key` beyond its first byte fail with `message`.
    pub fn fail_reads(&self, key: impl Into<String>, message: impl Into<String>) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), message.into());
    }

    fn object(&self, key: &str) -> Result<Bytes, DownloadError> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| DownloadError::Status {
                url: format!("memory://{key}"),
                status: 404,
                body: "not found".into(),
            })
    }
}

#[async_trait]
impl Blobstore for MemoryBlobstore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, DownloadError> {
        Ok(self
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn size(&self, key: &str) -> Result<u64, DownloadError> {
        Ok(self.object(key)?.len() as u64)
    }

    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Bytes, DownloadError> {
        if range.start > 0 {
            if let Some(message) = self
                .failing
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(key)
            {
                return Err(DownloadError::Worker(message.clone()));
            }
        }
        let object = self.object(key)?;
        let end = usize::try_from(range.end.min(object.len() as u64)).unwrap_or(object.len());
        let start = usize::try_from(range.start).unwrap_or(end).min(end);
        Ok(object.slice(start..end))
    }
}
