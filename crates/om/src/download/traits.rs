//! Source contracts for artifact acquisition.

use std::ops::Range;
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use super::DownloadError;
use crate::extractor::Metadata;

/// The object store contract each blob source satisfies.
#[async_trait]
pub trait Blobstore: Send + Sync {
    /// Short name used in log lines (`s3`, `gcs`, `azure`).
    fn kind(&self) -> &'static str;

    /// Every object key below `prefix`, in listing order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, DownloadError>;

    /// Size of `key` in bytes.
    async fn size(&self, key: &str) -> Result<u64, DownloadError>;

    /// Bytes `range.start..range.end` of `key`.
    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Bytes, DownloadError>;

    /// Pre-signed URL for `key`, for stores that can hand one out.
    async fn signed_url(&self, _key: &str) -> Result<Option<Url>, DownloadError> {
        Ok(None)
    }
}

/// Random access to one remote object.
#[async_trait]
pub trait RangeReader: Send + Sync {
    async fn read_range(&self, range: Range<u64>) -> Result<Bytes, DownloadError>;
}

/// A file chosen for download.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileArtifact {
    /// Object key (blob stores) or object key as published (vendor).
    pub name: String,
    pub slug: String,
    pub version: String,
    /// Expected checksum, when the source publishes one.
    pub sha256: Option<String>,
    /// Vendor release and file ids.
    pub release_id: Option<u64>,
    pub file_id: Option<u64>,
}

/// The stemcell a product needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StemcellArtifact {
    pub slug: String,
    pub version: String,
}

/// Where product files come from.
#[async_trait]
pub trait ProductSource: Send + Sync {
    /// Name used in log lines and checksum errors.
    fn name(&self) -> &str;

    /// Whether object names already carry the `[slug,version]` prefix.
    fn prefixes_files(&self) -> bool {
        true
    }

    /// All versions published for `slug`.
    async fn product_versions(&self, slug: &str) -> Result<Vec<String>, DownloadError>;

    /// The single file of `slug` at `version` matching `glob`.
    async fn latest_product_file(
        &self,
        slug: &str,
        version: &str,
        glob: &str,
    ) -> Result<FileArtifact, DownloadError>;

    /// Remote size of `file` in bytes.
    async fn file_size(&self, file: &FileArtifact) -> Result<u64, DownloadError>;

    /// Write `file` to `destination`.
    async fn download(&self, file: &FileArtifact, destination: &Path) -> Result<(), DownloadError>;

    /// The newest compatible stemcell for a downloaded product.
    async fn latest_stemcell(
        &self,
        file: &FileArtifact,
        product_path: &Path,
    ) -> Result<StemcellArtifact, DownloadError>;

    /// Tile metadata without downloading the whole file.
    async fn product_metadata(&self, file: &FileArtifact) -> Result<Metadata, DownloadError>;
}
