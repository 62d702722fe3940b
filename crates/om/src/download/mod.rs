//! Artifact acquisition for `download-product`.
//!
//! A [`ProductSource`] knows how to list versions of a product slug, pick
//! one file by glob and fetch it. Blob stores (S3, GCS, Azure) share one
//! generic source over the [`Blobstore`] contract; the vendor release API
//! has its own. Files are fetched in parallel ranges into a `.partial`
//! file that is renamed once complete.

mod azure;
mod blob;
mod gcs;
mod manifest;
mod memory;
mod parallel;
mod remote_zip;
mod s3;
mod traits;
mod vendor;
mod version;

use std::time::Duration;

use thiserror::Error;

use crate::error::{Classify, ErrorKind};
use crate::extractor::ExtractError;

pub use azure::{AzureBlobstore, AzureConfig};
pub use blob::BlobSource;
pub use gcs::{GcsBlobstore, GcsConfig};
pub use manifest::{cleanup_cache, write_assign_stemcell, write_download_file, DownloadFile, CACHE_CLEANUP_ACK};
pub use memory::MemoryBlobstore;
pub use parallel::{download_ranges, ParallelOptions, DEFAULT_CHUNK_SIZE, DEFAULT_WORKERS};
pub use remote_zip::read_remote_metadata;
pub use s3::{S3AuthType, S3Blobstore, S3Config};
pub use traits::{Blobstore, FileArtifact, ProductSource, RangeReader, StemcellArtifact};
pub use vendor::{VendorConfig, VendorSource, DEFAULT_VENDOR_HOST};
pub use version::{
    determine_product_version, latest_stemcell_version, stemcell_slug_for_os,
    stemcell_version_parts, Version,
};

/// Timeout applied to each blob store request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(1800);

/// Errors raised while locating or fetching artifacts.
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("bucket contains no files")]
    BucketEmpty,

    #[error("could not reach provided {location}: {reason}\nCheck bucket and endpoint configuration")]
    BucketMissing { location: String, reason: String },

    #[error("no files matching pivnet-product-slug {0} found")]
    NoPrefixMatch(String),

    /// The requested version or regex matched nothing.
    #[error("{0}")]
    NoVersions(String),

    #[error("could not compile regex {regex:?}: {reason}")]
    InvalidRegex { regex: String, reason: String },

    #[error("no product files with expected prefix [{slug},{version}] found. Please ensure the file you're trying to download was initially persisted from the vendor network using an appropriately configured download-product command")]
    NoPrefixedFiles { slug: String, version: String },

    #[error("the glob '{glob}' matches no file\navailable files: {available}")]
    NoGlobMatch { glob: String, available: String },

    #[error("the glob '{glob}' matches multiple files. Write your glob to match exactly one of the following:\n  {}", .matches.join("\n  "))]
    GlobAmbiguous { glob: String, matches: Vec<String> },

    #[error("invalid glob '{glob}': {reason}")]
    InvalidGlob { glob: String, reason: String },

    #[error("versioning of stemcell dependency in unexpected format: \"major.minor\" or \"major\". the following version could not be parsed: {0}")]
    StemcellVersion(String),

    #[error("no versions could be found equal to or greater than {0}")]
    NoStemcell(String),

    #[error("the sha ({expected}) from {source_name} does not match the calculated sha ({actual}) for the file {path}")]
    Checksum {
        expected: String,
        source_name: String,
        actual: String,
        path: String,
    },

    #[error("could not retrieve access token: {0}")]
    Auth(String),

    #[error("request to {url} failed with status {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("could not parse response: {0}")]
    Decode(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("download worker failed: {0}")]
    Worker(String),
}

impl Classify for DownloadError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::BucketEmpty => ErrorKind::BucketEmpty,
            Self::BucketMissing { .. } => ErrorKind::BucketMissing,
            Self::NoPrefixMatch(_)
            | Self::NoVersions(_)
            | Self::NoPrefixedFiles { .. }
            | Self::NoStemcell(_) => ErrorKind::NoVersions,
            Self::NoGlobMatch { .. } => ErrorKind::NoGlobMatch,
            Self::GlobAmbiguous { .. } => ErrorKind::GlobAmbiguous,
            Self::Auth(_) => ErrorKind::AuthFailure,
            Self::Status { .. } | Self::Http(_) | Self::Decode(_) => ErrorKind::Upstream,
            Self::Extract(e) => e.kind(),
            Self::InvalidRegex { .. }
            | Self::InvalidGlob { .. }
            | Self::StemcellVersion(_)
            | Self::Checksum { .. }
            | Self::Config(_)
            | Self::Io(_)
            | Self::Worker(_) => ErrorKind::Other,
        }
    }
}

impl From<serde_json::Error> for DownloadError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// Map a non-2xx response into [`DownloadError::Status`].
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, DownloadError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(DownloadError::Status { url, status, body })
}

/// Basename of an object key.
pub(crate) fn basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(DownloadError::BucketEmpty.kind(), ErrorKind::BucketEmpty);
        assert_eq!(
            DownloadError::NoPrefixMatch("cf".into()).kind(),
            ErrorKind::NoVersions
        );
        let ambiguous = DownloadError::GlobAmbiguous {
            glob: "*.pivotal".into(),
            matches: vec!["a.pivotal".into(), "b.pivotal".into()],
        };
        assert_eq!(ambiguous.kind(), ErrorKind::GlobAmbiguous);
        assert!(ambiguous
            .to_string()
            .ends_with("one of the following:\n  a.pivotal\n  b.pivotal"));
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("products/[cf,1.0]cf.pivotal"), "[cf,1.0]cf.pivotal");
        assert_eq!(basename("cf.pivotal"), "cf.pivotal");
    }
}
