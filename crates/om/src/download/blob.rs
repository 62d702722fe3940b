//! Product source over any [`Blobstore`].
//!
//! Objects are expected to be named `[slug,version]original-name`, under
//! an optional product or stemcell path, the way `download-product`
//! persists them.

use std::ops::Range;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use bytes::Bytes;
use globset::GlobBuilder;
use regex::Regex;
use tracing::debug;

use super::parallel::{download_ranges, ParallelOptions};
use super::remote_zip::read_remote_metadata;
use super::traits::{Blobstore, FileArtifact, ProductSource, RangeReader, StemcellArtifact};
use super::version::{latest_stemcell_version, stemcell_slug_for_os, stemcell_version_parts};
use super::{basename, DownloadError};
use crate::extractor::{self, Metadata};
use crate::network::ProgressSink;

static SLUG_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\[.*\]").unwrap());

/// One object of a blob store as a [`RangeReader`].
struct BlobObject {
    store: Arc<dyn Blobstore>,
    key: String,
}

#[async_trait]
impl RangeReader for BlobObject {
    async fn read_range(&self, range: Range<u64>) -> Result<Bytes, DownloadError> {
        self.store.get_range(&self.key, range).await
    }
}

/// Glob match with path-style semantics (`*` stops at `/`).
pub(crate) fn glob_matches(glob: &str, name: &str) -> Result<bool, DownloadError> {
    let matcher = GlobBuilder::new(glob)
        .literal_separator(true)
        .build()
        .map_err(|e| DownloadError::InvalidGlob {
            glob: glob.to_string(),
            reason: e.to_string(),
        })?
        .compile_matcher();
    Ok(matcher.is_match(name))
}

pub struct BlobSource {
    store: Arc<dyn Blobstore>,
    product_path: String,
    stemcell_path: String,
    options: ParallelOptions,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl BlobSource {
    #[must_use]
    pub fn new(store: Arc<dyn Blobstore>, product_path: &str, stemcell_path: &str) -> Self {
        Self {
            store,
            product_path: product_path.trim_matches('/').to_string(),
            stemcell_path: stemcell_path.trim_matches('/').to_string(),
            options: ParallelOptions::default(),
            progress: None,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    #[must_use]
    pub fn with_parallelism(mut self, options: ParallelOptions) -> Self {
        self.options = options;
        self
    }

    async fn list_files(&self) -> Result<Vec<String>, DownloadError> {
        let files = self.store.list("").await?;
        if files.is_empty() {
            return Err(DownloadError::BucketEmpty);
        }
        Ok(files)
    }

    async fn versions_under(&self, slug: &str, path: &str) -> Result<Vec<String>, DownloadError> {
        let files = self.list_files().await?;
        let pattern = Regex::new(&format!(
            r"^/?{}/?\[{},(.*?)\]",
            regex::escape(path),
            regex::escape(slug)
        ))
        .map_err(|e| DownloadError::Config(e.to_string()))?;

        let mut versions: Vec<String> = Vec::new();
        for file in &files {
            if let Some(captures) = pattern.captures(file) {
                let version = captures[1].to_string();
                if !versions.contains(&version) {
                    versions.push(version);
                }
            }
        }
        if versions.is_empty() {
            return Err(DownloadError::NoPrefixMatch(slug.to_string()));
        }
        Ok(versions)
    }

    fn object(&self, key: &str) -> Arc<dyn RangeReader> {
        Arc::new(BlobObject {
            store: self.store.clone(),
            key: key.to_string(),
        })
    }
}

#[async_trait]
impl ProductSource for BlobSource {
    fn name(&self) -> &str {
        self.store.kind()
    }

    async fn product_versions(&self, slug: &str) -> Result<Vec<String>, DownloadError> {
        self.versions_under(slug, &self.product_path).await
    }

    async fn latest_product_file(
        &self,
        slug: &str,
        version: &str,
        glob: &str,
    ) -> Result<FileArtifact, DownloadError> {
        let files = self.list_files().await?;
        let valid = Regex::new(&format!(
            r"^/?({}|{})/?\[{},{}\]",
            regex::escape(&self.product_path),
            regex::escape(&self.stemcell_path),
            regex::escape(slug),
            regex::escape(version)
        ))
        .map_err(|e| DownloadError::Config(e.to_string()))?;

        let prefixed: Vec<&String> = files.iter().filter(|f| valid.is_match(f)).collect();
        if prefixed.is_empty() {
            return Err(DownloadError::NoPrefixedFiles {
                slug: slug.to_string(),
                version: version.to_string(),
            });
        }

        let mut matched = Vec::new();
        for file in &prefixed {
            let name = SLUG_PREFIX.replace(basename(file), "");
            if glob_matches(glob, &name)? {
                matched.push((*file).clone());
            }
        }
        debug!(glob, candidates = prefixed.len(), matched = matched.len(), "applied file glob");

        match matched.len() {
            0 => Err(DownloadError::NoGlobMatch {
                glob: glob.to_string(),
                available: prefixed
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
            1 => Ok(FileArtifact {
                name: matched.remove(0),
                slug: slug.to_string(),
                version: version.to_string(),
                ..FileArtifact::default()
            }),
            _ => Err(DownloadError::GlobAmbiguous {
                glob: glob.to_string(),
                matches: matched,
            }),
        }
    }

    async fn file_size(&self, file: &FileArtifact) -> Result<u64, DownloadError> {
        self.store.size(&file.name).await
    }

    async fn download(&self, file: &FileArtifact, destination: &Path) -> Result<(), DownloadError> {
        let size = self.store.size(&file.name).await?;
        download_ranges(
            self.object(&file.name),
            size,
            destination,
            self.options,
            self.progress.clone(),
        )
        .await
    }

    async fn latest_stemcell(
        &self,
        _file: &FileArtifact,
        product_path: &Path,
    ) -> Result<StemcellArtifact, DownloadError> {
        let metadata = extractor::extract_from_file(product_path)?;
        let criteria = metadata.stemcell_criteria;
        let slug = stemcell_slug_for_os(&criteria.os).ok_or_else(|| {
            DownloadError::Config(format!(
                "could not find the appropriate stemcell associated with the tile: {}",
                product_path.display()
            ))
        })?;
        let (major, patch) = stemcell_version_parts(&criteria.version)?;

        let versions = self
            .versions_under(slug, &self.stemcell_path)
            .await
            .map_err(|e| {
                DownloadError::NoVersions(format!(
                    "could not find stemcells on {}: {e}",
                    self.store.kind()
                ))
            })?;

        let compatible: Vec<String> = versions
            .into_iter()
            .filter(|v| {
                stemcell_version_parts(v).is_ok_and(|(m, p)| m == major && p >= patch)
            })
            .collect();
        let version = latest_stemcell_version(&compatible)?
            .ok_or_else(|| DownloadError::NoStemcell(criteria.version.clone()))?;

        Ok(StemcellArtifact {
            slug: slug.to_string(),
            version,
        })
    }

    async fn product_metadata(&self, file: &FileArtifact) -> Result<Metadata, DownloadError> {
        let size = self.store.size(&file.name).await?;
        read_remote_metadata(self.object(&file.name), size).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::MemoryBlobstore;
    use crate::error::{Classify, ErrorKind};
    use crate::extractor::tests::tile;

    fn store(keys: &[&str]) -> Arc<MemoryBlobstore> {
        let store = Arc::new(MemoryBlobstore::new());
        for key in keys {
            store.insert(*key, b"contents".to_vec());
        }
        store
    }

    #[tokio::test]
    async fn test_versions_under_product_path() {
        let source = BlobSource::new(
            store(&[
                "products/[cf,2.10.1]cf-2.10.1.pivotal",
                "products/[cf,2.10.1]cf-2.10.1.pivotal.sha",
                "products/[cf,2.11.0]cf-2.11.0.pivotal",
                "stemcells/[stemcells-ubuntu-xenial,621.78]light-bosh-stemcell.tgz",
            ]),
            "/products/",
            "stemcells",
        );
        let versions = source.product_versions("cf").await.unwrap();
        assert_eq!(versions, vec!["2.10.1", "2.11.0"]);
    }

    #[tokio::test]
    async fn test_glob_selection() {
        let source = BlobSource::new(
            store(&[
                "[cf,2.10.1]cf-2.10.1.pivotal",
                "[cf,2.10.1]srt-2.10.1.pivotal",
                "[cf,2.10.1]notes.txt",
            ]),
            "",
            "",
        );

        let file = source
            .latest_product_file("cf", "2.10.1", "cf-*.pivotal")
            .await
            .unwrap();
        assert_eq!(file.name, "[cf,2.10.1]cf-2.10.1.pivotal");

        let ambiguous = source
            .latest_product_file("cf", "2.10.1", "*.pivotal")
            .await
            .unwrap_err();
        assert_eq!(ambiguous.kind(), ErrorKind::GlobAmbiguous);

        let none = source
            .latest_product_file("cf", "2.10.1", "*.tgz")
            .await
            .unwrap_err();
        assert_eq!(none.kind(), ErrorKind::NoGlobMatch);
        assert!(none.to_string().starts_with("the glob '*.tgz' matches no file"));
    }

    #[tokio::test]
    async fn test_latest_stemcell_for_product() {
        let doc = "name: cf\nproduct_version: 2.10.1\nstemcell_criteria:\n  os: ubuntu-xenial\n  version: '621.50'\n";
        let dir = tempfile::tempdir().unwrap();
        let product = dir.path().join("cf.pivotal");
        std::fs::write(&product, tile("metadata/cf.yml", doc)).unwrap();

        let source = BlobSource::new(
            store(&[
                "[stemcells-ubuntu-xenial,621.40]light-bosh-stemcell-621.40-aws.tgz",
                "[stemcells-ubuntu-xenial,621.78]light-bosh-stemcell-621.78-aws.tgz",
                "[stemcells-ubuntu-xenial,456.9]light-bosh-stemcell-456.9-aws.tgz",
            ]),
            "",
            "",
        );
        let stemcell = source
            .latest_stemcell(&FileArtifact::default(), &product)
            .await
            .unwrap();
        assert_eq!(stemcell.slug, "stemcells-ubuntu-xenial");
        assert_eq!(stemcell.version, "621.78");
    }

    #[test]
    fn test_glob_does_not_cross_separator() {
        assert!(glob_matches("*.pivotal", "cf.pivotal").unwrap());
        assert!(!glob_matches("*.pivotal", "dir/cf.pivotal").unwrap());
    }
}
