//! The vendor network release API as a [`ProductSource`].

use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, redirect, Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

use super::blob::glob_matches;
use super::parallel::{download_ranges, ParallelOptions};
use super::remote_zip::read_remote_metadata;
use super::traits::{FileArtifact, ProductSource, RangeReader, StemcellArtifact};
use super::version::latest_stemcell_version;
use super::{basename, ensure_success, DownloadError, REQUEST_TIMEOUT};
use crate::extractor::Metadata;
use crate::network::ProgressSink;

pub const DEFAULT_VENDOR_HOST: &str = "https://network.tanzu.vmware.com";

/// API tokens at most this long are legacy tokens sent verbatim.
const LEGACY_TOKEN_LENGTH: usize = 20;

#[derive(Debug, Clone)]
pub struct VendorConfig {
    pub host: String,
    pub token: String,
    pub disable_ssl: bool,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_VENDOR_HOST.to_string(),
            token: String::new(),
            disable_ssl: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Release {
    id: u64,
    version: String,
}

#[derive(Debug, Deserialize)]
struct Releases {
    #[serde(default)]
    releases: Vec<Release>,
}

#[derive(Debug, Deserialize)]
struct ProductFile {
    id: u64,
    aws_object_key: String,
    #[serde(default)]
    sha256: String,
}

#[derive(Debug, Deserialize)]
struct ProductFiles {
    #[serde(default)]
    product_files: Vec<ProductFile>,
}

#[derive(Debug, Deserialize)]
struct DependencyProduct {
    slug: String,
}

#[derive(Debug, Deserialize)]
struct DependencyRelease {
    version: String,
    product: DependencyProduct,
}

#[derive(Debug, Deserialize)]
struct Dependency {
    release: DependencyRelease,
}

#[derive(Debug, Deserialize)]
struct Dependencies {
    #[serde(default)]
    dependencies: Vec<Dependency>,
}

#[derive(Deserialize)]
struct AccessToken {
    access_token: String,
}

/// A pre-signed download URL read in ranges.
struct SignedObject {
    client: Client,
    url: Url,
}

#[async_trait]
impl RangeReader for SignedObject {
    async fn read_range(&self, range: Range<u64>) -> Result<Bytes, DownloadError> {
        if range.is_empty() {
            return Ok(Bytes::new());
        }
        let response = self
            .client
            .get(self.url.clone())
            .header(header::RANGE, format!("bytes={}-{}", range.start, range.end - 1))
            .send()
            .await?;
        if response.status() == StatusCode::PARTIAL_CONTENT {
            return Ok(response.bytes().await?);
        }
        Ok(ensure_success(response).await?.bytes().await?)
    }
}

impl SignedObject {
    /// Total size from the `Content-Range` of a one-byte read.
    async fn size(&self) -> Result<u64, DownloadError> {
        let response = ensure_success(
            self.client
                .get(self.url.clone())
                .header(header::RANGE, "bytes=0-0")
                .send()
                .await?,
        )
        .await?;
        let headers = response.headers();
        if let Some(total) = headers
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit('/').next())
            .and_then(|v| v.parse().ok())
        {
            return Ok(total);
        }
        headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| DownloadError::Decode(format!("no size reported for {}", self.url)))
    }
}

pub struct VendorSource {
    client: Client,
    /// Client that leaves redirects to the caller.
    api: Client,
    host: String,
    token: String,
    authorization: OnceCell<String>,
    options: ParallelOptions,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl VendorSource {
    pub fn new(config: VendorConfig) -> Result<Self, DownloadError> {
        if config.token.is_empty() {
            return Err(DownloadError::Config("the flag \"pivnet-api-token\" is required".into()));
        }
        let user_agent = concat!("om-download-product/", env!("CARGO_PKG_VERSION"));
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(config.disable_ssl)
            .build()?;
        let api = Client::builder()
            .user_agent(user_agent)
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(config.disable_ssl)
            .redirect(redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            api,
            host: config.host.trim_end_matches('/').to_string(),
            token: config.token,
            authorization: OnceCell::new(),
            options: ParallelOptions::default(),
            progress: None,
        })
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

    async fn authorization(&self) -> Result<&str, DownloadError> {
        self.authorization
            .get_or_try_init(|| async {
                if self.token.len() <= LEGACY_TOKEN_LENGTH {
                    return Ok(format!("Token {}", self.token));
                }
                let response = self
                    .api
                    .post(format!("{}/api/v2/authentication/access_tokens", self.host))
                    .json(&json!({ "refresh_token": self.token }))
                    .send()
                    .await?;
                if !response.status().is_success() {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(DownloadError::Auth(format!("{status}: {body}")));
                }
                let token: AccessToken = response.json().await?;
                Ok(format!("Bearer {}", token.access_token))
            })
            .await
            .map(String::as_str)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, DownloadError> {
        let url = format!("{}{path}", self.host);
        debug!(url = %url, "GET request");
        let response = self
            .api
            .get(&url)
            .header(header::AUTHORIZATION, self.authorization().await?)
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }

    async fn post(&self, path: &str) -> Result<reqwest::Response, DownloadError> {
        let url = format!("{}{path}", self.host);
        debug!(url = %url, "POST request");
        Ok(self
            .api
            .post(&url)
            .header(header::AUTHORIZATION, self.authorization().await?)
            .send()
            .await?)
    }

    async fn release_for_version(&self, slug: &str, version: &str) -> Result<Release, DownloadError> {
        let releases: Releases = self.get(&format!("/api/v2/products/{slug}/releases")).await?;
        releases
            .releases
            .into_iter()
            .find(|r| r.version == version)
            .ok_or_else(|| {
                DownloadError::NoVersions(format!(
                    "could not fetch the release for {slug} {version}: release not found"
                ))
            })
    }

    fn ids(file: &FileArtifact) -> Result<(u64, u64), DownloadError> {
        match (file.release_id, file.file_id) {
            (Some(release), Some(id)) => Ok((release, id)),
            _ => Err(DownloadError::Config(format!(
                "{} is not a vendor network file",
                file.name
            ))),
        }
    }

    /// Accept the release EULA and resolve the signed download location.
    async fn signed_object(&self, file: &FileArtifact) -> Result<SignedObject, DownloadError> {
        let (release, id) = Self::ids(file)?;
        let slug = &file.slug;

        let eula = self
            .post(&format!(
                "/api/v2/products/{slug}/releases/{release}/pivnet_resource_eula_acceptance"
            ))
            .await?;
        ensure_success(eula).await?;

        let response = self
            .post(&format!(
                "/api/v2/products/{slug}/releases/{release}/product_files/{id}/download"
            ))
            .await?;
        if !response.status().is_redirection() {
            let response = ensure_success(response).await?;
            return Err(DownloadError::Decode(format!(
                "expected a redirect from {}, got {}",
                response.url(),
                response.status()
            )));
        }
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| DownloadError::Decode("download redirect has no location".into()))?;
        let url = Url::parse(location)
            .or_else(|_| Url::parse(&self.host).and_then(|base| base.join(location)))
            .map_err(|e| DownloadError::Decode(format!("invalid download location {location:?}: {e}")))?;

        Ok(SignedObject {
            client: self.client.clone(),
            url,
        })
    }
}

#[async_trait]
impl ProductSource for VendorSource {
    fn name(&self) -> &str {
        "pivnet"
    }

    fn prefixes_files(&self) -> bool {
        false
    }

    async fn product_versions(&self, slug: &str) -> Result<Vec<String>, DownloadError> {
        let releases: Releases = self.get(&format!("/api/v2/products/{slug}/releases")).await?;
        Ok(releases.releases.into_iter().map(|r| r.version).collect())
    }

    async fn latest_product_file(
        &self,
        slug: &str,
        version: &str,
        glob: &str,
    ) -> Result<FileArtifact, DownloadError> {
        let release = self.release_for_version(slug, version).await?;
        let files: ProductFiles = self
            .get(&format!(
                "/api/v2/products/{slug}/releases/{}/product_files",
                release.id
            ))
            .await?;

        let mut matched = Vec::new();
        for file in files.product_files {
            if glob_matches(glob, basename(&file.aws_object_key))? {
                matched.push(file);
            }
        }

        match matched.len() {
            0 => Err(DownloadError::NoGlobMatch {
                glob: glob.to_string(),
                available: String::new(),
            }),
            1 => {
                let file = matched.remove(0);
                Ok(FileArtifact {
                    name: file.aws_object_key,
                    slug: slug.to_string(),
                    version: version.to_string(),
                    sha256: (!file.sha256.is_empty()).then_some(file.sha256),
                    release_id: Some(release.id),
                    file_id: Some(file.id),
                })
            }
            _ => Err(DownloadError::GlobAmbiguous {
                glob: glob.to_string(),
                matches: matched
                    .iter()
                    .map(|f| basename(&f.aws_object_key).to_string())
                    .collect(),
            }),
        }
    }

    async fn file_size(&self, file: &FileArtifact) -> Result<u64, DownloadError> {
        self.signed_object(file).await?.size().await
    }

    async fn download(&self, file: &FileArtifact, destination: &Path) -> Result<(), DownloadError> {
        let object = self.signed_object(file).await?;
        let size = object.size().await?;
        info!(file = %file.name, size, "downloading from vendor network");
        download_ranges(
            Arc::new(object),
            size,
            destination,
            self.options,
            self.progress.clone(),
        )
        .await
    }

    async fn latest_stemcell(
        &self,
        file: &FileArtifact,
        _product_path: &Path,
    ) -> Result<StemcellArtifact, DownloadError> {
        let (release, _) = Self::ids(file)?;
        let dependencies: Dependencies = self
            .get(&format!(
                "/api/v2/products/{}/releases/{release}/dependencies",
                file.slug
            ))
            .await
            .map_err(|e| {
                DownloadError::NoVersions(format!(
                    "could not fetch stemcell dependency for {}: {e}",
                    file.slug
                ))
            })?;

        let mut slug = String::new();
        let mut versions = Vec::new();
        for dependency in dependencies.dependencies {
            if dependency.release.product.slug.contains("stemcells") {
                slug = dependency.release.product.slug;
                versions.push(dependency.release.version);
            }
        }
        let version = latest_stemcell_version(&versions)?.ok_or_else(|| {
            DownloadError::NoVersions(format!("no stemcell dependency found for {}", file.slug))
        })?;
        Ok(StemcellArtifact { slug, version })
    }

    async fn product_metadata(&self, file: &FileArtifact) -> Result<Metadata, DownloadError> {
        let object = self.signed_object(file).await?;
        let size = object.size().await?;
        read_remote_metadata(Arc::new(object), size).await
    }
}
