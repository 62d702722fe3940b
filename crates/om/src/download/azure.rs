//! Azure Blob storage with SharedKey authorization.

use std::ops::Range;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use super::traits::Blobstore;
use super::{ensure_success, DownloadError, REQUEST_TIMEOUT};

const API_VERSION: &str = "2021-08-06";

#[derive(Debug, Clone, Default)]
pub struct AzureConfig {
    pub storage_account: String,
    /// Base64 encoded account key.
    pub key: String,
    pub container: String,
    /// Override of `https://<account>.blob.core.windows.net`.
    pub endpoint: Option<String>,
}

pub struct AzureBlobstore {
    client: Client,
    account: String,
    key: Vec<u8>,
    container: String,
    endpoint: String,
}

impl AzureBlobstore {
    pub fn new(config: AzureConfig) -> Result<Self, DownloadError> {
        for (flag, value) in [
            ("azure-storage-account", &config.storage_account),
            ("azure-storage-key", &config.key),
            ("blobstore-bucket", &config.container),
        ] {
            if value.is_empty() {
                return Err(DownloadError::Config(format!("the flag \"{flag}\" is required")));
            }
        }
        let key = STANDARD
            .decode(config.key.trim())
            .map_err(|e| DownloadError::Config(format!("azure-storage-key is not valid base64: {e}")))?;
        let endpoint = config
            .endpoint
            .unwrap_or_else(|| format!("https://{}.blob.core.windows.net", config.storage_account));

        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            account: config.storage_account,
            key,
            container: config.container,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn blob_path(&self, key: &str) -> String {
        let encoded: Vec<String> = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("/{}/{}", self.container, encoded.join("/"))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        range: Option<String>,
    ) -> Result<reqwest::Response, DownloadError> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let mut ms_headers = vec![
            ("x-ms-date".to_string(), date),
            ("x-ms-version".to_string(), API_VERSION.to_string()),
        ];
        if let Some(range) = range {
            ms_headers.push(("x-ms-range".to_string(), range));
        }
        let authorization = format!(
            "SharedKey {}:{}",
            self.account,
            shared_key_signature(&self.key, &self.account, method.as_str(), path, query, &ms_headers)
        );

        let url = format!("{}{path}", self.endpoint);
        debug!(method = %method, url = %url, "azure request");
        let mut request = self
            .client
            .request(method, &url)
            .query(query)
            .header(reqwest::header::AUTHORIZATION, authorization);
        for (name, value) in &ms_headers {
            request = request.header(name.as_str(), value.as_str());
        }
        Ok(request.send().await?)
    }
}

/// Signature over the SharedKey string-to-sign. Only `x-ms-*` headers are
/// sent, so every standard header slot is empty.
fn shared_key_signature(
    key: &[u8],
    account: &str,
    method: &str,
    path: &str,
    query: &[(&str, String)],
    ms_headers: &[(String, String)],
) -> String {
    let mut headers: Vec<(String, String)> = ms_headers
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.trim().to_string()))
        .collect();
    headers.sort();
    let canonical_headers: String = headers.iter().map(|(k, v)| format!("{k}:{v}\n")).collect();

    let mut resource = format!("/{account}{path}");
    let mut params: Vec<(String, &str)> = query
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.as_str()))
        .collect();
    params.sort();
    for (name, value) in params {
        resource.push_str(&format!("\n{name}:{value}"));
    }

    let string_to_sign = format!("{method}\n\n\n\n\n\n\n\n\n\n\n\n{canonical_headers}{resource}");
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(key) else {
        return String::new();
    };
    mac.update(string_to_sign.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EnumerationResults {
    #[serde(default)]
    blobs: BlobList,
    #[serde(default)]
    next_marker: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct BlobList {
    #[serde(default)]
    blob: Vec<BlobItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlobItem {
    name: String,
}

#[async_trait]
impl Blobstore for AzureBlobstore {
    fn kind(&self) -> &'static str {
        "azure"
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, DownloadError> {
        let path = format!("/{}", self.container);
        let mut names = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let mut query = vec![
                ("comp", "list".to_string()),
                ("restype", "container".to_string()),
            ];
            if !prefix.is_empty() {
                query.push(("prefix", prefix.to_string()));
            }
            if let Some(m) = &marker {
                query.push(("marker", m.clone()));
            }

            let location = || format!("container '{}'", self.container);
            let response = match self.send(Method::GET, &path, &query, None).await {
                Ok(r) => r,
                Err(DownloadError::Http(e)) => {
                    return Err(DownloadError::BucketMissing {
                        location: location(),
                        reason: e.to_string(),
                    })
                }
                Err(e) => return Err(e),
            };
            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(DownloadError::BucketMissing {
                    location: location(),
                    reason: format!("{status}: {body}"),
                });
            }

            let body = response.text().await?;
            let page: EnumerationResults = quick_xml::de::from_str(&body)
                .map_err(|e| DownloadError::Decode(e.to_string()))?;
            names.extend(page.blobs.blob.into_iter().map(|b| b.name));
            match page.next_marker {
                Some(m) if !m.is_empty() => marker = Some(m),
                _ => break,
            }
        }
        Ok(names)
    }

    async fn size(&self, key: &str) -> Result<u64, DownloadError> {
        let response = self
            .send(Method::HEAD, &self.blob_path(key), &[], None)
            .await?;
        ensure_success(response)
            .await?
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| DownloadError::Decode(format!("no content length for {key}")))
    }

    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Bytes, DownloadError> {
        if range.is_empty() {
            return Ok(Bytes::new());
        }
        let response = self
            .send(
                Method::GET,
                &self.blob_path(key),
                &[],
                Some(format!("bytes={}-{}", range.start, range.end - 1)),
            )
            .await?;
        if response.status() == StatusCode::PARTIAL_CONTENT {
            return Ok(response.bytes().await?);
        }
        Ok(ensure_success(response).await?.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store_for(server: &MockServer) -> AzureBlobstore {
        AzureBlobstore::new(AzureConfig {
            storage_account: "account".into(),
            key: STANDARD.encode("secret"),
            container: "tiles".into(),
            endpoint: Some(server.uri()),
        })
        .unwrap()
    }

    #[test]
    fn test_signature_is_stable() {
        let headers = vec![
            ("x-ms-version".to_string(), API_VERSION.to_string()),
            ("x-ms-date".to_string(), "Mon, 01 Jan 2024 00:00:00 GMT".to_string()),
        ];
        let query = [("restype", "container".to_string()), ("comp", "list".to_string())];
        let a = shared_key_signature(b"secret", "account", "GET", "/tiles", &query, &headers);
        let reversed: Vec<_> = headers.iter().rev().cloned().collect();
        let b = shared_key_signature(b"secret", "account", "GET", "/tiles", &query, &reversed);
        assert_eq!(a, b);
        assert_ne!(
            a,
            shared_key_signature(b"other", "account", "GET", "/tiles", &query, &headers)
        );
    }

    #[test]
    fn test_flags_required() {
        let err = AzureBlobstore::new(AzureConfig {
            storage_account: "account".into(),
            ..AzureConfig::default()
        })
        .err()
        .unwrap();
        assert!(err.to_string().contains("azure-storage-key"));
    }

    #[tokio::test]
    async fn test_list_follows_marker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tiles"))
            .and(query_param("marker", "m2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<?xml version=\"1.0\" encoding=\"utf-8\"?><EnumerationResults><Blobs>\
                 <Blob><Name>[cf,1.0]b.pivotal</Name></Blob></Blobs><NextMarker/></EnumerationResults>",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tiles"))
            .and(query_param("comp", "list"))
            .and(header_exists("authorization"))
            .and(header("x-ms-version", API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<?xml version=\"1.0\" encoding=\"utf-8\"?><EnumerationResults><Blobs>\
                 <Blob><Name>[cf,1.0]a.pivotal</Name></Blob></Blobs>\
                 <NextMarker>m2</NextMarker></EnumerationResults>",
            ))
            .mount(&server)
            .await;

        let names = store_for(&server).list("").await.unwrap();
        assert_eq!(names, vec!["[cf,1.0]a.pivotal", "[cf,1.0]b.pivotal"]);
    }

    #[tokio::test]
    async fn test_missing_container() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tiles"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = store_for(&server).list("").await.unwrap_err();
        assert!(err.to_string().starts_with("could not reach provided container 'tiles'"));
    }
}
