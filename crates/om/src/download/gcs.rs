//! Google Cloud Storage over the JSON API.
//!
//! A service-account key signs a short-lived JWT that is exchanged for an
//! OAuth access token; the token is fetched on first use and cached.

use std::ops::Range;

use async_trait::async_trait;
use bytes::Bytes;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::debug;

use super::traits::Blobstore;
use super::{ensure_success, DownloadError, REQUEST_TIMEOUT};

const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_only";

#[derive(Debug, Clone, Default)]
pub struct GcsConfig {
    pub bucket: String,
    pub project_id: String,
    /// Contents of the service account JSON key.
    pub service_account_json: String,
    /// Override of the storage endpoint.
    pub endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServiceAccount {
    client_email: String,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct GcsBlobstore {
    client: Client,
    bucket: String,
    endpoint: String,
    account: Option<ServiceAccount>,
    token: OnceCell<String>,
}

impl GcsBlobstore {
    pub fn new(config: GcsConfig) -> Result<Self, DownloadError> {
        if config.bucket.is_empty() {
            return Err(DownloadError::Config("the flag \"blobstore-bucket\" is required".into()));
        }
        if config.service_account_json.is_empty() {
            return Err(DownloadError::Config(
                "the flag \"gcs-service-account-json\" is required".into(),
            ));
        }
        let account: ServiceAccount = serde_json::from_str(&config.service_account_json)
            .map_err(|e| DownloadError::Config(format!("could not parse service account json: {e}")))?;

        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            bucket: config.bucket,
            endpoint: config
                .endpoint
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
                .trim_end_matches('/')
                .to_string(),
            account: Some(account),
            token: OnceCell::new(),
        })
    }

    async fn token(&self) -> Result<&str, DownloadError> {
        self.token
            .get_or_try_init(|| async {
                let account = self
                    .account
                    .as_ref()
                    .ok_or_else(|| DownloadError::Auth("no service account configured".into()))?;
                exchange_token(&self.client, account).await
            })
            .await
            .map(String::as_str)
    }

    async fn get(&self, url: &str) -> Result<RequestBuilder, DownloadError> {
        debug!(url = %url, "GET request");
        Ok(self.client.get(url).bearer_auth(self.token().await?))
    }

    fn objects_url(&self) -> String {
        format!(
            "{}/storage/v1/b/{}/o",
            self.endpoint,
            urlencoding::encode(&self.bucket)
        )
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.objects_url(), urlencoding::encode(key))
    }
}

async fn exchange_token(client: &Client, account: &ServiceAccount) -> Result<String, DownloadError> {
    let token_uri = account.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        iss: &account.client_email,
        scope: SCOPE,
        aud: token_uri,
        iat: now,
        exp: now + 3600,
    };
    let key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())
        .map_err(|e| DownloadError::Auth(format!("invalid service account key: {e}")))?;
    let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
        .map_err(|e| DownloadError::Auth(e.to_string()))?;

    let response = client
        .post(token_uri)
        .form(&[
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ])
        .send()
        .await?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(DownloadError::Auth(format!("{status}: {body}")));
    }
    Ok(response.json::<TokenResponse>().await?.access_token)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectResource>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct ObjectResource {
    name: String,
    /// The JSON API encodes sizes as strings.
    #[serde(default)]
    size: Option<String>,
}

#[async_trait]
impl Blobstore for GcsBlobstore {
    fn kind(&self) -> &'static str {
        "gcs"
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, DownloadError> {
        let mut names = Vec::new();
        let mut page: Option<String> = None;
        loop {
            let mut query = vec![("prefix", prefix.to_string())];
            if let Some(token) = &page {
                query.push(("pageToken", token.clone()));
            }
            let response = self
                .get(&self.objects_url())
                .await?
                .query(&query)
                .send()
                .await
                .map_err(|e| DownloadError::BucketMissing {
                    location: format!("bucket '{}'", self.bucket),
                    reason: e.to_string(),
                })?;
            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(DownloadError::BucketMissing {
                    location: format!("bucket '{}'", self.bucket),
                    reason: format!("{status}: {body}"),
                });
            }
            let list: ObjectList = response.json().await?;
            names.extend(list.items.into_iter().map(|o| o.name));
            match list.next_page_token {
                Some(token) if !token.is_empty() => page = Some(token),
                _ => break,
            }
        }
        Ok(names)
    }

    async fn size(&self, key: &str) -> Result<u64, DownloadError> {
        let response = ensure_success(self.get(&self.object_url(key)).await?.send().await?).await?;
        let object: ObjectResource = response.json().await?;
        object
            .size
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| DownloadError::Decode(format!("no size reported for {}", object.name)))
    }

    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Bytes, DownloadError> {
        if range.is_empty() {
            return Ok(Bytes::new());
        }
        let response = self
            .get(&self.object_url(key))
            .await?
            .query(&[("alt", "media")])
            .header(
                reqwest::header::RANGE,
                format!("bytes={}-{}", range.start, range.end - 1),
            )
            .send()
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
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store_for(server: &MockServer) -> GcsBlobstore {
        let token = OnceCell::new();
        token.set("test-token".to_string()).unwrap();
        GcsBlobstore {
            client: Client::new(),
            bucket: "bucket".into(),
            endpoint: server.uri(),
            account: None,
            token,
        }
    }

    #[test]
    fn test_requires_service_account() {
        let err = GcsBlobstore::new(GcsConfig {
            bucket: "bucket".into(),
            ..GcsConfig::default()
        })
        .err()
        .unwrap();
        assert!(err.to_string().contains("gcs-service-account-json"));
    }

    #[tokio::test]
    async fn test_list_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/bucket/o"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"name": "[cf,1.0]b.pivotal", "size": "4"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/bucket/o"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"name": "[cf,1.0]a.pivotal", "size": "4"}],
                "nextPageToken": "p2"
            })))
            .mount(&server)
            .await;

        let names = store_for(&server).list("").await.unwrap();
        assert_eq!(names, vec!["[cf,1.0]a.pivotal", "[cf,1.0]b.pivotal"]);
    }

    #[tokio::test]
    async fn test_size_and_range() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/bucket/o/tile.pivotal"))
            .and(query_param("alt", "media"))
            .and(header("range", "bytes=2-3"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"cd".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/bucket/o/tile.pivotal"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "tile.pivotal", "size": "1234"
            })))
            .mount(&server)
            .await;

        let store = store_for(&server);
        assert_eq!(store.get_range("tile.pivotal", 2..4).await.unwrap(), Bytes::from_static(b"cd"));
        assert_eq!(store.size("tile.pivotal").await.unwrap(), 1234);
    }
}
