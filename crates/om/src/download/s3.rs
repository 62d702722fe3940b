//! S3 compatible blob store.
//!
//! Path-style requests signed with AWS Signature Version 4 (or the legacy
//! v2 scheme for stores that need it). Credentials come from flags or, with
//! `--s3-auth-type iam`, from the instance metadata service.

use std::ops::Range;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

use super::traits::Blobstore;
use super::{ensure_success, DownloadError, REQUEST_TIMEOUT};

const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
const METADATA_ENDPOINT: &str = "http://169.254.169.254/latest";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum S3AuthType {
    #[default]
    AccessKey,
    Iam,
}

impl std::str::FromStr for S3AuthType {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "accesskey" => Ok(Self::AccessKey),
            "iam" => Ok(Self::Iam),
            other => Err(DownloadError::Config(format!(
                "unsupported s3-auth-type {other:?}: use \"accesskey\" or \"iam\""
            ))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct S3Config {
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub endpoint: String,
    pub disable_ssl: bool,
    pub enable_v2_signing: bool,
    pub auth_type: S3AuthType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

pub struct S3Blobstore {
    client: Client,
    config: S3Config,
    endpoint: Url,
    credentials: OnceCell<AwsCredentials>,
}

impl S3Blobstore {
    /// Validate `config` and build the client.
    pub fn new(config: S3Config) -> Result<Self, DownloadError> {
        if config.bucket.is_empty() {
            return Err(DownloadError::Config("the flag \"blobstore-bucket\" is required".into()));
        }
        if config.region.is_empty() {
            return Err(DownloadError::Config("the flag \"s3-region-name\" is required".into()));
        }
        if config.auth_type == S3AuthType::AccessKey
            && (config.access_key_id.is_empty() || config.secret_access_key.is_empty())
        {
            return Err(DownloadError::Config(
                "the flags \"s3-access-key-id\" and \"s3-secret-access-key\" are required when the \"auth-type\" is \"accesskey\"".into(),
            ));
        }

        let scheme = if config.disable_ssl { "http" } else { "https" };
        let raw = if config.endpoint.is_empty() {
            format!("{scheme}://s3.{}.amazonaws.com", config.region)
        } else if config.endpoint.contains("://") {
            config.endpoint.clone()
        } else {
            format!("{scheme}://{}", config.endpoint)
        };
        let endpoint = Url::parse(&raw)
            .map_err(|e| DownloadError::Config(format!("invalid s3-endpoint {raw:?}: {e}")))?;

        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        let credentials = OnceCell::new();
        if config.auth_type == S3AuthType::AccessKey {
            let _ = credentials.set(AwsCredentials {
                access_key_id: config.access_key_id.clone(),
                secret_access_key: config.secret_access_key.clone(),
                session_token: None,
            });
        }

        Ok(Self {
            client,
            config,
            endpoint,
            credentials,
        })
    }

    async fn credentials(&self) -> Result<&AwsCredentials, DownloadError> {
        self.credentials
            .get_or_try_init(|| instance_credentials(&self.client))
            .await
    }

    fn location(&self) -> String {
        if self.config.endpoint.is_empty() {
            format!("bucket '{}'", self.config.bucket)
        } else {
            format!(
                "endpoint and bucket '{}/{}'",
                self.config.endpoint, self.config.bucket
            )
        }
    }

    fn object_path(&self, key: &str) -> String {
        let mut path = format!("/{}", uri_encode(&self.config.bucket));
        for segment in key.trim_start_matches('/').split('/') {
            path.push('/');
            path.push_str(&uri_encode(segment));
        }
        path
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        extra_headers: Vec<(String, String)>,
    ) -> Result<reqwest::Response, DownloadError> {
        let credentials = self.credentials().await?;

        let mut query: Vec<(String, String)> = query
            .iter()
            .map(|(k, v)| (uri_encode(k), uri_encode(v)))
            .collect();
        query.sort();
        let query_string = query
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        let mut url = self.endpoint.clone();
        url.set_path(path);
        url.set_query((!query_string.is_empty()).then_some(query_string.as_str()));

        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(DownloadError::Config(format!("s3 endpoint {url} has no host"))),
        };

        let now = Utc::now();
        let headers = if self.config.enable_v2_signing {
            sign_v2(
                credentials,
                method.as_str(),
                path,
                &extra_headers,
                now,
            )
        } else {
            sign_v4(
                credentials,
                &self.config.region,
                &SigningInput {
                    method: method.as_str(),
                    host: &host,
                    path,
                    query: &query_string,
                    headers: &extra_headers,
                    payload_hash: EMPTY_SHA256,
                    now,
                },
            )
        };

        debug!(method = %method, url = %url, "s3 request");
        let mut request = self.client.request(method, url);
        for (name, value) in extra_headers.iter().chain(headers.iter()) {
            request = request.header(name.as_str(), value.as_str());
        }
        Ok(request.send().await?)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    contents: Vec<ListedObject>,
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_continuation_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedObject {
    key: String,
}

#[async_trait]
impl Blobstore for S3Blobstore {
    fn kind(&self) -> &'static str {
        "s3"
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, DownloadError> {
        let path = format!("/{}", uri_encode(&self.config.bucket));
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut query = vec![("list-type", "2".to_string())];
            if !prefix.is_empty() {
                query.push(("prefix", prefix.to_string()));
            }
            if let Some(token) = &continuation {
                query.push(("continuation-token", token.clone()));
            }

            let response = self.send(Method::GET, &path, &query, Vec::new()).await;
            let response = match response {
                Ok(r) if r.status().is_success() => r,
                Ok(r) => {
                    let status = r.status();
                    let body = r.text().await.unwrap_or_default();
                    return Err(DownloadError::BucketMissing {
                        location: self.location(),
                        reason: format!("{status}: {body}"),
                    });
                }
                Err(DownloadError::Http(e)) => {
                    return Err(DownloadError::BucketMissing {
                        location: self.location(),
                        reason: e.to_string(),
                    })
                }
                Err(e) => return Err(e),
            };

            let body = response.text().await?;
            let page: ListBucketResult = quick_xml::de::from_str(&body)
                .map_err(|e| DownloadError::Decode(e.to_string()))?;
            keys.extend(page.contents.into_iter().map(|o| o.key));

            match page.next_continuation_token {
                Some(token) if page.is_truncated => continuation = Some(token),
                _ => break,
            }
        }
        Ok(keys)
    }

    async fn size(&self, key: &str) -> Result<u64, DownloadError> {
        let response = self
            .send(Method::HEAD, &self.object_path(key), &[], Vec::new())
            .await?;
        let response = ensure_success(response).await?;
        response
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
        let header = vec![(
            "range".to_string(),
            format!("bytes={}-{}", range.start, range.end - 1),
        )];
        let response = self
            .send(Method::GET, &self.object_path(key), &[], header)
            .await?;
        if response.status() != StatusCode::PARTIAL_CONTENT {
            let response = ensure_success(response).await?;
            return Ok(response.bytes().await?);
        }
        Ok(response.bytes().await?)
    }
}

/// AWS URI encoding: everything but unreserved characters is escaped.
fn uri_encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(key) else {
        return Vec::new();
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

struct SigningInput<'a> {
    method: &'a str,
    host: &'a str,
    path: &'a str,
    /// Already encoded and sorted.
    query: &'a str,
    headers: &'a [(String, String)],
    payload_hash: &'a str,
    now: DateTime<Utc>,
}

/// Headers carrying a Signature Version 4 authorization.
fn sign_v4(
    credentials: &AwsCredentials,
    region: &str,
    input: &SigningInput<'_>,
) -> Vec<(String, String)> {
    let amz_date = input.now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = input.now.format("%Y%m%d").to_string();

    let mut signed: Vec<(String, String)> = input
        .headers
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.trim().to_string()))
        .collect();
    signed.push(("host".into(), input.host.to_string()));
    signed.push(("x-amz-content-sha256".into(), input.payload_hash.to_string()));
    signed.push(("x-amz-date".into(), amz_date.clone()));
    if let Some(token) = &credentials.session_token {
        signed.push(("x-amz-security-token".into(), token.clone()));
    }
    signed.sort();

    let canonical_headers: String = signed.iter().map(|(k, v)| format!("{k}:{v}\n")).collect();
    let signed_headers = signed
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{}\n{}\n{}\n{canonical_headers}\n{signed_headers}\n{}",
        input.method, input.path, input.query, input.payload_hash
    );
    let scope = format!("{date}/{region}/s3/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let k_date = hmac_sha256(
        format!("AWS4{}", credentials.secret_access_key).as_bytes(),
        date.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"s3");
    let k_signing = hmac_sha256(&k_service, b"aws4_request");
    let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()));

    let mut headers = vec![
        ("x-amz-date".to_string(), amz_date),
        (
            "x-amz-content-sha256".to_string(),
            input.payload_hash.to_string(),
        ),
        (
            "authorization".to_string(),
            format!(
                "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
                credentials.access_key_id
            ),
        ),
    ];
    if let Some(token) = &credentials.session_token {
        headers.push(("x-amz-security-token".into(), token.clone()));
    }
    headers
}

/// Headers carrying a legacy v2 authorization.
fn sign_v2(
    credentials: &AwsCredentials,
    method: &str,
    path: &str,
    extra_headers: &[(String, String)],
    now: DateTime<Utc>,
) -> Vec<(String, String)> {
    let date = now.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    let mut amz: Vec<(String, String)> = extra_headers
        .iter()
        .filter(|(k, _)| k.to_lowercase().starts_with("x-amz-"))
        .map(|(k, v)| (k.to_lowercase(), v.trim().to_string()))
        .collect();
    if let Some(token) = &credentials.session_token {
        amz.push(("x-amz-security-token".into(), token.clone()));
    }
    amz.sort();
    let amz_headers: String = amz.iter().map(|(k, v)| format!("{k}:{v}\n")).collect();

    // Bucket-level resources keep their trailing slash.
    let resource = if path.matches('/').count() == 1 {
        format!("{path}/")
    } else {
        path.to_string()
    };
    let string_to_sign = format!("{method}\n\n\n{date}\n{amz_headers}{resource}");
    let signature = match Hmac::<Sha1>::new_from_slice(credentials.secret_access_key.as_bytes()) {
        Ok(mut mac) => {
            mac.update(string_to_sign.as_bytes());
            base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    };

    let mut headers = vec![
        ("date".to_string(), date),
        (
            "authorization".to_string(),
            format!("AWS {}:{signature}", credentials.access_key_id),
        ),
    ];
    if let Some(token) = &credentials.session_token {
        headers.push(("x-amz-security-token".into(), token.clone()));
    }
    headers
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceCredentials {
    access_key_id: String,
    secret_access_key: String,
    #[serde(default)]
    token: Option<String>,
}

/// Role credentials from the instance metadata service (IMDSv2).
async fn instance_credentials(client: &Client) -> Result<AwsCredentials, DownloadError> {
    let timeout = Duration::from_secs(5);
    let token = ensure_success(
        client
            .put(format!("{METADATA_ENDPOINT}/api/token"))
            .header("X-aws-ec2-metadata-token-ttl-seconds", "21600")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| DownloadError::Auth(format!("instance metadata unavailable: {e}")))?,
    )
    .await?
    .text()
    .await?;

    let credentials_url = format!("{METADATA_ENDPOINT}/meta-data/iam/security-credentials/");
    let role = ensure_success(
        client
            .get(&credentials_url)
            .header("X-aws-ec2-metadata-token", &token)
            .timeout(timeout)
            .send()
            .await?,
    )
    .await?
    .text()
    .await?;
    let role = role.lines().next().unwrap_or_default().trim().to_string();
    if role.is_empty() {
        return Err(DownloadError::Auth("no IAM role attached to this instance".into()));
    }

    let creds: InstanceCredentials = ensure_success(
        client
            .get(format!("{credentials_url}{role}"))
            .header("X-aws-ec2-metadata-token", &token)
            .timeout(timeout)
            .send()
            .await?,
    )
    .await?
    .json()
    .await?;

    Ok(AwsCredentials {
        access_key_id: creds.access_key_id,
        secret_access_key: creds.secret_access_key,
        session_token: creds.token,
    })
}
