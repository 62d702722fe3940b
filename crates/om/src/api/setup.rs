//! First-boot authentication setup and readiness probing.

use std::collections::BTreeMap;

use serde::Serialize;
use url::Url;

use super::{Api, ApiError};
use crate::network::{Request, WAITING_FOR_AUTH};

/// Authentication backend chosen at setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityProvider {
    Internal,
    Ldap,
    Saml,
}

/// Payload of `POST /api/v0/setup`.
///
/// Provider specific settings (LDAP servers, SAML metadata) travel in
/// `extra` and are merged into the `setup` object as-is.
#[derive(Debug, Clone, Serialize)]
pub struct SetupInput {
    pub identity_provider: IdentityProvider,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub admin_user_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub admin_password: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub admin_password_confirmation: String,
    pub decryption_passphrase: String,
    pub decryption_passphrase_confirmation: String,
    #[serde(serialize_with = "bool_string")]
    pub eula_accepted: bool,
    #[serde(rename = "http_proxy", skip_serializing_if = "String::is_empty")]
    pub http_proxy_url: String,
    #[serde(rename = "https_proxy", skip_serializing_if = "String::is_empty")]
    pub https_proxy_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub no_proxy: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl SetupInput {
    /// Input for the given provider with the passphrase set twice.
    #[must_use]
    pub fn new(identity_provider: IdentityProvider, decryption_passphrase: &str) -> Self {
        Self {
            identity_provider,
            admin_user_name: String::new(),
            admin_password: String::new(),
            admin_password_confirmation: String::new(),
            decryption_passphrase: decryption_passphrase.to_string(),
            decryption_passphrase_confirmation: decryption_passphrase.to_string(),
            eula_accepted: true,
            http_proxy_url: String::new(),
            https_proxy_url: String::new(),
            no_proxy: String::new(),
            extra: BTreeMap::new(),
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn bool_string<S: serde::Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(if *value { "true" } else { "false" })
}

/// Answer of `GET /login/ensure_availability`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Redirected to `/setup`: authentication was never configured.
    Unstarted,
    /// The auth system is still booting.
    Pending,
    /// Redirected to the login page.
    Complete,
}

impl Api {
    /// Configure authentication on a fresh appliance.
    pub async fn setup(&self, input: &SetupInput) -> Result<(), ApiError> {
        #[derive(Serialize)]
        struct Payload<'a> {
            setup: &'a SetupInput,
        }

        let path = "/api/v0/setup";
        let request = Request::post(path).json(&Payload { setup: input })?;
        let response = self.send_unauthenticated(request).await?;
        super::check(response, path, super::StatusPolicy::Plain).await?;
        Ok(())
    }

    /// Probe the login page to learn how far the appliance has booted.
    pub async fn ensure_availability(&self) -> Result<Availability, ApiError> {
        let response = self
            .send_unauthenticated(Request::get("/login/ensure_availability"))
            .await?;
        let status = response.status();

        if status == reqwest::StatusCode::FOUND {
            let location = response.location().unwrap_or_default().to_string();
            let path = Url::parse(&location)
                .or_else(|_| Url::parse("http://placeholder").and_then(|u| u.join(&location)))
                .map(|u| u.path().to_string())
                .map_err(|e| ApiError::Invalid(format!("could not parse redirect url: {e}")))?;
            return match path.as_str() {
                "/setup" => Ok(Availability::Unstarted),
                "/auth/cloudfoundry" => Ok(Availability::Complete),
                other => Err(ApiError::Invalid(format!(
                    "Unexpected redirect location: {other}"
                ))),
            };
        }

        if status == reqwest::StatusCode::OK {
            let body = response.text().await?;
            if body.contains(WAITING_FOR_AUTH) {
                return Ok(Availability::Pending);
            }
            return Err(ApiError::Invalid(format!(
                "Received OK with an unexpected body: {body}"
            )));
        }

        Err(ApiError::Invalid(format!(
            "Unexpected response code: {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or_default()
        )))
    }
}
