//! Appliance-wide settings and product licenses.

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{Api, ApiError};

/// `PUT /api/v0/settings/syslog` payload. Every value is a string on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyslogSettings {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub enabled: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub port: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub transport_protocol: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tls_enabled: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub permitted_peer: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssl_ca_certificate: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub queue_size: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub forward_debug_logs: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub custom_rsyslog_configuration: String,
}

/// A product license as reported by the appliance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicensedProduct {
    #[serde(default)]
    pub guid: String,
    pub product_name: String,
    #[serde(default)]
    pub product_version: String,
    pub expires_at: DateTime<Utc>,
    /// `staged`, `deployed` or both.
    #[serde(default)]
    pub product_state: Vec<String>,
}

impl Api {
    pub async fn update_pivnet_token(&self, token: &str) -> Result<(), ApiError> {
        self.send_json(
            Method::PUT,
            "/api/v0/settings/pivotal_network_settings",
            &json!({"pivotal_network_settings": {"api_token": token}}),
        )
        .await?;
        Ok(())
    }

    /// Enable role based access control; `settings` carries the LDAP or SAML group fields.
    pub async fn enable_rbac(&self, settings: &Value) -> Result<(), ApiError> {
        self.send_json(Method::PUT, "/api/v0/settings/rbac", settings)
            .await?;
        Ok(())
    }

    pub async fn update_banner(&self, ui_banner: &str, ssh_banner: &str) -> Result<(), ApiError> {
        self.send_json(
            Method::PUT,
            "/api/v0/settings/banner",
            &json!({"ui_banner_contents": ui_banner, "ssh_banner_contents": ssh_banner}),
        )
        .await?;
        Ok(())
    }

    pub async fn update_syslog_settings(&self, settings: &SyslogSettings) -> Result<(), ApiError> {
        self.send_json(
            Method::PUT,
            "/api/v0/settings/syslog",
            &json!({"syslog": settings}),
        )
        .await?;
        Ok(())
    }

    /// Any other settings endpoint, with the body passed through.
    pub async fn update_setting(&self, endpoint: &str, body: &Value) -> Result<(), ApiError> {
        self.send_json(Method::PUT, &format!("/api/v0/settings/{endpoint}"), body)
            .await?;
        Ok(())
    }

    /// Licenses of staged and deployed products.
    pub async fn list_licensed_products(&self) -> Result<Vec<LicensedProduct>, ApiError> {
        self.get_json("/api/v0/licensed_products").await
    }

    /// Licenses expiring before `deadline`, limited to staged and/or deployed
    /// products (both when neither flag is set).
    pub async fn list_expiring_licenses(
        &self,
        deadline: DateTime<Utc>,
        staged: bool,
        deployed: bool,
    ) -> Result<Vec<LicensedProduct>, ApiError> {
        let (staged, deployed) = if staged || deployed {
            (staged, deployed)
        } else {
            (true, true)
        };
        Ok(self
            .list_licensed_products()
            .await?
            .into_iter()
            .filter(|license| license.expires_at <= deadline)
            .filter(|license| {
                license.product_state.is_empty()
                    || license.product_state.iter().any(|state| {
                        (staged && state == "staged") || (deployed && state == "deployed")
                    })
            })
            .collect())
    }
}
