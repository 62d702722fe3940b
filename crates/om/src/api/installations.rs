//! Installations (apply changes), pending changes, revert and the
//! installation asset collection.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::BufWriter;

use super::{decode, Api, ApiError};
use crate::formcontent::Form;
use crate::network::{ProgressOptions, Request};

const INSTALLATIONS: &str = "/api/v0/installations";
const ASSET_COLLECTION: &str = "/api/v0/installation_asset_collection";

/// Status of an installation job. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallationStatus {
    Running,
    Succeeded,
    Failed,
    #[serde(other)]
    Unknown,
}

impl InstallationStatus {
    /// Whether the job has finished.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// An installation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    pub id: u64,
    pub status: InstallationStatus,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Which products an apply-changes deploys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployProducts {
    All,
    None,
    /// Only these product names (resolved to GUIDs before sending).
    Named(Vec<String>),
}

/// Errand overrides for one apply-changes, keyed by product name.
///
/// ```yaml
/// errands:
///   cf:
///     run_post_deploy:
///       smoke_tests: false
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrandChanges {
    #[serde(default)]
    pub errands: BTreeMap<String, ProductErrands>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductErrands {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub run_post_deploy: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub run_pre_delete: BTreeMap<String, Value>,
}

/// One entry of `GET /api/v0/staged/pending_changes`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    pub guid: String,
    pub action: String,
    #[serde(default)]
    pub errands: Vec<Value>,
    #[serde(default)]
    pub completeness_checks: Option<CompletenessChecks>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletenessChecks {
    #[serde(default)]
    pub configuration_complete: bool,
    #[serde(default)]
    pub stemcell_present: bool,
    #[serde(default)]
    pub configurable_properties_valid: bool,
}

#[derive(Deserialize)]
struct InstallResponse {
    install: InstallId,
}

#[derive(Deserialize)]
struct InstallId {
    id: u64,
}

impl Api {
    /// Installation history, newest first.
    pub async fn list_installations(&self) -> Result<Vec<Installation>, ApiError> {
        #[derive(Deserialize)]
        struct List {
            installations: Vec<Installation>,
        }
        let list: List = self.get_json(INSTALLATIONS).await?;
        Ok(list.installations)
    }

    /// The newest installation if it is still running.
    pub async fn running_installation(&self) -> Result<Option<Installation>, ApiError> {
        Ok(self
            .list_installations()
            .await?
            .into_iter()
            .next()
            .filter(|i| i.status == InstallationStatus::Running))
    }

    /// Start an apply-changes.
    pub async fn create_installation(
        &self,
        ignore_warnings: bool,
        deploy: &DeployProducts,
        errands: &ErrandChanges,
    ) -> Result<Installation, ApiError> {
        let needs_guids = matches!(deploy, DeployProducts::Named(_)) || !errands.errands.is_empty();
        let staged = if needs_guids {
            self.list_staged_products().await?
        } else {
            Vec::new()
        };
        let guid_of = |name: &str| {
            staged
                .iter()
                .find(|p| p.product_type == name)
                .map(|p| p.guid.clone())
                .ok_or_else(|| ApiError::ProductNotStaged(name.to_string()))
        };

        let deploy_products = match deploy {
            DeployProducts::All => json!("all"),
            DeployProducts::None => json!("none"),
            DeployProducts::Named(names) => Value::Array(
                names
                    .iter()
                    .map(|name| guid_of(name).map(Value::String))
                    .collect::<Result<_, _>>()?,
            ),
        };

        let mut errand_body = serde_json::Map::new();
        for (name, product_errands) in &errands.errands {
            errand_body.insert(
                guid_of(name)?,
                serde_json::to_value(product_errands).map_err(crate::network::NetworkError::from)?,
            );
        }

        let mut body = json!({
            "ignore_warnings": ignore_warnings.to_string(),
            "force_latest_variables": false,
            "deploy_products": deploy_products,
        });
        if !errand_body.is_empty() {
            body["errands"] = Value::Object(errand_body);
        }

        let response = self
            .expect_ok(Request::post(INSTALLATIONS).json(&body)?.without_retry())
            .await?;
        let created: InstallResponse = decode(response, "installation").await?;
        Ok(Installation {
            id: created.install.id,
            status: InstallationStatus::Running,
            user_name: String::new(),
            started_at: None,
            finished_at: None,
        })
    }

    /// Current status of installation `id`.
    pub async fn installation_status(&self, id: u64) -> Result<InstallationStatus, ApiError> {
        #[derive(Deserialize)]
        struct Status {
            status: InstallationStatus,
        }
        let status: Status = self.get_json(&format!("{INSTALLATIONS}/{id}")).await?;
        Ok(status.status)
    }

    /// Cumulative log of installation `id`.
    pub async fn installation_logs(&self, id: u64) -> Result<String, ApiError> {
        #[derive(Deserialize)]
        struct Logs {
            logs: String,
        }
        let logs: Logs = self.get_json(&format!("{INSTALLATIONS}/{id}/logs")).await?;
        Ok(logs.logs)
    }

    /// Products with staged changes.
    pub async fn pending_changes(&self) -> Result<Vec<PendingChange>, ApiError> {
        #[derive(Deserialize)]
        struct Changes {
            product_changes: Vec<PendingChange>,
        }
        let changes: Changes = self.get_json("/api/v0/staged/pending_changes").await?;
        Ok(changes.product_changes)
    }

    /// Discard staged changes. Returns `false` if there was nothing to revert.
    pub async fn revert_staged_changes(&self) -> Result<bool, ApiError> {
        let path = "/api/v0/staged";
        let response = self.send(Request::delete(path)).await?;
        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            return Ok(false);
        }
        super::check(response, path, super::StatusPolicy::Plain).await?;
        Ok(true)
    }

    /// Tear down every product and the director. `None` if nothing is installed.
    pub async fn delete_installation(&self) -> Result<Option<Installation>, ApiError> {
        let request = Request::delete(ASSET_COLLECTION)
            .json(&json!({"errands": {}}))?
            .without_retry();
        let response = self.send(request).await?;
        if response.status() == reqwest::StatusCode::GONE {
            return Ok(None);
        }
        let response = super::check(response, ASSET_COLLECTION, super::StatusPolicy::Plain).await?;
        let created: InstallResponse = decode(response, "delete installation").await?;
        Ok(Some(Installation {
            id: created.install.id,
            status: InstallationStatus::Running,
            user_name: String::new(),
            started_at: None,
            finished_at: None,
        }))
    }

    /// Stream the installation export into `output`.
    pub async fn export_installation(
        &self,
        output: &Path,
        polling_interval: Duration,
    ) -> Result<u64, ApiError> {
        let request = Request::get(ASSET_COLLECTION).with_progress(ProgressOptions {
            tick_interval: polling_interval,
        });
        let response = self.expect_ok(request).await?;
        let file = tokio::fs::File::create(output)
            .await
            .map_err(crate::network::NetworkError::from)?;
        let mut writer = BufWriter::new(file);
        Ok(response.copy_to(&mut writer).await?)
    }

    /// Upload an installation export to a fresh appliance.
    pub async fn import_installation(
        &self,
        form: Form,
        polling_interval: Duration,
    ) -> Result<(), ApiError> {
        let request = Request::post(ASSET_COLLECTION)
            .multipart(form)
            .with_progress(ProgressOptions {
                tick_interval: polling_interval,
            });
        let response = self.send_unauthenticated(request).await?;
        super::check(response, ASSET_COLLECTION, super::StatusPolicy::Plain).await?;
        Ok(())
    }
}
