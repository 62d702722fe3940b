//! Available, staged and deployed products.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::director::ManifestDiff;
use super::{decode, Api, ApiError, NamedDiff};
use crate::formcontent::Form;
use crate::network::{ProgressOptions, Request};

const AVAILABLE_PRODUCTS: &str = "/api/v0/available_products";
const STAGED_PRODUCTS: &str = "/api/v0/staged/products";
const DEPLOYED_PRODUCTS: &str = "/api/v0/deployed/products";

/// An uploaded tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableProduct {
    pub name: String,
    #[serde(rename = "product_version")]
    pub version: String,
}

/// A product on the staging area.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedProduct {
    pub guid: String,
    #[serde(rename = "type")]
    pub product_type: String,
    #[serde(default)]
    pub installation_name: String,
    #[serde(default)]
    pub product_version: String,
}

/// A product that has been deployed at least once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedProduct {
    pub guid: String,
    #[serde(rename = "type")]
    pub product_type: String,
    #[serde(default)]
    pub installation_name: String,
    #[serde(default)]
    pub product_version: String,
}

/// One entry of `GET .../properties`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseProperty {
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_option: Option<String>,
    #[serde(default)]
    pub configurable: bool,
    #[serde(default, rename = "credential")]
    pub is_credential: bool,
    #[serde(default, rename = "type")]
    pub property_type: String,
    #[serde(default)]
    pub optional: bool,
}

impl ResponseProperty {
    /// Whether the property holds a list of records.
    #[must_use]
    pub fn is_collection(&self) -> bool {
        self.property_type == "collection"
    }
}

/// Pending manifest changes of a staged product.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProductDiff {
    #[serde(default)]
    pub manifest: ManifestDiff,
    #[serde(default)]
    pub runtime_configs: Vec<NamedDiff>,
}

/// What [`Api::stage_product`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The same version is already staged.
    AlreadyStaged,
    /// A fresh product was added.
    Added,
    /// An existing product was moved to the new version.
    Upgraded { guid: String },
}

impl Api {
    /// Upload a tile. The form must carry a `product[file]` part.
    pub async fn upload_available_product(
        &self,
        form: Form,
        polling_interval: Duration,
    ) -> Result<(), ApiError> {
        let request = Request::post(AVAILABLE_PRODUCTS)
            .multipart(form)
            .with_progress(ProgressOptions {
                tick_interval: polling_interval,
            });
        self.expect_ok(request).await?;
        Ok(())
    }

    /// Everything uploaded.
    pub async fn list_available_products(&self) -> Result<Vec<AvailableProduct>, ApiError> {
        self.get_json(AVAILABLE_PRODUCTS).await
    }

    /// Whether `name` at `version` has been uploaded.
    pub async fn check_product_availability(
        &self,
        name: &str,
        version: &str,
    ) -> Result<bool, ApiError> {
        Ok(self
            .list_available_products()
            .await?
            .iter()
            .any(|p| p.name == name && p.version == version))
    }

    /// Delete one product version, or every unused product when `product` is `None`.
    pub async fn delete_available_products(
        &self,
        product: Option<(&str, &str)>,
    ) -> Result<(), ApiError> {
        let path = match product {
            Some((name, version)) => format!(
                "{AVAILABLE_PRODUCTS}?product_name={}&version={}",
                urlencoding::encode(name),
                urlencoding::encode(version)
            ),
            None => AVAILABLE_PRODUCTS.to_string(),
        };
        self.expect_ok(Request::delete(path)).await?;
        Ok(())
    }

    /// Products on the staging area.
    pub async fn list_staged_products(&self) -> Result<Vec<StagedProduct>, ApiError> {
        self.get_json(STAGED_PRODUCTS).await
    }

    /// Products that have been deployed.
    pub async fn list_deployed_products(&self) -> Result<Vec<DeployedProduct>, ApiError> {
        self.get_json(DEPLOYED_PRODUCTS).await
    }

    /// The staged product whose type is `name`, if any.
    pub async fn find_staged_product(&self, name: &str) -> Result<Option<StagedProduct>, ApiError> {
        Ok(self
            .list_staged_products()
            .await?
            .into_iter()
            .find(|p| p.product_type == name))
    }

    /// GUID of the staged product `name`, or [`ApiError::ProductNotStaged`].
    pub async fn staged_product_guid(&self, name: &str) -> Result<String, ApiError> {
        self.find_staged_product(name)
            .await?
            .map(|p| p.guid)
            .ok_or_else(|| ApiError::ProductNotStaged(name.to_string()))
    }

    /// GUID of the deployed product `name`, or [`ApiError::ProductNotStaged`].
    pub async fn deployed_product_guid(&self, name: &str) -> Result<String, ApiError> {
        self.list_deployed_products()
            .await?
            .into_iter()
            .find(|p| p.product_type == name)
            .map(|p| p.guid)
            .ok_or_else(|| ApiError::ProductNotStaged(name.to_string()))
    }

    /// Stage `name` at `version`, adding or upgrading as the current state requires.
    pub async fn stage_product(&self, name: &str, version: &str) -> Result<StageOutcome, ApiError> {
        if !self.check_product_availability(name, version).await? {
            return Err(ApiError::ProductNotAvailable {
                name: name.to_string(),
                version: version.to_string(),
            });
        }

        let staged = self.find_staged_product(name).await?;
        if let Some(staged) = &staged {
            if staged.product_version == version {
                return Ok(StageOutcome::AlreadyStaged);
            }
        }

        let deployed = self
            .list_deployed_products()
            .await?
            .into_iter()
            .find(|p| p.product_type == name);

        let guid = deployed.map(|p| p.guid).or(staged.map(|p| p.guid));
        debug!(product = %name, version = %version, guid = ?guid, "staging product");
        match guid {
            None => {
                self.send_json(
                    Method::POST,
                    STAGED_PRODUCTS,
                    &json!({"name": name, "product_version": version}),
                )
                .await?;
                Ok(StageOutcome::Added)
            }
            Some(guid) => {
                self.send_json(
                    Method::PUT,
                    &format!("{STAGED_PRODUCTS}/{guid}"),
                    &json!({"to_version": version}),
                )
                .await?;
                Ok(StageOutcome::Upgraded { guid })
            }
        }
    }

    /// Remove `name` from the staging area.
    pub async fn unstage_product(&self, name: &str) -> Result<(), ApiError> {
        let guid = self
            .find_staged_product(name)
            .await?
            .map(|p| p.guid)
            .ok_or_else(|| ApiError::Invalid(format!("product is not staged: {name}")))?;
        self.send_json(Method::DELETE, &format!("{STAGED_PRODUCTS}/{guid}"), &json!({}))
            .await?;
        Ok(())
    }

    /// Current properties of a staged product, keyed by reference.
    pub async fn staged_product_properties(
        &self,
        guid: &str,
    ) -> Result<BTreeMap<String, ResponseProperty>, ApiError> {
        #[derive(Deserialize)]
        struct Properties {
            properties: BTreeMap<String, ResponseProperty>,
        }
        let response: Properties = self
            .get_json(&format!("{STAGED_PRODUCTS}/{guid}/properties"))
            .await?;
        Ok(response.properties)
    }

    /// Update properties, keeping GUIDs of collection rows that already exist.
    pub async fn update_staged_product_properties(
        &self,
        guid: &str,
        mut properties: Value,
    ) -> Result<(), ApiError> {
        let current = self.staged_product_properties(guid).await?;
        super::assign_collection_guids(self, guid, &mut properties, &current).await?;
        self.send_json(
            Method::PUT,
            &format!("{STAGED_PRODUCTS}/{guid}/properties"),
            &json!({"properties": properties}),
        )
        .await?;
        Ok(())
    }

    /// Network and AZ placement, `None` when the product has none.
    pub async fn staged_product_networks_and_azs(
        &self,
        guid: &str,
    ) -> Result<Option<Value>, ApiError> {
        #[derive(Deserialize)]
        struct Networks {
            networks_and_azs: Value,
        }
        match self
            .get_json::<Networks>(&format!("{STAGED_PRODUCTS}/{guid}/networks_and_azs"))
            .await
        {
            Ok(n) => Ok(Some(n.networks_and_azs)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn update_staged_product_networks_and_azs(
        &self,
        guid: &str,
        networks: Value,
    ) -> Result<(), ApiError> {
        self.send_json(
            Method::PUT,
            &format!("{STAGED_PRODUCTS}/{guid}/networks_and_azs"),
            &json!({"networks_and_azs": networks}),
        )
        .await?;
        Ok(())
    }

    /// Syslog settings of a staged product, `None` when unsupported.
    pub async fn staged_product_syslog_configuration(
        &self,
        guid: &str,
    ) -> Result<Option<Value>, ApiError> {
        #[derive(Deserialize)]
        struct Syslog {
            syslog_configuration: Value,
        }
        match self
            .get_json::<Syslog>(&format!("{STAGED_PRODUCTS}/{guid}/syslog_configuration"))
            .await
        {
            Ok(s) => Ok(Some(s.syslog_configuration)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn update_syslog_configuration(
        &self,
        guid: &str,
        syslog: Value,
    ) -> Result<(), ApiError> {
        self.send_json(
            Method::PUT,
            &format!("{STAGED_PRODUCTS}/{guid}/syslog_configuration"),
            &json!({"syslog_configuration": syslog}),
        )
        .await?;
        Ok(())
    }

    /// The BOSH manifest the staged product would deploy, as YAML.
    pub async fn staged_product_manifest(&self, guid: &str) -> Result<String, ApiError> {
        #[derive(Deserialize)]
        struct Manifest {
            manifest: serde_yaml::Value,
        }
        let response: Manifest = self
            .get_json(&format!("{STAGED_PRODUCTS}/{guid}/manifest"))
            .await?;
        serde_yaml::to_string(&response.manifest).map_err(|e| ApiError::Decode {
            what: "staged manifest".into(),
            reason: e.to_string(),
        })
    }

    /// The last deployed manifest, as returned by the appliance.
    pub async fn deployed_product_manifest(&self, guid: &str) -> Result<String, ApiError> {
        let response = self
            .expect_ok(Request::get(format!("{DEPLOYED_PRODUCTS}/{guid}/manifest")))
            .await?;
        Ok(response.text().await?)
    }

    /// Max-in-flight per job GUID.
    pub async fn staged_product_max_in_flight(
        &self,
        guid: &str,
    ) -> Result<BTreeMap<String, Value>, ApiError> {
        #[derive(Deserialize)]
        struct MaxInFlight {
            max_in_flight: BTreeMap<String, Value>,
        }
        let response: MaxInFlight = self
            .get_json(&format!("{STAGED_PRODUCTS}/{guid}/max_in_flight"))
            .await?;
        Ok(response.max_in_flight)
    }

    /// Set max-in-flight for the given job GUIDs. Values are ints, percentages or `default`.
    pub async fn update_staged_product_max_in_flight(
        &self,
        guid: &str,
        jobs: &BTreeMap<String, Value>,
    ) -> Result<(), ApiError> {
        if jobs.is_empty() {
            return Ok(());
        }
        for (job, value) in jobs {
            validate_max_in_flight(job, value)?;
        }
        self.send_json(
            Method::PUT,
            &format!("{STAGED_PRODUCTS}/{guid}/max_in_flight"),
            &json!({"max_in_flight": jobs}),
        )
        .await?;
        Ok(())
    }

    /// Manifest and runtime config changes a deploy of `name` would make.
    pub async fn product_diff(&self, name: &str) -> Result<ProductDiff, ApiError> {
        let guid = self.staged_product_guid(name).await?;
        let path = format!("/api/v0/products/{guid}/diff");
        let response = self.expect_ok(Request::get(path.as_str())).await?;
        decode(response, "product diff").await
    }
}

fn validate_max_in_flight(job: &str, value: &Value) -> Result<(), ApiError> {
    let valid = match value {
        Value::Number(n) => n.as_u64().is_some(),
        Value::String(s) => {
            s == "default"
                || s.strip_suffix('%')
                    .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ApiError::Invalid(format!(
            "invalid max_in_flight value provided for job '{job}': '{value}'\nvalid options configurations include an 'integer', 'default', and a 'percentage'"
        )))
    }
}
