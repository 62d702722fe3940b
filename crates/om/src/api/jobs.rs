//! Jobs, resource configuration and errands of staged products.

use std::collections::BTreeMap;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{Api, ApiError};

/// Errand state: `true`, `false`, `"default"` or `"when-changed"`.
pub type ErrandState = Value;

/// One errand of a staged product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Errand {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_deploy: Option<ErrandState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_delete: Option<ErrandState>,
}

/// Keys of a resource-config entry that are not part of the resource config endpoint.
const NON_RESOURCE_KEYS: &[&str] = &["max_in_flight"];

impl Api {
    /// Job name to job GUID.
    pub async fn list_staged_product_jobs(
        &self,
        product_guid: &str,
    ) -> Result<BTreeMap<String, String>, ApiError> {
        #[derive(Deserialize)]
        struct Job {
            name: String,
            guid: String,
        }
        #[derive(Deserialize)]
        struct Jobs {
            jobs: Vec<Job>,
        }
        let jobs: Jobs = self
            .get_json(&format!("/api/v0/staged/products/{product_guid}/jobs"))
            .await?;
        Ok(jobs.jobs.into_iter().map(|j| (j.name, j.guid)).collect())
    }

    /// Resource config of one job.
    pub async fn job_resource_config(
        &self,
        product_guid: &str,
        job_guid: &str,
    ) -> Result<Value, ApiError> {
        self.get_json(&format!(
            "/api/v0/staged/products/{product_guid}/jobs/{job_guid}/resource_config"
        ))
        .await
    }

    pub async fn update_job_resource_config(
        &self,
        product_guid: &str,
        job_guid: &str,
        config: &Value,
    ) -> Result<(), ApiError> {
        self.send_json(
            Method::PUT,
            &format!("/api/v0/staged/products/{product_guid}/jobs/{job_guid}/resource_config"),
            config,
        )
        .await?;
        Ok(())
    }

    /// Merge per-job settings (keyed by job name) over the current resource configs.
    pub async fn configure_job_resource_config(
        &self,
        product_guid: &str,
        config: &serde_json::Map<String, Value>,
    ) -> Result<(), ApiError> {
        let jobs = self.list_staged_product_jobs(product_guid).await?;

        for (name, wanted) in config {
            let job_guid = jobs.get(name).ok_or_else(|| {
                ApiError::Invalid(format!("product does not contain a job named '{name}'"))
            })?;
            let Some(wanted) = wanted.as_object() else {
                return Err(ApiError::Invalid(format!(
                    "resource config for job '{name}' must be a map"
                )));
            };

            let mut current = self.job_resource_config(product_guid, job_guid).await?;
            if let Some(current) = current.as_object_mut() {
                for (key, value) in wanted {
                    if !NON_RESOURCE_KEYS.contains(&key.as_str()) {
                        current.insert(key.clone(), value.clone());
                    }
                }
            }
            self.update_job_resource_config(product_guid, job_guid, &current)
                .await?;
        }
        Ok(())
    }

    /// Errands of a staged product.
    pub async fn list_staged_product_errands(
        &self,
        product_guid: &str,
    ) -> Result<Vec<Errand>, ApiError> {
        #[derive(Deserialize)]
        struct Errands {
            errands: Vec<Errand>,
        }
        let errands: Errands = self
            .get_json(&format!("/api/v0/staged/products/{product_guid}/errands"))
            .await?;
        Ok(errands.errands)
    }

    /// Set the state of one errand.
    pub async fn update_staged_product_errand(
        &self,
        product_guid: &str,
        errand: &Errand,
    ) -> Result<(), ApiError> {
        self.send_json(
            Method::PUT,
            &format!("/api/v0/staged/products/{product_guid}/errands"),
            &json!({"errands": [errand]}),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::api_for;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_resource_config_is_merged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v0/staged/products/p-guid/jobs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobs": [{"name": "router", "guid": "router-guid"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v0/staged/products/p-guid/jobs/router-guid/resource_config"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "instances": 1,
                "instance_type": {"id": "automatic"},
                "internet_connected": false
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/v0/staged/products/p-guid/jobs/router-guid/resource_config"))
            .and(body_json(json!({
                "instances": 3,
                "instance_type": {"id": "automatic"},
                "internet_connected": false
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let config = json!({"router": {"instances": 3, "max_in_flight": 2}});
        api_for(&server)
            .configure_job_resource_config("p-guid", config.as_object().unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_job_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v0/staged/products/p-guid/jobs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jobs": []})))
            .mount(&server)
            .await;

        let config = json!({"nope": {"instances": 3}});
        let err = api_for(&server)
            .configure_job_resource_config("p-guid", config.as_object().unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "product does not contain a job named 'nope'");
    }
}
