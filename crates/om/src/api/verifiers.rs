//! Install-time verifiers and pre-deploy completeness checks.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Api, ApiError};

const DIRECTOR_VERIFIERS: &str = "/api/v0/staged/director/verifiers/install_time";

/// An install-time verifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verifier {
    #[serde(rename = "type")]
    pub verifier_type: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreDeployStemcell {
    #[serde(default)]
    pub assigned: bool,
    #[serde(default)]
    pub required_stemcell_version: String,
    #[serde(default)]
    pub required_stemcell_os: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreDeployProperty {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub property_type: String,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub records: Vec<PreDeployRecord>,
}

/// Errors of one row of a collection property.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreDeployRecord {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub errors: Vec<PreDeployProperty>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreDeployJob {
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub guid: String,
    #[serde(default, rename = "error")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreDeployResources {
    #[serde(default)]
    pub jobs: Vec<PreDeployJob>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreDeployVerifier {
    #[serde(default, rename = "type")]
    pub verifier_type: String,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub ignorable: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    #[serde(default)]
    pub assigned: bool,
}

/// Completeness of the director or of one staged product.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreDeployCheck {
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub network: Assignment,
    #[serde(default)]
    pub availability_zone: Assignment,
    #[serde(default)]
    pub stemcells: Vec<PreDeployStemcell>,
    #[serde(default)]
    pub properties: Vec<PreDeployProperty>,
    #[serde(default)]
    pub resources: PreDeployResources,
    #[serde(default)]
    pub verifiers: Vec<PreDeployVerifier>,
}

/// Director check followed by one check per staged product.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreDeployReport {
    pub director: PreDeployCheck,
    pub products: Vec<PreDeployCheck>,
}

impl PreDeployReport {
    /// Identifiers of products that are not ready to deploy.
    #[must_use]
    pub fn incomplete_products(&self) -> Vec<&str> {
        self.products
            .iter()
            .filter(|check| !check.complete)
            .map(|check| check.identifier.as_str())
            .collect()
    }
}

#[derive(Deserialize)]
struct CheckResponse {
    pre_deploy_check: PreDeployCheck,
}

#[derive(Deserialize)]
struct VerifierList {
    verifiers: Vec<Verifier>,
}

fn product_verifiers(product_guid: &str) -> String {
    format!("/api/v0/staged/products/{product_guid}/verifiers/install_time")
}

impl Api {
    pub async fn list_director_verifiers(&self) -> Result<Vec<Verifier>, ApiError> {
        let list: VerifierList = self.get_json(DIRECTOR_VERIFIERS).await?;
        Ok(list.verifiers)
    }

    pub async fn disable_director_verifiers(&self, types: &[String]) -> Result<(), ApiError> {
        for verifier in types {
            self.send_json(
                Method::PUT,
                &format!("{DIRECTOR_VERIFIERS}/{verifier}"),
                &json!({"enabled": false}),
            )
            .await?;
        }
        Ok(())
    }

    pub async fn list_product_verifiers(
        &self,
        product_guid: &str,
    ) -> Result<Vec<Verifier>, ApiError> {
        let list: VerifierList = self.get_json(&product_verifiers(product_guid)).await?;
        Ok(list.verifiers)
    }

    pub async fn disable_product_verifiers(
        &self,
        product_guid: &str,
        types: &[String],
    ) -> Result<(), ApiError> {
        let base = product_verifiers(product_guid);
        for verifier in types {
            self.send_json(
                Method::PUT,
                &format!("{base}/{verifier}"),
                &json!({"enabled": false}),
            )
            .await?;
        }
        Ok(())
    }

    pub async fn director_pre_deploy_check(&self) -> Result<PreDeployCheck, ApiError> {
        let response: CheckResponse = self
            .get_json("/api/v0/staged/director/pre_deploy_check")
            .await?;
        Ok(response.pre_deploy_check)
    }

    pub async fn product_pre_deploy_check(
        &self,
        product_guid: &str,
    ) -> Result<PreDeployCheck, ApiError> {
        let response: CheckResponse = self
            .get_json(&format!(
                "/api/v0/staged/products/{product_guid}/pre_deploy_check"
            ))
            .await?;
        Ok(response.pre_deploy_check)
    }

    /// Check the director, then every staged product in listing order.
    pub async fn pre_deploy_report(&self) -> Result<PreDeployReport, ApiError> {
        let director = self.director_pre_deploy_check().await?;
        let mut products = Vec::new();
        for product in self.list_staged_products().await? {
            products.push(self.product_pre_deploy_check(&product.guid).await?);
        }
        Ok(PreDeployReport { director, products })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::api_for;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_disable_director_verifiers() {
        let server = MockServer::start().await;
        for verifier in ["IaasConfigurationVerifier", "NetworksExistenceVerifier"] {
            Mock::given(method("PUT"))
                .and(path(format!("{DIRECTOR_VERIFIERS}/{verifier}")))
                .and(body_json(json!({"enabled": false})))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(&server)
                .await;
        }

        api_for(&server)
            .disable_director_verifiers(&[
                "IaasConfigurationVerifier".into(),
                "NetworksExistenceVerifier".into(),
            ])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_product_verifiers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v0/staged/products/cf-guid/verifiers/install_time"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"verifiers": [
                {"type": "WildcardDomainVerifier", "enabled": true}
            ]})))
            .mount(&server)
            .await;

        let verifiers = api_for(&server).list_product_verifiers("cf-guid").await.unwrap();
        assert_eq!(
            verifiers,
            vec![Verifier {
                verifier_type: "WildcardDomainVerifier".into(),
                enabled: true
            }]
        );
    }

    #[tokio::test]
    async fn test_pre_deploy_report() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v0/staged/director/pre_deploy_check"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"pre_deploy_check": {
                "identifier": "p-bosh", "complete": true,
                "network": {"assigned": true}, "availability_zone": {"assigned": true}
            }})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v0/staged/products"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"guid": "cf-guid", "type": "cf"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v0/staged/products/cf-guid/pre_deploy_check"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"pre_deploy_check": {
                "identifier": "cf", "complete": false,
                "resources": {"jobs": [{"identifier": "router", "guid": "r", "error": ["bad"]}]}
            }})))
            .mount(&server)
            .await;

        let report = api_for(&server).pre_deploy_report().await.unwrap();
        assert!(report.director.complete);
        assert_eq!(report.incomplete_products(), vec!["cf"]);
        assert_eq!(report.products[0].resources.jobs[0].errors, vec!["bad"]);
    }
}
