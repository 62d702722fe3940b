//! Stemcell uploads and product stemcell assignments.

use std::time::Duration;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Api, ApiError};
use crate::formcontent::Form;
use crate::network::{ProgressOptions, Request};

const ASSIGNMENTS: &str = "/api/v0/stemcell_assignments";

/// An OS and version pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StemcellRef {
    pub os: String,
    pub version: String,
}

/// Stemcell state of one staged product.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductStemcells {
    #[serde(default)]
    pub guid: String,
    #[serde(default, rename = "identifier")]
    pub product_name: String,
    #[serde(default, rename = "is_staged_for_deletion")]
    pub staged_for_deletion: bool,
    #[serde(default)]
    pub staged_stemcell_version: Option<String>,
    #[serde(default)]
    pub required_stemcell_version: Option<String>,
    #[serde(default, rename = "available_stemcell_versions")]
    pub available_versions: Vec<String>,
    #[serde(default)]
    pub staged_stemcells: Vec<StemcellRef>,
    #[serde(default)]
    pub available_stemcells: Vec<StemcellRef>,
    #[serde(default)]
    pub required_stemcells: Vec<StemcellRef>,
}

/// `GET /api/v0/stemcell_assignments`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StemcellAssignments {
    pub products: Vec<ProductStemcells>,
}

impl StemcellAssignments {
    /// The entry for product `name` not marked for deletion.
    #[must_use]
    pub fn product(&self, name: &str) -> Option<&ProductStemcells> {
        self.products
            .iter()
            .find(|p| p.product_name == name && !p.staged_for_deletion)
    }
}

impl Api {
    /// Upload a stemcell. The form must carry a `stemcell[file]` part.
    pub async fn upload_stemcell(
        &self,
        form: Form,
        polling_interval: Duration,
    ) -> Result<(), ApiError> {
        let request = Request::post("/api/v0/stemcells")
            .multipart(form)
            .with_progress(ProgressOptions {
                tick_interval: polling_interval,
            });
        self.expect_ok(request).await?;
        Ok(())
    }

    pub async fn list_stemcell_assignments(&self) -> Result<StemcellAssignments, ApiError> {
        self.get_json(ASSIGNMENTS).await
    }

    /// Pin a single stemcell version on a product.
    pub async fn assign_stemcell(&self, product_guid: &str, version: &str) -> Result<(), ApiError> {
        self.send_json(
            Method::PATCH,
            ASSIGNMENTS,
            &json!({"products": [{"guid": product_guid, "staged_stemcell_version": version}]}),
        )
        .await?;
        Ok(())
    }

    /// Pin one stemcell per OS on a product.
    pub async fn assign_multi_stemcell(
        &self,
        product_guid: &str,
        stemcells: &[StemcellRef],
    ) -> Result<(), ApiError> {
        self.send_json(
            Method::PATCH,
            ASSIGNMENTS,
            &json!({"products": [{"guid": product_guid, "staged_stemcells": stemcells}]}),
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
    async fn test_assignments_skip_deleted_products() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ASSIGNMENTS))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"products": [
                {"guid": "old", "identifier": "cf", "is_staged_for_deletion": true},
                {"guid": "new", "identifier": "cf", "available_stemcell_versions": ["621.1", "621.2"]}
            ]})))
            .mount(&server)
            .await;

        let assignments = api_for(&server).list_stemcell_assignments().await.unwrap();
        let product = assignments.product("cf").unwrap();
        assert_eq!(product.guid, "new");
        assert_eq!(product.available_versions, vec!["621.1", "621.2"]);
    }

    #[tokio::test]
    async fn test_assign_multi_stemcell_body() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(ASSIGNMENTS))
            .and(body_json(json!({"products": [{"guid": "cf-guid", "staged_stemcells": [
                {"os": "ubuntu-xenial", "version": "621.2"}
            ]}]})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        api_for(&server)
            .assign_multi_stemcell(
                "cf-guid",
                &[StemcellRef {
                    os: "ubuntu-xenial".into(),
                    version: "621.2".into(),
                }],
            )
            .await
            .unwrap();
    }
}
