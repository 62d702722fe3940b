//! Deployed product and director credentials.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Api, ApiError};

/// A credential value as stored in CredHub.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "type", default)]
    pub credential_type: String,
    #[serde(default)]
    pub value: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct CredentialResponse {
    credential: Credential,
}

#[derive(Deserialize)]
struct CredentialList {
    credentials: Vec<String>,
}

impl Api {
    /// Credential references of a deployed product.
    pub async fn list_deployed_product_credentials(
        &self,
        guid: &str,
    ) -> Result<Vec<String>, ApiError> {
        let list: CredentialList = self
            .get_json(&format!("/api/v0/deployed/products/{guid}/credentials"))
            .await?;
        Ok(list.credentials)
    }

    /// One credential of a deployed product.
    pub async fn deployed_product_credential(
        &self,
        guid: &str,
        reference: &str,
    ) -> Result<Credential, ApiError> {
        let response: CredentialResponse = self
            .get_json(&format!(
                "/api/v0/deployed/products/{guid}/credentials/{reference}"
            ))
            .await?;
        Ok(response.credential)
    }

    /// Names of the director's credentials.
    pub async fn list_director_credentials(&self) -> Result<Vec<String>, ApiError> {
        let list: CredentialList = self.get_json("/api/v0/deployed/director/credentials").await?;
        Ok(list.credentials)
    }

    /// One director credential.
    pub async fn director_credential(&self, name: &str) -> Result<Credential, ApiError> {
        let response: CredentialResponse = self
            .get_json(&format!("/api/v0/deployed/director/credentials/{name}"))
            .await?;
        Ok(response.credential)
    }

    /// The `KEY=value ... bosh` line Ops Manager hands out for the director.
    pub async fn bosh_commandline_credentials(&self) -> Result<String, ApiError> {
        #[derive(Deserialize)]
        struct Response {
            credential: String,
        }
        let response: Response = self
            .get_json("/api/v0/deployed/director/credentials/bosh_commandline_credentials")
            .await?;
        Ok(response.credential)
    }
}

#[cfg(test)]
mod tests {
    use crate::api::tests::api_for;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_deployed_credential_is_decoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v0/deployed/products/cf-guid/credentials/.uaa.admin_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "credential": {
                    "type": "simple_credentials",
                    "value": {"identity": "admin", "password": "hunter2"}
                }
            })))
            .mount(&server)
            .await;

        let credential = api_for(&server)
            .deployed_product_credential("cf-guid", ".uaa.admin_credentials")
            .await
            .unwrap();
        assert_eq!(credential.credential_type, "simple_credentials");
        assert_eq!(credential.value["password"], "hunter2");
    }
}
