//! Custom VM types and VM extensions.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{Api, ApiError};
use crate::network::Request;

const VM_TYPES: &str = "/api/v0/vm_types";
const VM_EXTENSIONS: &str = "/api/v0/staged/vm_extensions";

/// A VM type. IaaS specific keys travel in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VmType {
    pub name: String,
    #[serde(default)]
    pub ram: u64,
    #[serde(default)]
    pub cpu: u64,
    #[serde(default)]
    pub ephemeral_disk: u64,
    #[serde(default, skip_serializing)]
    pub builtin: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A named set of cloud properties applied to jobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VmExtension {
    pub name: String,
    #[serde(default)]
    pub cloud_properties: Value,
}

impl Api {
    /// Replace every custom VM type with `vm_types`.
    pub async fn create_custom_vm_types(&self, vm_types: &[VmType]) -> Result<(), ApiError> {
        self.send_json(Method::PUT, VM_TYPES, &json!({"vm_types": vm_types}))
            .await?;
        Ok(())
    }

    pub async fn list_vm_types(&self) -> Result<Vec<VmType>, ApiError> {
        #[derive(Deserialize)]
        struct List {
            vm_types: Vec<VmType>,
        }
        let list: List = self.get_json(VM_TYPES).await?;
        Ok(list.vm_types)
    }

    /// Restore the built-in VM types.
    pub async fn delete_custom_vm_types(&self) -> Result<(), ApiError> {
        self.expect_ok(Request::delete(VM_TYPES)).await?;
        Ok(())
    }

    pub async fn create_vm_extension(&self, extension: &VmExtension) -> Result<(), ApiError> {
        self.send_json(
            Method::PUT,
            &format!("{VM_EXTENSIONS}/{}", extension.name),
            extension,
        )
        .await?;
        Ok(())
    }

    pub async fn list_vm_extensions(&self) -> Result<Vec<VmExtension>, ApiError> {
        #[derive(Deserialize)]
        struct List {
            vm_extensions: Vec<VmExtension>,
        }
        let list: List = self.get_json(VM_EXTENSIONS).await?;
        Ok(list.vm_extensions)
    }

    pub async fn delete_vm_extension(&self, name: &str) -> Result<(), ApiError> {
        self.expect_ok(Request::delete(format!("{VM_EXTENSIONS}/{name}")))
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
    async fn test_vm_types_keep_extra_properties() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(VM_TYPES))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"vm_types": [
                {"name": "large", "ram": 8192, "cpu": 2, "ephemeral_disk": 32768,
                 "builtin": true, "raw_instance_storage": true}
            ]})))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(VM_TYPES))
            .and(body_json(json!({"vm_types": [
                {"name": "large", "ram": 8192, "cpu": 2, "ephemeral_disk": 32768,
                 "raw_instance_storage": true}
            ]})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let api = api_for(&server);
        let types = api.list_vm_types().await.unwrap();
        assert!(types[0].builtin);
        assert_eq!(types[0].extra["raw_instance_storage"], json!(true));
        api.create_custom_vm_types(&types).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_vm_extension() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v0/staged/vm_extensions/elb"))
            .and(body_json(json!({"name": "elb", "cloud_properties": {"elbs": ["lb"]}})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        api_for(&server)
            .create_vm_extension(&VmExtension {
                name: "elb".into(),
                cloud_properties: json!({"elbs": ["lb"]}),
            })
            .await
            .unwrap();
    }
}
