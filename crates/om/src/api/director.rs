//! The BOSH director tile: AZs, networks, properties, IaaS configurations.

use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{decode, Api, ApiError};
use crate::network::Request;

const DIRECTOR: &str = "/api/v0/staged/director";

/// Status and text of one manifest diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ManifestDiff {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub diff: String,
}

/// A named config diff (runtime configs, CPI configs).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NamedDiff {
    #[serde(default, alias = "iaas_configuration_name")]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub diff: String,
}

/// Pending director changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DirectorDiff {
    #[serde(default)]
    pub manifest: ManifestDiff,
    #[serde(default)]
    pub cloud_config: ManifestDiff,
    #[serde(default)]
    pub runtime_configs: Vec<NamedDiff>,
    #[serde(default)]
    pub cpi_configs: Vec<NamedDiff>,
}

/// `properties-configuration` as sent to `PUT .../director/properties`.
pub type DirectorProperties = Value;

fn redact_query(redact: bool) -> &'static str {
    if redact {
        ""
    } else {
        "?redact=false"
    }
}

fn warnings_query(ignore_warnings: bool) -> &'static str {
    if ignore_warnings {
        "?ignore_warnings=true"
    } else {
        ""
    }
}

/// Copy `guid` from `existing` entries onto `wanted` entries with the same `name`.
fn carry_guids_by_name(wanted: &mut Value, existing: &Value) {
    let (Some(wanted), Some(existing)) = (wanted.as_array_mut(), existing.as_array()) else {
        return;
    };
    for entry in wanted.iter_mut().filter_map(Value::as_object_mut) {
        let name = entry.get("name").and_then(Value::as_str).map(str::to_string);
        let guid = existing.iter().find_map(|current| {
            (current.get("name").and_then(Value::as_str) == name.as_deref())
                .then(|| current.get("guid").cloned())
                .flatten()
        });
        if let Some(guid) = guid {
            entry.entry("guid").or_insert(guid);
        }
    }
}

impl Api {
    /// `GET .../director/properties`.
    pub async fn staged_director_properties(&self, redact: bool) -> Result<Value, ApiError> {
        self.get_json(&format!("{DIRECTOR}/properties{}", redact_query(redact)))
            .await
    }

    pub async fn update_staged_director_properties(
        &self,
        properties: &DirectorProperties,
    ) -> Result<(), ApiError> {
        self.send_json(Method::PUT, &format!("{DIRECTOR}/properties"), properties)
            .await?;
        Ok(())
    }

    /// Configured AZs, `None` on IaaSes without AZ configuration.
    pub async fn staged_director_availability_zones(&self) -> Result<Option<Value>, ApiError> {
        match self
            .get_json::<Value>(&format!("{DIRECTOR}/availability_zones"))
            .await
        {
            Ok(v) => Ok(Some(v.get("availability_zones").cloned().unwrap_or(Value::Null))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Replace AZs, keeping GUIDs of AZs that already exist.
    pub async fn update_staged_director_availability_zones(
        &self,
        mut zones: Value,
        ignore_verifier_warnings: bool,
    ) -> Result<(), ApiError> {
        match self.staged_director_availability_zones().await? {
            Some(existing) => carry_guids_by_name(&mut zones, &existing),
            None => debug!("unable to retrieve existing AZ configuration, attempting to configure anyway"),
        }
        self.send_json(
            Method::PUT,
            &format!(
                "{DIRECTOR}/availability_zones{}",
                warnings_query(ignore_verifier_warnings)
            ),
            &json!({"availability_zones": zones}),
        )
        .await?;
        Ok(())
    }

    /// `GET .../director/networks`.
    pub async fn staged_director_networks(&self) -> Result<Value, ApiError> {
        self.get_json(&format!("{DIRECTOR}/networks")).await
    }

    /// Replace networks, keeping GUIDs of networks that already exist.
    pub async fn update_staged_director_networks(&self, mut networks: Value) -> Result<(), ApiError> {
        let existing = self.staged_director_networks().await?;
        if let (Some(wanted), Some(existing)) = (networks.get_mut("networks"), existing.get("networks")) {
            carry_guids_by_name(wanted, existing);
        }
        self.send_json(Method::PUT, &format!("{DIRECTOR}/networks"), &networks)
            .await?;
        Ok(())
    }

    /// `GET .../director/network_and_az`, `None` before any assignment.
    pub async fn staged_director_network_and_az(&self) -> Result<Option<Value>, ApiError> {
        match self.get_json::<Value>(&format!("{DIRECTOR}/network_and_az")).await {
            Ok(v) => Ok(v.get("network_and_az").cloned()),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Assign the director's network and AZ.
    ///
    /// Returns `false` without changing anything once the director is
    /// deployed, since the assignment is immutable from then on.
    pub async fn update_staged_director_network_and_az(
        &self,
        assignment: Value,
    ) -> Result<bool, ApiError> {
        let deployed = self
            .send(Request::get("/api/v0/deployed/director/credentials"))
            .await?;
        if deployed.status().is_success() {
            return Ok(false);
        }
        self.send_json(
            Method::PUT,
            &format!("{DIRECTOR}/network_and_az"),
            &json!({"network_and_az": assignment}),
        )
        .await?;
        Ok(true)
    }

    /// IaaS configurations, `None` on appliances older than 2.2.
    pub async fn staged_director_iaas_configurations(
        &self,
        redact: bool,
    ) -> Result<Option<Value>, ApiError> {
        match self
            .get_json::<Value>(&format!(
                "{DIRECTOR}/iaas_configurations{}",
                redact_query(redact)
            ))
            .await
        {
            Ok(v) => Ok(v.get("iaas_configurations").cloned()),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create or update each IaaS configuration, matching existing ones by name.
    pub async fn update_staged_director_iaas_configurations(
        &self,
        configurations: Value,
        ignore_verifier_warnings: bool,
    ) -> Result<(), ApiError> {
        let existing = self
            .staged_director_iaas_configurations(true)
            .await?
            .unwrap_or(Value::Array(Vec::new()));
        let query = warnings_query(ignore_verifier_warnings);

        for configuration in configurations.as_array().into_iter().flatten() {
            let name = configuration.get("name").and_then(Value::as_str);
            let guid = existing.as_array().into_iter().flatten().find_map(|current| {
                (name.is_some() && current.get("name").and_then(Value::as_str) == name)
                    .then(|| current.get("guid").and_then(Value::as_str))
                    .flatten()
            });
            let body = json!({"iaas_configuration": configuration});
            match guid {
                Some(guid) => {
                    self.send_json(
                        Method::PUT,
                        &format!("{DIRECTOR}/iaas_configurations/{guid}{query}"),
                        &body,
                    )
                    .await?;
                }
                None => {
                    self.send_json(
                        Method::POST,
                        &format!("{DIRECTOR}/iaas_configurations{query}"),
                        &body,
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }

    /// Manifest and config changes the next deploy makes to the director.
    pub async fn director_diff(&self) -> Result<DirectorDiff, ApiError> {
        let response = self.expect_ok(Request::get("/api/v0/director/diff")).await?;
        decode(response, "director diff").await
    }

    /// The director's deployed manifest.
    pub async fn deployed_director_manifest(&self) -> Result<String, ApiError> {
        let response = self
            .expect_ok(Request::get("/api/v0/deployed/director/manifest"))
            .await?;
        Ok(response.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::api_for;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_carry_guids_by_name() {
        let mut wanted = json!([{"name": "az1"}, {"name": "az3"}]);
        let existing = json!([{"name": "az1", "guid": "guid-1"}, {"name": "az2", "guid": "guid-2"}]);
        carry_guids_by_name(&mut wanted, &existing);
        assert_eq!(wanted, json!([{"name": "az1", "guid": "guid-1"}, {"name": "az3"}]));
    }

    #[tokio::test]
    async fn test_availability_zones_keep_guids() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v0/staged/director/availability_zones"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "availability_zones": [{"name": "az1", "guid": "existing"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/v0/staged/director/availability_zones"))
            .and(query_param("ignore_warnings", "true"))
            .and(body_json(json!({
                "availability_zones": [{"name": "az1", "guid": "existing"}, {"name": "az2"}]
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        api_for(&server)
            .update_staged_director_availability_zones(json!([{"name": "az1"}, {"name": "az2"}]), true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_network_assignment_skipped_once_deployed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v0/deployed/director/credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"credentials": []})))
            .mount(&server)
            .await;

        let applied = api_for(&server)
            .update_staged_director_network_and_az(json!({"network": {"name": "n"}}))
            .await
            .unwrap();
        assert!(!applied);
    }

    #[tokio::test]
    async fn test_iaas_configurations_create_or_update() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v0/staged/director/iaas_configurations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "iaas_configurations": [{"guid": "default-guid", "name": "default"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/v0/staged/director/iaas_configurations/default-guid"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v0/staged/director/iaas_configurations"))
            .and(body_json(json!({"iaas_configuration": {"name": "second"}})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        api_for(&server)
            .update_staged_director_iaas_configurations(
                json!([{"name": "default", "vcenter_host": "vc"}, {"name": "second"}]),
                false,
            )
            .await
            .unwrap();
    }
}
