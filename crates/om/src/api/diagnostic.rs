//! `GET /api/v0/diagnostic_report`.

use serde::Deserialize;

use super::{Api, ApiError};
use crate::network::Request;

/// A stemcell known to the appliance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DiagnosticStemcell {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub version: String,
}

/// A product entry of the report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DiagnosticProduct {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub stemcell: Option<String>,
    #[serde(default)]
    pub stemcells: Vec<DiagnosticStemcell>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AddedProducts {
    #[serde(default)]
    staged: Vec<DiagnosticProduct>,
    #[serde(default)]
    deployed: Vec<DiagnosticProduct>,
}

#[derive(Deserialize)]
struct RawReport {
    #[serde(default)]
    infrastructure_type: String,
    #[serde(default)]
    stemcells: Vec<String>,
    #[serde(default)]
    available_stemcells: Vec<DiagnosticStemcell>,
    #[serde(default)]
    added_products: AddedProducts,
}

/// The parts of the diagnostic report the tool inspects, plus the raw text.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticReport {
    pub infrastructure_type: String,
    /// Stemcell filenames (single-stemcell appliances).
    pub stemcells: Vec<String>,
    /// Stemcells with OS and version (multi-stemcell appliances).
    pub available_stemcells: Vec<DiagnosticStemcell>,
    pub staged_products: Vec<DiagnosticProduct>,
    pub deployed_products: Vec<DiagnosticProduct>,
    pub full_report: String,
}

impl DiagnosticReport {
    /// Whether a stemcell file of that name has been uploaded.
    #[must_use]
    pub fn has_stemcell(&self, filename: &str) -> bool {
        self.stemcells.iter().any(|s| s == filename)
            || self.available_stemcells.iter().any(|s| s.filename == filename)
    }
}

impl Api {
    /// Fetch the diagnostic report. A 500 means the report is still being built.
    pub async fn diagnostic_report(&self) -> Result<DiagnosticReport, ApiError> {
        let path = "/api/v0/diagnostic_report";
        let response = self.send(Request::get(path)).await?;
        if response.status() == reqwest::StatusCode::INTERNAL_SERVER_ERROR {
            return Err(ApiError::Invalid(
                "diagnostic report is currently unavailable".into(),
            ));
        }
        let response = super::check(response, path, super::StatusPolicy::Plain).await?;
        let full_report = response.text().await?;
        let raw: RawReport = serde_json::from_str(&full_report).map_err(|e| ApiError::Decode {
            what: "diagnostic report".into(),
            reason: e.to_string(),
        })?;

        Ok(DiagnosticReport {
            infrastructure_type: raw.infrastructure_type,
            stemcells: raw.stemcells,
            available_stemcells: raw.available_stemcells,
            staged_products: raw.added_products.staged,
            deployed_products: raw.added_products.deployed,
            full_report,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::api::tests::api_for;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_report_is_decoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v0/diagnostic_report"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "infrastructure_type": "vsphere",
                "available_stemcells": [
                    {"filename": "bosh-stemcell-621.77-vsphere-esxi-ubuntu-xenial-go_agent.tgz",
                     "os": "ubuntu-xenial", "version": "621.77"}
                ],
                "added_products": {
                    "deployed": [{"name": "p-bosh", "version": "2.10.1"}],
                    "staged": [{"name": "cf", "version": "2.10.0", "stemcells": []}]
                }
            })))
            .mount(&server)
            .await;

        let report = api_for(&server).diagnostic_report().await.unwrap();
        assert_eq!(report.infrastructure_type, "vsphere");
        assert!(report.has_stemcell("bosh-stemcell-621.77-vsphere-esxi-ubuntu-xenial-go_agent.tgz"));
        assert_eq!(report.staged_products[0].name, "cf");
        assert_eq!(report.deployed_products[0].version, "2.10.1");
        assert!(report.full_report.contains("vsphere"));
    }

    #[tokio::test]
    async fn test_report_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = api_for(&server).diagnostic_report().await.unwrap_err();
        assert_eq!(err.to_string(), "diagnostic report is currently unavailable");
    }
}
