//! `GET /api/v0/info`.

use serde::Deserialize;

use super::{check, decode, Api, ApiError, StatusPolicy};
use crate::network::Request;

/// Appliance build information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Info {
    pub version: String,
}

#[derive(Deserialize)]
struct InfoResponse {
    info: Info,
}

impl Info {
    /// Whether the appliance is at least `major.minor`.
    ///
    /// # Errors
    /// Returns error if the version does not start with `<int>.<int>`.
    pub fn version_at_least(&self, major: u64, minor: u64) -> Result<bool, ApiError> {
        let invalid = || ApiError::Invalid(format!("invalid version: '{}'", self.version));
        let mut parts = self.version.split(['.', '-']);
        let got_major: u64 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let got_minor: u64 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        Ok((got_major, got_minor) >= (major, minor))
    }
}

impl Api {
    /// Appliance version information. The endpoint needs no token, so it
    /// also answers before authentication is set up.
    pub async fn info(&self) -> Result<Info, ApiError> {
        let path = "/api/v0/info";
        let response = self.send_unauthenticated(Request::get(path)).await?;
        let response = check(response, path, StatusPolicy::Plain).await?;
        let decoded: InfoResponse = decode(response, path).await?;
        Ok(decoded.info)
    }
}
