//! Appliance target parsing.
//!
//! Every HTTP layer works from a [`Target`]: the normalized appliance URL
//! and the UAA endpoint derived from it.

use thiserror::Error;
use url::Url;

use crate::error::{Classify, ErrorKind};

/// Errors raised while normalizing a target.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    /// No target, or a target without a host.
    #[error("target flag is required, run `om help` for more info")]
    Missing,

    /// Scheme other than http or https.
    #[error("error parsing URL, expected http(s) protocol but got {0}")]
    UnsupportedScheme(String),

    /// The string could not be parsed as a URL at all.
    #[error("could not parse target url {url:?}: {reason}")]
    Malformed { url: String, reason: String },
}

impl Classify for TargetError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidTarget
    }
}

/// Normalized appliance endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    url: Url,
    uaa: Url,
}

impl Target {
    /// Parse a target and an optional UAA override.
    ///
    /// # Errors
    /// Returns [`TargetError`] if either URL is missing a host or uses a
    /// scheme other than http(s).
    pub fn parse(target: &str, uaa_override: Option<&str>) -> Result<Self, TargetError> {
        let url = parse_url(target)?;
        let uaa = match uaa_override.filter(|u| !u.trim().is_empty()) {
            Some(raw) => parse_url(raw)?,
            None => {
                let mut uaa = url.clone();
                uaa.set_path("/uaa");
                uaa.set_query(None);
                uaa.set_fragment(None);
                uaa
            }
        };
        Ok(Self { url, uaa })
    }

    /// The appliance URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The UAA base URL.
    #[must_use]
    pub fn uaa(&self) -> &Url {
        &self.uaa
    }

    /// `<uaa>/oauth/token`, built by appending path segments.
    #[must_use]
    pub fn token_endpoint(&self) -> Url {
        let mut endpoint = self.uaa.clone();
        if let Ok(mut segments) = endpoint.path_segments_mut() {
            segments.pop_if_empty().push("oauth").push("token");
        }
        endpoint
    }

    /// Resolve an API path (with optional query) against the target host.
    #[must_use]
    pub fn resolve(&self, path_and_query: &str) -> Url {
        let mut url = self.url.clone();
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };
        url.set_path(path);
        url.set_query(query);
        url.set_fragment(None);
        url
    }
}

fn parse_url(raw: &str) -> Result<Url, TargetError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(TargetError::Missing);
    }

    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };

    let url = Url::parse(&candidate).map_err(|e| match e {
        url::ParseError::EmptyHost => TargetError::Missing,
        other => TargetError::Malformed {
            url: raw.to_string(),
            reason: other.to_string(),
        },
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(TargetError::UnsupportedScheme(other.to_string())),
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(TargetError::Missing);
    }

    Ok(url)
}
