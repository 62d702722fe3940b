//! Version parsing, ordering and selection.

use std::cmp::Ordering;
use std::fmt;

use regex::Regex;

use super::traits::ProductSource;
use super::DownloadError;
use crate::ui::Console;

/// A lenient semantic version: any number of numeric segments, an optional
/// `-pre.release` suffix and ignored `+build` metadata. Anything after `-`
/// (including `-build.N`) ranks below the release it precedes.
#[derive(Debug, Clone)]
pub struct Version {
    original: String,
    segments: Vec<u64>,
    pre: Vec<String>,
}

impl Version {
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        let stripped = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let without_build = stripped.split('+').next().unwrap_or(stripped);
        let (core, pre) = match without_build.split_once('-') {
            Some((core, pre)) if !pre.is_empty() => {
                (core, pre.split('.').map(String::from).collect())
            }
            Some(_) => return None,
            None => (without_build, Vec::new()),
        };
        if core.is_empty() {
            return None;
        }
        let segments = core
            .split('.')
            .map(|s| s.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            original: input.to_string(),
            segments,
            pre,
        })
    }

    /// The text this version was parsed from.
    #[must_use]
    pub fn original(&self) -> &str {
        &self.original
    }

    fn segment(&self, i: usize) -> u64 {
        self.segments.get(i).copied().unwrap_or(0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

fn compare_identifier(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let width = self.segments.len().max(other.segments.len()).max(3);
        for i in 0..width {
            match self.segment(i).cmp(&other.segment(i)) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        match (self.pre.is_empty(), other.pre.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                for (a, b) in self.pre.iter().zip(&other.pre) {
                    match compare_identifier(a, b) {
                        Ordering::Equal => {}
                        unequal => return unequal,
                    }
                }
                self.pre.len().cmp(&other.pre.len())
            }
        }
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Greatest version among `versions` matching `pattern`.
fn latest_matching(
    versions: &[String],
    pattern: &str,
    console: &Console,
) -> Result<Option<String>, DownloadError> {
    let re = Regex::new(pattern).map_err(|e| DownloadError::InvalidRegex {
        regex: pattern.to_string(),
        reason: e.to_string(),
    })?;

    let mut parsed = Vec::new();
    for candidate in versions.iter().filter(|v| re.is_match(v)) {
        match Version::parse(candidate) {
            Some(version) => parsed.push(version),
            None => console.warn(format!(
                "warning: could not parse semver version from: {candidate}"
            )),
        }
    }
    Ok(parsed.into_iter().max().map(|v| v.original))
}

/// Pick the version to download: `exact` if published, else the greatest
/// match of `regex`. Listing failures (empty bucket, no prefixed files)
/// are returned as-is.
pub async fn determine_product_version(
    source: &dyn ProductSource,
    slug: &str,
    exact: Option<&str>,
    regex: Option<&str>,
    console: &Console,
) -> Result<String, DownloadError> {
    let versions = source.product_versions(slug).await?;
    let existing = if versions.is_empty() {
        "none".to_string()
    } else {
        versions.join(", ")
    };

    if let Some(pattern) = regex.filter(|r| !r.is_empty()) {
        return latest_matching(&versions, pattern, console)?.ok_or_else(|| {
            DownloadError::NoVersions(format!(
                "no valid versions found for product {slug:?} and product version regex {pattern:?}\nexisting versions: {existing}"
            ))
        });
    }

    let exact = exact.unwrap_or_default();
    if !exact.is_empty() && versions.iter().any(|v| v == exact) {
        return Ok(exact.to_string());
    }
    Err(DownloadError::NoVersions(format!(
        "no valid versions found for product {slug:?} and product version {exact:?}\nexisting versions: {existing}"
    )))
}

/// `major.minor` of a stemcell version; a bare major means minor 0.
pub fn stemcell_version_parts(version: &str) -> Result<(u64, u64), DownloadError> {
    let invalid = || DownloadError::StemcellVersion(version.to_string());
    let mut parts = version.split('.');
    let major = parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())?;
    let minor = match parts.next() {
        Some(minor) => minor.parse().map_err(|_| invalid())?,
        None => 0,
    };
    if parts.next().is_some() {
        return Err(invalid());
    }
    Ok((major, minor))
}

/// Greatest stemcell version by `major.minor`.
pub fn latest_stemcell_version(versions: &[String]) -> Result<Option<String>, DownloadError> {
    let mut best: Option<((u64, u64), &String)> = None;
    for version in versions {
        let parts = stemcell_version_parts(version)?;
        if best.map_or(true, |(current, _)| parts > current) {
            best = Some((parts, version));
        }
    }
    Ok(best.map(|(_, v)| v.clone()))
}

/// Vendor product slug publishing stemcells for a tile's stemcell OS.
#[must_use]
pub fn stemcell_slug_for_os(os: &str) -> Option<&'static str> {
    match os {
        "ubuntu-xenial" => Some("stemcells-ubuntu-xenial"),
        "ubuntu-trusty" => Some("stemcells"),
        "ubuntu-jammy" => Some("stemcells-ubuntu-jammy"),
        "windows2016" | "windows1803" | "windows2019" => Some("stemcells-windows-server"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::{BlobSource, MemoryBlobstore};
    use crate::error::{Classify, ErrorKind};

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_ordering() {
        assert!(v("1.10.0") > v("1.9.3"));
        assert_eq!(v("2.0").cmp(&v("2.0.0")), Ordering::Equal);
        assert!(v("1.2.3-build.4") < v("1.2.3"));
        assert!(v("1.2.3-build.10") > v("1.2.3-build.9"));
        assert!(v("1.2.3-alpha") > v("1.2.3-1"));
        assert!(Version::parse("latest").is_none());
    }

    #[test]
    fn test_stemcell_versions() {
        assert_eq!(stemcell_version_parts("621").unwrap(), (621, 0));
        assert_eq!(stemcell_version_parts("621.78").unwrap(), (621, 78));
        assert!(stemcell_version_parts("621.78.1").is_err());
        let latest = latest_stemcell_version(&["621.9".into(), "621.78".into(), "456.3".into()])
            .unwrap();
        assert_eq!(latest.as_deref(), Some("621.78"));
    }

    fn source(keys: &[&str]) -> BlobSource {
        let store = MemoryBlobstore::new();
        for key in keys {
            store.insert(*key, b"x".to_vec());
        }
        BlobSource::new(std::sync::Arc::new(store), "", "")
    }

    #[tokio::test]
    async fn test_regex_picks_greatest() {
        let source = source(&[
            "[cf,2.10.1]cf.pivotal",
            "[cf,2.10.12]cf.pivotal",
            "[cf,2.11.0-build.3]cf.pivotal",
            "[cf,2.9.0]cf.pivotal",
        ]);
        let (console, _) = Console::buffered();
        let version = determine_product_version(&source, "cf", None, Some(r"^2\.10\."), &console)
            .await
            .unwrap();
        assert_eq!(version, "2.10.12");
    }

    #[tokio::test]
    async fn test_no_regex_match() {
        let source = source(&["[cf,2.9.0]cf.pivotal"]);
        let (console, _) = Console::buffered();
        let err = determine_product_version(&source, "cf", None, Some("^3"), &console)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoVersions);
        assert!(err.to_string().contains("existing versions: 2.9.0"));
    }

    #[tokio::test]
    async fn test_empty_bucket_and_no_prefix_are_distinguished() {
        let (console, _) = Console::buffered();
        let empty = determine_product_version(&source(&[]), "cf", Some("1.0"), None, &console)
            .await
            .unwrap_err();
        assert_eq!(empty.kind(), ErrorKind::BucketEmpty);

        let unprefixed = determine_product_version(
            &source(&["cf-1.0.pivotal"]),
            "cf",
            Some("1.0"),
            None,
            &console,
        )
        .await
        .unwrap_err();
        assert_eq!(unprefixed.kind(), ErrorKind::NoVersions);
        assert_eq!(
            unprefixed.to_string(),
            "no files matching pivnet-product-slug cf found"
        );
    }
}
