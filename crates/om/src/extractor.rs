//! Tile archive metadata extraction.
//!
//! A tile is a zip whose `metadata/*.yml` entry describes the product.

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::error::{Classify, ErrorKind};

static METADATA_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\.?/?metadata/[^/]+\.ya?ml$").unwrap());

/// Errors raised while reading a tile.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("could not open product file: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not read product file as zip: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("no metadata file was found in provided .pivotal")]
    NoMetadata,

    #[error("could not extract product metadata: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("could not extract product metadata: could not find product details in metadata file")]
    MissingDetails,
}

impl Classify for ExtractError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Stemcell requirements declared by a tile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StemcellCriteria {
    #[serde(default)]
    pub os: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub version: String,
    #[serde(default, rename = "enable_patch_security_updates")]
    pub patch_security_updates: bool,
}

/// Product details read out of a tile.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub name: String,
    pub version: String,
    pub stemcell_criteria: StemcellCriteria,
    /// The metadata document exactly as stored in the archive.
    pub raw: Vec<u8>,
}

#[derive(Deserialize)]
struct ProvidedVersion {
    #[serde(default, deserialize_with = "string_or_number")]
    version: String,
}

#[derive(Deserialize)]
struct Header {
    #[serde(default)]
    name: String,
    #[serde(default, deserialize_with = "string_or_number")]
    product_version: String,
    #[serde(default)]
    provides_product_versions: Vec<ProvidedVersion>,
    #[serde(default)]
    stemcell_criteria: StemcellCriteria,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

/// Read the metadata out of the tile at `path`.
pub fn extract_from_file(path: impl AsRef<Path>) -> Result<Metadata, ExtractError> {
    let file = File::open(path.as_ref())?;
    extract(file)
}

/// Read the metadata out of any seekable zip.
pub fn extract<R: Read + Seek>(reader: R) -> Result<Metadata, ExtractError> {
    let raw = raw_metadata(reader)?;
    parse(raw)
}

/// Bytes of the first `metadata/*.yml` entry.
pub fn raw_metadata<R: Read + Seek>(reader: R) -> Result<Vec<u8>, ExtractError> {
    let mut archive = zip::ZipArchive::new(reader)?;
    let entry = archive
        .file_names()
        .find(|name| METADATA_ENTRY.is_match(name))
        .map(str::to_string)
        .ok_or(ExtractError::NoMetadata)?;

    let mut raw = Vec::new();
    archive.by_name(&entry)?.read_to_end(&mut raw)?;
    Ok(raw)
}

/// Parse product details from a metadata document.
pub fn parse(raw: Vec<u8>) -> Result<Metadata, ExtractError> {
    let header: Header = serde_yaml::from_slice(&raw)?;
    let version = if header.product_version.is_empty() {
        header
            .provides_product_versions
            .into_iter()
            .next()
            .map(|p| p.version)
            .unwrap_or_default()
    } else {
        header.product_version
    };

    if header.name.is_empty() || version.is_empty() {
        return Err(ExtractError::MissingDetails);
    }

    Ok(Metadata {
        name: header.name,
        version,
        stemcell_criteria: header.stemcell_criteria,
        raw,
    })
}
