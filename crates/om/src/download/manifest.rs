//! Files `download-product` leaves behind for pipelines.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use super::blob::glob_matches;
use super::DownloadError;
use crate::ui::Console;

/// Value `--cache-cleanup` must be given to delete anything.
pub const CACHE_CLEANUP_ACK: &str = "I acknowledge this will delete files in the output directories";

/// Contents of `download-file.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadFile {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub product_path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub product_slug: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub product_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stemcell_path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stemcell_version: String,
}

#[derive(Serialize)]
struct AssignStemcell<'a> {
    product: &'a str,
    stemcell: &'a str,
}

pub fn write_download_file(
    directory: &Path,
    manifest: &DownloadFile,
    console: &Console,
) -> Result<PathBuf, DownloadError> {
    console.log("Writing a list of downloaded artifact to download-file.json");
    let path = directory.join("download-file.json");
    std::fs::write(&path, serde_json::to_vec(manifest)?)?;
    Ok(path)
}

/// Write `assign-stemcell.yml` pairing `product` with `stemcell_version`.
pub fn write_assign_stemcell(
    directory: &Path,
    product: &str,
    stemcell_version: &str,
    console: &Console,
) -> Result<PathBuf, DownloadError> {
    console.log("Writing a assign stemcell artifact to assign-stemcell.yml");
    let path = directory.join("assign-stemcell.yml");
    let document = serde_yaml::to_string(&AssignStemcell {
        product,
        stemcell: stemcell_version,
    })
    .map_err(|e| DownloadError::Decode(e.to_string()))?;
    std::fs::write(&path, document)?;
    Ok(path)
}

/// Whether `name` is a cached copy of `slug` matching `glob`, with or
/// without the `[slug,version]` prefix.
fn is_cached_copy(name: &str, slug: &str, glob: &str) -> Result<bool, DownloadError> {
    if glob_matches(glob, name)? {
        return Ok(true);
    }
    let prefix = format!("[{slug},");
    if let Some(rest) = name.strip_prefix(&prefix) {
        if let Some((_, original)) = rest.split_once(']') {
            return glob_matches(glob, original);
        }
    }
    Ok(false)
}

/// Delete cached artifacts of `slug` in `directory` other than `keep`.
pub fn cleanup_cache(
    directory: &Path,
    slug: &str,
    glob: &str,
    keep: &Path,
    console: &Console,
) -> Result<(), DownloadError> {
    console.log(format!(
        "Cleaning up cached artifacts in directory '{}' with the glob '{glob}'",
        directory.display()
    ));
    for entry in std::fs::read_dir(directory)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if path == keep {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if is_cached_copy(name, slug, glob)? {
            console.log(format!("cleaning up cached file: {}", path.display()));
            std::fs::remove_file(&path)?;
        } else {
            debug!(file = %path.display(), "not a cached artifact");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_file_omits_empty_fields() {
        let manifest = DownloadFile {
            product_path: "/out/[cf,2.10.1]cf.pivotal".into(),
            product_slug: "cf".into(),
            product_version: "2.10.1".into(),
            ..DownloadFile::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let (console, captured) = Console::buffered();
        let path = write_download_file(dir.path(), &manifest, &console).unwrap();

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(
            written,
            serde_json::json!({
                "product_path": "/out/[cf,2.10.1]cf.pivotal",
                "product_slug": "cf",
                "product_version": "2.10.1",
            })
        );
        assert!(captured.stderr().contains("download-file.json"));
    }

    #[test]
    fn test_assign_stemcell() {
        let dir = tempfile::tempdir().unwrap();
        let (console, _) = Console::buffered();
        let path = write_assign_stemcell(dir.path(), "cf", "621.78", &console).unwrap();
        assert_eq!(
            std::fs::read_to_string(path).unwrap(),
            "product: cf\nstemcell: '621.78'\n"
        );
    }

    #[test]
    fn test_cleanup_keeps_fetched_version() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "[cf,2.10.0]cf-2.10.0.pivotal",
            "[cf,2.10.1]cf-2.10.1.pivotal",
            "cf-2.9.0.pivotal",
            "[mysql,1.0]mysql-1.0.pivotal",
            "notes.txt",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let keep = dir.path().join("[cf,2.10.1]cf-2.10.1.pivotal");
        let (console, captured) = Console::buffered();

        cleanup_cache(dir.path(), "cf", "cf-*.pivotal", &keep, &console).unwrap();

        let mut left: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        left.sort();
        assert_eq!(
            left,
            vec![
                "[cf,2.10.1]cf-2.10.1.pivotal",
                "[mysql,1.0]mysql-1.0.pivotal",
                "notes.txt"
            ]
        );
        assert!(captured.stderr().contains("cleaning up cached file:"));
    }
}
