//! Config template generation for `config-template`.
//!
//! Reads tile metadata and writes a parameterized `product.yml` plus the
//! vars files and ops files an operator composes with it.

mod generator;
mod metadata;

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::{Classify, ErrorKind};

pub use generator::{
    ops_file_name, var_name, Generator, Op, OpsFiles, Template, DEFAULT_SIZE_OF_COLLECTIONS,
};
pub use metadata::{Blueprint, BlueprintId, Job, Metadata, OptionTemplate, TemplateId};

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("could not parse metadata: {0}")]
    Metadata(String),

    #[error("version in metadata is blank")]
    BlankVersion,

    #[error("cannot create directory {path}: {source}")]
    Directory {
        path: String,
        source: std::io::Error,
    },

    #[error("could not write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("could not render {path}: {reason}")]
    Render { path: String, reason: String },
}

impl Classify for TemplateError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub output_directory: PathBuf,
    /// Write directly under `<out>/<name>/` instead of `<out>/<name>/<version>/`.
    pub exclude_version: bool,
    pub size_of_collections: usize,
}

impl GenerateOptions {
    pub fn new(output_directory: impl Into<PathBuf>) -> Self {
        Self {
            output_directory: output_directory.into(),
            exclude_version: false,
            size_of_collections: DEFAULT_SIZE_OF_COLLECTIONS,
        }
    }
}

fn create_dir(path: &Path) -> Result<(), TemplateError> {
    std::fs::create_dir_all(path).map_err(|source| TemplateError::Directory {
        path: path.display().to_string(),
        source,
    })
}

fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<(), TemplateError> {
    let rendered = serde_yaml::to_string(value).map_err(|e| TemplateError::Render {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    debug!(file = %path.display(), "writing");
    std::fs::write(path, rendered).map_err(|source| TemplateError::Write {
        path: path.display().to_string(),
        source,
    })
}

fn write_ops(directory: &Path, files: &OpsFiles) -> Result<(), TemplateError> {
    for (name, ops) in files {
        write_yaml(&directory.join(format!("{name}.yml")), ops)?;
    }
    Ok(())
}

/// Generate every template file for the tile metadata in `raw`. Returns
/// the directory the files were written to.
pub fn generate(raw: &[u8], options: &GenerateOptions) -> Result<PathBuf, TemplateError> {
    let metadata = Metadata::parse(raw)?;
    if metadata.version.is_empty() {
        return Err(TemplateError::BlankVersion);
    }

    let mut target = options.output_directory.join(&metadata.name);
    if !options.exclude_version {
        target = target.join(&metadata.version);
    }
    let features = target.join("features");
    let optional = target.join("optional");
    let network = target.join("network");
    let resource = target.join("resource");
    for dir in [&target, &features, &optional, &network, &resource] {
        create_dir(dir)?;
    }

    let generator = Generator::new(&metadata, options.size_of_collections);
    let template = generator.template();

    write_yaml(&target.join("product.yml"), &template)?;
    write_yaml(&target.join("product-default-vars.yml"), &generator.default_vars())?;
    write_yaml(&target.join("required-vars.yml"), &generator.required_vars(&template))?;
    write_yaml(&target.join("resource-vars.yml"), &generator.resource_vars())?;
    write_yaml(&target.join("errand-vars.yml"), &generator.errand_vars())?;
    write_ops(&network, &generator.network_ops())?;
    write_ops(&resource, &generator.resource_ops())?;
    write_ops(&features, &generator.feature_ops())?;
    write_ops(&optional, &generator.optional_ops())?;

    info!(product = %metadata.name, version = %metadata.version, directory = %target.display(), "generated config template");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use metadata::tests::TILE;

    fn listing(root: &Path) -> Vec<String> {
        let mut files = Vec::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    files.push(path.strip_prefix(root).unwrap().display().to_string());
                }
            }
        }
        files.sort();
        files
    }

    #[test]
    fn test_generate_writes_layout() {
        let out = tempfile::tempdir().unwrap();
        let mut options = GenerateOptions::new(out.path());
        options.size_of_collections = 2;

        let target = generate(TILE.as_bytes(), &options).unwrap();
        assert_eq!(target, out.path().join("example-product").join("1.2.3-build.4"));
        assert_eq!(
            listing(&target),
            vec![
                "errand-vars.yml",
                "features/features_alpha.yml",
                "features/features_beta.yml",
                "features/plan-large_option.yml",
                "network/2-az-configuration.yml",
                "network/3-az-configuration.yml",
                "optional/add-2-routes.yml",
                "optional/add-banner.yml",
                "optional/add-plan-large_option-disk.yml",
                "optional/add-worker_vm.yml",
                "product-default-vars.yml",
                "product.yml",
                "required-vars.yml",
                "resource-vars.yml",
                "resource/web_additional_vm_extensions.yml",
                "resource/web_elb_names.yml",
                "resource/web_internet_connected.yml",
                "resource/web_nsx_security_groups.yml",
            ]
        );

        let product: serde_yaml::Value =
            serde_yaml::from_str(&std::fs::read_to_string(target.join("product.yml")).unwrap())
                .unwrap();
        assert_eq!(product["product-name"], "example-product");
        assert_eq!(
            product["network-properties"]["network"]["name"],
            "((network_name))"
        );
    }

    #[test]
    fn test_exclude_version() {
        let out = tempfile::tempdir().unwrap();
        let mut options = GenerateOptions::new(out.path());
        options.exclude_version = true;
        let target = generate(TILE.as_bytes(), &options).unwrap();
        assert_eq!(target, out.path().join("example-product"));
    }

    #[test]
    fn test_blank_version() {
        let out = tempfile::tempdir().unwrap();
        let err = generate(b"name: p\n", &GenerateOptions::new(out.path())).unwrap_err();
        assert_eq!(err.to_string(), "version in metadata is blank");
    }
}
