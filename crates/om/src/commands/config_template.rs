//! Template generation and metadata lookup for tiles.

use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context as _};

use super::Context;
use crate::configtemplate::{self, GenerateOptions, DEFAULT_SIZE_OF_COLLECTIONS};
use crate::download::{ProductSource, VendorConfig, VendorSource, DEFAULT_VENDOR_HOST};
use crate::extractor;
use crate::options::{Bound, CommandSpec, ConfigMode, OptionSpec};

pub const CONFIG_TEMPLATE: CommandSpec = CommandSpec {
    name: "config-template",
    summary: "generates a config template from a Pivnet product",
    description: "this command generates a product configuration template from a .pivotal file on Pivnet",
    options: &[
        OptionSpec::string("pivnet-api-token", "API token for the vendor network"),
        OptionSpec::string("pivnet-product-slug", "the product name in the vendor network"),
        OptionSpec::string("product-version", "the version of the product from which to generate a template"),
        OptionSpec::string("pivnet-host", "the API endpoint for the vendor network").default(DEFAULT_VENDOR_HOST),
        OptionSpec::string("file-glob", "a glob to match exactly one file in the vendor network product").short('f').default("*.pivotal"),
        OptionSpec::string("pivnet-file-glob", "a glob to match exactly one file in the vendor network product").hidden(),
        OptionSpec::flag("pivnet-disable-ssl", "whether to disable ssl validation when contacting the vendor network"),
        OptionSpec::string("product-path", "path to the product file"),
        OptionSpec::string("metadata-path", "path to a product metadata YAML file"),
        OptionSpec::string("output-directory", "a directory to create templates under. must already exist.").required(),
        OptionSpec::flag("exclude-version", "if set, will not output a version-specific directory"),
        OptionSpec::int("size-of-collections", "the number of collection items to generate ops files for").default("10"),
    ],
    config: ConfigMode::Flags,
};

pub const PRODUCT_METADATA: CommandSpec = CommandSpec {
    name: "product-metadata",
    summary: "prints product metadata",
    description: "This command prints metadata about the given product from a .pivotal file or the vendor network",
    options: &[
        OptionSpec::string("product-path", "path to product file").short('p'),
        OptionSpec::flag("product-name", "show product name"),
        OptionSpec::flag("product-version", "show product version"),
        OptionSpec::string("pivnet-api-token", "API token for the vendor network"),
        OptionSpec::string("pivnet-product-slug", "the product name in the vendor network"),
        OptionSpec::string("pivnet-product-version", "the version of the product"),
        OptionSpec::string("pivnet-host", "the API endpoint for the vendor network").default(DEFAULT_VENDOR_HOST),
        OptionSpec::string("file-glob", "a glob to match exactly one file in the vendor network product").short('f').default("*.pivotal"),
        OptionSpec::flag("pivnet-disable-ssl", "whether to disable ssl validation when contacting the vendor network"),
    ],
    config: ConfigMode::None,
};

/// Where tile metadata is read from.
enum MetadataSource<'a> {
    Tile(&'a str),
    File(&'a str),
    Vendor {
        slug: &'a str,
        version: &'a str,
    },
}

fn tile_metadata(path: &str) -> anyhow::Result<Vec<u8>> {
    let file = File::open(path).with_context(|| format!("could not open product file {path}"))?;
    Ok(extractor::raw_metadata(file)?)
}

async fn vendor_metadata(
    options: &Bound,
    slug: &str,
    version: &str,
) -> anyhow::Result<extractor::Metadata> {
    let source = VendorSource::new(VendorConfig {
        host: options.string("pivnet-host"),
        token: options.string("pivnet-api-token"),
        disable_ssl: options.flag("pivnet-disable-ssl"),
    })?;
    let glob = options
        .str("pivnet-file-glob")
        .or_else(|| options.str("file-glob"))
        .unwrap_or("*.pivotal");

    let fetched = async {
        let file = source.latest_product_file(slug, version, glob).await?;
        source.product_metadata(&file).await
    }
    .await;
    fetched.with_context(|| format!("error getting metadata for {slug} at version {version}"))
}

async fn load_metadata(options: &Bound, source: MetadataSource<'_>) -> anyhow::Result<Vec<u8>> {
    match source {
        MetadataSource::Tile(path) => tile_metadata(path),
        MetadataSource::File(path) => {
            std::fs::read(path).with_context(|| format!("could not read metadata file {path}"))
        }
        MetadataSource::Vendor { slug, version } => {
            Ok(vendor_metadata(options, slug, version).await?.raw)
        }
    }
}

pub async fn config_template(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let output = options.string("output-directory");
    if !Path::new(&output).is_dir() {
        bail!("output-directory does not exist: {output}");
    }

    let vendor = options.str("pivnet-api-token").is_some()
        || options.str("pivnet-product-slug").is_some()
        || options.str("product-version").is_some();
    let product_path = options.str("product-path");
    let metadata_path = options.str("metadata-path");

    let selected = usize::from(vendor)
        + usize::from(product_path.is_some())
        + usize::from(metadata_path.is_some());
    if selected != 1 {
        bail!("cannot load tile metadata: please provide either pivnet flags OR product-path OR metadata-path");
    }

    let source = match (product_path, metadata_path) {
        (Some(path), _) => MetadataSource::Tile(path),
        (_, Some(path)) => MetadataSource::File(path),
        (None, None) => {
            let (Some(slug), Some(version), Some(_)) = (
                options.str("pivnet-product-slug"),
                options.str("product-version"),
                options.str("pivnet-api-token"),
            ) else {
                bail!("cannot load tile metadata: --pivnet-api-token, --pivnet-product-slug and --product-version are all required when using the vendor network");
            };
            MetadataSource::Vendor { slug, version }
        }
    };
    let raw = load_metadata(options, source).await?;

    let size = match options.int("size-of-collections") {
        n if n > 0 => usize::try_from(n).unwrap_or(DEFAULT_SIZE_OF_COLLECTIONS),
        _ => DEFAULT_SIZE_OF_COLLECTIONS,
    };
    let generate = GenerateOptions {
        output_directory: output.into(),
        exclude_version: options.flag("exclude-version"),
        size_of_collections: size,
    };
    let target = configtemplate::generate(&raw, &generate)?;
    ctx.console
        .log(format!("wrote config template to {}", target.display()));
    Ok(())
}

pub async fn product_metadata(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let show_name = options.flag("product-name");
    let show_version = options.flag("product-version");
    if !show_name && !show_version {
        bail!("you must specify product-name and/or product-version");
    }

    let metadata = if let Some(path) = options.str("product-path") {
        extractor::extract_from_file(path)
            .with_context(|| format!("failed to read metadata from {path}"))?
    } else {
        let (Some(slug), Some(version)) = (
            options.str("pivnet-product-slug"),
            options.str("pivnet-product-version"),
        ) else {
            bail!("please provide either --product-path or the --pivnet-* flags");
        };
        vendor_metadata(options, slug, version).await?
    };

    if show_name {
        ctx.console.println(&metadata.name);
    }
    if show_version {
        ctx.console.println(&metadata.version);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::Harness;
    use crate::extractor::tests::tile;

    const SELECTOR_METADATA: &str = r#"
name: selector-product
product_version: "2.0.1"
property_blueprints:
  - name: mode
    type: selector
    configurable: true
    default: default
    option_templates:
      - name: default
        select_value: default
        property_blueprints:
          - name: password
            type: secret
            configurable: true
      - name: replace
        select_value: replace
        property_blueprints:
          - name: name
            type: string
            configurable: true
job_types: []
"#;

    fn read_yaml(path: &Path) -> serde_yaml::Value {
        serde_yaml::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_selector_template_from_metadata_file() {
        let harness = Harness::start().await;
        let dir = tempfile::tempdir().unwrap();
        let metadata = dir.path().join("metadata.yml");
        std::fs::write(&metadata, SELECTOR_METADATA).unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();

        harness
            .run(
                &CONFIG_TEMPLATE,
                &[
                    "--metadata-path",
                    metadata.to_str().unwrap(),
                    "--output-directory",
                    out.to_str().unwrap(),
                ],
            )
            .await
            .unwrap();

        let target = out.join("selector-product").join("2.0.1");
        let product = read_yaml(&target.join("product.yml"));
        let properties = &product["product-properties"];
        assert_eq!(properties["properties.mode"]["value"], "default");
        assert_eq!(
            properties["properties.mode.default.password"]["value"]["secret"],
            "((mode_default_password))"
        );

        let feature = read_yaml(&target.join("features").join("mode-replace.yml"));
        let ops = feature.as_sequence().unwrap();
        assert_eq!(ops[0]["type"], "replace");
        assert_eq!(ops[0]["path"], "/product-properties/properties.mode?");
        assert_eq!(ops[0]["value"]["value"], "replace");
        assert!(ops.iter().any(|op| op["type"] == "remove"
            && op["path"] == "/product-properties/properties.mode.default.password?"));
    }

    #[tokio::test]
    async fn test_config_template_from_tile_without_version_dir() {
        let harness = Harness::start().await;
        let dir = tempfile::tempdir().unwrap();
        let product = dir.path().join("product.pivotal");
        std::fs::write(&product, tile("metadata/selector.yml", SELECTOR_METADATA)).unwrap();

        harness
            .run(
                &CONFIG_TEMPLATE,
                &[
                    "--product-path",
                    product.to_str().unwrap(),
                    "--output-directory",
                    dir.path().to_str().unwrap(),
                    "--exclude-version",
                ],
            )
            .await
            .unwrap();
        assert!(dir.path().join("selector-product").join("product.yml").is_file());
    }

    #[tokio::test]
    async fn test_config_template_validation() {
        let harness = Harness::start().await;
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().to_str().unwrap();

        let err = harness
            .run(&CONFIG_TEMPLATE, &["--output-directory", "/does/not/exist"])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "output-directory does not exist: /does/not/exist");

        let err = harness
            .run(&CONFIG_TEMPLATE, &["--output-directory", out])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("please provide either pivnet flags OR product-path"));

        let err = harness
            .run(
                &CONFIG_TEMPLATE,
                &["--output-directory", out, "--product-path", "a", "--pivnet-product-slug", "b"],
            )
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("cannot load tile metadata"));
    }

    #[tokio::test]
    async fn test_product_metadata_prints_name_and_version() {
        let harness = Harness::start().await;
        let dir = tempfile::tempdir().unwrap();
        let product = dir.path().join("product.pivotal");
        std::fs::write(&product, tile("metadata/selector.yml", SELECTOR_METADATA)).unwrap();

        harness
            .run(
                &PRODUCT_METADATA,
                &["--product-path", product.to_str().unwrap(), "--product-name", "--product-version"],
            )
            .await
            .unwrap();
        assert_eq!(harness.stdout(), "selector-product\n2.0.1\n");

        let err = harness
            .run(&PRODUCT_METADATA, &["--product-path", product.to_str().unwrap()])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "you must specify product-name and/or product-version");
    }
}
