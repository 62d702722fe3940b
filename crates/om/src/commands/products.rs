//! Uploading, staging, listing and deleting products.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context as _};
use serde::Serialize;

use super::{ensure_no_running_installation, file_sha256, Context};
use crate::api::{AvailableProduct, DeployedProduct, StageOutcome, StagedProduct};
use crate::extractor;
use crate::formcontent::Form;
use crate::options::{Bound, CommandSpec, ConfigMode, OptionSpec};
use crate::presenters::{Presenter, Tabular, FORMAT_OPTION};

pub const AVAILABLE_PRODUCTS: CommandSpec = CommandSpec {
    name: "available-products",
    summary: "list available products",
    description: "This authenticated command lists all available products.",
    options: &[FORMAT_OPTION],
    config: ConfigMode::None,
};

pub const DELETE_PRODUCT: CommandSpec = CommandSpec {
    name: "delete-product",
    summary: "deletes a product from the Ops Manager",
    description: "This command deletes the named product from the targeted Ops Manager",
    options: &[
        OptionSpec::string("product-name", "name of product").short('p').required(),
        OptionSpec::string("product-version", "version of product").short('v').required(),
    ],
    config: ConfigMode::None,
};

pub const DELETE_UNUSED_PRODUCTS: CommandSpec = CommandSpec {
    name: "delete-unused-products",
    summary: "deletes unused products",
    description: "This command deletes unused products in the targeted Ops Manager",
    options: &[],
    config: ConfigMode::None,
};

pub const DEPLOYED_PRODUCTS: CommandSpec = CommandSpec {
    name: "deployed-products",
    summary: "lists deployed products",
    description: "This authenticated command lists all deployed products.",
    options: &[FORMAT_OPTION],
    config: ConfigMode::None,
};

pub const PRODUCTS: CommandSpec = CommandSpec {
    name: "products",
    summary: "lists product staged, available, and deployed versions",
    description: "This authenticated command lists all products. Staged, available, and deployed are listed by default.",
    options: &[
        OptionSpec::flag("available", "Specify to include available products. Can be used with other options.").short('a'),
        OptionSpec::flag("staged", "Specify to include staged products. Can be used with other options.").short('s'),
        OptionSpec::flag("deployed", "Specify to deployed products. Can be used with other options.").short('d'),
        FORMAT_OPTION,
    ],
    config: ConfigMode::None,
};

pub const STAGE_PRODUCT: CommandSpec = CommandSpec {
    name: "stage-product",
    summary: "stages a given product in the Ops Manager targeted",
    description: "This command attempts to stage a product in the Ops Manager",
    options: &[
        OptionSpec::string("product-name", "name of product").short('p').required(),
        OptionSpec::string("product-version", "version of product").short('v').required(),
    ],
    config: ConfigMode::Flags,
};

pub const STAGED_PRODUCTS: CommandSpec = CommandSpec {
    name: "staged-products",
    summary: "lists staged products",
    description: "This authenticated command lists all staged products.",
    options: &[FORMAT_OPTION],
    config: ConfigMode::None,
};

pub const UNSTAGE_PRODUCT: CommandSpec = CommandSpec {
    name: "unstage-product",
    summary: "unstages a given product from the Ops Manager targeted",
    description: "This command attempts to unstage a product from the Ops Manager",
    options: &[OptionSpec::string("product-name", "name of product").short('p').required()],
    config: ConfigMode::None,
};

pub const UPLOAD_PRODUCT: CommandSpec = CommandSpec {
    name: "upload-product",
    summary: "uploads a given product to the Ops Manager targeted",
    description: "This command attempts to upload a product to the Ops Manager",
    options: &[
        OptionSpec::string("product", "path to product").short('p').required(),
        OptionSpec::int("polling-interval", "interval (in seconds) at which to print status").default("1"),
        OptionSpec::string("sha256", "sha256 of the provided product file to be used for validation"),
        OptionSpec::string("product-version", "version of the provided product file to be used for validation"),
    ],
    config: ConfigMode::Flags,
};

impl Tabular for AvailableProduct {
    fn headers() -> Vec<&'static str> {
        vec!["NAME", "VERSION"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.name.clone(), self.version.clone()]
    }
}

impl Tabular for StagedProduct {
    fn headers() -> Vec<&'static str> {
        vec!["NAME", "VERSION"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.product_type.clone(), self.product_version.clone()]
    }
}

impl Tabular for DeployedProduct {
    fn headers() -> Vec<&'static str> {
        vec!["NAME", "VERSION"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.product_type.clone(), self.product_version.clone()]
    }
}

pub async fn available_products(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let presenter = Presenter::from_options(&ctx.console, options)?;
    let products = ctx.api()?.list_available_products().await?;
    if products.is_empty() {
        ctx.console.log("no available products found");
        return Ok(());
    }
    presenter.list(&products)?;
    Ok(())
}

pub async fn delete_product(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let name = options.string("product-name");
    let version = options.string("product-version");
    ctx.console
        .log(format!("deleting {name} {version}"));
    ctx.api()?
        .delete_available_products(Some((&name, &version)))
        .await?;
    ctx.console.log("done");
    Ok(())
}

pub async fn delete_unused_products(ctx: &Context, _options: &Bound) -> anyhow::Result<()> {
    ctx.console.log("trashing unused products");
    ctx.api()?.delete_available_products(None).await?;
    ctx.console.log("done");
    Ok(())
}

pub async fn deployed_products(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let presenter = Presenter::from_options(&ctx.console, options)?;
    let products = ctx
        .api()?
        .list_deployed_products()
        .await
        .context("failed to retrieve deployed products")?;
    presenter.list(&products)?;
    Ok(())
}

pub async fn staged_products(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let presenter = Presenter::from_options(&ctx.console, options)?;
    let products = ctx
        .api()?
        .list_staged_products()
        .await
        .context("failed to retrieve staged products")?;
    presenter.list(&products)?;
    Ok(())
}

/// Every version one product name is known at.
#[derive(Debug, Default, Serialize)]
struct ProductVersions {
    name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    available: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    staged: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    deployed: String,
}

/// Which columns `products` shows.
#[derive(Debug, Clone, Copy)]
struct Columns {
    available: bool,
    staged: bool,
    deployed: bool,
}

impl Columns {
    fn from_options(options: &Bound) -> Self {
        let (available, staged, deployed) = (
            options.flag("available"),
            options.flag("staged"),
            options.flag("deployed"),
        );
        if !available && !staged && !deployed {
            return Self {
                available: true,
                staged: true,
                deployed: true,
            };
        }
        Self {
            available,
            staged,
            deployed,
        }
    }

    fn headers(self) -> Vec<&'static str> {
        let mut headers = vec!["NAME"];
        if self.available {
            headers.push("AVAILABLE");
        }
        if self.staged {
            headers.push("STAGED");
        }
        if self.deployed {
            headers.push("DEPLOYED");
        }
        headers
    }

    fn row(self, product: &ProductVersions) -> Vec<String> {
        let mut row = vec![product.name.clone()];
        if self.available {
            row.push(product.available.join(", "));
        }
        if self.staged {
            row.push(product.staged.clone());
        }
        if self.deployed {
            row.push(product.deployed.clone());
        }
        row
    }
}

fn versions_of<'a>(
    combined: &'a mut BTreeMap<String, ProductVersions>,
    name: &str,
) -> &'a mut ProductVersions {
    combined
        .entry(name.to_string())
        .or_insert_with(|| ProductVersions {
            name: name.to_string(),
            ..ProductVersions::default()
        })
}

pub async fn products(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let presenter = Presenter::from_options(&ctx.console, options)?;
    let api = ctx.api()?;
    let report = api
        .diagnostic_report()
        .await
        .context("failed to retrieve staged and deployed products")?;
    let available = api
        .list_available_products()
        .await
        .context("failed to retrieve available products")?;

    let mut combined: BTreeMap<String, ProductVersions> = BTreeMap::new();
    for product in &report.staged_products {
        versions_of(&mut combined, &product.name)
            .staged
            .clone_from(&product.version);
    }
    for product in &report.deployed_products {
        versions_of(&mut combined, &product.name)
            .deployed
            .clone_from(&product.version);
    }
    for product in &available {
        versions_of(&mut combined, &product.name)
            .available
            .push(product.version.clone());
    }

    let columns = Columns::from_options(options);
    let products: Vec<ProductVersions> = combined.into_values().collect();
    let rows = products.iter().map(|p| columns.row(p)).collect();
    presenter.rows(&columns.headers(), rows, &products)?;
    Ok(())
}

pub async fn stage_product(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let name = options.string("product-name");
    let version = options.string("product-version");
    let api = ctx.api()?;

    ensure_no_running_installation(&api).await?;

    ctx.console.log(format!("staging {name} {version}"));
    let outcome = api
        .stage_product(&name, &version)
        .await
        .context("failed to stage product")?;
    if outcome == StageOutcome::AlreadyStaged {
        ctx.console.log(format!("{name} {version} is already staged"));
        return Ok(());
    }
    ctx.console.log("finished staging");
    Ok(())
}

pub async fn unstage_product(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let name = options.string("product-name");
    ctx.console.log(format!("unstaging {name}"));
    ctx.api()?
        .unstage_product(&name)
        .await
        .context("failed to unstage product")?;
    ctx.console.log("finished unstaging");
    Ok(())
}

pub async fn upload_product(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let product = options.string("product");

    if let Some(expected) = options.str("sha256").filter(|s| !s.is_empty()) {
        let actual = file_sha256(&product)
            .with_context(|| format!("could not calculate shasum of {product}"))?;
        if actual != expected {
            bail!("expected shasum {expected} does not match file shasum {actual}");
        }
        ctx.console.log("expected shasum matches product shasum.");
    }

    let metadata =
        extractor::extract_from_file(&product).context("failed to extract product metadata")?;

    if let Some(expected) = options.str("product-version").filter(|s| !s.is_empty()) {
        if expected != metadata.version {
            bail!(
                "expected version {expected} does not match product version {}",
                metadata.version
            );
        }
        ctx.console.log("expected version matches product version.");
    }

    let api = ctx.api()?;
    let available = api
        .check_product_availability(&metadata.name, &metadata.version)
        .await
        .context("failed to check product availability")?;
    if available {
        ctx.console.log(format!(
            "product {} {} is already uploaded, nothing to be done.",
            metadata.name, metadata.version
        ));
        return Ok(());
    }

    ctx.console.log("processing product");
    let mut form = Form::new();
    form.add_file("product[file]", &product)
        .context("failed to load product")?;

    ctx.console.log("beginning product upload to Ops Manager");
    let interval = u64::try_from(options.int("polling-interval")).unwrap_or(1).max(1);
    api.upload_available_product(form, Duration::from_secs(interval))
        .await
        .context("failed to upload product")?;

    let listed = api
        .check_product_availability(&metadata.name, &metadata.version)
        .await
        .context("failed to confirm product upload")?;
    if !listed {
        bail!(
            "failed to upload product: {} {} is not listed in available products after upload",
            metadata.name,
            metadata.version
        );
    }
    ctx.console.log("finished upload");
    Ok(())
}
