//! Verifier, license, errand and readiness commands.

use std::sync::LazyLock;

use anyhow::{bail, Context as _};
use chrono::{DateTime, Duration as Span, Months, Utc};
use regex::Regex;
use serde_json::Value;

use super::{load_config, Context, CONFIG_FILE, VAR, VARS_ENV, VARS_FILE};
use crate::api::{ApiError, Errand, LicensedProduct, Verifier, VmExtension};
use crate::options::{Bound, CommandSpec, ConfigMode, OptionSpec};
use crate::presenters::{Presenter, Tabular, FORMAT_OPTION};

pub const CREATE_VM_EXTENSION: CommandSpec = CommandSpec {
    name: "create-vm-extension",
    summary: "creates/updates a VM extension",
    description: "This creates/updates a VM extension",
    options: &[
        OptionSpec::string("name", "VM extension name").short('n'),
        OptionSpec::string("cloud-properties", "cloud properties in JSON format"),
        CONFIG_FILE,
        VARS_FILE,
        VARS_ENV,
        VAR,
    ],
    config: ConfigMode::Own,
};

pub const DIAGNOSTIC_REPORT: CommandSpec = CommandSpec {
    name: "diagnostic-report",
    summary: "reports current state of your Ops Manager",
    description: "retrieve a diagnostic report with general information about the state of your Ops Manager",
    options: &[],
    config: ConfigMode::None,
};

pub const DISABLE_DIRECTOR_VERIFIERS: CommandSpec = CommandSpec {
    name: "disable-director-verifiers",
    summary: "disables director verifiers",
    description: "This authenticated command disables director verifiers",
    options: &[OptionSpec::repeated("type", "verifier type to disable").short('t').required()],
    config: ConfigMode::Flags,
};

pub const DISABLE_PRODUCT_VERIFIERS: CommandSpec = CommandSpec {
    name: "disable-product-verifiers",
    summary: "disables product verifiers",
    description: "This authenticated command disables product verifiers",
    options: &[
        OptionSpec::string("product-name", "the name of the product").short('n').required(),
        OptionSpec::repeated("type", "verifier type to disable").short('t').required(),
    ],
    config: ConfigMode::Flags,
};

pub const ERRANDS: CommandSpec = CommandSpec {
    name: "errands",
    summary: "list errands for a product",
    description: "This authenticated command lists all errands for a product.",
    options: &[
        OptionSpec::string("product-name", "name of product").short('p').required(),
        FORMAT_OPTION,
    ],
    config: ConfigMode::None,
};

pub const EXPIRING_LICENSES: CommandSpec = CommandSpec {
    name: "expiring-licenses",
    summary: "lists expiring licenses in Ops Manager",
    description: "This authenticated command lists product licenses that expire within the given timeframe",
    options: &[
        OptionSpec::flag("staged", "include staged products").short('s'),
        OptionSpec::flag("deployed", "include deployed products").short('d'),
        OptionSpec::string(
            "expires-within",
            "timeframe in which to check expiration. Default: \"3m\".\n\t\t\t\tdays(d), weeks(w), months(m) and years(y) supported.",
        )
        .short('e')
        .default("3m"),
        FORMAT_OPTION,
    ],
    config: ConfigMode::None,
};

pub const PRE_DEPLOY_CHECK: CommandSpec = CommandSpec {
    name: "pre-deploy-check",
    summary: "checks that the director and staged products are ready to deploy",
    description: "This authenticated command checks whether the director and every staged product are completely configured",
    options: &[],
    config: ConfigMode::None,
};

static EXPIRES_WITHIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([1-9]\d*)([dwmy])$").unwrap());

/// The instant `within` (e.g. `3m`) from `now`.
fn deadline(now: DateTime<Utc>, within: &str) -> anyhow::Result<DateTime<Utc>> {
    let invalid = || anyhow::anyhow!("only d,w,m, or y are supported. Default is \"3m\"");
    let captures = EXPIRES_WITHIN.captures(within).ok_or_else(invalid)?;
    let count: u32 = captures[1].parse().map_err(|_| invalid())?;
    let deadline = match &captures[2] {
        "d" => now.checked_add_signed(Span::days(i64::from(count))),
        "w" => now.checked_add_signed(Span::weeks(i64::from(count))),
        "m" => now.checked_add_months(Months::new(count)),
        _ => count
            .checked_mul(12)
            .and_then(|months| now.checked_add_months(Months::new(months))),
    };
    deadline.ok_or_else(|| anyhow::anyhow!("expiration window {within} is too large"))
}

impl Tabular for LicensedProduct {
    fn headers() -> Vec<&'static str> {
        vec!["Product Name", "GUID", "Expires At", "Product State"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.product_name.clone(),
            self.guid.clone(),
            self.expires_at.format("%Y-%m-%d").to_string(),
            self.product_state.join(", "),
        ]
    }
}

fn errand_state(state: Option<&Value>) -> String {
    match state {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

impl Tabular for Errand {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Post Deploy Enabled", "Pre Delete Enabled"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            errand_state(self.post_deploy.as_ref()),
            errand_state(self.pre_delete.as_ref()),
        ]
    }
}

pub async fn create_vm_extension(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let extension = if options.str("config").is_some() {
        let document = load_config(ctx, options)?;
        let name = document
            .get("name")
            .and_then(serde_yaml::Value::as_str)
            .unwrap_or_default();
        if name.is_empty() {
            bail!("Config file must contain name element");
        }
        let cloud_properties = match document.get("cloud_properties") {
            Some(properties) => super::to_json(properties)?,
            None => Value::Object(serde_json::Map::new()),
        };
        VmExtension {
            name: name.to_string(),
            cloud_properties,
        }
    } else {
        let Some(name) = options.str("name") else {
            bail!("VM Extension name must provide name via --name flag");
        };
        let cloud_properties = match options.str("cloud-properties") {
            Some(raw) => serde_json::from_str(raw)
                .context("could not parse cloud-properties as JSON")?,
            None => Value::Object(serde_json::Map::new()),
        };
        VmExtension {
            name: name.to_string(),
            cloud_properties,
        }
    };

    ctx.api()?
        .create_vm_extension(&extension)
        .await
        .context("could not create/update VM extension")?;
    ctx.console
        .log(format!("VM Extension '{}' created/updated", extension.name));
    Ok(())
}

pub async fn diagnostic_report(ctx: &Context, _options: &Bound) -> anyhow::Result<()> {
    let report = ctx
        .api()?
        .diagnostic_report()
        .await
        .context("failed to retrieve diagnostic-report")?;
    ctx.console.println(report.full_report);
    Ok(())
}

/// Types in `wanted` that `existing` does not know about.
fn missing_verifiers<'a>(existing: &[Verifier], wanted: &'a [String]) -> Vec<&'a str> {
    wanted
        .iter()
        .filter(|w| !existing.iter().any(|v| &v.verifier_type == *w))
        .map(String::as_str)
        .collect()
}

fn report_missing(ctx: &Context, missing: &[&str]) {
    ctx.console.log("The following verifiers do not exist:");
    for verifier in missing {
        ctx.console.log(format!("- {verifier}"));
    }
    ctx.console.log("\nNo changes were made.\n");
}

fn report_disabled(ctx: &Context, types: &[String]) {
    ctx.console.log("The following verifiers were disabled:");
    for verifier in types {
        ctx.console.log(format!("- {verifier}"));
    }
}

pub async fn disable_director_verifiers(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let api = ctx.api()?;
    let types = options.list("type");
    let existing = api
        .list_director_verifiers()
        .await
        .context("could not get available director verifiers from Ops Manager")?;

    let missing = missing_verifiers(&existing, types);
    if !missing.is_empty() {
        report_missing(ctx, &missing);
        bail!("verifier does not exist for director");
    }

    ctx.console.log("Disabling Director Verifiers...\n");
    api.disable_director_verifiers(types)
        .await
        .context("could not disable director verifiers")?;
    report_disabled(ctx, types);
    Ok(())
}

pub async fn disable_product_verifiers(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let api = ctx.api()?;
    let name = options.string("product-name");
    let types = options.list("type");
    let guid = api.staged_product_guid(&name).await?;
    let existing = api
        .list_product_verifiers(&guid)
        .await
        .with_context(|| format!("could not get available verifiers for product {name}"))?;

    let missing = missing_verifiers(&existing, types);
    if !missing.is_empty() {
        report_missing(ctx, &missing);
        bail!("verifier does not exist for product");
    }

    ctx.console.log("Disabling Product Verifiers...\n");
    api.disable_product_verifiers(&guid, types)
        .await
        .with_context(|| format!("could not disable verifiers for product {name}"))?;
    report_disabled(ctx, types);
    Ok(())
}

pub async fn errands(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let presenter = Presenter::from_options(&ctx.console, options)?;
    let api = ctx.api()?;
    let name = options.string("product-name");
    let guid = match api.staged_product_guid(&name).await {
        Ok(guid) => guid,
        Err(ApiError::ProductNotStaged(_)) => bail!("failed to find staged product {name:?}"),
        Err(err) => return Err(err).context("failed to list errands"),
    };
    let errands = api
        .list_staged_product_errands(&guid)
        .await
        .context("failed to list errands")?;
    presenter.list(&errands)?;
    Ok(())
}

pub async fn expiring_licenses(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let presenter = Presenter::from_options(&ctx.console, options)?;
    let within = options.str("expires-within").unwrap_or("3m");
    let deadline = deadline(Utc::now(), within)?;

    ctx.console.log("Getting expiring licenses...");
    let licenses = ctx
        .api()?
        .list_expiring_licenses(deadline, options.flag("staged"), options.flag("deployed"))
        .await
        .context("could not fetch expiring licenses")?;
    if licenses.is_empty() {
        ctx.console
            .log(ctx.console.green(&format!("[✓] No licenses are expiring in {within}")));
        return Ok(());
    }
    presenter.list(&licenses)?;
    Ok(())
}

pub async fn pre_deploy_check(ctx: &Context, _options: &Bound) -> anyhow::Result<()> {
    let api = ctx.api()?;
    let info = api.info().await?;
    if !info.version_at_least(2, 6).unwrap_or(false) {
        bail!("pre deploy checks are only supported in OpsManager 2.6");
    }

    let report = api
        .pre_deploy_report()
        .await
        .context("while getting pre deploy checks")?;
    if !report.director.complete {
        ctx.console.log("The director is not configured correctly.");
        bail!("OpsManager is not fully configured");
    }

    let incomplete = report.incomplete_products();
    if !incomplete.is_empty() {
        ctx.console
            .log("The director is configured correctly, but the following product(s) are not.");
        for identifier in incomplete {
            ctx.console.log(ctx.console.red(&format!("[X] {identifier}")));
        }
        bail!("OpsManager is not fully configured");
    }

    ctx.console.log("The director and products are configured correctly.");
    Ok(())
}
