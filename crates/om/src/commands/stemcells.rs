//! Stemcell upload and product stemcell assignment.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{anyhow, bail, Context as _};
use regex::Regex;

use super::{file_sha256, Context};
use crate::api::{Api, ApiError, ProductStemcells, StemcellRef};
use crate::formcontent::Form;
use crate::options::{Bound, CommandSpec, ConfigMode, OptionSpec};

pub const ASSIGN_STEMCELL: CommandSpec = CommandSpec {
    name: "assign-stemcell",
    summary: "assigns an uploaded stemcell to a product in the targeted Ops Manager",
    description: "This command will assign an already uploaded stemcell to a specific product in Ops Manager.\nIt is recommended to use \"upload-stemcell --floating=false\" before using this command.",
    options: &[
        OptionSpec::string("product", "name of Ops Manager tile to associate a stemcell to").short('p').required(),
        OptionSpec::string("stemcell", "the stemcell version to assign to the product").short('s').default("latest"),
    ],
    config: ConfigMode::Flags,
};

pub const ASSIGN_MULTI_STEMCELL: CommandSpec = CommandSpec {
    name: "assign-multi-stemcell",
    summary: "assigns multiple uploaded stemcells to a product in the targeted Ops Manager 2.6+",
    description: "This command will assign multiple already uploaded stemcells to a specific product in Ops Manager 2.6+.\nIt is recommended to use \"upload-stemcell --floating=false\" before using this command.",
    options: &[
        OptionSpec::string("product", "name of Ops Manager tile to associate a stemcell to").short('p').required(),
        OptionSpec::repeated("stemcell", "the stemcell to assign to the product, in the format operating-system:version (version may be latest)").short('s').required(),
    ],
    config: ConfigMode::Flags,
};

pub const UPLOAD_STEMCELL: CommandSpec = CommandSpec {
    name: "upload-stemcell",
    summary: "uploads a given stemcell to the Ops Manager targeted",
    description: "This command will upload a stemcell to the target Ops Manager. Unless the force flag is used, if the stemcell already exists that upload will be skipped",
    options: &[
        OptionSpec::string("stemcell", "path to stemcell").short('s').required(),
        OptionSpec::flag("force", "upload stemcell even if it already exists on the target Ops Manager").short('f'),
        OptionSpec::string("floating", "assigns the stemcell to all compatible products ").default("true"),
        OptionSpec::string("shasum", "shasum of the provided product file to be used for validation"),
    ],
    config: ConfigMode::Flags,
};

/// `[slug,version]` prefix that download-product puts on file names.
static DOWNLOAD_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\[.*?,.*?\](.+)$").unwrap());

/// The assignment entry for `product`, refusing products marked for deletion.
async fn product_stemcells(api: &Api, product: &str) -> anyhow::Result<ProductStemcells> {
    let assignments = api.list_stemcell_assignments().await?;
    if let Some(found) = assignments.product(product) {
        return Ok(found.clone());
    }
    if assignments.products.iter().any(|p| p.product_name == product) {
        bail!("could not assign stemcell: product \"{product}\" is staged for deletion");
    }
    bail!("could not list product stemcell: product \"{product}\" not found")
}

fn describe(stemcells: &[StemcellRef]) -> String {
    stemcells
        .iter()
        .map(|s| format!("{} {}", s.os, s.version))
        .collect::<Vec<_>>()
        .join(", ")
}

pub async fn assign_stemcell(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let product = options.string("product");
    let wanted = options.string("stemcell");
    let api = ctx.api()?;

    ctx.console
        .log(format!("finding available stemcells for product: \"{product}\"..."));
    let stemcells = product_stemcells(&api, &product).await?;

    ctx.console
        .log("validating that stemcell exists in Ops Manager...");
    let available = &stemcells.available_versions;
    let Some(latest) = available.last() else {
        bail!(
            "no stemcells are available for \"{product}\". minimum required stemcell version is: {}. upload-stemcell, and try again",
            stemcells.required_stemcell_version.as_deref().unwrap_or_default()
        );
    };
    let version = if wanted == "latest" {
        latest.clone()
    } else if available.contains(&wanted) {
        wanted
    } else {
        bail!(
            "stemcell version {wanted} not found in Ops Manager.\nAvailable Stemcells for \"{product}\": {}",
            available.join(", ")
        );
    };

    ctx.console.log(format!(
        "assigning stemcell: \"{version}\" to product \"{product}\"..."
    ));
    api.assign_stemcell(&stemcells.guid, &version).await?;
    ctx.console.log("assigned stemcell successfully");
    Ok(())
}

/// Resolve one `--stemcell` value against what the product can use.
fn resolve_stemcell(
    ctx: &Context,
    product: &str,
    available: &[StemcellRef],
    option: &str,
) -> anyhow::Result<StemcellRef> {
    let (os, version) = match option.split_once(':') {
        Some((os, version)) => (os.to_string(), version.to_string()),
        None if option == "latest" => {
            bail!("expected \"--stemcell\" format value as \"operating-system:latest\"")
        }
        None => {
            let systems: Vec<&str> = available
                .iter()
                .filter(|s| s.version == option)
                .map(|s| s.os.as_str())
                .collect();
            match systems.as_slice() {
                [os] => {
                    ctx.console.warn(format!(
                        "WARNING: updated \"--stemcell\" format value to \"operating-system:version\", \"{os}:{option}\""
                    ));
                    ((*os).to_string(), option.to_string())
                }
                [] => bail!(
                    "stemcell version {option} not found in Ops Manager.\nthere are no available stemcells to for \"{product}\"\nupload-stemcell, and try again"
                ),
                _ => bail!(
                    "multiple stemcells match version {option} in Ops Manager.\nexpected \"--stemcell\" format value as \"operating-system:version\""
                ),
            }
        }
    };

    let found = if version == "latest" {
        available.iter().rfind(|s| s.os == os)
    } else {
        available.iter().find(|s| s.os == os && s.version == version)
    };
    if let Some(found) = found {
        return Ok(found.clone());
    }

    let for_os: Vec<StemcellRef> = available.iter().filter(|s| s.os == os).cloned().collect();
    if for_os.is_empty() {
        bail!(
            "stemcell version {version} for {os} not found in Ops Manager.\nthere are no available stemcells to for \"{product}\"\nupload-stemcell, and try again"
        );
    }
    Err(anyhow!(
        "stemcell version {version} for {os} not found in Ops Manager.\nAvailable Stemcells for \"{product}\": {}",
        describe(&for_os)
    ))
}

pub async fn assign_multi_stemcell(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let product = options.string("product");
    let api = ctx.api()?;

    let info = api
        .info()
        .await
        .map_err(|_| anyhow!("cannot retrieve version of Ops Manager"))?;
    if !info
        .version_at_least(2, 6)
        .context("could not determine version was 2.6+ compatible")?
    {
        bail!("this command can only be used with OpsManager 2.6+");
    }

    ctx.console
        .log(format!("finding available stemcells for product: \"{product}\"..."));
    let stemcells = product_stemcells(&api, &product).await?;

    ctx.console
        .log("validating that stemcell exists in Ops Manager...");
    if stemcells.available_stemcells.is_empty() {
        bail!(
            "no stemcells are available for \"{product}\". minimum required stemcells are: {}. upload-stemcell, and try again",
            describe(&stemcells.required_stemcells)
        );
    }
    let selected = options
        .list("stemcell")
        .iter()
        .map(|option| resolve_stemcell(ctx, &product, &stemcells.available_stemcells, option))
        .collect::<anyhow::Result<Vec<_>>>()?;

    ctx.console.log(format!(
        "assigning stemcells: \"{}\" to product \"{product}\"...",
        describe(&selected)
    ));
    api.assign_multi_stemcell(&stemcells.guid, &selected).await?;
    ctx.console.log("assigned stemcells successfully");
    Ok(())
}

/// Whether the appliance already has a stemcell file of that name.
async fn already_uploaded(ctx: &Context, api: &Api, filename: &str) -> anyhow::Result<bool> {
    ctx.console.log("processing stemcell");
    let report = match api.diagnostic_report().await {
        Ok(report) => report,
        Err(ApiError::Invalid(message)) => {
            ctx.console.log(message);
            return Ok(false);
        }
        Err(e) => return Err(anyhow!("failed to get diagnostic report: {e}")),
    };
    if report.has_stemcell(filename) {
        ctx.console.log("stemcell has already been uploaded");
        return Ok(true);
    }
    Ok(false)
}

pub async fn upload_stemcell(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let stemcell = options.string("stemcell");
    let floating = options.string("floating");
    if floating != "true" && floating != "false" {
        bail!("--floating must be \"true\" or \"false\". Default: true");
    }

    if let Some(expected) = options.str("shasum").filter(|s| !s.is_empty()) {
        let actual = file_sha256(&stemcell)
            .with_context(|| format!("could not calculate shasum of {stemcell}"))?;
        if actual != expected {
            bail!("expected shasum {expected} does not match file shasum {actual}");
        }
        ctx.console.log("expected shasum matches stemcell shasum.");
    }

    let basename = Path::new(&stemcell)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let upload_name = DOWNLOAD_PREFIX
        .captures(&basename)
        .and_then(|c| c.get(1))
        .map_or_else(|| basename.clone(), |m| m.as_str().to_string());

    let api = ctx.api()?;
    if !options.flag("force") && already_uploaded(ctx, &api, &upload_name).await? {
        return Ok(());
    }

    let mut form = Form::new();
    form.add_file_as("stemcell[file]", &stemcell, &upload_name)
        .context("failed to upload stemcell")?;
    form.add_field("stemcell[floating]", &floating);

    ctx.console.log("beginning stemcell upload to Ops Manager");
    api.upload_stemcell(form, Duration::from_secs(1))
        .await
        .context("failed to upload stemcell")?;
    ctx.console.log("finished upload");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::Harness;
    use serde_json::json;
    use std::io::Write;
    use wiremock::matchers::{body_json, body_string_contains, method, path};
    use wiremock::{Mock, ResponseTemplate};

    async fn mount_assignments(harness: &Harness) {
        Mock::given(method("GET"))
            .and(path("/api/v0/stemcell_assignments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"products": [
                {"guid": "cf-guid", "identifier": "cf",
                 "available_stemcell_versions": ["621.1", "621.2"],
                 "available_stemcells": [
                    {"os": "ubuntu-xenial", "version": "621.1"},
                    {"os": "ubuntu-xenial", "version": "621.2"},
                    {"os": "windows2019", "version": "2019.7"}
                 ]},
                {"guid": "old-guid", "identifier": "gone", "is_staged_for_deletion": true}
            ]})))
            .mount(&harness.server)
            .await;
    }

    #[tokio::test]
    async fn test_assign_stemcell_latest() {
        let harness = Harness::start().await;
        mount_assignments(&harness).await;
        Mock::given(method("PATCH"))
            .and(path("/api/v0/stemcell_assignments"))
            .and(body_json(json!({"products": [
                {"guid": "cf-guid", "staged_stemcell_version": "621.2"}
            ]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&harness.server)
            .await;

        harness.run(&ASSIGN_STEMCELL, &["--product", "cf"]).await.unwrap();
        assert!(harness.stderr().contains("assigned stemcell successfully"));
    }

    #[tokio::test]
    async fn test_assign_stemcell_unknown_version() {
        let harness = Harness::start().await;
        mount_assignments(&harness).await;

        let err = harness
            .run(&ASSIGN_STEMCELL, &["--product", "cf", "--stemcell", "100"])
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "stemcell version 100 not found in Ops Manager.\nAvailable Stemcells for \"cf\": 621.1, 621.2"
        );
    }

    #[tokio::test]
    async fn test_assign_stemcell_product_staged_for_deletion() {
        let harness = Harness::start().await;
        mount_assignments(&harness).await;

        let err = harness
            .run(&ASSIGN_STEMCELL, &["--product", "gone"])
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "could not assign stemcell: product \"gone\" is staged for deletion"
        );
    }

    #[tokio::test]
    async fn test_assign_multi_stemcell_resolves_bare_versions_and_latest() {
        let harness = Harness::start().await;
        mount_assignments(&harness).await;
        Mock::given(method("GET"))
            .and(path("/api/v0/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"info": {"version": "2.10.0"}})))
            .mount(&harness.server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/api/v0/stemcell_assignments"))
            .and(body_json(json!({"products": [{"guid": "cf-guid", "staged_stemcells": [
                {"os": "ubuntu-xenial", "version": "621.2"},
                {"os": "windows2019", "version": "2019.7"}
            ]}]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&harness.server)
            .await;

        harness
            .run(
                &ASSIGN_MULTI_STEMCELL,
                &["--product", "cf", "--stemcell", "ubuntu-xenial:latest", "--stemcell", "2019.7"],
            )
            .await
            .unwrap();
        assert!(harness
            .stderr()
            .contains("updated \"--stemcell\" format value to \"operating-system:version\", \"windows2019:2019.7\""));
    }

    #[tokio::test]
    async fn test_upload_stemcell_skips_existing_and_strips_prefix() {
        let harness = Harness::start().await;
        let dir = tempfile::tempdir().unwrap();
        let stemcell = dir
            .path()
            .join("[stemcells-ubuntu-xenial,621.77]bosh-stemcell-621.77-vsphere-esxi-ubuntu-xenial-go_agent.tgz");
        std::fs::File::create(&stemcell).unwrap().write_all(b"stemcell").unwrap();

        Mock::given(method("GET"))
            .and(path("/api/v0/diagnostic_report"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "stemcells": ["bosh-stemcell-621.77-vsphere-esxi-ubuntu-xenial-go_agent.tgz"]
            })))
            .mount(&harness.server)
            .await;

        harness
            .run(&UPLOAD_STEMCELL, &["--stemcell", &stemcell.to_string_lossy()])
            .await
            .unwrap();
        assert!(harness.stderr().contains("stemcell has already been uploaded"));
    }

    #[tokio::test]
    async fn test_upload_stemcell_forced() {
        let harness = Harness::start().await;
        let mut file = tempfile::Builder::new().suffix(".tgz").tempfile().unwrap();
        file.write_all(b"stemcell").unwrap();
        let path_arg = file.path().to_string_lossy().into_owned();

        Mock::given(method("POST"))
            .and(path("/api/v0/stemcells"))
            .and(body_string_contains("name=\"stemcell[floating]\"\r\n\r\nfalse"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&harness.server)
            .await;

        harness
            .run(&UPLOAD_STEMCELL, &["--stemcell", &path_arg, "--force", "--floating", "false"])
            .await
            .unwrap();
        assert!(harness.stderr().contains("finished upload"));
    }

    #[tokio::test]
    async fn test_upload_stemcell_rejects_bad_floating() {
        let harness = Harness::start().await;
        let err = harness
            .run(&UPLOAD_STEMCELL, &["--stemcell", "x.tgz", "--floating", "maybe"])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "--floating must be \"true\" or \"false\". Default: true");
    }
}
