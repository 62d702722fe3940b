//! BOSH manifests, manifest diffs and the director environment.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, bail, Context as _};

use super::Context;
use crate::api::{ManifestDiff, NamedDiff};
use crate::options::{Bound, CommandSpec, ConfigMode, OptionSpec};

pub const BOSH_DIFF: CommandSpec = CommandSpec {
    name: "bosh-diff",
    summary: "displays BOSH manifest diff for the director and products",
    description: "This command displays the bosh manifest diff for the director and products (Note: secret values are replaced with double-paren variable names)",
    options: &[
        OptionSpec::repeated("product-name", "Product to get diff for. Pass repeatedly for multiple products. If excluded, all staged non-director products will be shown.").short('p'),
        OptionSpec::flag("director", "Include director diffs. Can be combined with --product-name.").short('d'),
        OptionSpec::flag("check", "Exit 1 if there are any differences. Useful for validating that Ops Manager is in a clean state."),
    ],
    config: ConfigMode::None,
};

pub const BOSH_ENV: CommandSpec = CommandSpec {
    name: "bosh-env",
    summary: "prints bosh environment variables",
    description: "This prints bosh environment variables to target bosh director. You can invoke it directly to see its output, or use it directly with an evaluate-type command:\nOn posix system: eval \"$(om bosh-env)\"\nOn powershell: iex $(om bosh-env | Out-String)",
    options: &[
        OptionSpec::string("shell-type", "Prints for the given shell (posix|powershell)"),
        OptionSpec::string("ssh-private-key", "Location of ssh private key to use to tunnel through the Ops Manager VM. Only necessary if bosh director is not reachable without a tunnel.").short('i'),
    ],
    config: ConfigMode::None,
};

pub const DEPLOYED_MANIFEST: CommandSpec = CommandSpec {
    name: "deployed-manifest",
    summary: "prints the deployed manifest for a product",
    description: "This authenticated command prints the deployed manifest for a product",
    options: &[OptionSpec::string("product-name", "name of product").short('p').required()],
    config: ConfigMode::None,
};

pub const STAGED_MANIFEST: CommandSpec = CommandSpec {
    name: "staged-manifest",
    summary: "prints the staged manifest for a product",
    description: "This authenticated command prints the staged manifest for a product",
    options: &[OptionSpec::string("product-name", "name of product").short('p').required()],
    config: ConfigMode::None,
};

/// Paint removed lines red and added lines green.
fn colorize(ctx: &Context, diff: &str) -> String {
    diff.split('\n')
        .map(|line| {
            if line.starts_with('-') {
                ctx.console.red(line)
            } else if line.starts_with('+') {
                ctx.console.green(line)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Print one manifest diff. Returns `true` when the product was never deployed.
fn print_manifest_diff(ctx: &Context, diff: &ManifestDiff) -> bool {
    match diff.status.as_str() {
        "same" => ctx.console.println("no changes\n"),
        "does_not_exist" => ctx.console.println("no manifest for this product\n"),
        "different" => ctx.console.println(format!("{}\n", colorize(ctx, &diff.diff))),
        "to_be_installed" => {
            ctx.console.println(
                "This product is not yet deployed, so the product and runtime diffs are not available.",
            );
            return true;
        }
        other => ctx.console.println(format!(
            "unrecognized product status: {other}\n\n{}\n",
            diff.diff
        )),
    }
    false
}

fn print_named_diffs(ctx: &Context, diffs: &[NamedDiff]) {
    let changed: Vec<&NamedDiff> = diffs.iter().filter(|d| d.status != "same").collect();
    if changed.is_empty() {
        ctx.console.println("no changes\n");
        return;
    }
    for diff in changed {
        ctx.console.println(format!("### {}\n", diff.name));
        ctx.console.println(format!("{}\n", colorize(ctx, &diff.diff)));
    }
}

pub async fn bosh_diff(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let api = ctx.api()?;
    let requested = options.list("product-name");
    let director = options.flag("director");
    let everything = !director && requested.is_empty();
    let mut differences = false;

    if director || everything {
        let diff = api
            .director_diff()
            .await
            .context("could not discover the director diff")?;
        differences |= diff.manifest.status != "same";
        ctx.console.println("## Director Manifest\n");
        if !print_manifest_diff(ctx, &diff.manifest) {
            ctx.console.println("## Director Cloud Config\n");
            print_manifest_diff(ctx, &diff.cloud_config);
            ctx.console.println("## Director Runtime Configs\n");
            print_named_diffs(ctx, &diff.runtime_configs);
            ctx.console.println("## Director CPI Configs\n");
            print_named_diffs(ctx, &diff.cpi_configs);
        }
    }

    let products: Vec<String> = if everything {
        let mut names: Vec<String> = api
            .list_staged_products()
            .await
            .context("could not discover staged products to diff")?
            .into_iter()
            .map(|p| p.product_type)
            .filter(|t| t != "p-bosh")
            .collect();
        names.sort();
        names
    } else {
        requested.to_vec()
    };

    for product in &products {
        let diff = api.product_diff(product).await?;
        differences |= diff.manifest.status != "same";
        ctx.console
            .println(format!("## Product Manifest for {product}\n"));
        if print_manifest_diff(ctx, &diff.manifest) {
            continue;
        }
        ctx.console
            .println(format!("## Runtime Configs for {product}\n"));
        print_named_diffs(ctx, &diff.runtime_configs);
    }

    if options.flag("check") && differences {
        bail!("Differences exist between the staged and deployed versions of the requested products");
    }
    Ok(())
}

/// Host part of the target, without scheme or trailing slash.
fn target_host(target: &str) -> &str {
    let host = target.split_once("://").map_or(target, |(_, rest)| rest);
    host.strip_suffix('/').unwrap_or(host)
}

/// Parse `KEY=value KEY=value bosh` into its assignments.
fn parse_commandline(line: &str) -> BTreeMap<String, String> {
    line.split_whitespace()
        .filter_map(|word| word.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn render_variable(shell: &str, name: &str, value: &str) -> String {
    if shell == "powershell" {
        format!("$env:{name}=\"{value}\"")
    } else {
        format!("export {name}=\"{value}\"")
    }
}

pub async fn bosh_env(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let shell = match options.str("shell-type").unwrap_or_default() {
        "" | "posix" => "posix",
        "powershell" => "powershell",
        other => bail!("unrecognized type '{other}'"),
    };

    let api = ctx.api()?;
    let commandline = parse_commandline(&api.bosh_commandline_credentials().await?);
    let value_of = |key: &str| commandline.get(key).cloned().unwrap_or_default();
    let client = value_of("BOSH_CLIENT");
    let secret = value_of("BOSH_CLIENT_SECRET");
    let environment = value_of("BOSH_ENVIRONMENT");

    let ca_certs = api
        .list_certificate_authorities()
        .await?
        .into_iter()
        .filter(|ca| ca.active)
        .map(|ca| ca.cert_pem)
        .collect::<Vec<_>>()
        .join("\n");

    let mut variables = BTreeMap::from([
        ("BOSH_CLIENT", client.clone()),
        ("BOSH_CLIENT_SECRET", secret.clone()),
        ("BOSH_ENVIRONMENT", environment.clone()),
        ("BOSH_CA_CERT", ca_certs.clone()),
        ("CREDHUB_CLIENT", client),
        ("CREDHUB_SECRET", secret),
        ("CREDHUB_SERVER", format!("https://{environment}:8844")),
        ("CREDHUB_CA_CERT", ca_certs),
    ]);

    if let Some(key) = options.str("ssh-private-key").filter(|k| !k.is_empty()) {
        let absolute = std::fs::canonicalize(Path::new(key))
            .map_err(|_| anyhow!("ssh key file '{key}' does not exist"))?;
        let proxy = format!(
            "ssh+socks5://ubuntu@{}:22?private-key={}",
            target_host(ctx.target()),
            absolute.display()
        );
        variables.insert("BOSH_ALL_PROXY", proxy.clone());
        variables.insert("CREDHUB_PROXY", proxy);
    }

    for (name, value) in &variables {
        ctx.console.println(render_variable(shell, name, value));
    }
    Ok(())
}

pub async fn deployed_manifest(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let name = options.string("product-name");
    let api = ctx.api()?;
    let raw = if name == "p-bosh" {
        api.deployed_director_manifest().await
    } else {
        let guid = api.deployed_product_guid(&name).await?;
        api.deployed_product_manifest(&guid).await
    }
    .context("failed to fetch product manifest")?;
    let manifest: serde_yaml::Value =
        serde_yaml::from_str(&raw).context("could not parse the deployed manifest")?;
    ctx.console.print(serde_yaml::to_string(&manifest)?);
    Ok(())
}

pub async fn staged_manifest(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let name = options.string("product-name");
    let api = ctx.api()?;
    let guid = api.staged_product_guid(&name).await?;
    let manifest = api
        .staged_product_manifest(&guid)
        .await
        .context("failed to fetch product manifest")?;
    ctx.console.print(manifest);
    Ok(())
}
