//! Apply changes, installation history and the installation asset
//! collection (delete, export, import).

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context as _};
use chrono::SecondsFormat;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use super::Context;
use crate::api::{Availability, DeployProducts, ErrandChanges, Installation, PendingChange};
use crate::formcontent::Form;
use crate::options::{Bound, CommandSpec, ConfigMode, OptionSpec};
use crate::poller::{started_at, Operation, Poller};
use crate::presenters::{Presenter, Tabular, FORMAT_OPTION};

pub const APPLY_CHANGES: CommandSpec = CommandSpec {
    name: "apply-changes",
    summary: "triggers an install on the Ops Manager targeted",
    description: "This authenticated command kicks off an install of any staged changes on the Ops Manager.",
    options: &[
        OptionSpec::string("config", "path to yml file containing errand configuration (see docs/apply-changes/README.md for format)").short('c'),
        OptionSpec::flag("ignore-warnings", "For convenience. Use other commands to disable particular verifiers if they are inappropriate.").short('i'),
        OptionSpec::flag("reattach", "reattach to an already running apply changes (if available)"),
        OptionSpec::flag("recreate-vms", "recreate all vms"),
        OptionSpec::flag("skip-deploy-products", "skip deploying products when applying changes - just update the director").short('s'),
        OptionSpec::repeated("product-name", "name of the product(s) to deploy, cannot be used in conjunction with --skip-deploy-products (OM 2.2+)").short('n'),
    ],
    config: ConfigMode::Own,
};

pub const DELETE_INSTALLATION: CommandSpec = CommandSpec {
    name: "delete-installation",
    summary: "deletes all the products on the Ops Manager targeted",
    description: "This authenticated command deletes all the products installed on the targeted Ops Manager.",
    options: &[OptionSpec::flag("force", "force deletion without prompting for confirmation").short('f')],
    config: ConfigMode::None,
};

pub const EXPORT_INSTALLATION: CommandSpec = CommandSpec {
    name: "export-installation",
    summary: "exports the installation of the target Ops Manager",
    description: "This command will export the current installation of the target Ops Manager.",
    options: &[
        OptionSpec::string("output-file", "output path to write installation to").short('o').required(),
        OptionSpec::int("polling-interval", "interval (in seconds) at which to print status").short('p').default("1"),
    ],
    config: ConfigMode::Flags,
};

pub const IMPORT_INSTALLATION: CommandSpec = CommandSpec {
    name: "import-installation",
    summary: "imports a given installation to the Ops Manager targeted",
    description: "This unauthenticated command attempts to import an installation to the Ops Manager targeted.",
    options: &[
        OptionSpec::string("installation", "path to installation.").short('i').required(),
        OptionSpec::int("polling-interval", "interval (in seconds) at which to print status").short('p').default("10"),
    ],
    config: ConfigMode::Flags,
};

pub const INSTALLATION_LOG: CommandSpec = CommandSpec {
    name: "installation-log",
    summary: "output installation logs",
    description: "This authenticated command retrieves the logs for a given installation.",
    options: &[OptionSpec::int("id", "id of the installation to retrieve logs for").required()],
    config: ConfigMode::None,
};

pub const INSTALLATIONS: CommandSpec = CommandSpec {
    name: "installations",
    summary: "list recent installation events",
    description: "This authenticated command lists all recent installation events.",
    options: &[FORMAT_OPTION],
    config: ConfigMode::None,
};

pub const PENDING_CHANGES: CommandSpec = CommandSpec {
    name: "pending-changes",
    summary: "lists pending changes",
    description: "This authenticated command lists all products and will display whether they are unchanged (no pending changes) or changed (has pending changes).",
    options: &[
        OptionSpec::flag("check", "Exit 1 if there are any pending changes. Useful for validating that Ops Manager is in a clean state."),
        FORMAT_OPTION,
    ],
    config: ConfigMode::None,
};

pub const REVERT_STAGED_CHANGES: CommandSpec = CommandSpec {
    name: "revert-staged-changes",
    summary: "reverts staged changes on the Ops Manager targeted",
    description: "This command reverts the staged changes already on an Ops Manager. Useful for ensuring that unintended changes are not applied.",
    options: &[],
    config: ConfigMode::None,
};

/// Errand overrides from the `--config` file, empty without one.
fn errand_changes(options: &Bound) -> anyhow::Result<ErrandChanges> {
    let Some(path) = options.str("config") else {
        return Ok(ErrandChanges::default());
    };
    let contents = std::fs::read_to_string(path).context("could not load config")?;
    serde_yaml::from_str(&contents).with_context(|| format!("could not parse {path}"))
}

pub async fn apply_changes(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let reattach = options.flag("reattach");
    let recreate_vms = options.flag("recreate-vms");
    let skip_deploy = options.flag("skip-deploy-products");
    let product_names = options.list("product-name").to_vec();

    if recreate_vms && reattach {
        bail!("--recreate-vms cannot be used with --reattach because it requires the ability to update a director property");
    }

    let errands = errand_changes(options)?;
    let api = ctx.api()?;

    if !product_names.is_empty() {
        if skip_deploy {
            bail!("product-name flag can not be passed with the skip-deploy-products flag");
        }
        let info = api
            .info()
            .await
            .context("could not retrieve info from targetted ops manager")?;
        if !info.version_at_least(2, 2)? {
            bail!(
                "--product-name is only available with Ops Manager 2.2 or later: you are running {}",
                info.version
            );
        }
    }

    let running = api
        .running_installation()
        .await
        .context("could not check for any already running installation")?;
    let poller = Poller::new(&api, &ctx.console, ctx.poll_interval);

    if let Some(installation) = running {
        let announcement = format!(
            "(Installation ID: {}, Started: {})",
            installation.id,
            started_at(&installation)
        );
        if !reattach {
            ctx.console.log(format!(
                "found already running installation... not re-attaching {announcement}"
            ));
            bail!("apply changes is already running, use \"--reattach\" to enable reattaching");
        }
        ctx.console.log(format!(
            "found already running installation... re-attaching {announcement}"
        ));
        poller.wait(installation.id, Operation::ApplyChanges).await?;
        return Ok(());
    }

    if recreate_vms {
        mark_for_recreate(ctx, &api, &product_names, skip_deploy).await?;
    }

    let deploy = if skip_deploy {
        DeployProducts::None
    } else if product_names.is_empty() {
        DeployProducts::All
    } else {
        DeployProducts::Named(product_names)
    };

    ctx.console
        .log("attempting to apply changes to the targeted Ops Manager");
    let installation = api
        .create_installation(options.flag("ignore-warnings"), &deploy, &errands)
        .await
        .context("installation failed to trigger")?;
    debug!(id = installation.id, "installation created");

    poller.wait(installation.id, Operation::ApplyChanges).await?;
    Ok(())
}

/// Set the director's recreate flags ahead of an apply-changes.
async fn mark_for_recreate(
    ctx: &Context,
    api: &crate::api::Api,
    product_names: &[String],
    skip_deploy: bool,
) -> anyhow::Result<()> {
    let (mut products, mut director) = if product_names.is_empty() {
        if skip_deploy {
            ctx.console
                .log("setting director to recreate director vm (available in Ops Manager 2.9+)");
            (false, true)
        } else {
            ctx.console
                .log("setting director to recreate all vms (available in Ops Manager 2.9+)");
            (true, true)
        }
    } else {
        ctx.console
            .log("setting director to recreate all VMs for the following products:");
        let mut sorted = product_names.to_vec();
        sorted.sort();
        for product in &sorted {
            ctx.console.log(format!("- {product}"));
        }
        ctx.console
            .log("this will also recreate the director vm if there are changes");
        (true, false)
    };

    let info = api.info().await?;
    if !info.version_at_least(2, 9)? {
        products = true;
        director = false;
    }

    let mut configuration = serde_json::Map::new();
    if director {
        configuration.insert("bosh_director_recreate_on_next_deploy".into(), json!(true));
    }
    if products {
        configuration.insert("bosh_recreate_on_next_deploy".into(), json!(true));
    }
    api.update_staged_director_properties(&json!({ "director_configuration": configuration }))
        .await
        .context("could not set director to recreate VMS")?;
    Ok(())
}

/// Ask twice on a terminal. Anything but `yes` declines.
async fn confirm_deletion() -> anyhow::Result<bool> {
    tokio::task::spawn_blocking(|| -> anyhow::Result<bool> {
        for prompt in [
            "Do you really want to delete the installation? [yes/no]",
            "Ok. Are you sure? [yes/no]",
        ] {
            let answer: String = dialoguer::Input::new()
                .with_prompt(prompt)
                .allow_empty(true)
                .interact_text()?;
            if answer.trim() != "yes" {
                return Ok(false);
            }
        }
        Ok(true)
    })
    .await?
}

pub async fn delete_installation(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    if !options.flag("force") {
        if !ctx.console.is_interactive() {
            bail!("refusing to delete the installation without confirmation, pass --force when not running in a terminal");
        }
        if !confirm_deletion().await? {
            ctx.console.println("Ok, nothing was deleted.");
            return Ok(());
        }
    }

    let api = ctx.api()?;
    let poller = Poller::new(&api, &ctx.console, ctx.poll_interval);

    if let Some(running) = api
        .running_installation()
        .await
        .context("could not check for any already running installation")?
    {
        ctx.console.log(format!(
            "found already running deletion... attempting to re-attach (Installation ID: {}, Started: {})",
            running.id,
            started_at(&running)
        ));
        poller.wait(running.id, Operation::DeleteInstallation).await?;
        return Ok(());
    }

    ctx.console
        .log("attempting to delete the installation on the targeted Ops Manager");
    let Some(installation) = api
        .delete_installation()
        .await
        .context("failed to delete installation")?
    else {
        ctx.console.log("no installation to delete");
        return Ok(());
    };

    poller
        .wait(installation.id, Operation::DeleteInstallation)
        .await?;
    Ok(())
}

fn polling_interval(options: &Bound) -> Duration {
    Duration::from_secs(u64::try_from(options.int("polling-interval")).unwrap_or(1).max(1))
}

pub async fn export_installation(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let output = options.string("output-file");
    ctx.console.log("exporting installation");
    let written = ctx
        .api()?
        .export_installation(Path::new(&output), polling_interval(options))
        .await
        .context("failed to export installation")?;
    debug!(bytes = written, path = %output, "installation exported");
    ctx.console
        .log(format!("finished exporting installation to {output}"));
    Ok(())
}

/// Check that `path` is a zip holding `installation.yml`.
fn validate_installation_archive(path: &str) -> anyhow::Result<()> {
    let file = std::fs::File::open(path)
        .map_err(|_| anyhow!("file: \"{path}\" does not exist. Please check the name and try again."))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|_| {
        anyhow!("file: \"{path}\" is not a valid zip file, please check the file and try again")
    })?;
    if archive.by_name("installation.yml").is_err() {
        bail!("file: \"{path}\" is not a valid installation file");
    }
    Ok(())
}

pub async fn import_installation(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let Some(passphrase) = ctx.global.decryption_passphrase.clone().filter(|p| !p.is_empty()) else {
        bail!("the global decryption-passphrase argument is required for this command");
    };
    let path = options.string("installation");
    validate_installation_archive(&path)?;

    let api = ctx.api()?;
    let availability = api
        .ensure_availability()
        .await
        .context("could not check Ops Manager status")?;
    if availability != Availability::Unstarted {
        ctx.console.println("Ops Manager is already configured");
        return Ok(());
    }

    ctx.console.log("processing installation");
    let mut form = Form::new();
    form.add_file("installation[file]", &path)
        .context("failed to load installation")?;
    form.add_field("passphrase", &passphrase);

    ctx.console.log("beginning installation import to Ops Manager");
    api.import_installation(form, polling_interval(options))
        .await
        .context("failed to import installation")?;

    ctx.console
        .log("waiting for import to complete, this should take only a couple minutes...");
    loop {
        let availability = api
            .ensure_availability()
            .await
            .context("could not check Ops Manager Status")?;
        if availability == Availability::Complete {
            break;
        }
        tokio::time::sleep(ctx.poll_interval).await;
    }

    ctx.console.log("finished import");
    Ok(())
}

pub async fn installation_log(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let id = u64::try_from(options.int("id")).context("--id must not be negative")?;
    let logs = ctx.api()?.installation_logs(id).await?;
    ctx.console.println(logs);
    Ok(())
}

fn timestamp(at: Option<chrono::DateTime<chrono::Utc>>) -> String {
    at.map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

impl Tabular for Installation {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "USER", "STATUS", "STARTED", "FINISHED"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.user_name.clone(),
            serde_json::to_value(self.status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            timestamp(self.started_at),
            timestamp(self.finished_at),
        ]
    }
}

pub async fn installations(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let presenter = Presenter::from_options(&ctx.console, options)?;
    let installations = ctx.api()?.list_installations().await?;
    presenter.list(&installations)?;
    Ok(())
}

#[derive(Serialize)]
struct PendingRow<'a> {
    product: &'a str,
    action: &'a str,
    errands: Vec<String>,
}

impl Tabular for PendingRow<'_> {
    fn headers() -> Vec<&'static str> {
        vec!["PRODUCT", "ACTION", "ERRANDS"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.product.to_string(),
            self.action.to_string(),
            self.errands.join("\n"),
        ]
    }
}

fn errand_names(change: &PendingChange) -> Vec<String> {
    change
        .errands
        .iter()
        .filter_map(|e| e.get("name").and_then(|n| n.as_str()).map(str::to_string))
        .collect()
}

/// Problems that make the staged state unsuitable for an apply-changes.
fn pending_problems(changes: &[PendingChange]) -> Vec<String> {
    let mut problems = Vec::new();
    for change in changes {
        let Some(checks) = change.completeness_checks else {
            continue;
        };
        if !checks.configuration_complete {
            problems.push(format!("configuration is incomplete for guid {}", change.guid));
        }
        if !checks.stemcell_present {
            problems.push(format!(
                "stemcell is missing for one or more products for guid {}",
                change.guid
            ));
        }
        if !checks.configurable_properties_valid {
            problems.push(format!(
                "one or more properties are invalid for guid {}",
                change.guid
            ));
        }
    }
    if changes.iter().any(|c| c.action != "unchanged") {
        problems.push(
            "there are pending changes.\nGo into the Ops Manager UI, unstage changes, and try again"
                .to_string(),
        );
    }
    problems
}

pub async fn pending_changes(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let presenter = Presenter::from_options(&ctx.console, options)?;
    let changes = ctx
        .api()?
        .pending_changes()
        .await
        .context("failed to retrieve pending changes")?;

    let rows: Vec<PendingRow<'_>> = changes
        .iter()
        .map(|c| PendingRow {
            product: &c.guid,
            action: &c.action,
            errands: errand_names(c),
        })
        .collect();
    presenter.list(&rows)?;

    let problems = pending_problems(&changes);
    if problems.is_empty() {
        return Ok(());
    }
    if options.flag("check") {
        bail!(
            "{}\nPlease validate your Ops Manager installation in the UI",
            problems.join(",\n")
        );
    }
    ctx.console
        .warn(format!("Warnings:\n{}", problems.join(",\n")));
    Ok(())
}

pub async fn revert_staged_changes(ctx: &Context, _options: &Bound) -> anyhow::Result<()> {
    let reverted = ctx
        .api()?
        .revert_staged_changes()
        .await
        .context("revert staged changes command failed")?;
    if reverted {
        ctx.console.log("Changes reverted.");
    } else {
        ctx.console.log("No changes to revert.");
    }
    Ok(())
}
