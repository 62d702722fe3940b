//! Command implementations and the table the dispatcher looks them up in.
//!
//! Every command is a [`CommandSpec`] describing its options plus an async
//! function taking the shared [`Context`] and the bound options.

mod authentication;
mod certificates;
mod config_template;
mod configure_director;
mod configure_opsman;
mod configure_product;
mod credentials;
mod curl;
mod diagnostics;
mod download_product;
mod installations;
mod interpolate;
mod manifests;
mod products;
mod stemcells;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context as _};
use sha2::{Digest, Sha256};

use crate::api::Api;
use crate::interpolate as interpolation;
use crate::network;
use crate::options::{Bound, CommandSpec, GlobalOptions, OptionSpec};
use crate::ui::Console;

/// Shared state handed to every command.
pub struct Context {
    pub console: Console,
    pub global: GlobalOptions,
    pub env: BTreeMap<String, String>,
    /// Delay between readiness probes while waiting on the appliance.
    pub poll_interval: Duration,
}

impl Context {
    #[must_use]
    pub fn new(console: Console, global: GlobalOptions, env: BTreeMap<String, String>) -> Self {
        Self {
            console,
            global,
            env,
            poll_interval: Duration::from_secs(1),
        }
    }

    /// API client for the targeted appliance.
    pub fn api(&self) -> anyhow::Result<Api> {
        let config = self.global.stack_config()?;
        let stack = network::build(&config, &self.console)?;
        Ok(Api::new(stack))
    }

    /// The `--target` value as given.
    #[must_use]
    pub fn target(&self) -> &str {
        self.global.target.as_deref().unwrap_or_default()
    }
}

pub(crate) const CONFIG_FILE: OptionSpec =
    OptionSpec::string("config", "path to yml file containing all config fields (see docs/ for examples)").short('c');
pub(crate) const VARS_ENV: OptionSpec = OptionSpec::repeated(
    "vars-env",
    "load variables from environment variables (e.g.: 'MY' to load MY_var=value)",
)
.env("OM_VARS_ENV");
pub(crate) const VARS_FILE: OptionSpec =
    OptionSpec::repeated("vars-file", "load variables from a YAML file").short('l');
pub(crate) const VAR: OptionSpec =
    OptionSpec::repeated("var", "load variable from the command line. Format: VAR=VAL").short('v');
pub(crate) const OPS_FILE: OptionSpec =
    OptionSpec::repeated("ops-file", "YAML operations file").short('o');

/// Interpolation settings from the vars and ops options of a command.
pub(crate) fn interpolation_options(options: &Bound, expect_all_keys: bool) -> interpolation::Options {
    interpolation::Options {
        vars_env: options.list("vars-env").to_vec(),
        vars_files: options.list("vars-file").iter().map(PathBuf::from).collect(),
        vars: options.list("var").to_vec(),
        ops_files: options.list("ops-file").iter().map(PathBuf::from).collect(),
        expect_all_keys,
        path: None,
    }
}

/// Read and interpolate the file a command's `--config` points at.
pub(crate) fn load_config(ctx: &Context, options: &Bound) -> anyhow::Result<serde_yaml::Value> {
    let Some(path) = options.str("config") else {
        bail!("missing required flag \"--config\"");
    };
    let document = interpolation::execute_file(path, &interpolation_options(options, true), &ctx.env)
        .with_context(|| format!("could not load the config file ({path})"))?;
    Ok(document)
}

/// A YAML config section as the JSON the API expects.
pub(crate) fn to_json(section: &serde_yaml::Value) -> anyhow::Result<serde_json::Value> {
    serde_json::to_value(section).context("could not convert configuration to JSON")
}

/// Fail when an apply-changes is in progress; staging changes then are lost.
pub(crate) async fn ensure_no_running_installation(api: &Api) -> anyhow::Result<()> {
    let running = api
        .running_installation()
        .await
        .context("could not check for any pending changes installation")?;
    if running.is_some() {
        bail!("OpsManager does not allow configuration or staging changes while apply changes are running to prevent data loss for configuration and/or staging changes");
    }
    Ok(())
}

/// Hex SHA-256 of a file's contents.
pub(crate) fn file_sha256(path: impl AsRef<Path>) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Every command the tool understands.
pub const ALL: &[CommandSpec] = &[
    certificates::ACTIVATE_CERTIFICATE_AUTHORITY,
    installations::APPLY_CHANGES,
    stemcells::ASSIGN_MULTI_STEMCELL,
    stemcells::ASSIGN_STEMCELL,
    products::AVAILABLE_PRODUCTS,
    manifests::BOSH_DIFF,
    manifests::BOSH_ENV,
    certificates::CERTIFICATE_AUTHORITIES,
    certificates::CERTIFICATE_AUTHORITY,
    config_template::CONFIG_TEMPLATE,
    authentication::CONFIGURE_AUTHENTICATION,
    configure_director::CONFIGURE_DIRECTOR,
    authentication::CONFIGURE_LDAP_AUTHENTICATION,
    configure_opsman::CONFIGURE_OPSMAN,
    configure_product::CONFIGURE_PRODUCT,
    authentication::CONFIGURE_SAML_AUTHENTICATION,
    certificates::CREATE_CERTIFICATE_AUTHORITY,
    diagnostics::CREATE_VM_EXTENSION,
    credentials::CREDENTIAL_REFERENCES,
    credentials::CREDENTIALS,
    curl::CURL,
    certificates::DELETE_CERTIFICATE_AUTHORITY,
    installations::DELETE_INSTALLATION,
    products::DELETE_PRODUCT,
    certificates::DELETE_SSL_CERTIFICATE,
    products::DELETE_UNUSED_PRODUCTS,
    manifests::DEPLOYED_MANIFEST,
    products::DEPLOYED_PRODUCTS,
    diagnostics::DIAGNOSTIC_REPORT,
    diagnostics::DISABLE_DIRECTOR_VERIFIERS,
    diagnostics::DISABLE_PRODUCT_VERIFIERS,
    download_product::DOWNLOAD_PRODUCT,
    diagnostics::ERRANDS,
    certificates::EXPIRING_CERTIFICATES,
    diagnostics::EXPIRING_LICENSES,
    installations::EXPORT_INSTALLATION,
    certificates::GENERATE_CERTIFICATE,
    certificates::GENERATE_CERTIFICATE_AUTHORITY,
    installations::IMPORT_INSTALLATION,
    installations::INSTALLATION_LOG,
    installations::INSTALLATIONS,
    interpolate::INTERPOLATE,
    installations::PENDING_CHANGES,
    diagnostics::PRE_DEPLOY_CHECK,
    config_template::PRODUCT_METADATA,
    products::PRODUCTS,
    certificates::REGENERATE_CERTIFICATES,
    installations::REVERT_STAGED_CHANGES,
    certificates::SSL_CERTIFICATE,
    products::STAGE_PRODUCT,
    configure_product::STAGED_CONFIG,
    configure_director::STAGED_DIRECTOR_CONFIG,
    manifests::STAGED_MANIFEST,
    products::STAGED_PRODUCTS,
    products::UNSTAGE_PRODUCT,
    certificates::UPDATE_SSL_CERTIFICATE,
    products::UPLOAD_PRODUCT,
    stemcells::UPLOAD_STEMCELL,
];

/// Look a command up by name.
#[must_use]
pub fn find(name: &str) -> Option<&'static CommandSpec> {
    ALL.iter().find(|c| c.name == name)
}

/// Run the command called `name`.
pub async fn run(name: &str, ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    match name {
        "activate-certificate-authority" => certificates::activate_certificate_authority(ctx, options).await,
        "apply-changes" => installations::apply_changes(ctx, options).await,
        "assign-multi-stemcell" => stemcells::assign_multi_stemcell(ctx, options).await,
        "assign-stemcell" => stemcells::assign_stemcell(ctx, options).await,
        "available-products" => products::available_products(ctx, options).await,
        "bosh-diff" => manifests::bosh_diff(ctx, options).await,
        "bosh-env" => manifests::bosh_env(ctx, options).await,
        "certificate-authorities" => certificates::certificate_authorities(ctx, options).await,
        "certificate-authority" => certificates::certificate_authority(ctx, options).await,
        "config-template" => config_template::config_template(ctx, options).await,
        "configure-authentication" => authentication::configure_authentication(ctx, options).await,
        "configure-director" => configure_director::configure_director(ctx, options).await,
        "configure-ldap-authentication" => authentication::configure_ldap_authentication(ctx, options).await,
        "configure-opsman" => configure_opsman::configure_opsman(ctx, options).await,
        "configure-product" => configure_product::configure_product(ctx, options).await,
        "configure-saml-authentication" => authentication::configure_saml_authentication(ctx, options).await,
        "create-certificate-authority" => certificates::create_certificate_authority(ctx, options).await,
        "create-vm-extension" => diagnostics::create_vm_extension(ctx, options).await,
        "credential-references" => credentials::credential_references(ctx, options).await,
        "credentials" => credentials::credentials(ctx, options).await,
        "curl" => curl::curl(ctx, options).await,
        "delete-certificate-authority" => certificates::delete_certificate_authority(ctx, options).await,
        "delete-installation" => installations::delete_installation(ctx, options).await,
        "delete-product" => products::delete_product(ctx, options).await,
        "delete-ssl-certificate" => certificates::delete_ssl_certificate(ctx, options).await,
        "delete-unused-products" => products::delete_unused_products(ctx, options).await,
        "deployed-manifest" => manifests::deployed_manifest(ctx, options).await,
        "deployed-products" => products::deployed_products(ctx, options).await,
        "diagnostic-report" => diagnostics::diagnostic_report(ctx, options).await,
        "disable-director-verifiers" => diagnostics::disable_director_verifiers(ctx, options).await,
        "disable-product-verifiers" => diagnostics::disable_product_verifiers(ctx, options).await,
        "download-product" => download_product::download_product(ctx, options).await,
        "errands" => diagnostics::errands(ctx, options).await,
        "expiring-certificates" => certificates::expiring_certificates(ctx, options).await,
        "expiring-licenses" => diagnostics::expiring_licenses(ctx, options).await,
        "export-installation" => installations::export_installation(ctx, options).await,
        "generate-certificate" => certificates::generate_certificate(ctx, options).await,
        "generate-certificate-authority" => certificates::generate_certificate_authority(ctx, options).await,
        "import-installation" => installations::import_installation(ctx, options).await,
        "installation-log" => installations::installation_log(ctx, options).await,
        "installations" => installations::installations(ctx, options).await,
        "interpolate" => interpolate::interpolate(ctx, options).await,
        "pending-changes" => installations::pending_changes(ctx, options).await,
        "pre-deploy-check" => diagnostics::pre_deploy_check(ctx, options).await,
        "product-metadata" => config_template::product_metadata(ctx, options).await,
        "products" => products::products(ctx, options).await,
        "regenerate-certificates" => certificates::regenerate_certificates(ctx, options).await,
        "revert-staged-changes" => installations::revert_staged_changes(ctx, options).await,
        "ssl-certificate" => certificates::ssl_certificate(ctx, options).await,
        "stage-product" => products::stage_product(ctx, options).await,
        "staged-config" => configure_product::staged_config(ctx, options).await,
        "staged-director-config" => configure_director::staged_director_config(ctx, options).await,
        "staged-manifest" => manifests::staged_manifest(ctx, options).await,
        "staged-products" => products::staged_products(ctx, options).await,
        "unstage-product" => products::unstage_product(ctx, options).await,
        "update-ssl-certificate" => certificates::update_ssl_certificate(ctx, options).await,
        "upload-product" => products::upload_product(ctx, options).await,
        "upload-stemcell" => stemcells::upload_stemcell(ctx, options).await,
        other => bail!("Unknown command: {other}"),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::options::bind;
    use crate::ui::Captured;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// A mock appliance with a token endpoint, and a context aimed at it.
    pub(crate) struct Harness {
        pub server: MockServer,
        pub ctx: Context,
        pub captured: Captured,
    }

    impl Harness {
        pub(crate) async fn start() -> Self {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/uaa/oauth/token"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "access_token": "some-token",
                    "token_type": "bearer",
                    "expires_in": 3600,
                })))
                .mount(&server)
                .await;

            let (console, captured) = Console::buffered();
            let global = GlobalOptions {
                target: Some(server.uri()),
                username: Some("username".into()),
                password: Some("password".into()),
                ..GlobalOptions::default()
            };
            let mut ctx = Context::new(console, global, BTreeMap::new());
            ctx.poll_interval = Duration::from_millis(10);
            Self {
                server,
                ctx,
                captured,
            }
        }

        /// Bind `args` for `spec` and run it.
        pub(crate) async fn run(&self, spec: &CommandSpec, args: &[&str]) -> anyhow::Result<()> {
            let args: Vec<String> = args.iter().map(ToString::to_string).collect();
            let options = bind(spec, &args, &self.ctx.env)?;
            super::run(spec.name, &self.ctx, &options).await
        }

        pub(crate) fn stdout(&self) -> String {
            self.captured.stdout()
        }

        pub(crate) fn stderr(&self) -> String {
            self.captured.stderr()
        }
    }

    #[test]
    fn test_every_command_is_dispatchable_and_unique() {
        let mut names: Vec<&str> = ALL.iter().map(|c| c.name).collect();
        let count = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), count);
        assert!(find("apply-changes").is_some());
        assert!(find("vm-lifecycle").is_none());
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let harness = Harness::start().await;
        let err = super::run("bogus", &harness.ctx, &Bound::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unknown command: bogus");
    }
}
