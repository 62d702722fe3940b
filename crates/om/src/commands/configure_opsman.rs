//! Settings page configuration of the appliance.

use anyhow::{bail, Context as _};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{load_config, Context, CONFIG_FILE, OPS_FILE, VAR, VARS_ENV, VARS_FILE};
use crate::api::SyslogSettings;
use crate::options::{Bound, CommandSpec, ConfigMode};

pub const CONFIGURE_OPSMAN: CommandSpec = CommandSpec {
    name: "configure-opsman",
    summary: "configures values present on the Ops Manager settings page",
    description: "This authenticated command configures settings available on the \"Settings\" page in the Ops Manager UI. For an example config, reference the docs directory for this command.",
    options: &[CONFIG_FILE.required(), VARS_FILE, VARS_ENV, VAR, OPS_FILE],
    config: ConfigMode::Own,
};

#[derive(Debug, Deserialize)]
struct SslCertificate {
    certificate: String,
    private_key: String,
}

#[derive(Debug, Deserialize)]
struct PivotalNetwork {
    api_token: String,
}

#[derive(Debug, Default, Deserialize)]
struct RbacSettings {
    #[serde(default)]
    ldap_rbac_admin_group_name: String,
    #[serde(default)]
    rbac_saml_admin_group: String,
    #[serde(default)]
    rbac_saml_groups_attribute: String,
}

impl RbacSettings {
    fn payload(&self) -> anyhow::Result<Value> {
        let saml = !self.rbac_saml_admin_group.is_empty() || !self.rbac_saml_groups_attribute.is_empty();
        let ldap = !self.ldap_rbac_admin_group_name.is_empty();
        match (saml, ldap) {
            (true, true) => bail!("can only set SAML or LDAP. Check the config file and use only the appropriate values.\nFor example config values, see the docs directory for documentation."),
            (true, false) => Ok(json!({
                "rbac_saml_admin_group": self.rbac_saml_admin_group,
                "rbac_saml_groups_attribute": self.rbac_saml_groups_attribute,
            })),
            (false, _) => Ok(json!({
                "ldap_rbac_admin_group_name": self.ldap_rbac_admin_group_name,
            })),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct BannerSettings {
    #[serde(default)]
    ui_banner_contents: String,
    #[serde(default)]
    ssh_banner_contents: String,
}

#[derive(Debug, Deserialize)]
struct TokensExpiration {
    #[serde(default)]
    access_token_expiration: Option<u64>,
    #[serde(default)]
    refresh_token_expiration: Option<u64>,
    #[serde(default)]
    session_idle_timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct OpsmanConfig {
    ssl_certificate: Option<SslCertificate>,
    pivotal_network_settings: Option<PivotalNetwork>,
    rbac_settings: Option<RbacSettings>,
    banner_settings: Option<BannerSettings>,
    syslog_settings: Option<SyslogSettings>,
    tokens_expiration: Option<TokensExpiration>,
    /// Read by the VM lifecycle tooling, not by this command.
    #[serde(rename = "opsman-configuration")]
    _opsman_configuration: Option<serde_yaml::Value>,
}

const KNOWN_KEYS: &[&str] = &[
    "ssl-certificate",
    "pivotal-network-settings",
    "rbac-settings",
    "banner-settings",
    "syslog-settings",
    "tokens-expiration",
    "opsman-configuration",
];

fn parse_config(path: &str, document: serde_yaml::Value) -> anyhow::Result<OpsmanConfig> {
    if let Some(mapping) = document.as_mapping() {
        let mut unknown: Vec<&str> = mapping
            .keys()
            .filter_map(serde_yaml::Value::as_str)
            .filter(|k| !KNOWN_KEYS.contains(k))
            .collect();
        if !unknown.is_empty() {
            unknown.sort_unstable();
            bail!("unrecognized top level key(s) in config file:\n{}", unknown.join("\n"));
        }
    }
    serde_yaml::from_value(document)
        .with_context(|| format!("could not be parsed as valid configuration: {path}"))
}

pub async fn configure_opsman(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let document = load_config(ctx, options)?;
    let config = parse_config(&options.string("config"), document)?;
    let rbac = config.rbac_settings.as_ref().map(RbacSettings::payload).transpose()?;
    let api = ctx.api()?;

    if let Some(ssl) = &config.ssl_certificate {
        ctx.console.log("Updating SSL Certificate...");
        api.update_ssl_certificate(&ssl.certificate, &ssl.private_key)
            .await?;
        ctx.console.log("Successfully applied custom SSL Certificate.");
        ctx.console
            .log("Please allow about 1 min for the new certificate to take effect.");
    }

    if let Some(pivnet) = &config.pivotal_network_settings {
        ctx.console.log("Updating Pivnet Token...");
        api.update_pivnet_token(&pivnet.api_token).await?;
        ctx.console.log("Successfully applied Pivnet Token.");
    }

    if let Some(banner) = &config.banner_settings {
        ctx.console.log("Updating Banner...");
        api.update_banner(&banner.ui_banner_contents, &banner.ssh_banner_contents)
            .await?;
        ctx.console.log("Successfully applied Banner.");
    }

    if let Some(syslog) = &config.syslog_settings {
        ctx.console.log("Updating Syslog...");
        api.update_syslog_settings(syslog).await?;
        ctx.console.log("Successfully applied Syslog.");
    }

    if let Some(tokens) = &config.tokens_expiration {
        ctx.console.log("Updating UAA Tokens Expiration...");
        let mut body = serde_json::Map::new();
        for (key, value) in [
            ("access_token_expiration", tokens.access_token_expiration),
            ("refresh_token_expiration", tokens.refresh_token_expiration),
            ("session_idle_timeout", tokens.session_idle_timeout),
        ] {
            if let Some(value) = value {
                body.insert(key.into(), json!(value));
            }
        }
        api.update_setting("uaa/tokens_expiration", &json!({"tokens_expiration": body}))
            .await?;
        ctx.console.log("Successfully applied UAA Tokens Expiration.");
    }

    if let Some(rbac) = rbac {
        ctx.console.log("Updating RBAC Settings...");
        api.enable_rbac(&rbac).await?;
        ctx.console.log("Successfully applied RBAC Settings.");
    }
    Ok(())
}
