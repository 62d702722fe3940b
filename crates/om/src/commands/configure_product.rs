//! Product configuration from a config file, and the reverse export.

use std::collections::BTreeMap;

use anyhow::{bail, Context as _};
use serde_json::{json, Map, Value};
use serde_yaml::Mapping;

use super::{
    ensure_no_running_installation, load_config, to_json, Context, CONFIG_FILE, OPS_FILE, VAR,
    VARS_ENV, VARS_FILE,
};
use crate::api::{Api, Errand, ResponseProperty};
use crate::options::{Bound, CommandSpec, ConfigMode, OptionSpec};

pub const CONFIGURE_PRODUCT: CommandSpec = CommandSpec {
    name: "configure-product",
    summary: "configures a staged product",
    description: "This authenticated command configures a staged product",
    options: &[
        CONFIG_FILE.required(),
        VARS_FILE,
        VARS_ENV,
        VAR,
        OPS_FILE,
    ],
    config: ConfigMode::Own,
};

pub const STAGED_CONFIG: CommandSpec = CommandSpec {
    name: "staged-config",
    summary: "generates a config from a staged product",
    description: "This command generates a config from a staged product that can be passed in to om configure-product (Note: credentials are not available and will appear as '***')",
    options: &[
        OptionSpec::string("product-name", "name of product").short('p').required(),
        OptionSpec::flag("include-credentials", "include credentials. note: requires product to have been deployed").short('c'),
        OptionSpec::flag("include-placeholders", "replace obscured credentials with interpolatable placeholders").short('r'),
    ],
    config: ConfigMode::None,
};

const PRODUCT_KEYS: &[&str] = &[
    "product-name",
    "product-properties",
    "network-properties",
    "resource-config",
    "errand-config",
    "syslog-properties",
    "validate-config-complete",
];

/// Accepted and ignored; staging is done by stage-product.
const IGNORED_KEYS: &[&str] = &["product-version"];

/// Property types whose values are never returned in cleartext.
const CREDENTIAL_TYPES: &[&str] = &[
    "secret",
    "simple_credentials",
    "rsa_cert_credentials",
    "rsa_pkey_credentials",
    "salted_credentials",
];

fn section<'a>(config: &'a Mapping, key: &str) -> Option<&'a serde_yaml::Value> {
    config.get(key).filter(|v| !v.is_null())
}

fn unrecognized_keys(config: &Mapping, known: &[&str]) -> Vec<String> {
    let mut keys: Vec<String> = config
        .keys()
        .filter_map(serde_yaml::Value::as_str)
        .filter(|k| !known.contains(k))
        .map(str::to_string)
        .collect();
    keys.sort();
    keys
}

/// Copy `option_value` and `selected_option` onto each other.
///
/// The properties endpoint reports `selected_option` but expects
/// `option_value` on update.
fn normalize_selectors(properties: &mut Value) {
    let Some(properties) = properties.as_object_mut() else {
        return;
    };
    for property in properties.values_mut().filter_map(Value::as_object_mut) {
        match (property.get("selected_option").cloned(), property.get("option_value").cloned()) {
            (None, Some(option)) => {
                property.insert("selected_option".into(), option);
            }
            (Some(selected), None) => {
                property.insert("option_value".into(), selected);
            }
            _ => {}
        }
    }
}

/// Apply per-job resource settings and max-in-flight to a staged product.
pub(super) async fn configure_resources(
    ctx: &Context,
    api: &Api,
    guid: &str,
    resources: &Map<String, Value>,
) -> anyhow::Result<()> {
    ctx.console.log("applying resource configurations...");
    api.configure_job_resource_config(guid, resources)
        .await
        .context("failed to configure resources")?;
    ctx.console.log("finished applying resource configurations");

    let jobs = api
        .list_staged_product_jobs(guid)
        .await
        .context("failed to fetch jobs")?;
    let mut max_in_flight = BTreeMap::new();
    for (name, job_guid) in &jobs {
        if let Some(value) = resources.get(name).and_then(|r| r.get("max_in_flight")) {
            max_in_flight.insert(job_guid.clone(), value.clone());
        }
    }
    if !max_in_flight.is_empty() {
        ctx.console.log("applying max in flight for the following jobs:");
        for name in jobs.keys().filter(|name| {
            resources
                .get(name.as_str())
                .is_some_and(|r| r.get("max_in_flight").is_some())
        }) {
            ctx.console.log(format!("\t{name}"));
        }
        api.update_staged_product_max_in_flight(guid, &max_in_flight)
            .await?;
    }
    Ok(())
}

async fn configure_errands(
    ctx: &Context,
    api: &Api,
    guid: &str,
    errands: &Map<String, Value>,
) -> anyhow::Result<()> {
    ctx.console
        .log("applying errand configuration for the following errands:");
    for (name, state) in errands {
        ctx.console.log(format!("\t{name}"));
        let errand = Errand {
            name: name.clone(),
            post_deploy: state.get("post-deploy-state").cloned(),
            pre_delete: state.get("pre-delete-state").cloned(),
        };
        api.update_staged_product_errand(guid, &errand)
            .await
            .with_context(|| format!("failed to set errand state for errand {name}"))?;
    }
    Ok(())
}

async fn validate_config_complete(ctx: &Context, api: &Api, guid: &str) -> anyhow::Result<()> {
    let changes = api.pending_changes().await?;
    let Some(change) = changes.iter().find(|c| c.guid == guid) else {
        return Ok(());
    };
    match change.completeness_checks {
        None => bail!("configuration completeness could not be determined.\nThis feature is only supported for OpsMan 2.2+\nIf you're on older version of OpsMan add the line `validate-config-complete: false` to your config file."),
        Some(checks) if !checks.configuration_complete => bail!(
            "configuration not complete.\nThe properties you provided have been set,\nbut some required properties or configuration details are still missing.\nVisit the Ops Manager for details: {}",
            ctx.target()
        ),
        Some(_) => Ok(()),
    }
}

pub async fn configure_product(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let api = ctx.api()?;
    ensure_no_running_installation(&api).await?;

    let config = load_config(ctx, options)?;
    let Some(config) = config.as_mapping() else {
        bail!("{} could not be parsed as valid configuration", options.string("config"));
    };

    let Some(name) = section(config, "product-name").and_then(serde_yaml::Value::as_str) else {
        bail!("could not parse configure-product config: \"product-name\" is required");
    };
    let mut known = PRODUCT_KEYS.to_vec();
    known.extend_from_slice(IGNORED_KEYS);
    let unknown = unrecognized_keys(config, &known);
    if !unknown.is_empty() {
        bail!("the config file contains unrecognized keys: {}", unknown.join(", "));
    }

    ctx.console.log(format!("configuring {name}..."));
    let guid = api
        .find_staged_product(name)
        .await?
        .map(|p| p.guid)
        .ok_or_else(|| anyhow::anyhow!("could not find product \"{name}\""))?;

    match section(config, "network-properties") {
        Some(networks) => {
            ctx.console.log("setting up network");
            api.update_staged_product_networks_and_azs(&guid, to_json(networks)?)
                .await
                .context("failed to configure product")?;
            ctx.console.log("finished setting up network");
        }
        None => ctx
            .console
            .log("network properties are not provided, nothing to do here"),
    }

    match section(config, "product-properties") {
        Some(properties) => {
            let mut properties = to_json(properties)?;
            normalize_selectors(&mut properties);
            ctx.console.log("setting properties");
            api.update_staged_product_properties(&guid, properties)
                .await
                .context("failed to configure product")?;
            ctx.console.log("finished setting properties");
        }
        None => ctx
            .console
            .log("product properties are not provided, nothing to do here"),
    }

    match section(config, "resource-config").map(to_json).transpose()? {
        Some(Value::Object(resources)) => configure_resources(ctx, &api, &guid, &resources).await?,
        Some(_) => bail!("could not decode resource-config: expected a map of job names"),
        None => ctx
            .console
            .log("resource config properties are not provided, nothing to do here"),
    }

    match section(config, "syslog-properties") {
        Some(syslog) => {
            ctx.console.log("setting up syslog");
            api.update_syslog_configuration(&guid, to_json(syslog)?)
                .await
                .context("failed to configure product")?;
            ctx.console.log("finished setting up syslog");
        }
        None => ctx
            .console
            .log("syslog configuration is not provided, nothing to do here"),
    }

    match section(config, "errand-config").map(to_json).transpose()? {
        Some(Value::Object(errands)) if !errands.is_empty() => {
            configure_errands(ctx, &api, &guid, &errands).await?;
        }
        _ => ctx
            .console
            .log("errands are not provided, nothing to do here"),
    }

    let validate = section(config, "validate-config-complete")
        .and_then(serde_yaml::Value::as_bool)
        .unwrap_or(true);
    if validate {
        validate_config_complete(ctx, &api, &guid).await?;
    }

    ctx.console.log("finished configuring product");
    Ok(())
}

/// `((name.field))` placeholders for a credential property.
fn credential_placeholder(name: &str, property_type: &str) -> Option<Value> {
    let fields: &[&str] = match property_type {
        "secret" => &["secret"],
        "simple_credentials" => &["identity", "password"],
        "rsa_cert_credentials" => &["cert_pem", "private_key_pem"],
        "rsa_pkey_credentials" => &["private_key_pem"],
        "salted_credentials" => &["identity", "password", "salt"],
        _ => return None,
    };
    let value: Map<String, Value> = fields
        .iter()
        .map(|field| ((*field).to_string(), Value::String(format!("(({name}.{field}))"))))
        .collect();
    Some(Value::Object(value))
}

/// Drop sub-properties of selector options that are not selected.
fn drop_inactive_options(
    properties: &mut BTreeMap<String, Value>,
    selectors: &BTreeMap<String, String>,
) {
    properties.retain(|name, _| {
        let components: Vec<&str> = name.trim_start_matches('.').split('.').collect();
        if components.len() < 3 {
            return true;
        }
        let selector = format!(".{}.{}", components[0], components[1]);
        selectors
            .get(&selector)
            .is_none_or(|selected| components[2] == selected)
    });
}

async fn configurable_properties(
    api: &Api,
    guid: &str,
    properties: BTreeMap<String, ResponseProperty>,
    include_credentials: bool,
    include_placeholders: bool,
) -> anyhow::Result<BTreeMap<String, Value>> {
    let mut configurable = BTreeMap::new();
    let mut selectors = BTreeMap::new();

    for (name, property) in properties {
        if !property.configurable || property.value.is_null() {
            continue;
        }
        if property.property_type == "selector" {
            if let Some(selected) = property.value.as_str() {
                selectors.insert(name.clone(), selected.to_string());
            }
        }
        if property.is_credential && include_credentials {
            let credential = api.deployed_product_credential(guid, &name).await?;
            configurable.insert(name, json!({"value": credential.value}));
            continue;
        }
        if include_placeholders {
            if let Some(placeholder) = credential_placeholder(&name, &property.property_type) {
                configurable.insert(name, json!({"value": placeholder}));
                continue;
            }
        }
        if !CREDENTIAL_TYPES.contains(&property.property_type.as_str()) {
            configurable.insert(name, json!({"value": property.value}));
        }
    }

    drop_inactive_options(&mut configurable, &selectors);
    Ok(configurable)
}

pub async fn staged_config(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let name = options.string("product-name");
    let include_credentials = options.flag("include-credentials");
    let api = ctx.api()?;

    if include_credentials
        && !api
            .list_deployed_products()
            .await?
            .iter()
            .any(|p| p.product_type == name)
    {
        bail!("cannot retrieve credentials for product '{name}': deploy the product and retry");
    }

    let guid = api.staged_product_guid(&name).await?;
    let properties = api.staged_product_properties(&guid).await?;
    let properties = configurable_properties(
        &api,
        &guid,
        properties,
        include_credentials,
        options.flag("include-placeholders"),
    )
    .await?;

    let networks = api.staged_product_networks_and_azs(&guid).await?;

    let mut resources = BTreeMap::new();
    for (job, job_guid) in api.list_staged_product_jobs(&guid).await? {
        let config = api.job_resource_config(&guid, &job_guid).await?;
        resources.insert(job, config);
    }

    let mut document = Map::new();
    document.insert("product-name".into(), Value::String(name));
    document.insert("product-properties".into(), json!(properties));
    if let Some(networks) = networks {
        document.insert("network-properties".into(), networks);
    }
    document.insert("resource-config".into(), json!(resources));

    let rendered = serde_yaml::to_string(&document).context("failed to render config")?;
    ctx.console.print(rendered);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::Harness;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, ResponseTemplate};

    async fn mount_basics(harness: &Harness) {
        Mock::given(method("GET"))
            .and(path("/api/v0/installations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"installations": []})))
            .mount(&harness.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v0/staged/products"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"guid": "cf-guid", "type": "cf", "installation_name": "cf-1", "product_version": "2.0"}
            ])))
            .mount(&harness.server)
            .await;
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> String {
        let path = dir.path().join("config.yml");
        std::fs::write(&path, contents).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_configure_product_sections() {
        let harness = Harness::start().await;
        mount_basics(&harness).await;
        Mock::given(method("GET"))
            .and(path("/api/v0/staged/products/cf-guid/properties"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"properties": {}})))
            .mount(&harness.server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/v0/staged/products/cf-guid/properties"))
            .and(body_json(json!({"properties": {
                ".properties.plan": {"value": "small", "selected_option": "small", "option_value": "small"},
                ".properties.domain": {"value": "example.com"}
            }})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&harness.server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/v0/staged/products/cf-guid/networks_and_azs"))
            .and(body_json(json!({"networks_and_azs": {"network": {"name": "net"}}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&harness.server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/v0/staged/products/cf-guid/errands"))
            .and(body_json(json!({"errands": [{"name": "smoke", "post_deploy": false}]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&harness.server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = write_config(
            &dir,
            r"
product-name: cf
product-version: 2.0
network-properties:
  network: {name: ((network))}
product-properties:
  .properties.plan: {value: small, option_value: small}
  .properties.domain: {value: example.com}
errand-config:
  smoke: {post-deploy-state: false}
validate-config-complete: false
",
        );

        harness
            .run(&CONFIGURE_PRODUCT, &["--config", &config, "--var", "network=net"])
            .await
            .unwrap();
        let log = harness.stderr();
        assert!(log.contains("configuring cf..."));
        assert!(log.contains("resource config properties are not provided, nothing to do here"));
        assert!(log.contains("finished configuring product"));
    }

    #[tokio::test]
    async fn test_configure_product_rejects_unknown_keys() {
        let harness = Harness::start().await;
        mount_basics(&harness).await;
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(&dir, "product-name: cf\nproduct-propertiez: {}\nextra: 1\n");

        let err = harness
            .run(&CONFIGURE_PRODUCT, &["--config", &config])
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "the config file contains unrecognized keys: extra, product-propertiez"
        );
    }

    #[tokio::test]
    async fn test_configure_product_requires_name_and_staged_product() {
        let harness = Harness::start().await;
        mount_basics(&harness).await;
        let dir = tempfile::tempdir().unwrap();

        let config = write_config(&dir, "product-properties: {}\n");
        let err = harness
            .run(&CONFIGURE_PRODUCT, &["--config", &config])
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "could not parse configure-product config: \"product-name\" is required"
        );

        let config = write_config(&dir, "product-name: mysql\n");
        let err = harness
            .run(&CONFIGURE_PRODUCT, &["--config", &config])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "could not find product \"mysql\"");
    }

    #[tokio::test]
    async fn test_configure_product_incomplete() {
        let harness = Harness::start().await;
        mount_basics(&harness).await;
        Mock::given(method("GET"))
            .and(path("/api/v0/staged/pending_changes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"product_changes": [
                {"guid": "cf-guid", "action": "install",
                 "completeness_checks": {"configuration_complete": false}}
            ]})))
            .mount(&harness.server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(&dir, "product-name: cf\n");

        let err = harness
            .run(&CONFIGURE_PRODUCT, &["--config", &config])
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("configuration not complete."));
    }

    #[test]
    fn test_drop_inactive_options() {
        let mut properties: BTreeMap<String, Value> = [
            (".properties.plan", json!({"value": "small"})),
            (".properties.plan.small.size", json!({"value": 1})),
            (".properties.plan.large.size", json!({"value": 10})),
            (".web.tuning", json!({"value": 3})),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        let selectors = BTreeMap::from([(".properties.plan".to_string(), "small".to_string())]);

        drop_inactive_options(&mut properties, &selectors);
        let names: Vec<&str> = properties.keys().map(String::as_str).collect();
        assert_eq!(
            names,
            [".properties.plan", ".properties.plan.small.size", ".web.tuning"]
        );
    }

    #[tokio::test]
    async fn test_staged_config_with_placeholders() {
        let harness = Harness::start().await;
        mount_basics(&harness).await;
        Mock::given(method("GET"))
            .and(path("/api/v0/staged/products/cf-guid/properties"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"properties": {
                ".properties.domain": {"value": "example.com", "configurable": true, "type": "wildcard_domain"},
                ".properties.admin": {"value": {"secret": "***"}, "configurable": true, "type": "secret", "credential": true},
                ".properties.internal": {"value": "x", "configurable": false, "type": "string"}
            }})))
            .mount(&harness.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v0/staged/products/cf-guid/networks_and_azs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"networks_and_azs": {"network": {"name": "net"}}})))
            .mount(&harness.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v0/staged/products/cf-guid/jobs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jobs": [{"name": "web", "guid": "web-guid"}]})))
            .mount(&harness.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v0/staged/products/cf-guid/jobs/web-guid/resource_config"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"instances": 2})))
            .mount(&harness.server)
            .await;

        harness
            .run(&STAGED_CONFIG, &["--product-name", "cf", "--include-placeholders"])
            .await
            .unwrap();

        let output: serde_yaml::Value = serde_yaml::from_str(&harness.stdout()).unwrap();
        let properties = &output["product-properties"];
        assert_eq!(properties[".properties.domain"]["value"], "example.com");
        assert_eq!(
            properties[".properties.admin"]["value"]["secret"],
            "((.properties.admin.secret))"
        );
        assert!(properties.get(".properties.internal").is_none());
        assert_eq!(output["network-properties"]["network"]["name"], "net");
        assert_eq!(output["resource-config"]["web"]["instances"], 2);
    }

    #[tokio::test]
    async fn test_staged_config_credentials_need_deploy() {
        let harness = Harness::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v0/deployed/products"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&harness.server)
            .await;

        let err = harness
            .run(&STAGED_CONFIG, &["--product-name", "cf", "--include-credentials"])
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot retrieve credentials for product 'cf': deploy the product and retry"
        );
    }
}
