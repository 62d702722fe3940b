//! BOSH director configuration and its export.

use anyhow::{anyhow, bail, Context as _};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::configure_product::configure_resources;
use super::{
    ensure_no_running_installation, load_config, to_json, Context, CONFIG_FILE, OPS_FILE, VAR,
    VARS_ENV, VARS_FILE,
};
use crate::api::{Api, VmExtension, VmType};
use crate::options::{Bound, CommandSpec, ConfigMode, OptionSpec};

pub const CONFIGURE_DIRECTOR: CommandSpec = CommandSpec {
    name: "configure-director",
    summary: "configures the director",
    description: "This authenticated command configures the director.",
    options: &[
        OptionSpec::flag("ignore-verifier-warnings", "option to ignore verifier warnings. NOT RECOMMENDED UNLESS DISABLED IN OPS MANAGER"),
        CONFIG_FILE.required(),
        VARS_FILE,
        VARS_ENV,
        VAR,
        OPS_FILE,
    ],
    config: ConfigMode::Own,
};

pub const STAGED_DIRECTOR_CONFIG: CommandSpec = CommandSpec {
    name: "staged-director-config",
    summary: "generates a config from a staged director",
    description: "This command generates a config from a staged director that can be passed in to om configure-director",
    options: &[
        OptionSpec::flag("include-placeholders", "replace obscured credentials with interpolatable placeholders").short('r'),
        OptionSpec::flag("no-redact", "Redact IaaS values from director configuration"),
    ],
    config: ConfigMode::None,
};

const DIRECTOR_PRODUCT: &str = "p-bosh";

/// What the director API reports in place of a secret.
const REDACTED: &str = "***";

const DIRECTOR_KEYS: &[&str] = &[
    "az-configuration",
    "iaas-configurations",
    "network-assignment",
    "networks-configuration",
    "properties-configuration",
    "resource-configuration",
    "vmextensions-configuration",
    "vmtypes-configuration",
];

const RELOCATED_KEYS: &[&str] = &[
    "director-configuration",
    "iaas-configuration",
    "security-configuration",
    "syslog-configuration",
];

const RELOCATED_KEYS_MESSAGE: &str = "The following keys have recently been removed from the top level configuration: director-configuration, iaas-configuration, security-configuration, syslog-configuration
To fix this error, move the above keys under 'properties-configuration' and change their dashes to underscores.

The old configuration file would contain the keys at the top level.

director-configuration: {}
iaas-configuration: {}
network-assignment: {}
networks-configuration: {}
resource-configuration: {}
security-configuration: {}
syslog-configuration: {}
vmextensions-configuration: {}

They'll need to be moved to the new 'properties-configuration', with their dashes turn to underscore.
For example, 'director-configuration' becomes 'director_configuration'.

The new configuration file will look like.

az-configuration: {}
network-assignment: {}
networks-configuration: {}
properties-configuration:
  director_configuration: {}
  security_configuration: {}
  syslog_configuration: {}
  iaas_configuration: {}
resource-configuration: {}
vmextensions-configuration: {}
";

#[derive(Debug, Default, Deserialize)]
struct VmTypesConfiguration {
    #[serde(default)]
    custom_only: bool,
    #[serde(default)]
    vm_types: Vec<VmType>,
}

/// The config file's sections, as JSON.
#[derive(Debug, Default)]
struct DirectorConfig {
    sections: Map<String, Value>,
}

impl DirectorConfig {
    fn parse(document: &serde_yaml::Value) -> anyhow::Result<Self> {
        let Value::Object(sections) = to_json(document)? else {
            bail!("could not be parsed as valid configuration: expected a map");
        };
        let config = Self {
            sections: sections.into_iter().filter(|(_, v)| !v.is_null()).collect(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut unknown: Vec<&str> = self
            .sections
            .keys()
            .map(String::as_str)
            .filter(|k| !DIRECTOR_KEYS.contains(k))
            .collect();
        unknown.sort_unstable();
        if unknown.iter().any(|k| RELOCATED_KEYS.contains(k)) {
            bail!(RELOCATED_KEYS_MESSAGE);
        }
        if !unknown.is_empty() {
            bail!(
                "the config file contains unrecognized keys: \"{}\"",
                unknown.join("\", \"")
            );
        }

        let iaas_in_properties = self
            .get("properties-configuration")
            .is_some_and(|p| p.get("iaas_configuration").is_some());
        if self.get("iaas-configurations").is_some() && iaas_in_properties {
            bail!("iaas-configurations cannot be used with properties-configuration.iaas_configuration\nPlease only use one implementation.");
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Option<&Value> {
        self.sections.get(key)
    }
}

async fn configure_iaas(
    ctx: &Context,
    api: &Api,
    configurations: &Value,
    ignore_warnings: bool,
) -> anyhow::Result<()> {
    ctx.console
        .log("started setting iaas configurations for bosh tile");
    let info = api
        .info()
        .await
        .context("could not retrieve info from targetted ops manager")?;
    if !info.version_at_least(2, 2)? {
        bail!(
            "\"iaas-configurations\" is only available with Ops Manager 2.2 or later: you are running {}",
            info.version
        );
    }
    api.update_staged_director_iaas_configurations(configurations.clone(), ignore_warnings)
        .await
        .context("iaas configurations could not be completed")?;
    ctx.console
        .log("finished setting iaas configurations for bosh tile");
    Ok(())
}

async fn configure_vm_types(ctx: &Context, api: &Api, section: &Value) -> anyhow::Result<()> {
    let wanted: VmTypesConfiguration = serde_json::from_value(section.clone())
        .context("could not parse vmtypes-configuration")?;
    if wanted.vm_types.is_empty() {
        if wanted.custom_only {
            bail!("if custom_types = true, vm_types must not be empty");
        }
        return Ok(());
    }

    ctx.console.log("creating custom vm types");
    let mut to_create = Vec::new();
    if !wanted.custom_only {
        api.delete_custom_vm_types().await?;
        to_create = api.list_vm_types().await?;
    }
    for vm_type in wanted.vm_types {
        match to_create.iter_mut().find(|t| t.name == vm_type.name) {
            Some(existing) => *existing = vm_type,
            None => to_create.push(vm_type),
        }
    }
    api.create_custom_vm_types(&to_create).await?;
    Ok(())
}

async fn configure_vm_extensions(ctx: &Context, api: &Api, section: &Value) -> anyhow::Result<()> {
    ctx.console.log("started configuring vm extensions");
    let wanted: Vec<VmExtension> = serde_json::from_value(section.clone())
        .with_context(|| format!("could not unmarshall vmextensions-configuration json: {section}"))?;

    let mut stale: Vec<String> = api
        .list_vm_extensions()
        .await?
        .into_iter()
        .map(|e| e.name)
        .collect();

    ctx.console
        .log("applying vmextensions configuration for the following:");
    for extension in &wanted {
        ctx.console.log(format!("\t{}", extension.name));
        api.create_vm_extension(extension).await?;
        stale.retain(|name| name != &extension.name);
    }

    stale.sort();
    for name in stale {
        ctx.console.log(format!("deleting vm extension {name}"));
        api.delete_vm_extension(&name).await?;
        ctx.console.log(format!("done deleting vm extension {name}"));
    }
    ctx.console.log("finished configuring vm extensions");
    Ok(())
}

pub async fn configure_director(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let ignore_warnings = options.flag("ignore-verifier-warnings");
    let api = ctx.api()?;
    ensure_no_running_installation(&api).await?;

    let document = load_config(ctx, options)?;
    let config = DirectorConfig::parse(&document)?;

    if let Some(iaas) = config.get("iaas-configurations") {
        configure_iaas(ctx, &api, iaas, ignore_warnings).await?;
    }

    if let Some(properties) = config.get("properties-configuration") {
        ctx.console
            .log("started configuring director options for bosh tile");
        api.update_staged_director_properties(properties)
            .await
            .context("properties could not be applied")?;
        ctx.console
            .log("finished configuring director options for bosh tile");
    }

    if let Some(zones) = config.get("az-configuration") {
        ctx.console
            .log("started configuring availability zone options for bosh tile");
        api.update_staged_director_availability_zones(zones.clone(), ignore_warnings)
            .await
            .context("availability zones configuration could not be applied")?;
        ctx.console
            .log("finished configuring availability zone options for bosh tile");
    }

    if let Some(networks) = config.get("networks-configuration") {
        ctx.console
            .log("started configuring network options for bosh tile");
        api.update_staged_director_networks(networks.clone())
            .await
            .context("networks configuration could not be applied")?;
        ctx.console
            .log("finished configuring network options for bosh tile");
    }

    if let Some(assignment) = config.get("network-assignment") {
        ctx.console
            .log("started configuring network assignment options for bosh tile");
        let applied = api
            .update_staged_director_network_and_az(assignment.clone())
            .await
            .context("network and AZs could not be applied")?;
        if !applied {
            ctx.console.warn("unable to set network assignment for director, as it's already been deployed");
        }
        ctx.console
            .log("finished configuring network assignment options for bosh tile");
    }

    if let Some(vm_types) = config.get("vmtypes-configuration") {
        configure_vm_types(ctx, &api, vm_types).await?;
    }

    if let Some(extensions) = config.get("vmextensions-configuration") {
        configure_vm_extensions(ctx, &api, extensions).await?;
    }

    let guid = api
        .staged_product_guid(DIRECTOR_PRODUCT)
        .await
        .map_err(|e| anyhow!("could not find staged product with name '{DIRECTOR_PRODUCT}': {e}"))?;

    match config.get("resource-configuration") {
        Some(Value::Object(resources)) => {
            ctx.console
                .log("started configuring resource options for bosh tile");
            configure_resources(ctx, &api, &guid, resources).await?;
            ctx.console
                .log("finished configuring resource options for bosh tile");
        }
        Some(_) => bail!("resource-configuration must be a map of job names"),
        None => ctx.console.log(
            "resource config property for bosh tile was not provided, nothing to do here",
        ),
    }
    Ok(())
}

/// Remove every `guid` key, recursively.
fn strip_guids(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.remove("guid");
            map.values_mut().for_each(strip_guids);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_guids),
        _ => {}
    }
}

/// Replace or drop every redacted value below `value`.
///
/// With `placeholders`, a redacted value becomes `((path_to_value))`;
/// without, its key is removed.
fn resolve_redacted(value: &mut Value, path: &str, placeholders: bool) {
    match value {
        Value::Object(map) => {
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                let child_path = format!("{path}_{key}");
                let redacted = map.get(&key).and_then(Value::as_str) == Some(REDACTED);
                if redacted && !placeholders {
                    map.remove(&key);
                } else if let Some(child) = map.get_mut(&key) {
                    resolve_redacted(child, &child_path, placeholders);
                }
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                resolve_redacted(item, &format!("{path}_{i}"), placeholders);
            }
        }
        Value::String(s) if s == REDACTED && placeholders => {
            *s = format!("(({}))", path.trim_start_matches('_'));
        }
        _ => {}
    }
}

pub async fn staged_director_config(ctx: &Context, options: &Bound) -> anyhow::Result<()> {
    let no_redact = options.flag("no-redact");
    let placeholders = options.flag("include-placeholders");
    if no_redact && placeholders {
        bail!("cannot use --no-redact together with --include-placeholders");
    }
    let api = ctx.api()?;
    let redact = !no_redact;

    let mut config = Map::new();

    if let Some(mut zones) = api.staged_director_availability_zones().await? {
        strip_guids(&mut zones);
        config.insert("az-configuration".into(), zones);
    }

    let mut properties = api.staged_director_properties(redact).await?;
    if let Some(mut iaas) = api.staged_director_iaas_configurations(redact).await? {
        strip_guids(&mut iaas);
        config.insert("iaas-configurations".into(), iaas);
        if let Some(properties) = properties.as_object_mut() {
            properties.remove("iaas_configuration");
        }
    }

    if let Some(mut assignment) = api.staged_director_network_and_az().await? {
        strip_guids(&mut assignment);
        config.insert("network-assignment".into(), assignment);
    }

    let mut networks = api.staged_director_networks().await?;
    strip_guids(&mut networks);
    config.insert("networks-configuration".into(), networks);

    config.insert("properties-configuration".into(), properties.take());

    let guid = api.staged_product_guid(DIRECTOR_PRODUCT).await?;
    let mut resources = Map::new();
    for (job, job_guid) in api.list_staged_product_jobs(&guid).await? {
        resources.insert(job, api.job_resource_config(&guid, &job_guid).await?);
    }
    config.insert("resource-configuration".into(), Value::Object(resources));

    let extensions = api.list_vm_extensions().await?;
    config.insert("vmextensions-configuration".into(), json!(extensions));

    let custom: Vec<VmType> = api
        .list_vm_types()
        .await?
        .into_iter()
        .filter(|t| !t.builtin)
        .collect();
    if !custom.is_empty() {
        config.insert(
            "vmtypes-configuration".into(),
            json!({"custom_only": false, "vm_types": custom}),
        );
    }

    let mut config = Value::Object(config);
    if redact {
        resolve_redacted(&mut config, "", placeholders);
    }
    let rendered = serde_yaml::to_string(&config).context("failed to render director config")?;
    ctx.console.print(rendered);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::Harness;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, ResponseTemplate};

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> String {
        let path = dir.path().join("director.yml");
        std::fs::write(&path, contents).unwrap();
        path.to_str().unwrap().to_string()
    }

    async fn mount_common(harness: &Harness) {
        Mock::given(method("GET"))
            .and(path("/api/v0/installations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"installations": []})))
            .mount(&harness.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v0/staged/products"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"guid": "bosh-guid", "type": "p-bosh"}
            ])))
            .mount(&harness.server)
            .await;
    }

    #[tokio::test]
    async fn test_relocated_keys() {
        let harness = Harness::start().await;
        mount_common(&harness).await;
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(&dir, "director-configuration: {}\nunknown: 1\n");

        let err = harness
            .run(&CONFIGURE_DIRECTOR, &["--config", &config])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), RELOCATED_KEYS_MESSAGE);
    }

    #[tokio::test]
    async fn test_unknown_keys_listed() {
        let harness = Harness::start().await;
        mount_common(&harness).await;
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(&dir, "zeta: 1\nalpha: 2\nnetwork-assignment: {}\n");

        let err = harness
            .run(&CONFIGURE_DIRECTOR, &["--config", &config])
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "the config file contains unrecognized keys: \"alpha\", \"zeta\""
        );
    }

    #[tokio::test]
    async fn test_iaas_configured_twice() {
        let harness = Harness::start().await;
        mount_common(&harness).await;
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(
            &dir,
            "iaas-configurations: [{name: default}]\nproperties-configuration:\n  iaas_configuration: {}\n",
        );

        let err = harness
            .run(&CONFIGURE_DIRECTOR, &["--config", &config])
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .starts_with("iaas-configurations cannot be used with properties-configuration"));
    }

    #[tokio::test]
    async fn test_configure_director_sections() {
        let harness = Harness::start().await;
        mount_common(&harness).await;
        Mock::given(method("PUT"))
            .and(path("/api/v0/staged/director/properties"))
            .and(body_json(json!({"director_configuration": {"ntp_servers_string": "ntp"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&harness.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v0/staged/director/availability_zones"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"availability_zones": [
                {"name": "az-1", "guid": "az-1-guid"}
            ]})))
            .mount(&harness.server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/v0/staged/director/availability_zones"))
            .and(query_param("ignore_warnings", "true"))
            .and(body_json(json!({"availability_zones": [
                {"name": "az-1", "guid": "az-1-guid"},
                {"name": "az-2"}
            ]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&harness.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v0/staged/vm_extensions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"vm_extensions": [
                {"name": "old", "cloud_properties": {}},
                {"name": "keep", "cloud_properties": {}}
            ]})))
            .mount(&harness.server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/v0/staged/vm_extensions/keep"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&harness.server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/v0/staged/vm_extensions/old"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&harness.server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = write_config(
            &dir,
            r"
properties-configuration:
  director_configuration: {ntp_servers_string: ((ntp))}
az-configuration:
- name: az-1
- name: az-2
vmextensions-configuration:
- name: keep
  cloud_properties: {size: 1}
",
        );

        harness
            .run(
                &CONFIGURE_DIRECTOR,
                &["--config", &config, "--var", "ntp=ntp", "--ignore-verifier-warnings"],
            )
            .await
            .unwrap();
        let log = harness.stderr();
        assert!(log.contains("finished configuring director options for bosh tile"));
        assert!(log.contains("deleting vm extension old"));
        assert!(log.contains("resource config property for bosh tile was not provided"));
    }

    #[test]
    fn test_resolve_redacted() {
        let mut config = json!({
            "properties-configuration": {"iaas_configuration": {"secret_key": "***", "region": "r"}},
            "list": [{"password": "***"}]
        });
        let mut dropped = config.clone();

        resolve_redacted(&mut config, "", true);
        assert_eq!(
            config["properties-configuration"]["iaas_configuration"]["secret_key"],
            "((properties-configuration_iaas_configuration_secret_key))"
        );
        assert_eq!(config["list"][0]["password"], "((list_0_password))");

        resolve_redacted(&mut dropped, "", false);
        assert_eq!(
            dropped["properties-configuration"]["iaas_configuration"],
            json!({"region": "r"})
        );
    }

    #[tokio::test]
    async fn test_staged_director_config() {
        let harness = Harness::start().await;
        mount_common(&harness).await;
        let mounts = [
            ("/api/v0/staged/director/availability_zones", json!({"availability_zones": [{"name": "az-1", "guid": "g"}]})),
            ("/api/v0/staged/director/properties", json!({"iaas_configuration": {"key": "***"}, "director_configuration": {"ntp": "x"}})),
            ("/api/v0/staged/director/iaas_configurations", json!({"iaas_configurations": [{"name": "default", "guid": "g", "secret": "***"}]})),
            ("/api/v0/staged/director/network_and_az", json!({"network_and_az": {"network": {"name": "net", "guid": "g"}}})),
            ("/api/v0/staged/director/networks", json!({"networks": [{"name": "net", "guid": "g"}]})),
            ("/api/v0/staged/products/bosh-guid/jobs", json!({"jobs": [{"name": "director", "guid": "job-guid"}]})),
            ("/api/v0/staged/products/bosh-guid/jobs/job-guid/resource_config", json!({"instances": 1})),
            ("/api/v0/staged/vm_extensions", json!({"vm_extensions": []})),
            ("/api/v0/vm_types", json!({"vm_types": [{"name": "small", "cpu": 1, "ram": 1024, "ephemeral_disk": 1024, "builtin": true}]})),
        ];
        for (route, body) in mounts {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(200).set_body_json(body))
                .mount(&harness.server)
                .await;
        }

        harness
            .run(&STAGED_DIRECTOR_CONFIG, &["--include-placeholders"])
            .await
            .unwrap();
        let output: serde_yaml::Value = serde_yaml::from_str(&harness.stdout()).unwrap();
        assert_eq!(output["az-configuration"][0]["name"], "az-1");
        assert!(output["az-configuration"][0].get("guid").is_none());
        assert_eq!(
            output["iaas-configurations"][0]["secret"],
            "((iaas-configurations_0_secret))"
        );
        assert!(output["properties-configuration"].get("iaas_configuration").is_none());
        assert_eq!(output["network-assignment"]["network"]["name"], "net");
        assert_eq!(output["resource-configuration"]["director"]["instances"], 1);
        assert!(output.get("vmtypes-configuration").is_none());
    }
}
