//! Builds the template, vars and ops files from parsed metadata.
//!
//! Every output is a `BTreeMap` so files come out with sorted keys and are
//! stable from one run to the next.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_yaml::{Mapping, Value};

use super::metadata::{scalar_string, Blueprint, BlueprintId, Metadata, Property};

pub const DEFAULT_SIZE_OF_COLLECTIONS: usize = 10;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\(\(([-/.A-Za-z0-9_]+)\)\)$").unwrap());

/// One go-patch operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Op {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Op {
    fn replace(path: String, value: Value) -> Self {
        Self {
            kind: "replace",
            path,
            value: Some(value),
        }
    }

    fn remove(path: String) -> Self {
        Self {
            kind: "remove",
            path,
            value: None,
        }
    }
}

pub type OpsFiles = BTreeMap<String, Vec<Op>>;

/// The `product.yml` document.
#[derive(Debug, Serialize)]
pub struct Template {
    #[serde(rename = "product-name")]
    pub product_name: String,
    #[serde(rename = "network-properties", skip_serializing_if = "Option::is_none")]
    pub network_properties: Option<Value>,
    #[serde(rename = "product-properties")]
    pub product_properties: BTreeMap<String, Value>,
    #[serde(rename = "resource-config", skip_serializing_if = "BTreeMap::is_empty")]
    pub resource_config: BTreeMap<String, Value>,
    #[serde(rename = "errand-config", skip_serializing_if = "BTreeMap::is_empty")]
    pub errand_config: BTreeMap<String, Value>,
}

/// `properties.foo.bar` → `foo_bar`.
pub fn var_name(reference: &str) -> String {
    let trimmed = reference.strip_prefix('.').unwrap_or(reference);
    trimmed.replacen("properties.", "", 1).replace('.', "_")
}

/// `properties.foo.bar` → `foo-bar`.
pub fn ops_file_name(reference: &str) -> String {
    let trimmed = reference.strip_prefix('.').unwrap_or(reference);
    trimmed.replacen("properties.", "", 1).replace('.', "-")
}

fn placeholder(name: &str) -> Value {
    Value::String(format!("(({name}))"))
}

fn mapping<const N: usize>(entries: [(&str, Value); N]) -> Value {
    let mut map = Mapping::new();
    for (key, value) in entries {
        map.insert(Value::String(key.to_string()), value);
    }
    Value::Mapping(map)
}

fn wrap(value: Value) -> Value {
    mapping([("value", value)])
}

fn certificate(var: &str) -> Value {
    mapping([
        ("cert_pem", placeholder(&format!("{var}_certificate"))),
        ("private_key_pem", placeholder(&format!("{var}_privatekey"))),
    ])
}

fn simple_credentials(var: &str) -> Value {
    mapping([
        ("identity", placeholder(&format!("{var}_identity"))),
        ("password", placeholder(&format!("{var}_password"))),
    ])
}

fn product_path(reference: &str) -> String {
    format!("/product-properties/{reference}?")
}

/// Collect every `((name))` placeholder in `value`.
pub fn placeholders(value: &Value, into: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => {
            if let Some(captures) = PLACEHOLDER.captures(s) {
                into.insert(captures[1].to_string());
            }
        }
        Value::Sequence(items) => items.iter().for_each(|v| placeholders(v, into)),
        Value::Mapping(map) => map.values().for_each(|v| placeholders(v, into)),
        Value::Tagged(tagged) => placeholders(&tagged.value, into),
        _ => {}
    }
}

pub struct Generator<'a> {
    metadata: &'a Metadata,
    size_of_collections: usize,
}

impl<'a> Generator<'a> {
    pub fn new(metadata: &'a Metadata, size_of_collections: usize) -> Self {
        Self {
            metadata,
            size_of_collections,
        }
    }

    fn bp(&self, id: BlueprintId) -> &'a Blueprint {
        self.metadata.blueprint(id)
    }

    /// The value a blueprint takes in the base template, if it takes one.
    fn property_value(&self, bp: &Blueprint, var: &str) -> Option<Value> {
        if bp.is_selector() {
            let default = bp.default.as_ref()?;
            let mut value = vec![("value", Value::String(scalar_string(default)))];
            if let Some(template) = self.metadata.default_template(bp) {
                value.push(("selected_option", Value::String(template.name.clone())));
            }
            let mut map = Mapping::new();
            for (k, v) in value {
                map.insert(Value::String(k.into()), v);
            }
            return Some(Value::Mapping(map));
        }
        if bp.is_multi_select() {
            if let [only] = bp.options.as_slice() {
                return Some(wrap(Value::Sequence(vec![Value::String(scalar_string(only))])));
            }
            return match &bp.default {
                Some(Value::Sequence(items)) => Some(wrap(Value::Sequence(
                    items.iter().map(|i| Value::String(scalar_string(i))).collect(),
                ))),
                _ => None,
            };
        }
        if bp.is_certificate() {
            return Some(wrap(certificate(var)));
        }
        if bp.is_secret() {
            return Some(wrap(mapping([("secret", placeholder(var))])));
        }
        if bp.is_simple_credentials() {
            return Some(wrap(simple_credentials(var)));
        }
        Some(wrap(placeholder(var)))
    }

    /// One collection row with a placeholder for each sub-property.
    fn collection_row(&self, children: &[BlueprintId], var: &str, configurable_only: bool) -> Value {
        let mut row = Mapping::new();
        for &child in children {
            let sub = self.bp(child);
            if configurable_only && !sub.configurable {
                continue;
            }
            let name = format!("{var}_{}", sub.name);
            let value = if sub.is_secret() {
                mapping([("secret", placeholder(&name))])
            } else if sub.is_certificate() {
                certificate(&name)
            } else if sub.is_simple_credentials() {
                simple_credentials(&name)
            } else {
                placeholder(&name)
            };
            row.insert(Value::String(sub.name.clone()), value);
        }
        Value::Mapping(row)
    }

    /// A required collection: its default rows, or one placeholder row.
    fn collection_value(&self, bp: &Blueprint, var: &str) -> Value {
        let first = format!("{var}_0");
        let rows = match &bp.default {
            Some(Value::Sequence(defaults)) => defaults
                .iter()
                .map(|row| {
                    let mut filled = Mapping::new();
                    if let Value::Mapping(given) = row {
                        for (k, v) in given {
                            if !v.is_null() {
                                filled.insert(k.clone(), v.clone());
                            }
                        }
                    }
                    for &child in &bp.children {
                        let sub = &self.bp(child).name;
                        let key = Value::String(sub.clone());
                        if !filled.contains_key(&key) {
                            filled.insert(key, placeholder(&format!("{first}_{sub}")));
                        }
                    }
                    Value::Mapping(filled)
                })
                .collect(),
            _ => vec![self.collection_row(&bp.children, &first, true)],
        };
        wrap(Value::Sequence(rows))
    }

    /// The first `count` rows of a collection, each fully parameterized.
    fn collection_rows(&self, bp: &Blueprint, var: &str, count: usize) -> Value {
        wrap(Value::Sequence(
            (0..count)
                .map(|i| self.collection_row(&bp.children, &format!("{var}_{i}"), false))
                .collect(),
        ))
    }

    pub fn product_properties(&self) -> BTreeMap<String, Value> {
        let mut properties = BTreeMap::new();
        for Property { reference, blueprint } in self.metadata.all_properties() {
            let bp = self.bp(blueprint);
            let key = reference.trim_start_matches('.').to_string();
            let var = var_name(&reference);

            if bp.configurable && bp.is_required() && !bp.is_dropdown() && !bp.is_generated() {
                let value = if bp.is_collection() {
                    Some(self.collection_value(bp, &var))
                } else {
                    self.property_value(bp, &var)
                };
                if let Some(value) = value {
                    properties.insert(key.clone(), value);
                }
            }

            if bp.is_selector() {
                if let Some(template) = self.metadata.default_template(bp) {
                    for &child in &template.children {
                        let sub = self.bp(child);
                        if sub.configurable && sub.is_required() && !sub.is_dropdown() && !sub.is_generated() {
                            let sub_reference = format!("{key}.{}.{}", template.name, sub.name);
                            if let Some(value) = self.property_value(sub, &var_name(&sub_reference)) {
                                properties.insert(sub_reference, value);
                            }
                        }
                    }
                }
            }
        }
        properties
    }

    fn add_default(bp: &Blueprint, var: String, vars: &mut BTreeMap<String, Value>) {
        if bp.is_credential() {
            return;
        }
        match &bp.default {
            Some(Value::Sequence(_)) if !bp.is_multi_select() => {}
            Some(default) => {
                vars.insert(var, default.clone());
            }
            None if bp.is_bool() => {
                vars.insert(var, Value::Bool(false));
            }
            None => {}
        }
    }

    /// Defaults for every placeholder in the base template that has one.
    pub fn default_vars(&self) -> BTreeMap<String, Value> {
        let mut vars = BTreeMap::new();
        for Property { reference, blueprint } in self.metadata.all_properties() {
            let bp = self.bp(blueprint);
            if bp.is_multi_select() {
                continue;
            }
            let var = var_name(&reference);

            if bp.configurable && bp.is_required() {
                if bp.is_collection() {
                    if !matches!(bp.default, Some(Value::Sequence(_))) {
                        for &child in &bp.children {
                            let sub = self.bp(child);
                            if sub.configurable {
                                Self::add_default(sub, format!("{var}_0_{}", sub.name), &mut vars);
                            }
                        }
                    }
                } else if !bp.is_selector() && !bp.is_dropdown() && !bp.is_generated() {
                    Self::add_default(bp, var.clone(), &mut vars);
                }
            }

            if bp.is_selector() {
                if let Some(template) = self.metadata.default_template(bp) {
                    for &child in &template.children {
                        let sub = self.bp(child);
                        if sub.configurable && sub.is_required() && !sub.is_dropdown() {
                            Self::add_default(sub, format!("{var}_{}_{}", template.name, sub.name), &mut vars);
                        }
                    }
                }
            }
        }
        vars
    }

    pub fn network_properties(&self) -> Option<Value> {
        if self.metadata.jobs.is_empty() {
            return None;
        }
        let mut network = vec![
            ("network", mapping([("name", placeholder("network_name"))])),
            (
                "other_availability_zones",
                Value::Sequence(vec![mapping([("name", placeholder("singleton_availability_zone"))])]),
            ),
            (
                "singleton_availability_zone",
                mapping([("name", placeholder("singleton_availability_zone"))]),
            ),
        ];
        if self.metadata.uses_service_network() {
            network.push((
                "service_network",
                mapping([("name", placeholder("service_network_name"))]),
            ));
        }
        network.sort_by(|a, b| a.0.cmp(b.0));
        let mut map = Mapping::new();
        for (k, v) in network {
            map.insert(Value::String(k.into()), v);
        }
        Some(Value::Mapping(map))
    }

    /// Ops files spreading the deployment over more availability zones.
    pub fn network_ops(&self) -> OpsFiles {
        let mut files = OpsFiles::new();
        if self.metadata.jobs.is_empty() {
            return files;
        }
        for count in [2usize, 3] {
            let mut zones = vec![mapping([("name", placeholder("singleton_availability_zone"))])];
            for n in 2..=count {
                zones.push(mapping([("name", placeholder(&format!("az{n}_name")))]));
            }
            files.insert(
                format!("{count}-az-configuration"),
                vec![Op::replace(
                    "/network-properties/other_availability_zones".into(),
                    Value::Sequence(zones),
                )],
            );
        }
        files
    }

    fn included_jobs(&self) -> impl Iterator<Item = (String, &'a super::metadata::Job)> {
        self.metadata
            .jobs
            .iter()
            .filter(|j| j.is_included())
            .map(|j| (j.name.replace('.', "_"), j))
    }

    pub fn resource_config(&self) -> BTreeMap<String, Value> {
        let mut config = BTreeMap::new();
        for (name, job) in self.included_jobs() {
            let mut resource = Mapping::new();
            resource.insert(
                Value::String("instance_type".into()),
                mapping([("id", placeholder(&format!("{name}_instance_type")))]),
            );
            if job.instances_configurable {
                resource.insert(
                    Value::String("instances".into()),
                    placeholder(&format!("{name}_instances")),
                );
            }
            if job.persistent_disk_configurable {
                resource.insert(
                    Value::String("persistent_disk".into()),
                    mapping([("size_mb", placeholder(&format!("{name}_persistent_disk_size")))]),
                );
            }
            config.insert(job.name.clone(), Value::Mapping(resource));
        }
        config
    }

    pub fn resource_vars(&self) -> BTreeMap<String, Value> {
        let automatic = || Value::String("automatic".into());
        let mut vars = BTreeMap::new();
        for (name, job) in self.included_jobs() {
            if job.instances_configurable {
                vars.insert(format!("{name}_instances"), automatic());
            }
            vars.insert(format!("{name}_instance_type"), automatic());
            if job.persistent_disk_configurable {
                vars.insert(format!("{name}_persistent_disk_size"), automatic());
            }
        }
        vars
    }

    pub fn resource_ops(&self) -> OpsFiles {
        let mut files = OpsFiles::new();
        for (name, job) in self.included_jobs() {
            for attribute in [
                "elb_names",
                "internet_connected",
                "additional_vm_extensions",
                "nsx_security_groups",
            ] {
                files.insert(
                    format!("{name}_{attribute}"),
                    vec![Op::replace(
                        format!("/resource-config?/{}?/{attribute}?", job.name),
                        placeholder(&format!("{name}_{attribute}")),
                    )],
                );
            }
        }
        files
    }

    fn errands(&self) -> impl Iterator<Item = (&'a str, &'static str)> {
        self.metadata
            .post_deploy_errands
            .iter()
            .map(|e| (e.as_str(), "post-deploy-state"))
            .chain(
                self.metadata
                    .pre_delete_errands
                    .iter()
                    .map(|e| (e.as_str(), "pre-delete-state")),
            )
    }

    pub fn errand_config(&self) -> BTreeMap<String, Value> {
        let mut config: BTreeMap<String, Mapping> = BTreeMap::new();
        for (errand, state) in self.errands() {
            config.entry(errand.to_string()).or_default().insert(
                Value::String(state.into()),
                placeholder(&format!("{errand}_{}", state.replace('-', "_"))),
            );
        }
        config
            .into_iter()
            .map(|(k, v)| (k, Value::Mapping(v)))
            .collect()
    }

    pub fn errand_vars(&self) -> BTreeMap<String, Value> {
        self.errands()
            .map(|(errand, state)| {
                (
                    format!("{errand}_{}", state.replace('-', "_")),
                    Value::String("default".into()),
                )
            })
            .collect()
    }

    pub fn template(&self) -> Template {
        Template {
            product_name: self.metadata.name.clone(),
            network_properties: self.network_properties(),
            product_properties: self.product_properties(),
            resource_config: self.resource_config(),
            errand_config: self.errand_config(),
        }
    }

    /// Placeholders of the base template that no vars file supplies.
    pub fn required_vars(&self, template: &Template) -> BTreeMap<String, Value> {
        let mut names = BTreeSet::new();
        for value in template.product_properties.values() {
            placeholders(value, &mut names);
        }
        if let Some(network) = &template.network_properties {
            placeholders(network, &mut names);
        }
        let defaults = self.default_vars();
        names
            .into_iter()
            .filter(|n| !defaults.contains_key(n))
            .map(|n| (n, Value::String(String::new())))
            .collect()
    }

    fn multi_select_ops(reference: &str, bp: &Blueprint, files: &mut OpsFiles) {
        for option in &bp.options {
            let option = scalar_string(option);
            files.insert(
                format!("{}_{option}", ops_file_name(reference)),
                vec![Op::replace(
                    format!("{}/value/-", product_path(reference)),
                    Value::String(option),
                )],
            );
        }
    }

    /// Ops files switching selectors and toggling multi-select options.
    pub fn feature_ops(&self) -> OpsFiles {
        let mut files = OpsFiles::new();
        for Property { reference, blueprint } in self.metadata.all_properties() {
            let bp = self.bp(blueprint);
            let key = reference.trim_start_matches('.');

            if bp.is_multi_select() && bp.options.len() > 1 {
                Self::multi_select_ops(key, bp, &mut files);
            }
            if !bp.is_selector() {
                continue;
            }

            let default = self.metadata.default_template(bp);
            for &template_id in &bp.templates {
                let template = self.metadata.template(template_id);
                if default.is_some_and(|d| d.name == template.name) {
                    continue;
                }
                let selector_reference = format!("{key}.{}", template.name);

                let mut ops = vec![Op::replace(
                    product_path(key),
                    mapping([
                        ("selected_option", Value::String(template.name.clone())),
                        ("value", Value::String(template.select_value.clone())),
                    ]),
                )];
                if let Some(default) = default {
                    for &child in &default.children {
                        ops.push(Op::remove(product_path(&format!(
                            "{key}.{}.{}",
                            default.name,
                            self.bp(child).name
                        ))));
                    }
                }
                for &child in &template.children {
                    let sub = self.bp(child);
                    let sub_reference = format!("{selector_reference}.{}", sub.name);
                    if sub.is_multi_select() && sub.options.len() > 1 {
                        Self::multi_select_ops(&sub_reference, sub, &mut files);
                    }
                    if sub.configurable && sub.is_required() && !sub.is_dropdown() && !sub.is_generated() {
                        if let Some(value) = self.property_value(sub, &var_name(&sub_reference)) {
                            ops.push(Op::replace(product_path(&sub_reference), value));
                        }
                    }
                }
                files.insert(ops_file_name(&selector_reference), ops);
            }
        }
        files
    }

    /// Ops files for optional properties, dropdowns and collection sizes.
    pub fn optional_ops(&self) -> OpsFiles {
        let mut files = OpsFiles::new();
        for Property { reference, blueprint } in self.metadata.all_properties() {
            let bp = self.bp(blueprint);
            if !bp.configurable {
                continue;
            }
            let key = reference.trim_start_matches('.');
            let var = var_name(&reference);
            let name = ops_file_name(&reference);

            if bp.is_selector() {
                for &template_id in &bp.templates {
                    let template = self.metadata.template(template_id);
                    for &child in &template.children {
                        let sub = self.bp(child);
                        if sub.configurable && (!sub.is_required() || sub.is_dropdown()) {
                            let sub_reference = format!("{key}.{}.{}", template.name, sub.name);
                            if let Some(value) = self.property_value(sub, &var_name(&sub_reference)) {
                                files.insert(
                                    format!("add-{}", ops_file_name(&sub_reference)),
                                    vec![Op::replace(product_path(&sub_reference), value)],
                                );
                            }
                        }
                    }
                }
            } else if bp.is_collection() {
                let first = if bp.is_required() { 2 } else { 1 };
                for count in first..=self.size_of_collections {
                    files.insert(
                        format!("add-{count}-{name}"),
                        vec![Op::replace(product_path(key), self.collection_rows(bp, &var, count))],
                    );
                }
            } else if bp.is_dropdown() || !bp.is_required() {
                if let Some(value) = self.property_value(bp, &var) {
                    files.insert(format!("add-{name}"), vec![Op::replace(product_path(key), value)]);
                }
            }
        }
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configtemplate::metadata::tests::TILE;

    fn yaml(doc: &str) -> Value {
        serde_yaml::from_str(doc).unwrap()
    }

    fn metadata() -> Metadata {
        Metadata::parse(TILE.as_bytes()).unwrap()
    }

    #[test]
    fn test_names() {
        assert_eq!(var_name(".properties.foo.bar"), "foo_bar");
        assert_eq!(ops_file_name(".properties.plan.large_option"), "plan-large_option");
        assert_eq!(var_name(".web.tuning"), "web_tuning");
    }

    #[test]
    fn test_product_properties() {
        let metadata = metadata();
        let properties = Generator::new(&metadata, 10).product_properties();

        assert_eq!(properties["properties.domain"], yaml("value: ((domain))"));
        assert_eq!(
            properties["properties.ssl"],
            yaml("value: {cert_pem: ((ssl_certificate)), private_key_pem: ((ssl_privatekey))}")
        );
        assert_eq!(
            properties["properties.admin"],
            yaml("value: {identity: ((admin_identity)), password: ((admin_password))}")
        );
        assert_eq!(properties["properties.api_key"], yaml("value: {secret: ((api_key))}"));
        assert_eq!(
            properties["properties.plan"],
            yaml("value: small\nselected_option: small_option")
        );
        assert_eq!(
            properties["properties.plan.small_option.size"],
            yaml("value: ((plan_small_option_size))")
        );
        assert_eq!(
            properties["properties.plan.small_option.token"],
            yaml("value: {secret: ((plan_small_option_token))}")
        );
        assert_eq!(properties["properties.features"], yaml("value: [alpha]"));
        assert_eq!(properties["properties.only_one"], yaml("value: [solo]"));
        assert_eq!(
            properties["properties.routes"],
            yaml("value: [{host: ((routes_0_host)), password: {secret: ((routes_0_password))}}]")
        );
        assert_eq!(properties["web.tuning"], yaml("value: ((web_tuning))"));

        for absent in [
            "properties.guid",
            "properties.worker_vm",
            "properties.banner",
            "properties.internal",
            "properties.plan.large_option.size",
        ] {
            assert!(!properties.contains_key(absent), "{absent} should not be in product.yml");
        }
    }

    #[test]
    fn test_default_and_required_vars() {
        let metadata = metadata();
        let generator = Generator::new(&metadata, 10);
        let defaults = generator.default_vars();
        assert_eq!(defaults["port"], yaml("8080"));
        assert_eq!(defaults["instances_enabled"], Value::Bool(false));
        assert_eq!(defaults["plan_small_option_size"], yaml("1"));
        assert_eq!(defaults["web_tuning"], yaml("3"));
        assert!(!defaults.contains_key("api_key"));
        assert!(!defaults.contains_key("plan_small_option_token"));
        assert!(!defaults.contains_key("features"));

        let template = generator.template();
        let required = generator.required_vars(&template);
        let names: Vec<&str> = required.keys().map(String::as_str).collect();
        assert!(names.contains(&"domain"));
        assert!(names.contains(&"ssl_certificate"));
        assert!(names.contains(&"network_name"));
        assert!(names.contains(&"plan_small_option_label"));
        assert!(!names.contains(&"port"));
    }

    #[test]
    fn test_selector_feature_replaces_and_removes() {
        let metadata = metadata();
        let features = Generator::new(&metadata, 10).feature_ops();

        let large = &features["plan-large_option"];
        assert_eq!(
            large[0],
            Op::replace(
                "/product-properties/properties.plan?".into(),
                yaml("selected_option: large_option\nvalue: large")
            )
        );
        assert!(large.contains(&Op::remove(
            "/product-properties/properties.plan.small_option.size?".into()
        )));
        assert!(large.contains(&Op::remove(
            "/product-properties/properties.plan.small_option.label?".into()
        )));
        assert!(large.contains(&Op::remove(
            "/product-properties/properties.plan.small_option.token?".into()
        )));
        assert!(large.contains(&Op::replace(
            "/product-properties/properties.plan.large_option.size?".into(),
            yaml("value: ((plan_large_option_size))")
        )));
        assert!(!features.contains_key("plan-small_option"));

        assert_eq!(
            features["features_beta"],
            vec![Op::replace(
                "/product-properties/properties.features?/value/-".into(),
                Value::String("beta".into())
            )]
        );
        assert!(!features.contains_key("only_one_solo"));
    }

    #[test]
    fn test_optional_ops() {
        let metadata = metadata();
        let optional = Generator::new(&metadata, 3).optional_ops();
        let names: Vec<&str> = optional.keys().map(String::as_str).collect();
        assert_eq!(
            names,
            vec![
                "add-2-routes",
                "add-3-routes",
                "add-banner",
                "add-plan-large_option-disk",
                "add-worker_vm",
            ]
        );
        let rows = optional["add-2-routes"][0].value.as_ref().unwrap();
        assert_eq!(
            rows["value"][1]["host"],
            Value::String("((routes_1_host))".into())
        );
    }

    #[test]
    fn test_resources_errands_network() {
        let metadata = metadata();
        let generator = Generator::new(&metadata, 10);

        assert_eq!(
            generator.resource_config()["web"],
            yaml("instance_type: {id: ((web_instance_type))}\ninstances: ((web_instances))\npersistent_disk: {size_mb: ((web_persistent_disk_size))}")
        );
        assert!(!generator.resource_config().contains_key("compilation"));
        assert_eq!(generator.resource_vars()["web_instances"], yaml("automatic"));
        assert_eq!(generator.resource_ops().len(), 4);

        assert_eq!(
            generator.errand_config()["smoke-tests"],
            yaml("post-deploy-state: ((smoke-tests_post_deploy_state))")
        );
        assert_eq!(generator.errand_vars()["cleanup_pre_delete_state"], yaml("default"));

        let network = generator.network_ops();
        let three = network["3-az-configuration"][0].value.as_ref().unwrap();
        assert_eq!(three.as_sequence().unwrap().len(), 3);
    }
}
