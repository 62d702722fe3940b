//! Tile metadata as the generator sees it.
//!
//! Blueprints and option templates refer to each other recursively, so the
//! parsed document is flattened into an arena: every blueprint and template
//! gets a stable index and references are stored as indices.

use serde::Deserialize;
use serde_yaml::Value;

use super::TemplateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlueprintId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateId(usize);

/// One property blueprint.
#[derive(Debug, Clone)]
pub struct Blueprint {
    pub name: String,
    pub kind: String,
    pub configurable: bool,
    pub optional: bool,
    pub default: Option<Value>,
    /// Names of the declared options (multi-select and dropdowns).
    pub options: Vec<Value>,
    pub templates: Vec<TemplateId>,
    pub children: Vec<BlueprintId>,
}

impl Blueprint {
    pub fn is_required(&self) -> bool {
        !self.optional
    }

    pub fn is_selector(&self) -> bool {
        self.kind == "selector"
    }

    pub fn is_collection(&self) -> bool {
        self.kind == "collection"
    }

    pub fn is_multi_select(&self) -> bool {
        self.kind == "multi_select_options"
    }

    pub fn is_secret(&self) -> bool {
        self.kind == "secret"
    }

    pub fn is_simple_credentials(&self) -> bool {
        self.kind == "simple_credentials"
    }

    pub fn is_certificate(&self) -> bool {
        self.kind == "rsa_cert_credentials"
    }

    pub fn is_credential(&self) -> bool {
        self.is_secret() || self.is_simple_credentials() || self.is_certificate()
    }

    pub fn is_bool(&self) -> bool {
        self.kind == "boolean"
    }

    pub fn is_dropdown(&self) -> bool {
        self.kind == "vm_type_dropdown" || self.kind == "disk_type_dropdown"
    }

    /// Types the base template never sets.
    pub fn is_generated(&self) -> bool {
        self.kind == "uuid"
    }

    pub fn uses_service_network(&self) -> bool {
        self.kind == "service_network_az_multi_select"
            || self.kind == "service_network_az_single_select"
    }
}

/// One option of a selector.
#[derive(Debug, Clone)]
pub struct OptionTemplate {
    pub name: String,
    pub select_value: String,
    pub children: Vec<BlueprintId>,
}

#[derive(Debug, Clone, Default)]
pub struct Job {
    pub name: String,
    pub instances_configurable: bool,
    pub default_instances: i64,
    pub persistent_disk_configurable: bool,
    pub properties: Vec<BlueprintId>,
}

impl Job {
    /// Jobs that end up in the deployment.
    pub fn is_included(&self) -> bool {
        !self.name.contains('.') && (self.instances_configurable || self.default_instances > 0)
    }
}

/// A property blueprint reachable from the top of the document, with the
/// reference the appliance knows it by.
#[derive(Debug, Clone)]
pub struct Property {
    pub reference: String,
    pub blueprint: BlueprintId,
}

#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub name: String,
    pub version: String,
    blueprints: Vec<Blueprint>,
    templates: Vec<OptionTemplate>,
    pub properties: Vec<BlueprintId>,
    pub jobs: Vec<Job>,
    pub post_deploy_errands: Vec<String>,
    pub pre_delete_errands: Vec<String>,
}

impl Metadata {
    pub fn parse(raw: &[u8]) -> Result<Self, TemplateError> {
        let doc: RawMetadata =
            serde_yaml::from_slice(raw).map_err(|e| TemplateError::Metadata(e.to_string()))?;

        let version = if doc.product_version.is_empty() {
            doc.provides_product_versions
                .first()
                .map(|v| scalar_string(&v.version))
                .unwrap_or_default()
        } else {
            doc.product_version
        };

        let mut metadata = Self {
            name: doc.name,
            version,
            ..Self::default()
        };
        metadata.properties = doc
            .property_blueprints
            .into_iter()
            .map(|raw| metadata.insert(raw))
            .collect();
        for raw_job in doc.job_types {
            let properties = raw_job
                .property_blueprints
                .into_iter()
                .map(|raw| metadata.insert(raw))
                .collect();
            let persistent_disk_configurable = raw_job
                .resource_definitions
                .iter()
                .any(|r| r.name == "persistent_disk" && r.configurable);
            metadata.jobs.push(Job {
                name: raw_job.name,
                instances_configurable: raw_job.instance_definition.configurable,
                default_instances: raw_job.instance_definition.default.as_i64().unwrap_or(0),
                persistent_disk_configurable,
                properties,
            });
        }
        metadata.post_deploy_errands = doc.post_deploy_errands.into_iter().map(|e| e.name).collect();
        metadata.pre_delete_errands = doc.pre_delete_errands.into_iter().map(|e| e.name).collect();
        Ok(metadata)
    }

    fn insert(&mut self, raw: RawBlueprint) -> BlueprintId {
        let id = BlueprintId(self.blueprints.len());
        self.blueprints.push(Blueprint {
            name: raw.name,
            kind: raw.kind,
            configurable: is_true(&raw.configurable),
            optional: raw.optional,
            default: raw.default.filter(|v| !v.is_null()),
            options: raw.options.into_iter().map(|o| o.name).collect(),
            templates: Vec::new(),
            children: Vec::new(),
        });

        let children = raw
            .property_blueprints
            .into_iter()
            .map(|child| self.insert(child))
            .collect();
        let mut templates = Vec::new();
        for raw_template in raw.option_templates {
            let template_children = raw_template
                .property_blueprints
                .into_iter()
                .map(|child| self.insert(child))
                .collect();
            templates.push(TemplateId(self.templates.len()));
            self.templates.push(OptionTemplate {
                name: raw_template.name,
                select_value: scalar_string(&raw_template.select_value),
                children: template_children,
            });
        }

        let blueprint = &mut self.blueprints[id.0];
        blueprint.children = children;
        blueprint.templates = templates;
        id
    }

    pub fn blueprint(&self, id: BlueprintId) -> &Blueprint {
        &self.blueprints[id.0]
    }

    pub fn template(&self, id: TemplateId) -> &OptionTemplate {
        &self.templates[id.0]
    }

    /// Every configurable surface: top-level product properties followed by
    /// job-scoped ones.
    pub fn all_properties(&self) -> Vec<Property> {
        let mut all: Vec<Property> = self
            .properties
            .iter()
            .map(|&id| Property {
                reference: format!(".properties.{}", self.blueprint(id).name),
                blueprint: id,
            })
            .collect();
        for job in &self.jobs {
            all.extend(job.properties.iter().map(|&id| Property {
                reference: format!(".{}.{}", job.name, self.blueprint(id).name),
                blueprint: id,
            }));
        }
        all
    }

    /// The option template a selector's default points at.
    pub fn default_template(&self, selector: &Blueprint) -> Option<&OptionTemplate> {
        let default = scalar_string(selector.default.as_ref()?);
        selector
            .templates
            .iter()
            .map(|&t| self.template(t))
            .find(|t| t.select_value.eq_ignore_ascii_case(&default))
    }

    pub fn uses_service_network(&self) -> bool {
        self.blueprints.iter().any(Blueprint::uses_service_network)
    }
}

/// Render a YAML scalar the way it reads in the document.
pub fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

fn is_true(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

#[derive(Deserialize)]
struct RawMetadata {
    #[serde(default)]
    name: String,
    #[serde(default, deserialize_with = "string_or_number")]
    product_version: String,
    #[serde(default)]
    provides_product_versions: Vec<RawProvidedVersion>,
    #[serde(default)]
    property_blueprints: Vec<RawBlueprint>,
    #[serde(default)]
    job_types: Vec<RawJob>,
    #[serde(default)]
    post_deploy_errands: Vec<RawErrand>,
    #[serde(default)]
    pre_delete_errands: Vec<RawErrand>,
}

#[derive(Deserialize)]
struct RawProvidedVersion {
    #[serde(default)]
    version: Value,
}

#[derive(Deserialize)]
struct RawBlueprint {
    #[serde(default)]
    name: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    configurable: Value,
    #[serde(default)]
    optional: bool,
    #[serde(default)]
    default: Option<Value>,
    #[serde(default)]
    options: Vec<RawOption>,
    #[serde(default)]
    option_templates: Vec<RawOptionTemplate>,
    #[serde(default)]
    property_blueprints: Vec<RawBlueprint>,
}

#[derive(Deserialize)]
struct RawOption {
    #[serde(default)]
    name: Value,
}

#[derive(Deserialize)]
struct RawOptionTemplate {
    #[serde(default)]
    name: String,
    #[serde(default)]
    select_value: Value,
    #[serde(default)]
    property_blueprints: Vec<RawBlueprint>,
}

#[derive(Deserialize)]
struct RawJob {
    #[serde(default)]
    name: String,
    #[serde(default)]
    instance_definition: RawInstanceDefinition,
    #[serde(default)]
    resource_definitions: Vec<RawResourceDefinition>,
    #[serde(default)]
    property_blueprints: Vec<RawBlueprint>,
}

#[derive(Deserialize, Default)]
struct RawInstanceDefinition {
    #[serde(default)]
    configurable: bool,
    #[serde(default)]
    default: Value,
}

#[derive(Deserialize)]
struct RawResourceDefinition {
    #[serde(default)]
    name: String,
    #[serde(default)]
    configurable: bool,
}

#[derive(Deserialize)]
struct RawErrand {
    name: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(scalar_string(&value))
}
