//! Binds option tables from defaults, environment, config files and argv.
//!
//! Precedence, lowest first: declared default, environment variable,
//! config file, command line. The global `--env` file is the exception: it
//! sits below environment variables.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde_yaml::Value;
use tracing::debug;

use super::spec::{CommandSpec, ConfigMode, OptionKind, OptionSpec};
use super::BindError;
use crate::interpolate;

/// A bound option value.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Duration(Duration),
    List(Vec<String>),
}

/// Where the file layer sits relative to environment variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileLayer {
    AboveEnv,
    BelowEnv,
}

/// Result of binding one option table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bound {
    values: HashMap<&'static str, BoundValue>,
    help: bool,
}

impl Bound {
    /// Whether `-h`/`--help` was given.
    #[must_use]
    pub fn help(&self) -> bool {
        self.help
    }

    /// Whether an option ended up with any value.
    #[must_use]
    pub fn is_set(&self, long: &str) -> bool {
        self.values.contains_key(long)
    }

    /// String value, or `None` when unset or empty.
    #[must_use]
    pub fn str(&self, long: &str) -> Option<&str> {
        match self.values.get(long) {
            Some(BoundValue::Str(s)) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    /// String value or the empty string.
    #[must_use]
    pub fn string(&self, long: &str) -> String {
        self.str(long).unwrap_or_default().to_string()
    }

    /// Integer value, zero when unset.
    #[must_use]
    pub fn int(&self, long: &str) -> i64 {
        match self.values.get(long) {
            Some(BoundValue::Int(n)) => *n,
            _ => 0,
        }
    }

    /// Boolean value, false when unset.
    #[must_use]
    pub fn flag(&self, long: &str) -> bool {
        matches!(self.values.get(long), Some(BoundValue::Bool(true)))
    }

    /// Duration value.
    #[must_use]
    pub fn duration(&self, long: &str) -> Option<Duration> {
        match self.values.get(long) {
            Some(BoundValue::Duration(d)) => Some(*d),
            _ => None,
        }
    }

    /// Repeated values, empty when unset.
    #[must_use]
    pub fn list(&self, long: &str) -> &[String] {
        match self.values.get(long) {
            Some(BoundValue::List(values)) => values,
            _ => &[],
        }
    }

    /// Set a value directly.
    pub fn set(&mut self, long: &'static str, value: BoundValue) {
        self.values.insert(long, value);
    }
}

/// Build a clap parser for the tokenizing step only.
fn clap_command(name: &'static str, options: &[&'static OptionSpec]) -> Command {
    let mut command = Command::new(name)
        .no_binary_name(true)
        .disable_help_flag(true)
        .disable_version_flag(true)
        .disable_help_subcommand(true)
        .args_override_self(true)
        .arg(
            Arg::new("help")
                .long("help")
                .short('h')
                .action(ArgAction::SetTrue),
        );

    for spec in options {
        let mut arg = Arg::new(spec.long).long(spec.long);
        if let Some(short) = spec.short {
            arg = arg.short(short);
        }
        arg = match spec.kind {
            OptionKind::Bool => arg
                .action(ArgAction::Set)
                .num_args(0..=1)
                .require_equals(true)
                .default_missing_value("true"),
            OptionKind::Repeated => arg.action(ArgAction::Append).allow_hyphen_values(true),
            OptionKind::String | OptionKind::Int | OptionKind::Duration => {
                arg.action(ArgAction::Set).allow_hyphen_values(true)
            }
        };
        command = command.arg(arg);
    }
    command
}

/// Flags in `args` that no option declares.
///
/// Values of value-taking flags are skipped even when they look like flags.
fn unknown_flags(options: &[&'static OptionSpec], args: &[String]) -> Vec<String> {
    let mut known: HashMap<String, bool> = HashMap::new();
    for spec in options {
        known.insert(format!("--{}", spec.long), spec.kind.takes_value());
        if let Some(short) = spec.short {
            known.insert(format!("-{short}"), spec.kind.takes_value());
        }
    }
    known.insert("--help".into(), false);
    known.insert("-h".into(), false);

    let mut unknown = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        if !arg.starts_with('-') {
            break;
        }
        let (name, has_value) = match arg.split_once('=') {
            Some((name, _)) => (name, true),
            None => (arg.as_str(), false),
        };
        match known.get(name) {
            None => {
                unknown.push(name.to_string());
                i += 1;
            }
            Some(true) if !has_value => i += 2,
            Some(_) => i += 1,
        }
    }
    unknown
}

fn clap_message(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .next()
        .unwrap_or_default()
        .trim_start_matches("error: ")
        .to_string()
}

fn cli_values(matches: &ArgMatches, spec: &OptionSpec) -> Option<Vec<String>> {
    if matches.value_source(spec.long) != Some(ValueSource::CommandLine) {
        return None;
    }
    matches
        .get_many::<String>(spec.long)
        .map(|values| values.cloned().collect())
}

/// Render a config-file value as flag text.
fn yaml_values(value: &Value) -> Vec<String> {
    match value {
        Value::Sequence(items) => items.iter().flat_map(yaml_values).collect(),
        Value::String(s) => vec![s.clone()],
        Value::Number(n) => vec![n.to_string()],
        Value::Bool(b) => vec![b.to_string()],
        Value::Null => vec![String::new()],
        other => vec![serde_yaml::to_string(other)
            .unwrap_or_default()
            .trim_end()
            .to_string()],
    }
}

/// Parse `1h30m`, `45s`, `250ms`.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw == "0" {
        return Some(Duration::ZERO);
    }
    let mut total = 0f64;
    let mut rest = raw;
    if rest.is_empty() {
        return None;
    }
    while !rest.is_empty() {
        let split = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(split);
        let number: f64 = number.parse().ok()?;
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let scale = match unit {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return None,
        };
        total += number * scale;
        rest = tail;
    }
    Some(Duration::from_secs_f64(total))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" | "" => Some(false),
        _ => None,
    }
}

fn convert(spec: &OptionSpec, mut raw: Vec<String>) -> Result<BoundValue, BindError> {
    let invalid = |value: &str, expected: &str| BindError::InvalidValue {
        flag: spec.long.to_string(),
        value: value.to_string(),
        expected: expected.to_string(),
    };

    if spec.kind == OptionKind::Repeated {
        return Ok(BoundValue::List(raw));
    }
    let value = raw.pop().unwrap_or_default();
    match spec.kind {
        OptionKind::String => Ok(BoundValue::Str(value)),
        OptionKind::Int => value
            .trim()
            .parse()
            .map(BoundValue::Int)
            .map_err(|_| invalid(&value, "an integer")),
        OptionKind::Bool => parse_bool(value.trim())
            .map(BoundValue::Bool)
            .ok_or_else(|| invalid(&value, "a boolean")),
        OptionKind::Duration => parse_duration(&value)
            .map(BoundValue::Duration)
            .ok_or_else(|| invalid(&value, "a duration")),
        OptionKind::Repeated => Ok(BoundValue::List(vec![value])),
    }
}

/// Layer values for `options` and check required ones.
fn layer(
    options: &[&'static OptionSpec],
    matches: &ArgMatches,
    env: &BTreeMap<String, String>,
    file: &BTreeMap<String, Value>,
    file_layer: FileLayer,
) -> Result<Bound, BindError> {
    let mut bound = Bound {
        help: matches.get_flag("help"),
        ..Bound::default()
    };

    for spec in options {
        let default = spec.default.map(|d| vec![d.to_string()]);
        let from_env = spec
            .env
            .and_then(|name| env.get(name))
            .filter(|v| !v.is_empty())
            .map(|v| {
                if spec.kind == OptionKind::Repeated {
                    v.split(',').map(str::to_string).collect()
                } else {
                    vec![v.clone()]
                }
            });
        let from_file = file.get(spec.long).map(yaml_values);
        let from_cli = cli_values(matches, spec);

        let layers = match file_layer {
            FileLayer::AboveEnv => [default, from_env, from_file, from_cli],
            FileLayer::BelowEnv => [default, from_file, from_env, from_cli],
        };
        if let Some(raw) = layers.into_iter().flatten().last() {
            bound.values.insert(spec.long, convert(spec, raw)?);
        }
    }

    if !bound.help {
        for spec in options.iter().filter(|s| s.required) {
            let present = match bound.values.get(spec.long) {
                Some(BoundValue::Str(s)) => !s.is_empty(),
                Some(BoundValue::List(l)) => !l.is_empty(),
                Some(_) => true,
                None => false,
            };
            if !present {
                return Err(BindError::MissingRequired(spec.long.to_string()));
            }
        }
    }
    Ok(bound)
}

fn config_values(
    command: &str,
    options: &[&'static OptionSpec],
    matches: &ArgMatches,
    env: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, Value>, BindError> {
    let Some(path) = matches.get_one::<String>("config").filter(|p| !p.is_empty()) else {
        return Ok(BTreeMap::new());
    };

    let cli = |name: &str| -> Vec<String> {
        matches
            .get_many::<String>(name)
            .map(|v| v.cloned().collect())
            .unwrap_or_default()
    };
    let mut vars_env = cli("vars-env");
    if vars_env.is_empty() {
        if let Some(prefix) = env.get("OM_VARS_ENV").filter(|p| !p.is_empty()) {
            vars_env.push(prefix.clone());
        }
    }

    let options_for_file = interpolate::Options {
        vars_env,
        vars_files: cli("vars-file").into_iter().map(Into::into).collect(),
        vars: cli("var"),
        ..interpolate::Options::strict()
    };
    let document = interpolate::execute_file(path, &options_for_file, env)?;
    debug!(command, config = %path, "loaded config file");

    let mapping: BTreeMap<String, Value> = match document {
        Value::Null => BTreeMap::new(),
        other => serde_yaml::from_value(other)
            .map_err(|e| BindError::ConfigFormat(format!("failed to unmarshal config file {path}: {e}")))?,
    };

    let unknown: Vec<String> = mapping
        .keys()
        .filter(|k| !options.iter().any(|o| o.long == k.as_str()))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(BindError::UnknownConfigKeys(unknown));
    }
    Ok(mapping)
}

/// Bind a command's options from `args` and `env`.
pub fn bind(
    spec: &CommandSpec,
    args: &[String],
    env: &BTreeMap<String, String>,
) -> Result<Bound, BindError> {
    let options: Vec<&'static OptionSpec> = spec.all_options().collect();

    let unknown = unknown_flags(&options, args);
    if !unknown.is_empty() {
        return Err(BindError::UnknownFlags {
            command: spec.name.to_string(),
            flags: unknown,
        });
    }

    let matches = clap_command(spec.name, &options)
        .try_get_matches_from(args)
        .map_err(|e| BindError::Parse(clap_message(&e)))?;

    let file = if spec.config == ConfigMode::Flags && !matches.get_flag("help") {
        config_values(spec.name, &options, &matches, env)?
    } else {
        BTreeMap::new()
    };

    layer(&options, &matches, env, &file, FileLayer::AboveEnv)
}

/// Split argv into global options and the command invocation.
pub(crate) fn parse_global(
    options: &'static [OptionSpec],
    args: &[String],
) -> Result<(ArgMatches, Option<(String, Vec<String>)>), BindError> {
    let specs: Vec<&'static OptionSpec> = options.iter().collect();
    let command = clap_command("om", &specs)
        .allow_external_subcommands(true)
        .external_subcommand_value_parser(clap::value_parser!(String));

    let matches = command
        .try_get_matches_from(args)
        .map_err(|e| BindError::Parse(clap_message(&e)))?;

    let invocation = matches.subcommand().map(|(name, sub)| {
        let rest = sub
            .get_many::<String>("")
            .map(|v| v.cloned().collect())
            .unwrap_or_default();
        (name.to_string(), rest)
    });
    Ok((matches, invocation))
}

/// Layer already-tokenized global options.
pub(crate) fn layer_global(
    options: &'static [OptionSpec],
    matches: &ArgMatches,
    env: &BTreeMap<String, String>,
    file: &BTreeMap<String, Value>,
) -> Result<Bound, BindError> {
    let specs: Vec<&'static OptionSpec> = options.iter().collect();
    layer(&specs, matches, env, file, FileLayer::BelowEnv)
}
