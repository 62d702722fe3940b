//! Option tables and the binder that fills them.

mod binder;
mod global;
mod help;
mod spec;

use thiserror::Error;

use crate::error::{Classify, ErrorKind};
use crate::interpolate::InterpolateError;

pub use binder::{bind, parse_duration, Bound, BoundValue, FileLayer};
pub use global::{parse, GlobalOptions, Invocation, GLOBAL_OPTIONS};
pub use help::{command_usage, global_usage};
pub use spec::{CommandSpec, ConfigMode, OptionKind, OptionSpec, CONFIG_FLAG_OPTIONS};

fn quoted(flags: &[String]) -> String {
    flags
        .iter()
        .map(|f| format!("{f:?}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Errors raised while binding options.
#[derive(Error, Debug)]
pub enum BindError {
    #[error("unknown flag(s) [{}] for command '{command}'\nSee 'om {command} --help' for available options.", quoted(.flags))]
    UnknownFlags { command: String, flags: Vec<String> },

    #[error("{0}")]
    Parse(String),

    #[error("invalid value {value:?} for flag --{flag}: expected {expected}")]
    InvalidValue {
        flag: String,
        value: String,
        expected: String,
    },

    #[error("missing required flag \"--{0}\"")]
    MissingRequired(String),

    #[error("could not load the config file: {0}")]
    Config(#[from] InterpolateError),

    #[error("{0}")]
    ConfigFormat(String),

    #[error("unknown key(s) in config file: {}", .0.join(", "))]
    UnknownConfigKeys(Vec<String>),

    #[error("env file does not exist: {0}")]
    EnvFileMissing(String),

    #[error("could not parse env file: {0}")]
    EnvFile(String),

    #[error("could not parse env file: unknown key(s): {}", .0.join(", "))]
    UnknownEnvKeys(Vec<String>),

    #[error("found problem in --env file: env file contains YAML placeholders. Pleases provide them via interpolation or environment variables.\n{}\nOr, to enable interpolation of env.yml with variables from env-vars,\nset the OM_VARS_ENV env var and put export the needed vars.", .0.join("\n"))]
    EnvPlaceholders(Vec<String>),
}

impl Classify for BindError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(e) => e.kind(),
            Self::UnknownConfigKeys(_) | Self::UnknownEnvKeys(_) => ErrorKind::ConfigKeyUnknown,
            Self::EnvPlaceholders(_) => ErrorKind::MissingVars,
            _ => ErrorKind::Other,
        }
    }
}
