//! Global options: the appliance connection settings.

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde_yaml::Value;

use super::binder::{layer_global, parse_global, Bound};
use super::spec::OptionSpec;
use super::BindError;
use crate::interpolate;
use crate::network::{
    Credentials, StackConfig, TransportConfig, DEFAULT_CONNECT_TIMEOUT_SECS,
    DEFAULT_REQUEST_TIMEOUT_SECS,
};
use crate::target::{Target, TargetError};

/// Global option table.
pub const GLOBAL_OPTIONS: &[OptionSpec] = &[
    OptionSpec::string("ca-cert", "OpsManager CA certificate path or value").env("OM_CA_CERT"),
    OptionSpec::string("client-id", "Client ID for the Ops Manager VM (not required for unauthenticated commands)").short('c').env("OM_CLIENT_ID"),
    OptionSpec::string("client-secret", "Client Secret for the Ops Manager VM (not required for unauthenticated commands)").short('s').env("OM_CLIENT_SECRET"),
    OptionSpec::int("connect-timeout", "timeout in seconds to make TCP connections").short('o').env("OM_CONNECT_TIMEOUT").default("10"),
    OptionSpec::string("decryption-passphrase", "Passphrase to decrypt the installation if the Ops Manager VM has been rebooted (optional for most commands)").short('d').env("OM_DECRYPTION_PASSPHRASE"),
    OptionSpec::string("env", "env file with login credentials").short('e'),
    OptionSpec::string("password", "admin password for the Ops Manager VM (not required for unauthenticated commands)").short('p').env("OM_PASSWORD"),
    OptionSpec::int("request-timeout", "timeout in seconds for HTTP requests to Ops Manager").short('r').env("OM_REQUEST_TIMEOUT").default("1800"),
    OptionSpec::flag("skip-ssl-validation", "skip ssl certificate validation during http requests").short('k').env("OM_SKIP_SSL_VALIDATION"),
    OptionSpec::string("target", "location of the Ops Manager VM").short('t').env("OM_TARGET"),
    OptionSpec::flag("trace", "prints HTTP requests and response payloads").env("OM_TRACE"),
    OptionSpec::string("uaa-target", "optional location of the Ops Manager UAA").env("OM_UAA_TARGET"),
    OptionSpec::string("username", "admin username for the Ops Manager VM (not required for unauthenticated commands)").short('u').env("OM_USERNAME"),
    OptionSpec::string("vars-env", "load vars from environment variables by specifying a prefix (e.g.: 'MY' to load MY_var=value)").env("OM_VARS_ENV"),
    OptionSpec::flag("version", "prints the om release version").short('v'),
];

/// Keys an `--env` file may carry.
const ENV_FILE_KEYS: &[&str] = &[
    "ca-cert",
    "client-id",
    "client-secret",
    "connect-timeout",
    "decryption-passphrase",
    "password",
    "request-timeout",
    "skip-ssl-validation",
    "target",
    "trace",
    "uaa-target",
    "username",
];

/// Fields that must not keep a placeholder after the env file is read.
const SECRET_FIELDS: &[(&str, &str)] = &[
    ("decryption-passphrase", "OM_DECRYPTION_PASSPHRASE"),
    ("client-id", "OM_CLIENT_ID"),
    ("client-secret", "OM_CLIENT_SECRET"),
    ("password", "OM_PASSWORD"),
    ("target", "OM_TARGET"),
    ("username", "OM_USERNAME"),
];

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(\(.*\)\)").unwrap());

/// Resolved global options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalOptions {
    pub target: Option<String>,
    pub uaa_target: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub decryption_passphrase: Option<String>,
    pub ca_cert: Option<String>,
    pub skip_ssl_validation: bool,
    pub connect_timeout: u64,
    pub request_timeout: u64,
    pub trace: bool,
    pub env_file: Option<String>,
    pub vars_env: Option<String>,
    pub help: bool,
    pub version: bool,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self {
            target: None,
            uaa_target: None,
            username: None,
            password: None,
            client_id: None,
            client_secret: None,
            decryption_passphrase: None,
            ca_cert: None,
            skip_ssl_validation: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT_SECS,
            trace: false,
            env_file: None,
            vars_env: None,
            help: false,
            version: false,
        }
    }
}

/// Global options plus the command that follows them.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub global: GlobalOptions,
    pub command: Option<(String, Vec<String>)>,
}

fn seconds(bound: &Bound, long: &str, default: u64) -> u64 {
    u64::try_from(bound.int(long)).ok().filter(|s| *s > 0).unwrap_or(default)
}

impl GlobalOptions {
    fn from_bound(bound: &Bound) -> Self {
        let text = |long: &str| bound.str(long).map(str::to_string);
        Self {
            target: text("target"),
            uaa_target: text("uaa-target"),
            username: text("username"),
            password: text("password"),
            client_id: text("client-id"),
            client_secret: text("client-secret"),
            decryption_passphrase: text("decryption-passphrase"),
            ca_cert: text("ca-cert"),
            skip_ssl_validation: bound.flag("skip-ssl-validation"),
            connect_timeout: seconds(bound, "connect-timeout", DEFAULT_CONNECT_TIMEOUT_SECS),
            request_timeout: seconds(bound, "request-timeout", DEFAULT_REQUEST_TIMEOUT_SECS),
            trace: bound.flag("trace"),
            env_file: text("env"),
            vars_env: text("vars-env"),
            help: bound.help(),
            version: bound.flag("version"),
        }
    }

    /// Settings for the HTTP client stacks.
    pub fn stack_config(&self) -> Result<StackConfig, TargetError> {
        let target = Target::parse(
            self.target.as_deref().unwrap_or_default(),
            self.uaa_target.as_deref(),
        )?;
        let mut config = StackConfig::new(target);
        config.credentials = Credentials::from_options(
            self.username.as_deref(),
            self.password.as_deref(),
            self.client_id.as_deref(),
            self.client_secret.as_deref(),
        );
        config.decryption_passphrase.clone_from(&self.decryption_passphrase);
        config.transport = TransportConfig {
            skip_ssl_validation: self.skip_ssl_validation,
            ca_cert: self.ca_cert.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            request_timeout: Duration::from_secs(self.request_timeout),
        };
        config.trace = self.trace;
        Ok(config)
    }

    fn check_placeholders(&self) -> Result<(), BindError> {
        let value = |long: &str| match long {
            "decryption-passphrase" => self.decryption_passphrase.as_deref(),
            "client-id" => self.client_id.as_deref(),
            "client-secret" => self.client_secret.as_deref(),
            "password" => self.password.as_deref(),
            "target" => self.target.as_deref(),
            "username" => self.username.as_deref(),
            _ => None,
        };
        let hints: Vec<String> = SECRET_FIELDS
            .iter()
            .filter(|(long, _)| value(long).is_some_and(|v| PLACEHOLDER.is_match(v)))
            .map(|(long, env)| format!("* use {env} environment variable for the {long} value"))
            .collect();
        if hints.is_empty() {
            Ok(())
        } else {
            Err(BindError::EnvPlaceholders(hints))
        }
    }
}

fn load_env_file(
    path: &str,
    vars_env: Option<&str>,
    env: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, Value>, BindError> {
    if let Err(e) = std::fs::metadata(path) {
        return Err(BindError::EnvFileMissing(e.to_string()));
    }
    let options = interpolate::Options {
        vars_env: vars_env.map(|p| vec![p.to_string()]).unwrap_or_default(),
        expect_all_keys: false,
        ..interpolate::Options::default()
    };
    let document = interpolate::execute_file(path, &options, env)?;
    let mapping: BTreeMap<String, Value> = match document {
        Value::Null => BTreeMap::new(),
        other => serde_yaml::from_value(other)
            .map_err(|e| BindError::EnvFile(e.to_string()))?,
    };

    let unknown: Vec<String> = mapping
        .keys()
        .filter(|k| !ENV_FILE_KEYS.contains(&k.as_str()))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(BindError::UnknownEnvKeys(unknown));
    }
    Ok(mapping)
}

/// Parse global options and locate the command.
pub fn parse(args: &[String], env: &BTreeMap<String, String>) -> Result<Invocation, BindError> {
    let (matches, command) = parse_global(GLOBAL_OPTIONS, args)?;
    let bound = layer_global(GLOBAL_OPTIONS, &matches, env, &BTreeMap::new())?;

    let global = match bound.str("env") {
        None => GlobalOptions::from_bound(&bound),
        Some(path) => {
            let file = load_env_file(path, bound.str("vars-env"), env)?;
            let bound = layer_global(GLOBAL_OPTIONS, &matches, env, &file)?;
            let global = GlobalOptions::from_bound(&bound);
            global.check_placeholders()?;
            global
        }
    };

    Ok(Invocation { global, command })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Classify;
    use std::io::Write;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    fn env_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_splits_globals_from_command() {
        let invocation = parse(
            &args(&["-t", "https://opsman", "-k", "upload-product", "--product", "p.pivotal"]),
            &BTreeMap::new(),
        )
        .unwrap();

        assert_eq!(invocation.global.target.as_deref(), Some("https://opsman"));
        assert!(invocation.global.skip_ssl_validation);
        assert_eq!(invocation.global.connect_timeout, 10);
        assert_eq!(invocation.global.request_timeout, 1800);
        let (name, rest) = invocation.command.unwrap();
        assert_eq!(name, "upload-product");
        assert_eq!(rest, ["--product", "p.pivotal"]);
    }

    #[test]
    fn test_env_vars_fill_globals() {
        let env = BTreeMap::from([
            ("OM_TARGET".to_string(), "opsman.example.com".to_string()),
            ("OM_CONNECT_TIMEOUT".to_string(), "30".to_string()),
        ]);
        let invocation = parse(&args(&["version"]), &env).unwrap();
        assert_eq!(invocation.global.target.as_deref(), Some("opsman.example.com"));
        assert_eq!(invocation.global.connect_timeout, 30);
    }

    #[test]
    fn test_env_file_sits_below_env_vars_and_flags() {
        let file = env_file("target: from-file\nusername: file-user\npassword: file-pass\n");
        let env = BTreeMap::from([("OM_USERNAME".to_string(), "env-user".to_string())]);
        let invocation = parse(
            &args(&["--env", file.path().to_str().unwrap(), "-p", "cli-pass", "curl"]),
            &env,
        )
        .unwrap();

        assert_eq!(invocation.global.target.as_deref(), Some("from-file"));
        assert_eq!(invocation.global.username.as_deref(), Some("env-user"));
        assert_eq!(invocation.global.password.as_deref(), Some("cli-pass"));
    }

    #[test]
    fn test_env_file_unknown_key() {
        let file = env_file("target: t\ntargt: typo\n");
        let err = parse(&args(&["--env", file.path().to_str().unwrap()]), &BTreeMap::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "could not parse env file: unknown key(s): targt");
        assert_eq!(err.kind(), crate::error::ErrorKind::ConfigKeyUnknown);
    }

    #[test]
    fn test_env_file_placeholders_are_reported() {
        let file = env_file("target: t\npassword: ((password))\n");
        let err = parse(&args(&["--env", file.path().to_str().unwrap()]), &BTreeMap::new())
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("env file contains YAML placeholders. Pleases provide them via interpolation or environment variables."));
        assert!(message.contains("* use OM_PASSWORD environment variable for the password value"));
    }

    #[test]
    fn test_env_file_interpolates_vars_env() {
        let file = env_file("target: t\npassword: ((password))\n");
        let env = BTreeMap::from([
            ("OM_VARS_ENV".to_string(), "MY".to_string()),
            ("MY_password".to_string(), "secret".to_string()),
        ]);
        let invocation = parse(&args(&["--env", file.path().to_str().unwrap()]), &env).unwrap();
        assert_eq!(invocation.global.password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_unknown_global_flag() {
        assert!(parse(&args(&["--bogus", "curl"]), &BTreeMap::new()).is_err());
    }
}
