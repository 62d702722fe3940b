//! Variable scope: where `((name))` values come from.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde_yaml::{Mapping, Value};

use super::InterpolateError;

static QUOTED_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"^"\d+"$"#).unwrap());

/// Flat name → value map. Later writes win.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variables {
    values: Mapping,
}

impl Variables {
    /// Empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one variable.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(Value::String(name.into()), value);
    }

    /// Whether no variables are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Collect `PREFIX_name=value` pairs from `environ` for every prefix.
    ///
    /// Mappings and sequences are decoded as YAML; scalars stay strings.
    pub fn add_env<I, K, V>(&mut self, prefixes: &[String], environ: I) -> Result<(), InterpolateError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        if prefixes.is_empty() {
            return Ok(());
        }
        let environ: Vec<(K, V)> = environ.into_iter().collect();

        for prefix in prefixes {
            let prefix = format!("{prefix}_");
            for (key, raw) in &environ {
                let (key, raw) = (key.as_ref(), raw.as_ref());
                let Some(name) = key.strip_prefix(&prefix) else {
                    continue;
                };
                let decoded: Value = serde_yaml::from_str(raw)
                    .map_err(|_| InterpolateError::EnvYaml(key.to_string()))?;
                let value = match decoded {
                    Value::Mapping(_) | Value::Sequence(_) => decoded,
                    _ if QUOTED_NUMBER.is_match(raw) => {
                        Value::String(raw.trim_matches('"').to_string())
                    }
                    _ => Value::String(raw.to_string()),
                };
                self.insert(name, value);
            }
        }
        Ok(())
    }

    /// Merge a YAML vars file over the current values.
    pub fn add_file(&mut self, path: impl AsRef<Path>) -> Result<(), InterpolateError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| InterpolateError::ReadFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let values: Option<Mapping> =
            serde_yaml::from_str(&contents).map_err(|e| InterpolateError::Unmarshal {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        for (key, value) in values.unwrap_or_default() {
            self.values.insert(key, value);
        }
        Ok(())
    }

    /// Apply `name=value` pairs from the command line.
    ///
    /// Values are read as an integer, then a boolean, then a plain string.
    pub fn add_cli(&mut self, vars: &[String]) -> Result<(), InterpolateError> {
        for var in vars {
            let (name, raw) = var
                .split_once('=')
                .ok_or_else(|| InterpolateError::CliVar(var.clone()))?;
            let value = if let Ok(n) = raw.parse::<i64>() {
                Value::Number(n.into())
            } else if let Some(b) = parse_bool(raw) {
                Value::Bool(b)
            } else {
                Value::String(raw.to_string())
            };
            self.insert(name, value);
        }
        Ok(())
    }

    /// Resolve a placeholder name.
    ///
    /// The full name wins; otherwise the part before the first `.` names a
    /// variable and the rest walks into its value.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        if let Some(value) = self.values.get(name) {
            return Some(value);
        }
        let (head, rest) = name.split_once('.')?;
        let mut current = self.values.get(head)?;
        for key in rest.split('.') {
            current = current.as_mapping()?.get(key)?;
        }
        Some(current)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_vars_are_typed() {
        let mut vars = Variables::new();
        vars.add_cli(&[
            "count=3".to_string(),
            "enabled=true".to_string(),
            "name=bob".to_string(),
            "name=alice".to_string(),
        ])
        .unwrap();

        assert_eq!(vars.lookup("count"), Some(&Value::Number(3.into())));
        assert_eq!(vars.lookup("enabled"), Some(&Value::Bool(true)));
        assert_eq!(vars.lookup("name"), Some(&Value::String("alice".into())));
    }

    #[test]
    fn test_env_scalars_stay_strings() {
        let mut vars = Variables::new();
        vars.add_env(
            &["OM_VAR".to_string()],
            vec![
                ("OM_VAR_port", "8443"),
                ("OM_VAR_age", "\"123\""),
                ("OM_VAR_cert", "line one\nline two\n"),
                ("OM_VAR_map", "{a: 1}"),
                ("OTHER_x", "y"),
            ],
        )
        .unwrap();

        assert_eq!(vars.lookup("port"), Some(&Value::String("8443".into())));
        assert_eq!(vars.lookup("age"), Some(&Value::String("123".into())));
        assert_eq!(
            vars.lookup("cert"),
            Some(&Value::String("line one\nline two\n".into()))
        );
        assert!(vars.lookup("map").unwrap().is_mapping());
        assert!(vars.lookup("x").is_none());
    }

    #[test]
    fn test_env_invalid_yaml() {
        let err = Variables::new()
            .add_env(&["PREFIX".to_string()], vec![("PREFIX_name", "{]")])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"Could not deserialize YAML from environment variable "PREFIX_name""#
        );
    }

    #[test]
    fn test_dotted_lookup() {
        let mut vars = Variables::new();
        vars.insert(
            "cert",
            serde_yaml::from_str("{cert_pem: abc, private_key: def}").unwrap(),
        );
        vars.insert("a.b", Value::String("flat".into()));

        assert_eq!(vars.lookup("cert.cert_pem"), Some(&Value::String("abc".into())));
        assert_eq!(vars.lookup("a.b"), Some(&Value::String("flat".into())));
        assert!(vars.lookup("cert.missing").is_none());
    }
}
