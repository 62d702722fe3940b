//! `((var))` interpolation of YAML documents.
//!
//! Evaluation order: ops files are applied, then placeholders are
//! substituted, then `path` (if any) extracts a sub-document.
//!
//! Variable precedence, highest first: `--var`, `--vars-file` (later files
//! win), `--vars-env` prefixes.

mod patch;
mod template;
mod vars;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_yaml::Value;
use thiserror::Error;
use tracing::debug;

use crate::error::{Classify, ErrorKind};

pub use patch::{Op, Pointer};
pub use template::{has_placeholders, Substitution};
pub use vars::Variables;

/// Errors raised while interpolating.
#[derive(Error, Debug)]
pub enum InterpolateError {
    #[error("could not read file ({path}): {reason}")]
    ReadFile { path: String, reason: String },

    #[error("could not unmarshal file ({path}): {reason}")]
    Unmarshal { path: String, reason: String },

    #[error("Could not deserialize YAML from environment variable {0:?}")]
    EnvYaml(String),

    #[error("--var must be in the form name=value, got {0:?}")]
    CliVar(String),

    #[error("Expected to find variables: {}", .0.join("\n"))]
    MissingVars(Vec<String>),

    #[error("Invalid type for embedded variable '{0}'. Embedded variables must be strings, integers, booleans or null")]
    EmbeddedType(String),

    #[error("Building ops ({0})")]
    Ops(String),

    #[error("cannot parse path: {0}")]
    Path(String),

    #[error("could not parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Classify for InterpolateError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingVars(_) => ErrorKind::MissingVars,
            _ => ErrorKind::Other,
        }
    }
}

/// Inputs of one interpolation.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub vars_env: Vec<String>,
    pub vars_files: Vec<PathBuf>,
    pub vars: Vec<String>,
    pub ops_files: Vec<PathBuf>,
    pub expect_all_keys: bool,
    pub path: Option<String>,
}

impl Options {
    /// Options that fail on any unresolved placeholder.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            expect_all_keys: true,
            ..Self::default()
        }
    }

    /// Build the variable scope these options describe.
    pub fn variables(&self, environ: &BTreeMap<String, String>) -> Result<Variables, InterpolateError> {
        let mut vars = Variables::new();
        vars.add_env(&self.vars_env, environ)?;
        for file in &self.vars_files {
            vars.add_file(file)?;
        }
        vars.add_cli(&self.vars)?;
        Ok(vars)
    }

    fn ops(&self) -> Result<Vec<Op>, InterpolateError> {
        let mut ops = Vec::new();
        for file in &self.ops_files {
            let contents = read(file)?;
            ops.extend(Op::parse_all(&contents).map_err(|e| match e {
                InterpolateError::Yaml(e) => InterpolateError::Unmarshal {
                    path: file.display().to_string(),
                    reason: e.to_string(),
                },
                other => other,
            })?);
        }
        Ok(ops)
    }
}

fn read(path: &Path) -> Result<String, InterpolateError> {
    std::fs::read_to_string(path).map_err(|e| InterpolateError::ReadFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Apply ops, substitute placeholders and extract `path`.
pub fn evaluate(
    document: Value,
    vars: &Variables,
    ops: &[Op],
    expect_all_keys: bool,
    path: Option<&Pointer>,
) -> Result<Value, InterpolateError> {
    let mut document = document;
    for op in ops {
        op.apply(&mut document)?;
    }

    let mut substitution = Substitution::new(vars);
    let document = substitution.apply(document)?;
    let missing = substitution.missing();
    if expect_all_keys && !missing.is_empty() {
        return Err(InterpolateError::MissingVars(missing));
    }
    if !missing.is_empty() {
        debug!(count = missing.len(), "leaving unresolved placeholders in place");
    }

    match path.filter(|p| p.is_set()) {
        Some(pointer) => Ok(pointer.find(&document)?.clone()),
        None => Ok(document),
    }
}

/// Interpolate YAML text.
pub fn execute(
    contents: &str,
    options: &Options,
    environ: &BTreeMap<String, String>,
) -> Result<Value, InterpolateError> {
    let vars = options.variables(environ)?;
    let ops = options.ops()?;
    let path = options.path.as_deref().map(Pointer::parse).transpose()?;
    let document: Value = serde_yaml::from_str(contents)?;
    evaluate(document, &vars, &ops, options.expect_all_keys, path.as_ref())
}

/// Interpolate the YAML file at `template`.
pub fn execute_file(
    template: impl AsRef<Path>,
    options: &Options,
    environ: &BTreeMap<String, String>,
) -> Result<Value, InterpolateError> {
    let contents = read(template.as_ref())?;
    execute(&contents, options, environ)
}

/// Render a document back to YAML text.
pub fn render(value: &Value) -> Result<String, InterpolateError> {
    Ok(serde_yaml::to_string(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn file(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_precedence_cli_over_files_over_env() {
        let first = file("name: from-file-1\nregion: file-region\n");
        let second = file("name: from-file-2\n");
        let environ = BTreeMap::from([
            ("OM_VAR_name".to_string(), "from-env".to_string()),
            ("OM_VAR_zone".to_string(), "env-zone".to_string()),
        ]);

        let options = Options {
            vars_env: vec!["OM_VAR".into()],
            vars_files: vec![first.path().into(), second.path().into()],
            ..Options::strict()
        };
        let value = execute("{name: ((name)), region: ((region)), zone: ((zone))}", &options, &environ)
            .unwrap();
        assert_eq!(value["name"], Value::String("from-file-2".into()));
        assert_eq!(value["region"], Value::String("file-region".into()));
        assert_eq!(value["zone"], Value::String("env-zone".into()));

        let options = Options {
            vars: vec!["name=from-cli".into()],
            ..options
        };
        let value = execute("{name: ((name)), region: r, zone: z}", &options, &environ).unwrap();
        assert_eq!(value["name"], Value::String("from-cli".into()));
    }

    #[test]
    fn test_missing_vars_listed() {
        let err = execute("{a: ((b)), c: ((a))}", &Options::strict(), &BTreeMap::new()).unwrap_err();
        assert_eq!(err.to_string(), "Expected to find variables: a\nb");
        assert_eq!(err.kind(), ErrorKind::MissingVars);
    }

    #[test]
    fn test_partial_interpolation_leaves_placeholders() {
        let value = execute("{a: ((b))}", &Options::default(), &BTreeMap::new()).unwrap();
        assert_eq!(value["a"], Value::String("((b))".into()));
    }

    #[test]
    fn test_idempotent() {
        let options = Options {
            vars: vec!["x=1".into(), "y=two".into()],
            ..Options::strict()
        };
        let once = execute("{a: ((x)), b: pre-((y)), c: [((y))]}", &options, &BTreeMap::new()).unwrap();
        let rendered = render(&once).unwrap();
        let twice = execute(&rendered, &options, &BTreeMap::new()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_ops_and_path() {
        let ops = file("- type: replace\n  path: /name\n  value: ((new_name))\n");
        let options = Options {
            ops_files: vec![ops.path().into()],
            vars: vec!["new_name=Alice".into()],
            path: Some("/name".into()),
            ..Options::strict()
        };
        let value = execute("{name: Bob}", &options, &BTreeMap::new()).unwrap();
        assert_eq!(render(&value).unwrap(), "Alice\n");
    }

    #[test]
    fn test_missing_template_file() {
        let err = execute_file("unknown.txt", &Options::default(), &BTreeMap::new()).unwrap_err();
        assert!(err.to_string().starts_with("could not read file (unknown.txt): "));
    }
}
