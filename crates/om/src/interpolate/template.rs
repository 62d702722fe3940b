//! Placeholder substitution over a YAML tree.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_yaml::{Mapping, Value};

use super::vars::Variables;
use super::InterpolateError;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\((!?[-/.A-Za-z0-9_]+)\)\)").unwrap());

/// Substitutes `((name))` placeholders from a [`Variables`] scope.
pub struct Substitution<'a> {
    vars: &'a Variables,
    missing: BTreeSet<String>,
}

impl<'a> Substitution<'a> {
    pub fn new(vars: &'a Variables) -> Self {
        Self {
            vars,
            missing: BTreeSet::new(),
        }
    }

    /// Names that had no value, sorted and unique.
    pub fn missing(&self) -> Vec<String> {
        self.missing.iter().cloned().collect()
    }

    pub fn apply(&mut self, value: Value) -> Result<Value, InterpolateError> {
        match value {
            Value::String(s) => self.apply_str(s),
            Value::Sequence(items) => items
                .into_iter()
                .map(|item| self.apply(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Sequence),
            Value::Mapping(map) => {
                let mut out = Mapping::with_capacity(map.len());
                for (key, value) in map {
                    let key = self.apply(key)?;
                    out.insert(key, self.apply(value)?);
                }
                Ok(Value::Mapping(out))
            }
            Value::Tagged(mut tagged) => {
                tagged.value = self.apply(tagged.value)?;
                Ok(Value::Tagged(tagged))
            }
            other => Ok(other),
        }
    }

    fn apply_str(&mut self, s: String) -> Result<Value, InterpolateError> {
        let whole = match PLACEHOLDER.captures(&s) {
            None => return Ok(Value::String(s)),
            Some(caps) if caps.get(0).is_some_and(|m| m.start() == 0 && m.end() == s.len()) => {
                Some(variable_name(&caps))
            }
            Some(_) => None,
        };

        if let Some(name) = whole {
            return Ok(match self.vars.lookup(&name) {
                Some(value) => value.clone(),
                None => {
                    self.missing.insert(name);
                    Value::String(s)
                }
            });
        }

        let mut failure = None;
        let replaced = PLACEHOLDER.replace_all(&s, |caps: &Captures| {
            let name = variable_name(caps);
            match self.vars.lookup(&name) {
                Some(value) => match scalar_text(value) {
                    Some(text) => text,
                    None => {
                        failure.get_or_insert(name);
                        caps[0].to_string()
                    }
                },
                None => {
                    self.missing.insert(name);
                    caps[0].to_string()
                }
            }
        });

        if let Some(name) = failure {
            return Err(InterpolateError::EmbeddedType(name));
        }
        Ok(Value::String(replaced.into_owned()))
    }
}

fn variable_name(caps: &Captures) -> String {
    caps[1].trim_start_matches('!').to_string()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

/// Whether a document still carries any placeholder.
pub fn has_placeholders(value: &Value) -> bool {
    match value {
        Value::String(s) => PLACEHOLDER.is_match(s),
        Value::Sequence(items) => items.iter().any(has_placeholders),
        Value::Mapping(map) => map
            .iter()
            .any(|(k, v)| has_placeholders(k) || has_placeholders(v)),
        Value::Tagged(tagged) => has_placeholders(&tagged.value),
        _ => false,
    }
}
