//! Ops files: `replace` and `remove` operations over YAML documents.
//!
//! Paths are `/`-separated tokens: a map key, a sequence index, `-` to
//! append, or `name=value` to pick the sequence element whose `name` key
//! equals `value`. A trailing `?` makes the token, and everything after it,
//! optional: missing parts are created by `replace` and ignored by `remove`.

use std::fmt;

use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use super::InterpolateError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Key { name: String, optional: bool },
    Index(usize),
    Append,
    Match { key: String, value: String, optional: bool },
}

/// Parsed ops path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pointer {
    tokens: Vec<Token>,
}

impl Pointer {
    /// Parse `/a/0/name=x?/-`.
    pub fn parse(raw: &str) -> Result<Self, InterpolateError> {
        if raw.is_empty() || raw == "/" {
            return Ok(Self::default());
        }
        let Some(rest) = raw.strip_prefix('/') else {
            return Err(InterpolateError::Path(format!(
                "Expected to start with '/' but was '{raw}'"
            )));
        };

        let mut tokens = Vec::new();
        let mut optional = false;
        for segment in rest.split('/') {
            let (segment, marked) = match segment.strip_suffix('?') {
                Some(s) => (s, true),
                None => (segment, false),
            };
            optional |= marked;

            let segment = segment.replace("~1", "/").replace("~0", "~");
            let token = if segment == "-" {
                Token::Append
            } else if let Ok(index) = segment.parse::<usize>() {
                Token::Index(index)
            } else if let Some((key, value)) = segment.split_once('=') {
                Token::Match {
                    key: key.to_string(),
                    value: value.to_string(),
                    optional,
                }
            } else {
                Token::Key {
                    name: segment,
                    optional,
                }
            };
            tokens.push(token);
        }
        Ok(Self { tokens })
    }

    /// Whether the pointer addresses anything below the root.
    #[must_use]
    pub fn is_set(&self) -> bool {
        !self.tokens.is_empty()
    }

    /// Read the value at this pointer.
    pub fn find<'a>(&self, doc: &'a Value) -> Result<&'a Value, InterpolateError> {
        let mut current = doc;
        for (i, token) in self.tokens.iter().enumerate() {
            let missing = || InterpolateError::Path(format!("could not find '{}'", self.prefix(i + 1)));
            current = match token {
                Token::Key { name, .. } => current.as_mapping().and_then(|m| m.get(name.as_str())),
                Token::Index(index) => current.as_sequence().and_then(|s| s.get(*index)),
                Token::Match { key, value, .. } => current
                    .as_sequence()
                    .and_then(|s| s.iter().find(|item| matches(item, key, value))),
                Token::Append => None,
            }
            .ok_or_else(missing)?;
        }
        Ok(current)
    }

    fn prefix(&self, len: usize) -> String {
        let shown = Self {
            tokens: self.tokens[..len].to_vec(),
        };
        shown.to_string()
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tokens.is_empty() {
            return write!(f, "/");
        }
        for token in &self.tokens {
            match token {
                Token::Key { name, optional } => {
                    write!(f, "/{name}{}", if *optional { "?" } else { "" })?;
                }
                Token::Index(i) => write!(f, "/{i}")?,
                Token::Append => write!(f, "/-")?,
                Token::Match {
                    key,
                    value,
                    optional,
                } => write!(f, "/{key}={value}{}", if *optional { "?" } else { "" })?,
            }
        }
        Ok(())
    }
}

fn matches(item: &Value, key: &str, value: &str) -> bool {
    match item.as_mapping().and_then(|m| m.get(key)) {
        Some(Value::String(s)) => s == value,
        Some(Value::Number(n)) => n.to_string() == value,
        Some(Value::Bool(b)) => b.to_string() == value,
        _ => false,
    }
}

#[derive(Debug, Deserialize)]
struct OpDefinition {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    #[serde(default)]
    value: Option<Value>,
}

/// One ops-file operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Replace { path: Pointer, value: Value },
    Remove { path: Pointer },
}

impl Op {
    /// Parse an ops file document.
    pub fn parse_all(contents: &str) -> Result<Vec<Self>, InterpolateError> {
        let definitions: Option<Vec<OpDefinition>> = serde_yaml::from_str(contents)?;
        definitions
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(i, def)| {
                let path = Pointer::parse(&def.path)?;
                match def.kind.as_str() {
                    "replace" => Ok(Self::Replace {
                        path,
                        value: def.value.unwrap_or(Value::Null),
                    }),
                    "remove" => Ok(Self::Remove { path }),
                    other => Err(InterpolateError::Ops(format!(
                        "Unknown operation [{i}] with type '{other}'"
                    ))),
                }
            })
            .collect()
    }

    /// Apply the operation to `doc`.
    pub fn apply(&self, doc: &mut Value) -> Result<(), InterpolateError> {
        match self {
            Self::Replace { path, value } => replace(doc, &path.tokens, value.clone(), path),
            Self::Remove { path } => {
                if path.tokens.is_empty() {
                    return Err(InterpolateError::Ops("Cannot remove entire document".into()));
                }
                remove(doc, &path.tokens, path)
            }
        }
    }
}

fn is_optional(token: &Token) -> bool {
    matches!(
        token,
        Token::Key { optional: true, .. } | Token::Match { optional: true, .. }
    )
}

fn empty_for(next: Option<&Token>) -> Value {
    match next {
        Some(Token::Append | Token::Index(_) | Token::Match { .. }) => Value::Sequence(Vec::new()),
        _ => Value::Mapping(Mapping::new()),
    }
}

fn replace(
    node: &mut Value,
    tokens: &[Token],
    value: Value,
    path: &Pointer,
) -> Result<(), InterpolateError> {
    let Some((token, rest)) = tokens.split_first() else {
        *node = value;
        return Ok(());
    };

    if node.is_null() && is_optional(token) {
        *node = empty_for(Some(token));
    }

    match token {
        Token::Key { name, optional } => {
            let map = node.as_mapping_mut().ok_or_else(|| not_a(path, "map"))?;
            if !map.contains_key(name.as_str()) {
                if !optional {
                    return Err(InterpolateError::Ops(format!(
                        "Expected to find a map key '{name}' for path '{path}'"
                    )));
                }
                map.insert(Value::String(name.clone()), empty_for(rest.first()));
            }
            let child = map
                .get_mut(name.as_str())
                .ok_or_else(|| not_a(path, "map"))?;
            replace(child, rest, value, path)
        }
        Token::Index(index) => {
            let seq = node.as_sequence_mut().ok_or_else(|| not_a(path, "array"))?;
            let len = seq.len();
            let child = seq.get_mut(*index).ok_or_else(|| {
                InterpolateError::Ops(format!(
                    "Expected to find array index {index} but found array of length {len} for path '{path}'"
                ))
            })?;
            replace(child, rest, value, path)
        }
        Token::Append => {
            if !rest.is_empty() {
                return Err(InterpolateError::Ops(format!(
                    "Expected '-' to be the last token in path '{path}'"
                )));
            }
            let seq = node.as_sequence_mut().ok_or_else(|| not_a(path, "array"))?;
            seq.push(value);
            Ok(())
        }
        Token::Match {
            key,
            value: wanted,
            optional,
        } => {
            let seq = node.as_sequence_mut().ok_or_else(|| not_a(path, "array"))?;
            let position = seq.iter().position(|item| matches(item, key, wanted));
            let index = match position {
                Some(i) => i,
                None if *optional => {
                    let mut entry = Mapping::new();
                    entry.insert(Value::String(key.clone()), Value::String(wanted.clone()));
                    seq.push(Value::Mapping(entry));
                    seq.len() - 1
                }
                None => {
                    return Err(InterpolateError::Ops(format!(
                        "Expected to find exactly one matching array item for path '{path}' but found 0"
                    )))
                }
            };
            replace(&mut seq[index], rest, value, path)
        }
    }
}

fn remove(node: &mut Value, tokens: &[Token], path: &Pointer) -> Result<(), InterpolateError> {
    let Some((token, rest)) = tokens.split_first() else {
        return Ok(());
    };

    match token {
        Token::Key { name, optional } => {
            let Some(map) = node.as_mapping_mut() else {
                return if *optional { Ok(()) } else { Err(not_a(path, "map")) };
            };
            if !map.contains_key(name.as_str()) {
                return if *optional {
                    Ok(())
                } else {
                    Err(InterpolateError::Ops(format!(
                        "Expected to find a map key '{name}' for path '{path}'"
                    )))
                };
            }
            if rest.is_empty() {
                map.shift_remove(name.as_str());
                return Ok(());
            }
            match map.get_mut(name.as_str()) {
                Some(child) => remove(child, rest, path),
                None => Ok(()),
            }
        }
        Token::Index(index) => {
            let seq = node.as_sequence_mut().ok_or_else(|| not_a(path, "array"))?;
            if *index >= seq.len() {
                return Err(InterpolateError::Ops(format!(
                    "Expected to find array index {index} for path '{path}'"
                )));
            }
            if rest.is_empty() {
                seq.remove(*index);
                return Ok(());
            }
            remove(&mut seq[*index], rest, path)
        }
        Token::Append => Err(InterpolateError::Ops(format!(
            "Cannot remove with '-' in path '{path}'"
        ))),
        Token::Match {
            key,
            value,
            optional,
        } => {
            let Some(seq) = node.as_sequence_mut() else {
                return if *optional { Ok(()) } else { Err(not_a(path, "array")) };
            };
            match seq.iter().position(|item| matches(item, key, value)) {
                Some(i) if rest.is_empty() => {
                    seq.remove(i);
                    Ok(())
                }
                Some(i) => remove(&mut seq[i], rest, path),
                None if *optional => Ok(()),
                None => Err(InterpolateError::Ops(format!(
                    "Expected to find exactly one matching array item for path '{path}' but found 0"
                ))),
            }
        }
    }
}

fn not_a(path: &Pointer, kind: &str) -> InterpolateError {
    InterpolateError::Ops(format!("Expected to find a {kind} at path '{path}'"))
}
