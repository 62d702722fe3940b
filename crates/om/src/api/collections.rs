//! Carry GUIDs of existing collection rows into updated properties.
//!
//! Ops Manager deletes and recreates any collection row submitted without a
//! `guid`. Rows that match an existing one, either field for field or by a
//! logical key such as `name`, get that row's GUID.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use super::{Api, ApiError, ResponseProperty};

static LOGICAL_KEYS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ["^name$", "^key$", "(?i)name$"]
        .iter()
        .map(|pattern| Regex::new(pattern).unwrap())
        .collect()
});

/// Fill in `guid` on every updated collection row that matches an existing row.
pub async fn assign_collection_guids(
    api: &Api,
    product_guid: &str,
    properties: &mut Value,
    current: &BTreeMap<String, ResponseProperty>,
) -> Result<(), ApiError> {
    let Some(properties) = properties.as_object_mut() else {
        return Ok(());
    };

    for (name, updated) in properties.iter_mut() {
        let Some(existing) = current.get(name).filter(|p| p.is_collection()) else {
            continue;
        };
        let Some(rows) = updated.get_mut("value").and_then(Value::as_array_mut) else {
            continue;
        };
        let existing = existing_rows(api, product_guid, name, existing).await?;
        for row in rows.iter_mut().filter_map(Value::as_object_mut) {
            if let Some(guid) = matching_guid(row, &existing) {
                debug!(property = %name, guid = %guid, "reusing collection row guid");
                row.insert("guid".into(), Value::String(guid));
            }
        }
    }
    Ok(())
}

struct ExistingRow {
    guid: String,
    /// Configurable field values, credentials resolved where possible.
    values: Map<String, Value>,
    /// Every field's plain value, for logical key lookups.
    fields: Map<String, Value>,
}

async fn existing_rows(
    api: &Api,
    product_guid: &str,
    name: &str,
    property: &ResponseProperty,
) -> Result<Vec<ExistingRow>, ApiError> {
    let mut rows = Vec::new();
    let Some(items) = property.value.as_array() else {
        return Ok(rows);
    };

    for (index, item) in items.iter().enumerate() {
        let Some(item) = item.as_object() else {
            continue;
        };
        let mut row = ExistingRow {
            guid: String::new(),
            values: Map::new(),
            fields: Map::new(),
        };
        for (field, descriptor) in item {
            let mut value = descriptor.get("value").cloned().unwrap_or(Value::Null);
            if field == "guid" {
                row.guid = value.as_str().unwrap_or_default().to_string();
                continue;
            }
            let is_credential = descriptor
                .get("credential")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if is_credential {
                let reference = format!("{name}[{index}].{field}");
                match api.deployed_product_credential(product_guid, &reference).await {
                    Ok(credential) => {
                        value = credential
                            .value
                            .into_iter()
                            .map(|(k, v)| (k, Value::String(v)))
                            .collect::<Map<_, _>>()
                            .into();
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
            row.fields.insert(field.clone(), value.clone());
            let configurable = descriptor
                .get("configurable")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if configurable {
                row.values.insert(field.clone(), value);
            }
        }
        rows.push(row);
    }
    Ok(rows)
}

fn matching_guid(updated: &Map<String, Value>, existing: &[ExistingRow]) -> Option<String> {
    if let Some(row) = existing.iter().find(|row| &row.values == updated) {
        return Some(row.guid.clone());
    }

    let key = logical_key(updated)?;
    let wanted = updated.get(&key)?.as_str()?;
    existing
        .iter()
        .rev()
        .find(|row| row.fields.get(&key).and_then(Value::as_str) == Some(wanted))
        .map(|row| row.guid.clone())
}

fn logical_key(row: &Map<String, Value>) -> Option<String> {
    let mut names: Vec<&String> = row.keys().collect();
    names.sort();
    LOGICAL_KEYS.iter().find_map(|pattern| {
        names
            .iter()
            .find(|name| pattern.is_match(name))
            .map(|name| (*name).clone())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows() -> Vec<ExistingRow> {
        let row = |guid: &str, name: &str, port: i64| ExistingRow {
            guid: guid.into(),
            values: json!({"name": name, "port": port}).as_object().unwrap().clone(),
            fields: json!({"name": name, "port": port}).as_object().unwrap().clone(),
        };
        vec![row("guid-a", "alpha", 80), row("guid-b", "beta", 443)]
    }

    #[test]
    fn test_equivalent_row_reuses_guid() {
        let updated = json!({"name": "beta", "port": 443});
        assert_eq!(
            matching_guid(updated.as_object().unwrap(), &rows()),
            Some("guid-b".into())
        );
    }

    #[test]
    fn test_logical_key_reuses_guid() {
        let updated = json!({"name": "alpha", "port": 8080});
        assert_eq!(
            matching_guid(updated.as_object().unwrap(), &rows()),
            Some("guid-a".into())
        );
    }

    #[test]
    fn test_new_row_has_no_guid() {
        let updated = json!({"name": "gamma", "port": 22});
        assert_eq!(matching_guid(updated.as_object().unwrap(), &rows()), None);
    }

    #[test]
    fn test_logical_key_preference() {
        let row = json!({"key": "k", "name": "n", "display_name": "d"});
        assert_eq!(logical_key(row.as_object().unwrap()), Some("name".into()));
        let row = json!({"key": "k", "display_name": "d"});
        assert_eq!(logical_key(row.as_object().unwrap()), Some("key".into()));
        let row = json!({"DisplayName": "d", "port": 1});
        assert_eq!(logical_key(row.as_object().unwrap()), Some("DisplayName".into()));
        assert_eq!(logical_key(json!({"port": 1}).as_object().unwrap()), None);
    }
}
