//! Flat configuration state exchanged with the configuration engine.

use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// One element of a flattened nested block.
pub type FlatMap = Map<String, Value>;

/// Flat key/value configuration of a single cluster resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceData {
    /// Resource id, empty until the resource is created.
    #[serde(default)]
    id: String,
    /// Configuration values.
    #[serde(default)]
    values: FlatMap,
}

impl ResourceData {
    /// Empty state without an id.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing flat map.
    #[must_use]
    pub fn from_map(id: impl Into<String>, values: FlatMap) -> Self {
        Self {
            id: id.into(),
            values,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    /// The underlying flat map.
    #[must_use]
    pub fn values(&self) -> &FlatMap {
        &self.values
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Resolve a dotted path such as `master_profile.0.dns_name_prefix`.
    ///
    /// Returns `None` for missing keys and for unset values (null, empty
    /// string, empty list or map).
    #[must_use]
    pub fn get_ok(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.values.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                Value::Object(map) => map.get(part)?,
                _ => return None,
            };
        }
        (!is_unset(current)).then_some(current)
    }

    /// String value of a top-level key, if set.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get_ok(key).and_then(Value::as_str)
    }

    /// Store a value under `key`.
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), Error> {
        let value = serde_json::to_value(value).map_err(|e| {
            Error::validation(key.to_string(), format!("value cannot be stored: {e}"))
        })?;
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    /// Remove `key`, returning its old value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Decode the first element of a list-of-one block.
    ///
    /// `Ok(None)` when the key is absent or the list is empty.
    pub fn get_block<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(items)) => items
                .first()
                .map(|item| decode_block(key, item.clone()))
                .transpose(),
            Some(other) => Err(Error::validation(
                key.to_string(),
                format!("expected a list, found {other}"),
            )),
        }
    }

    /// Decode every element of a list block.
    pub fn get_blocks<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>, Error> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| decode_block(key, item.clone()))
                .collect(),
            Some(other) => Err(Error::validation(
                key.to_string(),
                format!("expected a list, found {other}"),
            )),
        }
    }
}

fn decode_block<T: DeserializeOwned>(key: &str, value: Value) -> Result<T, Error> {
    serde_json::from_value(value).map_err(|e| Error::validation(key.to_string(), e.to_string()))
}

fn is_unset(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// A parsed Azure resource id.
///
/// `/subscriptions/{sub}/resourceGroups/{rg}/providers/{namespace}/{type}/{name}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    pub subscription_id: String,
    pub resource_group: String,
    pub provider: Option<String>,
    /// Remaining `type/name` pairs, keyed by type.
    pub path: BTreeMap<String, String>,
}

impl ResourceId {
    pub fn parse(id: &str) -> Result<Self, Error> {
        let trimmed = id.trim_matches('/');
        let components: Vec<&str> = trimmed.split('/').collect();
        if trimmed.is_empty() || components.len() % 2 != 0 {
            return Err(Error::validation(
                "resource id",
                format!("'{id}' does not have key/value pairs"),
            ));
        }

        let mut subscription_id = None;
        let mut resource_group = None;
        let mut provider = None;
        let mut path = BTreeMap::new();

        for pair in components.chunks(2) {
            let (key, value) = (pair[0], pair[1]);
            if value.is_empty() {
                return Err(Error::validation(
                    "resource id",
                    format!("'{id}' has an empty value for '{key}'"),
                ));
            }
            match key.to_ascii_lowercase().as_str() {
                "subscriptions" if subscription_id.is_none() => {
                    subscription_id = Some(value.to_string());
                }
                "resourcegroups" if resource_group.is_none() => {
                    resource_group = Some(value.to_string());
                }
                "providers" if provider.is_none() => provider = Some(value.to_string()),
                _ => {
                    path.insert(key.to_string(), value.to_string());
                }
            }
        }

        let subscription_id = subscription_id.ok_or_else(|| {
            Error::validation("resource id", format!("'{id}' has no subscription"))
        })?;
        let resource_group = resource_group.ok_or_else(|| {
            Error::validation("resource id", format!("'{id}' has no resource group"))
        })?;

        Ok(Self {
            subscription_id,
            resource_group,
            provider,
            path,
        })
    }

    /// Id of a deployment resource.
    #[must_use]
    pub fn deployment(subscription_id: &str, resource_group: &str, name: &str) -> String {
        format!(
            "/subscriptions/{subscription_id}/resourceGroups/{resource_group}/providers/Microsoft.Resources/deployments/{name}"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_ok_nested_path() {
        let mut d = ResourceData::new();
        d.set("master_profile", json!([{ "dns_name_prefix": "prefix", "count": 1 }]))
            .unwrap();

        assert_eq!(
            d.get_ok("master_profile.0.dns_name_prefix"),
            Some(&json!("prefix"))
        );
        assert_eq!(d.get_ok("master_profile.0.count"), Some(&json!(1)));
        assert!(d.get_ok("master_profile.1.dns_name_prefix").is_none());
        assert!(d.get_ok("master_profile.0.fqdn").is_none());
        assert!(d.get_ok("missing").is_none());
    }

    #[test]
    fn test_get_ok_treats_empty_as_unset() {
        let mut d = ResourceData::new();
        d.set("name", "").unwrap();
        d.set("tags", json!({})).unwrap();
        d.set("agent_pool_profiles", json!([])).unwrap();

        assert!(d.get_ok("name").is_none());
        assert!(d.get_ok("tags").is_none());
        assert!(d.get_ok("agent_pool_profiles").is_none());
    }

    #[test]
    fn test_get_block_rejects_non_list() {
        let mut d = ResourceData::new();
        d.set("linux_profile", json!({ "admin_username": "azureuser" }))
            .unwrap();
        let result: Result<Option<FlatMap>, Error> = d.get_block("linux_profile");
        assert!(result.unwrap_err().is_validation());
    }

    #[test]
    fn test_parse_deployment_id() {
        let id = ResourceId::parse(
            "/subscriptions/7f68fe06-9404-4db8-a5c7-29639dc4b299/resourceGroups/testrg/providers/Microsoft.Resources/deployments/testcluster",
        )
        .unwrap();

        assert_eq!(id.subscription_id, "7f68fe06-9404-4db8-a5c7-29639dc4b299");
        assert_eq!(id.resource_group, "testrg");
        assert_eq!(id.provider.as_deref(), Some("Microsoft.Resources"));
        assert_eq!(id.path.get("deployments").map(String::as_str), Some("testcluster"));
    }

    #[test]
    fn test_parse_is_case_insensitive_on_keys() {
        let id = ResourceId::parse("/subscriptions/sub/resourcegroups/rg").unwrap();
        assert_eq!(id.resource_group, "rg");
        assert!(id.provider.is_none());
    }

    #[test]
    fn test_parse_rejects_malformed_ids() {
        assert!(ResourceId::parse("").is_err());
        assert!(ResourceId::parse("/subscriptions").is_err());
        assert!(ResourceId::parse("/resourceGroups/rg").is_err());
        assert!(ResourceId::parse("/subscriptions/sub").is_err());
    }

    #[test]
    fn test_deployment_id_round_trip() {
        let id = ResourceId::deployment("sub", "rg", "cluster");
        let parsed = ResourceId::parse(&id).unwrap();
        assert_eq!(parsed.resource_group, "rg");
        assert_eq!(parsed.path["deployments"], "cluster");
    }
}
