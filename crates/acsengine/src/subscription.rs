//! Subscription Resolver backed by the Azure CLI profile.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;

/// Environment variable overriding the Azure CLI configuration directory.
pub const AZURE_CONFIG_DIR_ENV: &str = "AZURE_CONFIG_DIR";

const PROFILE_FILE: &str = "azureProfile.json";

/// A subscription known to the Azure CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub environment_name: String,
}

/// The subscriptions section of `azureProfile.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureCliProfile {
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

impl AzureCliProfile {
    #[must_use]
    pub fn new(subscriptions: Vec<Subscription>) -> Self {
        Self { subscriptions }
    }

    /// Read a profile file. The Azure CLI writes it with a UTF-8 BOM.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::not_found("Azure CLI profile", format!("{}: {e}", path.display()))
        })?;
        let content = raw.strip_prefix('\u{feff}').unwrap_or(&raw);
        let profile: Self = serde_json::from_str(content).map_err(|e| {
            Error::Decode(format!("Azure CLI profile {}: {e}", path.display()))
        })?;

        debug!(
            path = %path.display(),
            subscriptions = profile.subscriptions.len(),
            "Loaded Azure CLI profile"
        );
        Ok(profile)
    }

    /// Id of the subscription flagged as default.
    pub fn find_default_subscription_id(&self) -> Result<String, Error> {
        if self.subscriptions.is_empty() {
            return Err(Error::not_found(
                "subscription",
                "no subscriptions were found in the Azure CLI profile",
            ));
        }

        let mut defaults = self.subscriptions.iter().filter(|s| s.is_default);
        match (defaults.next(), defaults.next()) {
            (Some(subscription), None) => Ok(subscription.id.clone()),
            (Some(first), Some(second)) => Err(Error::Ambiguity {
                what: "default subscription",
                detail: format!("both {} and {} are flagged default", first.id, second.id),
            }),
            (None, _) => Err(Error::not_found(
                "subscription",
                "no subscription is flagged as default in the Azure CLI profile",
            )),
        }
    }

    /// Subscription with exactly this id, default or not.
    pub fn find_subscription(&self, subscription_id: &str) -> Result<&Subscription, Error> {
        self.subscriptions
            .iter()
            .find(|s| s.id == subscription_id)
            .ok_or_else(|| {
                Error::not_found(
                    "subscription",
                    format!("{subscription_id} is not in the Azure CLI profile"),
                )
            })
    }

    /// The explicitly requested subscription, or the default one.
    pub fn resolve_subscription(&self, explicit: Option<&str>) -> Result<Subscription, Error> {
        match explicit.filter(|id| !id.is_empty()) {
            Some(id) => self.find_subscription(id).cloned(),
            None => {
                let id = self.find_default_subscription_id()?;
                self.find_subscription(&id).cloned()
            }
        }
    }
}

/// `$AZURE_CONFIG_DIR/azureProfile.json`, falling back to `~/.azure`.
pub fn default_profile_path() -> Result<PathBuf, Error> {
    if let Some(dir) = std::env::var_os(AZURE_CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
        return Ok(PathBuf::from(dir).join(PROFILE_FILE));
    }
    dirs::home_dir()
        .map(|home| home.join(".azure").join(PROFILE_FILE))
        .ok_or_else(|| Error::not_found("Azure CLI profile", "home directory is unknown"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FIRST: &str = "7f68fe06-9404-4db8-a5c7-29639dc4b299";
    const SECOND: &str = "f36508bb-53b9-4aad-a2ac-2df86acf0c31";
    const UNKNOWN: &str = "224f4ca6-117f-4928-bc0f-3df018feba3e";

    fn subscription(id: &str, is_default: bool) -> Subscription {
        Subscription {
            id: id.to_string(),
            is_default,
            ..Subscription::default()
        }
    }

    #[test]
    fn test_find_default_subscription() {
        let cases: Vec<(&str, Vec<Subscription>, Option<&str>)> = vec![
            ("Empty Subscriptions", vec![], None),
            ("Single Subscription", vec![subscription(FIRST, true)], Some(FIRST)),
            (
                "Multiple Subscriptions with First as the Default",
                vec![subscription(FIRST, true), subscription(SECOND, false)],
                Some(FIRST),
            ),
            (
                "Multiple Subscriptions with Second as the Default",
                vec![subscription(FIRST, false), subscription(SECOND, true)],
                Some(SECOND),
            ),
            (
                "Multiple Subscriptions with None as the Default",
                vec![subscription(FIRST, false), subscription(SECOND, false)],
                None,
            ),
        ];

        for (description, subscriptions, expected) in cases {
            let profile = AzureCliProfile::new(subscriptions);
            let actual = profile.find_default_subscription_id();
            match expected {
                Some(id) => assert_eq!(
                    actual.as_deref().ok(),
                    Some(id),
                    "{description}: expected {id}, got {actual:?}"
                ),
                None => assert!(
                    actual.as_ref().is_err_and(Error::is_not_found),
                    "{description}: expected an error, got {actual:?}"
                ),
            }
        }
    }

    #[test]
    fn test_two_defaults_are_ambiguous() {
        let profile = AzureCliProfile::new(vec![subscription(FIRST, true), subscription(SECOND, true)]);
        let err = profile.find_default_subscription_id().unwrap_err();
        assert!(matches!(err, Error::Ambiguity { .. }), "{err}");
    }

    #[test]
    fn test_find_subscription() {
        let cases: Vec<(&str, Vec<Subscription>, &str, bool)> = vec![
            ("Empty Subscriptions", vec![], FIRST, true),
            ("Single Subscription", vec![subscription(FIRST, true)], FIRST, false),
            (
                "Finding the default subscription",
                vec![subscription(FIRST, true), subscription(SECOND, false)],
                FIRST,
                false,
            ),
            (
                "Finding a non default Subscription",
                vec![subscription(FIRST, false), subscription(SECOND, true)],
                FIRST,
                false,
            ),
            (
                "Multiple Subscriptions with None as the Default",
                vec![subscription(FIRST, false), subscription(SECOND, false)],
                UNKNOWN,
                true,
            ),
        ];

        for (description, subscriptions, search_for, expect_error) in cases {
            let profile = AzureCliProfile::new(subscriptions);
            match profile.find_subscription(search_for) {
                Ok(found) => {
                    assert!(!expect_error, "{description}: expected an error");
                    assert_eq!(found.id, search_for, "{description}");
                }
                Err(err) => {
                    assert!(expect_error, "{description}: unexpected error {err}");
                    assert!(err.is_not_found());
                }
            }
        }
    }

    #[test]
    fn test_resolve_subscription() {
        let profile = AzureCliProfile::new(vec![subscription(FIRST, false), subscription(SECOND, true)]);

        assert_eq!(profile.resolve_subscription(None).unwrap().id, SECOND);
        assert_eq!(profile.resolve_subscription(Some("")).unwrap().id, SECOND);
        assert_eq!(profile.resolve_subscription(Some(FIRST)).unwrap().id, FIRST);
        assert!(profile.resolve_subscription(Some(UNKNOWN)).is_err());
    }

    #[test]
    fn test_load_profile_with_bom() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "\u{feff}{{\"installationId\":\"x\",\"subscriptions\":[{{\"id\":\"{FIRST}\",\"name\":\"dev\",\"tenantId\":\"t\",\"state\":\"Enabled\",\"isDefault\":true,\"user\":{{\"name\":\"u\",\"type\":\"user\"}}}}]}}"
        )
        .unwrap();

        let profile = AzureCliProfile::load(file.path()).unwrap();

        assert_eq!(profile.subscriptions.len(), 1);
        assert_eq!(profile.subscriptions[0].name, "dev");
        assert_eq!(profile.find_default_subscription_id().unwrap(), FIRST);
    }

    #[test]
    fn test_load_missing_profile() {
        let dir = tempfile::tempdir().unwrap();
        let err = AzureCliProfile::load(&dir.path().join(PROFILE_FILE)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_load_malformed_profile() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = AzureCliProfile::load(file.path()).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
