use model::Family;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A named bundle of PUT defaults drawn from configuration. Explicit
/// transfer fields override profile values; tags concatenate.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    #[serde(default)]
    pub family: Option<Family>,
    #[serde(default)]
    pub layout: Option<String>,
    #[serde(default)]
    pub library: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Store-level configuration.
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Path of the resource scheduler's UNIX socket.
    pub lrs_socket: PathBuf,
    #[serde(default = "default_family")]
    pub default_family: Family,
    #[serde(default = "default_layout")]
    pub default_layout: String,
    #[serde(default = "default_copy_name")]
    pub default_copy_name: String,
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

fn default_family() -> Family {
    Family::Dir
}

fn default_layout() -> String {
    "raid1".to_string()
}

fn default_copy_name() -> String {
    model::DEFAULT_COPY_NAME.to_string()
}

impl StoreConfig {
    pub fn new(lrs_socket: impl Into<PathBuf>) -> Self {
        Self {
            lrs_socket: lrs_socket.into(),
            default_family: default_family(),
            default_layout: default_layout(),
            default_copy_name: default_copy_name(),
            profiles: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_config_defaults_from_json() {
        let cfg: StoreConfig =
            serde_json::from_str(r#"{"lrs_socket": "/run/cellar/lrs.sock"}"#).unwrap();
        assert_eq!(cfg.default_family, Family::Dir);
        assert_eq!(cfg.default_layout, "raid1");
        assert_eq!(cfg.default_copy_name, "source");
        assert!(cfg.profiles.is_empty());
    }

    #[test]
    fn test_profile_parsing() {
        let cfg: StoreConfig = serde_json::from_str(
            r#"{
                "lrs_socket": "/run/cellar/lrs.sock",
                "profiles": {
                    "archive": {"family": "tape", "tags": ["offsite"]}
                }
            }"#,
        )
        .unwrap();
        let profile = &cfg.profiles["archive"];
        assert_eq!(profile.family, Some(Family::Tape));
        assert_eq!(profile.tags, vec!["offsite".to_string()]);
    }
}
