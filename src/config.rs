//! Context configuration — trigger buffer bound, overflow policy and
//! repeat coalescing.
//!
//! Loaded from defaults, from `SYSTEM_HOTKEY_*` environment variables, or
//! from a JSON file. Unset fields keep their defaults.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

pub const ENV_MAX_PENDING: &str = "SYSTEM_HOTKEY_MAX_PENDING";
pub const ENV_OVERFLOW: &str = "SYSTEM_HOTKEY_OVERFLOW";
pub const ENV_COALESCE: &str = "SYSTEM_HOTKEY_COALESCE";

/// What to discard when the trigger buffer is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Evict the oldest pending trigger to make room.
    #[default]
    DropOldest,
    /// Discard the incoming trigger.
    DropNewest,
}

impl OverflowPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "drop-oldest" | "oldest" => Some(Self::DropOldest),
            "drop-newest" | "newest" => Some(Self::DropNewest),
            _ => None,
        }
    }
}

/// Per-context settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Maximum triggers held between polls. `0` means unbounded.
    pub max_pending: usize,
    /// Policy applied once `max_pending` is reached.
    pub overflow: OverflowPolicy,
    /// Record one trigger per physical press, ignoring OS auto-repeat
    /// while the combination is held.
    pub coalesce_repeats: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_pending: 1024,
            overflow: OverflowPolicy::DropOldest,
            coalesce_repeats: true,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_MAX_PENDING) {
            config.max_pending = value.trim().parse().map_err(|_| ConfigError::InvalidVar {
                var: ENV_MAX_PENDING,
                value: value.clone(),
            })?;
        }

        if let Some(value) = lookup(ENV_OVERFLOW) {
            config.overflow = OverflowPolicy::parse(&value).ok_or(ConfigError::InvalidVar {
                var: ENV_OVERFLOW,
                value: value.clone(),
            })?;
        }

        if let Some(value) = lookup(ENV_COALESCE) {
            config.coalesce_repeats = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidVar {
                        var: ENV_COALESCE,
                        value,
                    });
                }
            };
        }

        Ok(config)
    }

    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.max_pending, 1024);
        assert!(config.coalesce_repeats);
    }

    #[test]
    fn env_overrides() {
        let config = Config::from_lookup(lookup(&[
            (ENV_MAX_PENDING, "8"),
            (ENV_OVERFLOW, "drop-newest"),
            (ENV_COALESCE, "off"),
        ]))
        .unwrap();
        assert_eq!(config.max_pending, 8);
        assert_eq!(config.overflow, OverflowPolicy::DropNewest);
        assert!(!config.coalesce_repeats);
    }

    #[test]
    fn env_rejects_garbage() {
        let err = Config::from_lookup(lookup(&[(ENV_MAX_PENDING, "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { var: ENV_MAX_PENDING, .. }));

        let err = Config::from_lookup(lookup(&[(ENV_OVERFLOW, "sideways")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { var: ENV_OVERFLOW, .. }));

        let err = Config::from_lookup(lookup(&[(ENV_COALESCE, "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { var: ENV_COALESCE, .. }));
    }

    #[test]
    fn load_json_file_with_partial_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hotkey.json");
        std::fs::write(&path, r#"{ "max_pending": 2, "overflow": "drop-newest" }"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_pending, 2);
        assert_eq!(config.overflow, OverflowPolicy::DropNewest);
        assert!(config.coalesce_repeats, "unset field keeps its default");
    }

    #[test]
    fn load_reports_missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("absent.json");
        assert!(matches!(Config::load(&missing), Err(ConfigError::Read { .. })));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, r#"{ "max_pending": "many" }"#).unwrap();
        assert!(matches!(Config::load(&bad), Err(ConfigError::Parse { .. })));

        let unknown = dir.path().join("unknown.json");
        std::fs::write(&unknown, r#"{ "colour": "blue" }"#).unwrap();
        assert!(matches!(Config::load(&unknown), Err(ConfigError::Parse { .. })));
    }
}
