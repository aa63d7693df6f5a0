//! Shell configuration loading.
//!
//! The core takes its remote directory and shared specs as plain values; this
//! module is where the binary gets them from a JSON file and CLI overrides.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use federator_core::{
    RemoteDirectory, RemoteEntry, SharedDependencySpec, UnitCatalog, remote::DEFAULT_FETCH_TIMEOUT,
};

/// Shell name used when the config file does not set one.
pub const DEFAULT_SHELL_NAME: &str = "host";

/// JSON-backed shell configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Shell name, used in logs.
    pub name: Option<String>,
    /// Remote id to `scope@url` entry.
    #[serde(default)]
    pub remotes: BTreeMap<String, String>,
    /// The shell's own shared dependency declarations.
    #[serde(default)]
    pub shared: Vec<SharedDependencySpec>,
    /// Manifest fetch timeout in seconds.
    pub fetch_timeout_secs: Option<u64>,
    /// Loader reference to placeholder unit text.
    #[serde(default)]
    pub units: BTreeMap<String, String>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        validate_timeout_secs("fetch_timeout_secs", self.fetch_timeout_secs)?;

        for (id, value) in &self.remotes {
            RemoteEntry::parse(id, value)
                .with_context(|| format!("Invalid config value for `remotes.{id}`"))?;
        }

        for (loader_ref, body) in &self.units {
            if loader_ref.trim().is_empty() {
                bail!("Invalid config value for `units`: loader reference must not be empty");
            }
            if body.trim().is_empty() {
                bail!("Invalid config value for `units.{loader_ref}`: unit text must not be empty");
            }
        }

        Ok(())
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path, if one could be determined.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
    /// Indicates whether configuration was loaded from disk.
    pub loaded_from_file: bool,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/federator/shell.json`
/// 2. `$HOME/.config/federator/shell.json`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("federator")
                .join("shell.json"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("federator")
            .join("shell.json"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from `explicit`, or from the default path if present.
///
/// An explicit path that does not exist is an error; a missing default file
/// is not.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let config = load_file_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: Some(config),
            loaded_from_file: true,
        });
    }

    let path = resolve_default_config_path();
    let Some(path_ref) = path.as_deref() else {
        return Ok(LoadedConfig {
            path,
            config: None,
            loaded_from_file: false,
        });
    };

    if !path_ref.exists() {
        return Ok(LoadedConfig {
            path,
            config: None,
            loaded_from_file: false,
        });
    }

    let config = load_file_config(path_ref)?;
    Ok(LoadedConfig {
        path,
        config: Some(config),
        loaded_from_file: true,
    })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let cfg: FileConfig = serde_json::from_str(raw)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Everything the binary needs to build a shell.
#[derive(Debug)]
pub struct ShellSettings {
    /// Shell name.
    pub name: String,
    /// Configured remotes after CLI overrides.
    pub remotes: RemoteDirectory,
    /// The shell's own shared dependency declarations.
    pub shared: Vec<SharedDependencySpec>,
    /// Manifest fetch timeout.
    pub fetch_timeout: Duration,
    /// Placeholder units keyed by loader reference.
    pub catalog: UnitCatalog,
}

impl ShellSettings {
    /// Merges the file config with CLI overrides; CLI values win.
    pub fn from_sources(
        config: Option<&FileConfig>,
        remote_overrides: &[(String, String)],
        timeout_override_secs: Option<u64>,
    ) -> Result<Self> {
        let config = config.cloned().unwrap_or_default();
        validate_timeout_secs("--timeout", timeout_override_secs)?;

        let mut remotes = RemoteDirectory::new();
        remotes.extend_from_specs(
            config
                .remotes
                .iter()
                .map(|(id, value)| (id.as_str(), value.as_str())),
        )?;
        for (id, value) in remote_overrides {
            let entry = RemoteEntry::parse(id, value)
                .with_context(|| format!("Invalid --remote value for '{id}'"))?;
            remotes.insert(entry);
        }

        let fetch_timeout = timeout_override_secs
            .or(config.fetch_timeout_secs)
            .map_or(DEFAULT_FETCH_TIMEOUT, Duration::from_secs);

        let mut catalog = UnitCatalog::new();
        for (loader_ref, body) in config.units {
            catalog.register_static(loader_ref, body);
        }

        Ok(Self {
            name: config
                .name
                .unwrap_or_else(|| DEFAULT_SHELL_NAME.to_string()),
            remotes,
            shared: config.shared,
            fetch_timeout,
            catalog,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{
        "name": "host",
        "remotes": {
            "remoteApp1": "remoteApp1@http://localhost:3001/remoteEntry.json",
            "remoteApp2": "remoteApp2@http://localhost:3002/remoteEntry.json"
        },
        "shared": [
            { "name": "react", "version": "18.2.0", "singleton": true, "requiredVersion": "^18.2.0" },
            { "name": "react-router-dom", "version": "6.22.0", "singleton": true }
        ],
        "fetch_timeout_secs": 15,
        "units": { "remoteApp1/App": "Dashboard", "remoteApp2/App": "Users" }
    }"#;

    #[test]
    fn test_parse_config_full() {
        let cfg = parse_config_str(FULL).expect("full config should parse");
        assert_eq!(cfg.name.as_deref(), Some("host"));
        assert_eq!(cfg.remotes.len(), 2);
        assert_eq!(cfg.shared.len(), 2);
        assert!(cfg.shared[0].singleton);
        assert!(cfg.shared[1].required_range.matches(&semver_version("6.30.1")));
        assert_eq!(cfg.fetch_timeout_secs, Some(15));
        assert_eq!(cfg.units.get("remoteApp2/App").map(String::as_str), Some("Users"));
    }

    fn semver_version(value: &str) -> semver::Version {
        semver::Version::parse(value).expect("valid version")
    }

    #[test]
    fn test_parse_config_partial_fields() {
        let cfg = parse_config_str(r#"{ "fetch_timeout_secs": 5 }"#)
            .expect("partial config should parse");
        assert_eq!(cfg.fetch_timeout_secs, Some(5));
        assert!(cfg.remotes.is_empty());
        assert!(cfg.name.is_none());
    }

    #[test]
    fn test_parse_config_rejects_invalid_timeout_value() {
        let err = parse_config_str(r#"{ "fetch_timeout_secs": 0 }"#)
            .expect_err("invalid timeout expected");
        assert!(err.to_string().contains("fetch_timeout_secs"));
    }

    #[test]
    fn test_parse_config_rejects_relative_remote_url() {
        let err = parse_config_str(r#"{ "remotes": { "app1": "app1@/remoteEntry.json" } }"#)
            .expect_err("relative url should be rejected");
        assert!(err.to_string().contains("remotes.app1"));
    }

    #[test]
    fn test_parse_config_rejects_unknown_keys() {
        let err = parse_config_str(r#"{ "unknown_key": 1 }"#).expect_err("unknown key error");
        assert!(err.to_string().contains("unknown_key"));
    }

    #[test]
    fn test_parse_config_rejects_invalid_shared_version() {
        let err = parse_config_str(r#"{ "shared": [ { "name": "react", "version": "eighteen" } ] }"#)
            .expect_err("bad version should be rejected");
        assert!(err.to_string().contains("react"));
    }

    #[test]
    fn test_load_config_explicit_missing_file_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing.json");
        let err = load_config(Some(&missing)).expect_err("missing explicit config");
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_load_config_explicit_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("shell.json");
        fs::write(&path, FULL).expect("write config");
        let loaded = load_config(Some(&path)).expect("config should load");
        assert!(loaded.loaded_from_file);
        assert_eq!(loaded.path.as_deref(), Some(path.as_path()));
        assert_eq!(loaded.config.expect("config").remotes.len(), 2);
    }

    #[test]
    fn test_settings_cli_overrides_win() {
        let cfg = parse_config_str(FULL).expect("full config should parse");
        let overrides = vec![(
            "remoteApp1".to_string(),
            "remoteApp1@http://127.0.0.1:4001/remoteEntry.json".to_string(),
        )];
        let settings =
            ShellSettings::from_sources(Some(&cfg), &overrides, Some(2)).expect("settings");
        assert_eq!(settings.fetch_timeout, Duration::from_secs(2));
        assert_eq!(
            settings
                .remotes
                .get("remoteApp1")
                .expect("remote")
                .entry_url
                .as_str(),
            "http://127.0.0.1:4001/remoteEntry.json"
        );
        assert_eq!(settings.remotes.len(), 2);
        assert_eq!(settings.catalog.len(), 2);
        assert_eq!(settings.shared.len(), 2);
    }

    #[test]
    fn test_settings_defaults_without_config() {
        let settings = ShellSettings::from_sources(None, &[], None).expect("settings");
        assert_eq!(settings.name, DEFAULT_SHELL_NAME);
        assert!(settings.remotes.is_empty());
        assert_eq!(settings.fetch_timeout, DEFAULT_FETCH_TIMEOUT);
    }

    #[test]
    fn test_settings_rejects_bad_override() {
        let overrides = vec![("app1".to_string(), "ftp://example.com/entry".to_string())];
        let err = ShellSettings::from_sources(None, &overrides, None).expect_err("bad scheme");
        assert!(err.to_string().contains("--remote"));
    }
}
