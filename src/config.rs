//! TOML configuration with environment overrides.
//!
//! ```toml
//! [remote]
//! url = "https://example.supabase.co"
//! anon_key = "public-anon-key"
//! table = "todos"
//! order_column = "created_at"
//!
//! [logging]
//! filter = "checkit=debug"
//! ```

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_REMOTE_URL: &str = "CHECKIT_REMOTE_URL";
pub const ENV_REMOTE_KEY: &str = "CHECKIT_REMOTE_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Hosted backend. Without it the app runs local-only.
    pub remote: Option<RemoteConfig>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteConfig {
    pub url: String,
    pub anon_key: String,
    #[serde(default = "default_table")]
    pub table: String,
    /// Column used for newest-first ordering. Tables without a creation
    /// timestamp should set this to `id`.
    #[serde(default = "default_order_column")]
    pub order_column: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: "checkit=info".into(),
        }
    }
}

fn default_table() -> String {
    "todos".into()
}

fn default_order_column() -> String {
    "created_at".into()
}

fn default_timeout_secs() -> u64 {
    20
}

impl RemoteConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        RemoteConfig {
            url: url.into(),
            anon_key: anon_key.into(),
            table: default_table(),
            order_column: default_order_column(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

impl AppConfig {
    /// Loads `path` (or the default location), then applies env overrides.
    /// A missing default file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match default_config_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => AppConfig::default(),
            },
        };
        config.apply_overrides(
            std::env::var(ENV_REMOTE_URL).ok(),
            std::env::var(ENV_REMOTE_KEY).ok(),
        );
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("parsing config {:?}", path))
    }

    fn apply_overrides(&mut self, url: Option<String>, key: Option<String>) {
        let url = url.filter(|u| !u.trim().is_empty());
        let key = key.filter(|k| !k.trim().is_empty());
        if let Some(remote) = self.remote.as_mut() {
            if let Some(url) = url {
                remote.url = url;
            }
            if let Some(key) = key {
                remote.anon_key = key;
            }
        } else if let (Some(url), Some(key)) = (url, key) {
            self.remote = Some(RemoteConfig::new(url, key));
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "checkit").map(|dirs| dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_local_only() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert!(config.remote.is_none());
        assert_eq!(config.logging.filter, "checkit=info");
    }

    #[test]
    fn remote_defaults_fill_in() {
        let config: AppConfig = toml::from_str(
            r#"
            [remote]
            url = "https://db.example.com/"
            anon_key = "anon"
            "#,
        )
        .unwrap();
        let remote = config.remote.unwrap();
        assert_eq!(remote.table, "todos");
        assert_eq!(remote.order_column, "created_at");
        assert_eq!(remote.timeout_secs, 20);
        assert_eq!(remote.base_url(), "https://db.example.com");
    }

    #[test]
    fn order_column_is_configurable() {
        let config: AppConfig = toml::from_str(
            r#"
            [remote]
            url = "https://db.example.com"
            anon_key = "anon"
            order_column = "id"
            "#,
        )
        .unwrap();
        assert_eq!(config.remote.unwrap().order_column, "id");
    }

    #[test]
    fn env_overrides_need_both_values_to_enable_remote() {
        let mut config = AppConfig::default();
        config.apply_overrides(Some("https://a".into()), None);
        assert!(config.remote.is_none());
        config.apply_overrides(Some("https://a".into()), Some("k".into()));
        assert_eq!(config.remote, Some(RemoteConfig::new("https://a", "k")));
        config.apply_overrides(None, Some("k2".into()));
        assert_eq!(config.remote.unwrap().anon_key, "k2");
    }

    #[test]
    fn from_file_reports_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "this is not valid toml {{{").unwrap();
        assert!(AppConfig::from_file(&path).is_err());
        assert!(AppConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
