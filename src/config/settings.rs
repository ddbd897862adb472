//! TOML-based configuration for Quarry.
//!
//! Supports a config file (quarry.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [database]
//! dialect = "sqlite"
//! table_prefix = "mdl_"
//! path = "${QUARRY_DATA}/lms.db"
//! query_timeout_secs = 30
//!
//! [schema]
//! whitelist_path = "./whitelist.toml"
//!
//! [tenant]
//! enabled = true
//! user_alias = "u"
//! site_admins = [2]
//!
//! [cache]
//! backend = "sqlite"
//! default_ttl_seconds = 600
//!
//! [execution]
//! default_page_size = 50
//! max_page_size = 5000
//! max_concurrent = 8
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sql::dialect::helpers::is_plain_identifier;
use crate::sql::Dialect;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type SettingsResult<T> = Result<T, SettingsError>;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub schema: SchemaSettings,
    pub tenant: TenantSettings,
    pub cache: CacheSettings,
    pub execution: ExecutionSettings,
}

/// Target store.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub dialect: Dialect,

    /// Prepended to every physical table name.
    pub table_prefix: String,

    /// SQLite database used by the CLI (supports ${ENV_VAR} expansion);
    /// `dialect` must then be `sqlite`.
    pub path: Option<String>,

    /// Bound on the count and fetch queries of one execution.
    pub query_timeout_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            dialect: Dialect::Postgres,
            table_prefix: String::new(),
            path: None,
            query_timeout_secs: 30,
        }
    }
}

impl DatabaseSettings {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn resolved_path(&self) -> SettingsResult<Option<PathBuf>> {
        self.path
            .as_deref()
            .map(|p| expand_env_vars(p).map(PathBuf::from))
            .transpose()
    }
}

/// Whitelist source.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SchemaSettings {
    /// TOML whitelist; the built-in schema is used when unset.
    pub whitelist_path: Option<String>,
}

/// Multi-tenant scoping.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TenantSettings {
    /// When false, every query runs unscoped.
    pub enabled: bool,

    /// Alias of the primary user table in report queries.
    pub user_alias: String,
    pub user_column: String,

    pub membership_table: String,
    pub membership_user_column: String,
    pub membership_unit_column: String,

    /// Users with site-wide access.
    pub site_admins: Vec<u64>,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            user_alias: "u".to_string(),
            user_column: "id".to_string(),
            membership_table: "membership".to_string(),
            membership_user_column: "user_id".to_string(),
            membership_unit_column: "unit_id".to_string(),
            site_admins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Sqlite,
}

/// Result cache.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub backend: CacheBackend,

    /// SQLite cache file; defaults to the user cache directory.
    pub path: Option<String>,

    /// TTL for definitions that do not set their own.
    pub default_ttl_seconds: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackend::Memory,
            path: None,
            default_ttl_seconds: 600,
        }
    }
}

impl CacheSettings {
    /// The SQLite cache file: the configured path or `<cache dir>/quarry/results.db`.
    pub fn resolved_path(&self) -> SettingsResult<PathBuf> {
        if let Some(path) = &self.path {
            return expand_env_vars(path).map(PathBuf::from);
        }
        dirs::cache_dir()
            .map(|dir| dir.join("quarry").join("results.db"))
            .ok_or_else(|| SettingsError::InvalidConfig("no cache directory available".into()))
    }
}

/// Paging and admission control.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub default_page_size: u64,
    pub max_page_size: u64,

    /// Cap on concurrently executing (uncached) reports; unlimited when unset.
    pub max_concurrent: Option<usize>,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 5000,
            max_concurrent: None,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> SettingsResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml_str(content: &str) -> SettingsResult<Self> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `QUARRY_CONFIG`
    /// 2. `./quarry.toml`
    /// 3. `~/.config/quarry/config.toml`
    pub fn load() -> SettingsResult<Self> {
        if let Ok(path) = env::var("QUARRY_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("quarry.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("quarry").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    /// Reject settings that would put non-identifiers into generated SQL.
    pub fn validate(&self) -> SettingsResult<()> {
        let prefix = &self.database.table_prefix;
        if !prefix.is_empty() && !is_plain_identifier(prefix) {
            return Err(SettingsError::InvalidConfig(format!(
                "table_prefix '{}' is not a plain identifier",
                prefix
            )));
        }

        let tenant = &self.tenant;
        for (key, value) in [
            ("user_alias", &tenant.user_alias),
            ("user_column", &tenant.user_column),
            ("membership_table", &tenant.membership_table),
            ("membership_user_column", &tenant.membership_user_column),
            ("membership_unit_column", &tenant.membership_unit_column),
        ] {
            if !is_plain_identifier(value) {
                return Err(SettingsError::InvalidConfig(format!(
                    "tenant.{} '{}' is not a plain identifier",
                    key, value
                )));
            }
        }

        let exec = &self.execution;
        if exec.default_page_size == 0 || exec.max_page_size < exec.default_page_size {
            return Err(SettingsError::InvalidConfig(
                "page sizes must satisfy max_page_size >= default_page_size > 0".into(),
            ));
        }
        if exec.max_concurrent == Some(0) {
            return Err(SettingsError::InvalidConfig(
                "max_concurrent must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> SettingsResult<String> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let var_name: String = if chars.next_if_eq(&'{').is_some() {
            let name = std::iter::from_fn(|| chars.next_if(|&ch| ch != '}')).collect();
            chars.next(); // consume '}'
            name
        } else {
            std::iter::from_fn(|| chars.next_if(|&ch| ch.is_alphanumeric() || ch == '_')).collect()
        };

        if var_name.is_empty() {
            // Just a lone $, keep it
            result.push('$');
            continue;
        }
        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
