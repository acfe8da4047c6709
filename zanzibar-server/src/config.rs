//! Layered server configuration.
//!
//! Sources, later ones overriding earlier ones:
//! 1. Built-in defaults
//! 2. An optional YAML/TOML file
//! 3. `ZANZIBAR__SECTION__KEY` environment variables, e.g. `ZANZIBAR__CACHE__BACKEND=redis`

use auth_zanzibar::{
    cache::DEFAULT_MAX_ENTRIES, CheckConfig, ManagePolicy, Relation, RelationHierarchy, User,
    ZanzibarError,
};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub cache: CacheSettings,
    pub engine: EngineSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory of the sled database
    pub path: String,
    /// Use a throwaway database (tests and demos)
    pub temporary: bool,
    /// Rebuild missing reverse-index records at startup
    pub migrate_reverse_index: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: "./data/zanzibar".to_string(),
            temporary: false,
            migrate_reverse_index: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    pub redis_url: String,
    pub ttl_secs: u64,
    /// Entry bound of the memory backend
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            ttl_secs: 300,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Empty disables bootstrap authority and auto-ownership
    pub bootstrap_principal: String,
    pub allow_first_writer: bool,
    /// Empty disables namespace admins
    pub namespace_admin_relation: String,
    /// Empty leaves listing open
    pub listing_relation: String,
    pub auto_owner_namespaces: Vec<String>,
    /// Strongest relation first
    pub hierarchy: Vec<String>,
    pub max_depth: usize,
    pub check_timeout_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            bootstrap_principal: "user:admin".to_string(),
            allow_first_writer: true,
            namespace_admin_relation: "admin".to_string(),
            listing_relation: String::new(),
            auto_owner_namespaces: vec!["doc".to_string()],
            hierarchy: vec!["owner".to_string(), "editor".to_string(), "viewer".to_string()],
            max_depth: 25,
            check_timeout_ms: 5000,
        }
    }
}

impl EngineSettings {
    pub fn check_config(&self) -> Result<CheckConfig, ZanzibarError> {
        Ok(CheckConfig {
            hierarchy: RelationHierarchy::new(&self.hierarchy)?,
            max_depth: self.max_depth,
            timeout: Duration::from_millis(self.check_timeout_ms),
        })
    }

    pub fn manage_policy(&self) -> Result<ManagePolicy, ZanzibarError> {
        Ok(ManagePolicy {
            bootstrap_principal: non_empty(&self.bootstrap_principal)
                .map(User::parse)
                .transpose()?,
            allow_first_writer: self.allow_first_writer,
            namespace_admin_relation: non_empty(&self.namespace_admin_relation)
                .map(Relation::new)
                .transpose()?,
            auto_owner_namespaces: self.auto_owner_namespaces.clone(),
        })
    }

    pub fn listing_relation(&self) -> Result<Option<Relation>, ZanzibarError> {
        non_empty(&self.listing_relation).map(Relation::new).transpose()
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Settings {
    /// Load settings from defaults, `path` (if it exists) and the environment.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Settings::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }

        builder
            .add_source(
                Environment::with_prefix("ZANZIBAR")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("engine.auto_owner_namespaces")
                    .with_list_parse_key("engine.hierarchy")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.cache.backend, CacheBackend::Memory);
        assert_eq!(settings.cache_ttl(), Duration::from_secs(300));

        let check = settings.engine.check_config().unwrap();
        assert_eq!(check.max_depth, 25);
        assert_eq!(check.timeout, Duration::from_secs(5));
        assert_eq!(check.hierarchy, RelationHierarchy::default());

        let policy = settings.engine.manage_policy().unwrap();
        assert_eq!(policy.bootstrap_principal.unwrap().to_string(), "user:admin");
        assert!(settings.engine.listing_relation().unwrap().is_none());
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let settings = Settings::load(Some("does-not-exist.yaml")).unwrap();
        assert_eq!(settings.storage.path, "./data/zanzibar");
        assert_eq!(settings.engine.auto_owner_namespaces, vec!["doc"]);
    }

    #[test]
    fn test_empty_principal_disables_bootstrap() {
        let engine = EngineSettings {
            bootstrap_principal: String::new(),
            namespace_admin_relation: " ".to_string(),
            ..EngineSettings::default()
        };
        let policy = engine.manage_policy().unwrap();
        assert!(policy.bootstrap_principal.is_none());
        assert!(policy.namespace_admin_relation.is_none());
    }

    #[test]
    fn test_invalid_engine_settings() {
        let engine = EngineSettings {
            bootstrap_principal: "admin".to_string(),
            ..EngineSettings::default()
        };
        assert!(engine.manage_policy().is_err());

        let engine = EngineSettings {
            hierarchy: vec!["own er".to_string()],
            ..EngineSettings::default()
        };
        assert!(engine.check_config().is_err());
    }
}
