//! Datastore configuration surface
//!
//! Declares the stores map (named connection targets) and the models section
//! (default store, default migration strategy, per-model overrides). These
//! structs are consumed by the boot pipeline; they own no connections.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Relational SQL dialects understood by the datastore layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[serde(alias = "postgresql")]
    Postgres,
    #[serde(alias = "mariadb")]
    Mysql,
    Sqlite,
}

impl Dialect {
    /// Parse a dialect name as it appears in a store declaration.
    /// Returns `None` for non-relational store kinds (document, key-value, ...).
    pub fn parse(name: &str) -> Option<Dialect> {
        match name.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Dialect::Postgres),
            "mysql" | "mariadb" => Some(Dialect::Mysql),
            "sqlite" | "sqlite3" => Some(Dialect::Sqlite),
            _ => None,
        }
    }

    /// Detect a dialect from a connection URI scheme.
    /// Handles both `scheme://` uris and bare forms like `sqlite::memory:`.
    pub fn from_uri(uri: &str) -> Option<Dialect> {
        let scheme = uri.split(':').next()?;
        Dialect::parse(scheme)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Mysql => "mysql",
            Dialect::Sqlite => "sqlite",
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Schema synchronization strategy applied at boot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStrategy {
    /// Leave the schema untouched
    None,
    /// Non-destructive structural sync: create missing tables, add missing columns
    #[default]
    Alter,
    /// Drop and recreate every table owned by the store
    Drop,
}

/// Connection pool limits, per store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: u64,
    pub idle_timeout: Option<u64>,
    pub max_lifetime: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: 30,
            idle_timeout: Some(600),
            max_lifetime: Some(1800),
        }
    }
}

/// A named connection target: one physical database
///
/// A store is declared either with a single connection `uri` or with discrete
/// fields (`dialect` + `database` + credentials). The `dialect` field is a
/// free-form string so that non-relational store kinds can coexist in the same
/// map; unknown kinds are skipped by the connection resolver, not rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub dialect: Option<String>,
    pub uri: Option<String>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// File path for SQLite stores (`:memory:` for an in-memory database)
    pub storage: Option<String>,
    pub pool: PoolConfig,
    /// Migration strategy override for this store
    pub migrate: Option<MigrationStrategy>,
}

impl StoreConfig {
    /// The relational dialect of this store, if it names one
    pub fn relational_dialect(&self) -> Option<Dialect> {
        if let Some(uri) = &self.uri {
            return Dialect::from_uri(uri);
        }
        self.dialect.as_deref().and_then(Dialect::parse)
    }
}

/// Per-model override block inside the models section
///
/// Recognized keys mirror the model-level configuration: `store`, `migrate`,
/// `table_name` and `options`. Overrides win over the model's own declared
/// configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelOverride {
    pub store: Option<String>,
    pub migrate: Option<MigrationStrategy>,
    pub table_name: Option<String>,
    pub options: Option<ModelOptions>,
}

/// Table-level behavior toggles carried on every resolved model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelOptions {
    /// Inject an auto-increment `id` primary key when the schema declares none
    pub auto_pk: bool,
    /// Maintain `created_at` / `updated_at` columns
    pub timestamps: bool,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            auto_pk: true,
            timestamps: true,
        }
    }
}

/// The models section: global defaults plus a-la-carte per-model overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// The store assigned to models that do not declare one
    pub default_store: String,
    /// The migration strategy for stores that do not declare one
    pub migrate: MigrationStrategy,
    /// Cap applied to unbounded find-all queries when the caller sets no limit
    pub default_limit: Option<u64>,
    /// Per-model override blocks, keyed by declared (global) model name
    pub overrides: HashMap<String, ModelOverride>,
}

/// Top-level datastore configuration: stores map plus models section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub stores: HashMap<String, StoreConfig>,
    pub models: ModelsConfig,
}

impl DatabaseConfig {
    /// Validate the configuration before any connection is opened.
    ///
    /// Boot-time validation failures are fatal. An empty stores map is legal
    /// (models will simply not register) and only logged.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stores.is_empty() {
            tracing::warn!("No store configured at stores, models will be ignored");
        }

        if self.models.default_store.is_empty() {
            return Err(ConfigError::MissingDefaultStore);
        }

        for (name, store) in &self.stores {
            if store.relational_dialect().is_none() {
                // Not ours to validate; the resolver will skip it.
                continue;
            }
            let has_uri = store.uri.is_some();
            let has_database = store.database.is_some() || store.storage.is_some();
            if !has_uri && !has_database {
                return Err(ConfigError::InvalidStore {
                    name: name.clone(),
                    reason: "expected either a uri or a database/storage field".into(),
                });
            }
        }

        for (name, model) in &self.models.overrides {
            if let Some(store) = &model.store {
                if store.is_empty() {
                    return Err(ConfigError::InvalidModelOverride {
                        name: name.clone(),
                        reason: "store override must not be empty".into(),
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_store() -> StoreConfig {
        StoreConfig {
            dialect: Some("sqlite".into()),
            storage: Some(":memory:".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_dialect_parsing() {
        assert_eq!(Dialect::parse("postgresql"), Some(Dialect::Postgres));
        assert_eq!(Dialect::parse("POSTGRES"), Some(Dialect::Postgres));
        assert_eq!(Dialect::parse("mysql"), Some(Dialect::Mysql));
        assert_eq!(Dialect::parse("sqlite3"), Some(Dialect::Sqlite));
        assert_eq!(Dialect::parse("mongo"), None);
        assert_eq!(Dialect::parse("redis"), None);
    }

    #[test]
    fn test_dialect_from_uri() {
        assert_eq!(
            Dialect::from_uri("postgres://localhost/app"),
            Some(Dialect::Postgres)
        );
        assert_eq!(
            Dialect::from_uri("mysql://root@localhost/app"),
            Some(Dialect::Mysql)
        );
        assert_eq!(Dialect::from_uri("sqlite::memory:"), Some(Dialect::Sqlite));
        assert_eq!(Dialect::from_uri("sqlite://app.db"), Some(Dialect::Sqlite));
        assert_eq!(Dialect::from_uri("redis://localhost"), None);
    }

    #[test]
    fn test_relational_dialect_prefers_uri() {
        let store = StoreConfig {
            dialect: Some("mongo".into()),
            uri: Some("postgres://localhost/app".into()),
            ..Default::default()
        };
        assert_eq!(store.relational_dialect(), Some(Dialect::Postgres));
    }

    #[test]
    fn test_pool_config_defaults() {
        let pool = PoolConfig::default();
        assert_eq!(pool.max_connections, 10);
        assert_eq!(pool.min_connections, 1);
        assert_eq!(pool.acquire_timeout, 30);
        assert_eq!(pool.idle_timeout, Some(600));
        assert_eq!(pool.max_lifetime, Some(1800));
    }

    #[test]
    fn test_validate_requires_default_store() {
        let mut config = DatabaseConfig::default();
        config.stores.insert("dev".into(), sqlite_store());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingDefaultStore)
        ));

        config.models.default_store = "dev".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_store_without_target() {
        let mut config = DatabaseConfig::default();
        config.models.default_store = "dev".into();
        config.stores.insert(
            "dev".into(),
            StoreConfig {
                dialect: Some("postgres".into()),
                ..Default::default()
            },
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidStore { .. })
        ));
    }

    #[test]
    fn test_validate_ignores_non_relational_stores() {
        let mut config = DatabaseConfig::default();
        config.models.default_store = "dev".into();
        config.stores.insert("dev".into(), sqlite_store());
        // A document store with no connection fields is not an error here.
        config.stores.insert(
            "cache".into(),
            StoreConfig {
                dialect: Some("redis".into()),
                ..Default::default()
            },
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_deserialization() {
        let raw = serde_json::json!({
            "stores": {
                "sqlitedev": {
                    "dialect": "sqlite",
                    "database": "dev",
                    "storage": "./.tmp/dev.sqlite"
                }
            },
            "models": {
                "default_store": "sqlitedev",
                "migrate": "drop",
                "overrides": {
                    "User": { "table_name": "app_users", "migrate": "alter" }
                }
            }
        });
        let config: DatabaseConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(config.models.default_store, "sqlitedev");
        assert_eq!(config.models.migrate, MigrationStrategy::Drop);
        let over = &config.models.overrides["User"];
        assert_eq!(over.table_name.as_deref(), Some("app_users"));
        assert_eq!(over.migrate, Some(MigrationStrategy::Alter));
    }

    #[test]
    fn test_model_options_defaults() {
        let options = ModelOptions::default();
        assert!(options.auto_pk);
        assert!(options.timestamps);
    }
}
