//! Migration runner
//!
//! Reconciles registered model schemas with the database per store, honoring
//! the store's resolved strategy: `none` leaves the schema untouched, `drop`
//! recreates every table, `alter` creates missing tables and appends missing
//! columns. Reconciliation failures abort boot.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use footprint_core::{Dialect, MigrationStrategy};

use crate::error::{ModelError, OrmResult};
use crate::executor::Executor;
use crate::query::{ensure_identifier, DialectSql, SqlQuery, SqlValue};
use crate::registry::{ModelHandle, ModelRegistry};
use crate::schema::{FieldDefinition, ModelSchema};
use crate::stores::StoreConnection;

/// Reconcile every registered model's table, store by store
pub async fn run_migrations(registry: &ModelRegistry) -> OrmResult<()> {
    let mut by_store: HashMap<String, (Arc<StoreConnection>, Vec<Arc<ModelHandle>>)> =
        HashMap::new();
    for handle in registry.handles() {
        let store = handle.store();
        by_store
            .entry(store.name().to_string())
            .or_insert_with(|| (Arc::clone(store), Vec::new()))
            .1
            .push(Arc::clone(handle));
    }

    for (name, (store, mut models)) in by_store {
        // deterministic order for logs and FK-free recreation
        models.sort_by(|a, b| a.table_name().cmp(b.table_name()));
        match store.migrate() {
            MigrationStrategy::None => {
                tracing::debug!(store = %name, "migration strategy is none, skipping");
            }
            MigrationStrategy::Drop => migrate_drop(&store, &models).await?,
            MigrationStrategy::Alter => migrate_alter(&store, &models).await?,
        }
    }

    Ok(())
}

async fn migrate_drop(store: &StoreConnection, models: &[Arc<ModelHandle>]) -> OrmResult<()> {
    let dialect = store.dialect();
    tracing::info!(store = %store.name(), tables = models.len(), "recreating tables");

    set_foreign_key_checks(store, false).await;
    for handle in models {
        execute_ddl(store, &drop_table_sql(dialect, handle.table_name())?)
            .await
            .map_err(|e| migration_error(store, handle.table_name(), e))?;
    }
    set_foreign_key_checks(store, true).await;

    for handle in models {
        let ddl = create_table_sql(dialect, handle.table_name(), handle.schema(), false)?;
        execute_ddl(store, &ddl)
            .await
            .map_err(|e| migration_error(store, handle.table_name(), e))?;
    }
    Ok(())
}

async fn migrate_alter(store: &StoreConnection, models: &[Arc<ModelHandle>]) -> OrmResult<()> {
    let dialect = store.dialect();

    for handle in models {
        let table = handle.table_name();
        let ddl = create_table_sql(dialect, table, handle.schema(), true)?;
        execute_ddl(store, &ddl)
            .await
            .map_err(|e| migration_error(store, table, e))?;

        let existing = existing_columns(store, table)
            .await
            .map_err(|e| migration_error(store, table, e))?;
        for field in handle.schema().fields() {
            if existing.contains(&field.name) {
                continue;
            }
            tracing::info!(store = %store.name(), table = %table, column = %field.name,
                "adding missing column");
            let clause = column_clause(dialect, field)?;
            let sql = format!(
                "ALTER TABLE {} ADD COLUMN {}",
                dialect.quote(table),
                clause
            );
            execute_ddl(store, &sql)
                .await
                .map_err(|e| migration_error(store, table, e))?;
        }
    }
    Ok(())
}

async fn execute_ddl(store: &StoreConnection, sql: &str) -> OrmResult<()> {
    tracing::debug!(store = %store.name(), %sql, "ddl");
    Executor::Pool(store.pool())
        .execute(&SqlQuery {
            sql: sql.to_string(),
            params: Vec::new(),
        })
        .await?;
    Ok(())
}

fn migration_error(store: &StoreConnection, table: &str, err: ModelError) -> ModelError {
    ModelError::Migration(format!(
        "Store '{}', table '{}': {}",
        store.name(),
        table,
        err
    ))
}

/// Relax referential checks while tables are recreated. Failures are logged,
/// not fatal; the subsequent DROP surfaces the real error if one exists.
async fn set_foreign_key_checks(store: &StoreConnection, enabled: bool) {
    let sql = match (store.dialect(), enabled) {
        (Dialect::Mysql, false) => "SET FOREIGN_KEY_CHECKS = 0",
        (Dialect::Mysql, true) => "SET FOREIGN_KEY_CHECKS = 1",
        (Dialect::Sqlite, false) => "PRAGMA foreign_keys = OFF",
        (Dialect::Sqlite, true) => "PRAGMA foreign_keys = ON",
        (Dialect::Postgres, false) => "SET session_replication_role = 'replica'",
        (Dialect::Postgres, true) => "SET session_replication_role = 'origin'",
    };
    if let Err(e) = execute_ddl(store, sql).await {
        tracing::warn!(store = %store.name(), error = %e,
            "could not toggle foreign key checks");
    }
}

/// Render a CREATE TABLE statement from a model schema
pub fn create_table_sql(
    dialect: Dialect,
    table: &str,
    schema: &ModelSchema,
    if_not_exists: bool,
) -> OrmResult<String> {
    ensure_identifier(table)?;
    if schema.is_empty() {
        return Err(ModelError::Migration(format!(
            "Table '{}' has no columns",
            table
        )));
    }

    let mut columns = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        columns.push(column_clause(dialect, field)?);
    }

    let clause = if if_not_exists {
        "CREATE TABLE IF NOT EXISTS"
    } else {
        "CREATE TABLE"
    };
    Ok(format!(
        "{} {} ({})",
        clause,
        dialect.quote(table),
        columns.join(", ")
    ))
}

pub fn drop_table_sql(dialect: Dialect, table: &str) -> OrmResult<String> {
    ensure_identifier(table)?;
    Ok(format!("DROP TABLE IF EXISTS {}", dialect.quote(table)))
}

/// Render one column definition
fn column_clause(dialect: Dialect, field: &FieldDefinition) -> OrmResult<String> {
    ensure_identifier(&field.name)?;
    let column = dialect.quote(&field.name);

    if field.primary_key && field.auto_increment {
        return Ok(format!(
            "{} {}",
            column,
            dialect.auto_increment_primary_key(&field.field_type)
        ));
    }

    let mut clause = format!("{} {}", column, dialect.sql_type(&field.field_type));
    if field.primary_key {
        clause.push_str(" PRIMARY KEY");
    } else if !field.allow_null {
        clause.push_str(" NOT NULL");
    }
    if field.unique {
        clause.push_str(" UNIQUE");
    }
    if let Some(default) = &field.default {
        clause.push_str(&format!(" DEFAULT {}", default_literal(dialect, default)?));
    }
    Ok(clause)
}

fn default_literal(dialect: Dialect, value: &Value) -> OrmResult<String> {
    match value {
        Value::Null => Ok("NULL".into()),
        Value::Bool(b) => Ok(match (dialect, b) {
            (Dialect::Postgres, true) => "TRUE".into(),
            (Dialect::Postgres, false) => "FALSE".into(),
            (_, true) => "1".into(),
            (_, false) => "0".into(),
        }),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(format!("'{}'", s.replace('\'', "''"))),
        other => Err(ModelError::Migration(format!(
            "Unsupported default value: {}",
            other
        ))),
    }
}

/// Introspect the current column set of a table
async fn existing_columns(
    store: &StoreConnection,
    table: &str,
) -> OrmResult<HashSet<String>> {
    ensure_identifier(table)?;
    let dialect = store.dialect();
    let query = match dialect {
        Dialect::Sqlite => SqlQuery {
            sql: format!("PRAGMA table_info({})", dialect.quote(table)),
            params: Vec::new(),
        },
        Dialect::Postgres => SqlQuery {
            sql: "SELECT column_name AS name FROM information_schema.columns \
                  WHERE table_name = $1 AND table_schema = current_schema()"
                .into(),
            params: vec![SqlValue::Text(table.to_string())],
        },
        Dialect::Mysql => SqlQuery {
            sql: "SELECT column_name AS name FROM information_schema.columns \
                  WHERE table_name = ? AND table_schema = DATABASE()"
                .into(),
            params: vec![SqlValue::Text(table.to_string())],
        },
    };

    let rows = Executor::Pool(store.pool()).fetch_all(&query).await?;
    let mut columns = HashSet::with_capacity(rows.len());
    for row in rows {
        use sqlx::Row;
        let name: String = row
            .try_get("name")
            .map_err(|e| ModelError::Migration(format!("Column introspection failed: {}", e)))?;
        columns.insert(name);
    }
    Ok(columns)
}
