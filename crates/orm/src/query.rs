//! Dynamic SQL generation
//!
//! Builds dialect-aware SELECT/INSERT/UPDATE/DELETE statements from
//! normalized criteria. Values travel as [`SqlValue`], a small bridge between
//! JSON records and bind parameters; identifiers are validated before they are
//! interpolated into SQL.

use serde_json::{Map, Value};

use footprint_core::Dialect;

use crate::error::{ModelError, OrmResult};
use crate::schema::{FieldDefinition, FieldType};

/// A bind parameter value
///
/// The `Any` driver binds only primitive kinds; richer values (uuid,
/// timestamps, json) are carried as text on the wire and re-typed on decode.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlValue {
    /// Convert a JSON value into a bind parameter
    pub fn from_json(value: &Value) -> SqlValue {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Int(i)
                } else {
                    SqlValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => SqlValue::Text(s.clone()),
            // structured values are stored serialized
            other => SqlValue::Text(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<uuid::Uuid> for SqlValue {
    fn from(value: uuid::Uuid) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<chrono::DateTime<chrono::Utc>> for SqlValue {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        SqlValue::Text(value.to_rfc3339())
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

/// One generated statement plus its bind parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Dialect-specific SQL rendering rules
pub trait DialectSql {
    /// Bind-parameter placeholder for the given zero-based index
    fn placeholder(&self, index: usize) -> String;

    /// Quote a (validated) identifier
    fn quote(&self, identifier: &str) -> String;

    /// Column type for a field definition
    fn sql_type(&self, field_type: &FieldType) -> String;

    /// Column clause for an auto-increment primary key
    fn auto_increment_primary_key(&self, field_type: &FieldType) -> String;

    /// Whether INSERT ... RETURNING is available
    fn supports_returning(&self) -> bool;
}

impl DialectSql for Dialect {
    fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index + 1),
            Dialect::Mysql | Dialect::Sqlite => "?".to_string(),
        }
    }

    fn quote(&self, identifier: &str) -> String {
        match self {
            Dialect::Mysql => format!("`{}`", identifier),
            Dialect::Postgres | Dialect::Sqlite => format!("\"{}\"", identifier),
        }
    }

    fn sql_type(&self, field_type: &FieldType) -> String {
        match (field_type, self) {
            (FieldType::Integer, _) => "INTEGER".into(),
            (FieldType::BigInteger, _) => "BIGINT".into(),
            (FieldType::Float, Dialect::Mysql) => "DOUBLE".into(),
            (FieldType::Float, _) => "DOUBLE PRECISION".into(),
            (FieldType::Boolean, Dialect::Mysql) => "TINYINT(1)".into(),
            (FieldType::Boolean, _) => "BOOLEAN".into(),
            (FieldType::String(Some(len)), _) => format!("VARCHAR({})", len),
            (FieldType::String(None), _) | (FieldType::Text, _) => "TEXT".into(),
            (FieldType::DateTime, Dialect::Postgres) => "TIMESTAMPTZ".into(),
            (FieldType::DateTime, Dialect::Mysql) => "DATETIME".into(),
            (FieldType::DateTime, Dialect::Sqlite) => "TEXT".into(),
            (FieldType::Date, Dialect::Sqlite) => "TEXT".into(),
            (FieldType::Date, _) => "DATE".into(),
            (FieldType::Uuid, Dialect::Postgres) => "UUID".into(),
            (FieldType::Uuid, _) => "CHAR(36)".into(),
            (FieldType::Json, Dialect::Postgres) => "JSONB".into(),
            (FieldType::Json, Dialect::Mysql) => "JSON".into(),
            (FieldType::Json, Dialect::Sqlite) => "TEXT".into(),
        }
    }

    fn auto_increment_primary_key(&self, field_type: &FieldType) -> String {
        match self {
            Dialect::Postgres => match field_type {
                FieldType::BigInteger => "BIGSERIAL PRIMARY KEY".into(),
                _ => "SERIAL PRIMARY KEY".into(),
            },
            Dialect::Mysql => format!("{} AUTO_INCREMENT PRIMARY KEY", self.sql_type(field_type)),
            // sqlite requires INTEGER for rowid aliasing
            Dialect::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT".into(),
        }
    }

    fn supports_returning(&self) -> bool {
        matches!(self, Dialect::Postgres | Dialect::Sqlite)
    }
}

/// Validate an identifier before interpolation into SQL
pub fn ensure_identifier(name: &str) -> OrmResult<&str> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if !valid || name.len() > 64 {
        return Err(ModelError::Query(format!("Invalid identifier '{}'", name)));
    }
    Ok(name)
}

/// Render a where clause from a field → value map, appending bind parameters.
///
/// A null value renders as `IS NULL`, an array as `IN (...)` (an empty array
/// matches nothing), anything else as equality. Returns an empty string for an
/// empty filter.
pub fn build_where(
    dialect: Dialect,
    filter: &Map<String, Value>,
    params: &mut Vec<SqlValue>,
) -> OrmResult<String> {
    if filter.is_empty() {
        return Ok(String::new());
    }

    let mut clauses = Vec::with_capacity(filter.len());
    for (field, value) in filter {
        ensure_identifier(field)?;
        let column = dialect.quote(field);
        match value {
            Value::Null => clauses.push(format!("{} IS NULL", column)),
            Value::Array(items) => {
                if items.is_empty() {
                    clauses.push("1 = 0".to_string());
                    continue;
                }
                let mut placeholders = Vec::with_capacity(items.len());
                for item in items {
                    placeholders.push(dialect.placeholder(params.len()));
                    params.push(SqlValue::from_json(item));
                }
                clauses.push(format!("{} IN ({})", column, placeholders.join(", ")));
            }
            other => {
                clauses.push(format!("{} = {}", column, dialect.placeholder(params.len())));
                params.push(SqlValue::from_json(other));
            }
        }
    }

    Ok(format!(" WHERE {}", clauses.join(" AND ")))
}

/// SELECT * with an optional filter and paging
pub fn build_select(
    dialect: Dialect,
    table: &str,
    filter: &Map<String, Value>,
    limit: Option<u64>,
    offset: Option<u64>,
) -> OrmResult<SqlQuery> {
    ensure_identifier(table)?;
    let mut params = Vec::new();
    let where_clause = build_where(dialect, filter, &mut params)?;

    let mut sql = format!("SELECT * FROM {}{}", dialect.quote(table), where_clause);
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    if let Some(offset) = offset {
        sql.push_str(&format!(" OFFSET {}", offset));
    }

    Ok(SqlQuery { sql, params })
}

/// INSERT one record, optionally with `RETURNING *`
pub fn build_insert(
    dialect: Dialect,
    table: &str,
    record: &Map<String, Value>,
    returning: bool,
) -> OrmResult<SqlQuery> {
    ensure_identifier(table)?;
    if record.is_empty() {
        return Err(ModelError::Query("Cannot insert an empty record".into()));
    }

    let mut columns = Vec::with_capacity(record.len());
    let mut placeholders = Vec::with_capacity(record.len());
    let mut params = Vec::with_capacity(record.len());
    for (field, value) in record {
        ensure_identifier(field)?;
        columns.push(dialect.quote(field));
        placeholders.push(dialect.placeholder(params.len()));
        params.push(SqlValue::from_json(value));
    }

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        dialect.quote(table),
        columns.join(", "),
        placeholders.join(", ")
    );
    if returning {
        sql.push_str(" RETURNING *");
    }

    Ok(SqlQuery { sql, params })
}

/// UPDATE matching rows, optionally with `RETURNING *`
pub fn build_update(
    dialect: Dialect,
    table: &str,
    values: &Map<String, Value>,
    filter: &Map<String, Value>,
    returning: bool,
) -> OrmResult<SqlQuery> {
    ensure_identifier(table)?;
    if values.is_empty() {
        return Err(ModelError::Query("Cannot update with an empty value set".into()));
    }

    let mut params = Vec::new();
    let mut assignments = Vec::with_capacity(values.len());
    for (field, value) in values {
        ensure_identifier(field)?;
        assignments.push(format!(
            "{} = {}",
            dialect.quote(field),
            dialect.placeholder(params.len())
        ));
        params.push(SqlValue::from_json(value));
    }

    let where_clause = build_where(dialect, filter, &mut params)?;
    let mut sql = format!(
        "UPDATE {} SET {}{}",
        dialect.quote(table),
        assignments.join(", "),
        where_clause
    );
    if returning {
        sql.push_str(" RETURNING *");
    }

    Ok(SqlQuery { sql, params })
}

/// DELETE matching rows
pub fn build_delete(
    dialect: Dialect,
    table: &str,
    filter: &Map<String, Value>,
) -> OrmResult<SqlQuery> {
    ensure_identifier(table)?;
    let mut params = Vec::new();
    let where_clause = build_where(dialect, filter, &mut params)?;
    Ok(SqlQuery {
        sql: format!("DELETE FROM {}{}", dialect.quote(table), where_clause),
        params,
    })
}
