//! Statement execution
//!
//! Runs generated statements against either a store's pool or an in-flight
//! transaction, and decodes result rows back into JSON records using the
//! model schema as the type hint.

use serde_json::{Map, Number, Value};
use sqlx::any::{AnyQueryResult, AnyRow};
use sqlx::{AnyPool, Column, Row, TypeInfo, ValueRef};

use footprint_core::Dialect;

use crate::error::{ModelError, OrmResult};
use crate::query::{build_insert, build_select, DialectSql, SqlQuery, SqlValue};
use crate::schema::{FieldType, ModelSchema};

/// A fetched row, decoded field-by-field
pub type Record = Map<String, Value>;

/// Where a statement runs: directly on the pool, or inside a transaction
pub enum Executor<'a> {
    Pool(&'a AnyPool),
    Tx(&'a mut crate::stores::StoreTransaction),
}

impl<'a> Executor<'a> {
    /// Execute a statement, returning the driver result (affected rows,
    /// last insert id where the backend reports one)
    pub async fn execute(&mut self, query: &SqlQuery) -> OrmResult<AnyQueryResult> {
        tracing::trace!(sql = %query.sql, params = query.params.len(), "execute");
        let prepared = bind_params(sqlx::query(&query.sql), &query.params);
        let result = match self {
            Executor::Pool(pool) => prepared.execute(*pool).await,
            Executor::Tx(tx) => prepared.execute(&mut ***tx).await,
        };
        result.map_err(ModelError::from)
    }

    pub async fn fetch_all(&mut self, query: &SqlQuery) -> OrmResult<Vec<AnyRow>> {
        tracing::trace!(sql = %query.sql, params = query.params.len(), "fetch_all");
        let prepared = bind_params(sqlx::query(&query.sql), &query.params);
        let rows = match self {
            Executor::Pool(pool) => prepared.fetch_all(*pool).await,
            Executor::Tx(tx) => prepared.fetch_all(&mut ***tx).await,
        };
        rows.map_err(ModelError::from)
    }

    pub async fn fetch_optional(&mut self, query: &SqlQuery) -> OrmResult<Option<AnyRow>> {
        tracing::trace!(sql = %query.sql, params = query.params.len(), "fetch_optional");
        let prepared = bind_params(sqlx::query(&query.sql), &query.params);
        let row = match self {
            Executor::Pool(pool) => prepared.fetch_optional(*pool).await,
            Executor::Tx(tx) => prepared.fetch_optional(&mut ***tx).await,
        };
        row.map_err(ModelError::from)
    }
}

fn bind_params<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>,
    params: &'q [SqlValue],
) -> sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(Option::<String>::None),
            SqlValue::Bool(b) => query.bind(*b),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::Text(s) => query.bind(s.as_str()),
        };
    }
    query
}

/// Decode a fetched row into a JSON record, consulting the schema for the
/// expected type of each column
pub fn row_to_record(row: &AnyRow, schema: &ModelSchema) -> OrmResult<Record> {
    let mut record = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();
        let hint = schema.get(&name).map(|f| &f.field_type);
        let value = decode_column(row, index, hint)?;
        record.insert(name, value);
    }
    Ok(record)
}

fn decode_column(row: &AnyRow, index: usize, hint: Option<&FieldType>) -> OrmResult<Value> {
    // the driver reports NULL as its own type, so typed decodes reject it
    // (AnyValueRef::is_null is hardcoded to false in sqlx 0.7, so inspect
    // the reported type instead)
    if row
        .try_get_raw(index)
        .is_ok_and(|raw| raw.type_info().name() == "NULL")
    {
        return Ok(Value::Null);
    }
    match hint {
        Some(FieldType::Integer) | Some(FieldType::BigInteger) => {
            if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
                return Ok(v.map(Value::from).unwrap_or(Value::Null));
            }
            decode_fallback(row, index)
        }
        Some(FieldType::Float) => {
            if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
                return Ok(v
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null));
            }
            decode_fallback(row, index)
        }
        Some(FieldType::Boolean) => {
            if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
                return Ok(v.map(Value::Bool).unwrap_or(Value::Null));
            }
            // sqlite reports booleans as integers
            if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
                return Ok(v.map(|i| Value::Bool(i != 0)).unwrap_or(Value::Null));
            }
            decode_fallback(row, index)
        }
        Some(FieldType::Json) => {
            if let Ok(Some(raw)) = row.try_get::<Option<String>, _>(index) {
                return Ok(serde_json::from_str(&raw).unwrap_or(Value::String(raw)));
            }
            decode_fallback(row, index)
        }
        Some(FieldType::String(_))
        | Some(FieldType::Text)
        | Some(FieldType::DateTime)
        | Some(FieldType::Date)
        | Some(FieldType::Uuid) => {
            if let Ok(v) = row.try_get::<Option<String>, _>(index) {
                return Ok(v.map(Value::String).unwrap_or(Value::Null));
            }
            decode_fallback(row, index)
        }
        None => decode_fallback(row, index),
    }
}

/// Untyped decode: try the primitive kinds the driver reports
fn decode_fallback(row: &AnyRow, index: usize) -> OrmResult<Value> {
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return Ok(v.map(Value::from).unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return Ok(v
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null));
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
        return Ok(v.map(Value::Bool).unwrap_or(Value::Null));
    }
    match row.try_get::<Option<String>, _>(index) {
        Ok(v) => Ok(v.map(Value::String).unwrap_or(Value::Null)),
        Err(e) => Err(ModelError::Serialization(format!(
            "Failed to decode column {}: {}",
            index, e
        ))),
    }
}

/// Insert one record and return the created row.
///
/// Uses `INSERT ... RETURNING` where the dialect supports it; otherwise the
/// row is re-read by primary key, preferring the caller-supplied key value
/// over the driver-reported last insert id.
pub async fn insert_record(
    exec: &mut Executor<'_>,
    dialect: Dialect,
    table: &str,
    values: &Record,
    schema: &ModelSchema,
) -> OrmResult<Record> {
    if dialect.supports_returning() {
        let query = build_insert(dialect, table, values, true)?;
        let row = exec.fetch_optional(&query).await?.ok_or_else(|| {
            ModelError::Database(format!("Insert into '{}' returned no row", table))
        })?;
        return row_to_record(&row, schema);
    }

    let query = build_insert(dialect, table, values, false)?;
    let result = exec.execute(&query).await?;

    let pk_name = schema.primary_key_name();
    let pk_value = values
        .get(pk_name)
        .cloned()
        .filter(|v| !v.is_null())
        .or_else(|| result.last_insert_id().map(Value::from));

    match pk_value {
        Some(pk) => {
            let mut filter = Map::new();
            filter.insert(pk_name.to_string(), pk);
            let select = build_select(dialect, table, &filter, Some(1), None)?;
            match exec.fetch_optional(&select).await? {
                Some(row) => row_to_record(&row, schema),
                None => Ok(values.clone()),
            }
        }
        // no way to re-read; echo the input values
        None => Ok(values.clone()),
    }
}
