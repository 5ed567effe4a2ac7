//! Footprint adapter
//!
//! The uniform model-access surface: create/find/update/destroy plus the four
//! association operations, addressed by model name and JSON criteria. Every
//! operation accepts an optional in-flight transaction; when none is supplied
//! the statement runs on the owning store's pool, except `create_association`,
//! which opens a transaction of its own because it writes more than one row.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::{Map, Value};

use crate::criteria::{Criteria, Populate, QueryOptions};
use crate::error::{ModelError, OrmResult, ValidationFailure};
use crate::executor::{insert_record, row_to_record, Executor, Record};
use crate::query::{build_delete, build_select, build_update, DialectSql};
use crate::registry::{Association, AssociationKind, ModelHandle, ModelRegistry};
use crate::schema::ModelSchema;
use crate::stores::StoreTransaction;

/// Result of a find: a single (possibly absent) record, or a list
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    One(Option<Record>),
    Many(Vec<Record>),
}

impl QueryOutput {
    /// Collapse to a record list; a single result becomes a 0/1-element list
    pub fn into_records(self) -> Vec<Record> {
        match self {
            QueryOutput::One(record) => record.into_iter().collect(),
            QueryOutput::Many(records) => records,
        }
    }

    /// The first record, if any
    pub fn into_one(self) -> Option<Record> {
        match self {
            QueryOutput::One(record) => record,
            QueryOutput::Many(records) => records.into_iter().next(),
        }
    }
}

/// Result of an update: the refreshed rows where the backend can return them,
/// otherwise the affected-row count
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutput {
    Count(u64),
    Records(Vec<Record>),
}

impl UpdateOutput {
    pub fn affected(&self) -> u64 {
        match self {
            UpdateOutput::Count(count) => *count,
            UpdateOutput::Records(records) => records.len() as u64,
        }
    }
}

/// The model-access service. Cheap to clone; all state lives in the registry.
#[derive(Clone)]
pub struct FootprintService {
    registry: Arc<ModelRegistry>,
    default_limit: Option<u64>,
}

impl std::fmt::Debug for FootprintService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FootprintService")
            .field("models", &self.registry.len())
            .field("default_limit", &self.default_limit)
            .finish()
    }
}

impl FootprintService {
    pub fn new(registry: Arc<ModelRegistry>, default_limit: Option<u64>) -> Self {
        Self {
            registry,
            default_limit,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Insert records and return them as stored.
    ///
    /// A single value object yields a single record; an array of objects
    /// inserts each in order and yields the list. Requested associations are
    /// expanded on the created records.
    pub async fn create(
        &self,
        model: &str,
        values: Value,
        options: &QueryOptions,
        tx: Option<&mut StoreTransaction>,
    ) -> OrmResult<QueryOutput> {
        let handle = self.registry.get(model)?;
        let mut exec = executor(handle, tx);

        let output = match values {
            Value::Array(items) => {
                let mut records = Vec::with_capacity(items.len());
                for item in items {
                    records.push(insert_one(handle, as_object(item)?, &mut exec).await?);
                }
                tracing::debug!(model = %handle.global_id(), count = records.len(),
                    "records created");
                QueryOutput::Many(records)
            }
            other => {
                let record = insert_one(handle, as_object(other)?, &mut exec).await?;
                tracing::debug!(model = %handle.global_id(), "record created");
                QueryOutput::One(Some(record))
            }
        };

        self.expand(handle, output, &options.populate, &mut exec).await
    }

    /// Fetch records by primary key value or filter object.
    ///
    /// A primary key criteria (or `find_one`) yields a single, possibly
    /// absent, record; a filter yields a list, capped by the default limit
    /// when the caller sets none.
    pub async fn find(
        &self,
        model: &str,
        criteria: Value,
        options: &QueryOptions,
        tx: Option<&mut StoreTransaction>,
    ) -> OrmResult<QueryOutput> {
        let handle = self.registry.get(model)?;
        let (criteria, pagination) = Criteria::parse(criteria)?;
        let dialect = handle.store().dialect();
        let mut exec = executor(handle, tx);

        let output = if criteria.is_id() || options.find_one {
            let filter = criteria.into_filter(handle.primary_key_name());
            let query = build_select(dialect, handle.table_name(), &filter, Some(1), None)?;
            let record = match exec.fetch_optional(&query).await? {
                Some(row) => Some(row_to_record(&row, handle.schema())?),
                None => None,
            };
            QueryOutput::One(record)
        } else {
            let filter = criteria.into_filter(handle.primary_key_name());
            let limit = pagination.limit.or(options.limit).or(self.default_limit);
            let offset = pagination.offset.or(options.offset);
            let query = build_select(dialect, handle.table_name(), &filter, limit, offset)?;
            let rows = exec.fetch_all(&query).await?;
            let mut records = Vec::with_capacity(rows.len());
            for row in rows {
                records.push(row_to_record(&row, handle.schema())?);
            }
            QueryOutput::Many(records)
        };

        self.expand(handle, output, &options.populate, &mut exec).await
    }

    /// Update matching records. A primary key criteria yields the affected
    /// count; filter criteria yield the refreshed rows on backends with
    /// `RETURNING` and the count elsewhere.
    pub async fn update(
        &self,
        model: &str,
        criteria: Value,
        values: Value,
        tx: Option<&mut StoreTransaction>,
    ) -> OrmResult<UpdateOutput> {
        let handle = self.registry.get(model)?;
        let (criteria, _) = Criteria::parse(criteria)?;
        let scalar = criteria.is_id();
        let filter = criteria.into_filter(handle.primary_key_name());
        let mut values = sanitize_values(handle.schema(), as_object(values)?);
        stamp_update_timestamp(handle.schema(), &mut values);

        let dialect = handle.store().dialect();
        let mut exec = executor(handle, tx);
        let output =
            run_update(&mut exec, dialect, handle.table_name(), handle.schema(), &values, &filter)
                .await?;
        tracing::debug!(model = %handle.global_id(), affected = output.affected(), "records updated");
        if scalar {
            return Ok(UpdateOutput::Count(output.affected()));
        }
        Ok(output)
    }

    /// Delete matching records, returning the affected count
    pub async fn destroy(
        &self,
        model: &str,
        criteria: Value,
        tx: Option<&mut StoreTransaction>,
    ) -> OrmResult<u64> {
        let handle = self.registry.get(model)?;
        let (criteria, _) = Criteria::parse(criteria)?;
        let filter = criteria.into_filter(handle.primary_key_name());

        let query = build_delete(handle.store().dialect(), handle.table_name(), &filter)?;
        let mut exec = executor(handle, tx);
        let affected = exec.execute(&query).await?.rows_affected();
        tracing::debug!(model = %handle.global_id(), affected, "records destroyed");
        Ok(affected)
    }

    /// Create a record related to an existing parent.
    ///
    /// Writes the child and the linkage (parent reference or join row)
    /// atomically: inside the supplied transaction, or one opened here.
    pub async fn create_association(
        &self,
        model: &str,
        parent_pk: Value,
        association: &str,
        values: Value,
        tx: Option<&mut StoreTransaction>,
    ) -> OrmResult<Record> {
        let handle = self.registry.get(model)?;
        let assoc = handle
            .association(association)
            .cloned()
            .ok_or_else(|| ModelError::association_not_found(handle.global_id(), association))?;
        let values = as_object(values)?;

        match tx {
            Some(tx) => {
                let mut exec = Executor::Tx(tx);
                self.create_association_in(handle, &parent_pk, &assoc, values, &mut exec)
                    .await
            }
            None => {
                let mut own = handle.store().begin().await.map_err(ModelError::from)?;
                let result = {
                    let mut exec = Executor::Tx(&mut own);
                    self.create_association_in(handle, &parent_pk, &assoc, values, &mut exec)
                        .await
                };
                match result {
                    Ok(record) => {
                        own.commit()
                            .await
                            .map_err(|e| ModelError::Transaction(e.to_string()))?;
                        Ok(record)
                    }
                    Err(err) => {
                        if let Err(rollback) = own.rollback().await {
                            tracing::warn!(error = %rollback, "rollback failed");
                        }
                        Err(err)
                    }
                }
            }
        }
    }

    /// Fetch the records related to a parent through one association
    pub async fn find_association(
        &self,
        model: &str,
        parent_pk: Value,
        association: &str,
        criteria: Value,
        options: &QueryOptions,
        tx: Option<&mut StoreTransaction>,
    ) -> OrmResult<QueryOutput> {
        let handle = self.registry.get(model)?;
        let assoc = handle
            .association(association)
            .cloned()
            .ok_or_else(|| ModelError::association_not_found(handle.global_id(), association))?;
        let target = self.registry.get(&assoc.target)?;
        let (criteria, pagination) = Criteria::parse(criteria)?;
        let dialect = handle.store().dialect();
        let mut exec = executor(handle, tx);

        let output = match &assoc.kind {
            AssociationKind::OneToMany {
                foreign_key,
                single,
            } => {
                let mut filter = criteria.into_filter(target.primary_key_name());
                filter.insert(foreign_key.clone(), parent_pk);
                if *single || options.find_one {
                    let query =
                        build_select(dialect, target.table_name(), &filter, Some(1), None)?;
                    let record = match exec.fetch_optional(&query).await? {
                        Some(row) => Some(row_to_record(&row, target.schema())?),
                        None => None,
                    };
                    QueryOutput::One(record)
                } else {
                    let limit = pagination.limit.or(options.limit).or(self.default_limit);
                    let query = build_select(
                        dialect,
                        target.table_name(),
                        &filter,
                        limit,
                        pagination.offset.or(options.offset),
                    )?;
                    let rows = exec.fetch_all(&query).await?;
                    let mut records = Vec::with_capacity(rows.len());
                    for row in rows {
                        records.push(row_to_record(&row, target.schema())?);
                    }
                    QueryOutput::Many(records)
                }
            }
            AssociationKind::ManyToOne { foreign_key } => {
                let parent_record =
                    fetch_by_pk(&mut exec, dialect, handle, &parent_pk).await?.ok_or_else(
                        || record_not_found(handle.global_id(), &parent_pk),
                    )?;
                match parent_record.get(foreign_key) {
                    None | Some(Value::Null) => QueryOutput::One(None),
                    Some(reference) => {
                        let mut filter = criteria.into_filter(target.primary_key_name());
                        filter.insert(target.primary_key_name().to_string(), reference.clone());
                        let query =
                            build_select(dialect, target.table_name(), &filter, Some(1), None)?;
                        let record = match exec.fetch_optional(&query).await? {
                            Some(row) => Some(row_to_record(&row, target.schema())?),
                            None => None,
                        };
                        QueryOutput::One(record)
                    }
                }
            }
            AssociationKind::ManyToMany {
                join_model,
                left_key,
                right_key,
            } => {
                let join = self.registry.get(join_model)?;
                let rights =
                    join_targets(&mut exec, dialect, join, left_key, right_key, &parent_pk)
                        .await?;
                if rights.is_empty() {
                    QueryOutput::Many(Vec::new())
                } else {
                    let mut filter = criteria.into_filter(target.primary_key_name());
                    filter.insert(target.primary_key_name().to_string(), Value::Array(rights));
                    let limit = pagination.limit.or(options.limit).or(self.default_limit);
                    let query = build_select(
                        dialect,
                        target.table_name(),
                        &filter,
                        limit,
                        pagination.offset.or(options.offset),
                    )?;
                    let rows = exec.fetch_all(&query).await?;
                    let mut records = Vec::with_capacity(rows.len());
                    for row in rows {
                        records.push(row_to_record(&row, target.schema())?);
                    }
                    QueryOutput::Many(records)
                }
            }
        };

        self.expand(target, output, &options.populate, &mut exec).await
    }

    /// Update the records related to a parent through one association
    pub async fn update_association(
        &self,
        model: &str,
        parent_pk: Value,
        association: &str,
        criteria: Value,
        values: Value,
        mut tx: Option<&mut StoreTransaction>,
    ) -> OrmResult<UpdateOutput> {
        let handle = self.registry.get(model)?;
        let assoc = handle
            .association(association)
            .cloned()
            .ok_or_else(|| ModelError::association_not_found(handle.global_id(), association))?;
        let target = self.registry.get(&assoc.target)?;

        let ids = self
            .related_ids(model, parent_pk, association, criteria, reborrow(&mut tx))
            .await?;
        if ids.is_empty() {
            return Ok(UpdateOutput::Count(0));
        }

        let mut values = sanitize_values(target.schema(), as_object(values)?);
        stamp_update_timestamp(target.schema(), &mut values);
        let mut filter = Map::new();
        filter.insert(target.primary_key_name().to_string(), Value::Array(ids));

        let dialect = handle.store().dialect();
        let mut exec = executor(handle, tx);
        let output =
            run_update(&mut exec, dialect, target.table_name(), target.schema(), &values, &filter)
                .await?;
        tracing::debug!(model = %handle.global_id(), association = %assoc.name,
            affected = output.affected(), "associated records updated");
        Ok(output)
    }

    /// Delete the records related to a parent through one association.
    ///
    /// Each record is destroyed individually; outside a transaction the
    /// deletes run concurrently and the primary keys of the destroyed records
    /// are returned.
    pub async fn destroy_association(
        &self,
        model: &str,
        parent_pk: Value,
        association: &str,
        criteria: Value,
        mut tx: Option<&mut StoreTransaction>,
    ) -> OrmResult<Vec<Value>> {
        let handle = self.registry.get(model)?;
        let assoc = handle
            .association(association)
            .cloned()
            .ok_or_else(|| ModelError::association_not_found(handle.global_id(), association))?;
        let target = self.registry.get(&assoc.target)?;

        let ids = self
            .related_ids(
                model,
                parent_pk.clone(),
                association,
                criteria,
                reborrow(&mut tx),
            )
            .await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let dialect = handle.store().dialect();

        // a join row must not outlive the record it links to
        if let AssociationKind::ManyToMany {
            join_model,
            left_key,
            right_key,
        } = &assoc.kind
        {
            let join = self.registry.get(join_model)?;
            let mut filter = Map::new();
            filter.insert(left_key.clone(), parent_pk);
            filter.insert(right_key.clone(), Value::Array(ids.clone()));
            let query = build_delete(dialect, join.table_name(), &filter)?;
            executor(handle, reborrow(&mut tx)).execute(&query).await?;
        }

        match tx {
            Some(tx) => {
                let mut exec = Executor::Tx(tx);
                for id in &ids {
                    let mut filter = Map::new();
                    filter.insert(target.primary_key_name().to_string(), id.clone());
                    let query = build_delete(dialect, target.table_name(), &filter)?;
                    exec.execute(&query).await?;
                }
            }
            None => {
                let deletes = ids.iter().map(|id| {
                    let mut filter = Map::new();
                    filter.insert(target.primary_key_name().to_string(), id.clone());
                    async move {
                        let query = build_delete(dialect, target.table_name(), &filter)?;
                        Executor::Pool(handle.store().pool()).execute(&query).await?;
                        Ok::<(), ModelError>(())
                    }
                });
                join_all(deletes)
                    .await
                    .into_iter()
                    .collect::<OrmResult<Vec<()>>>()?;
            }
        }

        tracing::debug!(model = %handle.global_id(), association = %assoc.name,
            destroyed = ids.len(), "associated records destroyed");
        Ok(ids)
    }

    /// Primary keys of the records an association criteria addresses
    async fn related_ids(
        &self,
        model: &str,
        parent_pk: Value,
        association: &str,
        criteria: Value,
        tx: Option<&mut StoreTransaction>,
    ) -> OrmResult<Vec<Value>> {
        let handle = self.registry.get(model)?;
        let assoc = handle
            .association(association)
            .cloned()
            .ok_or_else(|| ModelError::association_not_found(handle.global_id(), association))?;
        let target = self.registry.get(&assoc.target)?;

        let found = self
            .find_association(
                model,
                parent_pk,
                association,
                criteria,
                &QueryOptions::default(),
                tx,
            )
            .await?;
        let pk_name = target.primary_key_name();
        Ok(found
            .into_records()
            .into_iter()
            .filter_map(|record| {
                record.get(pk_name).cloned().filter(|v| !v.is_null())
            })
            .collect())
    }

    async fn create_association_in(
        &self,
        handle: &ModelHandle,
        parent_pk: &Value,
        assoc: &Association,
        values: Map<String, Value>,
        exec: &mut Executor<'_>,
    ) -> OrmResult<Record> {
        let target = self.registry.get(&assoc.target)?;
        let dialect = handle.store().dialect();

        fetch_by_pk(exec, dialect, handle, parent_pk)
            .await?
            .ok_or_else(|| record_not_found(handle.global_id(), parent_pk))?;

        let mut values = values;
        let record = match &assoc.kind {
            AssociationKind::OneToMany { foreign_key, .. } => {
                values.insert(foreign_key.clone(), parent_pk.clone());
                insert_one(target, values, exec).await?
            }
            AssociationKind::ManyToOne { foreign_key } => {
                let record = insert_one(target, values, exec).await?;

                let reference = record
                    .get(target.primary_key_name())
                    .cloned()
                    .unwrap_or(Value::Null);
                let mut parent_values = Map::new();
                parent_values.insert(foreign_key.clone(), reference);
                stamp_update_timestamp(handle.schema(), &mut parent_values);
                let mut filter = Map::new();
                filter.insert(handle.primary_key_name().to_string(), parent_pk.clone());
                let query = build_update(
                    dialect,
                    handle.table_name(),
                    &parent_values,
                    &filter,
                    false,
                )?;
                exec.execute(&query).await?;
                record
            }
            AssociationKind::ManyToMany {
                join_model,
                left_key,
                right_key,
            } => {
                let record = insert_one(target, values, exec).await?;

                let join = self.registry.get(join_model)?;
                let reference = record
                    .get(target.primary_key_name())
                    .cloned()
                    .unwrap_or(Value::Null);
                let mut join_values = Map::new();
                join_values.insert(left_key.clone(), parent_pk.clone());
                join_values.insert(right_key.clone(), reference);
                insert_one(join, join_values, exec).await?;
                record
            }
        };

        tracing::debug!(model = %handle.global_id(), association = %assoc.name,
            "associated record created");
        Ok(record)
    }

    /// Attach requested associations to fetched records, batched per
    /// association rather than per record
    async fn expand(
        &self,
        handle: &ModelHandle,
        output: QueryOutput,
        populate: &Populate,
        exec: &mut Executor<'_>,
    ) -> OrmResult<QueryOutput> {
        if *populate == Populate::None {
            return Ok(output);
        }

        let associations: Vec<Association> = match populate {
            Populate::All => handle.associations().cloned().collect(),
            Populate::Names(names) => {
                let mut list = Vec::with_capacity(names.len());
                for name in names {
                    list.push(handle.association(name).cloned().ok_or_else(|| {
                        ModelError::association_not_found(handle.global_id(), name)
                    })?);
                }
                list
            }
            Populate::None => return Ok(output),
        };

        let (mut records, single) = match output {
            QueryOutput::One(None) => return Ok(QueryOutput::One(None)),
            QueryOutput::One(Some(record)) => (vec![record], true),
            QueryOutput::Many(records) => {
                if records.is_empty() {
                    return Ok(QueryOutput::Many(records));
                }
                (records, false)
            }
        };

        for assoc in &associations {
            self.attach(handle, &mut records, assoc, exec).await?;
        }

        Ok(if single {
            QueryOutput::One(records.into_iter().next())
        } else {
            QueryOutput::Many(records)
        })
    }

    async fn attach(
        &self,
        handle: &ModelHandle,
        records: &mut [Record],
        assoc: &Association,
        exec: &mut Executor<'_>,
    ) -> OrmResult<()> {
        let target = self.registry.get(&assoc.target)?;
        let dialect = handle.store().dialect();
        let pk_name = handle.primary_key_name();

        match &assoc.kind {
            AssociationKind::OneToMany {
                foreign_key,
                single,
            } => {
                let parent_keys = collect_values(records, pk_name);
                if parent_keys.is_empty() {
                    return Ok(());
                }
                let mut filter = Map::new();
                filter.insert(foreign_key.clone(), Value::Array(parent_keys));
                let query = build_select(dialect, target.table_name(), &filter, None, None)?;
                let rows = exec.fetch_all(&query).await?;

                let mut grouped: HashMap<String, Vec<Record>> = HashMap::new();
                for row in rows {
                    let record = row_to_record(&row, target.schema())?;
                    if let Some(key) = record.get(foreign_key) {
                        grouped.entry(value_key(key)).or_default().push(record);
                    }
                }
                for record in records.iter_mut() {
                    let related = record
                        .get(pk_name)
                        .map(value_key)
                        .and_then(|key| grouped.remove(&key))
                        .unwrap_or_default();
                    let value = if *single {
                        related
                            .into_iter()
                            .next()
                            .map(Value::Object)
                            .unwrap_or(Value::Null)
                    } else {
                        Value::Array(related.into_iter().map(Value::Object).collect())
                    };
                    record.insert(assoc.name.clone(), value);
                }
            }
            AssociationKind::ManyToOne { foreign_key } => {
                let references = collect_values(records, foreign_key);
                let mut by_key: HashMap<String, Record> = HashMap::new();
                if !references.is_empty() {
                    let mut filter = Map::new();
                    filter.insert(
                        target.primary_key_name().to_string(),
                        Value::Array(references),
                    );
                    let query = build_select(dialect, target.table_name(), &filter, None, None)?;
                    for row in exec.fetch_all(&query).await? {
                        let record = row_to_record(&row, target.schema())?;
                        if let Some(key) = record.get(target.primary_key_name()) {
                            by_key.insert(value_key(key), record);
                        }
                    }
                }
                for record in records.iter_mut() {
                    let related = record
                        .get(foreign_key)
                        .filter(|v| !v.is_null())
                        .map(value_key)
                        .and_then(|key| by_key.get(&key).cloned())
                        .map(Value::Object)
                        .unwrap_or(Value::Null);
                    record.insert(assoc.name.clone(), related);
                }
            }
            AssociationKind::ManyToMany {
                join_model,
                left_key,
                right_key,
            } => {
                let join = self.registry.get(join_model)?;
                let parent_keys = collect_values(records, pk_name);
                if parent_keys.is_empty() {
                    return Ok(());
                }
                let mut filter = Map::new();
                filter.insert(left_key.clone(), Value::Array(parent_keys));
                let query = build_select(dialect, join.table_name(), &filter, None, None)?;

                // parent key -> target references, in join-row order
                let mut links: HashMap<String, Vec<Value>> = HashMap::new();
                let mut references = Vec::new();
                for row in exec.fetch_all(&query).await? {
                    let join_record = row_to_record(&row, join.schema())?;
                    if let (Some(left), Some(right)) =
                        (join_record.get(left_key), join_record.get(right_key))
                    {
                        links
                            .entry(value_key(left))
                            .or_default()
                            .push(right.clone());
                        references.push(right.clone());
                    }
                }

                let mut by_key: HashMap<String, Record> = HashMap::new();
                if !references.is_empty() {
                    let mut filter = Map::new();
                    filter.insert(
                        target.primary_key_name().to_string(),
                        Value::Array(references),
                    );
                    let query = build_select(dialect, target.table_name(), &filter, None, None)?;
                    for row in exec.fetch_all(&query).await? {
                        let record = row_to_record(&row, target.schema())?;
                        if let Some(key) = record.get(target.primary_key_name()) {
                            by_key.insert(value_key(key), record);
                        }
                    }
                }

                for record in records.iter_mut() {
                    let related: Vec<Value> = record
                        .get(pk_name)
                        .map(value_key)
                        .and_then(|key| links.remove(&key))
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(|reference| by_key.get(&value_key(&reference)).cloned())
                        .map(Value::Object)
                        .collect();
                    record.insert(assoc.name.clone(), Value::Array(related));
                }
            }
        }

        Ok(())
    }
}

/// Sanitize, stamp, validate and insert one record
async fn insert_one(
    handle: &ModelHandle,
    values: Map<String, Value>,
    exec: &mut Executor<'_>,
) -> OrmResult<Record> {
    let mut values = sanitize_values(handle.schema(), values);
    stamp_create_timestamps(handle.schema(), &mut values);
    validate_required(handle.global_id(), handle.schema(), &values)?;
    insert_record(
        exec,
        handle.store().dialect(),
        handle.table_name(),
        &values,
        handle.schema(),
    )
    .await
}

fn executor<'a>(handle: &'a ModelHandle, tx: Option<&'a mut StoreTransaction>) -> Executor<'a> {
    match tx {
        Some(tx) => Executor::Tx(tx),
        None => Executor::Pool(handle.store().pool()),
    }
}

fn reborrow<'a>(tx: &'a mut Option<&mut StoreTransaction>) -> Option<&'a mut StoreTransaction> {
    tx.as_mut().map(|t| &mut **t)
}

async fn fetch_by_pk(
    exec: &mut Executor<'_>,
    dialect: footprint_core::Dialect,
    handle: &ModelHandle,
    pk: &Value,
) -> OrmResult<Option<Record>> {
    let mut filter = Map::new();
    filter.insert(handle.primary_key_name().to_string(), pk.clone());
    let query = build_select(dialect, handle.table_name(), &filter, Some(1), None)?;
    match exec.fetch_optional(&query).await? {
        Some(row) => Ok(Some(row_to_record(&row, handle.schema())?)),
        None => Ok(None),
    }
}

/// Target-side references held by a parent's join rows
async fn join_targets(
    exec: &mut Executor<'_>,
    dialect: footprint_core::Dialect,
    join: &ModelHandle,
    left_key: &str,
    right_key: &str,
    parent_pk: &Value,
) -> OrmResult<Vec<Value>> {
    let mut filter = Map::new();
    filter.insert(left_key.to_string(), parent_pk.clone());
    let query = build_select(dialect, join.table_name(), &filter, None, None)?;
    let rows = exec.fetch_all(&query).await?;
    let mut rights = Vec::with_capacity(rows.len());
    for row in rows {
        let record = row_to_record(&row, join.schema())?;
        if let Some(value) = record.get(right_key) {
            if !value.is_null() {
                rights.push(value.clone());
            }
        }
    }
    Ok(rights)
}

async fn run_update(
    exec: &mut Executor<'_>,
    dialect: footprint_core::Dialect,
    table: &str,
    schema: &ModelSchema,
    values: &Map<String, Value>,
    filter: &Map<String, Value>,
) -> OrmResult<UpdateOutput> {
    if dialect.supports_returning() {
        let query = build_update(dialect, table, values, filter, true)?;
        let rows = exec.fetch_all(&query).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(row_to_record(&row, schema)?);
        }
        Ok(UpdateOutput::Records(records))
    } else {
        let query = build_update(dialect, table, values, filter, false)?;
        let result = exec.execute(&query).await?;
        Ok(UpdateOutput::Count(result.rows_affected()))
    }
}

/// Distinct non-null values of one field across records
fn collect_values(records: &[Record], field: &str) -> Vec<Value> {
    let mut seen = std::collections::HashSet::new();
    let mut values = Vec::new();
    for record in records {
        if let Some(value) = record.get(field) {
            if !value.is_null() && seen.insert(value_key(value)) {
                values.push(value.clone());
            }
        }
    }
    values
}

/// Grouping key for a JSON value; records join on serialized equality
fn value_key(value: &Value) -> String {
    value.to_string()
}

fn record_not_found(model: &str, pk: &Value) -> ModelError {
    ModelError::NotFound(format!(
        "No record found with primary key {} on model '{}'",
        pk, model
    ))
}

fn as_object(values: Value) -> OrmResult<Map<String, Value>> {
    match values {
        Value::Object(map) => Ok(map),
        other => Err(ModelError::Query(format!(
            "Record values must be an object, got {}",
            match other {
                Value::Null => "null",
                Value::Bool(_) => "boolean",
                Value::Number(_) => "number",
                Value::String(_) => "string",
                Value::Array(_) => "array",
                Value::Object(_) => "object",
            }
        ))),
    }
}

/// Drop fields the schema does not declare; unknown attributes are ignored
/// rather than rejected
fn sanitize_values(schema: &ModelSchema, values: Map<String, Value>) -> Map<String, Value> {
    values
        .into_iter()
        .filter(|(field, _)| schema.contains(field))
        .collect()
}

fn now_stamp() -> Value {
    Value::String(chrono::Utc::now().to_rfc3339())
}

fn stamp_create_timestamps(schema: &ModelSchema, values: &mut Map<String, Value>) {
    for column in ["created_at", "updated_at"] {
        if schema.contains(column) && !values.get(column).is_some_and(|v| !v.is_null()) {
            values.insert(column.to_string(), now_stamp());
        }
    }
}

fn stamp_update_timestamp(schema: &ModelSchema, values: &mut Map<String, Value>) {
    if schema.contains("updated_at") {
        values.insert("updated_at".to_string(), now_stamp());
    }
}

/// Reject an insert that omits required fields, naming every violated field
fn validate_required(
    model: &str,
    schema: &ModelSchema,
    values: &Map<String, Value>,
) -> OrmResult<()> {
    let mut failure = ValidationFailure::new(String::new());
    for field in schema.required_fields() {
        let missing = match values.get(&field.name) {
            None | Some(Value::Null) => true,
            Some(_) => false,
        };
        if missing {
            failure = failure.with_error(
                &field.name,
                format!("{}.{} cannot be null", model, field.name),
                "notNull",
            );
        }
    }
    if failure.errors.is_empty() {
        return Ok(());
    }
    failure.message = format!(
        "notNull violation: {}",
        failure
            .errors
            .iter()
            .map(|e| e.field.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Err(ModelError::Validation(failure))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDefinition, FieldType};
    use serde_json::json;

    fn user_schema() -> ModelSchema {
        ModelSchema::new()
            .field(
                FieldDefinition::new("id", FieldType::BigInteger)
                    .primary_key()
                    .auto_increment(),
            )
            .field(FieldDefinition::new("name", FieldType::Text).not_null())
            .field(FieldDefinition::new("email", FieldType::Text).not_null())
            .field(FieldDefinition::new("bio", FieldType::Text))
            .field(FieldDefinition::new("created_at", FieldType::DateTime).not_null())
            .field(FieldDefinition::new("updated_at", FieldType::DateTime).not_null())
    }

    fn object(value: Value) -> Map<String, Value> {
        as_object(value).unwrap()
    }

    #[test]
    fn test_validate_required_reports_every_field() {
        let values = object(json!({"bio": "hi"}));
        let mut stamped = values.clone();
        stamp_create_timestamps(&user_schema(), &mut stamped);
        let err = validate_required("User", &user_schema(), &stamped).unwrap_err();
        match err {
            ModelError::Validation(failure) => {
                let fields: Vec<_> = failure.errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, ["name", "email"]);
                assert!(failure.errors.iter().all(|e| e.violation == "notNull"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_required_accepts_complete_record() {
        let mut values = object(json!({"name": "ada", "email": "ada@example.com"}));
        stamp_create_timestamps(&user_schema(), &mut values);
        assert!(validate_required("User", &user_schema(), &values).is_ok());
    }

    #[test]
    fn test_explicit_null_counts_as_missing() {
        let mut values = object(json!({"name": null, "email": "ada@example.com"}));
        stamp_create_timestamps(&user_schema(), &mut values);
        let err = validate_required("User", &user_schema(), &values).unwrap_err();
        match err {
            ModelError::Validation(failure) => {
                assert_eq!(failure.errors.len(), 1);
                assert_eq!(failure.errors[0].field, "name");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_sanitize_drops_unknown_fields() {
        let values = object(json!({"name": "ada", "admin": true}));
        let sanitized = sanitize_values(&user_schema(), values);
        assert!(sanitized.contains_key("name"));
        assert!(!sanitized.contains_key("admin"));
    }

    #[test]
    fn test_stamp_create_fills_both_timestamps() {
        let mut values = object(json!({"name": "ada"}));
        stamp_create_timestamps(&user_schema(), &mut values);
        assert!(values.get("created_at").is_some_and(|v| v.is_string()));
        assert!(values.get("updated_at").is_some_and(|v| v.is_string()));
    }

    #[test]
    fn test_stamp_create_keeps_caller_value() {
        let mut values = object(json!({"created_at": "2020-01-01T00:00:00Z"}));
        stamp_create_timestamps(&user_schema(), &mut values);
        assert_eq!(values.get("created_at"), Some(&json!("2020-01-01T00:00:00Z")));
    }

    #[test]
    fn test_stamp_update_overwrites() {
        let mut values = object(json!({"updated_at": "2020-01-01T00:00:00Z"}));
        stamp_update_timestamp(&user_schema(), &mut values);
        assert_ne!(values.get("updated_at"), Some(&json!("2020-01-01T00:00:00Z")));
    }

    #[test]
    fn test_query_output_collapses() {
        let record = object(json!({"id": 1}));
        let one = QueryOutput::One(Some(record.clone()));
        assert_eq!(one.into_records().len(), 1);
        assert_eq!(QueryOutput::One(None).into_records().len(), 0);
        assert_eq!(
            QueryOutput::Many(vec![record.clone(), record.clone()])
                .into_one()
                .unwrap(),
            record
        );
    }

    #[test]
    fn test_update_output_affected() {
        assert_eq!(UpdateOutput::Count(3).affected(), 3);
        let records = vec![object(json!({"id": 1})), object(json!({"id": 2}))];
        assert_eq!(UpdateOutput::Records(records).affected(), 2);
    }

    #[test]
    fn test_collect_values_distinct_non_null() {
        let records = vec![
            object(json!({"fk": 1})),
            object(json!({"fk": 1})),
            object(json!({"fk": 2})),
            object(json!({"fk": null})),
            object(json!({})),
        ];
        assert_eq!(collect_values(&records, "fk"), vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_values_must_be_an_object() {
        assert!(as_object(json!("nope")).is_err());
        assert!(as_object(json!({"ok": 1})).is_ok());
    }
}
