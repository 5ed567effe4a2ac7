//! Criteria and option normalization
//!
//! Callers address records either by primary key value or by a JSON filter
//! object. This module normalizes both shapes, unwraps the optional `where`
//! envelope, and lifts reserved pagination keys out of the filter.

use serde_json::{Map, Value};

use crate::error::{ModelError, OrmResult};

/// How a call addresses records: a single primary key value, or a filter
/// object matched field-by-field
#[derive(Debug, Clone, PartialEq)]
pub enum Criteria {
    Id(Value),
    Filter(Map<String, Value>),
}

impl Criteria {
    /// Normalize a caller-supplied criteria value.
    ///
    /// Objects are treated as filters; a `where` key, when present, supplies
    /// the filter body and reserved `limit`/`offset` keys are extracted as
    /// pagination. Scalars are primary key lookups. `null` is an empty filter.
    pub fn parse(raw: Value) -> OrmResult<(Criteria, Pagination)> {
        match raw {
            Value::Null => Ok((Criteria::Filter(Map::new()), Pagination::default())),
            Value::Object(mut object) => {
                let mut pagination = Pagination {
                    limit: take_count(&mut object, "limit")?,
                    offset: take_count(&mut object, "offset")?,
                };
                let filter = match object.remove("where") {
                    Some(Value::Object(inner)) => inner,
                    Some(Value::Null) | None => object,
                    Some(other) => {
                        return Err(ModelError::Query(format!(
                            "'where' must be an object, got {}",
                            type_name(&other)
                        )))
                    }
                };
                // limit/offset may also ride inside the envelope
                let mut filter = filter;
                if pagination.limit.is_none() {
                    pagination.limit = take_count(&mut filter, "limit")?;
                }
                if pagination.offset.is_none() {
                    pagination.offset = take_count(&mut filter, "offset")?;
                }
                Ok((Criteria::Filter(filter), pagination))
            }
            Value::Array(_) => Err(ModelError::Query(
                "Criteria must be a primary key value or a filter object".into(),
            )),
            scalar => Ok((Criteria::Id(scalar), Pagination::default())),
        }
    }

    /// Whether this criteria addresses at most one record
    pub fn is_id(&self) -> bool {
        matches!(self, Criteria::Id(_))
    }

    /// View the criteria as a filter map, wrapping a primary key lookup
    pub fn into_filter(self, pk_name: &str) -> Map<String, Value> {
        match self {
            Criteria::Filter(filter) => filter,
            Criteria::Id(value) => {
                let mut filter = Map::new();
                filter.insert(pk_name.to_string(), value);
                filter
            }
        }
    }
}

fn take_count(object: &mut Map<String, Value>, key: &str) -> OrmResult<Option<u64>> {
    match object.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| {
            ModelError::Query(format!("'{}' must be a non-negative integer", key))
        }),
        Some(Value::String(s)) => s
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ModelError::Query(format!("'{}' must be a non-negative integer", key))),
        Some(other) => Err(ModelError::Query(format!(
            "'{}' must be a non-negative integer, got {}",
            key,
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Reserved pagination keys lifted out of the criteria
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Which associations to expand on fetched records
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Populate {
    #[default]
    None,
    All,
    Names(Vec<String>),
}

impl Populate {
    /// Accepts `true`/`"all"` for everything, a comma-joined string or an
    /// array of names for a subset, and `false`/`null` for nothing.
    pub fn parse(raw: &Value) -> OrmResult<Populate> {
        match raw {
            Value::Null | Value::Bool(false) => Ok(Populate::None),
            Value::Bool(true) => Ok(Populate::All),
            Value::String(s) => {
                if s.eq_ignore_ascii_case("all") {
                    return Ok(Populate::All);
                }
                let names: Vec<String> = s
                    .split(',')
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .collect();
                if names.is_empty() {
                    Ok(Populate::None)
                } else {
                    Ok(Populate::Names(names))
                }
            }
            Value::Array(items) => {
                let mut names = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => names.push(s.clone()),
                        other => {
                            return Err(ModelError::Query(format!(
                                "populate entries must be strings, got {}",
                                type_name(other)
                            )))
                        }
                    }
                }
                Ok(Populate::Names(names))
            }
            other => Err(ModelError::Query(format!(
                "populate must be a boolean, string or array, got {}",
                type_name(other)
            ))),
        }
    }

    pub fn includes(&self, name: &str) -> bool {
        match self {
            Populate::None => false,
            Populate::All => true,
            Populate::Names(names) => names.iter().any(|n| n == name),
        }
    }
}

/// Per-call options for find/update/destroy
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub populate: Populate,
    /// Force a single-record result even for filter criteria
    pub find_one: bool,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl QueryOptions {
    /// Normalize a caller-supplied options object. Unknown keys are ignored.
    pub fn parse(raw: Option<Value>) -> OrmResult<QueryOptions> {
        let Some(raw) = raw else {
            return Ok(QueryOptions::default());
        };
        let mut object = match raw {
            Value::Null => return Ok(QueryOptions::default()),
            Value::Object(object) => object,
            other => {
                return Err(ModelError::Query(format!(
                    "options must be an object, got {}",
                    type_name(&other)
                )))
            }
        };

        let populate = match object.get("populate") {
            Some(value) => Populate::parse(value)?,
            None => Populate::None,
        };
        let find_one = matches!(object.get("findOne"), Some(Value::Bool(true)))
            || matches!(object.get("find_one"), Some(Value::Bool(true)));
        let limit = take_count(&mut object, "limit")?;
        let offset = take_count(&mut object, "offset")?;

        Ok(QueryOptions {
            populate,
            find_one,
            limit,
            offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_criteria_is_id_lookup() {
        let (criteria, pagination) = Criteria::parse(json!(42)).unwrap();
        assert_eq!(criteria, Criteria::Id(json!(42)));
        assert_eq!(pagination, Pagination::default());

        let (criteria, _) = Criteria::parse(json!("a1b2")).unwrap();
        assert!(criteria.is_id());
    }

    #[test]
    fn test_object_criteria_is_filter() {
        let (criteria, _) = Criteria::parse(json!({"name": "alice"})).unwrap();
        match criteria {
            Criteria::Filter(filter) => assert_eq!(filter.get("name"), Some(&json!("alice"))),
            _ => panic!("expected filter"),
        }
    }

    #[test]
    fn test_where_envelope_unwrapped() {
        let (criteria, pagination) =
            Criteria::parse(json!({"where": {"name": "alice"}, "limit": 5, "offset": 10}))
                .unwrap();
        assert_eq!(pagination.limit, Some(5));
        assert_eq!(pagination.offset, Some(10));
        match criteria {
            Criteria::Filter(filter) => {
                assert_eq!(filter.get("name"), Some(&json!("alice")));
                assert!(!filter.contains_key("limit"));
            }
            _ => panic!("expected filter"),
        }
    }

    #[test]
    fn test_reserved_keys_inside_filter() {
        let (criteria, pagination) =
            Criteria::parse(json!({"name": "alice", "limit": 3})).unwrap();
        assert_eq!(pagination.limit, Some(3));
        match criteria {
            Criteria::Filter(filter) => assert!(!filter.contains_key("limit")),
            _ => panic!("expected filter"),
        }
    }

    #[test]
    fn test_null_criteria_matches_everything() {
        let (criteria, _) = Criteria::parse(Value::Null).unwrap();
        assert_eq!(criteria, Criteria::Filter(Map::new()));
    }

    #[test]
    fn test_id_criteria_into_filter() {
        let (criteria, _) = Criteria::parse(json!(7)).unwrap();
        let filter = criteria.into_filter("id");
        assert_eq!(filter.get("id"), Some(&json!(7)));
    }

    #[test]
    fn test_populate_forms() {
        assert_eq!(Populate::parse(&json!(true)).unwrap(), Populate::All);
        assert_eq!(Populate::parse(&json!("all")).unwrap(), Populate::All);
        assert_eq!(Populate::parse(&json!(false)).unwrap(), Populate::None);
        assert_eq!(
            Populate::parse(&json!("roles, posts")).unwrap(),
            Populate::Names(vec!["roles".into(), "posts".into()])
        );
        assert_eq!(
            Populate::parse(&json!(["roles"])).unwrap(),
            Populate::Names(vec!["roles".into()])
        );
        assert!(Populate::parse(&json!(3)).is_err());
    }

    #[test]
    fn test_options_parse() {
        let options = QueryOptions::parse(Some(json!({
            "populate": "roles",
            "findOne": true,
            "limit": 20
        })))
        .unwrap();
        assert!(options.find_one);
        assert_eq!(options.limit, Some(20));
        assert!(options.populate.includes("roles"));
        assert!(!options.populate.includes("posts"));

        let defaults = QueryOptions::parse(None).unwrap();
        assert!(!defaults.find_one);
        assert_eq!(defaults.populate, Populate::None);
    }

    #[test]
    fn test_invalid_shapes_rejected() {
        assert!(Criteria::parse(json!([1, 2])).is_err());
        assert!(Criteria::parse(json!({"where": "oops"})).is_err());
        assert!(Criteria::parse(json!({"limit": -1})).is_err());
        assert!(QueryOptions::parse(Some(json!("oops"))).is_err());
    }
}
