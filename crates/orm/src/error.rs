//! Error types for the footprint adapter
//!
//! A small uniform taxonomy over the backend: referenced entities that do not
//! exist resolve to `NotFound`, backend constraint/validation failures are
//! re-signaled as `Validation` with the per-field error list, and everything
//! else passes through unmodified as `Database`.

use std::fmt;

/// Result type alias for adapter operations
pub type ModelResult<T> = Result<T, ModelError>;

/// ORM error type alias
pub type OrmError = ModelError;

/// ORM result type alias
pub type OrmResult<T> = ModelResult<T>;

/// One violated field inside a validation failure
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    /// Backend violation classification, e.g. `notNull` or `unique`
    pub violation: String,
}

/// A backend write rejection, with its structured per-field error list
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ValidationFailure {
    pub message: String,
    pub errors: Vec<FieldError>,
}

impl ValidationFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            errors: Vec::new(),
        }
    }

    pub fn with_error(
        mut self,
        field: impl Into<String>,
        message: impl Into<String>,
        violation: impl Into<String>,
    ) -> Self {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
            violation: violation.into(),
        });
        self
    }
}

/// Error types for footprint operations
#[derive(Debug, Clone)]
pub enum ModelError {
    /// Referenced model, association or store does not exist in the registry
    NotFound(String),
    /// Backend rejected a write due to a constraint/validation failure
    Validation(ValidationFailure),
    /// Unclassified backend error, passed through verbatim
    Database(String),
    /// Connection pool error
    Connection(String),
    /// Transaction error
    Transaction(String),
    /// Schema synchronization error
    Migration(String),
    /// Configuration error
    Configuration(String),
    /// Serialization/deserialization error
    Serialization(String),
    /// Query building error
    Query(String),
}

impl ModelError {
    /// Stable error code exposed to callers
    pub fn code(&self) -> &'static str {
        match self {
            ModelError::NotFound(_) => "E_NOT_FOUND",
            ModelError::Validation(_) => "E_VALIDATION",
            ModelError::Database(_) => "E_DATABASE",
            ModelError::Connection(_) => "E_CONNECTION",
            ModelError::Transaction(_) => "E_TRANSACTION",
            ModelError::Migration(_) => "E_MIGRATION",
            ModelError::Configuration(_) => "E_CONFIGURATION",
            ModelError::Serialization(_) => "E_SERIALIZATION",
            ModelError::Query(_) => "E_QUERY",
        }
    }

    /// `NotFound` naming a missing model
    pub fn model_not_found(model_name: &str) -> Self {
        ModelError::NotFound(format!("No model found with name '{}'", model_name))
    }

    /// `NotFound` naming a missing association on a model
    pub fn association_not_found(model_name: &str, association: &str) -> Self {
        ModelError::NotFound(format!(
            "No association found with name '{}' on model '{}'",
            association, model_name
        ))
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::NotFound(msg) => write!(f, "{}", msg),
            ModelError::Validation(failure) => {
                write!(f, "Validation error: {}", failure.message)
            }
            ModelError::Database(msg) => write!(f, "Database error: {}", msg),
            ModelError::Connection(msg) => write!(f, "Connection error: {}", msg),
            ModelError::Transaction(msg) => write!(f, "Transaction error: {}", msg),
            ModelError::Migration(msg) => write!(f, "Migration error: {}", msg),
            ModelError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            ModelError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            ModelError::Query(msg) => write!(f, "Query error: {}", msg),
        }
    }
}

impl std::error::Error for ModelError {}

// Convert from sqlx errors, classifying constraint violations
impl From<sqlx::Error> for ModelError {
    fn from(err: sqlx::Error) -> Self {
        translate_database_error(err)
    }
}

// Convert from serde_json errors
impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

// Convert from anyhow errors
impl From<anyhow::Error> for ModelError {
    fn from(err: anyhow::Error) -> Self {
        ModelError::Database(err.to_string())
    }
}

impl From<footprint_core::ConfigError> for ModelError {
    fn from(err: footprint_core::ConfigError) -> Self {
        ModelError::Configuration(err.to_string())
    }
}

/// Map a backend failure into the adapter taxonomy.
///
/// Unique and not-null constraint violations become `Validation` carrying the
/// original message and a field error entry; every other backend error passes
/// through as `Database` with the message intact.
pub fn translate_database_error(err: sqlx::Error) -> ModelError {
    let db_err = match &err {
        sqlx::Error::Database(db_err) => db_err,
        sqlx::Error::RowNotFound => {
            return ModelError::Database(err.to_string());
        }
        _ => return ModelError::Database(err.to_string()),
    };

    let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
    let message = db_err.message().to_string();

    if let Some(violation) = classify_constraint(&code, &message) {
        let field = extract_violated_field(&message);
        tracing::debug!(code = %code, violation, field = %field, "translating constraint violation");
        let failure = ValidationFailure::new(message.clone()).with_error(
            field,
            message,
            violation,
        );
        return ModelError::Validation(failure);
    }

    ModelError::Database(message)
}

/// Classify a backend error code/message into a violation kind.
///
/// Codes: SQLSTATE 23505/23502 (postgres), driver codes 1062/1048/1364
/// (mysql), extended result codes 2067/1555/1299 (sqlite). SQLite is also
/// matched on message text because some driver versions report the plain
/// constraint code.
fn classify_constraint(code: &str, message: &str) -> Option<&'static str> {
    match code {
        "23505" | "1062" | "2067" | "1555" => return Some("unique"),
        "23502" | "1048" | "1364" | "1299" => return Some("notNull"),
        _ => {}
    }
    if message.contains("UNIQUE constraint failed") {
        return Some("unique");
    }
    if message.contains("NOT NULL constraint failed") {
        return Some("notNull");
    }
    None
}

/// Best-effort extraction of the violated column name from a backend message
fn extract_violated_field(message: &str) -> String {
    // sqlite: "UNIQUE constraint failed: users.email"
    if let Some(rest) = message
        .strip_prefix("UNIQUE constraint failed: ")
        .or_else(|| message.strip_prefix("NOT NULL constraint failed: "))
    {
        let first = rest.split(',').next().unwrap_or(rest).trim();
        return first.rsplit('.').next().unwrap_or(first).to_string();
    }
    // postgres: null value in column "email" of relation "users" ...
    if let Some(idx) = message.find("column \"") {
        let rest = &message[idx + "column \"".len()..];
        if let Some(end) = rest.find('"') {
            return rest[..end].to_string();
        }
    }
    // mysql: Column 'email' cannot be null / Duplicate entry 'x' for key 'email'
    if let Some(idx) = message.find("Column '") {
        let rest = &message[idx + "Column '".len()..];
        if let Some(end) = rest.find('\'') {
            return rest[..end].to_string();
        }
    }
    if let Some(idx) = message.find("for key '") {
        let rest = &message[idx + "for key '".len()..];
        if let Some(end) = rest.find('\'') {
            return rest[..end].rsplit('.').next().unwrap_or("").to_string();
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ModelError::model_not_found("User").code(), "E_NOT_FOUND");
        assert_eq!(
            ModelError::Validation(ValidationFailure::new("bad")).code(),
            "E_VALIDATION"
        );
        assert_eq!(ModelError::Database("boom".into()).code(), "E_DATABASE");
    }

    #[test]
    fn test_not_found_messages_name_the_entity() {
        let err = ModelError::model_not_found("Role");
        assert!(err.to_string().contains("Role"));

        let err = ModelError::association_not_found("User", "roles");
        assert!(err.to_string().contains("roles"));
        assert!(err.to_string().contains("User"));
    }

    #[test]
    fn test_classify_constraint_codes() {
        assert_eq!(classify_constraint("23505", ""), Some("unique"));
        assert_eq!(classify_constraint("23502", ""), Some("notNull"));
        assert_eq!(classify_constraint("1062", ""), Some("unique"));
        assert_eq!(classify_constraint("1048", ""), Some("notNull"));
        assert_eq!(classify_constraint("2067", ""), Some("unique"));
        assert_eq!(classify_constraint("1299", ""), Some("notNull"));
        // connectivity loss, syntax errors and friends pass through
        assert_eq!(classify_constraint("42601", "syntax error"), None);
        assert_eq!(classify_constraint("", "connection reset"), None);
    }

    #[test]
    fn test_classify_constraint_sqlite_messages() {
        assert_eq!(
            classify_constraint("", "UNIQUE constraint failed: users.email"),
            Some("unique")
        );
        assert_eq!(
            classify_constraint("", "NOT NULL constraint failed: users.name"),
            Some("notNull")
        );
    }

    #[test]
    fn test_extract_violated_field() {
        assert_eq!(
            extract_violated_field("UNIQUE constraint failed: users.email"),
            "email"
        );
        assert_eq!(
            extract_violated_field("NOT NULL constraint failed: users.name"),
            "name"
        );
        assert_eq!(
            extract_violated_field(
                "null value in column \"email\" of relation \"users\" violates not-null constraint"
            ),
            "email"
        );
        assert_eq!(
            extract_violated_field("Column 'email' cannot be null"),
            "email"
        );
        assert_eq!(
            extract_violated_field("Duplicate entry 'a@b.c' for key 'users.email'"),
            "email"
        );
    }

    #[test]
    fn test_validation_failure_builder() {
        let failure = ValidationFailure::new("two fields rejected")
            .with_error("name", "name cannot be null", "notNull")
            .with_error("email", "email cannot be null", "notNull");
        assert_eq!(failure.errors.len(), 2);
        assert_eq!(failure.errors[0].field, "name");
        assert_eq!(failure.errors[1].violation, "notNull");
    }
}
