//! Configuration error types

/// Errors raised while validating the datastore configuration
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("No default store configured at models.default_store")]
    MissingDefaultStore,

    #[error("Store '{name}' is invalid: {reason}")]
    InvalidStore { name: String, reason: String },

    #[error("Model override '{name}' is invalid: {reason}")]
    InvalidModelOverride { name: String, reason: String },
}
