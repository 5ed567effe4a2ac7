//! Uniform model access over relational stores
//!
//! Models declare themselves through [`ModelDefinition`]; at boot the
//! [`Datastore`] resolves store connections, merges per-model configuration,
//! registers every model with its associations and reconciles table schemas.
//! The resulting [`FootprintService`] exposes create/find/update/destroy and
//! the association operations, addressed by model name and JSON criteria.

pub mod criteria;
pub mod datastore;
pub mod error;
pub mod executor;
pub mod footprint;
pub mod migration;
pub mod model;
pub mod query;
pub mod registry;
pub mod schema;
pub mod stores;
pub mod transformer;

pub use criteria::{Criteria, Pagination, Populate, QueryOptions};
pub use datastore::Datastore;
pub use error::{FieldError, ModelError, ModelResult, OrmError, OrmResult, ValidationFailure};
pub use executor::Record;
pub use footprint::{FootprintService, QueryOutput, UpdateOutput};
pub use model::{AssociationDecl, DeclKind, DefinitionContext, ModelConfig, ModelDefinition};
pub use registry::{Association, AssociationKind, ModelHandle, ModelRegistry};
pub use schema::{FieldDefinition, FieldType, ModelSchema};
pub use stores::{StoreConnection, StoreStats, StoreTransaction};
pub use transformer::ModelDescriptor;

// Re-export the configuration surface for callers that only depend on this
// crate.
pub use footprint_core::{
    DatabaseConfig, Dialect, MigrationStrategy, ModelOptions, ModelOverride, ModelsConfig,
    PoolConfig, StoreConfig,
};
