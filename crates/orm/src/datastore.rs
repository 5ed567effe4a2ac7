//! Datastore lifecycle
//!
//! Boot pipeline: validate configuration, resolve store connections,
//! transform model declarations, register them, then reconcile schemas. The
//! resulting handle owns the stores and exposes the footprint service.

use std::collections::HashMap;
use std::sync::Arc;

use footprint_core::DatabaseConfig;

use crate::error::{ModelError, OrmResult};
use crate::footprint::FootprintService;
use crate::migration::run_migrations;
use crate::model::ModelDefinition;
use crate::registry::ModelRegistry;
use crate::stores::{resolve_stores, StoreConnection, StoreTransaction};
use crate::transformer::transform_models;

pub struct Datastore {
    stores: HashMap<String, Arc<StoreConnection>>,
    registry: Arc<ModelRegistry>,
    footprint: FootprintService,
}

impl std::fmt::Debug for Datastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datastore")
            .field("stores", &self.stores.len())
            .field("models", &self.registry.len())
            .finish()
    }
}

impl Datastore {
    /// Run the full boot pipeline. Any stage failing aborts the boot; there is
    /// no partially initialized datastore.
    pub async fn initialize(
        config: DatabaseConfig,
        definitions: Vec<Arc<dyn ModelDefinition>>,
    ) -> OrmResult<Datastore> {
        config.validate()?;

        let stores = resolve_stores(&config).await?;
        let descriptors = transform_models(&definitions, &config)?;
        let registry = Arc::new(ModelRegistry::build(&definitions, descriptors, &stores)?);
        run_migrations(&registry).await?;

        tracing::info!(
            stores = stores.len(),
            models = registry.len(),
            "datastore initialized"
        );

        let footprint =
            FootprintService::new(Arc::clone(&registry), config.models.default_limit);
        Ok(Datastore {
            stores,
            registry,
            footprint,
        })
    }

    /// The model-access service
    pub fn footprint(&self) -> &FootprintService {
        &self.footprint
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn store(&self, name: &str) -> OrmResult<&Arc<StoreConnection>> {
        self.stores
            .get(name)
            .ok_or_else(|| ModelError::NotFound(format!("No store found with name '{}'", name)))
    }

    pub fn stores(&self) -> impl Iterator<Item = &Arc<StoreConnection>> {
        self.stores.values()
    }

    /// Begin a transaction on one store, for multi-operation call sequences
    pub async fn begin(&self, store: &str) -> OrmResult<StoreTransaction> {
        Ok(self.store(store)?.begin().await?)
    }

    /// Verify every store answers a trivial query
    pub async fn health_check(&self) -> OrmResult<()> {
        for store in self.stores.values() {
            store.health_check().await?;
        }
        Ok(())
    }

    /// Close every store pool
    pub async fn close(&self) {
        for store in self.stores.values() {
            store.close().await;
        }
    }
}
