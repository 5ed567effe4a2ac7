//! Model transformer
//!
//! Merges declaration-level model configuration with the per-model override
//! block and global defaults into resolved [`ModelDescriptor`]s. The merge is
//! a pure function with documented precedence so it can be tested without any
//! I/O: override block > declared config > name-derived/global defaults.

use std::collections::HashMap;
use std::sync::Arc;

use footprint_core::{DatabaseConfig, MigrationStrategy, ModelOptions, ModelOverride, ModelsConfig};

use crate::error::{ModelError, OrmResult};
use crate::model::{DefinitionContext, ModelConfig, ModelDefinition};
use crate::schema::{FieldDefinition, FieldType, ModelSchema};

/// The resolved, merged view of one domain entity
///
/// Built once per boot cycle and never mutated after the registrar consumes
/// it. Invariant: `table_name` and `store` are non-empty after the merge.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    /// Lowercased name, used as the registry identity
    pub identity: String,
    /// Declared name
    pub global_id: String,
    pub table_name: String,
    /// Name of the assigned store
    pub store: String,
    /// Resolved per-model migration strategy. Carried for a future
    /// finer-grained runner; the current runner consults only the store-level
    /// strategy.
    pub migrate: MigrationStrategy,
    pub schema: ModelSchema,
    pub options: ModelOptions,
}

/// Three-level override merge for one model.
///
/// Precedence, highest first: the per-model override block from the global
/// configuration, the model's own declared config, then defaults derived from
/// the model name (table) and the global models section (store, migrate).
pub fn resolve_descriptor(
    global_id: &str,
    schema: ModelSchema,
    declared: &ModelConfig,
    override_block: Option<&ModelOverride>,
    models: &ModelsConfig,
) -> ModelDescriptor {
    let identity = global_id.to_lowercase();

    let table_name = override_block
        .and_then(|o| o.table_name.clone())
        .or_else(|| declared.table_name.clone())
        .unwrap_or_else(|| identity.clone());

    let store = override_block
        .and_then(|o| o.store.clone())
        .or_else(|| declared.store.clone())
        .unwrap_or_else(|| models.default_store.clone());

    let migrate = override_block
        .and_then(|o| o.migrate)
        .or(declared.migrate)
        .unwrap_or(models.migrate);

    let options = override_block
        .and_then(|o| o.options)
        .or(declared.options)
        .unwrap_or_default();

    let mut descriptor = ModelDescriptor {
        identity,
        global_id: global_id.to_string(),
        table_name,
        store,
        migrate,
        schema,
        options,
    };
    apply_schema_options(&mut descriptor);
    descriptor
}

/// Inject the columns implied by the resolved options: an auto-increment
/// primary key when the schema declares none, and timestamp columns.
fn apply_schema_options(descriptor: &mut ModelDescriptor) {
    if descriptor.options.auto_pk && descriptor.schema.primary_key().is_none() {
        descriptor.schema.push_front(
            FieldDefinition::new("id", FieldType::BigInteger)
                .primary_key()
                .auto_increment(),
        );
    }
    if descriptor.options.timestamps {
        if !descriptor.schema.contains("created_at") {
            descriptor
                .schema
                .push(FieldDefinition::new("created_at", FieldType::DateTime).not_null());
        }
        if !descriptor.schema.contains("updated_at") {
            descriptor
                .schema
                .push(FieldDefinition::new("updated_at", FieldType::DateTime).not_null());
        }
    }
}

/// Resolve every declared model into a descriptor, keyed by identity.
///
/// A model whose schema provider fails is a fatal boot error, surfaced
/// immediately; there is no partial-registration recovery.
pub fn transform_models(
    definitions: &[Arc<dyn ModelDefinition>],
    config: &DatabaseConfig,
) -> OrmResult<HashMap<String, ModelDescriptor>> {
    let ctx = DefinitionContext { config };
    let mut descriptors = HashMap::new();

    for definition in definitions {
        let global_id = definition.name().to_string();
        let schema = definition.schema(&ctx).map_err(|e| {
            ModelError::Configuration(format!(
                "Schema provider for model '{}' failed: {}",
                global_id, e
            ))
        })?;
        let declared = definition.config(&ctx);
        let override_block = config.models.overrides.get(&global_id);
        let descriptor = resolve_descriptor(
            &global_id,
            schema,
            &declared,
            override_block,
            &config.models,
        );

        tracing::debug!(
            model = %descriptor.global_id,
            table = %descriptor.table_name,
            store = %descriptor.store,
            migrate = ?descriptor.migrate,
            "resolved model descriptor"
        );

        if descriptors
            .insert(descriptor.identity.clone(), descriptor)
            .is_some()
        {
            return Err(ModelError::Configuration(format!(
                "Duplicate model name '{}'",
                global_id
            )));
        }
    }

    Ok(descriptors)
}
