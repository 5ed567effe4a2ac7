//! Schema registrar
//!
//! Registers every resolved model descriptor against its store connection in
//! two phases: first every model is defined, then every model's association
//! declarations are resolved against the complete set. The association map of
//! each model is frozen once phase two finishes; lookups after boot never
//! observe a partially wired model.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::error::{ModelError, OrmResult};
use crate::model::{AssociationDecl, DeclKind, ModelDefinition};
use crate::stores::StoreConnection;
use crate::transformer::ModelDescriptor;

/// A fully resolved association, keys defaulted and target verified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    /// Attribute name the association is addressed by
    pub name: String,
    /// Identity of the target model
    pub target: String,
    pub kind: AssociationKind,
}

/// The three resolved association shapes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociationKind {
    /// Foreign key lives on the target's table. `single` collapses the result
    /// to at most one record (a has-one declaration).
    OneToMany { foreign_key: String, single: bool },
    /// Foreign key lives on this model's own table
    ManyToOne { foreign_key: String },
    /// Linked through a join model carrying one key for each side
    ManyToMany {
        join_model: String,
        left_key: String,
        right_key: String,
    },
}

/// One registered model: descriptor, store handle, frozen associations
pub struct ModelHandle {
    descriptor: ModelDescriptor,
    store: Arc<StoreConnection>,
    associations: OnceCell<HashMap<String, Association>>,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("identity", &self.descriptor.identity)
            .field("table", &self.descriptor.table_name)
            .field("store", &self.store.name())
            .finish()
    }
}

impl ModelHandle {
    pub fn identity(&self) -> &str {
        &self.descriptor.identity
    }

    pub fn global_id(&self) -> &str {
        &self.descriptor.global_id
    }

    pub fn table_name(&self) -> &str {
        &self.descriptor.table_name
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    pub fn schema(&self) -> &crate::schema::ModelSchema {
        &self.descriptor.schema
    }

    pub fn primary_key_name(&self) -> &str {
        self.descriptor.schema.primary_key_name()
    }

    pub fn store(&self) -> &Arc<StoreConnection> {
        &self.store
    }

    /// Look up one association by attribute name
    pub fn association(&self, name: &str) -> Option<&Association> {
        self.associations.get().and_then(|map| map.get(name))
    }

    /// All resolved associations. Empty until phase two completes.
    pub fn associations(&self) -> impl Iterator<Item = &Association> {
        self.associations.get().into_iter().flat_map(|m| m.values())
    }
}

/// All registered models, keyed by identity
#[derive(Default)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<ModelHandle>>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.models.len())
            .finish()
    }
}

impl ModelRegistry {
    /// Register every descriptor, then wire associations.
    ///
    /// A model assigned to a store that did not resolve to a relational
    /// connection is skipped with a warning. An association naming an
    /// unregistered target is a boot error.
    pub fn build(
        definitions: &[Arc<dyn ModelDefinition>],
        descriptors: HashMap<String, ModelDescriptor>,
        stores: &HashMap<String, Arc<StoreConnection>>,
    ) -> OrmResult<ModelRegistry> {
        let mut registry = ModelRegistry::default();

        // phase one: define every model against its store
        for (identity, descriptor) in descriptors {
            let Some(store) = stores.get(&descriptor.store) else {
                tracing::warn!(
                    model = %descriptor.global_id,
                    store = %descriptor.store,
                    "model assigned to an unresolved store, skipping registration"
                );
                continue;
            };
            tracing::debug!(model = %descriptor.global_id, table = %descriptor.table_name,
                store = %descriptor.store, "model registered");
            registry.models.insert(
                identity,
                Arc::new(ModelHandle {
                    descriptor,
                    store: Arc::clone(store),
                    associations: OnceCell::new(),
                }),
            );
        }

        // phase two: resolve association declarations against the full set
        for definition in definitions {
            let identity = definition.name().to_lowercase();
            let Some(handle) = registry.models.get(&identity) else {
                continue;
            };

            let mut resolved = HashMap::new();
            for decl in definition.associations(&registry) {
                let association =
                    resolve_association(&identity, &decl, |id| registry.models.contains_key(id))
                        .map_err(|e| {
                            ModelError::Configuration(format!(
                                "Model '{}', association '{}': {}",
                                definition.name(),
                                decl.name,
                                e
                            ))
                        })?;
                // association statements run on the owning model's connection
                check_same_store(&registry, handle, &association).map_err(|e| {
                    ModelError::Configuration(format!(
                        "Model '{}', association '{}': {}",
                        definition.name(),
                        decl.name,
                        e
                    ))
                })?;
                if resolved
                    .insert(association.name.clone(), association)
                    .is_some()
                {
                    return Err(ModelError::Configuration(format!(
                        "Model '{}' declares association '{}' twice",
                        definition.name(),
                        decl.name
                    )));
                }
            }

            // freeze; build() owns the only reference until it returns
            let _ = handle.associations.set(resolved);
        }

        Ok(registry)
    }

    pub fn get(&self, name: &str) -> OrmResult<&Arc<ModelHandle>> {
        self.models
            .get(&name.to_lowercase())
            .ok_or_else(|| ModelError::model_not_found(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(&name.to_lowercase())
    }

    pub fn handles(&self) -> impl Iterator<Item = &Arc<ModelHandle>> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Every model an association touches must live on the same store; the
/// statements it generates all run on one connection.
fn check_same_store(
    registry: &ModelRegistry,
    parent: &ModelHandle,
    association: &Association,
) -> Result<(), String> {
    let mut involved = vec![association.target.as_str()];
    if let AssociationKind::ManyToMany { join_model, .. } = &association.kind {
        involved.push(join_model.as_str());
    }
    for identity in involved {
        if let Some(other) = registry.models.get(identity) {
            if other.store().name() != parent.store().name() {
                return Err(format!(
                    "model '{}' lives on store '{}', expected '{}'",
                    identity,
                    other.store().name(),
                    parent.store().name()
                ));
            }
        }
    }
    Ok(())
}

/// Resolve one declaration: default the key fields from the naming convention
/// and verify every referenced model is registered.
fn resolve_association(
    parent_identity: &str,
    decl: &AssociationDecl,
    is_registered: impl Fn(&str) -> bool,
) -> Result<Association, String> {
    let target = decl.target.to_lowercase();
    if !is_registered(&target) {
        return Err(format!("target model '{}' is not registered", decl.target));
    }

    let kind = match &decl.kind {
        DeclKind::HasOne | DeclKind::HasMany => AssociationKind::OneToMany {
            foreign_key: decl
                .foreign_key
                .clone()
                .unwrap_or_else(|| format!("{}_id", parent_identity)),
            single: decl.kind == DeclKind::HasOne,
        },
        DeclKind::BelongsTo => AssociationKind::ManyToOne {
            foreign_key: decl
                .foreign_key
                .clone()
                .unwrap_or_else(|| format!("{}_id", decl.name.to_lowercase())),
        },
        DeclKind::BelongsToMany { through } => {
            let join_model = through.to_lowercase();
            if !is_registered(&join_model) {
                return Err(format!("join model '{}' is not registered", through));
            }
            AssociationKind::ManyToMany {
                join_model,
                left_key: decl
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| format!("{}_id", parent_identity)),
                right_key: decl
                    .other_key
                    .clone()
                    .unwrap_or_else(|| format!("{}_id", target)),
            }
        }
    };

    Ok(Association {
        name: decl.name.clone(),
        target,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registered<'a>(names: &'a [&'a str]) -> impl Fn(&str) -> bool + 'a {
        move |id| names.contains(&id)
    }

    #[test]
    fn test_has_many_defaults_parent_key() {
        let decl = AssociationDecl::has_many("posts", "Post");
        let assoc = resolve_association("user", &decl, registered(&["post"])).unwrap();
        assert_eq!(assoc.target, "post");
        assert_eq!(
            assoc.kind,
            AssociationKind::OneToMany {
                foreign_key: "user_id".into(),
                single: false
            }
        );
    }

    #[test]
    fn test_has_one_is_single() {
        let decl = AssociationDecl::has_one("profile", "Profile");
        let assoc = resolve_association("user", &decl, registered(&["profile"])).unwrap();
        assert_eq!(
            assoc.kind,
            AssociationKind::OneToMany {
                foreign_key: "user_id".into(),
                single: true
            }
        );
    }

    #[test]
    fn test_belongs_to_defaults_attribute_key() {
        let decl = AssociationDecl::belongs_to("owner", "User");
        let assoc = resolve_association("post", &decl, registered(&["user"])).unwrap();
        assert_eq!(
            assoc.kind,
            AssociationKind::ManyToOne {
                foreign_key: "owner_id".into()
            }
        );

        let decl = AssociationDecl::belongs_to("owner", "User").foreign_key("author_id");
        let assoc = resolve_association("post", &decl, registered(&["user"])).unwrap();
        assert_eq!(
            assoc.kind,
            AssociationKind::ManyToOne {
                foreign_key: "author_id".into()
            }
        );
    }

    #[test]
    fn test_belongs_to_many_defaults_both_keys() {
        let decl = AssociationDecl::belongs_to_many("roles", "Role", "UserRole");
        let assoc =
            resolve_association("user", &decl, registered(&["role", "userrole"])).unwrap();
        assert_eq!(
            assoc.kind,
            AssociationKind::ManyToMany {
                join_model: "userrole".into(),
                left_key: "user_id".into(),
                right_key: "role_id".into(),
            }
        );
    }

    #[test]
    fn test_unregistered_target_is_an_error() {
        let decl = AssociationDecl::has_many("posts", "Post");
        let err = resolve_association("user", &decl, registered(&[])).unwrap_err();
        assert!(err.contains("Post"));

        let decl = AssociationDecl::belongs_to_many("roles", "Role", "UserRole");
        let err = resolve_association("user", &decl, registered(&["role"])).unwrap_err();
        assert!(err.contains("UserRole"));
    }
}
