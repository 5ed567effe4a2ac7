//! Model declaration protocol
//!
//! A domain entity declares itself through [`ModelDefinition`]: a field schema
//! provider, a configuration provider (store, migration strategy, table name,
//! options) and an optional association callback invoked with the full
//! registry once every model is defined.

use footprint_core::{DatabaseConfig, MigrationStrategy, ModelOptions};

use crate::error::OrmResult;
use crate::registry::ModelRegistry;
use crate::schema::ModelSchema;

/// Context handed to schema/config providers
#[derive(Debug, Clone, Copy)]
pub struct DefinitionContext<'a> {
    pub config: &'a DatabaseConfig,
}

/// Declaration-level model configuration
///
/// Every field is optional; unset fields fall back to the per-model override
/// block in the global configuration and then to name-derived/global defaults
/// (see the transformer for the precedence rules).
#[derive(Debug, Clone, Default)]
pub struct ModelConfig {
    pub store: Option<String>,
    pub migrate: Option<MigrationStrategy>,
    pub table_name: Option<String>,
    pub options: Option<ModelOptions>,
}

/// Association shapes a model may declare
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclKind {
    HasOne,
    HasMany,
    BelongsTo,
    BelongsToMany { through: String },
}

/// One declared association, before key defaulting and target resolution
#[derive(Debug, Clone)]
pub struct AssociationDecl {
    /// Attribute name the association is addressed by
    pub name: String,
    /// Global id of the target model
    pub target: String,
    pub kind: DeclKind,
    /// Foreign key field; defaulted from the owning side's identity when unset
    pub foreign_key: Option<String>,
    /// Join-model field identifying the target side (belongs-to-many only)
    pub other_key: Option<String>,
}

impl AssociationDecl {
    fn new(name: &str, target: &str, kind: DeclKind) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            kind,
            foreign_key: None,
            other_key: None,
        }
    }

    /// One related record, foreign key on the target's table
    pub fn has_one(name: &str, target: &str) -> Self {
        Self::new(name, target, DeclKind::HasOne)
    }

    /// Many related records, foreign key on the target's table
    pub fn has_many(name: &str, target: &str) -> Self {
        Self::new(name, target, DeclKind::HasMany)
    }

    /// Reference stored on this model's own table
    pub fn belongs_to(name: &str, target: &str) -> Self {
        Self::new(name, target, DeclKind::BelongsTo)
    }

    /// Many-to-many through a join model
    pub fn belongs_to_many(name: &str, target: &str, through: &str) -> Self {
        Self::new(
            name,
            target,
            DeclKind::BelongsToMany {
                through: through.to_string(),
            },
        )
    }

    pub fn foreign_key(mut self, field: &str) -> Self {
        self.foreign_key = Some(field.to_string());
        self
    }

    pub fn other_key(mut self, field: &str) -> Self {
        self.other_key = Some(field.to_string());
        self
    }
}

/// Static providers every domain entity exposes
///
/// `schema` failures are fatal boot errors; there is no partial-registration
/// recovery. `associations` runs after every model is defined, so it may
/// reference sibling models regardless of definition order.
pub trait ModelDefinition: Send + Sync {
    /// Declared (global) model name
    fn name(&self) -> &str;

    /// Field schema provider
    fn schema(&self, ctx: &DefinitionContext<'_>) -> OrmResult<ModelSchema>;

    /// Configuration provider
    fn config(&self, _ctx: &DefinitionContext<'_>) -> ModelConfig {
        ModelConfig::default()
    }

    /// Association declarations, wired in the registrar's second phase
    fn associations(&self, _models: &ModelRegistry) -> Vec<AssociationDecl> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_association_decl_builders() {
        let decl = AssociationDecl::has_many("posts", "Post");
        assert_eq!(decl.kind, DeclKind::HasMany);
        assert_eq!(decl.name, "posts");
        assert_eq!(decl.target, "Post");
        assert!(decl.foreign_key.is_none());

        let decl = AssociationDecl::belongs_to("owner", "User").foreign_key("owner_id");
        assert_eq!(decl.kind, DeclKind::BelongsTo);
        assert_eq!(decl.foreign_key.as_deref(), Some("owner_id"));

        let decl = AssociationDecl::belongs_to_many("roles", "Role", "UserRole")
            .foreign_key("user_id")
            .other_key("role_id");
        assert_eq!(
            decl.kind,
            DeclKind::BelongsToMany {
                through: "UserRole".into()
            }
        );
        assert_eq!(decl.other_key.as_deref(), Some("role_id"));
    }
}
