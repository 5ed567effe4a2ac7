//! Field schema definitions
//!
//! The type-constant namespace model declarations build their field schemas
//! from. A `ModelSchema` is an ordered field list; order is preserved into the
//! generated DDL.

use serde_json::Value;

/// Column types available to model declarations
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    BigInteger,
    Float,
    Boolean,
    /// VARCHAR with an optional length; unbounded renders as TEXT
    String(Option<u32>),
    Text,
    DateTime,
    Date,
    Uuid,
    Json,
}

/// One column of a model schema
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub field_type: FieldType,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub allow_null: bool,
    pub unique: bool,
    pub default: Option<Value>,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            primary_key: false,
            auto_increment: false,
            allow_null: true,
            unique: false,
            default: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.allow_null = false;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.allow_null = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Ordered field schema for one model
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelSchema {
    fields: Vec<FieldDefinition>,
}

impl ModelSchema {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Append a field. Replaces an existing field with the same name.
    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.push(field);
        self
    }

    pub fn push(&mut self, field: FieldDefinition) {
        if let Some(existing) = self.fields.iter_mut().find(|f| f.name == field.name) {
            *existing = field;
        } else {
            self.fields.push(field);
        }
    }

    /// Insert a field at the front, preserving the rest of the order
    pub fn push_front(&mut self, field: FieldDefinition) {
        if self.get(&field.name).is_none() {
            self.fields.insert(0, field);
        }
    }

    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The primary key field, if one is declared
    pub fn primary_key(&self) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.primary_key)
    }

    /// The primary key field name, defaulting to `id` when none is declared
    pub fn primary_key_name(&self) -> &str {
        self.primary_key().map(|f| f.name.as_str()).unwrap_or("id")
    }

    /// Fields that must be present on insert: non-null, no default, not
    /// auto-generated
    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields
            .iter()
            .filter(|f| !f.allow_null && !f.auto_increment && f.default.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_schema() -> ModelSchema {
        ModelSchema::new()
            .field(
                FieldDefinition::new("id", FieldType::BigInteger)
                    .primary_key()
                    .auto_increment(),
            )
            .field(FieldDefinition::new("name", FieldType::String(Some(255))).not_null())
            .field(FieldDefinition::new("email", FieldType::String(Some(255))).unique())
            .field(FieldDefinition::new("bio", FieldType::Text))
    }

    #[test]
    fn test_schema_order_and_lookup() {
        let schema = user_schema();
        let names: Vec<_> = schema.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["id", "name", "email", "bio"]);
        assert!(schema.contains("email"));
        assert!(!schema.contains("age"));
    }

    #[test]
    fn test_primary_key_lookup() {
        let schema = user_schema();
        assert_eq!(schema.primary_key_name(), "id");
        assert!(schema.primary_key().unwrap().auto_increment);

        let no_pk = ModelSchema::new().field(FieldDefinition::new("name", FieldType::Text));
        assert!(no_pk.primary_key().is_none());
        assert_eq!(no_pk.primary_key_name(), "id");
    }

    #[test]
    fn test_required_fields_skip_generated_and_defaulted() {
        let schema = user_schema().field(
            FieldDefinition::new("active", FieldType::Boolean)
                .not_null()
                .default_value(serde_json::json!(true)),
        );
        let required: Vec<_> = schema.required_fields().map(|f| f.name.as_str()).collect();
        assert_eq!(required, ["name"]);
    }

    #[test]
    fn test_push_replaces_same_name() {
        let mut schema = user_schema();
        schema.push(FieldDefinition::new("bio", FieldType::String(Some(100))));
        assert_eq!(schema.fields().len(), 4);
        assert_eq!(
            schema.get("bio").unwrap().field_type,
            FieldType::String(Some(100))
        );
    }

    #[test]
    fn test_push_front_keeps_existing() {
        let mut schema = user_schema();
        schema.push_front(FieldDefinition::new("id", FieldType::Integer));
        // already declared; untouched
        assert_eq!(schema.get("id").unwrap().field_type, FieldType::BigInteger);
    }
}
