//! Entity-shape metadata: keys, foreign keys and navigations.
//!
//! The tracker and the fix-up engine only read metadata through
//! [`MetadataProvider`]. [`Model`] is the built-in implementation, produced
//! by a [`ModelBuilder`] from a context's `on_model_creating` and then
//! cached per context type by [`ModelSource`].

use crate::entity::Value;
use keel_log::debug;
use parking_lot::Mutex;
use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Primary key of an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMetadata {
    property: String,
    generated: bool,
    sentinel: Value,
}

impl KeyMetadata {
    /// Key property name.
    pub fn property(&self) -> &str {
        &self.property
    }

    /// Whether the store generates values for the key.
    pub fn is_generated(&self) -> bool {
        self.generated
    }

    /// Value meaning "not set yet".
    pub fn sentinel(&self) -> &Value {
        &self.sentinel
    }

    /// Whether `value` means the store has to generate the key.
    pub fn is_sentinel(&self, value: &Value) -> bool {
        self.generated && (value.is_null() || *value == self.sentinel)
    }
}

/// A foreign key from a dependent entity type to a principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyMetadata {
    dependent: String,
    property: String,
    principal: String,
    reference: Option<String>,
    collection: Option<String>,
}

impl ForeignKeyMetadata {
    /// Dependent entity type.
    pub fn dependent(&self) -> &str {
        &self.dependent
    }

    /// Foreign key property on the dependent.
    pub fn property(&self) -> &str {
        &self.property
    }

    /// Principal entity type.
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Reference navigation on the dependent, pointing at the principal.
    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    /// Collection navigation on the principal, holding dependents.
    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    /// Name the reference navigation on the dependent.
    pub fn with_reference(&mut self, navigation: &str) -> &mut Self {
        self.reference = Some(navigation.to_string());
        self
    }

    /// Name the collection navigation on the principal.
    pub fn with_collection(&mut self, navigation: &str) -> &mut Self {
        self.collection = Some(navigation.to_string());
        self
    }
}

/// Metadata for one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMetadata {
    name: String,
    key: KeyMetadata,
    foreign_keys: Vec<ForeignKeyMetadata>,
}

impl EntityMetadata {
    /// Entity type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Primary key.
    pub fn key(&self) -> &KeyMetadata {
        &self.key
    }

    /// Foreign keys declared on this type (it is the dependent).
    pub fn foreign_keys(&self) -> &[ForeignKeyMetadata] {
        &self.foreign_keys
    }

    /// Foreign key using `property`.
    pub fn foreign_key(&self, property: &str) -> Option<&ForeignKeyMetadata> {
        self.foreign_keys.iter().find(|fk| fk.property == property)
    }

    /// Foreign key whose reference navigation is `navigation`.
    pub fn foreign_key_for_reference(&self, navigation: &str) -> Option<&ForeignKeyMetadata> {
        self.foreign_keys
            .iter()
            .find(|fk| fk.reference.as_deref() == Some(navigation))
    }
}

/// Source of entity-shape metadata.
pub trait MetadataProvider: Send + Sync {
    /// Metadata for `entity_type`.
    fn metadata(&self, entity_type: &str) -> Option<&EntityMetadata>;

    /// Every entity type.
    fn entity_types(&self) -> Vec<&EntityMetadata>;

    /// Foreign keys whose principal is `principal`.
    fn referencing_foreign_keys(&self, principal: &str) -> Vec<&ForeignKeyMetadata> {
        self.entity_types()
            .into_iter()
            .flat_map(|e| e.foreign_keys.iter())
            .filter(|fk| fk.principal == principal)
            .collect()
    }
}

/// A built model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Model {
    entity_types: BTreeMap<String, EntityMetadata>,
}

impl Model {
    /// Start building a model.
    pub fn builder() -> ModelBuilder {
        ModelBuilder::new()
    }

    /// Number of entity types.
    pub fn len(&self) -> usize {
        self.entity_types.len()
    }

    /// Whether the model has no entity types.
    pub fn is_empty(&self) -> bool {
        self.entity_types.is_empty()
    }
}

impl MetadataProvider for Model {
    fn metadata(&self, entity_type: &str) -> Option<&EntityMetadata> {
        self.entity_types.get(entity_type)
    }

    fn entity_types(&self) -> Vec<&EntityMetadata> {
        self.entity_types.values().collect()
    }
}

/// Builds a [`Model`].
///
/// ```rust
/// use keel_core::{MetadataProvider, ModelBuilder};
///
/// let mut builder = ModelBuilder::new();
/// builder.entity("Category").generated_key("Id");
/// builder
///     .entity("Product")
///     .generated_key("Id")
///     .has_foreign_key("CategoryId", "Category")
///     .with_reference("Category")
///     .with_collection("Products");
///
/// let model = builder.build();
/// assert_eq!(model.referencing_foreign_keys("Category").len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct ModelBuilder {
    entity_types: BTreeMap<String, EntityTypeBuilder>,
}

impl ModelBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure an entity type, declaring it on first use.
    pub fn entity(&mut self, name: &str) -> &mut EntityTypeBuilder {
        self.entity_types
            .entry(name.to_string())
            .or_insert_with(|| EntityTypeBuilder::new(name))
    }

    /// Whether `name` has been declared.
    pub fn has_entity(&self, name: &str) -> bool {
        self.entity_types.contains_key(name)
    }

    /// Finish building.
    pub fn build(self) -> Model {
        Model {
            entity_types: self
                .entity_types
                .into_iter()
                .map(|(name, builder)| (name, builder.metadata))
                .collect(),
        }
    }
}

/// Configures one entity type.
#[derive(Debug)]
pub struct EntityTypeBuilder {
    metadata: EntityMetadata,
}

impl EntityTypeBuilder {
    fn new(name: &str) -> Self {
        Self {
            metadata: EntityMetadata {
                name: name.to_string(),
                key: KeyMetadata {
                    property: "Id".to_string(),
                    generated: false,
                    sentinel: Value::Null,
                },
                foreign_keys: Vec::new(),
            },
        }
    }

    /// Use `property` as a client-assigned key.
    pub fn key(&mut self, property: &str) -> &mut Self {
        self.metadata.key = KeyMetadata {
            property: property.to_string(),
            generated: false,
            sentinel: Value::Null,
        };
        self
    }

    /// Use `property` as a store-generated integer key whose unset value is `0`.
    pub fn generated_key(&mut self, property: &str) -> &mut Self {
        self.metadata.key = KeyMetadata {
            property: property.to_string(),
            generated: true,
            sentinel: Value::Int(0),
        };
        self
    }

    /// Override the unset value of a generated key.
    pub fn key_sentinel(&mut self, sentinel: impl Into<Value>) -> &mut Self {
        self.metadata.key.sentinel = sentinel.into();
        self
    }

    /// Declare a foreign key `property` referencing `principal`.
    pub fn has_foreign_key(&mut self, property: &str, principal: &str) -> &mut ForeignKeyMetadata {
        self.metadata.foreign_keys.push(ForeignKeyMetadata {
            dependent: self.metadata.name.clone(),
            property: property.to_string(),
            principal: principal.to_string(),
            reference: None,
            collection: None,
        });
        let last = self.metadata.foreign_keys.len() - 1;
        &mut self.metadata.foreign_keys[last]
    }
}

/// Adjusts a model after the context's own `on_model_creating` ran.
///
/// Registered as a singleton in the internal provider and replaceable with
/// `replace_service`.
pub trait ModelCustomizer: Send + Sync {
    /// Customize `builder` for the context type named `context`.
    fn customize(&self, builder: &mut ModelBuilder, context: &str);
}

/// Customizer that leaves the model as the context built it.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultModelCustomizer;

impl ModelCustomizer for DefaultModelCustomizer {
    fn customize(&self, _builder: &mut ModelBuilder, _context: &str) {}
}

/// Builds and caches one model per context type.
pub struct ModelSource {
    customizer: Arc<dyn ModelCustomizer>,
    models: Mutex<HashMap<TypeId, Arc<Model>>>,
}

impl ModelSource {
    /// Create a source applying `customizer`.
    pub fn new(customizer: Arc<dyn ModelCustomizer>) -> Self {
        Self {
            customizer,
            models: Mutex::new(HashMap::new()),
        }
    }

    /// Model for the context type `context`, built with `create` on first use.
    pub fn get_model(
        &self,
        context: TypeId,
        context_name: &str,
        create: impl FnOnce(&mut ModelBuilder),
    ) -> Arc<Model> {
        self.models
            .lock()
            .entry(context)
            .or_insert_with(|| {
                let mut builder = ModelBuilder::new();
                create(&mut builder);
                self.customizer.customize(&mut builder, context_name);
                let model = builder.build();
                debug!(
                    "Built model for {} ({} entity types)",
                    context_name,
                    model.len()
                );
                Arc::new(model)
            })
            .clone()
    }

    /// Number of cached models.
    pub fn len(&self) -> usize {
        self.models.lock().len()
    }

    /// Whether no model has been built yet.
    pub fn is_empty(&self) -> bool {
        self.models.lock().is_empty()
    }
}
