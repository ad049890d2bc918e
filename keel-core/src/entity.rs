//! Entity objects handed to the change tracker.
//!
//! An entity is a shared, interior-mutable bag of scalar properties and
//! navigations. Identity is pointer identity of the [`EntityRef`]: two
//! handles onto the same allocation are the same entity.
//!
//! Both navigation kinds hold their targets strongly, so every object
//! reachable from an entity stays reachable for graph operations. A
//! principal and dependent linked in both directions form a reference
//! cycle; [`EntityObject::clear_navigations`] breaks it.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Shared handle onto an entity.
pub type EntityRef = Arc<EntityObject>;

/// A scalar property value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// No value
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Text
    Text(String),
}

impl Value {
    /// Whether the value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer payload, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Text payload, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[derive(Default)]
struct EntityData {
    properties: BTreeMap<String, Value>,
    references: HashMap<String, EntityRef>,
    collections: HashMap<String, Vec<EntityRef>>,
}

/// An entity instance.
///
/// Mutating an entity directly never triggers relationship fix-up; go
/// through the tracker's entry for that.
///
/// ```rust
/// use keel_core::{EntityObject, Value};
///
/// let category = EntityObject::new("Category").with("Id", 1).into_ref();
/// let product = EntityObject::new("Product").with("Id", 1).with("CategoryId", 1).into_ref();
///
/// product.set_reference("Category", Some(&category));
/// category.add_to_collection("Products", &product);
///
/// assert_eq!(product.get("CategoryId"), Value::Int(1));
/// assert!(category.collection_contains("Products", &product));
/// ```
pub struct EntityObject {
    entity_type: String,
    data: RwLock<EntityData>,
}

impl EntityObject {
    /// Create an entity of the given type with no properties set.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            data: RwLock::new(EntityData::default()),
        }
    }

    /// Set a property while building.
    pub fn with(self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data
            .write()
            .properties
            .insert(property.into(), value.into());
        self
    }

    /// Finish building and share the entity.
    pub fn into_ref(self) -> EntityRef {
        Arc::new(self)
    }

    /// Entity type name.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Property value; `Null` when unset.
    pub fn get(&self, property: &str) -> Value {
        self.data
            .read()
            .properties
            .get(property)
            .cloned()
            .unwrap_or_default()
    }

    /// Set a property value.
    pub fn set(&self, property: &str, value: impl Into<Value>) {
        self.data
            .write()
            .properties
            .insert(property.to_string(), value.into());
    }

    /// Snapshot of every property.
    pub fn properties(&self) -> BTreeMap<String, Value> {
        self.data.read().properties.clone()
    }

    /// Target of a reference navigation, if set.
    pub fn reference(&self, navigation: &str) -> Option<EntityRef> {
        self.data.read().references.get(navigation).cloned()
    }

    /// Point a reference navigation at `target`, or clear it.
    pub fn set_reference(&self, navigation: &str, target: Option<&EntityRef>) {
        let mut data = self.data.write();
        match target {
            Some(target) => {
                data.references
                    .insert(navigation.to_string(), target.clone());
            }
            None => {
                data.references.remove(navigation);
            }
        }
    }

    /// Drop every reference and collection navigation, keeping properties.
    ///
    /// Releases the objects this entity points at, which breaks cycles
    /// between linked principals and dependents.
    pub fn clear_navigations(&self) {
        let mut data = self.data.write();
        data.references.clear();
        data.collections.clear();
    }

    /// Members of a collection navigation.
    pub fn collection(&self, navigation: &str) -> Vec<EntityRef> {
        self.data
            .read()
            .collections
            .get(navigation)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether `member` is in a collection navigation.
    pub fn collection_contains(&self, navigation: &str, member: &EntityRef) -> bool {
        self.data
            .read()
            .collections
            .get(navigation)
            .is_some_and(|items| items.iter().any(|item| Arc::ptr_eq(item, member)))
    }

    /// Add `member` to a collection navigation. Returns `false` if it was
    /// already there.
    pub fn add_to_collection(&self, navigation: &str, member: &EntityRef) -> bool {
        let mut data = self.data.write();
        let items = data.collections.entry(navigation.to_string()).or_default();
        if items.iter().any(|item| Arc::ptr_eq(item, member)) {
            return false;
        }
        items.push(member.clone());
        true
    }

    /// Remove `member` from a collection navigation. Returns `false` if it
    /// was not there.
    pub fn remove_from_collection(&self, navigation: &str, member: &EntityRef) -> bool {
        let mut data = self.data.write();
        match data.collections.get_mut(navigation) {
            Some(items) => {
                let before = items.len();
                items.retain(|item| !Arc::ptr_eq(item, member));
                items.len() != before
            }
            None => false,
        }
    }
}

impl fmt::Debug for EntityObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Navigations are skipped: graphs are usually cyclic.
        f.debug_struct("EntityObject")
            .field("entity_type", &self.entity_type)
            .field("properties", &self.data.read().properties)
            .finish()
    }
}

/// Address used to identify an entity.
pub(crate) fn identity(entity: &EntityRef) -> usize {
    Arc::as_ptr(entity) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_property_is_null() {
        let entity = EntityObject::new("Blog").into_ref();
        assert!(entity.get("Title").is_null());
        entity.set("Title", "Keel");
        assert_eq!(entity.get("Title").as_text(), Some("Keel"));
    }

    #[test]
    fn test_collection_is_deduplicated() {
        let blog = EntityObject::new("Blog").into_ref();
        let post = EntityObject::new("Post").into_ref();
        assert!(blog.add_to_collection("Posts", &post));
        assert!(!blog.add_to_collection("Posts", &post));
        assert_eq!(blog.collection("Posts").len(), 1);
        assert!(blog.remove_from_collection("Posts", &post));
        assert!(!blog.collection_contains("Posts", &post));
    }

    #[test]
    fn test_reference_keeps_target_alive() {
        let post = EntityObject::new("Post").into_ref();
        post.set_reference("Blog", Some(&EntityObject::new("Blog").with("Id", 4).into_ref()));

        let blog = post.reference("Blog").unwrap();
        assert_eq!(blog.get("Id"), Value::Int(4));
        post.set_reference("Blog", None);
        assert!(post.reference("Blog").is_none());
    }

    #[test]
    fn test_clear_navigations_breaks_cycle() {
        let blog = EntityObject::new("Blog").into_ref();
        let post = EntityObject::new("Post").with("Title", "kept").into_ref();
        post.set_reference("Blog", Some(&blog));
        blog.add_to_collection("Posts", &post);
        let watched = Arc::downgrade(&blog);

        post.clear_navigations();
        drop(blog);

        assert!(watched.upgrade().is_none());
        assert!(post.reference("Blog").is_none());
        assert_eq!(post.get("Title"), Value::from("kept"));
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::from(7), Value::Int(7));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from("x").to_string(), "x");
        assert_eq!(serde_json::to_string(&Value::Int(3)).unwrap(), "3");
    }
}
