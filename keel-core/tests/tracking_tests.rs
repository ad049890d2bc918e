// Tests for entity state tracking, graph operations and relationship fix-up

use keel_core::{
    ContextDefinition, ContextError, ContextOptionsBuilder, DbContext, EntityObject, EntityRef,
    EntityState, ModelBuilder, Value,
};
use std::sync::Arc;

struct Shop;

impl ContextDefinition for Shop {
    fn on_model_creating(&self, model: &mut ModelBuilder) {
        model.entity("Category").generated_key("Id");
        model
            .entity("Product")
            .generated_key("Id")
            .has_foreign_key("CategoryId", "Category")
            .with_reference("Category")
            .with_collection("Products");
        model.entity("Tag").key("Name");
    }
}

fn context() -> DbContext<Shop> {
    let mut model = ModelBuilder::new();
    Shop.on_model_creating(&mut model);
    let options = ContextOptionsBuilder::for_context::<Shop>()
        .use_model(Arc::new(model.build()))
        .enable_service_provider_caching(false)
        .build();
    DbContext::with_options(Shop, Arc::new(options)).unwrap()
}

fn category(id: i64) -> EntityRef {
    EntityObject::new("Category").with("Id", id).into_ref()
}

fn product(id: i64, category_id: impl Into<Value>) -> EntityRef {
    EntityObject::new("Product")
        .with("Id", id)
        .with("CategoryId", category_id)
        .into_ref()
}

fn tag(name: &str) -> EntityRef {
    EntityObject::new("Tag").with("Name", name).into_ref()
}

fn linked(category: &EntityRef, product: &EntityRef) -> bool {
    product
        .reference("Category")
        .is_some_and(|c| Arc::ptr_eq(&c, category))
        && category.collection_contains("Products", product)
        && product.get("CategoryId") == category.get("Id")
}

// ============================================================================
// Entries
// ============================================================================

#[test]
fn test_operations_return_same_entry() {
    let context = context();
    let entity = tag("rust");

    let added = context.add(&entity).unwrap();
    let attached = context.attach(&entity).unwrap();
    let updated = context.update(&entity).unwrap();
    let removed = context.remove(&entity).unwrap();
    let looked_up = context.entry(&entity).unwrap();

    assert!(added.same_entry(&attached));
    assert!(added.same_entry(&updated));
    assert!(added.same_entry(&removed));
    assert!(added.same_entry(&looked_up));
}

#[test]
fn test_entry_of_untracked_entity_is_detached() {
    let context = context();
    let entry = context.entry(&tag("loose")).unwrap();

    assert_eq!(entry.state(), EntityState::Detached);
    assert!(context.entries().unwrap().is_empty());
}

#[test]
fn test_entry_lookup_does_not_retain_untracked_entity() {
    let context = context();
    let manager = context.state_manager().unwrap();
    let loose = tag("loose");
    let watched = Arc::downgrade(&loose);

    let entry = context.entry(&loose).unwrap();
    assert!(entry.same_entry(&context.entry(&loose).unwrap()));
    assert_eq!(manager.detached_len(), 1);

    drop(entry);
    drop(loose);
    assert!(watched.upgrade().is_none());
    assert_eq!(manager.detached_len(), 0);
    assert!(context.entries().unwrap().is_empty());
}

#[test]
fn test_detached_entry_is_released_and_can_be_tracked_again() {
    let context = context();
    let manager = context.state_manager().unwrap();
    let entity = tag("retrack");

    let entry = context.entry(&entity).unwrap();
    entry.set_state(EntityState::Unchanged).unwrap();
    assert!(entry.same_entry(&context.entry(&entity).unwrap()));
    assert_eq!(context.entries().unwrap().len(), 1);
    assert_eq!(manager.detached_len(), 0);

    entry.set_state(EntityState::Detached).unwrap();
    assert!(context.entries().unwrap().is_empty());
    assert_eq!(manager.detached_len(), 1);
    assert!(entry.same_entry(&context.entry(&entity).unwrap()));

    drop(entry);
    assert_eq!(manager.detached_len(), 0);
    assert_eq!(context.attach(&entity).unwrap().state(), EntityState::Unchanged);
    assert_eq!(context.entries().unwrap().len(), 1);
}

#[test]
fn test_entries_in_tracking_order() {
    let context = context();
    let (a, b, c) = (tag("a"), tag("b"), tag("c"));
    context.attach(&b).unwrap();
    context.add(&a).unwrap();
    context.update(&c).unwrap();

    let names: Vec<Value> = context
        .entries()
        .unwrap()
        .iter()
        .map(|e| e.property("Name"))
        .collect();
    assert_eq!(names, vec![Value::from("b"), Value::from("a"), Value::from("c")]);
}

#[test]
fn test_unknown_entity_type() {
    let context = context();
    let ghost = EntityObject::new("Ghost").with("Id", 1).into_ref();

    let err = context.attach(&ghost).unwrap_err();
    assert!(matches!(err, ContextError::EntityTypeNotFound(name) if name == "Ghost"));
}

// ============================================================================
// State transitions
// ============================================================================

fn tracked_in(context: &DbContext<Shop>, name: &str, state: EntityState) -> EntityRef {
    let entity = tag(name);
    if state != EntityState::Detached {
        context.attach(&entity).unwrap().set_state(state).unwrap();
        assert_eq!(context.entry(&entity).unwrap().state(), state);
    }
    entity
}

#[test]
fn test_state_transition_table() {
    use EntityState::*;

    let starts = [Detached, Unchanged, Added, Modified, Deleted];
    let context = context();

    for (i, start) in starts.into_iter().enumerate() {
        let entity = tracked_in(&context, &format!("add-{i}"), start);
        assert_eq!(context.add(&entity).unwrap().state(), Added, "Add from {start}");

        let entity = tracked_in(&context, &format!("attach-{i}"), start);
        assert_eq!(context.attach(&entity).unwrap().state(), Unchanged, "Attach from {start}");

        let entity = tracked_in(&context, &format!("update-{i}"), start);
        assert_eq!(context.update(&entity).unwrap().state(), Modified, "Update from {start}");

        let entity = tracked_in(&context, &format!("remove-{i}"), start);
        let expected = if start == Added { Detached } else { Deleted };
        assert_eq!(context.remove(&entity).unwrap().state(), expected, "Remove from {start}");
    }
}

#[test]
fn test_unset_generated_key_attaches_as_added() {
    let context = context();
    let fresh = EntityObject::new("Category").into_ref();

    let entry = context.attach(&fresh).unwrap();
    assert_eq!(entry.state(), EntityState::Added);
    assert_eq!(fresh.get("Id"), Value::Int(1));

    let second = EntityObject::new("Category").with("Id", 0).into_ref();
    assert_eq!(context.update(&second).unwrap().state(), EntityState::Added);
    assert_eq!(second.get("Id"), Value::Int(2));
}

#[test]
fn test_set_key_is_kept_on_add() {
    let context = context();
    let entity = category(42);

    context.add(&entity).unwrap();
    assert_eq!(entity.get("Id"), Value::Int(42));
}

#[test]
fn test_ranges() {
    let context = context();
    let tags = vec![tag("x"), tag("y")];

    context.add_range(Vec::<EntityRef>::new()).unwrap();
    assert!(context.entries().unwrap().is_empty());

    context.attach_range(&tags).unwrap();
    assert!(tags
        .iter()
        .all(|t| context.entry(t).unwrap().state() == EntityState::Unchanged));

    context.update_range(&tags).unwrap();
    assert!(tags
        .iter()
        .all(|t| context.entry(t).unwrap().state() == EntityState::Modified));

    context.remove_range(tags.clone()).unwrap();
    assert!(tags
        .iter()
        .all(|t| context.entry(t).unwrap().state() == EntityState::Deleted));
}

#[tokio::test]
async fn test_add_async_generates_keys() {
    let context = context();
    let first = EntityObject::new("Category").into_ref();
    let second = EntityObject::new("Category").into_ref();

    let entry = context.add_async(&first).await.unwrap();
    assert_eq!(entry.state(), EntityState::Added);
    assert_eq!(first.get("Id"), Value::Int(1));

    context.add_range_async([second.clone()]).await.unwrap();
    assert_eq!(second.get("Id"), Value::Int(2));
}

#[test]
fn test_disposed_context_rejects_tracking() {
    let context = context();
    context.attach(&tag("before")).unwrap();
    context.dispose();

    assert!(matches!(context.add(&tag("after")), Err(ContextError::Disposed)));
    assert!(matches!(
        context.attach_range([tag("after")]),
        Err(ContextError::Disposed)
    ));
    assert!(matches!(context.entries(), Err(ContextError::Disposed)));
}

// ============================================================================
// Fix-up
// ============================================================================

#[test]
fn test_fixup_principal_then_dependent() {
    let context = context();
    let electronics = category(7);
    let phone = product(1, 7);

    context.attach(&electronics).unwrap();
    context.attach(&phone).unwrap();

    assert!(linked(&electronics, &phone));
    assert_eq!(context.entry(&phone).unwrap().state(), EntityState::Unchanged);
}

#[test]
fn test_fixup_dependent_then_principal() {
    let context = context();
    let electronics = category(7);
    let phone = product(1, 7);

    context.attach(&phone).unwrap();
    assert!(phone.reference("Category").is_none());

    context.attach(&electronics).unwrap();
    assert!(linked(&electronics, &phone));
}

#[test]
fn test_fixup_from_reference_navigation() {
    let context = context();
    let electronics = category(7);
    let phone = product(1, Value::Null);
    phone.set_reference("Category", Some(&electronics));

    context.attach(&phone).unwrap();

    assert_eq!(context.entry(&electronics).unwrap().state(), EntityState::Unchanged);
    assert!(linked(&electronics, &phone));
}

#[test]
fn test_principal_only_reachable_by_reference_is_tracked() {
    let context = context();
    let phone = EntityObject::new("Product").into_ref();
    phone.set_reference("Category", Some(&EntityObject::new("Category").into_ref()));

    context.add(&phone).unwrap();

    let entries = context.entries().unwrap();
    assert_eq!(entries.len(), 2);
    let category = phone.reference("Category").unwrap();
    assert_eq!(context.entry(&category).unwrap().state(), EntityState::Added);
    assert_eq!(category.get("Id"), Value::Int(1));
    assert_eq!(phone.get("CategoryId"), Value::Int(1));
    assert!(linked(&category, &phone));
}

#[test]
fn test_fixup_from_collection_navigation() {
    let context = context();
    let electronics = category(7);
    let phone = product(1, Value::Null);
    electronics.add_to_collection("Products", &phone);

    context.attach(&electronics).unwrap();

    assert_eq!(context.entry(&phone).unwrap().state(), EntityState::Unchanged);
    assert!(linked(&electronics, &phone));
}

#[test]
fn test_added_graph_gets_generated_keys_propagated() {
    let context = context();
    let books = EntityObject::new("Category").into_ref();
    let novel = EntityObject::new("Product").into_ref();
    books.add_to_collection("Products", &novel);

    context.add(&books).unwrap();

    assert_eq!(context.entry(&novel).unwrap().state(), EntityState::Added);
    assert_eq!(books.get("Id"), Value::Int(1));
    assert!(linked(&books, &novel));
}

#[test]
fn test_tracked_related_entities_keep_state() {
    let context = context();
    let electronics = category(7);
    let phone = product(1, 7);
    context.attach(&electronics).unwrap();
    phone.set_reference("Category", Some(&electronics));

    context.add(&phone).unwrap();

    assert_eq!(context.entry(&electronics).unwrap().state(), EntityState::Unchanged);
    assert_eq!(context.entry(&phone).unwrap().state(), EntityState::Added);
}

#[test]
fn test_remove_cascades_to_dependents() {
    let context = context();
    let electronics = category(7);
    let phone = product(1, 7);
    let laptop = product(2, 7);
    context
        .attach_range([electronics.clone(), phone.clone(), laptop.clone()])
        .unwrap();

    context.remove(&electronics).unwrap();

    for entity in [&electronics, &phone, &laptop] {
        assert_eq!(context.entry(entity).unwrap().state(), EntityState::Deleted);
    }
}

#[test]
fn test_remove_attaches_untracked_principal() {
    let context = context();
    let electronics = category(7);
    let phone = product(1, 7);
    phone.set_reference("Category", Some(&electronics));

    context.remove(&phone).unwrap();

    assert_eq!(context.entry(&phone).unwrap().state(), EntityState::Deleted);
    assert_eq!(context.entry(&electronics).unwrap().state(), EntityState::Unchanged);
}

#[test]
fn test_removing_added_dependent_leaves_collection() {
    let context = context();
    let electronics = category(7);
    context.attach(&electronics).unwrap();
    let phone = product(1, 7);
    context.add(&phone).unwrap();
    assert!(electronics.collection_contains("Products", &phone));

    let entry = context.remove(&phone).unwrap();

    assert_eq!(entry.state(), EntityState::Detached);
    assert!(!electronics.collection_contains("Products", &phone));
}

#[test]
fn test_foreign_key_change_moves_dependent() {
    let context = context();
    let old = category(1);
    let new = category(2);
    let phone = product(10, 1);
    context.attach_range([old.clone(), new.clone(), phone.clone()]).unwrap();
    assert!(linked(&old, &phone));

    let entry = context.entry(&phone).unwrap();
    entry.set_foreign_key("CategoryId", 2).unwrap();

    assert!(linked(&new, &phone));
    assert!(!old.collection_contains("Products", &phone));
    assert_eq!(entry.state(), EntityState::Modified);
}

#[test]
fn test_foreign_key_to_untracked_principal_clears_reference() {
    let context = context();
    let electronics = category(1);
    let phone = product(10, 1);
    context.attach_range([electronics.clone(), phone.clone()]).unwrap();

    context.entry(&phone).unwrap().set_foreign_key("CategoryId", 99).unwrap();

    assert!(phone.reference("Category").is_none());
    assert!(!electronics.collection_contains("Products", &phone));
    assert_eq!(phone.get("CategoryId"), Value::Int(99));
}

#[test]
fn test_reference_change_rewrites_foreign_key() {
    let context = context();
    let old = category(1);
    let new = category(2);
    let phone = product(10, 1);
    context.attach_range([old.clone(), new.clone(), phone.clone()]).unwrap();

    let entry = context.entry(&phone).unwrap();
    entry.set_reference("Category", Some(&new)).unwrap();
    assert!(linked(&new, &phone));
    assert!(!old.collection_contains("Products", &phone));

    entry.set_reference("Category", None).unwrap();
    assert_eq!(phone.get("CategoryId"), Value::Null);
    assert!(!new.collection_contains("Products", &phone));
}

#[test]
fn test_add_to_collection_links_tracked_dependent() {
    let context = context();
    let old = category(1);
    let new = category(2);
    let phone = product(10, 1);
    context.attach_range([old.clone(), new.clone(), phone.clone()]).unwrap();

    context
        .entry(&new)
        .unwrap()
        .add_to_collection("Products", &phone)
        .unwrap();

    assert!(linked(&new, &phone));
    assert!(!old.collection_contains("Products", &phone));
    assert_eq!(context.entry(&phone).unwrap().state(), EntityState::Modified);
}

#[test]
fn test_unknown_navigation_and_foreign_key() {
    let context = context();
    let phone = product(10, 1);
    let entry = context.attach(&phone).unwrap();

    assert!(matches!(
        entry.set_foreign_key("Name", 1),
        Err(ContextError::UnknownForeignKey { .. })
    ));
    assert!(matches!(
        entry.set_reference("Owner", None),
        Err(ContextError::UnknownNavigation { .. })
    ));
}
