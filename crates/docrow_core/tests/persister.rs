use docrow_core::{
    AdapterConfig, Attribute, MetadataAdapter, Resource, ResourceId, ResourceType, StoreError,
    TypeRegistry, Value,
};
use serde_json::json;

fn registry() -> TypeRegistry {
    TypeRegistry::new()
        .with(ResourceType::new("Book").with_optimistic_locking())
        .unwrap()
        .with(ResourceType::new("Page"))
        .unwrap()
}

fn adapter() -> MetadataAdapter {
    MetadataAdapter::open(AdapterConfig::default(), registry()).unwrap()
}

fn book(title: &str) -> Resource {
    Resource::new("Book").with("title", Value::from(title))
}

fn version_of(adapter: &MetadataAdapter, resource: &Resource) -> i64 {
    resource.lock_token_for(adapter.id()).unwrap().version
}

#[test]
fn save_assigns_id_timestamps_and_initial_version() {
    let adapter = adapter();

    let saved = adapter.persister().save(&book("first"), false).unwrap();

    assert!(saved.id.is_some());
    assert!(saved.is_persisted());
    assert!(saved.created_at.is_some());
    assert_eq!(saved.created_at, saved.updated_at);
    assert_eq!(version_of(&adapter, &saved), 0);
    assert_eq!(saved.values("title"), &[Value::from("first")]);
}

#[test]
fn save_keeps_caller_provided_id() {
    let adapter = adapter();
    let id = ResourceId::generate();

    let saved = adapter
        .persister()
        .save(&Resource::with_id(id.clone(), "Page"), false)
        .unwrap();

    assert_eq!(saved.id, Some(id));
}

#[test]
fn single_values_are_stored_as_one_element_arrays() {
    let adapter = adapter();
    let resource = book("test").with("authors", Attribute::many(["a", "b"]));

    let saved = adapter.persister().save(&resource, false).unwrap();

    let document: String = adapter
        .connection()
        .query_row(
            "SELECT document FROM resources WHERE id = ?1;",
            [saved.id.as_ref().unwrap().as_str()],
            |row| row.get(0),
        )
        .unwrap();
    let document: serde_json::Value = serde_json::from_str(&document).unwrap();
    assert_eq!(document["title"], json!(["test"]));
    assert_eq!(document["authors"], json!(["a", "b"]));
    assert!(document.get("id").is_none());
}

#[test]
fn update_preserves_created_at_and_increments_version() {
    let adapter = adapter();
    let saved = adapter.persister().save(&book("draft"), false).unwrap();

    let mut edited = saved.clone();
    edited.set("title", Value::from("final"));
    let updated = adapter.persister().save(&edited, false).unwrap();

    assert_eq!(updated.id, saved.id);
    assert_eq!(updated.created_at, saved.created_at);
    assert_eq!(version_of(&adapter, &updated), 1);
    assert_eq!(updated.values("title"), &[Value::from("final")]);
}

#[test]
fn stale_copy_is_rejected_until_refetched() {
    let adapter = adapter();
    let persister = adapter.persister();
    let saved = persister.save(&book("original"), false).unwrap();
    let saved = persister.save(&saved, false).unwrap();
    assert_eq!(version_of(&adapter, &saved), 1);

    let mut first = saved.clone();
    let mut second = saved.clone();
    first.set("title", Value::from("first writer"));
    second.set("title", Value::from("second writer"));

    let written = persister.save(&first, false).unwrap();
    assert_eq!(version_of(&adapter, &written), 2);

    let err = persister.save(&second, false).unwrap_err();
    assert!(matches!(err, StoreError::StaleObject(_)));

    let id = saved.id.as_ref().unwrap().as_str();
    let mut refetched = adapter.query_service().find_by(id).unwrap();
    assert_eq!(refetched.values("title"), &[Value::from("first writer")]);
    refetched.set("title", Value::from("second writer"));
    let written = persister.save(&refetched, false).unwrap();
    assert_eq!(version_of(&adapter, &written), 3);
}

#[test]
fn missing_lock_token_expects_version_zero() {
    let adapter = adapter();
    let persister = adapter.persister();
    let mut saved = persister.save(&book("tokenless"), false).unwrap();

    saved.clear_lock_tokens();
    let updated = persister.save(&saved, false).unwrap();
    assert_eq!(version_of(&adapter, &updated), 1);

    let err = persister.save(&saved, false).unwrap_err();
    assert!(matches!(err, StoreError::StaleObject(_)));
}

#[test]
fn unlocked_type_ignores_wrong_tokens() {
    let adapter = adapter();
    let persister = adapter.persister();
    let saved = persister
        .save(&Resource::new("Page").with("text", Value::from("one")), false)
        .unwrap();

    let mut stale = saved.clone();
    stale.set_lock_token(docrow_core::LockToken::new(adapter.id(), 99));
    persister.save(&stale, false).unwrap();
    let updated = persister.save(&stale, false).unwrap();

    assert_eq!(version_of(&adapter, &updated), 2);
}

#[test]
fn locking_enabled_after_rows_exist_accepts_current_token() {
    let mut adapter = adapter();
    let single = adapter
        .persister()
        .save(&Resource::new("Page"), false)
        .unwrap();
    let batched = adapter
        .persister()
        .save(&Resource::new("Page"), false)
        .unwrap();

    adapter
        .redefine_type(ResourceType::new("Page").with_optimistic_locking())
        .unwrap();

    let saved = adapter.persister().save(&single, false).unwrap();
    assert_eq!(version_of(&adapter, &saved), 1);

    let saved = adapter.persister().save_all(&[batched]).unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(version_of(&adapter, &saved[0]), 1);
}

#[test]
fn save_all_inserts_then_updates() {
    let adapter = adapter();
    let persister = adapter.persister();

    let inserted = persister
        .save_all(&[book("a"), book("b"), Resource::new("Page")])
        .unwrap();
    assert_eq!(inserted.len(), 3);
    assert!(inserted.iter().all(|resource| resource.id.is_some()));
    assert!(inserted
        .iter()
        .all(|resource| version_of(&adapter, resource) == 0));

    let updated = persister.save_all(&inserted).unwrap();
    assert_eq!(updated.len(), 3);
    assert!(updated
        .iter()
        .all(|resource| version_of(&adapter, resource) == 1));
    assert_eq!(adapter.query_service().count_all().unwrap(), 3);
}

#[test]
fn save_all_with_one_stale_resource_changes_nothing() {
    let adapter = adapter();
    let persister = adapter.persister();
    let fresh = persister.save(&book("fresh"), false).unwrap();
    let stale = persister.save(&book("stale"), false).unwrap();

    let mut concurrent = stale.clone();
    concurrent.set("title", Value::from("concurrent"));
    persister.save(&concurrent, false).unwrap();

    let mut fresh_edit = fresh.clone();
    fresh_edit.set("title", Value::from("batched"));
    let mut stale_edit = stale.clone();
    stale_edit.set("title", Value::from("batched"));
    let err = persister.save_all(&[fresh_edit, stale_edit]).unwrap_err();
    assert!(matches!(err, StoreError::StaleObject(_)));

    let queries = adapter.query_service();
    let fresh_loaded = queries
        .find_by(fresh.id.as_ref().unwrap().as_str())
        .unwrap();
    assert_eq!(fresh_loaded.values("title"), &[Value::from("fresh")]);
    assert_eq!(version_of(&adapter, &fresh_loaded), 0);
    let stale_loaded = queries
        .find_by(stale.id.as_ref().unwrap().as_str())
        .unwrap();
    assert_eq!(stale_loaded.values("title"), &[Value::from("concurrent")]);
    assert_eq!(version_of(&adapter, &stale_loaded), 1);
}

#[test]
fn save_all_rolls_back_every_chunk() {
    let adapter = adapter();
    let persister = adapter.persister();
    let fresh: Vec<Resource> = (0..1203).map(|n| book(&format!("book {n}"))).collect();
    let mut batch = persister.save_all(&fresh).unwrap();
    assert_eq!(batch.len(), 1203);

    for resource in &mut batch {
        resource.set("title", Value::from("rewritten"));
    }
    batch[1100].set_lock_token(docrow_core::LockToken::new(adapter.id(), 7));
    let err = persister.save_all(&batch).unwrap_err();
    assert!(matches!(err, StoreError::StaleObject(_)));

    let (rows, bumped, rewritten): (i64, i64, i64) = adapter
        .connection()
        .query_row(
            "SELECT
                COUNT(*),
                SUM(version <> 0),
                SUM(json_extract(document, '$.title[0]') = 'rewritten')
             FROM resources;",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!((rows, bumped, rewritten), (1203, 0, 0));
}

#[test]
fn save_all_does_not_resurrect_deleted_rows() {
    let adapter = adapter();
    let persister = adapter.persister();
    let saved = persister.save(&book("gone"), false).unwrap();
    persister.delete(&saved).unwrap();

    let err = persister.save_all(&[book("new"), saved]).unwrap_err();

    assert!(matches!(err, StoreError::ObjectNotFound(_)));
    assert_eq!(adapter.query_service().count_all().unwrap(), 0);
}

#[test]
fn failed_save_all_inside_caller_transaction_keeps_earlier_writes() {
    let adapter = adapter();
    let persister = adapter.persister();
    let stale = persister.save(&book("stale"), false).unwrap();
    persister.save(&stale, false).unwrap();

    adapter.connection().execute_batch("BEGIN;").unwrap();
    let kept = persister.save(&book("kept"), false).unwrap();
    let err = persister.save_all(&[book("dropped"), stale]).unwrap_err();
    assert!(matches!(err, StoreError::StaleObject(_)));
    adapter.connection().execute_batch("COMMIT;").unwrap();

    let queries = adapter.query_service();
    assert_eq!(queries.count_all().unwrap(), 2);
    queries
        .find_by(kept.id.as_ref().unwrap().as_str())
        .unwrap();
}

#[test]
fn save_all_of_empty_slice_is_a_no_op() {
    let adapter = adapter();

    assert!(adapter.persister().save_all(&[]).unwrap().is_empty());
}

#[test]
fn delete_is_idempotent() {
    let adapter = adapter();
    let persister = adapter.persister();
    let saved = persister.save(&book("doomed"), false).unwrap();

    let returned = persister.delete(&saved).unwrap();
    persister.delete(&saved).unwrap();
    persister.delete(&Resource::new("Book")).unwrap();

    assert_eq!(returned, saved);
    let err = adapter
        .query_service()
        .find_by(saved.id.as_ref().unwrap().as_str())
        .unwrap_err();
    assert!(matches!(err, StoreError::ObjectNotFound(_)));
}

#[test]
fn vanished_row_is_reinserted_only_for_external_resources() {
    let adapter = adapter();
    let persister = adapter.persister();
    let saved = persister.save(&book("vanishing"), false).unwrap();
    persister.delete(&saved).unwrap();

    let err = persister.save(&saved, false).unwrap_err();
    assert!(matches!(err, StoreError::ObjectNotFound(_)));

    let restored = persister.save(&saved, true).unwrap();
    assert_eq!(restored.id, saved.id);
    assert_eq!(version_of(&adapter, &restored), 0);
}

#[test]
fn wipe_removes_every_row() {
    let adapter = adapter();
    let persister = adapter.persister();
    persister
        .save_all(&[book("a"), book("b"), Resource::new("Page")])
        .unwrap();

    persister.wipe().unwrap();

    assert_eq!(adapter.query_service().count_all().unwrap(), 0);
}

#[test]
fn unknown_type_tag_is_a_mapping_error() {
    let adapter = adapter();

    let err = adapter
        .persister()
        .save(&Resource::new("Ghost"), false)
        .unwrap_err();
    assert!(matches!(err, StoreError::Mapping(_)));

    let err = adapter
        .persister()
        .save_all(&[book("ok"), Resource::new("Ghost")])
        .unwrap_err();
    assert!(matches!(err, StoreError::Mapping(_)));
    assert_eq!(adapter.query_service().count_all().unwrap(), 0);
}

#[test]
fn optimistic_locking_spans_connections_on_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db");
    let first = MetadataAdapter::open(AdapterConfig::file(&path), registry()).unwrap();
    let second = MetadataAdapter::open(AdapterConfig::file(&path), registry()).unwrap();
    assert_eq!(first.id(), second.id());

    let saved = first.persister().save(&book("shared"), false).unwrap();
    let id = saved.id.as_ref().unwrap().as_str().to_string();
    let mut seen_by_second = second.query_service().find_by(&id).unwrap();

    let mut edited = saved.clone();
    edited.set("title", Value::from("first wins"));
    first.persister().save(&edited, false).unwrap();

    seen_by_second.set("title", Value::from("second loses"));
    let err = second
        .persister()
        .save(&seen_by_second, false)
        .unwrap_err();
    assert!(matches!(err, StoreError::StaleObject(_)));

    let loaded = second.query_service().find_by(&id).unwrap();
    assert_eq!(loaded.values("title"), &[Value::from("first wins")]);
}
