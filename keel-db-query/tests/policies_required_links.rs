//! Required links whose targets are hidden by a read policy.

mod support;

use keel_db_core::{Expr, MemoryStore, SessionContext};
use keel_db_policy::PolicyOptions;
use keel_db_query::{Delete, Insert, QueryEngine, QueryError, Select, Shape, Update};
use serde_json::json;
use support::*;

fn setup(union: bool) -> (QueryEngine, MemoryStore) {
    let engine = query_engine(redacted_target_schema(union));
    let mut store = MemoryStore::new();
    let ctx = engine.context(SessionContext::new(), PolicyOptions::default());
    let inserted = engine
        .execute(
            &mut store,
            &ctx,
            Insert::new("Ptr").nested("tgt", Insert::new("Tgt").set("b", Expr::bool(true))),
        )
        .unwrap();
    assert_eq!(inserted.len(), 1);
    assert_eq!(store.len(), 2);
    (engine, store)
}

fn hidden_target_reads() -> Vec<Select> {
    vec![
        Select::new(Expr::objects("Ptr")).shape(Shape::new().field("tgt")),
        Select::new(Expr::objects("Ptr"))
            .shape(Shape::new().computed("z", Expr::subject().ptr("tgt").ptr("b"))),
        Select::new(Expr::objects("Ptr").ptr("tgt")),
        Select::new(Expr::objects("Ptr").ptr("tgt").ptr("b")),
    ]
}

fn assert_hidden_required_link(union: bool) {
    let (engine, mut store) = setup(union);

    for read in hidden_target_reads() {
        let err = select(&engine, &store, filtered_session(None), read).unwrap_err();
        assert!(matches!(err, QueryError::CardinalityViolation(_)), "{:?}", err);
        assert!(err.to_string().contains("returned an empty set"), "{}", err);
        assert!(
            err.to_string()
                .contains("required link 'tgt' of object type 'Ptr'"),
            "{}",
            err
        );
    }

    let ctx = engine.context(filtered_session(None), PolicyOptions::default());
    let deleted = engine
        .execute(&mut store, &ctx, Delete::new(Expr::objects("Ptr")))
        .unwrap();
    assert_eq!(deleted.len(), 1);

    for read in hidden_target_reads() {
        let rows = select(&engine, &store, filtered_session(None), read).unwrap();
        assert!(rows.is_empty());
    }
}

#[test]
fn test_required_link_to_hidden_target_is_an_error() {
    assert_hidden_required_link(false);
}

#[test]
fn test_required_union_link_to_hidden_target_is_an_error() {
    assert_hidden_required_link(true);
}

#[test]
fn test_visible_target_reads_normally() {
    let (engine, store) = setup(false);

    let rows = select(
        &engine,
        &store,
        SessionContext::new(),
        Select::new(Expr::objects("Ptr"))
            .shape(Shape::new().computed("z", Expr::subject().ptr("tgt").ptr("b"))),
    )
    .unwrap();
    assert_eq!(rows, vec![json!({"z": true})]);
}

#[test]
fn test_bypass_skips_policies_and_enforcement() {
    let (engine, store) = setup(false);
    let ctx = engine.context(filtered_session(None), PolicyOptions::root());

    for read in hidden_target_reads() {
        let rows = engine.query(&store, &ctx, read).unwrap();
        assert_eq!(rows.len(), 1);
    }

    let opts = json!({"apply-access-policies": false});
    let ctx = engine.context(
        filtered_session(None),
        PolicyOptions::from_opts_value(Some(&opts)),
    );
    let rows = engine
        .query(&store, &ctx, Select::new(Expr::objects("Tgt").ptr("b")))
        .unwrap();
    assert_eq!(rows, vec![json!(true)]);
}

#[test]
fn test_redacted_objects_remain_writable() {
    let (engine, mut store) = setup(false);
    let ctx = engine.context(filtered_session(None), PolicyOptions::default());

    let visible = engine
        .query(&store, &ctx, Select::new(Expr::objects("Tgt")))
        .unwrap();
    assert!(visible.is_empty());

    let updated = engine
        .execute(
            &mut store,
            &ctx,
            Update::new(Expr::objects("Tgt")).set("b", Expr::bool(false)),
        )
        .unwrap();
    assert_eq!(updated.len(), 1);

    let rows = select(
        &engine,
        &store,
        SessionContext::new(),
        Select::new(Expr::objects("Tgt").ptr("b")),
    )
    .unwrap();
    assert_eq!(rows, vec![json!(false)]);

    let deleted = engine
        .execute(&mut store, &ctx, Delete::new(Expr::objects("Ptr")))
        .unwrap();
    assert_eq!(deleted.len(), 1);
    let deleted = engine
        .execute(&mut store, &ctx, Delete::new(Expr::objects("Tgt")))
        .unwrap();
    assert_eq!(deleted.len(), 1);
    assert!(store.is_empty());
}

#[test]
fn test_delete_of_required_link_target_is_refused() {
    let (engine, mut store) = setup(false);
    let ctx = engine.context(SessionContext::new(), PolicyOptions::default());

    let err = engine
        .execute(&mut store, &ctx, Delete::new(Expr::objects("Tgt")))
        .unwrap_err();
    assert!(matches!(err, QueryError::CardinalityViolation(_)), "{:?}", err);
    assert!(
        err.to_string()
            .contains("prohibited by required link 'tgt' of object type 'Ptr'"),
        "{}",
        err
    );
    assert_eq!(store.len(), 2);

    let rows = select(
        &engine,
        &store,
        SessionContext::new(),
        Select::new(Expr::objects("Ptr"))
            .shape(Shape::new().computed("z", Expr::subject().ptr("tgt").ptr("b"))),
    )
    .unwrap();
    assert_eq!(rows, vec![json!({"z": true})]);
}

#[test]
fn test_delete_with_its_referrer_succeeds() {
    let (engine, mut store) = setup(true);
    let ctx = engine.context(SessionContext::new(), PolicyOptions::default());

    let deleted = engine
        .execute(&mut store, &ctx, Delete::new(Expr::objects("Object")))
        .unwrap();
    assert_eq!(deleted.len(), 2);
    assert!(store.is_empty());
}
