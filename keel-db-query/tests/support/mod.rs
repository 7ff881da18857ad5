//! Shared fixtures for keel-db-query integration tests.
#![allow(dead_code)]

pub mod spans;

use keel_db_core::{
    AccessPolicy, ActionSet, DataSink, Expr, GlobalDef, MemoryStore, ObjectId, ObjectType,
    Pointer, ScalarType, Schema, SchemaBuilder, SessionContext, TypeName, Value,
};
use keel_db_policy::{PolicyEngine, PolicyOptions};
use keel_db_query::{QueryEngine, Select};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Globals shared by every fixture schema
fn with_globals(builder: SchemaBuilder) -> SchemaBuilder {
    builder
        .global(
            GlobalDef::new("cur_owner_active", ScalarType::Bool)
                .required()
                .with_default(true),
        )
        .global(
            GlobalDef::new("watchers_active", ScalarType::Bool)
                .required()
                .with_default(true),
        )
        .global(
            GlobalDef::new("filter_owned", ScalarType::Bool)
                .required()
                .with_default(false),
        )
        .global(GlobalDef::new("cur_user", ScalarType::Str))
}

/// Issue tracker schema with owner and watcher policies
pub fn issues_schema() -> Schema {
    let builder = Schema::builder()
        .version(1)
        .object_type(
            ObjectType::abstract_type("Named")
                .pointer(Pointer::property("name", ScalarType::Str).required()),
        )
        .object_type(
            ObjectType::abstract_type("Owned")
                .pointer(Pointer::link("owner", "User").required())
                .policy(
                    AccessPolicy::allow("disable_filter", ActionSet::read(), Expr::bool(true))
                        .when(Expr::global("filter_owned").negate()),
                )
                .policy(
                    AccessPolicy::allow(
                        "cur_owner",
                        ActionSet::read(),
                        Expr::subject()
                            .ptr("owner")
                            .ptr("name")
                            .opt_equals(Expr::global("cur_user")),
                    )
                    .when(Expr::global("cur_owner_active")),
                ),
        )
        .object_type(
            ObjectType::abstract_type("Text")
                .pointer(Pointer::property("body", ScalarType::Str).required()),
        )
        .object_type(
            ObjectType::new("User")
                .extending("Named")
                .pointer(Pointer::link("todo", "Issue").multi()),
        )
        .object_type(ObjectType::new("Status").extending("Named"))
        .object_type(
            ObjectType::new("URL")
                .extending("Named")
                .pointer(Pointer::property("address", ScalarType::Str).required()),
        )
        .object_type(ObjectType::new("File").extending("Named"))
        .object_type(ObjectType::new("LogEntry").extending("Owned").extending("Text"))
        .object_type(
            ObjectType::new("Issue")
                .extending("Named")
                .extending("Owned")
                .extending("Text")
                .pointer(Pointer::property("number", ScalarType::Str).required())
                .pointer(Pointer::link("status", "Status").required())
                .pointer(Pointer::link("watchers", "User").multi())
                .pointer(Pointer::union_link("references", ["URL", "File"]).multi())
                .policy(
                    AccessPolicy::allow(
                        "cur_watchers",
                        ActionSet::read(),
                        Expr::global("cur_user")
                            .is_in(Expr::subject().ptr("watchers").ptr("name"))
                            .coalesce(Expr::bool(false)),
                    )
                    .when(Expr::global("watchers_active")),
                ),
        )
        .object_type(
            ObjectType::new("Comment")
                .extending("Text")
                .extending("Owned")
                .pointer(Pointer::link("issue", "Issue").required()),
        );
    with_globals(builder).build().unwrap()
}

/// Ids of the issue fixture objects
#[derive(Debug, Clone, Copy)]
pub struct IssueIds {
    pub elvis: ObjectId,
    pub yury: ObjectId,
    pub release: ObjectId,
    pub repl: ObjectId,
    pub tweak: ObjectId,
    pub regression: ObjectId,
    pub url: ObjectId,
}

fn s(v: &str) -> Vec<Value> {
    vec![Value::str(v)]
}

fn o(ids: &[ObjectId]) -> Vec<Value> {
    ids.iter().copied().map(Value::Object).collect()
}

fn put(store: &mut MemoryStore, ty: &str, fields: Vec<(&str, Vec<Value>)>) -> ObjectId {
    let fields = fields
        .into_iter()
        .map(|(name, values)| (name.to_string(), values))
        .collect();
    store.insert(&TypeName::new(ty), fields)
}

/// Populate the issue tracker.
///
/// Yury owns "Improve EdgeDB repl output rendering." and "Repl tweak." and
/// watches "Release EdgeDB"; everything else belongs to Elvis.
pub fn issues_store() -> (MemoryStore, IssueIds) {
    let mut store = MemoryStore::new();

    let elvis = put(&mut store, "User", vec![("name", s("Elvis"))]);
    let yury = put(&mut store, "User", vec![("name", s("Yury"))]);
    let open = put(&mut store, "Status", vec![("name", s("Open"))]);
    let closed = put(&mut store, "Status", vec![("name", s("Closed"))]);
    let url = put(
        &mut store,
        "URL",
        vec![("name", s("edgedb.com")), ("address", s("https://edgedb.com"))],
    );
    let file = put(&mut store, "File", vec![("name", s("screenshot.png"))]);

    let release = put(
        &mut store,
        "Issue",
        vec![
            ("number", s("1")),
            ("name", s("Release EdgeDB")),
            ("body", s("Initial public release of EdgeDB.")),
            ("owner", o(&[elvis])),
            ("watchers", o(&[yury])),
            ("status", o(&[open])),
            ("references", o(&[file])),
        ],
    );
    let repl = put(
        &mut store,
        "Issue",
        vec![
            ("number", s("2")),
            ("name", s("Improve EdgeDB repl output rendering.")),
            ("body", s("We need to be able to render data in tabular format.")),
            ("owner", o(&[yury])),
            ("watchers", o(&[elvis])),
            ("status", o(&[open])),
        ],
    );
    let tweak = put(
        &mut store,
        "Issue",
        vec![
            ("number", s("3")),
            ("name", s("Repl tweak.")),
            ("body", s("Minor lexer tweaks.")),
            ("owner", o(&[yury])),
            ("status", o(&[closed])),
        ],
    );
    let regression = put(
        &mut store,
        "Issue",
        vec![
            ("number", s("4")),
            ("name", s("Regression.")),
            ("body", s("Fix regression introduced by lexer tweak.")),
            ("owner", o(&[elvis])),
            ("watchers", o(&[elvis])),
            ("status", o(&[closed])),
            ("references", o(&[url])),
        ],
    );

    put(
        &mut store,
        "LogEntry",
        vec![("owner", o(&[elvis])), ("body", s("Team meeting."))],
    );
    put(
        &mut store,
        "Comment",
        vec![
            ("owner", o(&[elvis])),
            ("issue", o(&[release])),
            ("body", s("EdgeDB needs to happen soon.")),
        ],
    );

    store
        .set_pointer(elvis, "todo", o(&[release, repl]))
        .unwrap();
    store.set_pointer(yury, "todo", o(&[regression])).unwrap();

    (
        store,
        IssueIds {
            elvis,
            yury,
            release,
            repl,
            tweak,
            regression,
            url,
        },
    )
}

/// `Tgt`/`Ptr` schema: a required link whose target is redacted by
/// `filter_owned` but always writable. `union` adds `BadTgt` as a second
/// link target.
pub fn redacted_target_schema(union: bool) -> Schema {
    let tgt = ObjectType::new("Tgt")
        .pointer(Pointer::property("b", ScalarType::Bool).required())
        .policy(AccessPolicy::allow(
            "redact",
            ActionSet::read(),
            Expr::global("filter_owned").negate(),
        ))
        .policy(AccessPolicy::allow(
            "dml_always",
            ActionSet::write(),
            Expr::bool(true),
        ));
    let link = if union {
        Pointer::union_link("tgt", ["Tgt", "BadTgt"])
    } else {
        Pointer::link("tgt", "Tgt")
    };

    let mut builder = Schema::builder().version(1).object_type(tgt);
    if union {
        builder = builder.object_type(ObjectType::new("BadTgt"));
    }
    builder = builder.object_type(ObjectType::new("Ptr").pointer(link.required()));
    with_globals(builder).build().unwrap()
}

pub fn query_engine(schema: Schema) -> QueryEngine {
    QueryEngine::new(Arc::new(PolicyEngine::new(Arc::new(schema)).unwrap()))
}

/// Session with `filter_owned` on and the given current user
pub fn filtered_session(user: Option<&str>) -> SessionContext {
    let session = SessionContext::new().with_global("filter_owned", true);
    match user {
        Some(user) => session.with_global("cur_user", user),
        None => session,
    }
}

/// Run a select under `session` with default options
pub fn select(
    engine: &QueryEngine,
    store: &MemoryStore,
    session: SessionContext,
    select: Select,
) -> keel_db_query::Result<Vec<JsonValue>> {
    let ctx = engine.context(session, PolicyOptions::default());
    engine.query(store, &ctx, select)
}

/// Compare result rows as a multiset
pub fn assert_bag(actual: Vec<JsonValue>, expected: Vec<JsonValue>) {
    let mut actual: Vec<String> = actual.iter().map(JsonValue::to_string).collect();
    let mut expected: Vec<String> = expected.iter().map(JsonValue::to_string).collect();
    actual.sort();
    expected.sort();
    assert_eq!(actual, expected);
}

/// `{"id": ...}` rendering of an object
pub fn id_json(id: ObjectId) -> JsonValue {
    Value::Object(id).to_json()
}
