use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use schemaweb::config::ScopeConfig;
use schemaweb::pipeline::{
    handler_fn, Handler, MemorySessionStore, SessionStore, TransactionSlot, TransactionSource, TxHandle, TxState,
};
use schemaweb::relation::RelationExpression;
use schemaweb::{
    parse_models, pipeline_router, Action, ActionMetadata, AppError, KeywordSet, ModelRegistry, Pipeline,
    RequestContext, RouteTable, ValidatorFunctions,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

#[derive(Default)]
struct Counters {
    begun: AtomicUsize,
    committed: AtomicUsize,
    rolled_back: AtomicUsize,
}

struct FakeSource(Arc<Counters>);

struct FakeTx(Arc<Counters>);

#[async_trait]
impl TransactionSource for FakeSource {
    async fn begin(&self) -> Result<Box<dyn TxHandle>, AppError> {
        self.0.begun.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeTx(self.0.clone())))
    }
}

#[async_trait]
impl TxHandle for FakeTx {
    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.0.committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.0.rolled_back.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Stores a value in the session, then fails when `fail` is set.
struct TouchSession {
    fail: bool,
}

#[async_trait]
impl Handler for TouchSession {
    async fn call(&self, ctx: &mut RequestContext, _params: Value) -> Result<Value, AppError> {
        if let Some(session) = ctx.session.as_mut() {
            session.set("visited", json!(true));
        }
        if self.fail {
            return Err(AppError::Conflict("nope".into()));
        }
        Ok(json!({ "ok": true }))
    }
}

/// Reports whether the request's transaction is open while the handler runs.
struct TransactionState;

#[async_trait]
impl Handler for TransactionState {
    async fn call(&self, ctx: &mut RequestContext, _params: Value) -> Result<Value, AppError> {
        Ok(json!({ "active": ctx.transaction.is_active().await }))
    }
}

/// Echoes the `:id` path segment and the merged `id` parameter.
struct PathId;

#[async_trait]
impl Handler for PathId {
    async fn call(&self, ctx: &mut RequestContext, params: Value) -> Result<Value, AppError> {
        Ok(json!({ "path": ctx.params.get("id"), "param": params["id"] }))
    }
}

fn eager_tree(node: &RelationExpression) -> Value {
    let children: serde_json::Map<String, Value> =
        node.children.iter().map(|(name, child)| (name.clone(), eager_tree(child))).collect();
    json!({ "args": node.args, "children": children })
}

/// Returns the eager expression bound to the request.
struct EagerTree;

#[async_trait]
impl Handler for EagerTree {
    async fn call(&self, ctx: &mut RequestContext, _params: Value) -> Result<Value, AppError> {
        Ok(ctx.eager.as_ref().map(eager_tree).unwrap_or(Value::Null))
    }
}

fn registry() -> Arc<ModelRegistry> {
    let configs = parse_models(
        r#"[
            { "name": "Note", "properties": { "id": { "type": "integer" }, "text": { "type": "string" } } },
            {
                "name": "User",
                "properties": { "id": { "type": "integer" }, "name": { "type": "string" } },
                "relations": {
                    "posts": { "relation": "hasMany", "modelClass": "Post",
                               "join": { "from": "User.id", "to": "Post.authorId" } }
                }
            },
            {
                "name": "Post",
                "properties": {
                    "id": { "type": "integer" },
                    "authorId": { "type": "integer" },
                    "published": { "type": "boolean" }
                },
                "relations": {
                    "author": { "relation": "belongsToOne", "modelClass": "User",
                                "join": { "from": "Post.authorId", "to": "User.id" } }
                },
                "scopes": { "published": { "where": { "published": true } } }
            }
        ]"#,
    )
    .unwrap();
    Arc::new(ModelRegistry::compile(&configs, KeywordSet::standard(ValidatorFunctions::new())).unwrap())
}

fn actions() -> Vec<Action> {
    vec![
        Action::new(
            ActionMetadata::get("/things"),
            handler_fn(|_| async { Ok::<_, AppError>(json!([{ "id": 1 }, { "id": 2 }])) }),
        ),
        Action::new(
            ActionMetadata::post("/things").transacted(),
            handler_fn(|params| async move { Ok::<_, AppError>(params) }),
        ),
        Action::new(
            ActionMetadata::post("/fail").transacted(),
            handler_fn(|_| async { Err::<Value, _>(AppError::Conflict("duplicate".into())) }),
        ),
        Action::new(
            ActionMetadata::get("/boom"),
            handler_fn(|_| async { Err::<Value, _>(AppError::Internal("boom".into())) }),
        ),
        Action::new(
            ActionMetadata::get("/echo").parameters(json!({
                "type": "object",
                "properties": { "n": { "type": "integer", "minimum": 1 } },
                "required": ["n"]
            })),
            handler_fn(|params| async move { Ok::<_, AppError>(params) }),
        ),
        Action::new(
            ActionMetadata::get("/shape").returns(json!({ "type": "object", "required": ["id"] })),
            handler_fn(|_| async { Ok::<_, AppError>(json!({})) }),
        ),
        Action::new(
            ActionMetadata::post("/slow").transacted().timeout_ms(20),
            handler_fn(|_| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok::<_, AppError>(Value::Null)
            }),
        ),
        Action::new(
            ActionMetadata::get("/private").authorize(|ctx| ctx.principal.is_some()),
            handler_fn(|_| async { Ok::<_, AppError>(json!({ "secret": 42 })) }),
        ),
        Action::new(ActionMetadata::post("/session/ok").transacted(), Arc::new(TouchSession { fail: false })),
        Action::new(ActionMetadata::post("/session/fail").transacted(), Arc::new(TouchSession { fail: true })),
        Action::new(ActionMetadata::get("/tx"), Arc::new(TransactionState)),
        Action::new(ActionMetadata::post("/tx").transacted(), Arc::new(TransactionState)),
        Action::new(ActionMetadata::patch("/users/:id").transacted(), Arc::new(PathId)).for_model("User"),
        Action::new(
            ActionMetadata::get("/users").eager_scope(["published"]).filter(
                "recent",
                ScopeConfig {
                    limit: Some(5),
                    ..Default::default()
                },
            ),
            Arc::new(EagerTree),
        )
        .for_model("User"),
    ]
}

fn pipeline(counters: Arc<Counters>, session: Option<(Arc<MemorySessionStore>, bool)>) -> Pipeline {
    let registry = registry();
    let routes = RouteTable::compile(actions(), &registry).unwrap();
    let mut builder = Pipeline::builder(registry, routes, Arc::new(FakeSource(counters)));
    if let Some((store, auto_commit)) = session {
        let store: Arc<dyn SessionStore> = store;
        builder = builder.session_store(store, auto_commit);
    }
    builder.build()
}

fn body_json(reply_body: Option<Value>) -> Value {
    reply_body.unwrap_or(Value::Null)
}

async fn send(app: axum::Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let res = app.oneshot(req).await.unwrap();
    let status = res.status();
    let headers = res.headers().clone();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, body)
}

#[tokio::test]
async fn transacted_failure_rolls_back_and_clears_slot() {
    let counters = Arc::new(Counters::default());
    let pipeline = pipeline(counters.clone(), None);
    let mut ctx = RequestContext::new(Method::POST, "/fail");
    let reply = pipeline.handle(&mut ctx).await;

    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(counters.begun.load(Ordering::SeqCst), 1);
    assert_eq!(counters.rolled_back.load(Ordering::SeqCst), 1);
    assert_eq!(counters.committed.load(Ordering::SeqCst), 0);
    assert!(!ctx.transaction.is_active().await);
    assert_eq!(ctx.transaction.state().await, TxState::RolledBack);
}

#[tokio::test]
async fn transacted_success_commits() {
    let counters = Arc::new(Counters::default());
    let pipeline = pipeline(counters.clone(), None);
    let mut ctx = RequestContext::new(Method::POST, "/things").with_body(r#"{"name":"a"}"#.into());
    let reply = pipeline.handle(&mut ctx).await;

    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(body_json(reply.body), json!({ "data": { "name": "a" } }));
    assert_eq!(counters.committed.load(Ordering::SeqCst), 1);
    assert_eq!(counters.rolled_back.load(Ordering::SeqCst), 0);
    assert_eq!(ctx.transaction.state().await, TxState::Committed);
}

#[tokio::test]
async fn plain_routes_run_without_transaction() {
    let counters = Arc::new(Counters::default());
    let pipeline = pipeline(counters.clone(), None);
    let mut ctx = RequestContext::new(Method::GET, "/things");
    let reply = pipeline.handle(&mut ctx).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(body_json(reply.body)["meta"], json!({ "count": 2 }));
    assert_eq!(counters.begun.load(Ordering::SeqCst), 0);
    assert_eq!(ctx.transaction.state().await, TxState::None);
}

#[tokio::test]
async fn wrong_verb_is_405_with_allow_header() {
    let app = pipeline_router(Arc::new(pipeline(Arc::new(Counters::default()), None)));
    let req = Request::builder().method("DELETE").uri("/things").body(Body::empty()).unwrap();
    let (status, headers, body) = send(app, req).await;

    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(headers[header::ALLOW], "GET, POST");
    assert_eq!(body["details"]["allowed"], json!(["GET", "POST"]));
}

#[tokio::test]
async fn unknown_path_is_404_without_allowed_list() {
    let app = pipeline_router(Arc::new(pipeline(Arc::new(Counters::default()), None)));
    let req = Request::builder().uri("/nowhere").body(Body::empty()).unwrap();
    let (status, headers, body) = send(app, req).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(headers.get(header::ALLOW).is_none());
    assert!(body.get("details").is_none());
}

#[tokio::test]
async fn parameters_are_coerced_and_validated() {
    let app = pipeline_router(Arc::new(pipeline(Arc::new(Counters::default()), None)));

    let req = Request::builder().uri("/echo?n=5").body(Body::empty()).unwrap();
    let (status, _, body) = send(app.clone(), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["n"], json!(5));

    let req = Request::builder().uri("/echo?n=0").body(Body::empty()).unwrap();
    let (status, _, body) = send(app.clone(), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid parameters");
    assert!(body["details"].get("n").is_some());

    let req = Request::builder().uri("/echo").body(Body::empty()).unwrap();
    let (status, _, body) = send(app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["details"].get("n").is_some());
}

#[tokio::test]
async fn invalid_return_value_is_a_server_error() {
    let pipeline = pipeline(Arc::new(Counters::default()), None);
    let mut ctx = RequestContext::new(Method::GET, "/shape");
    let reply = pipeline.handle(&mut ctx).await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_json(reply.body)["details"].get("id").is_some());
}

#[tokio::test]
async fn malformed_json_body_is_400() {
    let pipeline = pipeline(Arc::new(Counters::default()), None);
    let mut ctx = RequestContext::new(Method::POST, "/things").with_body("{not json".into());
    let reply = pipeline.handle(&mut ctx).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unstructured_errors_become_message_and_emit_event() {
    let pipeline = pipeline(Arc::new(Counters::default()), None);
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    pipeline.on_error(move |err, ctx| {
        assert_eq!(ctx.path, "/boom");
        assert!(!err.is_structured());
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let mut ctx = RequestContext::new(Method::GET, "/boom");
    let reply = pipeline.handle(&mut ctx).await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(reply.body), json!({ "message": "Internal Server Error" }));
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn timeout_takes_the_rollback_path() {
    let counters = Arc::new(Counters::default());
    let pipeline = pipeline(counters.clone(), None);
    let mut ctx = RequestContext::new(Method::POST, "/slow");
    let reply = pipeline.handle(&mut ctx).await;

    assert_eq!(reply.status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(counters.rolled_back.load(Ordering::SeqCst), 1);
    assert_eq!(counters.committed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn authorize_rejects_with_403() {
    let app = pipeline_router(Arc::new(pipeline(Arc::new(Counters::default()), None)));

    let req = Request::builder().uri("/private").body(Body::empty()).unwrap();
    let (status, _, _) = send(app.clone(), req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let req = Request::builder()
        .uri("/private")
        .header("X-Principal-ID", "alice")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["secret"], 42);
}

#[tokio::test]
async fn session_is_saved_and_cookie_set_on_success() {
    let store = Arc::new(MemorySessionStore::new());
    let app = pipeline_router(Arc::new(pipeline(
        Arc::new(Counters::default()),
        Some((store.clone(), false)),
    )));
    let req = Request::builder().method("POST").uri("/session/ok").body(Body::empty()).unwrap();
    let (status, headers, _) = send(app, req).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(store.len(), 1);
    let cookie = headers[header::SET_COOKIE].to_str().unwrap();
    assert!(cookie.starts_with("sid="));
}

#[tokio::test]
async fn auto_commit_saves_existing_session_after_rollback() {
    let store = Arc::new(MemorySessionStore::new());
    let slot = TransactionSlot::default();
    store.set("known", &serde_json::Map::new(), &slot).await.unwrap();
    let counters = Arc::new(Counters::default());
    let pipeline = pipeline(counters.clone(), Some((store.clone(), true)));
    let mut headers = axum::http::HeaderMap::new();
    headers.insert(header::COOKIE, "sid=known".parse().unwrap());
    let mut ctx = RequestContext::new(Method::POST, "/session/fail").with_headers(headers);
    let reply = pipeline.handle(&mut ctx).await;

    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(counters.rolled_back.load(Ordering::SeqCst), 1);
    assert_eq!(store.len(), 1);
    let saved = store.get("known", &slot).await.unwrap().unwrap();
    assert_eq!(saved.get("visited"), Some(&json!(true)));
}

#[tokio::test]
async fn auto_commit_drops_new_session_of_failed_request() {
    let store = Arc::new(MemorySessionStore::new());
    let app = pipeline_router(Arc::new(pipeline(
        Arc::new(Counters::default()),
        Some((store.clone(), true)),
    )));
    for _ in 0..3 {
        let req = Request::builder().method("POST").uri("/session/fail").body(Body::empty()).unwrap();
        let (status, headers, _) = send(app.clone(), req).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(headers.get(header::SET_COOKIE).is_none());
    }
    assert!(store.is_empty());
}

#[tokio::test]
async fn without_auto_commit_failed_requests_keep_no_session() {
    let store = Arc::new(MemorySessionStore::new());
    let pipeline = pipeline(Arc::new(Counters::default()), Some((store.clone(), false)));
    let mut ctx = RequestContext::new(Method::POST, "/session/fail");
    let reply = pipeline.handle(&mut ctx).await;

    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert!(store.is_empty());
}

#[tokio::test]
async fn transaction_is_open_only_inside_transacted_handlers() {
    let counters = Arc::new(Counters::default());
    let app = pipeline_router(Arc::new(pipeline(counters.clone(), None)));

    let req = Request::builder().method("POST").uri("/tx").body(Body::empty()).unwrap();
    let (status, _, body) = send(app.clone(), req).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["active"], json!(true));
    assert_eq!(counters.committed.load(Ordering::SeqCst), 1);

    let req = Request::builder().uri("/tx").body(Body::empty()).unwrap();
    let (status, _, body) = send(app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["active"], json!(false));
    assert_eq!(counters.begun.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn body_cannot_replace_path_id() {
    let app = pipeline_router(Arc::new(pipeline(Arc::new(Counters::default()), None)));
    let req = Request::builder()
        .method("PATCH")
        .uri("/users/5")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"id":"7","name":"x"}"#))
        .unwrap();
    let (status, _, body) = send(app, req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({ "path": "5", "param": "5" }));
}

#[tokio::test]
async fn eager_query_gets_action_scopes_and_filters() {
    let app = pipeline_router(Arc::new(pipeline(Arc::new(Counters::default()), None)));

    let req = Request::builder().uri("/users?eager=posts.author").body(Body::empty()).unwrap();
    let (status, _, body) = send(app.clone(), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"],
        json!({
            "args": [],
            "children": {
                "posts": {
                    "args": ["published"],
                    "children": { "author": { "args": [], "children": {} } }
                }
            }
        })
    );

    let req = Request::builder().uri("/users?eager=posts(recent)").body(Body::empty()).unwrap();
    let (status, _, body) = send(app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["children"]["posts"]["args"], json!(["published", "recent"]));
}

#[tokio::test]
async fn invalid_eager_expressions_are_400() {
    let app = pipeline_router(Arc::new(pipeline(Arc::new(Counters::default()), None)));

    let req = Request::builder().uri("/users?eager=posts.likes").body(Body::empty()).unwrap();
    let (status, _, body) = send(app.clone(), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Invalid child expression: likes"));

    let req = Request::builder().uri("/users?eager=posts(bogus)").body(Body::empty()).unwrap();
    let (status, _, body) = send(app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("bogus"));
}
