//! Request pipeline: error formatting, route resolution, model binding, transaction scope,
//! optional session handling, then the action.

mod action;
mod context;
mod router;
mod session;
mod stages;
mod transaction;

pub use action::{coerce_params, handler_fn, Action, ActionMetadata, AuthorizeFn, FnHandler, Handler};
pub use context::RequestContext;
pub use router::{Route, RouteMatch, RouteTable};
pub use session::{MemorySessionStore, PgSessionStore, Session, SessionStage, SessionStore, SESSION_COOKIE, SESSION_TABLE};
pub use stages::{
    ActionInvoker, Endpoint, ErrorFormatting, ErrorListener, ModelBinding, Next, RouteResolution, Stage,
    TransactionScope,
};
pub use transaction::{
    ActiveTransaction, PgTransactionSource, SlotGuard, TransactionListener, TransactionSlot, TransactionSource,
    TxHandle, TxState,
};

use crate::events::EventDispatcher;
use crate::extractors::Principal;
use crate::model::ModelRegistry;
use crate::response::Reply;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::Instrument;

pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
    endpoint: ActionInvoker,
    events: Arc<EventDispatcher<ErrorListener>>,
    routes: Arc<RouteTable>,
}

impl Pipeline {
    pub fn builder(registry: Arc<ModelRegistry>, routes: RouteTable, transactions: Arc<dyn TransactionSource>) -> PipelineBuilder {
        PipelineBuilder {
            registry,
            routes,
            transactions,
            pool: None,
            session: None,
            timeout_ms: None,
        }
    }

    /// Register a listener for the application `error` event.
    pub fn on_error<F>(&self, listener: F)
    where
        F: Fn(&crate::error::AppError, &RequestContext) + Send + Sync + 'static,
    {
        self.events.on("error", Arc::new(listener));
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Run the full chain. Errors never escape: the formatting stage turns them into replies.
    pub async fn handle(&self, ctx: &mut RequestContext) -> Reply {
        Next::new(&self.stages, &self.endpoint)
            .run(ctx)
            .await
            .unwrap_or_else(|err| Reply::from_error(&err))
    }
}

pub struct PipelineBuilder {
    registry: Arc<ModelRegistry>,
    routes: RouteTable,
    transactions: Arc<dyn TransactionSource>,
    pool: Option<PgPool>,
    session: Option<(Arc<dyn SessionStore>, bool)>,
    timeout_ms: Option<u64>,
}

impl PipelineBuilder {
    pub fn pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn session_store(mut self, store: Arc<dyn SessionStore>, auto_commit: bool) -> Self {
        self.session = Some((store, auto_commit));
        self
    }

    pub fn timeout_ms(mut self, ms: Option<u64>) -> Self {
        self.timeout_ms = ms;
        self
    }

    pub fn build(self) -> Pipeline {
        let events = Arc::new(EventDispatcher::new());
        let routes = Arc::new(self.routes);
        let mut stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(ErrorFormatting::new(events.clone())),
            Arc::new(RouteResolution::new(routes.clone())),
            Arc::new(ModelBinding::new(self.registry, self.pool)),
            Arc::new(TransactionScope::new(self.transactions, self.timeout_ms)),
        ];
        if let Some((store, auto_commit)) = self.session {
            stages.push(Arc::new(SessionStage::new(store, auto_commit)));
        }
        Pipeline {
            stages,
            endpoint: ActionInvoker,
            events,
            routes,
        }
    }
}

async fn dispatch(
    State(pipeline): State<Arc<Pipeline>>,
    method: Method,
    uri: Uri,
    principal: Principal,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut ctx = RequestContext::new(method, uri.path())
        .with_query(query)
        .with_headers(headers)
        .with_body(body)
        .with_principal(principal.0);
    let span = ctx.span.clone();
    pipeline.handle(&mut ctx).instrument(span).await.into_response()
}

/// Router that sends every request not matched by axum routes through the pipeline.
pub fn pipeline_router(pipeline: Arc<Pipeline>) -> Router {
    Router::new().fallback(dispatch).with_state(pipeline)
}
