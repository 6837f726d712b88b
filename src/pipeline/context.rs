//! Per-request state threaded through every pipeline stage.

use crate::config::ScopeConfig;
use crate::error::AppError;
use crate::model::ModelRegistry;
use crate::pipeline::{Route, Session, TransactionSlot};
use crate::relation::RelationExpression;
use crate::service::BoundModel;
use axum::body::Bytes;
use axum::http::{HeaderMap, Method};
use axum_extra::extract::cookie::CookieJar;
use serde_json::Value;
use sqlx::PgPool;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

pub struct RequestContext {
    pub id: Uuid,
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
    pub raw_body: Bytes,
    /// Parsed JSON body, `null` when the request had none.
    pub body: Value,
    pub route: Option<Arc<Route>>,
    pub params: HashMap<String, String>,
    /// Set only while a transacted route runs under the transaction scope.
    pub transaction: TransactionSlot,
    pub principal: Option<String>,
    /// Scopes for the action's root query (action scopes, then `?scope=`).
    pub scopes: Vec<String>,
    pub eager: Option<RelationExpression>,
    pub session: Option<Session>,
    pub span: tracing::Span,
    models: Option<Arc<ModelRegistry>>,
    pool: Option<PgPool>,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let id = Uuid::new_v4();
        let path = path.into();
        let span = tracing::debug_span!("request", id = %id, method = %method, path = %path);
        RequestContext {
            id,
            method,
            path,
            query: HashMap::new(),
            headers: HeaderMap::new(),
            raw_body: Bytes::new(),
            body: Value::Null,
            route: None,
            params: HashMap::new(),
            transaction: TransactionSlot::default(),
            principal: None,
            scopes: Vec::new(),
            eager: None,
            session: None,
            span,
            models: None,
            pool: None,
        }
    }

    pub fn with_query(mut self, query: HashMap<String, String>) -> Self {
        self.query = query;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.raw_body = body;
        self
    }

    pub fn with_principal(mut self, principal: Option<String>) -> Self {
        self.principal = principal;
        self
    }

    /// Attach the model registry and pool; models are bound on first use through [`RequestContext::model`].
    pub fn bind_models(&mut self, registry: Arc<ModelRegistry>, pool: Option<PgPool>) {
        self.models = Some(registry);
        self.pool = pool;
    }

    pub fn registry(&self) -> Option<&ModelRegistry> {
        self.models.as_deref()
    }

    pub fn pool(&self) -> Option<&PgPool> {
        self.pool.as_ref()
    }

    /// `name` bound to this request's transaction slot.
    pub fn model(&self, name: &str) -> Result<BoundModel<'_>, AppError> {
        let registry = self
            .models
            .as_deref()
            .ok_or_else(|| AppError::Internal("models are not bound to this request".into()))?;
        BoundModel::new(registry, name, self.pool.as_ref(), &self.transaction)
    }

    /// Named eager filters declared by the matched action.
    pub fn eager_filters(&self) -> Option<&BTreeMap<String, ScopeConfig>> {
        self.route.as_ref().map(|route| &route.metadata.filters)
    }

    /// Cookie value from the `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<String> {
        CookieJar::from_headers(&self.headers)
            .get(name)
            .map(|c| c.value().to_string())
    }
}
