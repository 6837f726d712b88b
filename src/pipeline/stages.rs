//! Ordered middleware stages and the action endpoint.

use crate::error::{AppError, ValidationError};
use crate::events::EventDispatcher;
use crate::model::ModelRegistry;
use crate::pipeline::{coerce_params, ActionMetadata, ActiveTransaction, RequestContext, RouteMatch, RouteTable, TransactionSource};
use crate::relation::{EagerScopeResolver, RelationExpression};
use crate::response::Reply;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

/// One middleware stage. Calls `next.run(ctx)` to continue the chain.
#[async_trait]
pub trait Stage: Send + Sync {
    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> Result<Reply, AppError>;
}

/// Innermost step of the chain.
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn call(&self, ctx: &mut RequestContext) -> Result<Reply, AppError>;
}

/// Remainder of the chain after the current stage.
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub fn new(stages: &'a [Arc<dyn Stage>], endpoint: &'a dyn Endpoint) -> Self {
        Next { stages, endpoint }
    }

    pub async fn run(self, ctx: &mut RequestContext) -> Result<Reply, AppError> {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.handle(ctx, Next::new(rest, self.endpoint)).await,
            None => self.endpoint.call(ctx).await,
        }
    }
}

pub type ErrorListener = Arc<dyn Fn(&AppError, &RequestContext) + Send + Sync>;

/// Outermost stage: every error becomes a formatted reply and is emitted on the `error` event.
pub struct ErrorFormatting {
    events: Arc<EventDispatcher<ErrorListener>>,
}

impl ErrorFormatting {
    pub fn new(events: Arc<EventDispatcher<ErrorListener>>) -> Self {
        ErrorFormatting { events }
    }
}

#[async_trait]
impl Stage for ErrorFormatting {
    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> Result<Reply, AppError> {
        match next.run(ctx).await {
            Ok(reply) => Ok(reply),
            Err(err) => {
                if err.is_structured() {
                    tracing::debug!(request = %ctx.id, status = %err.status(), error = %err, "request failed");
                } else {
                    tracing::error!(request = %ctx.id, error = ?err, "request failed");
                }
                for listener in self.events.listeners("error") {
                    listener(&err, ctx);
                }
                Ok(Reply::from_error(&err))
            }
        }
    }
}

pub struct RouteResolution {
    routes: Arc<RouteTable>,
}

impl RouteResolution {
    pub fn new(routes: Arc<RouteTable>) -> Self {
        RouteResolution { routes }
    }
}

#[async_trait]
impl Stage for RouteResolution {
    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> Result<Reply, AppError> {
        match self.routes.find(&ctx.method, &ctx.path) {
            RouteMatch::Found { route, params } => {
                tracing::debug!(request = %ctx.id, route = %route.pattern(), "route matched");
                ctx.route = Some(route);
                ctx.params = params;
                next.run(ctx).await
            }
            RouteMatch::NotFound => Err(AppError::NotFound(ctx.path.clone())),
            RouteMatch::MethodNotAllowed { allowed } => Err(AppError::MethodNotAllowed { allowed }),
        }
    }
}

/// Binds the model registry and pool to the request; models bind to its transaction on first use.
pub struct ModelBinding {
    registry: Arc<ModelRegistry>,
    pool: Option<PgPool>,
}

impl ModelBinding {
    pub fn new(registry: Arc<ModelRegistry>, pool: Option<PgPool>) -> Self {
        ModelBinding { registry, pool }
    }
}

#[async_trait]
impl Stage for ModelBinding {
    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> Result<Reply, AppError> {
        ctx.bind_models(self.registry.clone(), self.pool.clone());
        next.run(ctx).await
    }
}

/// Runs the rest of the chain inside a transaction when the route is transacted.
/// A timeout fails the chain and takes the rollback path.
pub struct TransactionScope {
    source: Arc<dyn TransactionSource>,
    default_timeout_ms: Option<u64>,
}

impl TransactionScope {
    pub fn new(source: Arc<dyn TransactionSource>, default_timeout_ms: Option<u64>) -> Self {
        TransactionScope {
            source,
            default_timeout_ms,
        }
    }
}

async fn run_with_timeout(ctx: &mut RequestContext, next: Next<'_>, timeout_ms: Option<u64>) -> Result<Reply, AppError> {
    match timeout_ms {
        Some(ms) => tokio::time::timeout(Duration::from_millis(ms), next.run(ctx))
            .await
            .unwrap_or(Err(AppError::Timeout(ms))),
        None => next.run(ctx).await,
    }
}

#[async_trait]
impl Stage for TransactionScope {
    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> Result<Reply, AppError> {
        let Some(route) = ctx.route.clone() else {
            return next.run(ctx).await;
        };
        let timeout_ms = route.metadata.timeout_ms.or(self.default_timeout_ms);
        if !route.metadata.transacted {
            return run_with_timeout(ctx, next, timeout_ms).await;
        }

        let handle = self.source.begin().await?;
        ctx.transaction.start(ActiveTransaction::new(handle)).await?;
        let result = run_with_timeout(ctx, next, timeout_ms).await;
        ctx.transaction.finish(result).await
    }
}

/// Endpoint: authorization, eager/scope binding, parameter validation, handler call,
/// return validation.
pub struct ActionInvoker;

impl ActionInvoker {
    fn parse_body(ctx: &mut RequestContext) -> Result<(), AppError> {
        if ctx.raw_body.is_empty() {
            ctx.body = Value::Null;
            return Ok(());
        }
        ctx.body = serde_json::from_slice(&ctx.raw_body)
            .map_err(|e| AppError::BadRequest(format!("invalid JSON body: {}", e)))?;
        Ok(())
    }

    /// Query values, then body fields when the body is an object, then path params.
    /// Path params are inserted last so a body or query field can never replace them.
    pub(crate) fn merged_params(ctx: &RequestContext) -> Value {
        let mut params = Map::new();
        for (k, v) in &ctx.query {
            params.insert(k.clone(), Value::String(v.clone()));
        }
        if let Value::Object(body) = &ctx.body {
            for (k, v) in body {
                params.insert(k.clone(), v.clone());
            }
        }
        for (k, v) in &ctx.params {
            params.insert(k.clone(), Value::String(v.clone()));
        }
        Value::Object(params)
    }

    /// Root scopes from the action and `?scope=`; `?eager=` parsed, checked against the
    /// model's scopes and the action's filters, and extended with `eager_scope`.
    fn bind_scopes(ctx: &mut RequestContext, model: Option<&str>, meta: &ActionMetadata) -> Result<(), AppError> {
        let (scope, eager_scope) = (&meta.scope, &meta.eager_scope);
        let mut scopes = scope.to_vec();
        if let Some(requested) = ctx.query.get("scope") {
            for name in requested.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                if !scopes.iter().any(|s| s == name) {
                    scopes.push(name.to_string());
                }
            }
        }
        ctx.scopes = scopes;

        let Some(raw) = ctx.query.get("eager").cloned() else {
            return Ok(());
        };
        let model = model.ok_or_else(|| AppError::BadRequest("eager loading needs a model route".into()))?;
        let registry = ctx
            .registry()
            .ok_or_else(|| AppError::Internal("models are not bound to this request".into()))?;
        let available_filters: Vec<String> = meta.filters.keys().cloned().collect();
        let requested = RelationExpression::parse(&Value::String(raw)).map_err(|e| AppError::BadRequest(e.to_string()))?;
        EagerScopeResolver::check_modifiers(registry, model, &requested, &available_filters)
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        let expression =
            EagerScopeResolver::apply_expression(registry, model, requested, eager_scope, &available_filters, true)
                .map_err(|e| AppError::BadRequest(e.to_string()))?;
        ctx.eager = Some(expression);
        Ok(())
    }
}

#[async_trait]
impl Endpoint for ActionInvoker {
    async fn call(&self, ctx: &mut RequestContext) -> Result<Reply, AppError> {
        let route = ctx
            .route
            .clone()
            .ok_or_else(|| AppError::Internal("no route resolved".into()))?;
        let meta = &route.metadata;

        if let Some(authorize) = &meta.authorize {
            if !authorize(ctx) {
                return Err(AppError::Forbidden(format!("{} {}", meta.verb, meta.path)));
            }
        }

        Self::parse_body(ctx)?;
        Self::bind_scopes(ctx, route.model.as_deref(), meta)?;

        let mut params = Self::merged_params(ctx);
        if let Some(schema) = &route.parameters {
            coerce_params(schema.as_value(), &mut params);
            let registry = ctx
                .registry()
                .ok_or_else(|| AppError::Internal("models are not bound to this request".into()))?;
            registry
                .validator()
                .validate(schema, &params)
                .map_err(|errors| AppError::Validation(ValidationError::from_errors("Invalid parameters", errors)))?;
        }

        let output = route.handler.call(ctx, params).await?;

        if let Some(schema) = &route.returns {
            let registry = ctx
                .registry()
                .ok_or_else(|| AppError::Internal("models are not bound to this request".into()))?;
            registry
                .validator()
                .validate(schema, &output)
                .map_err(|errors| AppError::InvalidResponse(ValidationError::from_errors("Invalid response", errors)))?;
        }

        Ok(Reply::envelope(meta.status, output))
    }
}
