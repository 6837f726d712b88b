//! Per-action configuration and the controller handler seam.

use crate::config::ScopeConfig;
use crate::error::AppError;
use crate::pipeline::RequestContext;
use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

pub type AuthorizeFn = Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>;

/// Controller logic for one route. `params` is the merged query, path and body object.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: &mut RequestContext, params: Value) -> Result<Value, AppError>;
}

/// Handler from an async closure that only needs the parameters.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, AppError>> + Send,
{
    async fn call(&self, _ctx: &mut RequestContext, params: Value) -> Result<Value, AppError> {
        (self.0)(params).await
    }
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, AppError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

#[derive(Clone)]
pub struct ActionMetadata {
    pub verb: Method,
    pub path: String,
    /// Scopes applied to the action's root query.
    pub scope: Vec<String>,
    /// Scopes injected into every node of a requested eager expression.
    pub eager_scope: Vec<String>,
    /// Named filters an eager expression may apply to any relation node, like `posts(recent)`.
    pub filters: BTreeMap<String, ScopeConfig>,
    pub transacted: bool,
    /// Schema the merged parameters must satisfy.
    pub parameters: Option<Value>,
    /// Schema the handler's return value must satisfy.
    pub returns: Option<Value>,
    pub authorize: Option<AuthorizeFn>,
    pub status: StatusCode,
    /// Overrides the application-wide request timeout.
    pub timeout_ms: Option<u64>,
}

impl std::fmt::Debug for ActionMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionMetadata")
            .field("verb", &self.verb)
            .field("path", &self.path)
            .field("transacted", &self.transacted)
            .finish_non_exhaustive()
    }
}

impl ActionMetadata {
    pub fn new(verb: Method, path: impl Into<String>) -> Self {
        ActionMetadata {
            verb,
            path: path.into(),
            scope: Vec::new(),
            eager_scope: Vec::new(),
            filters: BTreeMap::new(),
            transacted: false,
            parameters: None,
            returns: None,
            authorize: None,
            status: StatusCode::OK,
            timeout_ms: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path).status(StatusCode::CREATED)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn transacted(mut self) -> Self {
        self.transacted = true;
        self
    }

    pub fn scope<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn eager_scope<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.eager_scope = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, name: impl Into<String>, filter: ScopeConfig) -> Self {
        self.filters.insert(name.into(), filter);
        self
    }

    pub fn parameters(mut self, schema: Value) -> Self {
        self.parameters = Some(schema);
        self
    }

    pub fn returns(mut self, schema: Value) -> Self {
        self.returns = Some(schema);
        self
    }

    pub fn authorize<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestContext) -> bool + Send + Sync + 'static,
    {
        self.authorize = Some(Arc::new(f));
        self
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }
}

/// An action ready to be registered: metadata, optional owning model, handler.
#[derive(Clone)]
pub struct Action {
    pub metadata: ActionMetadata,
    pub model: Option<String>,
    pub handler: Arc<dyn Handler>,
}

impl Action {
    pub fn new(metadata: ActionMetadata, handler: Arc<dyn Handler>) -> Self {
        Action {
            metadata,
            model: None,
            handler,
        }
    }

    pub fn for_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Convert string values of `params` to the scalar types declared in `schema.properties`.
/// Query strings and path segments arrive as text.
pub fn coerce_params(schema: &Value, params: &mut Value) {
    let (Some(properties), Some(values)) = (
        schema.get("properties").and_then(Value::as_object),
        params.as_object_mut(),
    ) else {
        return;
    };
    for (name, value) in values.iter_mut() {
        let Some(text) = value.as_str() else { continue };
        let Some(prop) = properties.get(name) else { continue };
        let types: Vec<&str> = match prop.get("type") {
            Some(Value::String(t)) => vec![t.as_str()],
            Some(Value::Array(list)) => list.iter().filter_map(Value::as_str).collect(),
            _ => continue,
        };
        if types.contains(&"string") {
            continue;
        }
        let coerced = if types.contains(&"integer") {
            text.parse::<i64>().ok().map(Value::from)
        } else if types.contains(&"number") {
            text.parse::<f64>().ok().map(Value::from)
        } else if types.contains(&"boolean") {
            match text {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            }
        } else {
            None
        };
        if let Some(v) = coerced {
            *value = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_defaults() {
        let meta = ActionMetadata::post("/users").transacted().scope(["active"]).timeout_ms(50);
        assert_eq!(meta.verb, Method::POST);
        assert_eq!(meta.status, StatusCode::CREATED);
        assert!(meta.transacted);
        assert_eq!(meta.scope, vec!["active"]);
        assert_eq!(meta.timeout_ms, Some(50));
        assert!(!ActionMetadata::get("/users").transacted);

        let meta = ActionMetadata::get("/users").filter("recent", ScopeConfig::default());
        assert!(meta.filters.contains_key("recent"));
    }

    #[test]
    fn coerces_declared_scalars_only() {
        let schema = json!({ "properties": {
            "limit": { "type": "integer" },
            "ratio": { "type": "number" },
            "flag": { "type": "boolean" },
            "code": { "type": ["string", "integer"] }
        }});
        let mut params = json!({ "limit": "5", "ratio": "0.5", "flag": "true", "code": "7", "other": "1" });
        coerce_params(&schema, &mut params);
        assert_eq!(params, json!({ "limit": 5, "ratio": 0.5, "flag": true, "code": "7", "other": "1" }));
    }
}
