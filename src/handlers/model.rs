//! Standard model actions: list, create, read, patch, delete.

use crate::error::AppError;
use crate::model::ModelDefinition;
use crate::pipeline::{Action, ActionMetadata, Handler, RequestContext};
use crate::sql::SelectQuery;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

const DEFAULT_LIMIT: u32 = 100;

/// Primary key values from the `:id` path segment; composite keys are comma separated.
fn parse_id(model: &ModelDefinition, raw: &str) -> Result<Vec<Value>, AppError> {
    let parts: Vec<&str> = if model.primary_key.len() > 1 {
        raw.split(',').collect()
    } else {
        vec![raw]
    };
    if parts.len() != model.primary_key.len() {
        return Err(AppError::BadRequest("invalid id".into()));
    }
    model
        .primary_key
        .iter()
        .zip(parts)
        .map(|(key, part)| {
            let schema = model.properties.get(key).cloned().unwrap_or(Value::Null);
            if schema.get("format").and_then(Value::as_str) == Some("uuid") {
                let u = uuid::Uuid::parse_str(part).map_err(|_| AppError::BadRequest("invalid uuid".into()))?;
                return Ok(Value::String(u.to_string()));
            }
            match schema.get("type").and_then(Value::as_str) {
                Some("integer") => part
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| AppError::BadRequest("invalid id".into())),
                _ => Ok(Value::String(part.to_string())),
            }
        })
        .collect()
}

/// Query-string value converted to the property's declared scalar type.
fn query_value_for_property(model: &ModelDefinition, property: &str, s: &str) -> Value {
    let ty = model
        .properties
        .get(property)
        .and_then(|p| p.get("type"))
        .and_then(Value::as_str);
    match ty {
        Some("integer") => s.parse::<i64>().map(Value::from).unwrap_or_else(|_| Value::String(s.into())),
        Some("number") => s.parse::<f64>().map(Value::from).unwrap_or_else(|_| Value::String(s.into())),
        Some("boolean") if s.eq_ignore_ascii_case("true") => Value::Bool(true),
        Some("boolean") if s.eq_ignore_ascii_case("false") => Value::Bool(false),
        _ if s == "null" => Value::Null,
        _ => Value::String(s.to_string()),
    }
}

/// The `:id` path segment; read from the route match, never from merged parameters.
fn id_param(ctx: &RequestContext) -> Result<String, AppError> {
    ctx.params
        .get("id")
        .cloned()
        .ok_or_else(|| AppError::BadRequest("missing id".into()))
}

struct List {
    model: String,
}

#[async_trait]
impl Handler for List {
    async fn call(&self, ctx: &mut RequestContext, _params: Value) -> Result<Value, AppError> {
        let bound = ctx.model(&self.model)?;
        let def = bound.definition();
        let mut limit = None;
        let mut offset = None;
        let mut filters = Vec::new();
        for (k, v) in &ctx.query {
            match k.as_str() {
                "limit" => limit = v.parse().ok(),
                "offset" => offset = v.parse().ok(),
                "eager" | "scope" => {}
                _ if def.properties.contains_key(k) => {
                    filters.push((k.clone(), query_value_for_property(def, k, v)));
                }
                _ => {}
            }
        }
        let rows = bound
            .find(&SelectQuery {
                filters: &filters,
                scopes: &ctx.scopes,
                eager: ctx.eager.as_ref(),
                eager_filters: ctx.eager_filters(),
                limit: Some(limit.unwrap_or(DEFAULT_LIMIT)),
                offset,
            })
            .await?;
        Ok(Value::Array(rows))
    }
}

struct Read {
    model: String,
}

#[async_trait]
impl Handler for Read {
    async fn call(&self, ctx: &mut RequestContext, _params: Value) -> Result<Value, AppError> {
        let raw = id_param(ctx)?;
        let bound = ctx.model(&self.model)?;
        let id = parse_id(bound.definition(), &raw)?;
        bound
            .find_by_id(&id, ctx.eager.as_ref(), ctx.eager_filters())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {}", self.model, raw)))
    }
}

struct Create {
    model: String,
}

#[async_trait]
impl Handler for Create {
    async fn call(&self, ctx: &mut RequestContext, _params: Value) -> Result<Value, AppError> {
        let body = ctx.body.clone();
        ctx.model(&self.model)?.insert(body).await
    }
}

struct Patch {
    model: String,
}

#[async_trait]
impl Handler for Patch {
    async fn call(&self, ctx: &mut RequestContext, _params: Value) -> Result<Value, AppError> {
        let raw = id_param(ctx)?;
        let body = ctx.body.clone();
        let bound = ctx.model(&self.model)?;
        let id = parse_id(bound.definition(), &raw)?;
        bound.patch(&id, body).await
    }
}

struct Delete {
    model: String,
}

#[async_trait]
impl Handler for Delete {
    async fn call(&self, ctx: &mut RequestContext, _params: Value) -> Result<Value, AppError> {
        let raw = id_param(ctx)?;
        let bound = ctx.model(&self.model)?;
        let id = parse_id(bound.definition(), &raw)?;
        bound.delete(&id).await?;
        Ok(Value::Null)
    }
}

pub struct ModelController;

impl ModelController {
    /// `GET|POST /{path}` and `GET|PATCH|DELETE /{path}/:id`; writes are transacted.
    pub fn routes(model: &ModelDefinition) -> Vec<Action> {
        let base = format!("/{}", model.path_segment());
        let item = format!("{}/:id", base);
        let name = model.name.clone();
        vec![
            Action::new(ActionMetadata::get(&base), Arc::new(List { model: name.clone() })),
            Action::new(
                ActionMetadata::post(&base).transacted(),
                Arc::new(Create { model: name.clone() }),
            ),
            Action::new(ActionMetadata::get(&item), Arc::new(Read { model: name.clone() })),
            Action::new(
                ActionMetadata::patch(&item).transacted(),
                Arc::new(Patch { model: name.clone() }),
            ),
            Action::new(
                ActionMetadata::delete(&item).transacted(),
                Arc::new(Delete { model: name.clone() }),
            ),
        ]
        .into_iter()
        .map(|action| action.for_model(name.clone()))
        .collect()
    }
}
