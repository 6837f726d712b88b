//! Model operations bound to one request's transaction slot.

use crate::config::ScopeConfig;
use crate::error::AppError;
use crate::model::{HookEvent, ModelDefinition, ModelRegistry};
use crate::pipeline::TransactionSlot;
use crate::relation::RelationExpression;
use crate::service::CrudService;
use crate::sql::{self, SelectQuery};
use serde_json::{Map, Value};
use sqlx::PgPool;
use std::collections::BTreeMap;

/// A model bound to a request. Every query runs on the request's transaction when one
/// is open, including queries for related models reached through [`BoundModel::related`].
pub struct BoundModel<'a> {
    registry: &'a ModelRegistry,
    model: &'a ModelDefinition,
    pool: Option<&'a PgPool>,
    tx: &'a TransactionSlot,
}

impl<'a> BoundModel<'a> {
    pub fn new(
        registry: &'a ModelRegistry,
        name: &str,
        pool: Option<&'a PgPool>,
        tx: &'a TransactionSlot,
    ) -> Result<Self, AppError> {
        let model = registry
            .get(name)
            .ok_or_else(|| AppError::NotFound(format!("model {}", name)))?;
        Ok(BoundModel { registry, model, pool, tx })
    }

    pub fn definition(&self) -> &ModelDefinition {
        self.model
    }

    /// The related model of `relation`, bound to the same request.
    pub fn related(&self, relation: &str) -> Result<BoundModel<'a>, AppError> {
        let def = self
            .model
            .relations
            .get(relation)
            .ok_or_else(|| AppError::BadRequest(format!("{} has no relation '{}'", self.model.name, relation)))?;
        BoundModel::new(self.registry, &def.related, self.pool, self.tx)
    }

    pub async fn find(&self, query: &SelectQuery<'_>) -> Result<Vec<Value>, AppError> {
        let q = sql::select(self.registry, self.model, query)?;
        CrudService::fetch_all(self.tx, self.pool, &q).await
    }

    pub async fn find_by_id(
        &self,
        id: &[Value],
        eager: Option<&RelationExpression>,
        eager_filters: Option<&BTreeMap<String, ScopeConfig>>,
    ) -> Result<Option<Value>, AppError> {
        let q = sql::select_by_id(self.registry, self.model, id, eager, eager_filters)?;
        CrudService::fetch_optional(self.tx, self.pool, &q).await
    }

    pub async fn insert(&self, data: Value) -> Result<Value, AppError> {
        let name = self.model.name.as_str();
        let mut data = data;
        self.registry.validate_model(name, &data, false)?;
        self.registry.emit_hook(HookEvent::BeforeInsert, name, &mut data).await?;
        let q = sql::insert(self.model, as_object(&data)?);
        let mut row = CrudService::fetch_optional(self.tx, self.pool, &q)
            .await?
            .ok_or(AppError::Db(sqlx::Error::RowNotFound))?;
        self.registry.emit_hook(HookEvent::AfterInsert, name, &mut row).await?;
        Ok(row)
    }

    pub async fn patch(&self, id: &[Value], data: Value) -> Result<Value, AppError> {
        let name = self.model.name.as_str();
        let mut data = data;
        self.registry.validate_model(name, &data, true)?;
        self.registry.emit_hook(HookEvent::BeforePatch, name, &mut data).await?;
        let q = sql::update(self.model, id, as_object(&data)?)?;
        let mut row = CrudService::fetch_optional(self.tx, self.pool, &q)
            .await?
            .ok_or_else(|| self.not_found(id))?;
        self.registry.emit_hook(HookEvent::AfterPatch, name, &mut row).await?;
        Ok(row)
    }

    pub async fn delete(&self, id: &[Value]) -> Result<Value, AppError> {
        let name = self.model.name.as_str();
        let mut key: Value = self
            .model
            .primary_key
            .iter()
            .cloned()
            .zip(id.iter().cloned())
            .collect::<Map<String, Value>>()
            .into();
        self.registry.emit_hook(HookEvent::BeforeDelete, name, &mut key).await?;
        let q = sql::delete(self.model, id)?;
        let mut row = CrudService::fetch_optional(self.tx, self.pool, &q)
            .await?
            .ok_or_else(|| self.not_found(id))?;
        self.registry.emit_hook(HookEvent::AfterDelete, name, &mut row).await?;
        Ok(row)
    }

    fn not_found(&self, id: &[Value]) -> AppError {
        let id = id.iter().map(Value::to_string).collect::<Vec<_>>().join(",");
        AppError::NotFound(format!("{} {}", self.model.name, id))
    }
}

fn as_object(data: &Value) -> Result<&Map<String, Value>, AppError> {
    data.as_object()
        .ok_or_else(|| AppError::BadRequest("body must be a JSON object".into()))
}
