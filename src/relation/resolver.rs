//! Compiles declarative relation schemas into fully qualified join specifications.

use crate::case::column_name;
use crate::config::{OneOrMany, RelationConfig};
use crate::error::RelationError;
use crate::relation::RelationKind;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Lookup of model name -> table name, available while models are being compiled.
pub trait ModelCatalog {
    fn table_name(&self, model: &str) -> Option<&str>;
}

impl ModelCatalog for HashMap<String, String> {
    fn table_name(&self, model: &str) -> Option<&str> {
        self.get(model).map(String::as_str)
    }
}

/// Effective query modifier of a relation: a named scope or an inline equality filter.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Modify {
    Scope(String),
    Filter(Map<String, Value>),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ThroughSpec {
    pub model: Option<String>,
    pub table: String,
    /// Through-table columns matching the owner's `from` columns.
    pub from: Vec<String>,
    /// Through-table columns matching the related model's `to` columns.
    pub to: Vec<String>,
}

/// Join columns, always `table.column`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JoinSpec {
    pub from: Vec<String>,
    pub to: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub through: Option<ThroughSpec>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationDefinition {
    pub name: String,
    pub kind: RelationKind,
    pub owner: String,
    pub related: String,
    pub join: JoinSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modify: Option<Modify>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

/// Split a qualified `table.column` into its parts. Schema-qualified tables keep their dots.
pub fn split_column(qualified: &str) -> (&str, &str) {
    qualified.rsplit_once('.').unwrap_or(("", qualified))
}

pub struct RelationResolver;

impl RelationResolver {
    /// Compile every relation of `owner`. Errors here are fatal to startup.
    pub fn resolve(
        owner: &str,
        relations: &BTreeMap<String, RelationConfig>,
        catalog: &dyn ModelCatalog,
    ) -> Result<BTreeMap<String, RelationDefinition>, RelationError> {
        let mut out = BTreeMap::new();
        for (name, config) in relations {
            let def = Self::resolve_one(owner, name, config, catalog)?;
            tracing::debug!(owner = %owner, relation = %name, kind = %def.kind, "compiled relation");
            out.insert(name.clone(), def);
        }
        Ok(out)
    }

    fn resolve_one(
        owner: &str,
        name: &str,
        config: &RelationConfig,
        catalog: &dyn ModelCatalog,
    ) -> Result<RelationDefinition, RelationError> {
        let kind: RelationKind = config.relation.parse()?;
        if catalog.table_name(&config.model_class).is_none() {
            return Err(RelationError::UnknownModel(config.model_class.clone()));
        }
        let from = qualify_all(&config.join.from, catalog)?;
        let to = qualify_all(&config.join.to, catalog)?;
        if from.len() != to.len() {
            return Err(RelationError::InvalidReference(format!(
                "relation '{}' joins {} column(s) to {}",
                name,
                from.len(),
                to.len()
            )));
        }

        let through = match (&config.join.through, kind) {
            (Some(through), RelationKind::ManyToMany) => {
                let through_from = qualify_all(&through.from, catalog)?;
                let through_to = qualify_all(&through.to, catalog)?;
                if through_from.len() != from.len() || through_to.len() != to.len() {
                    return Err(RelationError::InvalidReference(format!(
                        "through join of relation '{}' does not match its from/to columns",
                        name
                    )));
                }
                let table = match &through.model_class {
                    Some(model) => catalog
                        .table_name(model)
                        .ok_or_else(|| RelationError::UnknownModel(model.clone()))?
                        .to_string(),
                    None => split_column(&through_from[0]).0.to_string(),
                };
                Some(ThroughSpec {
                    model: through.model_class.clone(),
                    table,
                    from: through_from,
                    to: through_to,
                })
            }
            (None, RelationKind::ManyToMany) => {
                return Err(RelationError::MissingThrough(name.to_string()));
            }
            (Some(_), other) => {
                return Err(RelationError::UnsupportedThrough {
                    kind: other.to_string(),
                    name: name.to_string(),
                });
            }
            (None, _) => None,
        };

        Ok(RelationDefinition {
            name: name.to_string(),
            kind,
            owner: owner.to_string(),
            related: config.model_class.clone(),
            join: JoinSpec { from, to, through },
            modify: effective_modify(config),
            options: config.extra.clone(),
        })
    }
}

fn qualify_all(refs: &OneOrMany, catalog: &dyn ModelCatalog) -> Result<Vec<String>, RelationError> {
    let refs = refs.to_vec();
    if refs.is_empty() {
        return Err(RelationError::InvalidReference("empty join column list".into()));
    }
    refs.iter().map(|r| qualify(r, catalog)).collect()
}

/// `Model.property` -> `table.column`. Raw `table.column` and `schema.table.column`
/// references pass through; a capitalized prefix must name a model.
fn qualify(reference: &str, catalog: &dyn ModelCatalog) -> Result<String, RelationError> {
    let Some((prefix, property)) = reference.split_once('.') else {
        return Err(RelationError::InvalidReference(reference.to_string()));
    };
    if prefix.is_empty() || property.is_empty() {
        return Err(RelationError::InvalidReference(reference.to_string()));
    }
    match catalog.table_name(prefix) {
        Some(table) if !property.contains('.') => Ok(format!("{}.{}", table, column_name(property))),
        Some(_) => Err(RelationError::InvalidReference(reference.to_string())),
        None if prefix.starts_with(|c: char| c.is_ascii_uppercase()) => {
            Err(RelationError::UnknownModel(prefix.to_string()))
        }
        None => Ok(reference.to_string()),
    }
}

/// `scope` wins over `modify`, which wins over `filter`.
fn effective_modify(config: &RelationConfig) -> Option<Modify> {
    [&config.scope, &config.modify, &config.filter]
        .into_iter()
        .flatten()
        .find_map(|value| match value {
            Value::String(s) if !s.is_empty() => Some(Modify::Scope(s.clone())),
            Value::Object(m) if !m.is_empty() => Some(Modify::Filter(m.clone())),
            _ => None,
        })
}
