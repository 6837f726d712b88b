//! Raw model config types matching the declarative JSON format.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A single name or a list of names (`"id"` or `["tenantId", "id"]`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s.clone()],
            OneOrMany::Many(v) => v.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThroughConfig {
    /// Explicit through model; when absent the through table is taken from the `from` references.
    #[serde(default)]
    pub model_class: Option<String>,
    pub from: OneOrMany,
    pub to: OneOrMany,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinConfig {
    pub from: OneOrMany,
    pub to: OneOrMany,
    #[serde(default)]
    pub through: Option<ThroughConfig>,
}

/// `{ relation, modelClass, join: { from, to, through? }, scope|modify|filter, ...extra }`
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationConfig {
    pub relation: String,
    pub model_class: String,
    pub join: JoinConfig,
    #[serde(default)]
    pub scope: Option<Value>,
    #[serde(default)]
    pub modify: Option<Value>,
    #[serde(default)]
    pub filter: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Named scope: equality filters plus optional ordering and limit.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeConfig {
    #[serde(default, rename = "where")]
    pub where_: Map<String, Value>,
    #[serde(default)]
    pub order_by: Option<OneOrMany>,
    #[serde(default)]
    pub desc: bool,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub name: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub primary_key: Option<OneOrMany>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub relations: BTreeMap<String, RelationConfig>,
    #[serde(default)]
    pub scopes: BTreeMap<String, ScopeConfig>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn relation_keeps_extra_fields() {
        let rel: RelationConfig = serde_json::from_value(json!({
            "relation": "hasMany",
            "modelClass": "Post",
            "join": { "from": "User.id", "to": "Post.authorId" },
            "scope": "published",
            "nullable": true
        }))
        .unwrap();
        assert_eq!(rel.join.from, OneOrMany::One("User.id".into()));
        assert_eq!(rel.scope, Some(json!("published")));
        assert_eq!(rel.extra.get("nullable"), Some(&json!(true)));
        assert!(rel.join.through.is_none());
    }

    #[test]
    fn model_defaults() {
        let model: ModelConfig = serde_json::from_value(json!({ "name": "Tag" })).unwrap();
        assert!(model.table.is_none());
        assert!(model.properties.is_empty());
        assert!(model.relations.is_empty());
    }
}
