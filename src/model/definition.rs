//! Compiled, immutable model definition.

use crate::case::{column_name, table_name, to_snake_case};
use crate::config::{ModelConfig, OneOrMany, ScopeConfig};
use crate::relation::RelationDefinition;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
pub struct ModelDefinition {
    pub name: String,
    pub table: String,
    /// Primary key property names.
    pub primary_key: Vec<String>,
    pub properties: Map<String, Value>,
    pub required: Vec<String>,
    pub relations: BTreeMap<String, RelationDefinition>,
    pub scopes: BTreeMap<String, ScopeConfig>,
    /// Capability modules applied, in application order.
    pub capabilities: Vec<String>,
}

impl ModelDefinition {
    /// Definition without relations; relations are compiled once every model is known.
    pub fn from_config(config: &ModelConfig) -> Self {
        ModelDefinition {
            name: config.name.clone(),
            table: config.table.clone().unwrap_or_else(|| table_name(&config.name)),
            primary_key: config
                .primary_key
                .as_ref()
                .map(OneOrMany::to_vec)
                .unwrap_or_else(|| vec!["id".to_string()]),
            properties: config.properties.clone(),
            required: config.required.clone(),
            relations: BTreeMap::new(),
            scopes: config.scopes.clone(),
            capabilities: Vec::new(),
        }
    }

    /// URL path segment for generated routes.
    pub fn path_segment(&self) -> String {
        to_snake_case(&self.name)
    }

    pub fn column(&self, property: &str) -> String {
        column_name(property)
    }

    /// (property, column) pairs in property order.
    pub fn columns(&self) -> Vec<(String, String)> {
        self.properties
            .keys()
            .map(|p| (p.clone(), column_name(p)))
            .collect()
    }

    pub fn has_scope(&self, name: &str) -> bool {
        self.scopes.contains_key(name)
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c == name)
    }

    /// `{ id: 1 }`: exactly the primary key properties, none null.
    pub fn is_reference(&self, value: &Value) -> bool {
        let Some(obj) = value.as_object() else {
            return false;
        };
        obj.len() == self.primary_key.len()
            && self
                .primary_key
                .iter()
                .all(|k| obj.get(k).is_some_and(|v| !v.is_null()))
    }

    pub fn is_instance(&self, value: &Value) -> bool {
        value.as_object().is_some_and(|obj| {
            obj.keys()
                .all(|k| self.properties.contains_key(k) || self.relations.contains_key(k))
        })
    }

    /// Full JSON schema for this model, relations included as nested graphs or references.
    pub fn schema(&self) -> Value {
        self.schema_with_required(true)
    }

    /// Schema for partial updates: same shape, nothing required.
    pub fn patch_schema(&self) -> Value {
        self.schema_with_required(false)
    }

    fn schema_with_required(&self, required: bool) -> Value {
        let mut properties = self.properties.clone();
        for (name, relation) in &self.relations {
            let related = json!({
                "anyOf": [
                    { "relate": relation.related },
                    { "$ref": relation.related }
                ]
            });
            let schema = if relation.kind.is_to_many() {
                json!({ "type": "array", "items": related })
            } else {
                json!({ "anyOf": [{ "type": "null" }, related] })
            };
            properties.insert(name.clone(), schema);
        }
        let mut schema = json!({
            "type": "object",
            "properties": properties,
            "additionalProperties": false
        });
        if required && !self.required.is_empty() {
            schema["required"] = json!(self.required);
        }
        schema
    }
}
