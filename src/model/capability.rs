//! Capability modules stacked onto a base model (properties and scopes).

use crate::config::{OneOrMany, ScopeConfig};
use crate::model::ModelDefinition;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
pub struct Capability {
    pub name: String,
    pub properties: Map<String, Value>,
    pub scopes: BTreeMap<String, ScopeConfig>,
}

/// `createdAt` / `updatedAt` maintained by the store, plus a `latest` scope.
pub fn timestamps() -> Capability {
    let mut properties = Map::new();
    for name in ["createdAt", "updatedAt"] {
        properties.insert(name.to_string(), json!({ "type": "string", "format": "date-time" }));
    }
    let mut scopes = BTreeMap::new();
    scopes.insert(
        "latest".to_string(),
        ScopeConfig {
            order_by: Some(OneOrMany::One("createdAt".into())),
            desc: true,
            ..Default::default()
        },
    );
    Capability {
        name: "timestamps".into(),
        properties,
        scopes,
    }
}

/// Built-in capability by name.
pub fn built_in(name: &str) -> Option<Capability> {
    match name {
        "timestamps" => Some(timestamps()),
        _ => None,
    }
}

impl ModelDefinition {
    /// Returns the definition augmented with `capability`. Applying the same
    /// capability twice is a no-op; model-declared properties and scopes win.
    pub fn with_capability(mut self, capability: &Capability) -> Self {
        if self.has_capability(&capability.name) {
            return self;
        }
        for (name, schema) in &capability.properties {
            self.properties
                .entry(name.clone())
                .or_insert_with(|| schema.clone());
        }
        for (name, scope) in &capability.scopes {
            self.scopes.entry(name.clone()).or_insert_with(|| scope.clone());
        }
        self.capabilities.push(capability.name.clone());
        self
    }
}
