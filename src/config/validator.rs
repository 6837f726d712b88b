//! Model config validation: unique names and tables, primary keys declared as properties.

use crate::case::table_name;
use crate::config::{ModelConfig, OneOrMany};
use crate::error::ConfigError;
use crate::model::capability;
use std::collections::HashSet;

pub fn validate(configs: &[ModelConfig]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    let mut tables = HashSet::new();
    for model in configs {
        if model.name.trim().is_empty() {
            return Err(ConfigError::Validation("model name must not be empty".into()));
        }
        if !names.insert(model.name.as_str()) {
            return Err(ConfigError::DuplicateModel(model.name.clone()));
        }
        let table = model.table.clone().unwrap_or_else(|| table_name(&model.name));
        if !tables.insert(table.clone()) {
            return Err(ConfigError::DuplicateTable(table));
        }

        let pk = model
            .primary_key
            .as_ref()
            .map(OneOrMany::to_vec)
            .unwrap_or_else(|| vec!["id".to_string()]);
        for key in &pk {
            if !model.properties.contains_key(key) {
                return Err(ConfigError::InvalidPrimaryKey {
                    model: model.name.clone(),
                    column: key.clone(),
                });
            }
        }
        for required in &model.required {
            if !model.properties.contains_key(required) && !model.relations.contains_key(required) {
                return Err(ConfigError::MissingReference {
                    kind: "required property",
                    id: format!("{}.{}", model.name, required),
                });
            }
        }
        for cap in &model.capabilities {
            if capability::built_in(cap).is_none() {
                return Err(ConfigError::UnknownCapability(cap.clone()));
            }
        }
        for (name, rel) in &model.relations {
            if model.properties.contains_key(name) {
                return Err(ConfigError::Validation(format!(
                    "{}.{} is declared both as property and relation",
                    model.name, name
                )));
            }
            if !configs.iter().any(|m| m.name == rel.model_class) {
                return Err(ConfigError::MissingReference {
                    kind: "model",
                    id: rel.model_class.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn models(value: serde_json::Value) -> Vec<ModelConfig> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn accepts_valid_models() {
        let configs = models(json!([
            { "name": "User", "properties": { "id": { "type": "integer" } },
              "relations": { "posts": { "relation": "hasMany", "modelClass": "Post",
                                        "join": { "from": "User.id", "to": "Post.authorId" } } } },
            { "name": "Post", "properties": { "id": { "type": "integer" }, "authorId": { "type": "integer" } } }
        ]));
        assert!(validate(&configs).is_ok());
    }

    #[test]
    fn rejects_duplicates_and_missing_keys() {
        let dup = models(json!([{ "name": "User", "properties": { "id": {} } }, { "name": "User", "properties": { "id": {} } }]));
        assert!(matches!(validate(&dup), Err(ConfigError::DuplicateModel(_))));

        let same_table = models(json!([
            { "name": "User", "properties": { "id": {} } },
            { "name": "Account", "table": "user", "properties": { "id": {} } }
        ]));
        assert!(matches!(validate(&same_table), Err(ConfigError::DuplicateTable(_))));

        let no_pk = models(json!([{ "name": "User", "properties": { "name": {} } }]));
        assert!(matches!(validate(&no_pk), Err(ConfigError::InvalidPrimaryKey { .. })));

        let bad_cap = models(json!([{ "name": "User", "properties": { "id": {} }, "capabilities": ["audit"] }]));
        assert!(matches!(validate(&bad_cap), Err(ConfigError::UnknownCapability(_))));
    }
}
