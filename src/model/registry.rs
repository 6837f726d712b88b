//! All compiled models of an application, their validator and lifecycle hooks.

use crate::config::{self, ModelConfig};
use crate::error::{AppError, ConfigError, ValidationError};
use crate::events::EventDispatcher;
use crate::model::capability;
use crate::model::{HookEvent, ModelDefinition, ModelHook};
use crate::relation::{RelationDefinition, RelationGraph, RelationResolver};
use crate::schema::{CompiledSchema, KeywordSet, ModelLookup, Validator};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// Per-model data derived on first use and kept until [`ModelRegistry::clear_cache`].
#[derive(Debug)]
pub struct ModelMetadata {
    /// (property, column) pairs.
    pub columns: Vec<(String, String)>,
    /// Schema with silent keywords removed, for `GET /schemas`.
    pub documentation: Value,
}

#[derive(Default)]
struct MetadataCache {
    entries: RwLock<HashMap<String, Arc<ModelMetadata>>>,
}

pub struct ModelRegistry {
    models: BTreeMap<String, ModelDefinition>,
    validator: Validator,
    patch_schemas: BTreeMap<String, CompiledSchema>,
    hooks: EventDispatcher<Arc<dyn ModelHook>>,
    cache: MetadataCache,
}

impl ModelRegistry {
    /// Validate configs, apply capabilities, resolve relations and compile every model schema.
    pub fn compile(configs: &[ModelConfig], keywords: KeywordSet) -> Result<Self, ConfigError> {
        config::validate(configs)?;

        let mut definitions = Vec::with_capacity(configs.len());
        for model_config in configs {
            let mut def = ModelDefinition::from_config(model_config);
            for name in &model_config.capabilities {
                let cap = capability::built_in(name).ok_or_else(|| ConfigError::UnknownCapability(name.clone()))?;
                def = def.with_capability(&cap);
            }
            definitions.push(def);
        }

        let catalog: HashMap<String, String> = definitions
            .iter()
            .map(|d| (d.name.clone(), d.table.clone()))
            .collect();

        let mut models = BTreeMap::new();
        for (model_config, mut def) in configs.iter().zip(definitions) {
            def.relations = RelationResolver::resolve(&def.name, &model_config.relations, &catalog)?;
            models.insert(def.name.clone(), def);
        }

        let mut validator = Validator::with_models(keywords, Arc::new(models.clone()));
        for (name, def) in &models {
            validator.add_schema(name, def.schema());
        }
        validator.compile_registered()?;

        let mut patch_schemas = BTreeMap::new();
        for (name, def) in &models {
            patch_schemas.insert(name.clone(), validator.compile(&def.patch_schema())?);
        }

        tracing::info!(models = models.len(), "model registry compiled");
        Ok(ModelRegistry {
            models,
            validator,
            patch_schemas,
            hooks: EventDispatcher::new(),
            cache: MetadataCache::default(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&ModelDefinition> {
        self.models.get(name)
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelDefinition> {
        self.models.values()
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Validate `data` against the model schema, or its patch schema when `partial`.
    pub fn validate_model(&self, name: &str, data: &Value, partial: bool) -> Result<(), AppError> {
        let result = if partial {
            let schema = self
                .patch_schemas
                .get(name)
                .ok_or_else(|| AppError::Internal(format!("unknown model {}", name)))?;
            self.validator.validate(schema, data)
        } else {
            self.validator.validate_id(name, data)
        };
        result.map_err(|errors| AppError::Validation(ValidationError::from_errors(format!("Invalid {}", name), errors)))
    }

    pub fn on_hook(&self, model: &str, event: HookEvent, hook: Arc<dyn ModelHook>) {
        self.hooks.on(&event.key(model), hook);
    }

    /// Await every hook registered for `event` on `model`, in registration order.
    pub async fn emit_hook(&self, event: HookEvent, model: &str, data: &mut Value) -> Result<(), AppError> {
        for hook in self.hooks.listeners(&event.key(model)) {
            hook.call(event, model, data).await?;
        }
        Ok(())
    }

    pub fn metadata(&self, name: &str) -> Option<Arc<ModelMetadata>> {
        if let Some(hit) = self.cache.entries.read().ok().and_then(|c| c.get(name).cloned()) {
            return Some(hit);
        }
        let def = self.models.get(name)?;
        let meta = Arc::new(ModelMetadata {
            columns: def.columns(),
            documentation: self.validator.documentation_schema(&def.schema()),
        });
        if let Ok(mut cache) = self.cache.entries.write() {
            cache.insert(name.to_string(), meta.clone());
        }
        Some(meta)
    }

    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.entries.write() {
            cache.clear();
        }
    }

    /// Documentation schema of every model, keyed by model name.
    pub fn documentation_schemas(&self) -> Map<String, Value> {
        self.models
            .keys()
            .filter_map(|name| self.metadata(name).map(|m| (name.clone(), m.documentation.clone())))
            .collect()
    }
}

/// Model predicates over a snapshot of the definitions, shared with the validator.
impl ModelLookup for BTreeMap<String, ModelDefinition> {
    fn is_model(&self, name: &str) -> bool {
        self.contains_key(name)
    }

    fn is_instance(&self, model: &str, value: &Value) -> bool {
        self.get(model).is_some_and(|m| m.is_instance(value))
    }

    fn is_reference(&self, model: &str, value: &Value) -> bool {
        self.get(model).is_some_and(|m| m.is_reference(value))
    }
}

impl ModelLookup for ModelRegistry {
    fn is_model(&self, name: &str) -> bool {
        self.models.is_model(name)
    }

    fn is_instance(&self, model: &str, value: &Value) -> bool {
        self.models.is_instance(model, value)
    }

    fn is_reference(&self, model: &str, value: &Value) -> bool {
        self.models.is_reference(model, value)
    }
}

impl RelationGraph for ModelRegistry {
    fn relation(&self, model: &str, name: &str) -> Option<&RelationDefinition> {
        self.models.get(model)?.relations.get(name)
    }

    fn has_scope(&self, model: &str, scope: &str) -> bool {
        self.models.get(model).is_some_and(|m| m.has_scope(scope))
    }
}
