//! Schema compilation and validation on top of the `jsonschema` crate.
//!
//! Macro keywords (`$extend`, `range`) are expanded before a schema is built, and
//! registered ids in `$ref` are rewritten to `#/$defs/<id>` with the referenced schemas
//! embedded. Validate keywords are registered through `ValidationOptions::with_keyword`.
//! Contextual keywords (`reference`, `validate`) read the parent object or the root
//! document, which a `jsonschema` keyword never sees: their locations are collected
//! while compiling and checked against the data after the core pass.

use crate::error::{SchemaCompileError, SchemaError};
use crate::schema::{Keyword, KeywordContext, KeywordKind, KeywordSet, ModelLookup, NoModels};
use jsonschema::paths::{LazyLocation, Location};
use jsonschema::error::ValidationErrorKind;
use jsonschema::Draft;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

const MAX_DEPTH: usize = 64;
const DEFS: &str = "$defs";
const DEFS_PREFIX: &str = "#/$defs/";

/// Source schemas by id, used to resolve `$ref` and `$extend` sources.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Value>,
}

impl SchemaRegistry {
    pub fn insert(&mut self, id: &str, schema: Value) {
        self.schemas.insert(id.to_string(), schema);
    }

    pub fn get(&self, id: &str) -> Option<&Value> {
        self.schemas.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.schemas.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.schemas.keys()
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Step {
    Key(String),
    Each,
}

/// A contextual keyword and the instance location it applies to.
#[derive(Clone, Debug, PartialEq)]
struct Site {
    path: Vec<Step>,
    keyword: String,
    config: Value,
}

/// Schema with macros expanded, keyword configurations checked and a built core validator.
#[derive(Clone)]
pub struct CompiledSchema {
    schema: Value,
    sites: Vec<Site>,
    core: Arc<jsonschema::Validator>,
}

impl CompiledSchema {
    /// The expanded schema handed to `jsonschema`, referenced schemas included under `$defs`.
    pub fn as_value(&self) -> &Value {
        &self.schema
    }
}

impl PartialEq for CompiledSchema {
    fn eq(&self, other: &Self) -> bool {
        self.schema == other.schema && self.sites == other.sites
    }
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("schema", &self.schema)
            .field("sites", &self.sites)
            .finish_non_exhaustive()
    }
}

pub struct Validator {
    keywords: KeywordSet,
    models: Arc<dyn ModelLookup>,
    sources: SchemaRegistry,
    /// Registered schemas after macro expansion, embedded as `$defs` by referencing schemas.
    expanded: BTreeMap<String, Value>,
    compiled: BTreeMap<String, CompiledSchema>,
}

impl Validator {
    pub fn new(keywords: KeywordSet) -> Self {
        Self::with_models(keywords, Arc::new(NoModels))
    }

    /// Validator whose model-aware keywords (`instanceof`, `relate`) consult `models`.
    pub fn with_models(keywords: KeywordSet, models: Arc<dyn ModelLookup>) -> Self {
        Validator {
            keywords,
            models,
            sources: SchemaRegistry::default(),
            expanded: BTreeMap::new(),
            compiled: BTreeMap::new(),
        }
    }

    pub fn keywords(&self) -> &KeywordSet {
        &self.keywords
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.sources
    }

    /// Register a source schema under `id`. Call [`Validator::compile_registered`] afterwards.
    pub fn add_schema(&mut self, id: &str, schema: Value) {
        self.sources.insert(id, schema);
    }

    /// Compile every registered schema so `$ref` targets are ready for validation.
    pub fn compile_registered(&mut self) -> Result<(), SchemaCompileError> {
        let ids: Vec<String> = self.sources.ids().cloned().collect();
        let mut expanded = Vec::with_capacity(ids.len());
        for id in ids {
            let source = self.sources.get(&id).cloned().unwrap_or(Value::Bool(true));
            let mut sites = Vec::new();
            let value = self.compile_value(&source, 0, Some(&[]), &mut sites)?;
            expanded.push((id, value, sites));
        }
        self.expanded = expanded
            .iter()
            .map(|(id, value, _)| (id.clone(), value.clone()))
            .collect();

        let mut compiled = BTreeMap::new();
        for (id, value, sites) in expanded {
            let schema = self.finish(value, sites)?;
            compiled.insert(id, schema);
        }
        self.compiled = compiled;
        Ok(())
    }

    pub fn compiled(&self, id: &str) -> Option<&CompiledSchema> {
        self.compiled.get(id)
    }

    pub fn compile(&self, schema: &Value) -> Result<CompiledSchema, SchemaCompileError> {
        let mut sites = Vec::new();
        let expanded = self.compile_value(schema, 0, Some(&[]), &mut sites)?;
        self.finish(expanded, sites)
    }

    /// Expand macros, check keyword configurations and rewrite registry refs.
    /// `site` is the instance path while the walk stays on `properties`, `items` and `allOf`;
    /// contextual keywords are only accepted there.
    fn compile_value(
        &self,
        schema: &Value,
        depth: usize,
        site: Option<&[Step]>,
        sites: &mut Vec<Site>,
    ) -> Result<Value, SchemaCompileError> {
        if depth > MAX_DEPTH {
            return Err(SchemaCompileError::InvalidKeyword {
                keyword: "$extend".into(),
                message: "schema nesting too deep".into(),
            });
        }
        let map = match schema {
            Value::Bool(_) => return Ok(schema.clone()),
            Value::Object(map) => map,
            other => {
                return Err(SchemaCompileError::InvalidKeyword {
                    keyword: "schema".into(),
                    message: format!("expected object or boolean, got {}", other),
                })
            }
        };
        let mut out = Map::new();
        let mut expansions = Vec::new();
        for (key, value) in map {
            if let Some(keyword) = self.keywords.get(key) {
                self.check_keyword(keyword.as_ref(), value)?;
                match keyword.kind() {
                    KeywordKind::Macro => {
                        let expanded = keyword.expand(value, &self.sources)?;
                        expansions.push(self.compile_value(&expanded, depth + 1, site, sites)?);
                    }
                    KeywordKind::Validate if keyword.contextual() => {
                        let path = site.ok_or_else(|| SchemaCompileError::InvalidKeyword {
                            keyword: key.clone(),
                            message: "only allowed under properties, items or allOf".into(),
                        })?;
                        sites.push(Site {
                            path: path.to_vec(),
                            keyword: key.clone(),
                            config: value.clone(),
                        });
                    }
                    KeywordKind::Validate => {
                        out.insert(key.clone(), value.clone());
                    }
                }
                continue;
            }
            let compiled = match key.as_str() {
                "properties" => match value {
                    Value::Object(props) => {
                        let mut compiled = Map::new();
                        for (name, sub) in props {
                            let child = site.map(|p| extend_path(p, Step::Key(name.clone())));
                            compiled.insert(name.clone(), self.compile_value(sub, depth + 1, child.as_deref(), sites)?);
                        }
                        Value::Object(compiled)
                    }
                    other => other.clone(),
                },
                "$defs" | "definitions" => match value {
                    Value::Object(defs) => {
                        let mut compiled = Map::new();
                        for (name, sub) in defs {
                            compiled.insert(name.clone(), self.compile_value(sub, depth + 1, None, sites)?);
                        }
                        Value::Object(compiled)
                    }
                    other => other.clone(),
                },
                "items" if value.is_object() => {
                    let child = site.map(|p| extend_path(p, Step::Each));
                    self.compile_value(value, depth + 1, child.as_deref(), sites)?
                }
                "additionalProperties" | "not" if value.is_object() => {
                    self.compile_value(value, depth + 1, None, sites)?
                }
                "allOf" | "anyOf" | "oneOf" => match value {
                    Value::Array(items) => {
                        let branch_site = if key == "allOf" { site } else { None };
                        Value::Array(
                            items
                                .iter()
                                .map(|s| self.compile_value(s, depth + 1, branch_site, sites))
                                .collect::<Result<_, _>>()?,
                        )
                    }
                    other => other.clone(),
                },
                "$ref" => match value.as_str() {
                    Some(local) if local.starts_with('#') => value.clone(),
                    Some(target) if self.sources.contains(target) => {
                        Value::String(format!("{}{}", DEFS_PREFIX, escape_pointer(target)))
                    }
                    other => {
                        return Err(SchemaCompileError::MissingReference(
                            other.unwrap_or_default().to_string(),
                        ))
                    }
                },
                _ => value.clone(),
            };
            out.insert(key.clone(), compiled);
        }
        if out.get("nullable") == Some(&Value::Bool(true)) {
            allow_null(&mut out);
        }
        if !expansions.is_empty() {
            let all_of = out
                .entry("allOf".to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(list) = all_of {
                list.extend(expansions);
            }
        }
        Ok(Value::Object(out))
    }

    /// Embed the registered schemas `expanded` refers to and build the core validator.
    fn finish(&self, mut expanded: Value, sites: Vec<Site>) -> Result<CompiledSchema, SchemaCompileError> {
        let defs = self.referenced_definitions(&expanded)?;
        if !defs.is_empty() {
            if let Value::Object(map) = &mut expanded {
                if let Value::Object(slot) = map.entry(DEFS).or_insert_with(|| Value::Object(Map::new())) {
                    slot.extend(defs);
                }
            }
        }
        let core = self.build(&expanded)?;
        Ok(CompiledSchema {
            schema: expanded,
            sites,
            core: Arc::new(core),
        })
    }

    /// Registered schemas reachable from `schema` through `$ref`, transitively.
    fn referenced_definitions(&self, schema: &Value) -> Result<Map<String, Value>, SchemaCompileError> {
        let mut pending = Vec::new();
        self.collect_refs(schema, &mut pending);
        let mut defs = Map::new();
        while let Some(id) = pending.pop() {
            if defs.contains_key(&id) {
                continue;
            }
            let body = match self.expanded.get(&id) {
                Some(body) => body.clone(),
                None => {
                    let source = self
                        .sources
                        .get(&id)
                        .ok_or_else(|| SchemaCompileError::MissingReference(id.clone()))?;
                    self.compile_value(source, 0, Some(&[]), &mut Vec::new())?
                }
            };
            self.collect_refs(&body, &mut pending);
            defs.insert(id, body);
        }
        Ok(defs)
    }

    fn collect_refs(&self, value: &Value, out: &mut Vec<String>) {
        match value {
            Value::Object(map) => {
                for (key, sub) in map {
                    if key == "$ref" {
                        if let Some(id) = sub.as_str().and_then(|r| r.strip_prefix(DEFS_PREFIX)) {
                            let id = unescape_pointer(id);
                            if self.sources.contains(&id) {
                                out.push(id);
                            }
                        }
                    } else {
                        self.collect_refs(sub, out);
                    }
                }
            }
            Value::Array(items) => items.iter().for_each(|item| self.collect_refs(item, out)),
            _ => {}
        }
    }

    fn build(&self, schema: &Value) -> Result<jsonschema::Validator, SchemaCompileError> {
        let mut options = jsonschema::options();
        options
            .with_draft(Draft::Draft202012)
            .should_validate_formats(true);
        for name in self.keywords.names() {
            let Some(keyword) = self.keywords.get(name) else { continue };
            if keyword.kind() != KeywordKind::Validate || keyword.contextual() {
                continue;
            }
            let keyword = keyword.clone();
            let models = self.models.clone();
            options.with_keyword(name, move |_parent, config, path| {
                let adapter: Box<dyn jsonschema::Keyword> = Box::new(KeywordAdapter {
                    keyword: keyword.clone(),
                    config: config.clone(),
                    models: models.clone(),
                    schema_path: path,
                });
                Ok(adapter)
            });
        }
        options.build(schema).map_err(|e| SchemaCompileError::InvalidKeyword {
            keyword: "schema".into(),
            message: e.to_string(),
        })
    }

    fn check_keyword(&self, keyword: &dyn Keyword, config: &Value) -> Result<(), SchemaCompileError> {
        let invalid = |message: String| SchemaCompileError::InvalidKeyword {
            keyword: keyword.keyword().to_string(),
            message,
        };
        let meta = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&keyword.meta_schema())
            .map_err(|e| invalid(e.to_string()))?;
        let messages: Vec<String> = meta
            .iter_errors(config)
            .map(|e| {
                let path = dotted(&e.instance_path.to_string());
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{} {}", path, e)
                }
            })
            .collect();
        if !messages.is_empty() {
            return Err(invalid(messages.join("; ")));
        }
        keyword.prepare(config)
    }

    pub fn validate(&self, schema: &CompiledSchema, data: &Value) -> Result<(), Vec<SchemaError>> {
        let mut errors: Vec<SchemaError> = schema
            .core
            .iter_errors(data)
            .flat_map(|e| schema_errors(&e))
            .collect();
        for site in &schema.sites {
            self.check_site(site, data, &mut errors);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate against a registered schema by id.
    pub fn validate_id(&self, id: &str, data: &Value) -> Result<(), Vec<SchemaError>> {
        match self.compiled.get(id) {
            Some(schema) => self.validate(schema, data),
            None => Err(vec![SchemaError::new("$ref", "", format!("can't resolve reference {}", id))]),
        }
    }

    fn check_site(&self, site: &Site, root: &Value, errors: &mut Vec<SchemaError>) {
        let Some(keyword) = self.keywords.get(&site.keyword) else { return };
        let mut found = Vec::new();
        locate(root, &site.path, String::new(), None, &mut found);
        for at in found {
            if let Some(ty) = keyword.data_type() {
                if !type_matches(ty, at.data) {
                    continue;
                }
            }
            let ctx = KeywordContext {
                data: at.data,
                data_path: &at.path,
                parent_data: at.parent.as_ref().map(|(p, _)| *p),
                parent_property: at.parent.as_ref().map(|(_, name)| name.as_str()),
                root_data: root,
                models: self.models.as_ref(),
            };
            if let Err(mut errs) = keyword.validate(&site.config, &ctx) {
                if errs.is_empty() {
                    errs.push(SchemaError::new(
                        &site.keyword,
                        &at.path,
                        format!("must pass \"{}\" keyword validation", site.keyword),
                    ));
                }
                if !keyword.full_errors() {
                    for err in errs.iter_mut() {
                        err.keyword = site.keyword.clone();
                        err.data_path = at.path.clone();
                    }
                }
                errors.extend(errs);
            }
        }
    }

    /// Copy of `schema` without keywords excluded from documentation.
    pub fn documentation_schema(&self, schema: &Value) -> Value {
        self.strip_undocumented(schema, false)
    }

    fn strip_undocumented(&self, value: &Value, property_map: bool) -> Value {
        match value {
            Value::Object(map) => {
                let mut out = Map::new();
                for (key, sub) in map {
                    if !property_map {
                        if let Some(keyword) = self.keywords.get(key) {
                            if !keyword.documented() {
                                continue;
                            }
                        }
                    }
                    let nested_props = !property_map && matches!(key.as_str(), "properties" | "definitions" | "$defs");
                    out.insert(key.clone(), self.strip_undocumented(sub, nested_props));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.strip_undocumented(v, false)).collect()),
            other => other.clone(),
        }
    }
}

/// A validate keyword as seen by `jsonschema`.
struct KeywordAdapter {
    keyword: Arc<dyn Keyword>,
    config: Value,
    models: Arc<dyn ModelLookup>,
    schema_path: Location,
}

impl KeywordAdapter {
    fn check(&self, data: &Value, data_path: &str) -> Result<(), Vec<SchemaError>> {
        if let Some(ty) = self.keyword.data_type() {
            if !type_matches(ty, data) {
                return Ok(());
            }
        }
        let ctx = KeywordContext {
            data,
            data_path,
            parent_data: None,
            parent_property: None,
            root_data: data,
            models: self.models.as_ref(),
        };
        self.keyword.validate(&self.config, &ctx)
    }
}

impl jsonschema::Keyword for KeywordAdapter {
    fn validate<'i>(&self, instance: &'i Value, location: &LazyLocation) -> Result<(), jsonschema::ValidationError<'i>> {
        let instance_path: Location = location.into();
        let data_path = dotted(&instance_path.to_string());
        self.check(instance, &data_path).map_err(|errors| {
            let message = errors
                .into_iter()
                .next()
                .map(|e| e.message)
                .unwrap_or_else(|| format!("must pass \"{}\" keyword validation", self.keyword.keyword()));
            jsonschema::ValidationError::custom(self.schema_path.clone(), instance_path, instance, message)
        })
    }

    fn is_valid(&self, instance: &Value) -> bool {
        self.check(instance, "").is_ok()
    }
}

/// One `jsonschema` error as raw validator errors; `additionalProperties` yields one per property.
fn schema_errors(err: &jsonschema::ValidationError<'_>) -> Vec<SchemaError> {
    let data_path = dotted(&err.instance_path.to_string());
    let keyword = keyword_name(&err.schema_path.to_string());
    match &err.kind {
        ValidationErrorKind::Required { property } => vec![SchemaError::new("required", &data_path, err.to_string())
            .with_params(json!({ "missingProperty": property }))],
        ValidationErrorKind::AdditionalProperties { unexpected } => unexpected
            .iter()
            .map(|name| {
                SchemaError::new("additionalProperties", &data_path, "must NOT have additional properties")
                    .with_params(json!({ "additionalProperty": name }))
            })
            .collect(),
        ValidationErrorKind::Custom { message } => vec![SchemaError::new(&keyword, &data_path, message.clone())],
        _ => vec![SchemaError::new(&keyword, &data_path, err.to_string())],
    }
}

/// Last segment of a schema location: the keyword that failed.
fn keyword_name(schema_path: &str) -> String {
    schema_path
        .rsplit('/')
        .next()
        .map(unescape_pointer)
        .unwrap_or_default()
}

/// JSON pointer (`/a/0`) to the dotted data path (`.a.0`) errors are reported with.
fn dotted(pointer: &str) -> String {
    pointer
        .split('/')
        .skip(1)
        .map(|segment| format!(".{}", unescape_pointer(segment)))
        .collect()
}

fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

fn unescape_pointer(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

fn extend_path(path: &[Step], step: Step) -> Vec<Step> {
    let mut out = path.to_vec();
    out.push(step);
    out
}

/// `nullable: true` widens a declared `type` to accept `null`.
fn allow_null(schema: &mut Map<String, Value>) {
    let widened = match schema.get("type") {
        Some(Value::String(t)) if t != "null" => json!([t, "null"]),
        Some(Value::Array(list)) if !list.contains(&json!("null")) => {
            let mut list = list.clone();
            list.push(json!("null"));
            Value::Array(list)
        }
        _ => return,
    };
    schema.insert("type".into(), widened);
}

struct Located<'a> {
    data: &'a Value,
    path: String,
    parent: Option<(&'a Value, String)>,
}

/// Every value of `data` at `steps`, with its dotted path and holding object or array.
fn locate<'a>(
    data: &'a Value,
    steps: &[Step],
    path: String,
    parent: Option<(&'a Value, String)>,
    out: &mut Vec<Located<'a>>,
) {
    let Some((step, rest)) = steps.split_first() else {
        out.push(Located { data, path, parent });
        return;
    };
    match step {
        Step::Key(name) => {
            if let Some(child) = data.as_object().and_then(|obj| obj.get(name)) {
                locate(child, rest, format!("{}.{}", path, name), Some((data, name.clone())), out);
            }
        }
        Step::Each => {
            for (index, item) in data.as_array().into_iter().flatten().enumerate() {
                let key = index.to_string();
                locate(item, rest, format!("{}.{}", path, key), Some((data, key)), out);
            }
        }
    }
}

pub(crate) fn type_matches(ty: &str, data: &Value) -> bool {
    match ty {
        "object" => data.is_object(),
        "array" => data.is_array(),
        "string" => data.is_string(),
        "number" => data.is_number(),
        "integer" => data.is_i64() || data.is_u64() || data.as_f64().is_some_and(|f| f.fract() == 0.0),
        "boolean" => data.is_boolean(),
        "null" => data.is_null(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ValidatorFunctions;

    fn validator() -> Validator {
        Validator::new(KeywordSet::standard(ValidatorFunctions::new()))
    }

    fn check(schema: Value, data: Value) -> Result<(), Vec<SchemaError>> {
        let v = validator();
        let compiled = v.compile(&schema).unwrap();
        v.validate(&compiled, &data)
    }

    #[test]
    fn core_object_checks() {
        let schema = json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "minLength": 2 },
                "age": { "type": "integer", "minimum": 0 },
                "email": { "type": "string", "format": "email", "nullable": true }
            },
            "required": ["name"],
            "additionalProperties": false
        });
        assert!(check(schema.clone(), json!({ "name": "Ada", "age": 36, "email": null })).is_ok());

        let errors = check(schema, json!({ "age": -1, "extra": true })).unwrap_err();
        let keywords: Vec<&str> = errors.iter().map(|e| e.keyword.as_str()).collect();
        assert!(keywords.contains(&"required"));
        assert!(keywords.contains(&"minimum"));
        assert!(keywords.contains(&"additionalProperties"));
        let minimum = errors.iter().find(|e| e.keyword == "minimum").unwrap();
        assert_eq!(minimum.data_path, ".age");
        let required = errors.iter().find(|e| e.keyword == "required").unwrap();
        assert_eq!(required.params["missingProperty"], "name");
        let extra = errors.iter().find(|e| e.keyword == "additionalProperties").unwrap();
        assert_eq!(extra.params["additionalProperty"], "extra");
    }

    #[test]
    fn array_items_carry_index_paths() {
        let schema = json!({ "type": "array", "items": { "type": "string" }, "maxItems": 3 });
        let errors = check(schema, json!(["a", 2, "c", "d"])).unwrap_err();
        assert!(errors.iter().any(|e| e.keyword == "type" && e.data_path == ".1"));
        assert!(errors.iter().any(|e| e.keyword == "maxItems"));
    }

    #[test]
    fn combinators() {
        let schema = json!({ "anyOf": [{ "type": "string" }, { "type": "integer" }] });
        assert!(check(schema.clone(), json!(3)).is_ok());
        assert!(check(schema, json!(true)).is_err());
        let schema = json!({ "oneOf": [{ "minimum": 0 }, { "maximum": 10 }] });
        assert!(check(schema, json!(5)).is_err());
        assert!(check(json!({ "not": { "type": "null" } }), json!(null)).is_err());
    }

    #[test]
    fn refs_resolve_against_registry() {
        let mut v = validator();
        v.add_schema("Address", json!({ "type": "object", "required": ["city"] }));
        v.compile_registered().unwrap();
        let compiled = v
            .compile(&json!({ "type": "object", "properties": { "home": { "$ref": "Address" } } }))
            .unwrap();
        assert_eq!(compiled.as_value()["properties"]["home"]["$ref"], "#/$defs/Address");
        assert!(compiled.as_value()[DEFS].get("Address").is_some());
        let errors = v.validate(&compiled, &json!({ "home": {} })).unwrap_err();
        assert_eq!(errors[0].keyword, "required");
        assert_eq!(errors[0].data_path, ".home");

        let missing = v.compile(&json!({ "$ref": "Nowhere" }));
        assert_eq!(missing, Err(SchemaCompileError::MissingReference("Nowhere".into())));
    }

    #[test]
    fn recursive_refs_embed_each_schema_once() {
        let mut v = validator();
        v.add_schema(
            "Node",
            json!({ "type": "object", "properties": { "next": { "anyOf": [{ "type": "null" }, { "$ref": "Node" }] } } }),
        );
        v.compile_registered().unwrap();
        let node = v.compiled("Node").unwrap();
        assert!(v.validate(node, &json!({ "next": { "next": null } })).is_ok());
        let errors = v.validate(node, &json!({ "next": { "next": 3 } })).unwrap_err();
        assert!(errors.iter().all(|e| e.data_path.starts_with(".next")));
    }

    #[test]
    fn custom_keywords_run_inside_the_core_validator() {
        let schema = json!({ "type": "object", "properties": { "when": { "instanceof": "Date" } } });
        assert!(check(schema.clone(), json!({ "when": "2024-05-01T10:00:00Z" })).is_ok());
        let errors = check(schema, json!({ "when": "yesterday" })).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].keyword, "instanceof");
        assert_eq!(errors[0].data_path, ".when");
    }

    #[test]
    fn reference_sees_the_holding_object() {
        let schema = json!({
            "type": "object",
            "properties": {
                "owners": { "type": "array", "items": { "properties": { "id": { "reference": true } } } }
            }
        });
        assert!(check(schema.clone(), json!({ "owners": [{ "id": 1 }, { "id": 2 }] })).is_ok());
        let errors = check(schema, json!({ "owners": [{ "id": 1 }, { "id": 2, "name": "x" }] })).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].keyword, "reference");
        assert_eq!(errors[0].data_path, ".owners.1.id");
    }

    #[test]
    fn invalid_pattern_fails_compile() {
        let err = validator().compile(&json!({ "pattern": "(" })).unwrap_err();
        assert!(matches!(err, SchemaCompileError::InvalidKeyword { .. }));
    }

    #[test]
    fn contextual_keywords_outside_plain_paths_fail_compile() {
        let err = validator()
            .compile(&json!({ "anyOf": [{ "properties": { "id": { "reference": true } } }] }))
            .unwrap_err();
        assert!(matches!(err, SchemaCompileError::InvalidKeyword { ref keyword, .. } if keyword == "reference"));
    }

    #[test]
    fn pointers_become_dotted_paths() {
        assert_eq!(dotted(""), "");
        assert_eq!(dotted("/home/city"), ".home.city");
        assert_eq!(dotted("/a~1b/0"), ".a/b.0");
        assert_eq!(keyword_name("/properties/age/minimum"), "minimum");
    }

    #[test]
    fn documentation_strips_silent_keywords() {
        let v = validator();
        let schema = json!({
            "type": "object",
            "properties": {
                "reference": { "type": "string" },
                "id": { "type": "integer", "reference": true },
                "owner": { "type": "object", "relate": "User", "range": [1, 2] }
            }
        });
        let docs = v.documentation_schema(&schema);
        assert!(docs["properties"].get("reference").is_some());
        assert!(docs["properties"]["id"].get("reference").is_none());
        assert!(docs["properties"]["owner"].get("relate").is_none());
        assert!(docs["properties"]["owner"].get("range").is_some());
    }
}
