//! The custom keywords model schemas are written with.

use crate::error::{SchemaCompileError, SchemaError};
use crate::schema::validator::type_matches;
use crate::schema::{Keyword, KeywordContext, KeywordKind, SchemaRegistry, ValidatorFunctions};
use serde_json::{json, Map, Value};

/// `$extend: [source, ...patches]`: deep-merges patches onto a copy of the source.
pub struct ExtendKeyword;

impl Keyword for ExtendKeyword {
    fn keyword(&self) -> &'static str {
        "$extend"
    }

    fn kind(&self) -> KeywordKind {
        KeywordKind::Macro
    }

    fn meta_schema(&self) -> Value {
        json!({ "type": "array", "minItems": 1, "items": { "type": "object" } })
    }

    fn expand(&self, config: &Value, schemas: &SchemaRegistry) -> Result<Value, SchemaCompileError> {
        let parts = config.as_array().map(Vec::as_slice).unwrap_or_default();
        let Some((source, patches)) = parts.split_first() else {
            return Ok(Value::Object(Map::new()));
        };
        // Clone so the registered base schema is never touched by the merge.
        let mut merged = match source.get("$ref").and_then(Value::as_str) {
            Some(id) => schemas
                .get(id)
                .cloned()
                .ok_or_else(|| SchemaCompileError::MissingReference(id.to_string()))?,
            None => source.clone(),
        };
        for patch in patches {
            deep_merge(&mut merged, patch);
        }
        Ok(merged)
    }
}

/// Objects merge key by key; arrays gain the patch items they lack; anything else is replaced.
pub fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (Value::Array(target), Value::Array(patch)) => {
            for item in patch {
                if !target.contains(item) {
                    target.push(item.clone());
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// `instanceof: "Date" | ["User", "Object"]`: data must be an instance of one candidate.
pub struct InstanceofKeyword;

const BUILT_IN_TYPES: &[&str] = &[
    "object", "array", "function", "string", "number", "boolean", "date", "regexp", "buffer",
];

fn built_in_instance(name: &str, data: &Value) -> Option<bool> {
    let lower = name.to_lowercase().replace(['-', '_'], "");
    let key = match lower.as_str() {
        "bytebuffer" | "bytes" => "buffer",
        other => other,
    };
    if !BUILT_IN_TYPES.contains(&key) {
        return None;
    }
    Some(match key {
        "object" | "array" | "string" | "number" | "boolean" => type_matches(key, data),
        // JSON carries no callables.
        "function" => false,
        "date" => data.as_str().is_some_and(|s| {
            chrono::DateTime::parse_from_rfc3339(s).is_ok()
                || chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
        }),
        "regexp" => data.as_str().is_some_and(|s| regex::Regex::new(s).is_ok()),
        "buffer" => data
            .as_array()
            .is_some_and(|bytes| bytes.iter().all(|b| b.as_u64().is_some_and(|n| n <= 255))),
        _ => false,
    })
}

impl Keyword for InstanceofKeyword {
    fn keyword(&self) -> &'static str {
        "instanceof"
    }

    fn kind(&self) -> KeywordKind {
        KeywordKind::Validate
    }

    fn meta_schema(&self) -> Value {
        let candidate = json!({
            "anyOf": [
                { "type": "string" },
                { "type": "object", "required": ["name"], "properties": { "name": { "type": "string" } } }
            ]
        });
        json!({ "anyOf": [candidate.clone(), { "type": "array", "items": candidate }] })
    }

    fn validate(&self, config: &Value, ctx: &KeywordContext<'_>) -> Result<(), Vec<SchemaError>> {
        let candidates: Vec<&Value> = match config {
            Value::Array(list) => list.iter().collect(),
            single => vec![single],
        };
        let names: Vec<&str> = candidates
            .iter()
            .filter_map(|c| c.as_str().or_else(|| c.get("name").and_then(Value::as_str)))
            .collect();
        let matched = names.iter().any(|name| match built_in_instance(name, ctx.data) {
            Some(result) => result,
            None => ctx.models.is_model(name) && ctx.models.is_instance(name, ctx.data),
        });
        if matched {
            Ok(())
        } else {
            Err(vec![SchemaError::new(
                "instanceof",
                ctx.data_path,
                format!("must be an instance of {}", names.join(", ")),
            )
            .with_params(json!({ "instanceof": names }))])
        }
    }
}

/// `range: [min, max]` expands to `minimum` / `maximum`.
pub struct RangeKeyword;

impl Keyword for RangeKeyword {
    fn keyword(&self) -> &'static str {
        "range"
    }

    fn kind(&self) -> KeywordKind {
        KeywordKind::Macro
    }

    fn meta_schema(&self) -> Value {
        json!({ "type": "array", "minItems": 2, "maxItems": 2, "items": { "type": "number" } })
    }

    fn expand(&self, config: &Value, _schemas: &SchemaRegistry) -> Result<Value, SchemaCompileError> {
        Ok(json!({ "minimum": config[0], "maximum": config[1] }))
    }
}

/// `reference: true` on a property: the holding object may only contain that property.
pub struct ReferenceKeyword;

impl Keyword for ReferenceKeyword {
    fn keyword(&self) -> &'static str {
        "reference"
    }

    fn kind(&self) -> KeywordKind {
        KeywordKind::Validate
    }

    fn meta_schema(&self) -> Value {
        json!({ "type": "boolean" })
    }

    fn silent(&self) -> bool {
        true
    }

    fn contextual(&self) -> bool {
        true
    }

    fn validate(&self, config: &Value, ctx: &KeywordContext<'_>) -> Result<(), Vec<SchemaError>> {
        if config != &Value::Bool(true) {
            return Ok(());
        }
        let property = ctx.parent_property.unwrap_or_default();
        let sole_key = ctx
            .parent_data
            .and_then(Value::as_object)
            .is_some_and(|obj| obj.len() == 1 && obj.contains_key(property));
        if sole_key {
            Ok(())
        } else {
            Err(vec![SchemaError::new(
                "reference",
                ctx.data_path,
                format!("must only contain the reference property '{}'", property),
            )])
        }
    }
}

/// `relate: "Model"`: data must be a reference shape of that model.
pub struct RelateKeyword;

impl Keyword for RelateKeyword {
    fn keyword(&self) -> &'static str {
        "relate"
    }

    fn kind(&self) -> KeywordKind {
        KeywordKind::Validate
    }

    fn meta_schema(&self) -> Value {
        json!({ "type": "string", "minLength": 1 })
    }

    fn silent(&self) -> bool {
        true
    }

    fn validate(&self, config: &Value, ctx: &KeywordContext<'_>) -> Result<(), Vec<SchemaError>> {
        let model = config.as_str().unwrap_or_default();
        if ctx.models.is_reference(model, ctx.data) {
            Ok(())
        } else {
            Err(vec![SchemaError::new(
                "relate",
                ctx.data_path,
                format!("must be a reference to {}", model),
            )])
        }
    }
}

/// `validate: "functionName"`: runs a registered function against the full context.
pub struct ValidateKeyword {
    functions: ValidatorFunctions,
}

impl ValidateKeyword {
    pub fn new(functions: ValidatorFunctions) -> Self {
        ValidateKeyword { functions }
    }
}

impl Keyword for ValidateKeyword {
    fn keyword(&self) -> &'static str {
        "validate"
    }

    fn kind(&self) -> KeywordKind {
        KeywordKind::Validate
    }

    fn meta_schema(&self) -> Value {
        json!({ "type": "string", "minLength": 1 })
    }

    fn documented(&self) -> bool {
        false
    }

    fn full_errors(&self) -> bool {
        true
    }

    fn contextual(&self) -> bool {
        true
    }

    fn prepare(&self, config: &Value) -> Result<(), SchemaCompileError> {
        let name = config.as_str().unwrap_or_default();
        match self.functions.get(name) {
            Some(_) => Ok(()),
            None => Err(SchemaCompileError::UnknownFunction(name.to_string())),
        }
    }

    fn validate(&self, config: &Value, ctx: &KeywordContext<'_>) -> Result<(), Vec<SchemaError>> {
        let name = config.as_str().unwrap_or_default();
        let Some(function) = self.functions.get(name) else {
            return Err(vec![SchemaError::new(
                "validate",
                ctx.data_path,
                format!("unknown validator function: {}", name),
            )]);
        };
        match function(ctx) {
            Value::String(message) => Err(vec![SchemaError::new("validate", ctx.data_path, message)]),
            Value::Array(raw) => Err(raw.iter().map(|item| prefixed_error(item, ctx.data_path)).collect()),
            other if truthy(&other) => Ok(()),
            _ => Err(Vec::new()),
        }
    }
}

/// Raw error from a validator function, with its path re-rooted at the current data path.
fn prefixed_error(item: &Value, data_path: &str) -> SchemaError {
    match item {
        Value::String(message) => SchemaError::new("validate", data_path, message.clone()),
        other => {
            let field = |key: &str| other.get(key).and_then(Value::as_str).unwrap_or_default();
            let message = match field("message") {
                "" => "is invalid",
                m => m,
            };
            let keyword = match field("keyword") {
                "" => "validate",
                k => k,
            };
            let nested = field("dataPath");
            let path = if nested.is_empty() {
                data_path.to_string()
            } else if nested.starts_with('.') {
                format!("{}{}", data_path, nested)
            } else {
                format!("{}.{}", data_path, nested)
            };
            SchemaError::new(keyword, &path, message)
                .with_params(other.get("params").cloned().unwrap_or_else(|| json!({})))
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{KeywordSet, ModelLookup, Validator};
    use std::sync::Arc;

    struct Models;

    impl ModelLookup for Models {
        fn is_model(&self, name: &str) -> bool {
            name == "User"
        }
        fn is_instance(&self, model: &str, value: &Value) -> bool {
            model == "User" && value.get("username").is_some()
        }
        fn is_reference(&self, model: &str, value: &Value) -> bool {
            model == "User" && value.as_object().is_some_and(|o| o.len() == 1 && o.contains_key("id"))
        }
    }

    fn functions() -> ValidatorFunctions {
        ValidatorFunctions::new()
            .register("isEven", |ctx| json!(ctx.data.as_i64().is_some_and(|n| n % 2 == 0)))
            .register("notAdmin", |ctx| {
                if ctx.data == "admin" {
                    json!("must not be admin")
                } else {
                    json!(true)
                }
            })
            .register("pairs", |ctx| {
                if ctx.root_data.get("left") == ctx.root_data.get("right") {
                    json!(null)
                } else {
                    json!([
                        { "keyword": "pairs", "dataPath": ".left", "message": "left differs" },
                        { "message": "right differs", "dataPath": "right" }
                    ])
                }
            })
    }

    fn validator() -> Validator {
        Validator::with_models(KeywordSet::standard(functions()), Arc::new(Models))
    }

    fn run(v: &Validator, schema: Value, data: Value) -> Result<(), Vec<SchemaError>> {
        let compiled = v.compile(&schema).unwrap();
        v.validate(&compiled, &data)
    }

    #[test]
    fn extend_merges_onto_a_copy_of_the_ref() {
        let mut v = validator();
        v.add_schema("A", json!({ "a": 1 }));
        let merged = ExtendKeyword
            .expand(&json!([{ "$ref": "A" }, { "b": 1 }]), v.schemas())
            .unwrap();
        assert_eq!(merged, json!({ "a": 1, "b": 1 }));
        assert_eq!(v.schemas().get("A"), Some(&json!({ "a": 1 })));
    }

    #[test]
    fn extend_validates_in_place() {
        let mut v = validator();
        v.add_schema(
            "Named",
            json!({ "type": "object", "properties": { "name": { "type": "string" } }, "required": ["name"] }),
        );
        v.compile_registered().unwrap();
        let schema = json!({ "$extend": [{ "$ref": "Named" }, { "required": ["age"] }] });
        assert!(run(&v, schema.clone(), json!({ "name": "x", "age": 3 })).is_ok());
        let errors = run(&v, schema, json!({ "name": "x" })).unwrap_err();
        assert_eq!(errors[0].params["missingProperty"], "age");
        assert_eq!(v.schemas().get("Named").unwrap()["required"], json!(["name"]));
    }

    #[test]
    fn extend_with_unknown_ref_fails_compile() {
        let v = validator();
        let err = v.compile(&json!({ "$extend": [{ "$ref": "Missing" }] })).unwrap_err();
        assert_eq!(err, SchemaCompileError::MissingReference("Missing".into()));
    }

    #[test]
    fn deep_merge_nested_objects() {
        let mut base = json!({ "properties": { "a": { "type": "string" } }, "required": ["a"] });
        deep_merge(&mut base, &json!({ "properties": { "b": { "type": "integer" } }, "required": ["b"] }));
        assert_eq!(
            base,
            json!({
                "properties": { "a": { "type": "string" }, "b": { "type": "integer" } },
                "required": ["a", "b"]
            })
        );
    }

    #[test]
    fn range_expands_to_bounds() {
        let v = validator();
        assert!(run(&v, json!({ "range": [1, 5] }), json!(3)).is_ok());
        let errors = run(&v, json!({ "range": [1, 5] }), json!(9)).unwrap_err();
        assert_eq!(errors[0].keyword, "maximum");
    }

    #[test]
    fn range_meta_schema_requires_two_numbers() {
        let v = validator();
        for bad in [json!([1]), json!([1, 2, 3]), json!(["a", 2]), json!(4)] {
            let err = v.compile(&json!({ "range": bad })).unwrap_err();
            assert!(matches!(err, SchemaCompileError::InvalidKeyword { ref keyword, .. } if keyword == "range"));
        }
    }

    #[test]
    fn reference_only_allows_the_key_itself() {
        let v = validator();
        let schema = json!({
            "type": "object",
            "properties": { "id": { "type": "integer", "reference": true } }
        });
        assert!(run(&v, schema.clone(), json!({ "id": 1 })).is_ok());
        let errors = run(&v, schema, json!({ "id": 1, "extra": 2 })).unwrap_err();
        assert_eq!(errors[0].keyword, "reference");
        assert_eq!(errors[0].data_path, ".id");

        let off = json!({ "type": "object", "properties": { "id": { "reference": false } } });
        assert!(run(&v, off, json!({ "id": 1, "extra": 2 })).is_ok());
    }

    #[test]
    fn relate_uses_model_reference_shape() {
        let v = validator();
        let schema = json!({ "type": "object", "properties": { "owner": { "relate": "User" } } });
        assert!(run(&v, schema.clone(), json!({ "owner": { "id": 4 } })).is_ok());
        assert!(run(&v, schema.clone(), json!({ "owner": { "id": 4, "name": "x" } })).is_err());
        let unknown = json!({ "properties": { "owner": { "relate": "Ghost" } } });
        assert!(run(&v, unknown, json!({ "owner": { "id": 4 } })).is_err());
    }

    #[test]
    fn instanceof_built_ins_and_models() {
        let v = validator();
        assert!(run(&v, json!({ "instanceof": "Date" }), json!("2024-05-01T10:00:00Z")).is_ok());
        assert!(run(&v, json!({ "instanceof": "Date" }), json!("yesterday")).is_err());
        assert!(run(&v, json!({ "instanceof": ["Buffer", "String"] }), json!([1, 2, 255])).is_ok());
        assert!(run(&v, json!({ "instanceof": "User" }), json!({ "username": "ada" })).is_ok());
        assert!(run(&v, json!({ "instanceof": [{ "name": "User" }] }), json!({ "title": "x" })).is_err());
        // Unknown names fail the candidate without raising.
        assert!(run(&v, json!({ "instanceof": ["Ghost", "Number"] }), json!(2)).is_ok());
        assert!(run(&v, json!({ "instanceof": "Ghost" }), json!(2)).is_err());
    }

    #[test]
    fn validate_function_results() {
        let v = validator();
        assert!(run(&v, json!({ "validate": "isEven" }), json!(4)).is_ok());
        let errors = run(&v, json!({ "validate": "isEven" }), json!(3)).unwrap_err();
        assert_eq!(errors.len(), 1);

        let schema = json!({ "properties": { "role": { "validate": "notAdmin" } } });
        let errors = run(&v, schema, json!({ "role": "admin" })).unwrap_err();
        assert_eq!(errors[0].message, "must not be admin");
        assert_eq!(errors[0].data_path, ".role");
    }

    #[test]
    fn validate_array_errors_are_reprefixed() {
        let v = validator();
        let schema = json!({ "properties": { "pair": { "validate": "pairs" } } });
        let data = json!({ "left": 1, "right": 2, "pair": {} });
        let errors = run(&v, schema.clone(), data).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].keyword, "pairs");
        assert_eq!(errors[0].data_path, ".pair.left");
        assert_eq!(errors[1].data_path, ".pair.right");
        assert!(run(&v, schema, json!({ "left": 1, "right": 1, "pair": {} })).is_err());
    }

    #[test]
    fn validate_with_unknown_function_fails_compile() {
        let err = validator().compile(&json!({ "validate": "nope" })).unwrap_err();
        assert_eq!(err, SchemaCompileError::UnknownFunction("nope".into()));
    }
}
