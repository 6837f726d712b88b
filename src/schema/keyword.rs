//! Extension point for custom schema keywords.

use crate::error::{SchemaCompileError, SchemaError};
use crate::schema::SchemaRegistry;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Model predicates the keywords consult at validation time.
pub trait ModelLookup: Send + Sync {
    fn is_model(&self, name: &str) -> bool;
    /// Object whose keys are all known properties or relations of `model`.
    fn is_instance(&self, model: &str, value: &Value) -> bool;
    /// Minimal `{ id }` shape identifying an existing row of `model`.
    fn is_reference(&self, model: &str, value: &Value) -> bool;
}

/// Lookup with no models, used for meta-schema checks.
pub struct NoModels;

impl ModelLookup for NoModels {
    fn is_model(&self, _name: &str) -> bool {
        false
    }
    fn is_instance(&self, _model: &str, _value: &Value) -> bool {
        false
    }
    fn is_reference(&self, _model: &str, _value: &Value) -> bool {
        false
    }
}

/// Where a keyword is being evaluated.
pub struct KeywordContext<'a> {
    pub data: &'a Value,
    pub data_path: &'a str,
    pub parent_data: Option<&'a Value>,
    pub parent_property: Option<&'a str>,
    pub root_data: &'a Value,
    pub models: &'a dyn ModelLookup,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeywordKind {
    /// Expands at compile time into plain schema fragments.
    Macro,
    /// Runs against the data during validation.
    Validate,
}

pub trait Keyword: Send + Sync {
    fn keyword(&self) -> &'static str;

    fn kind(&self) -> KeywordKind;

    /// Shape of the keyword's own configuration value.
    fn meta_schema(&self) -> Value;

    /// JSON type the keyword applies to; other data skips it.
    fn data_type(&self) -> Option<&'static str> {
        None
    }

    /// Participates in validation but is left out of generated documentation.
    fn silent(&self) -> bool {
        false
    }

    fn documented(&self) -> bool {
        !self.silent()
    }

    /// Errors returned by `validate` are reported as-is instead of one generic error.
    fn full_errors(&self) -> bool {
        false
    }

    /// Reads the parent object or the root document, so it is checked against the located
    /// data after the core pass rather than inside the core validator.
    fn contextual(&self) -> bool {
        false
    }

    /// Extra compile-time checks beyond the meta-schema.
    fn prepare(&self, _config: &Value) -> Result<(), SchemaCompileError> {
        Ok(())
    }

    fn expand(&self, _config: &Value, _schemas: &SchemaRegistry) -> Result<Value, SchemaCompileError> {
        Ok(Value::Object(Map::new()))
    }

    fn validate(&self, _config: &Value, _ctx: &KeywordContext<'_>) -> Result<(), Vec<SchemaError>> {
        Ok(())
    }
}

/// Function referenced by name from a `validate` keyword. The returned value is
/// interpreted as: string = error message, array = raw errors, anything else = truthiness.
pub type ValidatorFn = Arc<dyn Fn(&KeywordContext<'_>) -> Value + Send + Sync>;

#[derive(Clone, Default)]
pub struct ValidatorFunctions {
    functions: BTreeMap<String, ValidatorFn>,
}

impl ValidatorFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&KeywordContext<'_>) -> Value + Send + Sync + 'static,
    {
        self.functions.insert(name.to_string(), Arc::new(f));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ValidatorFn> {
        self.functions.get(name)
    }
}

/// The keywords known to a validator, by name.
#[derive(Clone, Default)]
pub struct KeywordSet {
    keywords: BTreeMap<&'static str, Arc<dyn Keyword>>,
}

impl KeywordSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// `$extend`, `instanceof`, `range`, `reference`, `relate` and `validate`.
    pub fn standard(functions: ValidatorFunctions) -> Self {
        use crate::schema::keywords::*;
        Self::empty()
            .with(ExtendKeyword)
            .with(InstanceofKeyword)
            .with(RangeKeyword)
            .with(ReferenceKeyword)
            .with(RelateKeyword)
            .with(ValidateKeyword::new(functions))
    }

    pub fn with<K: Keyword + 'static>(mut self, keyword: K) -> Self {
        self.keywords.insert(keyword.keyword(), Arc::new(keyword));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Keyword>> {
        self.keywords.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.keywords.keys().copied()
    }
}
