//! Schema validation on the `jsonschema` crate plus the custom keyword set
//! (`$extend`, `instanceof`, `range`, `reference`, `relate`, `validate`).

mod keyword;
pub mod keywords;
mod validator;

pub use keyword::{
    Keyword, KeywordContext, KeywordKind, KeywordSet, ModelLookup, NoModels, ValidatorFn, ValidatorFunctions,
};
pub use validator::{CompiledSchema, SchemaRegistry, Validator};
