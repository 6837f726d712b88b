pub mod capability;
mod definition;
mod hooks;
mod registry;

pub use capability::{built_in, timestamps, Capability};
pub use definition::ModelDefinition;
pub use hooks::{HookEvent, ModelHook};
pub use registry::{ModelMetadata, ModelRegistry};

#[cfg(test)]
pub(crate) use registry::tests::{blog, blog_configs};
