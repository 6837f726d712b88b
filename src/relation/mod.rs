//! Relation compilation and eager expression handling.

mod eager;
mod expression;
mod kind;
mod resolver;

pub use eager::{EagerScopeResolver, RelationGraph};
pub use expression::RelationExpression;
pub use kind::RelationKind;
pub use resolver::{split_column, JoinSpec, ModelCatalog, Modify, RelationDefinition, RelationResolver, ThroughSpec};
