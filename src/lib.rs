//! schemaweb: declarative-schema web framework on PostgreSQL. Models are declared as JSON,
//! compiled into relations and validators, and served through a transaction-scoped
//! request pipeline.

pub mod case;
pub mod config;
pub mod error;
pub mod events;
pub mod extractors;
pub mod handlers;
pub mod model;
pub mod pipeline;
pub mod relation;
pub mod response;
pub mod routes;
pub mod schema;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;

pub use config::{load_models_from_dir, parse_models, ModelConfig, Settings};
pub use error::{AppError, ConfigError, RelationError, ValidationError};
pub use handlers::ModelController;
pub use model::ModelRegistry;
pub use pipeline::{pipeline_router, Action, ActionMetadata, Pipeline, RequestContext, RouteTable};
pub use response::Reply;
pub use routes::common_routes;
pub use schema::{KeywordSet, ValidatorFunctions};
pub use service::{BoundModel, CrudService};
pub use state::AppState;
pub use store::{ensure_database_exists, ensure_session_table};
