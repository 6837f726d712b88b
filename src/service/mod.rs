//! Query execution and request-bound model operations.

mod crud;
mod model;
pub use crud::CrudService;
pub use model::BoundModel;
