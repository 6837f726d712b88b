//! Controllers producing pipeline actions.

pub mod model;

pub use model::ModelController;
