//! Shared state for the plain axum routes mounted next to the pipeline.

use crate::model::ModelRegistry;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// Absent when the server runs without `DATABASE_URL`.
    pub pool: Option<PgPool>,
    pub registry: Arc<ModelRegistry>,
}
