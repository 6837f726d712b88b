//! Standalone server: loads model configs from `MODELS_PATH`, mounts the generated model
//! routes behind the request pipeline and serves them next to the common routes.

use schemaweb::config::SessionBackend;
use schemaweb::pipeline::{MemorySessionStore, PgSessionStore, PgTransactionSource, SessionStore};
use schemaweb::{
    common_routes, ensure_database_exists, ensure_session_table, load_models_from_dir, pipeline_router, AppState,
    KeywordSet, ModelController, ModelRegistry, Pipeline, RouteTable, Settings, ValidatorFunctions,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("schemaweb=info")),
        )
        .init();

    let database_url = settings
        .database_url
        .clone()
        .ok_or("DATABASE_URL is required")?;
    ensure_database_exists(&database_url).await?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    let configs = load_models_from_dir(&settings.models_path).await?;
    let registry = Arc::new(ModelRegistry::compile(&configs, KeywordSet::standard(ValidatorFunctions::new()))?);
    let actions = registry.models().flat_map(ModelController::routes).collect::<Vec<_>>();
    let routes = RouteTable::compile(actions, &registry)?;
    tracing::info!(models = configs.len(), routes = routes.routes().len(), "models compiled");

    let mut builder = Pipeline::builder(registry.clone(), routes, Arc::new(PgTransactionSource::new(pool.clone())))
        .pool(pool.clone())
        .timeout_ms(settings.request_timeout_ms);
    let store: Option<Arc<dyn SessionStore>> = match settings.session_store {
        SessionBackend::None => None,
        SessionBackend::Memory => Some(Arc::new(MemorySessionStore::new())),
        SessionBackend::Postgres => {
            ensure_session_table(&pool).await?;
            Some(Arc::new(PgSessionStore::new(pool.clone())))
        }
    };
    if let Some(store) = store {
        builder = builder.session_store(store, settings.session_auto_commit);
    }
    let pipeline = Arc::new(builder.build());
    pipeline.on_error(|err, ctx| {
        if !err.is_structured() {
            tracing::warn!(request = %ctx.id, method = %ctx.method, path = %ctx.path, "unhandled error");
        }
    });

    let state = AppState {
        pool: Some(pool),
        registry,
    };
    let app = common_routes(state)
        .merge(pipeline_router(pipeline))
        .layer(RequestBodyLimitLayer::new(settings.body_limit_bytes));

    let listener = TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
