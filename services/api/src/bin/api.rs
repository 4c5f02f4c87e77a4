//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{MailBridgeSource, PgLedgerStore},
    config::Config,
    error::ApiError,
    web::{self, middleware::identity_pattern, middleware::IDENTITY_HEADER, rest::ApiDoc, AppState},
};
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderName, HeaderValue, Method,
};
use axum::Router;
use inbox_triage_core::ports::{LedgerStore, SystemClock};
use inbox_triage_core::{InMemoryLedgerStore, RewardEngine, UnlockFeed};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Pick the Ledger Store ---
    let store: Arc<dyn LedgerStore> = match &config.database_url {
        Some(url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
            let db_store = PgLedgerStore::new(db_pool);
            info!("Running database migrations...");
            db_store.run_migrations().await?;
            info!("Database migrations complete.");
            Arc::new(db_store)
        }
        None => {
            warn!("DATABASE_URL is not set; progress is kept in memory only.");
            Arc::new(InMemoryLedgerStore::new())
        }
    };

    // --- 3. Initialize Service Adapters ---
    let source = Arc::new(MailBridgeSource::new(
        &config.mail_bridge_url,
        config.mail_bridge_token.as_deref(),
    )?);
    let identity_pattern =
        identity_pattern().map_err(|e| ApiError::Internal(format!("identity pattern: {e}")))?;

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        store,
        source,
        clock: Arc::new(SystemClock),
        engine: RewardEngine::new(UnlockFeed::default()),
        config: config.clone(),
        identity_pattern,
    });

    let origin = "http://localhost:3000"
        .parse::<HeaderValue>()
        .map_err(|e| ApiError::Internal(format!("CORS origin: {e}")))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT, HeaderName::from_static(IDENTITY_HEADER)]);

    // --- 5. Create the Web Router ---
    let app = Router::new()
        .merge(web::router(app_state).layer(cors))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
