use school_portal::{
    AppState,
    config::{AppConfig, Env},
    create_router, notify,
    repository::{PostgresRepository, RepositoryState},
    tokens::TokenIssuer,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Loads configuration, sets up logging, connects and migrates the database, then
/// serves the API.
#[tokio::main]
async fn main() {
    // 1. Configuration (fail-fast on missing production secrets)
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging: RUST_LOG wins, otherwise sensible local defaults.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "school_portal=debug,tower_http=info,axum=trace".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 3. Token issuer: secrets are checked once, here.
    let tokens = TokenIssuer::from_config(&config)
        .expect("FATAL: Token secrets are missing or identical. Check ACCESS_TOKEN_SECRET and REFRESH_TOKEN_SECRET.");

    // 4. Database
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.db_url)
        .await
        .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("FATAL: Database migrations failed.");
    tracing::info!("Database connected and migrated.");

    let repo = Arc::new(PostgresRepository::new(pool)) as RepositoryState;

    // 5. Notifications (disabled without BOT_TOKEN/CHAT_ID)
    if config.telegram.is_none() {
        tracing::info!("Telegram notifications disabled.");
    }
    let notifier = notify::from_config(config.telegram.as_ref());

    // 6. Unified State Assembly
    let bind_addr = config.bind_addr();
    let app_state = AppState {
        repo,
        tokens: Arc::new(tokens),
        notifier,
        config,
    };

    // 7. Router and Server Startup
    let app = create_router(app_state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("FATAL: Could not bind {bind_addr}: {e}"));

    tracing::info!("Listening on {}", bind_addr);
    tracing::info!("API Documentation (Swagger UI) available at: http://{}/swagger-ui", bind_addr);

    axum::serve(listener, app).await.expect("HTTP server terminated unexpectedly");
}
