use std::sync::Arc;

use axum::{
    Extension,
    http::{
        HeaderValue, Method, StatusCode,
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    },
    response::IntoResponse,
};
use pollx_backend::{
    auth::TokenVerifier,
    config::Config,
    db::{MemoryPollStore, PgPollStore, SharedStore, get_pool_stats, init_db},
    routes::router,
    startup::{AppState, spawn_health_check},
    watcher::DatabaseWatcher,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tower_sessions::{
    Expiry, MemoryStore, SessionManagerLayer,
    cookie::{SameSite, time::Duration},
};
use tracing_subscriber::EnvFilter;

#[macro_use]
extern crate tracing;

#[tokio::main]
async fn main() {
    // RUST_LOG wins; otherwise info
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run().await {
        error!("server stopped: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    let store: SharedStore = match &config.database_url {
        Some(url) => {
            let pool = init_db(url, config.database_max_connections).await?;
            info!("connected to postgres, {}", get_pool_stats(&pool).await);
            Arc::new(PgPollStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set, using the in-memory store");
            Arc::new(MemoryPollStore::new())
        }
    };

    let app_state = AppState::new(
        store.clone(),
        config.broadcast_capacity,
        config.connection_buffer,
        config.ping_interval,
    );

    spawn_health_check(store.clone());
    DatabaseWatcher::new(store, app_state.broadcaster.clone(), config.watcher_retry).spawn();

    let allow_origin = match &config.cors_origin {
        Some(origin) => AllowOrigin::exact(origin.parse::<HeaderValue>()?),
        None => AllowOrigin::mirror_request(),
    };

    let session_store = MemoryStore::default();

    let mut app = router(app_state);
    match &config.jwt_secret {
        Some(secret) => app = app.layer(Extension(TokenVerifier::new(secret))),
        None => info!("JWT_SECRET not set, bearer tokens are disabled"),
    }

    let app = app
        .layer(
            CorsLayer::new()
                .allow_origin(allow_origin)
                .allow_credentials(true)
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers([CONTENT_TYPE, ACCEPT, AUTHORIZATION]),
        )
        .layer(
            SessionManagerLayer::new(session_store)
                .with_name("pollx")
                .with_same_site(SameSite::Lax)
                .with_secure(false)
                .with_expiry(Expiry::OnInactivity(Duration::seconds(
                    config.session_inactivity_secs,
                ))),
        )
        .layer(TraceLayer::new_for_http())
        .fallback(handler_404);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn handler_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "nothing to see here")
}
