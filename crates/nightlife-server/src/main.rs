mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderValue, Method, header::CONTENT_TYPE};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use nightlife_api::auth::{AppState, AppStateInner};
use nightlife_api::provider::YelpClient;
use nightlife_api::search::SearchSettings;
use nightlife_api::session::{self, SessionStore};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nightlife=debug,nightlife_api=debug,nightlife_db=info,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    config.log_summary();

    // Init database
    let db = Arc::new(nightlife_db::Database::open(&config.db_path)?);

    let sessions = SessionStore::new(chrono::Duration::hours(config.session_ttl_hours));
    tokio::spawn(session::run_expiry_loop(sessions.clone(), config.session_sweep_secs));

    let provider = Arc::new(YelpClient::new(
        config.yelp_api_key.clone(),
        config.yelp_api_url.clone(),
        config.upstream_timeout,
    )?);

    let app_state: AppState = Arc::new(AppStateInner::new(
        db,
        sessions,
        provider,
        SearchSettings {
            limit: config.search_limit,
            sort_by_distance: true,
            timeout: config.upstream_timeout,
        },
        config.cookie_secure,
    ));

    // Cookies only travel cross-origin with an explicit origin + credentials
    let cors = CorsLayer::new()
        .allow_origin(config.client_origin.parse::<HeaderValue>()?)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .allow_credentials(true);

    let app = nightlife_api::router(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Nightlife server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Could not install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
