mod database;
mod error;
mod ledger;
mod lifecycle;
mod metrics;
mod middleware;
mod polls;
mod query;
mod realtime;
mod state;
mod types;
mod utils;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::SmartIpKeyExtractor;
use tower_governor::GovernorLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use database::constants::DEFAULT_DB_PATH;
use database::Database;
use state::AppState;
use utils::env_parse;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting poll service");

    let db_path = std::env::var("DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
    let db = Database::connect(&db_path).await?;
    info!("Database ready at {}", db_path);

    let metrics_token = std::env::var("METRICS_AUTH_TOKEN")
        .ok()
        .filter(|token| !token.is_empty());
    if metrics_token.is_none() {
        info!("METRICS_AUTH_TOKEN unset; /admin/stats will refuse all requests");
    }

    let state = AppState::new(db.pool().clone(), metrics_token);

    let sweep_interval = env_parse("SWEEP_INTERVAL_SECS", lifecycle::DEFAULT_SWEEP_INTERVAL_SECS);
    tokio::spawn(lifecycle::run(state.pool.clone(), sweep_interval));

    // Per-IP limit on vote submission. Reads and the socket stay open.
    let refill_ms: u64 = env_parse("VOTE_RATE_REFILL_MS", 100);
    let burst: u32 = env_parse("VOTE_RATE_BURST", 30);
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(SmartIpKeyExtractor)
            .per_millisecond(refill_ms.max(1))
            .burst_size(burst.max(1))
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limiter configuration"))?,
    );
    let limiter = governor_config.limiter().clone();
    tokio::spawn(async move {
        // Evict stale per-IP entries so the limiter map stays bounded.
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            limiter.retain_recent();
        }
    });

    let app = Router::new()
        .route("/healthz", get(health_check))
        .route(
            "/polls",
            get(polls::handle_list_polls).post(polls::handle_create_poll),
        )
        .route("/polls/expired", get(polls::handle_list_expired))
        .route(
            "/polls/vote",
            post(polls::handle_vote).layer(GovernorLayer {
                config: governor_config,
            }),
        )
        .route("/ws", get(realtime::handle_socket_upgrade))
        .route("/admin/stats", get(metrics::handle_admin_stats))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(axum::middleware::from_fn(middleware::inject_client_ip)),
        )
        .with_state(state);

    let port: u16 = env_parse("PORT", 3000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
