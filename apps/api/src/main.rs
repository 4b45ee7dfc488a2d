use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{error, info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use priority_board_cell::{BoardEngine, EngineConfig, HttpBoardPersistence};
use shared_config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting priority board API server");

    let config = AppConfig::from_env();

    let persistence = Arc::new(HttpBoardPersistence::new(&config)?);
    let engine = Arc::new(BoardEngine::new(EngineConfig::from(&config), persistence));

    // Initial load; the board stays empty until the next reconcile if this fails
    match engine.hydrate().await {
        Ok(outcome) => info!("Board hydrated: {:?}", outcome),
        Err(e) => error!("Initial board load failed: {}", e),
    }

    let _realtime = engine.start_realtime();
    let _undo_expiry = engine.spawn_undo_expiry(Duration::from_secs(1));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router::create_router(engine)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
