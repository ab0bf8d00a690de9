use crate::{handlers, AppConfig, ServerConfig};
use anyhow::Context;
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use bloom_agent::Orchestrator;
use bloom_common::{BloomError, Result};
use bloom_store::{MemoryUserStore, SqliteUserStore, UserStore};
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub cors_origins: Vec<String>,
    pub frontend_url: String,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, server: &ServerConfig) -> Self {
        Self {
            orchestrator,
            cors_origins: server.cors_origins.clone(),
            frontend_url: server.frontend_url.clone(),
        }
    }
}

/// Wire the LLM client, the user store and the agents from configuration.
pub fn build_orchestrator(config: &AppConfig) -> Result<Orchestrator> {
    let llm = bloom_llm::create_provider(&config.llm)
        .map_err(|e| BloomError::Config(format!("{:#}", e)))?;
    info!("Using {} provider with model {}", llm.name(), config.llm.model);

    let store: Arc<dyn UserStore> = match &config.db_path {
        Some(path) => Arc::new(SqliteUserStore::open(path)?.with_history_limit(config.history_limit)),
        None => {
            info!("BLOOM_DB_PATH not set, keeping users in memory");
            Arc::new(MemoryUserStore::with_history_limit(config.history_limit))
        }
    };

    Ok(Orchestrator::new(llm, store).with_routing_strategy(config.routing))
}

pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.cors_origins);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/chat", post(handlers::chat))
        .route("/basicquery", post(handlers::basic_query))
        .route("/consultation", post(handlers::consultation))
        .route("/exercise", post(handlers::exercise))
        .route("/diet", post(handlers::diet))
        .route("/profile", post(handlers::register_profile))
        .route(
            "/history/:user_id",
            get(handlers::history).delete(handlers::clear_history),
        )
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(allowed))
}

pub async fn serve(state: AppState, server: &ServerConfig) -> anyhow::Result<()> {
    let address = server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;

    info!("Bloom backend listening on http://{}", address);
    info!("CORS origins: {}", server.cors_origins.join(", "));

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
