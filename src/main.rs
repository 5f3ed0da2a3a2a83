//! Scan Orchestrator
//!
//! HTTP server that runs security scans through the orchestrator and exposes
//! scan history and remote job management.

use axum::{extract::Request, middleware::Next, response::Response};
use scan_orchestrator::agents::AgentRegistry;
use scan_orchestrator::api::{self, AppState};
use scan_orchestrator::config::Config;
use scan_orchestrator::executor::CliExecutor;
use scan_orchestrator::jobs::JobManager;
use scan_orchestrator::orchestrator::Orchestrator;
use scan_orchestrator::policy::{DecisionPolicy, GeminiPolicy, NoFollowUp, Recommender};
use scan_orchestrator::storage::SqliteStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

/// Request ID middleware - adds unique ID to each request for tracing
async fn request_id_middleware(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        uri = %uri,
    );

    let response = next.run(request).instrument(span).await;

    info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %response.status().as_u16(),
        duration_ms = start.elapsed().as_millis(),
        "Request completed"
    );

    response
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    info!("Configuration loaded: {:?}", config);

    let store = Arc::new(SqliteStore::connect(&config.persistence.database_url).await?);
    let registry = AgentRegistry::with_builtin_tools(CliExecutor::new(
        config.execution.tool_timeout_secs,
    ));
    let jobs = Arc::new(JobManager::from_env(config.k8s.namespace.as_str()));
    if config.k8s.enabled && !jobs.enabled() {
        tracing::warn!("USE_K8S_JOBS is set but no cluster is reachable; remote steps will fail");
    }

    let (policy, recommender): (Arc<dyn DecisionPolicy>, Arc<dyn Recommender>) =
        match &config.policy.gemini_api_key {
            Some(key) => {
                info!(model = %config.policy.gemini_model, "Using Gemini decision policy");
                let gemini = Arc::new(
                    GeminiPolicy::new(key.as_str())
                        .with_model(config.policy.gemini_model.as_str())
                        .with_allowed_agents(registry.names().to_vec()),
                );
                (gemini.clone() as Arc<dyn DecisionPolicy>, gemini as Arc<dyn Recommender>)
            }
            None => (Arc::new(NoFollowUp), Arc::new(NoFollowUp)),
        };

    let orchestrator = Orchestrator::new(
        Arc::new(registry),
        store,
        jobs,
        policy,
        config.orchestrator(),
    )?;
    let state = Arc::new(AppState::new(Arc::new(orchestrator)).with_recommender(recommender));

    let app = api::router(state)
        // Middleware (order matters - request_id should be first)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = config
        .server_addr()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid server address: {}", e))?;

    info!("Server running on http://{}", addr);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Handle graceful shutdown signals (Ctrl+C, SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}
