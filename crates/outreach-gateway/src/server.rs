//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use outreach_channels::{HttpChannelAdapter, HttpContentProvider, HttpPostLookup};
use outreach_core::config::OutreachConfig;
use outreach_scheduler::{
    ActionDispatcher, BatchRunner, CadenceAutomation, CadenceDb, ContentResolver, ContentSettings,
};

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub config: OutreachConfig,
    pub start_time: std::time::Instant,
    pub db: Arc<CadenceDb>,
    /// Executes due schedules; one call per process-queue request.
    pub runner: Arc<BatchRunner>,
    pub automation: Arc<CadenceAutomation>,
}

impl AppState {
    /// Wire the engine against the HTTP collaborators named in `config`.
    pub fn new(config: OutreachConfig, db: Arc<CadenceDb>) -> Self {
        let provider = Arc::new(HttpContentProvider::new(&config.content));
        let adapter = Arc::new(HttpChannelAdapter::new(&config.channels));
        let posts = Arc::new(HttpPostLookup::new(&config.channels));

        let resolver = ContentResolver::new(
            provider,
            db.clone(),
            ContentSettings::from(&config.content),
        );
        let dispatcher = ActionDispatcher::new(adapter, posts);
        let runner = BatchRunner::new(
            db.clone(),
            resolver,
            dispatcher,
            db.clone(),
            config.queue.clone(),
        );
        let automation = CadenceAutomation::new(db.clone(), &config.queue);

        Self {
            config,
            start_time: std::time::Instant::now(),
            db,
            runner: Arc::new(runner),
            automation: Arc::new(automation),
        }
    }
}

/// Bearer token auth middleware for `/api/v1/*`.
async fn require_api_token(
    State(state): State<Arc<AppState>>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    // No token configured: open API
    let Some(expected) = state.config.gateway.api_token.as_deref().filter(|t| !t.is_empty()) else {
        return next.run(req).await;
    };

    let presented = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    if presented == expected {
        return next.run(req).await;
    }

    tracing::warn!(path = %req.uri().path(), "Rejected request without valid API token");
    super::routes::json_error(
        axum::http::StatusCode::UNAUTHORIZED,
        "Unauthorized: invalid or missing API token",
    )
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let cors_enabled = state.config.gateway.cors;
    let shared = Arc::new(state);

    // Protected routes: require the API token when one is configured
    let protected = Router::new()
        .route("/api/v1/process-queue", post(super::routes::process_queue))
        .route("/api/v1/cadences/{id}/leads", post(super::routes::enroll_lead))
        .route(
            "/api/v1/cadences/{id}/automation/start",
            post(super::routes::start_automation),
        )
        .route(
            "/api/v1/cadences/{id}/leads/{lead_id}/cancel",
            post(super::routes::cancel_lead),
        )
        .route("/api/v1/activity", get(super::routes::recent_activity))
        .route_layer(axum::middleware::from_fn_with_state(
            shared.clone(),
            require_api_token,
        ));

    let public = Router::new().route("/health", get(super::routes::health_check));

    let mut router = protected.merge(public);
    if cors_enabled {
        router = router.layer(
            CorsLayer::new()
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(Any)
                .max_age(std::time::Duration::from_secs(3600))
                .allow_origin(Any),
        );
    }
    router.layer(TraceLayer::new_for_http()).with_state(shared)
}

/// Start the HTTP server.
pub async fn start(state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.gateway.host, state.config.gateway.port);
    let auth = if state.config.gateway.api_token.is_some() {
        "bearer token"
    } else {
        "open"
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Outreach gateway listening on http://{} (auth: {})", addr, auth);
    axum::serve(listener, app).await?;
    Ok(())
}
