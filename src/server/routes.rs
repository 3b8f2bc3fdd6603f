//! HTTP routes:
//! - GET /models
//! - POST /generate
//! - GET /health

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderValue;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{Config, ServerConfig};
use crate::error::{ApiError, RelayError};
use crate::server::streaming::fragments_to_response;
use crate::upstream::{PromptRequest, SharedUpstream};

/// Application state shared across handlers.
pub struct AppState {
    pub upstream: SharedUpstream,
    pub config: Arc<Config>,
}

/// Build the axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server);

    Router::new()
        .route("/models", get(list_models))
        .route("/generate", post(generate))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Any origin with credentials unless origins are listed explicitly.
fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let origin = if config.cors_allow_origins.is_empty() {
        AllowOrigin::mirror_request()
    } else {
        let origins = config
            .cors_allow_origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = %o, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect::<Vec<_>>();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

// ─── Response Types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub models: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn list_models(State(state): State<Arc<AppState>>) -> Result<Json<ModelsResponse>, ApiError> {
    let models = state
        .upstream
        .list_models()
        .await
        .map_err(|e| ApiError::new(e, "Failed to retrieve models"))?;
    Ok(Json(ModelsResponse { models }))
}

async fn generate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PromptRequest>,
) -> Result<Response, RelayError> {
    let request_id = Uuid::new_v4().to_string();
    let span = info_span!(
        "generate",
        request_id = %request_id,
        model = %req.model,
        upstream = state.upstream.name()
    );

    async move {
        info!(prompt_chars = req.prompt.chars().count(), "Generating text");
        let fragments = state.upstream.generate(&req).await?;
        Ok(fragments_to_response(fragments))
    }
    .instrument(span)
    .await
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "running".to_string(),
    })
}
