//! Settings API endpoint
//!
//! POST /image_endpoint configures the image generation service at runtime.

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::{ApiError, ApiResult, AppState};

/// Request payload for the image endpoint
#[derive(Debug, Deserialize)]
pub struct SetImageEndpointRequest {
    #[serde(default)]
    pub url: Option<String>,
}

/// Response payload for endpoint configuration
#[derive(Debug, Serialize, Deserialize)]
pub struct SetImageEndpointResponse {
    pub success: bool,
    pub endpoint: String,
}

/// POST /image_endpoint handler
///
/// **Request:** `{"url": "http://host:port/generate"}`
///
/// **Behavior:**
/// 1. Validate the URL (non-blank, http or https)
/// 2. Apply it to the image client (used by segments dispatched from now on)
/// 3. Write it back to the TOML file (best-effort)
///
/// **Errors:**
/// - 400 Bad Request: blank or non-http(s) URL
pub async fn set_image_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<SetImageEndpointRequest>,
) -> ApiResult<Json<SetImageEndpointResponse>> {
    let url = payload
        .url
        .ok_or_else(|| ApiError::BadRequest("url is required".to_string()))?;

    let generator = state.orchestrator.image_generator();
    generator.set_endpoint(&url)?;
    let endpoint = generator.endpoint().unwrap_or_default();

    if let Some(path) = state.config_path.clone() {
        let value = endpoint.clone();
        let sync = tokio::task::spawn_blocking(move || {
            crate::config::persist_image_endpoint(&path, &value)
        });
        if let Err(e) = sync.await {
            tracing::warn!(error = %e, "TOML sync task failed");
        }
    }

    Ok(Json(SetImageEndpointResponse {
        success: true,
        endpoint,
    }))
}

/// Build settings routes
pub fn settings_routes() -> Router<AppState> {
    Router::new().route("/image_endpoint", post(set_image_endpoint))
}
