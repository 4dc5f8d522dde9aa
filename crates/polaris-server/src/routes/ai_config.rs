use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use polaris::models::message::Message;
use polaris::providers::{
    configs::{AiConfig, DEFAULT_ENDPOINT, DEFAULT_MODEL, MASKED_API_KEY},
    factory,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const TEST_PROMPT: &str = "Hi, reply with just 'ok'.";
const TEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConnectionTestRequest {
    provider: String,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ConnectionTestResponse {
    success: bool,
    message: String,
}

fn keeps_stored_key(api_key: &str) -> bool {
    api_key.is_empty() || api_key == MASKED_API_KEY
}

async fn get_config(State(state): State<AppState>) -> Json<AiConfig> {
    Json(state.ai_config().await.masked())
}

async fn update_config(
    State(state): State<AppState>,
    payload: Result<Json<AiConfig>, JsonRejection>,
) -> Result<Json<AiConfig>, ApiError> {
    let Json(mut update) =
        payload.map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))?;
    update
        .provider_type()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let mut config = state.ai_config.write().await;
    if update.api_key == MASKED_API_KEY {
        update.api_key = config.api_key.clone();
    }
    *config = update;

    tracing::info!(
        provider = %config.provider,
        endpoint = %config.endpoint,
        model = %config.model,
        enabled = config.enabled,
        "AI config updated"
    );
    Ok(Json(config.masked()))
}

async fn test_connection(
    State(state): State<AppState>,
    payload: Result<Json<ConnectionTestRequest>, JsonRejection>,
) -> Result<Json<ConnectionTestResponse>, ApiError> {
    let Json(request) =
        payload.map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))?;
    let stored = state.ai_config().await;

    let api_key = if keeps_stored_key(&request.api_key) {
        stored.api_key.clone()
    } else {
        request.api_key
    };
    if api_key.is_empty() {
        return Err(ApiError::BadRequest("An API key is required".to_string()));
    }

    let or_default = |value: String, default: &str| {
        if value.trim().is_empty() {
            default.to_string()
        } else {
            value
        }
    };
    let config = AiConfig {
        provider: or_default(request.provider, &stored.provider),
        endpoint: or_default(request.endpoint, DEFAULT_ENDPOINT),
        api_key,
        model: or_default(request.model, DEFAULT_MODEL),
        enabled: true,
    };

    let provider = factory::get_provider(&config, state.chat.channel_capacity)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let outcome = tokio::time::timeout(
        TEST_TIMEOUT,
        provider.complete(&[Message::user(TEST_PROMPT)]),
    )
    .await;
    let response = match outcome {
        Ok(Ok(_)) => ConnectionTestResponse {
            success: true,
            message: "Connection succeeded".to_string(),
        },
        Ok(Err(e)) => {
            tracing::warn!(error = %e, endpoint = %config.endpoint, "AI connection test failed");
            ConnectionTestResponse {
                success: false,
                message: format!("Connection failed: {}", e),
            }
        }
        Err(_) => ConnectionTestResponse {
            success: false,
            message: "Connection failed: timed out".to_string(),
        },
    };
    Ok(Json(response))
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/ai/config", get(get_config).put(update_config))
        .route("/ai/config/test", post(test_connection))
        .with_state(state)
}
