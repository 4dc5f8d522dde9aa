use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

// Convert a configuration key like "ai.api_key" to its environment variable
pub fn to_env_var(field_path: &str) -> String {
    let mut env_var = String::from("POLARIS_");
    for (i, part) in field_path.split('.').enumerate() {
        if i > 0 {
            env_var.push_str("__");
        }
        env_var.push_str(&part.to_uppercase());
    }
    env_var
}

/// A non-streaming error response, rendered as `{"code", "message"}`
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = json!({
            "code": status.as_u16(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("ai.api_key"), "POLARIS_AI__API_KEY");
        assert_eq!(to_env_var("server.port"), "POLARIS_SERVER__PORT");
        assert_eq!(to_env_var("enabled"), "POLARIS_ENABLED");
    }

    #[tokio::test]
    async fn test_api_error_body() {
        let response = ApiError::NotFound("Cluster 9 does not exist".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["code"], 404);
        assert_eq!(body["message"], "Cluster 9 does not exist");
    }
}
