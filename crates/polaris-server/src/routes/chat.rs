use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::{stream::StreamExt, Stream};
use polaris::{
    agent::Agent,
    cluster::ClusterError,
    models::{message::Message, progress::ProgressEvent},
    providers::factory,
    tools::ClusterScope,
};
use serde::Deserialize;
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Header naming the user on whose behalf tools run
pub const ACTOR_HEADER: &str = "x-polaris-user";
const ANONYMOUS: &str = "anonymous";

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    messages: Vec<Message>,
}

// Server-sent events, one `event:`/`data:` pair per progress event
pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> Response {
        let body = Body::from_stream(self);
        (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            [("x-accel-buffering", "no")],
            body,
        )
            .into_response()
    }
}

struct ProgressFormatter;

impl ProgressFormatter {
    fn format(event: &ProgressEvent) -> String {
        format!("event: {}\ndata: {}\n\n", event.name(), event.data())
    }
}

fn actor(headers: &HeaderMap) -> String {
    headers
        .get(ACTOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(ANONYMOUS)
        .to_string()
}

async fn handler(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<SseResponse, ApiError> {
    let cluster_id: u64 = cluster_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid cluster id: {}", cluster_id)))?;

    let Json(request) =
        payload.map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))?;
    if request.messages.is_empty() {
        return Err(ApiError::BadRequest("Messages must not be empty".to_string()));
    }

    let ai_config = state.ai_config().await;
    ai_config
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let provider = factory::get_provider(&ai_config, state.chat.channel_capacity)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let cluster = state
        .clusters
        .get_cluster(cluster_id)
        .await
        .map_err(|e| match e {
            ClusterError::UnknownCluster(_) => ApiError::NotFound(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        })?;
    let scope = ClusterScope::new(cluster, actor(&headers));

    let agent = Agent::new(provider, state.executor.clone()).with_config(state.chat.agent_config());
    let heartbeat = state.chat.heartbeat();

    // Create channel for streaming
    let (tx, rx) = mpsc::channel(state.chat.channel_capacity.max(1));
    let stream = ReceiverStream::new(rx);

    tracing::info!(
        cluster_id,
        actor = %scope.actor,
        messages = request.messages.len(),
        "starting chat"
    );

    // Spawn task to handle streaming
    tokio::spawn(async move {
        let cancel = CancellationToken::new();
        let mut stream = agent.reply(scope, request.messages, cancel.clone());

        loop {
            match timeout(heartbeat, stream.next()).await {
                Ok(Some(event)) => {
                    if let Err(e) = tx.send(ProgressFormatter::format(&event)).await {
                        tracing::warn!("Error sending event through channel: {}", e);
                        cancel.cancel();
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    // Heartbeat, used to detect disconnected clients and then stop running tools
                    if tx.is_closed() {
                        tracing::info!(cluster_id, "client disconnected, cancelling chat");
                        cancel.cancel();
                        break;
                    }
                }
            }
        }
    });

    Ok(SseResponse::new(stream))
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/clusters/:cluster_id/ai/chat", post(handler))
        .with_state(state)
}
