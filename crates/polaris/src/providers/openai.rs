use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::base::{ChatStream, Provider, StreamEvent};
use super::configs::AiConfig;
use super::sse::{parse_line, ChatChunk, LineDecoder, SseLine, MAX_LINE_BYTES};
use crate::errors::ProviderError;
use crate::models::message::Message;
use crate::models::tool::Tool;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

pub struct OpenAiProvider {
    client: Client,
    config: AiConfig,
    channel_capacity: usize,
}

impl OpenAiProvider {
    pub fn new(config: AiConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            config,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        })
    }

    /// Bound the queue between the network reader and the consumer
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    fn url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        )
    }

    fn payload(&self, messages: &[Message], tools: &[Tool], stream: bool) -> Value {
        let mut payload = json!({
            "model": self.config.model,
            "messages": messages,
            "stream": stream,
        });
        if !tools.is_empty() {
            if let Some(object) = payload.as_object_mut() {
                let tools: Vec<Value> = tools.iter().map(Tool::to_openai_spec).collect();
                object.insert("tools".to_string(), json!(tools));
            }
        }
        payload
    }

    async fn post(&self, payload: &Value, accept: &str) -> Result<Response, ProviderError> {
        let response = self
            .client
            .post(self.url())
            .header(AUTHORIZATION, format!("Bearer {}", self.config.api_key))
            .header(ACCEPT, accept)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            // Keep the body verbatim, it usually says what went wrong
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

/// Reads the response body and feeds parsed events into the queue
struct Producer {
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
    finished: bool,
}

enum Flow {
    Continue,
    Stop,
}

impl Producer {
    async fn run(mut self, response: Response) {
        let mut body = response.bytes_stream();
        let mut decoder = LineDecoder::new(MAX_LINE_BYTES);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                next = body.next() => next,
            };
            let bytes = match next {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    self.send(StreamEvent::Error(ProviderError::Stream(e.to_string())))
                        .await;
                    return;
                }
                None => break,
            };
            let lines = match decoder.push(&bytes) {
                Ok(lines) => lines,
                Err(e) => {
                    self.send(StreamEvent::Error(e)).await;
                    return;
                }
            };
            for line in lines {
                if let Flow::Stop = self.handle_line(&line).await {
                    return;
                }
            }
        }

        if let Some(line) = decoder.finish() {
            if let Flow::Stop = self.handle_line(&line).await {
                return;
            }
        }
        self.send(StreamEvent::Done).await;
    }

    async fn handle_line(&mut self, line: &str) -> Flow {
        let payload = match parse_line(line) {
            None => return Flow::Continue,
            Some(SseLine::Done) => {
                self.send(StreamEvent::Done).await;
                return Flow::Stop;
            }
            Some(SseLine::Data(payload)) => payload,
        };

        let chunk = match ChatChunk::parse(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(error = %e, payload, "skipping malformed stream chunk");
                return Flow::Continue;
            }
        };

        for event in chunk.into_events() {
            if let StreamEvent::Finish(_) = event {
                if self.finished {
                    continue;
                }
                self.finished = true;
            }
            if !self.send(event).await {
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    /// Blocks while the queue is full; false once nobody is listening
    async fn send(&self, event: StreamEvent) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: Message,
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn stream(
        &self,
        messages: &[Message],
        tools: &[Tool],
        cancel: &CancellationToken,
    ) -> Result<ChatStream, ProviderError> {
        let payload = self.payload(messages, tools, true);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            response = self.post(&payload, "text/event-stream") => response?,
        };

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let producer = cancel.child_token();
        tokio::spawn(
            Producer {
                tx,
                cancel: producer.clone(),
                finished: false,
            }
            .run(response),
        );

        Ok(ChatStream::new(rx, producer))
    }

    async fn complete(&self, messages: &[Message]) -> Result<Message, ProviderError> {
        let payload = self.payload(messages, &[], false);
        let response = self.post(&payload, "application/json").await?;
        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| ProviderError::Malformed("LLM returned no choices".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tool::Tool;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse(chunks: &[&str]) -> String {
        chunks
            .iter()
            .map(|chunk| format!("data: {}\n\n", chunk))
            .collect()
    }

    async fn setup_mock_server(template: ResponseTemplate) -> (MockServer, OpenAiProvider) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test_api_key"))
            .respond_with(template)
            .mount(&mock_server)
            .await;

        let config = AiConfig {
            endpoint: format!("{}/v1/", mock_server.uri()),
            api_key: "test_api_key".to_string(),
            model: "gpt-4o".to_string(),
            enabled: true,
            ..AiConfig::default()
        };
        let provider = OpenAiProvider::new(config).unwrap();
        (mock_server, provider)
    }

    fn event_stream(body: String) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/event-stream")
            .set_body_string(body)
    }

    async fn collect(provider: &OpenAiProvider) -> Vec<StreamEvent> {
        let cancel = CancellationToken::new();
        let stream = provider
            .stream(&[Message::user("hello")], &[], &cancel)
            .await
            .unwrap();
        stream.collect().await
    }

    #[tokio::test]
    async fn test_stream_text_and_finish() {
        let body = sse(&[
            r#"{"choices":[{"delta":{"role":"assistant","content":"Hel"}}]}"#,
            r#"{"choices":[{"delta":{"content":"lo"}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            "[DONE]",
        ]);
        let (_server, provider) = setup_mock_server(event_stream(body)).await;

        let events = collect(&provider).await;
        assert_eq!(events.len(), 4);
        assert!(matches!(&events[0], StreamEvent::Text(t) if t == "Hel"));
        assert!(matches!(&events[1], StreamEvent::Text(t) if t == "lo"));
        assert!(matches!(&events[2], StreamEvent::Finish(r) if r == "stop"));
        assert!(matches!(events[3], StreamEvent::Done));
    }

    #[tokio::test]
    async fn test_malformed_chunk_is_skipped() {
        let body = sse(&[
            r#"{"choices":[{"delta":{"content":"one"}}]}"#,
            r#"{"choices":[{"delta":{"content":"#,
            r#"{"choices":[{"delta":{"content":"two"}}]}"#,
        ]);
        let (_server, provider) = setup_mock_server(event_stream(body)).await;

        let events = collect(&provider).await;
        let texts: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["one", "two"]);
        assert!(!events.iter().any(|e| matches!(e, StreamEvent::Error(_))));
        // no sentinel, the end of the body still closes the stream
        assert!(matches!(events.last(), Some(StreamEvent::Done)));
    }

    #[tokio::test]
    async fn test_oversized_line_fails_stream() {
        let mut body = String::from("data: ");
        body.push_str(&"a".repeat(MAX_LINE_BYTES + 1));
        body.push_str("\n\n");
        let (_server, provider) = setup_mock_server(event_stream(body)).await;

        let events = collect(&provider).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Error(ProviderError::LineTooLong { limit })) if *limit == MAX_LINE_BYTES
        ));
        assert!(!events.iter().any(|e| matches!(e, StreamEvent::Done)));
    }

    #[tokio::test]
    async fn test_finish_reason_surfaced_once() {
        let body = sse(&[
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            "[DONE]",
        ]);
        let (_server, provider) = setup_mock_server(event_stream(body)).await;

        let events = collect(&provider).await;
        let finishes = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::Finish(_)))
            .count();
        assert_eq!(finishes, 1);
    }

    #[tokio::test]
    async fn test_error_status_captures_body() {
        let template = ResponseTemplate::new(401).set_body_string("{\"error\":\"bad key\"}");
        let (_server, provider) = setup_mock_server(template).await;

        let cancel = CancellationToken::new();
        let err = provider
            .stream(&[Message::user("hello")], &[], &cancel)
            .await
            .err()
            .unwrap();
        match err {
            ProviderError::Status { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "{\"error\":\"bad key\"}");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_payload() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("accept", "text/event-stream"))
            .and(body_partial_json(json!({
                "model": "gpt-4o",
                "stream": true,
                "messages": [{"role": "user", "content": "hello"}],
                "tools": [{"type": "function", "function": {"name": "list_nodes"}}],
            })))
            .respond_with(event_stream(sse(&["[DONE]"])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = OpenAiProvider::new(AiConfig {
            endpoint: mock_server.uri(),
            api_key: "k".to_string(),
            enabled: true,
            ..AiConfig::default()
        })
        .unwrap();
        let tool = Tool::new("list_nodes", "List nodes", json!({"type": "object"}));
        let cancel = CancellationToken::new();
        let events: Vec<StreamEvent> = provider
            .stream(&[Message::user("hello")], &[tool], &cancel)
            .await
            .unwrap()
            .collect()
            .await;
        assert!(matches!(&events[..], [StreamEvent::Done]));
    }

    #[tokio::test]
    async fn test_cancelled_before_open() {
        let (_server, provider) = setup_mock_server(event_stream(sse(&["[DONE]"]))).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = provider
            .stream(&[Message::user("hello")], &[], &cancel)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ProviderError::Cancelled));
    }

    #[tokio::test]
    async fn test_complete() {
        let template = ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-123",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "ok"},
                "finish_reason": "stop"
            }]
        }));
        let (_server, provider) = setup_mock_server(template).await;

        let message = provider.complete(&[Message::user("Hi")]).await.unwrap();
        assert_eq!(message.content, "ok");
    }
}
