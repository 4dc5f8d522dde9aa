use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::errors::ProviderError;
use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::providers::base::{ChatStream, Provider, StreamEvent, ToolCallDelta};

type Script = Box<dyn Fn(usize) -> Result<Vec<StreamEvent>, ProviderError> + Send + Sync>;

/// A mock provider that replays pre-configured rounds, for testing
pub struct MockProvider {
    script: Script,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl MockProvider {
    /// Replay `rounds` in order, then answer every further round with an empty stop
    pub fn new(rounds: Vec<Vec<StreamEvent>>) -> Self {
        let rounds = Mutex::new(VecDeque::from(rounds));
        Self::from_fn(move |_| {
            let next = rounds.lock().ok().and_then(|mut rounds| rounds.pop_front());
            Ok(next.unwrap_or_else(|| text_round("")))
        })
    }

    /// Build each round's events from its zero-based index
    pub fn from_fn<F>(script: F) -> Self
    where
        F: Fn(usize) -> Result<Vec<StreamEvent>, ProviderError> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// The message history sent with every round so far
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

/// A round that streams `text` and stops
pub fn text_round(text: &str) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    if !text.is_empty() {
        events.push(StreamEvent::Text(text.to_string()));
    }
    events.push(StreamEvent::Finish("stop".to_string()));
    events.push(StreamEvent::Done);
    events
}

/// A round that asks for a single tool call
pub fn tool_round(id: &str, name: &str, arguments: &str) -> Vec<StreamEvent> {
    vec![
        StreamEvent::ToolCall(ToolCallDelta {
            id: Some(id.to_string()),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }),
        StreamEvent::Finish("tool_calls".to_string()),
        StreamEvent::Done,
    ]
}

#[async_trait]
impl Provider for MockProvider {
    async fn stream(
        &self,
        messages: &[Message],
        _tools: &[Tool],
        cancel: &CancellationToken,
    ) -> Result<ChatStream, ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        let round = match self.requests.lock() {
            Ok(mut requests) => {
                requests.push(messages.to_vec());
                requests.len() - 1
            }
            Err(_) => 0,
        };
        Ok(ChatStream::from_events((self.script)(round)?))
    }

    async fn complete(&self, _messages: &[Message]) -> Result<Message, ProviderError> {
        Ok(Message::assistant("ok"))
    }
}
