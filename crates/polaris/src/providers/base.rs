use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::errors::ProviderError;
use crate::models::message::Message;
use crate::models::tool::Tool;

/// One fragment of a tool call as it arrives on the wire
///
/// A fragment with an `id` opens a new call; one without continues the most
/// recently opened call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallDelta {
    pub id: Option<String>,
    pub name: String,
    pub arguments: String,
}

/// An incremental unit of a streamed completion
#[derive(Debug)]
pub enum StreamEvent {
    Text(String),
    ToolCall(ToolCallDelta),
    /// The model's finish reason, surfaced once per round
    Finish(String),
    /// The `[DONE]` sentinel or the end of the response body
    Done,
    Error(ProviderError),
}

/// The receiving half of a streamed completion
///
/// Events are produced by a background task into a bounded queue. Dropping the
/// stream cancels that task and closes the connection.
pub struct ChatStream {
    events: mpsc::Receiver<StreamEvent>,
    _guard: DropGuard,
}

impl ChatStream {
    pub fn new(events: mpsc::Receiver<StreamEvent>, producer: CancellationToken) -> Self {
        Self {
            events,
            _guard: producer.drop_guard(),
        }
    }

    /// A stream over a fixed list of events, with no producer behind it
    pub fn from_events(events: Vec<StreamEvent>) -> Self {
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            // capacity covers every event
            let _ = tx.try_send(event);
        }
        Self::new(rx, CancellationToken::new())
    }

    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }
}

impl Stream for ChatStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

/// Base trait for chat-completion providers
#[async_trait]
pub trait Provider: Send + Sync {
    /// Open one streamed completion
    ///
    /// Fails before any event is produced if the endpoint rejects the request.
    /// The returned stream ends without an error when `cancel` fires.
    async fn stream(
        &self,
        messages: &[Message],
        tools: &[Tool],
        cancel: &CancellationToken,
    ) -> Result<ChatStream, ProviderError>;

    /// A single non-streamed completion
    async fn complete(&self, messages: &[Message]) -> Result<Message, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_fixed_stream_preserves_order() {
        let stream = ChatStream::from_events(vec![
            StreamEvent::Text("a".into()),
            StreamEvent::Finish("stop".into()),
            StreamEvent::Done,
        ]);
        let events: Vec<StreamEvent> = stream.collect().await;
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], StreamEvent::Text(t) if t == "a"));
        assert!(matches!(&events[1], StreamEvent::Finish(r) if r == "stop"));
        assert!(matches!(events[2], StreamEvent::Done));
    }

    #[tokio::test]
    async fn test_drop_cancels_producer() {
        let (_tx, rx) = mpsc::channel(1);
        let producer = CancellationToken::new();
        let stream = ChatStream::new(rx, producer.clone());
        assert!(!producer.is_cancelled());
        drop(stream);
        assert!(producer.is_cancelled());
    }
}
