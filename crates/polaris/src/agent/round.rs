use crate::models::message::Message;
use crate::models::tool::ToolCall;
use crate::providers::base::ToolCallDelta;

/// The finish reason a model gives when it wants tools run
pub const TOOL_CALLS_FINISH_REASON: &str = "tool_calls";

/// What one round of streaming has produced so far
///
/// Tool calls live in an ordered list of slots. A fragment with an id opens
/// (or reopens) a slot and makes it current; a fragment without one extends the
/// current slot. Continuations that interleave across calls are not supported:
/// they always land on whichever call was opened last.
#[derive(Debug, Default)]
pub struct RoundState {
    content: String,
    slots: Vec<ToolCall>,
    current: Option<usize>,
    finish_reason: Option<String>,
}

impl RoundState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&mut self, text: &str) {
        self.content.push_str(text);
    }

    /// Merge one tool call fragment; returns false if it had nowhere to go
    pub fn merge(&mut self, delta: ToolCallDelta) -> bool {
        match delta.id {
            Some(id) => {
                match self.slots.iter().position(|slot| slot.id == id) {
                    Some(index) => {
                        self.current = Some(index);
                        self.append(index, &delta.name, &delta.arguments);
                    }
                    None => {
                        self.slots
                            .push(ToolCall::new(id, delta.name, delta.arguments));
                        self.current = Some(self.slots.len() - 1);
                    }
                }
                true
            }
            None => match self.current {
                Some(index) => {
                    self.append(index, &delta.name, &delta.arguments);
                    true
                }
                None => false,
            },
        }
    }

    fn append(&mut self, index: usize, name: &str, arguments: &str) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.function.name.push_str(name);
            slot.function.arguments.push_str(arguments);
        }
    }

    pub fn finish<S: Into<String>>(&mut self, reason: S) {
        self.finish_reason.get_or_insert_with(|| reason.into());
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    /// The model asked for tools and at least one call was assembled
    pub fn requests_tools(&self) -> bool {
        self.finish_reason() == Some(TOOL_CALLS_FINISH_REASON) && !self.slots.is_empty()
    }

    /// Freeze the round into the assistant turn that goes into history
    pub fn into_message(self) -> Message {
        let message = Message::assistant(self.content.clone());
        if self.requests_tools() {
            message.with_tool_calls(self.slots)
        } else {
            message
        }
    }
}
