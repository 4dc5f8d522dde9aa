//! Server-sent event framing for openai-style streamed completions
use serde::Deserialize;

use super::base::{StreamEvent, ToolCallDelta};
use crate::errors::ProviderError;

/// Longest line accepted from the stream
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

const DONE_SENTINEL: &str = "[DONE]";

/// Splits a byte stream into lines, holding at most one partial line
#[derive(Debug)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    limit: usize,
}

impl LineDecoder {
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            limit,
        }
    }

    /// Feed bytes in, get every line they complete
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, ProviderError> {
        let mut lines = Vec::new();
        for part in bytes.split_inclusive(|b| *b == b'\n') {
            if self.content_len(part) > self.limit {
                self.buffer.clear();
                return Err(ProviderError::LineTooLong { limit: self.limit });
            }
            self.buffer.extend_from_slice(part);
            if self.buffer.last() == Some(&b'\n') {
                lines.push(self.take_line());
            }
        }
        Ok(lines)
    }

    /// Length of the buffered line once `part` is appended, terminator excluded
    fn content_len(&self, part: &[u8]) -> usize {
        let mut len = self.buffer.len() + part.len();
        let mut tail = part;
        if let Some(rest) = tail.strip_suffix(b"\n") {
            len -= 1;
            tail = rest;
        }
        // a `\r` may end one chunk with its `\n` in the next
        let carriage_return = match tail.last() {
            Some(b) => *b == b'\r',
            None => part.len() == 1 && self.buffer.last() == Some(&b'\r'),
        };
        if carriage_return {
            len -= 1;
        }
        len
    }

    /// Whatever is left once the body ends
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.take_line())
        }
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.buffer)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        self.buffer.clear();
        line
    }
}

/// What a single SSE line carries
#[derive(Debug, PartialEq, Eq)]
pub enum SseLine<'a> {
    Data(&'a str),
    Done,
}

/// Only `data:` lines matter; comments, blank lines and other fields are skipped
pub fn parse_line(line: &str) -> Option<SseLine<'_>> {
    let payload = line.strip_prefix("data:")?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);
    if payload.trim() == DONE_SENTINEL {
        Some(SseLine::Done)
    } else if payload.trim().is_empty() {
        None
    } else {
        Some(SseLine::Data(payload))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChunkDelta {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChunkToolCall {
    pub id: Option<String>,
    pub function: Option<ChunkFunction>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChunkFunction {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

impl ChatChunk {
    pub fn parse(payload: &str) -> Result<Self, ProviderError> {
        serde_json::from_str(payload).map_err(|e| ProviderError::Malformed(e.to_string()))
    }

    /// Expand the first choice into ordered events: text, tool-call
    /// fragments, then the finish reason
    pub fn into_events(self) -> Vec<StreamEvent> {
        let Some(choice) = self.choices.into_iter().next() else {
            return Vec::new();
        };

        let mut events = Vec::new();
        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            events.push(StreamEvent::Text(text));
        }
        for call in choice.delta.tool_calls.unwrap_or_default() {
            let function = call.function.unwrap_or_default();
            events.push(StreamEvent::ToolCall(ToolCallDelta {
                id: call.id.filter(|id| !id.is_empty()),
                name: function.name.unwrap_or_default(),
                arguments: function.arguments.unwrap_or_default(),
            }));
        }
        if let Some(reason) = choice.finish_reason.filter(|r| !r.is_empty()) {
            events.push(StreamEvent::Finish(reason));
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_reassembles_split_lines() {
        let mut decoder = LineDecoder::new(MAX_LINE_BYTES);
        assert!(decoder.push(b"data: {\"a\"").unwrap().is_empty());
        let lines = decoder.push(b":1}\r\n\ndata: [DO").unwrap();
        assert_eq!(lines, vec!["data: {\"a\":1}".to_string(), String::new()]);
        assert!(decoder.push(b"NE]").unwrap().is_empty());
        assert_eq!(decoder.finish(), Some("data: [DONE]".to_string()));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_decoder_line_ceiling() {
        let mut decoder = LineDecoder::new(8);
        assert!(decoder.push(b"data: 12\n").is_ok());
        assert!(matches!(
            decoder.push(b"data: 123456"),
            Err(ProviderError::LineTooLong { limit: 8 })
        ));
    }

    #[test]
    fn test_decoder_rejects_complete_long_line() {
        let mut decoder = LineDecoder::new(MAX_LINE_BYTES);
        let mut line = b"data: ".to_vec();
        line.extend(std::iter::repeat(b'a').take(3 * MAX_LINE_BYTES));
        line.push(b'\n');
        assert!(matches!(
            decoder.push(&line),
            Err(ProviderError::LineTooLong { .. })
        ));

        // the tail of a partial line can push it over too
        let mut decoder = LineDecoder::new(8);
        assert!(decoder.push(b"data: 1").unwrap().is_empty());
        assert!(matches!(
            decoder.push(b"234567890123456789\n"),
            Err(ProviderError::LineTooLong { limit: 8 })
        ));
    }

    #[test]
    fn test_decoder_terminator_not_counted() {
        let mut decoder = LineDecoder::new(8);
        assert_eq!(decoder.push(b"data: 12\r\n").unwrap(), vec!["data: 12"]);
        assert!(decoder.push(b"data: 34\r").unwrap().is_empty());
        assert_eq!(decoder.push(b"\n").unwrap(), vec!["data: 34"]);
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("data: {}"), Some(SseLine::Data("{}")));
        assert_eq!(parse_line("data:{}"), Some(SseLine::Data("{}")));
        assert_eq!(parse_line("data: [DONE]"), Some(SseLine::Done));
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line(": keep-alive"), None);
        assert_eq!(parse_line("event: message"), None);
    }

    #[test]
    fn test_chunk_into_events() {
        let chunk = ChatChunk::parse(
            r#"{"choices":[{"delta":{"content":"Hi","tool_calls":[
                {"index":0,"id":"c1","type":"function","function":{"name":"list_pods","arguments":""}},
                {"index":0,"function":{"arguments":"{\"namespace\""}}
            ]},"finish_reason":null}]}"#,
        )
        .unwrap();
        let events = chunk.into_events();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], StreamEvent::Text(t) if t == "Hi"));
        match &events[1] {
            StreamEvent::ToolCall(delta) => {
                assert_eq!(delta.id.as_deref(), Some("c1"));
                assert_eq!(delta.name, "list_pods");
            }
            other => panic!("unexpected event {:?}", other),
        }
        match &events[2] {
            StreamEvent::ToolCall(delta) => {
                assert_eq!(delta.id, None);
                assert_eq!(delta.arguments, "{\"namespace\"");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_finish_and_empty_choices() {
        let events = ChatChunk::parse(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#)
            .unwrap()
            .into_events();
        assert!(matches!(&events[..], [StreamEvent::Finish(r)] if r == "tool_calls"));

        let events = ChatChunk::parse(r#"{"choices":[]}"#).unwrap().into_events();
        assert!(events.is_empty());

        assert!(ChatChunk::parse("{\"choices\":").is_err());
    }
}
