use serde_json::{json, Value};

/// Something the orchestrator observed that the console should see
///
/// Events are produced strictly in order: text deltas, then tool call starts and
/// results per round, then exactly one `Done`.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Content {
        content: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    ToolResult {
        id: String,
        name: String,
        result: Value,
    },
    Error {
        error: String,
    },
    Done,
}

impl ProgressEvent {
    pub fn content<S: Into<String>>(content: S) -> Self {
        ProgressEvent::Content {
            content: content.into(),
        }
    }

    pub fn tool_call(id: &str, name: &str, raw_arguments: &str) -> Self {
        ProgressEvent::ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: embed_json(raw_arguments),
        }
    }

    pub fn tool_result(id: &str, name: &str, raw_result: &str) -> Self {
        ProgressEvent::ToolResult {
            id: id.to_string(),
            name: name.to_string(),
            result: embed_json(raw_result),
        }
    }

    pub fn error<S: Into<String>>(error: S) -> Self {
        ProgressEvent::Error {
            error: error.into(),
        }
    }

    /// The SSE `event:` name
    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::Content { .. } => "content",
            ProgressEvent::ToolCall { .. } => "tool_call",
            ProgressEvent::ToolResult { .. } => "tool_result",
            ProgressEvent::Error { .. } => "error",
            ProgressEvent::Done => "done",
        }
    }

    /// The SSE `data:` payload
    pub fn data(&self) -> Value {
        match self {
            ProgressEvent::Content { content } => json!({ "content": content }),
            ProgressEvent::ToolCall {
                id,
                name,
                arguments,
            } => json!({ "id": id, "name": name, "arguments": arguments }),
            ProgressEvent::ToolResult { id, name, result } => {
                json!({ "id": id, "name": name, "result": result })
            }
            ProgressEvent::Error { error } => json!({ "error": error }),
            ProgressEvent::Done => json!({}),
        }
    }
}

/// Embed raw tool text as a JSON value: objects and arrays are passed through,
/// anything else (plain text, broken JSON from the model) becomes a string.
pub fn embed_json(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return value;
        }
    }
    Value::String(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embed_json() {
        assert_eq!(embed_json(" {\"a\":1} "), json!({"a": 1}));
        assert_eq!(embed_json("[1,2]"), json!([1, 2]));
        assert_eq!(embed_json("{\"namespace\":\"def"), json!("{\"namespace\":\"def"));
        assert_eq!(embed_json("line one\nline two"), json!("line one\nline two"));
        assert_eq!(embed_json(""), json!(""));
    }

    #[test]
    fn test_event_payloads() {
        let call = ProgressEvent::tool_call("c1", "list_pods", "{\"namespace\":\"default\"}");
        assert_eq!(call.name(), "tool_call");
        assert_eq!(
            call.data(),
            json!({"id": "c1", "name": "list_pods", "arguments": {"namespace": "default"}})
        );

        let result = ProgressEvent::tool_result("c1", "get_pod_logs", "plain log output");
        assert_eq!(result.data()["result"], json!("plain log output"));

        assert_eq!(ProgressEvent::Done.data(), json!({}));
        assert_eq!(ProgressEvent::Done.name(), "done");
        assert_eq!(ProgressEvent::error("boom").data(), json!({"error": "boom"}));
    }
}
