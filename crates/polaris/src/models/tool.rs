use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Whether invoking a tool can change cluster state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    ReadOnly,
    /// Mutating tools only run once the caller passes `confirmed: true`
    Mutating,
}

/// A tool that can be used by a model.
#[derive(Debug, Clone, PartialEq)]
pub struct Tool {
    /// The name of the tool
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// A JSON schema for the arguments the tool accepts
    pub parameters: Value,
    pub kind: ToolKind,
}

impl Tool {
    /// Create a new read-only tool
    pub fn new<N, D>(name: N, description: D, parameters: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            parameters,
            kind: ToolKind::ReadOnly,
        }
    }

    /// Create a new tool that changes cluster state
    pub fn mutating<N, D>(name: N, description: D, parameters: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            kind: ToolKind::Mutating,
            ..Self::new(name, description, parameters)
        }
    }

    pub fn is_mutating(&self) -> bool {
        self.kind == ToolKind::Mutating
    }

    /// The openai function-calling definition for this tool
    pub fn to_openai_spec(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// The function half of a tool call, as named by the model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub name: String,
    /// Raw, possibly incomplete JSON accumulated from the stream
    #[serde(default)]
    pub arguments: String,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

impl ToolCall {
    pub fn new<I, N, A>(id: I, name: N, arguments: A) -> Self
    where
        I: Into<String>,
        N: Into<String>,
        A: Into<String>,
    {
        ToolCall {
            id: id.into(),
            call_type: function_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    pub fn arguments(&self) -> &str {
        &self.function.arguments
    }
}
