use thiserror::Error;

use crate::cluster::ClusterError;

/// Failures while talking to the chat-completion endpoint
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Failed to reach the LLM endpoint: {0}")]
    Request(#[from] reqwest::Error),

    #[error("LLM endpoint returned an error (status={status}): {body}")]
    Status { status: u16, body: String },

    #[error("Failed to read the LLM stream: {0}")]
    Stream(String),

    #[error("Stream line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("Malformed LLM response: {0}")]
    Malformed(String),

    #[error("LLM request cancelled")]
    Cancelled,
}

/// The AI assistant cannot be used with the current configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("AI assistant is not enabled")]
    Disabled,

    #[error("AI assistant has no API key configured")]
    MissingApiKey,

    #[error("AI assistant has no endpoint configured")]
    MissingEndpoint,

    #[error("Unsupported AI provider: {0}")]
    UnsupportedProvider(String),
}

/// Failures of a single tool invocation
///
/// These never end a conversation: the orchestrator folds them into the tool's
/// result so the model can react.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("Tool execution cancelled")]
    Cancelled,
}

pub type ToolResult<T> = Result<T, ToolError>;

/// Failures preparing a conversation, before the first round
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Failed to render the system prompt: {0}")]
    Prompt(#[from] tera::Error),
}

pub type AgentResult<T> = Result<T, AgentError>;
