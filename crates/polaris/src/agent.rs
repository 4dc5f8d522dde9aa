pub mod round;

use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::errors::{AgentResult, ProviderError, ToolError};
use crate::models::message::Message;
use crate::models::progress::ProgressEvent;
use crate::prompt_template::{load_prompt, load_prompt_file, SYSTEM_PROMPT};
use crate::providers::base::{Provider, StreamEvent};
use crate::tools::{ClusterScope, ToolExecutor};
use round::RoundState;

pub const DEFAULT_MAX_ROUNDS: usize = 10;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

pub const ROUND_LIMIT_MESSAGE: &str = "tool call round limit exceeded";
pub const DEADLINE_MESSAGE: &str = "request deadline exceeded";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Rounds that may request tools before the conversation is cut off
    pub max_rounds: usize,
    /// Deadline for the whole reply, across every round
    pub timeout: Duration,
    /// Replaces the built-in system prompt template
    pub system_prompt: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            timeout: DEFAULT_TIMEOUT,
            system_prompt: None,
        }
    }
}

#[derive(Serialize)]
struct PromptTool<'a> {
    name: &'a str,
    description: &'a str,
    mutating: bool,
}

#[derive(Serialize)]
struct PromptContext<'a> {
    cluster_name: &'a str,
    cluster_version: &'a str,
    tools: Vec<PromptTool<'a>>,
}

/// Why a reply stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Cancelled,
    Deadline,
}

async fn guarded<F: Future>(
    future: F,
    cancel: &CancellationToken,
    deadline: Instant,
) -> Result<F::Output, Interrupt> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        _ = sleep_until(deadline) => Err(Interrupt::Deadline),
        output = future => Ok(output),
    }
}

/// Agent drives a conversation between the model and the cluster tools
pub struct Agent {
    provider: Arc<dyn Provider>,
    executor: Arc<ToolExecutor>,
    config: AgentConfig,
}

impl Agent {
    pub fn new(provider: Arc<dyn Provider>, executor: Arc<ToolExecutor>) -> Self {
        Self {
            provider,
            executor,
            config: AgentConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn system_prompt(&self, scope: &ClusterScope) -> AgentResult<String> {
        let context = PromptContext {
            cluster_name: &scope.cluster.name,
            cluster_version: &scope.cluster.version,
            tools: self
                .executor
                .catalog()
                .tools()
                .iter()
                .map(|tool| PromptTool {
                    name: &tool.name,
                    description: &tool.description,
                    mutating: tool.is_mutating(),
                })
                .collect(),
        };
        let prompt = match &self.config.system_prompt {
            Some(path) => load_prompt_file(path.clone(), &context)?,
            None => load_prompt(SYSTEM_PROMPT, &context)?,
        };
        Ok(prompt)
    }

    /// The terminal events for an interrupted reply
    fn interrupted(&self, interrupt: Interrupt, work: &CancellationToken) -> Vec<ProgressEvent> {
        work.cancel();
        match interrupt {
            Interrupt::Deadline => {
                tracing::warn!(timeout = ?self.config.timeout, "chat deadline exceeded");
                vec![ProgressEvent::error(DEADLINE_MESSAGE), ProgressEvent::Done]
            }
            Interrupt::Cancelled => {
                tracing::debug!("chat cancelled");
                vec![ProgressEvent::Done]
            }
        }
    }

    /// Stream the progress of answering `history` in the given cluster
    ///
    /// The stream always ends with exactly one `Done`. Fatal conditions are
    /// reported as a single `Error` just before it; tool failures are not fatal
    /// and go back to the model as tool results.
    pub fn reply(
        &self,
        scope: ClusterScope,
        history: Vec<Message>,
        cancel: CancellationToken,
    ) -> BoxStream<'_, ProgressEvent> {
        Box::pin(async_stream::stream! {
            let deadline = Instant::now() + self.config.timeout;
            let work = cancel.child_token();
            let tools = self.executor.catalog().tools();

            let system = match self.system_prompt(&scope) {
                Ok(prompt) => prompt,
                Err(e) => {
                    tracing::error!(error = %e, "failed to build system prompt");
                    yield ProgressEvent::error(e.to_string());
                    yield ProgressEvent::Done;
                    return;
                }
            };
            let mut messages = Vec::with_capacity(history.len() + 1);
            messages.push(Message::system(system));
            messages.extend(history);

            let mut round = 0;
            loop {
                if round >= self.config.max_rounds {
                    tracing::warn!(cluster_id = scope.cluster.id, rounds = round, "round limit exceeded");
                    yield ProgressEvent::error(ROUND_LIMIT_MESSAGE);
                    yield ProgressEvent::Done;
                    return;
                }
                round += 1;
                tracing::debug!(cluster_id = scope.cluster.id, round, "starting round");

                let opened = guarded(self.provider.stream(&messages, tools, &work), &cancel, deadline).await;
                let mut stream = match opened {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(ProviderError::Cancelled)) => {
                        for event in self.interrupted(Interrupt::Cancelled, &work) {
                            yield event;
                        }
                        return;
                    }
                    Ok(Err(e)) => {
                        tracing::error!(error = %e, round, "failed to open LLM stream");
                        yield ProgressEvent::error(e.to_string());
                        yield ProgressEvent::Done;
                        return;
                    }
                    Err(interrupt) => {
                        for event in self.interrupted(interrupt, &work) {
                            yield event;
                        }
                        return;
                    }
                };

                let mut state = RoundState::new();
                loop {
                    let next = match guarded(stream.recv(), &cancel, deadline).await {
                        Ok(next) => next,
                        Err(interrupt) => {
                            for event in self.interrupted(interrupt, &work) {
                                yield event;
                            }
                            return;
                        }
                    };
                    match next {
                        Some(StreamEvent::Text(text)) => {
                            state.push_text(&text);
                            yield ProgressEvent::content(text);
                        }
                        Some(StreamEvent::ToolCall(delta)) => {
                            if !state.merge(delta) {
                                tracing::debug!(round, "dropping tool call fragment with no open call");
                            }
                        }
                        Some(StreamEvent::Finish(reason)) => {
                            state.finish(reason);
                            break;
                        }
                        Some(StreamEvent::Error(e)) => {
                            tracing::error!(error = %e, round, "LLM stream failed");
                            yield ProgressEvent::error(e.to_string());
                            yield ProgressEvent::Done;
                            return;
                        }
                        Some(StreamEvent::Done) | None => break,
                    }
                }
                // closes the connection if the endpoint is still sending
                drop(stream);

                let requests_tools = state.requests_tools();
                let message = state.into_message();
                let calls = message.tool_calls.clone();
                messages.push(message);
                if !requests_tools {
                    yield ProgressEvent::Done;
                    return;
                }

                for call in calls {
                    yield ProgressEvent::tool_call(&call.id, call.name(), call.arguments());

                    let outcome = guarded(
                        self.executor.execute(&scope, call.name(), call.arguments(), &work),
                        &cancel,
                        deadline,
                    )
                    .await;
                    let result = match outcome {
                        Ok(Ok(result)) => result,
                        Ok(Err(ToolError::Cancelled)) => {
                            for event in self.interrupted(Interrupt::Cancelled, &work) {
                                yield event;
                            }
                            return;
                        }
                        Ok(Err(e)) => {
                            tracing::error!(tool = %call.name(), error = %e, "tool execution failed");
                            json!({ "error": e.to_string() }).to_string()
                        }
                        Err(interrupt) => {
                            for event in self.interrupted(interrupt, &work) {
                                yield event;
                            }
                            return;
                        }
                    };

                    yield ProgressEvent::tool_result(&call.id, call.name(), &result);
                    messages.push(Message::tool(call.id.clone(), result));
                }
            }
        })
    }
}
