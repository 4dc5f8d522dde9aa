pub mod base;
pub mod configs;
pub mod factory;
pub mod mock;
pub mod openai;
pub mod sse;

pub use base::{ChatStream, Provider, StreamEvent, ToolCallDelta};
pub use configs::AiConfig;
