//! These models represent the objects passed around by the assistant
//!
//! There are three related formats we need to interact with:
//! - chat messages sent from the console to the assistant (openai shaped)
//! - chat messages and tool definitions sent from the assistant to the LLM
//! - progress events relayed from the assistant back to the console
//!
//! The console and the LLM both speak the openai chat format, so the message
//! model serializes directly to it. Progress events are internal and only take
//! their wire shape in the server's relay.
pub mod message;
pub mod progress;
pub mod tool;
