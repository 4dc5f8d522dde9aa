//! The tools the assistant can call against a cluster
pub mod args;
pub mod catalog;
pub mod executor;

pub use catalog::ToolCatalog;
pub use executor::{ClusterScope, ToolExecutor};
