use polaris::{
    audit::{AuditSink, TracingAuditSink},
    cluster::{snapshot::SnapshotStore, ClusterLookup},
    providers::configs::AiConfig,
    tools::{ToolCatalog, ToolExecutor},
};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::configuration::ChatSettings;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Editable at runtime through the config endpoints
    pub ai_config: Arc<RwLock<AiConfig>>,
    pub clusters: Arc<dyn ClusterLookup>,
    pub executor: Arc<ToolExecutor>,
    pub chat: ChatSettings,
}

impl AppState {
    pub fn new(ai_config: AiConfig, chat: ChatSettings, store: Arc<SnapshotStore>) -> Self {
        Self::with_audit(ai_config, chat, store, Arc::new(TracingAuditSink))
    }

    pub fn with_audit(
        ai_config: AiConfig,
        chat: ChatSettings,
        store: Arc<SnapshotStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let executor = ToolExecutor::new(Arc::new(ToolCatalog::kubernetes()), store.clone(), audit);
        Self {
            ai_config: Arc::new(RwLock::new(ai_config)),
            clusters: store,
            executor: Arc::new(executor),
            chat,
        }
    }

    pub async fn ai_config(&self) -> AiConfig {
        self.ai_config.read().await.clone()
    }
}
