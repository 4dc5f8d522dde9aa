use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;

/// One mutating action taken on behalf of a user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub actor: String,
    pub module: &'static str,
    pub action: &'static str,
    pub cluster_id: u64,
    pub cluster_name: String,
    pub namespace: String,
    pub resource_type: &'static str,
    pub resource_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fire-and-forget destination for audit records
pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// Writes audit records as structured tracing events
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        tracing::info!(
            target: "polaris::audit",
            actor = %record.actor,
            module = record.module,
            action = record.action,
            cluster_id = record.cluster_id,
            cluster = %record.cluster_name,
            namespace = %record.namespace,
            resource_type = record.resource_type,
            resource = %record.resource_name,
            success = record.success,
            error = record.error_message.as_deref().unwrap_or(""),
            "audit"
        );
    }
}

/// Keeps every record in memory, for inspection
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: AuditRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}
