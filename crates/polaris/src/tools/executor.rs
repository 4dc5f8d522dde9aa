use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::args::{
    decode, Confirmation, EventsArgs, NamespaceArgs, NodeArgs, PodLogsArgs, ResourceArgs,
    ScaleArgs,
};
use super::catalog::*;
use crate::audit::{AuditRecord, AuditSink};
use crate::cluster::{
    format_age, ClusterClient, ClusterError, ClusterInfo, Condition, ServicePort,
};
use crate::errors::{ToolError, ToolResult};

const LOG_TAIL_LINES: usize = 100;
const LOG_MAX_BYTES: usize = 64 * 1024;
const EVENT_LIMIT: usize = 50;

/// The cluster a conversation is about, and who is asking
#[derive(Debug, Clone)]
pub struct ClusterScope {
    pub cluster: ClusterInfo,
    pub actor: String,
}

impl ClusterScope {
    pub fn new<S: Into<String>>(cluster: ClusterInfo, actor: S) -> Self {
        Self {
            cluster,
            actor: actor.into(),
        }
    }

    fn id(&self) -> u64 {
        self.cluster.id
    }
}

/// Runs catalog tools against a cluster
///
/// Holds no per-call state. Mutating tools stop at the confirmation gate unless
/// their arguments carry `confirmed: true`.
pub struct ToolExecutor {
    catalog: Arc<ToolCatalog>,
    cluster: Arc<dyn ClusterClient>,
    audit: Arc<dyn AuditSink>,
}

impl ToolExecutor {
    pub fn new(
        catalog: Arc<ToolCatalog>,
        cluster: Arc<dyn ClusterClient>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            catalog,
            cluster,
            audit,
        }
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Execute a tool and return its result as JSON text
    pub async fn execute(
        &self,
        scope: &ClusterScope,
        name: &str,
        arguments: &str,
        cancel: &CancellationToken,
    ) -> ToolResult<String> {
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }

        let tool = self
            .catalog
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        if tool.is_mutating() {
            let confirmation: Confirmation = decode(arguments)?;
            if !confirmation.confirmed {
                return Ok(self.confirmation_request(name, arguments)?.to_string());
            }
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ToolError::Cancelled),
            result = self.dispatch(scope, name, arguments) => result,
        }?;
        Ok(result.to_string())
    }

    /// What the model gets back instead of a mutation it has not confirmed
    fn confirmation_request(&self, name: &str, arguments: &str) -> ToolResult<Value> {
        match name {
            SCALE_DEPLOYMENT => {
                let args: ScaleArgs = decode(arguments)?;
                Ok(json!({
                    "action": SCALE_DEPLOYMENT,
                    "namespace": args.namespace,
                    "name": args.name,
                    "target_replicas": args.replicas,
                    "status": "awaiting_confirmation",
                    "message": format!(
                        "Please confirm scaling {}/{} to {} replicas",
                        args.namespace, args.name, args.replicas
                    ),
                }))
            }
            RESTART_DEPLOYMENT => {
                let args: ResourceArgs = decode(arguments)?;
                Ok(json!({
                    "action": RESTART_DEPLOYMENT,
                    "namespace": args.namespace,
                    "name": args.name,
                    "status": "awaiting_confirmation",
                    "message": format!("Please confirm restarting {}/{}", args.namespace, args.name),
                }))
            }
            other => Ok(json!({
                "action": other,
                "arguments": crate::models::progress::embed_json(arguments),
                "status": "awaiting_confirmation",
                "message": format!("Please confirm running {}", other),
            })),
        }
    }

    async fn dispatch(&self, scope: &ClusterScope, name: &str, arguments: &str) -> ToolResult<Value> {
        match name {
            LIST_PODS => self.list_pods(scope, decode(arguments)?).await,
            GET_POD_DETAIL => self.get_pod_detail(scope, decode(arguments)?).await,
            GET_POD_LOGS => self.get_pod_logs(scope, decode(arguments)?).await,
            LIST_DEPLOYMENTS => self.list_deployments(scope, decode(arguments)?).await,
            GET_DEPLOYMENT_DETAIL => self.get_deployment_detail(scope, decode(arguments)?).await,
            LIST_NODES => self.list_nodes(scope).await,
            GET_NODE_DETAIL => self.get_node_detail(scope, decode(arguments)?).await,
            LIST_EVENTS => self.list_events(scope, decode(arguments)?).await,
            LIST_SERVICES => self.list_services(scope, decode(arguments)?).await,
            LIST_INGRESSES => self.list_ingresses(scope, decode(arguments)?).await,
            SCALE_DEPLOYMENT => self.scale_deployment(scope, decode(arguments)?).await,
            RESTART_DEPLOYMENT => self.restart_deployment(scope, decode(arguments)?).await,
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    async fn list_pods(&self, scope: &ClusterScope, args: NamespaceArgs) -> ToolResult<Value> {
        let pods = self.cluster.list_pods(scope.id(), args.namespace()).await?;
        let now = Utc::now();
        let pods: Vec<Value> = pods
            .iter()
            .map(|pod| {
                let restarts: i32 = pod.containers.iter().map(|c| c.restart_count).sum();
                let ready = pod.containers.iter().filter(|c| c.ready).count();
                json!({
                    "name": pod.name,
                    "namespace": pod.namespace,
                    "status": pod.phase,
                    "node": pod.node,
                    "restarts": restarts,
                    "ready": format!("{}/{}", ready, pod.containers.len()),
                    "age": format_age(pod.created, now),
                })
            })
            .collect();
        Ok(json!({ "total": pods.len(), "pods": pods }))
    }

    async fn get_pod_detail(&self, scope: &ClusterScope, args: ResourceArgs) -> ToolResult<Value> {
        let pod = self
            .cluster
            .get_pod(scope.id(), &args.namespace, &args.name)
            .await?;

        let containers: Vec<Value> = pod
            .containers
            .iter()
            .map(|c| {
                let mut container = json!({
                    "name": c.name,
                    "image": c.image,
                    "ready": c.ready,
                    "restartCount": c.restart_count,
                });
                if let Some(state) = &c.state {
                    if let (Value::Object(target), Ok(Value::Object(fields))) =
                        (&mut container, serde_json::to_value(state))
                    {
                        target.extend(fields);
                    }
                }
                container
            })
            .collect();

        Ok(json!({
            "name": pod.name,
            "namespace": pod.namespace,
            "status": pod.phase,
            "node": pod.node,
            "ip": pod.pod_ip,
            "hostIP": pod.host_ip,
            "startTime": pod.start_time,
            "labels": pod.labels,
            "containers": containers,
            "conditions": conditions(&pod.conditions),
            "age": format_age(pod.created, Utc::now()),
        }))
    }

    async fn get_pod_logs(&self, scope: &ClusterScope, args: PodLogsArgs) -> ToolResult<Value> {
        let logs = self
            .cluster
            .pod_logs(
                scope.id(),
                &args.namespace,
                &args.name,
                args.container(),
                LOG_TAIL_LINES,
            )
            .await?;
        let truncated = logs.len() > LOG_MAX_BYTES;
        Ok(json!({
            "namespace": args.namespace,
            "name": args.name,
            "container": args.container(),
            "truncated": truncated,
            "logs": truncate_utf8(&logs, LOG_MAX_BYTES),
        }))
    }

    async fn list_deployments(
        &self,
        scope: &ClusterScope,
        args: NamespaceArgs,
    ) -> ToolResult<Value> {
        let deployments = self
            .cluster
            .list_deployments(scope.id(), args.namespace())
            .await?;
        let now = Utc::now();
        let deployments: Vec<Value> = deployments
            .iter()
            .map(|d| {
                json!({
                    "name": d.name,
                    "namespace": d.namespace,
                    "replicas": d.replicas,
                    "ready": d.ready_replicas,
                    "available": d.available_replicas,
                    "age": format_age(d.created, now),
                    "images": d.images.join(", "),
                })
            })
            .collect();
        Ok(json!({ "total": deployments.len(), "deployments": deployments }))
    }

    async fn get_deployment_detail(
        &self,
        scope: &ClusterScope,
        args: ResourceArgs,
    ) -> ToolResult<Value> {
        let d = self
            .cluster
            .get_deployment(scope.id(), &args.namespace, &args.name)
            .await?;
        Ok(json!({
            "name": d.name,
            "namespace": d.namespace,
            "replicas": d.replicas,
            "readyReplicas": d.ready_replicas,
            "availableReplicas": d.available_replicas,
            "updatedReplicas": d.updated_replicas,
            "strategy": d.strategy,
            "labels": d.labels,
            "images": d.images.join(", "),
            "conditions": conditions(&d.conditions),
            "age": format_age(d.created, Utc::now()),
        }))
    }

    async fn list_nodes(&self, scope: &ClusterScope) -> ToolResult<Value> {
        let nodes = self.cluster.list_nodes(scope.id()).await?;
        let now = Utc::now();
        let nodes: Vec<Value> = nodes
            .iter()
            .map(|node| {
                json!({
                    "name": node.name,
                    "status": if node.is_ready() { "Ready" } else { "NotReady" },
                    "roles": node.roles(),
                    "version": node.kubelet_version,
                    "cpu": node.capacity.cpu,
                    "memory": node.capacity.memory,
                    "age": format_age(node.created, now),
                })
            })
            .collect();
        Ok(json!({ "total": nodes.len(), "nodes": nodes }))
    }

    async fn get_node_detail(&self, scope: &ClusterScope, args: NodeArgs) -> ToolResult<Value> {
        let node = self.cluster.get_node(scope.id(), &args.name).await?;
        Ok(json!({
            "name": node.name,
            "labels": node.labels,
            "conditions": conditions(&node.conditions),
            "taints": node.taints,
            "unschedulable": node.unschedulable,
            "kubeletVersion": node.kubelet_version,
            "osImage": node.os_image,
            "containerRuntime": node.container_runtime,
            "cpu": node.capacity.cpu,
            "memory": node.capacity.memory,
            "pods": node.capacity.pods,
            "allocatableCPU": node.allocatable.cpu,
            "allocatableMemory": node.allocatable.memory,
            "age": format_age(node.created, Utc::now()),
        }))
    }

    async fn list_events(&self, scope: &ClusterScope, args: EventsArgs) -> ToolResult<Value> {
        let events = self.cluster.list_events(scope.id(), args.namespace()).await?;
        let now = Utc::now();
        let mut events: Vec<Value> = events
            .iter()
            .filter(|e| args.resource_name().map_or(true, |name| e.object_name == name))
            .map(|e| {
                json!({
                    "type": e.event_type,
                    "reason": e.reason,
                    "object": format!("{}/{}", e.kind, e.object_name),
                    "message": e.message,
                    "count": e.count,
                    "namespace": e.namespace,
                    "lastSeen": e.last_seen.map(|t| format_age(t, now)).unwrap_or_default(),
                })
            })
            .collect();

        // Only the most recent events are useful to the model
        if events.len() > EVENT_LIMIT {
            events.drain(..events.len() - EVENT_LIMIT);
        }
        Ok(json!({ "total": events.len(), "events": events }))
    }

    async fn list_services(&self, scope: &ClusterScope, args: NamespaceArgs) -> ToolResult<Value> {
        let services = self
            .cluster
            .list_services(scope.id(), args.namespace())
            .await?;
        let now = Utc::now();
        let services: Vec<Value> = services
            .iter()
            .map(|svc| {
                json!({
                    "name": svc.name,
                    "namespace": svc.namespace,
                    "type": svc.service_type,
                    "clusterIP": svc.cluster_ip,
                    "ports": format_ports(&svc.ports),
                    "age": format_age(svc.created, now),
                })
            })
            .collect();
        Ok(json!({ "total": services.len(), "services": services }))
    }

    async fn list_ingresses(&self, scope: &ClusterScope, args: NamespaceArgs) -> ToolResult<Value> {
        let ingresses = self
            .cluster
            .list_ingresses(scope.id(), args.namespace())
            .await?;
        let now = Utc::now();
        let ingresses: Vec<Value> = ingresses
            .iter()
            .map(|ing| {
                json!({
                    "name": ing.name,
                    "namespace": ing.namespace,
                    "hosts": ing.hosts.iter().filter(|h| !h.is_empty()).collect::<Vec<_>>(),
                    "class": ing.class.clone().unwrap_or_default(),
                    "age": format_age(ing.created, now),
                })
            })
            .collect();
        Ok(json!({ "total": ingresses.len(), "ingresses": ingresses }))
    }

    async fn scale_deployment(&self, scope: &ClusterScope, args: ScaleArgs) -> ToolResult<Value> {
        let outcome = self
            .cluster
            .scale_deployment(scope.id(), &args.namespace, &args.name, args.replicas)
            .await;
        self.audit_workload(scope, "scale", &args.namespace, &args.name, &outcome);
        outcome?;

        tracing::info!(
            cluster_id = scope.id(),
            deployment = %format!("{}/{}", args.namespace, args.name),
            replicas = args.replicas,
            "scaled deployment"
        );
        Ok(json!({
            "status": "success",
            "message": format!(
                "Scaled {}/{} to {} replicas",
                args.namespace, args.name, args.replicas
            ),
        }))
    }

    async fn restart_deployment(
        &self,
        scope: &ClusterScope,
        args: ResourceArgs,
    ) -> ToolResult<Value> {
        let outcome = self
            .cluster
            .restart_deployment(scope.id(), &args.namespace, &args.name, Utc::now())
            .await;
        self.audit_workload(scope, "restart", &args.namespace, &args.name, &outcome);
        outcome?;

        tracing::info!(
            cluster_id = scope.id(),
            deployment = %format!("{}/{}", args.namespace, args.name),
            "restarted deployment"
        );
        Ok(json!({
            "status": "success",
            "message": format!("Triggered a rolling restart of {}/{}", args.namespace, args.name),
        }))
    }

    fn audit_workload(
        &self,
        scope: &ClusterScope,
        action: &'static str,
        namespace: &str,
        name: &str,
        outcome: &Result<(), ClusterError>,
    ) {
        self.audit.record(AuditRecord {
            actor: scope.actor.clone(),
            module: "workload",
            action,
            cluster_id: scope.id(),
            cluster_name: scope.cluster.name.clone(),
            namespace: namespace.to_string(),
            resource_type: "deployment",
            resource_name: name.to_string(),
            success: outcome.is_ok(),
            error_message: outcome.as_ref().err().map(|e| e.to_string()),
            created_at: Utc::now(),
        });
    }
}

fn conditions(conditions: &[Condition]) -> Value {
    json!(conditions
        .iter()
        .map(|c| json!({
            "type": c.condition_type,
            "status": c.status,
            "reason": c.reason,
            "message": c.message,
        }))
        .collect::<Vec<_>>())
}

fn format_ports(ports: &[ServicePort]) -> String {
    ports
        .iter()
        .map(|p| match p.node_port {
            Some(node_port) if node_port > 0 => {
                format!("{}:{}/{}", p.port, node_port, p.protocol)
            }
            _ => format!("{}/{}", p.port, p.protocol),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::cluster::snapshot::SnapshotStore;
    use serde_json::Value;

    const SNAPSHOT: &str = r#"{
        "clusters": [{
            "id": 1,
            "name": "prod",
            "version": "v1.29.2",
            "pods": [{
                "name": "web-1",
                "namespace": "default",
                "phase": "Running",
                "node": "node-a",
                "containers": [
                    {"name": "app", "image": "nginx:1.25", "ready": true, "restart_count": 2,
                     "state": {"state": "Running", "startedAt": "2024-01-01T00:00:00Z"}},
                    {"name": "sidecar", "image": "envoy:1.29", "ready": false, "restart_count": 1, "state": null}
                ],
                "start_time": null,
                "created": "2024-01-01T00:00:00Z",
                "logs": {"app": "booting\nready"}
            }, {
                "name": "dns-1",
                "namespace": "kube-system",
                "phase": "Running",
                "start_time": null,
                "created": "2024-01-01T00:00:00Z"
            }],
            "deployments": [{
                "name": "web",
                "namespace": "default",
                "replicas": 2,
                "ready_replicas": 2,
                "images": ["nginx:1.25", "envoy:1.29"],
                "created": "2024-01-01T00:00:00Z"
            }],
            "services": [{
                "name": "web",
                "namespace": "default",
                "type": "NodePort",
                "cluster_ip": "10.0.0.10",
                "ports": [{"port": 80, "node_port": 30080}, {"port": 53, "node_port": null, "protocol": "UDP"}],
                "created": "2024-01-01T00:00:00Z"
            }]
        }]
    }"#;

    struct Fixture {
        executor: ToolExecutor,
        store: Arc<SnapshotStore>,
        audit: Arc<MemoryAuditSink>,
        scope: ClusterScope,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(SnapshotStore::from_json(SNAPSHOT).unwrap());
        let audit = Arc::new(MemoryAuditSink::new());
        let executor = ToolExecutor::new(
            Arc::new(ToolCatalog::kubernetes()),
            store.clone(),
            audit.clone(),
        );
        let scope = ClusterScope::new(
            ClusterInfo {
                id: 1,
                name: "prod".to_string(),
                version: "v1.29.2".to_string(),
            },
            "alice",
        );
        Fixture {
            executor,
            store,
            audit,
            scope,
        }
    }

    async fn run(f: &Fixture, name: &str, arguments: &str) -> ToolResult<Value> {
        let token = CancellationToken::new();
        let text = f.executor.execute(&f.scope, name, arguments, &token).await?;
        Ok(serde_json::from_str(&text).unwrap())
    }

    #[tokio::test]
    async fn test_list_pods_all_and_filtered() {
        let f = fixture();
        let all = run(&f, LIST_PODS, "{}").await.unwrap();
        assert_eq!(all["total"], 2);

        let filtered = run(&f, LIST_PODS, r#"{"namespace":"default"}"#).await.unwrap();
        assert_eq!(filtered["total"], 1);
        let pod = &filtered["pods"][0];
        assert_eq!(pod["name"], "web-1");
        assert_eq!(pod["restarts"], 3);
        assert_eq!(pod["ready"], "1/2");
        assert_eq!(pod["node"], "node-a");
    }

    #[tokio::test]
    async fn test_pod_detail_and_logs() {
        let f = fixture();
        let detail = run(&f, GET_POD_DETAIL, r#"{"namespace":"default","name":"web-1"}"#)
            .await
            .unwrap();
        assert_eq!(detail["containers"][0]["state"], "Running");
        assert_eq!(detail["containers"][1]["restartCount"], 1);

        let logs = run(&f, GET_POD_LOGS, r#"{"namespace":"default","name":"web-1"}"#)
            .await
            .unwrap();
        assert_eq!(logs["logs"], "booting\nready");
        assert_eq!(logs["truncated"], false);
    }

    #[tokio::test]
    async fn test_service_ports_formatting() {
        let f = fixture();
        let services = run(&f, LIST_SERVICES, "").await.unwrap();
        assert_eq!(services["services"][0]["ports"], "80:30080/TCP, 53/UDP");
    }

    #[tokio::test]
    async fn test_unconfirmed_scale_changes_nothing() {
        let f = fixture();
        let result = run(
            &f,
            SCALE_DEPLOYMENT,
            r#"{"namespace":"default","name":"web","replicas":5}"#,
        )
        .await
        .unwrap();

        assert_eq!(result["status"], "awaiting_confirmation");
        assert_eq!(result["action"], SCALE_DEPLOYMENT);
        assert_eq!(result["target_replicas"], 5);
        let deployment = f.store.get_deployment(1, "default", "web").await.unwrap();
        assert_eq!(deployment.replicas, 2);
        assert!(f.audit.records().is_empty());
    }

    #[tokio::test]
    async fn test_confirmed_scale_applies_once_and_audits() {
        let f = fixture();
        let result = run(
            &f,
            SCALE_DEPLOYMENT,
            r#"{"namespace":"default","name":"web","replicas":5,"confirmed":true}"#,
        )
        .await
        .unwrap();

        assert_eq!(result["status"], "success");
        let deployment = f.store.get_deployment(1, "default", "web").await.unwrap();
        assert_eq!(deployment.replicas, 5);

        let records = f.audit.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].actor, "alice");
        assert_eq!(records[0].action, "scale");
        assert_eq!(records[0].resource_name, "web");
        assert!(records[0].success);
    }

    #[tokio::test]
    async fn test_restart_gate_and_failed_audit() {
        let f = fixture();
        let pending = run(&f, RESTART_DEPLOYMENT, r#"{"namespace":"default","name":"web"}"#)
            .await
            .unwrap();
        assert_eq!(pending["status"], "awaiting_confirmation");
        assert!(f.audit.records().is_empty());

        let err = run(
            &f,
            RESTART_DEPLOYMENT,
            r#"{"namespace":"default","name":"missing","confirmed":true}"#,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::Cluster(ClusterError::NotFound { .. })));

        let records = f.audit.records();
        assert_eq!(records.len(), 1);
        assert!(!records[0].success);
        assert!(records[0].error_message.is_some());
    }

    #[tokio::test]
    async fn test_unknown_tool_and_bad_arguments() {
        let f = fixture();
        assert_eq!(
            run(&f, "delete_cluster", "{}").await.unwrap_err(),
            ToolError::UnknownTool("delete_cluster".to_string())
        );
        assert!(matches!(
            run(&f, LIST_PODS, "{not json").await.unwrap_err(),
            ToolError::InvalidArguments(_)
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch() {
        let f = fixture();
        let token = CancellationToken::new();
        token.cancel();
        let err = f
            .executor
            .execute(&f.scope, LIST_PODS, "{}", &token)
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::Cancelled);
    }

    #[test]
    fn test_truncate_utf8_respects_char_boundaries() {
        assert_eq!(truncate_utf8("héllo", 2), "h");
        assert_eq!(truncate_utf8("abc", 10), "abc");
    }
}
