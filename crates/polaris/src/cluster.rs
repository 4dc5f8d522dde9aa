//! Cluster collaborators consumed by the tool executor
//!
//! The assistant never talks to a Kubernetes API server itself. It reads
//! through a [`ClusterClient`], which is expected to be backed by an informer
//! cache, and resolves cluster identity through a [`ClusterLookup`].
pub mod snapshot;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("Cluster {0} does not exist")]
    UnknownCluster(u64),

    #[error("Cluster {0} is not ready, its cache has not synced")]
    NotReady(u64),

    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("Cluster API error: {0}")]
    Api(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub id: u64,
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state")]
pub enum ContainerState {
    Waiting {
        #[serde(default)]
        reason: String,
        #[serde(default)]
        message: String,
    },
    Running {
        #[serde(rename = "startedAt")]
        started_at: DateTime<Utc>,
    },
    Terminated {
        #[serde(default)]
        reason: String,
        #[serde(rename = "exitCode")]
        exit_code: i32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub restart_count: i32,
    pub state: Option<ContainerState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub name: String,
    pub namespace: String,
    pub phase: String,
    #[serde(default)]
    pub node: String,
    #[serde(default)]
    pub pod_ip: String,
    #[serde(default)]
    pub host_ip: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub containers: Vec<ContainerStatus>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub start_time: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub name: String,
    pub namespace: String,
    pub replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
    #[serde(default)]
    pub available_replicas: i32,
    #[serde(default)]
    pub updated_replicas: i32,
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub images: Vec<String>,
    /// Annotations on the pod template, where rollout restarts are recorded
    #[serde(default)]
    pub template_annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub cpu: String,
    pub memory: String,
    #[serde(default)]
    pub pods: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    #[serde(default)]
    pub value: String,
    pub effect: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub taints: Vec<Taint>,
    #[serde(default)]
    pub unschedulable: bool,
    #[serde(default)]
    pub kubelet_version: String,
    #[serde(default)]
    pub os_image: String,
    #[serde(default)]
    pub container_runtime: String,
    #[serde(default)]
    pub capacity: Resources,
    #[serde(default)]
    pub allocatable: Resources,
    pub created: DateTime<Utc>,
}

impl Node {
    pub fn is_ready(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| c.condition_type == "Ready" && c.status == "True")
    }

    /// Roles taken from `node-role.kubernetes.io/<role>` labels
    pub fn roles(&self) -> Vec<String> {
        let roles: Vec<String> = self
            .labels
            .keys()
            .filter_map(|label| label.strip_prefix("node-role.kubernetes.io/"))
            .filter(|role| !role.is_empty())
            .map(String::from)
            .collect();
        if roles.is_empty() {
            vec!["<none>".to_string()]
        } else {
            roles
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub reason: String,
    pub kind: String,
    pub object_name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub count: i32,
    pub namespace: String,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub port: i32,
    pub node_port: Option<i32>,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "TCP".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub namespace: String,
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub cluster_ip: String,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingress {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub hosts: Vec<String>,
    pub class: Option<String>,
    pub created: DateTime<Utc>,
}

/// Resolves a cluster id to its identity
#[async_trait]
pub trait ClusterLookup: Send + Sync {
    async fn get_cluster(&self, cluster_id: u64) -> Result<ClusterInfo, ClusterError>;
}

/// Typed access to one or more clusters' resources
///
/// A `namespace` of `None` means all namespaces.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn list_pods(
        &self,
        cluster_id: u64,
        namespace: Option<&str>,
    ) -> Result<Vec<Pod>, ClusterError>;

    async fn get_pod(&self, cluster_id: u64, namespace: &str, name: &str)
        -> Result<Pod, ClusterError>;

    /// The last `tail_lines` lines of a container's log
    async fn pod_logs(
        &self,
        cluster_id: u64,
        namespace: &str,
        name: &str,
        container: Option<&str>,
        tail_lines: usize,
    ) -> Result<String, ClusterError>;

    async fn list_deployments(
        &self,
        cluster_id: u64,
        namespace: Option<&str>,
    ) -> Result<Vec<Deployment>, ClusterError>;

    async fn get_deployment(
        &self,
        cluster_id: u64,
        namespace: &str,
        name: &str,
    ) -> Result<Deployment, ClusterError>;

    async fn list_nodes(&self, cluster_id: u64) -> Result<Vec<Node>, ClusterError>;

    async fn get_node(&self, cluster_id: u64, name: &str) -> Result<Node, ClusterError>;

    async fn list_events(
        &self,
        cluster_id: u64,
        namespace: Option<&str>,
    ) -> Result<Vec<Event>, ClusterError>;

    async fn list_services(
        &self,
        cluster_id: u64,
        namespace: Option<&str>,
    ) -> Result<Vec<Service>, ClusterError>;

    async fn list_ingresses(
        &self,
        cluster_id: u64,
        namespace: Option<&str>,
    ) -> Result<Vec<Ingress>, ClusterError>;

    async fn scale_deployment(
        &self,
        cluster_id: u64,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError>;

    /// Trigger a rollout restart by stamping the pod template
    async fn restart_deployment(
        &self,
        cluster_id: u64,
        namespace: &str,
        name: &str,
        restarted_at: DateTime<Utc>,
    ) -> Result<(), ClusterError>;
}

/// Compact kubectl-style age: `45s`, `3m`, `5h`, `2d`, `1y`
pub fn format_age(created: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - created).num_seconds().max(0);
    const MINUTE: i64 = 60;
    const HOUR: i64 = 60 * MINUTE;
    const DAY: i64 = 24 * HOUR;
    const YEAR: i64 = 365 * DAY;

    if secs >= YEAR {
        format!("{}y", secs / YEAR)
    } else if secs >= DAY {
        format!("{}d", secs / DAY)
    } else if secs >= HOUR {
        format!("{}h", secs / HOUR)
    } else if secs >= MINUTE {
        format!("{}m", secs / MINUTE)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_age() {
        let now = Utc::now();
        assert_eq!(format_age(now - Duration::seconds(45), now), "45s");
        assert_eq!(format_age(now - Duration::minutes(3), now), "3m");
        assert_eq!(format_age(now - Duration::hours(5), now), "5h");
        assert_eq!(format_age(now - Duration::days(2), now), "2d");
        assert_eq!(format_age(now - Duration::days(400), now), "1y");
        // clock skew never produces a negative age
        assert_eq!(format_age(now + Duration::seconds(10), now), "0s");
    }

    #[test]
    fn test_node_roles_and_readiness() {
        let mut labels = BTreeMap::new();
        labels.insert("node-role.kubernetes.io/control-plane".to_string(), String::new());
        labels.insert("kubernetes.io/hostname".to_string(), "n1".to_string());
        let node = Node {
            name: "n1".to_string(),
            labels,
            conditions: vec![Condition {
                condition_type: "Ready".to_string(),
                status: "True".to_string(),
                reason: String::new(),
                message: String::new(),
            }],
            taints: vec![],
            unschedulable: false,
            kubelet_version: "v1.29.0".to_string(),
            os_image: String::new(),
            container_runtime: String::new(),
            capacity: Resources::default(),
            allocatable: Resources::default(),
            created: Utc::now(),
        };
        assert!(node.is_ready());
        assert_eq!(node.roles(), vec!["control-plane".to_string()]);

        let worker = Node {
            labels: BTreeMap::new(),
            conditions: vec![],
            ..node
        };
        assert!(!worker.is_ready());
        assert_eq!(worker.roles(), vec!["<none>".to_string()]);
    }
}
