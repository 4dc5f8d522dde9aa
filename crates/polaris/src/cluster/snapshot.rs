//! An informer-cache style, in-process view of one or more clusters
//!
//! Clusters are loaded from a JSON snapshot and kept in memory. Reads are served
//! from the cache and writes (scale, restart) are applied to it, which is what
//! the tool executor expects from a synced informer plus API client.
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use super::{
    ClusterClient, ClusterError, ClusterInfo, ClusterLookup, Deployment, Event, Ingress, Node, Pod,
    Service,
};

const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotPod {
    #[serde(flatten)]
    pub pod: Pod,
    /// Log text keyed by container name
    #[serde(default)]
    pub logs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub id: u64,
    pub name: String,
    pub version: String,
    /// A cluster whose cache has not synced rejects every read
    #[serde(default = "default_ready")]
    pub ready: bool,
    #[serde(default)]
    pub pods: Vec<SnapshotPod>,
    #[serde(default)]
    pub deployments: Vec<Deployment>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub ingresses: Vec<Ingress>,
}

fn default_ready() -> bool {
    true
}

impl ClusterSnapshot {
    pub fn new<S: Into<String>>(id: u64, name: S, version: S) -> Self {
        ClusterSnapshot {
            id,
            name: name.into(),
            version: version.into(),
            ready: true,
            pods: Vec::new(),
            deployments: Vec::new(),
            nodes: Vec::new(),
            events: Vec::new(),
            services: Vec::new(),
            ingresses: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    clusters: Vec<ClusterSnapshot>,
}

#[derive(Debug, Default)]
pub struct SnapshotStore {
    clusters: RwLock<BTreeMap<u64, ClusterSnapshot>>,
}

fn in_namespace<'a>(namespace: Option<&'a str>) -> impl Fn(&str) -> bool + 'a {
    move |candidate| namespace.map_or(true, |ns| ns == candidate)
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: SnapshotFile =
            serde_json::from_str(json).context("Failed to parse cluster snapshot")?;
        let store = Self::new();
        for cluster in file.clusters {
            store.insert(cluster);
        }
        Ok(store)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read cluster snapshot {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn insert(&self, cluster: ClusterSnapshot) {
        let mut clusters = self
            .clusters
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        clusters.insert(cluster.id, cluster);
    }

    pub fn with_cluster(self, cluster: ClusterSnapshot) -> Self {
        self.insert(cluster);
        self
    }

    fn read<T>(
        &self,
        cluster_id: u64,
        f: impl FnOnce(&ClusterSnapshot) -> Result<T, ClusterError>,
    ) -> Result<T, ClusterError> {
        let clusters = self
            .clusters
            .read()
            .map_err(|_| ClusterError::Api("cluster cache lock poisoned".into()))?;
        let cluster = clusters
            .get(&cluster_id)
            .ok_or(ClusterError::UnknownCluster(cluster_id))?;
        if !cluster.ready {
            return Err(ClusterError::NotReady(cluster_id));
        }
        f(cluster)
    }

    fn write<T>(
        &self,
        cluster_id: u64,
        f: impl FnOnce(&mut ClusterSnapshot) -> Result<T, ClusterError>,
    ) -> Result<T, ClusterError> {
        let mut clusters = self
            .clusters
            .write()
            .map_err(|_| ClusterError::Api("cluster cache lock poisoned".into()))?;
        let cluster = clusters
            .get_mut(&cluster_id)
            .ok_or(ClusterError::UnknownCluster(cluster_id))?;
        if !cluster.ready {
            return Err(ClusterError::NotReady(cluster_id));
        }
        f(cluster)
    }
}

fn deployment_mut<'a>(
    cluster: &'a mut ClusterSnapshot,
    namespace: &str,
    name: &str,
) -> Result<&'a mut Deployment, ClusterError> {
    cluster
        .deployments
        .iter_mut()
        .find(|d| d.namespace == namespace && d.name == name)
        .ok_or_else(|| ClusterError::NotFound {
            kind: "Deployment",
            name: format!("{}/{}", namespace, name),
        })
}

#[async_trait]
impl ClusterLookup for SnapshotStore {
    async fn get_cluster(&self, cluster_id: u64) -> Result<ClusterInfo, ClusterError> {
        let clusters = self
            .clusters
            .read()
            .map_err(|_| ClusterError::Api("cluster cache lock poisoned".into()))?;
        clusters
            .get(&cluster_id)
            .map(|c| ClusterInfo {
                id: c.id,
                name: c.name.clone(),
                version: c.version.clone(),
            })
            .ok_or(ClusterError::UnknownCluster(cluster_id))
    }
}

#[async_trait]
impl ClusterClient for SnapshotStore {
    async fn list_pods(
        &self,
        cluster_id: u64,
        namespace: Option<&str>,
    ) -> Result<Vec<Pod>, ClusterError> {
        let matches = in_namespace(namespace);
        self.read(cluster_id, |c| {
            Ok(c.pods
                .iter()
                .filter(|p| matches(&p.pod.namespace))
                .map(|p| p.pod.clone())
                .collect())
        })
    }

    async fn get_pod(
        &self,
        cluster_id: u64,
        namespace: &str,
        name: &str,
    ) -> Result<Pod, ClusterError> {
        self.read(cluster_id, |c| {
            c.pods
                .iter()
                .find(|p| p.pod.namespace == namespace && p.pod.name == name)
                .map(|p| p.pod.clone())
                .ok_or_else(|| ClusterError::NotFound {
                    kind: "Pod",
                    name: format!("{}/{}", namespace, name),
                })
        })
    }

    async fn pod_logs(
        &self,
        cluster_id: u64,
        namespace: &str,
        name: &str,
        container: Option<&str>,
        tail_lines: usize,
    ) -> Result<String, ClusterError> {
        self.read(cluster_id, |c| {
            let pod = c
                .pods
                .iter()
                .find(|p| p.pod.namespace == namespace && p.pod.name == name)
                .ok_or_else(|| ClusterError::NotFound {
                    kind: "Pod",
                    name: format!("{}/{}", namespace, name),
                })?;

            // Without an explicit container, kubectl defaults to the first one
            let container = match container {
                Some(container) => container.to_string(),
                None => pod
                    .pod
                    .containers
                    .first()
                    .map(|c| c.name.clone())
                    .or_else(|| pod.logs.keys().next().cloned())
                    .unwrap_or_default(),
            };
            let text = pod
                .logs
                .get(&container)
                .ok_or_else(|| ClusterError::NotFound {
                    kind: "Container",
                    name: format!("{}/{}/{}", namespace, name, container),
                })?;

            let lines: Vec<&str> = text.lines().collect();
            let start = lines.len().saturating_sub(tail_lines);
            Ok(lines[start..].join("\n"))
        })
    }

    async fn list_deployments(
        &self,
        cluster_id: u64,
        namespace: Option<&str>,
    ) -> Result<Vec<Deployment>, ClusterError> {
        let matches = in_namespace(namespace);
        self.read(cluster_id, |c| {
            Ok(c.deployments
                .iter()
                .filter(|d| matches(&d.namespace))
                .cloned()
                .collect())
        })
    }

    async fn get_deployment(
        &self,
        cluster_id: u64,
        namespace: &str,
        name: &str,
    ) -> Result<Deployment, ClusterError> {
        self.read(cluster_id, |c| {
            c.deployments
                .iter()
                .find(|d| d.namespace == namespace && d.name == name)
                .cloned()
                .ok_or_else(|| ClusterError::NotFound {
                    kind: "Deployment",
                    name: format!("{}/{}", namespace, name),
                })
        })
    }

    async fn list_nodes(&self, cluster_id: u64) -> Result<Vec<Node>, ClusterError> {
        self.read(cluster_id, |c| Ok(c.nodes.clone()))
    }

    async fn get_node(&self, cluster_id: u64, name: &str) -> Result<Node, ClusterError> {
        self.read(cluster_id, |c| {
            c.nodes
                .iter()
                .find(|n| n.name == name)
                .cloned()
                .ok_or_else(|| ClusterError::NotFound {
                    kind: "Node",
                    name: name.to_string(),
                })
        })
    }

    async fn list_events(
        &self,
        cluster_id: u64,
        namespace: Option<&str>,
    ) -> Result<Vec<Event>, ClusterError> {
        let matches = in_namespace(namespace);
        self.read(cluster_id, |c| {
            Ok(c.events
                .iter()
                .filter(|e| matches(&e.namespace))
                .cloned()
                .collect())
        })
    }

    async fn list_services(
        &self,
        cluster_id: u64,
        namespace: Option<&str>,
    ) -> Result<Vec<Service>, ClusterError> {
        let matches = in_namespace(namespace);
        self.read(cluster_id, |c| {
            Ok(c.services
                .iter()
                .filter(|s| matches(&s.namespace))
                .cloned()
                .collect())
        })
    }

    async fn list_ingresses(
        &self,
        cluster_id: u64,
        namespace: Option<&str>,
    ) -> Result<Vec<Ingress>, ClusterError> {
        let matches = in_namespace(namespace);
        self.read(cluster_id, |c| {
            Ok(c.ingresses
                .iter()
                .filter(|i| matches(&i.namespace))
                .cloned()
                .collect())
        })
    }

    async fn scale_deployment(
        &self,
        cluster_id: u64,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError> {
        if replicas < 0 {
            return Err(ClusterError::Api(format!(
                "replicas must be non-negative, got {}",
                replicas
            )));
        }
        self.write(cluster_id, |c| {
            deployment_mut(c, namespace, name)?.replicas = replicas;
            Ok(())
        })
    }

    async fn restart_deployment(
        &self,
        cluster_id: u64,
        namespace: &str,
        name: &str,
        restarted_at: DateTime<Utc>,
    ) -> Result<(), ClusterError> {
        self.write(cluster_id, |c| {
            deployment_mut(c, namespace, name)?
                .template_annotations
                .insert(RESTARTED_AT_ANNOTATION.to_string(), restarted_at.to_rfc3339());
            Ok(())
        })
    }
}
