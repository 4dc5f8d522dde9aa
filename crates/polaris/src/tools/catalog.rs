use serde_json::{json, Value};

use crate::models::tool::Tool;

pub const LIST_PODS: &str = "list_pods";
pub const GET_POD_DETAIL: &str = "get_pod_detail";
pub const GET_POD_LOGS: &str = "get_pod_logs";
pub const LIST_DEPLOYMENTS: &str = "list_deployments";
pub const GET_DEPLOYMENT_DETAIL: &str = "get_deployment_detail";
pub const LIST_NODES: &str = "list_nodes";
pub const GET_NODE_DETAIL: &str = "get_node_detail";
pub const LIST_EVENTS: &str = "list_events";
pub const LIST_SERVICES: &str = "list_services";
pub const LIST_INGRESSES: &str = "list_ingresses";
pub const SCALE_DEPLOYMENT: &str = "scale_deployment";
pub const RESTART_DEPLOYMENT: &str = "restart_deployment";

/// The fixed set of tools offered to the model
#[derive(Debug, Clone)]
pub struct ToolCatalog {
    tools: Vec<Tool>,
}

fn string_param(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

impl ToolCatalog {
    /// The Kubernetes tool set
    pub fn kubernetes() -> Self {
        let namespace_filter =
            string_param("Namespace name; leave empty to cover all namespaces");

        let tools = vec![
            Tool::new(
                LIST_PODS,
                "List pods in a namespace (or all namespaces) with their phase, readiness and restart counts",
                object_schema(json!({ "namespace": namespace_filter }), &[]),
            ),
            Tool::new(
                GET_POD_DETAIL,
                "Get details of a pod, including container states and conditions",
                object_schema(
                    json!({
                        "namespace": string_param("Namespace of the pod"),
                        "name": string_param("Pod name"),
                    }),
                    &["namespace", "name"],
                ),
            ),
            Tool::new(
                GET_POD_LOGS,
                "Get the most recent log lines of a pod (at most 100 lines)",
                object_schema(
                    json!({
                        "namespace": string_param("Namespace of the pod"),
                        "name": string_param("Pod name"),
                        "container": string_param("Container name, only needed for multi-container pods"),
                    }),
                    &["namespace", "name"],
                ),
            ),
            Tool::new(
                LIST_DEPLOYMENTS,
                "List deployments in a namespace (or all namespaces) with their replica counts",
                object_schema(json!({ "namespace": namespace_filter }), &[]),
            ),
            Tool::new(
                GET_DEPLOYMENT_DETAIL,
                "Get details of a deployment",
                object_schema(
                    json!({
                        "namespace": string_param("Namespace of the deployment"),
                        "name": string_param("Deployment name"),
                    }),
                    &["namespace", "name"],
                ),
            ),
            Tool::new(
                LIST_NODES,
                "List all nodes of the cluster with their status, roles and capacity",
                object_schema(json!({}), &[]),
            ),
            Tool::new(
                GET_NODE_DETAIL,
                "Get details of a node, including allocatable resources, conditions and taints",
                object_schema(json!({ "name": string_param("Node name") }), &["name"]),
            ),
            Tool::new(
                LIST_EVENTS,
                "List the 50 most recent Kubernetes events of a namespace, optionally for a single resource",
                object_schema(
                    json!({
                        "namespace": namespace_filter,
                        "resource_name": string_param("Only return events involving this resource"),
                    }),
                    &[],
                ),
            ),
            Tool::new(
                LIST_SERVICES,
                "List services in a namespace (or all namespaces)",
                object_schema(json!({ "namespace": namespace_filter }), &[]),
            ),
            Tool::new(
                LIST_INGRESSES,
                "List ingresses in a namespace (or all namespaces)",
                object_schema(json!({ "namespace": namespace_filter }), &[]),
            ),
            Tool::mutating(
                SCALE_DEPLOYMENT,
                "Scale a deployment (write operation, requires user confirmation)",
                object_schema(
                    json!({
                        "namespace": string_param("Namespace of the deployment"),
                        "name": string_param("Deployment name"),
                        "replicas": { "type": "integer", "description": "Target replica count" },
                        "confirmed": {
                            "type": "boolean",
                            "description": "Whether the user has confirmed; the first call must be false to ask for confirmation"
                        },
                    }),
                    &["namespace", "name", "replicas"],
                ),
            ),
            Tool::mutating(
                RESTART_DEPLOYMENT,
                "Restart a deployment via rollout restart (write operation, requires user confirmation)",
                object_schema(
                    json!({
                        "namespace": string_param("Namespace of the deployment"),
                        "name": string_param("Deployment name"),
                        "confirmed": {
                            "type": "boolean",
                            "description": "Whether the user has confirmed the restart"
                        },
                    }),
                    &["namespace", "name"],
                ),
            ),
        ];

        Self { tools }
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|tool| tool.name == name)
    }
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::kubernetes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tool::ToolKind;

    #[test]
    fn test_kubernetes_catalog_classification() {
        let catalog = ToolCatalog::kubernetes();
        assert_eq!(catalog.tools().len(), 12);

        let mutating: Vec<&str> = catalog
            .tools()
            .iter()
            .filter(|tool| tool.is_mutating())
            .map(|tool| tool.name.as_str())
            .collect();
        assert_eq!(mutating, vec![SCALE_DEPLOYMENT, RESTART_DEPLOYMENT]);

        assert_eq!(catalog.get(LIST_PODS).unwrap().kind, ToolKind::ReadOnly);
        assert!(catalog.get("delete_cluster").is_none());
    }

    #[test]
    fn test_openai_spec_shape() {
        let catalog = ToolCatalog::kubernetes();
        let scale = catalog.get(SCALE_DEPLOYMENT).unwrap().to_openai_spec();

        assert_eq!(scale["type"], "function");
        assert_eq!(scale["function"]["parameters"]["type"], "object");
        assert_eq!(
            scale["function"]["parameters"]["required"],
            json!(["namespace", "name", "replicas"])
        );
        assert_eq!(
            scale["function"]["parameters"]["properties"]["confirmed"]["type"],
            "boolean"
        );
    }

    #[test]
    fn test_tool_names_unique() {
        let catalog = ToolCatalog::kubernetes();
        let names: std::collections::HashSet<&str> =
            catalog.tools().iter().map(|tool| tool.name.as_str()).collect();
        assert_eq!(names.len(), catalog.tools().len());
    }
}
